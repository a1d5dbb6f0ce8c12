//! Mission progress
//!
//! A read-only view derived from the filesystem (and the decrypt counter)
//! every time it is asked for. There is deliberately no stored progress
//! field: marker files are the single source of truth.

use crate::shell::Session;
use crate::vfs::{Vfs, join};
use crate::world::MISSION_DIR;
use serde::Serialize;

/// Decrypted vault files needed for the decrypt objective
pub const DECRYPT_THRESHOLD: u32 = 3;

/// Hint shown once every objective is complete
pub const FINAL_HINT: &str = "All objectives complete. Type 'disconnect' to vanish.";

/// How an objective is judged complete
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// A marker file under the mission directory exists
    Marker,
    /// The decrypt counter reached a threshold
    DecryptCount(u32),
}

/// One puzzle objective
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Objective {
    pub id: &'static str,
    pub title: &'static str,
    pub hint: &'static str,
    pub completion: Completion,
}

impl Objective {
    /// Marker path for this objective
    pub fn marker(&self) -> String {
        join(MISSION_DIR, self.id)
    }

    pub fn is_complete(&self, vfs: &Vfs, session: &Session) -> bool {
        match self.completion {
            Completion::Marker => vfs.exists(&self.marker()),
            Completion::DecryptCount(threshold) => session.decrypt_count >= threshold,
        }
    }
}

/// The fixed objective ordering
pub const OBJECTIVES: &[Objective] = &[
    Objective {
        id: "recon",
        title: "Map the target network",
        hint: "Read ~/README.txt, then scan the subnet it names with nmap.",
        completion: Completion::Marker,
    },
    Objective {
        id: "crack",
        title: "Crack the leaked password hash",
        hint: "There is a shadow backup on /mnt/backup. Feed it to john.",
        completion: Completion::Marker,
    },
    Objective {
        id: "escalate",
        title: "Get a root shell",
        hint: "su root with the cracked password, or overflow the setuid binary in /opt/bin.",
        completion: Completion::Marker,
    },
    Objective {
        id: "decrypt",
        title: "Decrypt three vault files",
        hint: "Mount /dev/sdc1 for the keys, then: decrypt /root/vault/FILE KEY.",
        completion: Completion::DecryptCount(DECRYPT_THRESHOLD),
    },
    Objective {
        id: "persist",
        title: "Plant the rootkit",
        hint: "Load the kernel module from the USB stick with insmod.",
        completion: Completion::Marker,
    },
    Objective {
        id: "exfil",
        title: "Exfiltrate the vault",
        hint: "Archive /root/vault with tar and scp it to the dropzone (10.0.13.66).",
        completion: Completion::Marker,
    },
    Objective {
        id: "cover",
        title: "Cover your tracks",
        hint: "Wipe /var/log/auth.log. It is immutable, so chattr -i it first.",
        completion: Completion::Marker,
    },
];

pub fn find_objective(id: &str) -> Option<&'static Objective> {
    OBJECTIVES.iter().find(|o| o.id == id)
}

/// Create an objective's marker. Idempotent.
pub fn mark(vfs: &mut Vfs, id: &str) -> bool {
    let Some(objective) = find_objective(id) else {
        return false;
    };
    if objective.completion != Completion::Marker {
        return false;
    }
    let marker = objective.marker();
    if vfs.exists(&marker) {
        return false;
    }
    let _ = vfs.create_dir_all(MISSION_DIR);
    let created = vfs.write_file(&marker, "").is_ok();
    if created {
        log::info!("[mission] objective complete: {}", id);
    }
    created
}

/// Step function from percentage to rank
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum Rank {
    #[serde(rename = "Script Kiddie")]
    ScriptKiddie,
    Novice,
    Operator,
    Infiltrator,
    Elite,
    Ghost,
}

impl Rank {
    pub fn from_percent(percent: u8) -> Rank {
        match percent {
            0..=14 => Rank::ScriptKiddie,
            15..=29 => Rank::Novice,
            30..=49 => Rank::Operator,
            50..=69 => Rank::Infiltrator,
            70..=99 => Rank::Elite,
            _ => Rank::Ghost,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Rank::ScriptKiddie => "Script Kiddie",
            Rank::Novice => "Novice",
            Rank::Operator => "Operator",
            Rank::Infiltrator => "Infiltrator",
            Rank::Elite => "Elite",
            Rank::Ghost => "Ghost",
        }
    }
}

/// Snapshot of mission progress
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    pub percent: u8,
    pub rank: Rank,
    pub completed: Vec<&'static str>,
    pub total: usize,
    pub next_hint: String,
}

impl Progress {
    pub fn is_complete(&self) -> bool {
        self.completed.len() == self.total
    }
}

/// Derive progress from scratch
pub fn evaluate(vfs: &Vfs, session: &Session) -> Progress {
    let completed: Vec<&'static str> = OBJECTIVES
        .iter()
        .filter(|o| o.is_complete(vfs, session))
        .map(|o| o.id)
        .collect();
    let total = OBJECTIVES.len();
    let percent = ((completed.len() as f64 / total as f64) * 100.0).round() as u8;
    let next_hint = OBJECTIVES
        .iter()
        .find(|o| !o.is_complete(vfs, session))
        .map(|o| o.hint.to_string())
        .unwrap_or_else(|| FINAL_HINT.to_string());
    Progress {
        percent,
        rank: Rank::from_percent(percent),
        completed,
        total,
        next_hint,
    }
}

/// The `status` panel
pub fn render(vfs: &Vfs, session: &Session) -> String {
    let progress = evaluate(vfs, session);
    let mut out = String::new();
    out.push_str(&format!(
        "\x1b[1;36mMISSION STATUS\x1b[0m  {}%  rank: {}\n",
        progress.percent,
        progress.rank.as_str()
    ));
    for objective in OBJECTIVES {
        let done = objective.is_complete(vfs, session);
        let mark = if done { "\x1b[32m[x]\x1b[0m" } else { "[ ]" };
        let extra = match objective.completion {
            Completion::DecryptCount(n) => format!(" ({}/{})", session.decrypt_count.min(n), n),
            Completion::Marker => String::new(),
        };
        out.push_str(&format!("{} {}{}\n", mark, objective.title, extra));
    }
    out.push_str(&format!("alert level: {}\n", session.alert_level));
    out.push_str(&format!("next: {}", progress.next_hint));
    out
}
