//! Password cracking and vault decryption

use super::{args_to_strs, check_help, fail, guard_read, guard_write, with_alert};
use crate::mission;
use crate::shell::executor::{Action, CommandResult, Invocation};
use crate::shell::session::Session;
use crate::vfs::{Vfs, is_within, join};
use crate::world::cipher::{self, CipherError};
use crate::world::{CRACKABLE_HASH, ROOT_PASSWORD, VAULT_DIR};
use serde_json::json;

/// Marker every crypt(3) SHA-512 hash starts with
const SHA512_PREFIX: &str = "$6$";

/// john - crack password hashes
pub fn prog_john(inv: &Invocation, vfs: &mut Vfs, session: &mut Session) -> CommandResult {
    let args = args_to_strs(inv.args);

    if let Some(help) = check_help(&args, "Usage: john PASSWORD-FILE\nCrack the password hashes in a shadow-style file.") {
        return help;
    }

    let Some(file) = args.iter().find(|a| !a.starts_with('-')).copied() else {
        return CommandResult::text("Usage: john [OPTIONS] PASSWORD-FILE");
    };
    let path = inv.path(session, file);
    if let Err(e) = guard_read(vfs, &path) {
        return CommandResult::text(fail("john", file, e));
    }
    let content = match vfs.read_file(&path) {
        Ok(content) => content,
        Err(e) => return CommandResult::text(fail("john", file, e)),
    };

    // (user, hash) for every shadow line with a SHA-512 hash
    let hashes: Vec<(String, String)> = content
        .lines()
        .filter_map(|line| {
            let mut fields = line.split(':');
            let user = fields.next()?;
            let hash = fields.next()?;
            hash.starts_with(SHA512_PREFIX).then(|| (user.to_string(), hash.to_string()))
        })
        .collect();
    if hashes.is_empty() {
        return CommandResult::text("No password hashes loaded (see FAQ)");
    }

    let mut out = vec![
        format!(
            "Loaded {} password hash{} (sha512crypt, crypt(3) $6$ [SHA512 128/128 AVX 2x])",
            hashes.len(),
            if hashes.len() == 1 { "" } else { "es" }
        ),
        "Press 'q' or Ctrl-C to abort, almost any other key for status".to_string(),
    ];
    let Some((user, hash)) = hashes.into_iter().find(|(_, h)| h.starts_with(CRACKABLE_HASH)) else {
        out.push("0g 0:00:05:00 DONE (2026-01-01 00:05) 0g/s 1923p/s 1923c/s".to_string());
        out.push("Session completed. No password cracked.".to_string());
        return CommandResult::text(out.join("\n"));
    };

    out.push(format!("{:<16} ({})", ROOT_PASSWORD, user));
    out.push("1g 0:00:00:04 DONE (2026-01-01 00:00) 0.2331g/s 1489p/s 1489c/s".to_string());
    out.push("Use the \"--show\" option to display all of the cracked passwords reliably".to_string());
    out.push("Session completed.".to_string());

    let pot_dir = join(session.home(), ".john");
    let pot = join(&pot_dir, "john.pot");
    let entry = format!("{}:{}", hash, ROOT_PASSWORD);
    let known = vfs.read_file(&pot).is_ok_and(|c| c.lines().any(|l| l == entry));
    if !known {
        let written = vfs
            .create_dir_all(&pot_dir)
            .and_then(|_| vfs.append_file(&pot, &entry));
        if let Err(e) = written {
            log::warn!("[john] could not write {}: {}", pot, e);
        }
    }
    mission::mark(vfs, "crack");
    log::info!("[john] cracked hash for {}", user);

    CommandResult::text(out.join("\n"))
        .with_action(Action::Crack)
        .with_data(json!({
            "hash": hash,
            "password": ROOT_PASSWORD,
            "user": user,
        }))
}

/// Where the plaintext of `path` goes
fn plaintext_path(path: &str) -> String {
    match path.strip_suffix(".enc") {
        Some(stem) if !stem.ends_with('/') => stem.to_string(),
        _ => format!("{}.out", path),
    }
}

/// decrypt - open a vault file with its key
pub fn prog_decrypt(inv: &Invocation, vfs: &mut Vfs, session: &mut Session) -> CommandResult {
    let args = args_to_strs(inv.args);

    if let Some(help) = check_help(&args, "Usage: decrypt FILE KEY\nDecrypt a GHOSTCRYPT file; the plaintext is written next to it.") {
        return help;
    }

    let [file, key] = args.as_slice() else {
        return CommandResult::text("usage: decrypt FILE KEY");
    };
    let path = inv.path(session, file);
    if let Err(e) = guard_read(vfs, &path) {
        return CommandResult::text(fail("decrypt", file, e));
    }
    let content = match vfs.read_file(&path) {
        Ok(content) => content,
        Err(e) => return CommandResult::text(fail("decrypt", file, e)),
    };

    let plaintext = match cipher::open(content, key, session.clock_offset) {
        Ok(plaintext) => plaintext,
        Err(CipherError::BadKey) => {
            session.raise_alert(1);
            return with_alert(CommandResult::text(fail("decrypt", file, CipherError::BadKey)), session);
        }
        Err(e) => return CommandResult::text(fail("decrypt", file, e)),
    };

    let output = plaintext_path(&path);
    if let Err(e) = guard_write(vfs, session, &output) {
        return CommandResult::text(fail("decrypt", &output, e));
    }
    if let Err(e) = vfs.write_file(&output, &plaintext) {
        return CommandResult::text(fail("decrypt", &output, e));
    }

    // Only vault originals count, once each
    let real = vfs.real_path(&path);
    if is_within(&real, VAULT_DIR) && !session.decrypted.contains(&real) {
        session.decrypted.push(real.clone());
        session.decrypt_count += 1;
        log::info!("[decrypt] {} ({} total)", real, session.decrypt_count);
    }

    CommandResult::text(format!("[+] {} -> {}\n{}", file, output, plaintext))
        .with_action(Action::Decrypt)
        .with_data(json!({
            "file": path,
            "output": output,
            "count": session.decrypt_count,
        }))
}
