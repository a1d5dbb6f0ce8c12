//! Permission bits
//!
//! Modes are kept as octal strings on file nodes (`"644"`, `"4755"`) and
//! parsed into [`Mode`] whenever a decision or a rendering is needed.

use std::fmt;

pub const SETUID: u8 = 4;
pub const SETGID: u8 = 2;
pub const STICKY: u8 = 1;

/// Default mode for new regular files
pub const DEFAULT_FILE_MODE: &str = "0644";

/// Mode every directory reports
pub const DIR_MODE: &str = "0755";

/// A parsed four-digit octal mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mode {
    pub special: u8,
    pub owner: u8,
    pub group: u8,
    pub other: u8,
}

impl Mode {
    /// Parse a 3 or 4 digit octal string. Anything else is rejected.
    pub fn parse(s: &str) -> Option<Mode> {
        if !(3..=4).contains(&s.len()) {
            return None;
        }
        let digits: Vec<u8> = s
            .chars()
            .map(|c| c.to_digit(8).map(|d| d as u8))
            .collect::<Option<_>>()?;
        let (special, rest) = if digits.len() == 4 {
            (digits[0], &digits[1..])
        } else {
            (0, &digits[..])
        };
        Some(Mode {
            special,
            owner: rest[0],
            group: rest[1],
            other: rest[2],
        })
    }

    /// Mode of a stored permissions field, falling back to the file default
    pub fn of(permissions: Option<&str>) -> Mode {
        permissions
            .and_then(Mode::parse)
            .or_else(|| Mode::parse(DEFAULT_FILE_MODE))
            .unwrap_or(Mode {
                special: 0,
                owner: 6,
                group: 4,
                other: 4,
            })
    }

    pub fn is_setuid(&self) -> bool {
        self.special & SETUID != 0
    }

    pub fn is_setgid(&self) -> bool {
        self.special & SETGID != 0
    }

    pub fn is_sticky(&self) -> bool {
        self.special & STICKY != 0
    }

    /// The mode as a 12-bit number
    pub fn bits(&self) -> u16 {
        (self.special as u16) << 9 | (self.owner as u16) << 6 | (self.group as u16) << 3 | self.other as u16
    }

    /// Execute check used for `./name`: parity of the owner digit
    pub fn owner_executable(&self) -> bool {
        self.owner & 1 == 1
    }

    /// Apply a chmod argument to this mode.
    ///
    /// Accepts octal (`644`, `4755`) and the symbolic forms `+x`, `-x`,
    /// `u+s`, `u-s`, `g+s`, `g-s`, `+t`, `-t`.
    pub fn apply(&self, spec: &str) -> Option<Mode> {
        if let Some(mode) = Mode::parse(spec) {
            return Some(mode);
        }
        let mut m = *self;
        match spec {
            "+x" | "a+x" => {
                m.owner |= 1;
                m.group |= 1;
                m.other |= 1;
            }
            "-x" | "a-x" => {
                m.owner &= !1;
                m.group &= !1;
                m.other &= !1;
            }
            "u+x" => m.owner |= 1,
            "u-x" => m.owner &= !1,
            "u+s" => m.special |= SETUID,
            "u-s" => m.special &= !SETUID,
            "g+s" => m.special |= SETGID,
            "g-s" => m.special &= !SETGID,
            "+t" | "o+t" => m.special |= STICKY,
            "-t" | "o-t" => m.special &= !STICKY,
            _ => return None,
        }
        Some(m)
    }

    /// The nine permission characters, e.g. `rwsr-xr-x`
    pub fn symbolic(&self) -> String {
        let mut out = String::with_capacity(9);
        out.push_str(&triplet(self.owner, self.is_setuid(), 's'));
        out.push_str(&triplet(self.group, self.is_setgid(), 's'));
        out.push_str(&triplet(self.other, self.is_sticky(), 't'));
        out
    }
}

fn triplet(bits: u8, special: bool, special_char: char) -> String {
    let r = if bits & 4 != 0 { 'r' } else { '-' };
    let w = if bits & 2 != 0 { 'w' } else { '-' };
    let x = match (bits & 1 != 0, special) {
        (true, true) => special_char,
        (false, true) => special_char.to_ascii_uppercase(),
        (true, false) => 'x',
        (false, false) => '-',
    };
    format!("{}{}{}", r, w, x)
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}{}", self.special, self.owner, self.group, self.other)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_three_digits_defaults_special() {
        let m = Mode::parse("644").unwrap();
        assert_eq!(m.special, 0);
        assert_eq!(m.to_string(), "0644");
    }

    #[test]
    fn test_parse_four_digits() {
        let m = Mode::parse("4755").unwrap();
        assert!(m.is_setuid());
        assert!(!m.is_setgid());
        assert!(!m.is_sticky());
        assert!(m.owner_executable());
        assert_eq!(m.symbolic(), "rwsr-xr-x");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(Mode::parse("9999").is_none());
        assert!(Mode::parse("75").is_none());
        assert!(Mode::parse("07555").is_none());
        assert!(Mode::parse("rwx").is_none());
    }

    #[test]
    fn test_special_bits_combine() {
        let m = Mode::parse("7777").unwrap();
        assert!(m.is_setuid() && m.is_setgid() && m.is_sticky());
        assert_eq!(m.symbolic(), "rwsrwsrwt");
        let m = Mode::parse("1644").unwrap();
        assert_eq!(m.symbolic(), "rw-r--r-T");
    }

    #[test]
    fn test_owner_parity() {
        assert!(!Mode::parse("644").unwrap().owner_executable());
        assert!(Mode::parse("100").unwrap().owner_executable());
        assert!(!Mode::parse("611").unwrap().owner_executable());
    }

    #[test]
    fn test_symbolic_apply() {
        let m = Mode::parse("644").unwrap();
        assert_eq!(m.apply("+x").unwrap().to_string(), "0755");
        assert_eq!(m.apply("u+s").unwrap().to_string(), "4644");
        let m = Mode::parse("4755").unwrap();
        assert_eq!(m.apply("u-s").unwrap().to_string(), "0755");
        assert!(m.apply("q+z").is_none());
    }

    #[test]
    fn test_bits() {
        assert_eq!(Mode::parse("4755").unwrap().bits(), 0o4755);
        assert_eq!(Mode::parse("644").unwrap().bits(), 0o644);
    }
}
