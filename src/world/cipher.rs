//! Scripted vault "encryption"
//!
//! Not cryptography: a repeating-key XOR wrapped in base64 and an armor
//! block. The armor carries a check token (the word `GHOST` under the same
//! key) so a wrong key can be told apart from a right one, and an optional
//! time lock expressed as a minimum clock offset in seconds.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use thiserror::Error;

const BEGIN: &str = "-----BEGIN GHOSTCRYPT-----";
const END: &str = "-----END GHOSTCRYPT-----";
const CHECK_WORD: &[u8] = b"GHOST";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CipherError {
    #[error("not a GHOSTCRYPT file")]
    NotEncrypted,
    #[error("bad key")]
    BadKey,
    #[error("time lock active for another {0}s")]
    TimeLocked(i64),
}

fn xor(data: &[u8], key: &[u8]) -> Vec<u8> {
    if key.is_empty() {
        return data.to_vec();
    }
    data.iter()
        .zip(key.iter().cycle())
        .map(|(d, k)| d ^ k)
        .collect()
}

/// Armor `plaintext` under `key`, optionally locked until the clock offset
/// reaches `lock` seconds.
pub fn seal(plaintext: &str, key: &str, lock: Option<i64>) -> String {
    let mut out = String::new();
    out.push_str(BEGIN);
    out.push('\n');
    out.push_str(&format!("check: {}\n", STANDARD.encode(xor(CHECK_WORD, key.as_bytes()))));
    if let Some(lock) = lock {
        out.push_str(&format!("lock: {}\n", lock));
    }
    out.push_str(&STANDARD.encode(xor(plaintext.as_bytes(), key.as_bytes())));
    out.push('\n');
    out.push_str(END);
    out
}

/// Is this content an armored vault file?
pub fn is_sealed(content: &str) -> bool {
    content.trim_start().starts_with(BEGIN)
}

/// Recover the plaintext of an armored file
pub fn open(armored: &str, key: &str, clock_offset: i64) -> Result<String, CipherError> {
    if !is_sealed(armored) {
        return Err(CipherError::NotEncrypted);
    }
    let mut check = None;
    let mut lock = None;
    let mut body = None;
    for line in armored.lines().map(str::trim) {
        if line == BEGIN || line == END || line.is_empty() {
            continue;
        }
        if let Some(v) = line.strip_prefix("check: ") {
            check = Some(v);
        } else if let Some(v) = line.strip_prefix("lock: ") {
            lock = v.parse::<i64>().ok();
        } else {
            body = Some(line);
        }
    }
    let check = check.ok_or(CipherError::NotEncrypted)?;
    let body = body.ok_or(CipherError::NotEncrypted)?;

    let check = STANDARD.decode(check).map_err(|_| CipherError::NotEncrypted)?;
    if xor(&check, key.as_bytes()) != CHECK_WORD {
        return Err(CipherError::BadKey);
    }
    if let Some(lock) = lock {
        if clock_offset < lock {
            return Err(CipherError::TimeLocked(lock - clock_offset));
        }
    }
    let data = STANDARD.decode(body).map_err(|_| CipherError::NotEncrypted)?;
    String::from_utf8(xor(&data, key.as_bytes())).map_err(|_| CipherError::BadKey)
}
