//! Encoding utility programs

use super::{args_to_strs, check_help, read_input, split_flags};
use crate::shell::executor::{CommandResult, Invocation};
use crate::shell::session::Session;
use crate::vfs::Vfs;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;

/// Base64 encode or decode
pub fn prog_base64(inv: &Invocation, vfs: &Vfs, session: &Session) -> CommandResult {
    let args = args_to_strs(inv.args);

    if let Some(help) = check_help(&args, "Usage: base64 [-d] [FILE]\nBase64 encode or decode.\n  -d  Decode") {
        return help;
    }

    let decode = args.contains(&"--decode");
    let args: Vec<&str> = args.into_iter().filter(|a| *a != "--decode").collect();
    let (flags, files) = split_flags(&args);
    let decode = decode || flags.contains(&'d');

    let input = match read_input(inv, vfs, session, files.first().copied()) {
        Ok(input) => input,
        Err(e) => return CommandResult::text(e),
    };

    if !decode {
        return CommandResult::text(STANDARD.encode(input.as_bytes()));
    }
    let compact: String = input.chars().filter(|c| !c.is_whitespace()).collect();
    match STANDARD.decode(compact.as_bytes()) {
        Ok(bytes) => CommandResult::text(String::from_utf8_lossy(&bytes).into_owned()),
        Err(_) => CommandResult::text("base64: invalid input"),
    }
}
