// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Trojan request parsing.
//!
//! ```text
//! | Password Hex(56) | CRLF | Command | ATYP | Addr | Port | CRLF | Payload |
//! |        56        |  2   |    1    |  1   | Var  |  2   |  2   |   Var   |
//! ```
//!
//! The password field is the lowercase hex-encoded SHA-224 digest of the plaintext password,
//! always exactly 56 characters. We never see the plaintext: the allow-list is built from
//! pre-hashed configuration values so the wire bytes can be compared directly.

use std::collections::HashSet;

use crate::addr::{decode, AddrError, AddrTable};
use crate::error::RelayError;

use super::{Ack, Command, HandshakeParser, HandshakeResult, ParseOutcome, CRLF};

pub const PASSWORD_HEX_LEN: usize = 56;
const CMD_TCP: u8 = 0x01;
const CMD_UDP: u8 = 0x03;

pub struct TrojanParser {
    /// Hex-encoded SHA-224 digests, lowercase. `None` disables password checking entirely.
    allowed_hashes: Option<HashSet<[u8; PASSWORD_HEX_LEN]>>,
}

impl TrojanParser {
    pub fn new(allowed_hashes: Option<HashSet<[u8; PASSWORD_HEX_LEN]>>) -> Self {
        Self { allowed_hashes }
    }
}

impl HandshakeParser for TrojanParser {
    fn parse(&self, buf: &[u8]) -> ParseOutcome {
        match parse_inner(buf, self.allowed_hashes.as_ref()) {
            Ok(Some(result)) => ParseOutcome::Ok(result),
            Ok(None) => ParseOutcome::NeedMore,
            Err(e) => ParseOutcome::Fail(e),
        }
    }

    fn failure_ack(&self) -> &'static [u8] {
        &[0x01]
    }
}

fn parse_inner(
    buf: &[u8],
    allowed_hashes: Option<&HashSet<[u8; PASSWORD_HEX_LEN]>>,
) -> Result<Option<HandshakeResult>, RelayError> {
    if buf.len() < PASSWORD_HEX_LEN + 2 {
        return Ok(None);
    }

    let password = &buf[0..PASSWORD_HEX_LEN];
    if !password.iter().all(|b| b.is_ascii_hexdigit()) {
        return Err(RelayError::BadHandshake("trojan password is not hex"));
    }
    if &buf[PASSWORD_HEX_LEN..PASSWORD_HEX_LEN + 2] != CRLF {
        return Err(RelayError::BadHandshake("missing CRLF after trojan password"));
    }

    if let Some(allowed) = allowed_hashes {
        let lower: [u8; PASSWORD_HEX_LEN] = {
            let mut out = [0u8; PASSWORD_HEX_LEN];
            for (i, b) in password.iter().enumerate() {
                out[i] = b.to_ascii_lowercase();
            }
            out
        };
        if !allowed.contains(&lower) {
            return Err(RelayError::Unauthorized);
        }
    }

    let after_crlf = PASSWORD_HEX_LEN + 2;
    let command_byte = match buf.get(after_crlf) {
        Some(b) => *b,
        None => return Ok(None),
    };
    let command = match command_byte {
        CMD_TCP => Command::Tcp,
        CMD_UDP => Command::Udp,
        _ => return Err(RelayError::BadHandshake("unknown trojan command")),
    };

    let addr_offset = after_crlf + 1;
    let (target, addr_len) = match decode(&buf[addr_offset..], AddrTable::Trojan) {
        Ok(ok) => ok,
        Err(AddrError::ShortBuffer) => return Ok(None),
        Err(AddrError::Invalid) => return Err(RelayError::BadHandshake("invalid trojan address")),
    };

    let crlf_offset = addr_offset + addr_len;
    if buf.len() < crlf_offset + 2 {
        return Ok(None);
    }
    if &buf[crlf_offset..crlf_offset + 2] != CRLF {
        return Err(RelayError::BadHandshake("missing CRLF after trojan address"));
    }

    if command == Command::Udp {
        return Err(RelayError::UnsupportedCommand);
    }

    let leftover = buf[crlf_offset + 2..].to_vec();
    Ok(Some(HandshakeResult { target, command, ack: Ack::SignalByte, leftover }))
}

/// Hex-encode a SHA-224 digest to the lowercase 56-byte form used on the wire, for building the
/// allow-list from plaintext passwords in configuration.
pub fn hash_password(password: &str) -> [u8; PASSWORD_HEX_LEN] {
    use sha2::{Digest, Sha224};
    let digest = Sha224::digest(password.as_bytes());
    let mut out = [0u8; PASSWORD_HEX_LEN];
    const HEX: &[u8; 16] = b"0123456789abcdef";
    for (i, byte) in digest.iter().enumerate() {
        out[2 * i] = HEX[(byte >> 4) as usize];
        out[2 * i + 1] = HEX[(byte & 0x0f) as usize];
    }
    out
}
