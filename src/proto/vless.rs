// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! VLESS request parsing.
//!
//! ```text
//! | Version | UUID | AddonsLen | Addons | Command | Port | ATYP | Addr | Payload |
//! |    1    |  16  |     1     |  Var   |    1    |  2   |  1   | Var  |   Var   |
//! ```

use std::collections::HashSet;

use crate::addr::{decode_port_then_addr, AddrError, AddrTable};
use crate::error::RelayError;

use super::{Ack, Command, HandshakeParser, HandshakeResult, ParseOutcome};

const VERSION: u8 = 0x00;
const CMD_TCP: u8 = 0x01;
const CMD_UDP: u8 = 0x02;
const CMD_MUX: u8 = 0x03;

pub struct VlessParser {
    allowed_uuids: HashSet<[u8; 16]>,
}

impl VlessParser {
    pub fn new(allowed_uuids: HashSet<[u8; 16]>) -> Self {
        Self { allowed_uuids }
    }
}

impl HandshakeParser for VlessParser {
    fn parse(&self, buf: &[u8]) -> ParseOutcome {
        match parse_inner(buf, &self.allowed_uuids) {
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
    allowed_uuids: &HashSet<[u8; 16]>,
) -> Result<Option<HandshakeResult>, RelayError> {
    if buf.len() < 18 {
        return Ok(None);
    }
    if buf[0] != VERSION {
        return Err(RelayError::BadHandshake("unexpected vless version"));
    }

    let mut uuid = [0u8; 16];
    uuid.copy_from_slice(&buf[1..17]);
    if !allowed_uuids.contains(&uuid) {
        return Err(RelayError::Unauthorized);
    }

    let addons_len = buf[17] as usize;
    let after_addons = 18 + addons_len;
    if buf.len() < after_addons + 1 {
        return Ok(None);
    }
    let command_byte = buf[after_addons];
    let addr_offset = after_addons + 1;

    let command = match command_byte {
        CMD_TCP => Command::Tcp,
        CMD_UDP | CMD_MUX => {
            return Err(RelayError::UnsupportedCommand);
        }
        _ => return Err(RelayError::BadHandshake("unknown vless command")),
    };

    let (target, addr_len) = match decode_port_then_addr(&buf[addr_offset..], AddrTable::Vless) {
        Ok(ok) => ok,
        Err(AddrError::ShortBuffer) => return Ok(None),
        Err(AddrError::Invalid) => return Err(RelayError::BadHandshake("invalid vless address")),
    };

    let leftover = buf[addr_offset + addr_len..].to_vec();
    Ok(Some(HandshakeResult { target, command, ack: Ack::SignalByte, leftover }))
}

/// Parse a hex UUID string (with or without hyphens) into 16 raw bytes, for building the
/// allow-list from configuration. Comparison against the wire bytes is then a plain equality
/// check, matching "hex form compared case-insensitive, hyphen-stripped".
pub fn parse_uuid_hex(s: &str) -> Option<[u8; 16]> {
    let stripped: String = s.chars().filter(|c| *c != '-').collect();
    if stripped.len() != 32 {
        return None;
    }
    let mut out = [0u8; 16];
    for i in 0..16 {
        out[i] = u8::from_str_radix(&stripped[2 * i..2 * i + 2], 16).ok()?;
    }
    Some(out)
}
