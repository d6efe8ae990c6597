// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Raw TCP request parsing: a bare address field with no auth and no framing beyond it.
//!
//! ```text
//! | ATYP | Addr | Port | Payload |
//! |  1   | Var  |  2   |   Var   |
//! ```

use crate::addr::{decode, AddrError, AddrTable};
use crate::error::RelayError;

use super::{Ack, Command, HandshakeParser, HandshakeResult, ParseOutcome};

pub struct RawTcpParser;

impl HandshakeParser for RawTcpParser {
    fn parse(&self, buf: &[u8]) -> ParseOutcome {
        match decode(buf, AddrTable::RawTcp) {
            Ok((target, consumed)) => ParseOutcome::Ok(HandshakeResult {
                target,
                command: Command::Tcp,
                ack: Ack::SignalByte,
                leftover: buf[consumed..].to_vec(),
            }),
            Err(AddrError::ShortBuffer) => ParseOutcome::NeedMore,
            Err(AddrError::Invalid) => {
                ParseOutcome::Fail(RelayError::BadHandshake("invalid rawtcp address"))
            }
        }
    }

    fn failure_ack(&self) -> &'static [u8] {
        &[0x01]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addr::{encode, Target};
    use std::net::Ipv4Addr;

    #[test]
    fn rawtcp_happy_path() {
        let target = Target::V4(Ipv4Addr::new(10, 0, 0, 1), 22);
        let mut buf = Vec::new();
        encode(&target, AddrTable::RawTcp, &mut buf);
        buf.extend_from_slice(b"SSH-2.0-OpenSSH");

        let parser = RawTcpParser;
        match parser.parse(&buf) {
            ParseOutcome::Ok(result) => {
                assert_eq!(result.target, target);
                assert_eq!(result.command, Command::Tcp);
                assert_eq!(result.leftover, b"SSH-2.0-OpenSSH");
            }
            _ => panic!("expected Ok"),
        }
    }

    #[test]
    fn rawtcp_needs_more_on_truncated_buffer() {
        let parser = RawTcpParser;
        match parser.parse(&[0x01, 1, 2, 3]) {
            ParseOutcome::NeedMore => {}
            _ => panic!("expected NeedMore"),
        }
    }

    #[test]
    fn rawtcp_rejects_unknown_atyp() {
        let parser = RawTcpParser;
        match parser.parse(&[0xEE, 0, 0, 0, 0, 0, 0]) {
            ParseOutcome::Fail(RelayError::BadHandshake(_)) => {}
            _ => panic!("expected BadHandshake"),
        }
    }

    #[test]
    fn rawtcp_fragmented_matches_whole_buffer_result() {
        let target = Target::Domain("example.com".into(), 443);
        let mut buf = Vec::new();
        encode(&target, AddrTable::RawTcp, &mut buf);
        buf.extend_from_slice(b"hi");
        let parser = RawTcpParser;

        for n in 0..buf.len() {
            match parser.parse(&buf[..n]) {
                ParseOutcome::NeedMore => {}
                _ => panic!("expected NeedMore at prefix len {n}"),
            }
        }
        match parser.parse(&buf) {
            ParseOutcome::Ok(result) => assert_eq!(result.leftover, b"hi"),
            _ => panic!("expected Ok at full length"),
        }
    }
}
