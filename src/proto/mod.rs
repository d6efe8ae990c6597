// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Tunnel Parsers
//!
//! Each inbound protocol variant implements [`HandshakeParser`] over an accumulated byte buffer.
//! The buffer only ever grows (bytes are never consumed in place); a parser is re-run from
//! scratch on every new chunk until it returns something other than [`ParseOutcome::NeedMore`].
//! This makes 1-byte-at-a-time fragmentation and "all at once" delivery produce identical results.

pub mod http;
pub mod rawtcp;
pub mod trojan;
pub mod vless;

use crate::addr::Target;
use crate::error::RelayError;

pub const CRLF: &[u8] = b"\r\n";

/// Command requested by the handshake.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Command {
    Tcp,
    Udp,
    Mux,
}

/// How a session should acknowledge a successful handshake to the client, and what (if
/// anything) it owes the upstream before relaying begins.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Ack {
    /// Write a single signaling byte (`0x00` success / `0x01` failure) to the client.
    /// Used by VLESS, Trojan and RawTCP.
    SignalByte,
    /// Write `HTTP/1.1 200 Connection established\r\n\r\n` on success, nothing on failure
    /// (the client sees the connection close instead). Used by HTTP CONNECT.
    HttpConnect,
    /// No acknowledgment is written by the session at all; the upstream's own response is
    /// what the client sees. Used by HTTP absolute-URI forwarding.
    None,
}

/// Successfully parsed handshake.
#[derive(Debug)]
pub struct HandshakeResult {
    pub target: Target,
    pub command: Command,
    pub ack: Ack,
    /// Bytes that must be written to the upstream immediately after it connects, before any
    /// further bytes read from the client. For VLESS/Trojan/RawTCP this is just whatever of the
    /// client's payload had already arrived in the same read as the header. HTTP absolute-URI
    /// forwarding additionally replays the request line and headers themselves here, since they
    /// were consumed by this parser but never meant for the session to swallow.
    pub leftover: Vec<u8>,
}

/// Result of feeding one more chunk of bytes into a parser.
pub enum ParseOutcome {
    /// Not enough bytes yet; caller should wait for more inbound data and retry.
    NeedMore,
    Ok(HandshakeResult),
    Fail(RelayError),
}

/// A tunnel handshake parser driven incrementally over an accumulating buffer.
pub trait HandshakeParser {
    fn parse(&self, buf: &[u8]) -> ParseOutcome;

    /// Bytes to write back to the client when the handshake itself fails (bad format, rejected
    /// credentials, unsupported command, or an oversized buffer) — before the connection is
    /// dropped. Distinct from the Dialing-transition [`Ack`], since no `HandshakeResult` exists
    /// yet at this point to carry one.
    fn failure_ack(&self) -> &'static [u8];
}
