// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Session-level error kinds.
//!
//! Errors never cross a session boundary: every path that can fail is handled where it occurs,
//! logged once, and turned into a `Closing` transition. This type only exists to carry the reason
//! through that one transition.

use std::fmt::{self, Display, Formatter};
use std::io;

/// Why a session is closing.
#[derive(Debug)]
pub enum RelayError {
    /// Protocol parse error: bad version, bad CRLF, truncated in a way that can never complete.
    BadHandshake(&'static str),
    /// UUID / password hash not on the configured allow-list.
    Unauthorized,
    /// A structurally valid command this relay does not implement (VLESS UDP/MUX, ...).
    UnsupportedCommand,
    /// DNS / connect / connect-timeout failure reaching the upstream.
    DialFailed(io::Error),
    /// Normal EOF from the upstream side.
    UpstreamClosed,
    /// Normal EOF from the inbound side.
    ClientClosed,
    /// Neither half made progress within the configured idle window.
    IdleTimeout,
    /// Handshake did not complete within the configured deadline.
    HandshakeTimeout,
    /// The accumulated handshake buffer exceeded `max_handshake_buffer_bytes`.
    HeaderTooLarge,
    /// The listener is shutting down and cancelled this session before it finished on its own.
    ShutdownRequested,
    /// I/O failure not covered by a more specific variant above.
    Io(io::Error),
}

impl RelayError {
    /// Whether this reason reflects a failure reached before `Relaying` began (bad handshake,
    /// rejected credentials, unsupported command, or a failed dial) as opposed to a normal or
    /// idle-timeout close once relaying was underway. Used only to pick a log level: these are
    /// surprising enough to warrant `warn`, the rest are routine and logged at `info`.
    pub fn is_dial_failure(&self) -> bool {
        matches!(
            self,
            RelayError::BadHandshake(_)
                | RelayError::Unauthorized
                | RelayError::UnsupportedCommand
                | RelayError::DialFailed(_)
        )
    }

    /// Whether the parser's [`crate::proto::HandshakeParser::failure_ack`] bytes should be
    /// written back to the client before closing. Covers every way the handshake itself can be
    /// rejected prior to `Dialing`; a failed dial has its own ack path tied to the successfully
    /// parsed [`crate::proto::Ack`] instead.
    pub fn wants_failure_ack(&self) -> bool {
        matches!(
            self,
            RelayError::BadHandshake(_)
                | RelayError::Unauthorized
                | RelayError::UnsupportedCommand
                | RelayError::HeaderTooLarge
        )
    }
}

impl Display for RelayError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            RelayError::BadHandshake(reason) => write!(f, "bad handshake: {reason}"),
            RelayError::Unauthorized => write!(f, "unauthorized"),
            RelayError::UnsupportedCommand => write!(f, "unsupported command"),
            RelayError::DialFailed(e) => write!(f, "dial failed: {e}"),
            RelayError::UpstreamClosed => write!(f, "upstream closed"),
            RelayError::ClientClosed => write!(f, "client closed"),
            RelayError::IdleTimeout => write!(f, "idle timeout"),
            RelayError::HandshakeTimeout => write!(f, "handshake timeout"),
            RelayError::HeaderTooLarge => write!(f, "handshake header too large"),
            RelayError::ShutdownRequested => write!(f, "shutdown requested"),
            RelayError::Io(e) => write!(f, "io error: {e}"),
        }
    }
}

impl std::error::Error for RelayError {}

impl From<io::Error> for RelayError {
    fn from(e: io::Error) -> Self {
        RelayError::Io(e)
    }
}
