// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A multi-protocol tunnel relay: terminates VLESS, Trojan, raw TCP and HTTP-proxy tunnels on
//! one listener per process, dials the requested target, and splices bytes until either side
//! closes or goes idle.

pub mod addr;
pub mod config;
pub mod dial;
pub mod error;
pub mod framing;
pub mod listener;
pub mod proto;
pub mod session;
pub mod udp;
