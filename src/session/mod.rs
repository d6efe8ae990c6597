// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Session: `AwaitHandshake -> Dialing -> Relaying -> Closing -> Closed` for one accepted
//! connection. Parsing, dialing and relaying are all driven from here; everything below is
//! either a parser, the dialer, or the framing adapter.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::broadcast;
use tokio::time::timeout;

use crate::config::Config;
use crate::dial;
use crate::error::RelayError;
use crate::framing::Framing;
use crate::proto::{Ack, HandshakeParser, HandshakeResult, ParseOutcome};

const WEBSOCKET_PING_INTERVAL: Duration = Duration::from_secs(30);

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

pub fn next_session_id() -> u64 {
    NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed)
}

pub struct Session {
    pub id: u64,
    pub peer_addr: SocketAddr,
    pub config: Arc<Config>,
    pub parser: Arc<dyn HandshakeParser + Send + Sync>,
}

impl Session {
    pub fn new(
        peer_addr: SocketAddr,
        config: Arc<Config>,
        parser: Arc<dyn HandshakeParser + Send + Sync>,
    ) -> Self {
        Self { id: next_session_id(), peer_addr, config, parser }
    }

    /// Drive one connection from handshake through relaying to close. Never returns an error:
    /// every failure is logged here exactly once and the connection is torn down. Races the
    /// whole lifetime against `shutdown`: a broadcast on that channel drops the in-flight future,
    /// closing whatever sockets and timers it owned at that point.
    pub async fn run(self, framing: Framing, mut shutdown: broadcast::Receiver<()>) {
        log::info!("session {} from {} accepted", self.id, self.peer_addr);
        let result = tokio::select! {
            result = self.run_inner(framing) => result,
            _ = shutdown.recv() => Err(RelayError::ShutdownRequested),
        };
        match result {
            Ok(()) => {
                log::info!("session {} closed", self.id);
            }
            Err(e) if e.is_dial_failure() => {
                log::warn!("session {} closing: {e}", self.id);
            }
            Err(e) => {
                log::info!("session {} closing: {e}", self.id);
            }
        }
    }

    async fn run_inner(&self, mut framing: Framing) -> Result<(), RelayError> {
        let handshake_deadline = Duration::from_millis(self.config.handshake_timeout_ms);
        let result = match timeout(handshake_deadline, self.await_handshake(&mut framing)).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                if e.wants_failure_ack() {
                    let _ = framing.write_chunk(self.parser.failure_ack()).await;
                }
                return Err(e);
            }
            Err(_) => return Err(RelayError::HandshakeTimeout),
        };

        let connect_timeout_ms = self.config.connect_timeout_ms;
        let dial_result = dial::dial(&result.target, connect_timeout_ms).await;

        let mut upstream = match dial_result {
            Ok(upstream) => {
                write_dial_ack(result.ack, &mut framing, true).await;
                log::info!("session {} dialed {}", self.id, result.target);
                upstream
            }
            Err(e) => {
                write_dial_ack(result.ack, &mut framing, false).await;
                return Err(e);
            }
        };

        if !result.leftover.is_empty() {
            upstream.write_all(&result.leftover).await?;
        }

        self.relay(framing, upstream).await
    }

    async fn await_handshake(&self, framing: &mut Framing) -> Result<HandshakeResult, RelayError> {
        let mut buf = Vec::new();
        loop {
            match self.parser.parse(&buf) {
                ParseOutcome::Ok(result) => return Ok(result),
                ParseOutcome::Fail(e) => return Err(e),
                ParseOutcome::NeedMore => {
                    if buf.len() > self.config.max_handshake_buffer_bytes {
                        return Err(RelayError::HeaderTooLarge);
                    }
                    match framing.read_chunk().await? {
                        Some(chunk) => buf.extend_from_slice(&chunk),
                        None => return Err(RelayError::ClientClosed),
                    }
                }
            }
        }
    }

    /// Splice inbound and upstream concurrently until either side closes or goes idle.
    async fn relay(&self, framing: Framing, upstream: tokio::net::TcpStream) -> Result<(), RelayError> {
        let idle = Duration::from_millis(self.config.upstream_idle_timeout_ms);
        let (mut upstream_read, mut upstream_write) = tokio::io::split(upstream);
        let (mut inbound_read, mut inbound_write) = framing.split();

        let inbound_to_upstream = async {
            loop {
                let chunk = match timeout(idle, inbound_read.read_chunk()).await {
                    Ok(Ok(chunk)) => chunk,
                    Ok(Err(e)) => return Err(e),
                    Err(_) => return Err(RelayError::IdleTimeout),
                };
                match chunk {
                    Some(chunk) => upstream_write.write_all(&chunk).await?,
                    None => break,
                }
            }
            let _ = upstream_write.shutdown().await;
            Ok::<(), RelayError>(())
        };

        let upstream_to_inbound = async {
            let mut buf = vec![0u8; 64 * 1024];
            let mut ping_tick = tokio::time::interval(WEBSOCKET_PING_INTERVAL);
            ping_tick.tick().await; // first tick fires immediately; consume it before the loop
            loop {
                tokio::select! {
                    read = timeout(idle, upstream_read.read(&mut buf)) => {
                        let n = match read {
                            Ok(Ok(n)) => n,
                            Ok(Err(e)) => return Err(RelayError::from(e)),
                            Err(_) => return Err(RelayError::IdleTimeout),
                        };
                        if n == 0 {
                            break;
                        }
                        inbound_write.write_chunk(&buf[..n]).await?;
                    }
                    _ = ping_tick.tick() => {
                        let _ = inbound_write.keepalive_ping().await;
                    }
                }
            }
            let _ = inbound_write.shutdown().await;
            Ok::<(), RelayError>(())
        };

        tokio::try_join!(inbound_to_upstream, upstream_to_inbound)?;
        Ok(())
    }
}

/// Write the Dialing-transition acknowledgment appropriate to this handshake's [`Ack`] kind.
/// Best-effort on failure paths: if the inbound side already dropped, there is nobody to tell.
async fn write_dial_ack(ack: Ack, framing: &mut Framing, success: bool) {
    let payload: &[u8] = match (ack, success) {
        (Ack::SignalByte, true) => &[0x00],
        (Ack::SignalByte, false) => &[0x01],
        (Ack::HttpConnect, true) => b"HTTP/1.1 200 Connection established\r\n\r\n",
        (Ack::HttpConnect, false) => b"HTTP/1.1 502 Bad Gateway\r\n\r\n",
        (Ack::None, true) => return,
        (Ack::None, false) => b"HTTP/1.1 502 Bad Gateway\r\n\r\n",
    };
    let _ = framing.write_chunk(payload).await;
}
