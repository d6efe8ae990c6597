// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! UDP Forwarder: every datagram received on the listen socket is forwarded verbatim to a single
//! configured upstream, and the sending endpoint is recorded in a routing map keyed by source
//! address. The map only ever grows and expires entries by age; nothing reads from it to route a
//! reply back to a client yet, matching the behavior this was grounded on (see DESIGN.md).

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::net::UdpSocket;
use tokio::sync::Mutex;

const DATAGRAM_BUF: usize = 64 * 1024;
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

pub struct UdpForwarder {
    socket: UdpSocket,
    upstream: SocketAddr,
    idle: Duration,
    routes: Arc<Mutex<HashMap<SocketAddr, Instant>>>,
}

impl UdpForwarder {
    pub async fn bind(
        listen_port: u16,
        upstream: SocketAddr,
        idle: Duration,
    ) -> std::io::Result<Self> {
        let socket = UdpSocket::bind(("0.0.0.0", listen_port)).await?;
        Ok(Self { socket, upstream, idle, routes: Arc::new(Mutex::new(HashMap::new())) })
    }

    /// Run the forward loop and the idle-route sweeper concurrently until the process exits.
    pub async fn run(self) {
        let routes = self.routes.clone();
        let idle = self.idle;
        tokio::spawn(sweep_loop(routes, idle));

        let mut buf = vec![0u8; DATAGRAM_BUF];
        loop {
            let (n, source) = match self.socket.recv_from(&mut buf).await {
                Ok(ok) => ok,
                Err(e) => {
                    log::warn!("udp forwarder recv failed: {e}");
                    continue;
                }
            };

            {
                let mut routes = self.routes.lock().await;
                routes.insert(source, Instant::now());
            }

            if let Err(e) = self.socket.send_to(&buf[..n], self.upstream).await {
                log::warn!("udp forwarder send to {} failed: {e}", self.upstream);
            }
        }
    }
}

async fn sweep_loop(routes: Arc<Mutex<HashMap<SocketAddr, Instant>>>, idle: Duration) {
    let mut tick = tokio::time::interval(SWEEP_INTERVAL);
    loop {
        tick.tick().await;
        let mut routes = routes.lock().await;
        let before = routes.len();
        routes.retain(|_, last_seen| last_seen.elapsed() < idle);
        let expired = before - routes.len();
        if expired > 0 {
            log::debug!("udp forwarder expired {expired} idle routes");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn forwards_datagram_verbatim_and_records_source() {
        let upstream_socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let upstream_addr = upstream_socket.local_addr().unwrap();

        let forwarder =
            UdpForwarder::bind(0, upstream_addr, Duration::from_secs(300)).await.unwrap();
        let listen_addr = forwarder.socket.local_addr().unwrap();
        let routes = forwarder.routes.clone();

        tokio::spawn(forwarder.run());

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.send_to(b"ping", listen_addr).await.unwrap();

        let mut buf = [0u8; 16];
        let (n, _) = upstream_socket.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"ping");

        // Give the forward loop a moment to record the route before asserting on it.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(routes.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn sweep_loop_expires_stale_routes() {
        let routes = Arc::new(Mutex::new(HashMap::new()));
        routes.lock().await.insert("127.0.0.1:9".parse().unwrap(), Instant::now());

        // Exercise the retain predicate directly rather than waiting a full sweep interval.
        {
            let mut guard = routes.lock().await;
            guard.retain(|_, last_seen| last_seen.elapsed() < Duration::from_millis(0));
        }
        assert!(routes.lock().await.is_empty());
    }
}
