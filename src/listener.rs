// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Listener Supervisor: binds the configured port, spawns a [`crate::session::Session`] per
//! accepted connection, and drains everything within a grace period on shutdown signal.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinSet;

use crate::config::{Config, Protocol};
use crate::framing::Framing;
use crate::proto::http::HttpParser;
use crate::proto::rawtcp::RawTcpParser;
use crate::proto::trojan::TrojanParser;
use crate::proto::vless::VlessParser;
use crate::proto::HandshakeParser;
use crate::session::Session;
use crate::udp::UdpForwarder;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

fn build_parser(config: &Config) -> Arc<dyn HandshakeParser + Send + Sync> {
    match config.protocol {
        Protocol::VlessWs => Arc::new(VlessParser::new(config.allowed_uuids.clone())),
        Protocol::TrojanWs => Arc::new(TrojanParser::new(config.allowed_trojan_hashes.clone())),
        Protocol::RawTcp => Arc::new(RawTcpParser),
        Protocol::HttpProxy => Arc::new(HttpParser::new(config.max_handshake_buffer_bytes)),
    }
}

fn uses_websocket(config: &Config) -> bool {
    matches!(config.protocol, Protocol::VlessWs | Protocol::TrojanWs)
}

/// Run the listener until a shutdown signal arrives, then return the process exit code.
pub async fn run(config: Arc<Config>) -> i32 {
    let listener = match TcpListener::bind(("0.0.0.0", config.listen_port)).await {
        Ok(listener) => listener,
        Err(e) => {
            log::error!("failed to bind 0.0.0.0:{}: {e}", config.listen_port);
            return 1;
        }
    };
    log::info!("listening on 0.0.0.0:{} ({:?})", config.listen_port, config.protocol);

    if let Some((host, port)) = config.udp_target.clone() {
        match spawn_udp_forwarder(&config, host, port).await {
            Ok(()) => {}
            Err(e) => log::error!("failed to start udp forwarder: {e}"),
        }
    }

    let parser = build_parser(&config);
    let mut sessions = JoinSet::new();
    let mut shutdown = shutdown_signal();
    let (session_shutdown_tx, _) = broadcast::channel::<()>(1);

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer_addr) = match accepted {
                    Ok(ok) => ok,
                    Err(e) => {
                        log::warn!("accept failed: {e}");
                        continue;
                    }
                };
                let config = config.clone();
                let parser = parser.clone();
                let websocket = uses_websocket(&config);
                let session_shutdown = session_shutdown_tx.subscribe();
                sessions.spawn(async move {
                    let framing = if websocket {
                        match Framing::accept_websocket(stream).await {
                            Ok(framing) => framing,
                            Err(e) => {
                                log::warn!("websocket upgrade from {peer_addr} failed: {e}");
                                return;
                            }
                        }
                    } else {
                        Framing::stream(stream)
                    };
                    let session = Session::new(peer_addr, config, parser);
                    session.run(framing, session_shutdown).await;
                });
            }
            _ = shutdown.recv() => {
                log::info!("shutdown signal received, draining {} session(s)", sessions.len());
                let _ = session_shutdown_tx.send(());
                break;
            }
        }
    }

    drop(listener);
    match tokio::time::timeout(SHUTDOWN_GRACE, drain(&mut sessions)).await {
        Ok(()) => {
            log::info!("shutdown complete");
            0
        }
        Err(_) => {
            log::warn!("shutdown grace period elapsed with {} session(s) still live", sessions.len());
            1
        }
    }
}

async fn drain(sessions: &mut JoinSet<()>) {
    while sessions.join_next().await.is_some() {}
}

async fn spawn_udp_forwarder(
    config: &Config,
    host: String,
    port: u16,
) -> std::io::Result<()> {
    let upstream = tokio::net::lookup_host((host.as_str(), port))
        .await?
        .next()
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, "udp target did not resolve"))?;
    let idle = Duration::from_millis(config.udp_idle_ms);
    let forwarder = UdpForwarder::bind(config.listen_port, upstream, idle).await?;
    tokio::spawn(forwarder.run());
    Ok(())
}

/// Resolves when SIGINT fires, or SIGTERM on platforms that support it.
fn shutdown_signal() -> tokio::sync::mpsc::Receiver<()> {
    let (tx, rx) = tokio::sync::mpsc::channel(1);
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => {}
                        _ = sigterm.recv() => {}
                    }
                }
                Err(e) => {
                    log::warn!("failed to install SIGTERM handler, falling back to ctrl-c only: {e}");
                    let _ = tokio::signal::ctrl_c().await;
                }
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
        }
        let _ = tx.send(()).await;
    });
    rx
}
