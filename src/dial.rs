// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Upstream Dialer: resolves a [`Target`] and connects to it with a deadline, then tunes the
//! resulting socket the way a relay talking to untrusted networks should.

use std::io;
use std::time::Duration;

use socket2::SockRef;
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::addr::Target;
use crate::error::RelayError;

const KEEPALIVE_IDLE: Duration = Duration::from_secs(60);

pub async fn dial(target: &Target, connect_timeout_ms: u64) -> Result<TcpStream, RelayError> {
    let addr = format!("{}:{}", target.host_str(), target.port());
    let deadline = Duration::from_millis(connect_timeout_ms);

    let stream = match timeout(deadline, TcpStream::connect(&addr)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => return Err(RelayError::DialFailed(e)),
        Err(_) => {
            return Err(RelayError::DialFailed(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("connect to {addr} timed out after {connect_timeout_ms}ms"),
            )))
        }
    };

    tune_socket(&stream).map_err(RelayError::DialFailed)?;
    Ok(stream)
}

fn tune_socket(stream: &TcpStream) -> io::Result<()> {
    stream.set_nodelay(true)?;

    let sock_ref = SockRef::from(stream);
    let keepalive = socket2::TcpKeepalive::new().with_time(KEEPALIVE_IDLE);
    sock_ref.set_tcp_keepalive(&keepalive)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn dial_connects_and_tunes_a_live_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let _ = listener.accept().await;
        });

        let target = Target::V4(std::net::Ipv4Addr::LOCALHOST, port);
        let stream = dial(&target, 1_000).await.unwrap();
        assert!(stream.nodelay().unwrap());
    }

    #[tokio::test]
    async fn dial_times_out_against_an_unroutable_address() {
        // TEST-NET-1 reserved for documentation; RFC 5737 guarantees no route ever answers.
        let target = Target::V4(std::net::Ipv4Addr::new(192, 0, 2, 1), 81);
        let result = dial(&target, 50).await;
        assert!(matches!(result, Err(RelayError::DialFailed(_))));
    }

    #[tokio::test]
    async fn dial_fails_on_connection_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let target = Target::V4(std::net::Ipv4Addr::LOCALHOST, port);
        let result = dial(&target, 1_000).await;
        assert!(matches!(result, Err(RelayError::DialFailed(_))));
    }
}
