// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! HTTP forward-proxy request parsing: `CONNECT host:port` tunnels and absolute-URI `http://`
//! requests, both stream-oriented (no signaling byte; the client sees either a textual
//! `200 Connection established` or the upstream's own HTTP response).

use crate::addr::Target;
use crate::error::RelayError;

use super::{Ack, Command, HandshakeParser, HandshakeResult, ParseOutcome};

const MAX_HEADERS: usize = 64;

pub struct HttpParser {
    max_handshake_buffer_bytes: usize,
}

impl HttpParser {
    pub fn new(max_handshake_buffer_bytes: usize) -> Self {
        Self { max_handshake_buffer_bytes }
    }
}

impl HandshakeParser for HttpParser {
    fn parse(&self, buf: &[u8]) -> ParseOutcome {
        match parse_inner(buf) {
            Ok(Some(result)) => ParseOutcome::Ok(result),
            Ok(None) if buf.len() > self.max_handshake_buffer_bytes => {
                ParseOutcome::Fail(RelayError::HeaderTooLarge)
            }
            Ok(None) => ParseOutcome::NeedMore,
            Err(e) => ParseOutcome::Fail(e),
        }
    }

    fn failure_ack(&self) -> &'static [u8] {
        b"HTTP/1.1 400 Bad Request\r\n\r\n"
    }
}

fn parse_inner(buf: &[u8]) -> Result<Option<HandshakeResult>, RelayError> {
    let mut header_storage = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut request = httparse::Request::new(&mut header_storage);

    let body_offset = match request.parse(buf) {
        Ok(httparse::Status::Complete(n)) => n,
        Ok(httparse::Status::Partial) => return Ok(None),
        Err(_) => return Err(RelayError::BadHandshake("malformed http request")),
    };

    let method = request.method.ok_or(RelayError::BadHandshake("missing http method"))?;
    let path = request.path.ok_or(RelayError::BadHandshake("missing http target"))?;

    if method.eq_ignore_ascii_case("CONNECT") {
        let target = parse_host_port(path, 443)?;
        return Ok(Some(HandshakeResult {
            target,
            command: Command::Tcp,
            ack: Ack::HttpConnect,
            leftover: buf[body_offset..].to_vec(),
        }));
    }

    let target = parse_absolute_uri(path)?;
    Ok(Some(HandshakeResult {
        target,
        command: Command::Tcp,
        ack: Ack::None,
        // The request line and headers were consumed by this parser but must still reach
        // upstream verbatim, followed by whatever body bytes had already arrived.
        leftover: buf.to_vec(),
    }))
}

fn parse_host_port(authority: &str, default_port: u16) -> Result<Target, RelayError> {
    let bad = || RelayError::BadHandshake("invalid host:port");
    if let Some(rest) = authority.strip_prefix('[') {
        let (host, rest) = rest.split_once(']').ok_or_else(bad)?;
        let ip: std::net::Ipv6Addr = host.parse().map_err(|_| bad())?;
        let port = match rest.strip_prefix(':') {
            Some(p) => p.parse().map_err(|_| bad())?,
            None => default_port,
        };
        return Ok(Target::V6(ip, port));
    }

    let (host, port) = match authority.rsplit_once(':') {
        Some((host, port_str)) => (host, port_str.parse().map_err(|_| bad())?),
        None => (authority, default_port),
    };
    if host.is_empty() {
        return Err(bad());
    }
    if let Ok(ip) = host.parse::<std::net::Ipv4Addr>() {
        return Ok(Target::V4(ip, port));
    }
    Ok(Target::Domain(host.to_owned(), port))
}

fn parse_absolute_uri(target: &str) -> Result<Target, RelayError> {
    let bad = || RelayError::BadHandshake("absolute-uri required, http scheme only");
    let rest = target.strip_prefix("http://").ok_or_else(bad)?;
    let authority = rest.split(['/', '?', '#']).next().unwrap_or(rest);
    if authority.is_empty() {
        return Err(bad());
    }
    parse_host_port(authority, 80)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_happy_path() {
        let req = b"CONNECT example.com:443 HTTP/1.1\r\nHost: example.com:443\r\n\r\n";
        let parser = HttpParser::new(8192);
        match parser.parse(req) {
            ParseOutcome::Ok(result) => {
                assert_eq!(result.target, Target::Domain("example.com".into(), 443));
                assert_eq!(result.ack, Ack::HttpConnect);
                assert!(result.leftover.is_empty());
            }
            _ => panic!("expected Ok"),
        }
    }

    #[test]
    fn connect_defaults_port_443_when_absent() {
        let req = b"CONNECT example.com HTTP/1.1\r\n\r\n";
        let parser = HttpParser::new(8192);
        match parser.parse(req) {
            ParseOutcome::Ok(result) => {
                assert_eq!(result.target, Target::Domain("example.com".into(), 443));
            }
            _ => panic!("expected Ok"),
        }
    }

    #[test]
    fn absolute_uri_replays_whole_buffer_to_upstream() {
        let req = b"GET http://example.com/index.html HTTP/1.1\r\nHost: example.com\r\n\r\n";
        let parser = HttpParser::new(8192);
        match parser.parse(req) {
            ParseOutcome::Ok(result) => {
                assert_eq!(result.target, Target::Domain("example.com".into(), 80));
                assert_eq!(result.ack, Ack::None);
                assert_eq!(result.leftover, req);
            }
            _ => panic!("expected Ok"),
        }
    }

    #[test]
    fn absolute_uri_with_explicit_port() {
        let req = b"GET http://example.com:8080/ HTTP/1.1\r\n\r\n";
        let parser = HttpParser::new(8192);
        match parser.parse(req) {
            ParseOutcome::Ok(result) => {
                assert_eq!(result.target, Target::Domain("example.com".into(), 8080));
            }
            _ => panic!("expected Ok"),
        }
    }

    #[test]
    fn rejects_https_absolute_uri() {
        let req = b"GET https://example.com/ HTTP/1.1\r\n\r\n";
        let parser = HttpParser::new(8192);
        match parser.parse(req) {
            ParseOutcome::Fail(RelayError::BadHandshake(_)) => {}
            _ => panic!("expected BadHandshake"),
        }
    }

    #[test]
    fn rejects_origin_form_target() {
        let req = b"GET /index.html HTTP/1.1\r\nHost: example.com\r\n\r\n";
        let parser = HttpParser::new(8192);
        match parser.parse(req) {
            ParseOutcome::Fail(RelayError::BadHandshake(_)) => {}
            _ => panic!("expected BadHandshake"),
        }
    }

    #[test]
    fn needs_more_on_partial_request() {
        let req = b"CONNECT example.com:443 HTTP/1.1\r\n";
        let parser = HttpParser::new(8192);
        match parser.parse(req) {
            ParseOutcome::NeedMore => {}
            _ => panic!("expected NeedMore"),
        }
    }

    #[test]
    fn header_too_large_fails_instead_of_buffering_forever() {
        let req = b"CONNECT example.com:443 HTTP/1.1\r\n";
        let parser = HttpParser::new(8);
        match parser.parse(req) {
            ParseOutcome::Fail(RelayError::HeaderTooLarge) => {}
            _ => panic!("expected HeaderTooLarge"),
        }
    }

    #[test]
    fn connect_ipv6_literal_host() {
        let req = b"CONNECT [::1]:8443 HTTP/1.1\r\n\r\n";
        let parser = HttpParser::new(8192);
        match parser.parse(req) {
            ParseOutcome::Ok(result) => {
                assert_eq!(result.target, Target::V6(std::net::Ipv6Addr::LOCALHOST, 8443));
            }
            _ => panic!("expected Ok"),
        }
    }
}
