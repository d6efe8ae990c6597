// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Socks5-like Address Field shared by VLESS, Trojan and RawTCP.
//!
//! # Protocol
//!
//! | ATYP | DST.ADDR | DST.PORT |
//! | ---- | -------- | -------- |
//! |  1   | Variable |    2     |
//!
//! The ATYP code table is not shared across protocols: each caller picks an [`AddrTable`] that
//! maps `0x01`/`0x02`/`0x03`/`0x04` onto IPv4/Domain/IPv6 the way that particular protocol does.

use std::fmt::{self, Display, Formatter};
use std::net::{Ipv4Addr, Ipv6Addr};

/// Parsed target address, independent of which wire ATYP table produced it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Target {
    V4(Ipv4Addr, u16),
    V6(Ipv6Addr, u16),
    Domain(String, u16),
}

impl Target {
    pub fn port(&self) -> u16 {
        match self {
            Target::V4(_, p) | Target::V6(_, p) | Target::Domain(_, p) => *p,
        }
    }

    /// A string usable as a `ToSocketAddrs` host part / dial target.
    pub fn host_str(&self) -> String {
        match self {
            Target::V4(ip, _) => ip.to_string(),
            Target::V6(ip, _) => ip.to_string(),
            Target::Domain(name, _) => name.clone(),
        }
    }
}

impl Display for Target {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Target::V4(ip, port) => write!(f, "{ip}:{port}"),
            Target::V6(ip, port) => write!(f, "[{ip}]:{port}"),
            Target::Domain(name, port) => write!(f, "{name}:{port}"),
        }
    }
}

/// Which protocol's ATYP code table to use when decoding/encoding an address field.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AddrTable {
    Vless,
    Trojan,
    RawTcp,
}

const ATYP_IPV4: u8 = 0x01;

impl AddrTable {
    fn atyp_domain(self) -> u8 {
        match self {
            AddrTable::Vless => 0x02,
            AddrTable::Trojan => 0x03,
            AddrTable::RawTcp => 0x02,
        }
    }

    fn atyp_ipv6(self) -> u8 {
        match self {
            AddrTable::Vless => 0x03,
            AddrTable::Trojan => 0x04,
            AddrTable::RawTcp => 0x03,
        }
    }
}

/// Error decoding an address field.
#[derive(Debug, Eq, PartialEq)]
pub enum AddrError {
    /// Not enough bytes buffered yet; caller should wait for more data.
    ShortBuffer,
    /// The ATYP byte did not match any entry in the table, or a domain was not valid UTF-8.
    Invalid,
}

/// Host half of an address field, without a port.
enum Host {
    V4(Ipv4Addr),
    V6(Ipv6Addr),
    Domain(String),
}

impl Host {
    fn with_port(self, port: u16) -> Target {
        match self {
            Host::V4(ip) => Target::V4(ip, port),
            Host::V6(ip) => Target::V6(ip, port),
            Host::Domain(name) => Target::Domain(name, port),
        }
    }
}

/// Decode just `ATYP | Addr`, with no trailing port. Returns the host and bytes consumed.
///
/// Used by VLESS, which places the port *before* the address field (see [`decode`] for the
/// common ATYP+Addr+Port layout used by Trojan and RawTCP).
fn decode_host(buf: &[u8], table: AddrTable) -> Result<(Host, usize), AddrError> {
    let atyp = *buf.first().ok_or(AddrError::ShortBuffer)?;

    if atyp == ATYP_IPV4 {
        let slice = buf.get(1..5).ok_or(AddrError::ShortBuffer)?;
        let ip = Ipv4Addr::new(slice[0], slice[1], slice[2], slice[3]);
        return Ok((Host::V4(ip), 5));
    }

    if atyp == table.atyp_domain() {
        let len = *buf.get(1).ok_or(AddrError::ShortBuffer)? as usize;
        let slice = buf.get(2..2 + len).ok_or(AddrError::ShortBuffer)?;
        let name = std::str::from_utf8(slice).map_err(|_| AddrError::Invalid)?.to_owned();
        if name.is_empty() {
            return Err(AddrError::Invalid);
        }
        return Ok((Host::Domain(name), 2 + len));
    }

    if atyp == table.atyp_ipv6() {
        let slice = buf.get(1..17).ok_or(AddrError::ShortBuffer)?;
        let mut groups = [0u16; 8];
        for (k, group) in groups.iter_mut().enumerate() {
            let base = 2 * k;
            *group = u16::from_be_bytes([slice[base], slice[base + 1]]);
        }
        let ip = Ipv6Addr::new(
            groups[0], groups[1], groups[2], groups[3], groups[4], groups[5], groups[6], groups[7],
        );
        return Ok((Host::V6(ip), 17));
    }

    Err(AddrError::Invalid)
}

/// Decode `ATYP | Addr | Port` (Trojan/RawTCP layout) from `buf` using `table`'s ATYP codes.
///
/// Returns the parsed [`Target`] and the number of bytes consumed.
pub fn decode(buf: &[u8], table: AddrTable) -> Result<(Target, usize), AddrError> {
    let (host, host_len) = decode_host(buf, table)?;
    let port_bytes = buf.get(host_len..host_len + 2).ok_or(AddrError::ShortBuffer)?;
    let port = u16::from_be_bytes([port_bytes[0], port_bytes[1]]);
    Ok((host.with_port(port), host_len + 2))
}

/// Decode VLESS's `Port | ATYP | Addr` layout (port precedes the address field).
pub fn decode_port_then_addr(buf: &[u8], table: AddrTable) -> Result<(Target, usize), AddrError> {
    let port_bytes = buf.get(0..2).ok_or(AddrError::ShortBuffer)?;
    let port = u16::from_be_bytes([port_bytes[0], port_bytes[1]]);
    let (host, host_len) = decode_host(&buf[2..], table)?;
    Ok((host.with_port(port), 2 + host_len))
}

/// Encode `target` as an address field under `table`'s ATYP codes.
pub fn encode(target: &Target, table: AddrTable, out: &mut Vec<u8>) {
    match target {
        Target::V4(ip, port) => {
            out.push(ATYP_IPV4);
            out.extend_from_slice(&ip.octets());
            out.extend_from_slice(&port.to_be_bytes());
        }
        Target::V6(ip, port) => {
            out.push(table.atyp_ipv6());
            out.extend_from_slice(&ip.octets());
            out.extend_from_slice(&port.to_be_bytes());
        }
        Target::Domain(name, port) => {
            out.push(table.atyp_domain());
            out.push(name.len() as u8);
            out.extend_from_slice(name.as_bytes());
            out.extend_from_slice(&port.to_be_bytes());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(target: Target, table: AddrTable) {
        let mut buf = Vec::new();
        encode(&target, table, &mut buf);
        let (decoded, consumed) = decode(&buf, table).unwrap();
        assert_eq!(decoded, target);
        assert_eq!(consumed, buf.len());
    }

    #[test]
    fn ipv4_roundtrip_all_tables() {
        let t = Target::V4(Ipv4Addr::new(1, 2, 3, 4), 443);
        roundtrip(t.clone(), AddrTable::Vless);
        roundtrip(t.clone(), AddrTable::Trojan);
        roundtrip(t, AddrTable::RawTcp);
    }

    #[test]
    fn ipv6_roundtrip() {
        let t = Target::V6(Ipv6Addr::new(1, 2, 3, 4, 5, 6, 7, 8), 53);
        roundtrip(t.clone(), AddrTable::Vless);
        roundtrip(t.clone(), AddrTable::Trojan);
        roundtrip(t, AddrTable::RawTcp);
    }

    #[test]
    fn domain_roundtrip_edge_lengths() {
        for len in [1usize, 255] {
            let name: String = "a".repeat(len);
            let t = Target::Domain(name, 80);
            roundtrip(t.clone(), AddrTable::Vless);
            roundtrip(t.clone(), AddrTable::Trojan);
            roundtrip(t, AddrTable::RawTcp);
        }
    }

    #[test]
    fn vless_and_trojan_domain_atyp_differ() {
        let t = Target::Domain("example.com".into(), 80);
        let mut vless_buf = Vec::new();
        encode(&t, AddrTable::Vless, &mut vless_buf);
        let mut trojan_buf = Vec::new();
        encode(&t, AddrTable::Trojan, &mut trojan_buf);
        assert_eq!(vless_buf[0], 0x02);
        assert_eq!(trojan_buf[0], 0x03);
        // Decoding trojan bytes with the vless table must not succeed as a domain.
        assert_ne!(decode(&trojan_buf, AddrTable::Vless), Ok((t.clone(), trojan_buf.len())));
    }

    #[test]
    fn short_buffer_is_not_invalid() {
        assert_eq!(decode(&[0x01, 1, 2, 3], AddrTable::Vless), Err(AddrError::ShortBuffer));
        assert_eq!(decode(&[], AddrTable::Trojan), Err(AddrError::ShortBuffer));
    }

    #[test]
    fn unknown_atyp_is_invalid() {
        assert_eq!(decode(&[0xFF, 0, 0, 0, 0, 0, 0], AddrTable::RawTcp), Err(AddrError::Invalid));
    }

    #[test]
    fn ipv6_reads_big_endian_16bit_groups_at_correct_offsets() {
        // Regression test for the historical stride bug: byte i must land in group i/2,
        // not be skipped or doubled up.
        let mut buf = vec![0x04u8]; // trojan ATYP for ipv6
        for b in 0u8..16 {
            buf.push(b);
        }
        buf.extend_from_slice(&80u16.to_be_bytes());
        let (target, consumed) = decode(&buf, AddrTable::Trojan).unwrap();
        assert_eq!(consumed, 19);
        match target {
            Target::V6(ip, port) => {
                assert_eq!(port, 80);
                let octets = ip.octets();
                assert_eq!(octets, *<&[u8; 16]>::try_from(&buf[1..17]).unwrap());
            }
            _ => panic!("expected ipv6"),
        }
    }

    #[test]
    fn vless_port_then_addr_layout() {
        // 01BB (443) then ATYP=01 (IPv4) + 01020304.
        let mut buf = vec![0x01u8, 0xBB, 0x01, 1, 2, 3, 4];
        let (target, consumed) = decode_port_then_addr(&buf, AddrTable::Vless).unwrap();
        assert_eq!(target, Target::V4(Ipv4Addr::new(1, 2, 3, 4), 443));
        assert_eq!(consumed, buf.len());

        buf.truncate(4);
        assert_eq!(decode_port_then_addr(&buf, AddrTable::Vless), Err(AddrError::ShortBuffer));
    }
}
