// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Process configuration, loaded once from a JSON file at startup (the `config.json` convention)
//! and shared read-only thereafter behind an `Arc`.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::proto::trojan::{hash_password, PASSWORD_HEX_LEN};
use crate::proto::vless::parse_uuid_hex;

fn default_connect_timeout_ms() -> u64 {
    15_000
}
fn default_handshake_timeout_ms() -> u64 {
    15_000
}
fn default_upstream_idle_timeout_ms() -> u64 {
    30_000
}
fn default_udp_idle_ms() -> u64 {
    300_000
}
fn default_max_handshake_buffer_bytes() -> usize {
    8192
}
fn default_log_level() -> String {
    "info".to_owned()
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Protocol {
    VlessWs,
    TrojanWs,
    #[serde(rename = "rawtcp")]
    RawTcp,
    HttpProxy,
}

#[derive(Debug, Deserialize)]
pub struct RawConfig {
    pub listen_port: u16,
    pub protocol: Protocol,

    #[serde(default)]
    pub allowed_uuids: Vec<String>,

    #[serde(default)]
    pub allowed_trojan_hashes: Vec<String>,
    #[serde(default)]
    pub allowed_trojan_passwords: Vec<String>,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
    #[serde(default = "default_upstream_idle_timeout_ms")]
    pub upstream_idle_timeout_ms: u64,

    #[serde(default)]
    pub udp_target_host: Option<String>,
    #[serde(default)]
    pub udp_target_port: Option<u16>,
    #[serde(default = "default_udp_idle_ms")]
    pub udp_idle_ms: u64,

    #[serde(default = "default_max_handshake_buffer_bytes")]
    pub max_handshake_buffer_bytes: usize,

    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Resolved, validated configuration. Built once from [`RawConfig`] and shared via `Arc`.
#[derive(Debug)]
pub struct Config {
    pub listen_port: u16,
    pub protocol: Protocol,
    pub allowed_uuids: HashSet<[u8; 16]>,
    /// `None` means password checking is disabled for this listener.
    pub allowed_trojan_hashes: Option<HashSet<[u8; 56]>>,
    pub connect_timeout_ms: u64,
    pub handshake_timeout_ms: u64,
    pub upstream_idle_timeout_ms: u64,
    pub udp_target: Option<(String, u16)>,
    pub udp_idle_ms: u64,
    pub max_handshake_buffer_bytes: usize,
    pub log_level: String,
}

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Json(serde_json::Error),
    InvalidUuid(String),
    InvalidTrojanHash(String),
    InvalidUdpTarget,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "reading config file: {e}"),
            ConfigError::Json(e) => write!(f, "parsing config file: {e}"),
            ConfigError::InvalidUuid(s) => write!(f, "invalid uuid in allowed_uuids: {s}"),
            ConfigError::InvalidTrojanHash(s) => {
                write!(f, "invalid sha224 hex in allowed_trojan_hashes: {s}")
            }
            ConfigError::InvalidUdpTarget => {
                write!(f, "udp_target_host set without udp_target_port, or vice versa")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let bytes = fs::read(path).map_err(ConfigError::Io)?;
        let raw: RawConfig = serde_json::from_slice(&bytes).map_err(ConfigError::Json)?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawConfig) -> Result<Self, ConfigError> {
        let mut allowed_uuids = HashSet::new();
        for s in &raw.allowed_uuids {
            let uuid = parse_uuid_hex(s).ok_or_else(|| ConfigError::InvalidUuid(s.clone()))?;
            allowed_uuids.insert(uuid);
        }

        let allowed_trojan_hashes = if raw.allowed_trojan_hashes.is_empty()
            && raw.allowed_trojan_passwords.is_empty()
        {
            None
        } else {
            let mut set = HashSet::new();
            for h in &raw.allowed_trojan_hashes {
                let lower = h.to_ascii_lowercase();
                if lower.len() != PASSWORD_HEX_LEN || !lower.bytes().all(|b| b.is_ascii_hexdigit()) {
                    return Err(ConfigError::InvalidTrojanHash(h.clone()));
                }
                let mut bytes = [0u8; PASSWORD_HEX_LEN];
                bytes.copy_from_slice(lower.as_bytes());
                set.insert(bytes);
            }
            for p in &raw.allowed_trojan_passwords {
                set.insert(hash_password(p));
            }
            Some(set)
        };

        let udp_target = match (raw.udp_target_host, raw.udp_target_port) {
            (Some(host), Some(port)) => Some((host, port)),
            (None, None) => None,
            _ => return Err(ConfigError::InvalidUdpTarget),
        };

        Ok(Config {
            listen_port: raw.listen_port,
            protocol: raw.protocol,
            allowed_uuids,
            allowed_trojan_hashes,
            connect_timeout_ms: raw.connect_timeout_ms,
            handshake_timeout_ms: raw.handshake_timeout_ms,
            upstream_idle_timeout_ms: raw.upstream_idle_timeout_ms,
            udp_target,
            udp_idle_ms: raw.udp_idle_ms,
            max_handshake_buffer_bytes: raw.max_handshake_buffer_bytes,
            log_level: raw.log_level,
        })
    }
}
