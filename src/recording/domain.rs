// src/recording/domain.rs
//! Audit domains and their fixed column layouts

use serde::Serialize;
use std::fmt;

/// Host suffix of the public NTP pool, never worth auditing
pub const NTP_POOL_SUFFIX: &str = "pool.ntp.org";

const RESERVED_HOSTS: &[&str] = &[
    "localhost",
    "localhost.localdomain",
    "ip6-localhost",
    "ip6-loopback",
    "127.0.0.1",
    "::1",
    "0.0.0.0",
    "::",
];

/// Which kind of traffic a store records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditDomain {
    /// Resolved or connected host names
    Hosts,

    /// Outgoing request headers
    Headers,

    /// Key-value storage reads
    Storage,
}

impl AuditDomain {
    /// Field columns in export order
    pub fn columns(&self) -> &'static [&'static str] {
        match self {
            AuditDomain::Hosts => &["host", "port"],
            AuditDomain::Headers => &["name", "value"],
            AuditDomain::Storage => &["method", "fileName", "key", "value", "defaultValue"],
        }
    }

    /// Field the key filters (and host dedupe) look at
    pub fn key_column(&self) -> &'static str {
        match self {
            AuditDomain::Hosts => "host",
            AuditDomain::Headers => "name",
            AuditDomain::Storage => "key",
        }
    }

    /// Field the value filters and truncation apply to
    pub fn value_column(&self) -> Option<&'static str> {
        match self {
            AuditDomain::Hosts => None,
            AuditDomain::Headers | AuditDomain::Storage => Some("value"),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AuditDomain::Hosts => "hosts",
            AuditDomain::Headers => "headers",
            AuditDomain::Storage => "storage",
        }
    }
}

impl fmt::Display for AuditDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Loopback, unspecified and NTP pool hosts
pub fn is_reserved_host(host: &str) -> bool {
    let host = host.trim().trim_end_matches('.').to_ascii_lowercase();
    let host = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(&host);

    RESERVED_HOSTS.contains(&host)
        || host.ends_with(".localhost")
        || host.starts_with("127.")
        || host == NTP_POOL_SUFFIX
        || host.ends_with(&format!(".{}", NTP_POOL_SUFFIX))
}
