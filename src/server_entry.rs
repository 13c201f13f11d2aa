use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A relay server that may be disclosed to clients.
///
/// `encoded` is produced by the registry and passed to clients untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerEntry {
    pub id: String,
    pub encoded: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discovery_range: Option<DiscoveryDateRange>,
}

/// Half-open interval `[start, end)` during which a server may be discovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryDateRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DiscoveryDateRange {
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start <= at && at < self.end
    }
}

impl ServerEntry {
    pub fn new(id: impl Into<String>, encoded: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            encoded: encoded.into(),
            discovery_range: None,
        }
    }

    pub fn with_discovery_range(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.discovery_range = Some(DiscoveryDateRange { start, end });
        self
    }

    /// Stable 64-bit value derived from the server id.
    pub fn seed(&self) -> u64 {
        prefix_u64(&Sha256::digest(self.id.as_bytes()))
    }

    pub fn is_discoverable_at(&self, at: DateTime<Utc>) -> bool {
        self.discovery_range.map_or(true, |range| range.contains(at))
    }

    /// Earliest range boundary strictly after `after`, if any.
    pub fn next_boundary_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let range = self.discovery_range?;
        [range.start, range.end]
            .into_iter()
            .filter(|boundary| *boundary > after)
            .min()
    }
}

pub(crate) fn prefix_u64(digest: &[u8]) -> u64 {
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(prefix)
}

/// Octets used when hashing a client address. IPv4-mapped IPv6 addresses hash
/// like the IPv4 address they carry.
pub(crate) fn client_octets(client_ip: IpAddr) -> Vec<u8> {
    match client_ip {
        IpAddr::V4(v4) => v4.octets().to_vec(),
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => v4.octets().to_vec(),
            None => v6.octets().to_vec(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use std::net::{Ipv4Addr, Ipv6Addr};

    #[test]
    fn seed_depends_only_on_id() {
        let a = ServerEntry::new("relay-1", "blob-a");
        let b = ServerEntry::new("relay-1", "blob-b");
        let c = ServerEntry::new("relay-2", "blob-a");
        assert_eq!(a.seed(), b.seed());
        assert_ne!(a.seed(), c.seed());
    }

    #[test]
    fn discovery_range_is_half_open() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let end = start + Duration::days(7);
        let server = ServerEntry::new("relay-1", "blob").with_discovery_range(start, end);

        assert!(!server.is_discoverable_at(start - Duration::seconds(1)));
        assert!(server.is_discoverable_at(start));
        assert!(server.is_discoverable_at(end - Duration::seconds(1)));
        assert!(!server.is_discoverable_at(end));

        assert_eq!(server.next_boundary_after(start - Duration::hours(1)), Some(start));
        assert_eq!(server.next_boundary_after(start), Some(end));
        assert_eq!(server.next_boundary_after(end), None);
        assert_eq!(ServerEntry::new("relay-2", "blob").next_boundary_after(start), None);
    }

    #[test]
    fn mapped_addresses_hash_like_ipv4() {
        let v4 = Ipv4Addr::new(203, 0, 113, 7);
        assert_eq!(
            client_octets(IpAddr::V4(v4)),
            client_octets(IpAddr::V6(v4.to_ipv6_mapped()))
        );
        assert_eq!(client_octets(IpAddr::V6(Ipv6Addr::LOCALHOST)).len(), 16);
    }

    #[test]
    fn entries_deserialize_without_range() {
        let server: ServerEntry =
            serde_json::from_str(r#"{"id":"relay-1","encoded":"abcd"}"#).unwrap();
        assert_eq!(server, ServerEntry::new("relay-1", "abcd"));
    }
}
