//! Consistent hashing discovery.
//!
//! Servers are placed on a hash ring at several points each. A client is
//! hashed onto the same ring and discovers the first distinct servers found
//! walking clockwise from its position. Removing a server only affects the
//! clients whose walk passed through one of that server's points.

use std::net::IpAddr;
use std::sync::Arc;

use parking_lot::RwLock;
use sha2::{Digest, Sha256};

use super::strategy::ServerSelectionStrategy;
use crate::config::StrategyKind;
use crate::error::{DiscoveryError, Result};
use crate::server_entry::{client_octets, prefix_u64, ServerEntry};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsistentConfig {
    pub replicas: usize,
    pub max_disclosure_count: usize,
}

#[derive(Default)]
struct Ring {
    /// Sorted by position.
    points: Vec<(u64, usize)>,
    servers: Vec<Arc<ServerEntry>>,
}

impl Ring {
    fn build(servers: &[Arc<ServerEntry>], replicas: usize) -> Self {
        let mut points = Vec::with_capacity(servers.len() * replicas);
        for (index, server) in servers.iter().enumerate() {
            for replica in 0..replicas {
                points.push((ring_point(&server.id, replica), index));
            }
        }
        points.sort_unstable();
        Self {
            points,
            servers: servers.to_vec(),
        }
    }

    fn walk(&self, position: u64, limit: usize) -> Vec<Arc<ServerEntry>> {
        let limit = limit.min(self.servers.len());
        let mut taken = vec![false; self.servers.len()];
        let mut selected = Vec::with_capacity(limit);

        let start = self.points.partition_point(|(point, _)| *point < position);
        let (before, after) = self.points.split_at(start);
        for &(_, index) in after.iter().chain(before) {
            if selected.len() == limit {
                break;
            }
            if !taken[index] {
                taken[index] = true;
                selected.push(Arc::clone(&self.servers[index]));
            }
        }
        selected
    }
}

fn ring_point(id: &str, replica: usize) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(id.as_bytes());
    hasher.update((replica as u32).to_be_bytes());
    prefix_u64(&hasher.finalize())
}

fn client_position(client_ip: IpAddr) -> u64 {
    prefix_u64(&Sha256::digest(client_octets(client_ip)))
}

pub struct ConsistentStrategy {
    config: ConsistentConfig,
    ring: RwLock<Ring>,
}

impl ConsistentStrategy {
    pub fn new(config: ConsistentConfig) -> Result<Self> {
        if config.replicas == 0 {
            return Err(DiscoveryError::invalid("ring_replicas", "must be positive"));
        }
        if config.max_disclosure_count == 0 {
            return Err(DiscoveryError::invalid("max_disclosure_count", "must be positive"));
        }
        Ok(Self {
            config,
            ring: RwLock::new(Ring::default()),
        })
    }
}

impl ServerSelectionStrategy for ConsistentStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Consistent
    }

    fn servers_changed(&self, servers: &[Arc<ServerEntry>]) {
        let ring = Ring::build(servers, self.config.replicas);
        *self.ring.write() = ring;
    }

    fn select_servers(&self, client_ip: IpAddr) -> Vec<Arc<ServerEntry>> {
        let ring = self.ring.read();
        if ring.servers.is_empty() {
            return Vec::new();
        }
        ring.walk(client_position(client_ip), self.config.max_disclosure_count)
    }
}
