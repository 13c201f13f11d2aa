//! Time-bucketed discovery.
//!
//! A keyed discovery value is derived from the client address and the current
//! time window. Every candidate is scored against that value and the best
//! scoring candidates are disclosed, so a client sees the same servers for a
//! whole window and a different, unpredictable set in the next one.

use std::cmp::Ordering;
use std::net::IpAddr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use parking_lot::RwLock;
use sha2::{Digest, Sha256};

use super::strategy::ServerSelectionStrategy;
use crate::clock::Clock;
use crate::config::StrategyKind;
use crate::error::{DiscoveryError, Result};
use crate::server_entry::{client_octets, prefix_u64, ServerEntry};

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassicConfig {
    pub hmac_key: Vec<u8>,
    pub window_secs: u64,
    pub max_disclosure_count: usize,
}

struct Candidate {
    seed: u64,
    server: Arc<ServerEntry>,
}

pub struct ClassicStrategy {
    mac: HmacSha256,
    window_secs: i64,
    max_disclosure_count: usize,
    clock: Arc<dyn Clock>,
    candidates: RwLock<Vec<Candidate>>,
}

impl ClassicStrategy {
    pub fn new(config: ClassicConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        if config.hmac_key.is_empty() {
            return Err(DiscoveryError::invalid("hmac_key", "key is empty"));
        }
        if config.window_secs == 0 {
            return Err(DiscoveryError::invalid("classic_window_secs", "must be positive"));
        }
        if config.max_disclosure_count == 0 {
            return Err(DiscoveryError::invalid("max_disclosure_count", "must be positive"));
        }
        let mac = HmacSha256::new_from_slice(&config.hmac_key)
            .map_err(|e| DiscoveryError::invalid("hmac_key", e.to_string()))?;
        Ok(Self {
            mac,
            window_secs: i64::try_from(config.window_secs).unwrap_or(i64::MAX),
            max_disclosure_count: config.max_disclosure_count,
            clock,
            candidates: RwLock::new(Vec::new()),
        })
    }

    fn window_index(&self, at: DateTime<Utc>) -> i64 {
        at.timestamp().div_euclid(self.window_secs)
    }

    fn discovery_value(&self, client_ip: IpAddr, window: i64) -> [u8; 32] {
        let mut mac = self.mac.clone();
        mac.update(&client_octets(client_ip));
        mac.update(&window.to_be_bytes());
        mac.finalize().into_bytes().into()
    }
}

fn score(discovery_value: &[u8; 32], seed: u64) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(discovery_value);
    hasher.update(seed.to_be_bytes());
    prefix_u64(&hasher.finalize())
}

impl ServerSelectionStrategy for ClassicStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Classic
    }

    fn servers_changed(&self, servers: &[Arc<ServerEntry>]) {
        let candidates = servers
            .iter()
            .map(|server| Candidate {
                seed: server.seed(),
                server: Arc::clone(server),
            })
            .collect();
        *self.candidates.write() = candidates;
    }

    fn select_servers(&self, client_ip: IpAddr) -> Vec<Arc<ServerEntry>> {
        let candidates = self.candidates.read();
        if candidates.is_empty() {
            return Vec::new();
        }

        let window = self.window_index(self.clock.now());
        let value = self.discovery_value(client_ip, window);

        let mut ranked: Vec<(u64, &Candidate)> = candidates
            .iter()
            .map(|candidate| (score(&value, candidate.seed), candidate))
            .collect();
        let by_rank = |a: &(u64, &Candidate), b: &(u64, &Candidate)| -> Ordering {
            a.0.cmp(&b.0).then_with(|| a.1.server.id.cmp(&b.1.server.id))
        };
        if ranked.len() > self.max_disclosure_count {
            ranked.select_nth_unstable_by(self.max_disclosure_count - 1, by_rank);
            ranked.truncate(self.max_disclosure_count);
        }
        ranked.sort_unstable_by(by_rank);

        ranked
            .into_iter()
            .map(|(_, candidate)| Arc::clone(&candidate.server))
            .collect()
    }
}
