//! Discovery step of the client handshake.
//!
//! `Discovery` owns the active discovery set and is the only thing request
//! handlers talk to. Reloads build a replacement set outside the lock, swap
//! it in under the write lock and stop the superseded set after the lock is
//! released.

use std::net::IpAddr;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::clock::Clock;
use crate::config::{
    DiscoveryParameters, GeoIpData, ServerRegistry, StrategyKind, TacticsSource,
};
use crate::discovery_set::DiscoverySet;
use crate::error::Result;
use crate::strategies::build_strategy;

struct ActiveDiscovery {
    strategy: StrategyKind,
    set: Arc<DiscoverySet>,
}

/// Selects server entries to disclose to clients. Safe for concurrent use.
pub struct Discovery {
    tactics: Arc<dyn TacticsSource>,
    registry: Arc<dyn ServerRegistry>,
    clock: Arc<dyn Clock>,
    active: RwLock<ActiveDiscovery>,
}

impl Discovery {
    pub fn new(
        tactics: Arc<dyn TacticsSource>,
        registry: Arc<dyn ServerRegistry>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let params = tactics.discovery_parameters(&GeoIpData::default())?;
        let strategy = params.strategy_kind()?;
        let set = build_set(strategy, &params, registry.as_ref(), &clock)?;
        tracing::info!(
            event_name = "discovery_strategy",
            strategy = %strategy,
            "using {strategy} discovery"
        );

        Ok(Self {
            tactics,
            registry,
            clock,
            active: RwLock::new(ActiveDiscovery {
                strategy,
                set: Arc::new(set),
            }),
        })
    }

    /// Reinitializes the active discovery set.
    ///
    /// With `config_refresh_only` set, nothing is rebuilt unless tactics now
    /// name a different strategy. On error the current set stays active.
    pub fn reload(&self, config_refresh_only: bool) -> Result<()> {
        let params = self.tactics.discovery_parameters(&GeoIpData::default())?;
        let strategy = params.strategy_kind()?;

        if config_refresh_only && self.active.read().strategy == strategy {
            return Ok(());
        }

        let set = build_set(strategy, &params, self.registry.as_ref(), &self.clock)?;

        let previous = {
            let mut active = self.active.write();
            let previous = std::mem::replace(&mut active.set, Arc::new(set));
            active.strategy = strategy;
            previous
        };
        previous.stop();

        tracing::info!(
            event_name = "discovery_strategy",
            strategy = %strategy,
            "using {strategy} discovery"
        );
        Ok(())
    }

    /// Encoded server entries to disclose to the client at `client_ip`.
    pub fn discover_servers(&self, client_ip: IpAddr) -> Vec<String> {
        let servers = {
            let active = self.active.read();
            active.set.select_servers(client_ip)
        };
        servers
            .iter()
            .map(|server| server.encoded.clone())
            .collect()
    }

    pub fn current_strategy(&self) -> StrategyKind {
        self.active.read().strategy
    }

    pub fn active_set(&self) -> Arc<DiscoverySet> {
        Arc::clone(&self.active.read().set)
    }

    /// Identity of the active discovery set; changes whenever a reload swaps
    /// in a new set.
    pub fn active_set_id(&self) -> u64 {
        self.active.read().set.id()
    }
}

fn build_set(
    strategy: StrategyKind,
    params: &DiscoveryParameters,
    registry: &dyn ServerRegistry,
    clock: &Arc<dyn Clock>,
) -> Result<DiscoverySet> {
    let selection = build_strategy(strategy, params, Arc::clone(clock))?;
    DiscoverySet::start(Arc::clone(clock), registry.discovery_servers(), selection)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::{DiscoveryParameters, StaticRegistry, StaticTactics};
    use crate::error::DiscoveryError;
    use crate::server_entry::ServerEntry;
    use chrono::{TimeZone, Utc};
    use std::net::Ipv4Addr;

    fn classic_params() -> DiscoveryParameters {
        DiscoveryParameters {
            strategy: "classic".to_string(),
            hmac_key: "6b6579".to_string(),
            max_disclosure_count: 2,
            ..DiscoveryParameters::default()
        }
    }

    fn setup(params: DiscoveryParameters) -> (Arc<StaticTactics>, Discovery) {
        let tactics = Arc::new(StaticTactics::new(params));
        let registry = Arc::new(StaticRegistry::new(
            (0..10)
                .map(|i| ServerEntry::new(format!("relay-{i}"), format!("entry-{i}")))
                .collect(),
        ));
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 2, 1, 9, 0, 0).unwrap(),
        ));
        let discovery = Discovery::new(tactics.clone(), registry, clock).unwrap();
        (tactics, discovery)
    }

    #[test]
    fn empty_strategy_name_defaults_to_classic() {
        let (_, discovery) = setup(DiscoveryParameters {
            strategy: String::new(),
            ..classic_params()
        });
        assert_eq!(discovery.current_strategy(), StrategyKind::Classic);
        let client = IpAddr::V4(Ipv4Addr::new(192, 0, 2, 9));
        assert_eq!(discovery.discover_servers(client).len(), 2);
    }

    #[test]
    fn refresh_with_a_new_strategy_swaps_sets() {
        let (tactics, discovery) = setup(classic_params());
        let first = discovery.active_set_id();

        tactics.set(DiscoveryParameters {
            strategy: "consistent".to_string(),
            ..classic_params()
        });
        discovery.reload(true).unwrap();
        assert_eq!(discovery.current_strategy(), StrategyKind::Consistent);
        assert_ne!(discovery.active_set_id(), first);
    }

    #[test]
    fn tactics_failure_keeps_the_active_set() {
        let (tactics, discovery) = setup(classic_params());
        let first = discovery.active_set_id();

        tactics.set_unavailable("tactics cache empty");
        let err = discovery.reload(false).unwrap_err();
        assert!(matches!(err, DiscoveryError::Tactics(_)));
        assert_eq!(discovery.active_set_id(), first);
    }

    #[test]
    fn invalid_key_keeps_the_active_set() {
        let (tactics, discovery) = setup(classic_params());
        let first = discovery.active_set_id();

        tactics.set(DiscoveryParameters {
            hmac_key: "zz".to_string(),
            ..classic_params()
        });
        let err = discovery.reload(false).unwrap_err();
        assert!(err.is_configuration());
        assert_eq!(discovery.active_set_id(), first);
    }
}
