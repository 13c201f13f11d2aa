pub mod classic;
pub mod consistent;
pub mod strategy;

use std::sync::Arc;

use crate::clock::Clock;
use crate::config::{DiscoveryParameters, StrategyKind};
use crate::error::Result;

pub use classic::ClassicStrategy;
pub use consistent::ConsistentStrategy;
pub use strategy::ServerSelectionStrategy;

/// Builds the strategy named by `kind` from tactics parameters.
pub fn build_strategy(
    kind: StrategyKind,
    params: &DiscoveryParameters,
    clock: Arc<dyn Clock>,
) -> Result<Arc<dyn ServerSelectionStrategy>> {
    let strategy: Arc<dyn ServerSelectionStrategy> = match kind {
        StrategyKind::Classic => Arc::new(ClassicStrategy::new(params.classic_config()?, clock)?),
        StrategyKind::Consistent => Arc::new(ConsistentStrategy::new(params.consistent_config()?)?),
    };
    Ok(strategy)
}
