pub mod clock;
pub mod config;
pub mod discovery;
pub mod discovery_set;
pub mod endpoint;
pub mod error;
pub mod poller;
pub mod server_entry;
pub mod strategies;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    DiscoveryParameters, FileRegistry, FileTactics, GeoIpData, ServerRegistry, StaticRegistry,
    StaticTactics, StrategyKind, TacticsSource,
};
pub use discovery::Discovery;
pub use discovery_set::DiscoverySet;
pub use endpoint::DiscoveryEndpoint;
pub use error::{DiscoveryError, Result};
pub use poller::SourcePoller;
pub use server_entry::{DiscoveryDateRange, ServerEntry};
pub use strategies::ServerSelectionStrategy;
