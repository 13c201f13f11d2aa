use std::net::IpAddr;
use std::sync::Arc;

use crate::config::StrategyKind;
use crate::server_entry::ServerEntry;

/// Chooses which servers a client gets to discover.
///
/// A strategy keeps its own view of the discoverable servers. The owning
/// discovery set installs a new view through `servers_changed`; selection
/// never fails and returns an empty list when nothing can be disclosed.
pub trait ServerSelectionStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    fn servers_changed(&self, servers: &[Arc<ServerEntry>]);

    fn select_servers(&self, client_ip: IpAddr) -> Vec<Arc<ServerEntry>>;
}
