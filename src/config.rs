//! Discovery configuration and the collaborators that supply it.
//!
//! Tactics decide which strategy runs and with which parameters; the registry
//! supplies the candidate servers. Both are consumed through traits so that
//! the orchestrator never depends on where the data comes from.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{DiscoveryError, Result};
use crate::server_entry::ServerEntry;
use crate::strategies::classic::ClassicConfig;
use crate::strategies::consistent::ConsistentConfig;

pub const DEFAULT_MAX_DISCLOSURE_COUNT: usize = 1;
pub const DEFAULT_CLASSIC_WINDOW_SECS: u64 = 3600;
pub const DEFAULT_RING_REPLICAS: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    Classic,
    Consistent,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::Classic => "classic",
            StrategyKind::Consistent => "consistent",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyKind {
    type Err = DiscoveryError;

    /// An empty name selects classic discovery.
    fn from_str(name: &str) -> Result<Self> {
        match name.trim() {
            "" | "classic" => Ok(StrategyKind::Classic),
            "consistent" => Ok(StrategyKind::Consistent),
            other => Err(DiscoveryError::UnknownStrategy(other.to_string())),
        }
    }
}

/// Parameters read from tactics on every reload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryParameters {
    #[serde(default)]
    pub strategy: String,
    /// Hex encoded HMAC key for classic discovery.
    #[serde(default)]
    pub hmac_key: String,
    #[serde(default = "default_max_disclosure_count")]
    pub max_disclosure_count: usize,
    #[serde(default = "default_classic_window_secs")]
    pub classic_window_secs: u64,
    #[serde(default = "default_ring_replicas")]
    pub ring_replicas: usize,
}

fn default_max_disclosure_count() -> usize {
    DEFAULT_MAX_DISCLOSURE_COUNT
}

fn default_classic_window_secs() -> u64 {
    DEFAULT_CLASSIC_WINDOW_SECS
}

fn default_ring_replicas() -> usize {
    DEFAULT_RING_REPLICAS
}

impl Default for DiscoveryParameters {
    fn default() -> Self {
        Self {
            strategy: String::new(),
            hmac_key: String::new(),
            max_disclosure_count: DEFAULT_MAX_DISCLOSURE_COUNT,
            classic_window_secs: DEFAULT_CLASSIC_WINDOW_SECS,
            ring_replicas: DEFAULT_RING_REPLICAS,
        }
    }
}

impl DiscoveryParameters {
    pub fn strategy_kind(&self) -> Result<StrategyKind> {
        self.strategy.parse()
    }

    pub fn classic_config(&self) -> Result<ClassicConfig> {
        let hmac_key = hex::decode(self.hmac_key.trim())
            .map_err(|e| DiscoveryError::invalid("hmac_key", e.to_string()))?;
        if hmac_key.is_empty() {
            return Err(DiscoveryError::invalid("hmac_key", "key is empty"));
        }
        if self.classic_window_secs == 0 {
            return Err(DiscoveryError::invalid("classic_window_secs", "must be positive"));
        }
        Ok(ClassicConfig {
            hmac_key,
            window_secs: self.classic_window_secs,
            max_disclosure_count: self.max_disclosure_count()?,
        })
    }

    pub fn consistent_config(&self) -> Result<ConsistentConfig> {
        if self.ring_replicas == 0 {
            return Err(DiscoveryError::invalid("ring_replicas", "must be positive"));
        }
        Ok(ConsistentConfig {
            replicas: self.ring_replicas,
            max_disclosure_count: self.max_disclosure_count()?,
        })
    }

    fn max_disclosure_count(&self) -> Result<usize> {
        if self.max_disclosure_count == 0 {
            return Err(DiscoveryError::invalid("max_disclosure_count", "must be positive"));
        }
        Ok(self.max_disclosure_count)
    }
}

/// Client classification used to pick tactics. The default value is the
/// unclassified client.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GeoIpData {
    pub country: Option<String>,
    pub isp: Option<String>,
    pub asn: Option<String>,
}

pub trait TacticsSource: Send + Sync {
    fn discovery_parameters(&self, geo: &GeoIpData) -> Result<DiscoveryParameters>;
}

pub trait ServerRegistry: Send + Sync {
    fn discovery_servers(&self) -> Vec<ServerEntry>;
}

/// In-memory tactics that can be swapped at runtime.
#[derive(Debug)]
pub struct StaticTactics {
    current: RwLock<std::result::Result<DiscoveryParameters, String>>,
}

impl StaticTactics {
    pub fn new(params: DiscoveryParameters) -> Self {
        Self {
            current: RwLock::new(Ok(params)),
        }
    }

    pub fn set(&self, params: DiscoveryParameters) {
        *self.current.write() = Ok(params);
    }

    /// Makes every subsequent lookup fail with `reason`.
    pub fn set_unavailable(&self, reason: impl Into<String>) {
        *self.current.write() = Err(reason.into());
    }
}

impl TacticsSource for StaticTactics {
    fn discovery_parameters(&self, _geo: &GeoIpData) -> Result<DiscoveryParameters> {
        self.current.read().clone().map_err(DiscoveryError::Tactics)
    }
}

#[derive(Debug, Default)]
pub struct StaticRegistry {
    servers: RwLock<Vec<ServerEntry>>,
}

impl StaticRegistry {
    pub fn new(servers: Vec<ServerEntry>) -> Self {
        Self {
            servers: RwLock::new(servers),
        }
    }

    pub fn set(&self, servers: Vec<ServerEntry>) {
        *self.servers.write() = servers;
    }
}

impl ServerRegistry for StaticRegistry {
    fn discovery_servers(&self) -> Vec<ServerEntry> {
        self.servers.read().clone()
    }
}

/// On-disk tactics: default parameters plus per-country overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TacticsDocument {
    #[serde(default)]
    pub default: DiscoveryParameters,
    #[serde(default)]
    pub by_country: HashMap<String, DiscoveryParameters>,
}

impl TacticsDocument {
    pub fn parameters_for(&self, geo: &GeoIpData) -> &DiscoveryParameters {
        geo.country
            .as_ref()
            .and_then(|country| self.by_country.get(country))
            .unwrap_or(&self.default)
    }
}

#[derive(Debug)]
pub struct FileTactics {
    path: PathBuf,
    document: RwLock<TacticsDocument>,
}

impl FileTactics {
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let document = read_json(&path)?;
        Ok(Self {
            path,
            document: RwLock::new(document),
        })
    }

    /// Re-reads the file. Returns whether the document changed; a failed read
    /// keeps the previous document.
    pub fn refresh(&self) -> Result<bool> {
        let document: TacticsDocument = read_json(&self.path)?;
        let mut current = self.document.write();
        if *current == document {
            return Ok(false);
        }
        *current = document;
        Ok(true)
    }
}

impl TacticsSource for FileTactics {
    fn discovery_parameters(&self, geo: &GeoIpData) -> Result<DiscoveryParameters> {
        Ok(self.document.read().parameters_for(geo).clone())
    }
}

/// Server list stored as a JSON array of entries.
#[derive(Debug)]
pub struct FileRegistry {
    path: PathBuf,
    servers: RwLock<Vec<ServerEntry>>,
}

impl FileRegistry {
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let servers = read_json(&path)?;
        Ok(Self {
            path,
            servers: RwLock::new(servers),
        })
    }

    pub fn refresh(&self) -> Result<bool> {
        let servers: Vec<ServerEntry> = read_json(&self.path)?;
        let mut current = self.servers.write();
        if *current == servers {
            return Ok(false);
        }
        *current = servers;
        Ok(true)
    }
}

impl ServerRegistry for FileRegistry {
    fn discovery_servers(&self) -> Vec<ServerEntry> {
        self.servers.read().clone()
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = fs::read(path).map_err(|source| DiscoveryError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_slice(&raw).map_err(|source| DiscoveryError::Json {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn strategy_names() {
        assert_eq!("".parse::<StrategyKind>().unwrap(), StrategyKind::Classic);
        assert_eq!("classic".parse::<StrategyKind>().unwrap(), StrategyKind::Classic);
        assert_eq!(
            "consistent".parse::<StrategyKind>().unwrap(),
            StrategyKind::Consistent
        );
        let err = "round-robin".parse::<StrategyKind>().unwrap_err();
        assert!(matches!(err, DiscoveryError::UnknownStrategy(ref name) if name == "round-robin"));
        assert!(err.is_configuration());
    }

    #[test]
    fn missing_fields_take_defaults() {
        let params: DiscoveryParameters = serde_json::from_str("{}").unwrap();
        assert_eq!(params, DiscoveryParameters::default());
        assert_eq!(params.strategy_kind().unwrap(), StrategyKind::Classic);
    }

    #[test]
    fn classic_config_rejects_bad_keys() {
        let mut params = DiscoveryParameters::default();
        assert!(matches!(
            params.classic_config(),
            Err(DiscoveryError::InvalidParameter { name: "hmac_key", .. })
        ));

        params.hmac_key = "not hex".to_string();
        assert!(matches!(
            params.classic_config(),
            Err(DiscoveryError::InvalidParameter { name: "hmac_key", .. })
        ));

        params.hmac_key = "00ff".to_string();
        let config = params.classic_config().unwrap();
        assert_eq!(config.hmac_key, vec![0x00, 0xff]);
        assert_eq!(config.window_secs, DEFAULT_CLASSIC_WINDOW_SECS);

        params.max_disclosure_count = 0;
        assert!(matches!(
            params.classic_config(),
            Err(DiscoveryError::InvalidParameter { name: "max_disclosure_count", .. })
        ));
    }

    #[test]
    fn consistent_config_rejects_zero_replicas() {
        let params = DiscoveryParameters {
            ring_replicas: 0,
            ..DiscoveryParameters::default()
        };
        assert!(params.consistent_config().unwrap_err().is_configuration());
    }

    #[test]
    fn tactics_document_prefers_country_override() {
        let document: TacticsDocument = serde_json::from_str(
            r#"{
                "default": {"strategy": "classic", "hmac_key": "aa"},
                "by_country": {"IR": {"strategy": "consistent", "max_disclosure_count": 3}}
            }"#,
        )
        .unwrap();

        let unclassified = GeoIpData::default();
        assert_eq!(document.parameters_for(&unclassified).strategy, "classic");

        let iran = GeoIpData {
            country: Some("IR".to_string()),
            ..GeoIpData::default()
        };
        let params = document.parameters_for(&iran);
        assert_eq!(params.strategy, "consistent");
        assert_eq!(params.max_disclosure_count, 3);

        let elsewhere = GeoIpData {
            country: Some("CA".to_string()),
            ..GeoIpData::default()
        };
        assert_eq!(document.parameters_for(&elsewhere).strategy, "classic");
    }

    #[test]
    fn file_tactics_refresh_reports_changes() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"default": {{"strategy": "classic", "hmac_key": "aa"}}}}"#).unwrap();

        let tactics = FileTactics::load(file.path()).unwrap();
        assert!(!tactics.refresh().unwrap());

        std::fs::write(
            file.path(),
            r#"{"default": {"strategy": "consistent"}}"#,
        )
        .unwrap();
        assert!(tactics.refresh().unwrap());
        let params = tactics.discovery_parameters(&GeoIpData::default()).unwrap();
        assert_eq!(params.strategy, "consistent");

        std::fs::write(file.path(), "{ not json").unwrap();
        assert!(matches!(tactics.refresh(), Err(DiscoveryError::Json { .. })));
        let params = tactics.discovery_parameters(&GeoIpData::default()).unwrap();
        assert_eq!(params.strategy, "consistent");
    }

    #[test]
    fn file_registry_loads_entries() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[{{"id": "relay-1", "encoded": "e1"}}, {{"id": "relay-2", "encoded": "e2"}}]"#
        )
        .unwrap();

        let registry = FileRegistry::load(file.path()).unwrap();
        let servers = registry.discovery_servers();
        assert_eq!(servers.len(), 2);
        assert_eq!(servers[1].encoded, "e2");
        assert!(!registry.refresh().unwrap());
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = FileRegistry::load("/nonexistent/relay-discovery/servers.json").unwrap_err();
        assert!(matches!(err, DiscoveryError::Io { .. }));
        assert!(!err.is_configuration());
    }

    #[test]
    fn static_tactics_can_fail() {
        let tactics = StaticTactics::new(DiscoveryParameters::default());
        tactics.set_unavailable("tactics server unreachable");
        let err = tactics
            .discovery_parameters(&GeoIpData::default())
            .unwrap_err();
        assert!(matches!(err, DiscoveryError::Tactics(_)));
    }
}
