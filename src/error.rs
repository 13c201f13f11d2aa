use std::io;
use std::path::PathBuf;

pub type Result<T, E = DiscoveryError> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("unknown discovery strategy {0:?}")]
    UnknownStrategy(String),

    #[error("invalid discovery parameter {name}: {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    #[error("tactics unavailable: {0}")]
    Tactics(String),

    #[error("failed to construct discovery set: {0}")]
    Construction(String),

    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse {}: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl DiscoveryError {
    pub(crate) fn invalid(name: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            name,
            reason: reason.into(),
        }
    }

    /// True for errors caused by the configuration itself rather than by
    /// building or loading it.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::UnknownStrategy(_) | Self::InvalidParameter { .. } | Self::Tactics(_)
        )
    }
}
