//! Periodic re-reading of the tactics and server files.

use std::sync::Arc;

use crate::config::{FileRegistry, FileTactics};
use crate::discovery::Discovery;

/// Reloads discovery after its source files change.
///
/// A changed server list needs a full reload; changed tactics only rebuild
/// when they name a different strategy. A full reload that fails stays
/// pending until one succeeds, so a server list read during a bad tactics
/// update is not lost.
///
/// `poll` reads files with blocking I/O; run it off the async workers.
pub struct SourcePoller {
    discovery: Arc<Discovery>,
    tactics: Arc<FileTactics>,
    registry: Arc<FileRegistry>,
    pending_full_reload: bool,
}

impl SourcePoller {
    pub fn new(
        discovery: Arc<Discovery>,
        tactics: Arc<FileTactics>,
        registry: Arc<FileRegistry>,
    ) -> Self {
        Self {
            discovery,
            tactics,
            registry,
            pending_full_reload: false,
        }
    }

    pub fn pending_full_reload(&self) -> bool {
        self.pending_full_reload
    }

    pub fn poll(&mut self) {
        match self.registry.refresh() {
            Ok(changed) => self.pending_full_reload |= changed,
            Err(e) => tracing::warn!(error = %e, "keeping previous server list"),
        }
        let tactics_changed = match self.tactics.refresh() {
            Ok(changed) => changed,
            Err(e) => {
                tracing::warn!(error = %e, "keeping previous tactics");
                false
            }
        };

        if !self.pending_full_reload && !tactics_changed {
            return;
        }

        let config_refresh_only = !self.pending_full_reload;
        match self.discovery.reload(config_refresh_only) {
            Ok(()) => {
                if !config_refresh_only {
                    self.pending_full_reload = false;
                }
            }
            Err(e) => tracing::warn!(
                error = %e,
                full_reload = !config_refresh_only,
                "discovery reload failed; previous strategy stays active"
            ),
        }
    }
}
