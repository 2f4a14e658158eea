//! Extension install-state tracking
//!
//! The dispatcher must know whether the extension's own metadata schema is
//! currently installed and valid before it touches any statement. Probing
//! the host catalog on every statement would be too slow, so the answer is
//! cached as a small state machine and refreshed on relation-cache
//! invalidation events.
//!
//! A proxy relation stands in for the install state: the host guarantees it
//! is created before the rest of the metadata schema and dropped before it,
//! so an invalidation for that relation (or a blanket invalidation) is the
//! cue to re-probe.

use crate::error::{MetaError, Result};
use crate::types::RelationId;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::debug;

/// Version compiled into this build, compared against the installed
/// metadata schema on activation.
pub const CRATE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Install state of the extension metadata schema
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallState {
    /// Not yet probed
    Unknown,
    /// An install or uninstall is in progress
    Transitioning,
    /// Metadata schema absent
    NotInstalled,
    /// Metadata schema present and usable
    Installed,
}

/// Host-side probe of the real install state.
pub trait InstallProbe: Send + Sync {
    fn current_state(&self) -> InstallState;

    /// Version string of the installed metadata schema, when installed.
    fn installed_version(&self) -> Option<String>;

    /// Relation id of the proxy table, when installed.
    fn proxy_relation(&self) -> Option<RelationId>;
}

/// Cached install state with invalidation-driven refresh.
pub struct ExtensionTracker {
    probe: Arc<dyn InstallProbe>,
    state: RwLock<InstallState>,
    proxy_relation: RwLock<Option<RelationId>>,
    restoring: bool,
}

impl ExtensionTracker {
    pub fn new(probe: Arc<dyn InstallProbe>, restoring: bool) -> Self {
        Self {
            probe,
            state: RwLock::new(InstallState::Unknown),
            proxy_relation: RwLock::new(None),
            restoring,
        }
    }

    pub fn state(&self) -> InstallState {
        *self.state.read()
    }

    /// Whether the hooks should process statements at all.
    ///
    /// False during a restore and in every non-installed state. The first
    /// call after an Unknown/Transitioning observation re-probes; a version
    /// mismatch between the installed schema and this build is an error.
    pub fn is_active(&self) -> Result<bool> {
        if self.restoring {
            return Ok(false);
        }

        let state = self.state();
        if matches!(state, InstallState::Unknown | InstallState::Transitioning) {
            // status may have changed without an invalidation event
            self.update_state()?;
        }

        Ok(self.state() == InstallState::Installed)
    }

    /// Relation-cache invalidation entry point. `None` means a blanket
    /// invalidation applying to all relations. Returns true when dependent
    /// caches (the descriptor registry) must be dropped.
    pub fn invalidate(&self, relation: Option<RelationId>) -> Result<bool> {
        match self.state() {
            InstallState::NotInstalled
            | InstallState::Unknown
            | InstallState::Transitioning => {
                // the event may mean the proxy table just appeared, or that
                // an install/uninstall finished
                self.update_state()?;
                Ok(false)
            }
            InstallState::Installed => {
                let proxy = *self.proxy_relation.read();
                let concerns_proxy = match (proxy, relation) {
                    (_, None) => true,
                    (Some(proxy), Some(relation)) => proxy == relation,
                    (None, Some(_)) => false,
                };
                if !concerns_proxy {
                    return Ok(false);
                }
                self.update_state()?;
                Ok(self.state() != InstallState::Installed)
            }
        }
    }

    /// Re-probe and transition. Returns whether the state changed.
    fn update_state(&self) -> Result<bool> {
        self.set_state(self.probe.current_state())
    }

    fn set_state(&self, new_state: InstallState) -> Result<bool> {
        if new_state == self.state() {
            return Ok(false);
        }
        match new_state {
            InstallState::Installed => {
                self.check_version()?;
                *self.proxy_relation.write() = self.probe.proxy_relation();
            }
            InstallState::NotInstalled => {
                *self.proxy_relation.write() = None;
            }
            InstallState::Unknown | InstallState::Transitioning => {}
        }
        debug!(?new_state, "extension state changed");
        *self.state.write() = new_state;
        Ok(true)
    }

    fn check_version(&self) -> Result<()> {
        let installed = self
            .probe
            .installed_version()
            .unwrap_or_else(|| "unknown".to_string());
        if installed != CRATE_VERSION {
            return Err(MetaError::VersionMismatch {
                installed,
                compiled: CRATE_VERSION.to_string(),
            });
        }
        Ok(())
    }
}
