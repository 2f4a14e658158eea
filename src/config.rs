//! Engine configuration
//!
//! Options that tune the metadata layer's behavior at the edges where the
//! specification leaves a policy choice to the deployment.

use serde::{Deserialize, Serialize};

/// Policy for cache pins that are still held when a top-level unit of work
/// commits.
///
/// A pin surviving commit on a cache with `release_on_commit = true` means a
/// call site forgot its release. The pin is never allowed to leak; the policy
/// only controls how loudly the bug is reported:
/// - `Warn`: log a warning and release (production behavior)
/// - `Panic`: panic with the cache name (debug/CI behavior)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LeakPolicy {
    /// Log via `tracing::warn` and release the pin.
    Warn,
    /// Panic, naming the leaking cache. Use in tests and debug builds.
    Panic,
}

impl Default for LeakPolicy {
    fn default() -> Self {
        LeakPolicy::Warn
    }
}

/// Engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// How to treat pins leaked past a top-level commit.
    pub leak_policy: LeakPolicy,

    /// Number of routed rows buffered per partition before the batch is
    /// handed to the backend during COPY FROM ingestion.
    pub copy_batch_size: usize,

    /// True while a restore is running. All hooks are no-ops so that the
    /// catalog is not consulted half-way through being rebuilt.
    pub restoring: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            leak_policy: LeakPolicy::default(),
            copy_batch_size: 1000,
            restoring: false,
        }
    }
}

impl EngineConfig {
    /// Default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configuration that panics on leaked pins. Recommended for tests.
    pub fn strict() -> Self {
        Self {
            leak_policy: LeakPolicy::Panic,
            ..Self::default()
        }
    }

    pub fn with_copy_batch_size(mut self, size: usize) -> Self {
        self.copy_batch_size = size.max(1);
        self
    }

    pub fn with_restoring(mut self, restoring: bool) -> Self {
        self.restoring = restoring;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.leak_policy, LeakPolicy::Warn);
        assert_eq!(config.copy_batch_size, 1000);
        assert!(!config.restoring);
    }

    #[test]
    fn test_strict_panics_on_leak() {
        let config = EngineConfig::strict();
        assert_eq!(config.leak_policy, LeakPolicy::Panic);
    }

    #[test]
    fn test_batch_size_floor() {
        let config = EngineConfig::new().with_copy_batch_size(0);
        assert_eq!(config.copy_batch_size, 1);
    }
}
