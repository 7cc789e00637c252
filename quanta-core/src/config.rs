//! Engine configuration.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// What `get` returns inside a write function when the atom is pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingReadPolicy {
    /// Fail with `AtomError::Pending`; the update is not applied.
    #[default]
    Suspend,

    /// Return the last settled value (or the init) when there is one.
    Stale,
}

/// Settings for one store instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Pending-read behaviour inside write functions. Read functions always
    /// suspend.
    pub pending_reads_in_write: PendingReadPolicy,

    /// Maximum chain length of writes forwarded from one atom to another.
    pub max_write_depth: usize,

    /// Verify the dependency graph after every commit and panic on a
    /// violation.
    pub check_invariants: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pending_reads_in_write: PendingReadPolicy::Suspend,
            max_write_depth: 64,
            check_invariants: cfg!(debug_assertions),
        }
    }
}

impl EngineConfig {
    /// Parse and validate a JSON config. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_write_depth == 0 {
            return Err(ConfigError::Invalid(
                "max_write_depth must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
