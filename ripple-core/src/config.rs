//! Runtime configuration.
//!
//! The runtime has very few knobs. They can be built in code or loaded from a
//! JSON document supplied by the host; missing fields fall back to defaults.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default bound on targeted retry passes per tick.
pub const MAX_RERUNS: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Number of targeted passes a tick may run after its first pass before
    /// failing with [`Error::InfiniteRefresh`].
    pub max_reruns: usize,

    /// Whether creating a unit outside a tick requests a scheduling pass.
    pub notify_on_create: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_reruns: MAX_RERUNS,
            notify_on_create: true,
        }
    }
}

impl RuntimeConfig {
    /// Parse a configuration from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: RuntimeConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_max_reruns(mut self, max_reruns: usize) -> Self {
        self.max_reruns = max_reruns;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.max_reruns == 0 {
            return Err(Error::Config {
                message: "max_reruns must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}
