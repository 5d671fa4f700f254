use std::path::Path;
use std::thread;

use derive_new::new;
use serde::{Deserialize, Serialize};

use crate::{DistError, Result};

/// Environment variable overriding [`LaunchConfig::num_workers`].
pub const NUM_WORKERS_ENV: &str = "DISTDL_NUM_WORKERS";
/// Environment variable overriding [`LaunchConfig::oversubscribe`].
pub const OVERSUBSCRIBE_ENV: &str = "DISTDL_OVERSUBSCRIBE";

/// How many workers to launch and how.
#[derive(new, Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct LaunchConfig {
    /// Number of worker threads in the world.
    pub num_workers: usize,
    /// Allow more workers than the host's available parallelism.
    pub oversubscribe: bool,
    /// Default log filter used by the launcher.
    pub log_level: String,
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self::new(1, false, "info".to_string())
    }
}

impl LaunchConfig {
    /// Loads a configuration from a JSON file. Missing fields take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|err| DistError::Config(format!("Cannot read {}: {err}", path.display())))?;
        serde_json::from_str(&text)
            .map_err(|err| DistError::Config(format!("Cannot parse {}: {err}", path.display())))
    }

    /// Applies the `DISTDL_*` environment overrides.
    pub fn with_env_overrides(self) -> Result<Self> {
        self.apply_env(|key| std::env::var(key).ok())
    }

    /// Applies overrides looked up through `lookup`.
    pub fn apply_env(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(value) = lookup(NUM_WORKERS_ENV) {
            self.num_workers = value.trim().parse().map_err(|_| {
                DistError::Config(format!(
                    "{NUM_WORKERS_ENV} must be a worker count, got {value:?}"
                ))
            })?;
        }
        if let Some(value) = lookup(OVERSUBSCRIBE_ENV) {
            self.oversubscribe = match value.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" | "" => false,
                _ => {
                    return Err(DistError::Config(format!(
                        "{OVERSUBSCRIBE_ENV} must be a boolean, got {value:?}"
                    )));
                }
            };
        }
        Ok(self)
    }

    /// Checks the worker count against the host.
    pub fn validate(&self) -> Result<()> {
        if self.num_workers == 0 {
            return Err(DistError::Config("num_workers must be at least 1".to_string()));
        }
        if !self.oversubscribe {
            let available = thread::available_parallelism().map_or(1, |n| n.get());
            if self.num_workers > available {
                return Err(DistError::Oversubscribed {
                    requested: self.num_workers,
                    available,
                });
            }
        }
        Ok(())
    }
}
