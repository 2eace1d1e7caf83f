/*
 * Copyright (c) 2024. Govcraft
 *
 * Licensed under either of
 *   * Apache License, Version 2.0 (the "License");
 *     you may not use this file except in compliance with the License.
 *     You may obtain a copy of the License at http://www.apache.org/licenses/LICENSE-2.0
 *   * MIT license: http://opensource.org/licenses/MIT
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the applicable License for the specific language governing permissions and
 * limitations under that License.
 */

use std::time::Duration;

use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};

/// XDG prefix under which the configuration file is looked up.
pub const CONFIG_PREFIX: &str = "mas-runtime";

/// Configuration for a multi-agent runtime instance.
///
/// Loaded from TOML files in XDG-compliant directories. Every section is
/// optional in the file; missing values fall back to their defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MasConfig {
    /// Grace periods and shutdown timeouts.
    pub timeouts: TimeoutConfig,
    /// Pool sizes.
    pub limits: LimitsConfig,
    /// Default names.
    pub defaults: DefaultsConfig,
}

/// Timeout-related configuration values, all in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// How long `reset()` waits for the running cycle to stop before re-initializing.
    pub reset_grace_ms: u64,
    /// How long runtime shutdown waits for all local agents to terminate.
    pub agent_shutdown_timeout_ms: u64,
    /// How long runtime shutdown waits for the remote runtime pipelines to drain.
    pub remote_service_shutdown_timeout_ms: u64,
    /// How long `dispose()` waits for the agent to stop. Zero waits indefinitely.
    pub dispose_timeout_ms: u64,
}

/// Limits and capacity configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Number of reasoning steps that may execute concurrently across all agents.
    pub worker_pool_size: usize,
}

/// Default values configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DefaultsConfig {
    /// Base name of this runtime's remote-runtime-service message box.
    pub runtime_service_name: String,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            reset_grace_ms: 5_000,
            agent_shutdown_timeout_ms: 10_000,
            remote_service_shutdown_timeout_ms: 5_000,
            dispose_timeout_ms: 0,
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            worker_pool_size: std::thread::available_parallelism()
                .map(std::num::NonZeroUsize::get)
                .unwrap_or(4),
        }
    }
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            runtime_service_name: "runtime-service".to_string(),
        }
    }
}

impl MasConfig {
    /// Grace period used by `reset()`.
    #[must_use]
    pub const fn reset_grace(&self) -> Duration {
        Duration::from_millis(self.timeouts.reset_grace_ms)
    }

    /// Timeout for awaiting agent termination during runtime shutdown.
    #[must_use]
    pub const fn agent_shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.timeouts.agent_shutdown_timeout_ms)
    }

    /// Timeout for joining the remote runtime pipelines during runtime shutdown.
    #[must_use]
    pub const fn remote_service_shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.timeouts.remote_service_shutdown_timeout_ms)
    }

    /// Timeout used by `dispose()`; [`Duration::ZERO`] means wait indefinitely.
    #[must_use]
    pub const fn dispose_timeout(&self) -> Duration {
        Duration::from_millis(self.timeouts.dispose_timeout_ms)
    }

    /// Worker pool size, never less than one.
    #[must_use]
    pub fn worker_pool_size(&self) -> usize {
        self.limits.worker_pool_size.max(1)
    }

    /// Parses a configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns the underlying TOML error if the input is malformed.
    pub fn from_toml_str(input: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(input)
    }

    /// Load configuration from XDG-compliant locations.
    ///
    /// Looks for `$XDG_CONFIG_HOME/mas-runtime/config.toml` (falling back to
    /// `~/.config/mas-runtime/config.toml`). If no configuration file is found,
    /// returns the default configuration. If a configuration file exists but is
    /// malformed, logs an error and uses defaults.
    pub fn load() -> Self {
        use tracing::{error, info};

        let xdg_dirs = match xdg::BaseDirectories::with_prefix(CONFIG_PREFIX) {
            Ok(dirs) => dirs,
            Err(e) => {
                error!("Failed to initialize XDG directories: {}", e);
                return Self::default();
            }
        };

        let Some(path) = xdg_dirs.find_config_file("config.toml") else {
            info!("No configuration file found, using defaults");
            return Self::default();
        };

        info!("Loading configuration from: {}", path.display());
        match std::fs::read_to_string(&path) {
            Ok(config_str) => match Self::from_toml_str(&config_str) {
                Ok(config) => {
                    info!("Successfully loaded configuration");
                    config
                }
                Err(e) => {
                    error!("Failed to parse configuration file {}: {}", path.display(), e);
                    Self::default()
                }
            },
            Err(e) => {
                error!("Failed to read configuration file {}: {}", path.display(), e);
                Self::default()
            }
        }
    }
}

lazy_static! {
    /// Global configuration instance loaded from XDG-compliant locations.
    pub static ref CONFIG: MasConfig = MasConfig::load();
}
