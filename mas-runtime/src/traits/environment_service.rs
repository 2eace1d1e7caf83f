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

use std::fmt::{self, Debug};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Execution state of an environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RunMode {
    /// Actions are processed.
    Running,
    /// Actions are rejected until the environment resumes.
    Paused,
    /// The environment is gone; no further requests are served.
    Killed,
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Killed => "killed",
        };
        f.write_str(label)
    }
}

/// Narrow contract of a connected environment.
#[async_trait]
pub trait EnvironmentPort: Debug + Send + Sync {
    /// Name of the environment, unique within a runtime.
    fn name(&self) -> &str;

    /// Starts the environment.
    async fn start(&self) -> anyhow::Result<()>;

    /// Current run mode.
    fn run_mode(&self) -> RunMode;

    /// Kills the environment. Later requests fail.
    async fn kill(&self) -> anyhow::Result<()>;

    /// Opens a stream of run-mode changes.
    fn subscribe(&self) -> mpsc::UnboundedReceiver<RunMode>;
}

/// Shared handle to an environment port.
pub type EnvironmentPortRef = Arc<dyn EnvironmentPort>;

/// Port add/remove notification from an [`EnvironmentService`].
#[derive(Debug, Clone)]
pub enum EnvironmentServiceEvent {
    /// A port was started and can be used.
    EnvironmentPortAdded(EnvironmentPortRef),
    /// A port was killed or disconnected.
    EnvironmentPortRemoved(EnvironmentPortRef),
}

/// Owns the environment ports of a runtime.
#[async_trait]
pub trait EnvironmentService: Send + Sync {
    /// Returns `false` if the system runs without any environment.
    fn has_environment(&self) -> bool;

    /// Starts every configured port.
    async fn start(&self) -> anyhow::Result<()>;

    /// Ports that are currently live.
    fn ports(&self) -> Vec<EnvironmentPortRef>;

    /// Kills every live port.
    async fn shut_down(&self) -> anyhow::Result<()>;

    /// Opens a new stream of port notifications.
    fn subscribe(&self) -> mpsc::UnboundedReceiver<EnvironmentServiceEvent>;
}

/// Shared handle to an environment service.
pub type EnvironmentServiceRef = Arc<dyn EnvironmentService>;
