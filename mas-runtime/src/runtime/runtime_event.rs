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

use crate::common::{AgentId, AgentRef};
use crate::traits::{EnvironmentPortRef, RunMode};

/// One entry of a runtime's unified local event stream.
///
/// Only the [`RuntimeManager`](crate::runtime::RuntimeManager) creates these.
#[derive(Debug, Clone)]
pub enum RuntimeEvent {
    /// The runtime finished starting its remote service.
    MasBorn,
    /// The runtime has shut down.
    MasDied,
    /// A local agent is constructed and running.
    AgentIsLocalAndReady(AgentRef),
    /// An agent on a peer runtime came into existence.
    AgentBorn(AgentId),
    /// A local or remote agent is gone.
    AgentRemoved(AgentId),
    /// An environment port was started.
    EnvironmentLaunched(EnvironmentPortRef),
    /// An environment port was killed.
    EnvironmentKilled(EnvironmentPortRef),
    /// An environment port changed its run mode.
    EnvironmentRunModeChanged(EnvironmentPortRef, RunMode),
}

impl RuntimeEvent {
    /// Short name of the variant, for logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::MasBorn => "MasBorn",
            Self::MasDied => "MasDied",
            Self::AgentIsLocalAndReady(_) => "AgentIsLocalAndReady",
            Self::AgentBorn(_) => "AgentBorn",
            Self::AgentRemoved(_) => "AgentRemoved",
            Self::EnvironmentLaunched(_) => "EnvironmentLaunched",
            Self::EnvironmentKilled(_) => "EnvironmentKilled",
            Self::EnvironmentRunModeChanged(..) => "EnvironmentRunModeChanged",
        }
    }
}
