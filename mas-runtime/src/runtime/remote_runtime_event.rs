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

use serde::{Deserialize, Serialize};

use crate::common::AgentId;
use crate::message::MessageBoxId;

/// Lifecycle change exchanged between peer runtimes.
///
/// # Wire Format
///
/// Carried as the payload of an envelope tagged [`MESSAGE_TYPE`](Self::MESSAGE_TYPE):
///
/// ```json
/// { "NewAgent": "alice" }
/// { "RuntimeLaunched": { "name": "runtime-service1", "type": "runtime_service" } }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemoteRuntimeEvent {
    /// An agent was started on the sending runtime.
    NewAgent(AgentId),
    /// An agent on the sending runtime is gone.
    DeadAgent(AgentId),
    /// A runtime came up; its service box is given so peers can introduce their agents.
    RuntimeLaunched(MessageBoxId),
}

impl RemoteRuntimeEvent {
    /// Envelope type tag under which these events travel.
    pub const MESSAGE_TYPE: &'static str = "RemoteRuntimeEvent";

    /// The agent the event is about, if any.
    #[must_use]
    pub const fn agent_id(&self) -> Option<&AgentId> {
        match self {
            Self::NewAgent(id) | Self::DeadAgent(id) => Some(id),
            Self::RuntimeLaunched(_) => None,
        }
    }
}
