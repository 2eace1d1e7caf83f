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

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::common::{AgentId, AgentRef};
use crate::traits::EnvironmentPortRef;

/// Lifecycle change reported by an [`AgentService`].
#[derive(Debug, Clone)]
pub enum AgentServiceEvent {
    /// A local agent finished construction and is running.
    AddedLocalAgent(AgentRef),
    /// A local agent was killed.
    RemovedLocalAgent(AgentRef),
    /// A peer runtime announced an agent.
    AddedRemoteAgent(AgentId),
    /// A peer runtime announced that one of its agents is gone.
    RemovedRemoteAgent(AgentId),
}

impl AgentServiceEvent {
    /// The id of the agent the event is about.
    #[must_use]
    pub fn agent_id(&self) -> &AgentId {
        match self {
            Self::AddedLocalAgent(agent) | Self::RemovedLocalAgent(agent) => agent.id(),
            Self::AddedRemoteAgent(id) | Self::RemovedRemoteAgent(id) => id,
        }
    }
}

/// Owns the local agent population and the view of agents living on peer runtimes.
///
/// The runtime manager drives an implementation through this trait and listens
/// to it through [`subscribe`](Self::subscribe). Implementations must emit an
/// event only when their state actually changed, so that announcing an agent
/// twice does not produce two `AddedRemoteAgent` events.
#[async_trait]
pub trait AgentService: Send + Sync {
    /// Every live local agent.
    fn agents(&self) -> Vec<AgentRef>;

    /// A live local agent by id.
    fn agent(&self, id: &AgentId) -> Option<AgentRef>;

    /// Ids of agents known to live on peer runtimes.
    fn remote_agents(&self) -> Vec<AgentId>;

    /// Records an agent announced by a peer runtime.
    fn handle_agent_created(&self, id: AgentId);

    /// Forgets an agent that a peer runtime reported dead.
    fn handle_agent_removed(&self, id: &AgentId);

    /// Connects a newly started environment port, launching the agents meant to live on it.
    async fn handle_environment_port_added(&self, port: EnvironmentPortRef) -> anyhow::Result<()>;

    /// Disconnects an environment port.
    async fn handle_environment_port_removed(&self, port: &EnvironmentPortRef);

    /// Launches the configured agents for a system without an environment.
    async fn start_without_env(&self) -> anyhow::Result<()>;

    /// Requests every local agent to stop. Returns once the requests are issued.
    async fn shut_down(&self) -> anyhow::Result<()>;

    /// Waits until every local agent has terminated. A zero timeout waits indefinitely.
    ///
    /// Returns `false` if the timeout elapsed first.
    async fn await_termination(&self, timeout: Duration) -> bool;

    /// Releases the state of every agent still held.
    async fn dispose(&self);

    /// Opens a new stream of lifecycle events.
    fn subscribe(&self) -> mpsc::UnboundedReceiver<AgentServiceEvent>;
}

/// Shared handle to an agent service.
pub type AgentServiceRef = Arc<dyn AgentService>;
