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

use std::fmt;
use std::sync::Arc;

use tracing::{info_span, Span};

use crate::common::{AgentId, AgentRef, MasConfig};
use crate::controller::{AgentProgram, Controller, WorkerPool};
use crate::message::MessageBox;
use crate::traits::EnvironmentPortRef;

/// An agent: an id and the capabilities its program runs with, bound to a controller.
///
/// Composed once at construction and never mutated afterwards. The only
/// destructor path is [`dispose`](Self::dispose).
pub struct Agent {
    id: AgentId,
    environment: Option<EnvironmentPortRef>,
    message_box: MessageBox,
    span: Span,
    controller: Arc<Controller>,
}

impl fmt::Debug for Agent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Agent")
            .field("id", &self.id)
            .field("environment", &self.environment.as_ref().map(|port| port.name()))
            .field("message_box", self.message_box.id())
            .field("state", &self.controller.state())
            .finish()
    }
}

impl Agent {
    /// Assembles an agent. The agent is not started.
    ///
    /// The agent id is the name of `message_box`.
    pub fn new(
        message_box: MessageBox,
        environment: Option<EnvironmentPortRef>,
        program: Arc<dyn AgentProgram>,
        pool: WorkerPool,
        config: &MasConfig,
    ) -> AgentRef {
        let id = AgentId::new(message_box.id().name());
        let span = info_span!("agent", id = %id);
        let controller = Controller::new(id.clone(), program, pool, span.clone(), config);
        Arc::new(Self {
            id,
            environment,
            message_box,
            span,
            controller,
        })
    }

    /// The agent id.
    #[inline]
    #[must_use]
    pub const fn id(&self) -> &AgentId {
        &self.id
    }

    /// The environment the agent acts in, if any.
    #[must_use]
    pub fn environment(&self) -> Option<&EnvironmentPortRef> {
        self.environment.as_ref()
    }

    /// The agent's own message box.
    #[inline]
    #[must_use]
    pub const fn message_box(&self) -> &MessageBox {
        &self.message_box
    }

    /// The span every step of this agent runs in.
    #[inline]
    #[must_use]
    pub const fn span(&self) -> &Span {
        &self.span
    }

    /// The controller driving this agent.
    #[inline]
    #[must_use]
    pub const fn controller(&self) -> &Arc<Controller> {
        &self.controller
    }

    /// Stops the agent and releases its program. Safe to call repeatedly.
    pub async fn dispose(&self) {
        self.controller.dispose().await;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::controller::Step;
    use crate::message::{LocalTransport, MessageBoxType, MessagingService};

    struct Idle;

    impl AgentProgram for Idle {
        fn first_step(self: Arc<Self>, _agent: &AgentId) -> Step {
            Step::new(|| async { Step::done() })
        }
    }

    #[tokio::test]
    async fn id_follows_message_box_name() {
        let messaging = MessagingService::new(Arc::new(LocalTransport::new()), true);
        let box_id = messaging
            .get_new_unique_id("walker", MessageBoxType::Agent)
            .await
            .unwrap();
        let message_box = messaging.get_new_message_box(&box_id).await.unwrap();
        let agent = Agent::new(
            message_box,
            None,
            Arc::new(Idle),
            WorkerPool::new(1).unwrap(),
            &MasConfig::default(),
        );

        assert_eq!(agent.id().as_str(), "walker");
        assert!(agent.environment().is_none());

        agent.controller().run();
        assert!(agent.controller().await_termination(Duration::from_secs(5)).await);
        agent.dispose().await;
        agent.dispose().await;
        assert!(agent.controller().is_disposed());
    }
}
