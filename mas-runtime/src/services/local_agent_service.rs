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

use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use dashmap::DashMap;
use futures::future::join_all;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, trace, warn};

use crate::common::{AgentId, AgentRef, MasConfig};
use crate::controller::{Agent, AgentProgram, WorkerPool};
use crate::message::{MessageBoxType, MessagingService};
use crate::traits::{AgentService, AgentServiceEvent, EnvironmentPortRef};

/// Decides which agents a runtime launches and builds their programs.
pub trait AgentFactory: Send + Sync {
    /// Base names of the agents to launch for an environment, or for a system
    /// without one when `environment` is `None`. Names are made unique on launch.
    fn launch_plan(&self, environment: Option<&EnvironmentPortRef>) -> Vec<String>;

    /// Builds the program for an agent about to be launched.
    ///
    /// # Errors
    ///
    /// A failure aborts the launch of this agent.
    fn create_program(
        &self,
        id: &AgentId,
        environment: Option<&EnvironmentPortRef>,
    ) -> anyhow::Result<Arc<dyn AgentProgram>>;
}

/// In-process [`AgentService`] running every local agent on one shared [`WorkerPool`].
pub struct LocalAgentService {
    messaging: Arc<MessagingService>,
    factory: Arc<dyn AgentFactory>,
    pool: WorkerPool,
    config: MasConfig,
    local: DashMap<AgentId, AgentRef>,
    // Killed but not yet disposed.
    retired: Mutex<Vec<AgentRef>>,
    remote: Mutex<BTreeSet<AgentId>>,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<AgentServiceEvent>>>,
    accepting: AtomicBool,
}

impl fmt::Debug for LocalAgentService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalAgentService")
            .field("local_count", &self.local.len())
            .field("remote_count", &self.remote.lock().len())
            .field("pool", &self.pool)
            .finish_non_exhaustive()
    }
}

impl LocalAgentService {
    /// Creates the service. No agent is launched until the runtime starts it.
    pub fn new(
        messaging: Arc<MessagingService>,
        factory: Arc<dyn AgentFactory>,
        pool: WorkerPool,
        config: MasConfig,
    ) -> Self {
        Self {
            messaging,
            factory,
            pool,
            config,
            local: DashMap::new(),
            retired: Mutex::new(Vec::new()),
            remote: Mutex::new(BTreeSet::new()),
            subscribers: Mutex::new(Vec::new()),
            accepting: AtomicBool::new(true),
        }
    }

    /// Creates, registers and starts one agent.
    ///
    /// The agent gets a fresh message box named after `name` (suffixed if taken).
    ///
    /// # Errors
    ///
    /// Fails if the service is shutting down, if the box cannot be created, or if
    /// the factory cannot build the program. Nothing is left behind on failure.
    #[instrument(skip(self, environment))]
    pub async fn launch_agent(
        &self,
        name: &str,
        environment: Option<EnvironmentPortRef>,
    ) -> anyhow::Result<AgentRef> {
        if !self.accepting.load(Ordering::Acquire) {
            return Err(anyhow!("agent service is shutting down"));
        }

        let box_id = self
            .messaging
            .get_new_unique_id(name, MessageBoxType::Agent)
            .await
            .context("reserving agent message box")?;
        let message_box = match self.messaging.get_new_message_box(&box_id).await {
            Ok(message_box) => message_box,
            Err(e) => {
                // The box may belong to someone else, so only the reservation goes.
                self.messaging.forget_id(&box_id);
                warn!(box_id = %box_id, error = %e, "Agent box not created, reservation released");
                return Err(e).context("creating agent message box");
            }
        };

        let id = AgentId::new(box_id.name());
        let program = match self.factory.create_program(&id, environment.as_ref()) {
            Ok(program) => program,
            Err(e) => {
                if let Err(delete_error) = self.messaging.delete_message_box(&box_id).await {
                    warn!(agent = %id, error = %delete_error, "Failed to release agent box");
                }
                return Err(e.context(format!("building program for agent {id}")));
            }
        };

        let agent = Agent::new(message_box, environment, program, self.pool.clone(), &self.config);
        self.local.insert(id.clone(), Arc::clone(&agent));
        agent.controller().run();
        info!(agent = %id, "Local agent launched");
        self.emit(AgentServiceEvent::AddedLocalAgent(Arc::clone(&agent)));
        Ok(agent)
    }

    /// Stops a local agent and releases its message box.
    ///
    /// Returns `false` if no live local agent has this id.
    pub async fn kill_agent(&self, id: &AgentId) -> bool {
        let Some((_, agent)) = self.local.remove(id) else {
            return false;
        };
        agent.controller().terminate();
        self.retired.lock().push(Arc::clone(&agent));
        if let Err(e) = self
            .messaging
            .delete_message_box(agent.message_box().id())
            .await
        {
            warn!(agent = %id, error = %e, "Failed to release agent box");
        }
        info!(agent = %id, "Local agent killed");
        self.emit(AgentServiceEvent::RemovedLocalAgent(agent));
        true
    }

    async fn launch_plan(&self, environment: Option<EnvironmentPortRef>) -> anyhow::Result<()> {
        let plan = self.factory.launch_plan(environment.as_ref());
        debug!(count = plan.len(), "Launching planned agents");
        for name in plan {
            self.launch_agent(&name, environment.clone()).await?;
        }
        Ok(())
    }

    fn emit(&self, event: AgentServiceEvent) {
        self.subscribers
            .lock()
            .retain(|subscriber| subscriber.send(event.clone()).is_ok());
    }

    fn all_agents(&self) -> Vec<AgentRef> {
        let mut agents: Vec<AgentRef> = self.retired.lock().clone();
        agents.extend(self.local.iter().map(|entry| Arc::clone(entry.value())));
        agents
    }
}

#[async_trait]
impl AgentService for LocalAgentService {
    fn agents(&self) -> Vec<AgentRef> {
        let mut agents: Vec<AgentRef> = self
            .local
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        agents.sort_by(|a, b| a.id().cmp(b.id()));
        agents
    }

    fn agent(&self, id: &AgentId) -> Option<AgentRef> {
        self.local.get(id).map(|entry| Arc::clone(entry.value()))
    }

    fn remote_agents(&self) -> Vec<AgentId> {
        self.remote.lock().iter().cloned().collect()
    }

    fn handle_agent_created(&self, id: AgentId) {
        if self.local.contains_key(&id) {
            trace!(agent = %id, "Ignoring announcement of a local agent");
            return;
        }
        if self.remote.lock().insert(id.clone()) {
            debug!(agent = %id, "Remote agent registered");
            self.emit(AgentServiceEvent::AddedRemoteAgent(id));
        }
    }

    fn handle_agent_removed(&self, id: &AgentId) {
        if self.remote.lock().remove(id) {
            debug!(agent = %id, "Remote agent removed");
            self.emit(AgentServiceEvent::RemovedRemoteAgent(id.clone()));
        }
    }

    async fn handle_environment_port_added(&self, port: EnvironmentPortRef) -> anyhow::Result<()> {
        let plan = self.factory.launch_plan(Some(&port));
        let mut failures = 0_usize;
        for name in plan {
            if let Err(e) = self.launch_agent(&name, Some(Arc::clone(&port))).await {
                warn!(environment = port.name(), agent = %name, error = ?e, "Failed to launch agent");
                failures += 1;
            }
        }
        if failures > 0 {
            return Err(anyhow!(
                "{failures} agent(s) failed to launch on environment {}",
                port.name()
            ));
        }
        Ok(())
    }

    async fn handle_environment_port_removed(&self, port: &EnvironmentPortRef) {
        let bound: Vec<AgentId> = self
            .local
            .iter()
            .filter(|entry| {
                entry
                    .value()
                    .environment()
                    .is_some_and(|environment| environment.name() == port.name())
            })
            .map(|entry| entry.key().clone())
            .collect();
        for id in bound {
            self.kill_agent(&id).await;
        }
    }

    async fn start_without_env(&self) -> anyhow::Result<()> {
        self.launch_plan(None).await
    }

    #[instrument(skip(self))]
    async fn shut_down(&self) -> anyhow::Result<()> {
        self.accepting.store(false, Ordering::Release);
        let ids: Vec<AgentId> = self.local.iter().map(|entry| entry.key().clone()).collect();
        for id in ids {
            self.kill_agent(&id).await;
        }
        Ok(())
    }

    async fn await_termination(&self, timeout: Duration) -> bool {
        let agents = self.all_agents();
        let waits = agents
            .iter()
            .map(|agent| agent.controller().await_termination(Duration::ZERO));
        let joined = join_all(waits);
        if timeout.is_zero() {
            joined.await;
            true
        } else {
            tokio::time::timeout(timeout, joined).await.is_ok()
        }
    }

    async fn dispose(&self) {
        let mut agents: Vec<AgentRef> = std::mem::take(&mut *self.retired.lock());
        let live: Vec<AgentId> = self.local.iter().map(|entry| entry.key().clone()).collect();
        agents.extend(live.iter().filter_map(|id| self.local.remove(id).map(|(_, agent)| agent)));
        join_all(agents.iter().map(|agent| agent.dispose())).await;
        debug!(count = agents.len(), "Agents disposed");
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<AgentServiceEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().push(tx);
        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::Step;
    use crate::message::LocalTransport;

    struct Idle;

    impl AgentProgram for Idle {
        fn first_step(self: Arc<Self>, _agent: &AgentId) -> Step {
            Step::new(|| async { Step::done() })
        }
    }

    struct Named(Vec<&'static str>);

    impl AgentFactory for Named {
        fn launch_plan(&self, _environment: Option<&EnvironmentPortRef>) -> Vec<String> {
            self.0.iter().map(ToString::to_string).collect()
        }

        fn create_program(
            &self,
            _id: &AgentId,
            _environment: Option<&EnvironmentPortRef>,
        ) -> anyhow::Result<Arc<dyn AgentProgram>> {
            Ok(Arc::new(Idle))
        }
    }

    fn service(names: Vec<&'static str>) -> LocalAgentService {
        let messaging = Arc::new(MessagingService::new(Arc::new(LocalTransport::new()), true));
        LocalAgentService::new(
            messaging,
            Arc::new(Named(names)),
            WorkerPool::new(2).unwrap(),
            MasConfig::default(),
        )
    }

    #[tokio::test]
    async fn remote_announcements_are_deduplicated() {
        let service = service(vec![]);
        let mut events = service.subscribe();

        service.handle_agent_created(AgentId::new("far"));
        service.handle_agent_created(AgentId::new("far"));
        service.handle_agent_removed(&AgentId::new("far"));
        service.handle_agent_removed(&AgentId::new("far"));

        assert!(matches!(events.try_recv(), Ok(AgentServiceEvent::AddedRemoteAgent(_))));
        assert!(matches!(events.try_recv(), Ok(AgentServiceEvent::RemovedRemoteAgent(_))));
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn duplicate_names_get_unique_ids() {
        let service = service(vec!["bot", "bot"]);
        service.start_without_env().await.unwrap();
        let ids: Vec<String> = service
            .agents()
            .iter()
            .map(|agent| agent.id().to_string())
            .collect();
        assert_eq!(ids, vec!["bot", "bot1"]);
    }

    #[tokio::test]
    async fn shutdown_kills_and_refuses_new_agents() {
        let service = service(vec!["a", "b"]);
        let mut events = service.subscribe();
        service.start_without_env().await.unwrap();
        service.shut_down().await.unwrap();

        assert!(service.agents().is_empty());
        assert!(service.await_termination(Duration::from_secs(5)).await);
        assert!(service.launch_agent("late", None).await.is_err());

        let mut removed = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event, AgentServiceEvent::RemovedLocalAgent(_)) {
                removed += 1;
            }
        }
        assert_eq!(removed, 2);
        service.dispose().await;
    }
}
