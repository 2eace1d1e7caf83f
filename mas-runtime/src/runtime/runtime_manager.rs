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

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use static_assertions::assert_impl_all;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::common::{AgentId, AgentRef, MasConfig, RuntimeError};
use crate::message::{MessageBoxId, MessagingService};
use crate::runtime::{RemoteRuntimeEvent, RemoteRuntimeService, RuntimeEvent};
use crate::traits::{
    AgentServiceEvent, AgentServiceRef, EnvironmentPortRef, EnvironmentServiceEvent,
    EnvironmentServiceRef, ListenerId, ObserverId, RunMode, RuntimeObserver,
};

/// Everything the dispatch task reacts to, one variant per subsystem boundary.
#[derive(Debug)]
enum RuntimeInput {
    Publish(RuntimeEvent),
    Agent(AgentServiceEvent),
    Environment(EnvironmentServiceEvent),
    RunModeChanged(EnvironmentPortRef, RunMode),
    Remote(MessageBoxId, RemoteRuntimeEvent),
    Flush(oneshot::Sender<()>),
}

/// What has been published so far, replayed to observers that join late.
#[derive(Default)]
struct Published {
    born: bool,
    ports: Vec<EnvironmentPortRef>,
    remote_agents: BTreeSet<AgentId>,
    local_agents: BTreeMap<AgentId, AgentRef>,
}

impl Published {
    fn record(&mut self, event: &RuntimeEvent) {
        match event {
            RuntimeEvent::MasBorn => self.born = true,
            RuntimeEvent::MasDied => *self = Self::default(),
            RuntimeEvent::AgentIsLocalAndReady(agent) => {
                self.local_agents.insert(agent.id().clone(), Arc::clone(agent));
            }
            RuntimeEvent::AgentBorn(id) => {
                self.remote_agents.insert(id.clone());
            }
            RuntimeEvent::AgentRemoved(id) => {
                self.local_agents.remove(id);
                self.remote_agents.remove(id);
            }
            RuntimeEvent::EnvironmentLaunched(port) => self.ports.push(Arc::clone(port)),
            RuntimeEvent::EnvironmentKilled(port) => {
                self.ports.retain(|live| live.name() != port.name());
            }
            RuntimeEvent::EnvironmentRunModeChanged(..) => {}
        }
    }

    fn replay(&self) -> Vec<RuntimeEvent> {
        let mut events = Vec::new();
        if self.born {
            events.push(RuntimeEvent::MasBorn);
        }
        events.extend(self.ports.iter().cloned().map(RuntimeEvent::EnvironmentLaunched));
        events.extend(self.remote_agents.iter().cloned().map(RuntimeEvent::AgentBorn));
        events.extend(
            self.local_agents
                .values()
                .cloned()
                .map(RuntimeEvent::AgentIsLocalAndReady),
        );
        events
    }
}

/// The single writer of the runtime event stream.
struct Dispatch {
    agents: AgentServiceRef,
    remote: Arc<RemoteRuntimeService>,
    input: mpsc::UnboundedSender<RuntimeInput>,
    published: Mutex<Published>,
    observers: RwLock<Vec<(ObserverId, Arc<dyn RuntimeObserver>)>>,
    next_observer: AtomicUsize,
    tasks: TaskTracker,
    cancel: CancellationToken,
}

impl Dispatch {
    async fn run(self: Arc<Self>, mut input: mpsc::UnboundedReceiver<RuntimeInput>) {
        while let Some(next) = input.recv().await {
            let died = matches!(next, RuntimeInput::Publish(RuntimeEvent::MasDied));
            self.handle(next).await;
            if died {
                break;
            }
        }
        trace!("Runtime dispatch stopped");
    }

    async fn handle(&self, input: RuntimeInput) {
        match input {
            RuntimeInput::Publish(event) => self.publish(event),
            RuntimeInput::Agent(AgentServiceEvent::AddedLocalAgent(agent)) => {
                self.remote.broadcast_new_agent(agent.id().clone());
                self.publish(RuntimeEvent::AgentIsLocalAndReady(agent));
            }
            RuntimeInput::Agent(AgentServiceEvent::RemovedLocalAgent(agent)) => {
                self.remote.broadcast_dead_agent(agent.id().clone());
                self.publish(RuntimeEvent::AgentRemoved(agent.id().clone()));
            }
            RuntimeInput::Agent(AgentServiceEvent::AddedRemoteAgent(id)) => {
                self.publish(RuntimeEvent::AgentBorn(id));
            }
            RuntimeInput::Agent(AgentServiceEvent::RemovedRemoteAgent(id)) => {
                self.publish(RuntimeEvent::AgentRemoved(id));
            }
            RuntimeInput::Environment(EnvironmentServiceEvent::EnvironmentPortAdded(port)) => {
                self.follow_run_mode(&port);
                self.publish(RuntimeEvent::EnvironmentLaunched(Arc::clone(&port)));
                if let Err(e) = self.agents.handle_environment_port_added(Arc::clone(&port)).await {
                    warn!(port = port.name(), error = %e, "Agent service failed to take up environment");
                }
            }
            RuntimeInput::Environment(EnvironmentServiceEvent::EnvironmentPortRemoved(port)) => {
                self.agents.handle_environment_port_removed(&port).await;
                self.publish(RuntimeEvent::EnvironmentKilled(port));
            }
            RuntimeInput::RunModeChanged(port, mode) => {
                self.publish(RuntimeEvent::EnvironmentRunModeChanged(port, mode));
            }
            RuntimeInput::Remote(sender, RemoteRuntimeEvent::NewAgent(id)) => {
                trace!(sender = %sender, agent = %id, "Peer announced agent");
                self.agents.handle_agent_created(id);
            }
            RuntimeInput::Remote(sender, RemoteRuntimeEvent::DeadAgent(id)) => {
                trace!(sender = %sender, agent = %id, "Peer reported agent dead");
                self.agents.handle_agent_removed(&id);
            }
            RuntimeInput::Remote(_, RemoteRuntimeEvent::RuntimeLaunched(peer)) => {
                let agents = self.agents.agents();
                debug!(peer = %peer, count = agents.len(), "Introducing local agents to new peer");
                self.remote
                    .introduce_agents_to(&peer, agents.iter().map(|agent| agent.id().clone()));
            }
            RuntimeInput::Flush(done) => {
                let _ = done.send(());
            }
        }
    }

    fn publish(&self, event: RuntimeEvent) {
        let mut published = self.published.lock();
        published.record(&event);
        let observers: Vec<Arc<dyn RuntimeObserver>> = self
            .observers
            .read()
            .iter()
            .map(|(_, observer)| Arc::clone(observer))
            .collect();
        trace!(event = event.kind(), observers = observers.len(), "Publishing runtime event");
        for observer in observers {
            observer.event_received(&event);
        }
    }

    fn follow_run_mode(&self, port: &EnvironmentPortRef) {
        let port_ref = Arc::clone(port);
        forward(
            &self.tasks,
            self.cancel.clone(),
            port.subscribe(),
            self.input.clone(),
            move |mode| RuntimeInput::RunModeChanged(Arc::clone(&port_ref), mode),
        );
    }
}

fn forward<T, F>(
    tasks: &TaskTracker,
    cancel: CancellationToken,
    mut source: mpsc::UnboundedReceiver<T>,
    input: mpsc::UnboundedSender<RuntimeInput>,
    wrap: F,
) where
    T: Send + 'static,
    F: Fn(T) -> RuntimeInput + Send + 'static,
{
    tasks.spawn(async move {
        loop {
            let item = tokio::select! {
                () = cancel.cancelled() => {
                    // Hand over whatever was reported before the cancellation.
                    while let Ok(item) = source.try_recv() {
                        let _ = input.send(wrap(item));
                    }
                    break;
                }
                item = source.recv() => match item {
                    Some(item) => item,
                    None => break,
                },
            };
            if input.send(wrap(item)).is_err() {
                break;
            }
        }
    });
}

/// Composition root of a runtime.
///
/// Wires the agent, environment, messaging and remote runtime services together
/// and exposes their combined activity as one stream of [`RuntimeEvent`]s.
///
/// Each subsystem reports over its own channel. A forwarding task per channel
/// feeds a single internal queue, and one dispatch task drains that queue,
/// translating inputs into published events and into calls on the other
/// subsystems. Observers therefore see events one at a time, in a single order.
///
/// # Lifecycle
///
/// [`launch`](Self::launch) either returns a running manager or rolls back
/// everything it started and fails with [`RuntimeError::LaunchFailed`].
/// [`shut_down`](Self::shut_down) tears the subsystems down in a fixed order,
/// logging and skipping past any step that fails.
pub struct RuntimeManager {
    config: MasConfig,
    messaging: Arc<MessagingService>,
    remote: Arc<RemoteRuntimeService>,
    agents: AgentServiceRef,
    environment: EnvironmentServiceRef,
    dispatch: Arc<Dispatch>,
    dispatch_task: Mutex<Option<JoinHandle<()>>>,
    remote_listener: ListenerId,
    stopped: AtomicBool,
}

assert_impl_all!(RuntimeManager: Send, Sync);

impl fmt::Debug for RuntimeManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeManager")
            .field("remote", &self.remote)
            .field("observer_count", &self.dispatch.observers.read().len())
            .field("stopped", &self.stopped.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl RuntimeManager {
    /// Starts a runtime.
    ///
    /// Starts the remote runtime service, then the environment service (or the
    /// agent service on its own when there is no environment), then announces
    /// the runtime to its peers.
    ///
    /// # Arguments
    ///
    /// * `messaging`: the messaging service every subsystem shares.
    /// * `agents`: the agent service owning the local agent population.
    /// * `environment`: the environment service owning the environment ports.
    /// * `config`: timeouts and the runtime-service box name.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::LaunchFailed`] if any subsystem fails to start.
    /// Subsystems started before the failure are shut down again first.
    #[instrument(skip_all)]
    pub async fn launch(
        messaging: Arc<MessagingService>,
        agents: AgentServiceRef,
        environment: EnvironmentServiceRef,
        config: MasConfig,
    ) -> Result<Self, RuntimeError> {
        let remote = RemoteRuntimeService::new(Arc::clone(&messaging), &config)
            .await
            .map_err(|e| RuntimeError::LaunchFailed(format!("remote runtime service: {e}")))?;

        let (input, queue) = mpsc::unbounded_channel();
        let tasks = TaskTracker::new();
        let cancel = CancellationToken::new();
        let dispatch = Arc::new(Dispatch {
            agents: Arc::clone(&agents),
            remote: Arc::clone(&remote),
            input: input.clone(),
            published: Mutex::new(Published::default()),
            observers: RwLock::new(Vec::new()),
            next_observer: AtomicUsize::new(0),
            tasks: tasks.clone(),
            cancel: cancel.clone(),
        });
        let dispatch_task = tokio::spawn(Arc::clone(&dispatch).run(queue));

        forward(&tasks, cancel.clone(), agents.subscribe(), input.clone(), RuntimeInput::Agent);
        forward(
            &tasks,
            cancel.clone(),
            environment.subscribe(),
            input.clone(),
            RuntimeInput::Environment,
        );
        let remote_input = input.clone();
        let remote_listener = remote.add_listener(Arc::new(
            move |event: &RemoteRuntimeEvent, sender: &MessageBoxId| {
                if remote_input
                    .send(RuntimeInput::Remote(sender.clone(), event.clone()))
                    .is_err()
                {
                    trace!("Runtime dispatch stopped, dropping remote runtime event");
                }
            },
        ));

        let manager = Self {
            config,
            messaging,
            remote,
            agents,
            environment,
            dispatch,
            dispatch_task: Mutex::new(Some(dispatch_task)),
            remote_listener,
            stopped: AtomicBool::new(false),
        };

        if let Err(e) = manager.remote.start().await {
            error!(error = %e, "Remote runtime service failed to start");
            manager.roll_back(false).await;
            return Err(RuntimeError::LaunchFailed(format!("remote runtime service: {e}")));
        }
        manager.send(RuntimeInput::Publish(RuntimeEvent::MasBorn));

        let started = if manager.environment.has_environment() {
            manager.environment.start().await
        } else {
            manager.agents.start_without_env().await
        };
        if let Err(e) = started {
            error!(error = ?e, "Runtime subsystems failed to start");
            manager.roll_back(true).await;
            return Err(RuntimeError::LaunchFailed(format!("{e:#}")));
        }

        manager.remote.broadcast_runtime_launched();
        manager.flush().await;
        info!(box_id = %manager.remote.box_id(), "Runtime launched");
        Ok(manager)
    }

    async fn roll_back(&self, services_started: bool) {
        if services_started {
            if let Err(e) = self.agents.shut_down().await {
                warn!(error = %e, "Rollback: agent service shutdown failed");
            }
            if let Err(e) = self.environment.shut_down().await {
                warn!(error = %e, "Rollback: environment service shutdown failed");
            }
        }
        self.remote.shut_down().await;
        self.stopped.store(true, Ordering::Release);
        self.stop_dispatch().await;
    }

    async fn stop_dispatch(&self) {
        self.dispatch.cancel.cancel();
        self.dispatch.tasks.close();
        self.dispatch.tasks.wait().await;

        // Everything the subsystems reported is queued now; MasDied is the last event.
        self.send(RuntimeInput::Publish(RuntimeEvent::MasDied));
        let dispatch_task = self.dispatch_task.lock().take();
        if let Some(dispatch_task) = dispatch_task {
            let timeout = self.config.agent_shutdown_timeout();
            let joined = if timeout.is_zero() {
                Ok(dispatch_task.await)
            } else {
                tokio::time::timeout(timeout, dispatch_task).await
            };
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(error = %e, "Runtime dispatch task failed"),
                Err(_) => warn!("Runtime dispatch did not finish in time"),
            }
        }
    }

    // Waits until the dispatch task has handled everything queued so far.
    async fn flush(&self) {
        let (done, handled) = oneshot::channel();
        self.send(RuntimeInput::Flush(done));
        let _ = handled.await;
    }

    fn send(&self, input: RuntimeInput) {
        if self.dispatch.input.send(input).is_err() {
            debug!("Runtime dispatch stopped, input dropped");
        }
    }

    /// Registers an observer and replays the current state to it.
    ///
    /// Before any live event, the observer receives `MasBorn` (if the runtime is
    /// up), one `EnvironmentLaunched` per live port, one `AgentBorn` per known
    /// remote agent and one `AgentIsLocalAndReady` per live local agent.
    ///
    /// Must not be called from inside an observer callback.
    pub fn add_observer(&self, observer: Arc<dyn RuntimeObserver>) -> ObserverId {
        // Holding the published state keeps the dispatch task from publishing mid-replay.
        let published = self.dispatch.published.lock();
        for event in published.replay() {
            observer.event_received(&event);
        }
        let id = self.dispatch.next_observer.fetch_add(1, Ordering::Relaxed);
        self.dispatch.observers.write().push((id, observer));
        id
    }

    /// Unregisters an observer. Returns `false` if it was not registered.
    pub fn remove_observer(&self, id: ObserverId) -> bool {
        let mut observers = self.dispatch.observers.write();
        let before = observers.len();
        observers.retain(|(existing, _)| *existing != id);
        observers.len() != before
    }

    /// Registers an observer that forwards every event into a channel.
    pub fn subscribe(&self) -> (ObserverId, mpsc::UnboundedReceiver<RuntimeEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.add_observer(Arc::new(move |event: &RuntimeEvent| {
            let _ = tx.send(event.clone());
        }));
        (id, rx)
    }

    /// Always fails: runtime events are published by the manager alone.
    ///
    /// # Errors
    ///
    /// Always returns [`RuntimeError::ExternalPublish`].
    pub fn notify_observers(&self, event: RuntimeEvent) -> Result<(), RuntimeError> {
        warn!(event = event.kind(), "Rejected attempt to publish a runtime event from outside");
        Err(RuntimeError::ExternalPublish)
    }

    /// The configuration the runtime was launched with.
    #[inline]
    #[must_use]
    pub const fn config(&self) -> &MasConfig {
        &self.config
    }

    /// The messaging service shared by the subsystems.
    #[inline]
    #[must_use]
    pub const fn messaging(&self) -> &Arc<MessagingService> {
        &self.messaging
    }

    /// This runtime's remote runtime service.
    #[inline]
    #[must_use]
    pub const fn remote(&self) -> &Arc<RemoteRuntimeService> {
        &self.remote
    }

    /// The agent service.
    #[inline]
    #[must_use]
    pub const fn agent_service(&self) -> &AgentServiceRef {
        &self.agents
    }

    /// The environment service.
    #[inline]
    #[must_use]
    pub const fn environment_service(&self) -> &EnvironmentServiceRef {
        &self.environment
    }

    /// Shuts the runtime down. Calling it again does nothing.
    ///
    /// Steps run in order and a failing step is logged and skipped:
    ///
    /// 1. stop the remote runtime service and wait for its pipelines;
    /// 2. stop the agent service and wait for the agents to terminate;
    /// 3. dispose of the agents;
    /// 4. stop the environment service;
    /// 5. stop the messaging service;
    /// 6. publish `MasDied`.
    #[instrument(skip(self), fields(box_id = %self.remote.box_id()))]
    pub async fn shut_down(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("Shutting down runtime");

        self.remote.remove_listener(self.remote_listener);
        self.remote.shut_down().await;
        if !self
            .remote
            .await_termination(self.config.remote_service_shutdown_timeout())
            .await
        {
            warn!("Remote runtime pipelines did not stop in time");
        }

        if let Err(e) = self.agents.shut_down().await {
            warn!(error = %e, "Agent service shutdown failed");
        }
        if !self
            .agents
            .await_termination(self.config.agent_shutdown_timeout())
            .await
        {
            warn!(timeout = ?self.config.agent_shutdown_timeout(), "Agents did not terminate in time");
        }
        self.agents.dispose().await;

        if let Err(e) = self.environment.shut_down().await {
            warn!(error = %e, "Environment service shutdown failed");
        }

        self.messaging.shut_down().await;

        self.stop_dispatch().await;
        info!("Runtime shut down");
    }
}
