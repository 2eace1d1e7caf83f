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

use anyhow::anyhow;
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::common::AgentId;
use crate::traits::{EnvironmentPort, RunMode};

/// An environment implementation whose thread safety is unknown.
///
/// A [`QueuedEnvironmentPort`] moves the environment onto a single worker task
/// and calls it from there only, so implementations need to be `Send` but not
/// `Sync`, and never see two calls at once.
pub trait Environment: Send + 'static {
    /// What an agent can do.
    type Action: Send + 'static;
    /// What an agent can observe.
    type Percept: Send + 'static;

    /// Prepares the environment.
    ///
    /// # Errors
    ///
    /// A failure leaves the port paused.
    fn start(&mut self) -> anyhow::Result<()>;

    /// Associates an agent with an entity it controls.
    ///
    /// # Errors
    ///
    /// Fails if the entity is unknown or already taken.
    fn register_entity(&mut self, agent: &AgentId, entity: &str) -> anyhow::Result<()>;

    /// Performs an action on behalf of an agent.
    ///
    /// # Errors
    ///
    /// Fails if the action is not possible.
    fn perform_action(&mut self, agent: &AgentId, action: Self::Action) -> anyhow::Result<()>;

    /// Current observations of an agent.
    ///
    /// # Errors
    ///
    /// Fails if the agent controls no entity.
    fn percepts(&mut self, agent: &AgentId) -> anyhow::Result<Vec<Self::Percept>>;

    /// Releases the environment.
    ///
    /// # Errors
    ///
    /// Failures are logged by the port and otherwise ignored.
    fn kill(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

type Reply<T> = oneshot::Sender<anyhow::Result<T>>;

enum Request<E: Environment> {
    Start(Reply<()>),
    Register {
        agent: AgentId,
        entity: String,
        reply: Reply<()>,
    },
    Act {
        agent: AgentId,
        action: E::Action,
        reply: Reply<()>,
    },
    Percepts {
        agent: AgentId,
        reply: Reply<Vec<E::Percept>>,
    },
    Kill(Reply<()>),
}

/// [`EnvironmentPort`] that serializes every request to its environment.
///
/// Requests are queued in arrival order and served one by one by a dedicated
/// worker that owns the environment. Each request carries its own reply
/// channel. Killing the port stops the worker; every later request fails.
pub struct QueuedEnvironmentPort<E: Environment> {
    name: String,
    requests: mpsc::UnboundedSender<Request<E>>,
    run_mode: Mutex<RunMode>,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<RunMode>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    cancel: CancellationToken,
}

impl<E: Environment> fmt::Debug for QueuedEnvironmentPort<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueuedEnvironmentPort")
            .field("name", &self.name)
            .field("run_mode", &*self.run_mode.lock())
            .finish_non_exhaustive()
    }
}

impl<E: Environment> QueuedEnvironmentPort<E> {
    /// Moves `environment` onto a new worker task. The port starts paused.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn new(name: impl Into<String>, environment: E) -> Self {
        let name = name.into();
        let (requests, queue) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let worker = tokio::spawn(serve(name.clone(), environment, queue, cancel.clone()));
        Self {
            name,
            requests,
            run_mode: Mutex::new(RunMode::Paused),
            subscribers: Mutex::new(Vec::new()),
            worker: Mutex::new(Some(worker)),
            cancel,
        }
    }

    /// Associates an agent with an entity of the environment.
    ///
    /// # Errors
    ///
    /// Fails if the port is killed or the environment rejects the registration.
    pub async fn register_entity(&self, agent: &AgentId, entity: &str) -> anyhow::Result<()> {
        self.request(|reply| Request::Register {
            agent: agent.clone(),
            entity: entity.to_string(),
            reply,
        })
        .await
    }

    /// Performs an action on behalf of an agent.
    ///
    /// # Errors
    ///
    /// Fails if the port is not running or the environment rejects the action.
    pub async fn perform_action(&self, agent: &AgentId, action: E::Action) -> anyhow::Result<()> {
        let mode = self.run_mode();
        if mode != RunMode::Running {
            return Err(anyhow!("environment {} is {mode}", self.name));
        }
        self.request(|reply| Request::Act {
            agent: agent.clone(),
            action,
            reply,
        })
        .await
    }

    /// Current observations of an agent.
    ///
    /// # Errors
    ///
    /// Fails if the port is killed or the environment cannot produce percepts.
    pub async fn percepts(&self, agent: &AgentId) -> anyhow::Result<Vec<E::Percept>> {
        self.request(|reply| Request::Percepts {
            agent: agent.clone(),
            reply,
        })
        .await
    }

    /// Stops accepting actions until [`resume`](Self::resume).
    pub fn pause(&self) {
        self.transition(RunMode::Running, RunMode::Paused);
    }

    /// Accepts actions again after [`pause`](Self::pause).
    pub fn resume(&self) {
        self.transition(RunMode::Paused, RunMode::Running);
    }

    fn transition(&self, from: RunMode, to: RunMode) {
        {
            let mut mode = self.run_mode.lock();
            if *mode != from {
                return;
            }
            *mode = to;
        }
        self.announce(to);
    }

    fn announce(&self, mode: RunMode) {
        debug!(environment = %self.name, mode = %mode, "Environment run mode changed");
        self.subscribers
            .lock()
            .retain(|subscriber| subscriber.send(mode).is_ok());
    }

    async fn request<T>(&self, build: impl FnOnce(Reply<T>) -> Request<E>) -> anyhow::Result<T> {
        if self.run_mode() == RunMode::Killed {
            return Err(anyhow!("environment {} is killed", self.name));
        }
        let (reply, response) = oneshot::channel();
        self.requests
            .send(build(reply))
            .map_err(|_| anyhow!("environment {} is no longer served", self.name))?;
        response
            .await
            .map_err(|_| anyhow!("environment {} dropped the request", self.name))?
    }
}

#[async_trait]
impl<E: Environment> EnvironmentPort for QueuedEnvironmentPort<E> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn start(&self) -> anyhow::Result<()> {
        self.request(Request::Start).await?;
        self.transition(RunMode::Paused, RunMode::Running);
        Ok(())
    }

    fn run_mode(&self) -> RunMode {
        *self.run_mode.lock()
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<RunMode> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().push(tx);
        rx
    }

    async fn kill(&self) -> anyhow::Result<()> {
        let killed = self.request(Request::Kill).await;
        {
            let mut mode = self.run_mode.lock();
            if *mode == RunMode::Killed {
                return Ok(());
            }
            *mode = RunMode::Killed;
        }
        self.announce(RunMode::Killed);
        self.cancel.cancel();

        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                warn!(environment = %self.name, error = %e, "Environment worker failed");
            }
        }
        killed
    }
}

async fn serve<E: Environment>(
    name: String,
    mut environment: E,
    mut queue: mpsc::UnboundedReceiver<Request<E>>,
    cancel: CancellationToken,
) {
    loop {
        let request = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            request = queue.recv() => match request {
                Some(request) => request,
                None => break,
            },
        };
        match request {
            Request::Start(reply) => {
                let _ = reply.send(environment.start());
            }
            Request::Register {
                agent,
                entity,
                reply,
            } => {
                let _ = reply.send(environment.register_entity(&agent, &entity));
            }
            Request::Act {
                agent,
                action,
                reply,
            } => {
                let _ = reply.send(environment.perform_action(&agent, action));
            }
            Request::Percepts { agent, reply } => {
                let _ = reply.send(environment.percepts(&agent));
            }
            Request::Kill(reply) => {
                let _ = reply.send(environment.kill());
                break;
            }
        }
    }
    trace!(environment = %name, "Environment worker stopped");
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[derive(Default)]
    struct Counter {
        started: bool,
        entities: HashMap<AgentId, String>,
        log: Vec<u32>,
    }

    impl Environment for Counter {
        type Action = u32;
        type Percept = u32;

        fn start(&mut self) -> anyhow::Result<()> {
            self.started = true;
            Ok(())
        }

        fn register_entity(&mut self, agent: &AgentId, entity: &str) -> anyhow::Result<()> {
            self.entities.insert(agent.clone(), entity.to_string());
            Ok(())
        }

        fn perform_action(&mut self, agent: &AgentId, action: u32) -> anyhow::Result<()> {
            if !self.entities.contains_key(agent) {
                return Err(anyhow!("{agent} controls no entity"));
            }
            self.log.push(action);
            Ok(())
        }

        fn percepts(&mut self, _agent: &AgentId) -> anyhow::Result<Vec<u32>> {
            Ok(self.log.clone())
        }
    }

    #[tokio::test]
    async fn requests_are_served_in_order() {
        let port = QueuedEnvironmentPort::new("counter", Counter::default());
        let agent = AgentId::new("ant");
        assert_eq!(port.run_mode(), RunMode::Paused);
        assert!(port.perform_action(&agent, 1).await.is_err());

        port.start().await.unwrap();
        port.register_entity(&agent, "worker").await.unwrap();
        for action in 0..5 {
            port.perform_action(&agent, action).await.unwrap();
        }
        assert_eq!(port.percepts(&agent).await.unwrap(), vec![0, 1, 2, 3, 4]);
        assert!(port
            .perform_action(&AgentId::new("stranger"), 9)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn run_mode_changes_are_published() {
        let port = QueuedEnvironmentPort::new("counter", Counter::default());
        let mut modes = port.subscribe();
        port.start().await.unwrap();
        port.pause();
        port.resume();
        port.kill().await.unwrap();

        let mut seen = Vec::new();
        while let Ok(mode) = modes.try_recv() {
            seen.push(mode);
        }
        assert_eq!(
            seen,
            vec![RunMode::Running, RunMode::Paused, RunMode::Running, RunMode::Killed]
        );
    }

    #[tokio::test]
    async fn requests_after_kill_fail() {
        let port = QueuedEnvironmentPort::new("counter", Counter::default());
        port.start().await.unwrap();
        port.kill().await.unwrap();
        assert!(port.percepts(&AgentId::new("ant")).await.is_err());
        assert!(port.kill().await.is_ok());
        assert_eq!(port.run_mode(), RunMode::Killed);
    }
}
