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
#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Once};
use std::time::Duration;

use mas_runtime::prelude::*;
use mas_runtime::traits::{ListenerId, MessageListener};
use parking_lot::Mutex;
use tracing::Level;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

// Ensures tracing initialization happens only once across all tests.
static INIT: Once = Once::new();

/// Initializes the global tracing subscriber for tests.
///
/// Logs go to `logs/mas_runtime_tests.txt` through a non-blocking writer.
pub fn initialize_tracing() {
    INIT.call_once(|| {
        std::fs::create_dir_all("logs").expect("could not create logs dir");

        let file_appender =
            RollingFileAppender::new(Rotation::NEVER, "logs", "mas_runtime_tests.txt");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        // Leak the guard so the non-blocking writer is not dropped before process exit
        Box::leak(Box::new(guard));

        let filter = EnvFilter::new("info")
            .add_directive("mas_runtime=trace".parse().unwrap())
            .add_directive("mas_runtime::controller::worker_pool=debug".parse().unwrap());

        let subscriber = FmtSubscriber::builder()
            .with_span_events(FmtSpan::NONE)
            .with_max_level(Level::TRACE)
            .compact()
            .with_line_number(true)
            .without_time()
            .with_env_filter(filter)
            .with_writer(non_blocking)
            .finish();

        tracing::subscriber::set_global_default(subscriber)
            .expect("setting default subscriber failed");
    });
}

/// Polls `check` until it holds or `timeout` elapses.
pub async fn wait_until(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    check()
}

/// Shared, ordered record of what a program went through.
#[derive(Debug, Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    pub fn count(&self, entry: &str) -> usize {
        self.0.lock().iter().filter(|e| e.as_str() == entry).count()
    }
}

/// How a [`ScriptedProgram`] behaves once started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Script {
    /// Produce a next step forever, yielding briefly in between.
    Forever,
    /// Stop after this many steps.
    Steps(usize),
    /// Fail with an error on the first step.
    Fail,
    /// Panic on the first step.
    Panic,
}

/// Agent program driven by a [`Script`], journaling every hook.
#[derive(Debug)]
pub struct ScriptedProgram {
    pub script: Script,
    pub journal: Journal,
    pub fail_reset: bool,
}

impl ScriptedProgram {
    pub fn new(script: Script) -> Arc<Self> {
        Arc::new(Self {
            script,
            journal: Journal::default(),
            fail_reset: false,
        })
    }

    pub fn failing_reset(script: Script) -> Arc<Self> {
        Arc::new(Self {
            script,
            journal: Journal::default(),
            fail_reset: true,
        })
    }

    fn step(self: Arc<Self>, remaining: Option<usize>) -> Step {
        Step::new(move || async move {
            self.journal.push("step");
            match self.script {
                Script::Fail => return Err(anyhow::anyhow!("scripted failure")),
                Script::Panic => panic!("scripted panic"),
                Script::Forever | Script::Steps(_) => {}
            }
            match remaining {
                Some(left) if left <= 1 => Step::done(),
                Some(left) => Step::then(self.step(Some(left - 1))),
                None => {
                    tokio::time::sleep(Duration::from_millis(1)).await;
                    Step::then(self.step(None))
                }
            }
        })
    }
}

#[async_trait]
impl AgentProgram for ScriptedProgram {
    fn first_step(self: Arc<Self>, _agent: &AgentId) -> Step {
        self.journal.push("start");
        let remaining = match self.script {
            Script::Steps(n) => Some(n),
            _ => None,
        };
        self.step(remaining)
    }

    fn on_terminate(&self) {
        self.journal.push("terminate");
    }

    async fn on_reset(&self) -> anyhow::Result<()> {
        self.journal.push("reset");
        if self.fail_reset {
            anyhow::bail!("scripted reset failure");
        }
        Ok(())
    }

    fn on_stopped(&self, last_error: Option<&anyhow::Error>) {
        self.journal
            .push(if last_error.is_some() { "stopped-with-error" } else { "stopped" });
    }

    async fn dispose(&self) {
        self.journal.push("dispose");
    }
}

/// Launches the given base names, each running a program that loops until stopped.
#[derive(Debug, Default)]
pub struct StaticFactory {
    pub names: Vec<String>,
    pub fail_on: Option<String>,
}

impl StaticFactory {
    pub fn new(names: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            names: names.iter().map(ToString::to_string).collect(),
            fail_on: None,
        })
    }

    pub fn failing(names: &[&str], fail_on: &str) -> Arc<Self> {
        Arc::new(Self {
            names: names.iter().map(ToString::to_string).collect(),
            fail_on: Some(fail_on.to_string()),
        })
    }
}

impl AgentFactory for StaticFactory {
    fn launch_plan(&self, _environment: Option<&Arc<dyn EnvironmentPort>>) -> Vec<String> {
        self.names.clone()
    }

    fn create_program(
        &self,
        id: &AgentId,
        _environment: Option<&Arc<dyn EnvironmentPort>>,
    ) -> anyhow::Result<Arc<dyn AgentProgram>> {
        if self.fail_on.as_deref() == Some(id.as_str()) {
            anyhow::bail!("no program for {id}");
        }
        Ok(ScriptedProgram::new(Script::Forever))
    }
}

/// Observer that keeps every event it receives.
#[derive(Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<RuntimeEvent>>,
}

impl RecordingObserver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn kinds(&self) -> Vec<&'static str> {
        self.events.lock().iter().map(RuntimeEvent::kind).collect()
    }

    pub fn count(&self, kind: &str) -> usize {
        self.events.lock().iter().filter(|e| e.kind() == kind).count()
    }

    pub fn events(&self) -> Vec<RuntimeEvent> {
        self.events.lock().clone()
    }
}

impl RuntimeObserver for RecordingObserver {
    fn event_received(&self, event: &RuntimeEvent) {
        self.events.lock().push(event.clone());
    }
}

/// Transport wrapper whose sends to selected boxes fail as unreachable.
///
/// Also counts the deletes that reach it.
#[derive(Debug)]
pub struct FlakyTransport {
    inner: Arc<LocalTransport>,
    unreachable: Mutex<HashSet<MessageBoxId>>,
    deletes: AtomicUsize,
}

impl FlakyTransport {
    pub fn new(inner: Arc<LocalTransport>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            unreachable: Mutex::new(HashSet::new()),
            deletes: AtomicUsize::new(0),
        })
    }

    pub fn cut_off(&self, id: &MessageBoxId) {
        self.unreachable.lock().insert(id.clone());
    }

    pub fn delete_calls(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for FlakyTransport {
    async fn create(&self, id: &MessageBoxId) -> Result<(), TransportError> {
        if self.unreachable.lock().contains(id) {
            return Err(TransportError::Unreachable {
                box_id: id.clone(),
                reason: "link down".to_string(),
            });
        }
        self.inner.create(id).await
    }

    async fn send(&self, envelope: Envelope) -> Result<(), TransportError> {
        if self.unreachable.lock().contains(&envelope.receiver) {
            return Err(TransportError::Unreachable {
                box_id: envelope.receiver,
                reason: "link down".to_string(),
            });
        }
        self.inner.send(envelope).await
    }

    fn add_listener(
        &self,
        id: &MessageBoxId,
        listener: Arc<dyn MessageListener>,
    ) -> Result<ListenerId, TransportError> {
        self.inner.add_listener(id, listener)
    }

    fn remove_listener(&self, id: &MessageBoxId, listener: ListenerId) -> bool {
        self.inner.remove_listener(id, listener)
    }

    async fn boxes(
        &self,
        box_type: MessageBoxType,
        name: Option<&str>,
    ) -> Result<Vec<MessageBoxId>, TransportError> {
        self.inner.boxes(box_type, name).await
    }

    async fn delete(&self, id: &MessageBoxId) -> Result<(), TransportError> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.inner.delete(id).await
    }

    async fn shut_down(&self) {
        self.inner.shut_down().await;
    }
}

/// One runtime on a shared transport, with a recording observer attached.
pub struct TestRuntime {
    pub manager: RuntimeManager,
    pub agents: Arc<LocalAgentService>,
    pub observer: Arc<RecordingObserver>,
}

/// Launches a runtime without environment whose agents loop until stopped.
pub async fn launch_runtime(transport: Arc<dyn Transport>, names: &[&str]) -> TestRuntime {
    let config = MasConfig::default();
    let messaging = Arc::new(MessagingService::new(transport, false));
    let pool = WorkerPool::new(4).expect("inside a tokio runtime");
    let agents = Arc::new(LocalAgentService::new(
        Arc::clone(&messaging),
        StaticFactory::new(names),
        pool,
        config.clone(),
    ));
    let environment = Arc::new(LocalEnvironmentService::without_environment());
    let manager = RuntimeManager::launch(messaging, agents.clone(), environment, config)
        .await
        .expect("runtime launches");
    let observer = RecordingObserver::new();
    manager.add_observer(observer.clone());
    TestRuntime {
        manager,
        agents,
        observer,
    }
}

/// Environment with no behavior beyond optionally refusing to start.
#[derive(Debug, Default)]
pub struct Sandbox {
    pub refuse_start: bool,
}

impl Environment for Sandbox {
    type Action = String;
    type Percept = String;

    fn start(&mut self) -> anyhow::Result<()> {
        if self.refuse_start {
            anyhow::bail!("sandbox refused to start");
        }
        Ok(())
    }

    fn register_entity(&mut self, _agent: &AgentId, _entity: &str) -> anyhow::Result<()> {
        Ok(())
    }

    fn perform_action(&mut self, _agent: &AgentId, _action: String) -> anyhow::Result<()> {
        Ok(())
    }

    fn percepts(&mut self, _agent: &AgentId) -> anyhow::Result<Vec<String>> {
        Ok(Vec::new())
    }
}
