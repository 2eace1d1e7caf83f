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
use std::time::Duration;

use mas_runtime::prelude::*;

use crate::setup::*;

mod setup;

const WAIT: Duration = Duration::from_secs(5);

struct WithEnvironment {
    manager: RuntimeManager,
    ports: Vec<Arc<QueuedEnvironmentPort<Sandbox>>>,
    agents: Arc<LocalAgentService>,
    observer: Arc<RecordingObserver>,
}

async fn launch_with_ports(
    transport: Arc<dyn Transport>,
    port_names: &[&str],
    agents_per_port: &[&str],
) -> WithEnvironment {
    let config = MasConfig::default();
    let messaging = Arc::new(MessagingService::new(transport, true));
    let agents = Arc::new(LocalAgentService::new(
        Arc::clone(&messaging),
        StaticFactory::new(agents_per_port),
        WorkerPool::new(4).unwrap(),
        config.clone(),
    ));
    let ports: Vec<Arc<QueuedEnvironmentPort<Sandbox>>> = port_names
        .iter()
        .map(|name| Arc::new(QueuedEnvironmentPort::new(*name, Sandbox::default())))
        .collect();
    let environment = Arc::new(LocalEnvironmentService::new(
        ports
            .iter()
            .map(|port| Arc::clone(port) as Arc<dyn EnvironmentPort>)
            .collect(),
    ));
    let manager = RuntimeManager::launch(messaging, agents.clone(), environment, config)
        .await
        .unwrap();
    let observer = RecordingObserver::new();
    manager.add_observer(observer.clone());
    WithEnvironment {
        manager,
        ports,
        agents,
        observer,
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn late_observer_gets_state_replayed_before_live_events() {
    initialize_tracing();
    let transport: Arc<dyn Transport> = Arc::new(LocalTransport::new());
    let runtime = launch_with_ports(transport, &["grid", "maze"], &["bot"]).await;
    assert!(wait_until(WAIT, || runtime.observer.count("AgentIsLocalAndReady") == 2).await);

    let late = RecordingObserver::new();
    runtime.manager.add_observer(late.clone());
    assert_eq!(
        late.kinds(),
        vec![
            "MasBorn",
            "EnvironmentLaunched",
            "EnvironmentLaunched",
            "AgentIsLocalAndReady",
            "AgentIsLocalAndReady",
        ]
    );

    let victim = runtime.agents.agents()[0].id().clone();
    assert!(runtime.agents.kill_agent(&victim).await);
    assert!(wait_until(WAIT, || late.count("AgentRemoved") == 1).await);
    assert_eq!(late.kinds()[5], "AgentRemoved");

    runtime.manager.shut_down().await;
}

// Applies a stream to the set of local agents, failing on an announcement of
// a live agent or a removal of an unknown one.
fn fold_local_agents(events: &[RuntimeEvent]) -> Result<BTreeSet<AgentId>, String> {
    let mut live = BTreeSet::new();
    for event in events {
        match event {
            RuntimeEvent::AgentIsLocalAndReady(agent) => {
                if !live.insert(agent.id().clone()) {
                    return Err(format!("{} announced twice", agent.id()));
                }
            }
            RuntimeEvent::AgentRemoved(id) => {
                if !live.remove(id) {
                    return Err(format!("{id} removed but never announced"));
                }
            }
            _ => {}
        }
    }
    Ok(live)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn observer_added_during_churn_sees_consistent_stream() {
    initialize_tracing();
    let runtime = launch_runtime(Arc::new(LocalTransport::new()), &[]).await;

    let agents = Arc::clone(&runtime.agents);
    let churn = tokio::spawn(async move {
        for n in 0..200 {
            let agent = agents.launch_agent(&format!("worker{n}"), None).await.unwrap();
            if n % 2 == 0 {
                assert!(agents.kill_agent(agent.id()).await);
            }
            tokio::task::yield_now().await;
        }
    });

    assert!(wait_until(WAIT, || runtime.agents.agents().len() >= 10).await);
    let late = RecordingObserver::new();
    runtime.manager.add_observer(late.clone());
    churn.await.unwrap();

    let expected: BTreeSet<AgentId> = runtime
        .agents
        .agents()
        .iter()
        .map(|agent| agent.id().clone())
        .collect();
    assert_eq!(expected.len(), 100);
    assert!(wait_until(WAIT, || fold_local_agents(&late.events()).as_ref() == Ok(&expected)).await);

    let events = late.events();
    assert_eq!(events[0].kind(), "MasBorn");
    assert_eq!(late.count("MasBorn"), 1);
    assert_eq!(fold_local_agents(&events), Ok(expected));

    runtime.manager.shut_down().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn replay_includes_remote_agents() {
    initialize_tracing();
    let transport: Arc<dyn Transport> = Arc::new(LocalTransport::new());
    let peer = launch_runtime(Arc::clone(&transport), &["far"]).await;
    assert!(wait_until(WAIT, || peer.observer.count("AgentIsLocalAndReady") == 1).await);

    let local = launch_runtime(Arc::clone(&transport), &["near"]).await;
    assert!(wait_until(WAIT, || local.observer.count("AgentBorn") == 1).await);
    assert!(wait_until(WAIT, || local.observer.count("AgentIsLocalAndReady") == 1).await);

    let late = RecordingObserver::new();
    local.manager.add_observer(late.clone());
    assert_eq!(late.kinds(), vec!["MasBorn", "AgentBorn", "AgentIsLocalAndReady"]);

    local.manager.shut_down().await;
    peer.manager.shut_down().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn outside_publication_is_rejected() {
    initialize_tracing();
    let runtime = launch_runtime(Arc::new(LocalTransport::new()), &[]).await;
    let before = runtime.observer.kinds();

    let result = runtime.manager.notify_observers(RuntimeEvent::MasDied);
    assert!(matches!(result, Err(RuntimeError::ExternalPublish)));
    assert_eq!(runtime.observer.kinds(), before);

    runtime.manager.shut_down().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn removed_observer_stops_receiving() {
    initialize_tracing();
    let runtime = launch_runtime(Arc::new(LocalTransport::new()), &[]).await;
    let watcher = RecordingObserver::new();
    let id = runtime.manager.add_observer(watcher.clone());
    assert!(runtime.manager.remove_observer(id));
    assert!(!runtime.manager.remove_observer(id));

    runtime.agents.launch_agent("late", None).await.unwrap();
    assert!(wait_until(WAIT, || runtime.observer.count("AgentIsLocalAndReady") == 1).await);
    assert_eq!(watcher.kinds(), vec!["MasBorn"]);

    runtime.manager.shut_down().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_environment_start_rolls_back() {
    initialize_tracing();
    let transport = Arc::new(LocalTransport::new());
    let config = MasConfig::default();
    let messaging = Arc::new(MessagingService::new(transport.clone(), true));
    let agents = Arc::new(LocalAgentService::new(
        Arc::clone(&messaging),
        StaticFactory::new(&["bot"]),
        WorkerPool::new(2).unwrap(),
        config.clone(),
    ));
    let broken: Arc<dyn EnvironmentPort> = Arc::new(QueuedEnvironmentPort::new(
        "broken",
        Sandbox { refuse_start: true },
    ));
    let environment = Arc::new(LocalEnvironmentService::new(vec![broken]));

    let result = RuntimeManager::launch(messaging, agents.clone(), environment, config).await;
    assert!(matches!(result, Err(RuntimeError::LaunchFailed(_))));

    assert!(transport
        .boxes(MessageBoxType::RuntimeService, None)
        .await
        .unwrap()
        .is_empty());
    assert!(agents.launch_agent("after", None).await.is_err());
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_agent_start_rolls_back() {
    initialize_tracing();
    let transport = Arc::new(LocalTransport::new());
    let config = MasConfig::default();
    let messaging = Arc::new(MessagingService::new(transport.clone(), true));
    let agents = Arc::new(LocalAgentService::new(
        Arc::clone(&messaging),
        StaticFactory::failing(&["good", "bad"], "bad"),
        WorkerPool::new(2).unwrap(),
        config.clone(),
    ));
    let environment = Arc::new(LocalEnvironmentService::without_environment());

    let result = RuntimeManager::launch(messaging, agents.clone(), environment, config).await;
    assert!(matches!(result, Err(RuntimeError::LaunchFailed(_))));
    assert!(agents.agents().is_empty());
    assert_eq!(transport.box_count(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn shutdown_ends_with_mas_died() {
    initialize_tracing();
    let transport = Arc::new(LocalTransport::new());
    let runtime = launch_with_ports(transport.clone(), &["grid"], &["a", "b"]).await;
    assert!(wait_until(WAIT, || runtime.observer.count("AgentIsLocalAndReady") == 2).await);
    let agents = runtime.agents.agents();

    runtime.manager.shut_down().await;
    runtime.manager.shut_down().await;

    let kinds = runtime.observer.kinds();
    assert_eq!(kinds.last(), Some(&"MasDied"));
    assert_eq!(runtime.observer.count("MasDied"), 1);
    assert_eq!(runtime.observer.count("AgentRemoved"), 2);
    assert_eq!(runtime.observer.count("EnvironmentKilled"), 1);
    assert!(agents.iter().all(|agent| agent.controller().terminated()));
    assert!(agents.iter().all(|agent| agent.controller().is_disposed()));
    assert_eq!(runtime.ports[0].run_mode(), RunMode::Killed);
    assert_eq!(transport.box_count(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn run_mode_changes_are_republished() {
    initialize_tracing();
    let runtime = launch_with_ports(Arc::new(LocalTransport::new()), &["grid"], &[]).await;
    assert!(wait_until(WAIT, || runtime.observer.count("EnvironmentLaunched") == 1).await);

    runtime.ports[0].pause();
    assert!(wait_until(WAIT, || runtime.observer.count("EnvironmentRunModeChanged") == 1).await);
    let paused = runtime.observer.events().into_iter().any(|event| {
        matches!(event, RuntimeEvent::EnvironmentRunModeChanged(port, RunMode::Paused) if port.name() == "grid")
    });
    assert!(paused);

    runtime.manager.shut_down().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn subscription_channel_mirrors_observer_stream() {
    initialize_tracing();
    let runtime = launch_runtime(Arc::new(LocalTransport::new()), &[]).await;
    let (_, mut events) = runtime.manager.subscribe();
    assert!(matches!(events.recv().await, Some(RuntimeEvent::MasBorn)));

    runtime.agents.launch_agent("solo", None).await.unwrap();
    let next = tokio::time::timeout(WAIT, events.recv()).await.unwrap();
    assert!(matches!(next, Some(RuntimeEvent::AgentIsLocalAndReady(agent)) if agent.id().as_str() == "solo"));

    runtime.manager.shut_down().await;
}
