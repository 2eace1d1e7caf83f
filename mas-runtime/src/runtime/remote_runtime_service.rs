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
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

use crate::common::{AgentId, MasConfig, RuntimeError, TransportError};
use crate::message::{Envelope, MessageBox, MessageBoxId, MessageBoxType, MessagingService};
use crate::runtime::RemoteRuntimeEvent;
use crate::traits::{ListenerId, RemoteRuntimeListener};

type Inbound = (MessageBoxId, RemoteRuntimeEvent);

/// An event to send, either to one peer or to all of them.
type Outbound = (Option<MessageBoxId>, RemoteRuntimeEvent);

/// Counters kept by a [`RemoteRuntimeService`].
#[derive(Debug, Default)]
pub struct RemoteRuntimeStats {
    /// Envelopes accepted by a peer's box.
    pub events_sent: AtomicUsize,
    /// Events received from peers and handed to listeners.
    pub events_received: AtomicUsize,
    /// Sends to a peer that failed.
    pub failed_deliveries: AtomicUsize,
}

impl RemoteRuntimeStats {
    /// Get the number of envelopes accepted by peers.
    #[must_use]
    pub fn events_sent(&self) -> usize {
        self.events_sent.load(Ordering::Relaxed)
    }

    /// Get the number of events received from peers.
    #[must_use]
    pub fn events_received(&self) -> usize {
        self.events_received.load(Ordering::Relaxed)
    }

    /// Get the number of failed sends.
    #[must_use]
    pub fn failed_deliveries(&self) -> usize {
        self.failed_deliveries.load(Ordering::Relaxed)
    }
}

struct PendingPipelines {
    outbound: mpsc::UnboundedReceiver<Outbound>,
    inbound: mpsc::UnboundedReceiver<Inbound>,
}

/// Propagates agent lifecycle changes between peer runtimes sharing a transport.
///
/// The service owns one runtime-service message box and two pipelines, each a
/// FIFO queue drained by its own task:
///
/// * **outbound**: the `broadcast_*` methods enqueue an event; the worker sends
///   it to every runtime-service box in the directory except its own.
///   [`introduce_agents_to`](Self::introduce_agents_to) goes through the same
///   queue but addresses a single peer. Each peer is attempted independently
///   and a failed send is only logged and counted.
/// * **inbound**: a transport listener claims envelopes tagged
///   [`RemoteRuntimeEvent::MESSAGE_TYPE`] and enqueues them; the worker hands
///   each event, in arrival order, to every registered [`RemoteRuntimeListener`].
///
/// Events from one runtime therefore reach a peer's listeners in the order they
/// were broadcast. Nothing stronger is guaranteed and nothing is retried.
pub struct RemoteRuntimeService {
    messaging: Arc<MessagingService>,
    box_id: MessageBoxId,
    message_box: Mutex<Option<MessageBox>>,
    transport_listener: Mutex<Option<ListenerId>>,
    listeners: RwLock<Vec<(ListenerId, Arc<dyn RemoteRuntimeListener>)>>,
    next_listener: AtomicUsize,
    outbound_tx: mpsc::UnboundedSender<Outbound>,
    inbound_tx: mpsc::UnboundedSender<Inbound>,
    pending: Mutex<Option<PendingPipelines>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    cancel: CancellationToken,
    stats: RemoteRuntimeStats,
}

impl fmt::Debug for RemoteRuntimeService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteRuntimeService")
            .field("box_id", &self.box_id)
            .field("listener_count", &self.listeners.read().len())
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl RemoteRuntimeService {
    /// Reserves a unique runtime-service box id. Nothing is sent or received until [`start`](Self::start).
    ///
    /// # Errors
    ///
    /// Fails if the transport directory cannot be queried.
    pub async fn new(
        messaging: Arc<MessagingService>,
        config: &MasConfig,
    ) -> Result<Arc<Self>, TransportError> {
        let box_id = messaging
            .get_new_unique_id(&config.defaults.runtime_service_name, MessageBoxType::RuntimeService)
            .await?;
        let (outbound_tx, outbound) = mpsc::unbounded_channel();
        let (inbound_tx, inbound) = mpsc::unbounded_channel();

        Ok(Arc::new(Self {
            messaging,
            box_id,
            message_box: Mutex::new(None),
            transport_listener: Mutex::new(None),
            listeners: RwLock::new(Vec::new()),
            next_listener: AtomicUsize::new(0),
            outbound_tx,
            inbound_tx,
            pending: Mutex::new(Some(PendingPipelines { outbound, inbound })),
            workers: Mutex::new(Vec::new()),
            cancel: CancellationToken::new(),
            stats: RemoteRuntimeStats::default(),
        }))
    }

    /// The id of this runtime's service box.
    #[inline]
    #[must_use]
    pub const fn box_id(&self) -> &MessageBoxId {
        &self.box_id
    }

    /// Delivery counters.
    #[inline]
    #[must_use]
    pub const fn stats(&self) -> &RemoteRuntimeStats {
        &self.stats
    }

    /// Creates the service box, starts listening on it and starts both pipelines.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::AlreadyStarted`] on a second call and a transport
    /// error if the box cannot be created or listened on.
    #[instrument(skip(self), fields(box_id = %self.box_id))]
    pub async fn start(self: &Arc<Self>) -> Result<(), RuntimeError> {
        let Some(pipelines) = self.pending.lock().take() else {
            return Err(RuntimeError::AlreadyStarted("remote runtime service"));
        };

        let message_box = self.messaging.get_new_message_box(&self.box_id).await?;
        let inbound = self.inbound_tx.clone();
        let listener = message_box.add_listener(Arc::new(move |envelope: &Envelope| {
            if !envelope.is(RemoteRuntimeEvent::MESSAGE_TYPE) {
                return false;
            }
            match envelope.decode::<RemoteRuntimeEvent>() {
                Ok(event) => {
                    if inbound.send((envelope.sender.clone(), event)).is_err() {
                        trace!("Inbound pipeline closed, dropping remote runtime event");
                    }
                }
                Err(e) => warn!(sender = %envelope.sender, error = %e, "Undecodable remote runtime event"),
            }
            true
        }));
        let listener = match listener {
            Ok(listener) => listener,
            Err(e) => {
                if let Err(delete_error) = self.messaging.delete_message_box(&self.box_id).await {
                    warn!(error = %delete_error, "Failed to release runtime service box");
                }
                return Err(e.into());
            }
        };

        *self.message_box.lock() = Some(message_box);
        *self.transport_listener.lock() = Some(listener);

        let inbound_worker = tokio::spawn(Arc::clone(self).run_inbound(pipelines.inbound));
        let outbound_worker = tokio::spawn(Arc::clone(self).run_outbound(pipelines.outbound));
        self.workers.lock().extend([inbound_worker, outbound_worker]);

        info!("Remote runtime service started");
        Ok(())
    }

    /// Registers a listener for events received from peers.
    pub fn add_listener(&self, listener: Arc<dyn RemoteRuntimeListener>) -> ListenerId {
        let id = self.next_listener.fetch_add(1, Ordering::Relaxed);
        self.listeners.write().push((id, listener));
        id
    }

    /// Unregisters a listener. Returns `false` if it was not registered.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    /// Announces a new local agent to every peer.
    pub fn broadcast_new_agent(&self, agent: AgentId) {
        self.enqueue(None, RemoteRuntimeEvent::NewAgent(agent));
    }

    /// Announces that a local agent is gone.
    pub fn broadcast_dead_agent(&self, agent: AgentId) {
        self.enqueue(None, RemoteRuntimeEvent::DeadAgent(agent));
    }

    /// Announces that this runtime is up.
    pub fn broadcast_runtime_launched(&self) {
        self.enqueue(None, RemoteRuntimeEvent::RuntimeLaunched(self.box_id.clone()));
    }

    /// Sends one `NewAgent` per agent to `peer` only, typically a runtime that
    /// has just announced itself.
    pub fn introduce_agents_to(
        &self,
        peer: &MessageBoxId,
        agents: impl IntoIterator<Item = AgentId>,
    ) {
        if *peer == self.box_id {
            return;
        }
        for agent in agents {
            self.enqueue(Some(peer.clone()), RemoteRuntimeEvent::NewAgent(agent));
        }
    }

    fn enqueue(&self, target: Option<MessageBoxId>, event: RemoteRuntimeEvent) {
        if self.cancel.is_cancelled() || self.outbound_tx.send((target, event)).is_err() {
            debug!(box_id = %self.box_id, "Remote runtime service stopped, broadcast dropped");
        }
    }

    /// Stops both pipelines, stops listening and releases the service box.
    ///
    /// Events still queued are dropped.
    #[instrument(skip(self), fields(box_id = %self.box_id))]
    pub async fn shut_down(&self) {
        self.cancel.cancel();

        let message_box = self.message_box.lock().take();
        let listener = self.transport_listener.lock().take();
        if let (Some(message_box), Some(listener)) = (message_box, listener) {
            message_box.remove_listener(listener);
        }

        if let Err(e) = self.messaging.delete_message_box(&self.box_id).await {
            warn!(error = %e, "Failed to release runtime service box");
        }
        debug!("Remote runtime service shut down");
    }

    /// Waits for both pipeline workers to exit. A zero timeout waits indefinitely.
    ///
    /// Returns `false` if the timeout elapsed first.
    pub async fn await_termination(&self, timeout: Duration) -> bool {
        let workers: Vec<JoinHandle<()>> = std::mem::take(&mut *self.workers.lock());
        let joined = futures::future::join_all(workers);
        if timeout.is_zero() {
            joined.await;
            true
        } else {
            tokio::time::timeout(timeout, joined).await.is_ok()
        }
    }

    async fn run_inbound(self: Arc<Self>, mut queue: mpsc::UnboundedReceiver<Inbound>) {
        loop {
            let (sender, event) = tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                received = queue.recv() => match received {
                    Some(received) => received,
                    None => break,
                },
            };
            self.stats.events_received.fetch_add(1, Ordering::Relaxed);
            trace!(sender = %sender, event = ?event, "Remote runtime event received");

            let listeners: Vec<Arc<dyn RemoteRuntimeListener>> = self
                .listeners
                .read()
                .iter()
                .map(|(_, listener)| Arc::clone(listener))
                .collect();
            for listener in listeners {
                listener.remote_event_received(&event, &sender);
            }
        }
        trace!(box_id = %self.box_id, "Inbound pipeline stopped");
    }

    async fn run_outbound(self: Arc<Self>, mut queue: mpsc::UnboundedReceiver<Outbound>) {
        loop {
            let (target, event) = tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                event = queue.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };
            self.deliver(target, &event).await;
        }
        trace!(box_id = %self.box_id, "Outbound pipeline stopped");
    }

    async fn deliver(&self, target: Option<MessageBoxId>, event: &RemoteRuntimeEvent) {
        let Some(message_box) = self.message_box.lock().clone() else {
            return;
        };
        let peers = match target {
            Some(peer) => vec![peer],
            None => match self.list_peers(event).await {
                Some(peers) => peers,
                None => return,
            },
        };

        for peer in peers.iter().filter(|peer| **peer != self.box_id) {
            match message_box
                .send(peer, RemoteRuntimeEvent::MESSAGE_TYPE, event)
                .await
            {
                Ok(()) => {
                    self.stats.events_sent.fetch_add(1, Ordering::Relaxed);
                    trace!(peer = %peer, event = ?event, "Remote runtime event sent");
                }
                Err(e) => {
                    self.stats.failed_deliveries.fetch_add(1, Ordering::Relaxed);
                    warn!(peer = %peer, error = %e, event = ?event, "Failed to deliver remote runtime event");
                }
            }
        }
    }

    async fn list_peers(&self, event: &RemoteRuntimeEvent) -> Option<Vec<MessageBoxId>> {
        match self
            .messaging
            .client()
            .boxes(MessageBoxType::RuntimeService, None)
            .await
        {
            Ok(peers) => Some(peers),
            Err(e) => {
                warn!(error = %e, event = ?event, "Could not list peer runtimes, broadcast dropped");
                None
            }
        }
    }
}
