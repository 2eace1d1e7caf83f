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

//! In-process implementation of the transport facade.
//!
//! Several runtimes can share one [`LocalTransport`] through an `Arc`, which is
//! how a multi-runtime system is run inside a single process.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{debug, trace};

use crate::common::TransportError;
use crate::message::{Envelope, MessageBoxId, MessageBoxType};
use crate::traits::{ListenerId, MessageListener, Transport};

/// Directory entry for one box.
#[derive(Default)]
struct BoxEntry {
    listeners: Vec<(ListenerId, Arc<dyn MessageListener>)>,
}

impl fmt::Debug for BoxEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoxEntry")
            .field("listener_count", &self.listeners.len())
            .finish()
    }
}

/// Shared in-memory message-box directory with synchronous delivery.
///
/// `send` runs the receiver's listener chain on the caller's task, so
/// envelopes from one sender are observed in the order they were sent.
#[derive(Debug, Default)]
pub struct LocalTransport {
    boxes: DashMap<MessageBoxId, BoxEntry>,
    next_listener: AtomicUsize,
    closed: AtomicBool,
}

impl LocalTransport {
    /// Creates an empty transport.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of boxes currently in the directory.
    #[must_use]
    pub fn box_count(&self) -> usize {
        self.boxes.len()
    }

    /// Returns `true` if the box exists.
    #[must_use]
    pub fn contains(&self, id: &MessageBoxId) -> bool {
        self.boxes.contains_key(id)
    }

    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            Err(TransportError::Closed)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Transport for LocalTransport {
    async fn create(&self, id: &MessageBoxId) -> Result<(), TransportError> {
        self.ensure_open()?;
        match self.boxes.entry(id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(TransportError::BoxExists(id.clone())),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(BoxEntry::default());
                debug!(box_id = %id, "Message box created");
                Ok(())
            }
        }
    }

    async fn send(&self, envelope: Envelope) -> Result<(), TransportError> {
        self.ensure_open()?;
        // Clone the chain out so listeners may call back into the transport.
        let listeners: Vec<Arc<dyn MessageListener>> = match self.boxes.get(&envelope.receiver) {
            Some(entry) => entry.listeners.iter().map(|(_, l)| Arc::clone(l)).collect(),
            None => return Err(TransportError::BoxNotFound(envelope.receiver.clone())),
        };

        if listeners.iter().any(|listener| listener.on_message(&envelope)) {
            trace!(receiver = %envelope.receiver, message_type = %envelope.message_type, "Envelope delivered");
        } else {
            trace!(receiver = %envelope.receiver, message_type = %envelope.message_type, "Envelope not claimed by any listener");
        }
        Ok(())
    }

    fn add_listener(
        &self,
        id: &MessageBoxId,
        listener: Arc<dyn MessageListener>,
    ) -> Result<ListenerId, TransportError> {
        let mut entry = self
            .boxes
            .get_mut(id)
            .ok_or_else(|| TransportError::BoxNotFound(id.clone()))?;
        let listener_id = self.next_listener.fetch_add(1, Ordering::Relaxed);
        entry.listeners.push((listener_id, listener));
        Ok(listener_id)
    }

    fn remove_listener(&self, id: &MessageBoxId, listener: ListenerId) -> bool {
        self.boxes.get_mut(id).is_some_and(|mut entry| {
            let before = entry.listeners.len();
            entry.listeners.retain(|(existing, _)| *existing != listener);
            entry.listeners.len() != before
        })
    }

    async fn boxes(
        &self,
        box_type: MessageBoxType,
        name: Option<&str>,
    ) -> Result<Vec<MessageBoxId>, TransportError> {
        self.ensure_open()?;
        let mut ids: Vec<MessageBoxId> = self
            .boxes
            .iter()
            .map(|entry| entry.key().clone())
            .filter(|id| id.box_type() == box_type && name.map_or(true, |n| id.name() == n))
            .collect();
        ids.sort();
        Ok(ids)
    }

    async fn delete(&self, id: &MessageBoxId) -> Result<(), TransportError> {
        if self.boxes.remove(id).is_none() {
            return Err(TransportError::BoxNotFound(id.clone()));
        }
        debug!(box_id = %id, "Message box deleted");
        Ok(())
    }

    async fn shut_down(&self) {
        self.closed.store(true, Ordering::Release);
        self.boxes.clear();
        debug!("Local transport shut down");
    }
}
