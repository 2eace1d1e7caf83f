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

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, instrument, trace};

use crate::common::TransportError;
use crate::message::{MessageBox, MessageBoxId, MessageBoxType};
use crate::traits::Transport;

/// Facade over the transport that remembers which boxes this process owns.
///
/// Every id minted through [`get_new_unique_id`](Self::get_new_unique_id) is
/// recorded in the locally-managed set. Only ids in that set are ever deleted
/// by this service, so an id that was learned about from elsewhere (for
/// instance a peer's agent) can be passed around freely without the risk of
/// this process releasing a box it does not own.
pub struct MessagingService {
    transport: Arc<dyn Transport>,
    managed: Mutex<HashSet<MessageBoxId>>,
    owns_server: bool,
}

impl fmt::Debug for MessagingService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessagingService")
            .field("managed_count", &self.managed.lock().len())
            .field("owns_server", &self.owns_server)
            .finish_non_exhaustive()
    }
}

impl MessagingService {
    /// Wraps a transport.
    ///
    /// `owns_server` must be `true` only in the process that launched the
    /// transport server; that process alone tears it down on
    /// [`shut_down`](Self::shut_down).
    pub fn new(transport: Arc<dyn Transport>, owns_server: bool) -> Self {
        Self {
            transport,
            managed: Mutex::new(HashSet::new()),
            owns_server,
        }
    }

    /// Mints an id that is not yet used on the transport nor reserved locally.
    ///
    /// The plain `name` is preferred; on collision a numeric suffix is appended
    /// (`name1`, `name2`, ...). The returned id is added to the locally-managed set.
    ///
    /// # Errors
    ///
    /// Fails if the transport directory cannot be queried.
    pub async fn get_new_unique_id(
        &self,
        name: &str,
        box_type: MessageBoxType,
    ) -> Result<MessageBoxId, TransportError> {
        let mut suffix = 0_usize;
        loop {
            let candidate_name = if suffix == 0 {
                name.to_string()
            } else {
                format!("{name}{suffix}")
            };
            suffix += 1;

            let taken = !self
                .transport
                .boxes(box_type, Some(&candidate_name))
                .await?
                .is_empty();
            if taken {
                continue;
            }

            let candidate = MessageBoxId::new(candidate_name, box_type);
            if self.managed.lock().insert(candidate.clone()) {
                trace!(box_id = %candidate, "Minted message box id");
                return Ok(candidate);
            }
        }
    }

    /// Creates the box for an id on the transport.
    ///
    /// # Errors
    ///
    /// Fails if the transport rejects the creation (for instance because the box exists).
    pub async fn get_new_message_box(&self, id: &MessageBoxId) -> Result<MessageBox, TransportError> {
        self.transport.create(id).await?;
        Ok(MessageBox::new(id.clone(), Arc::clone(&self.transport)))
    }

    /// Releases a box, but only if this service minted its id.
    ///
    /// Unknown ids are ignored without touching the transport.
    ///
    /// # Errors
    ///
    /// Fails if the transport rejects the deletion of an owned box.
    pub async fn delete_message_box(&self, id: &MessageBoxId) -> Result<(), TransportError> {
        if !self.managed.lock().remove(id) {
            trace!(box_id = %id, "Ignoring delete of a box not managed locally");
            return Ok(());
        }
        self.transport.delete(id).await
    }

    /// Drops a reserved id without touching the transport.
    ///
    /// Returns `false` if the id was not managed by this service.
    pub fn forget_id(&self, id: &MessageBoxId) -> bool {
        let forgotten = self.managed.lock().remove(id);
        if forgotten {
            trace!(box_id = %id, "Forgot message box id");
        }
        forgotten
    }

    /// Returns `true` if this service minted `id` and has not released it yet.
    #[must_use]
    pub fn is_managed(&self, id: &MessageBoxId) -> bool {
        self.managed.lock().contains(id)
    }

    /// Number of ids currently owned by this service.
    #[must_use]
    pub fn managed_count(&self) -> usize {
        self.managed.lock().len()
    }

    /// The underlying transport, for directory lookups.
    #[inline]
    #[must_use]
    pub fn client(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Forgets every owned id and, if this process launched it, tears the transport down.
    ///
    /// Owned boxes still present on the transport are deleted first; failures are
    /// logged and do not stop the shutdown.
    #[instrument(skip(self))]
    pub async fn shut_down(&self) {
        let owned: Vec<MessageBoxId> = self.managed.lock().drain().collect();
        for id in owned {
            if let Err(e) = self.transport.delete(&id).await {
                trace!(box_id = %id, error = %e, "Owned box already gone during shutdown");
            }
        }
        if self.owns_server {
            debug!("Tearing down transport server launched by this process");
            self.transport.shut_down().await;
        } else {
            debug!("Transport server owned elsewhere, leaving it running");
        }
    }
}
