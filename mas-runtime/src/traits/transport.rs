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

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;

use crate::common::TransportError;
use crate::message::{Envelope, MessageBoxId, MessageBoxType};

/// Handle returned when a listener is registered, used to remove it again.
pub type ListenerId = usize;

/// Receives envelopes addressed to a message box.
///
/// Listeners on one box are consulted in registration order until one of them
/// claims the envelope by returning `true`. Returning `false` lets the next
/// listener look at it. Listeners are invoked on the sender's task and must
/// not block.
pub trait MessageListener: Send + Sync {
    /// Inspects an envelope, returning `true` if it was consumed.
    fn on_message(&self, envelope: &Envelope) -> bool;
}

impl<F> MessageListener for F
where
    F: Fn(&Envelope) -> bool + Send + Sync,
{
    fn on_message(&self, envelope: &Envelope) -> bool {
        self(envelope)
    }
}

/// The messaging substrate shared by agents, environments and runtimes.
///
/// Implementations provide FIFO delivery per sender and nothing stronger.
/// A box that is gone or unreachable surfaces as an error on `send`.
#[async_trait]
pub trait Transport: Debug + Send + Sync {
    /// Creates a message box in the directory.
    async fn create(&self, id: &MessageBoxId) -> Result<(), TransportError>;

    /// Delivers an envelope to `envelope.receiver`.
    async fn send(&self, envelope: Envelope) -> Result<(), TransportError>;

    /// Registers a listener on a box.
    fn add_listener(
        &self,
        id: &MessageBoxId,
        listener: Arc<dyn MessageListener>,
    ) -> Result<ListenerId, TransportError>;

    /// Removes a listener from a box. Returns `false` if it was not registered.
    fn remove_listener(&self, id: &MessageBoxId, listener: ListenerId) -> bool;

    /// Lists boxes of one type, optionally restricted to an exact name.
    async fn boxes(
        &self,
        box_type: MessageBoxType,
        name: Option<&str>,
    ) -> Result<Vec<MessageBoxId>, TransportError>;

    /// Removes a box from the directory.
    async fn delete(&self, id: &MessageBoxId) -> Result<(), TransportError>;

    /// Tears the transport server down. Only called by the process that launched it.
    async fn shut_down(&self);
}
