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

use serde::{Deserialize, Serialize};

use crate::common::TransportError;
use crate::message::Envelope;
use crate::traits::{ListenerId, MessageListener, Transport};

/// Partition of the message-box namespace.
///
/// Directory queries are always scoped to one type, so looking up every
/// runtime-service box can never match an agent or environment box that
/// happens to share its name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageBoxType {
    /// Box owned by an agent.
    Agent,
    /// Box owned by an environment.
    Environment,
    /// Box owned by a runtime's remote runtime service.
    RuntimeService,
}

impl fmt::Display for MessageBoxType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Agent => "agent",
            Self::Environment => "environment",
            Self::RuntimeService => "runtime-service",
        };
        f.write_str(label)
    }
}

/// Unique identifier of a message box: a name scoped by a [`MessageBoxType`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageBoxId {
    name: String,
    #[serde(rename = "type")]
    box_type: MessageBoxType,
}

impl MessageBoxId {
    /// Creates a box id.
    pub fn new(name: impl Into<String>, box_type: MessageBoxType) -> Self {
        Self {
            name: name.into(),
            box_type,
        }
    }

    /// The box name.
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The namespace this box lives in.
    #[inline]
    #[must_use]
    pub const fn box_type(&self) -> MessageBoxType {
        self.box_type
    }
}

impl fmt::Display for MessageBoxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.box_type)
    }
}

/// A created message box: its id plus the transport it lives on.
///
/// This is the messaging capability handed to agents and services. It is cheap
/// to clone; dropping it does not delete the box (see
/// [`MessagingService::delete_message_box`](crate::message::MessagingService::delete_message_box)).
#[derive(Clone)]
pub struct MessageBox {
    id: MessageBoxId,
    transport: Arc<dyn Transport>,
}

impl fmt::Debug for MessageBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageBox")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

impl MessageBox {
    pub(crate) fn new(id: MessageBoxId, transport: Arc<dyn Transport>) -> Self {
        Self { id, transport }
    }

    /// The id of this box.
    #[inline]
    #[must_use]
    pub const fn id(&self) -> &MessageBoxId {
        &self.id
    }

    /// Serializes `payload` and sends it from this box to `receiver`.
    ///
    /// # Errors
    ///
    /// Fails if the payload cannot be serialized or the transport rejects the send.
    pub async fn send<T: Serialize + ?Sized>(
        &self,
        receiver: &MessageBoxId,
        message_type: &str,
        payload: &T,
    ) -> Result<(), TransportError> {
        let envelope =
            Envelope::with_payload(self.id.clone(), receiver.clone(), message_type, payload)?;
        self.transport.send(envelope).await
    }

    /// Registers a listener for envelopes addressed to this box.
    ///
    /// # Errors
    ///
    /// Fails if the box no longer exists on the transport.
    pub fn add_listener(
        &self,
        listener: Arc<dyn MessageListener>,
    ) -> Result<ListenerId, TransportError> {
        self.transport.add_listener(&self.id, listener)
    }

    /// Unregisters a listener. Returns `false` if it was not registered.
    pub fn remove_listener(&self, listener: ListenerId) -> bool {
        self.transport.remove_listener(&self.id, listener)
    }
}
