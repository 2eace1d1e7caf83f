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

use derive_new::new;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::common::TransportError;
use crate::message::MessageBoxId;

/// Unit of delivery on the transport.
///
/// The payload travels as JSON together with a `message_type` tag so that
/// listeners can claim the envelopes they understand and pass on the rest.
///
/// # Wire Format
///
/// ```json
/// {
///   "sender": { "name": "rt-a", "type": "runtime_service" },
///   "receiver": { "name": "rt-b", "type": "runtime_service" },
///   "message_type": "RemoteRuntimeEvent",
///   "payload": { "NewAgent": "alice" }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, new)]
pub struct Envelope {
    /// Box the envelope was sent from.
    pub sender: MessageBoxId,
    /// Box the envelope is addressed to.
    pub receiver: MessageBoxId,
    /// Type tag of the payload.
    pub message_type: String,
    /// JSON-encoded payload.
    pub payload: serde_json::Value,
}

impl Envelope {
    /// Builds an envelope by serializing `payload`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Serialization`] if the payload cannot be encoded.
    pub fn with_payload<T: Serialize + ?Sized>(
        sender: MessageBoxId,
        receiver: MessageBoxId,
        message_type: &str,
        payload: &T,
    ) -> Result<Self, TransportError> {
        Ok(Self::new(
            sender,
            receiver,
            message_type.to_string(),
            serde_json::to_value(payload)?,
        ))
    }

    /// Returns `true` if the payload carries the given type tag.
    #[inline]
    #[must_use]
    pub fn is(&self, message_type: &str) -> bool {
        self.message_type == message_type
    }

    /// Decodes the payload.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Serialization`] if the payload does not match `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, TransportError> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }
}
