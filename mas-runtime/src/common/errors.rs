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

use std::time::Duration;

use thiserror::Error;

use crate::common::AgentId;
use crate::message::MessageBoxId;

/// Errors raised by the transport facade and the messaging service.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// No message box with this id exists in the directory.
    #[error("message box not found: {0}")]
    BoxNotFound(MessageBoxId),

    /// A message box with this id already exists.
    #[error("message box already exists: {0}")]
    BoxExists(MessageBoxId),

    /// The box exists but could not be reached.
    #[error("message box {box_id} unreachable: {reason}")]
    Unreachable {
        /// The box that could not be reached.
        box_id: MessageBoxId,
        /// Transport-specific description.
        reason: String,
    },

    /// A payload could not be serialized or deserialized.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The transport has been shut down.
    #[error("transport closed")]
    Closed,
}

impl From<serde_json::Error> for TransportError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Errors raised by the agent execution core.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// The `on_reset` hook failed; the agent stays terminated.
    #[error("agent {agent} failed to reset")]
    ResetFailed {
        /// The agent being reset.
        agent: AgentId,
        /// What the hook returned.
        #[source]
        source: anyhow::Error,
    },

    /// The agent did not stop within the allotted time.
    #[error("agent {agent} did not terminate within {timeout:?}")]
    TerminationTimeout {
        /// The agent being waited on.
        agent: AgentId,
        /// How long the caller waited.
        timeout: Duration,
    },
}

/// Errors raised by the runtime manager and the remote runtime service.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Runtime construction failed; every subsystem started so far was rolled back.
    #[error("failed to launch runtime: {0}")]
    LaunchFailed(String),

    /// Something other than the runtime manager attempted to publish a runtime event.
    #[error("runtime events can only be published by the runtime manager")]
    ExternalPublish,

    /// A service was started twice.
    #[error("{0} already started")]
    AlreadyStarted(&'static str),

    /// A transport operation failed.
    #[error(transparent)]
    Transport(#[from] TransportError),
}
