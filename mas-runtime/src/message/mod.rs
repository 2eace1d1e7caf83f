//! Message boxes, envelopes and the messaging service built on the transport facade.
//!
//! *   [`MessageBoxId`]: a name scoped by a [`MessageBoxType`]; the unit of addressing.
//! *   [`MessageBox`]: a created box, handed to agents and services as their messaging capability.
//! *   [`Envelope`]: what travels between boxes, a type tag plus a JSON payload.
//! *   [`MessagingService`]: mints ids and releases only the boxes this process owns.
//! *   [`LocalTransport`]: in-process transport shared by runtimes running in one process.

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

pub use envelope::Envelope;
pub use local_transport::LocalTransport;
pub use message_box::{MessageBox, MessageBoxId, MessageBoxType};
pub use messaging_service::MessagingService;

/// Defines the [`Envelope`] wire unit.
mod envelope;
mod local_transport;
/// Defines box identifiers and the [`MessageBox`] capability.
mod message_box;
/// Defines the [`MessagingService`].
mod messaging_service;
