//! Runtime orchestration: the unified event stream and peer propagation.
//!
//! *   [`RuntimeManager`]: launches and shuts down a runtime and publishes [`RuntimeEvent`]s.
//! *   [`RemoteRuntimeService`]: exchanges [`RemoteRuntimeEvent`]s with peer runtimes.

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

pub use remote_runtime_event::RemoteRuntimeEvent;
pub use remote_runtime_service::{RemoteRuntimeService, RemoteRuntimeStats};
pub use runtime_event::RuntimeEvent;
pub use runtime_manager::RuntimeManager;

/// Defines the peer wire event.
mod remote_runtime_event;
/// Defines the [`RemoteRuntimeService`].
mod remote_runtime_service;
mod runtime_event;
/// Defines the [`RuntimeManager`].
mod runtime_manager;
