//! The seams of the runtime: the transport facade, the agent and environment
//! services the runtime manager composes, and the observer interfaces it exposes.
//!
//! *   [`Transport`]: message-box directory and delivery.
//! *   [`AgentService`]: local agent population plus the view of remote agents.
//! *   [`EnvironmentService`] / [`EnvironmentPort`]: connected environments.
//! *   [`RuntimeObserver`]: consumer of the unified runtime event stream.
//! *   [`RemoteRuntimeListener`]: consumer of peer lifecycle events.

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

pub use agent_service::{AgentService, AgentServiceEvent, AgentServiceRef};
pub use environment_service::{
    EnvironmentPort, EnvironmentPortRef, EnvironmentService, EnvironmentServiceEvent,
    EnvironmentServiceRef, RunMode,
};
pub use runtime_observer::{ObserverId, RemoteRuntimeListener, RuntimeObserver};
pub use transport::{ListenerId, MessageListener, Transport};

/// Defines the [`AgentService`] contract.
mod agent_service;
/// Defines the [`EnvironmentService`] and [`EnvironmentPort`] contracts.
mod environment_service;
mod runtime_observer;
/// Defines the [`Transport`] facade.
mod transport;
