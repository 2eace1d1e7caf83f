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

#![forbid(unsafe_code)]
#![forbid(missing_docs)]

//! # MAS Runtime
//!
//! Execution and lifecycle orchestration for multi-agent systems, built on Tokio.
//!
//! ## Key Concepts
//!
//! - **Agents (`Agent`)**: an id plus the environment, messaging and logging
//!   capabilities its program runs with.
//! - **Controllers (`Controller`)**: drive an agent's program as a chain of
//!   `Step`s on a shared, fixed-size `WorkerPool`; stopping is cooperative.
//! - **Runtime (`RuntimeManager`)**: launches the agent, environment, messaging
//!   and remote services as a unit and publishes their activity as one stream of
//!   `RuntimeEvent`s.
//! - **Peers (`RemoteRuntimeService`)**: runtimes sharing a transport announce
//!   agent births and deaths to each other, best effort.
//! - **Messaging (`MessagingService`, `Transport`)**: typed message boxes on a
//!   pluggable transport; `LocalTransport` runs several runtimes in one process.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use mas_runtime::prelude::*;
//!
//! let transport = Arc::new(LocalTransport::new());
//! let messaging = Arc::new(MessagingService::new(transport, true));
//! let pool = WorkerPool::from_config(&CONFIG)?;
//! let agents = Arc::new(LocalAgentService::new(messaging.clone(), factory, pool, CONFIG.clone()));
//! let environment = Arc::new(LocalEnvironmentService::without_environment());
//! let runtime = RuntimeManager::launch(messaging, agents, environment, CONFIG.clone()).await?;
//! ```

/// Configuration, identifiers and error types.
pub mod common;

/// The agent execution core.
pub mod controller;

/// Message boxes, envelopes and the messaging service.
pub mod message;

/// Runtime orchestration and peer propagation.
pub mod runtime;

/// Default agent and environment service implementations.
pub mod services;

/// Contracts between the runtime and its subsystems.
pub mod traits;

/// A prelude module for conveniently importing the most commonly used items.
pub mod prelude {
    pub use std::sync::Arc;

    pub use async_trait::async_trait;

    pub use crate::common::config::CONFIG;
    pub use crate::common::{AgentId, AgentRef, ControllerError, MasConfig, RuntimeError, TransportError};
    pub use crate::controller::{Agent, AgentProgram, Controller, ControllerState, Step, StepResult, WorkerPool};
    pub use crate::message::{Envelope, LocalTransport, MessageBox, MessageBoxId, MessageBoxType, MessagingService};
    pub use crate::runtime::{RemoteRuntimeEvent, RemoteRuntimeService, RuntimeEvent, RuntimeManager};
    pub use crate::services::{
        AgentFactory, Environment, LocalAgentService, LocalEnvironmentService, QueuedEnvironmentPort,
    };
    pub use crate::traits::{
        AgentService, EnvironmentPort, EnvironmentService, RemoteRuntimeListener, RunMode, RuntimeObserver,
        Transport,
    };
}
