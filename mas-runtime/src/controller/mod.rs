//! Agent execution core.
//!
//! An [`Agent`] couples its capabilities with a [`Controller`], which drives the
//! agent's [`AgentProgram`] as a chain of [`Step`]s on a shared [`WorkerPool`].

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

pub use agent::Agent;
pub use controller::{Controller, ControllerState};
pub use step::{AgentProgram, Step, StepResult};
pub use worker_pool::WorkerPool;

/// Defines the [`Agent`] aggregate.
mod agent;
/// Defines the [`Controller`] state machine.
mod controller;
mod step;
/// Defines the shared [`WorkerPool`].
mod worker_pool;
