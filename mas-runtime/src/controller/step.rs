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
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::common::{AgentId, BoxFuture};

/// Outcome of one reasoning step: the next step, or `None` when the program is done.
pub type StepResult = anyhow::Result<Option<Step>>;

/// One continuation of an agent's reasoning cycle.
///
/// A step is consumed when it runs and yields the step that follows it. The
/// controller resubmits that next step to the worker pool as a fresh unit of
/// work, so a long-lived agent never grows a stack and yields its worker
/// between steps.
pub struct Step(Box<dyn FnOnce() -> BoxFuture<StepResult> + Send>);

impl Step {
    /// Wraps an async closure as a step.
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = StepResult> + Send + 'static,
    {
        Self(Box::new(move || Box::pin(f())))
    }

    /// Convenience for a step that continues with `next`.
    #[inline]
    pub fn then(next: Step) -> StepResult {
        Ok(Some(next))
    }

    /// Convenience for a step that ends the cycle.
    #[inline]
    pub fn done() -> StepResult {
        Ok(None)
    }

    pub(crate) fn invoke(self) -> BoxFuture<StepResult> {
        (self.0)()
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Step")
    }
}

/// The executable side of an agent, driven by its [`Controller`](crate::controller::Controller).
///
/// Only [`first_step`](Self::first_step) is required. The hooks default to
/// doing nothing.
#[async_trait]
pub trait AgentProgram: Send + Sync + 'static {
    /// Builds the continuation a fresh run starts from.
    fn first_step(self: Arc<Self>, agent: &AgentId) -> Step;

    /// Called synchronously when a stop is requested, before the cycle has stopped.
    fn on_terminate(&self) {}

    /// Called while the agent is terminated during a reset.
    ///
    /// # Errors
    ///
    /// A failure aborts the reset and leaves the agent terminated.
    async fn on_reset(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Called once the cycle has stopped, before the agent is marked terminated.
    ///
    /// `last_error` carries the failure that ended the cycle, if any.
    fn on_stopped(&self, _last_error: Option<&anyhow::Error>) {}

    /// Releases program resources. Called at most once.
    async fn dispose(&self) {}
}
