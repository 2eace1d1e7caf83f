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

use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, error, info, trace, warn, Instrument, Span};

use crate::common::{AgentId, BoxFuture, ControllerError, MasConfig};
use crate::controller::{AgentProgram, Step, WorkerPool};

/// Externally visible lifecycle state of a [`Controller`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControllerState {
    /// Constructed, never run.
    NotStarted,
    /// A unit of work is queued or executing and will keep resubmitting.
    Running,
    /// A stop was requested; the in-flight unit has not observed it yet.
    Stopping,
    /// No unit of work is queued or executing.
    Stopped,
}

#[derive(Debug)]
struct Lifecycle {
    state: ControllerState,
    // The in-flight unit has committed to the shutdown sequence.
    finishing: bool,
    // `run()` arrived while finishing; start again once stopped.
    rerun: bool,
}

/// Drives one agent's reasoning cycle on the shared worker pool.
///
/// A run is a chain of [`Step`]s. Each unit of work executes one step and, if
/// the step yields a successor and the controller is still running, submits a
/// new unit wrapping it. At most one unit per controller is ever queued or
/// executing. Stopping is cooperative: [`terminate`](Self::terminate) only
/// flips the state, and the in-flight unit notices it once its step returns.
///
/// Failures inside a step (errors and panics alike) end the run. They are
/// recorded in [`last_error`](Self::last_error) and logged, never propagated.
pub struct Controller {
    agent_id: AgentId,
    program: Arc<dyn AgentProgram>,
    pool: WorkerPool,
    span: Span,
    lifecycle: Mutex<Lifecycle>,
    terminated: watch::Sender<bool>,
    last_error: Mutex<Option<Arc<anyhow::Error>>>,
    dispose_on_termination: AtomicBool,
    disposed: AtomicBool,
    reset_grace: Duration,
    dispose_timeout: Duration,
}

impl fmt::Debug for Controller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Controller")
            .field("agent_id", &self.agent_id)
            .field("state", &self.state())
            .field("terminated", &self.terminated())
            .finish_non_exhaustive()
    }
}

impl Controller {
    /// Creates a controller in the [`NotStarted`](ControllerState::NotStarted) state.
    ///
    /// Every unit of work runs inside `span`.
    pub fn new(
        agent_id: AgentId,
        program: Arc<dyn AgentProgram>,
        pool: WorkerPool,
        span: Span,
        config: &MasConfig,
    ) -> Arc<Self> {
        let (terminated, _) = watch::channel(true);
        Arc::new(Self {
            agent_id,
            program,
            pool,
            span,
            lifecycle: Mutex::new(Lifecycle {
                state: ControllerState::NotStarted,
                finishing: false,
                rerun: false,
            }),
            terminated,
            last_error: Mutex::new(None),
            dispose_on_termination: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
            reset_grace: config.reset_grace(),
            dispose_timeout: config.dispose_timeout(),
        })
    }

    /// The id of the agent this controller drives.
    #[inline]
    #[must_use]
    pub const fn agent_id(&self) -> &AgentId {
        &self.agent_id
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ControllerState {
        let lifecycle = self.lifecycle.lock();
        if lifecycle.rerun {
            ControllerState::Running
        } else {
            lifecycle.state
        }
    }

    /// Returns `true` while the cycle is meant to keep going.
    #[must_use]
    pub fn running(&self) -> bool {
        self.state() == ControllerState::Running
    }

    /// Returns `true` when no unit of work is queued or executing.
    ///
    /// A controller that was never started counts as terminated.
    #[must_use]
    pub fn terminated(&self) -> bool {
        *self.terminated.borrow()
    }

    /// The failure that ended the most recent run, if any.
    #[must_use]
    pub fn last_error(&self) -> Option<Arc<anyhow::Error>> {
        self.last_error.lock().clone()
    }

    /// When set, the controller disposes of the program as soon as the run ends.
    pub fn set_dispose_on_termination(&self, dispose: bool) {
        self.dispose_on_termination.store(dispose, Ordering::Release);
    }

    /// Returns `true` once the program has been released.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Starts the reasoning cycle.
    ///
    /// Does nothing if the cycle is already running. Called while a stop is
    /// pending, it withdraws the stop request instead of starting a second chain.
    pub fn run(self: &Arc<Self>) {
        let mut lifecycle = self.lifecycle.lock();
        match lifecycle.state {
            ControllerState::Running => {
                trace!(agent = %self.agent_id, "Already running");
            }
            ControllerState::Stopping if lifecycle.finishing => {
                lifecycle.rerun = true;
                debug!(agent = %self.agent_id, "Run requested while stopping, restarting once stopped");
            }
            ControllerState::Stopping => {
                lifecycle.state = ControllerState::Running;
                debug!(agent = %self.agent_id, "Stop request withdrawn");
            }
            ControllerState::NotStarted | ControllerState::Stopped => {
                if self.is_disposed() {
                    warn!(agent = %self.agent_id, "Ignoring run request for a disposed agent");
                    return;
                }
                lifecycle.state = ControllerState::Running;
                *self.last_error.lock() = None;
                // Flag and state change together, under the lifecycle lock.
                self.terminated.send_replace(false);
                drop(lifecycle);
                info!(agent = %self.agent_id, "Agent started");
                self.submit(None);
            }
        }
    }

    /// Requests a cooperative stop.
    ///
    /// Does nothing unless the cycle is running. The program's `on_terminate`
    /// hook is invoked right away even though the in-flight step is not
    /// interrupted.
    pub fn terminate(&self) {
        {
            let mut lifecycle = self.lifecycle.lock();
            match lifecycle.state {
                ControllerState::Running => lifecycle.state = ControllerState::Stopping,
                ControllerState::Stopping if lifecycle.rerun => lifecycle.rerun = false,
                _ => return,
            }
        }
        debug!(agent = %self.agent_id, "Termination requested");
        self.program.on_terminate();
    }

    /// Waits until the controller is terminated.
    ///
    /// A zero `timeout` waits indefinitely. Returns `false` if the timeout
    /// elapsed first.
    pub async fn await_termination(&self, timeout: Duration) -> bool {
        let mut terminated = self.terminated.subscribe();
        let wait = terminated.wait_for(|done| *done);
        if timeout.is_zero() {
            wait.await.is_ok()
        } else {
            matches!(tokio::time::timeout(timeout, wait).await, Ok(Ok(_)))
        }
    }

    /// Stops the cycle, re-initializes the program and starts it again.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::TerminationTimeout`] if the cycle does not stop
    /// within the reset grace period, and [`ControllerError::ResetFailed`] if the
    /// program's `on_reset` hook fails. In both cases the agent is not restarted.
    pub async fn reset(self: &Arc<Self>) -> Result<(), ControllerError> {
        self.terminate();
        if !self.await_termination(self.reset_grace).await {
            warn!(agent = %self.agent_id, grace = ?self.reset_grace, "Agent did not stop for reset");
            return Err(ControllerError::TerminationTimeout {
                agent: self.agent_id.clone(),
                timeout: self.reset_grace,
            });
        }

        if let Err(e) = self.program.on_reset().await {
            error!(agent = %self.agent_id, error = %e, "Agent reset failed");
            return Err(ControllerError::ResetFailed {
                agent: self.agent_id.clone(),
                source: e,
            });
        }

        debug!(agent = %self.agent_id, "Agent reset");
        self.run();
        Ok(())
    }

    /// Stops the cycle and releases the program. Safe to call repeatedly.
    pub async fn dispose(&self) {
        self.terminate();
        if !self.await_termination(self.dispose_timeout).await {
            warn!(agent = %self.agent_id, timeout = ?self.dispose_timeout, "Agent still running, releasing anyway");
        }
        self.release().await;
    }

    async fn release(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.dispose_program().await;
    }

    async fn dispose_program(&self) {
        self.program.dispose().await;
        debug!(agent = %self.agent_id, "Agent disposed");
    }

    fn submit(self: &Arc<Self>, step: Option<Step>) {
        let unit = Arc::clone(self).execute(step).instrument(self.span.clone());
        self.pool.submit(unit);
    }

    // Boxed so the unit's type does not depend on itself through `submit`.
    fn execute(self: Arc<Self>, step: Option<Step>) -> BoxFuture<()> {
        Box::pin(async move {
            let program = Arc::clone(&self.program);
            let agent_id = self.agent_id.clone();
            let work = async move {
                let step = match step {
                    Some(step) => step,
                    None => program.first_step(&agent_id),
                };
                step.invoke().await
            };

            let next = match AssertUnwindSafe(work).catch_unwind().await {
                Ok(Ok(next)) => next,
                Ok(Err(e)) => {
                    self.record_failure(e);
                    None
                }
                Err(panic) => {
                    self.record_failure(anyhow::anyhow!(
                        "step panicked: {}",
                        panic_message(&*panic)
                    ));
                    None
                }
            };

            {
                let mut lifecycle = self.lifecycle.lock();
                if let Some(next) = next {
                    if lifecycle.state == ControllerState::Running {
                        drop(lifecycle);
                        self.submit(Some(next));
                        return;
                    }
                }
                lifecycle.state = ControllerState::Stopping;
                lifecycle.finishing = true;
            }

            self.finish().await;
        })
    }

    async fn finish(self: &Arc<Self>) {
        let last_error = self.last_error();
        let notified = std::panic::catch_unwind(AssertUnwindSafe(|| {
            self.program.on_stopped(last_error.as_deref());
        }));
        if notified.is_err() {
            error!(agent = %self.agent_id, "Termination hook panicked");
        }

        let (rerun, dispose) = {
            let mut lifecycle = self.lifecycle.lock();
            lifecycle.state = ControllerState::Stopped;
            lifecycle.finishing = false;
            self.terminated.send_replace(true);
            let rerun = std::mem::take(&mut lifecycle.rerun);
            // Claimed under the lock so a concurrent `run()` sees the agent as disposed.
            let dispose = !rerun
                && self.dispose_on_termination.load(Ordering::Acquire)
                && !self.disposed.swap(true, Ordering::AcqRel);
            (rerun, dispose)
        };
        info!(agent = %self.agent_id, failed = last_error.is_some(), "Agent terminated");

        if rerun {
            self.run();
        } else if dispose {
            self.dispose_program().await;
        }
    }

    fn record_failure(&self, failure: anyhow::Error) {
        error!(agent = %self.agent_id, error = %failure, "Agent step failed");
        *self.last_error.lock() = Some(Arc::new(failure));
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
