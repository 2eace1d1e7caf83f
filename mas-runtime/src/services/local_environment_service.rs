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

use anyhow::Context;
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use crate::traits::{EnvironmentPortRef, EnvironmentService, EnvironmentServiceEvent};

/// [`EnvironmentService`] over a fixed list of in-process ports.
///
/// With an empty list the runtime runs without an environment.
pub struct LocalEnvironmentService {
    configured: Vec<EnvironmentPortRef>,
    live: Mutex<Vec<EnvironmentPortRef>>,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<EnvironmentServiceEvent>>>,
}

impl fmt::Debug for LocalEnvironmentService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalEnvironmentService")
            .field("configured", &self.configured)
            .field("live_count", &self.live.lock().len())
            .finish_non_exhaustive()
    }
}

impl LocalEnvironmentService {
    /// Creates a service that starts `ports` in order.
    pub fn new(ports: Vec<EnvironmentPortRef>) -> Self {
        Self {
            configured: ports,
            live: Mutex::new(Vec::new()),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Creates a service for a system without an environment.
    pub fn without_environment() -> Self {
        Self::new(Vec::new())
    }

    /// Starts an additional port and announces it.
    ///
    /// # Errors
    ///
    /// Fails if the port does not start.
    pub async fn add_port(&self, port: EnvironmentPortRef) -> anyhow::Result<()> {
        port.start()
            .await
            .with_context(|| format!("starting environment {}", port.name()))?;
        self.live.lock().push(Arc::clone(&port));
        info!(environment = port.name(), "Environment started");
        self.emit(EnvironmentServiceEvent::EnvironmentPortAdded(port));
        Ok(())
    }

    /// Kills a live port by name and announces its removal.
    ///
    /// Returns `false` if no live port has this name.
    pub async fn remove_port(&self, name: &str) -> bool {
        let port = {
            let mut live = self.live.lock();
            let Some(index) = live.iter().position(|port| port.name() == name) else {
                return false;
            };
            live.remove(index)
        };
        self.retire(port).await;
        true
    }

    async fn retire(&self, port: EnvironmentPortRef) {
        if let Err(e) = port.kill().await {
            warn!(environment = port.name(), error = ?e, "Failed to kill environment");
        }
        debug!(environment = port.name(), "Environment removed");
        self.emit(EnvironmentServiceEvent::EnvironmentPortRemoved(port));
    }

    fn emit(&self, event: EnvironmentServiceEvent) {
        self.subscribers
            .lock()
            .retain(|subscriber| subscriber.send(event.clone()).is_ok());
    }
}

#[async_trait]
impl EnvironmentService for LocalEnvironmentService {
    fn has_environment(&self) -> bool {
        !self.configured.is_empty()
    }

    #[instrument(skip(self))]
    async fn start(&self) -> anyhow::Result<()> {
        for port in &self.configured {
            self.add_port(Arc::clone(port)).await?;
        }
        Ok(())
    }

    fn ports(&self) -> Vec<EnvironmentPortRef> {
        self.live.lock().clone()
    }

    #[instrument(skip(self))]
    async fn shut_down(&self) -> anyhow::Result<()> {
        let ports: Vec<EnvironmentPortRef> = std::mem::take(&mut *self.live.lock());
        for port in ports {
            self.retire(port).await;
        }
        Ok(())
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<EnvironmentServiceEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().push(tx);
        rx
    }
}
