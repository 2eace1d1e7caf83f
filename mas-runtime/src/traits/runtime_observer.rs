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

use crate::message::MessageBoxId;
use crate::runtime::{RemoteRuntimeEvent, RuntimeEvent};

/// Handle returned by [`RuntimeManager::add_observer`](crate::runtime::RuntimeManager::add_observer).
pub type ObserverId = usize;

/// Receives the unified local event stream of a runtime.
///
/// Callbacks arrive on the runtime manager's dispatch task, one at a time and in
/// publication order. They must not block.
pub trait RuntimeObserver: Send + Sync {
    /// Called once per published event.
    fn event_received(&self, event: &RuntimeEvent);
}

impl<F> RuntimeObserver for F
where
    F: Fn(&RuntimeEvent) + Send + Sync,
{
    fn event_received(&self, event: &RuntimeEvent) {
        self(event);
    }
}

/// Receives lifecycle events sent by peer runtimes.
pub trait RemoteRuntimeListener: Send + Sync {
    /// Called in arrival order for every inbound event.
    fn remote_event_received(&self, event: &RemoteRuntimeEvent, sender: &MessageBoxId);
}

impl<F> RemoteRuntimeListener for F
where
    F: Fn(&RemoteRuntimeEvent, &MessageBoxId) + Send + Sync,
{
    fn remote_event_received(&self, event: &RemoteRuntimeEvent, sender: &MessageBoxId) {
        self(event, sender);
    }
}
