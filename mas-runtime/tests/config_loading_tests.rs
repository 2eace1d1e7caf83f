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

use std::fs;
use std::time::Duration;

use mas_runtime::prelude::*;
use tempfile::TempDir;

use crate::setup::*;

mod setup;

// XDG_CONFIG_HOME is process-wide, so every scenario runs inside this one test.
#[test]
fn configuration_is_loaded_from_xdg_config_home() {
    initialize_tracing();

    // No file: defaults.
    let empty = TempDir::new().unwrap();
    std::env::set_var("XDG_CONFIG_HOME", empty.path());
    assert_eq!(MasConfig::load(), MasConfig::default());

    // Partial file: overrides applied, the rest defaulted.
    let custom = TempDir::new().unwrap();
    let config_dir = custom.path().join("mas-runtime");
    fs::create_dir_all(&config_dir).unwrap();
    fs::write(
        config_dir.join("config.toml"),
        r#"
        [timeouts]
        reset_grace_ms = 1500
        agent_shutdown_timeout_ms = 250

        [limits]
        worker_pool_size = 3

        [defaults]
        runtime_service_name = "rt"
        "#,
    )
    .unwrap();
    std::env::set_var("XDG_CONFIG_HOME", custom.path());
    let loaded = MasConfig::load();
    assert_eq!(loaded.reset_grace(), Duration::from_millis(1500));
    assert_eq!(loaded.agent_shutdown_timeout(), Duration::from_millis(250));
    assert_eq!(loaded.worker_pool_size(), 3);
    assert_eq!(loaded.defaults.runtime_service_name, "rt");
    assert_eq!(loaded.dispose_timeout(), Duration::ZERO);

    // Malformed file: defaults.
    fs::write(config_dir.join("config.toml"), "[limits\nworker_pool_size = ").unwrap();
    assert_eq!(MasConfig::load(), MasConfig::default());

    empty.close().unwrap();
    custom.close().unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn runtime_service_box_is_named_from_config() {
    initialize_tracing();
    let mut config = MasConfig::default();
    config.defaults.runtime_service_name = "hub".to_string();
    let messaging = Arc::new(MessagingService::new(Arc::new(LocalTransport::new()), true));

    let first = RemoteRuntimeService::new(Arc::clone(&messaging), &config)
        .await
        .unwrap();
    let second = RemoteRuntimeService::new(messaging, &config).await.unwrap();
    assert_eq!(first.box_id().name(), "hub");
    assert_eq!(second.box_id().name(), "hub1");
}
