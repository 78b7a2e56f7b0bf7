// Copyright 2025 The Drasi Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::env;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use devhub_command_mqtt::CommandPublisher;
use devhub_source_mqtt::{BroadcastSink, DeviceService, MqttSource, MqttSourceConfig};
use devhub_store::SledStore;
use log::{info, warn};
use tokio::sync::broadcast::error::RecvError;

mod console;

use console::Console;

#[derive(Debug, Clone)]
struct GatewayConfig {
    broker_host: String,
    port: u16,
    client_id: Option<String>,
    username: Option<String>,
    password: Option<String>,
    use_tls: bool,
    db_path: String,
    reconnect_secs: u64,
}

impl GatewayConfig {
    fn from_env() -> Result<Self> {
        let broker_host = env::var("DEVHUB_MQTT_HOST").context("DEVHUB_MQTT_HOST not set")?;
        let port = env::var("DEVHUB_MQTT_PORT")
            .unwrap_or_else(|_| "1883".to_string())
            .parse::<u16>()
            .context("Invalid DEVHUB_MQTT_PORT")?;
        let use_tls = env::var("DEVHUB_MQTT_TLS")
            .map(|v| matches!(v.as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);
        let reconnect_secs = env::var("DEVHUB_RECONNECT_SECS")
            .unwrap_or_else(|_| "5".to_string())
            .parse::<u64>()
            .context("Invalid DEVHUB_RECONNECT_SECS")?;

        Ok(GatewayConfig {
            broker_host,
            port,
            client_id: env::var("DEVHUB_MQTT_CLIENT_ID").ok(),
            username: env::var("DEVHUB_MQTT_USERNAME").ok(),
            password: env::var("DEVHUB_MQTT_PASSWORD").ok(),
            use_tls,
            db_path: env::var("DEVHUB_DB_PATH").unwrap_or_else(|_| "devhub_db".to_string()),
            reconnect_secs,
        })
    }

    fn source_config(&self) -> MqttSourceConfig {
        let mut builder = MqttSourceConfig::builder("devhub-ingest", &self.broker_host)
            .port(self.port)
            .use_tls(self.use_tls)
            .reconnect_delay(Duration::from_secs(self.reconnect_secs));
        if let Some(client_id) = &self.client_id {
            builder = builder.client_id(client_id);
        }
        if let Some(username) = &self.username {
            builder = builder.username(username);
        }
        if let Some(password) = &self.password {
            builder = builder.password(password);
        }
        builder.build()
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    info!("Starting devhub gateway...");
    let config = GatewayConfig::from_env()?;

    // 1. Durable state
    let store = Arc::new(
        SledStore::open(&config.db_path)
            .with_context(|| format!("Failed to open database at {}", config.db_path))?,
    );

    // 2. Live updates, written as JSON lines for whatever pushes them to browsers
    let sink = Arc::new(BroadcastSink::new());
    let mut live = sink.subscribe();
    tokio::spawn(async move {
        loop {
            match live.recv().await {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(line) => println!("{line}"),
                    Err(e) => warn!("Failed to encode live event: {e}"),
                },
                Err(RecvError::Lagged(missed)) => warn!("Live output skipped {missed} events"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    // 3. Ingestion
    let source = MqttSource::new(config.source_config(), store.clone(), store.clone(), sink);
    let devices = Arc::new(DeviceService::new(
        store.clone(),
        store.clone(),
        source.subscriptions(),
    ));
    match devices.latest_messages().await {
        Ok(known) => info!("{} devices known from previous runs", known.len()),
        Err(e) => warn!("Could not list known devices: {e}"),
    }

    // 4. Control commands share the source's broker connection
    let commands = Arc::new(CommandPublisher::new("devhub-commands", source.broker()));

    source.start().await?;

    // 5. Operator console on stdin
    let console = Console {
        devices,
        commands,
        subscriptions: source.subscriptions(),
    };
    tokio::spawn(console.run());

    // Keep running until signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    source.stop().await?;
    store.flush().await.context("Failed to flush database")?;
    info!("devhub gateway stopped");
    Ok(())
}
