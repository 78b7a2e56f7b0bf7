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

//! Line-oriented operator console on stdin.
//!
//! ```text
//! send <topic> <command>      publish {"command": ...} on <topic>/control
//! add <name> [description]    create a device and subscribe to its topic
//! remove <name>               unsubscribe and delete a device
//! latest                      last message of every device
//! history <topic> [n]         last n messages of a device (default 20)
//! topics                      current broker subscriptions
//! ```
//!
//! Results are printed as JSON lines, like the live events.

use std::sync::Arc;

use anyhow::Result;
use devhub_command_mqtt::CommandPublisher;
use devhub_source_mqtt::devices::DEFAULT_HISTORY_LEN;
use devhub_source_mqtt::{DeviceService, SubscriptionManager};
use log::{info, warn};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Send { topic: String, command: String },
    Add { name: String, description: Option<String> },
    Remove { name: String },
    Latest,
    History { topic: String, n: usize },
    Topics,
}

pub fn parse_request(line: &str) -> Result<Request, &'static str> {
    let mut words = line.split_whitespace();
    let verb = words.next().ok_or("empty request")?;
    let request = match verb {
        "send" => {
            let topic = words.next().ok_or("usage: send <topic> <command>")?;
            let command = words.next().ok_or("usage: send <topic> <command>")?;
            Request::Send {
                topic: topic.to_string(),
                command: command.to_string(),
            }
        }
        "add" => {
            let name = words.next().ok_or("usage: add <name> [description]")?;
            let description = words.collect::<Vec<_>>().join(" ");
            Request::Add {
                name: name.to_string(),
                description: (!description.is_empty()).then_some(description),
            }
        }
        "remove" => Request::Remove {
            name: words.next().ok_or("usage: remove <name>")?.to_string(),
        },
        "latest" => Request::Latest,
        "history" => {
            let topic = words.next().ok_or("usage: history <topic> [n]")?;
            let n = match words.next() {
                Some(n) => n.parse().map_err(|_| "history length must be a number")?,
                None => DEFAULT_HISTORY_LEN,
            };
            Request::History {
                topic: topic.to_string(),
                n,
            }
        }
        "topics" => Request::Topics,
        _ => return Err("unknown request"),
    };
    Ok(request)
}

pub struct Console {
    pub devices: Arc<DeviceService>,
    pub commands: Arc<CommandPublisher>,
    pub subscriptions: Arc<SubscriptionManager>,
}

impl Console {
    /// Serve requests from stdin until it closes.
    pub async fn run(self) {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    warn!("Console input failed: {e}");
                    break;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            match parse_request(&line) {
                Ok(request) => match self.execute(request).await {
                    Ok(result) => println!("{result}"),
                    Err(e) => warn!("Request failed: {e}"),
                },
                Err(usage) => warn!("{usage}"),
            }
        }
        info!("Console closed");
    }

    async fn execute(&self, request: Request) -> Result<Value> {
        let result = match request {
            Request::Send { topic, command } => {
                serde_json::to_value(self.commands.send(&topic, &command).await?)?
            }
            Request::Add { name, description } => {
                let device = self.devices.create_device(&name, description).await?;
                serde_json::to_value(device)?
            }
            Request::Remove { name } => {
                json!({ "removed": self.devices.remove_device(&name).await? })
            }
            Request::Latest => serde_json::to_value(self.devices.latest_messages().await?)?,
            Request::History { topic, n } => {
                serde_json::to_value(self.devices.telemetry_history(&topic, n).await?)?
            }
            Request::Topics => json!(self.subscriptions.topics()),
        };
        Ok(result)
    }
}
