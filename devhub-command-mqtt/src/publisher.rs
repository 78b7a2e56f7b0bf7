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

//! Helpers for building control topics and payloads.

use serde::Serialize;

const CONTROL_SUFFIX: &str = "/control";

#[derive(Serialize)]
struct ControlPayload<'a> {
    command: &'a str,
}

/// Append `/control` unless the topic already ends with it.
pub fn control_topic(topic: &str) -> String {
    if topic.ends_with(CONTROL_SUFFIX) {
        topic.to_string()
    } else {
        format!("{topic}{CONTROL_SUFFIX}")
    }
}

/// Serialize a command into the JSON payload devices expect.
pub fn command_payload(command: &str) -> serde_json::Result<String> {
    serde_json::to_string(&ControlPayload { command })
}
