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

//! The authoritative set of topics subscribed with the broker.
//!
//! The set is updated before the broker request is issued and is not rolled
//! back when the request fails. A stale entry is corrected by the next
//! [`SubscriptionManager::restore_all`], which runs on every (re)connect.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashSet;
use log::{debug, info};
use rumqttc::QoS;
use thiserror::Error;

use devhub_store::{DeviceDirectory, StoreError};

use crate::broker::{BrokerClient, BrokerError};

#[derive(Debug, Error)]
pub enum RestoreError {
    #[error("failed to read device topics: {0}")]
    Directory(#[from] StoreError),

    #[error("failed to resubscribe: {0}")]
    Broker(#[from] BrokerError),
}

pub struct SubscriptionManager {
    topics: DashSet<String>,
    broker: Arc<dyn BrokerClient>,
    directory: Arc<dyn DeviceDirectory>,
    status_filter: String,
    qos: QoS,
}

impl SubscriptionManager {
    pub fn new(
        broker: Arc<dyn BrokerClient>,
        directory: Arc<dyn DeviceDirectory>,
        status_filter: impl Into<String>,
    ) -> Self {
        Self {
            topics: DashSet::new(),
            broker,
            directory,
            status_filter: status_filter.into(),
            qos: QoS::AtLeastOnce,
        }
    }

    /// Subscribe to `topic` unless it is already subscribed. Returns whether
    /// a broker request was made.
    pub async fn subscribe(&self, topic: &str) -> Result<bool, BrokerError> {
        if !self.topics.insert(topic.to_string()) {
            debug!("Already subscribed to {topic}");
            return Ok(false);
        }
        self.broker.subscribe(topic, self.qos).await?;
        info!("Subscribed to {topic}");
        Ok(true)
    }

    /// Unsubscribe from `topic` if it is subscribed. Returns whether a
    /// broker request was made.
    pub async fn unsubscribe(&self, topic: &str) -> Result<bool, BrokerError> {
        if self.topics.remove(topic).is_none() {
            debug!("Not subscribed to {topic}, nothing to undo");
            return Ok(false);
        }
        self.broker.unsubscribe(topic).await?;
        info!("Unsubscribed from {topic}");
        Ok(true)
    }

    /// Rebuild the set from the directory and resubscribe to all of it,
    /// status filter included, in one broker request.
    ///
    /// Runs after every connect: a fresh broker session has no memory of
    /// earlier subscriptions. Returns the number of filters subscribed.
    pub async fn restore_all(&self) -> Result<usize, RestoreError> {
        let mut wanted = self.directory.all_topics().await?;
        wanted.push(self.status_filter.clone());
        wanted.sort();
        wanted.dedup();

        let keep: HashSet<&str> = wanted.iter().map(String::as_str).collect();
        self.topics.retain(|topic| keep.contains(topic.as_str()));
        for topic in &wanted {
            self.topics.insert(topic.clone());
        }

        self.broker.subscribe_many(&wanted, self.qos).await?;
        info!("Restored {} subscriptions: {}", wanted.len(), wanted.join(", "));
        Ok(wanted.len())
    }

    pub fn is_subscribed(&self, topic: &str) -> bool {
        self.topics.contains(topic)
    }

    /// Snapshot of the subscribed topics, sorted.
    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.topics.iter().map(|t| t.key().clone()).collect();
        topics.sort();
        topics
    }
}
