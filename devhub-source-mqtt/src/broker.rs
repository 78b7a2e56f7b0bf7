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

//! Broker operations used by the subscription manager and command publishing.

use std::sync::Arc;

use async_trait::async_trait;
use rumqttc::{AsyncClient, ClientError, QoS, SubscribeFilter};
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("MQTT request could not be queued: {0}")]
    Client(#[from] ClientError),

    #[error("MQTT client is not running")]
    NotConnected,
}

/// Broker requests. One-shot requests fail immediately when the client's
/// request queue is full; they are never retried here. Connectivity itself
/// is retried by the event loop.
#[async_trait]
pub trait BrokerClient: Send + Sync {
    async fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), BrokerError>;

    /// Subscribe to several filters with a single SUBSCRIBE packet. Waits
    /// for room in the request queue, so it must not run on the task that
    /// polls the event loop.
    async fn subscribe_many(&self, topics: &[String], qos: QoS) -> Result<(), BrokerError>;

    async fn unsubscribe(&self, topic: &str) -> Result<(), BrokerError>;

    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        retain: bool,
        qos: QoS,
    ) -> Result<(), BrokerError>;
}

#[async_trait]
impl BrokerClient for AsyncClient {
    async fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), BrokerError> {
        self.try_subscribe(topic, qos)?;
        Ok(())
    }

    async fn subscribe_many(&self, topics: &[String], qos: QoS) -> Result<(), BrokerError> {
        let filters = topics
            .iter()
            .map(|topic| SubscribeFilter::new(topic.clone(), qos))
            .collect::<Vec<_>>();
        AsyncClient::subscribe_many(self, filters).await?;
        Ok(())
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), BrokerError> {
        self.try_unsubscribe(topic)?;
        Ok(())
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        retain: bool,
        qos: QoS,
    ) -> Result<(), BrokerError> {
        self.try_publish(topic, qos, retain, payload)?;
        Ok(())
    }
}

/// Client slot shared between the source and everyone issuing requests.
///
/// Set on start, cleared on stop. The client is cloned out of the lock
/// before any request is awaited.
#[derive(Clone, Default)]
pub struct ClientHandle {
    inner: Arc<RwLock<Option<AsyncClient>>>,
}

impl ClientHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) async fn set(&self, client: AsyncClient) {
        *self.inner.write().await = Some(client);
    }

    pub(crate) async fn take(&self) -> Option<AsyncClient> {
        self.inner.write().await.take()
    }

    async fn client(&self) -> Result<AsyncClient, BrokerError> {
        self.inner
            .read()
            .await
            .clone()
            .ok_or(BrokerError::NotConnected)
    }
}

#[async_trait]
impl BrokerClient for ClientHandle {
    async fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), BrokerError> {
        BrokerClient::subscribe(&self.client().await?, topic, qos).await
    }

    async fn subscribe_many(&self, topics: &[String], qos: QoS) -> Result<(), BrokerError> {
        BrokerClient::subscribe_many(&self.client().await?, topics, qos).await
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), BrokerError> {
        BrokerClient::unsubscribe(&self.client().await?, topic).await
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        retain: bool,
        qos: QoS,
    ) -> Result<(), BrokerError> {
        BrokerClient::publish(&self.client().await?, topic, payload, retain, qos).await
    }
}
