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

//! The MQTT source component: owns the broker connection and drives
//! ingestion.
//!
//! Two tasks run while the source is started:
//! - the event loop task polls rumqttc, tracks the connection lifecycle,
//!   starts a subscription restore on every ConnAck and queues inbound
//!   publishes;
//! - the ingestion worker drains that queue one message at a time.
//!
//! The restore request goes through the client's request queue, which only
//! the event loop drains, so it runs on its own task while polling goes on.
//! Publishes that arrive before it finishes are held back and queued once
//! the subscription set has been rebuilt.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use log::{debug, error, info, warn};
use rumqttc::{AsyncClient, Event, EventLoop, Incoming, MqttOptions, Outgoing, Transport};
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::{JoinError, JoinHandle};

use devhub_store::{DeviceDirectory, TelemetryStore};

use crate::broker::{BrokerClient, ClientHandle};
use crate::config::MqttSourceConfig;
use crate::ingest::{InboundMessage, Ingestor};
use crate::lifecycle::{ConnectionEvent, ConnectionLifecycle, ConnectionState};
use crate::sink::EventSink;
use crate::subscriptions::{RestoreError, SubscriptionManager};

/// How long `stop` waits for the DISCONNECT packet to go out.
const DISCONNECT_GRACE: Duration = Duration::from_secs(2);

struct Running {
    shutdown_tx: oneshot::Sender<()>,
    event_loop: JoinHandle<()>,
    worker: JoinHandle<()>,
}

/// MQTT telemetry source.
///
/// Connects to the broker, keeps the subscription set in line with the
/// device directory across reconnects and feeds every inbound publish to
/// the [`Ingestor`].
pub struct MqttSource {
    config: MqttSourceConfig,
    client: ClientHandle,
    lifecycle: Arc<ConnectionLifecycle>,
    subscriptions: Arc<SubscriptionManager>,
    ingestor: Arc<Ingestor>,
    running: Mutex<Option<Running>>,
}

impl MqttSource {
    /// Create a new MQTT source from the given config and collaborators.
    pub fn new(
        config: MqttSourceConfig,
        directory: Arc<dyn DeviceDirectory>,
        telemetry: Arc<dyn TelemetryStore>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        let client = ClientHandle::new();
        let subscriptions = Arc::new(SubscriptionManager::new(
            Arc::new(client.clone()),
            directory.clone(),
            config.status_filter.clone(),
        ));
        let ingestor = Arc::new(Ingestor::new(config.id.clone(), directory, telemetry, sink));

        Self {
            config,
            client,
            lifecycle: Arc::new(ConnectionLifecycle::new()),
            subscriptions,
            ingestor,
            running: Mutex::new(None),
        }
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }

    pub fn state(&self) -> ConnectionState {
        self.lifecycle.state()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.lifecycle.watch()
    }

    /// Subscription set shared with the HTTP layer.
    pub fn subscriptions(&self) -> Arc<SubscriptionManager> {
        self.subscriptions.clone()
    }

    /// Broker handle for outbound publishes. Requests fail with
    /// `NotConnected` while the source is stopped.
    pub fn broker(&self) -> Arc<dyn BrokerClient> {
        Arc::new(self.client.clone())
    }

    fn mqtt_options(&self) -> MqttOptions {
        let mut mqtt_opts = MqttOptions::new(
            &self.config.client_id,
            &self.config.broker_host,
            self.config.port,
        );
        mqtt_opts.set_keep_alive(self.config.keep_alive);
        // Subscriptions are rebuilt from the directory on every connect.
        mqtt_opts.set_clean_session(true);

        if let (Some(user), Some(pass)) = (&self.config.username, &self.config.password) {
            mqtt_opts.set_credentials(user, pass);
        }
        if self.config.use_tls {
            mqtt_opts.set_transport(Transport::tls_with_default_config());
        }
        mqtt_opts
    }

    pub async fn start(&self) -> Result<()> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            warn!("[{}] MQTT source already started", self.config.id);
            return Ok(());
        }

        info!(
            "[{}] Starting MQTT source (broker={}:{}, tls={})",
            self.config.id, self.config.broker_host, self.config.port, self.config.use_tls
        );

        let (client, eventloop) =
            AsyncClient::new(self.mqtt_options(), self.config.inbound_capacity);
        self.client.set(client).await;
        self.lifecycle.apply(ConnectionEvent::Start);

        let (inbound_tx, inbound_rx) = mpsc::channel(self.config.inbound_capacity);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let worker = tokio::spawn(run_worker(
            self.config.id.clone(),
            self.ingestor.clone(),
            inbound_rx,
        ));
        let event_loop = tokio::spawn(run_event_loop(
            self.config.id.clone(),
            eventloop,
            self.lifecycle.clone(),
            self.subscriptions.clone(),
            inbound_tx,
            shutdown_rx,
            self.config.reconnect_delay,
        ));

        *running = Some(Running {
            shutdown_tx,
            event_loop,
            worker,
        });
        info!("[{}] MQTT source started", self.config.id);
        Ok(())
    }

    /// Disconnect and stop. Messages already queued are still ingested;
    /// nothing new is accepted once this is called.
    pub async fn stop(&self) -> Result<()> {
        let Some(mut running) = self.running.lock().await.take() else {
            return Ok(());
        };
        let source_id = &self.config.id;
        self.lifecycle.apply(ConnectionEvent::Shutdown);

        if let Some(client) = self.client.take().await {
            // The request queue may be full; the shutdown signal covers that.
            if let Err(e) = client.try_disconnect() {
                debug!("[{source_id}] Could not queue DISCONNECT: {e}");
            }
        }
        if tokio::time::timeout(DISCONNECT_GRACE, &mut running.event_loop)
            .await
            .is_err()
        {
            debug!("[{source_id}] Event loop still busy, signalling shutdown");
            let _ = running.shutdown_tx.send(());
            if let Err(e) = running.event_loop.await {
                error!("[{source_id}] Event loop task failed: {e}");
            }
        }

        if let Err(e) = running.worker.await {
            error!("[{source_id}] Ingestion worker failed: {e}");
        }
        info!("[{source_id}] MQTT source stopped");
        Ok(())
    }
}

async fn run_worker(
    source_id: String,
    ingestor: Arc<Ingestor>,
    mut inbound_rx: mpsc::Receiver<InboundMessage>,
) {
    info!("[{source_id}] Ingestion worker started");
    while let Some(message) = inbound_rx.recv().await {
        ingestor.handle(message).await;
    }
    info!("[{source_id}] Ingestion worker drained");
}

type RestoreTask = JoinHandle<Result<usize, RestoreError>>;

async fn restore_finished(
    task: &mut Option<RestoreTask>,
) -> Result<Result<usize, RestoreError>, JoinError> {
    match task {
        Some(task) => task.await,
        None => std::future::pending().await,
    }
}

/// Queue held messages for the worker. False once the worker is gone.
async fn forward_held(
    inbound_tx: &mpsc::Sender<InboundMessage>,
    held: &mut Vec<InboundMessage>,
) -> bool {
    for message in held.drain(..) {
        if inbound_tx.send(message).await.is_err() {
            return false;
        }
    }
    true
}

async fn run_event_loop(
    source_id: String,
    mut eventloop: EventLoop,
    lifecycle: Arc<ConnectionLifecycle>,
    subscriptions: Arc<SubscriptionManager>,
    inbound_tx: mpsc::Sender<InboundMessage>,
    mut shutdown_rx: oneshot::Receiver<()>,
    reconnect_delay: Duration,
) {
    info!("[{source_id}] MQTT event loop started");
    let mut restore: Option<RestoreTask> = None;
    let mut held: Vec<InboundMessage> = Vec::new();

    loop {
        tokio::select! {
            _ = &mut shutdown_rx => {
                info!("[{source_id}] Shutdown signal received");
                break;
            }
            result = restore_finished(&mut restore), if restore.is_some() => {
                restore = None;
                match result {
                    Ok(Ok(count)) => debug!("[{source_id}] Restore of {count} subscriptions queued"),
                    Ok(Err(e)) => error!("[{source_id}] Failed to restore subscriptions: {e}"),
                    Err(e) if e.is_cancelled() => {}
                    Err(e) => error!("[{source_id}] Restore task failed: {e}"),
                }
                if !held.is_empty() {
                    debug!("[{source_id}] Releasing {} held messages", held.len());
                }
                if !forward_held(&inbound_tx, &mut held).await {
                    error!("[{source_id}] Ingestion worker gone, stopping event loop");
                    break;
                }
            }
            event = eventloop.poll() => {
                match event {
                    Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                        let transition = lifecycle.apply(ConnectionEvent::ConnAck);
                        info!(
                            "[{source_id}] Connected to MQTT broker ({:?} -> {:?})",
                            transition.from, transition.to
                        );
                        if transition.requires_restore() {
                            if let Some(stale) = restore.take() {
                                stale.abort();
                            }
                            let subscriptions = subscriptions.clone();
                            restore = Some(tokio::spawn(async move {
                                subscriptions.restore_all().await
                            }));
                        }
                    }
                    Ok(Event::Incoming(Incoming::Publish(publish))) => {
                        if lifecycle.state() == ConnectionState::Disconnected {
                            debug!("[{source_id}] Shutting down, ignoring message on {}", publish.topic);
                            continue;
                        }
                        debug!("[{source_id}] Message on {}", publish.topic);
                        let message = InboundMessage::from(&publish);
                        if restore.is_some() {
                            held.push(message);
                            continue;
                        }
                        if inbound_tx.send(message).await.is_err() {
                            error!("[{source_id}] Ingestion worker gone, stopping event loop");
                            break;
                        }
                    }
                    Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                        info!("[{source_id}] Disconnected from MQTT broker");
                        break;
                    }
                    Ok(_) => {} // PingResp, SubAck, PubAck, ...
                    Err(e) => {
                        if lifecycle.state() == ConnectionState::Disconnected {
                            break;
                        }
                        let transition = lifecycle.apply(ConnectionEvent::ConnectionLost);
                        warn!(
                            "[{source_id}] MQTT connection error ({:?}), retrying in {:?}: {e}",
                            transition.to, reconnect_delay
                        );
                        tokio::select! {
                            _ = &mut shutdown_rx => {
                                info!("[{source_id}] Shutdown signal received");
                                break;
                            }
                            _ = tokio::time::sleep(reconnect_delay) => {}
                        }
                    }
                }
            }
        }
    }

    if let Some(task) = restore.take() {
        task.abort();
    }
    // Received before shutdown began, so still ingested.
    if !forward_held(&inbound_tx, &mut held).await {
        warn!("[{source_id}] Ingestion worker gone, messages were lost");
    }
    info!("[{source_id}] MQTT event loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::STATUS_FILTER;
    use crate::config::MqttSourceConfigBuilder;
    use crate::sink::{BroadcastSink, LiveEvent};
    use crate::testing::{MockBroker, ReceivedPacket, RecordingSink};
    use async_trait::async_trait;
    use devhub_store::{MemoryStore, NewDevice, NewTelemetry, Telemetry};

    fn source() -> MqttSource {
        let store = Arc::new(MemoryStore::new());
        // Nothing listens on port 1; connection attempts fail fast.
        let config = MqttSourceConfig::builder("test", "127.0.0.1")
            .port(1)
            .reconnect_delay(Duration::from_millis(50))
            .build();
        MqttSource::new(config, store.clone(), store, Arc::new(BroadcastSink::new()))
    }

    fn local_config(broker: &MockBroker) -> MqttSourceConfigBuilder {
        MqttSourceConfig::builder("test", "127.0.0.1")
            .port(broker.port)
            .reconnect_delay(Duration::from_millis(100))
    }

    async fn wait_connected(source: &MqttSource) {
        let mut state = source.watch_state();
        tokio::time::timeout(
            Duration::from_secs(5),
            state.wait_for(|s| *s == ConnectionState::Connected),
        )
        .await
        .expect("source never connected")
        .unwrap();
    }

    async fn wait_for_events(sink: &RecordingSink, count: usize) {
        for _ in 0..100 {
            if sink.events().len() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("expected {count} events, got {:?}", sink.events());
    }

    /// Appends slowly so that messages pile up in the ingestion queue.
    struct SlowTelemetry(Arc<MemoryStore>);

    #[async_trait]
    impl TelemetryStore for SlowTelemetry {
        async fn append(&self, record: NewTelemetry) -> devhub_store::Result<Telemetry> {
            tokio::time::sleep(Duration::from_millis(100)).await;
            self.0.append(record).await
        }

        async fn most_recent(&self, device_id: &str) -> devhub_store::Result<Option<Telemetry>> {
            self.0.most_recent(device_id).await
        }

        async fn most_recent_n(
            &self,
            device_id: &str,
            n: usize,
        ) -> devhub_store::Result<Vec<Telemetry>> {
            self.0.most_recent_n(device_id, n).await
        }
    }

    #[tokio::test]
    async fn test_stopped_source_rejects_broker_requests() {
        let source = source();
        assert_eq!(source.state(), ConnectionState::Disconnected);
        assert!(source.subscriptions().subscribe("a/telemetry").await.is_err());
        assert!(source
            .broker()
            .publish("a/control", b"{}".to_vec(), false, rumqttc::QoS::AtLeastOnce)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_unreachable_broker_keeps_connecting_until_stopped() {
        let source = source();
        source.start().await.unwrap();
        assert_eq!(source.state(), ConnectionState::Connecting);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(source.state(), ConnectionState::Connecting);

        source.stop().await.unwrap();
        assert_eq!(source.state(), ConnectionState::Disconnected);
        // Stopping twice is fine.
        source.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_connack_restores_subscriptions_then_ingests() {
        let mut broker = MockBroker::start().await;
        let store = Arc::new(MemoryStore::new());
        store
            .create(NewDevice::auto_registered("iot/device/1/telemetry"))
            .await
            .unwrap();
        let sink = Arc::new(RecordingSink::default());
        let source = MqttSource::new(
            local_config(&broker).build(),
            store.clone(),
            store.clone(),
            sink.clone(),
        );

        source.start().await.unwrap();
        assert_eq!(
            broker.next_subscribe().await.unwrap(),
            vec![STATUS_FILTER.to_string(), "iot/device/1/telemetry".to_string()]
        );
        wait_connected(&source).await;
        assert!(source.subscriptions().is_subscribed(STATUS_FILTER));

        broker.publish("iot/device/2/telemetry", "{\"temp\":1}", true);
        broker.publish("iot/device/1/telemetry", "{\"temp\":21}", false);
        broker.publish("iot/device/1/status", "{\"status\":\"online\"}", false);
        wait_for_events(&sink, 2).await;

        assert_eq!(
            sink.events(),
            vec![
                LiveEvent::TelemetryReceived {
                    topic: "iot/device/1/telemetry".into(),
                    payload: "{\"temp\":21}".into(),
                },
                LiveEvent::DeviceStatusUpdated {
                    topic: "iot/device/1/telemetry".into(),
                    payload: "{\"status\":\"online\"}".into(),
                },
            ]
        );
        // The retained replay registered nothing.
        assert!(store.lookup_by_topic("iot/device/2/telemetry").await.unwrap().is_none());

        source.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_reconnect_restores_subscriptions_again() {
        let mut broker = MockBroker::start().await;
        let store = Arc::new(MemoryStore::new());
        let source = MqttSource::new(
            local_config(&broker).build(),
            store.clone(),
            store.clone(),
            Arc::new(RecordingSink::default()),
        );

        source.start().await.unwrap();
        assert_eq!(broker.next_subscribe().await.unwrap(), vec![STATUS_FILTER.to_string()]);
        wait_connected(&source).await;

        // Registered while connected; only the next restore picks it up.
        store
            .create(NewDevice::auto_registered("iot/device/9/telemetry"))
            .await
            .unwrap();
        broker.drop_connection();

        assert_eq!(
            broker.next_subscribe().await.unwrap(),
            vec![STATUS_FILTER.to_string(), "iot/device/9/telemetry".to_string()]
        );
        wait_connected(&source).await;
        assert!(source.subscriptions().is_subscribed("iot/device/9/telemetry"));

        source.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_restore_gets_through_a_full_request_queue() {
        let mut broker = MockBroker::start().await;
        let store = Arc::new(MemoryStore::new());
        let config = local_config(&broker).inbound_capacity(4).build();
        let source =
            MqttSource::new(config, store.clone(), store, Arc::new(RecordingSink::default()));

        source.start().await.unwrap();
        let client = source.broker();
        let mut queued = 0;
        while client
            .publish("iot/device/1/control", b"{}".to_vec(), false, rumqttc::QoS::AtLeastOnce)
            .await
            .is_ok()
        {
            queued += 1;
            assert!(queued <= 4, "request queue should be bounded");
        }
        assert!(queued > 0);

        assert_eq!(broker.next_subscribe().await.unwrap(), vec![STATUS_FILTER.to_string()]);
        wait_connected(&source).await;

        tokio::time::timeout(Duration::from_secs(5), source.stop())
            .await
            .expect("stop hung")
            .unwrap();
        assert_eq!(source.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_stop_drains_queued_messages() {
        let mut broker = MockBroker::start().await;
        let store = Arc::new(MemoryStore::new());
        let sink = Arc::new(RecordingSink::default());
        let source = MqttSource::new(
            local_config(&broker).build(),
            store.clone(),
            Arc::new(SlowTelemetry(store.clone())),
            sink.clone(),
        );

        source.start().await.unwrap();
        broker.next_subscribe().await.unwrap();
        wait_connected(&source).await;

        for i in 0..5 {
            broker.publish("iot/device/5/telemetry", &format!("{{\"seq\":{i}}}"), false);
        }
        wait_for_events(&sink, 1).await;
        source.stop().await.unwrap();

        let device = store
            .lookup_by_topic("iot/device/5/telemetry")
            .await
            .unwrap()
            .unwrap();
        let history = store.most_recent_n(&device.id, 10).await.unwrap();
        let payloads: Vec<_> = history.iter().map(|t| t.payload.as_str()).collect();
        assert_eq!(
            payloads,
            vec!["{\"seq\":0}", "{\"seq\":1}", "{\"seq\":2}", "{\"seq\":3}", "{\"seq\":4}"]
        );
        assert_eq!(sink.events().len(), 5);
        assert!(broker
            .next_matching(|p| (p == ReceivedPacket::Disconnect).then_some(()))
            .await
            .is_some());

        // Nothing is accepted once stopped.
        assert!(source
            .broker()
            .publish("iot/device/5/control", b"{}".to_vec(), false, rumqttc::QoS::AtLeastOnce)
            .await
            .is_err());
    }
}
