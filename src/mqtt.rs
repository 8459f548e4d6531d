//! MQTT transport session.
//!
//! One [`MqttSession`] owns the client handle and the connection state for
//! the whole process. The rumqttc event loop runs on its own task and hands
//! inbound publishes to the router over a bounded channel.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rumqttc::{
    AsyncClient, Event, EventLoop, LastWill, MqttOptions, Outgoing, Packet, QoS, Transport,
};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::{
    sync::{mpsc, RwLock},
    task::JoinHandle,
    time,
};
use tracing::{debug, error, info, warn};
use utoipa::ToSchema;

use crate::{config::Config, topics::Topics};

/// Pause between polls after an event-loop error. rumqttc reconnects on the
/// next poll.
const RECONNECT_PAUSE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected,
}

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("not connected to the broker")]
    NotConnected,
    #[error("mqtt client error: {0}")]
    Client(#[from] rumqttc::ClientError),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Outbound side of the transport, as the forwarder sees it.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Serialise `payload` as JSON and publish it on `topic` with QoS 1.
    async fn publish(&self, topic: &str, payload: &Value) -> Result<(), PublishError>;
}

/// Read-only view of the session for the status API.
#[async_trait]
pub trait LinkStatus: Send + Sync {
    async fn state(&self) -> ConnectionState;
    fn client_id(&self) -> &str;
}

/// One inbound delivery.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub received_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeStatus {
    Online,
    Offline,
}

impl BridgeStatus {
    fn as_str(self) -> &'static str {
        match self {
            BridgeStatus::Online => "online",
            BridgeStatus::Offline => "offline",
        }
    }
}

/// Liveness announcement published on the bridge status topic.
pub fn bridge_status_payload(status: BridgeStatus, client_id: &str, now: DateTime<Utc>) -> Value {
    json!({
        "bridge_status": status.as_str(),
        "timestamp": now.timestamp_millis(),
        "updated_at": now.to_rfc3339(),
        "client_id": client_id,
    })
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct MqttSession {
    inner: Arc<Inner>,
}

struct Inner {
    client: AsyncClient,
    client_id: String,
    topics: Topics,
    state: RwLock<ConnectionState>,
}

impl MqttSession {
    /// Build the client and its event loop. Nothing touches the network
    /// until the event loop is polled.
    pub fn new(config: &Config, topics: Topics) -> (Self, EventLoop) {
        let mut options = MqttOptions::new(
            config.client_id.clone(),
            config.broker.host.clone(),
            config.broker.port,
        );
        options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));
        options.set_clean_session(true);
        if config.broker.tls {
            // Server certificates are checked against the platform roots.
            options.set_transport(Transport::tls_with_default_config());
        }

        if let Some(username) = &config.mqtt_username {
            options.set_credentials(
                username.clone(),
                config.mqtt_password.clone().unwrap_or_default(),
            );
        }

        let will = bridge_status_payload(BridgeStatus::Offline, &config.client_id, Utc::now());
        options.set_last_will(LastWill::new(
            topics.bridge_status.clone(),
            will.to_string(),
            QoS::AtLeastOnce,
            false,
        ));

        let (client, eventloop) = AsyncClient::new(options, 32);

        let session = Self {
            inner: Arc::new(Inner {
                client,
                client_id: config.client_id.clone(),
                topics,
                state: RwLock::new(ConnectionState::Connecting),
            }),
        };
        (session, eventloop)
    }

    pub fn client_id(&self) -> &str {
        &self.inner.client_id
    }

    pub async fn state(&self) -> ConnectionState {
        *self.inner.state.read().await
    }

    pub(crate) async fn set_state(&self, state: ConnectionState) {
        let mut guard = self.inner.state.write().await;
        if *guard != state {
            info!(from = ?*guard, to = ?state, "MQTT connection state changed");
            *guard = state;
        }
    }

    /// Poll the event loop until the receiver is dropped or a clean
    /// disconnect has been sent.
    pub fn spawn_event_loop(
        &self,
        mut eventloop: EventLoop,
        inbound: mpsc::Sender<InboundMessage>,
    ) -> JoinHandle<()> {
        let session = self.clone();

        tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        session.set_state(ConnectionState::Connected).await;
                        // Subscribing goes through the request channel this
                        // task drains, so it must not run inline.
                        let s = session.clone();
                        tokio::spawn(async move { s.on_connected().await });
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        let msg = InboundMessage {
                            topic: publish.topic,
                            payload: publish.payload.to_vec(),
                            received_at: Utc::now(),
                        };
                        if inbound.send(msg).await.is_err() {
                            info!("Inbound channel closed; stopping MQTT event loop");
                            break;
                        }
                    }
                    Ok(Event::Incoming(Packet::Disconnect)) => {
                        session.set_state(ConnectionState::Disconnected).await;
                    }
                    Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                        session.set_state(ConnectionState::Disconnected).await;
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!(error = %e, "MQTT event loop error");
                        session.set_state(ConnectionState::Disconnected).await;
                        time::sleep(RECONNECT_PAUSE).await;
                    }
                }
            }
        })
    }

    async fn on_connected(&self) {
        for filter in self.inner.topics.subscriptions() {
            match self.inner.client.subscribe(filter.as_str(), QoS::AtLeastOnce).await {
                Ok(()) => debug!(topic = %filter, "Subscribed"),
                Err(e) => error!(topic = %filter, error = %e, "Subscribe failed"),
            }
        }
        self.publish_bridge_status(BridgeStatus::Online).await;
    }

    pub async fn publish_bridge_status(&self, status: BridgeStatus) {
        let payload = bridge_status_payload(status, self.client_id(), Utc::now());
        if let Err(e) = self.publish(&self.inner.topics.bridge_status, &payload).await {
            warn!(status = status.as_str(), error = %e, "Could not publish bridge status");
        }
    }

    /// Announce "offline" and close the connection.
    pub async fn shutdown(&self) {
        self.publish_bridge_status(BridgeStatus::Offline).await;
        if let Err(e) = self.inner.client.disconnect().await {
            warn!(error = %e, "MQTT disconnect failed");
        }
    }
}

#[async_trait]
impl LinkStatus for MqttSession {
    async fn state(&self) -> ConnectionState {
        MqttSession::state(self).await
    }

    fn client_id(&self) -> &str {
        MqttSession::client_id(self)
    }
}

#[async_trait]
impl Publisher for MqttSession {
    async fn publish(&self, topic: &str, payload: &Value) -> Result<(), PublishError> {
        if self.state().await != ConnectionState::Connected {
            return Err(PublishError::NotConnected);
        }

        let bytes = serde_json::to_vec(payload)?;
        self.inner
            .client
            .publish(topic, QoS::AtLeastOnce, false, bytes)
            .await?;

        debug!(topic = %topic, "Published");
        Ok(())
    }
}
