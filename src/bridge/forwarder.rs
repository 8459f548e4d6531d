use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{error, info};
use uuid::Uuid;

use crate::{
    mqtt::Publisher,
    payload::Payload,
    records::{self, PumpStatus, SensorRecord},
    topics::Topics,
};

const PUMP_DEVICE: &str = "water_pump";

/// `source` of envelopes relayed between device and app.
pub const FORWARD_SOURCE: &str = "bridge_forward";
/// `source` of commands issued by auto-control.
pub const AUTO_CONTROL_SOURCE: &str = "auto_control";

/// Command envelope sent to the device pump-control topic.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceCommand {
    pub device: &'static str,
    pub action: PumpStatus,
    pub timestamp: DateTime<Utc>,
    pub source: &'static str,
    pub command_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Status envelope sent to the app pump-status topic.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AppPumpStatus {
    pub device: &'static str,
    pub is_active: bool,
    pub status: PumpStatus,
    pub timestamp: DateTime<Utc>,
    pub source: &'static str,
    pub command_id: Option<String>,
    pub original_source: String,
}

impl DeviceCommand {
    /// Relay of an app-issued command.
    pub fn forwarded(is_active: bool, original: &Payload, now: DateTime<Utc>) -> Self {
        Self {
            device: PUMP_DEVICE,
            action: is_active.into(),
            timestamp: now,
            source: FORWARD_SOURCE,
            command_id: records::command_id(original)
                .unwrap_or_else(|| now.timestamp_millis().to_string()),
            original_source: Some(source_of(original).unwrap_or("unknown").to_owned()),
            reason: None,
        }
    }

    /// Command derived from sensor conditions.
    pub fn automatic(is_active: bool, reason: String, now: DateTime<Utc>) -> Self {
        Self {
            device: PUMP_DEVICE,
            action: is_active.into(),
            timestamp: now,
            source: AUTO_CONTROL_SOURCE,
            command_id: Uuid::new_v4().to_string(),
            original_source: None,
            reason: Some(reason),
        }
    }
}

impl AppPumpStatus {
    pub fn forwarded(is_active: bool, original: &Payload, now: DateTime<Utc>) -> Self {
        Self {
            device: PUMP_DEVICE,
            is_active,
            status: is_active.into(),
            timestamp: now,
            source: FORWARD_SOURCE,
            command_id: records::command_id(original),
            original_source: source_of(original).unwrap_or("device").to_owned(),
        }
    }
}

fn source_of(payload: &Payload) -> Option<&str> {
    payload.get("source").and_then(Value::as_str)
}

/// Republishes translated records to the opposite party. Every publish is
/// fire-and-forget: failures are logged and never returned.
#[derive(Clone)]
pub struct Forwarder {
    publisher: Arc<dyn Publisher>,
    topics: Topics,
}

impl Forwarder {
    pub fn new(publisher: Arc<dyn Publisher>, topics: Topics) -> Self {
        Self { publisher, topics }
    }

    /// Device → app.
    pub async fn sensors_to_app(&self, record: &SensorRecord) {
        self.send(&self.topics.app_sensor_data, record).await;
    }

    /// App → device.
    pub async fn sensors_to_device(&self, record: &SensorRecord) {
        self.send(&self.topics.sensor_data, record).await;
    }

    pub async fn pump_command_to_device(&self, command: &DeviceCommand) {
        self.send(&self.topics.pump_control, command).await;
    }

    pub async fn pump_status_to_app(&self, status: &AppPumpStatus) {
        self.send(&self.topics.app_pump_status, status).await;
    }

    /// Answer a sync request with the stored snapshot.
    pub async fn sync_sensors(&self, latest: &Value) {
        self.send(&self.topics.sensor_data, latest).await;
    }

    pub async fn sync_pump(&self, latest: &Value) {
        self.send(&self.topics.pump_status, latest).await;
    }

    async fn send<T: Serialize + ?Sized>(&self, topic: &str, message: &T) {
        let payload = match serde_json::to_value(message) {
            Ok(v) => v,
            Err(e) => {
                error!(topic = %topic, error = %e, "Could not serialise forward");
                return;
            }
        };

        match self.publisher.publish(topic, &payload).await {
            Ok(()) => info!(topic = %topic, "Forwarded"),
            Err(e) => error!(topic = %topic, error = %e, "Forward publish failed"),
        }
    }
}
