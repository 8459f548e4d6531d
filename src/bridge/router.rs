use anyhow::Result;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use super::{
    forwarder::{AppPumpStatus, DeviceCommand, AUTO_CONTROL_SOURCE, FORWARD_SOURCE},
    Bridge,
};
use crate::{
    control,
    mqtt::InboundMessage,
    payload::{self, Payload},
    records::{HistoryEntry, SensorRecord, Source},
    store::StorePath,
    topics::{Domain, Origin, PumpChannel, SyncKind},
};

const ALERT_TITLE: &str = "Soil moisture alert";

impl Bridge {
    /// Decode, classify and dispatch one inbound message. Never fails: a
    /// handler error is logged and the message is dropped.
    pub async fn handle(&self, msg: InboundMessage) {
        let now = msg.received_at;
        let payload = payload::decode(&msg.topic, &msg.payload, now);
        let route = self.topics.classify(&msg.topic);
        info!(topic = %msg.topic, domain = ?route.domain, origin = ?route.origin, "Routing message");

        let result = match (route.domain, route.origin) {
            (Domain::Sensors, Origin::Device) => self.device_sensors(&payload, now).await,
            (Domain::Sensors, Origin::App) => self.app_sensors(&payload, now).await,
            (Domain::Environment, _) => self.environment(&payload, now).await,
            (Domain::Pump(channel), origin) => self.pump(&payload, origin, channel, now).await,
            (Domain::Sync(kind), _) => self.sync(kind).await,
            (Domain::Unclassified, _) => self.unclassified(&payload, now).await,
        };

        if let Err(e) = result {
            error!(topic = %msg.topic, error = %e, "Handler failed; message dropped");
        }
    }

    // -----------------------------------------------------------------------
    // Handlers
    // -----------------------------------------------------------------------

    async fn device_sensors(&self, payload: &Payload, now: DateTime<Utc>) -> Result<()> {
        if is_canonical_record(payload) {
            debug!("Ignoring republished sensor record");
            return Ok(());
        }
        let Some(record) = self.builder.sensor_record(payload, Origin::Device, now) else {
            warn!(keys = ?payload.keys().collect::<Vec<_>>(), "No sensor values in device payload");
            return Ok(());
        };
        log_reading("Device sensor reading", &record);

        let value = serde_json::to_value(&record)?;
        self.save_current(StorePath::CurrentSensor, &value).await;
        self.save_history(StorePath::SensorHistory, &value, Some(Source::Device.as_str()), now)
            .await?;

        self.forwarder.sensors_to_app(&record).await;
        self.alert_on_anomaly(&record).await;
        if self.auto_control {
            self.auto_pump(&record, now).await;
        }
        Ok(())
    }

    async fn app_sensors(&self, payload: &Payload, now: DateTime<Utc>) -> Result<()> {
        if is_canonical_record(payload) {
            debug!("Ignoring republished sensor record");
            return Ok(());
        }
        let Some(record) = self.builder.sensor_record(payload, Origin::App, now) else {
            warn!(keys = ?payload.keys().collect::<Vec<_>>(), "Unknown app sensor format");
            return Ok(());
        };
        log_reading("App sensor update", &record);

        let value = serde_json::to_value(&record)?;
        self.save_current(StorePath::CurrentSensorApp, &value).await;
        self.save_history(StorePath::SensorHistory, &value, Some(Source::MobileApp.as_str()), now)
            .await?;

        self.forwarder.sensors_to_device(&record).await;
        Ok(())
    }

    async fn environment(&self, payload: &Payload, now: DateTime<Utc>) -> Result<()> {
        let Some(record) = self.builder.environment_record(payload, now) else {
            warn!(keys = ?payload.keys().collect::<Vec<_>>(), "No environment metrics in payload");
            return Ok(());
        };

        let value = serde_json::to_value(&record)?;
        self.save_current(StorePath::CurrentEnvironment, &value).await;
        self.save_history(StorePath::EnvironmentHistory, &value, None, now).await?;
        info!("Environment data saved");
        Ok(())
    }

    async fn pump(
        &self,
        payload: &Payload,
        origin: Origin,
        channel: PumpChannel,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if is_canonical_record(payload) || is_bridge_envelope(payload) {
            debug!("Ignoring pump message published by the bridge");
            return Ok(());
        }
        let Some(is_active) = payload::resolve_pump_state(payload) else {
            warn!(keys = ?payload.keys().collect::<Vec<_>>(), "No pump status in payload");
            return Ok(());
        };
        info!(is_active, origin = ?origin, channel = ?channel, "Pump update");

        let record = self.builder.pump_record(is_active, payload, origin, now);
        let value = serde_json::to_value(&record)?;
        self.save_current(StorePath::CurrentPump, &value).await;
        self.save_history(StorePath::PumpHistory, &value, Some(record.source.as_str()), now)
            .await?;

        match (origin, channel) {
            (Origin::App, PumpChannel::Control) => {
                let command = DeviceCommand::forwarded(is_active, payload, now);
                self.forwarder.pump_command_to_device(&command).await;
            }
            (Origin::Device, PumpChannel::Control) => {
                let status = AppPumpStatus::forwarded(is_active, payload, now);
                self.forwarder.pump_status_to_app(&status).await;
            }
            (_, PumpChannel::Status) => {}
        }
        Ok(())
    }

    async fn sync(&self, kind: SyncKind) -> Result<()> {
        let path = match kind {
            SyncKind::Sensors => StorePath::CurrentSensor,
            SyncKind::Pump => StorePath::CurrentPump,
        };

        match self.store.latest(path).await {
            Ok(Some(latest)) => match kind {
                SyncKind::Sensors => self.forwarder.sync_sensors(&latest).await,
                SyncKind::Pump => self.forwarder.sync_pump(&latest).await,
            },
            Ok(None) => info!(path = %path, "Sync requested before anything was stored"),
            Err(e) => error!(path = %path, error = %e, "Could not read latest record for sync"),
        }
        Ok(())
    }

    async fn unclassified(&self, payload: &Payload, now: DateTime<Utc>) -> Result<()> {
        let value = Value::Object(payload.clone());
        self.save_history(StorePath::GeneralMessages, &value, None, now).await
    }

    // -----------------------------------------------------------------------
    // Derived actions
    // -----------------------------------------------------------------------

    async fn alert_on_anomaly(&self, record: &SensorRecord) {
        let [s1, s2] = record.readings();
        let readings = [
            ("Sensor 1", s1.is_active.then_some(s1.value)),
            ("Sensor 2", s2.is_active.then_some(s2.value)),
        ];
        let Some(message) = self.builder.thresholds().check_anomaly(readings) else {
            return;
        };

        warn!(alert = %message, "Soil moisture anomaly");
        match self.notifier.send_notification(ALERT_TITLE, &message).await {
            Ok(report) => debug!(sent = report.sent, failed = report.failed, "Anomaly alert sent"),
            Err(e) => error!(error = %e, "Anomaly alert failed"),
        }
    }

    async fn auto_pump(&self, record: &SensorRecord, now: DateTime<Utc>) {
        let [s1, s2] = record.readings();
        let Some(on) = control::decide(record) else {
            debug!(sensor_1 = %s1.condition, sensor_2 = %s2.condition, "Auto-control: no change");
            return;
        };

        let reason = format!("sensor_1 {}, sensor_2 {}", s1.condition, s2.condition);
        let command = DeviceCommand::automatic(on, reason, now);
        info!(action = command.action.as_str(), command_id = %command.command_id, "Auto-control command");
        self.forwarder.pump_command_to_device(&command).await;
    }

    // -----------------------------------------------------------------------
    // Persistence
    // -----------------------------------------------------------------------

    async fn save_current(&self, path: StorePath, value: &Value) {
        match self.store.set_current(path, value).await {
            Ok(()) => debug!(path = %path, "Current record saved"),
            Err(e) => error!(path = %path, error = %e, "Saving current record failed"),
        }
    }

    async fn save_history(
        &self,
        path: StorePath,
        value: &Value,
        device_source: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let id = self.ids.next(now);
        let entry = serde_json::to_value(HistoryEntry::new(value, device_source, id.clone(), now))?;

        match self.store.append_history(path, &id, &entry).await {
            Ok(()) => debug!(path = %path, id = %id, "History entry saved"),
            Err(e) => error!(path = %path, id = %id, error = %e, "Saving history entry failed"),
        }
        Ok(())
    }
}

/// Records the bridge itself republished carry `data_type` next to a
/// `sensor` / `pump` / `environment` object. They come back on subscribed
/// topics and are not new readings.
fn is_canonical_record(payload: &Payload) -> bool {
    payload.get("data_type").is_some_and(Value::is_string)
        && ["sensor", "pump", "environment"]
            .iter()
            .any(|k| payload.get(*k).is_some_and(Value::is_object))
}

/// Pump commands and status envelopes the bridge sent on `control/pump` and
/// `app/pump/status`. They describe a request, not an observed pump state.
fn is_bridge_envelope(payload: &Payload) -> bool {
    matches!(
        payload.get("source").and_then(Value::as_str),
        Some(FORWARD_SOURCE | AUTO_CONTROL_SOURCE)
    )
}

fn log_reading(what: &str, record: &SensorRecord) {
    let [s1, s2] = record.readings();
    info!(
        sensor_1 = s1.value,
        sensor_1_condition = %s1.condition,
        sensor_2 = s2.value,
        sensor_2_condition = %s2.condition,
        average = ?record.sensor.average_humidity,
        "{what}"
    );
}
