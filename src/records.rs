//! Canonical records written to the store and forwarded between parties.
//!
//! Field names are the store schema the mobile app reads, so they stay
//! snake_case and stable.

use std::sync::Mutex;

use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

use crate::{
    condition::{Condition, Thresholds},
    payload::{self, Payload},
    topics::Origin,
};

pub const SENSOR_1: &str = "sensor_1";
pub const SENSOR_2: &str = "sensor_2";

/// Who produced the data a record was built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    Device,
    MobileApp,
}

impl Source {
    pub fn as_str(self) -> &'static str {
        match self {
            Source::Device => "device",
            Source::MobileApp => "mobile_app",
        }
    }
}

impl From<Origin> for Source {
    fn from(origin: Origin) -> Self {
        match origin {
            Origin::Device => Source::Device,
            Origin::App => Source::MobileApp,
        }
    }
}

// ---------------------------------------------------------------------------
// Sensor record
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SensorReading {
    pub sensor_id: String,
    /// `0.0` when no value could be extracted.
    pub value: f64,
    pub is_active: bool,
    pub condition: Condition,
}

impl SensorReading {
    /// Readings that take part in the average: active and above zero, so
    /// zero-valued placeholders are left out.
    fn counts(&self) -> bool {
        self.is_active && self.value > 0.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SensorSet {
    pub soil_sensor_1: SensorReading,
    pub soil_sensor_2: SensorReading,
    /// Present iff at least one reading counts. Rounded to one decimal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub average_humidity: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overall_condition: Option<Condition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SensorRecord {
    pub sensor: SensorSet,
    /// Unix milliseconds.
    pub timestamp: i64,
    pub updated_at: DateTime<Utc>,
    pub source: Source,
    pub data_type: String,
}

impl SensorRecord {
    pub fn readings(&self) -> [&SensorReading; 2] {
        [&self.sensor.soil_sensor_1, &self.sensor.soil_sensor_2]
    }
}

// ---------------------------------------------------------------------------
// Pump record
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PumpStatus {
    On,
    Off,
}

impl From<bool> for PumpStatus {
    fn from(active: bool) -> Self {
        if active {
            PumpStatus::On
        } else {
            PumpStatus::Off
        }
    }
}

impl PumpStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PumpStatus::On => "on",
            PumpStatus::Off => "off",
        }
    }
}

/// `status` is always derived from `is_active`; the fields are private so
/// the pair cannot drift apart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct PumpState {
    is_active: bool,
    status: PumpStatus,
    last_changed: DateTime<Utc>,
}

impl PumpState {
    pub fn new(is_active: bool, last_changed: DateTime<Utc>) -> Self {
        Self { is_active, status: is_active.into(), last_changed }
    }

    pub fn is_active(&self) -> bool {
        self.is_active
    }

    pub fn status(&self) -> PumpStatus {
        self.status
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct PumpSet {
    pub water_pump: PumpState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct PumpRecord {
    pub pump: PumpSet,
    pub timestamp: i64,
    pub updated_at: DateTime<Utc>,
    pub source: String,
    pub data_type: String,
    pub command_id: Option<String>,
}

// ---------------------------------------------------------------------------
// Environment record
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Environment {
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub soil_moisture: Option<f64>,
    pub light_level: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct EnvironmentRecord {
    pub environment: Environment,
    pub timestamp: i64,
    pub updated_at: DateTime<Utc>,
    pub source: Source,
    pub data_type: String,
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Turns decoded payloads into canonical records. Holds only the
/// calibration; every call is pure.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecordBuilder {
    thresholds: Thresholds,
}

impl RecordBuilder {
    pub fn new(thresholds: Thresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }

    /// Build the two-slot sensor record, or `None` when neither sensor
    /// yields a value.
    pub fn sensor_record(
        &self,
        payload: &Payload,
        origin: Origin,
        now: DateTime<Utc>,
    ) -> Option<SensorRecord> {
        let v1 = payload::extract_sensor_value(payload, SENSOR_1);
        let v2 = payload::extract_sensor_value(payload, SENSOR_2);
        if v1.is_none() && v2.is_none() {
            return match origin {
                Origin::App if is_single_sensor(payload) => {
                    Some(self.single_sensor_record(payload, now))
                }
                _ => None,
            };
        }

        let reading = |sensor_id: &str, value: Option<f64>| {
            // The app reports its own activity flag; devices are active when
            // they produced a value.
            let is_active = match origin {
                Origin::App => payload::extract_sensor_flag(payload, sensor_id)
                    .unwrap_or(value.is_some()),
                Origin::Device => value.is_some(),
            };
            SensorReading {
                sensor_id: sensor_id.to_owned(),
                value: value.unwrap_or(0.0),
                is_active,
                condition: self.thresholds.classify(value),
            }
        };

        let soil_sensor_1 = reading(SENSOR_1, v1);
        let soil_sensor_2 = reading(SENSOR_2, v2);

        let counted: Vec<f64> = [&soil_sensor_1, &soil_sensor_2]
            .into_iter()
            .filter(|r| r.counts())
            .map(|r| r.value)
            .collect();
        let average_humidity = (!counted.is_empty())
            .then(|| round1(counted.iter().sum::<f64>() / counted.len() as f64));
        let overall_condition = average_humidity.map(|avg| self.thresholds.classify(Some(avg)));

        let data_type = match origin {
            Origin::Device => "sensor_reading",
            Origin::App => "app_sensor_update",
        };

        Some(SensorRecord {
            sensor: SensorSet { soil_sensor_1, soil_sensor_2, average_humidity, overall_condition },
            timestamp: now.timestamp_millis(),
            updated_at: now,
            source: origin.into(),
            data_type: data_type.to_owned(),
        })
    }

    /// The app's one-probe format, `{sensor_type?, sensor_id?, value?}`. The
    /// reading fills slot 1; slot 2 is reported inactive.
    fn single_sensor_record(&self, payload: &Payload, now: DateTime<Utc>) -> SensorRecord {
        let value = payload.get("value").and_then(payload::as_number);
        let soil_sensor_1 = SensorReading {
            sensor_id: payload
                .get("sensor_id")
                .and_then(Value::as_str)
                .unwrap_or("mobile_sensor")
                .to_owned(),
            value: value.unwrap_or(0.0),
            is_active: true,
            condition: self.thresholds.classify(value),
        };
        let soil_sensor_2 = SensorReading {
            sensor_id: SENSOR_2.to_owned(),
            value: 0.0,
            is_active: false,
            condition: Condition::Unknown,
        };

        let average_humidity = soil_sensor_1.counts().then_some(soil_sensor_1.value);
        let overall_condition = average_humidity.map(|avg| self.thresholds.classify(Some(avg)));

        SensorRecord {
            sensor: SensorSet { soil_sensor_1, soil_sensor_2, average_humidity, overall_condition },
            timestamp: now.timestamp_millis(),
            updated_at: now,
            source: Source::MobileApp,
            data_type: "single_sensor_update".to_owned(),
        }
    }

    /// Build the pump record for a resolved pump state.
    pub fn pump_record(
        &self,
        is_active: bool,
        payload: &Payload,
        origin: Origin,
        now: DateTime<Utc>,
    ) -> PumpRecord {
        let source = match origin {
            Origin::App => Source::MobileApp.as_str().to_owned(),
            Origin::Device => payload
                .get("source")
                .and_then(Value::as_str)
                .unwrap_or(Source::Device.as_str())
                .to_owned(),
        };

        PumpRecord {
            pump: PumpSet { water_pump: PumpState::new(is_active, now) },
            timestamp: now.timestamp_millis(),
            updated_at: now,
            source,
            data_type: "pump_status_update".to_owned(),
            command_id: command_id(payload),
        }
    }

    /// Build the environment record, or `None` when no metric is present.
    pub fn environment_record(&self, payload: &Payload, now: DateTime<Utc>) -> Option<EnvironmentRecord> {
        let metric = |key: &str| payload.get(key).and_then(payload::as_number);
        let environment = Environment {
            temperature: metric("temperature"),
            humidity: metric("humidity"),
            soil_moisture: metric("soil_moisture"),
            light_level: metric("light_level"),
        };

        let Environment { temperature, humidity, soil_moisture, light_level } = &environment;
        if [temperature, humidity, soil_moisture, light_level].iter().all(|m| m.is_none()) {
            return None;
        }

        Some(EnvironmentRecord {
            environment,
            timestamp: now.timestamp_millis(),
            updated_at: now,
            source: Source::MobileApp,
            data_type: "environment_reading".to_owned(),
        })
    }
}

fn is_single_sensor(payload: &Payload) -> bool {
    payload.get("sensor_type").is_some_and(|v| !v.is_null()) || payload.contains_key("value")
}

/// `command_id` as sent, numbers rendered as text.
pub fn command_id(payload: &Payload) -> Option<String> {
    match payload.get("command_id")? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

// ---------------------------------------------------------------------------
// History
// ---------------------------------------------------------------------------

/// A record as appended to a history log.
#[derive(Debug, Serialize)]
pub struct HistoryEntry<'a, T: Serialize> {
    #[serde(flatten)]
    pub record: &'a T,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_source: Option<&'a str>,
    pub id: String,
    pub recorded_at: DateTime<Utc>,
    /// `YYYY-MM-DD`, UTC.
    pub date_key: String,
    pub hour: u32,
    pub minute: u32,
}

impl<'a, T: Serialize> HistoryEntry<'a, T> {
    pub fn new(record: &'a T, device_source: Option<&'a str>, id: String, now: DateTime<Utc>) -> Self {
        Self {
            record,
            device_source,
            id,
            recorded_at: now,
            date_key: now.format("%Y-%m-%d").to_string(),
            hour: now.hour(),
            minute: now.minute(),
        }
    }
}

/// Time-based history ids: `{unix_millis}_{seq}`, where `seq` counts
/// entries generated within the same millisecond.
#[derive(Debug, Default)]
pub struct HistoryIds {
    last: Mutex<(i64, u32)>,
}

impl HistoryIds {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self, now: DateTime<Utc>) -> String {
        let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
        let millis = now.timestamp_millis();
        // A clock that steps backwards keeps counting on the last millisecond.
        if millis > last.0 {
            *last = (millis, 0);
        } else {
            last.1 += 1;
        }
        format!("{}_{:03}", last.0, last.1)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn obj(v: Value) -> Payload {
        match v {
            Value::Object(m) => m,
            _ => panic!("test payload must be an object"),
        }
    }

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-01T10:20:30.123Z").unwrap().with_timezone(&Utc)
    }

    fn builder() -> RecordBuilder {
        RecordBuilder::default()
    }

    #[test]
    fn device_record_has_both_slots_and_conditions() {
        let p = obj(json!({"sensors": {"sensor_1": {"value": 1000}, "sensor_2": {"value": 2000}}}));
        let r = builder().sensor_record(&p, Origin::Device, now()).unwrap();
        assert_eq!(r.sensor.soil_sensor_1.condition, Condition::Dry);
        assert_eq!(r.sensor.soil_sensor_2.condition, Condition::Wet);
        assert_eq!(r.sensor.average_humidity, Some(1500.0));
        assert_eq!(r.sensor.overall_condition, Some(Condition::Normal));
        assert_eq!(r.source, Source::Device);
        assert_eq!(r.data_type, "sensor_reading");
    }

    #[test]
    fn missing_sensor_defaults_to_inactive_zero_unknown() {
        let p = obj(json!({"sensor_1_value": 1333.33}));
        let r = builder().sensor_record(&p, Origin::Device, now()).unwrap();
        let s2 = &r.sensor.soil_sensor_2;
        assert_eq!(s2.value, 0.0);
        assert!(!s2.is_active);
        assert_eq!(s2.condition, Condition::Unknown);
        assert_eq!(r.sensor.average_humidity, Some(1333.3));
    }

    #[test]
    fn no_values_builds_nothing() {
        let p = obj(json!({"temperature": 21}));
        assert!(builder().sensor_record(&p, Origin::Device, now()).is_none());
    }

    #[test]
    fn zero_values_are_excluded_from_average() {
        let p = obj(json!({"sensor_1_value": 0, "sensor_2_value": 0}));
        let r = builder().sensor_record(&p, Origin::Device, now()).unwrap();
        assert!(r.sensor.soil_sensor_1.is_active);
        assert_eq!(r.sensor.average_humidity, None);
        assert_eq!(r.sensor.overall_condition, None);
    }

    #[test]
    fn app_record_honours_is_active_flag() {
        let p = obj(json!({"sensors": {
            "sensor_1": {"value": 1400, "is_active": false},
            "sensor_2": {"value": 1600, "is_active": true}
        }}));
        let r = builder().sensor_record(&p, Origin::App, now()).unwrap();
        assert!(!r.sensor.soil_sensor_1.is_active);
        assert_eq!(r.sensor.average_humidity, Some(1600.0));
        assert_eq!(r.source, Source::MobileApp);
        assert_eq!(r.data_type, "app_sensor_update");
    }

    #[test]
    fn app_single_sensor_fills_slot_one() {
        let p = obj(json!({"sensor_type": "soil", "value": 1500}));
        let r = builder().sensor_record(&p, Origin::App, now()).unwrap();
        let [s1, s2] = r.readings();
        assert_eq!(s1.sensor_id, "mobile_sensor");
        assert_eq!(s1.value, 1500.0);
        assert!(s1.is_active);
        assert_eq!(s1.condition, Condition::Normal);
        assert!(!s2.is_active);
        assert_eq!(s2.condition, Condition::Unknown);
        assert_eq!(r.sensor.average_humidity, Some(1500.0));
        assert_eq!(r.data_type, "single_sensor_update");
        assert_eq!(r.source, Source::MobileApp);
    }

    #[test]
    fn app_single_sensor_without_value_is_unknown() {
        let p = obj(json!({"sensor_type": "soil", "sensor_id": "bed_3"}));
        let r = builder().sensor_record(&p, Origin::App, now()).unwrap();
        assert_eq!(r.sensor.soil_sensor_1.sensor_id, "bed_3");
        assert_eq!(r.sensor.soil_sensor_1.condition, Condition::Unknown);
        assert_eq!(r.sensor.average_humidity, None);
    }

    #[test]
    fn single_sensor_shape_from_device_builds_nothing() {
        let p = obj(json!({"sensor_type": "soil", "value": 1500}));
        assert!(builder().sensor_record(&p, Origin::Device, now()).is_none());
    }

    #[test]
    fn sensor_record_serialises_store_schema() {
        let p = obj(json!({"sensor_1_value": 1500}));
        let r = builder().sensor_record(&p, Origin::Device, now()).unwrap();
        let v = serde_json::to_value(&r).unwrap();
        assert_eq!(v["sensor"]["soil_sensor_1"]["condition"], json!("normal"));
        assert_eq!(v["sensor"]["soil_sensor_2"]["sensor_id"], json!("sensor_2"));
        assert_eq!(v["source"], json!("device"));
        assert_eq!(v["timestamp"], json!(now().timestamp_millis()));
    }

    #[test]
    fn absent_average_is_not_serialised() {
        let p = obj(json!({"sensor_1_value": 0}));
        let r = builder().sensor_record(&p, Origin::Device, now()).unwrap();
        let v = serde_json::to_value(&r).unwrap();
        assert!(v["sensor"].get("average_humidity").is_none());
        assert!(v["sensor"].get("overall_condition").is_none());
    }

    #[test]
    fn pump_status_mirrors_flag() {
        let p = obj(json!({"status": "on", "command_id": 42}));
        let r = builder().pump_record(true, &p, Origin::Device, now());
        assert!(r.pump.water_pump.is_active());
        assert_eq!(r.pump.water_pump.status(), PumpStatus::On);
        assert_eq!(r.command_id.as_deref(), Some("42"));
        assert_eq!(r.source, "device");

        let v = serde_json::to_value(&builder().pump_record(false, &p, Origin::App, now())).unwrap();
        assert_eq!(v["pump"]["water_pump"]["status"], json!("off"));
        assert_eq!(v["pump"]["water_pump"]["is_active"], json!(false));
        assert_eq!(v["source"], json!("mobile_app"));
    }

    #[test]
    fn pump_source_from_payload_for_device_topics() {
        let p = obj(json!({"status": "on", "source": "esp32"}));
        assert_eq!(builder().pump_record(true, &p, Origin::Device, now()).source, "esp32");
    }

    #[test]
    fn environment_record_reads_metrics() {
        let p = obj(json!({"temperature": 24.5, "humidity": "61", "light_level": 0}));
        let r = builder().environment_record(&p, now()).unwrap();
        assert_eq!(r.environment.temperature, Some(24.5));
        assert_eq!(r.environment.humidity, Some(61.0));
        assert_eq!(r.environment.soil_moisture, None);
        assert_eq!(r.environment.light_level, Some(0.0));
        assert!(builder().environment_record(&obj(json!({"x": 1})), now()).is_none());
    }

    #[test]
    fn history_entry_flattens_record() {
        let rec = json!({"a": 1});
        let e = HistoryEntry::new(&rec, Some("esp32"), "1_000".into(), now());
        let v = serde_json::to_value(&e).unwrap();
        assert_eq!(v["a"], json!(1));
        assert_eq!(v["id"], json!("1_000"));
        assert_eq!(v["device_source"], json!("esp32"));
        assert_eq!(v["date_key"], json!("2026-03-01"));
        assert_eq!(v["hour"], json!(10));
        assert_eq!(v["minute"], json!(20));
    }

    #[test]
    fn history_ids_are_distinct_within_a_millisecond() {
        let ids = HistoryIds::new();
        let a = ids.next(now());
        let b = ids.next(now());
        assert_ne!(a, b);
        assert_eq!(a, format!("{}_000", now().timestamp_millis()));
        assert_eq!(b, format!("{}_001", now().timestamp_millis()));
    }

    #[test]
    fn history_ids_survive_clock_stepping_back() {
        let ids = HistoryIds::new();
        let later = now() + chrono::Duration::milliseconds(5);
        let a = ids.next(later);
        let b = ids.next(now());
        assert_ne!(a, b);
    }
}
