//! Inbound payload decoding and the typed extractors that read sensor values
//! and pump state out of the many shapes devices and the app send.
//!
//! Nothing here mutates its input or performs I/O.

use chrono::{DateTime, Utc};
use serde_json::{Map, Number, Value};
use tracing::debug;

/// A decoded inbound message body. Always a JSON object.
pub type Payload = Map<String, Value>;

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// Decode raw bytes from `topic` into a [`Payload`] and stamp it with
/// `topic`, `received_at` and `server_timestamp`.
///
/// JSON objects are used as-is. Anything else (free text, JSON scalars,
/// arrays, invalid UTF-8) is wrapped as a raw-text record and never dropped.
pub fn decode(topic: &str, bytes: &[u8], received_at: DateTime<Utc>) -> Payload {
    let text = String::from_utf8_lossy(bytes);

    let mut payload = match serde_json::from_str::<Value>(&text) {
        Ok(Value::Object(map)) => map,
        _ => {
            debug!(topic = %topic, "Non-object payload, wrapping as raw text");
            raw_text_record(topic, &text, received_at)
        }
    };

    payload.insert("topic".into(), Value::String(topic.to_owned()));
    payload.insert("received_at".into(), Value::String(received_at.to_rfc3339()));
    payload.insert(
        "server_timestamp".into(),
        Value::from(received_at.timestamp_millis()),
    );
    payload
}

fn raw_text_record(topic: &str, text: &str, received_at: DateTime<Utc>) -> Payload {
    let mut record = Map::new();
    record.insert("raw_message".into(), Value::String(text.to_owned()));
    record.insert("message_type".into(), Value::String("text".into()));
    record.insert("topic".into(), Value::String(topic.to_owned()));
    record.insert("received_at".into(), Value::String(received_at.to_rfc3339()));
    if text.contains('=') || text.contains(':') {
        record.insert("parsed_attempt".into(), Value::Object(parse_simple_format(text)));
    }
    record
}

/// Best-effort decomposition of `k=v, k=v` or `k:v, k:v` text.
///
/// `=` takes precedence when both separators appear. Segments that do not
/// split into exactly one key and one value are skipped. Values are coerced:
/// numbers, then `true`/`false`, else kept as strings.
pub fn parse_simple_format(text: &str) -> Payload {
    let (separator, strip_quotes) = if text.contains('=') {
        ('=', false)
    } else if text.contains(':') {
        (':', true)
    } else {
        return Map::new();
    };

    let mut result = Map::new();
    for segment in text.split(',') {
        let parts: Vec<&str> = segment.trim().split(separator).collect();
        let [key, value] = parts.as_slice() else {
            continue;
        };

        let (key, value) = if strip_quotes {
            (key.trim().replace('"', ""), value.trim().replace('"', ""))
        } else {
            (key.trim().to_owned(), value.trim().to_owned())
        };
        result.insert(key, coerce(&value));
    }
    result
}

fn coerce(raw: &str) -> Value {
    if let Some(n) = parse_number(raw).and_then(Number::from_f64) {
        return Value::Number(n);
    }
    match raw.to_ascii_lowercase().as_str() {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => Value::String(raw.to_owned()),
    }
}

/// Whole-string parse: unit suffixes such as `1500mV` are not numeric.
fn parse_number(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Numeric view of a JSON value: numbers and numeric strings.
pub(crate) fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64().filter(|v| v.is_finite()),
        Value::String(s) => parse_number(s),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Sensor values
// ---------------------------------------------------------------------------

const GENERIC_VALUE_KEYS: [&str; 4] = ["soil_humidity", "soil_moisture", "humidity", "value"];

/// Find the reading for `sensor_id` in `payload`. First match wins:
///
/// 1. `sensors.{sensor_id}.value`
/// 2. flat keys such as `{sensor_id}_value` or `soil_moisture_{sensor_id}`,
///    plus the generic keys when `payload.sensor_id == sensor_id`
/// 3. for `sensor_1` only, the generic keys bounded to `0..=100`
///
/// Candidates must be numeric and non-negative.
pub fn extract_sensor_value(payload: &Payload, sensor_id: &str) -> Option<f64> {
    let non_negative = |v: &Value| as_number(v).filter(|n| *n >= 0.0);

    let nested = payload
        .get("sensors")
        .and_then(Value::as_object)
        .and_then(|sensors| sensors.get(sensor_id))
        .and_then(Value::as_object)
        .and_then(|sensor| sensor.get("value"))
        .and_then(non_negative);
    if let Some(v) = nested {
        debug!(sensor_id, value = v, "Sensor value from nested sensors object");
        return Some(v);
    }

    let mut keys = vec![
        format!("{sensor_id}_value"),
        format!("{sensor_id}_humidity"),
        format!("{sensor_id}_moisture"),
        format!("soil_humidity_{sensor_id}"),
        format!("soil_moisture_{sensor_id}"),
        format!("humidity_{sensor_id}"),
        format!("value_{sensor_id}"),
    ];
    if payload.get("sensor_id").and_then(Value::as_str) == Some(sensor_id) {
        keys.extend(GENERIC_VALUE_KEYS.iter().map(|k| (*k).to_owned()));
    }

    for key in &keys {
        if let Some(v) = payload.get(key).and_then(non_negative) {
            debug!(sensor_id, key = %key, value = v, "Sensor value from flat key");
            return Some(v);
        }
    }

    // Legacy firmware reported a single percentage under a generic key.
    if sensor_id == "sensor_1" {
        for key in GENERIC_VALUE_KEYS {
            if let Some(v) = payload.get(key).and_then(non_negative).filter(|v| *v <= 100.0) {
                debug!(sensor_id, key, value = v, "Sensor value from generic fallback key");
                return Some(v);
            }
        }
    }

    None
}

/// Read the `is_active` flag the app sends alongside nested sensor values.
pub fn extract_sensor_flag(payload: &Payload, sensor_id: &str) -> Option<bool> {
    payload
        .get("sensors")?
        .as_object()?
        .get(sensor_id)?
        .as_object()?
        .get("is_active")?
        .as_bool()
}

// ---------------------------------------------------------------------------
// Pump state
// ---------------------------------------------------------------------------

const PUMP_BOOL_KEYS: [&str; 4] = ["active", "is_active", "isActive", "pump_active"];
const PUMP_TEXT_KEYS: [&str; 6] = ["status", "state", "pump_status", "pump_state", "action", "command"];
const ON_WORDS: [&str; 6] = ["on", "true", "active", "1", "start", "activate"];
const OFF_WORDS: [&str; 6] = ["off", "false", "inactive", "0", "stop", "deactivate"];

/// Decide the pump state from the dedicated status fields.
///
/// Boolean fields win outright. Text fields are case-folded and compared with
/// the on/off vocabulary; unrecognised text moves on to the next field.
pub fn extract_pump_status(payload: &Payload) -> Option<bool> {
    for key in PUMP_BOOL_KEYS {
        if let Some(Value::Bool(b)) = payload.get(key) {
            return Some(*b);
        }
    }

    for key in PUMP_TEXT_KEYS {
        let Some(word) = payload.get(key).and_then(text_of) else {
            continue;
        };
        let word = word.to_lowercase();
        if ON_WORDS.contains(&word.as_str()) {
            return Some(true);
        }
        if OFF_WORDS.contains(&word.as_str()) {
            return Some(false);
        }
    }

    None
}

/// Lower-confidence reading of a control command: any `action` / `command`
/// value that is not `on`, `start` or `activate` means off.
pub fn pump_command_fallback(payload: &Payload) -> Option<bool> {
    ["action", "command"].into_iter().find_map(|key| {
        let word = payload.get(key).and_then(text_of)?.to_lowercase();
        Some(matches!(word.as_str(), "on" | "start" | "activate"))
    })
}

/// The pump state a handler acts on: dedicated fields first, then the
/// command fallback.
pub fn resolve_pump_state(payload: &Payload) -> Option<bool> {
    extract_pump_status(payload).or_else(|| pump_command_fallback(payload))
}

fn text_of(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
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

    fn ts() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-01T10:20:30Z").unwrap().with_timezone(&Utc)
    }

    // -----------------------------------------------------------------------
    // decode
    // -----------------------------------------------------------------------

    #[test]
    fn decode_json_object_adds_metadata() {
        let p = decode("greenhouse/sensors/data", br#"{"sensor_1_value": 1500}"#, ts());
        assert_eq!(p["sensor_1_value"], json!(1500));
        assert_eq!(p["topic"], json!("greenhouse/sensors/data"));
        assert_eq!(p["received_at"], json!("2026-03-01T10:20:30+00:00"));
        assert_eq!(p["server_timestamp"], json!(ts().timestamp_millis()));
    }

    #[test]
    fn decode_free_text_is_wrapped_not_dropped() {
        let p = decode("greenhouse/misc", b"hello world", ts());
        assert_eq!(p["raw_message"], json!("hello world"));
        assert_eq!(p["message_type"], json!("text"));
        assert!(!p.contains_key("parsed_attempt"));
    }

    #[test]
    fn decode_key_value_text_gets_parsed_attempt() {
        let p = decode("greenhouse/sensors/soil", b"sensor_1_value=1500, pump=true, mode=auto", ts());
        let parsed = p["parsed_attempt"].as_object().unwrap();
        assert_eq!(parsed["sensor_1_value"], json!(1500.0));
        assert_eq!(parsed["pump"], json!(true));
        assert_eq!(parsed["mode"], json!("auto"));
    }

    #[test]
    fn decode_json_scalar_is_wrapped() {
        let p = decode("greenhouse/misc", b"42", ts());
        assert_eq!(p["raw_message"], json!("42"));
    }

    #[test]
    fn simple_format_colon_strips_quotes() {
        let m = parse_simple_format(r#""status": "ON", "level": 3"#);
        assert_eq!(m["status"], json!("ON"));
        assert_eq!(m["level"], json!(3.0));
    }

    #[test]
    fn simple_format_skips_malformed_segments() {
        let m = parse_simple_format("a=1, b, c=2=3, d=FALSE");
        assert_eq!(m.len(), 2);
        assert_eq!(m["a"], json!(1.0));
        assert_eq!(m["d"], json!(false));
    }

    #[test]
    fn simple_format_without_separators_is_empty() {
        assert!(parse_simple_format("just words").is_empty());
    }

    // -----------------------------------------------------------------------
    // extract_sensor_value
    // -----------------------------------------------------------------------

    #[test]
    fn sensor_value_nested_object() {
        let p = obj(json!({"sensors": {"sensor_1": {"value": 1000}, "sensor_2": {"value": 2000}}}));
        assert_eq!(extract_sensor_value(&p, "sensor_1"), Some(1000.0));
        assert_eq!(extract_sensor_value(&p, "sensor_2"), Some(2000.0));
    }

    #[test]
    fn sensor_value_flat_value_suffix() {
        let p = obj(json!({"sensor_2_value": 1450.5}));
        assert_eq!(extract_sensor_value(&p, "sensor_2"), Some(1450.5));
    }

    #[test]
    fn sensor_value_flat_humidity_suffix() {
        let p = obj(json!({"sensor_2_humidity": "1300"}));
        assert_eq!(extract_sensor_value(&p, "sensor_2"), Some(1300.0));
    }

    #[test]
    fn sensor_value_prefixed_keys() {
        let p = obj(json!({"soil_moisture_sensor_2": 1700, "value_sensor_1": 900}));
        assert_eq!(extract_sensor_value(&p, "sensor_2"), Some(1700.0));
        assert_eq!(extract_sensor_value(&p, "sensor_1"), Some(900.0));
    }

    #[test]
    fn sensor_value_generic_key_with_matching_sensor_id() {
        let p = obj(json!({"sensor_id": "sensor_2", "soil_moisture": 1550}));
        assert_eq!(extract_sensor_value(&p, "sensor_2"), Some(1550.0));
    }

    #[test]
    fn sensor_value_generic_key_ignored_for_other_sensor() {
        let p = obj(json!({"sensor_id": "sensor_1", "soil_moisture": 1550}));
        assert_eq!(extract_sensor_value(&p, "sensor_2"), None);
    }

    #[test]
    fn sensor_1_generic_fallback_bounded_to_percentage() {
        assert_eq!(extract_sensor_value(&obj(json!({"humidity": 55})), "sensor_1"), Some(55.0));
        assert_eq!(extract_sensor_value(&obj(json!({"humidity": 1500})), "sensor_1"), None);
        assert_eq!(extract_sensor_value(&obj(json!({"humidity": 55})), "sensor_2"), None);
    }

    #[test]
    fn sensor_value_with_matching_id_is_not_percentage_bounded() {
        let p = obj(json!({"sensor_id": "sensor_1", "value": 1500}));
        assert_eq!(extract_sensor_value(&p, "sensor_1"), Some(1500.0));
    }

    #[test]
    fn sensor_value_negative_or_non_numeric_is_none() {
        for v in [json!(-1), json!("abc"), json!(true), json!(null), json!([1]), json!("NaN")] {
            let p = obj(json!({"sensor_1_value": v.clone(), "sensors": {"sensor_1": {"value": v}}}));
            assert_eq!(extract_sensor_value(&p, "sensor_1"), None);
        }
    }

    #[test]
    fn invalid_nested_value_falls_through_to_flat_keys() {
        let p = obj(json!({"sensors": {"sensor_1": {"value": -5}}, "sensor_1_moisture": 1400}));
        assert_eq!(extract_sensor_value(&p, "sensor_1"), Some(1400.0));
    }

    #[test]
    fn extraction_leaves_input_untouched() {
        let p = obj(json!({"sensor_id": "sensor_1", "value": 10}));
        let before = p.clone();
        let _ = extract_sensor_value(&p, "sensor_1");
        let _ = extract_pump_status(&p);
        assert_eq!(p, before);
    }

    #[test]
    fn sensor_flag_reads_nested_is_active() {
        let p = obj(json!({"sensors": {"sensor_1": {"value": 10, "is_active": false}}}));
        assert_eq!(extract_sensor_flag(&p, "sensor_1"), Some(false));
        assert_eq!(extract_sensor_flag(&p, "sensor_2"), None);
    }

    // -----------------------------------------------------------------------
    // pump state
    // -----------------------------------------------------------------------

    #[test]
    fn pump_bool_fields() {
        assert_eq!(extract_pump_status(&obj(json!({"is_active": true}))), Some(true));
        assert_eq!(extract_pump_status(&obj(json!({"pump_active": false}))), Some(false));
        assert_eq!(extract_pump_status(&obj(json!({"isActive": true, "status": "off"}))), Some(true));
    }

    #[test]
    fn pump_bool_key_with_string_value_is_not_a_bool() {
        assert_eq!(extract_pump_status(&obj(json!({"active": "yes"}))), None);
    }

    #[test]
    fn pump_vocabulary_is_total() {
        for w in ON_WORDS {
            assert_eq!(extract_pump_status(&obj(json!({"status": w.to_uppercase()}))), Some(true), "{w}");
        }
        for w in OFF_WORDS {
            assert_eq!(extract_pump_status(&obj(json!({"state": w}))), Some(false), "{w}");
        }
    }

    #[test]
    fn pump_numeric_status() {
        assert_eq!(extract_pump_status(&obj(json!({"status": 1}))), Some(true));
        assert_eq!(extract_pump_status(&obj(json!({"status": 0}))), Some(false));
    }

    #[test]
    fn pump_unrecognised_field_moves_to_next() {
        let p = obj(json!({"status": "pending", "command": "stop"}));
        assert_eq!(extract_pump_status(&p), Some(false));
    }

    #[test]
    fn pump_unrecognised_or_absent_is_none() {
        assert_eq!(extract_pump_status(&obj(json!({"status": "toggle"}))), None);
        assert_eq!(extract_pump_status(&obj(json!({}))), None);
        assert_eq!(extract_pump_status(&obj(json!({"status": null}))), None);
    }

    #[test]
    fn command_fallback_maps_unknown_words_to_off() {
        let p = obj(json!({"command": "toggle"}));
        assert_eq!(extract_pump_status(&p), None);
        assert_eq!(resolve_pump_state(&p), Some(false));
        assert_eq!(resolve_pump_state(&obj(json!({"action": "ON"}))), Some(true));
        assert_eq!(resolve_pump_state(&obj(json!({"mode": "x"}))), None);
    }

    #[test]
    fn values_with_unit_suffix_are_not_numeric() {
        assert_eq!(as_number(&json!("1500mV")), None);
        assert_eq!(as_number(&json!(" 1500 ")), Some(1500.0));

        let p = obj(json!({"sensor_1_value": "1500mV", "sensor_2_value": "1400"}));
        assert_eq!(extract_sensor_value(&p, "sensor_1"), None);
        assert_eq!(extract_sensor_value(&p, "sensor_2"), Some(1400.0));
    }
}
