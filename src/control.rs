use crate::{condition::Condition, records::SensorRecord};

/// Pump decision for a freshly built sensor record.
///
/// `Some(true)` turns the pump on, `Some(false)` turns it off, `None` leaves
/// it alone. See [`decide_conditions`] for the table.
pub fn decide(record: &SensorRecord) -> Option<bool> {
    let [s1, s2] = record.readings();
    decide_conditions(s1.condition, s2.condition)
}

/// | sensors                     | decision      |
/// |-----------------------------|---------------|
/// | any dry, no wet             | `Some(true)`  |
/// | dry + wet                   | `None`        |
/// | no dry, any normal or wet   | `Some(false)` |
/// | unknown + unknown           | `None`        |
///
/// A dry/wet split means the probes disagree; nothing is actuated and the
/// anomaly alert reports both readings instead.
pub fn decide_conditions(a: Condition, b: Condition) -> Option<bool> {
    let any = |c: Condition| a == c || b == c;

    match (any(Condition::Dry), any(Condition::Wet)) {
        (true, true) => None,
        (true, false) => Some(true),
        (false, _) if any(Condition::Wet) || any(Condition::Normal) => Some(false),
        (false, _) => None,
    }
}
