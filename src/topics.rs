//! Topic surface of the bridge and the classifier that turns an inbound
//! topic string into a structured route.
//!
//! Topics are split on `/` once and matched segment by segment, so a segment
//! such as `app` only counts when it sits directly under the root.

// ---------------------------------------------------------------------------
// Topic set
// ---------------------------------------------------------------------------

/// Every concrete topic the bridge subscribes to or publishes on, derived
/// from a single root prefix (`greenhouse` by default).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    root: String,
    /// Device sensor data. Also the sync-sensors republish target.
    pub sensor_data: String,
    /// Device pump control commands.
    pub pump_control: String,
    /// Device pump status. Also the sync-pump republish target.
    pub pump_status: String,
    pub sensors_soil: String,
    pub app_sensor_data: String,
    pub app_pump_control: String,
    pub app_pump_status: String,
    pub environment_data: String,
    pub sync_sensors: String,
    pub sync_pump: String,
    pub bridge_status: String,
}

impl Default for Topics {
    fn default() -> Self {
        Self::new("greenhouse")
    }
}

impl Topics {
    pub fn new(root: &str) -> Self {
        let root = root.trim_matches('/').to_owned();
        let t = |suffix: &str| format!("{root}/{suffix}");
        Self {
            sensor_data: t("sensors/data"),
            pump_control: t("control/pump"),
            pump_status: t("pump/status"),
            sensors_soil: t("sensors/soil"),
            app_sensor_data: t("app/sensors/data"),
            app_pump_control: t("app/control/pump"),
            app_pump_status: t("app/pump/status"),
            environment_data: t("environment/data"),
            sync_sensors: t("sync/sensors"),
            sync_pump: t("sync/pump"),
            bridge_status: t("bridge/status"),
            root,
        }
    }

    /// Filters subscribed on every (re)connect.
    pub fn subscriptions(&self) -> Vec<String> {
        let r = &self.root;
        vec![
            self.sensor_data.clone(),
            self.pump_status.clone(),
            self.pump_control.clone(),
            self.sensors_soil.clone(),
            format!("{r}/sensors/+"),
            format!("{r}/status/+"),
            self.app_sensor_data.clone(),
            self.app_pump_control.clone(),
            self.app_pump_status.clone(),
            format!("{r}/app/+"),
            self.environment_data.clone(),
            self.sync_sensors.clone(),
            self.sync_pump.clone(),
        ]
    }

    /// Parse `topic` into `{domain, origin}` once. Anything outside the
    /// root, or not matching a known shape, is `Domain::Unclassified`.
    pub fn classify(&self, topic: &str) -> Route {
        let unclassified = Route { domain: Domain::Unclassified, origin: Origin::Device };

        let Some(rest) = topic
            .strip_prefix(self.root.as_str())
            .and_then(|r| r.strip_prefix('/'))
        else {
            return unclassified;
        };

        let mut segments: Vec<&str> = rest.split('/').collect();
        let origin = if segments.first() == Some(&"app") {
            segments.remove(0);
            Origin::App
        } else {
            Origin::Device
        };

        let has = |s: &str| segments.contains(&s);

        let domain = match segments.as_slice() {
            ["sync", "sensors"] if origin == Origin::Device => Domain::Sync(SyncKind::Sensors),
            ["sync", "pump"] if origin == Origin::Device => Domain::Sync(SyncKind::Pump),
            ["sync", ..] => Domain::Unclassified,
            _ if has("sensors") => Domain::Sensors,
            ["environment", "data"] => Domain::Environment,
            _ if has("pump") => Domain::Pump(if has("control") {
                PumpChannel::Control
            } else {
                PumpChannel::Status
            }),
            _ => Domain::Unclassified,
        };

        Route { domain, origin }
    }
}

// ---------------------------------------------------------------------------
// Route
// ---------------------------------------------------------------------------

/// Which party produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Device,
    App,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpChannel {
    /// A command asking the pump to change state.
    Control,
    /// A report of the pump's state.
    Status,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncKind {
    Sensors,
    Pump,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Domain {
    Sensors,
    Environment,
    Pump(PumpChannel),
    Sync(SyncKind),
    Unclassified,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    pub domain: Domain,
    pub origin: Origin,
}
