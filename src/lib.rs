//! MQTT bridge between greenhouse soil-moisture devices and the companion
//! mobile app: decodes and normalises readings, persists them, relays
//! commands in both directions and raises moisture alerts.

pub mod api;
pub mod bridge;
pub mod condition;
pub mod config;
pub mod control;
pub mod mqtt;
pub mod notify;
pub mod payload;
pub mod records;
pub mod store;
pub mod topics;
