//! Persistence collaborator: "current" snapshots (last write wins) and
//! append-only history logs, addressed by [`StorePath`].

pub mod memory;
pub mod postgres;

use std::fmt;

use async_trait::async_trait;
use serde_json::Value;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Every location the bridge reads or writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorePath {
    CurrentSensor,
    CurrentSensorApp,
    CurrentPump,
    CurrentEnvironment,
    SensorHistory,
    PumpHistory,
    EnvironmentHistory,
    GeneralMessages,
}

impl StorePath {
    pub fn key(self) -> &'static str {
        match self {
            StorePath::CurrentSensor => "current_sensor",
            StorePath::CurrentSensorApp => "current_sensor_app",
            StorePath::CurrentPump => "current_pump",
            StorePath::CurrentEnvironment => "current_environment",
            StorePath::SensorHistory => "sensor_history",
            StorePath::PumpHistory => "pump_history",
            StorePath::EnvironmentHistory => "environment_history",
            StorePath::GeneralMessages => "general_messages",
        }
    }
}

impl fmt::Display for StorePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Overwrite the snapshot at `path`.
    async fn set_current(&self, path: StorePath, data: &Value) -> Result<(), StoreError>;

    /// Append `data` to the log at `path` under `id`.
    async fn append_history(&self, path: StorePath, id: &str, data: &Value) -> Result<(), StoreError>;

    /// The snapshot at `path`, if anything was ever written there.
    async fn latest(&self, path: StorePath) -> Result<Option<Value>, StoreError>;

    /// Push-notification targets registered by the mobile app.
    async fn device_tokens(&self) -> Result<Vec<String>, StoreError>;
}
