use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::{OpenApi, ToSchema};

use super::{errors::AppError, AppState};
use crate::{mqtt::ConnectionState, store::StorePath};

/// Which "current" snapshot to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum StateKind {
    Sensor,
    SensorApp,
    Pump,
    Environment,
}

impl StateKind {
    fn path(self) -> StorePath {
        match self {
            StateKind::Sensor => StorePath::CurrentSensor,
            StateKind::SensorApp => StorePath::CurrentSensorApp,
            StateKind::Pump => StorePath::CurrentPump,
            StateKind::Environment => StorePath::CurrentEnvironment,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct BridgeInfo {
    pub state: ConnectionState,
    pub client_id: String,
}

/// Latest canonical record of one kind, or `null` if none was stored yet.
#[utoipa::path(
    get,
    path = "/state/{kind}",
    params(
        ("kind" = StateKind, Path, description = "Snapshot kind"),
    ),
    responses(
        (status = 200, description = "Latest record or null", body = Value),
        (status = 400, description = "Unknown snapshot kind"),
        (status = 500, description = "Internal server error"),
    ),
    tag = "state"
)]
pub async fn get_state(
    State(state): State<AppState>,
    Path(kind): Path<StateKind>,
) -> Result<Json<Option<Value>>, AppError> {
    let latest = state.store.latest(kind.path()).await?;
    Ok(Json(latest))
}

/// Broker connection state of this bridge instance.
#[utoipa::path(
    get,
    path = "/bridge",
    responses(
        (status = 200, description = "Bridge connection info", body = BridgeInfo),
    ),
    tag = "system"
)]
pub async fn get_bridge(State(state): State<AppState>) -> Json<BridgeInfo> {
    Json(BridgeInfo {
        state: state.link.state().await,
        client_id: state.link.client_id().to_owned(),
    })
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy"),
    ),
    tag = "system"
)]
pub async fn health() -> Json<Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

// ---------------------------------------------------------------------------
// OpenAPI document
// ---------------------------------------------------------------------------

#[derive(OpenApi)]
#[openapi(
    paths(get_state, get_bridge, health),
    components(schemas(StateKind, BridgeInfo, ConnectionState)),
    tags(
        (name = "state",  description = "Latest stored records"),
        (name = "system", description = "System endpoints"),
    ),
    info(
        title = "Greenhouse Bridge API",
        version = "0.1.0",
        description = "Read-only status of the greenhouse MQTT bridge"
    )
)]
pub struct ApiDoc;
