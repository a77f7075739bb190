use dispatch_core::ids::{ActorId, RideId};
use dispatch_core::pricing::VehicleClass;
use dispatch_core::ride::ActorRole;
use dispatch_core::telemetry::TelemetrySnapshot;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRideRequest {
    pub pickup: String,
    pub destination: String,
    pub vehicle_type: VehicleClass,
}

#[derive(Debug, Deserialize)]
pub struct FareQuery {
    pub pickup: String,
    pub destination: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RideRef {
    pub ride_id: RideId,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRideQuery {
    pub ride_id: RideId,
    pub otp: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub telemetry: TelemetrySnapshot,
}

#[derive(Debug, Deserialize)]
pub struct WsParams {
    pub token: Option<String>,
}

/// Frame received on the WebSocket. `data` is decoded per event.
#[derive(Debug, Deserialize)]
pub struct InboundFrame {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinData {
    pub actor_id: ActorId,
    pub actor_type: ActorRole,
}

#[derive(Debug, Deserialize)]
pub struct Coordinates {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationUpdateData {
    pub actor_id: ActorId,
    pub location: Option<Coordinates>,
}
