//! Route-level tests: requests go through the full router (auth extractor,
//! rejection mapping, error bodies) without binding a socket.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{Request, StatusCode};
use axum::Router;
use dispatch_core::ids::{ActorId, RideId};
use dispatch_core::ride::ActorRole;
use dispatch_core::service::{DispatchService, ServiceConfig};
use dispatch_core::test_helpers::{test_route_provider, FixedOtp};
use dispatch_server::auth::JwtAuth;
use dispatch_server::router::create_router;
use dispatch_server::state::AppState;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

const SECRET: &[u8] = b"http-test-secret";
const OTP: &str = "4821";

struct TestApp {
    router: Router,
    issuer: JwtAuth,
}

impl TestApp {
    fn new() -> Self {
        let service = DispatchService::builder(ServiceConfig::default(), Arc::new(test_route_provider()))
            .with_otp_generator(Arc::new(FixedOtp::new(OTP)))
            .start()
            .expect("service");
        let state = AppState::new(Arc::new(service), JwtAuth::new(SECRET));
        Self {
            router: create_router(state),
            issuer: JwtAuth::new(SECRET),
        }
    }

    fn login(&self, role: ActorRole) -> (ActorId, String) {
        let actor_id = ActorId::new();
        let token = self
            .issuer
            .issue(actor_id, role, Duration::from_secs(300))
            .expect("token");
        (actor_id, token)
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.expect("response");
        let status = response.status();
        let bytes = response.into_body().collect().await.expect("body").to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).expect("json body")
        };
        (status, body)
    }

    async fn get(&self, uri: &str, token: Option<&str>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method("GET").uri(uri);
        if let Some(token) = token {
            builder = builder.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        self.send(builder.body(Body::empty()).expect("request")).await
    }

    async fn post(&self, uri: &str, token: Option<&str>, body: String) -> (StatusCode, Value) {
        let mut builder = Request::builder()
            .method("POST")
            .uri(uri)
            .header(CONTENT_TYPE, "application/json");
        if let Some(token) = token {
            builder = builder.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        self.send(builder.body(Body::from(body)).expect("request")).await
    }

    async fn create_ride(&self, rider_token: &str) -> Value {
        let body = json!({ "pickup": "MG Road", "destination": "Airport", "vehicleType": "car" });
        let (status, ride) = self
            .post("/rides/create", Some(rider_token), body.to_string())
            .await;
        assert_eq!(status, StatusCode::CREATED, "{ride}");
        ride
    }
}

fn ride_ref(ride: &Value) -> String {
    json!({ "rideId": ride["id"] }).to_string()
}

#[tokio::test]
async fn health_needs_no_token() {
    let app = TestApp::new();
    let (status, body) = app.get("/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert!(body["telemetry"].is_object());
}

#[tokio::test]
async fn missing_or_foreign_tokens_are_unauthenticated() {
    let app = TestApp::new();
    let body = json!({ "pickup": "MG Road", "destination": "Airport", "vehicleType": "car" }).to_string();

    let (status, error) = app.post("/rides/create", None, body.clone()).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(error["error"], "UNAUTHENTICATED");

    let forged = JwtAuth::new(b"someone-else")
        .issue(ActorId::new(), ActorRole::Rider, Duration::from_secs(60))
        .expect("token");
    let (status, _) = app.post("/rides/create", Some(&forged), body).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn routes_enforce_the_callers_role() {
    let app = TestApp::new();
    let (_, driver) = app.login(ActorRole::Driver);
    let (_, rider) = app.login(ActorRole::Rider);

    let body = json!({ "pickup": "MG Road", "destination": "Airport", "vehicleType": "car" }).to_string();
    let (status, error) = app.post("/rides/create", Some(&driver), body).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(error["error"], "FORBIDDEN");

    let ride = app.create_ride(&rider).await;
    let (status, _) = app.post("/rides/confirm", Some(&rider), ride_ref(&ride)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn ride_runs_end_to_end_over_http() {
    let app = TestApp::new();
    let (rider_id, rider) = app.login(ActorRole::Rider);
    let (driver_id, driver) = app.login(ActorRole::Driver);

    let ride = app.create_ride(&rider).await;
    assert_eq!(ride["status"], "requested");
    assert_eq!(ride["otp"], OTP);
    assert_eq!(ride["riderId"], json!(rider_id));
    let ride_id = ride["id"].as_str().expect("id").to_string();

    let (status, accepted) = app.post("/rides/confirm", Some(&driver), ride_ref(&ride)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(accepted["status"], "accepted");
    assert_eq!(accepted["driverId"], json!(driver_id));
    assert!(accepted.get("otp").is_none());

    let (status, as_driver) = app.get(&format!("/rides/{ride_id}"), Some(&driver)).await;
    assert_eq!(status, StatusCode::OK);
    assert!(as_driver.get("otp").is_none());
    let (_, as_rider) = app.get(&format!("/rides/{ride_id}"), Some(&rider)).await;
    assert_eq!(as_rider["otp"], OTP);

    let (status, error) = app
        .get(&format!("/rides/start-ride?rideId={ride_id}&otp=1234"), Some(&driver))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error["error"], "OTP_MISMATCH");

    let (status, started) = app
        .get(&format!("/rides/start-ride?rideId={ride_id}&otp={OTP}"), Some(&driver))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(started["status"], "started");

    let (status, error) = app.post("/rides/pay", Some(&rider), ride_ref(&ride)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(error["error"], "NOT_PAYABLE");

    let (status, ended) = app.post("/rides/end-ride", Some(&driver), ride_ref(&ride)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ended["status"], "completed");

    let (status, payment) = app.post("/rides/pay", Some(&rider), ride_ref(&ride)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(payment["status"], "captured");
    assert!(payment["transactionId"].as_str().expect("txn").starts_with("txn_"));

    let (status, _) = app.post("/rides/pay", Some(&rider), ride_ref(&ride)).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn second_confirm_conflicts() {
    let app = TestApp::new();
    let (_, rider) = app.login(ActorRole::Rider);
    let (_, first) = app.login(ActorRole::Driver);
    let (_, second) = app.login(ActorRole::Driver);

    let ride = app.create_ride(&rider).await;
    let (status, _) = app.post("/rides/confirm", Some(&first), ride_ref(&ride)).await;
    assert_eq!(status, StatusCode::OK);

    let (status, error) = app.post("/rides/confirm", Some(&second), ride_ref(&ride)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(error["error"], "INVALID_TRANSITION");
}

#[tokio::test]
async fn cancel_is_limited_to_the_parties() {
    let app = TestApp::new();
    let (_, rider) = app.login(ActorRole::Rider);
    let (_, stranger) = app.login(ActorRole::Rider);

    let ride = app.create_ride(&rider).await;
    let (status, _) = app.post("/rides/cancel", Some(&stranger), ride_ref(&ride)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, cancelled) = app.post("/rides/cancel", Some(&rider), ride_ref(&ride)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cancelled["status"], "cancelled");

    let (status, _) = app.post("/rides/cancel", Some(&rider), ride_ref(&ride)).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn bad_input_maps_to_client_errors() {
    let app = TestApp::new();
    let (_, rider) = app.login(ActorRole::Rider);

    let (status, error) = app.post("/rides/create", Some(&rider), "{".to_string()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error["error"], "BAD_REQUEST");

    let missing_class = json!({ "pickup": "MG Road", "destination": "Airport" }).to_string();
    let (status, _) = app.post("/rides/create", Some(&rider), missing_class).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let same_place = json!({ "pickup": "Airport", "destination": " airport ", "vehicleType": "auto" }).to_string();
    let (status, error) = app.post("/rides/create", Some(&rider), same_place).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error["error"], "VALIDATION_ERROR");

    let (status, _) = app.get("/rides/not-a-ride-id", Some(&rider)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, error) = app.get(&format!("/rides/{}", RideId::new()), Some(&rider)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(error["error"], "NOT_FOUND");
}

#[tokio::test]
async fn fare_lookup_prices_every_class() {
    let app = TestApp::new();
    let (_, rider) = app.login(ActorRole::Rider);

    let (status, fares) = app
        .get("/rides/get-fare?pickup=MG%20Road&destination=Airport", Some(&rider))
        .await;
    assert_eq!(status, StatusCode::OK);
    for class in ["auto", "car", "moto"] {
        assert!(fares[class].as_f64().expect("fare") > 0.0, "{class}: {fares}");
    }

    let (status, error) = app
        .get("/rides/get-fare?pickup=MG%20Road&destination=Atlantis", Some(&rider))
        .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(error["error"], "ROUTE_UNAVAILABLE");
}
