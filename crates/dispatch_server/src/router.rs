use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{health, rides, ws};
use crate::state::AppState;

pub fn create_router(state: AppState) -> Router {
    let ride_routes = Router::new()
        .route("/create", post(rides::create_ride))
        .route("/get-fare", get(rides::get_fare))
        .route("/confirm", post(rides::confirm_ride))
        .route("/start-ride", get(rides::start_ride))
        .route("/end-ride", post(rides::end_ride))
        .route("/cancel", post(rides::cancel_ride))
        .route("/pay", post(rides::pay_ride))
        .route("/{id}", get(rides::get_ride));

    Router::new()
        .nest("/rides", ride_routes)
        .route("/health", get(health::health))
        .route("/ws", get(ws::ws_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
