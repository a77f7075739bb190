use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use dispatch_core::ids::RideId;
use dispatch_core::pricing::FareTable;
use dispatch_core::ride::{ActorRole, PaymentRecord, RideView, RiderRideView};

use crate::auth::AuthenticatedActor;
use crate::error::AppError;
use crate::models::{CreateRideRequest, FareQuery, RideRef, StartRideQuery};
use crate::state::AppState;

pub async fn create_ride(
    State(state): State<AppState>,
    actor: AuthenticatedActor,
    payload: Result<Json<CreateRideRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<RiderRideView>), AppError> {
    actor.require(ActorRole::Rider)?;
    let Json(request) = payload?;
    let ride = state
        .service
        .lifecycle()
        .create_ride(
            actor.actor_id,
            &request.pickup,
            &request.destination,
            request.vehicle_type,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(ride.rider_view())))
}

pub async fn get_fare(
    State(state): State<AppState>,
    actor: AuthenticatedActor,
    query: Result<Query<FareQuery>, QueryRejection>,
) -> Result<Json<FareTable>, AppError> {
    actor.require(ActorRole::Rider)?;
    let Query(query) = query?;
    let fares = state
        .service
        .lifecycle()
        .estimate_fares(&query.pickup, &query.destination)
        .await?;
    Ok(Json(fares))
}

pub async fn confirm_ride(
    State(state): State<AppState>,
    actor: AuthenticatedActor,
    payload: Result<Json<RideRef>, JsonRejection>,
) -> Result<Json<RideView>, AppError> {
    actor.require(ActorRole::Driver)?;
    let Json(RideRef { ride_id }) = payload?;
    let ride = state
        .service
        .lifecycle()
        .accept_ride(ride_id, actor.actor_id)
        .await?;
    Ok(Json(ride.public_view()))
}

pub async fn start_ride(
    State(state): State<AppState>,
    actor: AuthenticatedActor,
    query: Result<Query<StartRideQuery>, QueryRejection>,
) -> Result<Json<RideView>, AppError> {
    actor.require(ActorRole::Driver)?;
    let Query(query) = query?;
    let ride = state
        .service
        .lifecycle()
        .start_ride(query.ride_id, actor.actor_id, &query.otp)
        .await?;
    Ok(Json(ride.public_view()))
}

pub async fn end_ride(
    State(state): State<AppState>,
    actor: AuthenticatedActor,
    payload: Result<Json<RideRef>, JsonRejection>,
) -> Result<Json<RideView>, AppError> {
    actor.require(ActorRole::Driver)?;
    let Json(RideRef { ride_id }) = payload?;
    let ride = state
        .service
        .lifecycle()
        .end_ride(ride_id, actor.actor_id)
        .await?;
    Ok(Json(ride.public_view()))
}

pub async fn cancel_ride(
    State(state): State<AppState>,
    actor: AuthenticatedActor,
    payload: Result<Json<RideRef>, JsonRejection>,
) -> Result<Json<RideView>, AppError> {
    let Json(RideRef { ride_id }) = payload?;
    let ride = state
        .service
        .lifecycle()
        .cancel_ride(ride_id, actor.actor_id)
        .await?;
    Ok(Json(ride.public_view()))
}

/// The requesting rider also gets the OTP back; everyone else the public view.
pub async fn get_ride(
    State(state): State<AppState>,
    actor: AuthenticatedActor,
    ride_id: Result<Path<RideId>, PathRejection>,
) -> Result<Response, AppError> {
    let Path(ride_id) = ride_id?;
    let ride = state
        .service
        .lifecycle()
        .view_ride(ride_id, actor.actor_id, actor.role)
        .await?;
    if ride.rider_id == actor.actor_id {
        Ok(Json(ride.rider_view()).into_response())
    } else {
        Ok(Json(ride.public_view()).into_response())
    }
}

pub async fn pay_ride(
    State(state): State<AppState>,
    actor: AuthenticatedActor,
    payload: Result<Json<RideRef>, JsonRejection>,
) -> Result<Json<PaymentRecord>, AppError> {
    actor.require(ActorRole::Rider)?;
    let Json(RideRef { ride_id }) = payload?;
    let record = state
        .service
        .lifecycle()
        .settle_ride(ride_id, actor.actor_id)
        .await?;
    Ok(Json(record))
}
