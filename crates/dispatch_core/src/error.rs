//! Error taxonomy for ride lifecycle operations.
//!
//! Delivery and dispatch failures have their own types
//! ([`DeliveryFailure`](crate::notify::DeliveryFailure),
//! [`DispatchError`](crate::dispatch::DispatchError)): they are logged and
//! never surface to the caller of a lifecycle operation.

use thiserror::Error;

use crate::ids::{ActorId, RideId};
use crate::ride::RideStatus;
use crate::routing::RouteError;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum RideError {
    /// Malformed input, rejected before any state change.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("ride {0} not found")]
    NotFound(RideId),

    /// The actor is not a party allowed to perform this operation.
    #[error("actor {actor_id} is not allowed to act on ride {ride_id}")]
    Unauthorized { ride_id: RideId, actor_id: ActorId },

    #[error("cannot move ride from {from} to {to}")]
    InvalidTransition { from: RideStatus, to: RideStatus },

    #[error("otp does not match")]
    OtpMismatch,

    /// Driver already holds another accepted or started ride.
    #[error("driver {driver_id} already has active ride {ride_id}")]
    DriverBusy { driver_id: ActorId, ride_id: RideId },

    #[error("route unavailable: {0}")]
    RouteUnavailable(#[from] RouteError),

    #[error("ride {ride_id} cannot be paid: {reason}")]
    NotPayable { ride_id: RideId, reason: &'static str },

    #[error("payment declined: {0}")]
    PaymentDeclined(String),

    /// Gateway unreachable or timed out. The capture may be retried.
    #[error("payment gateway unavailable: {0}")]
    PaymentUnavailable(String),

    /// Storage backend failure. Callers only see a generic error.
    #[error("ride store failure: {0}")]
    Store(String),
}
