//! Ride document, its status machine, and the projections sent to clients.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::RideError;
use crate::ids::{ActorId, RideId};
use crate::pricing::VehicleClass;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActorRole {
    Rider,
    Driver,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RideStatus {
    Requested,
    Accepted,
    Started,
    Completed,
    Cancelled,
}

impl RideStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RideStatus::Requested => "requested",
            RideStatus::Accepted => "accepted",
            RideStatus::Started => "started",
            RideStatus::Completed => "completed",
            RideStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RideStatus::Completed | RideStatus::Cancelled)
    }

    /// Forward order `Requested → Accepted → Started → Completed`, with
    /// `Cancelled` reachable from `Requested` and `Accepted` only.
    pub fn can_transition_to(self, next: RideStatus) -> bool {
        use RideStatus::*;
        matches!(
            (self, next),
            (Requested, Accepted)
                | (Accepted, Started)
                | (Started, Completed)
                | (Requested, Cancelled)
                | (Accepted, Cancelled)
        )
    }
}

impl fmt::Display for RideStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Captured,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRecord {
    pub status: PaymentStatus,
    pub amount: f64,
    pub transaction_id: Option<String>,
    pub failure_reason: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl PaymentRecord {
    pub fn pending(amount: f64) -> Self {
        Self {
            status: PaymentStatus::Pending,
            amount,
            transaction_id: None,
            failure_reason: None,
            updated_at: Utc::now(),
        }
    }

    pub fn captured(amount: f64, transaction_id: String) -> Self {
        Self {
            status: PaymentStatus::Captured,
            transaction_id: Some(transaction_id),
            ..Self::pending(amount)
        }
    }

    pub fn failed(amount: f64, reason: String) -> Self {
        Self {
            status: PaymentStatus::Failed,
            failure_reason: Some(reason),
            ..Self::pending(amount)
        }
    }
}

/// Canonical ride document as persisted in the [`RideStore`](crate::store::RideStore).
///
/// Never serialize this to a client directly: use [`Ride::public_view`] or
/// [`Ride::rider_view`] so the OTP only reaches the rider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ride {
    pub id: RideId,
    pub rider_id: ActorId,
    pub driver_id: Option<ActorId>,
    pub pickup: String,
    pub destination: String,
    pub vehicle_class: VehicleClass,
    pub fare: f64,
    /// Live until consumed by the `Accepted → Started` transition.
    pub otp: Option<String>,
    pub status: RideStatus,
    pub payment: Option<PaymentRecord>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Ride {
    pub fn new(
        rider_id: ActorId,
        pickup: impl Into<String>,
        destination: impl Into<String>,
        vehicle_class: VehicleClass,
        fare: f64,
        otp: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: RideId::new(),
            rider_id,
            driver_id: None,
            pickup: pickup.into(),
            destination: destination.into(),
            vehicle_class,
            fare,
            otp: Some(otp),
            status: RideStatus::Requested,
            payment: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Move to `next`, enforcing the fixed status order.
    pub fn transition(&mut self, next: RideStatus) -> Result<(), RideError> {
        if !self.status.can_transition_to(next) {
            return Err(RideError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn involves(&self, actor_id: ActorId) -> bool {
        self.rider_id == actor_id || self.driver_id == Some(actor_id)
    }

    pub fn public_view(&self) -> RideView {
        RideView {
            id: self.id,
            rider_id: self.rider_id,
            driver_id: self.driver_id,
            pickup: self.pickup.clone(),
            destination: self.destination.clone(),
            vehicle_class: self.vehicle_class,
            fare: self.fare,
            status: self.status,
            payment: self.payment.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    pub fn rider_view(&self) -> RiderRideView {
        RiderRideView {
            ride: self.public_view(),
            otp: self.otp.clone(),
        }
    }
}

/// Ride as seen by drivers and by every push event. Carries no OTP.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RideView {
    pub id: RideId,
    pub rider_id: ActorId,
    pub driver_id: Option<ActorId>,
    pub pickup: String,
    pub destination: String,
    pub vehicle_class: VehicleClass,
    pub fare: f64,
    pub status: RideStatus,
    pub payment: Option<PaymentRecord>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Ride as returned to the rider who requested it: the public view plus the
/// OTP the rider reads out to the driver at pickup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiderRideView {
    #[serde(flatten)]
    pub ride: RideView,
    pub otp: Option<String>,
}
