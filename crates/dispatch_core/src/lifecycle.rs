//! Ride lifecycle: request, accept, start, end, cancel, settle.
//!
//! Every operation validates and writes inside one [`RideStore::update`], so
//! a failed call leaves the stored ride untouched and two racing calls can
//! never both succeed. Push notifications go out after the write and never
//! change the result.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::dispatch::{DispatchHandle, DispatchRequest};
use crate::error::RideError;
use crate::ids::{ActorId, RideId};
use crate::notify::{DeliveryFailure, Notifier, PushEvent};
use crate::payment::{ApprovingPaymentGateway, PaymentError, PaymentGateway, PaymentRequest};
use crate::pricing::{FareEstimator, FareTable, VehicleClass};
use crate::ride::{ActorRole, PaymentRecord, PaymentStatus, Ride, RideStatus};
use crate::spatial::GeoIndex;
use crate::store::RideStore;
use crate::telemetry::DispatchTelemetry;

/// What to do when a driver accepts while already holding an active ride.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActiveRidePolicy {
    /// Fail with [`RideError::DriverBusy`].
    #[default]
    Reject,
    /// Log and let the accept proceed.
    Warn,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Search radius for dispatching a new ride (km).
    pub dispatch_radius_km: f64,
    pub otp_digits: usize,
    pub active_ride_policy: ActiveRidePolicy,
    pub route_timeout_ms: u64,
    pub payment_timeout_ms: u64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            dispatch_radius_km: 10.0,
            otp_digits: 6,
            active_ride_policy: ActiveRidePolicy::Reject,
            route_timeout_ms: 3_000,
            payment_timeout_ms: 5_000,
        }
    }
}

impl LifecycleConfig {
    pub fn with_dispatch_radius_km(mut self, radius_km: f64) -> Self {
        self.dispatch_radius_km = radius_km;
        self
    }

    pub fn with_otp_digits(mut self, digits: usize) -> Self {
        self.otp_digits = digits;
        self
    }

    pub fn with_active_ride_policy(mut self, policy: ActiveRidePolicy) -> Self {
        self.active_ride_policy = policy;
        self
    }

    pub fn with_route_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.route_timeout_ms = timeout_ms;
        self
    }

    pub fn with_payment_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.payment_timeout_ms = timeout_ms;
        self
    }

    pub fn route_timeout(&self) -> Duration {
        Duration::from_millis(self.route_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), String> {
        if !self.dispatch_radius_km.is_finite() || self.dispatch_radius_km <= 0.0 {
            return Err(format!(
                "dispatch_radius_km must be positive, got {}",
                self.dispatch_radius_km
            ));
        }
        if !(MIN_OTP_DIGITS..=MAX_OTP_DIGITS).contains(&self.otp_digits) {
            return Err(format!(
                "otp_digits must be within {MIN_OTP_DIGITS}..={MAX_OTP_DIGITS}, got {}",
                self.otp_digits
            ));
        }
        Ok(())
    }
}

pub const MIN_OTP_DIGITS: usize = 4;
pub const MAX_OTP_DIGITS: usize = 9;

/// Source of the one-time code the rider reads out at pickup.
pub trait OtpGenerator: Send + Sync {
    fn generate(&self) -> String;
}

/// Uniform random decimal digits.
#[derive(Debug, Clone, Copy)]
pub struct RandomOtp {
    digits: usize,
}

impl RandomOtp {
    pub fn new(digits: usize) -> Self {
        Self {
            digits: digits.clamp(MIN_OTP_DIGITS, MAX_OTP_DIGITS),
        }
    }
}

impl OtpGenerator for RandomOtp {
    fn generate(&self) -> String {
        let mut rng = rand::thread_rng();
        (0..self.digits)
            .map(|_| char::from(b'0' + rng.gen_range(0..10u8)))
            .collect()
    }
}

pub struct RideLifecycle {
    store: Arc<dyn RideStore>,
    fares: Arc<FareEstimator>,
    dispatch: DispatchHandle,
    notifier: Arc<Notifier>,
    geo: Arc<GeoIndex>,
    payments: Arc<dyn PaymentGateway>,
    otp: Arc<dyn OtpGenerator>,
    telemetry: Arc<DispatchTelemetry>,
    /// driver → accepted or started rides it holds. More than one only under
    /// [`ActiveRidePolicy::Warn`].
    claims: DashMap<ActorId, Vec<RideId>>,
    config: LifecycleConfig,
}

impl RideLifecycle {
    pub fn new(
        store: Arc<dyn RideStore>,
        fares: Arc<FareEstimator>,
        dispatch: DispatchHandle,
        notifier: Arc<Notifier>,
        geo: Arc<GeoIndex>,
        config: LifecycleConfig,
    ) -> Self {
        Self {
            store,
            fares,
            dispatch,
            notifier,
            geo,
            payments: Arc::new(ApprovingPaymentGateway),
            otp: Arc::new(RandomOtp::new(config.otp_digits)),
            telemetry: Arc::new(DispatchTelemetry::new()),
            claims: DashMap::new(),
            config,
        }
    }

    pub fn with_payment_gateway(mut self, payments: Arc<dyn PaymentGateway>) -> Self {
        self.payments = payments;
        self
    }

    pub fn with_otp_generator(mut self, otp: Arc<dyn OtpGenerator>) -> Self {
        self.otp = otp;
        self
    }

    pub fn with_telemetry(mut self, telemetry: Arc<DispatchTelemetry>) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    /// The ride a driver most recently accepted and still holds, if any.
    pub fn active_ride_of(&self, driver_id: ActorId) -> Option<RideId> {
        self.claims
            .get(&driver_id)
            .and_then(|rides| rides.last().copied())
    }

    /// Fare for every vehicle class, without creating a ride.
    pub async fn estimate_fares(&self, pickup: &str, destination: &str) -> Result<FareTable, RideError> {
        let (pickup, destination) = validate_addresses(pickup, destination)?;
        self.fares.estimate_all(pickup, destination).await
    }

    /// Price, persist and queue a new ride for dispatch.
    ///
    /// Returns as soon as the ride is stored; dispatch runs in the background
    /// and its outcome is never reported here.
    pub async fn create_ride(
        &self,
        rider_id: ActorId,
        pickup: &str,
        destination: &str,
        vehicle_class: VehicleClass,
    ) -> Result<Ride, RideError> {
        let (pickup, destination) = validate_addresses(pickup, destination)?;
        let fare = self.fares.estimate(pickup, destination, vehicle_class).await?;
        let ride = Ride::new(
            rider_id,
            pickup,
            destination,
            vehicle_class,
            fare,
            self.otp.generate(),
        );
        self.store.insert(ride.clone()).await?;
        self.telemetry.record_ride_created();
        info!(ride_id = %ride.id, %rider_id, fare, "ride requested");

        let request = DispatchRequest {
            ride_id: ride.id,
            pickup: ride.pickup.clone(),
            radius_km: self.config.dispatch_radius_km,
        };
        if let Err(err) = self.dispatch.try_submit(request) {
            warn!(ride_id = %ride.id, error = %err, "ride not queued for dispatch");
        }
        Ok(ride)
    }

    /// First driver to accept wins; every later accept sees `InvalidTransition`.
    pub async fn accept_ride(&self, ride_id: RideId, driver_id: ActorId) -> Result<Ride, RideError> {
        self.claim(driver_id, ride_id)?;
        let result = self
            .store
            .update(ride_id, &|ride| {
                ride.transition(RideStatus::Accepted)?;
                ride.driver_id = Some(driver_id);
                Ok(())
            })
            .await;
        let ride = match result {
            Ok(ride) => ride,
            Err(err) => {
                self.rollback_claim(driver_id, ride_id).await;
                self.observe_rejection(&err);
                return Err(err);
            }
        };

        self.geo.set_active_ride(driver_id, self.active_ride_of(driver_id));
        self.telemetry.record_ride_accepted();
        info!(%ride_id, %driver_id, "ride accepted");
        self.notify(ride.rider_id, PushEvent::RideConfirmed, &ride).await;
        Ok(ride)
    }

    /// Checks run in order: status, assigned driver, OTP.
    pub async fn start_ride(
        &self,
        ride_id: RideId,
        driver_id: ActorId,
        otp: &str,
    ) -> Result<Ride, RideError> {
        let ride = self
            .store
            .update(ride_id, &|ride| {
                if ride.status != RideStatus::Accepted {
                    return Err(RideError::InvalidTransition {
                        from: ride.status,
                        to: RideStatus::Started,
                    });
                }
                if ride.driver_id != Some(driver_id) {
                    return Err(RideError::Unauthorized {
                        ride_id,
                        actor_id: driver_id,
                    });
                }
                if ride.otp.as_deref() != Some(otp) {
                    return Err(RideError::OtpMismatch);
                }
                ride.transition(RideStatus::Started)?;
                ride.otp = None;
                Ok(())
            })
            .await;
        let ride = match ride {
            Ok(ride) => ride,
            Err(RideError::OtpMismatch) => {
                warn!(%ride_id, %driver_id, "start rejected: otp mismatch");
                return Err(RideError::OtpMismatch);
            }
            Err(err) => {
                self.observe_rejection(&err);
                return Err(err);
            }
        };

        info!(%ride_id, %driver_id, "ride started");
        self.notify(ride.rider_id, PushEvent::RideStarted, &ride).await;
        Ok(ride)
    }

    pub async fn end_ride(&self, ride_id: RideId, driver_id: ActorId) -> Result<Ride, RideError> {
        let ride = self
            .store
            .update(ride_id, &|ride| {
                if ride.status != RideStatus::Started {
                    return Err(RideError::InvalidTransition {
                        from: ride.status,
                        to: RideStatus::Completed,
                    });
                }
                if ride.driver_id != Some(driver_id) {
                    return Err(RideError::Unauthorized {
                        ride_id,
                        actor_id: driver_id,
                    });
                }
                ride.transition(RideStatus::Completed)
            })
            .await
            .inspect_err(|err| self.observe_rejection(err))?;

        self.release_claim(driver_id, ride_id);
        self.telemetry.record_ride_completed();
        info!(%ride_id, %driver_id, fare = ride.fare, "ride completed");
        self.notify(ride.rider_id, PushEvent::RideEnded, &ride).await;
        Ok(ride)
    }

    /// Rider or assigned driver, from `Requested` or `Accepted` only.
    ///
    /// Party membership is checked before status: a stranger gets
    /// `Unauthorized` even for a ride that is already terminal.
    pub async fn cancel_ride(&self, ride_id: RideId, actor_id: ActorId) -> Result<Ride, RideError> {
        let ride = self
            .store
            .update(ride_id, &|ride| {
                if !ride.involves(actor_id) {
                    return Err(RideError::Unauthorized { ride_id, actor_id });
                }
                ride.transition(RideStatus::Cancelled)
            })
            .await
            .inspect_err(|err| self.observe_rejection(err))?;

        if let Some(driver_id) = ride.driver_id {
            self.release_claim(driver_id, ride_id);
        }
        self.telemetry.record_ride_cancelled();
        info!(%ride_id, %actor_id, "ride cancelled");

        let counterparty = if actor_id == ride.rider_id {
            ride.driver_id
        } else {
            Some(ride.rider_id)
        };
        if let Some(counterparty) = counterparty {
            self.notify(counterparty, PushEvent::RideCancelled, &ride).await;
        }
        Ok(ride)
    }

    pub async fn get_ride(&self, ride_id: RideId) -> Result<Ride, RideError> {
        self.store
            .get(ride_id)
            .await?
            .ok_or(RideError::NotFound(ride_id))
    }

    /// Read access for one actor: the parties to the ride, plus any driver
    /// while the ride is still open for acceptance.
    pub async fn view_ride(
        &self,
        ride_id: RideId,
        actor_id: ActorId,
        role: ActorRole,
    ) -> Result<Ride, RideError> {
        let ride = self.get_ride(ride_id).await?;
        let open_to_drivers = role == ActorRole::Driver && ride.status == RideStatus::Requested;
        if ride.involves(actor_id) || open_to_drivers {
            Ok(ride)
        } else {
            Err(RideError::Unauthorized { ride_id, actor_id })
        }
    }

    /// Capture the fare of a completed ride. At most one capture succeeds; a
    /// failed capture may be retried.
    pub async fn settle_ride(&self, ride_id: RideId, rider_id: ActorId) -> Result<PaymentRecord, RideError> {
        let ride = self
            .store
            .update(ride_id, &|ride| {
                if ride.rider_id != rider_id {
                    return Err(RideError::Unauthorized {
                        ride_id,
                        actor_id: rider_id,
                    });
                }
                if ride.status != RideStatus::Completed {
                    return Err(RideError::NotPayable {
                        ride_id,
                        reason: "ride is not completed",
                    });
                }
                match ride.payment.as_ref().map(|payment| payment.status) {
                    Some(PaymentStatus::Captured) => Err(RideError::NotPayable {
                        ride_id,
                        reason: "payment already captured",
                    }),
                    Some(PaymentStatus::Pending) => Err(RideError::NotPayable {
                        ride_id,
                        reason: "payment already in progress",
                    }),
                    Some(PaymentStatus::Failed) | None => {
                        ride.payment = Some(PaymentRecord::pending(ride.fare));
                        ride.updated_at = Utc::now();
                        Ok(())
                    }
                }
            })
            .await?;

        let request = PaymentRequest {
            ride_id,
            rider_id,
            amount: ride.fare,
        };
        let timeout = Duration::from_millis(self.config.payment_timeout_ms);
        let outcome = tokio::time::timeout(timeout, self.payments.capture(&request))
            .await
            .unwrap_or_else(|_| {
                Err(PaymentError::Unavailable(format!(
                    "capture timed out after {timeout:?}"
                )))
            });

        let (record, result) = match outcome {
            Ok(receipt) => {
                let record = PaymentRecord::captured(ride.fare, receipt.transaction_id);
                (record.clone(), Ok(record))
            }
            Err(err) => {
                warn!(%ride_id, error = %err, "payment capture failed");
                let record = PaymentRecord::failed(ride.fare, err.to_string());
                let err = match err {
                    PaymentError::Declined { message, .. } => RideError::PaymentDeclined(message),
                    PaymentError::Unavailable(reason) => RideError::PaymentUnavailable(reason),
                };
                (record, Err(err))
            }
        };

        self.store
            .update(ride_id, &|ride| {
                ride.payment = Some(record.clone());
                ride.updated_at = Utc::now();
                Ok(())
            })
            .await?;
        self.telemetry.record_payment(result.is_ok());
        if result.is_ok() {
            info!(%ride_id, %rider_id, amount = ride.fare, "payment captured");
        }
        result
    }

    /// Record `ride_id` as held by `driver_id` before its accept is written.
    ///
    /// A repeated accept of the same ride by the same driver shares the
    /// existing claim.
    fn claim(&self, driver_id: ActorId, ride_id: RideId) -> Result<(), RideError> {
        let mut rides = self.claims.entry(driver_id).or_default();
        if rides.contains(&ride_id) {
            return Ok(());
        }
        if let Some(&active) = rides.last() {
            match self.config.active_ride_policy {
                ActiveRidePolicy::Reject => {
                    return Err(RideError::DriverBusy {
                        driver_id,
                        ride_id: active,
                    });
                }
                ActiveRidePolicy::Warn => {
                    warn!(%driver_id, active_ride_id = %active, %ride_id, "driver accepting a second ride");
                }
            }
        }
        rides.push(ride_id);
        Ok(())
    }

    /// Undo the claim of a failed accept, unless a concurrent accept of the
    /// same ride by the same driver committed it.
    async fn rollback_claim(&self, driver_id: ActorId, ride_id: RideId) {
        match self.store.get(ride_id).await {
            Ok(Some(ride))
                if ride.driver_id == Some(driver_id)
                    && matches!(ride.status, RideStatus::Accepted | RideStatus::Started) =>
            {
                debug!(%ride_id, %driver_id, "accept lost to a repeat of itself; claim kept");
            }
            Ok(_) => self.release_claim(driver_id, ride_id),
            Err(err) => {
                warn!(%ride_id, %driver_id, error = %err, "could not re-read ride; claim kept");
            }
        }
    }

    fn release_claim(&self, driver_id: ActorId, ride_id: RideId) {
        if let Some(mut rides) = self.claims.get_mut(&driver_id) {
            rides.retain(|held| *held != ride_id);
        }
        self.claims.remove_if(&driver_id, |_, rides| rides.is_empty());
        self.geo.set_active_ride(driver_id, self.active_ride_of(driver_id));
    }

    fn observe_rejection(&self, err: &RideError) {
        if let RideError::InvalidTransition { from, to } = err {
            self.telemetry.record_transition_rejected();
            debug!(%from, %to, "transition rejected");
        }
    }

    async fn notify(&self, actor_id: ActorId, event: PushEvent, ride: &Ride) {
        match self.notifier.notify_actor(actor_id, event, &ride.public_view()).await {
            Ok(()) => self.telemetry.record_notifications(1, 0),
            Err(failure) => {
                self.telemetry.record_notifications(0, 1);
                if let DeliveryFailure::NotBound(_) = failure {
                    debug!(ride_id = %ride.id, %actor_id, event = event.as_str(), "actor offline; notification dropped");
                } else {
                    warn!(ride_id = %ride.id, %actor_id, event = event.as_str(), error = %failure, "notification failed");
                }
            }
        }
    }
}

fn validate_addresses<'a>(pickup: &'a str, destination: &'a str) -> Result<(&'a str, &'a str), RideError> {
    let (pickup, destination) = (pickup.trim(), destination.trim());
    if pickup.is_empty() || destination.is_empty() {
        return Err(RideError::Validation(
            "pickup and destination are required".to_string(),
        ));
    }
    if pickup.eq_ignore_ascii_case(destination) {
        return Err(RideError::Validation(
            "pickup and destination must differ".to_string(),
        ));
    }
    Ok((pickup, destination))
}
