//! Fan-out of new ride requests to nearby connected drivers.
//!
//! [`DispatchEngine::dispatch`] does one attempt for one ride. The
//! [`DispatchQueue`] runs attempts off the request path: callers submit with
//! [`DispatchHandle::try_submit`] and never observe the outcome.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{mpsc, Notify, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use crate::ids::RideId;
use crate::notify::{DeliveryFailure, NotificationEnvelope, Notifier, PushEvent};
use crate::ride::RideStatus;
use crate::routing::{RouteError, RouteProvider};
use crate::spatial::{GeoIndex, Location};
use crate::store::RideStore;
use crate::telemetry::DispatchTelemetry;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Maximum dispatch attempts running at once.
    pub workers: usize,
    pub queue_capacity: usize,
    pub geocode_timeout_ms: u64,
    pub geocode_attempts: u32,
    /// Backoff before retry `n` is `n * retry_backoff_ms`.
    pub retry_backoff_ms: u64,
    pub delivery_timeout_ms: u64,
    /// Leave out drivers that already hold an accepted or started ride.
    pub skip_busy_drivers: bool,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 1024,
            geocode_timeout_ms: 3_000,
            geocode_attempts: 2,
            retry_backoff_ms: 200,
            delivery_timeout_ms: 1_000,
            skip_busy_drivers: false,
        }
    }
}

impl DispatchConfig {
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_geocode_retry(mut self, attempts: u32, backoff_ms: u64) -> Self {
        self.geocode_attempts = attempts;
        self.retry_backoff_ms = backoff_ms;
        self
    }

    pub fn with_geocode_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.geocode_timeout_ms = timeout_ms;
        self
    }

    pub fn with_delivery_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.delivery_timeout_ms = timeout_ms;
        self
    }

    pub fn with_skip_busy_drivers(mut self, skip: bool) -> Self {
        self.skip_busy_drivers = skip;
        self
    }

    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_millis(self.delivery_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.workers == 0 || self.queue_capacity == 0 {
            return Err("workers and queue_capacity must be at least 1".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchRequest {
    pub ride_id: RideId,
    pub pickup: String,
    pub radius_km: f64,
}

/// Outcome of one dispatch attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchReport {
    pub ride_id: Option<RideId>,
    /// Drivers the index returned inside the radius.
    pub candidates: usize,
    pub delivered: usize,
    pub failed: usize,
    /// Busy drivers left out, or the whole ride when it was no longer `Requested`.
    pub skipped: usize,
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum DispatchError {
    #[error("dispatch queue is full, ride {0} not dispatched")]
    QueueFull(RideId),
    #[error("dispatch queue is closed")]
    QueueClosed,
    #[error("ride {0} vanished before dispatch")]
    RideMissing(RideId),
    #[error("pickup could not be resolved: {0}")]
    Route(#[from] RouteError),
    #[error("ride store failure: {0}")]
    Store(String),
    #[error("ride payload could not be encoded: {0}")]
    Encode(String),
}

pub struct DispatchEngine {
    routes: Arc<dyn RouteProvider>,
    geo: Arc<GeoIndex>,
    store: Arc<dyn RideStore>,
    notifier: Arc<Notifier>,
    telemetry: Arc<DispatchTelemetry>,
    config: DispatchConfig,
}

impl DispatchEngine {
    pub fn new(
        routes: Arc<dyn RouteProvider>,
        geo: Arc<GeoIndex>,
        store: Arc<dyn RideStore>,
        notifier: Arc<Notifier>,
        telemetry: Arc<DispatchTelemetry>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            routes,
            geo,
            store,
            notifier,
            telemetry,
            config,
        }
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Push `new-ride` to every connected driver inside the radius.
    ///
    /// Each candidate gets at most one delivery attempt; one failure never
    /// affects another candidate. Nothing is rolled back.
    pub async fn dispatch(&self, request: &DispatchRequest) -> Result<DispatchReport, DispatchError> {
        let ride = self
            .store
            .get(request.ride_id)
            .await
            .map_err(|err| DispatchError::Store(err.to_string()))?
            .ok_or(DispatchError::RideMissing(request.ride_id))?;

        if ride.status != RideStatus::Requested {
            debug!(ride_id = %ride.id, status = %ride.status, "ride no longer requested; skipping dispatch");
            self.telemetry.record_dispatch_skipped();
            return Ok(DispatchReport {
                ride_id: Some(ride.id),
                skipped: 1,
                ..DispatchReport::default()
            });
        }

        let pickup = match self.geocode(&request.pickup).await {
            Ok(location) => location,
            Err(err) => {
                self.telemetry.record_dispatch_aborted();
                return Err(err.into());
            }
        };

        let mut candidates = self.geo.query(pickup, request.radius_km);
        let found = candidates.len();
        if self.config.skip_busy_drivers {
            candidates.retain(|driver| driver.active_ride_id.is_none());
        }
        let skipped = found - candidates.len();

        let payload = serde_json::to_value(ride.public_view())
            .map_err(|err| DispatchError::Encode(err.to_string()))?;
        let deliveries = candidates.iter().filter_map(|driver| {
            let connection_id = driver.connection_id?;
            let envelope = NotificationEnvelope {
                target_connection_id: connection_id,
                event: PushEvent::NewRide,
                payload: payload.clone(),
            };
            Some(async move { (driver.id, connection_id, self.notifier.deliver(envelope).await) })
        });

        let mut report = DispatchReport {
            ride_id: Some(ride.id),
            candidates: found,
            skipped,
            ..DispatchReport::default()
        };
        for (driver_id, connection_id, result) in join_all(deliveries).await {
            match result {
                Ok(()) => report.delivered += 1,
                Err(
                    failure @ (DeliveryFailure::UnknownConnection(_)
                    | DeliveryFailure::ConnectionClosed(_)),
                ) => {
                    report.failed += 1;
                    debug!(ride_id = %ride.id, %driver_id, %connection_id, error = %failure, "driver connection gone; offer dropped");
                }
                Err(failure) => {
                    report.failed += 1;
                    warn!(
                        ride_id = %ride.id,
                        %driver_id,
                        %connection_id,
                        error = %failure,
                        "new-ride delivery failed"
                    );
                }
            }
        }
        self.telemetry.record_dispatch(report.delivered, report.failed);
        Ok(report)
    }

    /// Geocode with a per-attempt timeout. Unknown addresses are not retried.
    async fn geocode(&self, address: &str) -> Result<Location, RouteError> {
        let attempts = self.config.geocode_attempts.max(1);
        let per_attempt = Duration::from_millis(self.config.geocode_timeout_ms);
        let mut last_error = RouteError::Provider("geocode not attempted".to_string());

        for attempt in 1..=attempts {
            let result = tokio::time::timeout(per_attempt, self.routes.geocode(address))
                .await
                .unwrap_or_else(|_| {
                    Err(RouteError::Provider(format!(
                        "geocode timed out after {per_attempt:?}"
                    )))
                });
            match result {
                Ok(location) => return Ok(location),
                Err(err @ RouteError::AddressNotFound(_)) => return Err(err),
                Err(err) => {
                    warn!(address, attempt, error = %err, "geocode attempt failed");
                    last_error = err;
                }
            }
            if attempt < attempts {
                let backoff = self.config.retry_backoff_ms.saturating_mul(u64::from(attempt));
                tokio::time::sleep(Duration::from_millis(backoff)).await;
            }
        }
        Err(last_error)
    }
}

/// Cloneable submit side of a [`DispatchQueue`].
#[derive(Debug, Clone)]
pub struct DispatchHandle {
    sender: mpsc::Sender<DispatchRequest>,
}

impl DispatchHandle {
    /// Enqueue without waiting. Fails when the queue is full or shut down.
    pub fn try_submit(&self, request: DispatchRequest) -> Result<(), DispatchError> {
        self.sender.try_send(request).map_err(|err| match err {
            mpsc::error::TrySendError::Full(request) => DispatchError::QueueFull(request.ride_id),
            mpsc::error::TrySendError::Closed(_) => DispatchError::QueueClosed,
        })
    }
}

/// Bounded queue drained by at most `workers` concurrent dispatch attempts.
pub struct DispatchQueue {
    handle: DispatchHandle,
    shutdown: Arc<Notify>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl DispatchQueue {
    /// Spawn the dispatcher task. Must be called inside a tokio runtime.
    pub fn start(engine: Arc<DispatchEngine>) -> Self {
        let config = engine.config().clone();
        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
        let shutdown = Arc::new(Notify::new());
        let dispatcher = tokio::spawn(run_dispatcher(
            engine,
            receiver,
            config.workers.max(1),
            Arc::clone(&shutdown),
        ));
        Self {
            handle: DispatchHandle { sender },
            shutdown,
            dispatcher: Mutex::new(Some(dispatcher)),
        }
    }

    pub fn handle(&self) -> DispatchHandle {
        self.handle.clone()
    }

    /// Stop accepting requests, finish everything already queued or running.
    pub async fn shutdown(&self) {
        self.shutdown.notify_one();
        let dispatcher = self
            .dispatcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(dispatcher) = dispatcher {
            if let Err(err) = dispatcher.await {
                warn!(error = %err, "dispatcher task ended abnormally");
            }
        }
    }
}

async fn run_dispatcher(
    engine: Arc<DispatchEngine>,
    mut receiver: mpsc::Receiver<DispatchRequest>,
    workers: usize,
    shutdown: Arc<Notify>,
) {
    let permits = Arc::new(Semaphore::new(workers));
    let mut in_flight = JoinSet::new();
    let mut closing = false;

    loop {
        let next = if closing {
            receiver.recv().await
        } else {
            tokio::select! {
                _ = shutdown.notified() => {
                    // Closed for senders; already queued requests still drain.
                    receiver.close();
                    closing = true;
                    continue;
                }
                next = receiver.recv() => next,
            }
        };
        let Some(request) = next else { break };
        let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
            break;
        };

        let engine = Arc::clone(&engine);
        in_flight.spawn(async move {
            let _permit = permit;
            match engine.dispatch(&request).await {
                Ok(report) => info!(
                    ride_id = %request.ride_id,
                    candidates = report.candidates,
                    delivered = report.delivered,
                    failed = report.failed,
                    skipped = report.skipped,
                    "dispatch finished"
                ),
                Err(err) => warn!(ride_id = %request.ride_id, error = %err, "dispatch aborted"),
            }
        });
        while in_flight.try_join_next().is_some() {}
    }

    while in_flight.join_next().await.is_some() {}
    debug!("dispatcher stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{ActorId, ConnectionId};
    use crate::notify::{ConnectionHub, ConnectionRegistry, NotificationGateway};
    use crate::pricing::VehicleClass;
    use crate::ride::Ride;
    use crate::routing::GazetteerRouteProvider;
    use crate::store::InMemoryRideStore;

    struct Fixture {
        geo: Arc<GeoIndex>,
        hub: Arc<ConnectionHub>,
        store: Arc<InMemoryRideStore>,
        engine: Arc<DispatchEngine>,
    }

    fn fixture(config: DispatchConfig) -> Fixture {
        let routes = Arc::new(GazetteerRouteProvider::from_places([(
            "MG Road",
            Location::new(12.9750, 77.6000),
        )]));
        let geo = Arc::new(GeoIndex::new());
        let hub = Arc::new(ConnectionHub::new(8));
        let store = Arc::new(InMemoryRideStore::new());
        let notifier = Arc::new(Notifier::new(
            Arc::new(ConnectionRegistry::new()),
            Arc::clone(&hub) as Arc<dyn NotificationGateway>,
            config.delivery_timeout(),
        ));
        let engine = Arc::new(DispatchEngine::new(
            routes,
            Arc::clone(&geo),
            Arc::clone(&store) as Arc<dyn RideStore>,
            notifier,
            Arc::new(DispatchTelemetry::new()),
            config,
        ));
        Fixture {
            geo,
            hub,
            store,
            engine,
        }
    }

    async fn requested_ride(store: &InMemoryRideStore) -> DispatchRequest {
        let ride = Ride::new(
            ActorId::new(),
            "MG Road",
            "Airport",
            VehicleClass::Auto,
            150.0,
            "123456".to_string(),
        );
        let request = DispatchRequest {
            ride_id: ride.id,
            pickup: ride.pickup.clone(),
            radius_km: 10.0,
        };
        store.insert(ride).await.expect("insert");
        request
    }

    #[tokio::test]
    async fn busy_drivers_are_skipped_when_configured() {
        let f = fixture(DispatchConfig::default().with_skip_busy_drivers(true));
        let request = requested_ride(&f.store).await;

        let (idle_conn, _idle_rx) = f.hub.open();
        let idle = ActorId::new();
        f.geo.upsert_location(idle, Location::new(12.9716, 77.5946));
        f.geo.set_connection(idle, Some(idle_conn));

        let (busy_conn, _busy_rx) = f.hub.open();
        let busy = ActorId::new();
        f.geo.upsert_location(busy, Location::new(12.9720, 77.5950));
        f.geo.set_connection(busy, Some(busy_conn));
        f.geo.set_active_ride(busy, Some(RideId::new()));

        let report = f.engine.dispatch(&request).await.expect("dispatch");
        assert_eq!(report.candidates, 2);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.delivered, 1);
    }

    #[tokio::test]
    async fn unknown_pickup_aborts_without_retry() {
        let f = fixture(DispatchConfig::default());
        let mut request = requested_ride(&f.store).await;
        request.pickup = "Atlantis".to_string();

        let err = f.engine.dispatch(&request).await.expect_err("unresolvable");
        assert!(matches!(err, DispatchError::Route(RouteError::AddressNotFound(_))));
    }

    #[tokio::test]
    async fn stale_connection_counts_as_failure_only() {
        let f = fixture(DispatchConfig::default());
        let request = requested_ride(&f.store).await;

        let driver = ActorId::new();
        f.geo.upsert_location(driver, Location::new(12.9716, 77.5946));
        f.geo.set_connection(driver, Some(ConnectionId::new()));
        let (dropped_conn, dropped_rx) = f.hub.open();
        drop(dropped_rx);
        let departed = ActorId::new();
        f.geo.upsert_location(departed, Location::new(12.9720, 77.5950));
        f.geo.set_connection(departed, Some(dropped_conn));
        let (live_conn, mut live_rx) = f.hub.open();
        let live = ActorId::new();
        f.geo.upsert_location(live, Location::new(12.9730, 77.5960));
        f.geo.set_connection(live, Some(live_conn));

        let report = f.engine.dispatch(&request).await.expect("dispatch");
        assert_eq!((report.delivered, report.failed), (1, 2));
        let message = live_rx.recv().await.expect("new-ride");
        assert_eq!(message.event, PushEvent::NewRide);
        assert!(message.data.get("otp").is_none());
    }

    #[tokio::test]
    async fn queue_rejects_submissions_after_shutdown() {
        let f = fixture(DispatchConfig::default());
        let request = requested_ride(&f.store).await;
        let queue = DispatchQueue::start(Arc::clone(&f.engine));
        let handle = queue.handle();

        handle.try_submit(request.clone()).expect("accepted");
        queue.shutdown().await;
        assert_eq!(handle.try_submit(request), Err(DispatchError::QueueClosed));
    }
}
