//! Wiring: one [`DispatchService`] owns the index, connection state, store,
//! dispatch queue and lifecycle of a running node.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::dispatch::{DispatchConfig, DispatchEngine, DispatchQueue};
use crate::error::RideError;
use crate::ids::{ActorId, ConnectionId};
use crate::lifecycle::{LifecycleConfig, OtpGenerator, RideLifecycle};
use crate::notify::{ConnectionHub, ConnectionRegistry, NotificationGateway, Notifier};
use crate::payment::PaymentGateway;
use crate::pricing::{FareEstimator, PricingConfig};
use crate::ride::ActorRole;
use crate::routing::RouteProvider;
use crate::spatial::{GeoIndex, Location};
use crate::store::{InMemoryRideStore, RideStore};
use crate::telemetry::DispatchTelemetry;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub dispatch: DispatchConfig,
    pub lifecycle: LifecycleConfig,
    pub pricing: PricingConfig,
    /// Frames buffered per socket before deliveries report backpressure.
    pub outbox_capacity: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            dispatch: DispatchConfig::default(),
            lifecycle: LifecycleConfig::default(),
            pricing: PricingConfig::default(),
            outbox_capacity: 64,
        }
    }
}

impl ServiceConfig {
    pub fn with_dispatch(mut self, dispatch: DispatchConfig) -> Self {
        self.dispatch = dispatch;
        self
    }

    pub fn with_lifecycle(mut self, lifecycle: LifecycleConfig) -> Self {
        self.lifecycle = lifecycle;
        self
    }

    pub fn with_pricing(mut self, pricing: PricingConfig) -> Self {
        self.pricing = pricing;
        self
    }

    pub fn with_outbox_capacity(mut self, capacity: usize) -> Self {
        self.outbox_capacity = capacity;
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        self.dispatch.validate()?;
        self.lifecycle.validate()?;
        self.pricing.validate()?;
        if self.outbox_capacity == 0 {
            return Err("outbox_capacity must be at least 1".to_string());
        }
        Ok(())
    }
}

pub struct ServiceBuilder {
    config: ServiceConfig,
    routes: Arc<dyn RouteProvider>,
    store: Option<Arc<dyn RideStore>>,
    payments: Option<Arc<dyn PaymentGateway>>,
    otp: Option<Arc<dyn OtpGenerator>>,
}

impl ServiceBuilder {
    pub fn with_store(mut self, store: Arc<dyn RideStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_payment_gateway(mut self, payments: Arc<dyn PaymentGateway>) -> Self {
        self.payments = Some(payments);
        self
    }

    pub fn with_otp_generator(mut self, otp: Arc<dyn OtpGenerator>) -> Self {
        self.otp = Some(otp);
        self
    }

    /// Validate the config and start the dispatch workers. Requires a tokio runtime.
    pub fn start(self) -> Result<DispatchService, RideError> {
        self.config.validate().map_err(RideError::Validation)?;
        let config = self.config;

        let geo = Arc::new(GeoIndex::new());
        let registry = Arc::new(ConnectionRegistry::new());
        let hub = Arc::new(ConnectionHub::new(config.outbox_capacity));
        let telemetry = Arc::new(DispatchTelemetry::new());
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryRideStore::new()) as Arc<dyn RideStore>);
        let notifier = Arc::new(Notifier::new(
            Arc::clone(&registry),
            Arc::clone(&hub) as Arc<dyn NotificationGateway>,
            config.dispatch.delivery_timeout(),
        ));

        let engine = Arc::new(DispatchEngine::new(
            Arc::clone(&self.routes),
            Arc::clone(&geo),
            Arc::clone(&store),
            Arc::clone(&notifier),
            Arc::clone(&telemetry),
            config.dispatch.clone(),
        ));
        let queue = DispatchQueue::start(engine);

        let fares = Arc::new(FareEstimator::new(
            Arc::clone(&self.routes),
            config.pricing.clone(),
            config.lifecycle.route_timeout(),
        ));
        let mut lifecycle = RideLifecycle::new(
            Arc::clone(&store),
            fares,
            queue.handle(),
            notifier,
            Arc::clone(&geo),
            config.lifecycle.clone(),
        )
        .with_telemetry(Arc::clone(&telemetry));
        if let Some(payments) = self.payments {
            lifecycle = lifecycle.with_payment_gateway(payments);
        }
        if let Some(otp) = self.otp {
            lifecycle = lifecycle.with_otp_generator(otp);
        }

        info!(
            workers = config.dispatch.workers,
            radius_km = config.lifecycle.dispatch_radius_km,
            "dispatch service started"
        );
        Ok(DispatchService {
            geo,
            registry,
            hub,
            store,
            telemetry,
            lifecycle: Arc::new(lifecycle),
            queue,
        })
    }
}

pub struct DispatchService {
    geo: Arc<GeoIndex>,
    registry: Arc<ConnectionRegistry>,
    hub: Arc<ConnectionHub>,
    store: Arc<dyn RideStore>,
    telemetry: Arc<DispatchTelemetry>,
    lifecycle: Arc<RideLifecycle>,
    queue: DispatchQueue,
}

impl DispatchService {
    pub fn builder(config: ServiceConfig, routes: Arc<dyn RouteProvider>) -> ServiceBuilder {
        ServiceBuilder {
            config,
            routes,
            store: None,
            payments: None,
            otp: None,
        }
    }

    pub fn lifecycle(&self) -> &Arc<RideLifecycle> {
        &self.lifecycle
    }

    pub fn geo(&self) -> &Arc<GeoIndex> {
        &self.geo
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn hub(&self) -> &Arc<ConnectionHub> {
        &self.hub
    }

    pub fn store(&self) -> &Arc<dyn RideStore> {
        &self.store
    }

    pub fn telemetry(&self) -> &Arc<DispatchTelemetry> {
        &self.telemetry
    }

    /// Bind an actor to a live connection. Drivers also become dispatchable
    /// once they have reported a location.
    pub fn join(&self, actor_id: ActorId, role: ActorRole, connection_id: ConnectionId) {
        let replaced = self.registry.bind(actor_id, connection_id);
        if role == ActorRole::Driver {
            self.geo.set_connection(actor_id, Some(connection_id));
        }
        info!(%actor_id, ?role, %connection_id, replaced = replaced.is_some(), "actor joined");
    }

    pub fn update_location(&self, driver_id: ActorId, location: Location) -> Result<(), RideError> {
        if !location.is_finite()
            || !(-90.0..=90.0).contains(&location.latitude)
            || !(-180.0..=180.0).contains(&location.longitude)
        {
            return Err(RideError::Validation(format!(
                "invalid location ({}, {})",
                location.latitude, location.longitude
            )));
        }
        self.geo.upsert_location(driver_id, location);
        debug!(%driver_id, latitude = location.latitude, longitude = location.longitude, "driver location updated");
        Ok(())
    }

    /// Tear down a closed socket. Bindings that already moved to a newer
    /// connection of the same actor are left alone.
    pub fn disconnect(&self, actor_id: Option<(ActorId, ActorRole)>, connection_id: ConnectionId) {
        self.hub.close(connection_id);
        if let Some((actor_id, role)) = actor_id {
            let unbound = self.registry.unbind(actor_id, connection_id);
            if role == ActorRole::Driver {
                self.geo.release_connection(actor_id, connection_id);
            }
            debug!(%actor_id, %connection_id, unbound, "connection closed");
        }
    }

    /// Stop taking dispatch work and wait for queued attempts to finish.
    pub async fn shutdown(&self) {
        self.queue.shutdown().await;
        info!("dispatch service stopped");
    }
}
