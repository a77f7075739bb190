use std::sync::Arc;
use std::time::Duration;

use dispatch_core::ids::{ActorId, ConnectionId};
use dispatch_core::lifecycle::{LifecycleConfig, RideLifecycle};
use dispatch_core::notify::{OutboundMessage, PushEvent};
use dispatch_core::pricing::VehicleClass;
use dispatch_core::ride::{ActorRole, Ride, RideStatus};
use dispatch_core::service::{DispatchService, ServiceBuilder, ServiceConfig};
use dispatch_core::store::RideStore;
use dispatch_core::test_helpers::{test_route_provider, FixedOtp, ScriptedPayments};
use tokio::sync::mpsc;

pub const TEST_OTP: &str = "4821";

/// A live socket of one actor, as the server would hold it.
pub struct Client {
    pub actor_id: ActorId,
    pub role: ActorRole,
    pub connection_id: ConnectionId,
    pub inbox: mpsc::Receiver<OutboundMessage>,
}

impl Client {
    /// Next frame of `event`, skipping others. Panics after one second.
    pub async fn expect_event(&mut self, event: PushEvent) -> OutboundMessage {
        let deadline = Duration::from_secs(1);
        loop {
            let message = tokio::time::timeout(deadline, self.inbox.recv())
                .await
                .unwrap_or_else(|_| panic!("no {event:?} within {deadline:?}"))
                .expect("inbox closed");
            if message.event == event {
                return message;
            }
        }
    }

    /// Every frame already buffered, without waiting.
    pub fn drain(&mut self) -> Vec<OutboundMessage> {
        let mut messages = Vec::new();
        while let Ok(message) = self.inbox.try_recv() {
            messages.push(message);
        }
        messages
    }
}

/// A started service with a fixed OTP and a scripted payment gateway.
pub struct Harness {
    pub service: DispatchService,
    pub payments: Arc<ScriptedPayments>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(ServiceConfig::default())
    }

    pub fn with_config(config: ServiceConfig) -> Self {
        Self::build(config, ScriptedPayments::approving())
    }

    /// Default config over a caller-supplied ride store.
    pub fn with_store(store: Arc<dyn RideStore>) -> Self {
        let payments = ScriptedPayments::approving();
        let service = Self::builder(ServiceConfig::default(), &payments)
            .with_store(store)
            .start()
            .expect("service starts");
        Self { service, payments }
    }

    pub fn with_lifecycle(lifecycle: LifecycleConfig) -> Self {
        Self::with_config(ServiceConfig::default().with_lifecycle(lifecycle))
    }

    pub fn declining_payments() -> Self {
        Self::build(ServiceConfig::default(), ScriptedPayments::declining())
    }

    fn build(config: ServiceConfig, payments: Arc<ScriptedPayments>) -> Self {
        let service = Self::builder(config, &payments)
            .start()
            .expect("service starts");
        Self { service, payments }
    }

    fn builder(config: ServiceConfig, payments: &Arc<ScriptedPayments>) -> ServiceBuilder {
        DispatchService::builder(config, Arc::new(test_route_provider()))
            .with_otp_generator(Arc::new(FixedOtp::new(TEST_OTP)))
            .with_payment_gateway(payments.clone())
    }

    pub fn lifecycle(&self) -> &Arc<RideLifecycle> {
        self.service.lifecycle()
    }

    pub fn connect(&self, role: ActorRole) -> Client {
        let actor_id = ActorId::new();
        let (connection_id, inbox) = self.service.hub().open();
        self.service.join(actor_id, role, connection_id);
        Client {
            actor_id,
            role,
            connection_id,
            inbox,
        }
    }

    pub fn connect_driver_at(&self, latitude: f64, longitude: f64) -> Client {
        let driver = self.connect(ActorRole::Driver);
        self.service
            .update_location(
                driver.actor_id,
                dispatch_core::spatial::Location::new(latitude, longitude),
            )
            .expect("valid location");
        driver
    }

    pub fn disconnect(&self, client: &Client) {
        self.service
            .disconnect(Some((client.actor_id, client.role)), client.connection_id);
    }

    pub async fn request_ride(&self, rider: &Client) -> Ride {
        self.lifecycle()
            .create_ride(rider.actor_id, "MG Road", "Airport", VehicleClass::Car)
            .await
            .expect("ride created")
    }

    pub async fn accepted_ride(&self, rider: &Client, driver: &Client) -> Ride {
        let ride = self.request_ride(rider).await;
        self.lifecycle()
            .accept_ride(ride.id, driver.actor_id)
            .await
            .expect("accepted")
    }

    pub async fn completed_ride(&self, rider: &Client, driver: &Client) -> Ride {
        let ride = self.accepted_ride(rider, driver).await;
        self.lifecycle()
            .start_ride(ride.id, driver.actor_id, TEST_OTP)
            .await
            .expect("started");
        let ride = self
            .lifecycle()
            .end_ride(ride.id, driver.actor_id)
            .await
            .expect("ended");
        assert_eq!(ride.status, RideStatus::Completed);
        ride
    }

    pub async fn stored_status(&self, ride: &Ride) -> RideStatus {
        self.lifecycle()
            .get_ride(ride.id)
            .await
            .expect("stored ride")
            .status
    }
}
