//! Push notifications over ephemeral connections.
//!
//! - [`ConnectionRegistry`]: actor id → current connection id
//! - [`ConnectionHub`]: connection id → outbox of a live socket, and the
//!   in-process [`NotificationGateway`]
//! - [`Notifier`]: envelope construction plus a delivery timeout
//!
//! Delivery is at most once and best effort: no queuing beyond the socket's
//! bounded outbox, no retry. Sends to stale connection ids are dropped.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::ids::{ActorId, ConnectionId};

/// Outbound event names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PushEvent {
    NewRide,
    RideConfirmed,
    RideStarted,
    RideEnded,
    RideCancelled,
    Error,
}

impl PushEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            PushEvent::NewRide => "new-ride",
            PushEvent::RideConfirmed => "ride-confirmed",
            PushEvent::RideStarted => "ride-started",
            PushEvent::RideEnded => "ride-ended",
            PushEvent::RideCancelled => "ride-cancelled",
            PushEvent::Error => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationEnvelope {
    pub target_connection_id: ConnectionId,
    pub event: PushEvent,
    pub payload: Value,
}

/// Frame handed to a socket task for writing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub event: PushEvent,
    pub data: Value,
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum DeliveryFailure {
    #[error("actor {0} has no bound connection")]
    NotBound(ActorId),
    #[error("connection {0} is not live")]
    UnknownConnection(ConnectionId),
    #[error("connection {0} closed")]
    ConnectionClosed(ConnectionId),
    #[error("connection {0} outbox is full")]
    Backpressure(ConnectionId),
    #[error("delivery timed out after {0:?}")]
    Timeout(Duration),
    #[error("payload could not be encoded: {0}")]
    Encode(String),
}

#[async_trait]
pub trait NotificationGateway: Send + Sync {
    async fn deliver(&self, envelope: NotificationEnvelope) -> Result<(), DeliveryFailure>;
}

/// Thread-safe actor → connection binding.
///
/// Each actor key has a single writer at a time (the map's shard lock), so a
/// reconnect and a stale disconnect cannot interleave into a lost binding.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    bindings: DashMap<ActorId, ConnectionId>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `actor_id` to `connection_id`, returning the replaced binding.
    pub fn bind(&self, actor_id: ActorId, connection_id: ConnectionId) -> Option<ConnectionId> {
        self.bindings.insert(actor_id, connection_id)
    }

    /// Remove the binding only if it still points at `connection_id`.
    pub fn unbind(&self, actor_id: ActorId, connection_id: ConnectionId) -> bool {
        self.bindings
            .remove_if(&actor_id, |_, bound| *bound == connection_id)
            .is_some()
    }

    pub fn lookup(&self, actor_id: ActorId) -> Option<ConnectionId> {
        self.bindings.get(&actor_id).map(|bound| *bound)
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

/// Outboxes of the sockets currently open on this node.
#[derive(Debug)]
pub struct ConnectionHub {
    outboxes: DashMap<ConnectionId, mpsc::Sender<OutboundMessage>>,
    capacity: usize,
}

impl ConnectionHub {
    pub fn new(capacity: usize) -> Self {
        Self {
            outboxes: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Register a new socket; the receiver feeds the socket's write loop.
    pub fn open(&self) -> (ConnectionId, mpsc::Receiver<OutboundMessage>) {
        let (tx, rx) = mpsc::channel(self.capacity);
        let connection_id = ConnectionId::new();
        self.outboxes.insert(connection_id, tx);
        (connection_id, rx)
    }

    pub fn close(&self, connection_id: ConnectionId) {
        self.outboxes.remove(&connection_id);
    }

    pub fn is_open(&self, connection_id: ConnectionId) -> bool {
        self.outboxes.contains_key(&connection_id)
    }

    pub fn len(&self) -> usize {
        self.outboxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outboxes.is_empty()
    }
}

#[async_trait]
impl NotificationGateway for ConnectionHub {
    async fn deliver(&self, envelope: NotificationEnvelope) -> Result<(), DeliveryFailure> {
        let connection_id = envelope.target_connection_id;
        let outbox = self
            .outboxes
            .get(&connection_id)
            .map(|tx| tx.clone())
            .ok_or(DeliveryFailure::UnknownConnection(connection_id))?;

        let message = OutboundMessage {
            event: envelope.event,
            data: envelope.payload,
        };
        match outbox.try_send(message) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => Err(DeliveryFailure::Backpressure(connection_id)),
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.outboxes.remove(&connection_id);
                Err(DeliveryFailure::ConnectionClosed(connection_id))
            }
        }
    }
}

/// Builds envelopes and submits them to a [`NotificationGateway`] under a timeout.
pub struct Notifier {
    registry: Arc<ConnectionRegistry>,
    gateway: Arc<dyn NotificationGateway>,
    timeout: Duration,
}

impl Notifier {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        gateway: Arc<dyn NotificationGateway>,
        timeout: Duration,
    ) -> Self {
        Self {
            registry,
            gateway,
            timeout,
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub async fn deliver(&self, envelope: NotificationEnvelope) -> Result<(), DeliveryFailure> {
        tokio::time::timeout(self.timeout, self.gateway.deliver(envelope))
            .await
            .map_err(|_| DeliveryFailure::Timeout(self.timeout))?
    }

    pub async fn notify_connection<T: Serialize + ?Sized>(
        &self,
        connection_id: ConnectionId,
        event: PushEvent,
        payload: &T,
    ) -> Result<(), DeliveryFailure> {
        let payload =
            serde_json::to_value(payload).map_err(|err| DeliveryFailure::Encode(err.to_string()))?;
        self.deliver(NotificationEnvelope {
            target_connection_id: connection_id,
            event,
            payload,
        })
        .await
    }

    /// Push to whatever connection the actor is bound to right now.
    pub async fn notify_actor<T: Serialize + ?Sized>(
        &self,
        actor_id: ActorId,
        event: PushEvent,
        payload: &T,
    ) -> Result<(), DeliveryFailure> {
        let connection_id = self
            .registry
            .lookup(actor_id)
            .ok_or(DeliveryFailure::NotBound(actor_id))?;
        self.notify_connection(connection_id, event, payload).await
    }
}
