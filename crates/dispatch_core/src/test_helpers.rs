//! Test helpers for common test setup and utilities.
//!
//! Shared geography, deterministic OTPs and recording seams, so unit tests,
//! integration tests and the server crate's tests build the same world.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;

use crate::lifecycle::OtpGenerator;
use crate::notify::{DeliveryFailure, NotificationEnvelope, NotificationGateway};
use crate::payment::{PaymentError, PaymentGateway, PaymentReceipt, PaymentRequest};
use crate::routing::GazetteerRouteProvider;
use crate::spatial::Location;

/// City center used across tests.
pub const BANGALORE_CENTER: Location = Location {
    latitude: 12.9716,
    longitude: 77.5946,
};

/// Named places with fixed coordinates, roughly around central Bangalore.
///
/// - `MG Road` is ~0.7 km from [`BANGALORE_CENTER`]
/// - `Whitefield` is ~17 km away
/// - `Airport` is ~30 km away
pub fn test_places() -> Vec<(String, Location)> {
    [
        ("MG Road", Location::new(12.9750, 77.6000)),
        ("Indiranagar", Location::new(12.9784, 77.6408)),
        ("Koramangala", Location::new(12.9352, 77.6245)),
        ("Whitefield", Location::new(12.9698, 77.7500)),
        ("Airport", Location::new(13.1986, 77.7066)),
    ]
    .into_iter()
    .map(|(name, location)| (name.to_string(), location))
    .collect()
}

pub fn test_route_provider() -> GazetteerRouteProvider {
    GazetteerRouteProvider::from_places(test_places())
}

/// Always issues the same code.
#[derive(Debug, Clone)]
pub struct FixedOtp(pub String);

impl FixedOtp {
    pub fn new(code: &str) -> Self {
        Self(code.to_string())
    }
}

impl OtpGenerator for FixedOtp {
    fn generate(&self) -> String {
        self.0.clone()
    }
}

/// Gateway that records every envelope and reports success.
#[derive(Debug, Default)]
pub struct RecordingGateway {
    sent: Mutex<Vec<NotificationEnvelope>>,
}

impl RecordingGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<NotificationEnvelope> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl NotificationGateway for RecordingGateway {
    async fn deliver(&self, envelope: NotificationEnvelope) -> Result<(), DeliveryFailure> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(envelope);
        Ok(())
    }
}

/// Payment gateway that counts captures and can be told to decline.
#[derive(Debug, Default)]
pub struct ScriptedPayments {
    decline: bool,
    captures: Mutex<Vec<PaymentRequest>>,
}

impl ScriptedPayments {
    pub fn approving() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn declining() -> Arc<Self> {
        Arc::new(Self {
            decline: true,
            ..Self::default()
        })
    }

    pub fn captures(&self) -> usize {
        self.captures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[async_trait]
impl PaymentGateway for ScriptedPayments {
    async fn capture(&self, request: &PaymentRequest) -> Result<PaymentReceipt, PaymentError> {
        if self.decline {
            return Err(PaymentError::Declined {
                code: "CARD_DECLINED".to_string(),
                message: "card declined".to_string(),
            });
        }
        let mut captures = self.captures.lock().unwrap_or_else(PoisonError::into_inner);
        captures.push(request.clone());
        Ok(PaymentReceipt {
            transaction_id: format!("txn_test_{}", captures.len()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spatial::haversine_km;

    #[test]
    fn fixture_places_sit_where_documented() {
        let places = test_places();
        let find = |name: &str| {
            places
                .iter()
                .find(|(place, _)| place == name)
                .map(|(_, location)| *location)
                .expect("fixture place")
        };
        assert!(haversine_km(BANGALORE_CENTER, find("MG Road")) < 1.0);
        let whitefield = haversine_km(BANGALORE_CENTER, find("Whitefield"));
        assert!(whitefield > 15.0 && whitefield < 20.0);
    }
}
