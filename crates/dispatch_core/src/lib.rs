//! Ride dispatch core: driver presence index, fare estimation, background
//! dispatch to nearby drivers, and the ride state machine.

pub mod dispatch;
pub mod error;
pub mod ids;
pub mod lifecycle;
pub mod notify;
pub mod payment;
pub mod pricing;
pub mod ride;
pub mod routing;
pub mod service;
pub mod spatial;
pub mod store;
pub mod telemetry;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;
