//! Telemetry / KPIs: process-wide counters for dispatch and ride outcomes.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Counters shared by the dispatch workers and the lifecycle.
/// Relaxed ordering: values are for observation, never for coordination.
#[derive(Debug, Default)]
pub struct DispatchTelemetry {
    rides_created: AtomicU64,
    rides_accepted: AtomicU64,
    rides_completed: AtomicU64,
    rides_cancelled: AtomicU64,
    transitions_rejected: AtomicU64,
    dispatch_runs: AtomicU64,
    dispatch_skipped: AtomicU64,
    dispatch_aborted: AtomicU64,
    notifications_delivered: AtomicU64,
    notifications_failed: AtomicU64,
    payments_captured: AtomicU64,
    payments_failed: AtomicU64,
}

/// Point-in-time copy of [`DispatchTelemetry`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetrySnapshot {
    pub rides_created: u64,
    pub rides_accepted: u64,
    pub rides_completed: u64,
    pub rides_cancelled: u64,
    pub transitions_rejected: u64,
    pub dispatch_runs: u64,
    pub dispatch_skipped: u64,
    pub dispatch_aborted: u64,
    pub notifications_delivered: u64,
    pub notifications_failed: u64,
    pub payments_captured: u64,
    pub payments_failed: u64,
}

fn bump(counter: &AtomicU64, by: u64) {
    counter.fetch_add(by, Ordering::Relaxed);
}

impl DispatchTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_ride_created(&self) {
        bump(&self.rides_created, 1);
    }

    pub fn record_ride_accepted(&self) {
        bump(&self.rides_accepted, 1);
    }

    pub fn record_ride_completed(&self) {
        bump(&self.rides_completed, 1);
    }

    pub fn record_ride_cancelled(&self) {
        bump(&self.rides_cancelled, 1);
    }

    /// An operation refused because the ride was in the wrong status.
    pub fn record_transition_rejected(&self) {
        bump(&self.transitions_rejected, 1);
    }

    /// One finished fan-out with its per-candidate outcome counts.
    pub fn record_dispatch(&self, delivered: usize, failed: usize) {
        bump(&self.dispatch_runs, 1);
        self.record_notifications(delivered, failed);
    }

    pub fn record_dispatch_skipped(&self) {
        bump(&self.dispatch_skipped, 1);
    }

    pub fn record_dispatch_aborted(&self) {
        bump(&self.dispatch_aborted, 1);
    }

    pub fn record_notifications(&self, delivered: usize, failed: usize) {
        bump(&self.notifications_delivered, delivered as u64);
        bump(&self.notifications_failed, failed as u64);
    }

    pub fn record_payment(&self, captured: bool) {
        if captured {
            bump(&self.payments_captured, 1);
        } else {
            bump(&self.payments_failed, 1);
        }
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        TelemetrySnapshot {
            rides_created: load(&self.rides_created),
            rides_accepted: load(&self.rides_accepted),
            rides_completed: load(&self.rides_completed),
            rides_cancelled: load(&self.rides_cancelled),
            transitions_rejected: load(&self.transitions_rejected),
            dispatch_runs: load(&self.dispatch_runs),
            dispatch_skipped: load(&self.dispatch_skipped),
            dispatch_aborted: load(&self.dispatch_aborted),
            notifications_delivered: load(&self.notifications_delivered),
            notifications_failed: load(&self.notifications_failed),
            payments_captured: load(&self.payments_captured),
            payments_failed: load(&self.payments_failed),
        }
    }
}
