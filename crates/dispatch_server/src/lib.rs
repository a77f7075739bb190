//! HTTP and WebSocket surface of the ride dispatch service.

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod models;
pub mod router;
pub mod state;
