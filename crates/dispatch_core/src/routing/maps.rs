//! Geocode and distance-matrix HTTP backend.
//!
//! The response types and parsers are always compiled so they can be unit
//! tested; the HTTP client itself lives behind the `maps` feature.

#![cfg_attr(not(feature = "maps"), allow(dead_code))]

mod parser;
mod response;

#[cfg(feature = "maps")]
mod client;

#[cfg(feature = "maps")]
pub use client::MapsRouteProvider;
