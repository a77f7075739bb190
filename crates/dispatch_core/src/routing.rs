//! Pluggable route providers: trait abstraction for geocoding and distance backends.
//!
//! Implementations, selectable via [`RouteProviderKind`]:
//!
//! - **`GazetteerRouteProvider`**: In-memory address table + Haversine distance. Zero dependencies.
//! - **`MapsRouteProvider`** (feature `maps`): Calls a geocode / distance-matrix HTTP API.
//!
//! Either can be wrapped in a [`CachedRouteProvider`], which keeps successful
//! lookups in an LRU and optionally falls back to a second provider.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::{Mutex, PoisonError, RwLock};

use async_trait::async_trait;
use lru::LruCache;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::spatial::{haversine_km, Location};

pub mod maps;

/// Average free-flow speed used when a provider has no travel-time data.
pub const AVERAGE_CITY_SPEED_KMH: f64 = 40.0;

/// Distance and travel time between two addresses.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteEstimate {
    /// Road-network distance in kilometres.
    pub distance_km: f64,
    /// Travel time in seconds.
    pub duration_secs: f64,
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum RouteError {
    #[error("no route from {origin:?} to {destination:?}")]
    NoRoute { origin: String, destination: String },
    #[error("address not found: {0:?}")]
    AddressNotFound(String),
    #[error("route provider failed: {0}")]
    Provider(String),
}

/// Geocoding and distance backend. Implementations must be `Send + Sync` so
/// one provider can be shared by request handlers and dispatch workers.
#[async_trait]
pub trait RouteProvider: Send + Sync {
    /// Resolve a free-form address to coordinates.
    async fn geocode(&self, address: &str) -> Result<Location, RouteError>;

    /// Distance and duration between two addresses. Fails with
    /// [`RouteError::NoRoute`] when the backend reports no route.
    async fn distance_time(
        &self,
        origin: &str,
        destination: &str,
    ) -> Result<RouteEstimate, RouteError>;
}

/// Which backend to use.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub enum RouteProviderKind {
    /// In-memory gazetteer seeded with the given places.
    #[default]
    Gazetteer,
    /// Geocode / distance-matrix HTTP endpoint, e.g. `"https://maps.googleapis.com/maps/api"`.
    #[cfg(feature = "maps")]
    Maps { endpoint: String, api_key: String },
}

// ---------------------------------------------------------------------------
// Gazetteer provider (always available)
// ---------------------------------------------------------------------------

fn normalize_address(address: &str) -> String {
    address.trim().to_lowercase()
}

/// Resolves addresses from an in-memory table and estimates routes as the
/// Haversine distance driven at [`AVERAGE_CITY_SPEED_KMH`].
#[derive(Debug, Default)]
pub struct GazetteerRouteProvider {
    places: RwLock<HashMap<String, Location>>,
}

impl GazetteerRouteProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_places<I, S>(places: I) -> Self
    where
        I: IntoIterator<Item = (S, Location)>,
        S: AsRef<str>,
    {
        let provider = Self::new();
        for (address, location) in places {
            provider.insert(address.as_ref(), location);
        }
        provider
    }

    pub fn insert(&self, address: &str, location: Location) {
        self.places
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(normalize_address(address), location);
    }

    fn lookup(&self, address: &str) -> Result<Location, RouteError> {
        self.places
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&normalize_address(address))
            .copied()
            .ok_or_else(|| RouteError::AddressNotFound(address.to_string()))
    }
}

#[async_trait]
impl RouteProvider for GazetteerRouteProvider {
    async fn geocode(&self, address: &str) -> Result<Location, RouteError> {
        self.lookup(address)
    }

    async fn distance_time(
        &self,
        origin: &str,
        destination: &str,
    ) -> Result<RouteEstimate, RouteError> {
        let (from, to) = match (self.lookup(origin), self.lookup(destination)) {
            (Ok(from), Ok(to)) => (from, to),
            _ => {
                return Err(RouteError::NoRoute {
                    origin: origin.to_string(),
                    destination: destination.to_string(),
                })
            }
        };
        let distance_km = haversine_km(from, to);
        Ok(RouteEstimate {
            distance_km,
            duration_secs: (distance_km / AVERAGE_CITY_SPEED_KMH) * 3600.0,
        })
    }
}

// ---------------------------------------------------------------------------
// Caching wrapper
// ---------------------------------------------------------------------------

/// LRU-cached wrapper around any [`RouteProvider`].
///
/// Geocodes are keyed by normalized address, routes by the directional
/// address pair. Failures are never cached. On inner failure the optional
/// fallback provider is tried before the error is returned.
pub struct CachedRouteProvider {
    inner: Box<dyn RouteProvider>,
    fallback: Option<Box<dyn RouteProvider>>,
    geocodes: Mutex<LruCache<String, Location>>,
    routes: Mutex<LruCache<(String, String), RouteEstimate>>,
}

impl CachedRouteProvider {
    pub fn new(inner: Box<dyn RouteProvider>, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner,
            fallback: None,
            geocodes: Mutex::new(LruCache::new(capacity)),
            routes: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn with_fallback(mut self, fallback: Box<dyn RouteProvider>) -> Self {
        self.fallback = Some(fallback);
        self
    }
}

#[async_trait]
impl RouteProvider for CachedRouteProvider {
    async fn geocode(&self, address: &str) -> Result<Location, RouteError> {
        let key = normalize_address(address);
        let cached = self
            .geocodes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
            .copied();
        if let Some(hit) = cached {
            return Ok(hit);
        }

        let result = match self.inner.geocode(address).await {
            Ok(location) => Ok(location),
            Err(err) => match &self.fallback {
                Some(fallback) => fallback.geocode(address).await,
                None => Err(err),
            },
        };

        if let Ok(location) = &result {
            self.geocodes
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .put(key, *location);
        }
        result
    }

    async fn distance_time(
        &self,
        origin: &str,
        destination: &str,
    ) -> Result<RouteEstimate, RouteError> {
        let key = (normalize_address(origin), normalize_address(destination));
        let cached = self
            .routes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
            .copied();
        if let Some(hit) = cached {
            return Ok(hit);
        }

        let result = match self.inner.distance_time(origin, destination).await {
            Ok(route) => Ok(route),
            Err(err) => match &self.fallback {
                Some(fallback) => fallback.distance_time(origin, destination).await,
                None => Err(err),
            },
        };

        if let Ok(route) = &result {
            self.routes
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .put(key, *route);
        }
        result
    }
}

// ---------------------------------------------------------------------------
// Factory: build a provider from RouteProviderKind
// ---------------------------------------------------------------------------

/// Default route cache capacity for remote providers.
pub const DEFAULT_ROUTE_CACHE_CAPACITY: usize = 20_000;

/// Construct a boxed [`RouteProvider`] from a [`RouteProviderKind`] descriptor.
///
/// - `Gazetteer` is returned uncached, seeded with `places`.
/// - `Maps` is wrapped in a [`CachedRouteProvider`] that falls back to the
///   gazetteer when the remote API fails.
pub fn build_route_provider(
    kind: &RouteProviderKind,
    places: Vec<(String, Location)>,
) -> Result<Box<dyn RouteProvider>, RouteError> {
    let gazetteer = GazetteerRouteProvider::from_places(places);
    match kind {
        RouteProviderKind::Gazetteer => Ok(Box::new(gazetteer)),

        #[cfg(feature = "maps")]
        RouteProviderKind::Maps { endpoint, api_key } => {
            let inner = Box::new(maps::MapsRouteProvider::new(endpoint, api_key)?);
            Ok(Box::new(
                CachedRouteProvider::new(inner, DEFAULT_ROUTE_CACHE_CAPACITY)
                    .with_fallback(Box::new(gazetteer)),
            ))
        }
    }
}
