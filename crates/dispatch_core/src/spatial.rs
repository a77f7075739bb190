//! Spatial operations: driver presence records and radius queries.
//!
//! This module provides:
//!
//! - **Location**: WGS-84 latitude/longitude in degrees
//! - **Distance calculations**: Haversine distance on a spherical earth (6371 km)
//! - **GeoIndex**: driver id → [`DriverRecord`], bucketed by H3 cell for radius queries
//!
//! Drivers are bucketed at resolution 7 (~1.4 km edge), suitable for city-scale
//! dispatch radii. A query walks the grid disk that covers the radius and then
//! filters by exact haversine distance, so results match a full scan.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use h3o::{CellIndex, LatLng, Resolution};
use serde::{Deserialize, Serialize};

use crate::ids::{ActorId, ConnectionId, RideId};

/// Mean earth radius used by the haversine approximation.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// H3 resolution used to bucket driver locations.
pub const INDEX_RESOLUTION: Resolution = Resolution::Seven;

/// Lower bound of a cell's edge relative to the resolution average.
const MIN_EDGE_FACTOR: f64 = 0.6;

/// Grid disks larger than this fall back to a full scan.
const MAX_GRID_DISK_K: u32 = 64;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
}

impl Location {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    pub fn is_finite(&self) -> bool {
        self.latitude.is_finite() && self.longitude.is_finite()
    }

    fn cell(&self) -> Option<CellIndex> {
        LatLng::new(self.latitude, self.longitude)
            .ok()
            .map(|ll| ll.to_cell(INDEX_RESOLUTION))
    }
}

/// Great-circle distance in kilometres between two points.
pub fn haversine_km(a: Location, b: Location) -> f64 {
    let (lat1, lon1) = (a.latitude.to_radians(), a.longitude.to_radians());
    let (lat2, lon2) = (b.latitude.to_radians(), b.longitude.to_radians());
    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;
    let sin_dlat = (dlat * 0.5).sin();
    let sin_dlon = (dlon * 0.5).sin();
    let h = sin_dlat * sin_dlat + lat1.cos() * lat2.cos() * sin_dlon * sin_dlon;
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    EARTH_RADIUS_KM * c
}

/// Presence state of one driver, as last reported by the driver's app.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverRecord {
    pub id: ActorId,
    pub location: Option<Location>,
    pub connection_id: Option<ConnectionId>,
    pub active_ride_id: Option<RideId>,
}

impl DriverRecord {
    pub fn new(id: ActorId) -> Self {
        Self {
            id,
            location: None,
            connection_id: None,
            active_ride_id: None,
        }
    }
}

#[derive(Debug, Default)]
struct IndexState {
    records: HashMap<ActorId, DriverRecord>,
    /// Map from H3 cell to drivers whose last location falls in that cell
    drivers_by_cell: HashMap<CellIndex, Vec<ActorId>>,
    /// Reverse mapping: driver → current cell (for efficient updates)
    driver_to_cell: HashMap<ActorId, CellIndex>,
}

impl IndexState {
    fn record_mut(&mut self, driver_id: ActorId) -> &mut DriverRecord {
        self.records
            .entry(driver_id)
            .or_insert_with(|| DriverRecord::new(driver_id))
    }

    fn unbucket(&mut self, driver_id: ActorId) {
        if let Some(cell) = self.driver_to_cell.remove(&driver_id) {
            if let Some(drivers) = self.drivers_by_cell.get_mut(&cell) {
                drivers.retain(|&d| d != driver_id);
                if drivers.is_empty() {
                    self.drivers_by_cell.remove(&cell);
                }
            }
        }
    }

    fn rebucket(&mut self, driver_id: ActorId, new_cell: Option<CellIndex>) {
        if self.driver_to_cell.get(&driver_id).copied() == new_cell {
            return;
        }
        self.unbucket(driver_id);
        if let Some(cell) = new_cell {
            self.drivers_by_cell.entry(cell).or_default().push(driver_id);
            self.driver_to_cell.insert(driver_id, cell);
        }
    }

    fn scan(&self, center: Location, radius_km: f64) -> Vec<DriverRecord> {
        collect_within(center, radius_km, self.records.values())
    }
}

/// Driver presence index answering "who is within R km of P".
///
/// Mutations are last-write-wins with no ordering between drivers; a query
/// racing an update sees either the old or the new location.
#[derive(Debug, Default)]
pub struct GeoIndex {
    state: RwLock<IndexState>,
}

impl GeoIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, IndexState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, IndexState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record the driver's latest location, creating the record on first sight.
    pub fn upsert_location(&self, driver_id: ActorId, location: Location) {
        let mut state = self.write();
        state.record_mut(driver_id).location = Some(location);
        state.rebucket(driver_id, location.cell());
    }

    /// Bind or clear the driver's live connection id.
    pub fn set_connection(&self, driver_id: ActorId, connection_id: Option<ConnectionId>) {
        self.write().record_mut(driver_id).connection_id = connection_id;
    }

    /// Clear the connection id only if it still is `connection_id`.
    ///
    /// A closing socket must not clear the binding of a newer socket that the
    /// same driver joined from in the meantime.
    pub fn release_connection(&self, driver_id: ActorId, connection_id: ConnectionId) -> bool {
        let mut state = self.write();
        match state.records.get_mut(&driver_id) {
            Some(record) if record.connection_id == Some(connection_id) => {
                record.connection_id = None;
                true
            }
            _ => false,
        }
    }

    pub fn set_active_ride(&self, driver_id: ActorId, ride_id: Option<RideId>) {
        self.write().record_mut(driver_id).active_ride_id = ride_id;
    }

    pub fn remove(&self, driver_id: ActorId) -> Option<DriverRecord> {
        let mut state = self.write();
        state.unbucket(driver_id);
        state.records.remove(&driver_id)
    }

    pub fn get(&self, driver_id: ActorId) -> Option<DriverRecord> {
        self.read().records.get(&driver_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every connected driver within `radius_km` (inclusive) of `center`,
    /// nearest first.
    pub fn query(&self, center: Location, radius_km: f64) -> Vec<DriverRecord> {
        if !center.is_finite() || !(radius_km >= 0.0) {
            return Vec::new();
        }
        let state = self.read();
        let (Some(origin), Some(k)) = (center.cell(), grid_disk_k(radius_km)) else {
            return state.scan(center, radius_km);
        };

        let cells = origin.grid_disk::<Vec<_>>(k);
        let candidates = cells
            .iter()
            .filter_map(|cell| state.drivers_by_cell.get(cell))
            .flatten()
            .filter_map(|driver_id| state.records.get(driver_id));
        collect_within(center, radius_km, candidates)
    }

    /// Baseline query: haversine over every record, no grid.
    pub fn query_full_scan(&self, center: Location, radius_km: f64) -> Vec<DriverRecord> {
        if !center.is_finite() || !(radius_km >= 0.0) {
            return Vec::new();
        }
        self.read().scan(center, radius_km)
    }
}

/// Grid distance that conservatively covers `radius_km` around any point of
/// the origin cell, or `None` when a full scan is cheaper.
fn grid_disk_k(radius_km: f64) -> Option<u32> {
    let avg_edge = INDEX_RESOLUTION.edge_length_km();
    // Point and query center may each sit up to ~1.5 edges from their cell center.
    let reach = radius_km + 3.0 * avg_edge;
    // Each grid ring advances at least 1.5 edges of the smallest cell.
    let k = (reach / (1.5 * MIN_EDGE_FACTOR * avg_edge)).ceil() + 1.0;
    (k.is_finite() && k <= f64::from(MAX_GRID_DISK_K)).then_some(k as u32)
}

fn collect_within<'a>(
    center: Location,
    radius_km: f64,
    records: impl Iterator<Item = &'a DriverRecord>,
) -> Vec<DriverRecord> {
    let mut hits: Vec<(f64, &DriverRecord)> = records
        .filter(|record| record.connection_id.is_some())
        .filter_map(|record| {
            let distance = haversine_km(center, record.location?);
            (distance <= radius_km).then_some((distance, record))
        })
        .collect();
    hits.sort_by(|a, b| a.0.total_cmp(&b.0).then_with(|| a.1.id.cmp(&b.1.id)));
    hits.into_iter().map(|(_, record)| record.clone()).collect()
}
