use dispatch_core::ids::{ActorId, ConnectionId};
use dispatch_core::spatial::{GeoIndex, Location};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Builder for driver presence fixtures in a bare [`GeoIndex`].
#[derive(Clone, Debug)]
pub struct DriverBuilder {
    location: Option<Location>,
    connected: bool,
}

impl Default for DriverBuilder {
    fn default() -> Self {
        Self {
            location: None,
            connected: true,
        }
    }
}

impl DriverBuilder {
    pub fn at(latitude: f64, longitude: f64) -> Self {
        Self {
            location: Some(Location::new(latitude, longitude)),
            ..Self::default()
        }
    }

    pub fn disconnected(mut self) -> Self {
        self.connected = false;
        self
    }

    pub fn insert(self, index: &GeoIndex) -> ActorId {
        let driver = ActorId::new();
        if let Some(location) = self.location {
            index.upsert_location(driver, location);
        }
        if self.connected {
            index.set_connection(driver, Some(ConnectionId::new()));
        }
        driver
    }
}

/// `count` connected drivers scattered uniformly within `spread_deg` of `center`.
pub fn scatter(index: &GeoIndex, center: Location, spread_deg: f64, count: usize, seed: u64) {
    let mut rng = StdRng::seed_from_u64(seed);
    for _ in 0..count {
        let latitude = center.latitude + rng.gen_range(-spread_deg..=spread_deg);
        let longitude = center.longitude + rng.gen_range(-spread_deg..=spread_deg);
        DriverBuilder::at(latitude, longitude).insert(index);
    }
}
