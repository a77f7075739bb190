//! Fare estimation from route distance and duration.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::RideError;
use crate::routing::{RouteError, RouteEstimate, RouteProvider};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VehicleClass {
    Auto,
    Car,
    Moto,
}

impl VehicleClass {
    pub const ALL: [VehicleClass; 3] = [VehicleClass::Auto, VehicleClass::Car, VehicleClass::Moto];
}

/// Rates for one vehicle class, in currency units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FareRates {
    pub base_fare: f64,
    pub per_km_rate: f64,
    pub per_minute_rate: f64,
}

impl FareRates {
    pub const fn new(base_fare: f64, per_km_rate: f64, per_minute_rate: f64) -> Self {
        Self {
            base_fare,
            per_km_rate,
            per_minute_rate,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricingConfig {
    pub auto: FareRates,
    pub car: FareRates,
    pub moto: FareRates,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            auto: FareRates::new(30.0, 10.0, 2.0),
            car: FareRates::new(50.0, 15.0, 3.0),
            moto: FareRates::new(20.0, 8.0, 1.5),
        }
    }
}

impl PricingConfig {
    pub fn rates(&self, class: VehicleClass) -> FareRates {
        match class {
            VehicleClass::Auto => self.auto,
            VehicleClass::Car => self.car,
            VehicleClass::Moto => self.moto,
        }
    }

    /// Negative or non-finite rates would make fares decrease with distance.
    pub fn validate(&self) -> Result<(), String> {
        for class in VehicleClass::ALL {
            let rates = self.rates(class);
            let values = [rates.base_fare, rates.per_km_rate, rates.per_minute_rate];
            if values.iter().any(|v| !v.is_finite() || *v < 0.0) {
                return Err(format!("{class:?} rates must be finite and non-negative"));
            }
        }
        Ok(())
    }
}

/// Calculate fare for a trip.
///
/// Formula: `fare = base + distance_km * per_km + minutes * per_minute`,
/// rounded to cents. Negative inputs count as zero.
pub fn calculate_fare(rates: FareRates, distance_km: f64, duration_secs: f64) -> f64 {
    let distance_km = distance_km.max(0.0);
    let minutes = duration_secs.max(0.0) / 60.0;
    let raw = rates.base_fare + distance_km * rates.per_km_rate + minutes * rates.per_minute_rate;
    (raw * 100.0).round() / 100.0
}

/// Fare for every vehicle class over the same route.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FareTable {
    pub auto: f64,
    pub car: f64,
    pub moto: f64,
}

impl FareTable {
    pub fn get(&self, class: VehicleClass) -> f64 {
        match class {
            VehicleClass::Auto => self.auto,
            VehicleClass::Car => self.car,
            VehicleClass::Moto => self.moto,
        }
    }
}

/// Prices rides using one distance/duration lookup per estimate.
pub struct FareEstimator {
    routes: Arc<dyn RouteProvider>,
    pricing: PricingConfig,
    timeout: Duration,
}

impl FareEstimator {
    pub fn new(routes: Arc<dyn RouteProvider>, pricing: PricingConfig, timeout: Duration) -> Self {
        Self {
            routes,
            pricing,
            timeout,
        }
    }

    pub fn pricing(&self) -> &PricingConfig {
        &self.pricing
    }

    pub async fn estimate(
        &self,
        pickup: &str,
        destination: &str,
        class: VehicleClass,
    ) -> Result<f64, RideError> {
        let route = self.route(pickup, destination).await?;
        Ok(calculate_fare(
            self.pricing.rates(class),
            route.distance_km,
            route.duration_secs,
        ))
    }

    pub async fn estimate_all(&self, pickup: &str, destination: &str) -> Result<FareTable, RideError> {
        let route = self.route(pickup, destination).await?;
        let fare = |class| {
            calculate_fare(
                self.pricing.rates(class),
                route.distance_km,
                route.duration_secs,
            )
        };
        Ok(FareTable {
            auto: fare(VehicleClass::Auto),
            car: fare(VehicleClass::Car),
            moto: fare(VehicleClass::Moto),
        })
    }

    async fn route(&self, pickup: &str, destination: &str) -> Result<RouteEstimate, RideError> {
        match tokio::time::timeout(self.timeout, self.routes.distance_time(pickup, destination)).await {
            Ok(result) => result.map_err(RideError::from),
            Err(_) => Err(RideError::RouteUnavailable(RouteError::Provider(
                "distance lookup timed out".to_string(),
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::GazetteerRouteProvider;
    use crate::spatial::Location;
    use proptest::prelude::*;

    #[test]
    fn fare_includes_base_distance_and_time() {
        let rates = PricingConfig::default().car;
        assert_eq!(calculate_fare(rates, 0.0, 0.0), rates.base_fare);
        // 50 + 10 km * 15 + 20 min * 3
        assert_eq!(calculate_fare(rates, 10.0, 1200.0), 260.0);
    }

    #[test]
    fn default_pricing_is_valid_and_negative_rates_are_rejected() {
        assert!(PricingConfig::default().validate().is_ok());
        let mut pricing = PricingConfig::default();
        pricing.moto.per_km_rate = -1.0;
        assert!(pricing.validate().is_err());
    }

    proptest! {
        #[test]
        fn fare_is_monotonic_in_distance(
            class_idx in 0usize..3,
            distance in 0.0f64..500.0,
            extra in 0.0f64..500.0,
            duration in 0.0f64..36_000.0,
        ) {
            let rates = PricingConfig::default().rates(VehicleClass::ALL[class_idx]);
            prop_assert!(
                calculate_fare(rates, distance, duration)
                    <= calculate_fare(rates, distance + extra, duration)
            );
        }

        #[test]
        fn fare_is_monotonic_in_duration(
            class_idx in 0usize..3,
            distance in 0.0f64..500.0,
            duration in 0.0f64..36_000.0,
            extra in 0.0f64..36_000.0,
        ) {
            let rates = PricingConfig::default().rates(VehicleClass::ALL[class_idx]);
            prop_assert!(
                calculate_fare(rates, distance, duration)
                    <= calculate_fare(rates, distance, duration + extra)
            );
        }
    }

    #[tokio::test]
    async fn estimator_prices_every_class_from_one_route() {
        let routes = Arc::new(GazetteerRouteProvider::from_places([
            ("MG Road", Location::new(12.9750, 77.6000)),
            ("Indiranagar", Location::new(12.9784, 77.6408)),
        ]));
        let estimator =
            FareEstimator::new(routes, PricingConfig::default(), Duration::from_secs(1));

        let table = estimator
            .estimate_all("MG Road", "Indiranagar")
            .await
            .expect("fare table");
        assert!(table.moto < table.auto && table.auto < table.car);
        let car = estimator
            .estimate("MG Road", "Indiranagar", VehicleClass::Car)
            .await
            .expect("car fare");
        assert_eq!(car, table.get(VehicleClass::Car));
    }

    #[tokio::test]
    async fn unknown_route_is_route_unavailable() {
        let estimator = FareEstimator::new(
            Arc::new(GazetteerRouteProvider::new()),
            PricingConfig::default(),
            Duration::from_secs(1),
        );
        let err = estimator
            .estimate("Nowhere", "Elsewhere", VehicleClass::Auto)
            .await
            .expect_err("no route");
        assert!(matches!(err, RideError::RouteUnavailable(RouteError::NoRoute { .. })));
    }
}
