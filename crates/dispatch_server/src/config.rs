//! Command-line and environment configuration for the server binary.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, ValueEnum};
use dispatch_core::dispatch::DispatchConfig;
use dispatch_core::lifecycle::{ActiveRidePolicy, LifecycleConfig};
use dispatch_core::routing::RouteProviderKind;
use dispatch_core::service::ServiceConfig;
use dispatch_core::spatial::Location;
use serde::Deserialize;

#[derive(Debug, Clone, Parser)]
#[command(
    name = "dispatch-server",
    about = "Ride dispatch service: fares, matching and live ride updates"
)]
pub struct Args {
    /// Address to listen on
    #[arg(long, env = "DISPATCH_BIND", default_value = "0.0.0.0:8080")]
    pub bind: SocketAddr,

    /// HS256 secret shared with the account service
    #[arg(long, env = "DISPATCH_JWT_SECRET", hide_env_values = true)]
    pub jwt_secret: String,

    /// Search radius for new rides, in kilometres
    #[arg(long, env = "DISPATCH_RADIUS_KM", default_value_t = 10.0)]
    pub radius_km: f64,

    /// Dispatch attempts running at once
    #[arg(long, env = "DISPATCH_WORKERS", default_value_t = 4)]
    pub workers: usize,

    /// Rides waiting for a dispatch worker before creation starts failing over
    #[arg(long, env = "DISPATCH_QUEUE_CAPACITY", default_value_t = 1024)]
    pub queue_capacity: usize,

    #[arg(long, env = "DISPATCH_OTP_DIGITS", default_value_t = 6)]
    pub otp_digits: usize,

    /// Accepting while already on a ride
    #[arg(value_enum, long, env = "DISPATCH_ACTIVE_RIDE_POLICY", default_value_t = PolicyArg::Reject)]
    pub active_ride_policy: PolicyArg,

    /// Skip drivers that already hold a ride when fanning out offers
    #[arg(long, env = "DISPATCH_SKIP_BUSY_DRIVERS")]
    pub skip_busy_drivers: bool,

    /// JSON array of `{"name", "latitude", "longitude"}` entries
    #[arg(long, env = "DISPATCH_PLACES")]
    pub places: Option<PathBuf>,

    /// Maps API base URL; requires `--maps-api-key`
    #[cfg(feature = "maps")]
    #[arg(long, env = "DISPATCH_MAPS_ENDPOINT", requires = "maps_api_key")]
    pub maps_endpoint: Option<String>,

    #[cfg(feature = "maps")]
    #[arg(long, env = "DISPATCH_MAPS_API_KEY", hide_env_values = true)]
    pub maps_api_key: Option<String>,

    /// Overridden by `RUST_LOG` when set
    #[arg(long, env = "DISPATCH_LOG", default_value = "info,tower_http=debug")]
    pub log_filter: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PolicyArg {
    /// Refuse the accept
    Reject,
    /// Log and allow it
    Warn,
}

impl From<PolicyArg> for ActiveRidePolicy {
    fn from(arg: PolicyArg) -> Self {
        match arg {
            PolicyArg::Reject => ActiveRidePolicy::Reject,
            PolicyArg::Warn => ActiveRidePolicy::Warn,
        }
    }
}

#[derive(Debug, Deserialize)]
struct PlaceEntry {
    name: String,
    latitude: f64,
    longitude: f64,
}

impl Args {
    pub fn service_config(&self) -> anyhow::Result<ServiceConfig> {
        let config = ServiceConfig::default()
            .with_dispatch(
                DispatchConfig::default()
                    .with_workers(self.workers)
                    .with_queue_capacity(self.queue_capacity)
                    .with_skip_busy_drivers(self.skip_busy_drivers),
            )
            .with_lifecycle(
                LifecycleConfig::default()
                    .with_dispatch_radius_km(self.radius_km)
                    .with_otp_digits(self.otp_digits)
                    .with_active_ride_policy(self.active_ride_policy.into()),
            );
        config
            .validate()
            .map_err(|reason| anyhow::anyhow!("invalid configuration: {reason}"))?;
        Ok(config)
    }

    pub fn route_provider_kind(&self) -> RouteProviderKind {
        #[cfg(feature = "maps")]
        {
            if let (Some(endpoint), Some(api_key)) = (&self.maps_endpoint, &self.maps_api_key) {
                return RouteProviderKind::Maps {
                    endpoint: endpoint.clone(),
                    api_key: api_key.clone(),
                };
            }
        }
        RouteProviderKind::Gazetteer
    }

    pub fn load_places(&self) -> anyhow::Result<Vec<(String, Location)>> {
        match &self.places {
            Some(path) => load_places(path),
            None => Ok(Vec::new()),
        }
    }
}

pub fn load_places(path: &Path) -> anyhow::Result<Vec<(String, Location)>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading places from {}", path.display()))?;
    let entries: Vec<PlaceEntry> = serde_json::from_str(&raw)
        .with_context(|| format!("parsing places in {}", path.display()))?;

    entries
        .into_iter()
        .map(|entry| {
            let location = Location::new(entry.latitude, entry.longitude);
            anyhow::ensure!(
                location.is_finite()
                    && (-90.0..=90.0).contains(&entry.latitude)
                    && (-180.0..=180.0).contains(&entry.longitude),
                "place {:?} has invalid coordinates",
                entry.name
            );
            Ok((entry.name, location))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn parse(extra: &[&str]) -> Args {
        let mut argv = vec!["dispatch-server", "--jwt-secret", "s3cret"];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv).expect("args")
    }

    #[test]
    fn defaults_map_onto_service_config() {
        let args = parse(&[]);
        let config = args.service_config().expect("config");
        assert_eq!(config.lifecycle.dispatch_radius_km, 10.0);
        assert_eq!(config.lifecycle.otp_digits, 6);
        assert_eq!(config.lifecycle.active_ride_policy, ActiveRidePolicy::Reject);
        assert_eq!(config.dispatch.workers, 4);
        assert!(!config.dispatch.skip_busy_drivers);
        assert_eq!(args.route_provider_kind(), RouteProviderKind::Gazetteer);
    }

    #[test]
    fn overrides_and_validation() {
        let args = parse(&["--radius-km", "2.5", "--active-ride-policy", "warn", "--skip-busy-drivers"]);
        let config = args.service_config().expect("config");
        assert_eq!(config.lifecycle.dispatch_radius_km, 2.5);
        assert_eq!(config.lifecycle.active_ride_policy, ActiveRidePolicy::Warn);
        assert!(config.dispatch.skip_busy_drivers);

        assert!(parse(&["--otp-digits", "2"]).service_config().is_err());
        assert!(parse(&["--radius-km", "0"]).service_config().is_err());
    }

    #[test]
    fn secret_is_required() {
        assert!(Args::try_parse_from(["dispatch-server"]).is_err());
    }

    #[test]
    fn places_file_is_parsed_and_checked() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        write!(
            file,
            r#"[{{"name": "MG Road", "latitude": 12.975, "longitude": 77.6}},
               {{"name": "Airport", "latitude": 13.1986, "longitude": 77.7066}}]"#
        )
        .expect("write");

        let places = load_places(file.path()).expect("places");
        assert_eq!(places.len(), 2);
        assert_eq!(places[0].0, "MG Road");
        assert_eq!(places[1].1, Location::new(13.1986, 77.7066));

        let mut bad = tempfile::NamedTempFile::new().expect("tempfile");
        write!(bad, r#"[{{"name": "Nowhere", "latitude": 123.0, "longitude": 0.0}}]"#).expect("write");
        assert!(load_places(bad.path()).is_err());
    }
}
