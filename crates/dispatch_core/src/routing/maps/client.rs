use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Url};

use crate::routing::{RouteError, RouteEstimate, RouteProvider};
use crate::spatial::Location;

use super::parser::{parse_distance_matrix_response, parse_geocode_response};
use super::response::{DistanceMatrixResponse, GeocodeResponse};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(3);

/// Thin async HTTP client for a geocode / distance-matrix maps API.
#[derive(Debug, Clone)]
pub struct MapsRouteProvider {
    client: Client,
    endpoint: String,
    api_key: String,
}

impl MapsRouteProvider {
    /// Create a client for the given API root (e.g. `https://maps.googleapis.com/maps/api`).
    pub fn new(endpoint: &str, api_key: &str) -> Result<Self, RouteError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|err| RouteError::Provider(format!("failed to build maps client: {err}")))?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }

    fn url(&self, path: &str, params: &[(&str, &str)]) -> Result<Url, RouteError> {
        let mut url = Url::parse(&format!("{}/{}", self.endpoint, path))
            .map_err(|err| RouteError::Provider(format!("failed to build maps URL: {err}")))?;
        url.query_pairs_mut()
            .extend_pairs(params)
            .append_pair("key", &self.api_key);
        Ok(url)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: Url) -> Result<T, RouteError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|err| RouteError::Provider(format!("maps request failed: {err}")))?;
        response
            .json()
            .await
            .map_err(|err| RouteError::Provider(format!("maps response was not JSON: {err}")))
    }
}

#[async_trait]
impl RouteProvider for MapsRouteProvider {
    async fn geocode(&self, address: &str) -> Result<Location, RouteError> {
        let url = self.url("geocode/json", &[("address", address)])?;
        let parsed: GeocodeResponse = self.get_json(url).await?;
        parse_geocode_response(address, parsed)
    }

    async fn distance_time(
        &self,
        origin: &str,
        destination: &str,
    ) -> Result<RouteEstimate, RouteError> {
        let url = self.url(
            "distancematrix/json",
            &[("origins", origin), ("destinations", destination)],
        )?;
        let parsed: DistanceMatrixResponse = self.get_json(url).await?;
        parse_distance_matrix_response(origin, destination, parsed)
    }
}
