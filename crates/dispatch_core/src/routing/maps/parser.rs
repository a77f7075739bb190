use crate::routing::{RouteError, RouteEstimate};
use crate::spatial::Location;

use super::response::{DistanceMatrixResponse, GeocodeResponse};

pub(super) fn parse_geocode_response(
    address: &str,
    resp: GeocodeResponse,
) -> Result<Location, RouteError> {
    match resp.status.as_str() {
        "OK" => {}
        "ZERO_RESULTS" => return Err(RouteError::AddressNotFound(address.to_string())),
        other => return Err(RouteError::Provider(format!("geocode status {other}"))),
    }

    let result = resp
        .results
        .first()
        .ok_or_else(|| RouteError::AddressNotFound(address.to_string()))?;
    let location = Location::new(result.geometry.location.lat, result.geometry.location.lng);
    if !location.is_finite() {
        return Err(RouteError::Provider("geocode returned non-finite coordinates".into()));
    }
    Ok(location)
}

pub(super) fn parse_distance_matrix_response(
    origin: &str,
    destination: &str,
    resp: DistanceMatrixResponse,
) -> Result<RouteEstimate, RouteError> {
    let no_route = || RouteError::NoRoute {
        origin: origin.to_string(),
        destination: destination.to_string(),
    };

    if resp.status != "OK" {
        let detail = resp.error_message.unwrap_or_default();
        return Err(RouteError::Provider(format!(
            "distance matrix status {} {}",
            resp.status, detail
        )));
    }

    let element = resp
        .rows
        .first()
        .and_then(|row| row.elements.first())
        .ok_or_else(no_route)?;
    if element.status != "OK" {
        return Err(no_route());
    }

    match (&element.distance, &element.duration) {
        (Some(distance), Some(duration)) => Ok(RouteEstimate {
            distance_km: distance.value / 1000.0,
            duration_secs: duration.value,
        }),
        _ => Err(no_route()),
    }
}
