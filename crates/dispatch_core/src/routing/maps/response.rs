#[derive(serde::Deserialize)]
pub(super) struct GeocodeResponse {
    pub(super) status: String,
    #[serde(default)]
    pub(super) results: Vec<GeocodeResult>,
}

#[derive(serde::Deserialize)]
pub(super) struct GeocodeResult {
    pub(super) geometry: GeocodeGeometry,
}

#[derive(serde::Deserialize)]
pub(super) struct GeocodeGeometry {
    pub(super) location: LatLngLiteral,
}

#[derive(serde::Deserialize)]
pub(super) struct LatLngLiteral {
    pub(super) lat: f64,
    pub(super) lng: f64,
}

#[derive(serde::Deserialize)]
pub(super) struct DistanceMatrixResponse {
    pub(super) status: String,
    pub(super) error_message: Option<String>,
    #[serde(default)]
    pub(super) rows: Vec<DistanceMatrixRow>,
}

#[derive(serde::Deserialize)]
pub(super) struct DistanceMatrixRow {
    pub(super) elements: Vec<DistanceMatrixElement>,
}

#[derive(serde::Deserialize)]
pub(super) struct DistanceMatrixElement {
    pub(super) status: String,
    pub(super) distance: Option<MatrixValue>,
    pub(super) duration: Option<MatrixValue>,
}

/// `value` is metres for distance, seconds for duration.
#[derive(serde::Deserialize)]
pub(super) struct MatrixValue {
    pub(super) value: f64,
}
