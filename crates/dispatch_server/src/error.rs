use axum::{
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use dispatch_core::error::RideError;
use serde_json::json;
use thiserror::Error;
use tracing::{error, warn};

/// Central error type for the HTTP surface.
#[derive(Debug, Error)]
pub enum AppError {
    /// Missing, malformed or expired credentials.
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    /// Authenticated, but the role may not call this route.
    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Ride(#[from] RideError),
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

impl From<PathRejection> for AppError {
    fn from(rejection: PathRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

impl AppError {
    fn parts(&self) -> (StatusCode, &'static str, String) {
        match self {
            AppError::Unauthenticated(msg) => (StatusCode::UNAUTHORIZED, "UNAUTHENTICATED", msg.clone()),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, "FORBIDDEN", msg.clone()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            AppError::Ride(err) => ride_error_parts(err),
        }
    }
}

fn ride_error_parts(err: &RideError) -> (StatusCode, &'static str, String) {
    match err {
        RideError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
        RideError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND", err.to_string()),
        RideError::Unauthorized { .. } => (StatusCode::FORBIDDEN, "FORBIDDEN", err.to_string()),
        RideError::InvalidTransition { .. } => {
            (StatusCode::CONFLICT, "INVALID_TRANSITION", err.to_string())
        }
        RideError::OtpMismatch => (StatusCode::BAD_REQUEST, "OTP_MISMATCH", err.to_string()),
        RideError::DriverBusy { .. } => (StatusCode::CONFLICT, "DRIVER_BUSY", err.to_string()),
        RideError::NotPayable { .. } => (StatusCode::CONFLICT, "NOT_PAYABLE", err.to_string()),
        RideError::PaymentDeclined(msg) => {
            (StatusCode::PAYMENT_REQUIRED, "PAYMENT_DECLINED", msg.clone())
        }
        RideError::RouteUnavailable(source) => {
            error!(error = %source, "route lookup failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "ROUTE_UNAVAILABLE",
                "route between pickup and destination is unavailable".to_string(),
            )
        }
        RideError::PaymentUnavailable(reason) => {
            warn!(%reason, "payment gateway unavailable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                "PAYMENT_UNAVAILABLE",
                "payment gateway unavailable, retry later".to_string(),
            )
        }
        RideError::Store(detail) => {
            error!(%detail, "ride store failure");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "internal server error".to_string(),
            )
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = self.parts();
        let body = Json(json!({
            "error": code,
            "message": message
        }));
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dispatch_core::ids::RideId;
    use dispatch_core::ride::RideStatus;
    use dispatch_core::routing::RouteError;

    fn status_of(err: RideError) -> StatusCode {
        AppError::from(err).into_response().status()
    }

    #[test]
    fn ride_errors_map_to_documented_statuses() {
        assert_eq!(status_of(RideError::Validation("x".into())), StatusCode::BAD_REQUEST);
        assert_eq!(status_of(RideError::NotFound(RideId::new())), StatusCode::NOT_FOUND);
        assert_eq!(
            status_of(RideError::InvalidTransition {
                from: RideStatus::Requested,
                to: RideStatus::Started
            }),
            StatusCode::CONFLICT
        );
        assert_eq!(status_of(RideError::OtpMismatch), StatusCode::BAD_REQUEST);
        assert_eq!(
            status_of(RideError::RouteUnavailable(RouteError::Provider("down".into()))),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            status_of(RideError::PaymentDeclined("no".into())),
            StatusCode::PAYMENT_REQUIRED
        );
        assert_eq!(
            status_of(RideError::Store("disk".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn internal_details_stay_out_of_the_body() {
        let (_, code, message) = AppError::from(RideError::Store("replica lag on shard 7".into())).parts();
        assert_eq!(code, "INTERNAL_ERROR");
        assert!(!message.contains("shard"));

        let (_, code, _) = AppError::from(RideError::RouteUnavailable(RouteError::Provider(
            "quota".into(),
        )))
        .parts();
        assert_eq!(code, "ROUTE_UNAVAILABLE");
    }
}
