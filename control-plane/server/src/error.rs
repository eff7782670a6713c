use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use kite_control_plane_core::Error;
use tracing::warn;

pub type ApiResult<T> = Result<T, ApiError>;

/// Translates the shared error taxonomy into HTTP responses.
#[derive(Debug)]
pub struct ApiError(pub Error);

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            Error::Forbidden(_) => StatusCode::FORBIDDEN,
            Error::Conflict(_) => StatusCode::CONFLICT,
            Error::BadInput(_) => StatusCode::BAD_REQUEST,
            Error::Upstream(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = self.0.to_string();
        if status.is_server_error() {
            warn!(%status, %message, "request failed");
        }
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        Self(error)
    }
}

impl From<kube::Error> for ApiError {
    fn from(error: kube::Error) -> Self {
        // Preserve upstream API status codes where Kubernetes supplied one.
        if let kube::Error::Api(response) = &error {
            if response.code == 404 {
                return Self(Error::NotFound(response.message.clone()));
            }
            if response.code == 409 {
                return Self(Error::Conflict(response.message.clone()));
            }
        }
        Self(Error::Upstream(anyhow::anyhow!(error)))
    }
}
