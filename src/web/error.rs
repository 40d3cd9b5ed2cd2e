use crate::core::SyncError;
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

#[derive(Debug)]
pub enum WebError {
    Sync(SyncError),
    Input(String),
    NotFound(String),
    Conflict(String),
}

impl From<SyncError> for WebError {
    fn from(err: SyncError) -> Self {
        WebError::Sync(err)
    }
}

impl IntoResponse for WebError {
    fn into_response(self) -> Response {
        let (status, message, code) = match self {
            WebError::Sync(err @ SyncError::NotFound { .. }) => {
                (StatusCode::NOT_FOUND, err.to_string(), "not_found")
            }
            WebError::Sync(
                err @ (SyncError::BindingConflict { .. } | SyncError::PositionConflict { .. }),
            ) => (StatusCode::CONFLICT, err.to_string(), "conflict"),
            WebError::Sync(err @ SyncError::Mirror(_)) => {
                (StatusCode::BAD_GATEWAY, err.to_string(), "mirror_unavailable")
            }
            WebError::Sync(err @ (SyncError::Store(_) | SyncError::Io(_))) => (
                StatusCode::SERVICE_UNAVAILABLE,
                err.to_string(),
                "store_unavailable",
            ),
            WebError::Sync(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                err.to_string(),
                "internal_error",
            ),
            WebError::Input(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg, "input_error"),
            WebError::NotFound(msg) => (StatusCode::NOT_FOUND, msg, "not_found"),
            WebError::Conflict(msg) => (StatusCode::CONFLICT, msg, "conflict"),
        };

        let body = Json(ErrorResponse {
            error: message,
            code: code.to_string(),
        });

        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, WebError>;

#[cfg(test)]
mod tests {
    use super::WebError;
    use crate::core::SyncError;
    use crate::mirror::MirrorError;
    use axum::http::StatusCode;
    use axum::response::IntoResponse;
    use uuid::Uuid;

    #[test]
    fn sync_errors_map_to_http_statuses() {
        let cases = [
            (
                SyncError::organization_not_found(Uuid::new_v4()),
                StatusCode::NOT_FOUND,
            ),
            (
                SyncError::Mirror(MirrorError::RateLimited),
                StatusCode::BAD_GATEWAY,
            ),
            (SyncError::store("down"), StatusCode::SERVICE_UNAVAILABLE),
            (
                SyncError::Config("bad".to_string()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, expected) in cases {
            assert_eq!(WebError::from(err).into_response().status(), expected);
        }
    }
}
