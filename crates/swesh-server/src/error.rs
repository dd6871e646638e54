use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use swesh_store::StoreError;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),
}

/// Map a store error to the status code its taxonomy prescribes.
fn store_status(e: &StoreError) -> StatusCode {
    match e {
        StoreError::NotFound
        | StoreError::UserNotFound
        | StoreError::ItemNotFound
        | StoreError::MatchNotFound => StatusCode::NOT_FOUND,

        StoreError::InvalidProposal
        | StoreError::SelfTarget
        | StoreError::SelfInteraction
        | StoreError::InvalidMessage(_) => StatusCode::BAD_REQUEST,

        StoreError::NotOwner | StoreError::NotParticipant => StatusCode::FORBIDDEN,

        StoreError::DuplicatePending
        | StoreError::MatchNotActive
        | StoreError::ItemUnavailable => StatusCode::CONFLICT,

        StoreError::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,

        StoreError::Sqlite(_)
        | StoreError::NoDataDir
        | StoreError::Io(_)
        | StoreError::Migration(_)
        | StoreError::Json(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ServerError::Store(e) => {
                let status = store_status(e);
                if status == StatusCode::INTERNAL_SERVER_ERROR {
                    // Do not leak storage internals to clients.
                    tracing::error!(error = %e, "store operation failed");
                    (status, "Internal server error".to_string())
                } else {
                    (status, e.to_string())
                }
            }
            ServerError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, self.to_string()),
            ServerError::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_errors_map_to_their_status_codes() {
        assert_eq!(
            store_status(&StoreError::DuplicatePending),
            StatusCode::CONFLICT
        );
        assert_eq!(
            store_status(&StoreError::RateLimitExceeded { limit: 50 }),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            store_status(&StoreError::NotParticipant),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            store_status(&StoreError::MatchNotFound),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            store_status(&StoreError::MatchNotActive),
            StatusCode::CONFLICT
        );
    }
}
