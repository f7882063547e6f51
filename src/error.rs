use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    /// Optimistic-concurrency loss: the booking's status changed under the
    /// caller. Re-read before deciding whether the operation still applies.
    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    InvalidWindow(String),

    #[error("operation not valid from status '{status}'")]
    IllegalTransition { status: String },

    #[error("{0}")]
    NotCancelable(String),

    #[error("{0}")]
    InvalidExtension(String),

    #[error("{0}")]
    ApprovalWindowExpired(String),

    #[error("payment authorization failed: {0}")]
    PaymentAuthorizationFailed(String),

    #[error("payment capture failed: {0}")]
    PaymentCaptureFailed(String),

    #[error("{0}")]
    Dependency(String),

    #[error("{0}")]
    Internal(String),
}

impl AppError {
    /// Stable machine-readable kind for API consumers and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::BadRequest(_) => "bad_request",
            AppError::Unauthorized(_) => "unauthorized",
            AppError::Forbidden(_) => "forbidden",
            AppError::NotFound(_) => "not_found",
            AppError::Conflict(_) => "conflict",
            AppError::InvalidWindow(_) => "invalid_window",
            AppError::IllegalTransition { .. } => "illegal_transition",
            AppError::NotCancelable(_) => "not_cancelable",
            AppError::InvalidExtension(_) => "invalid_extension",
            AppError::ApprovalWindowExpired(_) => "approval_window_expired",
            AppError::PaymentAuthorizationFailed(_) => "payment_authorization_failed",
            AppError::PaymentCaptureFailed(_) => "payment_capture_failed",
            AppError::Dependency(_) => "dependency_unavailable",
            AppError::Internal(_) => "internal_error",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::BadRequest(_) | AppError::InvalidWindow(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::IllegalTransition { .. }
            | AppError::NotCancelable(_)
            | AppError::InvalidExtension(_)
            | AppError::ApprovalWindowExpired(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::PaymentAuthorizationFailed(_) | AppError::PaymentCaptureFailed(_) => {
                StatusCode::PAYMENT_REQUIRED
            }
            AppError::Dependency(_) => StatusCode::BAD_GATEWAY,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = serde_json::json!({
            "error": self.to_string(),
            "kind": self.kind(),
        });
        (status, axum::Json(body)).into_response()
    }
}
