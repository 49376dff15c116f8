use service_core::error::AppError;
use thiserror::Error;

/// Why a signed token was rejected.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenError {
    #[error("token is malformed")]
    Malformed,

    #[error("token signature is invalid")]
    InvalidSignature,

    /// Past its expiry, or no longer backed by a stored session.
    #[error("token is expired or revoked")]
    ExpiredOrRevoked,
}

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    Database(#[from] mongodb::error::Error),

    #[error("Cache error: {0}")]
    Cache(#[from] redis::RedisError),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("{0}")]
    Conflict(String),

    #[error("User not found")]
    UserNotFound,

    #[error("Account is deactivated")]
    AccountDeactivated,

    #[error("Email address has not been verified")]
    EmailNotVerified,

    #[error("Token rejected: {0}")]
    Token(#[from] TokenError),

    #[error("Refresh token not found")]
    RefreshTokenNotFound,

    #[error("Invalid token")]
    InvalidVerificationToken,

    #[error("Token expired")]
    VerificationTokenExpired,

    #[error("Upstream error: {0}")]
    Upstream(String),
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Database(e) => AppError::DatabaseError(anyhow::Error::new(e)),
            ServiceError::Cache(e) => AppError::CacheError(e),
            ServiceError::Internal(e) => AppError::InternalError(e),
            ServiceError::Validation(msg) => AppError::BadRequest(anyhow::anyhow!(msg)),
            ServiceError::InvalidCredentials => {
                AppError::AuthError(anyhow::anyhow!("Invalid email or password"))
            }
            ServiceError::Conflict(msg) => AppError::Conflict(anyhow::anyhow!(msg)),
            ServiceError::UserNotFound => AppError::NotFound(anyhow::anyhow!("User not found")),
            ServiceError::AccountDeactivated => {
                AppError::Forbidden(anyhow::anyhow!("Account is deactivated"))
            }
            ServiceError::EmailNotVerified => {
                AppError::Forbidden(anyhow::anyhow!("Email address has not been verified"))
            }
            ServiceError::Token(_) => AppError::AuthError(anyhow::anyhow!("Invalid or expired token")),
            ServiceError::RefreshTokenNotFound => {
                AppError::NotFound(anyhow::anyhow!("Refresh token not found"))
            }
            ServiceError::InvalidVerificationToken => {
                AppError::BadRequest(anyhow::anyhow!("Invalid token"))
            }
            ServiceError::VerificationTokenExpired => {
                AppError::BadRequest(anyhow::anyhow!("Token expired"))
            }
            ServiceError::Upstream(msg) => AppError::BadGateway(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn token_failures_collapse_to_one_client_error() {
        for kind in [
            TokenError::Malformed,
            TokenError::InvalidSignature,
            TokenError::ExpiredOrRevoked,
        ] {
            let app: AppError = ServiceError::Token(kind).into();
            assert_eq!(app.status(), StatusCode::UNAUTHORIZED);
            assert_eq!(app.to_string(), "Authentication error: Invalid or expired token");
        }
    }

    #[test]
    fn domain_errors_map_to_http_status() {
        let cases = [
            (ServiceError::InvalidCredentials, StatusCode::UNAUTHORIZED),
            (ServiceError::Conflict("dup".into()), StatusCode::CONFLICT),
            (ServiceError::UserNotFound, StatusCode::NOT_FOUND),
            (ServiceError::AccountDeactivated, StatusCode::FORBIDDEN),
            (ServiceError::RefreshTokenNotFound, StatusCode::NOT_FOUND),
            (ServiceError::Validation("x".into()), StatusCode::BAD_REQUEST),
            (ServiceError::VerificationTokenExpired, StatusCode::BAD_REQUEST),
            (ServiceError::Upstream("down".into()), StatusCode::BAD_GATEWAY),
        ];
        for (err, status) in cases {
            assert_eq!(AppError::from(err).status(), status);
        }
    }
}
