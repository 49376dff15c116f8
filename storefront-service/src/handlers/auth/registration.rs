use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use service_core::error::AppError;

use crate::{
    dtos::{
        auth::{AuthResponse, RegisterRequest, VerifyEmailQuery},
        MessageResponse,
    },
    middleware::AuthUser,
    utils::{Password, ValidatedJson},
    AppState,
};

/// Register a new customer account
#[utoipa::path(
    post,
    path = "/auth/register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Account created", body = AuthResponse),
        (status = 400, description = "Validation error", body = ErrorResponse),
        (status = 409, description = "Email or phone already registered", body = ErrorResponse),
        (status = 429, description = "Too many requests", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "Authentication"
)]
pub async fn register(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<RegisterRequest>,
) -> Result<impl IntoResponse, AppError> {
    let session = state
        .auth_service
        .register(req.name, req.email, Password::new(req.password), req.phone)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            user: session.user.to_response(),
            tokens: session.tokens,
        }),
    ))
}

/// Confirm an email address (link target from the verification email)
#[utoipa::path(
    get,
    path = "/auth/verify-email",
    params(VerifyEmailQuery),
    responses(
        (status = 200, description = "Email verified", body = MessageResponse),
        (status = 400, description = "Invalid or expired token", body = ErrorResponse)
    ),
    tag = "Authentication"
)]
pub async fn verify_email(
    State(state): State<AppState>,
    Query(query): Query<VerifyEmailQuery>,
) -> Result<impl IntoResponse, AppError> {
    state.auth_service.verify_email(&query.token).await?;
    Ok(Json(MessageResponse::new("Email verified successfully")))
}

/// Send a fresh verification email to the caller
#[utoipa::path(
    post,
    path = "/auth/verify-email/resend",
    responses(
        (status = 200, description = "Verification email sent", body = MessageResponse),
        (status = 400, description = "Email already verified", body = ErrorResponse),
        (status = 401, description = "Not authenticated", body = GateErrorResponse)
    ),
    tag = "Authentication",
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn resend_verification(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<impl IntoResponse, AppError> {
    state.auth_service.resend_verification(&user.0.user_id).await?;
    Ok(Json(MessageResponse::new("Verification email sent")))
}
