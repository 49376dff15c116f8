use axum::{extract::State, response::IntoResponse, Json};
use service_core::error::AppError;

use crate::{
    dtos::{
        auth::{PasswordResetConfirm, PasswordResetRequest},
        MessageResponse,
    },
    utils::{Password, ValidatedJson},
    AppState,
};

/// Request a password reset email
///
/// Always answers 200 so the endpoint cannot be used to discover accounts.
#[utoipa::path(
    post,
    path = "/auth/password-reset/request",
    request_body = PasswordResetRequest,
    responses(
        (status = 200, description = "Reset email sent if the account exists", body = MessageResponse),
        (status = 400, description = "Validation error", body = ErrorResponse),
        (status = 429, description = "Too many requests", body = ErrorResponse)
    ),
    tag = "Authentication"
)]
pub async fn request_password_reset(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<PasswordResetRequest>,
) -> Result<impl IntoResponse, AppError> {
    state.auth_service.request_password_reset(&req.email).await?;
    Ok(Json(MessageResponse::new(
        "If an account exists for this email, a reset link has been sent",
    )))
}

/// Set a new password using a reset token
#[utoipa::path(
    post,
    path = "/auth/password-reset/confirm",
    request_body = PasswordResetConfirm,
    responses(
        (status = 200, description = "Password updated", body = MessageResponse),
        (status = 400, description = "Invalid or expired token", body = ErrorResponse)
    ),
    tag = "Authentication"
)]
pub async fn confirm_password_reset(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<PasswordResetConfirm>,
) -> Result<impl IntoResponse, AppError> {
    state
        .auth_service
        .confirm_password_reset(&req.token, Password::new(req.new_password))
        .await?;
    Ok(Json(MessageResponse::new("Password has been reset")))
}
