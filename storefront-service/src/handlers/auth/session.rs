use axum::{extract::State, response::IntoResponse, Json};
use service_core::error::AppError;

use crate::{
    dtos::{
        auth::{
            AuthResponse, LoginRequest, LogoutRequest, RefreshResponse, RefreshTokenRequest,
            VerifyTokenRequest,
        },
        MessageResponse,
    },
    middleware::AuthUser,
    utils::{Password, ValidatedJson},
    AppState,
};

/// Login with email and password
#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful", body = AuthResponse),
        (status = 401, description = "Invalid credentials", body = ErrorResponse),
        (status = 403, description = "Account deactivated or email not verified", body = ErrorResponse),
        (status = 429, description = "Too many requests", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "Authentication"
)]
pub async fn login(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    let session = state
        .auth_service
        .login(&req.email, &Password::new(req.password))
        .await?;

    Ok(Json(AuthResponse {
        user: session.user.to_response(),
        tokens: session.tokens,
    }))
}

/// Exchange a refresh token for a new access token
#[utoipa::path(
    post,
    path = "/auth/refresh-token",
    request_body = RefreshTokenRequest,
    responses(
        (status = 200, description = "Token refreshed", body = RefreshResponse),
        (status = 401, description = "Invalid or expired token", body = ErrorResponse),
        (status = 403, description = "Account deactivated", body = ErrorResponse)
    ),
    tag = "Authentication"
)]
pub async fn refresh_token(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<RefreshTokenRequest>,
) -> Result<impl IntoResponse, AppError> {
    let refreshed = state.auth_service.refresh(&req.refresh_token).await?;

    Ok(Json(RefreshResponse {
        access_token: refreshed.access_token,
        refresh_token: refreshed.refresh_token,
        token_type: "Bearer".to_string(),
        expires_in: refreshed.expires_in,
    }))
}

/// Revoke a refresh token
#[utoipa::path(
    post,
    path = "/auth/logout",
    request_body = LogoutRequest,
    responses(
        (status = 200, description = "Logged out", body = MessageResponse),
        (status = 401, description = "Not authenticated", body = GateErrorResponse),
        (status = 404, description = "Refresh token not found", body = ErrorResponse)
    ),
    tag = "Authentication",
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn logout(
    State(state): State<AppState>,
    user: AuthUser,
    ValidatedJson(req): ValidatedJson<LogoutRequest>,
) -> Result<impl IntoResponse, AppError> {
    state
        .auth_service
        .logout(&user.0.user_id, &req.refresh_token)
        .await?;
    Ok(Json(MessageResponse::new("Logged out successfully")))
}

/// Check an access token and return its claims
#[utoipa::path(
    post,
    path = "/auth/verify-token",
    request_body = VerifyTokenRequest,
    responses(
        (status = 200, description = "Token is valid", body = AccessTokenClaims),
        (status = 401, description = "Invalid or expired token", body = ErrorResponse)
    ),
    tag = "Authentication",
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn verify_token(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<VerifyTokenRequest>,
) -> Result<impl IntoResponse, AppError> {
    let claims = state.auth_service.verify_token(&req.token)?;
    Ok(Json(claims))
}

/// Current user's profile
#[utoipa::path(
    get,
    path = "/auth/me",
    responses(
        (status = 200, description = "Profile", body = UserResponse),
        (status = 401, description = "Not authenticated", body = GateErrorResponse),
        (status = 403, description = "Account deactivated", body = GateErrorResponse)
    ),
    tag = "Authentication",
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn me(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<impl IntoResponse, AppError> {
    let profile = state.user_service.get_profile(&user.0.user_id).await?;
    Ok(Json(profile))
}
