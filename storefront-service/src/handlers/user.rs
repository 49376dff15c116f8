use axum::{extract::State, response::IntoResponse, Json};
use service_core::error::AppError;

use crate::{
    dtos::user::UpdateMeRequest, middleware::AuthUser, utils::ValidatedJson, AppState,
};

/// Update the caller's own profile
///
/// Changing the email address marks it unverified and sends a new
/// verification link.
#[utoipa::path(
    patch,
    path = "/users/me",
    request_body = UpdateMeRequest,
    responses(
        (status = 200, description = "Profile updated", body = UserResponse),
        (status = 400, description = "Validation error", body = ErrorResponse),
        (status = 401, description = "Not authenticated", body = GateErrorResponse),
        (status = 409, description = "Email or phone already registered", body = ErrorResponse)
    ),
    tag = "Users",
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn update_me(
    State(state): State<AppState>,
    user: AuthUser,
    ValidatedJson(req): ValidatedJson<UpdateMeRequest>,
) -> Result<impl IntoResponse, AppError> {
    let profile = state
        .user_service
        .update(&user.0.user_id, req.into())
        .await?;
    Ok(Json(profile))
}
