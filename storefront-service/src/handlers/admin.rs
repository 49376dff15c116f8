use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use service_core::error::AppError;

use crate::{
    dtos::{
        user::{CreateUserRequest, ListUsersQuery, UpdateUserRequest, UserListResponse},
        MessageResponse,
    },
    middleware::AuthUser,
    services::NewAccount,
    utils::{Password, ValidatedJson},
    AppState,
};

/// List users
#[utoipa::path(
    get,
    path = "/users",
    params(ListUsersQuery),
    responses(
        (status = 200, description = "Page of users", body = UserListResponse),
        (status = 401, description = "Not authenticated", body = GateErrorResponse),
        (status = 403, description = "Admin role required", body = GateErrorResponse)
    ),
    tag = "Users",
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn list_users(
    State(state): State<AppState>,
    Query(query): Query<ListUsersQuery>,
) -> Result<impl IntoResponse, AppError> {
    let page = query.page_request();
    let (items, total) = state.user_service.list(&query.filter(), page).await?;

    Ok(Json(UserListResponse {
        items,
        page: page.page,
        limit: page.limit,
        total,
    }))
}

/// Create a user with any role
#[utoipa::path(
    post,
    path = "/users",
    request_body = CreateUserRequest,
    responses(
        (status = 201, description = "User created", body = UserResponse),
        (status = 400, description = "Validation error", body = ErrorResponse),
        (status = 403, description = "Admin role required", body = GateErrorResponse),
        (status = 409, description = "Email or phone already registered", body = ErrorResponse)
    ),
    tag = "Users",
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn create_user(
    State(state): State<AppState>,
    admin: AuthUser,
    ValidatedJson(req): ValidatedJson<CreateUserRequest>,
) -> Result<impl IntoResponse, AppError> {
    let user = state
        .user_service
        .create(NewAccount {
            name: req.name,
            email: req.email,
            password: Password::new(req.password),
            phone: req.phone,
            role: req.role,
        })
        .await?;

    tracing::info!(admin_id = %admin.0.user_id, user_id = %user.id, "Admin created user");
    Ok((StatusCode::CREATED, Json(user)))
}

/// Get a user by id
#[utoipa::path(
    get,
    path = "/users/{id}",
    params(("id" = String, Path, description = "User id")),
    responses(
        (status = 200, description = "User", body = UserResponse),
        (status = 403, description = "Admin role required", body = GateErrorResponse),
        (status = 404, description = "User not found", body = ErrorResponse)
    ),
    tag = "Users",
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn get_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let user = state.user_service.get_profile(&id).await?;
    Ok(Json(user))
}

/// Update any field of a user, including role and active flag
#[utoipa::path(
    patch,
    path = "/users/{id}",
    params(("id" = String, Path, description = "User id")),
    request_body = UpdateUserRequest,
    responses(
        (status = 200, description = "User updated", body = UserResponse),
        (status = 403, description = "Admin role required", body = GateErrorResponse),
        (status = 404, description = "User not found", body = ErrorResponse),
        (status = 409, description = "Email or phone already registered", body = ErrorResponse)
    ),
    tag = "Users",
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn update_user(
    State(state): State<AppState>,
    admin: AuthUser,
    Path(id): Path<String>,
    ValidatedJson(req): ValidatedJson<UpdateUserRequest>,
) -> Result<impl IntoResponse, AppError> {
    let user = state.user_service.update(&id, req.into()).await?;
    tracing::info!(admin_id = %admin.0.user_id, user_id = %id, "Admin updated user");
    Ok(Json(user))
}

/// Flip a user's active flag
///
/// Deactivation revokes all of the user's refresh tokens.
#[utoipa::path(
    patch,
    path = "/users/{id}/toggle-active",
    params(("id" = String, Path, description = "User id")),
    responses(
        (status = 200, description = "Active flag toggled", body = UserResponse),
        (status = 403, description = "Admin role required", body = GateErrorResponse),
        (status = 404, description = "User not found", body = ErrorResponse)
    ),
    tag = "Users",
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn toggle_user_active(
    State(state): State<AppState>,
    admin: AuthUser,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let user = state.user_service.toggle_active(&id).await?;
    tracing::info!(
        admin_id = %admin.0.user_id,
        user_id = %id,
        is_active = user.is_active,
        "Admin toggled user active flag"
    );
    Ok(Json(user))
}

/// Delete a user and all of their sessions
#[utoipa::path(
    delete,
    path = "/users/{id}",
    params(("id" = String, Path, description = "User id")),
    responses(
        (status = 200, description = "User deleted", body = MessageResponse),
        (status = 403, description = "Admin role required", body = GateErrorResponse),
        (status = 404, description = "User not found", body = ErrorResponse)
    ),
    tag = "Users",
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn delete_user(
    State(state): State<AppState>,
    admin: AuthUser,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    state.user_service.delete(&id).await?;
    tracing::info!(admin_id = %admin.0.user_id, user_id = %id, "Admin deleted user");
    Ok(Json(MessageResponse::new("User deleted")))
}
