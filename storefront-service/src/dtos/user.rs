use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

use super::auth::PHONE_PATTERN;
use crate::models::{PageRequest, Role, UserFilter, UserPatch, UserResponse};

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateUserRequest {
    #[validate(length(min = 3, max = 50, message = "Name must be 3-50 characters"))]
    pub name: Option<String>,

    #[validate(email(message = "Invalid email format"))]
    #[schema(example = "staff@example.com")]
    pub email: String,

    #[validate(length(min = 8, message = "Password must be at least 8 characters"))]
    #[schema(min_length = 8)]
    pub password: String,

    #[validate(regex(path = *PHONE_PATTERN, message = "Invalid phone number"))]
    pub phone: Option<String>,

    #[serde(default)]
    pub role: Role,
}

/// Self-service profile changes.
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct UpdateMeRequest {
    #[validate(length(min = 3, max = 50, message = "Name must be 3-50 characters"))]
    pub name: Option<String>,

    #[validate(email(message = "Invalid email format"))]
    pub email: Option<String>,

    #[validate(regex(path = *PHONE_PATTERN, message = "Invalid phone number"))]
    pub phone: Option<String>,
}

impl From<UpdateMeRequest> for UserPatch {
    fn from(req: UpdateMeRequest) -> Self {
        UserPatch {
            name: req.name,
            email: req.email,
            phone: req.phone,
            ..Default::default()
        }
    }
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct UpdateUserRequest {
    #[validate(length(min = 3, max = 50, message = "Name must be 3-50 characters"))]
    pub name: Option<String>,

    #[validate(email(message = "Invalid email format"))]
    pub email: Option<String>,

    #[validate(regex(path = *PHONE_PATTERN, message = "Invalid phone number"))]
    pub phone: Option<String>,

    pub role: Option<Role>,

    pub is_active: Option<bool>,

    pub email_verified: Option<bool>,
}

impl From<UpdateUserRequest> for UserPatch {
    fn from(req: UpdateUserRequest) -> Self {
        UserPatch {
            name: req.name,
            email: req.email,
            phone: req.phone,
            role: req.role,
            is_active: req.is_active,
            email_verified: req.email_verified,
            ..Default::default()
        }
    }
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListUsersQuery {
    /// 1-based page number
    pub page: Option<u64>,
    /// Page size, at most 100
    pub limit: Option<u64>,
    pub role: Option<Role>,
    pub is_active: Option<bool>,
}

impl ListUsersQuery {
    pub fn filter(&self) -> UserFilter {
        UserFilter {
            role: self.role,
            is_active: self.is_active,
        }
    }

    pub fn page_request(&self) -> PageRequest {
        PageRequest::new(self.page, self.limit)
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UserListResponse {
    pub items: Vec<UserResponse>,
    pub page: u64,
    pub limit: u64,
    pub total: u64,
}
