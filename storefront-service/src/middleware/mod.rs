pub mod auth;

pub use auth::{
    authenticate, authorize_roles, AllowedRoles, AuthContext, AuthUser, GateRejection,
};
