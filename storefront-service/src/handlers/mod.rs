pub mod admin;
pub mod auth;
pub mod metrics;
pub mod user;

pub use admin::*;
pub use auth::*;
pub use metrics::*;
pub use user::*;
