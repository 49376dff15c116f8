pub mod password;
pub mod registration;
pub mod session;

pub use password::{confirm_password_reset, request_password_reset};
pub use registration::{register, resend_verification, verify_email};
pub use session::{login, logout, me, refresh_token, verify_token};
