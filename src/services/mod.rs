pub mod auth_service;
pub mod auth_service_impl;
pub mod otp;
pub mod password;
pub mod token;

pub use auth_service::{
    AuthError, AuthService, CreateUserRequest, LoginOutcome, SecurityAnswerInput, SessionInfo,
    UpdateUserRequest,
};
pub use auth_service_impl::SeaOrmAuthService;
pub use otp::OtpService;
pub use token::{Claims, TokenService};
