pub mod otp;
pub mod security;
pub mod setup_token;
pub mod user;
