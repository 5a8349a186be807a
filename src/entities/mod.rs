pub mod prelude;

pub mod otp_challenges;
pub mod password_setup_tokens;
pub mod security_answers;
pub mod security_questions;
pub mod users;
