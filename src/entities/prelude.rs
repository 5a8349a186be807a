pub use super::otp_challenges::Entity as OtpChallenges;
pub use super::password_setup_tokens::Entity as PasswordSetupTokens;
pub use super::security_answers::Entity as SecurityAnswers;
pub use super::security_questions::Entity as SecurityQuestions;
pub use super::users::Entity as Users;
