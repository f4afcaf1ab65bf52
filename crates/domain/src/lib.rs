pub mod auth;
pub mod error;
pub mod identity;
pub mod moderation;
pub mod notifications;
pub mod ports;
pub mod profile;
pub mod submission;
pub mod task;
pub mod util;

pub type DomainResult<T> = Result<T, error::DomainError>;
