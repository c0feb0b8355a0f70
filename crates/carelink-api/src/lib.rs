pub mod audit;
pub mod auth;
pub mod error;
pub mod messages;
pub mod middleware;
pub mod reminders;
pub mod revenue;

pub use auth::{AppState, AppStateInner};
pub use error::ApiError;
