pub mod config;
pub mod router;
pub mod worker;

pub use config::Config;
pub use router::build_router;
