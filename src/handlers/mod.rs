pub mod config;
pub mod models;
pub mod transcriptions;

pub use config::*;
pub use models::*;
pub use transcriptions::*;
