//! Configuration, errors and input validation

pub mod config;
pub mod error;
pub mod validation;

pub use config::AppSettings;
pub use error::TubeloadError;
pub use validation::ValidationResult;
