//! Database module

pub mod drive;
pub mod logs;
pub mod operations;
pub mod schema;
pub mod temp_files;
pub mod users;

// Re-export for convenience
pub use logs::LogStats;
pub use operations::{DatabaseManager, DownloadPage, DownloadStats};
pub use schema::initialize_database;
pub use users::UserStats;
