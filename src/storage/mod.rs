//! File layout, temporary links and remote relay

pub mod files;
pub mod relay;
pub mod temp_urls;

pub use files::FileStorage;
pub use relay::{CloudRelay, HttpRelay, RelayService};
pub use temp_urls::{TempUrlAccess, TempUrlInfo, TemporaryUrlService};
