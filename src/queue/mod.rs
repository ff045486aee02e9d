//! Background download queue

pub mod manager;

pub use manager::{retry_delay, DownloadQueue, QueueOptions, QueueSnapshot};
