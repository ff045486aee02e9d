use crate::extractor::models::{DownloadRequest, DownloadedFile, VideoInfo};
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::utils::TubeloadError;

/// Seam between the download worker and the tool that fetches media
///
/// The production implementation shells out to yt-dlp; tests plug in a
/// scripted implementation instead.
#[async_trait]
pub trait MediaExtractor: Send + Sync {
    /// Short identifier used in logs
    fn id(&self) -> &'static str;

    /// Metadata for `url` without downloading it
    async fn extract_info(&self, url: &str) -> Result<VideoInfo, TubeloadError>;

    /// Download `request`, reporting percentages on `progress` as they are
    /// parsed. Cancelling `cancel` stops the transfer.
    async fn download(
        &self,
        request: &DownloadRequest,
        progress: mpsc::UnboundedSender<f64>,
        cancel: CancellationToken,
    ) -> Result<DownloadedFile, TubeloadError>;
}
