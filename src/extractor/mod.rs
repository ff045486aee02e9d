pub mod models;
pub mod traits;
pub mod ytdlp;

pub use models::{DownloadRequest, DownloadedFile, VideoInfo};
pub use traits::MediaExtractor;
pub use ytdlp::{check_ytdlp, parse_progress_line, YtDlpExtractor};
