//! yt-dlp wrapper for metadata extraction and downloads

use crate::extractor::models::{DownloadRequest, DownloadedFile, VideoInfo};
use crate::extractor::traits::MediaExtractor;
use crate::utils::error::TubeloadError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Environment variable that pins the yt-dlp binary
pub const YTDLP_ENV: &str = "TUBELOAD_YTDLP";

const PROGRESS_TEMPLATE: &str = "download:%(progress._percent_str)s";

/// Extractor backed by the yt-dlp executable
pub struct YtDlpExtractor {
    ytdlp_path: PathBuf,
}

impl YtDlpExtractor {
    /// Locate yt-dlp and build the extractor
    pub fn new() -> Result<Self, TubeloadError> {
        match find_ytdlp() {
            Some(path) => {
                info!("Found yt-dlp at: {}", path.display());
                Ok(Self { ytdlp_path: path })
            }
            None => {
                error!("yt-dlp not found anywhere!");
                Err(TubeloadError::YtDlpNotFound)
            }
        }
    }

    pub fn with_path(ytdlp_path: impl Into<PathBuf>) -> Self {
        Self {
            ytdlp_path: ytdlp_path.into(),
        }
    }

    pub fn ytdlp_path(&self) -> &Path {
        &self.ytdlp_path
    }

    /// Arguments for a download run
    pub fn download_args(request: &DownloadRequest) -> Vec<String> {
        let template = request.output_dir.join("%(title)s.%(ext)s");
        vec![
            "-f".to_string(),
            request.format_selector.clone(),
            "--newline".to_string(),
            "--no-playlist".to_string(),
            "--progress".to_string(),
            "--progress-template".to_string(),
            PROGRESS_TEMPLATE.to_string(),
            "-o".to_string(),
            template.to_string_lossy().into_owned(),
            "--print".to_string(),
            "after_move:filepath".to_string(),
            request.url.clone(),
        ]
    }
}

#[async_trait]
impl MediaExtractor for YtDlpExtractor {
    fn id(&self) -> &'static str {
        "yt-dlp"
    }

    async fn extract_info(&self, url: &str) -> Result<VideoInfo, TubeloadError> {
        debug!("Extracting video info for URL: {}", url);

        let output = Command::new(&self.ytdlp_path)
            .arg("--dump-json")
            .arg("--no-download")
            .arg("--no-warnings")
            .arg("--no-playlist")
            .arg(url)
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() {
            let error_msg = String::from_utf8_lossy(&output.stderr);
            error!("yt-dlp extraction failed: {}", error_msg);
            return Err(TubeloadError::ExtractionError(error_msg.trim().to_string()));
        }

        let json = String::from_utf8_lossy(&output.stdout);
        let first = json.lines().find(|l| !l.trim().is_empty()).unwrap_or_default();
        Ok(serde_json::from_str(first)?)
    }

    async fn download(
        &self,
        request: &DownloadRequest,
        progress: mpsc::UnboundedSender<f64>,
        cancel: CancellationToken,
    ) -> Result<DownloadedFile, TubeloadError> {
        debug!("Starting yt-dlp download of {}", request.url);

        let mut child = Command::new(&self.ytdlp_path)
            .args(Self::download_args(request))
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TubeloadError::DownloadError("yt-dlp stdout unavailable".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| TubeloadError::DownloadError("yt-dlp stderr unavailable".into()))?;

        let stdout_reader = tokio::spawn(read_output(stdout, progress.clone()));
        let stderr_reader = tokio::spawn(read_output(stderr, progress));

        let status = tokio::select! {
            status = child.wait() => status?,
            _ = cancel.cancelled() => {
                let _ = child.kill().await;
                let _ = stdout_reader.await;
                let _ = stderr_reader.await;
                info!("Cancelled yt-dlp download of {}", request.url);
                return Err(TubeloadError::DownloadError("Download cancelled".into()));
            }
        };

        let stdout_lines = stdout_reader.await.unwrap_or_default();
        let stderr_lines = stderr_reader.await.unwrap_or_default();

        if !status.success() {
            let message = if stderr_lines.is_empty() {
                format!("yt-dlp exited with {}", status)
            } else {
                stderr_lines.join("\n")
            };
            error!("yt-dlp download failed: {}", message);
            return Err(TubeloadError::DownloadError(message));
        }

        let path = final_file_path(&stdout_lines).ok_or_else(|| {
            TubeloadError::DownloadError("yt-dlp did not report an output file".into())
        })?;
        let size = tokio::fs::metadata(&path).await.ok().map(|m| m.len() as i64);

        info!("Downloaded {} to {}", request.url, path.display());
        Ok(DownloadedFile { path, size })
    }
}

/// Forward progress lines and return everything else
async fn read_output<R>(stream: R, progress: mpsc::UnboundedSender<f64>) -> Vec<String>
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stream).lines();
    let mut other = Vec::new();
    while let Ok(Some(line)) = lines.next_line().await {
        match parse_progress_line(&line) {
            Some(pct) => {
                let _ = progress.send(pct);
            }
            None if !line.trim().is_empty() => other.push(line),
            None => {}
        }
    }
    other
}

/// Percentage from a `download:  45.2%` style line
pub fn parse_progress_line(line: &str) -> Option<f64> {
    let line = line.trim();
    let pct_str = if let Some(rest) = line.strip_prefix("download:") {
        rest.trim().trim_end_matches('%')
    } else if line.ends_with('%') {
        line.trim_end_matches('%').split_whitespace().last()?
    } else {
        return None;
    };
    pct_str.trim().parse::<f64>().ok()
}

/// Last printed path that exists on disk
fn final_file_path(lines: &[String]) -> Option<PathBuf> {
    lines
        .iter()
        .rev()
        .map(|l| PathBuf::from(l.trim()))
        .find(|p| p.is_file())
}

/// Report the yt-dlp version, for startup logging
pub async fn check_ytdlp() -> Result<String, TubeloadError> {
    let path = find_ytdlp().ok_or(TubeloadError::YtDlpNotFound)?;
    let output = Command::new(&path).arg("--version").output().await?;
    if !output.status.success() {
        return Err(TubeloadError::YtDlpNotFound);
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

// ============================================================
// yt-dlp Detection Functions
// ============================================================

/// Find yt-dlp binary with priority:
/// 1. `TUBELOAD_YTDLP`
/// 2. System PATH
/// 3. Common installation paths
pub fn find_ytdlp() -> Option<PathBuf> {
    if let Some(pinned) = find_from_env() {
        debug!("Using yt-dlp from {}: {:?}", YTDLP_ENV, pinned);
        return Some(pinned);
    }

    if let Ok(path) = which::which("yt-dlp") {
        debug!("Using system yt-dlp: {:?}", path);
        return Some(path);
    }

    if let Some(common) = find_in_common_paths() {
        debug!("Using yt-dlp from common path: {:?}", common);
        return Some(common);
    }

    warn!("yt-dlp not found in {}, PATH or common locations", YTDLP_ENV);
    None
}

fn find_from_env() -> Option<PathBuf> {
    let path = PathBuf::from(std::env::var_os(YTDLP_ENV)?);
    if is_executable(&path) {
        Some(path)
    } else {
        warn!("{} points at {:?}, which is not executable", YTDLP_ENV, path);
        None
    }
}

fn find_in_common_paths() -> Option<PathBuf> {
    let mut candidates = vec![
        PathBuf::from("/usr/local/bin/yt-dlp"),
        PathBuf::from("/usr/bin/yt-dlp"),
        PathBuf::from("/opt/homebrew/bin/yt-dlp"),
    ];
    if let Some(home) = dirs::home_dir() {
        candidates.push(home.join(".local/bin/yt-dlp"));
    }

    candidates.into_iter().find(|p| is_executable(p))
}

fn is_executable(path: &Path) -> bool {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::metadata(path)
            .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
            .unwrap_or(false)
    }

    #[cfg(not(unix))]
    {
        path.is_file()
    }
}

// ============================================================
// Tests
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_progress_prefixed() {
        assert_eq!(parse_progress_line("download:  45.2%"), Some(45.2));
        assert_eq!(parse_progress_line("download:100%"), Some(100.0));
    }

    #[test]
    fn test_parse_progress_bare_percent() {
        assert_eq!(parse_progress_line("  92.5%"), Some(92.5));
    }

    #[test]
    fn test_parse_progress_rejects_other_lines() {
        assert_eq!(parse_progress_line("[youtube] Extracting URL"), None);
        assert_eq!(parse_progress_line("download:N/A"), None);
        assert_eq!(parse_progress_line(""), None);
    }

    #[test]
    fn test_download_args() {
        let request = DownloadRequest {
            url: "https://youtu.be/dQw4w9WgXcQ".into(),
            format_selector: "best".into(),
            output_dir: PathBuf::from("/videos"),
        };
        let args = YtDlpExtractor::download_args(&request);
        assert_eq!(&args[0..2], ["-f", "best"]);
        assert!(args.contains(&"--newline".to_string()));
        assert!(args.contains(&"/videos/%(title)s.%(ext)s".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("https://youtu.be/dQw4w9WgXcQ"));
    }

    #[test]
    fn test_final_file_path_skips_missing() {
        let dir = tempfile::tempdir().unwrap();
        let real = dir.path().join("clip.mp4");
        std::fs::write(&real, b"x").unwrap();
        let lines = vec![
            real.to_string_lossy().into_owned(),
            "/definitely/not/here.mp4".to_string(),
        ];
        assert_eq!(final_file_path(&lines), Some(real));
    }

    #[test]
    fn test_is_executable() {
        let path = PathBuf::from("/bin/sh");
        if path.exists() {
            assert!(is_executable(&path));
        }
        assert!(!is_executable(Path::new("/no/such/binary")));
    }
}
