//! Service wiring shared by the HTTP layer and the background tasks

use crate::auth::{AuthService, TokenCodec};
use crate::database::{initialize_database, DatabaseManager};
use crate::extractor::{MediaExtractor, YtDlpExtractor};
use crate::monitoring::{AlertManager, HealthReport, MetricSources, MonitoringService};
use crate::notify::NotificationHub;
use crate::queue::{DownloadQueue, QueueOptions};
use crate::scheduler::Maintenance;
use crate::security::{RateLimiter, SecurityService};
use crate::storage::{FileStorage, HttpRelay, RelayService, TemporaryUrlService};
use crate::utils::AppSettings;
use anyhow::{Context, Result};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Pending downloads above this mark the queue as degraded
const QUEUE_BACKLOG_WARNING: i64 = 100;

pub struct AppState {
    pub settings: AppSettings,
    pub db: DatabaseManager,
    pub hub: Arc<NotificationHub>,
    pub queue: DownloadQueue,
    pub storage: FileStorage,
    pub temp_urls: Arc<TemporaryUrlService>,
    pub relay: Option<Arc<RelayService>>,
    pub auth: Arc<AuthService>,
    pub rate_limiter: Arc<RateLimiter>,
    pub security: Arc<SecurityService>,
    pub monitoring: Arc<MonitoringService>,
    pub alerts: Arc<AlertManager>,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    /// Create the storage directories, then wire every service against yt-dlp
    pub async fn build(settings: AppSettings) -> Result<SharedState> {
        let extractor: Arc<dyn MediaExtractor> = match YtDlpExtractor::new() {
            Ok(extractor) => Arc::new(extractor),
            Err(e) => {
                warn!("{}; downloads will fail until it is installed", e);
                Arc::new(YtDlpExtractor::with_path("yt-dlp"))
            }
        };
        Self::build_with_extractor(settings, extractor).await
    }

    pub async fn build_with_extractor(
        settings: AppSettings,
        extractor: Arc<dyn MediaExtractor>,
    ) -> Result<SharedState> {
        let storage = FileStorage::new(&settings);
        storage
            .ensure_dirs()
            .await
            .context("failed to create storage directories")?;

        let db = DatabaseManager::new(initialize_database(&settings.database_url).await?);
        let hub = Arc::new(NotificationHub::new());

        let relay = settings.relay_endpoint.as_ref().map(|endpoint| {
            info!("Relaying completed files to {}", endpoint);
            Arc::new(RelayService::new(db.clone(), Arc::new(HttpRelay::new(endpoint.clone()))))
        });
        let queue = DownloadQueue::new(
            db.clone(),
            Arc::clone(&hub),
            extractor,
            storage.clone(),
            relay.clone(),
            QueueOptions::from(&settings),
        );
        let temp_urls = Arc::new(TemporaryUrlService::new(
            db.clone(),
            settings.base_url.clone(),
            settings.api_prefix.clone(),
        ));

        let security = Arc::new(SecurityService::new());
        let tokens = TokenCodec::new(&settings.secret_key, settings.token_expiration_secs);
        let auth = Arc::new(AuthService::new(db.clone(), tokens, Arc::clone(&security)));
        let rate_limiter = Arc::new(RateLimiter::with_defaults(
            settings.rate_limit_per_minute,
            settings.rate_limit_per_hour,
        ));

        let monitoring = Arc::new(MonitoringService::with_sources(MetricSources {
            db: db.clone(),
            queue: queue.clone(),
            videos_dir: settings.videos_dir.clone(),
        }));
        let alerts = Arc::new(AlertManager::from_settings(&settings));
        monitoring.add_alert_handler(alerts.clone());

        let state = AppState {
            settings,
            db,
            hub,
            queue,
            storage,
            temp_urls,
            relay,
            auth,
            rate_limiter,
            security,
            monitoring,
            alerts,
        };
        state.register_health_checks();
        Ok(Arc::new(state))
    }

    fn register_health_checks(&self) {
        let db = self.db.clone();
        self.monitoring.register_health_check("database", move || {
            let db = db.clone();
            async move {
                sqlx::query("SELECT 1").execute(db.pool()).await?;
                Ok::<_, anyhow::Error>(HealthReport::healthy("Database connection OK"))
            }
        });

        let storage = self.storage.clone();
        self.monitoring.register_health_check("storage", move || {
            let storage = storage.clone();
            async move {
                let dir = storage.videos_dir().to_path_buf();
                if !tokio::fs::try_exists(&dir).await? {
                    return Ok::<_, anyhow::Error>(HealthReport::degraded(format!(
                        "{} does not exist",
                        dir.display()
                    )));
                }
                let bytes = tokio::task::spawn_blocking(move || FileStorage::disk_usage_bytes(&dir)).await?;
                let mut report = HealthReport::healthy("Storage directory available");
                report.details = json!({ "used_bytes": bytes });
                Ok::<_, anyhow::Error>(report)
            }
        });

        let queue = self.queue.clone();
        self.monitoring.register_health_check("queue", move || {
            let queue = queue.clone();
            async move {
                let snapshot = queue.queue_snapshot().await?;
                let mut report = if snapshot.pending > QUEUE_BACKLOG_WARNING {
                    HealthReport::degraded(format!("{} downloads waiting", snapshot.pending))
                } else {
                    HealthReport::healthy("Queue is processing")
                };
                report.details = serde_json::to_value(&snapshot)?;
                Ok::<_, anyhow::Error>(report)
            }
        });
    }

    /// Handles for the periodic maintenance jobs
    pub fn maintenance(&self) -> Maintenance {
        Maintenance {
            db: self.db.clone(),
            storage: self.storage.clone(),
            temp_urls: Arc::clone(&self.temp_urls),
            queue: self.queue.clone(),
            rate_limiter: Arc::clone(&self.rate_limiter),
            security: Arc::clone(&self.security),
            monitoring: Arc::clone(&self.monitoring),
            alerts: Arc::clone(&self.alerts),
            temporary_expiration: Duration::from_secs(self.settings.temp_file_expiration_secs),
        }
    }

    /// Start download workers, maintenance jobs and metric collection.
    /// Everything stops when `shutdown` is cancelled.
    pub fn start_background(&self, shutdown: CancellationToken) -> Vec<JoinHandle<()>> {
        let mut handles = self.queue.start(shutdown.clone());
        handles.extend(Arc::new(self.maintenance()).spawn(shutdown.clone()));

        self.monitoring
            .start(Duration::from_secs(self.settings.monitoring_interval_secs));
        let monitoring = Arc::clone(&self.monitoring);
        handles.push(tokio::spawn(async move {
            shutdown.cancelled().await;
            monitoring.stop();
        }));
        handles
    }
}
