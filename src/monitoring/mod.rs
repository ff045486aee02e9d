//! Metrics, health checks and alerting

pub mod alerts;
pub mod metrics;

pub use alerts::{AlertManager, AlertNotification, NotificationChannel, NotificationConfig, NotificationStats};
pub use metrics::{
    Alert, AlertHandler, AlertSeverity, HealthCheck, HealthReport, HealthStatus, HealthSummary, Metric,
    MetricSources, MetricStats, MetricType, MonitoringService, MonitoringSummary,
};
