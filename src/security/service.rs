//! Security event log and IP blocking

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::str::FromStr;
use tracing::{info, warn};
use uuid::Uuid;

const MAX_EVENTS: usize = 10_000;
/// Failed logins from one IP within the window that mark it as a threat
const THREAT_LOGIN_FAILURES: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecuritySeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl SecuritySeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecuritySeverity::Low => "low",
            SecuritySeverity::Medium => "medium",
            SecuritySeverity::High => "high",
            SecuritySeverity::Critical => "critical",
        }
    }
}

impl FromStr for SecuritySeverity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(SecuritySeverity::Low),
            "medium" => Ok(SecuritySeverity::Medium),
            "high" => Ok(SecuritySeverity::High),
            "critical" => Ok(SecuritySeverity::Critical),
            other => Err(format!("Unknown severity: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityEvent {
    pub event_type: String,
    pub severity: SecuritySeverity,
    pub user_id: Option<Uuid>,
    pub ip_address: String,
    pub timestamp: DateTime<Utc>,
    pub details: serde_json::Value,
    pub resource: Option<String>,
}

impl SecurityEvent {
    pub fn new(event_type: impl Into<String>, severity: SecuritySeverity, ip_address: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            severity,
            user_id: None,
            ip_address: ip_address.into(),
            timestamp: Utc::now(),
            details: serde_json::Value::Object(Default::default()),
            resource: None,
        }
    }

    pub fn with_user(mut self, user_id: Uuid) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }

    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct SecurityStats {
    pub total_events: usize,
    pub by_severity: BTreeMap<String, usize>,
    pub by_type: BTreeMap<String, usize>,
    pub blocked_ips: usize,
}

#[derive(Default)]
pub struct SecurityService {
    events: Mutex<VecDeque<SecurityEvent>>,
    blocked: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl SecurityService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log_event(&self, event: SecurityEvent) {
        if event.severity >= SecuritySeverity::High {
            warn!(
                "Security event {} ({}) from {}",
                event.event_type,
                event.severity.as_str(),
                event.ip_address
            );
        }
        let mut events = self.events.lock();
        if events.len() >= MAX_EVENTS {
            events.pop_front();
        }
        events.push_back(event);
    }

    /// Newest first
    pub fn events(
        &self,
        severity: Option<SecuritySeverity>,
        since: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Vec<SecurityEvent> {
        self.events
            .lock()
            .iter()
            .rev()
            .filter(|e| severity.map_or(true, |s| e.severity == s))
            .filter(|e| since.map_or(true, |t| e.timestamp >= t))
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn stats(&self) -> SecurityStats {
        let mut stats = SecurityStats::default();
        {
            let events = self.events.lock();
            stats.total_events = events.len();
            for e in events.iter() {
                *stats.by_severity.entry(e.severity.as_str().to_string()).or_default() += 1;
                *stats.by_type.entry(e.event_type.clone()).or_default() += 1;
            }
        }
        let now = Utc::now();
        stats.blocked_ips = self.blocked.lock().values().filter(|until| **until > now).count();
        stats
    }

    pub fn block_ip(&self, ip: &str, minutes: i64) {
        let until = Utc::now() + Duration::minutes(minutes);
        self.blocked.lock().insert(ip.to_string(), until);
        info!("Blocked IP {} until {}", ip, until);
        self.log_event(
            SecurityEvent::new("ip_blocked", SecuritySeverity::High, ip)
                .with_details(serde_json::json!({ "duration_minutes": minutes })),
        );
    }

    pub fn unblock_ip(&self, ip: &str) -> bool {
        let removed = self.blocked.lock().remove(ip).is_some();
        if removed {
            info!("Unblocked IP {}", ip);
            self.log_event(SecurityEvent::new("ip_unblocked", SecuritySeverity::Low, ip));
        }
        removed
    }

    /// Expired blocks are dropped on lookup
    pub fn is_ip_blocked(&self, ip: &str) -> bool {
        let mut blocked = self.blocked.lock();
        match blocked.get(ip) {
            Some(until) if *until > Utc::now() => true,
            Some(_) => {
                blocked.remove(ip);
                false
            }
            None => false,
        }
    }

    /// Drop events older than `days` and expired blocks. Returns removed events.
    pub fn cleanup(&self, days: i64) -> usize {
        let cutoff = Utc::now() - Duration::days(days);
        let removed = {
            let mut events = self.events.lock();
            let before = events.len();
            events.retain(|e| e.timestamp >= cutoff);
            before - events.len()
        };
        let now = Utc::now();
        self.blocked.lock().retain(|_, until| *until > now);
        removed
    }

    /// IPs with repeated failed logins inside the window
    pub fn analyze_threats(&self, window: Duration) -> Vec<String> {
        let since = Utc::now() - window;
        let mut failures: HashMap<String, usize> = HashMap::new();
        for e in self.events.lock().iter() {
            if e.event_type == "login_failed" && e.timestamp >= since {
                *failures.entry(e.ip_address.clone()).or_default() += 1;
            }
        }
        let mut ips: Vec<String> = failures
            .into_iter()
            .filter(|(_, n)| *n >= THREAT_LOGIN_FAILURES)
            .map(|(ip, _)| ip)
            .collect();
        ips.sort();
        ips
    }

    pub fn auto_block(&self, window: Duration, minutes: i64) -> Vec<String> {
        let threats: Vec<String> = self
            .analyze_threats(window)
            .into_iter()
            .filter(|ip| !self.is_ip_blocked(ip))
            .collect();
        for ip in &threats {
            self.block_ip(ip, minutes);
        }
        threats
    }
}
