//! Input validation for URLs, emails, usernames and IP addresses

use regex::Regex;
use std::net::IpAddr;
use std::sync::OnceLock;

pub const URL_MIN_LEN: usize = 10;
pub const URL_MAX_LEN: usize = 2048;
pub const PASSWORD_MIN_LEN: usize = 8;

/// Outcome of validating a single value
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub sanitized: Option<String>,
}

impl ValidationResult {
    fn from_errors(value: String, errors: Vec<String>) -> Self {
        let is_valid = errors.is_empty();
        Self {
            is_valid,
            sanitized: is_valid.then_some(value),
            errors,
        }
    }

    /// Joined error list, suitable for an error message
    pub fn message(&self) -> String {
        self.errors.join(", ")
    }
}

fn url_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)^https?://(?:(?:[a-z0-9](?:[a-z0-9-]{0,61}[a-z0-9])?\.)+[a-z]{2,}\.?|localhost|\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3})(?::\d+)?(?:/?|[/?]\S+)$",
        )
        .expect("static regex")
    })
}

fn youtube_id_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?:youtube\.com/(?:watch\?(?:.*&)?v=|embed/|v/|shorts/)|youtu\.be/)([A-Za-z0-9_-]{11})")
            .expect("static regex")
    })
}

fn email_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").expect("static regex")
    })
}

fn username_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-zA-Z0-9_-]{3,50}$").expect("static regex"))
}

const DANGEROUS_SCHEMES: [&str; 5] = ["javascript:", "data:", "vbscript:", "file:", "ftp:"];

/// Validate a video URL
pub fn validate_url(url: &str) -> ValidationResult {
    let value = url.trim().to_string();
    if value.is_empty() {
        return ValidationResult::from_errors(value, vec!["URL cannot be empty".to_string()]);
    }

    let mut errors = Vec::new();
    if !url_regex().is_match(&value) {
        errors.push("Invalid URL format".to_string());
    }
    if value.len() < URL_MIN_LEN {
        errors.push(format!("URL too short (minimum {} characters)", URL_MIN_LEN));
    }
    if value.len() > URL_MAX_LEN {
        errors.push(format!("URL too long (maximum {} characters)", URL_MAX_LEN));
    }

    let lower = value.to_lowercase();
    for scheme in DANGEROUS_SCHEMES {
        if lower.contains(scheme) {
            errors.push(format!("URL contains dangerous protocol: {}", scheme));
        }
    }

    if (lower.contains("youtube.com") || lower.contains("youtu.be")) && youtube_video_id(&value).is_none() {
        errors.push("Invalid YouTube URL format".to_string());
    }

    ValidationResult::from_errors(value, errors)
}

/// Extract the 11 character video id from a YouTube URL
pub fn youtube_video_id(url: &str) -> Option<&str> {
    youtube_id_regex()
        .captures(url)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

pub fn validate_email(email: &str) -> ValidationResult {
    let value = email.trim().to_lowercase();
    let mut errors = Vec::new();
    if !email_regex().is_match(&value) {
        errors.push("Invalid email format".to_string());
    }
    if value.len() < 5 || value.len() > 254 {
        errors.push("Email must be between 5 and 254 characters".to_string());
    }
    ValidationResult::from_errors(value, errors)
}

pub fn validate_username(username: &str) -> ValidationResult {
    let value = username.trim().to_string();
    let mut errors = Vec::new();
    if !username_regex().is_match(&value) {
        errors.push(
            "Username must be 3-50 characters of letters, digits, '_' or '-'".to_string(),
        );
    }
    ValidationResult::from_errors(value, errors)
}

pub fn validate_password(password: &str) -> ValidationResult {
    let mut errors = Vec::new();
    if password.chars().count() < PASSWORD_MIN_LEN {
        errors.push(format!(
            "Password must be at least {} characters long",
            PASSWORD_MIN_LEN
        ));
    }
    ValidationResult::from_errors(password.to_string(), errors)
}

pub fn validate_ip(ip: &str) -> ValidationResult {
    let value = ip.trim().to_string();
    let errors = match value.parse::<IpAddr>() {
        Ok(_) => Vec::new(),
        Err(_) => vec![format!("Invalid IP address: {}", value)],
    };
    ValidationResult::from_errors(value, errors)
}
