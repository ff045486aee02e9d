//! User accounts

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

/// Failed logins before the account is locked
pub const MAX_LOGIN_ATTEMPTS: i64 = 5;
/// Lock duration in minutes
pub const LOCKOUT_MINUTES: i64 = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    #[default]
    User,
    Admin,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::User => "user",
            UserRole::Admin => "admin",
        }
    }
}

impl FromStr for UserRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(UserRole::User),
            "admin" => Ok(UserRole::Admin),
            other => Err(format!("Unknown role: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub full_name: Option<String>,
    #[serde(skip_serializing)]
    pub hashed_password: String,
    #[serde(skip_serializing)]
    pub salt: String,
    pub role: UserRole,
    pub is_active: bool,
    pub last_login: Option<DateTime<Utc>>,
    pub login_attempts: i64,
    pub locked_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub preferences: serde_json::Map<String, serde_json::Value>,
}

impl User {
    pub fn new(
        username: impl Into<String>,
        email: impl Into<String>,
        hashed_password: impl Into<String>,
        salt: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            username: username.into(),
            email: email.into(),
            full_name: None,
            hashed_password: hashed_password.into(),
            salt: salt.into(),
            role: UserRole::User,
            is_active: true,
            last_login: None,
            login_attempts: 0,
            locked_until: None,
            created_at: now,
            updated_at: now,
            preferences: serde_json::Map::new(),
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin
    }

    pub fn is_locked(&self) -> bool {
        self.locked_until.is_some_and(|until| until > Utc::now())
    }

    pub fn can_login(&self) -> bool {
        self.is_active && !self.is_locked()
    }

    pub fn register_failed_login(&mut self) {
        self.login_attempts += 1;
        if self.login_attempts >= MAX_LOGIN_ATTEMPTS {
            self.locked_until = Some(Utc::now() + Duration::minutes(LOCKOUT_MINUTES));
        }
        self.touch();
    }

    pub fn register_successful_login(&mut self) {
        self.login_attempts = 0;
        self.locked_until = None;
        self.last_login = Some(Utc::now());
        self.touch();
    }

    pub fn change_password(&mut self, hashed_password: String, salt: String) {
        self.hashed_password = hashed_password;
        self.salt = salt;
        self.touch();
    }

    pub fn activate(&mut self) {
        self.is_active = true;
        self.touch();
    }

    pub fn deactivate(&mut self) {
        self.is_active = false;
        self.touch();
    }

    pub fn promote_to_admin(&mut self) {
        self.role = UserRole::Admin;
        self.touch();
    }

    pub fn demote_from_admin(&mut self) {
        self.role = UserRole::User;
        self.touch();
    }

    /// Merge `prefs` into the stored preferences
    pub fn update_preferences(&mut self, prefs: serde_json::Map<String, serde_json::Value>) {
        self.preferences.extend(prefs);
        self.touch();
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
