//! Account registration, login and administration

use super::password::{generate_salt, hash_password_blocking, verify_password_blocking};
use super::token::{Claims, TokenCodec};
use crate::database::{DatabaseManager, UserStats};
use crate::domain::{DownloadLog, LogAction, User};
use crate::security::{SecurityEvent, SecurityService, SecuritySeverity};
use crate::utils::validation::{validate_email, validate_password, validate_username};
use crate::utils::TubeloadError;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

type Result<T> = std::result::Result<T, TubeloadError>;

#[derive(Debug, Clone, Serialize)]
pub struct LoginResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub user: User,
}

pub struct AuthService {
    db: DatabaseManager,
    tokens: TokenCodec,
    security: Arc<SecurityService>,
}

impl AuthService {
    pub fn new(db: DatabaseManager, tokens: TokenCodec, security: Arc<SecurityService>) -> Self {
        Self { db, tokens, security }
    }

    pub fn tokens(&self) -> &TokenCodec {
        &self.tokens
    }

    pub async fn register(
        &self,
        username: &str,
        email: &str,
        password: &str,
        full_name: Option<String>,
    ) -> Result<User> {
        let username = validated(validate_username(username))?;
        let email = validated(validate_email(email))?;
        validated(validate_password(password))?;

        if self.db.get_user_by_username(&username).await?.is_some() {
            return Err(TubeloadError::Conflict("Username already registered".into()));
        }
        if self.db.get_user_by_email(&email).await?.is_some() {
            return Err(TubeloadError::Conflict("Email already registered".into()));
        }

        let salt = generate_salt();
        let hashed = hash_password_blocking(password, &salt).await?;
        let mut user = User::new(username, email, hashed, salt);
        user.full_name = full_name;
        self.db.create_user(&user).await?;

        info!("Registered user {} ({})", user.username, user.id);
        Ok(user)
    }

    pub async fn login(
        &self,
        identifier: &str,
        password: &str,
        ip: &str,
        expires_in: Option<i64>,
    ) -> Result<LoginResponse> {
        let user = match self.db.get_user_by_username(identifier).await? {
            Some(user) => Some(user),
            None => self.db.get_user_by_email(identifier).await?,
        };

        let Some(mut user) = user else {
            self.record_login_failure(None, identifier, ip, "unknown user").await;
            return Err(TubeloadError::Unauthorized(
                "Invalid username/email or password".into(),
            ));
        };

        if !user.can_login() {
            self.record_login_failure(Some(&user), identifier, ip, "account disabled or locked")
                .await;
            return Err(TubeloadError::Unauthorized(
                "Account is disabled or locked".into(),
            ));
        }

        if !verify_password_blocking(password, &user.salt, &user.hashed_password).await? {
            user.register_failed_login();
            self.db.update_user(&user).await?;
            if user.is_locked() {
                warn!("Account {} locked after repeated failed logins", user.username);
            }
            self.record_login_failure(Some(&user), identifier, ip, "wrong password")
                .await;
            return Err(TubeloadError::Unauthorized(
                "Invalid username/email or password".into(),
            ));
        }

        user.register_successful_login();
        self.db.update_user(&user).await?;

        let expires_in = expires_in.unwrap_or(self.tokens.default_expiry_secs());
        let access_token = self.tokens.create_token(user.id, Some(expires_in))?;

        self.security.log_event(
            SecurityEvent::new("login_success", SecuritySeverity::Low, ip).with_user(user.id),
        );
        self.write_log(
            DownloadLog::new(LogAction::UserLogin, "", &user.username, "completed")
                .for_user(user.id)
                .with_ip(ip),
        )
        .await;

        info!("User {} logged in from {}", user.username, ip);
        Ok(LoginResponse {
            access_token,
            token_type: "bearer".to_string(),
            expires_in,
            user,
        })
    }

    async fn record_login_failure(&self, user: Option<&User>, identifier: &str, ip: &str, reason: &str) {
        let mut event = SecurityEvent::new("login_failed", SecuritySeverity::Medium, ip)
            .with_details(serde_json::json!({ "identifier": identifier, "reason": reason }));
        let mut log = DownloadLog::new(LogAction::UserLogin, "", identifier, "failed")
            .with_error(reason)
            .with_ip(ip);
        if let Some(user) = user {
            event = event.with_user(user.id);
            log = log.for_user(user.id);
        }
        self.security.log_event(event);
        self.write_log(log).await;
    }

    pub async fn logout(&self, user: &User, ip: &str) {
        self.security.log_event(
            SecurityEvent::new("logout", SecuritySeverity::Low, ip).with_user(user.id),
        );
        self.write_log(
            DownloadLog::new(LogAction::UserLogout, "", &user.username, "completed")
                .for_user(user.id)
                .with_ip(ip),
        )
        .await;
    }

    /// Failures are recorded as security events against `ip`
    pub fn verify_token(&self, token: &str, ip: &str) -> Result<Claims> {
        self.tokens.verify_token(token).inspect_err(|e| {
            self.security.log_event(
                SecurityEvent::new("invalid_token", SecuritySeverity::Medium, ip)
                    .with_details(serde_json::json!({ "error": e.to_string() })),
            );
        })
    }

    /// Resolve a bearer token to an active user
    pub async fn authenticate(&self, token: &str, ip: &str) -> Result<User> {
        let claims = self.verify_token(token, ip)?;
        match self.db.get_user(claims.user_id).await? {
            Some(user) if user.is_active => Ok(user),
            Some(_) => Err(TubeloadError::Unauthorized("User account is disabled".into())),
            None => Err(TubeloadError::Unauthorized("User not found".into())),
        }
    }

    pub async fn change_password(&self, user: &User, current: &str, new: &str) -> Result<()> {
        if !verify_password_blocking(current, &user.salt, &user.hashed_password).await? {
            return Err(TubeloadError::Validation("Current password is incorrect".into()));
        }
        validated(validate_password(new))?;

        let mut user = user.clone();
        let salt = generate_salt();
        let hashed = hash_password_blocking(new, &salt).await?;
        user.change_password(hashed, salt);
        self.db.update_user(&user).await?;
        info!("Password changed for {}", user.username);
        Ok(())
    }

    pub async fn update_profile(
        &self,
        user: &User,
        full_name: Option<String>,
        email: Option<String>,
    ) -> Result<User> {
        let mut updated = user.clone();
        if let Some(email) = email {
            let email = validated(validate_email(&email))?;
            if email != user.email {
                if let Some(other) = self.db.get_user_by_email(&email).await? {
                    if other.id != user.id {
                        return Err(TubeloadError::Conflict("Email already registered".into()));
                    }
                }
                updated.email = email;
            }
        }
        if full_name.is_some() {
            updated.full_name = full_name;
        }
        updated.updated_at = chrono::Utc::now();
        self.db.update_user(&updated).await?;
        Ok(updated)
    }

    pub async fn list_users(&self, admin: &User, skip: i64, limit: i64) -> Result<Vec<User>> {
        require_admin(admin)?;
        Ok(self.db.list_users(skip, limit).await?)
    }

    pub async fn user_stats(&self, admin: &User) -> Result<UserStats> {
        require_admin(admin)?;
        Ok(self.db.user_stats().await?)
    }

    pub async fn toggle_user_status(&self, admin: &User, user_id: Uuid) -> Result<User> {
        require_admin(admin)?;
        let mut user = self.load_user(user_id).await?;
        if user.is_active {
            user.deactivate();
        } else {
            user.activate();
        }
        self.db.update_user(&user).await?;
        info!("User {} active={} (by {})", user.username, user.is_active, admin.username);
        Ok(user)
    }

    pub async fn make_admin(&self, admin: &User, user_id: Uuid) -> Result<User> {
        require_admin(admin)?;
        let mut user = self.load_user(user_id).await?;
        user.promote_to_admin();
        self.db.update_user(&user).await?;
        info!("User {} promoted to admin by {}", user.username, admin.username);
        Ok(user)
    }

    pub async fn delete_user(&self, admin: &User, user_id: Uuid) -> Result<()> {
        require_admin(admin)?;
        if admin.id == user_id {
            return Err(TubeloadError::Validation("Cannot delete your own account".into()));
        }
        if !self.db.delete_user(user_id).await? {
            return Err(TubeloadError::not_found("User not found"));
        }
        info!("User {} deleted by {}", user_id, admin.username);
        Ok(())
    }

    /// Create the first admin account unless one with that name already exists
    pub async fn bootstrap_admin(&self, username: &str, email: &str, password: &str) -> Result<User> {
        if let Some(existing) = self.db.get_user_by_username(username).await? {
            return Ok(existing);
        }
        let mut user = self.register(username, email, password, None).await?;
        user.promote_to_admin();
        self.db.update_user(&user).await?;
        info!("Bootstrapped admin account {}", user.username);
        Ok(user)
    }

    async fn load_user(&self, user_id: Uuid) -> Result<User> {
        self.db
            .get_user(user_id)
            .await?
            .ok_or_else(|| TubeloadError::not_found("User not found"))
    }

    async fn write_log(&self, log: DownloadLog) {
        if let Err(e) = self.db.create_log(&log).await {
            warn!("Failed to write {} log: {}", log.action, e);
        }
    }
}

pub fn require_admin(user: &User) -> Result<()> {
    if user.is_admin() {
        Ok(())
    } else {
        Err(TubeloadError::Forbidden("Admin privileges required".into()))
    }
}

fn validated(result: crate::utils::validation::ValidationResult) -> Result<String> {
    if result.is_valid {
        Ok(result.sanitized.unwrap_or_default())
    } else {
        Err(TubeloadError::Validation(result.message()))
    }
}
