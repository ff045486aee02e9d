//! HS256 access tokens

use crate::utils::TubeloadError;
use chrono::Utc;
use jsonwebtoken::{decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: Uuid,
    pub exp: i64,
    pub iat: i64,
}

/// Signs and checks access tokens with a shared secret
#[derive(Clone)]
pub struct TokenCodec {
    encoding: EncodingKey,
    decoding: DecodingKey,
    default_expiry_secs: i64,
}

impl TokenCodec {
    pub fn new(secret: &str, default_expiry_secs: u64) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            default_expiry_secs: default_expiry_secs as i64,
        }
    }

    pub fn default_expiry_secs(&self) -> i64 {
        self.default_expiry_secs
    }

    pub fn create_token(&self, user_id: Uuid, expires_in: Option<i64>) -> Result<String, TubeloadError> {
        let now = Utc::now().timestamp();
        let claims = Claims {
            user_id,
            iat: now,
            exp: now + expires_in.unwrap_or(self.default_expiry_secs),
        };
        encode(&Header::default(), &claims, &self.encoding)
            .map_err(|e| TubeloadError::OperationFailed(format!("token encoding failed: {}", e)))
    }

    pub fn verify_token(&self, token: &str) -> Result<Claims, TubeloadError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        decode::<Claims>(token, &self.decoding, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => TubeloadError::Unauthorized("Token has expired".into()),
                _ => TubeloadError::Unauthorized("Invalid token".into()),
            })
    }
}
