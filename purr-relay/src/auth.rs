//! Bearer token authentication
//!
//! Every device shares one password. Presenting it to `/auth` yields a token
//! that embeds the device description and an expiry, signed with HMAC-SHA256.
//!
//! ## Token Format
//!
//! `<claims>.<signature>`, both base64url without padding:
//! - claims: JSON `{"deviceInfo": "...", "exp": <unix seconds>}`
//! - signature: HMAC-SHA256 over the encoded claims

use crate::interface::RelayError;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::time::Duration;

type HmacSha256 = Hmac<Sha256>;

/// Default token lifetime
pub const DEFAULT_TOKEN_EXPIRY: Duration = Duration::from_secs(24 * 60 * 60);

const SECRET_LEN: usize = 32;

/// Authentication configuration.
#[derive(Clone)]
pub struct AuthConfig {
    /// Shared password every device presents
    pub password: String,
    /// Secret key for HMAC.
    pub secret: Vec<u8>,
    /// Token expiration duration.
    pub token_expiry: Duration,
}

impl AuthConfig {
    /// Creates a configuration with a freshly generated secret.
    /// Tokens signed with it do not survive a restart.
    pub fn new(password: impl Into<String>) -> Self {
        let mut secret = vec![0u8; SECRET_LEN];
        rand::thread_rng().fill_bytes(&mut secret);
        Self {
            password: password.into(),
            secret,
            token_expiry: DEFAULT_TOKEN_EXPIRY,
        }
    }

    /// Sets a fixed signing secret.
    pub fn with_secret(mut self, secret: impl Into<Vec<u8>>) -> Self {
        self.secret = secret.into();
        self
    }

    /// Sets the token expiration duration.
    pub fn with_expiry(mut self, expiry: Duration) -> Self {
        self.token_expiry = expiry;
        self
    }
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("password", &"<redacted>")
            .field("secret", &"<redacted>")
            .field("token_expiry", &self.token_expiry)
            .finish()
    }
}

/// Contents of a verified token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Claims {
    pub device_info: String,
    /// Expiry, Unix seconds
    pub exp: i64,
}

/// Issues and verifies tokens.
#[derive(Clone)]
pub struct TokenAuthority {
    config: AuthConfig,
    /// HMAC of the configured password, compared in constant time on login
    password_tag: Vec<u8>,
}

impl TokenAuthority {
    pub fn new(config: AuthConfig) -> Self {
        let password_tag = sign(&config.secret, config.password.as_bytes()).to_vec();
        Self { config, password_tag }
    }

    /// Exchange the shared password for a token
    pub fn login(&self, password: &str, device_info: &str) -> Result<String, RelayError> {
        let mut mac = mac(&self.config.secret);
        mac.update(password.as_bytes());
        mac.verify_slice(&self.password_tag)
            .map_err(|_| RelayError::Unauthenticated("Invalid password".to_string()))?;
        Ok(self.issue(device_info))
    }

    /// Sign a token for this device, valid for the configured lifetime
    pub fn issue(&self, device_info: &str) -> String {
        let claims = Claims {
            device_info: device_info.to_string(),
            exp: Utc::now().timestamp() + self.config.token_expiry.as_secs() as i64,
        };
        // Serializing a struct of a string and an integer cannot fail
        let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims).unwrap_or_default());
        let signature = URL_SAFE_NO_PAD.encode(sign(&self.config.secret, payload.as_bytes()));
        format!("{}.{}", payload, signature)
    }

    /// Check signature and expiry
    pub fn verify(&self, token: &str) -> Result<Claims, RelayError> {
        let invalid = || RelayError::Unauthenticated("Invalid token".to_string());

        let (payload, signature) = token.split_once('.').ok_or_else(invalid)?;
        let signature = URL_SAFE_NO_PAD.decode(signature).map_err(|_| invalid())?;

        let mut mac = mac(&self.config.secret);
        mac.update(payload.as_bytes());
        mac.verify_slice(&signature).map_err(|_| invalid())?;

        let claims_json = URL_SAFE_NO_PAD.decode(payload).map_err(|_| invalid())?;
        let claims: Claims = serde_json::from_slice(&claims_json).map_err(|_| invalid())?;

        if Utc::now().timestamp() >= claims.exp {
            return Err(RelayError::Unauthenticated("Token expired".to_string()));
        }
        Ok(claims)
    }

    /// Verify the value of an `Authorization` header
    pub fn verify_header(&self, header: Option<&str>) -> Result<Claims, RelayError> {
        let header = header.ok_or_else(|| {
            RelayError::Unauthenticated("No authorization header provided".to_string())
        })?;
        let token = header
            .strip_prefix("Bearer ")
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| RelayError::Unauthenticated("Malformed authorization header".to_string()))?;
        self.verify(token)
    }
}

fn mac(secret: &[u8]) -> HmacSha256 {
    HmacSha256::new_from_slice(secret).expect("HMAC can take key of any size")
}

/// Signs data with HMAC-SHA256.
fn sign(secret: &[u8], data: &[u8]) -> [u8; 32] {
    let mut mac = mac(secret);
    mac.update(data);
    mac.finalize().into_bytes().into()
}
