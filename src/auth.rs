//! Bearer token lifecycle for the upstream API
//!
//! Owns the opaque Kraken token obtained by the login mutation and decides
//! when it is stale enough to warrant re-authentication. There is no
//! proactive renewal loop: the token is refreshed reactively when a call
//! fails with an auth error or when `is_valid` reports it expired.

use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;

/// Seconds of remaining lifetime below which the token counts as stale
pub const TOKEN_REFRESH_MARGIN_SECS: i64 = 300;

/// Assumed lifetime when the login response carries no expiry
pub const FALLBACK_TOKEN_LIFETIME_SECS: i64 = 3600;

#[derive(Debug, Clone)]
struct TokenState {
    token: String,
    expires_at: DateTime<Utc>,
}

/// Centralized token storage shared by all callers of the API client
pub struct TokenManager {
    state: RwLock<Option<TokenState>>,
    logger: crate::logging::StructuredLogger,
}

impl TokenManager {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(None),
            logger: crate::logging::get_logger("auth"),
        }
    }

    /// Current token, if any
    pub async fn token(&self) -> Option<String> {
        self.state.read().await.as_ref().map(|s| s.token.clone())
    }

    /// Whether the token exists and has at least the refresh margin left
    pub async fn is_valid(&self) -> bool {
        let guard = self.state.read().await;
        match guard.as_ref() {
            Some(state) => {
                let valid =
                    Utc::now() < state.expires_at - Duration::seconds(TOKEN_REFRESH_MARGIN_SECS);
                if !valid {
                    let remaining = (state.expires_at - Utc::now()).num_seconds();
                    self.logger.debug(&format!(
                        "Token validity check: INVALID (expiry in {} seconds)",
                        remaining
                    ));
                }
                valid
            }
            None => false,
        }
    }

    /// Store a new token. `expiry_epoch` comes from the login response
    /// payload; without it a fixed fallback lifetime applies.
    pub async fn set_token(&self, token: String, expiry_epoch: Option<i64>) {
        let issued_at = Utc::now();
        let expires_at = match expiry_epoch.and_then(|epoch| DateTime::from_timestamp(epoch, 0)) {
            Some(expiry) => {
                let lifetime = (expiry - issued_at).num_seconds();
                self.logger.debug(&format!(
                    "Token set with explicit expiry - valid for {} seconds",
                    lifetime
                ));
                expiry
            }
            None => {
                self.logger.warn(&format!(
                    "No token expiry supplied, assuming {} seconds",
                    FALLBACK_TOKEN_LIFETIME_SECS
                ));
                issued_at + Duration::seconds(FALLBACK_TOKEN_LIFETIME_SECS)
            }
        };

        let mut guard = self.state.write().await;
        *guard = Some(TokenState { token, expires_at });
    }

    /// Drop the stored token, forcing a re-login before the next call
    pub async fn clear(&self) {
        let mut guard = self.state.write().await;
        *guard = None;
    }
}

impl Default for TokenManager {
    fn default() -> Self {
        Self::new()
    }
}
