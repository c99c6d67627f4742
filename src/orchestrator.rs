//! Periodic fetch coordination with throttling and staleness policy
//!
//! One orchestrator instance owns the account set and the cache of last
//! known-good records. Refreshes are serialized through an internal lock,
//! throttled against the upstream rate limit and degrade to cached data on
//! failure. Only the very first cycle may fail hard: after that, stale data
//! always beats no data.

use crate::api::UpstreamApi;
use crate::error::{BridgeError, Result};
use crate::model::AccountRecord;
use crate::normalize::normalize;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Fraction of the configured interval below which a refresh is skipped.
/// Guards against redundant refreshes from multiple callers in one tick.
const THROTTLE_FACTOR: f64 = 0.9;

struct OrchestratorState {
    last_fetch: Option<Instant>,
    cache: HashMap<String, AccountRecord>,
    has_completed_cycle: bool,
}

/// Coordinates upstream fetches for a fixed set of accounts
pub struct FetchOrchestrator<A: UpstreamApi> {
    api: Arc<A>,
    accounts: Vec<String>,
    interval: Duration,
    state: tokio::sync::Mutex<OrchestratorState>,
    logger: crate::logging::StructuredLogger,
}

impl<A: UpstreamApi> FetchOrchestrator<A> {
    pub fn new(api: Arc<A>, accounts: Vec<String>, interval: Duration) -> Self {
        Self {
            api,
            accounts,
            interval,
            state: tokio::sync::Mutex::new(OrchestratorState {
                last_fetch: None,
                cache: HashMap::new(),
                has_completed_cycle: false,
            }),
            logger: crate::logging::get_logger("orchestrator"),
        }
    }

    /// Account numbers this orchestrator refreshes
    pub fn accounts(&self) -> &[String] {
        &self.accounts
    }

    /// Last known records without touching upstream
    pub async fn snapshot(&self) -> HashMap<String, AccountRecord> {
        self.state.lock().await.cache.clone()
    }

    /// Refresh all accounts, returning the resulting record map.
    ///
    /// Within the throttle window the cached map is returned unchanged. A
    /// per-account fetch failure keeps that account's previous record; only
    /// a first cycle that produces no data at all is an error, so setup can
    /// abort instead of presenting an empty installation.
    pub async fn refresh(&self) -> Result<HashMap<String, AccountRecord>> {
        // Held across the upstream calls: at most one in-flight cycle
        let mut state = self.state.lock().await;

        if let Some(last) = state.last_fetch {
            let threshold = self.interval.mul_f64(THROTTLE_FACTOR);
            let elapsed = last.elapsed();
            if elapsed < threshold {
                self.logger.debug(&format!(
                    "Skipping refresh, last fetch {:?} ago (threshold {:?})",
                    elapsed, threshold
                ));
                return Ok(state.cache.clone());
            }
        }

        let mut any_completed = false;
        let mut any_data = false;

        for account_number in &self.accounts {
            match self.api.fetch_account_data(account_number).await {
                Ok(raw) => {
                    any_completed = true;
                    any_data = true;
                    let record = normalize(&raw, account_number, Utc::now());
                    state.cache.insert(account_number.clone(), record);
                }
                Err(e) => {
                    if state.cache.contains_key(account_number) {
                        self.logger.warn(&format!(
                            "Fetch failed for account {}, keeping previous data: {}",
                            account_number, e
                        ));
                    } else {
                        self.logger.error(&format!(
                            "Fetch failed for account {} with no previous data: {}",
                            account_number, e
                        ));
                        // Presentation layers still expect an entry per account
                        state
                            .cache
                            .insert(account_number.clone(), AccountRecord {
                                account_number: account_number.clone(),
                                ..AccountRecord::default()
                            });
                    }
                }
            }
        }

        if !state.has_completed_cycle && !any_data {
            return Err(BridgeError::api(
                "Initial fetch returned no data for any account",
            ));
        }

        if any_completed {
            state.last_fetch = Some(Instant::now());
            state.has_completed_cycle = true;
        }

        Ok(state.cache.clone())
    }
}
