//! # Octobridge - Octopus Energy Germany bridge
//!
//! A Rust bridge between the Octopus Energy Germany GraphQL API and a
//! home-automation platform, polling account, device, tariff and dispatch
//! state into a stable internal schema and driving the two writable device
//! controls (smart-control suspension and boost charge) with optimistic
//! state reconciliation.
//!
//! ## Features
//!
//! - **Async-first**: Tokio runtime with a single polling loop per install
//! - **Staleness over failure**: transient upstream outages degrade to the
//!   last known-good data instead of erroring out
//! - **Throttled fetches**: refreshes respect the upstream rate limit shared
//!   with the vendor app
//! - **Optimistic commands**: device mutations reflect immediately and are
//!   reconciled against later fetches
//! - **Configuration**: YAML-based configuration with validation
//!
//! ## Architecture
//!
//! - `config`: Configuration management and validation
//! - `logging`: Structured logging and tracing
//! - `graphql`: GraphQL transport over HTTPS
//! - `auth`: Token lifecycle for the upstream API
//! - `api`: Upstream operations (queries and device mutations)
//! - `normalize`: Raw payload to canonical account records
//! - `orchestrator`: Throttled periodic fetch coordination
//! - `reconcile`: Optimistic command state tracking
//! - `bridge`: Service wiring and polling loop
//! - `persistence`: State persistence and recovery

pub mod api;
pub mod auth;
pub mod bridge;
pub mod config;
pub mod error;
pub mod graphql;
pub mod logging;
pub mod model;
pub mod normalize;
pub mod orchestrator;
pub mod persistence;
pub mod reconcile;

// Re-export commonly used types
pub use bridge::{Bridge, BridgeCommand};
pub use config::Config;
pub use error::{BridgeError, Result};
pub use model::AccountRecord;
