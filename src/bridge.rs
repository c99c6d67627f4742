//! Main bridge service
//!
//! Wires the upstream API client, fetch orchestrator, reconciler and
//! persistence together and runs the polling loop. External components talk
//! to the running bridge through a command channel; each command carries a
//! oneshot responder. Refresh cycles and command handlers run in spawned
//! tasks so neither path waits on the other: a switch command issued while
//! a fetch is in flight takes effect immediately.

use crate::api::{OctopusApi, UpstreamApi};
use crate::config::Config;
use crate::error::{BridgeError, Result};
use crate::logging::get_logger;
use crate::model::AccountRecord;
use crate::orchestrator::FetchOrchestrator;
use crate::persistence::PersistenceManager;
use crate::reconcile::CommandReconciler;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Duration, interval};

/// Commands accepted by the bridge from external components
#[derive(Debug)]
pub enum BridgeCommand {
    SetDeviceSuspension {
        device_id: String,
        suspended: bool,
        respond_to: oneshot::Sender<Result<()>>,
    },
    SetBoostCharge {
        device_id: String,
        active: bool,
        respond_to: oneshot::Sender<Result<()>>,
    },
    GetSnapshot {
        respond_to: oneshot::Sender<HashMap<String, AccountRecord>>,
    },
}

/// Main bridge service for Octobridge
pub struct Bridge<A: UpstreamApi + 'static> {
    /// Configuration
    config: Config,

    /// Upstream API client, shared with orchestrator and reconciler
    api: Arc<A>,

    /// Fetch coordination, created at setup once accounts are known
    orchestrator: Option<Arc<FetchOrchestrator<A>>>,

    /// Pending command tracking, shared with spawned command handlers
    reconciler: Arc<CommandReconciler<A>>,

    /// Persistence manager
    persistence: PersistenceManager,

    /// Logger with context
    logger: crate::logging::StructuredLogger,

    /// Command receiver for external control
    commands_rx: mpsc::UnboundedReceiver<BridgeCommand>,

    /// Shutdown signal
    shutdown_tx: mpsc::UnboundedSender<()>,

    /// Shutdown receiver
    shutdown_rx: mpsc::UnboundedReceiver<()>,
}

impl Bridge<OctopusApi> {
    /// Create a bridge talking to the real upstream API
    pub fn new(config: Config, commands_rx: mpsc::UnboundedReceiver<BridgeCommand>) -> Result<Self> {
        let api = Arc::new(OctopusApi::new(&config.api)?);
        Self::with_api(config, api, commands_rx)
    }
}

impl<A: UpstreamApi + 'static> Bridge<A> {
    /// Create a bridge over any upstream implementation
    pub fn with_api(
        config: Config,
        api: Arc<A>,
        commands_rx: mpsc::UnboundedReceiver<BridgeCommand>,
    ) -> Result<Self> {
        config.validate()?;

        let logger = get_logger("bridge");
        let reconciler = Arc::new(CommandReconciler::new(
            api.clone(),
            Duration::from_secs(config.pending_timeout_minutes * 60),
        ));

        let mut persistence = PersistenceManager::new(&config.state_file);
        // Best-effort: a missing or corrupt state file means re-discovery
        if let Err(e) = persistence.load() {
            logger.warn(&format!("Failed to load persistent state: {}", e));
        }

        let (shutdown_tx, shutdown_rx) = mpsc::unbounded_channel();

        Ok(Self {
            config,
            api,
            orchestrator: None,
            reconciler,
            persistence,
            logger,
            commands_rx,
            shutdown_tx,
            shutdown_rx,
        })
    }

    /// Handle to request a shutdown of the running bridge
    pub fn shutdown_handle(&self) -> mpsc::UnboundedSender<()> {
        self.shutdown_tx.clone()
    }

    /// Log in, resolve the account set and perform the initial fetch.
    ///
    /// The two fatal conditions live here: a failed login and a first fetch
    /// that yields no accounts or no data. Everything after setup degrades
    /// to stale data instead of failing.
    pub async fn setup(&mut self) -> Result<()> {
        self.logger.info("Logging in to upstream API");
        self.api.login().await?;

        let accounts = self.resolve_accounts().await?;
        self.logger.info(&format!(
            "Bridging {} account(s): {}",
            accounts.len(),
            accounts.join(", ")
        ));

        let orchestrator = Arc::new(FetchOrchestrator::new(
            self.api.clone(),
            accounts,
            Duration::from_secs(self.config.poll_interval_minutes * 60),
        ));

        let records = orchestrator.refresh().await?;
        self.reconciler.observe(&records).await;
        self.orchestrator = Some(orchestrator);

        Ok(())
    }

    /// Account set for this installation: configured accounts win, then
    /// previously persisted discovery, then a fresh discovery query.
    async fn resolve_accounts(&mut self) -> Result<Vec<String>> {
        if !self.config.accounts.is_empty() {
            return Ok(self.config.accounts.clone());
        }

        if !self.persistence.accounts().is_empty() {
            self.logger.debug("Using previously discovered accounts");
            return Ok(self.persistence.accounts().to_vec());
        }

        self.logger.info("Discovering accounts");
        let accounts = self.api.fetch_accounts().await?;
        if accounts.is_empty() {
            return Err(BridgeError::api("No accounts found for these credentials"));
        }

        self.persistence.set_accounts(accounts.clone());
        if let Err(e) = self.persistence.save() {
            self.logger.warn(&format!("Failed to persist account list: {}", e));
        }
        Ok(accounts)
    }

    /// Run the polling loop until a shutdown signal arrives.
    ///
    /// Refreshes and commands are dispatched to spawned tasks; the loop
    /// itself never awaits an upstream call, so commands queued during a
    /// slow fetch are picked up right away. Overlapping refresh spawns are
    /// harmless: the orchestrator serializes cycles internally and the
    /// throttle skips redundant ones.
    pub async fn run(&mut self) -> Result<()> {
        let Some(orchestrator) = self.orchestrator.clone() else {
            return Err(BridgeError::generic("Bridge started without setup"));
        };

        let mut poll_interval =
            interval(Duration::from_secs(self.config.poll_interval_minutes * 60));
        // First tick fires immediately; setup already fetched
        poll_interval.tick().await;

        loop {
            tokio::select! {
                _ = poll_interval.tick() => {
                    let orchestrator = orchestrator.clone();
                    let reconciler = self.reconciler.clone();
                    let logger = self.logger.clone();
                    tokio::spawn(async move {
                        match orchestrator.refresh().await {
                            Ok(records) => reconciler.observe(&records).await,
                            Err(e) => {
                                // Keep polling; the next tick doubles as the retry
                                logger.error(&format!("Refresh cycle failed: {}", e));
                            }
                        }
                    });
                }
                Some(cmd) = self.commands_rx.recv() => {
                    let orchestrator = orchestrator.clone();
                    let reconciler = self.reconciler.clone();
                    tokio::spawn(Self::dispatch_command(orchestrator, reconciler, cmd));
                }
                _ = self.shutdown_rx.recv() => {
                    self.logger.info("Shutdown signal received");
                    break;
                }
            }
        }

        Ok(())
    }

    async fn dispatch_command(
        orchestrator: Arc<FetchOrchestrator<A>>,
        reconciler: Arc<CommandReconciler<A>>,
        cmd: BridgeCommand,
    ) {
        match cmd {
            BridgeCommand::SetDeviceSuspension {
                device_id,
                suspended,
                respond_to,
            } => {
                let result = reconciler.set_device_suspension(&device_id, suspended).await;
                let _ = respond_to.send(result);
            }
            BridgeCommand::SetBoostCharge {
                device_id,
                active,
                respond_to,
            } => {
                // Boost commands only apply to device categories that charge
                let eligible = Self::boost_eligible(&orchestrator, &device_id).await;
                let result = if eligible {
                    reconciler.set_boost_charge(&device_id, active).await
                } else {
                    Err(BridgeError::validation(
                        "device_id",
                        "Device does not support boost charging",
                    ))
                };
                let _ = respond_to.send(result);
            }
            BridgeCommand::GetSnapshot { respond_to } => {
                let _ = respond_to.send(Self::overlaid_snapshot(&orchestrator, &reconciler).await);
            }
        }
    }

    /// Whether the device, as last fetched, accepts boost-charge commands.
    /// Devices not present in any record pass through; upstream decides.
    async fn boost_eligible(orchestrator: &FetchOrchestrator<A>, device_id: &str) -> bool {
        let records = orchestrator.snapshot().await;
        records
            .values()
            .flat_map(|r| r.devices.iter())
            .find(|d| d.id == device_id)
            .is_none_or(|d| d.device_type.supports_boost())
    }

    /// Last known records with the pending-command overlay applied to each
    /// device's reported state
    async fn overlaid_snapshot(
        orchestrator: &FetchOrchestrator<A>,
        reconciler: &CommandReconciler<A>,
    ) -> HashMap<String, AccountRecord> {
        let mut records = orchestrator.snapshot().await;
        for record in records.values_mut() {
            for device in &mut record.devices {
                let suspended = reconciler.effective_suspension(device).await;
                let boosting = reconciler.effective_boost(device).await;
                device.status.is_suspended = suspended;
                if boosting && !device.status.boost_active() {
                    // Surface an optimistic boost the same way upstream does
                    device.status.current_state = "BOOST_CHARGING".to_string();
                }
            }
        }
        records
    }

    /// Snapshot with the optimistic overlay, for in-process consumers
    pub async fn snapshot(&self) -> HashMap<String, AccountRecord> {
        match self.orchestrator.as_ref() {
            Some(orchestrator) => Self::overlaid_snapshot(orchestrator, &self.reconciler).await,
            None => HashMap::new(),
        }
    }
}
