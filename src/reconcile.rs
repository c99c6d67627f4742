//! Optimistic command state and upstream reconciliation
//!
//! Each writable control (device suspension, boost charge) moves through a
//! small state machine: idle, then pending with a desired value and a
//! deadline after a mutation is issued, then idle again once the next
//! normalized record confirms the value, the deadline passes, or the
//! mutation itself fails. Readers always see the desired value while a
//! command is pending; after that, upstream reality wins.

use crate::api::{BoostAction, SuspensionAction, UpstreamApi};
use crate::error::Result;
use crate::model::{AccountRecord, CommandKind, DeviceRecord, PendingCommand};
use chrono::{Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

type PendingKey = (String, CommandKind);

/// Tracks pending device commands and reconciles them against fetched records
pub struct CommandReconciler<A: UpstreamApi> {
    api: Arc<A>,
    pending: Mutex<HashMap<PendingKey, PendingCommand>>,
    grace_period: Duration,
    logger: crate::logging::StructuredLogger,
}

impl<A: UpstreamApi> CommandReconciler<A> {
    /// `grace_period` is how long an unconfirmed command keeps overriding
    /// the reported state
    pub fn new(api: Arc<A>, grace_period: std::time::Duration) -> Self {
        Self {
            api,
            pending: Mutex::new(HashMap::new()),
            grace_period: Duration::from_std(grace_period).unwrap_or(Duration::minutes(5)),
            logger: crate::logging::get_logger("reconciler"),
        }
    }

    /// Suspend or unsuspend smart control for a device.
    ///
    /// The pending entry is stored before the mutation goes out so readers
    /// reflect the desired state immediately; a rejected mutation removes it
    /// again and surfaces the failure.
    pub async fn set_device_suspension(&self, device_id: &str, suspended: bool) -> Result<()> {
        self.insert_pending(device_id, CommandKind::Suspension, suspended)
            .await;

        let action = if suspended {
            SuspensionAction::Suspend
        } else {
            SuspensionAction::Unsuspend
        };
        match self.api.change_device_suspension(device_id, action).await {
            Ok(()) => {
                self.logger.info(&format!(
                    "Issued {} for device {}",
                    action.as_str(),
                    device_id
                ));
                Ok(())
            }
            Err(e) => {
                self.remove_pending(device_id, CommandKind::Suspension).await;
                self.logger.error(&format!(
                    "Suspension change failed for device {}: {}",
                    device_id, e
                ));
                Err(e)
            }
        }
    }

    /// Start or cancel a boost charge for a device
    pub async fn set_boost_charge(&self, device_id: &str, active: bool) -> Result<()> {
        self.insert_pending(device_id, CommandKind::Boost, active)
            .await;

        let action = if active {
            BoostAction::Boost
        } else {
            BoostAction::Cancel
        };
        match self.api.update_boost_charge(device_id, action).await {
            Ok(()) => {
                self.logger.info(&format!(
                    "Issued {} for device {}",
                    action.as_str(),
                    device_id
                ));
                Ok(())
            }
            Err(e) => {
                self.remove_pending(device_id, CommandKind::Boost).await;
                self.logger.error(&format!(
                    "Boost change failed for device {}: {}",
                    device_id, e
                ));
                Err(e)
            }
        }
    }

    /// Reconcile pending commands against a freshly normalized record set.
    /// Confirmed and expired entries are cleared.
    pub async fn observe(&self, records: &HashMap<String, AccountRecord>) {
        let now = Utc::now();
        let mut pending = self.pending.lock().await;
        pending.retain(|(device_id, kind), command| {
            if now > command.deadline {
                self.logger.warn(&format!(
                    "Pending {:?} command for device {} expired without confirmation",
                    kind, device_id
                ));
                return false;
            }
            let reported = records
                .values()
                .flat_map(|r| r.devices.iter())
                .find(|d| &d.id == device_id)
                .map(|d| reported_state(d, *kind));
            match reported {
                Some(state) if state == command.desired_state => {
                    self.logger.debug(&format!(
                        "Pending {:?} command for device {} confirmed",
                        kind, device_id
                    ));
                    false
                }
                _ => true,
            }
        });
    }

    /// Suspension state as a reader should see it: the pending desired value
    /// while one is active, otherwise the reported state
    pub async fn effective_suspension(&self, device: &DeviceRecord) -> bool {
        self.effective_state(device, CommandKind::Suspension).await
    }

    /// Boost state as a reader should see it
    pub async fn effective_boost(&self, device: &DeviceRecord) -> bool {
        self.effective_state(device, CommandKind::Boost).await
    }

    async fn effective_state(&self, device: &DeviceRecord, kind: CommandKind) -> bool {
        let now = Utc::now();
        let mut pending = self.pending.lock().await;
        let key = (device.id.clone(), kind);
        if let Some(command) = pending.get(&key) {
            if now > command.deadline {
                self.logger.warn(&format!(
                    "Pending {:?} command for device {} expired, reverting to reported state",
                    kind, device.id
                ));
                pending.remove(&key);
            } else {
                return command.desired_state;
            }
        }
        reported_state(device, kind)
    }

    async fn insert_pending(&self, device_id: &str, kind: CommandKind, desired_state: bool) {
        let command = PendingCommand {
            device_id: device_id.to_string(),
            kind,
            desired_state,
            deadline: Utc::now() + self.grace_period,
        };
        let mut pending = self.pending.lock().await;
        pending.insert((device_id.to_string(), kind), command);
    }

    async fn remove_pending(&self, device_id: &str, kind: CommandKind) {
        let mut pending = self.pending.lock().await;
        pending.remove(&(device_id.to_string(), kind));
    }

    #[cfg(test)]
    async fn pending_deadline(
        &self,
        device_id: &str,
        kind: CommandKind,
    ) -> Option<chrono::DateTime<Utc>> {
        self.pending
            .lock()
            .await
            .get(&(device_id.to_string(), kind))
            .map(|c| c.deadline)
    }

    #[cfg(test)]
    async fn force_deadline(
        &self,
        device_id: &str,
        kind: CommandKind,
        deadline: chrono::DateTime<Utc>,
    ) {
        if let Some(command) = self
            .pending
            .lock()
            .await
            .get_mut(&(device_id.to_string(), kind))
        {
            command.deadline = deadline;
        }
    }
}

fn reported_state(device: &DeviceRecord, kind: CommandKind) -> bool {
    match kind {
        CommandKind::Suspension => device.status.is_suspended,
        CommandKind::Boost => device.status.boost_active(),
    }
}
