use async_trait::async_trait;
use octobridge::api::{BoostAction, SuspensionAction, UpstreamApi};
use octobridge::error::{BridgeError, Result};
use octobridge::orchestrator::FetchOrchestrator;
use octobridge::reconcile::CommandReconciler;
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

/// Scriptable upstream: device state flips once a suspension mutation lands
struct ScriptedApi {
    suspended: Mutex<bool>,
    reject_mutations: Mutex<bool>,
    mutations: Mutex<Vec<String>>,
}

impl ScriptedApi {
    fn new() -> Self {
        Self {
            suspended: Mutex::new(false),
            reject_mutations: Mutex::new(false),
            mutations: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl UpstreamApi for ScriptedApi {
    async fn login(&self) -> Result<()> {
        Ok(())
    }

    async fn fetch_accounts(&self) -> Result<Vec<String>> {
        Ok(vec!["A-1".to_string()])
    }

    async fn fetch_account_data(&self, _account_number: &str) -> Result<Value> {
        let suspended = *self.suspended.lock().unwrap();
        Ok(json!({
            "account": {"ledgers": []},
            "devices": [{
                "id": "dev-1",
                "deviceType": "ELECTRIC_VEHICLES",
                "name": "Car",
                "provider": "OHME",
                "status": {
                    "current": "LIVE",
                    "currentState": "SMART_CONTROL_CAPABLE",
                    "isSuspended": suspended
                }
            }],
            "plannedDispatches": [],
            "completedDispatches": []
        }))
    }

    async fn change_device_suspension(
        &self,
        device_id: &str,
        action: SuspensionAction,
    ) -> Result<()> {
        if *self.reject_mutations.lock().unwrap() {
            return Err(BridgeError::api("mutation rejected"));
        }
        self.mutations
            .lock()
            .unwrap()
            .push(format!("{}:{}", device_id, action.as_str()));
        *self.suspended.lock().unwrap() = action == SuspensionAction::Suspend;
        Ok(())
    }

    async fn update_boost_charge(&self, device_id: &str, action: BoostAction) -> Result<()> {
        if *self.reject_mutations.lock().unwrap() {
            return Err(BridgeError::api("mutation rejected"));
        }
        self.mutations
            .lock()
            .unwrap()
            .push(format!("{}:{}", device_id, action.as_str()));
        Ok(())
    }
}

#[tokio::test]
async fn suspension_command_confirms_on_next_refresh() {
    let api = Arc::new(ScriptedApi::new());
    let orchestrator = FetchOrchestrator::new(
        api.clone(),
        vec!["A-1".to_string()],
        Duration::from_secs(0),
    );
    let reconciler = CommandReconciler::new(api.clone(), Duration::from_secs(300));

    let records = orchestrator.refresh().await.unwrap();
    let device = records["A-1"].devices[0].clone();
    assert!(!device.status.is_suspended);

    // Command: state flips optimistically before any refresh
    reconciler.set_device_suspension("dev-1", true).await.unwrap();
    assert!(reconciler.effective_suspension(&device).await);
    assert_eq!(
        api.mutations.lock().unwrap().as_slice(),
        ["dev-1:SUSPEND".to_string()]
    );

    // Next refresh reports the confirmed state; pending is cleared and the
    // reported state is adopted as authoritative
    let records = orchestrator.refresh().await.unwrap();
    reconciler.observe(&records).await;
    let device = records["A-1"].devices[0].clone();
    assert!(device.status.is_suspended);
    assert!(reconciler.effective_suspension(&device).await);
}

#[tokio::test]
async fn rejected_mutation_leaves_no_optimistic_state() {
    let api = Arc::new(ScriptedApi::new());
    *api.reject_mutations.lock().unwrap() = true;
    let orchestrator = FetchOrchestrator::new(
        api.clone(),
        vec!["A-1".to_string()],
        Duration::from_secs(0),
    );
    let reconciler = CommandReconciler::new(api.clone(), Duration::from_secs(300));

    let records = orchestrator.refresh().await.unwrap();
    let device = records["A-1"].devices[0].clone();

    let result = reconciler.set_device_suspension("dev-1", true).await;
    assert!(result.is_err());
    assert!(!reconciler.effective_suspension(&device).await);
    assert!(api.mutations.lock().unwrap().is_empty());
}

#[tokio::test]
async fn boost_command_round_trip() {
    let api = Arc::new(ScriptedApi::new());
    let orchestrator = FetchOrchestrator::new(
        api.clone(),
        vec!["A-1".to_string()],
        Duration::from_secs(0),
    );
    let reconciler = CommandReconciler::new(api.clone(), Duration::from_secs(300));

    let records = orchestrator.refresh().await.unwrap();
    let device = records["A-1"].devices[0].clone();
    assert!(!reconciler.effective_boost(&device).await);

    reconciler.set_boost_charge("dev-1", true).await.unwrap();
    assert!(reconciler.effective_boost(&device).await);

    reconciler.set_boost_charge("dev-1", false).await.unwrap();
    assert!(!reconciler.effective_boost(&device).await);

    assert_eq!(
        api.mutations.lock().unwrap().as_slice(),
        ["dev-1:BOOST".to_string(), "dev-1:CANCEL".to_string()]
    );
}
