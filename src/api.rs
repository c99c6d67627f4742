//! Upstream Octopus Energy Germany API client
//!
//! Wraps the GraphQL transport with the login exchange, reactive token
//! refresh and the bounded set of operations one refresh cycle needs:
//! account discovery, the per-account aggregate query, per-device planned
//! dispatches and the two device mutations.

use crate::auth::TokenManager;
use crate::config::ApiConfig;
use crate::error::{BridgeError, Result};
use crate::graphql::{GraphqlClient, GraphqlResponse};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::time::Duration;

/// Upstream code for an expired JWT; triggers one re-login and retry
pub const ERROR_CODE_JWT_EXPIRED: &str = "KT-CT-1124";

/// Upstream code for login rate limiting
pub const ERROR_CODE_RATE_LIMITED: &str = "KT-CT-1199";

/// Upstream code for accounts without devices or dispatches; non-critical
pub const ERROR_CODE_NOT_FOUND: &str = "KT-CT-4301";

const LOGIN_MAX_ATTEMPTS: u32 = 5;
const LOGIN_INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const LOGIN_MAX_BACKOFF: Duration = Duration::from_secs(30);

const LOGIN_MUTATION: &str = r#"
mutation krakenTokenAuthentication($email: String!, $password: String!) {
  obtainKrakenToken(input: { email: $email, password: $password }) {
    token
    payload
  }
}
"#;

const ACCOUNT_DISCOVERY_QUERY: &str = r#"
query {
  viewer {
    accounts {
      number
    }
  }
}
"#;

const ACCOUNT_DATA_QUERY: &str = r#"
query AccountDataQuery($accountNumber: String!) {
  account(accountNumber: $accountNumber) {
    id
    ledgers {
      balance
      number
      ledgerType
    }
    allProperties {
      id
      electricityMalos {
        agreements {
          product {
            code
            description
            fullName
            isTimeOfUse
          }
          unitRateGrossRateInformation {
            grossRate
          }
          unitRateInformation {
            ... on SimpleProductUnitRateInformation {
              __typename
              grossRateInformation {
                date
                grossRate
                rateValidToDate
                vatRate
              }
              latestGrossUnitRateCentsPerKwh
              netUnitRateCentsPerKwh
            }
            ... on TimeOfUseProductUnitRateInformation {
              __typename
              rates {
                grossRateInformation {
                  date
                  grossRate
                  rateValidToDate
                  vatRate
                }
                latestGrossUnitRateCentsPerKwh
                netUnitRateCentsPerKwh
                timeslotActivationRules {
                  activeFromTime
                  activeToTime
                }
                timeslotName
              }
            }
          }
          validFrom
          validTo
        }
        maloNumber
        meloNumber
        meter {
          id
          meterType
          number
          shouldReceiveSmartMeterData
        }
      }
    }
  }
  completedDispatches(accountNumber: $accountNumber) {
    delta
    deltaKwh
    end
    meta {
      location
      source
    }
    start
  }
  devices(accountNumber: $accountNumber) {
    status {
      current
      currentState
      isSuspended
    }
    provider
    preferences {
      mode
      schedules {
        dayOfWeek
        max
        min
        time
      }
      targetType
      unit
    }
    name
    id
    deviceType
    ... on SmartFlexVehicle {
      id
      name
      vehicleVariant {
        model
        batterySize
      }
    }
  }
}
"#;

const FLEX_PLANNED_DISPATCHES_QUERY: &str = r#"
query flexPlannedDispatches($deviceId: String!) {
  flexPlannedDispatches(deviceId: $deviceId) {
    end
    energyAddedKwh
    start
    type
  }
}
"#;

const SUSPENSION_MUTATION: &str = r#"
mutation ChangeDeviceSuspension($deviceId: ID = "", $action: SmartControlAction!) {
  updateDeviceSmartControl(input: {deviceId: $deviceId, action: $action}) {
    id
  }
}
"#;

const BOOST_MUTATION: &str = r#"
mutation updateBoostCharge($input: UpdateBoostChargeInput!) {
  updateBoostCharge(input: $input) {
    id
  }
}
"#;

/// Action for the device suspension mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuspensionAction {
    Suspend,
    Unsuspend,
}

impl SuspensionAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Suspend => "SUSPEND",
            Self::Unsuspend => "UNSUSPEND",
        }
    }
}

/// Action for the boost charge mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoostAction {
    Boost,
    Cancel,
}

impl BoostAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Boost => "BOOST",
            Self::Cancel => "CANCEL",
        }
    }
}

/// Upstream operations the orchestrator, reconciler and bridge depend on.
/// Implemented by `OctopusApi`; tests substitute fakes.
#[async_trait]
pub trait UpstreamApi: Send + Sync {
    /// Establish a session with the upstream, storing whatever credentials
    /// later calls need
    async fn login(&self) -> Result<()>;

    /// Account numbers visible to the logged-in user
    async fn fetch_accounts(&self) -> Result<Vec<String>>;

    /// Aggregate raw payload for one account: `account`, `devices`,
    /// `completedDispatches` and merged `plannedDispatches`
    async fn fetch_account_data(&self, account_number: &str) -> Result<Value>;

    /// Suspend or unsuspend smart control for a device
    async fn change_device_suspension(
        &self,
        device_id: &str,
        action: SuspensionAction,
    ) -> Result<()>;

    /// Start or cancel a boost charge for a device
    async fn update_boost_charge(&self, device_id: &str, action: BoostAction) -> Result<()>;
}

/// Authenticated client for the Octopus Energy Germany GraphQL API
pub struct OctopusApi {
    email: String,
    password: String,
    client: GraphqlClient,
    tokens: TokenManager,
    login_lock: tokio::sync::Mutex<()>,
    logger: crate::logging::StructuredLogger,
}

impl OctopusApi {
    pub fn new(config: &ApiConfig) -> Result<Self> {
        let client = GraphqlClient::new(&config.endpoint, Duration::from_secs(config.timeout_secs))?;
        Ok(Self {
            email: config.email.clone(),
            password: config.password.clone(),
            client,
            tokens: TokenManager::new(),
            login_lock: tokio::sync::Mutex::new(()),
            logger: crate::logging::get_logger("api"),
        })
    }

    /// Ensure a usable token, logging in again when the stored one is stale
    async fn ensure_token(&self) -> Result<String> {
        if !self.tokens.is_valid().await {
            self.logger.debug("Token invalid or expired, logging in again");
            self.login().await?;
        }
        self.tokens
            .token()
            .await
            .ok_or_else(|| BridgeError::auth("No token available after login"))
    }

    /// Execute an authenticated operation. An expired-JWT response clears
    /// the token, re-logs-in and retries the operation exactly once.
    async fn execute_authed(&self, query: &str, variables: Value) -> Result<GraphqlResponse> {
        let token = self.ensure_token().await?;
        let response = match self
            .client
            .execute(query, variables.clone(), Some(&token))
            .await
        {
            Ok(response) => response,
            Err(e) if e.is_auth() => {
                self.logger.warn("Upstream rejected token, refreshing...");
                self.tokens.clear().await;
                self.login().await?;
                let token = self
                    .tokens
                    .token()
                    .await
                    .ok_or_else(|| BridgeError::auth("No token available after login"))?;
                self.client.execute(query, variables.clone(), Some(&token)).await?
            }
            Err(e) => return Err(e),
        };

        if response.has_error_code(ERROR_CODE_JWT_EXPIRED) {
            self.logger.warn("Token expired, refreshing...");
            self.tokens.clear().await;
            self.login().await?;
            let token = self
                .tokens
                .token()
                .await
                .ok_or_else(|| BridgeError::auth("No token available after login"))?;
            return self.client.execute(query, variables, Some(&token)).await;
        }

        Ok(response)
    }

    /// Planned dispatches for one device via the flex API. A not-found error
    /// means the device does not support flex dispatches and yields an empty
    /// list.
    async fn fetch_flex_planned_dispatches(&self, device_id: &str) -> Result<Vec<Value>> {
        let response = self
            .execute_authed(
                FLEX_PLANNED_DISPATCHES_QUERY,
                json!({ "deviceId": device_id }),
            )
            .await?;

        if response.has_errors() {
            if response.has_error_code(ERROR_CODE_NOT_FOUND) {
                self.logger.debug(&format!(
                    "Device {} does not support flex planned dispatches",
                    device_id
                ));
                return Ok(Vec::new());
            }
            return Err(BridgeError::api(response.error_summary()));
        }

        let dispatches = response
            .data
            .as_ref()
            .and_then(|d| d.get("flexPlannedDispatches"))
            .and_then(|d| d.as_array())
            .cloned()
            .unwrap_or_default();
        Ok(dispatches)
    }
}

#[async_trait]
impl UpstreamApi for OctopusApi {
    /// Perform the login exchange and store the obtained token.
    ///
    /// Retries with exponential backoff; the upstream rate-limits the token
    /// mutation aggressively. A previously stored token is left untouched on
    /// failure.
    async fn login(&self) -> Result<()> {
        // Serialize login attempts; another task may have refreshed already
        let _guard = self.login_lock.lock().await;
        if self.tokens.is_valid().await {
            self.logger.debug("Token still valid after lock, skipping login");
            return Ok(());
        }

        let variables = json!({ "email": self.email, "password": self.password });
        let mut delay = LOGIN_INITIAL_BACKOFF;
        let mut last_error = String::new();

        for attempt in 1..=LOGIN_MAX_ATTEMPTS {
            self.logger.debug(&format!(
                "Making login attempt {} of {}",
                attempt, LOGIN_MAX_ATTEMPTS
            ));

            match self
                .client
                .execute(LOGIN_MUTATION, variables.clone(), None)
                .await
            {
                Ok(response) if response.has_errors() => {
                    last_error = response.error_summary();
                    if response.has_error_code(ERROR_CODE_RATE_LIMITED) {
                        self.logger.warn(&format!(
                            "Rate limit hit. Retrying in {:?} (attempt {} of {})",
                            delay, attempt, LOGIN_MAX_ATTEMPTS
                        ));
                    } else {
                        self.logger.error(&format!(
                            "Login failed: {} (attempt {} of {})",
                            last_error, attempt, LOGIN_MAX_ATTEMPTS
                        ));
                    }
                }
                Ok(response) => {
                    let token_data = response
                        .data
                        .as_ref()
                        .and_then(|d| d.get("obtainKrakenToken"))
                        .cloned()
                        .unwrap_or_default();
                    let token = token_data.get("token").and_then(|t| t.as_str());

                    if let Some(token) = token {
                        let expiry = token_data
                            .get("payload")
                            .and_then(|p| p.get("exp"))
                            .and_then(|e| e.as_i64());
                        self.tokens.set_token(token.to_string(), expiry).await;
                        return Ok(());
                    }
                    last_error = "No token in response despite successful request".to_string();
                    self.logger.error(&format!(
                        "{} (attempt {} of {})",
                        last_error, attempt, LOGIN_MAX_ATTEMPTS
                    ));
                }
                Err(e) => {
                    last_error = e.to_string();
                    self.logger.error(&format!(
                        "Error during login attempt {}: {}",
                        attempt, e
                    ));
                }
            }

            if attempt < LOGIN_MAX_ATTEMPTS {
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(LOGIN_MAX_BACKOFF);
            }
        }

        Err(BridgeError::auth(format!(
            "All {} login attempts failed: {}",
            LOGIN_MAX_ATTEMPTS, last_error
        )))
    }

    async fn fetch_accounts(&self) -> Result<Vec<String>> {
        let response = self
            .execute_authed(ACCOUNT_DISCOVERY_QUERY, json!({}))
            .await?;

        if response.has_errors() {
            return Err(BridgeError::api(response.error_summary()));
        }

        let accounts = response
            .data
            .as_ref()
            .and_then(|d| d.get("viewer"))
            .and_then(|v| v.get("accounts"))
            .and_then(|a| a.as_array())
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|a| a.get("number").and_then(|n| n.as_str()))
                    .map(|n| n.to_string())
                    .collect()
            })
            .unwrap_or_default();
        Ok(accounts)
    }

    async fn fetch_account_data(&self, account_number: &str) -> Result<Value> {
        let response = self
            .execute_authed(
                ACCOUNT_DATA_QUERY,
                json!({ "accountNumber": account_number }),
            )
            .await?;

        let Some(data) = response.data.as_ref() else {
            if response.has_errors() {
                return Err(BridgeError::api(response.error_summary()));
            }
            return Err(BridgeError::api(
                "API response contains neither data nor errors",
            ));
        };

        if response.has_errors() {
            // Accounts without devices or dispatches produce partial errors;
            // everything else is worth surfacing in the log
            let (non_critical, critical): (Vec<_>, Vec<_>) = response.errors.iter().partition(|e| {
                e.error_code.as_deref() == Some(ERROR_CODE_NOT_FOUND)
                    && matches!(
                        e.path.first().map(|s| s.as_str()),
                        Some("devices") | Some("completedDispatches")
                    )
            });
            if !non_critical.is_empty() {
                self.logger.warn(&format!(
                    "API returned non-critical errors for account {}: {}",
                    account_number,
                    non_critical
                        .iter()
                        .map(|e| e.message.as_str())
                        .collect::<Vec<_>>()
                        .join("; ")
                ));
            }
            if !critical.is_empty() {
                self.logger.error(&format!(
                    "API returned critical errors for account {}: {}",
                    account_number,
                    critical
                        .iter()
                        .map(|e| e.message.as_str())
                        .collect::<Vec<_>>()
                        .join("; ")
                ));
            }
        }

        let mut result = json!({
            "account": data.get("account").filter(|a| !a.is_null()).cloned().unwrap_or(json!({})),
            "devices": data.get("devices").filter(|d| !d.is_null()).cloned().unwrap_or(json!([])),
            "completedDispatches": data.get("completedDispatches").filter(|d| !d.is_null()).cloned().unwrap_or(json!([])),
            "plannedDispatches": [],
        });

        // Planned dispatches come from the per-device flex API and are merged
        // into the aggregate payload under the legacy field names
        let device_ids: Vec<String> = result["devices"]
            .as_array()
            .map(|devices| {
                devices
                    .iter()
                    .filter_map(|d| d.get("id").and_then(|i| i.as_str()))
                    .map(|i| i.to_string())
                    .collect()
            })
            .unwrap_or_default();

        let mut planned = Vec::new();
        for device_id in device_ids {
            match self.fetch_flex_planned_dispatches(&device_id).await {
                Ok(dispatches) => {
                    for dispatch in dispatches {
                        planned.push(json!({
                            "start": dispatch.get("start").cloned().unwrap_or(Value::Null),
                            "end": dispatch.get("end").cloned().unwrap_or(Value::Null),
                            "deltaKwh": dispatch.get("energyAddedKwh").cloned().unwrap_or(Value::Null),
                            "meta": {
                                "source": "flex_api",
                                "type": dispatch.get("type").cloned().unwrap_or(json!("UNKNOWN")),
                                "deviceId": device_id,
                            },
                        }));
                    }
                }
                Err(e) => {
                    self.logger.warn(&format!(
                        "Failed to fetch flex planned dispatches for device {}: {}",
                        device_id, e
                    ));
                }
            }
        }
        result["plannedDispatches"] = Value::Array(planned);

        Ok(result)
    }

    async fn change_device_suspension(
        &self,
        device_id: &str,
        action: SuspensionAction,
    ) -> Result<()> {
        self.logger.debug(&format!(
            "Executing change_device_suspension: device_id={}, action={}",
            device_id,
            action.as_str()
        ));

        let response = self
            .execute_authed(
                SUSPENSION_MUTATION,
                json!({ "deviceId": device_id, "action": action.as_str() }),
            )
            .await?;

        if response.has_errors() {
            return Err(BridgeError::api(response.error_summary()));
        }

        let accepted = response
            .data
            .as_ref()
            .and_then(|d| d.get("updateDeviceSmartControl"))
            .is_some_and(|r| !r.is_null());
        if !accepted {
            return Err(BridgeError::api(
                "No result from updateDeviceSmartControl mutation",
            ));
        }
        Ok(())
    }

    async fn update_boost_charge(&self, device_id: &str, action: BoostAction) -> Result<()> {
        self.logger.debug(&format!(
            "Executing update_boost_charge: device_id={}, action={}",
            device_id,
            action.as_str()
        ));

        let response = self
            .execute_authed(
                BOOST_MUTATION,
                json!({ "input": { "deviceId": device_id, "action": action.as_str() } }),
            )
            .await?;

        if response.has_errors() {
            return Err(BridgeError::api(response.error_summary()));
        }

        let accepted = response
            .data
            .as_ref()
            .and_then(|d| d.get("updateBoostCharge"))
            .is_some_and(|r| !r.is_null());
        if !accepted {
            return Err(BridgeError::api("No result from updateBoostCharge mutation"));
        }
        Ok(())
    }
}
