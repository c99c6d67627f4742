//! Canonical data model for Octobridge
//!
//! These types form the stable internal schema produced by the normalizer
//! and consumed read-only by the presentation layer. One `AccountRecord`
//! exists per known account number; a refresh replaces the whole record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Canonical per-account record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccountRecord {
    /// Stable account identifier
    pub account_number: String,

    /// Electricity ledger balance in major currency units (EUR)
    pub electricity_balance: f64,

    /// All upstream ledgers, untouched (balances in minor units)
    pub ledgers: Vec<Ledger>,

    /// German market-location identifier
    pub malo_number: Option<String>,

    /// German metering-location identifier
    pub melo_number: Option<String>,

    /// Electricity meter, if one is attached
    pub meter: Option<Meter>,

    /// Property identifiers on the account
    pub property_ids: Vec<String>,

    /// Flexible devices registered on the account
    pub devices: Vec<DeviceRecord>,

    /// Tariff products; never empty once an account has been fetched
    pub products: Vec<ProductRecord>,

    /// Upcoming dispatch windows, sorted by start time
    pub planned_dispatches: Vec<DispatchWindow>,

    /// Past dispatch windows
    pub completed_dispatches: Vec<DispatchWindow>,

    /// Planned window covering "now" at normalization time
    pub current_window: Option<DispatchWindow>,

    /// First planned window starting after "now"
    pub next_window: Option<DispatchWindow>,

    /// Battery size of the first vehicle device exposing one
    pub vehicle_battery_size_kwh: Option<f64>,
}

/// An upstream balance ledger (minor currency units)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ledger {
    pub balance_minor: i64,
    pub number: Option<String>,
    pub ledger_type: String,
}

/// Electricity meter identifiers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Meter {
    pub id: String,
    pub meter_type: Option<String>,
    pub number: Option<String>,
    pub should_receive_smart_meter_data: Option<bool>,
}

/// A scheduled interval during which the provider may drive a flexible device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub delta_kwh: f64,
    pub source: Option<String>,
    pub location: Option<String>,
}

/// Device category reported by upstream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceType {
    ElectricVehicle,
    ChargePoint,
    Other(String),
}

impl DeviceType {
    /// Map the upstream device-type tag
    pub fn from_upstream(tag: &str) -> Self {
        match tag {
            "ELECTRIC_VEHICLES" => Self::ElectricVehicle,
            "CHARGE_POINTS" => Self::ChargePoint,
            other => Self::Other(other.to_string()),
        }
    }

    /// Whether this device category accepts boost-charge commands
    pub fn supports_boost(&self) -> bool {
        matches!(self, Self::ElectricVehicle | Self::ChargePoint)
    }
}

impl Default for DeviceType {
    fn default() -> Self {
        Self::Other(String::new())
    }
}

/// Upstream-reported device status
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceStatus {
    /// Lifecycle status, e.g. "LIVE"
    pub current: String,

    /// Free-form state string, e.g. "SMART_CONTROL_CAPABLE" or "BOOST_CHARGING"
    pub current_state: String,

    /// Whether smart control is suspended for this device
    pub is_suspended: bool,
}

impl DeviceStatus {
    /// Boost charging has no explicit flag upstream; it is signalled inside
    /// the state string
    pub fn boost_active(&self) -> bool {
        self.current_state.to_uppercase().contains("BOOST")
    }

    /// Whether the device can currently accept a boost-charge command
    pub fn boost_available(&self) -> bool {
        let state = self.current_state.to_uppercase();
        self.current == "LIVE"
            && !self.is_suspended
            && (state.contains("SMART_CONTROL_CAPABLE") || state.contains("BOOST"))
    }
}

/// A schedule rule inside device preferences
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleRule {
    pub day_of_week: Option<String>,
    pub time: Option<String>,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

/// Device charging preferences
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DevicePreferences {
    pub mode: Option<String>,
    pub unit: Option<String>,
    pub target_type: Option<String>,
    pub schedules: Vec<ScheduleRule>,
}

/// Vehicle details exposed by SmartFlex vehicle devices
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VehicleVariant {
    pub model: Option<String>,
    pub battery_size: Option<String>,
}

/// A flexible device registered on the account
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub id: String,
    pub device_type: DeviceType,
    pub name: String,
    pub provider: String,
    pub status: DeviceStatus,
    pub preferences: Option<DevicePreferences>,
    pub vehicle_variant: Option<VehicleVariant>,
}

/// Tariff shape, discriminated by the upstream unit-rate type tag
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Tariff {
    /// Single gross rate in cents/kWh, kept as the upstream decimal string
    Simple { gross_rate: String },

    /// Named timeslots, each with its own rate and active-time ranges
    TimeOfUse { timeslots: Vec<Timeslot> },
}

impl Default for Tariff {
    fn default() -> Self {
        Self::Simple {
            gross_rate: "0".to_string(),
        }
    }
}

/// One named time-of-use slot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Timeslot {
    pub name: String,
    pub rate: String,
    pub activation_rules: Vec<ActivationRule>,
}

/// Daily active-time range of a timeslot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivationRule {
    pub from_time: String,
    pub to_time: String,
}

/// A tariff product attached to an agreement
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProductRecord {
    pub code: String,
    pub description: String,
    pub name: String,
    pub valid_from: Option<String>,
    pub valid_to: Option<String>,
    pub tariff: Tariff,
}

/// Which writable control a pending command belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    Suspension,
    Boost,
}

/// Optimistic local state for an issued device command
#[derive(Debug, Clone, PartialEq)]
pub struct PendingCommand {
    pub device_id: String,
    pub kind: CommandKind,
    pub desired_state: bool,
    pub deadline: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_type_mapping() {
        assert_eq!(
            DeviceType::from_upstream("ELECTRIC_VEHICLES"),
            DeviceType::ElectricVehicle
        );
        assert_eq!(
            DeviceType::from_upstream("CHARGE_POINTS"),
            DeviceType::ChargePoint
        );
        assert_eq!(
            DeviceType::from_upstream("HEAT_PUMPS"),
            DeviceType::Other("HEAT_PUMPS".to_string())
        );
        assert!(DeviceType::ElectricVehicle.supports_boost());
        assert!(!DeviceType::Other("HEAT_PUMPS".into()).supports_boost());
    }

    #[test]
    fn boost_state_is_a_text_containment_check() {
        let status = DeviceStatus {
            current: "LIVE".to_string(),
            current_state: "boost_charging".to_string(),
            is_suspended: false,
        };
        assert!(status.boost_active());
        assert!(status.boost_available());

        let suspended = DeviceStatus {
            current: "LIVE".to_string(),
            current_state: "SMART_CONTROL_CAPABLE".to_string(),
            is_suspended: true,
        };
        assert!(!suspended.boost_active());
        assert!(!suspended.boost_available());
    }
}
