//! Payload normalization into canonical account records
//!
//! `normalize` is a pure function from the raw aggregate payload to an
//! `AccountRecord`. Every upstream sub-object may be missing or explicitly
//! null; each absence maps to an empty or default value, never to an error.
//! The caller injects "now" so window derivation stays deterministic.

use crate::model::{
    AccountRecord, ActivationRule, DevicePreferences, DeviceRecord, DeviceStatus, DeviceType,
    DispatchWindow, Ledger, Meter, ProductRecord, ScheduleRule, Tariff, Timeslot, VehicleVariant,
};
use chrono::{DateTime, Utc};
use serde_json::Value;

const ELECTRICITY_LEDGER: &str = "ELECTRICITY_LEDGER";

/// Build the canonical record for one account from the raw aggregate payload.
pub fn normalize(raw: &Value, account_number: &str, now: DateTime<Utc>) -> AccountRecord {
    let logger = crate::logging::get_logger_with_context(
        crate::logging::LogContext::new("normalize")
            .with_account_number(account_number.to_string()),
    );

    let account = raw.get("account").filter(|a| !a.is_null());
    let empty = Value::Object(serde_json::Map::new());
    let account = account.unwrap_or(&empty);

    let ledgers = extract_ledgers(account);
    let electricity_balance = ledgers
        .iter()
        .find(|l| l.ledger_type == ELECTRICITY_LEDGER)
        .map(|l| l.balance_minor as f64 / 100.0)
        .unwrap_or(0.0);

    let properties = account
        .get("allProperties")
        .and_then(|p| p.as_array())
        .cloned()
        .unwrap_or_default();

    // First non-empty value wins across properties and metering points
    let malo_number = first_malo_field(&properties, "maloNumber");
    let melo_number = first_malo_field(&properties, "meloNumber");
    let meter = first_meter(&properties);

    let property_ids = properties
        .iter()
        .filter_map(|p| p.get("id"))
        .filter_map(value_as_string)
        .collect();

    let devices = extract_devices(raw);
    let vehicle_battery_size_kwh = devices.iter().find_map(|d| {
        d.vehicle_variant
            .as_ref()
            .and_then(|v| v.battery_size.as_deref())
            .and_then(|size| size.parse::<f64>().ok())
    });

    let planned_dispatches = extract_dispatches(raw, "plannedDispatches", &logger);
    let completed_dispatches = extract_dispatches(raw, "completedDispatches", &logger);

    let (current_window, next_window) = select_windows(&planned_dispatches, now);

    let mut products = extract_products(&properties);
    if products.is_empty() {
        logger.warn("No products found, synthesizing placeholder entry");
        products.push(placeholder_product());
    }

    AccountRecord {
        account_number: account_number.to_string(),
        electricity_balance,
        ledgers,
        malo_number,
        melo_number,
        meter,
        property_ids,
        devices,
        products,
        planned_dispatches,
        completed_dispatches,
        current_window,
        next_window,
        vehicle_battery_size_kwh,
    }
}

fn value_as_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn extract_ledgers(account: &Value) -> Vec<Ledger> {
    account
        .get("ledgers")
        .and_then(|l| l.as_array())
        .map(|entries| {
            entries
                .iter()
                .filter_map(|entry| {
                    let ledger_type = entry.get("ledgerType").and_then(|t| t.as_str())?;
                    Some(Ledger {
                        balance_minor: entry.get("balance").and_then(|b| b.as_i64()).unwrap_or(0),
                        number: entry.get("number").and_then(value_as_string),
                        ledger_type: ledger_type.to_string(),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

fn first_malo_field(properties: &[Value], field: &str) -> Option<String> {
    properties
        .iter()
        .flat_map(|p| {
            p.get("electricityMalos")
                .and_then(|m| m.as_array())
                .into_iter()
                .flatten()
        })
        .find_map(|malo| {
            malo.get(field)
                .and_then(value_as_string)
                .filter(|v| !v.is_empty())
        })
}

fn first_meter(properties: &[Value]) -> Option<Meter> {
    properties
        .iter()
        .flat_map(|p| {
            p.get("electricityMalos")
                .and_then(|m| m.as_array())
                .into_iter()
                .flatten()
        })
        .find_map(|malo| {
            let meter = malo.get("meter").filter(|m| !m.is_null())?;
            Some(Meter {
                id: meter.get("id").and_then(value_as_string).unwrap_or_default(),
                meter_type: meter.get("meterType").and_then(value_as_string),
                number: meter.get("number").and_then(value_as_string),
                should_receive_smart_meter_data: meter
                    .get("shouldReceiveSmartMeterData")
                    .and_then(|v| v.as_bool()),
            })
        })
}

fn extract_devices(raw: &Value) -> Vec<DeviceRecord> {
    raw.get("devices")
        .and_then(|d| d.as_array())
        .map(|entries| entries.iter().filter_map(parse_device).collect())
        .unwrap_or_default()
}

fn parse_device(entry: &Value) -> Option<DeviceRecord> {
    let id = entry.get("id").and_then(value_as_string)?;
    let status = entry.get("status").filter(|s| !s.is_null());
    Some(DeviceRecord {
        id,
        device_type: entry
            .get("deviceType")
            .and_then(|t| t.as_str())
            .map(DeviceType::from_upstream)
            .unwrap_or_default(),
        name: entry
            .get("name")
            .and_then(value_as_string)
            .unwrap_or_else(|| "Unknown".to_string()),
        provider: entry
            .get("provider")
            .and_then(value_as_string)
            .unwrap_or_default(),
        status: DeviceStatus {
            current: status
                .and_then(|s| s.get("current"))
                .and_then(value_as_string)
                .unwrap_or_default(),
            current_state: status
                .and_then(|s| s.get("currentState"))
                .and_then(value_as_string)
                .unwrap_or_default(),
            is_suspended: status
                .and_then(|s| s.get("isSuspended"))
                .and_then(|v| v.as_bool())
                .unwrap_or(false),
        },
        preferences: entry
            .get("preferences")
            .filter(|p| !p.is_null())
            .map(parse_preferences),
        vehicle_variant: entry
            .get("vehicleVariant")
            .filter(|v| !v.is_null())
            .map(|v| VehicleVariant {
                model: v.get("model").and_then(value_as_string),
                battery_size: v.get("batterySize").and_then(value_as_string),
            }),
    })
}

fn parse_preferences(prefs: &Value) -> DevicePreferences {
    DevicePreferences {
        mode: prefs.get("mode").and_then(value_as_string),
        unit: prefs.get("unit").and_then(value_as_string),
        target_type: prefs.get("targetType").and_then(value_as_string),
        schedules: prefs
            .get("schedules")
            .and_then(|s| s.as_array())
            .map(|rules| {
                rules
                    .iter()
                    .map(|rule| ScheduleRule {
                        day_of_week: rule.get("dayOfWeek").and_then(value_as_string),
                        time: rule.get("time").and_then(value_as_string),
                        min: rule.get("min").and_then(|v| v.as_f64()),
                        max: rule.get("max").and_then(|v| v.as_f64()),
                    })
                    .collect()
            })
            .unwrap_or_default(),
    }
}

/// Parse a dispatch list. Entries missing or failing to parse start/end are
/// skipped and logged; they never abort the remaining entries.
fn extract_dispatches(
    raw: &Value,
    field: &str,
    logger: &crate::logging::StructuredLogger,
) -> Vec<DispatchWindow> {
    let entries = raw
        .get(field)
        .and_then(|d| d.as_array())
        .cloned()
        .unwrap_or_default();

    let mut windows: Vec<DispatchWindow> = entries
        .iter()
        .filter_map(|entry| match parse_dispatch(entry) {
            Some(window) if window.start <= window.end => Some(window),
            Some(_) => {
                logger.warn(&format!(
                    "Dropping {} entry with start after end: {}",
                    field, entry
                ));
                None
            }
            None => {
                logger.warn(&format!("Skipping malformed {} entry: {}", field, entry));
                None
            }
        })
        .collect();
    windows.sort_by_key(|w| w.start);
    windows
}

fn parse_dispatch(entry: &Value) -> Option<DispatchWindow> {
    let start = entry.get("start").and_then(|s| s.as_str())?;
    let end = entry.get("end").and_then(|e| e.as_str())?;
    let start = DateTime::parse_from_rfc3339(start).ok()?.with_timezone(&Utc);
    let end = DateTime::parse_from_rfc3339(end).ok()?.with_timezone(&Utc);
    let meta = entry.get("meta").filter(|m| !m.is_null());
    Some(DispatchWindow {
        start,
        end,
        delta_kwh: entry
            .get("deltaKwh")
            .or_else(|| entry.get("delta"))
            .and_then(parse_f64)
            .unwrap_or(0.0),
        source: meta
            .and_then(|m| m.get("source"))
            .and_then(value_as_string),
        location: meta
            .and_then(|m| m.get("location"))
            .and_then(value_as_string),
    })
}

fn parse_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Current window covers "now"; next window is the first starting after
/// "now". Planned dispatches arrive pre-sorted from `extract_dispatches`.
fn select_windows(
    planned: &[DispatchWindow],
    now: DateTime<Utc>,
) -> (Option<DispatchWindow>, Option<DispatchWindow>) {
    let mut current = None;
    let mut next = None;
    for window in planned {
        if current.is_none() && window.start <= now && now <= window.end {
            current = Some(window.clone());
        } else if next.is_none() && now < window.start {
            next = Some(window.clone());
        }
    }
    (current, next)
}

/// Gross-rate extraction strategies for simple tariffs, tried in priority
/// order. The order encodes observed upstream inconsistencies and must not
/// be reshuffled.
fn simple_gross_rate(agreement: &Value, unit_rate_info: &Value) -> Option<String> {
    let strategies: [fn(&Value, &Value) -> Option<String>; 3] = [
        |_, info| gross_rate_from(info.get("grossRateInformation")?),
        |_, info| {
            info.get("latestGrossUnitRateCentsPerKwh")
                .and_then(value_as_string)
        },
        |agreement, _| gross_rate_from(agreement.get("unitRateGrossRateInformation")?),
    ];
    strategies
        .iter()
        .find_map(|strategy| strategy(agreement, unit_rate_info))
}

/// `grossRateInformation` appears both as an object and as a list of objects
fn gross_rate_from(info: &Value) -> Option<String> {
    match info {
        Value::Object(_) => info.get("grossRate").and_then(value_as_string),
        Value::Array(entries) => entries.first()?.get("grossRate").and_then(value_as_string),
        _ => None,
    }
}

fn extract_products(properties: &[Value]) -> Vec<ProductRecord> {
    let mut products = Vec::new();
    for property in properties {
        let malos = property
            .get("electricityMalos")
            .and_then(|m| m.as_array())
            .cloned()
            .unwrap_or_default();
        for malo in &malos {
            let agreements = malo
                .get("agreements")
                .and_then(|a| a.as_array())
                .cloned()
                .unwrap_or_default();
            for agreement in &agreements {
                if let Some(product) = parse_agreement(agreement) {
                    products.push(product);
                }
            }
        }
    }
    products
}

fn parse_agreement(agreement: &Value) -> Option<ProductRecord> {
    let product = agreement.get("product").filter(|p| !p.is_null())?;
    let unit_rate_info = agreement
        .get("unitRateInformation")
        .filter(|u| !u.is_null())
        .cloned()
        .unwrap_or(Value::Object(serde_json::Map::new()));

    let is_time_of_use = unit_rate_info
        .get("__typename")
        .and_then(|t| t.as_str())
        .is_some_and(|t| t != "SimpleProductUnitRateInformation");

    let tariff = if is_time_of_use {
        Tariff::TimeOfUse {
            timeslots: unit_rate_info
                .get("rates")
                .and_then(|r| r.as_array())
                .map(|rates| rates.iter().map(parse_timeslot).collect())
                .unwrap_or_default(),
        }
    } else {
        Tariff::Simple {
            gross_rate: simple_gross_rate(agreement, &unit_rate_info)
                .unwrap_or_else(|| "0".to_string()),
        }
    };

    Some(ProductRecord {
        code: product
            .get("code")
            .and_then(value_as_string)
            .unwrap_or_else(|| "Unknown".to_string()),
        description: product
            .get("description")
            .and_then(value_as_string)
            .unwrap_or_default(),
        name: product
            .get("fullName")
            .and_then(value_as_string)
            .unwrap_or_else(|| "Unknown".to_string()),
        valid_from: agreement.get("validFrom").and_then(value_as_string),
        valid_to: agreement.get("validTo").and_then(value_as_string),
        tariff,
    })
}

fn parse_timeslot(rate: &Value) -> Timeslot {
    // Per-rate gross extraction mirrors the simple shape minus the
    // agreement-level fallback
    let gross_rate = rate
        .get("grossRateInformation")
        .and_then(gross_rate_from)
        .or_else(|| {
            rate.get("latestGrossUnitRateCentsPerKwh")
                .and_then(value_as_string)
        })
        .unwrap_or_else(|| "0".to_string());

    Timeslot {
        name: rate
            .get("timeslotName")
            .and_then(value_as_string)
            .unwrap_or_else(|| "Unknown".to_string()),
        rate: gross_rate,
        activation_rules: rate
            .get("timeslotActivationRules")
            .and_then(|r| r.as_array())
            .map(|rules| {
                rules
                    .iter()
                    .map(|rule| ActivationRule {
                        from_time: rule
                            .get("activeFromTime")
                            .and_then(value_as_string)
                            .unwrap_or_else(|| "00:00:00".to_string()),
                        to_time: rule
                            .get("activeToTime")
                            .and_then(value_as_string)
                            .unwrap_or_else(|| "00:00:00".to_string()),
                    })
                    .collect()
            })
            .unwrap_or_default(),
    }
}

/// Placeholder entry emitted when an account exposes no tariff products,
/// keeping the "at least one product" invariant for consumers
fn placeholder_product() -> ProductRecord {
    ProductRecord {
        code: "UNKNOWN".to_string(),
        description: "No tariff data available".to_string(),
        name: "Unknown tariff".to_string(),
        valid_from: None,
        valid_to: None,
        tariff: Tariff::default(),
    }
}
