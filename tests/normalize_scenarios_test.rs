use chrono::{TimeZone, Utc};
use octobridge::model::{DeviceType, Tariff};
use octobridge::normalize::normalize;
use serde_json::json;

fn full_payload() -> serde_json::Value {
    json!({
        "account": {
            "id": "acc-1",
            "ledgers": [
                {"ledgerType": "ELECTRICITY_LEDGER", "balance": -4210, "number": "100"},
                {"ledgerType": "GAS_LEDGER", "balance": 500}
            ],
            "allProperties": [
                {
                    "id": "prop-1",
                    "electricityMalos": [
                        {
                            "maloNumber": "DE0001",
                            "meloNumber": "DE0002",
                            "meter": {
                                "id": "meter-1",
                                "meterType": "SMART_METER",
                                "number": "M-77",
                                "shouldReceiveSmartMeterData": true
                            },
                            "agreements": [
                                {
                                    "product": {
                                        "code": "OCTOPUS_GO",
                                        "fullName": "Octopus Go",
                                        "description": "EV night tariff"
                                    },
                                    "unitRateInformation": {
                                        "__typename": "SimpleProductUnitRateInformation",
                                        "latestGrossUnitRateCentsPerKwh": "28.42"
                                    },
                                    "validFrom": "2025-01-01T00:00:00Z",
                                    "validTo": null
                                }
                            ]
                        }
                    ]
                }
            ]
        },
        "devices": [
            {
                "id": "dev-1",
                "deviceType": "ELECTRIC_VEHICLES",
                "name": "My Car",
                "provider": "OHME",
                "status": {
                    "current": "LIVE",
                    "currentState": "SMART_CONTROL_CAPABLE",
                    "isSuspended": false
                },
                "preferences": {
                    "mode": "CHARGE",
                    "unit": "PERCENTAGE",
                    "targetType": "WEEKDAY",
                    "schedules": [
                        {"dayOfWeek": "MONDAY", "time": "07:00", "min": 20.0, "max": 80.0}
                    ]
                },
                "vehicleVariant": {"model": "Model 3", "batterySize": "57.5"}
            }
        ],
        "plannedDispatches": [
            {
                "start": "2025-06-01T22:00:00Z",
                "end": "2025-06-02T01:00:00Z",
                "deltaKwh": 12.4,
                "meta": {"source": "flex_api", "deviceId": "dev-1"}
            },
            {
                "start": "2025-06-02T03:00:00Z",
                "end": "2025-06-02T05:00:00Z",
                "deltaKwh": 6.0,
                "meta": {"source": "flex_api", "deviceId": "dev-1"}
            }
        ],
        "completedDispatches": [
            {
                "start": "2025-05-31T22:00:00Z",
                "end": "2025-06-01T01:00:00Z",
                "delta": "9.8",
                "meta": {"source": "smart-charge", "location": "AT_HOME"}
            }
        ]
    })
}

#[test]
fn full_payload_produces_complete_record() {
    let now = Utc.with_ymd_and_hms(2025, 6, 1, 23, 0, 0).unwrap();
    let record = normalize(&full_payload(), "A-B1C2D3E4", now);

    assert_eq!(record.account_number, "A-B1C2D3E4");
    assert!((record.electricity_balance - (-42.10)).abs() < 1e-9);
    assert_eq!(record.ledgers.len(), 2);
    assert_eq!(record.malo_number.as_deref(), Some("DE0001"));
    assert_eq!(record.melo_number.as_deref(), Some("DE0002"));
    assert_eq!(record.property_ids, vec!["prop-1".to_string()]);

    let meter = record.meter.as_ref().unwrap();
    assert_eq!(meter.id, "meter-1");
    assert_eq!(meter.should_receive_smart_meter_data, Some(true));

    assert_eq!(record.devices.len(), 1);
    let device = &record.devices[0];
    assert_eq!(device.device_type, DeviceType::ElectricVehicle);
    assert_eq!(device.provider, "OHME");
    assert!(device.status.boost_available());
    let prefs = device.preferences.as_ref().unwrap();
    assert_eq!(prefs.schedules.len(), 1);
    assert_eq!(prefs.schedules[0].max, Some(80.0));
    assert_eq!(record.vehicle_battery_size_kwh, Some(57.5));

    assert_eq!(record.products.len(), 1);
    assert_eq!(record.products[0].code, "OCTOPUS_GO");
    assert_eq!(
        record.products[0].tariff,
        Tariff::Simple {
            gross_rate: "28.42".to_string()
        }
    );

    // 23:00 falls inside the first planned window
    let current = record.current_window.as_ref().unwrap();
    assert_eq!(
        current.start,
        Utc.with_ymd_and_hms(2025, 6, 1, 22, 0, 0).unwrap()
    );
    let next = record.next_window.as_ref().unwrap();
    assert_eq!(
        next.start,
        Utc.with_ymd_and_hms(2025, 6, 2, 3, 0, 0).unwrap()
    );

    // Completed dispatch falls back to the string "delta" field
    assert_eq!(record.completed_dispatches.len(), 1);
    assert!((record.completed_dispatches[0].delta_kwh - 9.8).abs() < 1e-9);
    assert_eq!(
        record.completed_dispatches[0].location.as_deref(),
        Some("AT_HOME")
    );
}

#[test]
fn empty_payload_is_safe_and_non_empty_products() {
    let now = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
    let record = normalize(&json!({}), "A-1", now);

    assert_eq!(record.electricity_balance, 0.0);
    assert!(record.devices.is_empty());
    assert!(record.planned_dispatches.is_empty());
    assert!(record.current_window.is_none());
    assert!(record.next_window.is_none());
    assert_eq!(record.products.len(), 1);
    assert_eq!(record.products[0].code, "UNKNOWN");
}

#[test]
fn dispatch_between_windows_selects_only_next() {
    let now = Utc.with_ymd_and_hms(2025, 6, 2, 2, 0, 0).unwrap();
    let record = normalize(&full_payload(), "A-1", now);
    assert!(record.current_window.is_none());
    assert_eq!(
        record.next_window.as_ref().unwrap().start,
        Utc.with_ymd_and_hms(2025, 6, 2, 3, 0, 0).unwrap()
    );
}

#[test]
fn second_metering_point_fills_missing_identifiers() {
    // First malo lacks a melo number; the scan keeps looking per field
    let raw = json!({
        "account": {
            "allProperties": [
                {"id": "p1", "electricityMalos": [{"maloNumber": "DE1"}]},
                {"id": "p2", "electricityMalos": [{"maloNumber": "DE2", "meloNumber": "ME2"}]}
            ]
        }
    });
    let now = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
    let record = normalize(&raw, "A-1", now);
    assert_eq!(record.malo_number.as_deref(), Some("DE1"));
    assert_eq!(record.melo_number.as_deref(), Some("ME2"));
}
