use crate::domain::channel::{ButtonEvent, ChannelValue, ConnectivityStatus, SensitivityLevel, UpdateState, id};
use crate::domain::color::{Xy, xy_to_rgb};
use crate::domain::resource::{ChannelKey, ResourceKey, ResourceType};
use crate::engine::builder::Model;
use chrono::DateTime;
use serde_json::Value;

/// Temperatures with a magnitude above this are centi-degrees on the wire.
const CENTI_DEGREE_THRESHOLD: f64 = 200.0;

/// A semantic item extracted from a resource, either a snapshot entry during
/// seeding or a push fragment at event time. Button and rotation items are
/// routed through the interaction state machines instead of being emitted
/// directly.
#[derive(PartialEq, Clone, Debug)]
pub enum StreamItem {
    Value {
        key: ChannelKey,
        value: ChannelValue,
        timestamp_ms: i64,
    },
    Button {
        key: ChannelKey,
        event: ButtonEvent,
        timestamp_ms: i64,
    },
    Rotation {
        key: ChannelKey,
        steps: i64,
        timestamp_ms: i64,
    },
}

/// Extracts channel items from one resource of the given type. Resources
/// whose owner is not part of the current model yield nothing; the caller
/// handles those through a resync.
pub fn extract_items(rtype: ResourceType, resource: &Value, model: &Model, now_ms: i64) -> Vec<StreamItem> {
    let Some(resource_id) = resource["id"].as_str() else {
        return Vec::new();
    };
    let Some(device_id) = model.resource_owner.get(&ResourceKey::new(rtype, resource_id)) else {
        return Vec::new();
    };

    let mut items = Vec::new();
    let key = |channel: &str| ChannelKey::new(device_id.clone(), channel);

    match rtype {
        ResourceType::Light => extract_light(resource, &key, now_ms, &mut items),
        ResourceType::Motion => {
            let report = &resource["motion"]["motion_report"];
            let motion = report["motion"].as_bool().or_else(|| resource["motion"]["motion"].as_bool());
            if let Some(motion) = motion {
                items.push(StreamItem::Value {
                    key: key(id::MOTION),
                    value: ChannelValue::Bool(motion),
                    timestamp_ms: report_timestamp(report, now_ms),
                });
            }
            if let Some(raw) = resource["sensitivity"]["sensitivity"].as_i64() {
                items.push(StreamItem::Value {
                    key: key(id::MOTION_SENSITIVITY),
                    value: ChannelValue::Enum(SensitivityLevel::from_raw(raw).code()),
                    timestamp_ms: now_ms,
                });
            }
        }
        ResourceType::Tamper => {
            if let Some(tampered) = tamper_state(resource) {
                items.push(StreamItem::Value {
                    key: key(id::TAMPER),
                    value: ChannelValue::Bool(tampered),
                    timestamp_ms: now_ms,
                });
            }
        }
        ResourceType::Temperature => {
            let report = &resource["temperature"]["temperature_report"];
            let raw = report["temperature"]
                .as_f64()
                .or_else(|| resource["temperature"]["temperature"].as_f64());
            if let Some(raw) = raw {
                let celsius = if raw.abs() > CENTI_DEGREE_THRESHOLD { raw / 100.0 } else { raw };
                items.push(StreamItem::Value {
                    key: key(id::TEMPERATURE),
                    value: ChannelValue::Float(celsius),
                    timestamp_ms: report_timestamp(report, now_ms),
                });
            }
        }
        ResourceType::LightLevel => {
            let report = &resource["light"]["light_level_report"];
            let level = report["light_level"].as_f64().or_else(|| resource["light"]["light_level"].as_f64());
            if let Some(level) = level {
                let lux = 10f64.powf((level - 1.0) / 10_000.0);
                items.push(StreamItem::Value {
                    key: key(id::ILLUMINANCE),
                    value: ChannelValue::Int(lux.round() as i64),
                    timestamp_ms: report_timestamp(report, now_ms),
                });
            }
        }
        ResourceType::DevicePower => {
            // Negative levels mean the device has no usable battery gauge
            if let Some(level) = resource["power_state"]["battery_level"].as_i64()
                && level >= 0
            {
                items.push(StreamItem::Value {
                    key: key(id::BATTERY),
                    value: ChannelValue::Int(level.min(100)),
                    timestamp_ms: now_ms,
                });
            }
        }
        ResourceType::ZigbeeConnectivity => {
            if let Some(status) = resource["status"].as_str().filter(|s| !s.trim().is_empty()) {
                items.push(StreamItem::Value {
                    key: key(id::ZIGBEE_STATUS),
                    value: ChannelValue::Enum(ConnectivityStatus::parse(status).code()),
                    timestamp_ms: now_ms,
                });
            }
        }
        ResourceType::DeviceSoftwareUpdate => {
            let state = resource["state"].as_str().or_else(|| resource["status"].as_str());
            if let Some(state) = state {
                items.push(StreamItem::Value {
                    key: key(id::DEVICE_SOFTWARE_UPDATE),
                    value: ChannelValue::Enum(UpdateState::parse(state).code()),
                    timestamp_ms: now_ms,
                });
            }
        }
        ResourceType::Button => {
            let channel = model.button_channel.get(resource_id).map(|c| c.as_str()).unwrap_or(id::BUTTON);
            let button = &resource["button"];
            // Live events sometimes only carry button_report.event
            let event = button["last_event"]
                .as_str()
                .or_else(|| button["button_report"]["event"].as_str())
                .and_then(ButtonEvent::parse);
            if let Some(event) = event {
                items.push(StreamItem::Button {
                    key: key(channel),
                    event,
                    timestamp_ms: report_timestamp(&button["button_report"], now_ms),
                });
            }
        }
        ResourceType::RelativeRotary => {
            if let Some((steps, timestamp_ms)) = rotation(resource, now_ms) {
                items.push(StreamItem::Rotation {
                    key: key(id::DIAL),
                    steps,
                    timestamp_ms,
                });
            }
        }
        _ => {}
    }

    items
}

fn extract_light(resource: &Value, key: &dyn Fn(&str) -> ChannelKey, now_ms: i64, items: &mut Vec<StreamItem>) {
    if let Some(on) = resource["on"]["on"].as_bool() {
        items.push(StreamItem::Value {
            key: key(id::ON),
            value: ChannelValue::Bool(on),
            timestamp_ms: now_ms,
        });
    }

    let brightness = resource["dimming"]["brightness"].as_f64();
    if let Some(percent) = brightness {
        items.push(StreamItem::Value {
            key: key(id::BRIGHTNESS),
            value: ChannelValue::Float(percent.clamp(0.0, 100.0)),
            timestamp_ms: now_ms,
        });
    }

    if let Some(mirek) = resource["color_temperature"]["mirek"].as_i64() {
        items.push(StreamItem::Value {
            key: key(id::COLOR_TEMPERATURE),
            value: ChannelValue::Int(mirek),
            timestamp_ms: now_ms,
        });
    }

    let xy = &resource["color"]["xy"];
    if let (Some(x), Some(y)) = (xy["x"].as_f64(), xy["y"].as_f64()) {
        // Luminance recovered from brightness when present, mid-range otherwise
        let luminance = brightness.map(|percent| percent / 100.0).unwrap_or(0.5);
        let (r, g, b) = xy_to_rgb(&Xy::new(x, y), luminance);
        items.push(StreamItem::Value {
            key: key(id::COLOR),
            value: ChannelValue::Rgb(r, g, b),
            timestamp_ms: now_ms,
        });
    }
}

fn tamper_state(resource: &Value) -> Option<bool> {
    if let Some(reports) = resource["tamper_reports"].as_array() {
        if reports.is_empty() {
            return None;
        }
        return Some(reports.iter().any(|report| report["state"] == "tampered"));
    }
    resource["tamper_report"]["state"].as_str().map(|state| state == "tampered")
}

fn rotation(resource: &Value, now_ms: i64) -> Option<(i64, i64)> {
    let report = if resource["relative_rotary"].is_object() {
        &resource["relative_rotary"]["rotary_report"]
    } else {
        &resource["rotary_report"]
    };
    let rotation = &report["rotation"];
    let steps = rotation["steps"].as_i64()?;
    let steps = match rotation["direction"].as_str() {
        Some("clock_wise") => steps,
        Some("counter_clock_wise") => -steps,
        _ => return None,
    };
    Some((steps, report_timestamp(report, now_ms)))
}

/// Report blocks carry their own ISO-8601 timestamp under `changed` or
/// `updated`; fall back to the arrival time.
fn report_timestamp(report: &Value, now_ms: i64) -> i64 {
    for field in ["changed", "updated"] {
        if let Some(text) = report[field].as_str()
            && let Ok(parsed) = DateTime::parse_from_rfc3339(text)
        {
            return parsed.timestamp_millis();
        }
    }
    now_ms
}
