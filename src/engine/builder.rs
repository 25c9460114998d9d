use crate::domain::channel::{
    BUTTON_EVENT_LABELS, CONNECTIVITY_LABELS, Channel, ChannelDataType, ChannelKind, SENSITIVITY_LABELS, UPDATE_STATE_LABELS, id,
};
use crate::domain::color::{Gamut, Xy};
use crate::domain::device::{Device, DeviceClass, Effect, EffectKind, beautify_effect_label};
use crate::domain::group::{Room, Scene, SceneState, Zone};
use crate::domain::resource::{ChannelKey, ResourceKey, ResourceType};
use crate::engine::resolver::{Resolution, resolve_owner};
use crate::engine::store::ResourceStore;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Capability types that contribute channels to a device.
pub const CAPABILITY_TYPES: [ResourceType; 9] = [
    ResourceType::Light,
    ResourceType::Motion,
    ResourceType::Tamper,
    ResourceType::Temperature,
    ResourceType::LightLevel,
    ResourceType::DevicePower,
    ResourceType::Button,
    ResourceType::DeviceSoftwareUpdate,
    ResourceType::ZigbeeConnectivity,
];

/// The canonical model derived from one consistent view of the store. All
/// lookups the reactor needs at event time are precomputed here.
#[derive(Debug, Default)]
pub struct Model {
    /// Only devices that ended up with at least one channel.
    pub devices: HashMap<String, Device>,
    pub rooms: HashMap<String, Room>,
    pub zones: HashMap<String, Zone>,
    pub scenes: Vec<Scene>,
    /// Writable channel -> the light resource its writes target.
    pub bindings: HashMap<ChannelKey, ResourceKey>,
    /// Capability resource -> owning device.
    pub resource_owner: HashMap<ResourceKey, String>,
    /// Device -> its first light resource, used for effect invocation.
    pub primary_light: HashMap<String, String>,
    /// Button resource -> the channel id it feeds (`button` or `buttonN`).
    pub button_channel: HashMap<String, String>,
    /// Light resource id -> gamut for color clamping.
    pub gamuts: HashMap<String, Gamut>,
}

#[derive(Debug)]
pub enum BuildOutcome {
    Complete(Box<Model>),
    /// Owner devices referenced by capability resources but absent from the
    /// device slot. The build is atomic: the caller fetches these and retries
    /// instead of emitting a partial generation.
    MissingOwners(Vec<String>),
}

pub fn build(store: &ResourceStore, failed_devices: &HashSet<String>) -> BuildOutcome {
    let device_index: HashMap<&str, &Value> = store
        .resources(ResourceType::Device)
        .iter()
        .filter_map(|resource| resource["id"].as_str().map(|device_id| (device_id, resource)))
        .collect();

    // Group capability resources per owning device and spot unfetched owners
    let mut capabilities: HashMap<String, Vec<(ResourceType, &Value)>> = HashMap::new();
    let mut missing: Vec<String> = Vec::new();
    let mut seen_missing: HashSet<String> = HashSet::new();
    for rtype in CAPABILITY_TYPES {
        for resource in store.resources(rtype) {
            let Resolution::Device(device_id) = resolve_owner(store, resource) else {
                continue;
            };
            if !device_index.contains_key(device_id.as_str()) {
                if !failed_devices.contains(&device_id) && seen_missing.insert(device_id.clone()) {
                    missing.push(device_id);
                }
                continue;
            }
            capabilities.entry(device_id).or_default().push((rtype, resource));
        }
    }

    if !missing.is_empty() {
        debug!("Model build needs {} unfetched owner device(s)", missing.len());
        return BuildOutcome::MissingOwners(missing);
    }

    let mut model = Model::default();

    for (device_id, resources) in capabilities {
        let meta = device_index[device_id.as_str()];
        let device = build_device(&mut model, &device_id, meta, &resources);
        if !device.channels.is_empty() {
            model.devices.insert(device_id, device);
        }
    }

    build_rooms(&mut model, store);
    build_zones(&mut model, store);
    model.scenes = build_scenes(store);

    BuildOutcome::Complete(Box::new(model))
}

fn build_device(model: &mut Model, device_id: &str, meta: &Value, resources: &[(ResourceType, &Value)]) -> Device {
    let product = &meta["product_data"];
    let mut device = Device {
        id: device_id.to_string(),
        name: device_name(meta, resources),
        class: classify(meta),
        manufacturer: string_or_empty(&product["manufacturer_name"]),
        model_id: string_or_empty(&product["model_id"]),
        product_name: string_or_empty(&product["product_name"]),
        software_version: string_or_empty(&product["software_version"]),
        has_battery: false,
        channels: Vec::new(),
        effects: Vec::new(),
        meta: merge_vendor_meta(meta, resources),
    };

    let button_count = resources.iter().filter(|(rtype, _)| *rtype == ResourceType::Button).count();

    for (rtype, resource) in resources {
        let Some(resource_id) = resource["id"].as_str() else {
            continue;
        };
        model
            .resource_owner
            .insert(ResourceKey::new(*rtype, resource_id), device_id.to_string());

        match rtype {
            ResourceType::Light => add_light_channels(model, &mut device, resource_id, resource),
            ResourceType::Motion => add_motion_channels(&mut device, resource),
            ResourceType::Tamper => {
                add_channel_once(&mut device, Channel::readable(id::TAMPER, "Tamper", ChannelKind::Tamper, ChannelDataType::Bool));
            }
            ResourceType::Temperature => {
                add_channel_once(&mut device, Channel::readable(id::TEMPERATURE, "Temperature", ChannelKind::Temperature, ChannelDataType::Float));
            }
            ResourceType::LightLevel => {
                add_channel_once(&mut device, Channel::readable(id::ILLUMINANCE, "Illuminance", ChannelKind::Illuminance, ChannelDataType::Int));
            }
            ResourceType::DevicePower => {
                // A negative level means the device reports no usable battery
                let battery_level = resource["power_state"]["battery_level"].as_i64().unwrap_or(-1);
                if battery_level >= 0 {
                    device.has_battery = true;
                    add_channel_once(
                        &mut device,
                        Channel::readable(id::BATTERY, "Battery", ChannelKind::Battery, ChannelDataType::Int).with_range(0.0, 100.0, 1.0),
                    );
                }
            }
            ResourceType::Button => add_button_channel(model, &mut device, resource_id, resource, button_count),
            ResourceType::DeviceSoftwareUpdate => {
                add_channel_once(
                    &mut device,
                    Channel::readable(id::DEVICE_SOFTWARE_UPDATE, "Firmware update", ChannelKind::DeviceSoftwareUpdate, ChannelDataType::Enum)
                        .with_labels(&UPDATE_STATE_LABELS),
                );
            }
            ResourceType::ZigbeeConnectivity => {
                add_channel_once(
                    &mut device,
                    Channel::readable(id::ZIGBEE_STATUS, "Connectivity", ChannelKind::ConnectivityStatus, ChannelDataType::Enum).with_labels(&CONNECTIVITY_LABELS),
                );
            }
            _ => {}
        }
    }

    // Rotary dials are not a snapshot type; they surface as service refs
    for service in meta["services"].as_array().map(|a| a.as_slice()).unwrap_or(&[]) {
        if service["rtype"] == "relative_rotary"
            && let Some(rotary_id) = service["rid"].as_str()
        {
            model
                .resource_owner
                .insert(ResourceKey::new(ResourceType::RelativeRotary, rotary_id), device_id.to_string());
            add_channel_once(&mut device, Channel::readable(id::DIAL, "Dial", ChannelKind::RelativeRotation, ChannelDataType::Int));
        }
    }

    if device.class == DeviceClass::Unknown {
        device.class = default_class(&device);
    }

    device
}

fn add_light_channels(model: &mut Model, device: &mut Device, light_id: &str, resource: &Value) {
    let light_key = ResourceKey::new(ResourceType::Light, light_id);
    model.primary_light.entry(device.id.clone()).or_insert_with(|| light_id.to_string());

    let device_id = device.id.clone();
    let bind = |model: &mut Model, channel_id: &str| {
        model
            .bindings
            .insert(ChannelKey::new(device_id.clone(), channel_id), light_key.clone());
    };

    if !resource["on"].is_null() {
        add_channel_once(device, Channel::writable(id::ON, "On", ChannelKind::Power, ChannelDataType::Bool));
        bind(model, id::ON);
    }

    if resource["dimming"].is_object() {
        let min = resource["dimming"]["min_dim_level"].as_f64().unwrap_or(0.0);
        add_channel_once(
            device,
            Channel::writable(id::BRIGHTNESS, "Brightness", ChannelKind::Brightness, ChannelDataType::Float).with_range(min, 100.0, 0.1),
        );
        bind(model, id::BRIGHTNESS);
    }

    if resource["color_temperature"].is_object() {
        let schema = &resource["color_temperature"]["mirek_schema"];
        let ct_min = schema["mirek_minimum"].as_f64().unwrap_or(153.0);
        let ct_max = schema["mirek_maximum"].as_f64().unwrap_or(500.0);
        add_channel_once(
            device,
            Channel::writable(id::COLOR_TEMPERATURE, "Color temperature", ChannelKind::ColorTemperature, ChannelDataType::Int).with_range(ct_min, ct_max, 1.0),
        );
        bind(model, id::COLOR_TEMPERATURE);

        // Five coarse presets spanning the mirek range, coldest to warmest
        add_channel_once(
            device,
            Channel::writable(id::COLOR_TEMPERATURE_PRESET, "Color temperature preset", ChannelKind::ColorTemperaturePreset, ChannelDataType::Enum).with_range(0.0, 4.0, 1.0),
        );
        bind(model, id::COLOR_TEMPERATURE_PRESET);
    }

    if resource["color"].is_object() {
        add_channel_once(device, Channel::writable(id::COLOR, "Color", ChannelKind::ColorRgb, ChannelDataType::Color));
        bind(model, id::COLOR);

        if let Some(gamut) = parse_gamut(&resource["color"]["gamut"]) {
            model.gamuts.insert(light_id.to_string(), gamut);
        }
    }

    merge_effects(device, resource);
}

fn add_motion_channels(device: &mut Device, resource: &Value) {
    add_channel_once(device, Channel::readable(id::MOTION, "Motion", ChannelKind::Motion, ChannelDataType::Bool));
    if !resource["sensitivity"]["sensitivity"].is_null() {
        add_channel_once(
            device,
            Channel::readable(id::MOTION_SENSITIVITY, "Motion sensitivity", ChannelKind::MotionSensitivity, ChannelDataType::Enum)
                .with_range(0.0, 4.0, 1.0)
                .with_labels(&SENSITIVITY_LABELS),
        );
    }
}

fn add_button_channel(model: &mut Model, device: &mut Device, button_id: &str, resource: &Value, button_count: usize) {
    let control_id = resource["metadata"]["control_id"].as_i64().unwrap_or(0);
    // Single-button devices keep the bare channel id
    let channel_id = if button_count <= 1 || control_id <= 0 {
        id::BUTTON.to_string()
    } else {
        format!("{}{}", id::BUTTON, control_id)
    };

    model.button_channel.insert(button_id.to_string(), channel_id.clone());
    add_channel_once(
        device,
        Channel::readable(&channel_id, "Button", ChannelKind::ButtonEvent, ChannelDataType::Enum).with_labels(&BUTTON_EVENT_LABELS),
    );
}

fn add_channel_once(device: &mut Device, channel: Channel) {
    if device.channel(&channel.id).is_none() {
        device.channels.push(channel);
    }
}

/// Effects can live on three different blocks of a light resource; they are
/// merged and deduplicated case-insensitively.
fn merge_effects(device: &mut Device, resource: &Value) {
    let sources = [
        &resource["effects"]["effect_values"],
        &resource["effects_v2"]["action"]["effect_values"],
        &resource["timed_effects"]["effect_values"],
    ];

    for source in sources {
        for value in source.as_array().map(|a| a.as_slice()).unwrap_or(&[]) {
            let Some(effect_id) = value.as_str() else {
                continue;
            };
            if effect_id.eq_ignore_ascii_case("no_effect") {
                continue;
            }
            if device.effects.iter().any(|existing| existing.id.eq_ignore_ascii_case(effect_id)) {
                continue;
            }
            device.effects.push(Effect {
                id: effect_id.to_string(),
                label: beautify_effect_label(effect_id),
                kind: EffectKind::from_effect_id(effect_id),
            });
        }
    }
}

/// The device resource's `metadata` block, with keys contributed by the bound
/// capability resources' own blocks. The device resource wins on conflicts.
fn merge_vendor_meta(meta: &Value, resources: &[(ResourceType, &Value)]) -> Value {
    let mut merged = meta["metadata"].as_object().cloned().unwrap_or_default();
    for (_, resource) in resources {
        if let Some(block) = resource["metadata"].as_object() {
            for (key, value) in block {
                merged.entry(key.clone()).or_insert_with(|| value.clone());
            }
        }
    }
    Value::Object(merged)
}

fn device_name(meta: &Value, resources: &[(ResourceType, &Value)]) -> String {
    if let Some(name) = non_empty_str(&meta["metadata"]["name"]) {
        return name.to_string();
    }
    if let Some(name) = non_empty_str(&meta["product_data"]["product_name"]) {
        return name.to_string();
    }
    // Last resort: borrow a light service's own name
    for (rtype, resource) in resources {
        if *rtype == ResourceType::Light
            && let Some(name) = non_empty_str(&resource["metadata"]["name"])
        {
            return name.to_string();
        }
    }
    "Hue Device".to_string()
}

fn classify(meta: &Value) -> DeviceClass {
    let candidates = [
        &meta["product_data"]["product_archetype"],
        &meta["product_data"]["product_name"],
        &meta["metadata"]["archetype"],
        &meta["metadata"]["name"],
    ];

    for candidate in candidates {
        let Some(text) = non_empty_str(candidate) else {
            continue;
        };
        let lowered = text.to_lowercase();
        if lowered.contains("plug") {
            return DeviceClass::Plug;
        }
        if lowered.contains("sensor") {
            return DeviceClass::Sensor;
        }
        if lowered.contains("switch") {
            return DeviceClass::Switch;
        }
        if lowered.contains("bridge") || lowered.contains("gateway") {
            return DeviceClass::Gateway;
        }
    }
    DeviceClass::Unknown
}

/// Capability-derived fallback, applied only when nothing explicit matched.
fn default_class(device: &Device) -> DeviceClass {
    if device.channel(id::ON).is_some() {
        DeviceClass::Light
    } else if device.channel(id::MOTION).is_some() || device.channel(id::TEMPERATURE).is_some() || device.channel(id::ILLUMINANCE).is_some() {
        DeviceClass::Sensor
    } else if device.channels.iter().any(|c| c.id.starts_with(id::BUTTON)) {
        DeviceClass::Button
    } else if device.channel(id::DIAL).is_some() {
        DeviceClass::Switch
    } else {
        DeviceClass::Unknown
    }
}

fn build_rooms(model: &mut Model, store: &ResourceStore) {
    for resource in store.resources(ResourceType::Room) {
        let Some(room_id) = resource["id"].as_str() else {
            continue;
        };
        let name = non_empty_str(&resource["metadata"]["name"]).unwrap_or("Hue Room").to_string();
        let room = Room {
            id: room_id.to_string(),
            name,
            archetype: string_or_empty(&resource["metadata"]["archetype"]),
            device_ids: collect_device_refs(resource),
        };
        model.rooms.insert(room.id.clone(), room);
    }
}

fn build_zones(model: &mut Model, store: &ResourceStore) {
    for resource in store.resources(ResourceType::Zone) {
        let Some(zone_id) = resource["id"].as_str() else {
            continue;
        };
        let mut device_ids = collect_device_refs(resource);

        // Room refs contribute the room's members, one level deep
        let mut seen: HashSet<String> = device_ids.iter().cloned().collect();
        for reference in group_refs(resource) {
            if reference["rtype"] == "room"
                && let Some(room_id) = reference["rid"].as_str()
                && let Some(room) = model.rooms.get(room_id)
            {
                for device_id in &room.device_ids {
                    if seen.insert(device_id.clone()) {
                        device_ids.push(device_id.clone());
                    }
                }
            }
        }

        let name = non_empty_str(&resource["metadata"]["name"]).unwrap_or("Hue Zone").to_string();
        let zone = Zone {
            id: zone_id.to_string(),
            name,
            archetype: string_or_empty(&resource["metadata"]["archetype"]),
            device_ids,
        };
        model.zones.insert(zone.id.clone(), zone);
    }
}

fn build_scenes(store: &ResourceStore) -> Vec<Scene> {
    store
        .resources(ResourceType::Scene)
        .iter()
        .filter_map(|resource| {
            let scene_id = resource["id"].as_str()?;
            // Nameless scenes are internal bridge artifacts
            let name = non_empty_str(&resource["metadata"]["name"])?;
            Some(Scene {
                id: scene_id.to_string(),
                name: name.to_string(),
                group_id: resource["group"]["rid"].as_str().map(|s| s.to_string()),
                state: SceneState::parse(resource["status"]["active"].as_str()),
                supports_dynamic: scene_supports_dynamic(resource),
            })
        })
        .collect()
}

fn scene_supports_dynamic(resource: &Value) -> bool {
    if resource["auto_dynamic"].as_bool() == Some(true) {
        return true;
    }
    let palette = &resource["palette"];
    ["color", "color_temperature", "dimming"]
        .iter()
        .any(|section| palette[section].as_array().map(|a| !a.is_empty()).unwrap_or(false))
}

/// Device references from both `children` and `services`, deduplicated in
/// encounter order.
fn collect_device_refs(resource: &Value) -> Vec<String> {
    let mut device_ids = Vec::new();
    let mut seen = HashSet::new();
    for reference in group_refs(resource) {
        if reference["rtype"] == "device"
            && let Some(device_id) = reference["rid"].as_str()
            && seen.insert(device_id.to_string())
        {
            device_ids.push(device_id.to_string());
        }
    }
    device_ids
}

fn group_refs(resource: &Value) -> impl Iterator<Item = &Value> {
    let children = resource["children"].as_array().map(|a| a.as_slice()).unwrap_or(&[]);
    let services = resource["services"].as_array().map(|a| a.as_slice()).unwrap_or(&[]);
    services.iter().chain(children.iter())
}

fn parse_gamut(value: &Value) -> Option<Gamut> {
    let point = |corner: &str| -> Option<Xy> {
        let x = value[corner]["x"].as_f64()?;
        let y = value[corner]["y"].as_f64()?;
        Some(Xy::new(x, y))
    };
    Gamut::new(point("red")?, point("green")?, point("blue")?)
}

fn non_empty_str(value: &Value) -> Option<&str> {
    value.as_str().map(str::trim).filter(|s| !s.is_empty())
}

fn string_or_empty(value: &Value) -> String {
    value.as_str().unwrap_or_default().to_string()
}
