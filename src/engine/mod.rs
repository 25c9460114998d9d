pub mod builder;
pub mod fetch;
pub mod gamut;
pub mod interaction;
pub mod resolver;
pub mod store;
pub mod stream;

use crate::app_config::AppConfig;
use crate::bridge::error::BridgeError;
use crate::bridge::resource::{get_resource, get_resources, put_resource};
use crate::domain::channel::{ButtonEvent, ChannelValue, id};
use crate::domain::color::rgb_to_xy;
use crate::domain::commands::{Command, CommandError, CommandResponder, SceneAction};
use crate::domain::events::ModelEvent;
use crate::domain::resource::{ChannelKey, ResourceKey, ResourceType, SNAPSHOT_TYPES};
use crate::engine::builder::{BuildOutcome, CAPABILITY_TYPES, Model, build};
use crate::engine::fetch::FetchQueue;
use crate::engine::gamut::clip_to_gamut;
use crate::engine::interaction::{DialResetTracker, MultiPressTracker};
use crate::engine::store::ResourceStore;
use crate::engine::stream::{StreamItem, extract_items};
use crate::sse::envelope::{EventEnvelope, EventType};
use crate::sse::listen::StreamNotice;
use chrono::Utc;
use reqwest::Client;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{Receiver, Sender};
use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};

/// Internal reactor messages. Timer-driven messages carry tokens or a cycle
/// number so stale timers and late fetch results are recognized and dropped.
#[derive(Debug)]
enum Msg {
    SnapshotDue {
        rtype: ResourceType,
        cycle: u64,
    },
    SnapshotFetched {
        rtype: ResourceType,
        cycle: u64,
        result: Result<Vec<Value>, BridgeError>,
    },
    FetchSlotDue,
    DeviceFetched {
        device_id: String,
        result: Result<Option<Value>, BridgeError>,
    },
    ResyncDue {
        token: u64,
    },
    PeriodicResyncDue {
        token: u64,
    },
    MultiPressElapsed {
        key: ChannelKey,
        token: u64,
    },
    DialResetDue {
        key: ChannelKey,
        token: u64,
    },
    RenameWritten {
        device_id: String,
        token: u64,
        result: Result<(), BridgeError>,
    },
    RenameVerifyDue {
        device_id: String,
        token: u64,
    },
    RenameChecked {
        device_id: String,
        token: u64,
        result: Result<Option<Value>, BridgeError>,
    },
}

struct PendingRename {
    device_id: String,
    name: String,
    token: u64,
    attempts: u32,
    respond_to: CommandResponder,
}

/// The synchronization engine. One task owns all mutable state; everything
/// else (timers, HTTP calls, the SSE transport) reports back over the message
/// channel, so no lock is ever taken.
pub struct Engine {
    config: Arc<AppConfig>,
    client: Client,
    events_tx: Sender<ModelEvent>,
    commands_rx: Receiver<Command>,
    stream_rx: Receiver<StreamNotice>,
    msg_tx: Sender<Msg>,
    msg_rx: Receiver<Msg>,

    store: ResourceStore,
    model: Model,
    /// Last emitted value per channel, to suppress no-op updates. Button and
    /// dial channels are transient and bypass this cache.
    values: HashMap<ChannelKey, ChannelValue>,
    fetch_queue: FetchQueue,
    failed_devices: HashSet<String>,
    multi_press: MultiPressTracker,
    dial_reset: DialResetTracker,

    cycle: u64,
    cycle_active: bool,
    resync_again: bool,
    resync_token: u64,
    periodic_token: u64,
    resync_responders: Vec<CommandResponder>,
    pending_rename: Option<PendingRename>,
    rename_token: u64,
    streaming: bool,
    stream_closed: bool,
}

impl Engine {
    pub fn new(
        config: Arc<AppConfig>,
        client: Client,
        events_tx: Sender<ModelEvent>,
        commands_rx: Receiver<Command>,
        stream_rx: Receiver<StreamNotice>,
    ) -> Self {
        let (msg_tx, msg_rx) = tokio::sync::mpsc::channel(64);
        let fetch_queue = FetchQueue::new(config.sync().device_fetch_limit());
        let multi_press = MultiPressTracker::new(config.interaction().press_reset_gap_ms());

        Engine {
            config,
            client,
            events_tx,
            commands_rx,
            stream_rx,
            msg_tx,
            msg_rx,
            store: ResourceStore::new(),
            model: Model::default(),
            values: HashMap::new(),
            fetch_queue,
            failed_devices: HashSet::new(),
            multi_press,
            dial_reset: DialResetTracker::new(),
            cycle: 0,
            cycle_active: false,
            resync_again: false,
            resync_token: 0,
            periodic_token: 0,
            resync_responders: Vec::new(),
            pending_rename: None,
            rename_token: 0,
            streaming: false,
            stream_closed: false,
        }
    }

    /// Runs until a `Stop` command arrives or the command channel closes.
    #[instrument(skip_all)]
    pub async fn run(mut self) {
        info!("Starting engine");
        self.start_cycle();

        loop {
            tokio::select! {
                Some(msg) = self.msg_rx.recv() => self.handle_msg(msg).await,
                notice = self.stream_rx.recv(), if !self.stream_closed => match notice {
                    Some(notice) => self.handle_stream(notice).await,
                    None => {
                        self.stream_closed = true;
                        self.set_streaming(false).await;
                    }
                },
                command = self.commands_rx.recv() => match command {
                    Some(Command::Stop) | None => {
                        self.shutdown();
                        return;
                    }
                    Some(command) => self.handle_command(command).await,
                },
            }
        }
    }

    fn shutdown(&mut self) {
        info!("Stopping engine");
        for respond_to in self.resync_responders.drain(..) {
            let _ = respond_to.send(Err(CommandError::Stopped));
        }
        if let Some(pending) = self.pending_rename.take() {
            let _ = pending.respond_to.send(Err(CommandError::Stopped));
        }
    }

    fn arm(&self, delay: Duration, msg: Msg) {
        let tx = self.msg_tx.clone();
        tokio::spawn(async move {
            sleep(delay).await;
            let _ = tx.send(msg).await;
        });
    }

    // --- Snapshot cycle ---

    fn start_cycle(&mut self) {
        self.cycle += 1;
        self.cycle_active = true;
        self.store.begin_cycle();
        self.fetch_queue.begin_cycle();
        self.failed_devices.clear();
        info!("Starting snapshot cycle {}", self.cycle);

        let stagger = self.config.sync().snapshot_stagger();
        for (index, rtype) in SNAPSHOT_TYPES.iter().enumerate() {
            let mut delay = stagger * index as u32;
            // Button endpoints are rate limited harder than the rest
            if *rtype == ResourceType::Button {
                delay += self.config.sync().button_extra_delay();
            }
            self.arm(
                delay,
                Msg::SnapshotDue {
                    rtype: *rtype,
                    cycle: self.cycle,
                },
            );
        }
    }

    fn spawn_snapshot_fetch(&self, rtype: ResourceType, cycle: u64) {
        let client = self.client.clone();
        let base_url = self.config.bridge().url().to_string();
        let tx = self.msg_tx.clone();
        tokio::spawn(async move {
            let result = get_resources(&client, &base_url, rtype).await;
            let _ = tx.send(Msg::SnapshotFetched { rtype, cycle, result }).await;
        });
    }

    async fn on_snapshot_fetched(&mut self, rtype: ResourceType, result: Result<Vec<Value>, BridgeError>) {
        match result {
            Ok(resources) => {
                debug!("Retrieving {} snapshot... OK ({} resource(s))", rtype, resources.len());
                self.store.put_snapshot(rtype, resources);
            }
            Err(e) => {
                warn!("⚠️ Retrieving {} snapshot failed: {}", rtype, e);
                if let Some(attempt) = self.store.record_failure(rtype) {
                    let delay = self.config.sync().snapshot_retry_base() * attempt;
                    self.arm(delay, Msg::SnapshotDue { rtype, cycle: self.cycle });
                    return;
                }
            }
        }
        self.try_build().await;
    }

    async fn try_build(&mut self) {
        if !self.store.cycle_complete() {
            return;
        }

        match build(&self.store, &self.failed_devices) {
            BuildOutcome::Complete(model) => self.apply_model(*model).await,
            BuildOutcome::MissingOwners(device_ids) => {
                for device_id in device_ids {
                    self.fetch_queue.enqueue(&device_id);
                }
                self.pump_fetches();
            }
        }
    }

    fn pump_fetches(&mut self) {
        let Some(device_id) = self.fetch_queue.start_next() else {
            return;
        };
        debug!("Fetching owner device {}", device_id);

        let client = self.client.clone();
        let base_url = self.config.bridge().url().to_string();
        let tx = self.msg_tx.clone();
        let id_for_task = device_id.clone();
        tokio::spawn(async move {
            let result = get_resource(&client, &base_url, ResourceType::Device, &id_for_task).await;
            let _ = tx
                .send(Msg::DeviceFetched {
                    device_id: id_for_task,
                    result,
                })
                .await;
        });

        if self.fetch_queue.has_queued() {
            self.arm(self.config.sync().device_fetch_spacing(), Msg::FetchSlotDue);
        }
    }

    async fn on_device_fetched(&mut self, device_id: String, result: Result<Option<Value>, BridgeError>) {
        match result {
            Ok(Some(resource)) => {
                self.fetch_queue.complete(&device_id, true);
                self.store.upsert(ResourceType::Device, resource);
            }
            Ok(None) => {
                // The device vanished between the reference and the fetch
                warn!("⚠️ Owner device {} no longer exists", device_id);
                self.fetch_queue.complete(&device_id, false);
                self.failed_devices.insert(device_id);
            }
            Err(e) => {
                warn!("⚠️ Fetching device {} failed: {}", device_id, e);
                self.fetch_queue.complete(&device_id, false);
                self.failed_devices.insert(device_id);
            }
        }

        if self.fetch_queue.is_idle() {
            self.try_build().await;
        } else {
            self.pump_fetches();
        }
    }

    async fn apply_model(&mut self, model: Model) {
        info!(
            "✅ Model built: {} device(s), {} room(s), {} zone(s), {} scene(s)",
            model.devices.len(),
            model.rooms.len(),
            model.zones.len(),
            model.scenes.len()
        );

        for (device_id, device) in &model.devices {
            if self.model.devices.get(device_id) != Some(device) {
                self.emit(ModelEvent::DeviceUpserted(device.clone())).await;
            }
        }
        for device_id in self.model.devices.keys() {
            if !model.devices.contains_key(device_id) {
                self.emit(ModelEvent::DeviceRemoved {
                    device_id: device_id.clone(),
                })
                .await;
            }
        }

        for (room_id, room) in &model.rooms {
            if self.model.rooms.get(room_id) != Some(room) {
                self.emit(ModelEvent::RoomUpserted(room.clone())).await;
            }
        }
        for room_id in self.model.rooms.keys() {
            if !model.rooms.contains_key(room_id) {
                self.emit(ModelEvent::RoomRemoved { room_id: room_id.clone() }).await;
            }
        }

        for (zone_id, zone) in &model.zones {
            if self.model.zones.get(zone_id) != Some(zone) {
                self.emit(ModelEvent::ZoneUpserted(zone.clone())).await;
            }
        }
        for zone_id in self.model.zones.keys() {
            if !model.zones.contains_key(zone_id) {
                self.emit(ModelEvent::ZoneRemoved { zone_id: zone_id.clone() }).await;
            }
        }

        if self.model.scenes != model.scenes {
            self.emit(ModelEvent::ScenesReplaced(model.scenes.clone())).await;
        }

        self.model = model;
        self.values.retain(|key, _| self.model.devices.contains_key(&key.device));
        self.seed_values().await;

        self.cycle_active = false;
        for respond_to in self.resync_responders.drain(..) {
            let _ = respond_to.send(Ok(()));
        }
        self.schedule_periodic_resync();

        if self.resync_again {
            self.resync_again = false;
            self.request_resync();
        }
    }

    /// Replays current channel values out of the freshly built model. Button
    /// and rotation items are transient and never seeded.
    async fn seed_values(&mut self) {
        let now_ms = Utc::now().timestamp_millis();
        let mut seeded = Vec::new();
        for rtype in CAPABILITY_TYPES {
            for resource in self.store.resources(rtype) {
                for item in extract_items(rtype, resource, &self.model, now_ms) {
                    if let StreamItem::Value { key, value, timestamp_ms } = item {
                        seeded.push((key, value, timestamp_ms));
                    }
                }
            }
        }
        for (key, value, timestamp_ms) in seeded {
            self.apply_value(key, value, timestamp_ms).await;
        }
    }

    // --- Resync scheduling ---

    fn request_resync(&mut self) {
        if self.cycle_active {
            self.resync_again = true;
            return;
        }
        self.resync_token += 1;
        self.arm(
            self.config.sync().resync_debounce(),
            Msg::ResyncDue {
                token: self.resync_token,
            },
        );
    }

    fn schedule_periodic_resync(&mut self) {
        self.periodic_token += 1;
        let interval = if self.streaming {
            self.config.sync().resync_interval_streaming()
        } else {
            self.config.sync().resync_interval_polling()
        };
        self.arm(
            interval,
            Msg::PeriodicResyncDue {
                token: self.periodic_token,
            },
        );
    }

    // --- Stream handling ---

    async fn set_streaming(&mut self, streaming: bool) {
        if self.streaming == streaming {
            return;
        }
        self.streaming = streaming;
        self.emit(ModelEvent::ConnectivityChanged { streaming }).await;
        self.schedule_periodic_resync();
    }

    async fn handle_stream(&mut self, notice: StreamNotice) {
        match notice {
            StreamNotice::Connected => {
                self.set_streaming(true).await;
                // Anything that happened while disconnected was missed
                self.request_resync();
            }
            StreamNotice::Disconnected => self.set_streaming(false).await,
            StreamNotice::Events(envelopes) => {
                for envelope in envelopes {
                    self.handle_envelope(envelope).await;
                }
            }
        }
    }

    async fn handle_envelope(&mut self, envelope: EventEnvelope) {
        match envelope.r#type {
            EventType::Add | EventType::Update => {
                for fragment in &envelope.data {
                    self.handle_fragment(fragment).await;
                }
            }
            EventType::Delete => {
                for fragment in &envelope.data {
                    self.handle_delete(fragment).await;
                }
            }
            EventType::Error => warn!("⚠️ Bridge reported a stream error: {:?}", envelope.data),
        }
    }

    async fn handle_fragment(&mut self, fragment: &Value) {
        let Some(rtype) = fragment["type"].as_str().and_then(ResourceType::parse) else {
            return;
        };

        match rtype {
            // Topology changes invalidate derived groupings; rebuild lazily
            ResourceType::Device | ResourceType::Room | ResourceType::Zone | ResourceType::Scene => {
                self.store.patch_from_event(rtype, fragment);
                self.request_resync();
            }
            _ => {
                if self.store.patch_from_event(rtype, fragment) == store::PatchOutcome::Buffered {
                    // A resource appeared that the last snapshot never saw
                    self.request_resync();
                }
                let now_ms = Utc::now().timestamp_millis();
                for item in extract_items(rtype, fragment, &self.model, now_ms) {
                    self.handle_item(item).await;
                }
            }
        }
    }

    async fn handle_item(&mut self, item: StreamItem) {
        match item {
            StreamItem::Value { key, value, timestamp_ms } => self.apply_value(key, value, timestamp_ms).await,
            StreamItem::Button { key, event, timestamp_ms } => self.handle_button(key, event, timestamp_ms).await,
            StreamItem::Rotation { key, steps, timestamp_ms } => {
                self.emit(ModelEvent::ChannelValueUpdated {
                    key: key.clone(),
                    value: ChannelValue::Int(steps),
                    timestamp_ms,
                })
                .await;
                let token = self.dial_reset.arm(&key);
                self.arm(self.config.interaction().dial_reset(), Msg::DialResetDue { key, token });
            }
        }
    }

    async fn handle_button(&mut self, key: ChannelKey, event: ButtonEvent, timestamp_ms: i64) {
        if event == ButtonEvent::InitialPress
            && let Some(aggregate) = self.multi_press.on_initial_press(&key, timestamp_ms)
        {
            self.emit_button(&key, aggregate, timestamp_ms).await;
        }

        self.emit_button(&key, event, timestamp_ms).await;

        if event == ButtonEvent::ShortRelease {
            let token = self.multi_press.on_short_release(&key, timestamp_ms);
            self.arm(
                self.config.interaction().multi_press_window(),
                Msg::MultiPressElapsed { key, token },
            );
        }
    }

    async fn emit_button(&mut self, key: &ChannelKey, event: ButtonEvent, timestamp_ms: i64) {
        self.emit(ModelEvent::ChannelValueUpdated {
            key: key.clone(),
            value: ChannelValue::Enum(event.code()),
            timestamp_ms,
        })
        .await;
    }

    async fn handle_delete(&mut self, fragment: &Value) {
        let Some(rtype) = fragment["type"].as_str().and_then(ResourceType::parse) else {
            return;
        };
        let Some(resource_id) = fragment["id"].as_str() else {
            return;
        };
        self.store.remove(rtype, resource_id);

        match rtype {
            ResourceType::Device => {
                if self.model.devices.remove(resource_id).is_some() {
                    info!("Device {} removed", resource_id);
                    self.emit(ModelEvent::DeviceRemoved {
                        device_id: resource_id.to_string(),
                    })
                    .await;
                }
            }
            ResourceType::Room => {
                if self.model.rooms.remove(resource_id).is_some() {
                    self.emit(ModelEvent::RoomRemoved {
                        room_id: resource_id.to_string(),
                    })
                    .await;
                }
            }
            ResourceType::Zone => {
                if self.model.zones.remove(resource_id).is_some() {
                    self.emit(ModelEvent::ZoneRemoved {
                        zone_id: resource_id.to_string(),
                    })
                    .await;
                }
            }
            _ => {}
        }
        // Bindings and ownership maps are stale until the next build
        self.request_resync();
    }

    async fn apply_value(&mut self, key: ChannelKey, value: ChannelValue, timestamp_ms: i64) {
        if self.values.get(&key) == Some(&value) {
            return;
        }
        self.values.insert(key.clone(), value.clone());
        self.emit(ModelEvent::ChannelValueUpdated { key, value, timestamp_ms }).await;
    }

    async fn emit(&self, event: ModelEvent) {
        let _ = self.events_tx.send(event).await;
    }

    // --- Messages ---

    async fn handle_msg(&mut self, msg: Msg) {
        match msg {
            Msg::SnapshotDue { rtype, cycle } => {
                if cycle == self.cycle {
                    self.spawn_snapshot_fetch(rtype, cycle);
                }
            }
            Msg::SnapshotFetched { rtype, cycle, result } => {
                if cycle == self.cycle {
                    self.on_snapshot_fetched(rtype, result).await;
                }
            }
            Msg::FetchSlotDue => self.pump_fetches(),
            Msg::DeviceFetched { device_id, result } => self.on_device_fetched(device_id, result).await,
            Msg::ResyncDue { token } => {
                if token == self.resync_token && !self.cycle_active {
                    self.start_cycle();
                }
            }
            Msg::PeriodicResyncDue { token } => {
                if token == self.periodic_token {
                    debug!("Periodic resync ({})", if self.streaming { "streaming" } else { "polling" });
                    self.request_resync();
                    self.schedule_periodic_resync();
                }
            }
            Msg::MultiPressElapsed { key, token } => {
                if let Some(aggregate) = self.multi_press.on_window_elapsed(&key, token) {
                    let now_ms = Utc::now().timestamp_millis();
                    self.emit_button(&key, aggregate, now_ms).await;
                }
            }
            Msg::DialResetDue { key, token } => {
                if self.dial_reset.fires(&key, token) {
                    let now_ms = Utc::now().timestamp_millis();
                    self.emit(ModelEvent::ChannelValueUpdated {
                        key,
                        value: ChannelValue::Int(0),
                        timestamp_ms: now_ms,
                    })
                    .await;
                }
            }
            Msg::RenameWritten { device_id, token, result } => self.on_rename_written(device_id, token, result),
            Msg::RenameVerifyDue { device_id, token } => self.on_rename_verify_due(device_id, token),
            Msg::RenameChecked { device_id, token, result } => self.on_rename_checked(device_id, token, result),
        }
    }

    // --- Commands ---

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::WriteChannel { key, value, respond_to } => self.write_channel(key, value, respond_to),
            Command::InvokeEffect {
                device_id,
                effect_id,
                respond_to,
            } => self.invoke_effect(device_id, effect_id, respond_to),
            Command::InvokeScene {
                scene_id,
                scope_id,
                action,
                respond_to,
            } => self.invoke_scene(scene_id, scope_id, action, respond_to),
            Command::RenameDevice {
                device_id,
                name,
                respond_to,
            } => self.rename_device(device_id, name, respond_to),
            Command::Resync { respond_to } => {
                self.resync_responders.push(respond_to);
                self.request_resync();
            }
            Command::Stop => {}
        }
    }

    fn write_channel(&self, key: ChannelKey, value: ChannelValue, respond_to: CommandResponder) {
        match self.build_write(&key, &value) {
            Ok((target, payload)) => self.spawn_put(target, payload, respond_to),
            Err(e) => {
                let _ = respond_to.send(Err(e));
            }
        }
    }

    /// Validates a write against the model and turns it into a bridge payload.
    fn build_write(&self, key: &ChannelKey, value: &ChannelValue) -> Result<(ResourceKey, Value), CommandError> {
        let Some(target) = self.model.bindings.get(key) else {
            return Err(CommandError::InvalidArgument(format!("channel {} is not writable", key)));
        };
        let device = self
            .model
            .devices
            .get(&key.device)
            .ok_or_else(|| CommandError::InvalidArgument(format!("unknown device {}", key.device)))?;

        let payload = match (key.channel.as_str(), value) {
            (id::ON, ChannelValue::Bool(on)) => json!({ "on": { "on": on } }),
            (id::BRIGHTNESS, ChannelValue::Float(percent)) => {
                let min = device.channel(id::BRIGHTNESS).and_then(|c| c.min).unwrap_or(0.0);
                json!({ "dimming": { "brightness": percent.clamp(min, 100.0) } })
            }
            (id::BRIGHTNESS, ChannelValue::Int(percent)) => {
                let min = device.channel(id::BRIGHTNESS).and_then(|c| c.min).unwrap_or(0.0);
                json!({ "dimming": { "brightness": (*percent as f64).clamp(min, 100.0) } })
            }
            (id::COLOR_TEMPERATURE, ChannelValue::Int(mirek)) => {
                let (min, max) = self.mirek_bounds(device);
                json!({ "color_temperature": { "mirek": (*mirek as f64).clamp(min, max) as i64 } })
            }
            (id::COLOR_TEMPERATURE_PRESET, ChannelValue::Enum(index)) => {
                if !(0..=4).contains(index) {
                    return Err(CommandError::InvalidArgument(format!("preset index {} out of range", index)));
                }
                // Presets interpolate the mirek range linearly, cold to warm
                let (min, max) = self.mirek_bounds(device);
                let mirek = min + (max - min) * (*index as f64) / 4.0;
                json!({ "color_temperature": { "mirek": mirek.round() as i64 } })
            }
            (id::COLOR, ChannelValue::Rgb(r, g, b)) => {
                let (mut xy, luminance) = rgb_to_xy(*r, *g, *b);
                if let Some(gamut) = self.model.gamuts.get(&target.id) {
                    xy = clip_to_gamut(xy, gamut);
                }
                json!({
                    "color": { "xy": { "x": xy.x, "y": xy.y } },
                    "dimming": { "brightness": (luminance * 100.0).clamp(1.0, 100.0) }
                })
            }
            _ => {
                return Err(CommandError::InvalidArgument(format!(
                    "unsupported value for channel {}",
                    key
                )));
            }
        };

        Ok((target.clone(), payload))
    }

    fn mirek_bounds(&self, device: &crate::domain::device::Device) -> (f64, f64) {
        let channel = device.channel(id::COLOR_TEMPERATURE);
        let min = channel.and_then(|c| c.min).unwrap_or(153.0);
        let max = channel.and_then(|c| c.max).unwrap_or(500.0);
        (min, max)
    }

    fn invoke_effect(&self, device_id: String, effect_id: String, respond_to: CommandResponder) {
        let Some(device) = self.model.devices.get(&device_id) else {
            let _ = respond_to.send(Err(CommandError::InvalidArgument(format!("unknown device {}", device_id))));
            return;
        };
        let Some(effect) = device.effects.iter().find(|e| e.id.eq_ignore_ascii_case(&effect_id)) else {
            let _ = respond_to.send(Err(CommandError::InvalidArgument(format!(
                "device {} has no effect '{}'",
                device_id, effect_id
            ))));
            return;
        };
        let Some(light_id) = self.model.primary_light.get(&device_id) else {
            let _ = respond_to.send(Err(CommandError::InvalidArgument(format!(
                "device {} has no light service",
                device_id
            ))));
            return;
        };

        info!("Invoking effect {} on {}", effect.label, device.name);
        let payload = json!({ "effects": { "effect": effect.id } });
        self.spawn_put(ResourceKey::new(ResourceType::Light, light_id.clone()), payload, respond_to);
    }

    fn invoke_scene(&self, scene_id: String, scope_id: Option<String>, action: SceneAction, respond_to: CommandResponder) {
        let Some(scene) = self.model.scenes.iter().find(|s| s.id == scene_id) else {
            let _ = respond_to.send(Err(CommandError::InvalidArgument(format!("unknown scene {}", scene_id))));
            return;
        };
        // The recall targets the scene resource itself; a caller-supplied
        // scope must agree with the scene's own group
        if let Some(scope_id) = scope_id
            && scene.group_id.as_deref().is_some_and(|group_id| group_id != scope_id)
        {
            let _ = respond_to.send(Err(CommandError::InvalidArgument(format!(
                "scene '{}' does not belong to group {}",
                scene.name, scope_id
            ))));
            return;
        }
        if action == SceneAction::Dynamic && !scene.supports_dynamic {
            let _ = respond_to.send(Err(CommandError::InvalidArgument(format!(
                "scene '{}' has no dynamic palette",
                scene.name
            ))));
            return;
        }

        info!("Recalling scene {} ({})", scene.name, action.as_recall_action());
        let payload = json!({ "recall": { "action": action.as_recall_action() } });
        self.spawn_put(ResourceKey::new(ResourceType::Scene, scene_id), payload, respond_to);
    }

    fn spawn_put(&self, target: ResourceKey, payload: Value, respond_to: CommandResponder) {
        let client = self.client.clone();
        let base_url = self.config.bridge().url().to_string();
        tokio::spawn(async move {
            let result = put_resource(&client, &base_url, target.rtype, &target.id, &payload).await;
            let _ = respond_to.send(result.map_err(CommandError::from));
        });
    }

    // --- Rename verification ---

    fn rename_device(&mut self, device_id: String, name: String, respond_to: CommandResponder) {
        let name = name.trim().to_string();
        if name.is_empty() {
            let _ = respond_to.send(Err(CommandError::InvalidArgument("device name may not be empty".to_string())));
            return;
        }
        if !self.model.devices.contains_key(&device_id) {
            let _ = respond_to.send(Err(CommandError::InvalidArgument(format!("unknown device {}", device_id))));
            return;
        }

        // A newer rename supersedes whatever is still being verified
        if let Some(previous) = self.pending_rename.take() {
            let _ = previous.respond_to.send(Err(CommandError::Superseded));
        }

        self.rename_token += 1;
        let token = self.rename_token;
        self.pending_rename = Some(PendingRename {
            device_id: device_id.clone(),
            name: name.clone(),
            token,
            attempts: 0,
            respond_to,
        });

        info!("Renaming device {} to '{}'", device_id, name);
        let client = self.client.clone();
        let base_url = self.config.bridge().url().to_string();
        let tx = self.msg_tx.clone();
        tokio::spawn(async move {
            let payload = json!({ "metadata": { "name": name } });
            let result = put_resource(&client, &base_url, ResourceType::Device, &device_id, &payload).await;
            let _ = tx.send(Msg::RenameWritten { device_id, token, result }).await;
        });
    }

    fn on_rename_written(&mut self, device_id: String, token: u64, result: Result<(), BridgeError>) {
        let Some(pending) = self.pending_rename.as_ref() else {
            return;
        };
        if pending.token != token {
            return;
        }

        match result {
            Ok(()) => self.arm(
                self.config.interaction().rename_verify_delay(),
                Msg::RenameVerifyDue { device_id, token },
            ),
            Err(e) => {
                if let Some(pending) = self.pending_rename.take() {
                    let _ = pending.respond_to.send(Err(e.into()));
                }
            }
        }
    }

    fn on_rename_verify_due(&mut self, device_id: String, token: u64) {
        let Some(pending) = self.pending_rename.as_ref() else {
            return;
        };
        if pending.token != token {
            return;
        }

        let client = self.client.clone();
        let base_url = self.config.bridge().url().to_string();
        let tx = self.msg_tx.clone();
        tokio::spawn(async move {
            let result = get_resource(&client, &base_url, ResourceType::Device, &device_id).await;
            let _ = tx.send(Msg::RenameChecked { device_id, token, result }).await;
        });
    }

    fn on_rename_checked(&mut self, device_id: String, token: u64, result: Result<Option<Value>, BridgeError>) {
        let Some(pending) = self.pending_rename.as_mut() else {
            return;
        };
        if pending.token != token {
            return;
        }

        if let Ok(Some(resource)) = &result
            && resource["metadata"]["name"] == pending.name.as_str()
        {
            info!("✅ Rename of device {} confirmed", device_id);
            self.store.upsert(ResourceType::Device, resource.clone());
            if let Some(pending) = self.pending_rename.take() {
                let _ = pending.respond_to.send(Ok(()));
            }
            self.request_resync();
            return;
        }

        pending.attempts += 1;
        if pending.attempts < self.config.interaction().rename_verify_attempts() {
            self.arm(
                self.config.interaction().rename_verify_delay(),
                Msg::RenameVerifyDue { device_id, token },
            );
        } else {
            warn!("⚠️ Rename of device {} was never confirmed", device_id);
            let attempts = pending.attempts;
            if let Some(pending) = self.pending_rename.take() {
                let _ = pending.respond_to.send(Err(CommandError::RenameUnverified { device_id, attempts }));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app_config::AppConfigBuilder;
    use crate::domain::events::ModelEvent;
    use mockito::{Mock, ServerGuard};
    use pretty_assertions::assert_eq;
    use test_log::test;
    use tokio::sync::{mpsc, oneshot};
    use tokio::time::timeout;

    async fn mock_snapshots(server: &mut ServerGuard, overrides: &[(ResourceType, &str)]) -> Vec<Mock> {
        let mut mocks = Vec::new();
        for rtype in SNAPSHOT_TYPES {
            let body = overrides
                .iter()
                .find(|(t, _)| *t == rtype)
                .map(|(_, body)| body.to_string())
                .unwrap_or_else(|| r#"{ "errors": [], "data": [] }"#.to_string());
            let mock = server
                .mock("GET", format!("/clip/v2/resource/{}", rtype).as_str())
                .with_status(200)
                .with_body(body)
                .create_async()
                .await;
            mocks.push(mock);
        }
        mocks
    }

    struct Harness {
        events_rx: mpsc::Receiver<ModelEvent>,
        commands_tx: mpsc::Sender<Command>,
        stream_tx: mpsc::Sender<StreamNotice>,
        handle: tokio::task::JoinHandle<()>,
    }

    fn start_engine(url: String) -> Harness {
        let config = Arc::new(AppConfigBuilder::new().bridge_url(url).build());
        let (events_tx, events_rx) = mpsc::channel(64);
        let (commands_tx, commands_rx) = mpsc::channel(8);
        let (stream_tx, stream_rx) = mpsc::channel(8);
        let engine = Engine::new(config, Client::new(), events_tx, commands_rx, stream_rx);
        let handle = tokio::spawn(engine.run());
        Harness {
            events_rx,
            commands_tx,
            stream_tx,
            handle,
        }
    }

    async fn wait_for(harness: &mut Harness, mut predicate: impl FnMut(&ModelEvent) -> bool) -> ModelEvent {
        timeout(Duration::from_secs(5), async {
            loop {
                let event = harness.events_rx.recv().await.expect("event channel closed");
                if predicate(&event) {
                    return event;
                }
            }
        })
        .await
        .expect("timed out waiting for event")
    }

    const DEVICE_SNAPSHOT: &str = r#"{ "errors": [], "data": [{
        "id": "d1",
        "metadata": { "name": "Living room" },
        "product_data": { "product_name": "Hue color lamp" },
        "services": []
    }] }"#;

    const LIGHT_SNAPSHOT: &str = r#"{ "errors": [], "data": [{
        "id": "l1",
        "type": "light",
        "owner": { "rid": "d1", "rtype": "device" },
        "on": { "on": true },
        "dimming": { "brightness": 80.0 }
    }] }"#;

    #[test(tokio::test)]
    async fn bootstraps_and_emits_the_device_with_seeded_values() {
        let mut server = mockito::Server::new_async().await;
        mock_snapshots(
            &mut server,
            &[(ResourceType::Device, DEVICE_SNAPSHOT), (ResourceType::Light, LIGHT_SNAPSHOT)],
        )
        .await;
        let mut harness = start_engine(server.url());

        let upserted = wait_for(&mut harness, |e| matches!(e, ModelEvent::DeviceUpserted(_))).await;
        match upserted {
            ModelEvent::DeviceUpserted(device) => {
                assert_eq!(device.name, "Living room");
                assert!(device.channel(id::ON).is_some());
            }
            _ => unreachable!(),
        }

        let seeded = wait_for(&mut harness, |e| {
            matches!(e, ModelEvent::ChannelValueUpdated { key, .. } if key.channel == id::ON)
        })
        .await;
        match seeded {
            ModelEvent::ChannelValueUpdated { value, .. } => assert_eq!(value, ChannelValue::Bool(true)),
            _ => unreachable!(),
        }

        harness.handle.abort();
    }

    #[test(tokio::test)]
    async fn a_stream_fragment_updates_the_channel_value() {
        let mut server = mockito::Server::new_async().await;
        mock_snapshots(
            &mut server,
            &[(ResourceType::Device, DEVICE_SNAPSHOT), (ResourceType::Light, LIGHT_SNAPSHOT)],
        )
        .await;
        let mut harness = start_engine(server.url());
        wait_for(&mut harness, |e| matches!(e, ModelEvent::DeviceUpserted(_))).await;

        let envelope = EventEnvelope {
            id: "e1".to_string(),
            r#type: EventType::Update,
            creation_time: "2025-03-07T19:13:41Z".to_string(),
            data: vec![json!({ "id": "l1", "type": "light", "on": { "on": false } })],
        };
        harness.stream_tx.send(StreamNotice::Events(vec![envelope])).await.unwrap();

        let updated = wait_for(&mut harness, |e| {
            matches!(
                e,
                ModelEvent::ChannelValueUpdated { key, value, .. }
                    if key.channel == id::ON && *value == ChannelValue::Bool(false)
            )
        })
        .await;
        assert!(matches!(updated, ModelEvent::ChannelValueUpdated { .. }));

        harness.handle.abort();
    }

    #[test(tokio::test)]
    async fn rapid_short_releases_synthesize_a_double_press() {
        let button_snapshot = r#"{ "errors": [], "data": [{
            "id": "b1",
            "type": "button",
            "owner": { "rid": "d1", "rtype": "device" },
            "metadata": { "control_id": 1 }
        }] }"#;
        let mut server = mockito::Server::new_async().await;
        mock_snapshots(
            &mut server,
            &[(ResourceType::Device, DEVICE_SNAPSHOT), (ResourceType::Button, button_snapshot)],
        )
        .await;
        let mut harness = start_engine(server.url());
        wait_for(&mut harness, |e| matches!(e, ModelEvent::DeviceUpserted(_))).await;

        let release = |event_id: &str| EventEnvelope {
            id: event_id.to_string(),
            r#type: EventType::Update,
            creation_time: "2025-03-07T19:13:41Z".to_string(),
            data: vec![json!({
                "id": "b1",
                "type": "button",
                "button": { "button_report": { "event": "short_release" } }
            })],
        };
        harness.stream_tx.send(StreamNotice::Events(vec![release("e1")])).await.unwrap();
        harness.stream_tx.send(StreamNotice::Events(vec![release("e2")])).await.unwrap();

        let aggregate = wait_for(&mut harness, |e| {
            matches!(
                e,
                ModelEvent::ChannelValueUpdated { key, value, .. }
                    if key.channel == id::BUTTON && *value == ChannelValue::Enum(ButtonEvent::DoublePress.code())
            )
        })
        .await;
        assert!(matches!(aggregate, ModelEvent::ChannelValueUpdated { .. }));

        harness.handle.abort();
    }

    #[test(tokio::test)]
    async fn a_delete_event_removes_the_device_once_and_schedules_a_rebuild() {
        let mut server = mockito::Server::new_async().await;
        mock_snapshots(
            &mut server,
            &[(ResourceType::Device, DEVICE_SNAPSHOT), (ResourceType::Light, LIGHT_SNAPSHOT)],
        )
        .await;
        let mut harness = start_engine(server.url());
        wait_for(&mut harness, |e| matches!(e, ModelEvent::DeviceUpserted(_))).await;

        // Two fragments in one envelope coalesce into a single resync
        let envelope = EventEnvelope {
            id: "e1".to_string(),
            r#type: EventType::Delete,
            creation_time: "2025-03-07T19:13:41Z".to_string(),
            data: vec![
                json!({ "id": "d1", "type": "device" }),
                json!({ "id": "l1", "type": "light" }),
            ],
        };
        harness.stream_tx.send(StreamNotice::Events(vec![envelope])).await.unwrap();

        let removed = wait_for(&mut harness, |e| matches!(e, ModelEvent::DeviceRemoved { .. })).await;
        assert_eq!(
            removed,
            ModelEvent::DeviceRemoved {
                device_id: "d1".to_string()
            }
        );

        // The bridge still reports d1, so the rebuild restores it. Between the
        // removal and that upsert no second removal may slip out.
        let mut removals = 0;
        wait_for(&mut harness, |e| {
            if matches!(e, ModelEvent::DeviceRemoved { .. }) {
                removals += 1;
            }
            matches!(e, ModelEvent::DeviceUpserted(device) if device.id == "d1")
        })
        .await;
        assert_eq!(removals, 0);

        harness.handle.abort();
    }

    const SCENE_SNAPSHOT: &str = r#"{ "errors": [], "data": [{
        "id": "s1",
        "type": "scene",
        "metadata": { "name": "Relax" },
        "group": { "rid": "room1", "rtype": "room" },
        "status": { "active": "inactive" }
    }] }"#;

    #[test(tokio::test)]
    async fn scene_recall_checks_the_callers_scope() {
        let mut server = mockito::Server::new_async().await;
        mock_snapshots(&mut server, &[(ResourceType::Scene, SCENE_SNAPSHOT)]).await;
        let put = server
            .mock("PUT", "/clip/v2/resource/scene/s1")
            .match_body(mockito::Matcher::Json(json!({ "recall": { "action": "active" } })))
            .with_status(200)
            .with_body(r#"{ "errors": [], "data": [] }"#)
            .create_async()
            .await;
        let mut harness = start_engine(server.url());
        wait_for(&mut harness, |e| matches!(e, ModelEvent::ScenesReplaced(_))).await;

        let (respond_to, response) = oneshot::channel();
        harness
            .commands_tx
            .send(Command::InvokeScene {
                scene_id: "s1".to_string(),
                scope_id: Some("room9".to_string()),
                action: SceneAction::Activate,
                respond_to,
            })
            .await
            .unwrap();
        let result = timeout(Duration::from_secs(5), response).await.unwrap().unwrap();
        assert!(matches!(result, Err(CommandError::InvalidArgument(_))));

        let (respond_to, response) = oneshot::channel();
        harness
            .commands_tx
            .send(Command::InvokeScene {
                scene_id: "s1".to_string(),
                scope_id: Some("room1".to_string()),
                action: SceneAction::Activate,
                respond_to,
            })
            .await
            .unwrap();
        let result = timeout(Duration::from_secs(5), response).await.unwrap().unwrap();
        assert!(result.is_ok());
        put.assert_async().await;

        harness.handle.abort();
    }

    #[test(tokio::test)]
    async fn writing_a_bound_channel_puts_to_the_bridge() {
        let mut server = mockito::Server::new_async().await;
        mock_snapshots(
            &mut server,
            &[(ResourceType::Device, DEVICE_SNAPSHOT), (ResourceType::Light, LIGHT_SNAPSHOT)],
        )
        .await;
        let put = server
            .mock("PUT", "/clip/v2/resource/light/l1")
            .match_body(mockito::Matcher::Json(json!({ "on": { "on": false } })))
            .with_status(200)
            .with_body(r#"{ "errors": [], "data": [] }"#)
            .create_async()
            .await;
        let mut harness = start_engine(server.url());
        wait_for(&mut harness, |e| matches!(e, ModelEvent::DeviceUpserted(_))).await;

        let (respond_to, response) = oneshot::channel();
        harness
            .commands_tx
            .send(Command::WriteChannel {
                key: ChannelKey::new("d1", id::ON),
                value: ChannelValue::Bool(false),
                respond_to,
            })
            .await
            .unwrap();

        let result = timeout(Duration::from_secs(5), response).await.unwrap().unwrap();
        assert!(result.is_ok());
        put.assert_async().await;

        harness.handle.abort();
    }

    #[test(tokio::test)]
    async fn writing_an_unbound_channel_fails_fast() {
        let mut server = mockito::Server::new_async().await;
        mock_snapshots(&mut server, &[]).await;
        let harness = start_engine(server.url());

        let (respond_to, response) = oneshot::channel();
        harness
            .commands_tx
            .send(Command::WriteChannel {
                key: ChannelKey::new("ghost", id::ON),
                value: ChannelValue::Bool(true),
                respond_to,
            })
            .await
            .unwrap();

        let result = timeout(Duration::from_secs(5), response).await.unwrap().unwrap();
        assert!(matches!(result, Err(CommandError::InvalidArgument(_))));

        harness.handle.abort();
    }

    #[test(tokio::test)]
    async fn a_resync_command_resolves_after_the_cycle() {
        let mut server = mockito::Server::new_async().await;
        mock_snapshots(
            &mut server,
            &[(ResourceType::Device, DEVICE_SNAPSHOT), (ResourceType::Light, LIGHT_SNAPSHOT)],
        )
        .await;
        let mut harness = start_engine(server.url());
        wait_for(&mut harness, |e| matches!(e, ModelEvent::DeviceUpserted(_))).await;

        let (respond_to, response) = oneshot::channel();
        harness.commands_tx.send(Command::Resync { respond_to }).await.unwrap();

        let result = timeout(Duration::from_secs(5), response).await.unwrap().unwrap();
        assert!(result.is_ok());

        harness.handle.abort();
    }

    #[test(tokio::test)]
    async fn stop_terminates_the_run_loop() {
        let mut server = mockito::Server::new_async().await;
        mock_snapshots(&mut server, &[]).await;
        let harness = start_engine(server.url());

        harness.commands_tx.send(Command::Stop).await.unwrap();

        timeout(Duration::from_secs(5), harness.handle)
            .await
            .expect("engine did not stop")
            .expect("engine task panicked");
    }

    #[test(tokio::test)]
    async fn connectivity_notices_are_forwarded_once_per_transition() {
        let mut server = mockito::Server::new_async().await;
        mock_snapshots(&mut server, &[]).await;
        let mut harness = start_engine(server.url());

        harness.stream_tx.send(StreamNotice::Connected).await.unwrap();
        let connected = wait_for(&mut harness, |e| matches!(e, ModelEvent::ConnectivityChanged { .. })).await;
        assert_eq!(connected, ModelEvent::ConnectivityChanged { streaming: true });

        harness.stream_tx.send(StreamNotice::Disconnected).await.unwrap();
        let disconnected = wait_for(&mut harness, |e| matches!(e, ModelEvent::ConnectivityChanged { .. })).await;
        assert_eq!(disconnected, ModelEvent::ConnectivityChanged { streaming: false });

        harness.handle.abort();
    }
}
