/// Stable channel ids, shared between the model builder and the event stream.
pub mod id {
    pub const ON: &str = "on";
    pub const BRIGHTNESS: &str = "bri";
    pub const COLOR_TEMPERATURE: &str = "ct";
    pub const COLOR_TEMPERATURE_PRESET: &str = "ctPreset";
    pub const COLOR: &str = "color";
    pub const MOTION: &str = "motion";
    pub const MOTION_SENSITIVITY: &str = "motion_sensitivity";
    pub const TAMPER: &str = "tamper";
    pub const TEMPERATURE: &str = "temperature";
    pub const ILLUMINANCE: &str = "illuminance";
    pub const BATTERY: &str = "battery";
    pub const ZIGBEE_STATUS: &str = "zigbee_status";
    pub const DEVICE_SOFTWARE_UPDATE: &str = "device_software_update";
    pub const BUTTON: &str = "button";
    pub const DIAL: &str = "dial";
}

/// What a channel semantically carries.
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub enum ChannelKind {
    Power,
    Brightness,
    ColorTemperature,
    ColorTemperaturePreset,
    ColorRgb,
    Motion,
    MotionSensitivity,
    Tamper,
    Temperature,
    Illuminance,
    Battery,
    ButtonEvent,
    ConnectivityStatus,
    DeviceSoftwareUpdate,
    RelativeRotation,
}

#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub enum ChannelDataType {
    Bool,
    Int,
    Float,
    Enum,
    Color,
}

/// A value flowing through a channel, either inbound from the bridge or
/// outbound in a write.
#[derive(PartialEq, Clone, Debug)]
pub enum ChannelValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Enum(i64),
    Rgb(u8, u8, u8),
}

#[derive(PartialEq, Clone, Debug)]
pub struct Channel {
    pub id: String,
    pub name: String,
    pub kind: ChannelKind,
    pub data_type: ChannelDataType,
    pub readonly: bool,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub step: Option<f64>,
    /// Display labels for `Enum` channels, indexed by code.
    pub labels: Vec<String>,
}

impl Channel {
    pub fn readable(id: &str, name: &str, kind: ChannelKind, data_type: ChannelDataType) -> Self {
        Channel {
            id: id.to_string(),
            name: name.to_string(),
            kind,
            data_type,
            readonly: true,
            min: None,
            max: None,
            step: None,
            labels: Vec::new(),
        }
    }

    pub fn writable(id: &str, name: &str, kind: ChannelKind, data_type: ChannelDataType) -> Self {
        Channel {
            readonly: false,
            ..Channel::readable(id, name, kind, data_type)
        }
    }

    pub fn with_range(mut self, min: f64, max: f64, step: f64) -> Self {
        self.min = Some(min);
        self.max = Some(max);
        self.step = Some(step);
        self
    }

    pub fn with_labels(mut self, labels: &[&str]) -> Self {
        self.labels = labels.iter().map(|l| l.to_string()).collect();
        self
    }
}

/// Canonical button event codes emitted on `button` channels. Raw bridge
/// events map onto these so remotes behave uniformly; the multi-press
/// aggregates are synthesized locally.
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub enum ButtonEvent {
    InitialPress,
    Repeat,
    ShortRelease,
    LongRelease,
    LongPress,
    DoublePress,
    TriplePress,
    QuadruplePress,
    QuintuplePress,
}

impl ButtonEvent {
    pub fn code(&self) -> i64 {
        match self {
            ButtonEvent::InitialPress => 1,
            ButtonEvent::Repeat => 2,
            ButtonEvent::ShortRelease => 3,
            ButtonEvent::LongRelease => 4,
            ButtonEvent::LongPress => 5,
            ButtonEvent::DoublePress => 6,
            ButtonEvent::TriplePress => 7,
            ButtonEvent::QuadruplePress => 8,
            ButtonEvent::QuintuplePress => 9,
        }
    }

    pub fn parse(event: &str) -> Option<ButtonEvent> {
        match event {
            "initial_press" => Some(ButtonEvent::InitialPress),
            "repeat" => Some(ButtonEvent::Repeat),
            "short_release" => Some(ButtonEvent::ShortRelease),
            "long_release" => Some(ButtonEvent::LongRelease),
            "long_press" => Some(ButtonEvent::LongPress),
            _ => None,
        }
    }

    /// Aggregate for `count` short releases inside one multi-press window.
    /// Counts above five clamp to a quintuple press.
    pub fn aggregate(count: u32) -> Option<ButtonEvent> {
        match count {
            0 | 1 => None,
            2 => Some(ButtonEvent::DoublePress),
            3 => Some(ButtonEvent::TriplePress),
            4 => Some(ButtonEvent::QuadruplePress),
            _ => Some(ButtonEvent::QuintuplePress),
        }
    }
}

pub const BUTTON_EVENT_LABELS: [&str; 10] = [
    "None",
    "Initial press",
    "Repeat",
    "Short release",
    "Long release",
    "Long press",
    "Double press",
    "Triple press",
    "Quadruple press",
    "Quintuple press",
];

#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub enum SensitivityLevel {
    Unknown,
    Low,
    Medium,
    High,
    VeryHigh,
}

impl SensitivityLevel {
    pub fn code(&self) -> i64 {
        match self {
            SensitivityLevel::Unknown => 0,
            SensitivityLevel::Low => 1,
            SensitivityLevel::Medium => 2,
            SensitivityLevel::High => 3,
            SensitivityLevel::VeryHigh => 4,
        }
    }

    /// Maps the bridge's raw 1–4 sensitivity scale.
    pub fn from_raw(raw: i64) -> SensitivityLevel {
        match raw {
            1 => SensitivityLevel::Low,
            2 => SensitivityLevel::Medium,
            3 => SensitivityLevel::High,
            4 => SensitivityLevel::VeryHigh,
            _ => SensitivityLevel::Unknown,
        }
    }
}

pub const SENSITIVITY_LABELS: [&str; 5] = ["Unknown", "Low", "Medium", "High", "Very high"];

#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub enum ConnectivityStatus {
    Unknown,
    Connected,
    Disconnected,
    Limited,
}

impl ConnectivityStatus {
    pub fn code(&self) -> i64 {
        match self {
            ConnectivityStatus::Unknown => 0,
            ConnectivityStatus::Connected => 1,
            ConnectivityStatus::Disconnected => 2,
            ConnectivityStatus::Limited => 3,
        }
    }

    pub fn parse(value: &str) -> ConnectivityStatus {
        let normalized = value.trim().to_lowercase();
        if normalized == "connected" {
            ConnectivityStatus::Connected
        } else if normalized == "disconnected" {
            ConnectivityStatus::Disconnected
        } else if normalized.contains("issue") || normalized.contains("limited") || normalized.contains("degraded") {
            ConnectivityStatus::Limited
        } else {
            ConnectivityStatus::Unknown
        }
    }
}

pub const CONNECTIVITY_LABELS: [&str; 4] = ["Unknown", "Connected", "Disconnected", "Limited"];

#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub enum UpdateState {
    Unknown,
    UpToDate,
    UpdateAvailable,
    Downloading,
    Installing,
    RebootRequired,
    Failed,
}

impl UpdateState {
    pub fn code(&self) -> i64 {
        match self {
            UpdateState::Unknown => 0,
            UpdateState::UpToDate => 1,
            UpdateState::UpdateAvailable => 2,
            UpdateState::Downloading => 3,
            UpdateState::Installing => 4,
            UpdateState::RebootRequired => 5,
            UpdateState::Failed => 6,
        }
    }

    /// Firmware update states arrive as loosely standardized strings, so this
    /// matches on fragments rather than exact values.
    pub fn parse(value: &str) -> UpdateState {
        let normalized = value.to_lowercase();
        if normalized.contains("up") && normalized.contains("date") {
            UpdateState::UpToDate
        } else if normalized.contains("ready") || normalized.contains("available") {
            UpdateState::UpdateAvailable
        } else if normalized.contains("download") {
            UpdateState::Downloading
        } else if normalized.contains("install") {
            UpdateState::Installing
        } else if normalized.contains("reboot") || normalized.contains("restart") {
            UpdateState::RebootRequired
        } else if normalized.contains("fail") {
            UpdateState::Failed
        } else {
            UpdateState::Unknown
        }
    }
}

pub const UPDATE_STATE_LABELS: [&str; 7] = [
    "Unknown",
    "Up to date",
    "Update available",
    "Downloading",
    "Installing",
    "Reboot required",
    "Failed",
];
