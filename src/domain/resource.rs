use std::fmt;

/// Resource types exposed by the bridge's v2 resource API.
#[derive(PartialEq, Eq, Hash, Clone, Copy, Debug)]
pub enum ResourceType {
    Device,
    Room,
    Zone,
    Light,
    Motion,
    Tamper,
    Temperature,
    LightLevel,
    DevicePower,
    Button,
    DeviceSoftwareUpdate,
    ZigbeeConnectivity,
    ZigbeeDeviceDiscovery,
    Scene,
    RelativeRotary,
}

/// Types fetched during a full snapshot cycle. Relative rotary state is
/// push-only and derived from device service references instead.
pub const SNAPSHOT_TYPES: [ResourceType; 14] = [
    ResourceType::Device,
    ResourceType::Room,
    ResourceType::Zone,
    ResourceType::Light,
    ResourceType::Motion,
    ResourceType::Tamper,
    ResourceType::Temperature,
    ResourceType::LightLevel,
    ResourceType::DevicePower,
    ResourceType::Button,
    ResourceType::DeviceSoftwareUpdate,
    ResourceType::ZigbeeConnectivity,
    ResourceType::ZigbeeDeviceDiscovery,
    ResourceType::Scene,
];

impl ResourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Device => "device",
            ResourceType::Room => "room",
            ResourceType::Zone => "zone",
            ResourceType::Light => "light",
            ResourceType::Motion => "motion",
            ResourceType::Tamper => "tamper",
            ResourceType::Temperature => "temperature",
            ResourceType::LightLevel => "light_level",
            ResourceType::DevicePower => "device_power",
            ResourceType::Button => "button",
            ResourceType::DeviceSoftwareUpdate => "device_software_update",
            ResourceType::ZigbeeConnectivity => "zigbee_connectivity",
            ResourceType::ZigbeeDeviceDiscovery => "zigbee_device_discovery",
            ResourceType::Scene => "scene",
            ResourceType::RelativeRotary => "relative_rotary",
        }
    }

    pub fn parse(value: &str) -> Option<ResourceType> {
        match value {
            "device" => Some(ResourceType::Device),
            "room" => Some(ResourceType::Room),
            "zone" => Some(ResourceType::Zone),
            "light" => Some(ResourceType::Light),
            "motion" => Some(ResourceType::Motion),
            "tamper" => Some(ResourceType::Tamper),
            "temperature" => Some(ResourceType::Temperature),
            "light_level" => Some(ResourceType::LightLevel),
            "device_power" => Some(ResourceType::DevicePower),
            "button" => Some(ResourceType::Button),
            "device_software_update" => Some(ResourceType::DeviceSoftwareUpdate),
            "zigbee_connectivity" => Some(ResourceType::ZigbeeConnectivity),
            "zigbee_device_discovery" => Some(ResourceType::ZigbeeDeviceDiscovery),
            "scene" => Some(ResourceType::Scene),
            "relative_rotary" => Some(ResourceType::RelativeRotary),
            _ => None,
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A bridge resource, addressed by type and id.
#[derive(PartialEq, Eq, Hash, Clone, Debug)]
pub struct ResourceKey {
    pub rtype: ResourceType,
    pub id: String,
}

impl ResourceKey {
    pub fn new(rtype: ResourceType, id: impl Into<String>) -> Self {
        ResourceKey { rtype, id: id.into() }
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.rtype, self.id)
    }
}

/// A channel on a device.
#[derive(PartialEq, Eq, Hash, Clone, Debug)]
pub struct ChannelKey {
    pub device: String,
    pub channel: String,
}

impl ChannelKey {
    pub fn new(device: impl Into<String>, channel: impl Into<String>) -> Self {
        ChannelKey {
            device: device.into(),
            channel: channel.into(),
        }
    }
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.device, self.channel)
    }
}
