use crate::domain::channel::ChannelValue;
use crate::domain::device::Device;
use crate::domain::group::{Room, Scene, Zone};
use crate::domain::resource::ChannelKey;

/// Events emitted by the engine as the canonical model changes. Every carried
/// value is an owned copy, detached from engine state.
#[derive(PartialEq, Clone, Debug)]
pub enum ModelEvent {
    DeviceUpserted(Device),
    DeviceRemoved {
        device_id: String,
    },
    ChannelValueUpdated {
        key: ChannelKey,
        value: ChannelValue,
        timestamp_ms: i64,
    },
    RoomUpserted(Room),
    RoomRemoved {
        room_id: String,
    },
    ZoneUpserted(Zone),
    ZoneRemoved {
        zone_id: String,
    },
    ScenesReplaced(Vec<Scene>),
    /// Whether the push stream is currently delivering events. While false the
    /// engine falls back to tight periodic resyncs.
    ConnectivityChanged {
        streaming: bool,
    },
}
