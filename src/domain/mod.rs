pub mod channel;
pub mod color;
pub mod commands;
pub mod device;
pub mod events;
pub mod group;
pub mod resource;
