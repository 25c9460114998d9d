use serde::Deserialize;
use serde_json::Value;

/// One entry of a push stream frame. The `data` fragments stay schemaless;
/// the engine routes them by their embedded `type` field.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EventEnvelope {
    pub id: String,
    pub r#type: EventType,
    #[serde(rename = "creationtime")]
    pub creation_time: String,
    #[serde(default)]
    pub data: Vec<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Add,
    Update,
    Delete,
    Error,
}
