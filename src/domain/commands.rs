use crate::bridge::error::BridgeError;
use crate::domain::channel::ChannelValue;
use crate::domain::resource::ChannelKey;
use thiserror::Error;
use tokio::sync::oneshot;

pub type CommandResponder = oneshot::Sender<Result<(), CommandError>>;

/// Commands accepted by the engine. Each carries a responder that receives
/// exactly one terminal result.
#[derive(Debug)]
pub enum Command {
    WriteChannel {
        key: ChannelKey,
        value: ChannelValue,
        respond_to: CommandResponder,
    },
    InvokeEffect {
        device_id: String,
        effect_id: String,
        respond_to: CommandResponder,
    },
    InvokeScene {
        scene_id: String,
        /// Room or zone the recall is meant for; checked against the scene's
        /// own group before anything is written.
        scope_id: Option<String>,
        action: SceneAction,
        respond_to: CommandResponder,
    },
    /// Confirmed asynchronously: the response arrives only once the new name
    /// has been read back from the bridge, or verification gives up.
    RenameDevice {
        device_id: String,
        name: String,
        respond_to: CommandResponder,
    },
    Resync {
        respond_to: CommandResponder,
    },
    Stop,
}

#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub enum SceneAction {
    Activate,
    Deactivate,
    Dynamic,
}

impl SceneAction {
    /// Recall action value expected by the bridge.
    pub fn as_recall_action(&self) -> &'static str {
        match self {
            SceneAction::Activate => "active",
            SceneAction::Deactivate => "inactive",
            SceneAction::Dynamic => "dynamic_palette",
        }
    }
}

#[derive(Error, Debug)]
pub enum CommandError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error(transparent)]
    Bridge(#[from] BridgeError),
    #[error("superseded by a newer command")]
    Superseded,
    #[error("rename of device '{device_id}' was not confirmed after {attempts} checks")]
    RenameUnverified { device_id: String, attempts: u32 },
    #[error("the engine is shutting down")]
    Stopped,
}
