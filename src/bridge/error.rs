use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("bridge returned {status}: {description}")]
    Api { status: u16, description: String },
    #[error("malformed response: {0}")]
    Malformed(#[from] serde_json::Error),
}
