use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, instrument};

const LINK_BUTTON_NOT_PRESSED: i64 = 101;

#[derive(PartialEq, Debug)]
pub struct ApplicationKey {
    pub application_key: String,
    pub client_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PairEntry {
    success: Option<PairSuccess>,
    error: Option<PairFailure>,
}

#[derive(Debug, Deserialize)]
struct PairSuccess {
    username: String,
    clientkey: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PairFailure {
    r#type: i64,
    description: String,
}

/// One-shot pairing call, run before the engine starts when no application
/// key is configured. The user must press the bridge's physical link button
/// shortly before this is called.
#[instrument(skip_all)]
pub async fn create_application_key(base_url: &str, device_name: &str, timeout: Duration) -> Result<ApplicationKey, PairError> {
    info!("Requesting an application key from {}...", base_url);

    let client = Client::builder().danger_accept_invalid_certs(true).timeout(timeout).build()?;
    let payload = serde_json::json!({
        "devicetype": format!("ember#{}", device_name),
        "generateclientkey": true,
    });

    let response = client.post(format!("{}/api", base_url)).json(&payload).send().await?.error_for_status()?;
    let entries = response.json::<Vec<PairEntry>>().await?;

    for entry in entries {
        if let Some(success) = entry.success {
            info!("Requesting an application key from {}... OK", base_url);
            return Ok(ApplicationKey {
                application_key: success.username,
                client_key: success.clientkey,
            });
        }
        if let Some(failure) = entry.error {
            if failure.r#type == LINK_BUTTON_NOT_PRESSED {
                return Err(PairError::LinkButtonNotPressed);
            }
            return Err(PairError::Rejected(failure.description));
        }
    }

    Err(PairError::EmptyResponse)
}

#[derive(Error, Debug)]
pub enum PairError {
    #[error("Press the link button on the bridge, then retry.")]
    LinkButtonNotPressed,
    #[error("pairing rejected: {0}")]
    Rejected(String),
    #[error("the bridge returned neither a key nor an error")]
    EmptyResponse,
    #[error("request error: {0}")]
    RequestError(#[from] reqwest::Error),
}
