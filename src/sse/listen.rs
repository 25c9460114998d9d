use crate::sse::envelope::EventEnvelope;
use crate::sse::server_sent_event::ServerSentEvent;
use futures::StreamExt;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc::Sender;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, instrument, warn};

/// What the transport reports to the engine. `Connected`/`Disconnected`
/// bracket every connection attempt so the engine can relax or tighten its
/// periodic resync accordingly.
#[derive(Debug, PartialEq)]
pub enum StreamNotice {
    Connected,
    Disconnected,
    Events(Vec<EventEnvelope>),
}

#[derive(Debug)]
pub struct StreamConfig {
    pub url: String,
    pub quick_retries: u32,
    pub quick_retry_delay: Duration,
    pub long_retry_delay: Duration,
    pub stale_connection_timeout: Duration,
}

/// Runs until the engine side of the channel is dropped. A connection that
/// delivered at least one frame resets the retry counter; after
/// `quick_retries` fruitless attempts the delay switches to the long interval.
#[instrument(skip_all)]
pub async fn listen(tx: Sender<StreamNotice>, client: Client, config: StreamConfig) {
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        match connect_sse_stream(&tx, &client, &config).await {
            Ok(delivered) => {
                warn!("🔴 SSE stream ended");
                if delivered {
                    attempt = 0;
                }
            }
            Err(StreamError::EngineGone) => return,
            Err(e) => warn!("⚠️ SSE error: {}. Retrying...", e),
        }

        if tx.send(StreamNotice::Disconnected).await.is_err() {
            return;
        }

        sleep(retry_delay(attempt, &config)).await;
    }
}

/// The first `quick_retries` failed attempts reconnect quickly; from then on
/// the long interval applies until a connection delivers a frame again.
fn retry_delay(attempt: u32, config: &StreamConfig) -> Duration {
    if attempt <= config.quick_retries {
        config.quick_retry_delay
    } else {
        config.long_retry_delay
    }
}

async fn connect_sse_stream(tx: &Sender<StreamNotice>, client: &Client, config: &StreamConfig) -> Result<bool, StreamError> {
    let url = format!("{}/eventstream/clip/v2", config.url);
    info!("Connecting to SSE stream {}...", url);
    let response = client
        .get(&url)
        .header("Accept", "text/event-stream")
        .send()
        .await?
        .error_for_status()?;

    if response.status() == StatusCode::OK {
        info!(status = %response.status(), "Connecting to SSE stream {}... OK", url);
    }
    tx.send(StreamNotice::Connected).await.map_err(|_| StreamError::EngineGone)?;

    let mut delivered = false;
    let mut stream = response.bytes_stream();
    loop {
        let chunk = timeout(config.stale_connection_timeout, stream.next()).await;
        match chunk {
            Ok(Some(Ok(chunk))) => {
                let Ok(text) = String::from_utf8(chunk.to_vec()) else {
                    continue;
                };
                match ServerSentEvent::<Vec<EventEnvelope>>::from_str(&text) {
                    Ok(event) => {
                        debug!(event = text.trim(), "🔸 Received event");
                        if let Some(envelopes) = event.data {
                            delivered = true;
                            tx.send(StreamNotice::Events(envelopes)).await.map_err(|_| StreamError::EngineGone)?;
                        }
                    }
                    Err(e) => warn!("⚠️ Skipping undecodable event frame: {}", e),
                }
            }
            Ok(Some(Err(e))) => return Err(e.into()),
            Ok(None) => return Ok(delivered),
            Err(_) => {
                warn!("⏳ No data for {} seconds. Reconnecting...", config.stale_connection_timeout.as_secs());
                return Err(StreamError::Stale);
            }
        }
    }
}

#[derive(Error, Debug)]
enum StreamError {
    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),
    #[error("connection went stale")]
    Stale,
    #[error("engine channel closed")]
    EngineGone,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use tokio::sync::mpsc;

    fn test_config(url: String) -> StreamConfig {
        StreamConfig {
            url,
            quick_retries: 5,
            quick_retry_delay: Duration::from_millis(1),
            long_retry_delay: Duration::from_millis(5),
            stale_connection_timeout: Duration::from_millis(200),
        }
    }

    #[rstest]
    #[case(1, Duration::from_millis(1))]
    #[case(4, Duration::from_millis(1))]
    #[case(5, Duration::from_millis(1))]
    #[case(6, Duration::from_millis(5))]
    #[case(20, Duration::from_millis(5))]
    fn grants_the_configured_number_of_quick_reconnects(#[case] attempt: u32, #[case] expected: Duration) {
        let config = test_config("https://bridge.local".to_string());

        assert_eq!(retry_delay(attempt, &config), expected);
    }

    #[tokio::test]
    async fn reports_connected_and_delivers_frames() {
        let mut server = mockito::Server::new_async().await;
        let body = concat!(
            "id: 0\n",
            "data: [{ \"creationtime\": \"2025-03-07T19:13:41Z\", \"data\": [], \"id\": \"e1\", \"type\": \"update\" }]\n",
        );
        server
            .mock("GET", "/eventstream/clip/v2")
            .match_header("accept", "text/event-stream")
            .with_status(200)
            .with_body(body)
            .create_async()
            .await;

        let (tx, mut rx) = mpsc::channel(8);
        let client = Client::new();
        let config = test_config(server.url());
        let handle = tokio::spawn(async move { listen(tx, client, config).await });

        assert_eq!(rx.recv().await, Some(StreamNotice::Connected));
        match rx.recv().await {
            Some(StreamNotice::Events(envelopes)) => {
                assert_eq!(envelopes.len(), 1);
                assert_eq!(envelopes[0].id, "e1");
            }
            other => panic!("expected an events notice, got {:?}", other),
        }
        // The body ends after one frame, so a disconnect follows
        assert_eq!(rx.recv().await, Some(StreamNotice::Disconnected));

        handle.abort();
    }

    #[tokio::test]
    async fn stops_once_the_engine_channel_is_dropped() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/eventstream/clip/v2")
            .with_status(500)
            .expect_at_least(1)
            .create_async()
            .await;

        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let client = Client::new();
        let config = test_config(server.url());

        // Returns instead of retrying forever
        listen(tx, client, config).await;
    }
}
