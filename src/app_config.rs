use config::Config;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    core: Core,
    bridge: Bridge,
    sync: Sync,
    stream: Stream,
    interaction: Interaction,
}

impl AppConfig {
    pub fn load() -> Self {
        Config::builder()
            .add_source(config::File::with_name("config").required(true))
            .add_source(config::File::with_name("config_local").required(false))
            .add_source(config::Environment::default())
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    pub fn core(&self) -> &Core {
        &self.core
    }

    pub fn bridge(&self) -> &Bridge {
        &self.bridge
    }

    pub fn sync(&self) -> &Sync {
        &self.sync
    }

    pub fn stream(&self) -> &Stream {
        &self.stream
    }

    pub fn interaction(&self) -> &Interaction {
        &self.interaction
    }
}

#[derive(Debug, Deserialize)]
pub struct Core {
    event_buffer_size: usize,
    command_buffer_size: usize,
}

impl Core {
    pub fn event_buffer_size(&self) -> usize {
        self.event_buffer_size
    }

    pub fn command_buffer_size(&self) -> usize {
        self.command_buffer_size
    }
}

#[derive(Debug, Deserialize)]
pub struct Bridge {
    url: String,
    application_key: Option<String>,
    device_name: String,
    request_timeout_ms: u64,
    pair_timeout_ms: u64,
}

impl Bridge {
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn application_key(&self) -> Option<&str> {
        self.application_key.as_deref().filter(|key| !key.is_empty())
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn pair_timeout(&self) -> Duration {
        Duration::from_millis(self.pair_timeout_ms)
    }
}

#[derive(Debug, Deserialize)]
pub struct Sync {
    snapshot_stagger_ms: u64,
    button_extra_delay_ms: u64,
    snapshot_retry_base_ms: u64,
    resync_debounce_ms: u64,
    #[serde(with = "humantime_serde")]
    resync_interval_streaming: Duration,
    #[serde(with = "humantime_serde")]
    resync_interval_polling: Duration,
    device_fetch_limit: usize,
    device_fetch_spacing_ms: u64,
}

impl Sync {
    pub fn snapshot_stagger(&self) -> Duration {
        Duration::from_millis(self.snapshot_stagger_ms)
    }

    /// Extra delay before the button snapshot, which the bridge rate-limits
    /// more aggressively than the other types.
    pub fn button_extra_delay(&self) -> Duration {
        Duration::from_millis(self.button_extra_delay_ms)
    }

    pub fn snapshot_retry_base(&self) -> Duration {
        Duration::from_millis(self.snapshot_retry_base_ms)
    }

    pub fn resync_debounce(&self) -> Duration {
        Duration::from_millis(self.resync_debounce_ms)
    }

    pub fn resync_interval_streaming(&self) -> Duration {
        self.resync_interval_streaming
    }

    pub fn resync_interval_polling(&self) -> Duration {
        self.resync_interval_polling
    }

    pub fn device_fetch_limit(&self) -> usize {
        self.device_fetch_limit
    }

    pub fn device_fetch_spacing(&self) -> Duration {
        Duration::from_millis(self.device_fetch_spacing_ms)
    }
}

#[derive(Debug, Deserialize)]
pub struct Stream {
    quick_retries: u32,
    quick_retry_delay_ms: u64,
    long_retry_delay_ms: u64,
    stale_connection_timeout_ms: u64,
}

impl Stream {
    pub fn quick_retries(&self) -> u32 {
        self.quick_retries
    }

    pub fn quick_retry_delay(&self) -> Duration {
        Duration::from_millis(self.quick_retry_delay_ms)
    }

    pub fn long_retry_delay(&self) -> Duration {
        Duration::from_millis(self.long_retry_delay_ms)
    }

    pub fn stale_connection_timeout(&self) -> Duration {
        Duration::from_millis(self.stale_connection_timeout_ms)
    }
}

#[derive(Debug, Deserialize)]
pub struct Interaction {
    multi_press_window_ms: u64,
    press_reset_gap_ms: u64,
    dial_reset_ms: u64,
    rename_verify_delay_ms: u64,
    rename_verify_attempts: u32,
}

impl Interaction {
    pub fn multi_press_window(&self) -> Duration {
        Duration::from_millis(self.multi_press_window_ms)
    }

    pub fn press_reset_gap_ms(&self) -> i64 {
        self.press_reset_gap_ms as i64
    }

    pub fn dial_reset(&self) -> Duration {
        Duration::from_millis(self.dial_reset_ms)
    }

    pub fn rename_verify_delay(&self) -> Duration {
        Duration::from_millis(self.rename_verify_delay_ms)
    }

    pub fn rename_verify_attempts(&self) -> u32 {
        self.rename_verify_attempts
    }
}

#[cfg(test)]
pub struct AppConfigBuilder {
    config: AppConfig,
}

#[cfg(test)]
impl AppConfigBuilder {
    pub fn new() -> Self {
        AppConfigBuilder {
            config: AppConfig {
                core: Core {
                    event_buffer_size: 16,
                    command_buffer_size: 16,
                },
                bridge: Bridge {
                    url: "https://bridge.local".to_string(),
                    application_key: Some("key".to_string()),
                    device_name: "test".to_string(),
                    request_timeout_ms: 1_000,
                    pair_timeout_ms: 1_000,
                },
                sync: Sync {
                    snapshot_stagger_ms: 0,
                    button_extra_delay_ms: 0,
                    snapshot_retry_base_ms: 1,
                    resync_debounce_ms: 5,
                    resync_interval_streaming: Duration::from_secs(60),
                    resync_interval_polling: Duration::from_secs(1),
                    device_fetch_limit: 4,
                    device_fetch_spacing_ms: 0,
                },
                stream: Stream {
                    quick_retries: 5,
                    quick_retry_delay_ms: 1,
                    long_retry_delay_ms: 5,
                    stale_connection_timeout_ms: 30_000,
                },
                interaction: Interaction {
                    multi_press_window_ms: 40,
                    press_reset_gap_ms: 20,
                    dial_reset_ms: 10,
                    rename_verify_delay_ms: 5,
                    rename_verify_attempts: 3,
                },
            },
        }
    }

    pub fn bridge_url(mut self, url: String) -> Self {
        self.config.bridge.url = url;
        self
    }

    pub fn application_key(mut self, key: Option<String>) -> Self {
        self.config.bridge.application_key = key;
        self
    }

    pub fn multi_press_window_ms(mut self, ms: u64) -> Self {
        self.config.interaction.multi_press_window_ms = ms;
        self
    }

    pub fn resync_debounce_ms(mut self, ms: u64) -> Self {
        self.config.sync.resync_debounce_ms = ms;
        self
    }

    pub fn build(self) -> AppConfig {
        self.config
    }
}
