use once_cell::sync::Lazy;
use std::time::Duration;

#[derive(Debug)]
pub struct Config {
    pub read_timeout_ms: u64,
    pub write_timeout_ms: u64,
    pub poll_backoff_ms: u64,
    pub poll_interval_secs: u64,
    pub log_frames: bool,
    pub dump_on_error: bool,
}

impl Config {
    fn from_env() -> Self {
        let read_timeout_ms = env_parse("IMMERGAS_READ_TIMEOUT_MS").unwrap_or(300u64);
        let write_timeout_ms = env_parse("IMMERGAS_WRITE_TIMEOUT_MS").unwrap_or(500u64);
        let poll_backoff_ms = env_parse("IMMERGAS_POLL_BACKOFF_MS").unwrap_or(5u64);
        let poll_interval_secs = env_parse("IMMERGAS_POLL_INTERVAL_SECS").unwrap_or(15u64);
        let log_frames = std::env::var("IMMERGAS_LOG_FRAMES")
            .map(|v| v == "1")
            .unwrap_or(false);
        let dump_on_error = std::env::var("IMMERGAS_DUMP_ON_ERROR")
            .map(|v| v == "1")
            .unwrap_or(false);
        Self {
            read_timeout_ms,
            write_timeout_ms,
            poll_backoff_ms,
            poll_interval_secs,
            log_frames,
            dump_on_error,
        }
    }

    #[must_use]
    pub const fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    #[must_use]
    pub const fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    #[must_use]
    pub const fn poll_backoff(&self) -> Duration {
        Duration::from_millis(self.poll_backoff_ms)
    }

    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}

/// Global config loaded once from environment at first access.
pub static GLOBAL_CONFIG: Lazy<Config> = Lazy::new(Config::from_env);

/// Convenience accessor
pub fn config() -> &'static Config {
    &GLOBAL_CONFIG
}
