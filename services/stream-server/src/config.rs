use std::env;
use std::time::Duration;

/// Process-wide configuration, read once at startup and immutable after
/// init.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: String,
    pub log_level: String,

    pub segment_max_messages: u32,
    pub segment_max_bytes: u64,
    pub session_ttl_seconds: i64,

    pub fanout_subscriber_threshold: usize,
    pub fanout_retry_base_seconds: u64,
    pub fanout_retry_max_seconds: u64,
    pub fanout_retry_max_attempts: u32,

    pub max_append_bytes: u64,
    pub max_chunk_bytes: u64,
    pub long_poll_timeout_ms: u64,
    pub sse_idle_timeout_seconds: u64,
    pub read_coalesce_window_ms: u64,

    /// Passed through to the edge layer; never consulted by the engine.
    pub auth_token: Option<String>,
    pub read_jwt_secret: Option<String>,

 /// "retain ops" debug flag. Only meaningful in debug/test builds.
    pub retain_ops: bool,
}

fn env_var(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_owned())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Self {
        let retain_ops = env_parse("STREAM_RETAIN_OPS", false);
        #[cfg(not(any(debug_assertions, test)))]
        let retain_ops = {
            if retain_ops {
                tracing::warn!("STREAM_RETAIN_OPS is ignored in release builds");
            }
            false
        };

        Config {
            database_url: env::var("DATABASE_URL").expect("DATABASE_URL must be set"),
            bind_addr: env_var("BIND_ADDR", "0.0.0.0:8080"),
            log_level: env_var("LOG_LEVEL", "info"),

            segment_max_messages: env_parse("SEGMENT_MAX_MESSAGES", 1000),
            segment_max_bytes: env_parse("SEGMENT_MAX_BYTES", 4 * 1024 * 1024),
            session_ttl_seconds: env_parse("SESSION_TTL_SECONDS", 86_400),

            fanout_subscriber_threshold: env_parse("FANOUT_SUBSCRIBER_THRESHOLD", 20),
            fanout_retry_base_seconds: env_parse("FANOUT_RETRY_BASE_SECONDS", 5),
            fanout_retry_max_seconds: env_parse("FANOUT_RETRY_MAX_SECONDS", 900),
            fanout_retry_max_attempts: env_parse("FANOUT_RETRY_MAX_ATTEMPTS", 5),

            max_append_bytes: env_parse("MAX_APPEND_BYTES", 8 * 1024 * 1024),
            max_chunk_bytes: env_parse("MAX_CHUNK_BYTES", 256 * 1024),
            long_poll_timeout_ms: env_parse("LONG_POLL_TIMEOUT_MS", 20_000),
            sse_idle_timeout_seconds: env_parse("SSE_IDLE_TIMEOUT_SECONDS", 55),
            read_coalesce_window_ms: env_parse("READ_COALESCE_WINDOW_MS", 25),

            auth_token: env::var("AUTH_TOKEN").ok(),
            read_jwt_secret: env::var("READ_JWT_SECRET").ok(),

            retain_ops,
        }
    }

    pub fn long_poll_timeout(&self) -> Duration {
        Duration::from_millis(self.long_poll_timeout_ms)
    }

    pub fn sse_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.sse_idle_timeout_seconds)
    }

    pub fn read_coalesce_window(&self) -> Duration {
        Duration::from_millis(self.read_coalesce_window_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_parse_falls_back_to_default_on_missing_or_bad_value() {
        assert_eq!(env_parse::<u32>("DEFINITELY_UNSET_VAR_XYZ", 42), 42);
    }
}
