//! Tunables for the download orchestrator.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_ADDR: &str = "127.0.0.1:8080";
pub const DEFAULT_STORE_PATH: &str = "data/histdata.sqlite";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadConfig {
    /// Rows requested per exchange call, further capped by the exchange's own limit.
    pub target_rows_per_request: u32,
    pub max_retries: u32,
    /// Retry `n` (1-based) waits `retry_base_delay * 2^n`.
    pub retry_base_delay: Duration,
    pub chunk_pause: Duration,
    pub max_empty_chunks: u32,
    pub gap_fill_passes: u32,
    /// Persist progress every N imported chunks.
    pub progress_flush_every: u32,
    /// `None` leaves job concurrency unbounded.
    pub max_concurrent_jobs: Option<usize>,
    pub symbol_status_lookback_days: i64,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            target_rows_per_request: 900,
            max_retries: 5,
            retry_base_delay: Duration::from_millis(1_000),
            chunk_pause: Duration::from_millis(300),
            max_empty_chunks: 5,
            gap_fill_passes: 3,
            progress_flush_every: 1,
            max_concurrent_jobs: None,
            symbol_status_lookback_days: 5 * 365,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub addr: String,
    pub store_path: PathBuf,
    pub binance_base_url: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: DEFAULT_ADDR.to_string(),
            store_path: PathBuf::from(DEFAULT_STORE_PATH),
            binance_base_url: None,
        }
    }
}

pub fn download_config_from_env() -> DownloadConfig {
    let mut config = DownloadConfig::default();

    if let Some(rows) = env_parsed::<u32>("HISTDATA_TARGET_ROWS").filter(|v| *v > 0) {
        config.target_rows_per_request = rows;
    }
    if let Some(retries) = env_parsed::<u32>("HISTDATA_MAX_RETRIES") {
        config.max_retries = retries;
    }
    if let Some(ms) = env_parsed::<u64>("HISTDATA_RETRY_BASE_DELAY_MS") {
        config.retry_base_delay = Duration::from_millis(ms);
    }
    if let Some(ms) = env_parsed::<u64>("HISTDATA_CHUNK_PAUSE_MS") {
        config.chunk_pause = Duration::from_millis(ms);
    }
    if let Some(limit) = env_parsed::<u32>("HISTDATA_MAX_EMPTY_CHUNKS").filter(|v| *v > 0) {
        config.max_empty_chunks = limit;
    }
    if let Some(passes) = env_parsed::<u32>("HISTDATA_GAP_FILL_PASSES") {
        config.gap_fill_passes = passes;
    }
    if let Some(every) = env_parsed::<u32>("HISTDATA_PROGRESS_FLUSH_EVERY").filter(|v| *v > 0) {
        config.progress_flush_every = every;
    }
    if let Some(limit) = env_parsed::<usize>("HISTDATA_MAX_CONCURRENT_JOBS") {
        config.max_concurrent_jobs = (limit > 0).then_some(limit);
    }
    if let Some(days) = env_parsed::<i64>("HISTDATA_STATUS_LOOKBACK_DAYS").filter(|v| *v > 0) {
        config.symbol_status_lookback_days = days;
    }

    config
}

pub fn server_config_from_env() -> ServerConfig {
    let mut config = ServerConfig::default();

    if let Some(addr) = env_non_empty("HISTDATA_ADDR") {
        config.addr = addr;
    }
    if let Some(path) = env_non_empty("HISTDATA_STORE_PATH") {
        config.store_path = PathBuf::from(path);
    }
    config.binance_base_url = env_non_empty("HISTDATA_BINANCE_BASE_URL");

    config
}

pub(crate) fn env_non_empty(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|raw| raw.trim().to_string())
        .filter(|raw| !raw.is_empty())
}

pub(crate) fn env_parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
    env_non_empty(key).and_then(|raw| raw.parse::<T>().ok())
}

/// `1/true/yes/on` and `0/false/no/off`, case-insensitive. Anything else is unset.
pub(crate) fn env_flag(key: &str) -> Option<bool> {
    match env_non_empty(key)?.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::{logging_config_from_env, LogFormat, LoggingConfig};
    use std::sync::{Mutex, OnceLock};

    const KEYS: [&str; 15] = [
        "HISTDATA_LOG_LEVEL",
        "HISTDATA_LOG_FORMAT",
        "HISTDATA_LOG_TARGET",
        "HISTDATA_TARGET_ROWS",
        "HISTDATA_MAX_RETRIES",
        "HISTDATA_RETRY_BASE_DELAY_MS",
        "HISTDATA_CHUNK_PAUSE_MS",
        "HISTDATA_MAX_EMPTY_CHUNKS",
        "HISTDATA_GAP_FILL_PASSES",
        "HISTDATA_PROGRESS_FLUSH_EVERY",
        "HISTDATA_MAX_CONCURRENT_JOBS",
        "HISTDATA_STATUS_LOOKBACK_DAYS",
        "HISTDATA_ADDR",
        "HISTDATA_STORE_PATH",
        "HISTDATA_BINANCE_BASE_URL",
    ];

    fn env_lock() -> &'static Mutex<()> {
        static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn with_clean_env<R>(vars: &[(&str, &str)], f: impl FnOnce() -> R) -> R {
        let _guard = env_lock().lock().expect("env lock should not be poisoned");
        for key in KEYS {
            env::remove_var(key);
        }
        for (key, value) in vars {
            env::set_var(key, value);
        }
        let output = f();
        for key in KEYS {
            env::remove_var(key);
        }
        output
    }

    #[test]
    fn defaults_when_env_missing() {
        let cfg = with_clean_env(&[], download_config_from_env);
        assert_eq!(cfg, DownloadConfig::default());

        let server = with_clean_env(&[], server_config_from_env);
        assert_eq!(server, ServerConfig::default());
    }

    #[test]
    fn parses_overrides_and_ignores_garbage() {
        let cfg = with_clean_env(
            &[
                ("HISTDATA_TARGET_ROWS", "500"),
                ("HISTDATA_RETRY_BASE_DELAY_MS", "250"),
                ("HISTDATA_MAX_CONCURRENT_JOBS", "4"),
                ("HISTDATA_CHUNK_PAUSE_MS", "soon"),
                ("HISTDATA_MAX_EMPTY_CHUNKS", "0"),
            ],
            download_config_from_env,
        );

        assert_eq!(cfg.target_rows_per_request, 500);
        assert_eq!(cfg.retry_base_delay, Duration::from_millis(250));
        assert_eq!(cfg.max_concurrent_jobs, Some(4));
        assert_eq!(cfg.chunk_pause, Duration::from_millis(300));
        assert_eq!(cfg.max_empty_chunks, 5);
    }

    #[test]
    fn logging_config_reads_level_format_and_target() {
        let cfg = with_clean_env(
            &[
                ("HISTDATA_LOG_LEVEL", "histdata=debug,warn"),
                ("HISTDATA_LOG_FORMAT", "JSON"),
                ("HISTDATA_LOG_TARGET", "off"),
            ],
            logging_config_from_env,
        );
        assert_eq!(cfg.level, "histdata=debug,warn");
        assert_eq!(cfg.format, LogFormat::Json);
        assert!(!cfg.include_target);

        let fallback = with_clean_env(
            &[
                ("HISTDATA_LOG_LEVEL", "   "),
                ("HISTDATA_LOG_FORMAT", "logfmt"),
                ("HISTDATA_LOG_TARGET", "sometimes"),
            ],
            logging_config_from_env,
        );
        assert_eq!(fallback, LoggingConfig::default());
    }

    #[test]
    fn zero_concurrency_means_unbounded() {
        let cfg = with_clean_env(
            &[("HISTDATA_MAX_CONCURRENT_JOBS", "0")],
            download_config_from_env,
        );
        assert_eq!(cfg.max_concurrent_jobs, None);
    }

    #[test]
    fn server_config_reads_addr_store_and_base_url() {
        let cfg = with_clean_env(
            &[
                ("HISTDATA_ADDR", "0.0.0.0:9000"),
                ("HISTDATA_STORE_PATH", "/tmp/h.sqlite"),
                ("HISTDATA_BINANCE_BASE_URL", "http://127.0.0.1:9999"),
            ],
            server_config_from_env,
        );
        assert_eq!(cfg.addr, "0.0.0.0:9000");
        assert_eq!(cfg.store_path, PathBuf::from("/tmp/h.sqlite"));
        assert_eq!(cfg.binance_base_url.as_deref(), Some("http://127.0.0.1:9999"));
    }
}
