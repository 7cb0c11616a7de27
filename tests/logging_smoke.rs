use std::io;
use std::io::Write;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use chrono::{TimeZone, Utc};
use histdata::{
    download_router, log_app_bind, log_app_start, log_store_opened, DataSource, DateRange,
    DownloadConfig, DownloadJobManager, DownloadRequest, ExchangeClient, ExchangeError,
    ExchangeSymbol, JobStatus, Kline, LoggingConfig, SqliteStore, Timeframe,
};
use tower::util::ServiceExt;
use tracing::dispatcher::with_default;
use tracing::Level;
use tracing_subscriber::fmt::writer::MakeWriter;

#[derive(Clone, Default)]
struct SharedWriter {
    inner: Arc<Mutex<Vec<u8>>>,
}

impl SharedWriter {
    fn output_string(&self) -> String {
        let bytes = self
            .inner
            .lock()
            .expect("writer lock should not be poisoned");
        String::from_utf8_lossy(&bytes).to_string()
    }
}

struct SharedWriterGuard {
    inner: Arc<Mutex<Vec<u8>>>,
}

impl<'a> MakeWriter<'a> for SharedWriter {
    type Writer = SharedWriterGuard;

    fn make_writer(&'a self) -> Self::Writer {
        SharedWriterGuard {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Write for SharedWriterGuard {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut out = self
            .inner
            .lock()
            .expect("writer lock should not be poisoned");
        out.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn capture_logs(max_level: Level, f: impl FnOnce()) -> String {
    let writer = SharedWriter::default();
    let subscriber = tracing_subscriber::fmt()
        .json()
        .with_ansi(false)
        .with_max_level(max_level)
        .with_writer(writer.clone())
        .finish();
    let dispatch = tracing::Dispatch::new(subscriber);

    with_default(&dispatch, f);
    writer.output_string()
}

fn block_on<F: std::future::Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("single-thread runtime should build")
        .block_on(future)
}

/// Serves one full chunk per request; fails every request when `failing` is set.
struct OneShotExchange {
    failing: bool,
}

#[async_trait]
impl ExchangeClient for OneShotExchange {
    fn source(&self) -> DataSource {
        DataSource::Binance
    }

    fn interval_code(&self, timeframe: Timeframe) -> Option<&'static str> {
        Some(timeframe.as_str())
    }

    fn max_rows_per_request(&self) -> u32 {
        1000
    }

    async fn list_symbols(&self) -> Result<Vec<ExchangeSymbol>, ExchangeError> {
        Ok(vec![ExchangeSymbol {
            symbol: "ETHUSDT".to_string(),
            status: "TRADING".to_string(),
            base_asset: "ETH".to_string(),
            quote_asset: "USDT".to_string(),
            is_spot_trading_allowed: true,
        }])
    }

    async fn fetch_klines(
        &self,
        _symbol: &str,
        timeframe: Timeframe,
        window: DateRange,
        _limit: u32,
    ) -> Result<Vec<Kline>, ExchangeError> {
        if self.failing {
            return Err(ExchangeError::Timeout {
                url: "http://exchange.test/api/v3/klines".to_string(),
            });
        }
        let step = timeframe.duration();
        let mut rows = Vec::new();
        let mut open = window.start;
        while open < window.end {
            rows.push(Kline {
                open_time_ms: open.timestamp_millis(),
                open: 10.0,
                high: 11.0,
                low: 9.0,
                close: 10.5,
                volume: 1.0,
                close_time_ms: (open + step).timestamp_millis() - 1,
            });
            open += step;
        }
        Ok(rows)
    }
}

fn manager(failing: bool) -> DownloadJobManager {
    let store = Arc::new(SqliteStore::open_in_memory().expect("store"));
    let config = DownloadConfig {
        chunk_pause: Duration::ZERO,
        retry_base_delay: Duration::ZERO,
        ..DownloadConfig::default()
    };
    DownloadJobManager::new(store, config).with_exchange(Arc::new(OneShotExchange { failing }))
}

fn eth_request(source: &str) -> DownloadRequest {
    DownloadRequest {
        symbol: "ETHUSDT".to_string(),
        source: source.to_string(),
        timeframe: "1h".to_string(),
        start_date: Utc.with_ymd_and_hms(2023, 3, 1, 0, 0, 0).unwrap(),
        end_date: Utc.with_ymd_and_hms(2023, 3, 2, 0, 0, 0).unwrap(),
    }
}

#[test]
fn server_lifecycle_helpers_emit_baseline_events() {
    let logs = capture_logs(Level::INFO, || {
        let cfg = LoggingConfig::default();
        log_app_start("download_server", &cfg);
        log_store_opened("download_server", Path::new("data/histdata.sqlite"));
        log_app_bind(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 8080));
    });

    assert!(logs.contains("\"event\":\"app.start\""));
    assert!(logs.contains("\"event\":\"store.opened\""));
    assert!(logs.contains("\"event\":\"app.bind\""));
    assert!(logs.contains("\"route_prefix\":\"/api/v1/market-data\""));
}

#[test]
fn job_lifecycle_emits_accept_start_and_finish_events() {
    let logs = capture_logs(Level::INFO, || {
        block_on(async {
            let manager = manager(false);
            let handle = manager.submit(&eth_request("BINANCE")).await.expect("submit");
            let outcome = handle
                .task
                .await
                .expect("worker task should join")
                .expect("worker should report an outcome");
            assert_eq!(outcome.status, JobStatus::Completed);
            assert_eq!(outcome.processed_candles, 24);
        });
    });

    assert!(logs.contains("\"event\":\"exchange.registered\""));
    assert!(logs.contains("\"event\":\"symbol.created\""));
    assert!(logs.contains("\"event\":\"download.accepted\""));
    assert!(logs.contains("\"event\":\"job.start\""));
    assert!(logs.contains("\"event\":\"job.finish\""));
}

#[test]
fn retries_are_logged_as_warnings_before_the_chunk_is_skipped() {
    let logs = capture_logs(Level::INFO, || {
        block_on(async {
            let manager = manager(true);
            let handle = manager.submit(&eth_request("BINANCE")).await.expect("submit");
            let outcome = handle
                .task
                .await
                .expect("worker task should join")
                .expect("worker should report an outcome");
            assert_eq!(outcome.status, JobStatus::Partial);
        });
    });

    assert!(logs.contains("\"event\":\"job.chunk.retry\""));
    assert!(logs.contains("\"level\":\"WARN\""));
    assert!(logs.contains("\"event\":\"job.chunk.skipped\""));
}

#[test]
fn job_for_source_without_client_logs_failure() {
    let logs = capture_logs(Level::INFO, || {
        block_on(async {
            let manager = manager(false);
            let handle = manager.submit(&eth_request("YAHOO")).await.expect("submit");
            let outcome = handle
                .task
                .await
                .expect("worker task should join")
                .expect("worker should report an outcome");
            assert_eq!(outcome.status, JobStatus::Failed);
        });
    });

    assert!(logs.contains("\"event\":\"job.failed\""));
}

#[test]
fn cancel_route_emits_cancel_event() {
    let logs = capture_logs(Level::INFO, || {
        block_on(async {
            let manager = Arc::new(manager(false));
            let job_id = manager
                .initiate_download(&eth_request("BINANCE"))
                .await
                .expect("submit");
            let app = download_router(Arc::clone(&manager));

            let response = app
                .oneshot(
                    Request::builder()
                        .method("DELETE")
                        .uri(format!("/api/v1/market-data/downloads/{job_id}"))
                        .body(Body::empty())
                        .expect("request should build"),
                )
                .await
                .expect("cancel request should succeed");

            assert_eq!(response.status(), StatusCode::OK);
        });
    });

    assert!(logs.contains("\"event\":\"download.cancel\""));
}
