use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use histdata::{
    download_router, DataSource, DateRange, DownloadConfig, DownloadJobManager, ExchangeClient,
    ExchangeError, ExchangeSymbol, JobId, JobStatus, Kline, SqliteStore, Timeframe,
};
use serde_json::Value;
use tower::util::ServiceExt;

struct FixtureExchange;

#[async_trait]
impl ExchangeClient for FixtureExchange {
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
        Ok(vec![
            ExchangeSymbol {
                symbol: "BTCUSDT".to_string(),
                status: "TRADING".to_string(),
                base_asset: "BTC".to_string(),
                quote_asset: "USDT".to_string(),
                is_spot_trading_allowed: true,
            },
            ExchangeSymbol {
                symbol: "OLDUSDT".to_string(),
                status: "BREAK".to_string(),
                base_asset: "OLD".to_string(),
                quote_asset: "USDT".to_string(),
                is_spot_trading_allowed: true,
            },
        ])
    }

    async fn fetch_klines(
        &self,
        _symbol: &str,
        timeframe: Timeframe,
        window: DateRange,
        limit: u32,
    ) -> Result<Vec<Kline>, ExchangeError> {
        let step = timeframe.duration();
        let mut rows = Vec::new();
        let mut open = window.start;
        while open < window.end && rows.len() < limit as usize {
            rows.push(Kline {
                open_time_ms: open.timestamp_millis(),
                open: 1.0,
                high: 1.5,
                low: 0.5,
                close: 1.2,
                volume: 3.0,
                close_time_ms: (open + step).timestamp_millis() - 1,
            });
            open += step;
        }
        Ok(rows)
    }
}

fn day(d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2023, 1, d, 0, 0, 0)
        .single()
        .expect("valid timestamp")
}

fn app() -> (Arc<DownloadJobManager>, Router) {
    let store = Arc::new(SqliteStore::open_in_memory().expect("store"));
    let manager = Arc::new(
        DownloadJobManager::new(store, DownloadConfig::default())
            .with_exchange(Arc::new(FixtureExchange)),
    );
    let router = download_router(manager.clone());
    (manager, router)
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

async fn wait_until_terminal(manager: &DownloadJobManager, job_id: JobId) -> JobStatus {
    for _ in 0..1_000 {
        let status = manager.get_status(job_id).unwrap().status;
        if matches!(
            status,
            JobStatus::Completed | JobStatus::Partial | JobStatus::Failed | JobStatus::Cancelled
        ) {
            return status;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("job {job_id} never reached a terminal status");
}

fn download_body(symbol: &str, timeframe: &str) -> Value {
    serde_json::json!({
        "symbol": symbol,
        "source": "BINANCE",
        "timeframe": timeframe,
        "start_date": day(1).to_rfc3339(),
        "end_date": day(10).to_rfc3339(),
    })
}

#[tokio::test(start_paused = true)]
async fn submitted_download_is_visible_through_status_and_reports() {
    let (manager, app) = app();

    let (status, body) = send(
        &app,
        "POST",
        "/api/v1/market-data/downloads",
        Some(download_body("btcusdt", "1h")),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let job_id = body["job_id"].as_i64().expect("job id");

    assert_eq!(wait_until_terminal(&manager, job_id).await, JobStatus::Completed);

    let (status, job) = send(
        &app,
        "GET",
        &format!("/api/v1/market-data/downloads/{job_id}/status"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(job["symbol"], "BTCUSDT");
    assert_eq!(job["status"], "completed");
    assert_eq!(job["timeframe"], "1h");
    assert_eq!(job["processed_candles"], 216);

    let (status, summary) = send(&app, "GET", "/api/v1/market-data/downloads/summary", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(summary["status_counts"]["completed"]["total"], 1);
    assert_eq!(summary["source_counts"]["BINANCE"], 1);
    assert_eq!(summary["recent_jobs"].as_array().map(Vec::len), Some(1));

    let (status, active) = send(
        &app,
        "GET",
        "/api/v1/market-data/downloads/active?source=BINANCE&sort_by=progress&sort_direction=asc&limit=500",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(active["total"], 0);
    assert_eq!(active["limit"], 100);

    let (status, inventory) = send(
        &app,
        "GET",
        "/api/v1/market-data/inventory?asset_type=crypto&exchange=Binance",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(inventory["total"], 1);
    assert_eq!(inventory["limit"], 20);
    assert_eq!(inventory["items"][0]["candle_count"], 216);

    let (status, symbol_status) = send(
        &app,
        "GET",
        "/api/v1/market-data/downloads/symbols/BTCUSDT/status?timeframe=1h",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(symbol_status["has_data"], true);
    assert_eq!(
        symbol_status["available_data"].as_array().map(Vec::len),
        Some(1)
    );
}

#[tokio::test(start_paused = true)]
async fn cancel_route_reports_whether_anything_changed() {
    let (manager, app) = app();
    let (_, body) = send(
        &app,
        "POST",
        "/api/v1/market-data/downloads",
        Some(download_body("BTCUSDT", "1h")),
    )
    .await;
    let job_id = body["job_id"].as_i64().expect("job id");
    wait_until_terminal(&manager, job_id).await;

    let uri = format!("/api/v1/market-data/downloads/{job_id}");
    let (status, body) = send(&app, "DELETE", &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["cancelled"], false);
    assert_eq!(body["already_done"], true);
    assert_eq!(body["status"], "completed");

    let (status, body) = send(&app, "DELETE", &format!("{uri}?force=true"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["cancelled"], true);
    assert_eq!(body["previous_status"], "completed");
    assert_eq!(
        manager.get_status(job_id).unwrap().status,
        JobStatus::Cancelled
    );

    let (status, _) = send(&app, "DELETE", "/api/v1/market-data/downloads/4242", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn invalid_input_maps_to_client_errors() {
    let (_manager, app) = app();

    let (status, body) = send(
        &app,
        "POST",
        "/api/v1/market-data/downloads",
        Some(download_body("BTCUSDT", "2h")),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"]
        .as_str()
        .is_some_and(|msg| msg.contains("unsupported timeframe")));

    let mut reversed = download_body("BTCUSDT", "1h");
    reversed["end_date"] = Value::String((day(1) - ChronoDuration::days(1)).to_rfc3339());
    let (status, _) = send(&app, "POST", "/api/v1/market-data/downloads", Some(reversed)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&app, "GET", "/api/v1/market-data/downloads/77/status", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(
        &app,
        "GET",
        "/api/v1/market-data/downloads/active?source=KRAKEN",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &app,
        "GET",
        "/api/v1/market-data/downloads/symbols/BTCUSDT/status?timeframe=7m",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &app,
        "GET",
        "/api/v1/market-data/downloads/sources/YAHOO/symbols",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn source_symbols_route_lists_only_tradable_pairs() {
    let (_manager, app) = app();

    let (status, body) = send(
        &app,
        "GET",
        "/api/v1/market-data/downloads/sources/binance/symbols",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let symbols = body.as_array().expect("array body");
    assert_eq!(symbols.len(), 1);
    assert_eq!(symbols[0]["symbol"], "BTCUSDT");

    let (status, body) = send(
        &app,
        "GET",
        "/api/v1/market-data/downloads/symbols/ETHUSDT/status",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["has_data"], false);
    assert!(body["symbol_id"].is_null());
}
