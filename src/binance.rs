//! Binance spot REST implementation of [`ExchangeClient`].

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::exchange::{ExchangeClient, ExchangeError, ExchangeSymbol, Kline};
use crate::model::{DataSource, DateRange, Timeframe};

pub const BINANCE_REST_BASE_URL: &str = "https://api.binance.com";
const BINANCE_MAX_ROWS: u32 = 1000;
const DEFAULT_TIMEOUT_MS: u64 = 15_000;
const KLINE_MIN_COLUMNS: usize = 7;

#[derive(Debug, Clone)]
pub struct BinanceClient {
    http: reqwest::Client,
    base_url: String,
}

impl BinanceClient {
    pub fn new() -> Result<Self, ExchangeError> {
        Self::with_base_url(BINANCE_REST_BASE_URL, DEFAULT_TIMEOUT_MS)
    }

    pub fn with_base_url(base_url: &str, timeout_ms: u64) -> Result<Self, ExchangeError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .map_err(|err| ExchangeError::ClientBuild(err.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get_bytes(&self, url: &str) -> Result<Vec<u8>, ExchangeError> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|err| request_error(url, &err))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|err| request_error(url, &err))?;

        if !status.is_success() {
            return Err(ExchangeError::Status {
                url: url.to_string(),
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body).chars().take(256).collect(),
            });
        }

        Ok(body.to_vec())
    }
}

#[async_trait]
impl ExchangeClient for BinanceClient {
    fn source(&self) -> DataSource {
        DataSource::Binance
    }

    fn interval_code(&self, timeframe: Timeframe) -> Option<&'static str> {
        Some(match timeframe {
            Timeframe::M1 => "1m",
            Timeframe::M5 => "5m",
            Timeframe::M15 => "15m",
            Timeframe::M30 => "30m",
            Timeframe::H1 => "1h",
            Timeframe::H4 => "4h",
            Timeframe::D1 => "1d",
            Timeframe::W1 => "1w",
        })
    }

    fn max_rows_per_request(&self) -> u32 {
        BINANCE_MAX_ROWS
    }

    async fn list_symbols(&self) -> Result<Vec<ExchangeSymbol>, ExchangeError> {
        let url = format!("{}/api/v3/exchangeInfo", self.base_url);
        let payload = self.get_bytes(&url).await?;
        parse_exchange_info(&payload)
    }

    async fn fetch_klines(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        window: DateRange,
        limit: u32,
    ) -> Result<Vec<Kline>, ExchangeError> {
        if window.is_empty() {
            return Ok(Vec::new());
        }
        let interval = self
            .interval_code(timeframe)
            .ok_or(ExchangeError::UnsupportedInterval(timeframe))?;

        // endTime is inclusive on Binance; the window end is not.
        let start_ms = window.start.timestamp_millis();
        let end_ms = window.end.timestamp_millis() - 1;
        let url = format!(
            "{}/api/v3/klines?symbol={}&interval={}&startTime={}&endTime={}&limit={}",
            self.base_url,
            symbol.trim().to_ascii_uppercase(),
            interval,
            start_ms,
            end_ms,
            limit.clamp(1, BINANCE_MAX_ROWS)
        );

        let payload = self.get_bytes(&url).await?;
        let rows = parse_klines_payload(&payload)?;
        debug!(
            component = "binance",
            event = "binance.klines.fetched",
            symbol,
            interval,
            start_ms,
            end_ms,
            rows = rows.len()
        );
        Ok(rows)
    }
}

fn request_error(url: &str, err: &reqwest::Error) -> ExchangeError {
    if err.is_timeout() {
        ExchangeError::Timeout {
            url: url.to_string(),
        }
    } else {
        ExchangeError::Transport {
            url: url.to_string(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ExchangeInfoPayload {
    symbols: Vec<ExchangeInfoSymbol>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExchangeInfoSymbol {
    symbol: String,
    status: String,
    base_asset: String,
    quote_asset: String,
    #[serde(default)]
    is_spot_trading_allowed: bool,
}

pub fn parse_exchange_info(payload: &[u8]) -> Result<Vec<ExchangeSymbol>, ExchangeError> {
    let info: ExchangeInfoPayload =
        serde_json::from_slice(payload).map_err(|err| ExchangeError::Decode(err.to_string()))?;
    Ok(info
        .symbols
        .into_iter()
        .map(|raw| ExchangeSymbol {
            symbol: raw.symbol,
            status: raw.status,
            base_asset: raw.base_asset,
            quote_asset: raw.quote_asset,
            is_spot_trading_allowed: raw.is_spot_trading_allowed,
        })
        .collect())
}

pub fn parse_klines_payload(payload: &[u8]) -> Result<Vec<Kline>, ExchangeError> {
    let value: serde_json::Value =
        serde_json::from_slice(payload).map_err(|err| ExchangeError::Decode(err.to_string()))?;
    let rows = value.as_array().ok_or_else(|| {
        ExchangeError::Decode("unexpected klines payload: expected top-level array".to_string())
    })?;

    rows.iter().map(parse_kline_row).collect()
}

fn parse_kline_row(value: &serde_json::Value) -> Result<Kline, ExchangeError> {
    let row = value
        .as_array()
        .ok_or_else(|| ExchangeError::Decode("unexpected kline row: expected array".to_string()))?;
    if row.len() < KLINE_MIN_COLUMNS {
        return Err(ExchangeError::Decode(format!(
            "unexpected kline row length: {}",
            row.len()
        )));
    }

    Ok(Kline {
        open_time_ms: json_i64(&row[0], "open_time")?,
        open: json_f64(&row[1], "open")?,
        high: json_f64(&row[2], "high")?,
        low: json_f64(&row[3], "low")?,
        close: json_f64(&row[4], "close")?,
        volume: json_f64(&row[5], "volume")?,
        close_time_ms: json_i64(&row[6], "close_time")?,
    })
}

fn json_i64(value: &serde_json::Value, field: &str) -> Result<i64, ExchangeError> {
    if let Some(v) = value.as_i64() {
        return Ok(v);
    }
    value
        .as_str()
        .and_then(|text| text.parse().ok())
        .ok_or_else(|| ExchangeError::Decode(format!("field {field} is not an integer: {value}")))
}

fn json_f64(value: &serde_json::Value, field: &str) -> Result<f64, ExchangeError> {
    if let Some(v) = value.as_f64() {
        return Ok(v);
    }
    value
        .as_str()
        .and_then(|text| text.parse().ok())
        .ok_or_else(|| ExchangeError::Decode(format!("field {field} is not a number: {value}")))
}
