//! Exchange client seam used by the download worker.

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{Candle, DataSource, DateRange, SymbolId, Timeframe};

#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("HTTP client build error: {0}")]
    ClientBuild(String),
    #[error("request to {url} failed: {message}")]
    Transport { url: String, message: String },
    #[error("request to {url} timed out")]
    Timeout { url: String },
    #[error("unexpected HTTP status {status} from {url}: {body}")]
    Status {
        url: String,
        status: u16,
        body: String,
    },
    #[error("failed to decode exchange payload: {0}")]
    Decode(String),
    #[error("timeframe {0} is not offered by this exchange")]
    UnsupportedInterval(Timeframe),
}

impl ExchangeError {
    /// Errors that a later attempt of the same request can plausibly fix.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport { .. } | Self::Timeout { .. } | Self::Decode(_) => true,
            Self::Status { status, .. } => {
                *status == 429 || *status == 418 || (500..600).contains(status)
            }
            Self::ClientBuild(_) | Self::UnsupportedInterval(_) => false,
        }
    }
}

/// One raw candle as reported by an exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct Kline {
    pub open_time_ms: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub close_time_ms: i64,
}

impl Kline {
    /// `None` for rows carrying a zero or unrepresentable open time, or a close time
    /// that does not come after it.
    pub fn to_candle(&self, symbol_id: SymbolId, timeframe: Timeframe) -> Option<Candle> {
        if self.open_time_ms <= 0 || self.close_time_ms <= self.open_time_ms {
            return None;
        }
        let open_time = Utc.timestamp_millis_opt(self.open_time_ms).single()?;
        Some(Candle {
            symbol_id,
            timeframe,
            open_time,
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume: self.volume,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeSymbol {
    pub symbol: String,
    pub status: String,
    pub base_asset: String,
    pub quote_asset: String,
    pub is_spot_trading_allowed: bool,
}

impl ExchangeSymbol {
    pub fn is_tradable(&self) -> bool {
        self.status == "TRADING" && self.is_spot_trading_allowed
    }

    pub fn display_name(&self) -> String {
        format!("{}/{}", self.base_asset, self.quote_asset)
    }
}

#[async_trait]
pub trait ExchangeClient: Send + Sync {
    fn source(&self) -> DataSource;

    /// Exchange-specific interval code, or `None` when the timeframe is not offered.
    fn interval_code(&self, timeframe: Timeframe) -> Option<&'static str>;

    fn max_rows_per_request(&self) -> u32;

    async fn list_symbols(&self) -> Result<Vec<ExchangeSymbol>, ExchangeError>;

    /// Klines whose open time falls in the half-open `window`, at most `limit` rows.
    async fn fetch_klines(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        window: DateRange,
        limit: u32,
    ) -> Result<Vec<Kline>, ExchangeError>;

    async fn find_symbol(&self, symbol: &str) -> Result<Option<ExchangeSymbol>, ExchangeError> {
        let wanted = symbol.trim().to_ascii_uppercase();
        Ok(self
            .list_symbols()
            .await?
            .into_iter()
            .find(|candidate| candidate.symbol.eq_ignore_ascii_case(&wanted)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(code: u16) -> ExchangeError {
        ExchangeError::Status {
            url: "http://x".to_string(),
            status: code,
            body: String::new(),
        }
    }

    #[test]
    fn rate_limits_and_server_errors_are_transient() {
        assert!(status(429).is_transient());
        assert!(status(418).is_transient());
        assert!(status(503).is_transient());
        assert!(!status(400).is_transient());
        assert!(ExchangeError::Decode("bad".to_string()).is_transient());
        assert!(!ExchangeError::UnsupportedInterval(Timeframe::W1).is_transient());
    }

    #[test]
    fn zero_open_time_rows_are_dropped() {
        let mut row = Kline {
            open_time_ms: 0,
            open: 1.0,
            high: 2.0,
            low: 0.5,
            close: 1.5,
            volume: 10.0,
            close_time_ms: 59_999,
        };
        assert!(row.to_candle(7, Timeframe::M1).is_none());

        row.open_time_ms = 1_672_531_200_000;
        row.close_time_ms = 1_672_531_259_999;
        let candle = row.to_candle(7, Timeframe::M1).expect("valid candle");
        assert_eq!(candle.open_time.timestamp_millis(), 1_672_531_200_000);
        assert_eq!(candle.symbol_id, 7);
    }

    #[test]
    fn rows_closing_before_they_open_are_dropped() {
        let row = Kline {
            open_time_ms: 1_672_531_200_000,
            open: 1.0,
            high: 2.0,
            low: 0.5,
            close: 1.5,
            volume: 10.0,
            close_time_ms: 1_672_531_200_000,
        };
        assert!(row.to_candle(7, Timeframe::M1).is_none());
    }

    #[test]
    fn tradable_requires_trading_status_and_spot() {
        let mut sym = ExchangeSymbol {
            symbol: "ETHUSDT".to_string(),
            status: "TRADING".to_string(),
            base_asset: "ETH".to_string(),
            quote_asset: "USDT".to_string(),
            is_spot_trading_allowed: true,
        };
        assert!(sym.is_tradable());
        assert_eq!(sym.display_name(), "ETH/USDT");
        sym.is_spot_trading_allowed = false;
        assert!(!sym.is_tradable());
    }
}
