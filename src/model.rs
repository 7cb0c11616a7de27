//! Domain vocabulary shared by the download orchestrator, stores and HTTP surface.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type JobId = i64;
pub type SymbolId = i64;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    #[error("unsupported timeframe: {0}")]
    UnknownTimeframe(String),
    #[error("unsupported data source: {0}")]
    UnknownSource(String),
    #[error("invalid date range: end {end} must be after start {start}")]
    InvalidDateRange {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "1m")]
    M1,
    #[serde(rename = "5m")]
    M5,
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "30m")]
    M30,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "4h")]
    H4,
    #[serde(rename = "1d")]
    D1,
    #[serde(rename = "1w")]
    W1,
}

pub const ALL_TIMEFRAMES: [Timeframe; 8] = [
    Timeframe::M1,
    Timeframe::M5,
    Timeframe::M15,
    Timeframe::M30,
    Timeframe::H1,
    Timeframe::H4,
    Timeframe::D1,
    Timeframe::W1,
];

impl Timeframe {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::M1 => "1m",
            Self::M5 => "5m",
            Self::M15 => "15m",
            Self::M30 => "30m",
            Self::H1 => "1h",
            Self::H4 => "4h",
            Self::D1 => "1d",
            Self::W1 => "1w",
        }
    }

    pub fn minutes(self) -> i64 {
        match self {
            Self::M1 => 1,
            Self::M5 => 5,
            Self::M15 => 15,
            Self::M30 => 30,
            Self::H1 => 60,
            Self::H4 => 240,
            Self::D1 => 1_440,
            Self::W1 => 10_080,
        }
    }

    pub fn duration(self) -> ChronoDuration {
        ChronoDuration::minutes(self.minutes())
    }

    pub fn duration_ms(self) -> i64 {
        self.minutes() * 60_000
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Timeframe {
    type Err = ModelError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let trimmed = raw.trim();
        ALL_TIMEFRAMES
            .iter()
            .copied()
            .find(|tf| tf.as_str() == trimmed)
            .ok_or_else(|| ModelError::UnknownTimeframe(raw.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DataSource {
    Binance,
    Yahoo,
    Iex,
}

impl DataSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Binance => "BINANCE",
            Self::Yahoo => "YAHOO",
            Self::Iex => "IEX",
        }
    }

    /// Exchange label recorded on symbols created from this source.
    pub fn exchange_name(self) -> &'static str {
        match self {
            Self::Binance => "Binance",
            Self::Yahoo => "YAHOO",
            Self::Iex => "IEX",
        }
    }
}

impl fmt::Display for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataSource {
    type Err = ModelError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "BINANCE" => Ok(Self::Binance),
            "YAHOO" => Ok(Self::Yahoo),
            "IEX" => Ok(Self::Iex),
            _ => Err(ModelError::UnknownSource(raw.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetType {
    Crypto,
    Forex,
    Stock,
    Unknown,
}

impl AssetType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Crypto => "crypto",
            Self::Forex => "forex",
            Self::Stock => "stock",
            Self::Unknown => "unknown",
        }
    }

    /// Lenient parse used when reading stored rows; unrecognised labels map to `Unknown`.
    pub fn parse_lenient(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "crypto" => Self::Crypto,
            "forex" => Self::Forex,
            "stock" => Self::Stock,
            _ => Self::Unknown,
        }
    }
}

/// Best-effort asset classification from a ticker suffix. Not a correctness guarantee.
pub fn infer_asset_type(symbol: &str) -> AssetType {
    let upper = symbol.trim().to_ascii_uppercase();
    if upper.len() > 3 && upper.ends_with("USD") {
        AssetType::Forex
    } else if upper.len() > 4 && upper.ends_with("USDT") {
        AssetType::Crypto
    } else {
        AssetType::Unknown
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    InProgress,
    Completed,
    Partial,
    Failed,
    Cancelled,
}

pub const ALL_JOB_STATUSES: [JobStatus; 6] = [
    JobStatus::Pending,
    JobStatus::InProgress,
    JobStatus::Completed,
    JobStatus::Partial,
    JobStatus::Failed,
    JobStatus::Cancelled,
];

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Partial => "partial",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending | Self::InProgress)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        ALL_JOB_STATUSES
            .iter()
            .copied()
            .find(|status| status.as_str() == raw)
            .ok_or_else(|| format!("unknown job status '{raw}'"))
    }
}

/// Whether a cancel request may move a job in `status` to `cancelled`.
///
/// Pending and running jobs are always cancellable. A `partial` job that never imported
/// anything is a no-op record and may be discarded without `force`. Everything else
/// needs `force`, except a job that is already cancelled.
pub fn cancel_allowed(status: JobStatus, processed_candles: u64, force: bool) -> bool {
    match status {
        JobStatus::Pending | JobStatus::InProgress => true,
        JobStatus::Cancelled => false,
        JobStatus::Partial if processed_candles == 0 => true,
        JobStatus::Completed | JobStatus::Partial | JobStatus::Failed => force,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CancelOutcome {
    Cancelled { previous_status: JobStatus },
    NotCancellable { status: JobStatus },
    NotFound,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadJob {
    pub id: JobId,
    pub symbol: String,
    pub symbol_id: SymbolId,
    pub source: DataSource,
    pub timeframe: Timeframe,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub status: JobStatus,
    pub progress: f64,
    pub processed_candles: u64,
    pub total_candles: u64,
    pub retries: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_processed_at: Option<DateTime<Utc>>,
}

impl DownloadJob {
    pub fn requested_range(&self) -> DateRange {
        DateRange {
            start: self.start,
            end: self.end,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub symbol_id: SymbolId,
    pub timeframe: Timeframe,
    pub open_time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// A span of UTC time. Ranges handed around by the orchestrator are half-open
/// (`start` inclusive, `end` exclusive).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DateRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, ModelError> {
        if end < start {
            return Err(ModelError::InvalidDateRange { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    pub fn duration(&self) -> ChronoDuration {
        self.end - self.start
    }
}

/// Complement of `available` inside `window`.
///
/// `available` must be time-ascending and non-overlapping; the result is as well.
pub fn missing_ranges(available: &[DateRange], window: DateRange) -> Vec<DateRange> {
    let mut out = Vec::new();
    if window.is_empty() {
        return out;
    }

    let mut cursor = window.start;
    for range in available {
        if range.end <= cursor {
            continue;
        }
        if range.start >= window.end {
            break;
        }
        if range.start > cursor {
            out.push(DateRange {
                start: cursor,
                end: range.start,
            });
        }
        cursor = cursor.max(range.end);
        if cursor >= window.end {
            break;
        }
    }

    if cursor < window.end {
        out.push(DateRange {
            start: cursor,
            end: window.end,
        });
    }

    out
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Symbol {
    pub id: SymbolId,
    pub symbol: String,
    pub name: String,
    pub exchange: String,
    pub asset_type: AssetType,
    pub is_active: bool,
    pub data_available: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolDataStatus {
    pub symbol: String,
    pub symbol_id: Option<SymbolId>,
    pub has_data: bool,
    pub available_data: Vec<DateRange>,
    pub missing_data: Vec<DateRange>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryItem {
    pub symbol_id: SymbolId,
    pub symbol: String,
    pub name: String,
    pub exchange: String,
    pub asset_type: AssetType,
    pub timeframe: Timeframe,
    pub candle_count: u64,
    pub first_candle: DateTime<Utc>,
    pub last_candle: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub limit: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub page: u32,
    pub limit: u32,
}

impl PageRequest {
    /// Clamp to `page >= 1` and `1 <= limit <= max_limit`, substituting `default_limit` for 0.
    pub fn normalized(page: u32, limit: u32, default_limit: u32, max_limit: u32) -> Self {
        let limit = if limit == 0 { default_limit } else { limit };
        Self {
            page: page.max(1),
            limit: limit.clamp(1, max_limit),
        }
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page.saturating_sub(1)) * u64::from(self.limit)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobSortField {
    #[default]
    CreatedAt,
    UpdatedAt,
    Symbol,
    Status,
    Progress,
}

impl JobSortField {
    pub fn parse_or_default(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "updated_at" => Self::UpdatedAt,
            "symbol" => Self::Symbol,
            "status" => Self::Status,
            "progress" => Self::Progress,
            _ => Self::CreatedAt,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

impl SortDirection {
    pub fn parse_or_default(raw: &str) -> Self {
        if raw.trim().eq_ignore_ascii_case("asc") {
            Self::Asc
        } else {
            Self::Desc
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveJobsQuery {
    pub source: Option<DataSource>,
    pub sort_by: JobSortField,
    pub direction: SortDirection,
    pub page: PageRequest,
}

impl Default for ActiveJobsQuery {
    fn default() -> Self {
        Self {
            source: None,
            sort_by: JobSortField::CreatedAt,
            direction: SortDirection::Desc,
            page: PageRequest::normalized(1, 10, 10, 100),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InventoryQuery {
    pub asset_type: Option<AssetType>,
    pub exchange: Option<String>,
    pub page: PageRequest,
}

impl Default for InventoryQuery {
    fn default() -> Self {
        Self {
            asset_type: None,
            exchange: None,
            page: PageRequest::normalized(1, 20, 20, 100),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 1, day, hour, 0, 0)
            .single()
            .expect("valid timestamp")
    }

    fn range(a: (u32, u32), b: (u32, u32)) -> DateRange {
        DateRange {
            start: at(a.0, a.1),
            end: at(b.0, b.1),
        }
    }

    #[test]
    fn timeframe_round_trips_through_text_and_rejects_unknown() {
        for tf in ALL_TIMEFRAMES {
            assert_eq!(tf.as_str().parse::<Timeframe>().unwrap(), tf);
        }
        assert_eq!(
            "2h".parse::<Timeframe>().unwrap_err(),
            ModelError::UnknownTimeframe("2h".to_string())
        );
        assert_eq!(Timeframe::W1.minutes(), 10_080);
    }

    #[test]
    fn source_parse_is_case_insensitive() {
        assert_eq!("binance".parse::<DataSource>().unwrap(), DataSource::Binance);
        assert!(matches!(
            "kraken".parse::<DataSource>(),
            Err(ModelError::UnknownSource(_))
        ));
    }

    #[test]
    fn suffix_heuristic_classifies_common_tickers() {
        assert_eq!(infer_asset_type("ETHUSDT"), AssetType::Crypto);
        assert_eq!(infer_asset_type("EURUSD"), AssetType::Forex);
        assert_eq!(infer_asset_type("AAPL"), AssetType::Unknown);
    }

    #[test]
    fn date_range_rejects_inverted_bounds() {
        assert!(DateRange::new(at(2, 0), at(1, 0)).is_err());
        assert!(DateRange::new(at(1, 0), at(1, 0)).unwrap().is_empty());
    }

    #[test]
    fn cancel_rule_matches_status_table() {
        assert!(cancel_allowed(JobStatus::Pending, 0, false));
        assert!(cancel_allowed(JobStatus::InProgress, 10, false));
        assert!(cancel_allowed(JobStatus::Partial, 0, false));
        assert!(!cancel_allowed(JobStatus::Partial, 5, false));
        assert!(cancel_allowed(JobStatus::Partial, 5, true));
        assert!(!cancel_allowed(JobStatus::Completed, 216, false));
        assert!(cancel_allowed(JobStatus::Completed, 216, true));
        assert!(!cancel_allowed(JobStatus::Cancelled, 0, true));
    }

    #[test]
    fn missing_ranges_cover_leading_inner_and_trailing_gaps() {
        let window = range((1, 0), (10, 0));
        let available = vec![range((2, 0), (3, 0)), range((5, 0), (6, 0))];

        let missing = missing_ranges(&available, window);
        assert_eq!(
            missing,
            vec![
                range((1, 0), (2, 0)),
                range((3, 0), (5, 0)),
                range((6, 0), (10, 0)),
            ]
        );
    }

    #[test]
    fn missing_ranges_ignore_data_outside_window() {
        let window = range((3, 0), (4, 0));
        let available = vec![range((1, 0), (3, 12)), range((3, 18), (9, 0))];

        let missing = missing_ranges(&available, window);
        assert_eq!(missing, vec![range((3, 12), (3, 18))]);
        assert!(missing_ranges(&[range((1, 0), (9, 0))], window).is_empty());
    }

    #[test]
    fn page_request_clamps_inputs() {
        let page = PageRequest::normalized(0, 500, 10, 100);
        assert_eq!(page, PageRequest { page: 1, limit: 100 });
        assert_eq!(PageRequest::normalized(3, 0, 20, 100).offset(), 40);
    }
}
