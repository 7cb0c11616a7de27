//! Persistence seams for symbols, candles and download jobs.
//!
//! The traits are synchronous: every implementation in this crate answers from a local
//! database, and the worker treats a store call as a short critical section.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{
    ActiveJobsQuery, AssetType, CancelOutcome, Candle, DataSource, DateRange, DownloadJob,
    InventoryItem, InventoryQuery, JobId, JobStatus, Page, Symbol, SymbolId, Timeframe,
};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("corrupt stored row: {0}")]
    Corrupt(String),
    #[error("{0} is not a status a running job can finish with")]
    InvalidTransition(JobStatus),
    #[error("store lock poisoned")]
    Poisoned,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSymbol {
    pub symbol: String,
    pub name: String,
    pub exchange: String,
    pub asset_type: AssetType,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewDownloadJob {
    pub symbol: String,
    pub symbol_id: SymbolId,
    pub source: DataSource,
    pub timeframe: Timeframe,
    pub range: DateRange,
}

/// Counters written by the worker while a job is `in_progress`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProgressUpdate {
    pub progress: f64,
    pub processed_candles: u64,
    pub total_candles: u64,
    pub retries: u32,
    pub error: Option<String>,
    pub last_processed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StatusCount {
    pub total: u64,
    pub last_24h: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobsSummary {
    pub status_counts: BTreeMap<JobStatus, StatusCount>,
    pub source_counts: BTreeMap<DataSource, u64>,
    pub recent_jobs: Vec<DownloadJob>,
}

pub trait SymbolStore: Send + Sync {
    fn find_symbol(&self, symbol: &str) -> Result<Option<Symbol>, StoreError>;
    fn create_symbol(&self, symbol: &NewSymbol) -> Result<Symbol, StoreError>;
    fn set_data_available(&self, symbol_id: SymbolId, available: bool) -> Result<(), StoreError>;
}

pub trait CandleStore: Send + Sync {
    /// Insert or overwrite by `(symbol_id, timeframe, open_time)`. Returns rows written.
    fn upsert_candles(&self, candles: &[Candle]) -> Result<usize, StoreError>;

    /// Contiguous stored spans, time-ascending and non-overlapping.
    fn available_ranges(
        &self,
        symbol_id: SymbolId,
        timeframe: Timeframe,
    ) -> Result<Vec<DateRange>, StoreError>;

    fn count_candles(
        &self,
        symbol_id: SymbolId,
        timeframe: Timeframe,
        range: DateRange,
    ) -> Result<u64, StoreError>;

    fn delete_candles(
        &self,
        symbol_id: SymbolId,
        timeframe: Timeframe,
        range: DateRange,
    ) -> Result<usize, StoreError>;

    fn inventory(&self, query: &InventoryQuery) -> Result<Page<InventoryItem>, StoreError>;
}

/// Job records. Every mutating call is a guarded transition: it reports `false` when
/// the row was not in the status the transition starts from, and changes nothing.
pub trait JobStore: Send + Sync {
    fn create_job(&self, job: &NewDownloadJob) -> Result<DownloadJob, StoreError>;
    fn get_job(&self, id: JobId) -> Result<Option<DownloadJob>, StoreError>;

    /// `pending -> in_progress`.
    fn mark_started(&self, id: JobId) -> Result<bool, StoreError>;

    /// Only applies while the job is `in_progress`.
    fn update_progress(&self, id: JobId, update: &ProgressUpdate) -> Result<bool, StoreError>;

    /// `in_progress -> status`, for any terminal status other than `cancelled`.
    fn finish_job(
        &self,
        id: JobId,
        status: JobStatus,
        update: &ProgressUpdate,
    ) -> Result<bool, StoreError>;

    /// `pending|in_progress -> failed` for pre-flight errors and for runs a store error
    /// cut short.
    fn fail_job(&self, id: JobId, reason: &str) -> Result<bool, StoreError>;

    fn cancel_job(&self, id: JobId, force: bool, reason: &str)
        -> Result<CancelOutcome, StoreError>;

    fn list_active(&self, query: &ActiveJobsQuery) -> Result<Page<DownloadJob>, StoreError>;

    fn summary(&self, now: DateTime<Utc>, recent: usize) -> Result<JobsSummary, StoreError>;
}

/// Everything the orchestrator needs from persistence, behind one handle.
pub trait MarketStore: SymbolStore + CandleStore + JobStore {}

impl<T> MarketStore for T where T: SymbolStore + CandleStore + JobStore {}

/// Group ascending open times into runs spaced exactly `step_ms` apart.
///
/// Each run `[first, last]` is reported as `[first, last + step_ms)`. Duplicates are
/// tolerated.
pub fn contiguous_ranges(open_times_ms: &[i64], step_ms: i64) -> Vec<(i64, i64)> {
    let mut out: Vec<(i64, i64)> = Vec::new();
    let mut run: Option<(i64, i64)> = None;

    for &ts in open_times_ms {
        run = match run {
            None => Some((ts, ts)),
            Some((first, last)) if ts <= last => Some((first, last)),
            Some((first, last)) if ts == last + step_ms => Some((first, ts)),
            Some((first, last)) => {
                out.push((first, last + step_ms));
                Some((ts, ts))
            }
        };
    }
    if let Some((first, last)) = run {
        out.push((first, last + step_ms));
    }

    out
}
