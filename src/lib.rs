//! Historical market-data download orchestrator.
//!
//! Accepts requests to backfill OHLCV candles for a symbol, timeframe and date range,
//! splits each request into exchange-sized chunks, runs it as a background job with
//! retry, progress tracking and cooperative cancellation, then re-fetches any holes
//! left in the stored range.

mod api;
mod binance;
mod config;
mod exchange;
mod manager;
mod model;
mod observability;
mod planner;
mod reconcile;
mod sqlite_store;
mod store;
mod worker;

pub use api::{download_router, API_PREFIX};
pub use binance::{parse_exchange_info, parse_klines_payload, BinanceClient, BINANCE_REST_BASE_URL};
pub use config::{
    download_config_from_env, server_config_from_env, DownloadConfig, ServerConfig,
    DEFAULT_ADDR, DEFAULT_STORE_PATH,
};
pub use exchange::{ExchangeClient, ExchangeError, ExchangeSymbol, Kline};
pub use manager::{DownloadError, DownloadHandle, DownloadJobManager, DownloadRequest};
pub use model::{
    cancel_allowed, infer_asset_type, missing_ranges, ActiveJobsQuery, AssetType, CancelOutcome,
    Candle, DataSource, DateRange, DownloadJob, InventoryItem, InventoryQuery, JobId,
    JobSortField, JobStatus, ModelError, Page, PageRequest, SortDirection, Symbol,
    SymbolDataStatus, SymbolId, Timeframe, ALL_JOB_STATUSES, ALL_TIMEFRAMES,
};
pub use observability::{
    init_logging, log_app_bind, log_app_start, log_store_opened, logging_config_from_env,
    LogFormat, LoggingConfig, LoggingInitError,
};
pub use planner::{
    estimate_candles, ChunkPlan, ChunkPlanner, ChunkWindows, RetryDecision, RetryPolicy,
};
pub use reconcile::{GapReconciler, ReconcileReport, ReconcileTarget};
pub use sqlite_store::SqliteStore;
pub use store::{
    contiguous_ranges, CandleStore, JobStore, JobsSummary, MarketStore, NewDownloadJob,
    NewSymbol, ProgressUpdate, StatusCount, StoreError, SymbolStore,
};
pub use worker::{DownloadWorker, JobOutcome};
