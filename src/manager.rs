//! Entry point for callers: submits download jobs and answers status, listing and
//! reporting queries.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::config::DownloadConfig;
use crate::exchange::{ExchangeClient, ExchangeError, ExchangeSymbol};
use crate::model::{
    infer_asset_type, missing_ranges, ActiveJobsQuery, AssetType, CancelOutcome, DataSource,
    DateRange, DownloadJob, InventoryItem, InventoryQuery, JobId, ModelError, Page, Symbol,
    SymbolDataStatus, Timeframe,
};
use crate::store::{JobsSummary, MarketStore, NewDownloadJob, NewSymbol, StoreError};
use crate::worker::{DownloadWorker, JobOutcome};

const RECENT_JOBS_IN_SUMMARY: usize = 10;

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("invalid download request: {0}")]
    InvalidRequest(String),
    #[error(transparent)]
    Validation(#[from] ModelError),
    #[error("no exchange client registered for {0}")]
    UnsupportedSource(DataSource),
    #[error("symbol {symbol} is not listed on {exchange}")]
    SymbolNotListed { symbol: String, exchange: DataSource },
    #[error("download job {0} not found")]
    JobNotFound(JobId),
    #[error("exchange error: {0}")]
    Exchange(#[from] ExchangeError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Raw submission as received from a caller; parsed and validated by
/// [`DownloadJobManager::initiate_download`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadRequest {
    pub symbol: String,
    pub source: String,
    pub timeframe: String,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
}

/// A submitted job plus the task running it. Dropping the handle detaches the task.
pub struct DownloadHandle {
    pub job_id: JobId,
    pub task: JoinHandle<Option<JobOutcome>>,
}

pub struct DownloadJobManager {
    store: Arc<dyn MarketStore>,
    exchanges: HashMap<DataSource, Arc<dyn ExchangeClient>>,
    config: DownloadConfig,
    job_slots: Option<Arc<Semaphore>>,
}

impl DownloadJobManager {
    pub fn new(store: Arc<dyn MarketStore>, config: DownloadConfig) -> Self {
        let job_slots = config
            .max_concurrent_jobs
            .map(|limit| Arc::new(Semaphore::new(limit.max(1))));
        Self {
            store,
            exchanges: HashMap::new(),
            config,
            job_slots,
        }
    }

    pub fn with_exchange(mut self, client: Arc<dyn ExchangeClient>) -> Self {
        info!(
            component = "download_manager",
            event = "exchange.registered",
            source = client.source().as_str(),
            max_rows_per_request = client.max_rows_per_request()
        );
        self.exchanges.insert(client.source(), client);
        self
    }

    pub fn exchange(&self, source: DataSource) -> Option<Arc<dyn ExchangeClient>> {
        self.exchanges.get(&source).cloned()
    }

    pub fn worker(&self, job_id: JobId, source: DataSource) -> DownloadWorker {
        DownloadWorker::new(
            job_id,
            Arc::clone(&self.store),
            self.exchange(source),
            self.config.clone(),
        )
    }

    /// Validate, record the job as `pending` and start it in the background.
    pub async fn initiate_download(&self, request: &DownloadRequest) -> Result<JobId, DownloadError> {
        Ok(self.submit(request).await?.job_id)
    }

    /// Like [`initiate_download`](Self::initiate_download) but keeps the task handle.
    pub async fn submit(&self, request: &DownloadRequest) -> Result<DownloadHandle, DownloadError> {
        let symbol = request.symbol.trim().to_ascii_uppercase();
        if symbol.is_empty() {
            return Err(DownloadError::InvalidRequest(
                "symbol must not be empty".to_string(),
            ));
        }
        let source: DataSource = request.source.parse()?;
        let timeframe: Timeframe = request.timeframe.parse()?;
        if request.end_date <= request.start_date {
            return Err(ModelError::InvalidDateRange {
                start: request.start_date,
                end: request.end_date,
            }
            .into());
        }
        let range = DateRange::new(request.start_date, request.end_date)?;

        let symbol_row = self.resolve_symbol(&symbol, source).await?;
        let job = self.store.create_job(&NewDownloadJob {
            symbol: symbol_row.symbol.clone(),
            symbol_id: symbol_row.id,
            source,
            timeframe,
            range,
        })?;

        info!(
            component = "download_manager",
            event = "download.accepted",
            job_id = job.id,
            symbol = job.symbol.as_str(),
            source = source.as_str(),
            timeframe = timeframe.as_str(),
            start = %range.start,
            end = %range.end
        );

        let worker = self.worker(job.id, source);
        let job_slots = self.job_slots.clone();
        let task = tokio::spawn(async move {
            let _permit = match job_slots {
                Some(slots) => match slots.acquire_owned().await {
                    Ok(permit) => Some(permit),
                    Err(_) => return None,
                },
                None => None,
            };
            match worker.run().await {
                Ok(outcome) => Some(outcome),
                Err(err) => {
                    error!(
                        component = "download_manager",
                        event = "job.store_error",
                        job_id = worker.job_id(),
                        error = %err
                    );
                    None
                }
            }
        });

        Ok(DownloadHandle {
            job_id: job.id,
            task,
        })
    }

    pub fn get_status(&self, job_id: JobId) -> Result<DownloadJob, DownloadError> {
        self.store
            .get_job(job_id)?
            .ok_or(DownloadError::JobNotFound(job_id))
    }

    pub fn list_active(&self, query: &ActiveJobsQuery) -> Result<Page<DownloadJob>, DownloadError> {
        Ok(self.store.list_active(query)?)
    }

    /// Flip the job to `cancelled` if allowed. The running worker notices at its next
    /// chunk boundary.
    pub fn cancel(&self, job_id: JobId, force: bool) -> Result<CancelOutcome, DownloadError> {
        let reason = if force {
            "force-cancelled by user request"
        } else {
            "cancelled by user request"
        };
        let outcome = self.store.cancel_job(job_id, force, reason)?;
        info!(
            component = "download_manager",
            event = "download.cancel",
            job_id,
            force,
            outcome = ?outcome
        );
        match outcome {
            CancelOutcome::NotFound => Err(DownloadError::JobNotFound(job_id)),
            other => Ok(other),
        }
    }

    pub fn summary(&self) -> Result<JobsSummary, DownloadError> {
        Ok(self.store.summary(Utc::now(), RECENT_JOBS_IN_SUMMARY)?)
    }

    pub fn inventory(&self, query: &InventoryQuery) -> Result<Page<InventoryItem>, DownloadError> {
        Ok(self.store.inventory(query)?)
    }

    /// Tradable symbols listed by `source`.
    pub async fn available_symbols(
        &self,
        source: DataSource,
    ) -> Result<Vec<ExchangeSymbol>, DownloadError> {
        let client = self
            .exchange(source)
            .ok_or(DownloadError::UnsupportedSource(source))?;
        Ok(client
            .list_symbols()
            .await?
            .into_iter()
            .filter(ExchangeSymbol::is_tradable)
            .collect())
    }

    pub fn symbol_data_status(
        &self,
        symbol: &str,
        timeframe: Timeframe,
    ) -> Result<SymbolDataStatus, DownloadError> {
        let ticker = symbol.trim().to_ascii_uppercase();
        let Some(row) = self.store.find_symbol(&ticker)? else {
            return Ok(SymbolDataStatus {
                symbol: ticker,
                symbol_id: None,
                has_data: false,
                available_data: Vec::new(),
                missing_data: Vec::new(),
            });
        };

        let available = self.store.available_ranges(row.id, timeframe)?;
        let now = Utc::now();
        let window_start = available.first().map_or_else(
            || now - ChronoDuration::days(self.config.symbol_status_lookback_days),
            |first| first.start,
        );
        let window = DateRange {
            start: window_start.min(now),
            end: now,
        };

        Ok(SymbolDataStatus {
            symbol: row.symbol,
            symbol_id: Some(row.id),
            has_data: !available.is_empty(),
            missing_data: missing_ranges(&available, window),
            available_data: available,
        })
    }

    async fn resolve_symbol(&self, symbol: &str, source: DataSource) -> Result<Symbol, DownloadError> {
        if let Some(existing) = self.store.find_symbol(symbol)? {
            return Ok(existing);
        }

        let new_symbol = match self.exchange(source) {
            Some(client) => {
                let listed = client.find_symbol(symbol).await?.ok_or_else(|| {
                    DownloadError::SymbolNotListed {
                        symbol: symbol.to_string(),
                        exchange: source,
                    }
                })?;
                NewSymbol {
                    symbol: listed.symbol.clone(),
                    name: listed.display_name(),
                    exchange: source.exchange_name().to_string(),
                    asset_type: match source {
                        DataSource::Binance => AssetType::Crypto,
                        _ => infer_asset_type(symbol),
                    },
                }
            }
            None => NewSymbol {
                symbol: symbol.to_string(),
                name: symbol.to_string(),
                exchange: source.exchange_name().to_string(),
                asset_type: infer_asset_type(symbol),
            },
        };

        let created = self.store.create_symbol(&new_symbol)?;
        info!(
            component = "download_manager",
            event = "symbol.created",
            symbol_id = created.id,
            symbol = created.symbol.as_str(),
            exchange = created.exchange.as_str(),
            asset_type = created.asset_type.as_str()
        );
        Ok(created)
    }
}
