//! Drives a single download job from `pending` to a terminal status.
//!
//! Cancellation is cooperative: the worker re-reads the job record before every chunk,
//! and every write it makes is guarded on the row still being `in_progress`, so a cancel
//! issued mid-chunk takes effect at the next chunk boundary and is never overwritten.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use crate::config::DownloadConfig;
use crate::exchange::ExchangeClient;
use crate::model::{DownloadJob, JobId, JobStatus};
use crate::planner::{estimate_candles, ChunkPlanner, RetryDecision, RetryPolicy};
use crate::reconcile::{GapReconciler, ReconcileTarget};
use crate::store::{MarketStore, ProgressUpdate, StoreError};

const IN_PROGRESS_CEILING: f64 = 99.0;
const COMPLETION_THRESHOLD: f64 = 99.0;

#[derive(Debug, Clone, PartialEq)]
pub struct JobOutcome {
    pub job_id: JobId,
    pub status: JobStatus,
    pub progress: f64,
    pub processed_candles: u64,
    pub total_candles: u64,
}

impl JobOutcome {
    fn from_job(job: &DownloadJob) -> Self {
        Self {
            job_id: job.id,
            status: job.status,
            progress: job.progress,
            processed_candles: job.processed_candles,
            total_candles: job.total_candles,
        }
    }
}

/// Why the chunk loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopExit {
    ReachedEnd,
    EmptyLimit,
    /// The job left `in_progress` under us, e.g. through a cancel request.
    Interrupted,
}

#[derive(Debug, Clone, Default)]
struct Counters {
    processed: u64,
    total: u64,
    progress: f64,
    retries: u32,
    error: Option<String>,
    /// Most recent given-up chunk. Outlives the retry message a later success clears.
    last_skip: Option<String>,
    last_processed_at: Option<DateTime<Utc>>,
}

impl Counters {
    fn record_import(&mut self, imported: u64, high_water: DateTime<Utc>) {
        self.processed += imported;
        let raw = self.processed as f64 / self.total as f64 * 100.0;
        self.progress = self.progress.max(raw.min(IN_PROGRESS_CEILING));
        self.last_processed_at = Some(
            self.last_processed_at
                .map_or(high_water, |prev| prev.max(high_water)),
        );
    }

    fn update(&self) -> ProgressUpdate {
        ProgressUpdate {
            progress: self.progress,
            processed_candles: self.processed,
            total_candles: self.total,
            retries: self.retries,
            error: self.error.clone(),
            last_processed_at: self.last_processed_at,
        }
    }
}

pub struct DownloadWorker {
    job_id: JobId,
    store: Arc<dyn MarketStore>,
    exchange: Option<Arc<dyn ExchangeClient>>,
    config: DownloadConfig,
}

impl DownloadWorker {
    pub fn new(
        job_id: JobId,
        store: Arc<dyn MarketStore>,
        exchange: Option<Arc<dyn ExchangeClient>>,
        config: DownloadConfig,
    ) -> Self {
        Self {
            job_id,
            store,
            exchange,
            config,
        }
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    /// Run the job to a terminal status.
    ///
    /// A store error that interrupts the run is recorded on the job as `failed` so the
    /// row never stays `in_progress`. The error is only returned when that write fails too.
    pub async fn run(&self) -> Result<JobOutcome, StoreError> {
        let err = match self.drive().await {
            Ok(outcome) => return Ok(outcome),
            Err(err) => err,
        };
        error!(
            component = "download_worker",
            event = "job.aborted",
            job_id = self.job_id,
            error = %err
        );
        match self.store.fail_job(self.job_id, &format!("store error: {err}")) {
            Ok(_) => self.current_outcome(),
            Err(_) => Err(err),
        }
    }

    async fn drive(&self) -> Result<JobOutcome, StoreError> {
        let job = self.load_job()?;
        if !self.store.mark_started(job.id)? {
            info!(
                component = "download_worker",
                event = "job.skipped",
                job_id = job.id,
                status = job.status.as_str()
            );
            return self.current_outcome();
        }

        info!(
            component = "download_worker",
            event = "job.start",
            job_id = job.id,
            symbol = job.symbol.as_str(),
            source = job.source.as_str(),
            timeframe = job.timeframe.as_str(),
            start = %job.start,
            end = %job.end
        );

        let Some(exchange) = self.exchange.clone() else {
            return self.fail(&format!("unsupported data source: {}", job.source));
        };
        if exchange.interval_code(job.timeframe).is_none() {
            return self.fail(&format!(
                "unsupported timeframe {} for {}",
                job.timeframe, job.source
            ));
        }

        let range = job.requested_range();
        let mut counters = Counters {
            total: estimate_candles(range, job.timeframe),
            ..Counters::default()
        };
        if !self.store.update_progress(job.id, &counters.update())? {
            return self.current_outcome();
        }

        let exit = self.download_chunks(&job, exchange.as_ref(), &mut counters).await?;
        if exit == LoopExit::Interrupted {
            info!(
                component = "download_worker",
                event = "job.interrupted",
                job_id = job.id,
                processed_candles = counters.processed
            );
            return self.current_outcome();
        }

        let reconciled = self.reconcile(&job, exchange.as_ref(), &mut counters).await?;
        if !reconciled {
            return self.current_outcome();
        }

        self.finish(&job, &mut counters)
    }

    async fn download_chunks(
        &self,
        job: &DownloadJob,
        exchange: &dyn ExchangeClient,
        counters: &mut Counters,
    ) -> Result<LoopExit, StoreError> {
        let plan = ChunkPlanner::from_config(&self.config)
            .plan(job.timeframe, exchange.max_rows_per_request());
        let retry = RetryPolicy::from_config(&self.config);
        let end = job.end;

        let mut cursor = job.start;
        let mut empty_streak: u32 = 0;
        let mut unflushed_chunks: u32 = 0;
        let mut flagged_available = false;

        while cursor < end {
            if !self.still_running() {
                return Ok(LoopExit::Interrupted);
            }

            let window = plan.next_window(cursor, end);
            let rows = match exchange
                .fetch_klines(&job.symbol, job.timeframe, window, plan.rows_per_chunk)
                .await
            {
                Ok(rows) => rows,
                Err(err) => match retry.decide(&err, counters.retries) {
                    RetryDecision::Retry { attempt, delay } => {
                        warn!(
                            component = "download_worker",
                            event = "job.chunk.retry",
                            job_id = job.id,
                            attempt,
                            max_retries = retry.max_retries,
                            backoff_ms = delay.as_millis() as u64,
                            chunk_start = %window.start,
                            error = %err
                        );
                        counters.retries = attempt;
                        counters.error =
                            Some(format!("retry {attempt}/{}: {err}", retry.max_retries));
                        if !self.store.update_progress(job.id, &counters.update())? {
                            return Ok(LoopExit::Interrupted);
                        }
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    RetryDecision::GiveUp => {
                        error!(
                            component = "download_worker",
                            event = "job.chunk.skipped",
                            job_id = job.id,
                            retries = counters.retries,
                            transient = err.is_transient(),
                            chunk_start = %window.start,
                            chunk_end = %window.end,
                            error = %err
                        );
                        let note = format!(
                            "chunk {} to {} skipped: {err}",
                            window.start, window.end
                        );
                        counters.retries = 0;
                        counters.error = Some(note.clone());
                        counters.last_skip = Some(note);
                        if !self.store.update_progress(job.id, &counters.update())? {
                            return Ok(LoopExit::Interrupted);
                        }
                        cursor = window.end;
                        continue;
                    }
                },
            };

            counters.retries = 0;
            if rows.is_empty() {
                empty_streak += 1;
                info!(
                    component = "download_worker",
                    event = "job.chunk.empty",
                    job_id = job.id,
                    chunk_start = %window.start,
                    chunk_end = %window.end,
                    empty_streak
                );
                cursor = window.end;
                if empty_streak >= self.config.max_empty_chunks {
                    warn!(
                        component = "download_worker",
                        event = "job.empty_limit",
                        job_id = job.id,
                        empty_streak,
                        stopped_at = %cursor
                    );
                    return Ok(LoopExit::EmptyLimit);
                }
                continue;
            }
            empty_streak = 0;

            let fetched = rows.len();
            let candles: Vec<_> = rows
                .iter()
                .filter_map(|row| row.to_candle(job.symbol_id, job.timeframe))
                .filter(|candle| candle.open_time >= window.start && candle.open_time < window.end)
                .collect();
            if candles.len() < fetched {
                warn!(
                    component = "download_worker",
                    event = "job.chunk.rows_dropped",
                    job_id = job.id,
                    dropped = fetched - candles.len()
                );
            }

            let imported = match self.store.upsert_candles(&candles) {
                Ok(written) => written as u64,
                Err(err) => {
                    error!(
                        component = "download_worker",
                        event = "job.chunk.import_failed",
                        job_id = job.id,
                        chunk_start = %window.start,
                        chunk_end = %window.end,
                        candles = candles.len(),
                        error = %err
                    );
                    cursor = window.end;
                    continue;
                }
            };

            let high_water = candles
                .iter()
                .map(|candle| candle.open_time)
                .max()
                .unwrap_or(window.start);
            counters.record_import(imported, high_water);
            counters.error = counters.last_skip.clone();
            debug!(
                component = "download_worker",
                event = "job.chunk.imported",
                job_id = job.id,
                imported,
                processed_candles = counters.processed,
                progress = counters.progress,
                chunk_start = %window.start,
                chunk_end = %window.end
            );

            if imported > 0 && !flagged_available {
                flagged_available = self.flag_data_available(job);
            }

            unflushed_chunks += 1;
            if unflushed_chunks >= self.config.progress_flush_every {
                unflushed_chunks = 0;
                if !self.store.update_progress(job.id, &counters.update())? {
                    return Ok(LoopExit::Interrupted);
                }
            }

            cursor = window.end;
            tokio::time::sleep(self.config.chunk_pause).await;
        }

        if unflushed_chunks > 0 && !self.store.update_progress(job.id, &counters.update())? {
            return Ok(LoopExit::Interrupted);
        }
        Ok(LoopExit::ReachedEnd)
    }

    /// Returns `false` when the job stopped running during the backfill.
    async fn reconcile(
        &self,
        job: &DownloadJob,
        exchange: &dyn ExchangeClient,
        counters: &mut Counters,
    ) -> Result<bool, StoreError> {
        if self.config.gap_fill_passes == 0 {
            return Ok(true);
        }

        let reconciler = GapReconciler::new(
            ChunkPlanner::from_config(&self.config),
            self.config.gap_fill_passes,
            self.config.chunk_pause,
        );
        let target = ReconcileTarget {
            symbol: &job.symbol,
            symbol_id: job.symbol_id,
            timeframe: job.timeframe,
            window: job.requested_range(),
        };
        let store = Arc::clone(&self.store);
        let job_id = job.id;
        // Unreadable status is not a stop signal; the guarded finish write decides.
        let should_stop = move || {
            matches!(
                store.get_job(job_id),
                Ok(Some(current)) if current.status != JobStatus::InProgress
            )
        };

        let report = reconciler
            .reconcile(&target, exchange, self.store.as_ref(), &should_stop)
            .await?;
        info!(
            component = "download_worker",
            event = "job.reconciled",
            job_id = job.id,
            passes = report.passes,
            initial_gaps = report.initial_gaps,
            remaining_gaps = report.remaining_gaps.len(),
            candles_imported = report.candles_imported
        );
        if report.stopped {
            return Ok(false);
        }

        if report.candles_imported > 0 {
            let high_water = counters.last_processed_at.unwrap_or(job.start);
            counters.record_import(report.candles_imported, high_water);
            self.flag_data_available(job);
        }
        Ok(true)
    }

    fn finish(&self, job: &DownloadJob, counters: &mut Counters) -> Result<JobOutcome, StoreError> {
        let final_progress = (counters.processed as f64 / counters.total as f64 * 100.0).min(100.0);

        let status = if final_progress >= COMPLETION_THRESHOLD {
            counters.progress = 100.0;
            counters.error = None;
            JobStatus::Completed
        } else {
            counters.progress = counters.progress.max(final_progress).min(IN_PROGRESS_CEILING);
            counters.error = Some(format!(
                "download completed with some gaps: imported {} of ~{} candles ({:.1}%)",
                counters.processed, counters.total, final_progress
            ));
            JobStatus::Partial
        };
        counters.retries = 0;

        if !self.store.finish_job(job.id, status, &counters.update())? {
            return self.current_outcome();
        }

        info!(
            component = "download_worker",
            event = "job.finish",
            job_id = job.id,
            status = status.as_str(),
            progress = counters.progress,
            processed_candles = counters.processed,
            total_candles = counters.total
        );

        Ok(JobOutcome {
            job_id: job.id,
            status,
            progress: counters.progress,
            processed_candles: counters.processed,
            total_candles: counters.total,
        })
    }

    fn fail(&self, reason: &str) -> Result<JobOutcome, StoreError> {
        error!(
            component = "download_worker",
            event = "job.failed",
            job_id = self.job_id,
            reason
        );
        self.store.fail_job(self.job_id, reason)?;
        self.current_outcome()
    }

    fn flag_data_available(&self, job: &DownloadJob) -> bool {
        match self.store.set_data_available(job.symbol_id, true) {
            Ok(()) => true,
            Err(err) => {
                warn!(
                    component = "download_worker",
                    event = "symbol.flag_failed",
                    job_id = job.id,
                    symbol_id = job.symbol_id,
                    error = %err
                );
                false
            }
        }
    }

    /// Cancel check before each chunk. A failed read keeps the job going: every write
    /// after it is guarded on `in_progress`, so a cancel is still honoured there.
    fn still_running(&self) -> bool {
        match self.store.get_job(self.job_id) {
            Ok(job) => job.is_some_and(|job| job.status == JobStatus::InProgress),
            Err(err) => {
                warn!(
                    component = "download_worker",
                    event = "job.status_check_failed",
                    job_id = self.job_id,
                    error = %err
                );
                true
            }
        }
    }

    fn load_job(&self) -> Result<DownloadJob, StoreError> {
        self.store
            .get_job(self.job_id)?
            .ok_or_else(|| StoreError::Corrupt(format!("download job {} not found", self.job_id)))
    }

    fn current_outcome(&self) -> Result<JobOutcome, StoreError> {
        Ok(JobOutcome::from_job(&self.load_job()?))
    }
}
