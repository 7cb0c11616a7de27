//! Backfill pass that re-fetches holes left inside a job's requested window.

use std::time::Duration;

use tracing::{info, warn};

use crate::exchange::ExchangeClient;
use crate::model::{missing_ranges, DateRange, SymbolId, Timeframe};
use crate::planner::ChunkPlanner;
use crate::store::{CandleStore, StoreError};

#[derive(Debug, Clone)]
pub struct ReconcileTarget<'a> {
    pub symbol: &'a str,
    pub symbol_id: SymbolId,
    pub timeframe: Timeframe,
    pub window: DateRange,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcileReport {
    /// Passes that found at least one gap and attempted to fill it.
    pub passes: u32,
    pub initial_gaps: usize,
    pub remaining_gaps: Vec<DateRange>,
    pub candles_imported: u64,
    pub stopped: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct GapReconciler {
    planner: ChunkPlanner,
    max_passes: u32,
    pause: Duration,
}

impl GapReconciler {
    pub fn new(planner: ChunkPlanner, max_passes: u32, pause: Duration) -> Self {
        Self {
            planner,
            max_passes,
            pause,
        }
    }

    /// Fetch every currently missing sub-range of `target.window`, up to `max_passes`
    /// times, stopping early once nothing is missing or `should_stop` reports true.
    ///
    /// Fetch and import failures are logged and leave the gap for the next pass.
    pub async fn reconcile<E, S>(
        &self,
        target: &ReconcileTarget<'_>,
        exchange: &E,
        store: &S,
        should_stop: &(dyn Fn() -> bool + Send + Sync),
    ) -> Result<ReconcileReport, StoreError>
    where
        E: ExchangeClient + ?Sized,
        S: CandleStore + ?Sized,
    {
        let plan = self
            .planner
            .plan(target.timeframe, exchange.max_rows_per_request());
        let mut report = ReconcileReport::default();

        let mut gaps = current_gaps(store, target)?;
        report.initial_gaps = gaps.len();

        while !gaps.is_empty() && report.passes < self.max_passes {
            report.passes += 1;
            info!(
                component = "gap_reconciler",
                event = "reconcile.pass.start",
                symbol = target.symbol,
                timeframe = target.timeframe.as_str(),
                pass = report.passes,
                gaps = gaps.len()
            );

            for gap in &gaps {
                for window in plan.windows(*gap) {
                    if should_stop() {
                        report.stopped = true;
                        report.remaining_gaps = current_gaps(store, target)?;
                        return Ok(report);
                    }
                    report.candles_imported +=
                        fill_window(exchange, store, target, window, plan.rows_per_chunk).await;
                    tokio::time::sleep(self.pause).await;
                }
            }

            gaps = current_gaps(store, target)?;
        }

        if !gaps.is_empty() {
            warn!(
                component = "gap_reconciler",
                event = "reconcile.gaps_remaining",
                symbol = target.symbol,
                timeframe = target.timeframe.as_str(),
                passes = report.passes,
                remaining = gaps.len()
            );
        }
        report.remaining_gaps = gaps;
        Ok(report)
    }
}

fn current_gaps<S>(store: &S, target: &ReconcileTarget<'_>) -> Result<Vec<DateRange>, StoreError>
where
    S: CandleStore + ?Sized,
{
    let available = store.available_ranges(target.symbol_id, target.timeframe)?;
    // A window that does not start on a candle boundary leaves a sliver shorter than one
    // candle before the first open time. No fetch can fill it.
    let step = target.timeframe.duration();
    Ok(missing_ranges(&available, target.window)
        .into_iter()
        .filter(|gap| gap.duration() >= step)
        .collect())
}

async fn fill_window<E, S>(
    exchange: &E,
    store: &S,
    target: &ReconcileTarget<'_>,
    window: DateRange,
    limit: u32,
) -> u64
where
    E: ExchangeClient + ?Sized,
    S: CandleStore + ?Sized,
{
    let rows = match exchange
        .fetch_klines(target.symbol, target.timeframe, window, limit)
        .await
    {
        Ok(rows) => rows,
        Err(err) => {
            warn!(
                component = "gap_reconciler",
                event = "reconcile.fetch_failed",
                symbol = target.symbol,
                start = %window.start,
                end = %window.end,
                error = %err
            );
            return 0;
        }
    };

    let candles: Vec<_> = rows
        .iter()
        .filter_map(|row| row.to_candle(target.symbol_id, target.timeframe))
        .filter(|candle| candle.open_time >= window.start && candle.open_time < window.end)
        .collect();
    if candles.is_empty() {
        return 0;
    }

    match store.upsert_candles(&candles) {
        Ok(written) => written as u64,
        Err(err) => {
            warn!(
                component = "gap_reconciler",
                event = "reconcile.import_failed",
                symbol = target.symbol,
                start = %window.start,
                end = %window.end,
                error = %err
            );
            0
        }
    }
}
