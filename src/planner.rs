//! Chunk sizing and retry decisions for the download loop.
//!
//! Both collaborators are pure: they take plain inputs and return plans or decisions, so
//! the worker injects them instead of reaching for shared state.

use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};

use crate::config::DownloadConfig;
use crate::exchange::ExchangeError;
use crate::model::{DateRange, Timeframe};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlan {
    pub timeframe: Timeframe,
    pub rows_per_chunk: u32,
    pub span: ChronoDuration,
}

impl ChunkPlan {
    /// Half-open window starting at `cursor`, clipped to `end`.
    pub fn next_window(&self, cursor: DateTime<Utc>, end: DateTime<Utc>) -> DateRange {
        DateRange {
            start: cursor,
            end: (cursor + self.span).min(end),
        }
    }

    /// Consecutive windows covering `range` with no overlap and no gap.
    pub fn windows(&self, range: DateRange) -> ChunkWindows {
        ChunkWindows {
            plan: *self,
            cursor: range.start,
            end: range.end,
        }
    }
}

pub struct ChunkWindows {
    plan: ChunkPlan,
    cursor: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl Iterator for ChunkWindows {
    type Item = DateRange;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor >= self.end {
            return None;
        }
        let window = self.plan.next_window(self.cursor, self.end);
        self.cursor = window.end;
        Some(window)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlanner {
    target_rows: u32,
}

impl ChunkPlanner {
    pub fn new(target_rows: u32) -> Self {
        Self {
            target_rows: target_rows.max(1),
        }
    }

    pub fn from_config(config: &DownloadConfig) -> Self {
        Self::new(config.target_rows_per_request)
    }

    /// Plan for `timeframe` under an exchange cap of `row_cap` rows per request.
    pub fn plan(&self, timeframe: Timeframe, row_cap: u32) -> ChunkPlan {
        let rows = self.target_rows.min(row_cap).max(1);
        ChunkPlan {
            timeframe,
            rows_per_chunk: rows,
            span: timeframe.duration() * rows as i32,
        }
    }
}

/// Expected number of candles in `range`: `ceil(span / candle duration)`, at least 1.
pub fn estimate_candles(range: DateRange, timeframe: Timeframe) -> u64 {
    let span_ms = range.duration().num_milliseconds().max(0);
    let step_ms = timeframe.duration_ms();
    let estimate = (span_ms + step_ms - 1) / step_ms;
    estimate.max(1) as u64
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Sleep for `delay`, then fetch the same chunk again as retry number `attempt`.
    Retry { attempt: u32, delay: Duration },
    GiveUp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &DownloadConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: config.retry_base_delay,
        }
    }

    /// `retries_so_far` counts failed attempts already retried for the current chunk.
    pub fn decide(&self, error: &ExchangeError, retries_so_far: u32) -> RetryDecision {
        if !error.is_transient() || retries_so_far >= self.max_retries {
            return RetryDecision::GiveUp;
        }
        let attempt = retries_so_far.saturating_add(1);
        RetryDecision::Retry {
            attempt,
            delay: self.delay_for(attempt),
        }
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.min(16);
        self.base_delay.saturating_mul(factor)
    }
}
