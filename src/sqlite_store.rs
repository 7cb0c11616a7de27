//! SQLite-backed implementation of the symbol, candle and job stores.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::model::{
    cancel_allowed, ActiveJobsQuery, AssetType, CancelOutcome, Candle, DataSource, DateRange,
    DownloadJob, InventoryItem, InventoryQuery, JobId, JobSortField, JobStatus, Page,
    SortDirection, Symbol, SymbolId, Timeframe, ALL_JOB_STATUSES,
};
use crate::store::{
    contiguous_ranges, CandleStore, JobStore, JobsSummary, NewDownloadJob, NewSymbol,
    ProgressUpdate, StatusCount, StoreError, SymbolStore,
};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS symbols (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    symbol TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL,
    exchange TEXT NOT NULL,
    asset_type TEXT NOT NULL,
    is_active INTEGER NOT NULL DEFAULT 1,
    data_available INTEGER NOT NULL DEFAULT 0,
    created_at_ms INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS candles (
    symbol_id INTEGER NOT NULL,
    timeframe TEXT NOT NULL,
    open_time_ms INTEGER NOT NULL,
    open REAL NOT NULL,
    high REAL NOT NULL,
    low REAL NOT NULL,
    close REAL NOT NULL,
    volume REAL NOT NULL,
    PRIMARY KEY(symbol_id, timeframe, open_time_ms)
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS download_jobs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    symbol TEXT NOT NULL,
    symbol_id INTEGER NOT NULL,
    source TEXT NOT NULL,
    timeframe TEXT NOT NULL,
    start_ms INTEGER NOT NULL,
    end_ms INTEGER NOT NULL,
    status TEXT NOT NULL,
    progress REAL NOT NULL DEFAULT 0,
    processed_candles INTEGER NOT NULL DEFAULT 0,
    total_candles INTEGER NOT NULL DEFAULT 0,
    retries INTEGER NOT NULL DEFAULT 0,
    error TEXT,
    created_at_ms INTEGER NOT NULL,
    updated_at_ms INTEGER NOT NULL,
    last_processed_at_ms INTEGER
);

CREATE INDEX IF NOT EXISTS idx_download_jobs_status ON download_jobs(status, created_at_ms);
";

const JOB_COLUMNS: &str = "id, symbol, symbol_id, source, timeframe, start_ms, end_ms, status, \
     progress, processed_candles, total_candles, retries, error, created_at_ms, updated_at_ms, \
     last_processed_at_ms";

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.execute_batch(
            "
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;
            PRAGMA temp_store=MEMORY;
            ",
        )?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }
}

impl SymbolStore for SqliteStore {
    fn find_symbol(&self, symbol: &str) -> Result<Option<Symbol>, StoreError> {
        let conn = self.conn()?;
        find_symbol_row(&conn, &normalize_symbol(symbol))
    }

    fn create_symbol(&self, symbol: &NewSymbol) -> Result<Symbol, StoreError> {
        let conn = self.conn()?;
        let ticker = normalize_symbol(&symbol.symbol);
        conn.execute(
            "
            INSERT INTO symbols (symbol, name, exchange, asset_type, created_at_ms)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(symbol) DO NOTHING
            ",
            params![
                ticker,
                symbol.name,
                symbol.exchange,
                symbol.asset_type.as_str(),
                Utc::now().timestamp_millis()
            ],
        )?;
        find_symbol_row(&conn, &ticker)?
            .ok_or_else(|| StoreError::Corrupt(format!("symbol {ticker} vanished after insert")))
    }

    fn set_data_available(&self, symbol_id: SymbolId, available: bool) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE symbols SET data_available = ?2 WHERE id = ?1",
            params![symbol_id, available],
        )?;
        Ok(())
    }
}

impl CandleStore for SqliteStore {
    fn upsert_candles(&self, candles: &[Candle]) -> Result<usize, StoreError> {
        if candles.is_empty() {
            return Ok(0);
        }

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut written = 0;
        {
            let mut stmt = tx.prepare(
                "
                INSERT INTO candles (
                    symbol_id, timeframe, open_time_ms, open, high, low, close, volume
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                ON CONFLICT(symbol_id, timeframe, open_time_ms) DO UPDATE SET
                    open = excluded.open,
                    high = excluded.high,
                    low = excluded.low,
                    close = excluded.close,
                    volume = excluded.volume
                ",
            )?;

            for candle in candles {
                written += stmt.execute(params![
                    candle.symbol_id,
                    candle.timeframe.as_str(),
                    candle.open_time.timestamp_millis(),
                    candle.open,
                    candle.high,
                    candle.low,
                    candle.close,
                    candle.volume,
                ])?;
            }
        }
        tx.commit()?;

        Ok(written)
    }

    fn available_ranges(
        &self,
        symbol_id: SymbolId,
        timeframe: Timeframe,
    ) -> Result<Vec<DateRange>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "
            SELECT open_time_ms
            FROM candles
            WHERE symbol_id = ?1 AND timeframe = ?2
            ORDER BY open_time_ms
            ",
        )?;
        let open_times = stmt
            .query_map(params![symbol_id, timeframe.as_str()], |row| {
                row.get::<_, i64>(0)
            })?
            .collect::<Result<Vec<_>, _>>()?;

        contiguous_ranges(&open_times, timeframe.duration_ms())
            .into_iter()
            .map(|(start, end)| {
                Ok(DateRange {
                    start: from_ms(start)?,
                    end: from_ms(end)?,
                })
            })
            .collect()
    }

    fn count_candles(
        &self,
        symbol_id: SymbolId,
        timeframe: Timeframe,
        range: DateRange,
    ) -> Result<u64, StoreError> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "
            SELECT COUNT(*)
            FROM candles
            WHERE symbol_id = ?1
              AND timeframe = ?2
              AND open_time_ms >= ?3
              AND open_time_ms < ?4
            ",
            params![
                symbol_id,
                timeframe.as_str(),
                range.start.timestamp_millis(),
                range.end.timestamp_millis()
            ],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn delete_candles(
        &self,
        symbol_id: SymbolId,
        timeframe: Timeframe,
        range: DateRange,
    ) -> Result<usize, StoreError> {
        let conn = self.conn()?;
        let deleted = conn.execute(
            "
            DELETE FROM candles
            WHERE symbol_id = ?1
              AND timeframe = ?2
              AND open_time_ms >= ?3
              AND open_time_ms < ?4
            ",
            params![
                symbol_id,
                timeframe.as_str(),
                range.start.timestamp_millis(),
                range.end.timestamp_millis()
            ],
        )?;
        Ok(deleted)
    }

    fn inventory(&self, query: &InventoryQuery) -> Result<Page<InventoryItem>, StoreError> {
        let conn = self.conn()?;
        let asset_type = query.asset_type.map(AssetType::as_str);
        let exchange = query.exchange.as_deref();

        let total: i64 = conn.query_row(
            "
            SELECT COUNT(*) FROM (
                SELECT 1
                FROM candles c
                JOIN symbols s ON s.id = c.symbol_id
                WHERE (?1 IS NULL OR s.asset_type = ?1)
                  AND (?2 IS NULL OR LOWER(s.exchange) = LOWER(?2))
                GROUP BY c.symbol_id, c.timeframe
            )
            ",
            params![asset_type, exchange],
            |row| row.get(0),
        )?;

        let mut stmt = conn.prepare(
            "
            SELECT s.id, s.symbol, s.name, s.exchange, s.asset_type, c.timeframe,
                   COUNT(*), MIN(c.open_time_ms), MAX(c.open_time_ms)
            FROM candles c
            JOIN symbols s ON s.id = c.symbol_id
            WHERE (?1 IS NULL OR s.asset_type = ?1)
              AND (?2 IS NULL OR LOWER(s.exchange) = LOWER(?2))
            GROUP BY c.symbol_id, c.timeframe
            ORDER BY s.symbol ASC, c.timeframe ASC
            LIMIT ?3 OFFSET ?4
            ",
        )?;
        let raw_rows = stmt
            .query_map(
                params![
                    asset_type,
                    exchange,
                    i64::from(query.page.limit),
                    query.page.offset() as i64
                ],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, i64>(6)?,
                        row.get::<_, i64>(7)?,
                        row.get::<_, i64>(8)?,
                    ))
                },
            )?
            .collect::<Result<Vec<_>, _>>()?;

        let mut items = Vec::with_capacity(raw_rows.len());
        for (id, symbol, name, exchange, asset_type, timeframe, count, first, last) in raw_rows {
            items.push(InventoryItem {
                symbol_id: id,
                symbol,
                name,
                exchange,
                asset_type: AssetType::parse_lenient(&asset_type),
                timeframe: parse_timeframe(&timeframe)?,
                candle_count: count as u64,
                first_candle: from_ms(first)?,
                last_candle: from_ms(last)?,
            });
        }

        Ok(Page {
            items,
            total: total as u64,
            page: query.page.page,
            limit: query.page.limit,
        })
    }
}

impl JobStore for SqliteStore {
    fn create_job(&self, job: &NewDownloadJob) -> Result<DownloadJob, StoreError> {
        let conn = self.conn()?;
        let now_ms = Utc::now().timestamp_millis();
        conn.execute(
            "
            INSERT INTO download_jobs (
                symbol, symbol_id, source, timeframe, start_ms, end_ms, status,
                created_at_ms, updated_at_ms
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
            ",
            params![
                normalize_symbol(&job.symbol),
                job.symbol_id,
                job.source.as_str(),
                job.timeframe.as_str(),
                job.range.start.timestamp_millis(),
                job.range.end.timestamp_millis(),
                JobStatus::Pending.as_str(),
                now_ms
            ],
        )?;
        let id = conn.last_insert_rowid();
        load_job(&conn, id)?
            .ok_or_else(|| StoreError::Corrupt(format!("job {id} vanished after insert")))
    }

    fn get_job(&self, id: JobId) -> Result<Option<DownloadJob>, StoreError> {
        let conn = self.conn()?;
        load_job(&conn, id)
    }

    fn mark_started(&self, id: JobId) -> Result<bool, StoreError> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "
            UPDATE download_jobs
            SET status = ?2, updated_at_ms = ?3
            WHERE id = ?1 AND status = ?4
            ",
            params![
                id,
                JobStatus::InProgress.as_str(),
                Utc::now().timestamp_millis(),
                JobStatus::Pending.as_str()
            ],
        )?;
        Ok(changed == 1)
    }

    fn update_progress(&self, id: JobId, update: &ProgressUpdate) -> Result<bool, StoreError> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "
            UPDATE download_jobs
            SET progress = MAX(progress, ?2),
                processed_candles = ?3,
                total_candles = ?4,
                retries = ?5,
                error = ?6,
                last_processed_at_ms = COALESCE(?7, last_processed_at_ms),
                updated_at_ms = ?8
            WHERE id = ?1 AND status = ?9
            ",
            params![
                id,
                update.progress,
                update.processed_candles as i64,
                update.total_candles as i64,
                update.retries,
                update.error,
                update.last_processed_at.map(|ts| ts.timestamp_millis()),
                Utc::now().timestamp_millis(),
                JobStatus::InProgress.as_str()
            ],
        )?;
        Ok(changed == 1)
    }

    fn finish_job(
        &self,
        id: JobId,
        status: JobStatus,
        update: &ProgressUpdate,
    ) -> Result<bool, StoreError> {
        if !status.is_terminal() || status == JobStatus::Cancelled {
            return Err(StoreError::InvalidTransition(status));
        }

        let conn = self.conn()?;
        let changed = conn.execute(
            "
            UPDATE download_jobs
            SET status = ?2,
                progress = ?3,
                processed_candles = ?4,
                total_candles = ?5,
                retries = ?6,
                error = ?7,
                last_processed_at_ms = COALESCE(?8, last_processed_at_ms),
                updated_at_ms = ?9
            WHERE id = ?1 AND status = ?10
            ",
            params![
                id,
                status.as_str(),
                update.progress,
                update.processed_candles as i64,
                update.total_candles as i64,
                update.retries,
                update.error,
                update.last_processed_at.map(|ts| ts.timestamp_millis()),
                Utc::now().timestamp_millis(),
                JobStatus::InProgress.as_str()
            ],
        )?;
        Ok(changed == 1)
    }

    fn fail_job(&self, id: JobId, reason: &str) -> Result<bool, StoreError> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "
            UPDATE download_jobs
            SET status = ?2, error = ?3, updated_at_ms = ?4
            WHERE id = ?1 AND status IN (?5, ?6)
            ",
            params![
                id,
                JobStatus::Failed.as_str(),
                reason,
                Utc::now().timestamp_millis(),
                JobStatus::Pending.as_str(),
                JobStatus::InProgress.as_str()
            ],
        )?;
        Ok(changed == 1)
    }

    fn cancel_job(
        &self,
        id: JobId,
        force: bool,
        reason: &str,
    ) -> Result<CancelOutcome, StoreError> {
        let conn = self.conn()?;
        let current = conn
            .query_row(
                "SELECT status, processed_candles FROM download_jobs WHERE id = ?1",
                params![id],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)),
            )
            .optional()?;

        let Some((raw_status, processed)) = current else {
            return Ok(CancelOutcome::NotFound);
        };
        let status = parse_status(&raw_status)?;
        if !cancel_allowed(status, processed.max(0) as u64, force) {
            return Ok(CancelOutcome::NotCancellable { status });
        }

        conn.execute(
            "
            UPDATE download_jobs
            SET status = ?2, error = ?3, updated_at_ms = ?4
            WHERE id = ?1 AND status = ?5
            ",
            params![
                id,
                JobStatus::Cancelled.as_str(),
                reason,
                Utc::now().timestamp_millis(),
                raw_status
            ],
        )?;
        Ok(CancelOutcome::Cancelled {
            previous_status: status,
        })
    }

    fn list_active(&self, query: &ActiveJobsQuery) -> Result<Page<DownloadJob>, StoreError> {
        let conn = self.conn()?;
        let source = query.source.map(DataSource::as_str);

        let total: i64 = conn.query_row(
            "
            SELECT COUNT(*)
            FROM download_jobs
            WHERE status IN (?1, ?2) AND (?3 IS NULL OR source = ?3)
            ",
            params![
                JobStatus::Pending.as_str(),
                JobStatus::InProgress.as_str(),
                source
            ],
            |row| row.get(0),
        )?;

        let direction = sort_direction_sql(query.direction);
        let sql = format!(
            "
            SELECT {JOB_COLUMNS}
            FROM download_jobs
            WHERE status IN (?1, ?2) AND (?3 IS NULL OR source = ?3)
            ORDER BY {column} {direction}, id {direction}
            LIMIT ?4 OFFSET ?5
            ",
            column = sort_column_sql(query.sort_by),
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(
                params![
                    JobStatus::Pending.as_str(),
                    JobStatus::InProgress.as_str(),
                    source,
                    i64::from(query.page.limit),
                    query.page.offset() as i64
                ],
                JobRow::from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Page {
            items: rows
                .into_iter()
                .map(JobRow::into_job)
                .collect::<Result<_, _>>()?,
            total: total as u64,
            page: query.page.page,
            limit: query.page.limit,
        })
    }

    fn summary(&self, now: DateTime<Utc>, recent: usize) -> Result<JobsSummary, StoreError> {
        let conn = self.conn()?;
        let since_ms = (now - chrono::Duration::hours(24)).timestamp_millis();

        let mut status_counts: BTreeMap<JobStatus, StatusCount> = ALL_JOB_STATUSES
            .iter()
            .map(|status| (*status, StatusCount::default()))
            .collect();
        let mut stmt = conn.prepare(
            "
            SELECT status,
                   COUNT(*),
                   COALESCE(SUM(CASE WHEN created_at_ms >= ?1 THEN 1 ELSE 0 END), 0)
            FROM download_jobs
            GROUP BY status
            ",
        )?;
        let raw_counts = stmt
            .query_map(params![since_ms], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        for (status, total, last_24h) in raw_counts {
            status_counts.insert(
                parse_status(&status)?,
                StatusCount {
                    total: total as u64,
                    last_24h: last_24h as u64,
                },
            );
        }

        let mut source_counts = BTreeMap::new();
        let mut stmt =
            conn.prepare("SELECT source, COUNT(*) FROM download_jobs GROUP BY source")?;
        let raw_sources = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        for (source, total) in raw_sources {
            source_counts.insert(parse_source(&source)?, total as u64);
        }

        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM download_jobs ORDER BY created_at_ms DESC, id DESC LIMIT ?1"
        );
        let mut stmt = conn.prepare(&sql)?;
        let recent_jobs = stmt
            .query_map(params![recent as i64], JobRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .map(JobRow::into_job)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(JobsSummary {
            status_counts,
            source_counts,
            recent_jobs,
        })
    }
}

/// Raw column values of one `download_jobs` row, converted after the statement finishes
/// so decode failures surface as [`StoreError::Corrupt`].
struct JobRow {
    id: i64,
    symbol: String,
    symbol_id: i64,
    source: String,
    timeframe: String,
    start_ms: i64,
    end_ms: i64,
    status: String,
    progress: f64,
    processed_candles: i64,
    total_candles: i64,
    retries: i64,
    error: Option<String>,
    created_at_ms: i64,
    updated_at_ms: i64,
    last_processed_at_ms: Option<i64>,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            symbol: row.get(1)?,
            symbol_id: row.get(2)?,
            source: row.get(3)?,
            timeframe: row.get(4)?,
            start_ms: row.get(5)?,
            end_ms: row.get(6)?,
            status: row.get(7)?,
            progress: row.get(8)?,
            processed_candles: row.get(9)?,
            total_candles: row.get(10)?,
            retries: row.get(11)?,
            error: row.get(12)?,
            created_at_ms: row.get(13)?,
            updated_at_ms: row.get(14)?,
            last_processed_at_ms: row.get(15)?,
        })
    }

    fn into_job(self) -> Result<DownloadJob, StoreError> {
        Ok(DownloadJob {
            id: self.id,
            symbol: self.symbol,
            symbol_id: self.symbol_id,
            source: parse_source(&self.source)?,
            timeframe: parse_timeframe(&self.timeframe)?,
            start: from_ms(self.start_ms)?,
            end: from_ms(self.end_ms)?,
            status: parse_status(&self.status)?,
            progress: self.progress,
            processed_candles: self.processed_candles.max(0) as u64,
            total_candles: self.total_candles.max(0) as u64,
            retries: u32::try_from(self.retries.max(0)).unwrap_or(u32::MAX),
            error: self.error,
            created_at: from_ms(self.created_at_ms)?,
            updated_at: from_ms(self.updated_at_ms)?,
            last_processed_at: self.last_processed_at_ms.map(from_ms).transpose()?,
        })
    }
}

fn load_job(conn: &Connection, id: JobId) -> Result<Option<DownloadJob>, StoreError> {
    let sql = format!("SELECT {JOB_COLUMNS} FROM download_jobs WHERE id = ?1");
    conn.query_row(&sql, params![id], JobRow::from_row)
        .optional()?
        .map(JobRow::into_job)
        .transpose()
}

fn find_symbol_row(conn: &Connection, ticker: &str) -> Result<Option<Symbol>, StoreError> {
    let raw = conn
        .query_row(
            "
            SELECT id, symbol, name, exchange, asset_type, is_active, data_available, created_at_ms
            FROM symbols
            WHERE symbol = ?1
            ",
            params![ticker],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, bool>(5)?,
                    row.get::<_, bool>(6)?,
                    row.get::<_, i64>(7)?,
                ))
            },
        )
        .optional()?;

    raw.map(
        |(id, symbol, name, exchange, asset_type, is_active, data_available, created_at_ms)| {
            Ok(Symbol {
                id,
                symbol,
                name,
                exchange,
                asset_type: AssetType::parse_lenient(&asset_type),
                is_active,
                data_available,
                created_at: from_ms(created_at_ms)?,
            })
        },
    )
    .transpose()
}

fn normalize_symbol(symbol: &str) -> String {
    symbol.trim().to_ascii_uppercase()
}

fn sort_column_sql(field: JobSortField) -> &'static str {
    match field {
        JobSortField::CreatedAt => "created_at_ms",
        JobSortField::UpdatedAt => "updated_at_ms",
        JobSortField::Symbol => "symbol",
        JobSortField::Status => "status",
        JobSortField::Progress => "progress",
    }
}

fn sort_direction_sql(direction: SortDirection) -> &'static str {
    match direction {
        SortDirection::Asc => "ASC",
        SortDirection::Desc => "DESC",
    }
}

fn from_ms(ms: i64) -> Result<DateTime<Utc>, StoreError> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| StoreError::Corrupt(format!("timestamp out of range: {ms}")))
}

fn parse_status(raw: &str) -> Result<JobStatus, StoreError> {
    raw.parse::<JobStatus>().map_err(StoreError::Corrupt)
}

fn parse_source(raw: &str) -> Result<DataSource, StoreError> {
    raw.parse::<DataSource>()
        .map_err(|err| StoreError::Corrupt(err.to_string()))
}

fn parse_timeframe(raw: &str) -> Result<Timeframe, StoreError> {
    raw.parse::<Timeframe>()
        .map_err(|err| StoreError::Corrupt(err.to_string()))
}
