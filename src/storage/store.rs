//! SQLite-backed persistent store.
//!
//! Single-writer ACID store for the earnings calendar, historical moves,
//! domain caches, job status, and budget counters. WAL mode keeps reads
//! cheap while jobs write. Transactions are short; nothing holds the
//! connection across network I/O.

use std::path::Path;
use std::str::FromStr;

use chrono::NaiveDate;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::Decimal;
use tracing::{debug, warn};

use crate::domain::{EarningsEvent, EarningsTiming, HistoricalMove, Money, Percentage};
use crate::error::{AppError, AppResult};

const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS earnings_calendar (
    ticker        TEXT NOT NULL,
    earnings_date TEXT NOT NULL,
    timing        TEXT NOT NULL,
    confirmed     INTEGER NOT NULL DEFAULT 0,
    updated_at    INTEGER NOT NULL DEFAULT (strftime('%s', 'now')),
    PRIMARY KEY (ticker, earnings_date)
) WITHOUT ROWID;

CREATE INDEX IF NOT EXISTS idx_earnings_by_date
    ON earnings_calendar(earnings_date, ticker);

CREATE TABLE IF NOT EXISTS historical_moves (
    ticker            TEXT NOT NULL,
    earnings_date     TEXT NOT NULL,
    prev_close        TEXT NOT NULL,
    earnings_close    TEXT NOT NULL,
    close_move_pct    TEXT NOT NULL,
    gap_move_pct      TEXT NOT NULL,
    intraday_move_pct TEXT NOT NULL,
    PRIMARY KEY (ticker, earnings_date)
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS sentiment_cache (
    ticker        TEXT NOT NULL,
    earnings_date TEXT NOT NULL,
    payload       TEXT NOT NULL,
    inserted_at   INTEGER NOT NULL,
    PRIMARY KEY (ticker, earnings_date)
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS vrp_cache (
    ticker      TEXT NOT NULL,
    expiration  TEXT NOT NULL,
    payload     TEXT NOT NULL,
    inserted_at INTEGER NOT NULL,
    PRIMARY KEY (ticker, expiration)
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS job_status (
    date        TEXT NOT NULL,
    job         TEXT NOT NULL,
    status      TEXT NOT NULL,
    started_at  INTEGER,
    finished_at INTEGER,
    error       TEXT,
    PRIMARY KEY (date, job)
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS budget (
    service TEXT NOT NULL,
    day     TEXT NOT NULL,
    calls   INTEGER NOT NULL DEFAULT 0,
    cost    TEXT NOT NULL DEFAULT '0',
    PRIMARY KEY (service, day)
) WITHOUT ROWID;
"#;

pub struct Store {
    conn: Mutex<Connection>,
}

#[derive(Debug, Clone)]
pub struct JobStatusRow {
    pub date: NaiveDate,
    pub job: String,
    pub status: String,
    pub started_at: Option<i64>,
    pub finished_at: Option<i64>,
    pub error: Option<String>,
}

impl JobStatusRow {
    pub fn is_terminal(&self) -> bool {
        matches!(self.status.as_str(), "success" | "failed" | "skipped")
    }
}

#[derive(Debug, Clone)]
pub struct CachedPayload {
    pub payload: String,
    pub inserted_at: i64,
}

impl Store {
    pub fn open(path: impl AsRef<Path>) -> AppResult<Self> {
        let conn = Connection::open(path.as_ref())
            .map_err(|e| AppError::Db(format!("open {}: {e}", path.as_ref().display())))?;
        conn.execute_batch(SCHEMA_SQL)?;
        debug!(path = %path.as_ref().display(), "store opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn in_memory() -> AppResult<Self> {
        let conn = Connection::open_in_memory().map_err(|e| AppError::Db(e.to_string()))?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    // ---- earnings calendar -------------------------------------------------

    pub fn upsert_earnings(&self, event: &EarningsEvent) -> AppResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO earnings_calendar (ticker, earnings_date, timing, confirmed)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(ticker, earnings_date)
             DO UPDATE SET timing = ?3, confirmed = ?4, updated_at = strftime('%s', 'now')",
            params![
                event.ticker,
                event.date.to_string(),
                event.timing.as_str(),
                event.confirmed as i64
            ],
        )?;
        Ok(())
    }

    pub fn earnings_between(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> AppResult<Vec<EarningsEvent>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT ticker, earnings_date, timing, confirmed
             FROM earnings_calendar
             WHERE earnings_date >= ?1 AND earnings_date <= ?2
             ORDER BY earnings_date, ticker",
        )?;
        let rows = stmt.query_map(params![start.to_string(), end.to_string()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(3)?,
            ))
        })?;

        let mut events = Vec::new();
        for row in rows {
            let (ticker, date, timing, confirmed) = row?;
            let date = parse_date(&date)?;
            events.push(EarningsEvent {
                ticker,
                date,
                timing: EarningsTiming::parse(&timing),
                confirmed: confirmed != 0,
            });
        }
        Ok(events)
    }

    // ---- historical moves --------------------------------------------------

    /// Append-only: a move observed once never changes.
    pub fn insert_historical_move(&self, m: &HistoricalMove) -> AppResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR IGNORE INTO historical_moves
             (ticker, earnings_date, prev_close, earnings_close,
              close_move_pct, gap_move_pct, intraday_move_pct)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                m.ticker,
                m.earnings_date.to_string(),
                m.prev_close.amount().to_string(),
                m.earnings_close.amount().to_string(),
                m.close_move_pct.value().to_string(),
                m.gap_move_pct.value().to_string(),
                m.intraday_move_pct.value().to_string(),
            ],
        )?;
        Ok(())
    }

    /// Most recent first.
    pub fn historical_moves(&self, ticker: &str, limit: usize) -> AppResult<Vec<HistoricalMove>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT ticker, earnings_date, prev_close, earnings_close,
                    close_move_pct, gap_move_pct, intraday_move_pct
             FROM historical_moves
             WHERE ticker = ?1
             ORDER BY earnings_date DESC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![ticker, limit as i64], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, String>(6)?,
            ))
        })?;

        let mut moves = Vec::new();
        for row in rows {
            let (ticker, date, prev, close, close_pct, gap_pct, intraday_pct) = row?;
            moves.push(HistoricalMove {
                ticker,
                earnings_date: parse_date(&date)?,
                prev_close: Money::new(parse_decimal(&prev)?),
                earnings_close: Money::new(parse_decimal(&close)?),
                close_move_pct: Percentage::new(parse_decimal(&close_pct)?)?,
                gap_move_pct: Percentage::new(parse_decimal(&gap_pct)?)?,
                intraday_move_pct: Percentage::new(parse_decimal(&intraday_pct)?)?,
            });
        }
        Ok(moves)
    }

    // ---- domain caches -----------------------------------------------------

    pub fn put_sentiment(
        &self,
        ticker: &str,
        earnings_date: NaiveDate,
        payload: &str,
        now_epoch: i64,
    ) -> AppResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO sentiment_cache (ticker, earnings_date, payload, inserted_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(ticker, earnings_date)
             DO UPDATE SET payload = ?3, inserted_at = ?4",
            params![ticker, earnings_date.to_string(), payload, now_epoch],
        )?;
        Ok(())
    }

    pub fn get_sentiment(
        &self,
        ticker: &str,
        earnings_date: NaiveDate,
    ) -> AppResult<Option<CachedPayload>> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT payload, inserted_at FROM sentiment_cache
                 WHERE ticker = ?1 AND earnings_date = ?2",
                params![ticker, earnings_date.to_string()],
                |row| {
                    Ok(CachedPayload {
                        payload: row.get(0)?,
                        inserted_at: row.get(1)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    pub fn put_vrp(
        &self,
        ticker: &str,
        expiration: NaiveDate,
        payload: &str,
        now_epoch: i64,
    ) -> AppResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO vrp_cache (ticker, expiration, payload, inserted_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(ticker, expiration)
             DO UPDATE SET payload = ?3, inserted_at = ?4",
            params![ticker, expiration.to_string(), payload, now_epoch],
        )?;
        Ok(())
    }

    pub fn get_vrp(&self, ticker: &str, expiration: NaiveDate) -> AppResult<Option<CachedPayload>> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT payload, inserted_at FROM vrp_cache
                 WHERE ticker = ?1 AND expiration = ?2",
                params![ticker, expiration.to_string()],
                |row| {
                    Ok(CachedPayload {
                        payload: row.get(0)?,
                        inserted_at: row.get(1)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    // ---- job status --------------------------------------------------------

    pub fn job_status(&self, date: NaiveDate, job: &str) -> AppResult<Option<JobStatusRow>> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT status, started_at, finished_at, error
                 FROM job_status WHERE date = ?1 AND job = ?2",
                params![date.to_string(), job],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Option<i64>>(1)?,
                        row.get::<_, Option<i64>>(2)?,
                        row.get::<_, Option<String>>(3)?,
                    ))
                },
            )
            .optional()?;
        Ok(row.map(|(status, started_at, finished_at, error)| JobStatusRow {
            date,
            job: job.to_string(),
            status,
            started_at,
            finished_at,
            error,
        }))
    }

    pub fn mark_job_running(&self, date: NaiveDate, job: &str, now_epoch: i64) -> AppResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO job_status (date, job, status, started_at)
             VALUES (?1, ?2, 'running', ?3)
             ON CONFLICT(date, job)
             DO UPDATE SET status = 'running', started_at = ?3, finished_at = NULL, error = NULL",
            params![date.to_string(), job, now_epoch],
        )?;
        Ok(())
    }

    /// Record a terminal status. Terminal states are immutable for the day;
    /// an attempt to overwrite one is ignored and reported as `false`.
    pub fn mark_job_terminal(
        &self,
        date: NaiveDate,
        job: &str,
        status: &str,
        error: Option<&str>,
        now_epoch: i64,
    ) -> AppResult<bool> {
        if !matches!(status, "success" | "failed" | "skipped") {
            return Err(AppError::Invalid(format!("not a terminal job status: {status}")));
        }
        let conn = self.conn.lock();
        let existing: Option<String> = conn
            .query_row(
                "SELECT status FROM job_status WHERE date = ?1 AND job = ?2",
                params![date.to_string(), job],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(prev) = existing {
            if matches!(prev.as_str(), "success" | "failed" | "skipped") {
                warn!(job, date = %date, %prev, attempted = status, "terminal job status is immutable");
                return Ok(false);
            }
        }
        conn.execute(
            "INSERT INTO job_status (date, job, status, finished_at, error)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(date, job)
             DO UPDATE SET status = ?3, finished_at = ?4, error = ?5",
            params![date.to_string(), job, status, now_epoch, error],
        )?;
        Ok(true)
    }

    pub fn day_jobs(&self, date: NaiveDate) -> AppResult<Vec<JobStatusRow>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT job, status, started_at, finished_at, error
             FROM job_status WHERE date = ?1 ORDER BY job",
        )?;
        let rows = stmt.query_map(params![date.to_string()], |row| {
            Ok(JobStatusRow {
                date,
                job: row.get(0)?,
                status: row.get(1)?,
                started_at: row.get(2)?,
                finished_at: row.get(3)?,
                error: row.get(4)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    // ---- budget ------------------------------------------------------------

    /// Atomically add calls and cost to the (service, day) counter.
    pub fn budget_increment(
        &self,
        service: &str,
        day: NaiveDate,
        calls: u32,
        cost: Money,
    ) -> AppResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(AppError::from)?;
        let existing: Option<(i64, String)> = tx
            .query_row(
                "SELECT calls, cost FROM budget WHERE service = ?1 AND day = ?2",
                params![service, day.to_string()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let (prev_calls, prev_cost) = match existing {
            Some((c, cost_str)) => (c, parse_decimal(&cost_str)?),
            None => (0, Decimal::ZERO),
        };
        tx.execute(
            "INSERT INTO budget (service, day, calls, cost) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(service, day) DO UPDATE SET calls = ?3, cost = ?4",
            params![
                service,
                day.to_string(),
                prev_calls + i64::from(calls),
                (prev_cost + cost.amount()).to_string()
            ],
        )?;
        tx.commit().map_err(AppError::from)?;
        Ok(())
    }

    pub fn budget_day_calls(&self, service: &str, day: NaiveDate) -> AppResult<u32> {
        let conn = self.conn.lock();
        let calls: Option<i64> = conn
            .query_row(
                "SELECT calls FROM budget WHERE service = ?1 AND day = ?2",
                params![service, day.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(calls.unwrap_or(0).max(0) as u32)
    }

    /// Total cost for a month, `month` formatted as "YYYY-MM".
    pub fn budget_month_cost(&self, service: &str, month: &str) -> AppResult<Money> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT cost FROM budget WHERE service = ?1 AND day LIKE ?2 || '-%'",
        )?;
        let rows = stmt.query_map(params![service, month], |row| row.get::<_, String>(0))?;
        let mut total = Decimal::ZERO;
        for row in rows {
            total += parse_decimal(&row?)?;
        }
        Ok(Money::new(total))
    }

    /// Cheap liveness probe for health checks.
    pub fn ping(&self) -> AppResult<()> {
        let conn = self.conn.lock();
        conn.query_row("SELECT 1", [], |_| Ok(()))
            .map_err(AppError::from)
    }

    /// Make budget reads fail, to exercise the fail-closed gate.
    #[cfg(test)]
    pub fn break_budget_for_tests(&self) {
        let conn = self.conn.lock();
        conn.execute_batch("DROP TABLE budget").unwrap();
    }
}

fn parse_date(s: &str) -> AppResult<NaiveDate> {
    NaiveDate::from_str(s).map_err(|e| AppError::Db(format!("bad date {s}: {e}")))
}

fn parse_decimal(s: &str) -> AppResult<Decimal> {
    Decimal::from_str(s).map_err(|e| AppError::Db(format!("bad decimal {s}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn store() -> Store {
        Store::in_memory().unwrap()
    }

    fn sample_move(ticker: &str, date: NaiveDate, pct: f64) -> HistoricalMove {
        HistoricalMove {
            ticker: ticker.to_string(),
            earnings_date: date,
            prev_close: Money::from_f64(100.0).unwrap(),
            earnings_close: Money::from_f64(100.0 + pct).unwrap(),
            close_move_pct: Percentage::from_f64(pct).unwrap(),
            gap_move_pct: Percentage::from_f64(pct / 2.0).unwrap(),
            intraday_move_pct: Percentage::from_f64(pct * 1.2).unwrap(),
        }
    }

    #[test]
    fn earnings_upsert_by_ticker_and_date() {
        let s = store();
        let mut event = EarningsEvent {
            ticker: "NVDA".to_string(),
            date: d(2026, 8, 26),
            timing: EarningsTiming::Unknown,
            confirmed: false,
        };
        s.upsert_earnings(&event).unwrap();
        event.timing = EarningsTiming::Amc;
        event.confirmed = true;
        s.upsert_earnings(&event).unwrap();

        let events = s.earnings_between(d(2026, 8, 25), d(2026, 8, 28)).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].timing, EarningsTiming::Amc);
        assert!(events[0].confirmed);
    }

    #[test]
    fn earnings_window_is_inclusive_and_sorted() {
        let s = store();
        for (t, date) in [("B", d(2026, 8, 5)), ("A", d(2026, 8, 5)), ("C", d(2026, 8, 3))] {
            s.upsert_earnings(&EarningsEvent {
                ticker: t.to_string(),
                date,
                timing: EarningsTiming::Amc,
                confirmed: true,
            })
            .unwrap();
        }
        let events = s.earnings_between(d(2026, 8, 3), d(2026, 8, 5)).unwrap();
        let tickers: Vec<_> = events.iter().map(|e| e.ticker.as_str()).collect();
        assert_eq!(tickers, vec!["C", "A", "B"]);
    }

    #[test]
    fn historical_moves_append_only_most_recent_first() {
        let s = store();
        let first = sample_move("MU", d(2025, 12, 18), 11.21);
        s.insert_historical_move(&first).unwrap();
        s.insert_historical_move(&sample_move("MU", d(2025, 9, 25), 2.1)).unwrap();

        // A second observation of the same date must not overwrite.
        s.insert_historical_move(&sample_move("MU", d(2025, 12, 18), 99.0)).unwrap();

        let moves = s.historical_moves("MU", 10).unwrap();
        assert_eq!(moves.len(), 2);
        assert_eq!(moves[0].earnings_date, d(2025, 12, 18));
        assert_eq!(moves[0].close_move_pct.value(), dec!(11.21));
        assert_eq!(moves[1].earnings_date, d(2025, 9, 25));
    }

    #[test]
    fn sentiment_cache_round_trip() {
        let s = store();
        assert!(s.get_sentiment("NVDA", d(2026, 8, 26)).unwrap().is_none());
        s.put_sentiment("NVDA", d(2026, 8, 26), r#"{"direction":"bullish"}"#, 1_000)
            .unwrap();
        let cached = s.get_sentiment("NVDA", d(2026, 8, 26)).unwrap().unwrap();
        assert_eq!(cached.inserted_at, 1_000);
        assert!(cached.payload.contains("bullish"));
    }

    #[test]
    fn job_terminal_status_is_immutable() {
        let s = store();
        let date = d(2026, 8, 3);
        s.mark_job_running(date, "pre-market-prep", 100).unwrap();
        assert!(s.mark_job_terminal(date, "pre-market-prep", "success", None, 200).unwrap());

        // Second terminal write is refused.
        assert!(!s.mark_job_terminal(date, "pre-market-prep", "failed", Some("x"), 300).unwrap());
        let row = s.job_status(date, "pre-market-prep").unwrap().unwrap();
        assert_eq!(row.status, "success");
        assert!(row.is_terminal());
    }

    #[test]
    fn job_status_rejects_non_terminal_marks() {
        let s = store();
        assert!(matches!(
            s.mark_job_terminal(d(2026, 8, 3), "x", "running", None, 0),
            Err(AppError::Invalid(_))
        ));
    }

    #[test]
    fn budget_counters_accumulate() {
        let s = store();
        let day = d(2026, 8, 3);
        s.budget_increment("perplexity", day, 1, Money::from_f64(0.005).unwrap()).unwrap();
        s.budget_increment("perplexity", day, 2, Money::from_f64(0.010).unwrap()).unwrap();
        assert_eq!(s.budget_day_calls("perplexity", day).unwrap(), 3);

        s.budget_increment("perplexity", d(2026, 8, 4), 1, Money::from_f64(0.985).unwrap())
            .unwrap();
        let month = s.budget_month_cost("perplexity", "2026-08").unwrap();
        assert_eq!(month.amount(), dec!(1.000));

        // Different month untouched.
        assert_eq!(
            s.budget_month_cost("perplexity", "2026-07").unwrap(),
            Money::ZERO
        );
    }

    #[test]
    fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ivscan.db");
        {
            let s = Store::open(&path).unwrap();
            s.mark_job_running(d(2026, 8, 3), "test-job", 1).unwrap();
            s.mark_job_terminal(d(2026, 8, 3), "test-job", "success", None, 2).unwrap();
        }
        let s = Store::open(&path).unwrap();
        let row = s.job_status(d(2026, 8, 3), "test-job").unwrap().unwrap();
        assert_eq!(row.status, "success");
    }
}
