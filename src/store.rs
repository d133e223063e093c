use crate::models::{
    IndustryMetrics, IndustryRow, Instrument, InstrumentMetrics, InstrumentRecord, MetricsRow,
};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Result as SqliteResult, Row};
use std::path::Path;
use tracing::info;

/// SQLite store for instrument master data and metric snapshots.
///
/// Owns the single connection used by a run. Schema is created on open.
/// Snapshot and history writes live in [`crate::writer::MetricsWriter`].
#[derive(Debug)]
pub struct SqliteStore {
    conn: Connection,
}

/// Row counts of the append-only history tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryCounts {
    pub instrument_rows: usize,
    pub industry_rows: usize,
}

impl SqliteStore {
    /// Opens (or creates) a file-based database.
    ///
    /// # Errors
    /// Returns an error if the connection cannot be established or the schema cannot be created.
    pub fn new<P: AsRef<Path>>(db_path: P) -> SqliteResult<Self> {
        let conn = Connection::open(db_path)?;
        let store = SqliteStore { conn };
        store.ensure_schema()?;
        Ok(store)
    }

    /// Creates an in-memory database. Useful for testing.
    pub fn new_in_memory() -> SqliteResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = SqliteStore { conn };
        store.ensure_schema()?;
        Ok(store)
    }

    /// Creates tables and indexes if they don't exist.
    fn ensure_schema(&self) -> SqliteResult<()> {
        self.conn.execute_batch(
            "PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS tickers (
                id INTEGER PRIMARY KEY,
                symbol TEXT NOT NULL UNIQUE,
                company TEXT,
                industry TEXT,
                exchange TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_tickers_industry ON tickers(industry);

            CREATE TABLE IF NOT EXISTS ticker_stats (
                id INTEGER PRIMARY KEY,
                ticker_id INTEGER NOT NULL REFERENCES tickers(id),
                pe_ratio REAL,
                revenue_growth REAL,
                net_income_ttm REAL,
                debt_ratio REAL,
                latest_revenue REAL,
                calculated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_ticker_stats_ticker_id ON ticker_stats(ticker_id);

            CREATE TABLE IF NOT EXISTS ticker_stats_history (
                id INTEGER PRIMARY KEY,
                ticker_id INTEGER NOT NULL REFERENCES tickers(id),
                pe_ratio REAL,
                revenue_growth REAL,
                net_income_ttm REAL,
                debt_ratio REAL,
                latest_revenue REAL,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_ticker_stats_history_ticker_id
                ON ticker_stats_history(ticker_id);

            CREATE TABLE IF NOT EXISTS industry_stats (
                id INTEGER PRIMARY KEY,
                industry TEXT NOT NULL,
                avg_pe_ratio REAL,
                avg_revenue_growth REAL,
                sum_revenue REAL,
                calculated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_industry_stats_industry ON industry_stats(industry);

            CREATE TABLE IF NOT EXISTS industry_stats_history (
                id INTEGER PRIMARY KEY,
                industry TEXT NOT NULL,
                avg_pe_ratio REAL,
                avg_revenue_growth REAL,
                sum_revenue REAL,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_industry_stats_history_industry
                ON industry_stats_history(industry);",
        )
    }

    /// Checks if a table exists in the database.
    pub fn table_exists(&self, table_name: &str) -> SqliteResult<bool> {
        let mut stmt = self
            .conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' AND name=?1")?;
        stmt.exists([table_name])
    }

    /// Returns a reference to the underlying SQLite connection.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub(crate) fn connection_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    /// Inserts instruments whose symbol is not stored yet, in one transaction.
    ///
    /// Existing rows are left untouched. Returns the number of new rows.
    pub fn insert_new_instruments(&mut self, instruments: &[Instrument]) -> SqliteResult<usize> {
        let tx = self.conn.transaction()?;
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO tickers (symbol, company, industry, exchange)
                 VALUES (?1, ?2, ?3, ?4)",
            )?;
            for instrument in instruments {
                let changed = stmt.execute(params![
                    instrument.symbol,
                    instrument.company,
                    instrument.industry,
                    instrument.exchange,
                ])?;
                if changed > 0 {
                    info!(
                        "Inserted new ticker: {} ({})",
                        instrument.symbol, instrument.industry
                    );
                    inserted += changed;
                }
            }
        }
        tx.commit()?;
        Ok(inserted)
    }

    /// Looks up an instrument by symbol.
    pub fn instrument(&self, symbol: &str) -> SqliteResult<Option<InstrumentRecord>> {
        self.conn
            .query_row(
                "SELECT id, symbol, company, industry, exchange FROM tickers WHERE symbol = ?1",
                [symbol],
                |row| {
                    Ok(InstrumentRecord {
                        id: row.get(0)?,
                        instrument: Instrument {
                            symbol: row.get(1)?,
                            company: row.get(2)?,
                            industry: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
                            exchange: row.get(4)?,
                        },
                    })
                },
            )
            .optional()
    }

    pub fn instrument_count(&self) -> SqliteResult<usize> {
        self.count("SELECT COUNT(*) FROM tickers")
    }

    /// Current snapshot rows, ordered by symbol.
    pub fn instrument_snapshots(&self) -> SqliteResult<Vec<MetricsRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT t.symbol, s.pe_ratio, s.revenue_growth, s.net_income_ttm, s.debt_ratio,
                    s.latest_revenue, s.calculated_at
             FROM ticker_stats s JOIN tickers t ON s.ticker_id = t.id
             ORDER BY t.symbol, s.id",
        )?;
        let rows = stmt.query_map([], metrics_row)?;
        rows.collect()
    }

    /// History rows for one symbol, oldest first.
    pub fn instrument_history(&self, symbol: &str) -> SqliteResult<Vec<MetricsRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT t.symbol, h.pe_ratio, h.revenue_growth, h.net_income_ttm, h.debt_ratio,
                    h.latest_revenue, h.created_at
             FROM ticker_stats_history h JOIN tickers t ON h.ticker_id = t.id
             WHERE t.symbol = ?1
             ORDER BY h.id",
        )?;
        let rows = stmt.query_map([symbol], metrics_row)?;
        rows.collect()
    }

    /// Current industry aggregates, ordered by industry.
    pub fn industry_snapshots(&self) -> SqliteResult<Vec<IndustryRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT industry, avg_pe_ratio, avg_revenue_growth, sum_revenue, calculated_at
             FROM industry_stats ORDER BY industry, id",
        )?;
        let rows = stmt.query_map([], industry_row)?;
        rows.collect()
    }

    /// History rows for one industry, oldest first.
    pub fn industry_history(&self, industry: &str) -> SqliteResult<Vec<IndustryRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT industry, avg_pe_ratio, avg_revenue_growth, sum_revenue, created_at
             FROM industry_stats_history WHERE industry = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map([industry], industry_row)?;
        rows.collect()
    }

    pub fn history_counts(&self) -> SqliteResult<HistoryCounts> {
        Ok(HistoryCounts {
            instrument_rows: self.count("SELECT COUNT(*) FROM ticker_stats_history")?,
            industry_rows: self.count("SELECT COUNT(*) FROM industry_stats_history")?,
        })
    }

    fn count(&self, sql: &str) -> SqliteResult<usize> {
        let n: i64 = self.conn.query_row(sql, [], |row| row.get(0))?;
        Ok(n as usize)
    }
}

pub(crate) fn format_timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339()
}

fn parse_timestamp(idx: usize, raw: &str) -> SqliteResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::InvalidColumnType(
                idx,
                format!("Invalid timestamp: {}", e),
                rusqlite::types::Type::Text,
            )
        })
}

fn metrics_row(row: &Row<'_>) -> SqliteResult<MetricsRow> {
    let recorded_at: String = row.get(6)?;
    Ok(MetricsRow {
        symbol: row.get(0)?,
        metrics: InstrumentMetrics {
            pe_ratio: row.get(1)?,
            revenue_growth: row.get(2)?,
            net_income_ttm: row.get(3)?,
            debt_ratio: row.get(4)?,
            latest_revenue: row.get(5)?,
        },
        recorded_at: parse_timestamp(6, &recorded_at)?,
    })
}

fn industry_row(row: &Row<'_>) -> SqliteResult<IndustryRow> {
    let recorded_at: String = row.get(4)?;
    Ok(IndustryRow {
        metrics: IndustryMetrics {
            industry: row.get(0)?,
            avg_pe_ratio: row.get(1)?,
            avg_revenue_growth: row.get(2)?,
            sum_revenue: row.get(3)?,
        },
        recorded_at: parse_timestamp(4, &recorded_at)?,
    })
}
