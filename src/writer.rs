//! Snapshot and history writes.
//!
//! `ticker_stats` and `industry_stats` hold the latest run only and are
//! cleared before each run. `ticker_stats_history` and
//! `industry_stats_history` are append-only.

use crate::models::{IndustryMetrics, InstrumentMetrics};
use crate::store::{format_timestamp, SqliteStore};
use chrono::Utc;
use rusqlite::{params, Result as SqliteResult};
use tracing::{info, warn};

/// Borrows the store for the duration of one persistence step.
#[derive(Debug)]
pub struct MetricsWriter<'a> {
    store: &'a mut SqliteStore,
}

impl<'a> MetricsWriter<'a> {
    pub fn new(store: &'a mut SqliteStore) -> Self {
        MetricsWriter { store }
    }

    /// Empties both snapshot tables in a single transaction.
    pub fn clear_snapshots(&mut self) -> SqliteResult<()> {
        info!("Clearing current snapshot tables (TickerStats & IndustryStats)...");
        let tx = self.store.connection_mut().transaction()?;
        tx.execute("DELETE FROM ticker_stats", [])?;
        tx.execute("DELETE FROM industry_stats", [])?;
        tx.commit()?;
        info!("Successfully cleared TickerStats & IndustryStats.");
        Ok(())
    }

    /// Writes one snapshot row and one history row for `symbol`, sharing a
    /// timestamp, in one transaction.
    ///
    /// # Returns
    /// `false` (and nothing written) when the instrument is not stored.
    pub fn save_instrument_metrics(
        &mut self,
        symbol: &str,
        metrics: &InstrumentMetrics,
    ) -> SqliteResult<bool> {
        let Some(record) = self.store.instrument(symbol)? else {
            warn!("Ticker {} not found in DB (did the fetcher run?)", symbol);
            return Ok(false);
        };

        let now = format_timestamp(&Utc::now());
        let tx = self.store.connection_mut().transaction()?;
        tx.execute(
            "INSERT INTO ticker_stats
                (ticker_id, pe_ratio, revenue_growth, net_income_ttm, debt_ratio, latest_revenue, calculated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                record.id,
                metrics.pe_ratio,
                metrics.revenue_growth,
                metrics.net_income_ttm,
                metrics.debt_ratio,
                metrics.latest_revenue,
                now,
            ],
        )?;
        tx.execute(
            "INSERT INTO ticker_stats_history
                (ticker_id, pe_ratio, revenue_growth, net_income_ttm, debt_ratio, latest_revenue, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                record.id,
                metrics.pe_ratio,
                metrics.revenue_growth,
                metrics.net_income_ttm,
                metrics.debt_ratio,
                metrics.latest_revenue,
                now,
            ],
        )?;
        tx.commit()?;

        info!("Saved stats for {} (ticker_id={})", symbol, record.id);
        Ok(true)
    }

    /// Aggregates the current snapshot per industry and writes snapshot and
    /// history rows for every industry with at least one metrics row, all in
    /// one transaction.
    ///
    /// # Returns
    /// The aggregates written, ordered by industry.
    pub fn aggregate_industries(&mut self) -> SqliteResult<Vec<IndustryMetrics>> {
        let now = format_timestamp(&Utc::now());
        let tx = self.store.connection_mut().transaction()?;

        let industries: Vec<String> = {
            let mut stmt = tx.prepare(
                "SELECT DISTINCT industry FROM tickers WHERE industry IS NOT NULL ORDER BY industry",
            )?;
            let rows = stmt.query_map([], |row| row.get(0))?;
            rows.collect::<SqliteResult<_>>()?
        };
        info!("Aggregating industry stats for {} industries", industries.len());

        let mut written = Vec::new();
        for industry in industries {
            let inputs: Vec<AggregateInput> = {
                let mut stmt = tx.prepare(
                    "SELECT s.pe_ratio, s.revenue_growth, s.latest_revenue
                     FROM ticker_stats s JOIN tickers t ON s.ticker_id = t.id
                     WHERE t.industry = ?1",
                )?;
                let rows = stmt.query_map([&industry], |row| {
                    Ok(AggregateInput {
                        pe_ratio: row.get(0)?,
                        revenue_growth: row.get(1)?,
                        latest_revenue: row.get(2)?,
                    })
                })?;
                rows.collect::<SqliteResult<_>>()?
            };

            let Some(aggregate) = aggregate_industry(&industry, &inputs) else {
                info!("No stats for industry {} - skipping", industry);
                continue;
            };

            tx.execute(
                "INSERT INTO industry_stats
                    (industry, avg_pe_ratio, avg_revenue_growth, sum_revenue, calculated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    aggregate.industry,
                    aggregate.avg_pe_ratio,
                    aggregate.avg_revenue_growth,
                    aggregate.sum_revenue,
                    now,
                ],
            )?;
            tx.execute(
                "INSERT INTO industry_stats_history
                    (industry, avg_pe_ratio, avg_revenue_growth, sum_revenue, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    aggregate.industry,
                    aggregate.avg_pe_ratio,
                    aggregate.avg_revenue_growth,
                    aggregate.sum_revenue,
                    now,
                ],
            )?;

            info!(
                "Aggregated industry {}: avg_pe={:?}, avg_rg={:?}, sum_rev={:?}",
                aggregate.industry,
                aggregate.avg_pe_ratio,
                aggregate.avg_revenue_growth,
                aggregate.sum_revenue
            );
            written.push(aggregate);
        }

        tx.commit()?;
        info!("Industry aggregation completed.");
        Ok(written)
    }
}

/// Snapshot columns that feed an industry aggregate.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AggregateInput {
    pub pe_ratio: Option<f64>,
    pub revenue_growth: Option<f64>,
    pub latest_revenue: Option<f64>,
}

/// Unweighted means of non-null P/E and revenue growth, sum of non-null
/// revenue. `None` when there are no input rows at all.
pub fn aggregate_industry(industry: &str, inputs: &[AggregateInput]) -> Option<IndustryMetrics> {
    if inputs.is_empty() {
        return None;
    }
    Some(IndustryMetrics {
        industry: industry.to_string(),
        avg_pe_ratio: mean(inputs.iter().filter_map(|i| i.pe_ratio)),
        avg_revenue_growth: mean(inputs.iter().filter_map(|i| i.revenue_growth)),
        sum_revenue: sum(inputs.iter().filter_map(|i| i.latest_revenue)),
    })
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (total, count) = values.fold((0.0, 0usize), |(total, count), v| (total + v, count + 1));
    (count > 0).then(|| total / count as f64)
}

fn sum(values: impl Iterator<Item = f64>) -> Option<f64> {
    values.fold(None, |acc, v| Some(acc.unwrap_or(0.0) + v))
}
