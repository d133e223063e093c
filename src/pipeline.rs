//! The five-step ETL run.
//!
//! clear snapshots → fetch & filter → calculate (parallel) → persist → aggregate.
//! Only this module writes to the store; the API client is shared read-only
//! by every worker.

use crate::api_client::ApiClient;
use crate::calculator::MetricCalculator;
use crate::config::EtlConfig;
use crate::error::{CalculationError, EtlError};
use crate::fetcher::SymbolFetcher;
use crate::http_client::HttpClient;
use crate::models::{IndustryMetrics, InstrumentMetrics};
use crate::store::SqliteStore;
use crate::writer::MetricsWriter;
use futures::stream::{self, StreamExt};
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Why a run stopped before persisting anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    /// No symbol matched a target industry
    NoSymbols,
    /// Every calculation failed
    NoMetrics,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Aborted(AbortReason),
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunOutcome::Completed => write!(f, "completed"),
            RunOutcome::Aborted(AbortReason::NoSymbols) => write!(f, "aborted: no symbols"),
            RunOutcome::Aborted(AbortReason::NoMetrics) => write!(f, "aborted: no metrics"),
        }
    }
}

/// Counters for one pipeline run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: Uuid,
    /// Distinct symbols offered by the API
    pub symbols_total: usize,
    /// Symbols in a target industry
    pub instruments_found: usize,
    /// Instruments registered for the first time in this run
    pub instruments_inserted: usize,
    /// Symbols with a metrics record
    pub calculated: usize,
    /// Symbols whose data was unusable
    pub no_metrics: usize,
    /// Symbols lost to a failed request
    pub api_failures: usize,
    /// Metrics records written to the store
    pub saved: usize,
    pub industries: Vec<IndustryMetrics>,
    pub outcome: RunOutcome,
    pub elapsed: Duration,
}

impl RunSummary {
    fn new(run_id: Uuid) -> Self {
        RunSummary {
            run_id,
            symbols_total: 0,
            instruments_found: 0,
            instruments_inserted: 0,
            calculated: 0,
            no_metrics: 0,
            api_failures: 0,
            saved: 0,
            industries: Vec::new(),
            outcome: RunOutcome::Completed,
            elapsed: Duration::ZERO,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.outcome == RunOutcome::Completed
    }

    /// Logs the run counters as one structured event.
    pub fn log_summary(&self) {
        info!(
            run_id = %self.run_id,
            symbols_total = self.symbols_total,
            instruments_found = self.instruments_found,
            instruments_inserted = self.instruments_inserted,
            calculated = self.calculated,
            no_metrics = self.no_metrics,
            api_failures = self.api_failures,
            saved = self.saved,
            industries = self.industries.len(),
            outcome = %self.outcome,
            elapsed = format!("{:.1}s", self.elapsed.as_secs_f64()),
            "ETL run summary"
        );
    }
}

/// Opens the configured database and runs the pipeline over the network.
pub async fn run(config: &EtlConfig) -> Result<RunSummary, EtlError> {
    let mut store = SqliteStore::new(&config.database_path)?;
    let api = ApiClient::new(config.api.clone())?;
    run_with(&api, &mut store, config).await
}

/// Runs the pipeline against an existing client and store.
///
/// A run that finds no symbols or computes no metrics returns
/// `Ok` with an aborted [`RunOutcome`]. Authentication and storage failures
/// return `Err`.
pub async fn run_with<C: HttpClient>(
    api: &ApiClient<C>,
    store: &mut SqliteStore,
    config: &EtlConfig,
) -> Result<RunSummary, EtlError> {
    let run_id = Uuid::new_v4();
    let span = info_span!("etl_run", run_id = %run_id);
    execute(run_id, api, store, config).instrument(span).await
}

async fn execute<C: HttpClient>(
    run_id: Uuid,
    api: &ApiClient<C>,
    store: &mut SqliteStore,
    config: &EtlConfig,
) -> Result<RunSummary, EtlError> {
    let started = Instant::now();
    let mut summary = RunSummary::new(run_id);

    warn!("Initializing ETL run...");
    info!(
        base_url = %api.config().base_url,
        max_retries = api.config().retry.max_retries,
        "Using Fiindo API"
    );
    api.enable_speed_boost().await;

    warn!("STARTING ETL PIPELINE");

    warn!("Step 1: Clearing current snapshot tables...");
    MetricsWriter::new(store).clear_snapshots()?;
    warn!("Step 1 completed.");

    warn!("Step 2: Fetching and filtering symbols...");
    let fetcher = SymbolFetcher::new(
        api,
        config.workers.fetch_workers,
        &config.target_industries,
    );
    let report = fetcher.fetch_and_filter(store).await?;
    summary.symbols_total = report.symbols_total;
    summary.instruments_found = report.instruments.len();
    summary.instruments_inserted = report.inserted;
    warn!(
        "Step 2 completed: {} symbols match the target industries.",
        report.instruments.len()
    );

    if report.instruments.is_empty() {
        error!("No relevant symbols found - aborting ETL run.");
        return Ok(abort(summary, AbortReason::NoSymbols, started));
    }

    let workers = config.workers.calculate_workers.max(1);
    warn!(
        "Step 3: Starting calculations for {} symbols using up to {} workers...",
        report.instruments.len(),
        workers
    );
    let calculator = MetricCalculator::new(api);
    let mut pending = stream::iter(&report.instruments)
        .map(|instrument| calculate_one(&calculator, &instrument.symbol))
        .buffer_unordered(workers);
    let mut outcomes = Vec::with_capacity(report.instruments.len());
    // Dropping `pending` on a fatal error cancels the calculations still in flight.
    while let Some((symbol, outcome)) = pending.next().await {
        match outcome {
            Err(CalculationError::Api(err)) if err.is_fatal() => {
                error!("Authentication failed while calculating {} - aborting run.", symbol);
                return Err(err.into());
            }
            outcome => outcomes.push((symbol, outcome)),
        }
    }
    drop(pending);
    outcomes.sort_by(|a, b| a.0.cmp(&b.0));

    let mut results = Vec::with_capacity(outcomes.len());
    for (symbol, outcome) in outcomes {
        match outcome {
            Ok(metrics) => results.push((symbol, metrics)),
            Err(err) => {
                if err.is_api_failure() {
                    summary.api_failures += 1;
                } else {
                    summary.no_metrics += 1;
                }
                warn!("No metrics could be calculated for {} ({})", symbol, err);
            }
        }
    }
    summary.calculated = results.len();
    warn!(
        "Step 3 completed: {}/{} tickers calculated successfully.",
        results.len(),
        report.instruments.len()
    );

    if results.is_empty() {
        error!("No metrics successfully calculated - aborting.");
        return Ok(abort(summary, AbortReason::NoMetrics, started));
    }

    warn!("Step 4: Persisting ticker metrics to SQLite...");
    let mut writer = MetricsWriter::new(store);
    for (symbol, metrics) in &results {
        if writer.save_instrument_metrics(symbol, metrics)? {
            summary.saved += 1;
        }
    }
    warn!("Step 4 completed: {} rows saved.", summary.saved);

    warn!("Step 5: Aggregating industry-level metrics...");
    summary.industries = writer.aggregate_industries()?;
    warn!("Step 5 completed.");

    summary.elapsed = started.elapsed();
    warn!(
        "ETL PIPELINE COMPLETED (symbols={}, successful calculations={})",
        summary.instruments_found, summary.calculated
    );
    summary.log_summary();
    Ok(summary)
}

async fn calculate_one<C: HttpClient>(
    calculator: &MetricCalculator<'_, C>,
    symbol: &str,
) -> (String, Result<InstrumentMetrics, CalculationError>) {
    (symbol.to_string(), calculator.calculate(symbol).await)
}

fn abort(mut summary: RunSummary, reason: AbortReason, started: Instant) -> RunSummary {
    warn!("ETL PIPELINE ABORTED.");
    summary.outcome = RunOutcome::Aborted(reason);
    summary.elapsed = started.elapsed();
    summary.log_summary();
    summary
}
