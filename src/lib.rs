pub mod error;
pub mod models;
pub mod config;
pub mod retry;
pub mod http_client;
pub mod api_client;
pub mod fetcher;
pub mod calculator;
pub mod store;
pub mod writer;
pub mod logging;
pub mod pipeline;


pub use error::{ApiError, CalculationError, ConfigError, EtlError};
pub use models::{
    IndustryMetrics, IndustryRow, Instrument, InstrumentMetrics, InstrumentRecord, MetricsRow,
    Statement,
};
pub use config::{ApiConfig, EtlConfig, SpeedBoostConfig, WorkerConfig};
pub use retry::RetryPolicy;
pub use http_client::{
    HttpClient, HttpError, HttpMethod, HttpRequest, HttpResponse, InMemoryHttpClient,
    ReqwestHttpClient,
};
pub use api_client::ApiClient;
pub use fetcher::{FetchReport, SymbolFetcher};
pub use calculator::MetricCalculator;
pub use store::{HistoryCounts, SqliteStore};
pub use writer::MetricsWriter;
pub use logging::init_logging;
pub use pipeline::{run, run_with, AbortReason, RunOutcome, RunSummary};
