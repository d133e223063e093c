//! Error types shared across the pipeline.

use crate::http_client::HttpError;
use crate::models::Statement;
use thiserror::Error;

/// Errors raised while building [`crate::config::EtlConfig`] from the environment.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required variable is unset or blank
    #[error("missing {0} in environment / .env file")]
    MissingVar(&'static str),
}

/// Errors surfaced by [`crate::api_client::ApiClient`].
///
/// "No data" outcomes (404, exhausted retries) are not errors; they are
/// returned as `Ok(None)`.
#[derive(Debug, Error)]
pub enum ApiError {
    /// HTTP 401: the configured identity was rejected. Fatal for the run.
    #[error("Unauthorized for Fiindo API ({url})")]
    Unauthorized { url: String },
    /// A status outside the retry set that is neither 200, 401 nor 404
    #[error("{} Error: {status} for url: {url}", status_class(.status))]
    UnexpectedStatus {
        status: u16,
        url: String,
        body: String,
    },
    /// The request could not be sent or the body could not be read
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: HttpError,
    },
    /// HTTP 200 with a body that is not JSON
    #[error("failed to decode JSON from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
}

impl ApiError {
    /// Whether this error must abort the whole run rather than a single item.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ApiError::Unauthorized { .. })
    }
}

fn status_class(status: &u16) -> &'static str {
    if (500..600).contains(status) {
        "Server"
    } else {
        "Client"
    }
}

/// Reasons a symbol yields no metrics at all.
///
/// Field-level problems never appear here; they become `None` fields on
/// [`crate::models::InstrumentMetrics`].
#[derive(Debug, Error)]
pub enum CalculationError {
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error("no {0} data")]
    MissingStatement(Statement),
    #[error("unexpected {0} format")]
    MalformedStatement(Statement),
    #[error("not enough quarterly income data ({found} of 4 quarters)")]
    InsufficientQuarters { found: usize },
    #[error("no full-year balance sheet data")]
    NoFullYearBalance,
    #[error("no EOD data")]
    MissingPrices,
    #[error("failed to get latest price: {0}")]
    MalformedPrices(String),
}

impl CalculationError {
    /// True when the calculation failed because a request failed, as opposed
    /// to the API answering with unusable data.
    pub fn is_api_failure(&self) -> bool {
        matches!(self, CalculationError::Api(_))
    }
}

/// Top-level error for a pipeline run.
#[derive(Debug, Error)]
pub enum EtlError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error("HTTP client error: {0}")]
    Http(#[from] HttpError),
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("logging setup failed: {0}")]
    Logging(#[from] tracing_subscriber::util::TryInitError),
}

/// Result alias for pipeline operations.
pub type Result<T> = std::result::Result<T, EtlError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unexpected_status_keeps_log_markers() {
        let server = ApiError::UnexpectedStatus {
            status: 502,
            url: "https://api.test/eod/AAPL".to_string(),
            body: String::new(),
        };
        assert_eq!(
            server.to_string(),
            "Server Error: 502 for url: https://api.test/eod/AAPL"
        );

        let client = ApiError::UnexpectedStatus {
            status: 418,
            url: "https://api.test/eod/AAPL".to_string(),
            body: String::new(),
        };
        assert!(client.to_string().starts_with("Client Error: 418"));
    }

    #[test]
    fn test_only_unauthorized_is_fatal() {
        let unauthorized = ApiError::Unauthorized {
            url: "https://api.test/symbols".to_string(),
        };
        assert!(unauthorized.is_fatal());

        let unexpected = ApiError::UnexpectedStatus {
            status: 503,
            url: "https://api.test/symbols".to_string(),
            body: String::new(),
        };
        assert!(!unexpected.is_fatal());
    }

    #[test]
    fn test_calculation_error_classification() {
        let api = CalculationError::from(ApiError::Unauthorized {
            url: "u".to_string(),
        });
        assert!(api.is_api_failure());
        assert!(!CalculationError::NoFullYearBalance.is_api_failure());
        assert_eq!(
            CalculationError::InsufficientQuarters { found: 2 }.to_string(),
            "not enough quarterly income data (2 of 4 quarters)"
        );
    }
}
