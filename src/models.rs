use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Instrument master data as discovered through `/general/{symbol}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Instrument {
    /// Ticker symbol, unique across the store
    pub symbol: String,
    /// Company display name
    pub company: Option<String>,
    /// Industry classification (one of the target industries)
    pub industry: String,
    /// Listing exchange
    pub exchange: Option<String>,
}

impl Instrument {
    /// Creates a new instrument without company or exchange metadata.
    pub fn new(symbol: impl Into<String>, industry: impl Into<String>) -> Self {
        Instrument {
            symbol: symbol.into(),
            company: None,
            industry: industry.into(),
            exchange: None,
        }
    }

    /// Sets the company name.
    pub fn with_company(mut self, company: impl Into<String>) -> Self {
        self.company = Some(company.into());
        self
    }

    /// Sets the exchange.
    pub fn with_exchange(mut self, exchange: impl Into<String>) -> Self {
        self.exchange = Some(exchange.into());
        self
    }
}

/// An instrument row as stored, with its surrogate key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstrumentRecord {
    pub id: i64,
    pub instrument: Instrument,
}

/// Ratios derived for one instrument.
///
/// Every field is independently optional: a missing or zero denominator
/// nulls that field only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct InstrumentMetrics {
    /// Latest close / EPS of the most recent quarter
    pub pe_ratio: Option<f64>,
    /// Quarter-over-quarter revenue growth
    pub revenue_growth: Option<f64>,
    /// Sum of net income over the last four quarters
    pub net_income_ttm: Option<f64>,
    /// Total debt / total equity from the most recent full year
    pub debt_ratio: Option<f64>,
    /// Revenue of the most recent quarter
    pub latest_revenue: Option<f64>,
}

/// A stored metrics row (snapshot or history) joined with its symbol.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricsRow {
    pub symbol: String,
    pub metrics: InstrumentMetrics,
    pub recorded_at: DateTime<Utc>,
}

/// Per-industry aggregate over the current snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndustryMetrics {
    pub industry: String,
    /// Unweighted mean of non-null P/E ratios
    pub avg_pe_ratio: Option<f64>,
    /// Unweighted mean of non-null revenue growth values
    pub avg_revenue_growth: Option<f64>,
    /// Sum of non-null latest revenues
    pub sum_revenue: Option<f64>,
}

/// A stored industry row (snapshot or history).
#[derive(Debug, Clone, PartialEq)]
pub struct IndustryRow {
    pub metrics: IndustryMetrics,
    pub recorded_at: DateTime<Utc>,
}

/// Financial statements served under `/financials/{symbol}/{statement}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Statement {
    IncomeStatement,
    BalanceSheetStatement,
    CashFlowStatement,
}

impl Statement {
    /// Path segment and response key for this statement.
    pub fn as_str(&self) -> &'static str {
        match self {
            Statement::IncomeStatement => "income_statement",
            Statement::BalanceSheetStatement => "balance_sheet_statement",
            Statement::CashFlowStatement => "cash_flow_statement",
        }
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instrument_builder() {
        let instrument = Instrument::new("AAPL", "Consumer Electronics")
            .with_company("Apple Inc.")
            .with_exchange("NASDAQ");
        assert_eq!(instrument.symbol, "AAPL");
        assert_eq!(instrument.company.as_deref(), Some("Apple Inc."));
        assert_eq!(instrument.exchange.as_deref(), Some("NASDAQ"));
    }

    #[test]
    fn test_statement_path_segments() {
        assert_eq!(Statement::IncomeStatement.as_str(), "income_statement");
        assert_eq!(
            Statement::BalanceSheetStatement.to_string(),
            "balance_sheet_statement"
        );
        assert_eq!(
            serde_json::to_string(&Statement::CashFlowStatement).unwrap(),
            "\"cash_flow_statement\""
        );
    }
}
