use crate::api_client::ApiClient;
use crate::error::CalculationError;
use crate::http_client::HttpClient;
use crate::models::{InstrumentMetrics, Statement};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{info, warn};

type JsonRow = Map<String, Value>;

/// Minimum number of quarterly income rows needed for any calculation.
pub const REQUIRED_QUARTERS: usize = 4;

/// Derives P/E, revenue growth, net income TTM and debt ratio for one symbol.
///
/// Fetches the income statement, balance sheet and EOD prices once each.
/// Missing or malformed inputs abort the symbol with a [`CalculationError`];
/// a failure in a single ratio only nulls that field.
#[derive(Debug)]
pub struct MetricCalculator<'a, C: HttpClient> {
    api: &'a ApiClient<C>,
}

impl<'a, C: HttpClient> MetricCalculator<'a, C> {
    pub fn new(api: &'a ApiClient<C>) -> Self {
        MetricCalculator { api }
    }

    /// Calculates all metrics for `symbol`.
    ///
    /// # Errors
    /// Returns an error when any statement or the price series is missing or
    /// malformed, fewer than four quarters are reported, no full-year balance
    /// sheet exists, or a request fails.
    pub async fn calculate(&self, symbol: &str) -> Result<InstrumentMetrics, CalculationError> {
        info!("Starting calculations for {}", symbol);

        let income = self
            .api
            .get_financials(symbol, Statement::IncomeStatement)
            .await?;
        let income_rows = statement_rows(income.as_ref(), Statement::IncomeStatement)?;
        let quarters = latest_quarters(income_rows)?;

        let balance = self
            .api
            .get_financials(symbol, Statement::BalanceSheetStatement)
            .await?;
        let balance_rows = statement_rows(balance.as_ref(), Statement::BalanceSheetStatement)?;
        let full_year = latest_full_year(balance_rows)?;

        let eod = self.api.get_eod(symbol).await?;
        let latest_close = latest_close(eod.as_ref())?;

        let metrics = derive_metrics(symbol, &quarters, full_year, latest_close);
        info!("Finished calculations for {}", symbol);
        Ok(metrics)
    }
}

/// Computes each ratio independently from validated inputs.
///
/// `quarters` holds the four most recent quarters, newest first.
pub fn derive_metrics(
    symbol: &str,
    quarters: &LatestQuarters<'_>,
    full_year: &JsonRow,
    latest_close: f64,
) -> InstrumentMetrics {
    let [q0, q1, _, _] = *quarters;

    InstrumentMetrics {
        pe_ratio: field(symbol, "pe_ratio", pe_ratio(q0, latest_close)),
        revenue_growth: field(symbol, "revenue_growth", revenue_growth(q0, q1)),
        net_income_ttm: field(
            symbol,
            "net_income_ttm",
            net_income_ttm(quarters),
        ),
        debt_ratio: field(symbol, "debt_ratio", debt_ratio(full_year)),
        latest_revenue: number(q0, "revenue").ok(),
    }
}

/// Why a single ratio could not be computed.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FieldError {
    #[error("missing value '{0}'")]
    Missing(&'static str),
    #[error("non-numeric value '{0}'")]
    NotNumeric(&'static str),
    #[error("'{0}' is zero")]
    ZeroDenominator(&'static str),
}

fn field(symbol: &str, name: &str, value: Result<f64, FieldError>) -> Option<f64> {
    match value {
        Ok(v) => Some(v),
        Err(err) => {
            warn!("Failed to compute {} for {}: {}", name, symbol, err);
            None
        }
    }
}

/// Reads a numeric field; numeric strings are accepted.
pub fn number(row: &JsonRow, key: &'static str) -> Result<f64, FieldError> {
    match row.get(key) {
        None | Some(Value::Null) => Err(FieldError::Missing(key)),
        Some(Value::Number(n)) => n.as_f64().ok_or(FieldError::NotNumeric(key)),
        Some(Value::String(s)) => s.trim().parse().map_err(|_| FieldError::NotNumeric(key)),
        Some(_) => Err(FieldError::NotNumeric(key)),
    }
}

fn ratio(
    numerator: &JsonRow,
    numerator_key: &'static str,
    denominator: &JsonRow,
    denominator_key: &'static str,
) -> Result<f64, FieldError> {
    let top = number(numerator, numerator_key)?;
    let bottom = number(denominator, denominator_key)?;
    if bottom == 0.0 {
        return Err(FieldError::ZeroDenominator(denominator_key));
    }
    Ok(top / bottom)
}

/// (latest quarter revenue - previous quarter revenue) / previous quarter revenue
pub fn revenue_growth(latest: &JsonRow, previous: &JsonRow) -> Result<f64, FieldError> {
    let current = number(latest, "revenue")?;
    let prior = number(previous, "revenue")?;
    if prior == 0.0 {
        return Err(FieldError::ZeroDenominator("revenue"));
    }
    Ok((current - prior) / prior)
}

/// Sum of `netIncome` across the given quarters; any gap fails the field.
pub fn net_income_ttm(quarters: &[&JsonRow]) -> Result<f64, FieldError> {
    quarters
        .iter()
        .map(|q| number(q, "netIncome"))
        .sum()
}

pub fn debt_ratio(full_year: &JsonRow) -> Result<f64, FieldError> {
    ratio(full_year, "totalDebt", full_year, "totalEquity")
}

pub fn pe_ratio(latest_quarter: &JsonRow, latest_close: f64) -> Result<f64, FieldError> {
    let eps = number(latest_quarter, "eps")?;
    if eps == 0.0 {
        return Err(FieldError::ZeroDenominator("eps"));
    }
    Ok(latest_close / eps)
}

/// Rows under `fundamentals.financials.{statement}.data`.
pub fn statement_rows(
    body: Option<&Value>,
    statement: Statement,
) -> Result<Vec<&JsonRow>, CalculationError> {
    let body = match body {
        Some(Value::Object(map)) if !map.is_empty() => map,
        _ => return Err(CalculationError::MissingStatement(statement)),
    };
    let data = body
        .get("fundamentals")
        .and_then(|v| v.get("financials"))
        .and_then(|v| v.get(statement.as_str()))
        .and_then(|v| v.get("data"))
        .and_then(Value::as_array)
        .ok_or(CalculationError::MalformedStatement(statement))?;
    Ok(data.iter().filter_map(Value::as_object).collect())
}

fn period(row: &JsonRow) -> &str {
    row.get("period").and_then(Value::as_str).unwrap_or("")
}

fn date(row: &JsonRow) -> &str {
    row.get("date").and_then(Value::as_str).unwrap_or("")
}

fn newest_first<'r>(mut rows: Vec<&'r JsonRow>) -> Vec<&'r JsonRow> {
    rows.sort_by(|a, b| date(b).cmp(date(a)));
    rows
}

/// The last four reported quarters, newest first.
pub type LatestQuarters<'r> = [&'r JsonRow; REQUIRED_QUARTERS];

/// Four most recent quarterly rows (period starting with `Q`).
pub fn latest_quarters(rows: Vec<&JsonRow>) -> Result<LatestQuarters<'_>, CalculationError> {
    let quarters = newest_first(
        rows.into_iter()
            .filter(|row| period(row).starts_with('Q'))
            .collect(),
    );
    quarters
        .get(..REQUIRED_QUARTERS)
        .and_then(|latest| LatestQuarters::try_from(latest).ok())
        .ok_or(CalculationError::InsufficientQuarters {
            found: quarters.len(),
        })
}

/// Most recent full-year (`FY`) row.
pub fn latest_full_year(rows: Vec<&JsonRow>) -> Result<&JsonRow, CalculationError> {
    newest_first(rows.into_iter().filter(|row| period(row) == "FY").collect())
        .into_iter()
        .next()
        .ok_or(CalculationError::NoFullYearBalance)
}

/// Close of the last element of `stockprice.data`.
pub fn latest_close(body: Option<&Value>) -> Result<f64, CalculationError> {
    let stockprice = body
        .and_then(|b| b.get("stockprice"))
        .ok_or(CalculationError::MissingPrices)?;
    let last = stockprice
        .get("data")
        .and_then(Value::as_array)
        .ok_or_else(|| CalculationError::MalformedPrices("missing price data".to_string()))?
        .last()
        .and_then(Value::as_object)
        .ok_or_else(|| CalculationError::MalformedPrices("empty price series".to_string()))?;
    number(last, "close").map_err(|e| CalculationError::MalformedPrices(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ApiConfig;
    use crate::error::ApiError;
    use crate::http_client::{HttpResponse, InMemoryHttpClient};
    use crate::retry::RetryPolicy;
    use serde_json::json;

    const BASE: &str = "https://api.test/v1";

    fn income(rows: Value) -> Value {
        json!({"fundamentals": {"financials": {"income_statement": {"data": rows}}}})
    }

    fn balance(rows: Value) -> Value {
        json!({"fundamentals": {"financials": {"balance_sheet_statement": {"data": rows}}}})
    }

    fn four_quarters() -> Value {
        json!([
            {"period": "Q4", "date": "2024-12-31", "revenue": 200.0, "netIncome": 20.0, "eps": 0.5},
            {"period": "Q3", "date": "2024-09-30", "revenue": 150.0, "netIncome": 15.0, "eps": 0.4},
            {"period": "Q2", "date": "2024-06-30", "revenue": 120.0, "netIncome": 12.0, "eps": 0.3},
            {"period": "Q1", "date": "2024-03-31", "revenue": 100.0, "netIncome": 10.0, "eps": 0.25}
        ])
    }

    fn one_full_year() -> Value {
        json!([{"period": "FY", "date": "2024-12-31", "totalDebt": 300.0, "totalEquity": 150.0}])
    }

    fn prices() -> Value {
        json!({"stockprice": {"data": [{"close": 40.0}, {"close": 50.0}]}})
    }

    fn api_with(income_body: Value, balance_body: Value, eod_body: Value) -> ApiClient<InMemoryHttpClient> {
        let config = ApiConfig::new(BASE, "Jane", "Doe").with_retry(RetryPolicy::default().without_backoff());
        let api = ApiClient::with_transport(InMemoryHttpClient::new(), config);
        api.transport()
            .respond_json(format!("{}/financials/TEST/income_statement", BASE), income_body)
            .respond_json(format!("{}/financials/TEST/balance_sheet_statement", BASE), balance_body)
            .respond_json(format!("{}/eod/TEST", BASE), eod_body);
        api
    }

    fn approx(actual: Option<f64>, expected: f64) {
        let value = actual.expect("value should be present");
        assert!(
            (value - expected).abs() < 1e-9,
            "expected {}, got {}",
            expected,
            value
        );
    }

    #[tokio::test]
    async fn test_calculator_computes_expected_metrics() {
        let api = api_with(income(four_quarters()), balance(one_full_year()), prices());
        let metrics = MetricCalculator::new(&api).calculate("TEST").await.unwrap();

        approx(metrics.revenue_growth, (200.0 - 150.0) / 150.0);
        approx(metrics.net_income_ttm, 57.0);
        approx(metrics.debt_ratio, 2.0);
        approx(metrics.pe_ratio, 100.0);
        approx(metrics.latest_revenue, 200.0);
    }

    #[tokio::test]
    async fn test_rows_are_sorted_by_date_not_position() {
        let shuffled = json!([
            {"period": "Q2", "date": "2024-06-30", "revenue": 120.0, "netIncome": 12.0, "eps": 0.3},
            {"period": "Q4", "date": "2024-12-31", "revenue": 200.0, "netIncome": 20.0, "eps": 0.5},
            {"period": "FY", "date": "2024-12-31", "revenue": 570.0, "netIncome": 57.0, "eps": 2.0},
            {"period": "Q1", "date": "2024-03-31", "revenue": 100.0, "netIncome": 10.0, "eps": 0.25},
            {"period": "Q3", "date": "2024-09-30", "revenue": 150.0, "netIncome": 15.0, "eps": 0.4}
        ]);
        let years = json!([
            {"period": "FY", "date": "2023-12-31", "totalDebt": 100.0, "totalEquity": 100.0},
            {"period": "FY", "date": "2024-12-31", "totalDebt": 300.0, "totalEquity": 150.0},
            {"period": "Q4", "date": "2025-03-31", "totalDebt": 1.0, "totalEquity": 1.0}
        ]);
        let api = api_with(income(shuffled), balance(years), prices());
        let metrics = MetricCalculator::new(&api).calculate("TEST").await.unwrap();

        approx(metrics.pe_ratio, 100.0);
        approx(metrics.debt_ratio, 2.0);
        approx(metrics.latest_revenue, 200.0);
    }

    #[tokio::test]
    async fn test_not_enough_quarters_yields_no_metrics() {
        let two_quarters = json!([
            {"period": "Q4", "date": "2024-12-31", "revenue": 200.0, "netIncome": 20.0, "eps": 0.5},
            {"period": "Q3", "date": "2024-09-30", "revenue": 150.0, "netIncome": 15.0, "eps": 0.4}
        ]);
        let api = api_with(income(two_quarters), balance(one_full_year()), prices());
        let err = MetricCalculator::new(&api).calculate("TEST").await.unwrap_err();
        assert!(matches!(err, CalculationError::InsufficientQuarters { found: 2 }));
    }

    #[tokio::test]
    async fn test_missing_income_statement_yields_no_metrics() {
        let config = ApiConfig::new(BASE, "Jane", "Doe");
        let api = ApiClient::with_transport(InMemoryHttpClient::new(), config);
        let err = MetricCalculator::new(&api).calculate("TEST").await.unwrap_err();
        assert!(matches!(
            err,
            CalculationError::MissingStatement(Statement::IncomeStatement)
        ));
    }

    #[tokio::test]
    async fn test_malformed_balance_sheet_yields_no_metrics() {
        let api = api_with(
            income(four_quarters()),
            json!({"fundamentals": {}}),
            prices(),
        );
        let err = MetricCalculator::new(&api).calculate("TEST").await.unwrap_err();
        assert!(matches!(
            err,
            CalculationError::MalformedStatement(Statement::BalanceSheetStatement)
        ));
    }

    #[tokio::test]
    async fn test_no_full_year_yields_no_metrics() {
        let quarterly_only = json!([{"period": "Q4", "date": "2024-12-31", "totalDebt": 1.0, "totalEquity": 1.0}]);
        let api = api_with(income(four_quarters()), balance(quarterly_only), prices());
        let err = MetricCalculator::new(&api).calculate("TEST").await.unwrap_err();
        assert!(matches!(err, CalculationError::NoFullYearBalance));
    }

    #[tokio::test]
    async fn test_empty_price_series_yields_no_metrics() {
        let api = api_with(
            income(four_quarters()),
            balance(one_full_year()),
            json!({"stockprice": {"data": []}}),
        );
        let err = MetricCalculator::new(&api).calculate("TEST").await.unwrap_err();
        assert!(matches!(err, CalculationError::MalformedPrices(_)));
    }

    #[tokio::test]
    async fn test_missing_stockprice_yields_no_metrics() {
        let api = api_with(income(four_quarters()), balance(one_full_year()), json!({}));
        let err = MetricCalculator::new(&api).calculate("TEST").await.unwrap_err();
        assert!(matches!(err, CalculationError::MissingPrices));
    }

    #[tokio::test]
    async fn test_api_failure_is_reported_as_such() {
        let config = ApiConfig::new(BASE, "Jane", "Doe");
        let api = ApiClient::with_transport(InMemoryHttpClient::new(), config);
        api.transport().respond(
            format!("{}/financials/TEST/income_statement", BASE),
            HttpResponse::new(502, "bad gateway"),
        );
        let err = MetricCalculator::new(&api).calculate("TEST").await.unwrap_err();
        assert!(err.is_api_failure());
        assert!(matches!(
            err,
            CalculationError::Api(ApiError::UnexpectedStatus { status: 502, .. })
        ));
    }

    #[tokio::test]
    async fn test_fields_are_independently_nullable() {
        let degenerate = json!([
            {"period": "Q4", "date": "2024-12-31", "revenue": 200.0, "netIncome": 20.0, "eps": 0},
            {"period": "Q3", "date": "2024-09-30", "revenue": 0.0, "netIncome": 15.0, "eps": 0.4},
            {"period": "Q2", "date": "2024-06-30", "revenue": 120.0, "netIncome": null, "eps": 0.3},
            {"period": "Q1", "date": "2024-03-31", "revenue": 100.0, "netIncome": 10.0, "eps": 0.25}
        ]);
        let zero_equity = json!([{"period": "FY", "date": "2024-12-31", "totalDebt": 300.0, "totalEquity": 0}]);
        let api = api_with(income(degenerate), balance(zero_equity), prices());
        let metrics = MetricCalculator::new(&api).calculate("TEST").await.unwrap();

        assert_eq!(metrics.pe_ratio, None);
        assert_eq!(metrics.revenue_growth, None);
        assert_eq!(metrics.net_income_ttm, None);
        assert_eq!(metrics.debt_ratio, None);
        approx(metrics.latest_revenue, 200.0);
    }

    #[test]
    fn test_single_null_field_leaves_others() {
        let quarters_json = four_quarters();
        let mut rows: Vec<JsonRow> = quarters_json
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_object().unwrap().clone())
            .collect();
        rows[0].insert("eps".to_string(), json!("n/a"));
        let quarters: LatestQuarters = [&rows[0], &rows[1], &rows[2], &rows[3]];
        let year = one_full_year()[0].as_object().unwrap().clone();

        let metrics = derive_metrics("TEST", &quarters, &year, 50.0);
        assert_eq!(metrics.pe_ratio, None);
        approx(metrics.revenue_growth, 50.0 / 150.0);
        approx(metrics.net_income_ttm, 57.0);
        approx(metrics.debt_ratio, 2.0);
    }

    #[test]
    fn test_latest_quarters_takes_four_newest() {
        let rows_json = json!([
            {"period": "Q1", "date": "2023-03-31", "revenue": 1.0},
            {"period": "Q3", "date": "2024-09-30", "revenue": 3.0},
            {"period": "FY", "date": "2024-12-31", "revenue": 9.0},
            {"period": "Q4", "date": "2024-12-31", "revenue": 4.0},
            {"period": "Q2", "date": "2024-06-30", "revenue": 2.0},
            {"period": "Q1", "date": "2024-03-31", "revenue": 1.5}
        ]);
        let rows: Vec<&JsonRow> = rows_json
            .as_array()
            .unwrap()
            .iter()
            .filter_map(Value::as_object)
            .collect();

        let latest = latest_quarters(rows.clone()).unwrap();
        let dates: Vec<&str> = latest.iter().map(|q| date(q)).collect();
        assert_eq!(dates, vec!["2024-12-31", "2024-09-30", "2024-06-30", "2024-03-31"]);

        let err = latest_quarters(rows[..2].to_vec()).unwrap_err();
        assert!(matches!(err, CalculationError::InsufficientQuarters { found: 2 }));
    }

    #[test]
    fn test_number_accepts_numeric_strings() {
        let row = json!({"a": "12.5", "b": 3, "c": "abc", "d": true, "e": null});
        let row = row.as_object().unwrap();
        assert_eq!(number(row, "a"), Ok(12.5));
        assert_eq!(number(row, "b"), Ok(3.0));
        assert_eq!(number(row, "c"), Err(FieldError::NotNumeric("c")));
        assert_eq!(number(row, "d"), Err(FieldError::NotNumeric("d")));
        assert_eq!(number(row, "e"), Err(FieldError::Missing("e")));
        assert_eq!(number(row, "zzz"), Err(FieldError::Missing("zzz")));
    }

    #[test]
    fn test_latest_close_uses_last_element() {
        let body = json!({"stockprice": {"data": [{"close": "10"}, {"close": 11.5}]}});
        assert_eq!(latest_close(Some(&body)).unwrap(), 11.5);
        assert!(matches!(latest_close(None), Err(CalculationError::MissingPrices)));
    }
}
