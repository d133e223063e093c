use crate::config::{ApiConfig, FALLBACK_SPEED_BOOST_URL};
use crate::error::ApiError;
use crate::http_client::{HttpClient, HttpError, HttpRequest, ReqwestHttpClient};
use crate::models::Statement;
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

/// Client for the Fiindo REST API.
///
/// Wraps an [`HttpClient`] with authentication, status classification and
/// fixed-delay retries. Expected operational conditions (404, exhausted
/// retries) come back as `Ok(None)`; only unexpected statuses, transport
/// failures, undecodable bodies and 401 are errors.
///
/// The client holds no mutable state and is shared by reference between
/// concurrent workers.
#[derive(Debug)]
pub struct ApiClient<C = ReqwestHttpClient> {
    http: C,
    config: ApiConfig,
    authorization: String,
}

impl ApiClient<ReqwestHttpClient> {
    /// Creates a client backed by reqwest.
    ///
    /// # Errors
    /// Returns an error if the underlying HTTP client cannot be built.
    pub fn new(config: ApiConfig) -> Result<Self, HttpError> {
        Ok(Self::with_transport(ReqwestHttpClient::new()?, config))
    }
}

impl<C: HttpClient> ApiClient<C> {
    /// Creates a client over an arbitrary transport.
    pub fn with_transport(http: C, config: ApiConfig) -> Self {
        let authorization = config.authorization();
        ApiClient {
            http,
            config,
            authorization,
        }
    }

    /// Settings this client was built with.
    pub fn config(&self) -> &ApiConfig {
        &self.config
    }

    pub fn transport(&self) -> &C {
        &self.http
    }

    /// Absolute URL for an endpoint path relative to the base URL.
    pub fn endpoint_url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.config.base_url, endpoint.trim_start_matches('/'))
    }

    /// Issues an authenticated GET with retry handling.
    ///
    /// # Returns
    /// `Ok(Some(body))` on HTTP 200, `Ok(None)` on 404 or once retries for
    /// retryable statuses or timeouts are exhausted.
    ///
    /// # Errors
    /// [`ApiError::Unauthorized`] on 401, [`ApiError::UnexpectedStatus`] on any
    /// other unclassified status, [`ApiError::Transport`] on non-timeout
    /// network failures and [`ApiError::Decode`] on an invalid JSON body.
    pub async fn get(
        &self,
        endpoint: &str,
        params: &[(&str, &str)],
    ) -> Result<Option<Value>, ApiError> {
        let url = self.endpoint_url(endpoint);
        let retry = &self.config.retry;
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            debug!("GET {} (attempt {})", url, attempt);

            let request = HttpRequest::get(&url)
                .with_header("Authorization", &self.authorization)
                .with_query(params)
                .with_timeout(self.config.timeout);

            let response = match self.http.execute(request).await {
                Ok(response) => response,
                Err(err) if err.is_timeout() => {
                    warn!(
                        "Timeout after {:.1}s for {} (attempt {}/{})",
                        self.config.timeout.as_secs_f64(),
                        url,
                        attempt,
                        retry.max_retries
                    );
                    if !retry.can_retry_after(attempt) {
                        error!("Giving up on {} after repeated timeouts.", url);
                        return Ok(None);
                    }
                    tokio::time::sleep(retry.backoff).await;
                    continue;
                }
                Err(source) => {
                    error!("Request to {} failed: {}", url, source);
                    return Err(ApiError::Transport { url, source });
                }
            };

            debug!("Response {} for {}", response.status, url);

            if response.status == 200 {
                return match serde_json::from_str(&response.body) {
                    Ok(body) => Ok(Some(body)),
                    Err(source) => {
                        error!("Failed to decode JSON from {}: {}", url, source);
                        Err(ApiError::Decode { url, source })
                    }
                };
            }

            if retry.should_retry_status(response.status) {
                if !retry.can_retry_after(attempt) {
                    error!(
                        "{} errors too many times for {} - giving up.",
                        response.status, url
                    );
                    return Ok(None);
                }
                warn!(
                    "{} error for {} - retrying in {:.1}s (attempt {}/{})",
                    response.status,
                    url,
                    retry.backoff.as_secs_f64(),
                    attempt,
                    retry.max_retries
                );
                tokio::time::sleep(retry.backoff).await;
                continue;
            }

            return match response.status {
                404 => {
                    warn!("404 Not Found for {}", url);
                    Ok(None)
                }
                401 => {
                    error!("401 Unauthorized for {} - check FIRST_NAME / LAST_NAME", url);
                    Err(ApiError::Unauthorized { url })
                }
                status => {
                    error!("Unexpected status {} from {}: {}", status, url, response.body);
                    Err(ApiError::UnexpectedStatus {
                        status,
                        url,
                        body: response.body,
                    })
                }
            };
        }
    }

    /// All available symbols from `/symbols`; empty when the API has no data.
    pub async fn get_symbols(&self) -> Result<Vec<String>, ApiError> {
        let body = self.get("symbols", &[]).await?;
        Ok(body
            .as_ref()
            .and_then(|b| b.get("symbols"))
            .and_then(Value::as_array)
            .map(|symbols| {
                symbols
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default())
    }

    /// Profile document from `/general/{symbol}`.
    pub async fn get_general(&self, symbol: &str) -> Result<Option<Value>, ApiError> {
        self.get(&format!("general/{}", symbol), &[]).await
    }

    /// One financial statement from `/financials/{symbol}/{statement}`.
    pub async fn get_financials(
        &self,
        symbol: &str,
        statement: Statement,
    ) -> Result<Option<Value>, ApiError> {
        self.get(&format!("financials/{}/{}", symbol, statement), &[])
            .await
    }

    /// End-of-day price series from `/eod/{symbol}`.
    pub async fn get_eod(&self, symbol: &str) -> Result<Option<Value>, ApiError> {
        self.get(&format!("eod/{}", symbol), &[]).await
    }

    /// Diagnostic payload from `/debug/{symbol}`.
    pub async fn get_debug(&self, symbol: &str) -> Result<Option<Value>, ApiError> {
        self.get(&format!("debug/{}", symbol), &[]).await
    }

    /// Resolves the speed boost URL: explicit override first, then
    /// `{base_url}/speedboost`, then the hardcoded fallback.
    pub fn speed_boost_url(&self) -> String {
        if let Some(url) = &self.config.speed_boost.url_override {
            info!("Speedboost URL (from env): {}", url);
            return url.clone();
        }
        if !self.config.base_url.is_empty() {
            let url = format!("{}/speedboost", self.config.base_url);
            info!("Speedboost URL (auto-generated): {}", url);
            return url;
        }
        warn!(
            "Falling back to default Speedboost URL: {}",
            FALLBACK_SPEED_BOOST_URL
        );
        FALLBACK_SPEED_BOOST_URL.to_string()
    }

    /// Requests speed boost mode for this account when enabled.
    ///
    /// Never fails: every problem is logged and the pipeline carries on.
    pub async fn enable_speed_boost(&self) {
        if !self.config.speed_boost.enabled {
            info!("Speed boost disabled (FIINDO_ENABLE_SPEEDBOOST is not true).");
            return;
        }

        let url = self.speed_boost_url();
        let request = HttpRequest::post(&url)
            .with_header("Authorization", &self.authorization)
            .with_json(json!({
                "first_name": self.config.first_name,
                "last_name": self.config.last_name,
            }))
            .with_timeout(self.config.timeout);

        warn!("Requesting Fiindo speed boost for this account...");
        match self.http.execute(request).await {
            Ok(response) if response.status == 200 => {
                warn!("Speed boost successfully enabled");
            }
            Ok(response) => {
                warn!(
                    "Speedboost request failed (status {}): {}",
                    response.status, response.body
                );
            }
            Err(err) => {
                warn!("Speedboost request failed due to exception: {}", err);
            }
        }
    }
}
