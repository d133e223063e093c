use crate::api_client::ApiClient;
use crate::error::{ApiError, EtlError};
use crate::http_client::HttpClient;
use crate::models::Instrument;
use crate::store::SqliteStore;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::collections::{BTreeSet, HashSet};
use tracing::{error, info, warn};

/// Outcome of the discovery step.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchReport {
    /// Distinct symbols returned by `/symbols`
    pub symbols_total: usize,
    /// Instruments that matched a target industry
    pub instruments: Vec<Instrument>,
    /// Instruments newly added to the registry
    pub inserted: usize,
}

/// Discovers instruments in the target industries and registers them.
pub struct SymbolFetcher<'a, C: HttpClient> {
    api: &'a ApiClient<C>,
    workers: usize,
    target_industries: &'a BTreeSet<String>,
}

impl<'a, C: HttpClient> SymbolFetcher<'a, C> {
    pub fn new(
        api: &'a ApiClient<C>,
        workers: usize,
        target_industries: &'a BTreeSet<String>,
    ) -> Self {
        SymbolFetcher {
            api,
            workers: workers.max(1),
            target_industries,
        }
    }

    /// Fetches the symbol list, filters by industry and inserts new
    /// instruments into `store`.
    pub async fn fetch_and_filter(&self, store: &mut SqliteStore) -> Result<FetchReport, EtlError> {
        let (symbols_total, instruments) = self.discover().await?;
        let inserted = store.insert_new_instruments(&instruments)?;
        info!(
            "Fetcher finished: {} matching instruments, {} newly registered",
            instruments.len(),
            inserted
        );
        Ok(FetchReport {
            symbols_total,
            instruments,
            inserted,
        })
    }

    /// Returns the number of distinct symbols and the matching instruments.
    ///
    /// Profiles are fetched concurrently with at most `workers` requests in
    /// flight. Symbols whose profile is missing, malformed or outside the
    /// target industries are dropped. Only an authentication failure aborts.
    pub async fn discover(&self) -> Result<(usize, Vec<Instrument>), ApiError> {
        let mut seen = HashSet::new();
        let symbols: Vec<String> = self
            .api
            .get_symbols()
            .await?
            .into_iter()
            .filter(|s| seen.insert(s.clone()))
            .collect();

        info!(
            "Fetched {} symbols, resolving industries with {} workers",
            symbols.len(),
            self.workers
        );

        let mut pending = stream::iter(&symbols)
            .map(|symbol| self.resolve(symbol))
            .buffer_unordered(self.workers);

        let mut instruments = Vec::new();
        while let Some(result) = pending.next().await {
            if let Some(instrument) = result? {
                instruments.push(instrument);
            }
        }
        drop(pending);
        instruments.sort_by(|a, b| a.symbol.cmp(&b.symbol));

        Ok((symbols.len(), instruments))
    }

    async fn resolve(&self, symbol: &str) -> Result<Option<Instrument>, ApiError> {
        let body = match self.api.get_general(symbol).await {
            Ok(Some(body)) => body,
            Ok(None) => return Ok(None),
            Err(err) if err.is_fatal() => return Err(err),
            Err(err) => {
                error!("Error while processing /general for {}: {}", symbol, err);
                return Ok(None);
            }
        };

        let Some(profile) = parse_profile(&body) else {
            warn!("No usable profile for {}", symbol);
            return Ok(None);
        };

        if !self.target_industries.contains(&profile.industry) {
            return Ok(None);
        }

        let mut instrument = Instrument::new(symbol, profile.industry);
        if let Some(company) = profile.company_name {
            instrument = instrument.with_company(company);
        }
        if let Some(exchange) = profile.exchange {
            instrument = instrument.with_exchange(exchange);
        }
        Ok(Some(instrument))
    }
}

#[derive(Debug, Deserialize)]
struct GeneralResponse {
    fundamentals: Fundamentals,
}

#[derive(Debug, Deserialize)]
struct Fundamentals {
    profile: ProfileSection,
}

#[derive(Debug, Deserialize)]
struct ProfileSection {
    data: Vec<Profile>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Profile {
    industry: String,
    #[serde(default, deserialize_with = "text_or_none")]
    company_name: Option<String>,
    #[serde(default, deserialize_with = "text_or_none")]
    exchange: Option<String>,
}

/// Metadata fields of the wrong type are treated as absent.
fn text_or_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Value::deserialize(deserializer)?
        .as_str()
        .map(str::to_string))
}

/// First profile entry under `fundamentals.profile.data`.
fn parse_profile(body: &Value) -> Option<Profile> {
    let response = GeneralResponse::deserialize(body).ok()?;
    response.fundamentals.profile.data.into_iter().next()
}
