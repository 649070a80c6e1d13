//!  Farewatch Fare Monitor
//!
//!  Copyright (C) 2026  The Farewatch developers
//!
//!  This program is free software: you can redistribute it and/or modify
//!  it under the terms of the GNU Affero General Public License as published by
//!  the Free Software Foundation, either version 3 of the License, or
//!  (at your option) any later version.
//!
//!  This program is distributed in the hope that it will be useful,
//!  but WITHOUT ANY WARRANTY; without even the implied warranty of
//!  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
//!  GNU Affero General Public License for more details.
//!
//!  You should have received a copy of the GNU Affero General Public License
//!  along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! # Flight Search Service
//!
//! The search pipeline: normalize, look up the cache, scrape on a miss,
//! parse, cache and record in history.

use chrono::{DateTime, Utc};
use farewatch_query_queues::Lane;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::clock::Clock;
use crate::errors::{ScrapeErrorKind, SearchError};
use crate::fare_cache::{CacheSource, FareCache};
use crate::flights_normalizer::{QueryNormalizer, RawQuery};
use crate::flights_query::CanonicalQuery;
use crate::flights_results_parser::{FareRecord, Price, PriceLevel, parse_page};
use crate::scrape_executor::ScrapeExecutor;
use crate::search_history::SearchHistory;

pub const DEFAULT_INTERACTIVE_TTL: Duration = Duration::from_secs(15 * 60);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub search_id: String,
    pub query: CanonicalQuery,
    pub fares: Vec<FareRecord>,
    pub deep_link: String,
    pub fetched_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_level: Option<PriceLevel>,
}

impl SearchResult {
    pub fn total_flights(&self) -> usize {
        self.fares.len()
    }

    /// Cheapest fare in the query's currency.
    pub fn lowest_price(&self) -> Option<&Price> {
        self.lowest_price_in(&self.query.currency)
    }

    /// Cheapest fare priced in `currency`; fares in other currencies are
    /// never compared.
    pub fn lowest_price_in(&self, currency: &str) -> Option<&Price> {
        self.fares
            .iter()
            .map(|f| &f.price)
            .filter(|p| p.currency.eq_ignore_ascii_case(currency))
            .min_by_key(|p| p.amount_minor)
    }
}

/// `{prefix}_{yyyymmdd_hhmmss}_{origin}_{destination}_{8 hex}`.
pub fn tagged_id(prefix: &str, now: DateTime<Utc>, origin: &str, destination: &str) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!(
        "{}_{}_{}_{}_{}",
        prefix,
        now.format("%Y%m%d_%H%M%S"),
        origin,
        destination,
        &suffix[..8]
    )
}

pub struct FareSearchService {
    normalizer: QueryNormalizer,
    cache: Arc<FareCache>,
    executor: Arc<ScrapeExecutor>,
    history: Arc<SearchHistory>,
    clock: Arc<dyn Clock>,
    interactive_ttl: Duration,
}

impl FareSearchService {
    pub fn new(
        normalizer: QueryNormalizer,
        cache: Arc<FareCache>,
        executor: Arc<ScrapeExecutor>,
        history: Arc<SearchHistory>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            normalizer,
            cache,
            executor,
            history,
            clock,
            interactive_ttl: DEFAULT_INTERACTIVE_TTL,
        }
    }

    pub fn with_interactive_ttl(mut self, ttl: Duration) -> Self {
        self.interactive_ttl = ttl;
        self
    }

    pub fn normalizer(&self) -> &QueryNormalizer {
        &self.normalizer
    }

    pub fn cache(&self) -> &FareCache {
        &self.cache
    }

    pub fn history(&self) -> &SearchHistory {
        &self.history
    }

    /// Interactive search from raw user input.
    pub async fn search(&self, raw: &RawQuery) -> Result<SearchResult, SearchError> {
        let query = self.normalizer.normalize(raw)?;
        self.search_canonical(&query, self.interactive_ttl, Lane::Interactive)
            .await
    }

    /// Cached or fresh results for an already canonical query.
    pub async fn search_canonical(
        &self,
        query: &CanonicalQuery,
        ttl: Duration,
        lane: Lane,
    ) -> Result<SearchResult, SearchError> {
        let start = std::time::Instant::now();
        let (result, source) = self
            .cache
            .get_or_fetch(query, ttl, || self.fetch_and_parse(query, lane))
            .await?;

        if source == CacheSource::Fetched {
            self.history.record(result.clone()).await;
        }
        tracing::info!(
            search_id = %result.search_id,
            route = %query,
            ?source,
            flights = result.total_flights(),
            "Search completed in {:?}",
            start.elapsed()
        );
        Ok(result)
    }

    pub async fn get_search(&self, search_id: &str) -> Result<SearchResult, SearchError> {
        self.history.get(search_id).await
    }

    /// Scrape and parse, with one fresh session on an unrecognized layout.
    async fn fetch_and_parse(&self, query: &CanonicalQuery, lane: Lane) -> Result<SearchResult, SearchError> {
        let mut refetched = false;
        loop {
            let raw = match self.executor.fetch(query, lane).await {
                Ok(raw) => raw,
                Err(e) if e.kind == ScrapeErrorKind::NoResults => {
                    tracing::info!(route = %query, "No offers for route");
                    let link = query
                        .deep_link(&self.executor.settings().language)
                        .unwrap_or_default();
                    return Ok(self.build_result(query, Vec::new(), None, link));
                }
                Err(e) => return Err(e.into()),
            };

            let parse_start = std::time::Instant::now();
            match parse_page(&raw) {
                Ok(page) => {
                    tracing::debug!(
                        layout = ?page.layout,
                        fares = page.fares.len(),
                        dropped = page.dropped,
                        "Parsed in {:?}",
                        parse_start.elapsed()
                    );
                    return Ok(self.build_result(query, page.fares, page.price_level, raw.source_url));
                }
                Err(e) if !refetched => {
                    let preview = raw.body.chars().take(500).collect::<String>();
                    tracing::warn!(route = %query, "Parse failed, re-fetching once: {}", e);
                    tracing::debug!("Content preview:\n{}", preview);
                    refetched = true;
                }
                Err(e) => {
                    tracing::error!(route = %query, "Parse failed after re-fetch: {}", e);
                    return Err(e.into());
                }
            }
        }
    }

    fn build_result(
        &self,
        query: &CanonicalQuery,
        fares: Vec<FareRecord>,
        price_level: Option<PriceLevel>,
        deep_link: String,
    ) -> SearchResult {
        let now = self.clock.now();
        SearchResult {
            search_id: tagged_id("search", now, &query.origin, &query.destination),
            query: query.clone(),
            fares,
            deep_link,
            fetched_at: now,
            price_level,
        }
    }
}
