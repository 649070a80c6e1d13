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

//! # Multi-Segment Orchestrator
//!
//! Runs each leg of an itinerary as an independent search, concurrently up
//! to the executor's session cap. Results come back in leg order whatever
//! the completion order; a failed leg is annotated, not fatal, unless every
//! leg failed.

use farewatch_query_queues::Lane;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;

use crate::errors::{InvalidQueryReason, SearchError, SegmentFailure};
use crate::flights_normalizer::{MAX_SEGMENTS, RawQuery};
use crate::flights_query::CanonicalQuery;
use crate::flights_search::{FareSearchService, SearchResult};

#[derive(Debug, Clone, Serialize)]
pub struct SegmentResult {
    /// Zero-based position of the leg in the request.
    pub index: usize,
    /// One-based leg number.
    pub leg: usize,
    pub result: SearchResult,
}

#[derive(Debug, Clone, Serialize)]
pub struct MultiCityOutcome {
    pub results: Vec<SegmentResult>,
    pub failures: Vec<SegmentFailure>,
}

impl MultiCityOutcome {
    pub fn is_partial(&self) -> bool {
        !self.failures.is_empty()
    }

    pub fn total_flights(&self) -> usize {
        self.results.iter().map(|r| r.result.total_flights()).sum()
    }
}

pub struct MultiCityOrchestrator {
    service: Arc<FareSearchService>,
    ttl: Duration,
}

impl MultiCityOrchestrator {
    pub fn new(service: Arc<FareSearchService>, ttl: Duration) -> Self {
        Self { service, ttl }
    }

    /// Normalize a multi-city request and run its legs.
    pub async fn search(&self, raw: &RawQuery) -> Result<MultiCityOutcome, SearchError> {
        let query = self.service.normalizer().normalize_multi_city(raw)?;
        self.run(&query.segment_queries(), Lane::Interactive).await
    }

    pub async fn run(&self, segments: &[CanonicalQuery], lane: Lane) -> Result<MultiCityOutcome, SearchError> {
        let count = segments.len();
        if !(1..=MAX_SEGMENTS).contains(&count) {
            return Err(InvalidQueryReason::SegmentCount { count }.into());
        }

        let start = std::time::Instant::now();
        let mut tasks = JoinSet::new();
        for (index, query) in segments.iter().cloned().enumerate() {
            let service = Arc::clone(&self.service);
            let ttl = self.ttl;
            tasks.spawn(async move { (index, service.search_canonical(&query, ttl, lane).await) });
        }

        let mut slots: Vec<Option<Result<SearchResult, String>>> = vec![None; count];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, outcome)) => slots[index] = Some(outcome.map_err(|e| e.to_string())),
                Err(e) => tracing::error!("Segment task failed to complete: {}", e),
            }
        }

        let mut results = Vec::new();
        let mut failures = Vec::new();
        for (index, slot) in slots.into_iter().enumerate() {
            match slot {
                Some(Ok(result)) => results.push(SegmentResult {
                    index,
                    leg: index + 1,
                    result,
                }),
                Some(Err(error)) => {
                    tracing::warn!(segment = index, route = %segments[index], "Segment failed: {}", error);
                    failures.push(SegmentFailure::new(index, error));
                }
                None => failures.push(SegmentFailure::new(index, "segment task aborted")),
            }
        }

        tracing::info!(
            segments = count,
            succeeded = results.len(),
            failed = failures.len(),
            "Multi-city run finished in {:?}",
            start.elapsed()
        );

        if results.is_empty() {
            return Err(SearchError::AllSegmentsFailed(failures));
        }
        Ok(MultiCityOutcome { results, failures })
    }
}
