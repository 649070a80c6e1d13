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

//! # Search webhooks
//!
//! URLs registered here receive a `flight_search_completed` event after
//! every successful interactive search. Delivery runs in the background and
//! never holds up the search response.

use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::alerts::is_http_url;
use crate::clock::Clock;
use crate::errors::{InvalidQuery, InvalidQueryReason};
use crate::flights_search::SearchResult;
use crate::notify::NotificationDispatcher;
use crate::persistence::JsonSnapshot;

pub const SEARCH_COMPLETED_EVENT: &str = "flight_search_completed";
/// Flights included in one event, cheapest first.
pub const EVENT_FLIGHT_LIMIT: usize = 10;

pub struct WebhookRegistry {
    urls: RwLock<Vec<String>>,
    dispatcher: Arc<NotificationDispatcher>,
    clock: Arc<dyn Clock>,
    snapshot: Option<JsonSnapshot<Vec<String>>>,
}

impl WebhookRegistry {
    pub fn new(dispatcher: Arc<NotificationDispatcher>, clock: Arc<dyn Clock>) -> Self {
        Self {
            urls: RwLock::new(Vec::new()),
            dispatcher,
            clock,
            snapshot: None,
        }
    }

    pub async fn with_snapshot(mut self, snapshot: JsonSnapshot<Vec<String>>) -> anyhow::Result<Self> {
        if let Some(saved) = snapshot.load().await? {
            tracing::info!(count = saved.len(), "Restored search webhooks");
            *self.urls.get_mut() = saved;
        }
        self.snapshot = Some(snapshot);
        Ok(self)
    }

    /// Add `url`. Returns false when it was already registered.
    pub async fn register(&self, url: &str) -> Result<bool, InvalidQuery> {
        let url = url.trim();
        if !is_http_url(url) {
            return Err(InvalidQueryReason::WebhookUrl { url: url.to_string() }.into());
        }
        let mut urls = self.urls.write().await;
        if urls.iter().any(|u| u == url) {
            return Ok(false);
        }
        urls.push(url.to_string());
        self.persist(&urls).await;
        tracing::info!(url, "Registered search webhook");
        Ok(true)
    }

    /// Remove `url`. Returns false when it was not registered.
    pub async fn unregister(&self, url: &str) -> bool {
        let url = url.trim();
        let mut urls = self.urls.write().await;
        let before = urls.len();
        urls.retain(|u| u != url);
        if urls.len() == before {
            return false;
        }
        self.persist(&urls).await;
        tracing::info!(url, "Unregistered search webhook");
        true
    }

    pub async fn list(&self) -> Vec<String> {
        self.urls.read().await.clone()
    }

    /// Send the completed search to every registered URL in the background.
    pub async fn publish_search(&self, result: &SearchResult) {
        let urls = self.list().await;
        if urls.is_empty() {
            return;
        }
        let payload = search_completed_payload(result, self.clock.now());
        let dispatcher = Arc::clone(&self.dispatcher);
        let search_id = result.search_id.clone();
        tokio::spawn(async move {
            for url in urls {
                match dispatcher.send_event(&url, payload.clone()).await {
                    Ok(()) => tracing::debug!(%search_id, url, "Search event delivered"),
                    Err(e) => tracing::warn!(%search_id, url, "Search event not delivered: {}", e),
                }
            }
        });
    }

    // Called with the write lock held, so saves land in change order.
    async fn persist(&self, urls: &[String]) {
        if let Some(snapshot) = &self.snapshot {
            if let Err(e) = snapshot.save(&urls.to_vec()).await {
                tracing::error!("Failed to persist search webhooks: {:#}", e);
            }
        }
    }
}

/// `{event, search_id, data, timestamp}` for a finished search.
pub fn search_completed_payload(result: &SearchResult, now: DateTime<Utc>) -> Value {
    let mut flights = result.fares.clone();
    flights.sort_by_key(|f| f.price.amount_minor);
    flights.truncate(EVENT_FLIGHT_LIMIT);
    let current_price = result
        .price_level
        .map(|level| json!(level))
        .unwrap_or_else(|| json!("unknown"));

    json!({
        "event": SEARCH_COMPLETED_EVENT,
        "search_id": result.search_id,
        "data": {
            "route": result.query.to_string(),
            "current_price": current_price,
            "total_flights": result.total_flights(),
            "lowest_price": result.lowest_price().map(|p| p.as_f64()),
            "currency": result.query.currency,
            "deep_link": result.deep_link,
            "flights": flights,
        },
        "timestamp": now.to_rfc3339(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::flights_query::tests::one_way;
    use crate::flights_results_parser::{FareRecord, Price};
    use crate::notify::NotificationTransport;
    use crate::errors::DispatchError;
    use async_trait::async_trait;
    use chrono::NaiveDate;

    struct NoTransport;

    #[async_trait]
    impl NotificationTransport for NoTransport {
        async fn send_email(&self, _to: &str, _subject: &str, _body: &str) -> Result<(), DispatchError> {
            Ok(())
        }
        async fn send_webhook(&self, _url: &str, _payload: &Value) -> Result<(), DispatchError> {
            Ok(())
        }
    }

    fn registry() -> WebhookRegistry {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::at_date(NaiveDate::from_ymd_opt(2025, 12, 1).unwrap()));
        let dispatcher = Arc::new(NotificationDispatcher::new(Arc::new(NoTransport), clock.clone()));
        WebhookRegistry::new(dispatcher, clock)
    }

    #[tokio::test]
    async fn test_register_is_idempotent_and_validated() {
        let hooks = registry();
        assert!(hooks.register("https://hooks.example.test/search").await.unwrap());
        assert!(!hooks.register(" https://hooks.example.test/search ").await.unwrap());
        assert!(hooks.register("ftp://hooks.example.test").await.is_err());
        assert!(hooks.register("not a url").await.is_err());
        assert_eq!(hooks.list().await, ["https://hooks.example.test/search"]);

        assert!(hooks.unregister("https://hooks.example.test/search").await);
        assert!(!hooks.unregister("https://hooks.example.test/search").await);
        assert!(hooks.list().await.is_empty());
    }

    #[test]
    fn test_payload_carries_cheapest_ten_flights() {
        let fare = |sek: i64| FareRecord {
            carrier: format!("C{}", sek),
            departure: String::new(),
            arrival: String::new(),
            duration: String::new(),
            duration_minutes: None,
            stops: 0,
            price: Price::from_major(sek, "SEK"),
            delay: None,
        };
        let mut query = one_way("JFK", "LHR", NaiveDate::from_ymd_opt(2025, 12, 25).unwrap());
        query.currency = "SEK".into();
        let result = SearchResult {
            search_id: "search_1".into(),
            query,
            fares: (0..14).rev().map(|i| fare(4000 + i * 10)).collect(),
            deep_link: "https://example.test/flights".into(),
            fetched_at: Utc::now(),
            price_level: None,
        };

        let payload = search_completed_payload(&result, Utc::now());
        assert_eq!(payload["event"], SEARCH_COMPLETED_EVENT);
        assert_eq!(payload["search_id"], "search_1");
        assert_eq!(payload["data"]["total_flights"], 14);
        assert_eq!(payload["data"]["current_price"], "unknown");
        assert_eq!(payload["data"]["lowest_price"], 4000.0);
        let flights = payload["data"]["flights"].as_array().unwrap();
        assert_eq!(flights.len(), EVENT_FLIGHT_LIMIT);
        assert_eq!(flights[0]["carrier"], "C4000");
    }
}
