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

//! # Alert Store
//!
//! Owns every price alert and its evaluation state machine:
//!
//! ```text
//!  active ──► evaluating ──► triggered
//!    ▲            │               │
//!    └────────────┘◄──────────────┘ (price back above target: re-armed)
//!
//!  any non-deactivated state ──► deactivated
//! ```
//!
//! An alert fires at most once per channel for each below-target episode.
//! Channels to notify are claimed under the store lock in the same step
//! that observes the price, so two evaluations can never both dispatch.

use chrono::{DateTime, Utc};
use http::Uri;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::clock::Clock;
use crate::errors::{AlertNotFound, DispatchError, InvalidQuery, InvalidQueryReason};
use crate::flights_multi_city::MultiCityOutcome;
use crate::flights_query::{CanonicalQuery, TripType};
use crate::flights_results_parser::Price;
use crate::flights_search::{SearchResult, tagged_id};
use crate::notify::{Ack, Channel};
use crate::persistence::JsonSnapshot;

pub const ALERT_CURRENCIES: [&str; 4] = ["SEK", "USD", "EUR", "GBP"];

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}$").unwrap());

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    Active,
    Evaluating,
    Triggered,
    Deactivated,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChannelState {
    pub channel: Channel,
    pub recipients: Vec<String>,
    /// Already notified during the current below-target episode.
    pub fired: bool,
    pub notifications_sent: u32,
    pub last_sent_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl ChannelState {
    pub fn new(channel: Channel, recipients: Vec<String>) -> Self {
        Self {
            channel,
            recipients,
            fired: false,
            notifications_sent: 0,
            last_sent_at: None,
            last_error: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    /// Route, dates and passengers to watch. Its currency is the target's.
    pub query: CanonicalQuery,
    pub target_price: Price,
    pub channels: Vec<ChannelState>,
    pub status: AlertStatus,
    /// Last observed price was at or below target.
    pub in_episode: bool,
    pub created_at: DateTime<Utc>,
    pub last_evaluated_at: Option<DateTime<Utc>>,
    pub last_best_price: Option<Price>,
    pub last_search_id: Option<String>,
    pub last_error: Option<String>,
    pub deactivated_at: Option<DateTime<Utc>>,
}

impl Alert {
    pub fn trip_type(&self) -> TripType {
        self.query.trip_type
    }

    pub fn currency(&self) -> &str {
        &self.target_price.currency
    }

    pub fn recipients(&self, channel: Channel) -> &[String] {
        self.channels
            .iter()
            .find(|c| c.channel == channel)
            .map(|c| c.recipients.as_slice())
            .unwrap_or(&[])
    }

    pub fn is_deactivated(&self) -> bool {
        self.status == AlertStatus::Deactivated
    }

    /// Status to fall back to when an evaluation does not conclude.
    fn resting_status(&self) -> AlertStatus {
        if self.in_episode {
            AlertStatus::Triggered
        } else {
            AlertStatus::Active
        }
    }
}

/// Creation request. `query` is already normalized.
#[derive(Clone, Debug)]
pub struct NewAlert {
    pub query: CanonicalQuery,
    pub target_price: Price,
    pub recipients: Vec<(Channel, String)>,
}

/// What one evaluation saw.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct PriceObservation {
    /// Cheapest itinerary price in the alert's currency, if any was found.
    pub best: Option<Price>,
    pub search_ids: Vec<String>,
    pub deep_link: String,
    pub total_flights: usize,
}

impl PriceObservation {
    pub fn from_result(result: &SearchResult, currency: &str) -> Self {
        Self {
            best: result.lowest_price_in(currency).cloned(),
            search_ids: vec![result.search_id.clone()],
            deep_link: result.deep_link.clone(),
            total_flights: result.total_flights(),
        }
    }

    /// A multi-city itinerary costs the sum of each leg's cheapest fare.
    /// Unknown unless every one of `legs` came back priced.
    pub fn from_segments(outcome: &MultiCityOutcome, legs: usize, currency: &str) -> Self {
        let best = if outcome.results.len() == legs {
            outcome
                .results
                .iter()
                .map(|s| s.result.lowest_price_in(currency).map(|p| p.amount_minor))
                .sum::<Option<i64>>()
                .map(|total| Price::new(total, currency))
        } else {
            None
        };
        Self {
            best,
            search_ids: outcome.results.iter().map(|s| s.result.search_id.clone()).collect(),
            deep_link: outcome
                .results
                .first()
                .map(|s| s.result.deep_link.clone())
                .unwrap_or_default(),
            total_flights: outcome.total_flights(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Evaluation {
    /// At or below target; notify on these channels. They are already
    /// marked as fired.
    Fire { alert: Alert, channels: Vec<Channel> },
    /// At or below target, every channel already fired this episode.
    Suppressed { best: Price },
    /// Above target. `rearmed` when this ended a below-target episode.
    AboveTarget { best: Price, rearmed: bool },
    NoPrice,
    /// Missing, deactivated, or not in `evaluating`.
    Skipped,
}

pub struct AlertStore {
    alerts: RwLock<BTreeMap<String, Alert>>,
    clock: Arc<dyn Clock>,
    snapshot: Option<JsonSnapshot<Vec<Alert>>>,
}

impl AlertStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            alerts: RwLock::new(BTreeMap::new()),
            clock,
            snapshot: None,
        }
    }

    /// Persist every change to `snapshot` and restore its last contents.
    /// An evaluation interrupted by a restart is rolled back.
    pub async fn with_snapshot(mut self, snapshot: JsonSnapshot<Vec<Alert>>) -> anyhow::Result<Self> {
        if let Some(saved) = snapshot.load().await? {
            tracing::info!(count = saved.len(), path = %snapshot.path().display(), "Restored alerts");
            let alerts = self.alerts.get_mut();
            for mut alert in saved {
                if alert.status == AlertStatus::Evaluating {
                    alert.status = alert.resting_status();
                }
                alerts.insert(alert.id.clone(), alert);
            }
        }
        self.snapshot = Some(snapshot);
        Ok(self)
    }

    pub async fn create(&self, new: NewAlert) -> Result<Alert, InvalidQuery> {
        let alert = self.build(new)?;
        let saved = {
            let mut alerts = self.alerts.write().await;
            alerts.insert(alert.id.clone(), alert.clone());
            self.snapshot_of(&alerts)
        };
        self.persist(saved).await;
        tracing::info!(alert_id = %alert.id, route = %alert.query, target = %alert.target_price, "Alert created");
        Ok(alert)
    }

    /// Consistent copy of every alert, oldest id first.
    pub async fn list(&self) -> Vec<Alert> {
        self.alerts.read().await.values().cloned().collect()
    }

    pub async fn get(&self, id: &str) -> Option<Alert> {
        self.alerts.read().await.get(id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.alerts.read().await.len()
    }

    /// Soft delete. Deactivating twice is a no-op.
    pub async fn deactivate(&self, id: &str) -> Result<Alert, AlertNotFound> {
        let now = self.clock.now();
        let (alert, saved) = {
            let mut alerts = self.alerts.write().await;
            let alert = alerts.get_mut(id).ok_or_else(|| AlertNotFound(id.to_string()))?;
            if alert.is_deactivated() {
                return Ok(alert.clone());
            }
            alert.status = AlertStatus::Deactivated;
            alert.deactivated_at = Some(now);
            let alert = alert.clone();
            (alert, self.snapshot_of(&alerts))
        };
        self.persist(saved).await;
        tracing::info!(alert_id = %id, "Alert deactivated");
        Ok(alert)
    }

    /// Ids of alerts a scheduler tick should look at.
    pub async fn due_ids(&self) -> Vec<String> {
        self.alerts
            .read()
            .await
            .values()
            .filter(|a| matches!(a.status, AlertStatus::Active | AlertStatus::Triggered))
            .map(|a| a.id.clone())
            .collect()
    }

    /// Move an alert into `evaluating` and return a copy to evaluate.
    pub async fn begin_evaluation(&self, id: &str) -> Option<Alert> {
        let mut alerts = self.alerts.write().await;
        let alert = alerts.get_mut(id)?;
        match alert.status {
            AlertStatus::Active | AlertStatus::Triggered => {
                alert.status = AlertStatus::Evaluating;
                Some(alert.clone())
            }
            AlertStatus::Evaluating | AlertStatus::Deactivated => None,
        }
    }

    /// Apply an observed price and decide which channels to notify.
    pub async fn complete_evaluation(&self, id: &str, observation: &PriceObservation) -> Evaluation {
        let now = self.clock.now();
        let (evaluation, saved) = {
            let mut alerts = self.alerts.write().await;
            let Some(alert) = alerts.get_mut(id) else {
                return Evaluation::Skipped;
            };
            if alert.status != AlertStatus::Evaluating {
                return Evaluation::Skipped;
            }

            alert.last_evaluated_at = Some(now);
            alert.last_error = None;
            if let Some(search_id) = observation.search_ids.first() {
                alert.last_search_id = Some(search_id.clone());
            }

            let evaluation = match &observation.best {
                Some(best) if best.currency == alert.target_price.currency => {
                    alert.last_best_price = Some(best.clone());
                    if best.amount_minor <= alert.target_price.amount_minor {
                        alert.in_episode = true;
                        alert.status = AlertStatus::Triggered;
                        let channels: Vec<Channel> = alert
                            .channels
                            .iter_mut()
                            .filter(|c| !c.fired)
                            .map(|c| {
                                c.fired = true;
                                c.channel
                            })
                            .collect();
                        if channels.is_empty() {
                            Evaluation::Suppressed { best: best.clone() }
                        } else {
                            Evaluation::Fire {
                                alert: alert.clone(),
                                channels,
                            }
                        }
                    } else {
                        let rearmed = alert.in_episode;
                        alert.in_episode = false;
                        for channel in &mut alert.channels {
                            channel.fired = false;
                        }
                        alert.status = AlertStatus::Active;
                        Evaluation::AboveTarget {
                            best: best.clone(),
                            rearmed,
                        }
                    }
                }
                _ => {
                    alert.status = alert.resting_status();
                    Evaluation::NoPrice
                }
            };
            (evaluation, self.snapshot_of(&alerts))
        };
        self.persist(saved).await;
        evaluation
    }

    /// The evaluation failed; restore the status it had before.
    pub async fn abort_evaluation(&self, id: &str, error: &str) {
        let saved = {
            let mut alerts = self.alerts.write().await;
            let Some(alert) = alerts.get_mut(id) else {
                return;
            };
            if alert.status == AlertStatus::Evaluating {
                alert.status = alert.resting_status();
            }
            alert.last_error = Some(error.to_string());
            self.snapshot_of(&alerts)
        };
        self.persist(saved).await;
    }

    /// Record the outcome of a dispatch. A failed channel stays fired for
    /// the episode.
    pub async fn record_dispatch(&self, id: &str, channel: Channel, outcome: &Result<Ack, DispatchError>) {
        let saved = {
            let mut alerts = self.alerts.write().await;
            let Some(state) = alerts
                .get_mut(id)
                .and_then(|a| a.channels.iter_mut().find(|c| c.channel == channel))
            else {
                return;
            };
            match outcome {
                Ok(ack) => {
                    state.notifications_sent += 1;
                    state.last_sent_at = Some(ack.sent_at);
                    state.last_error = None;
                }
                Err(e) => state.last_error = Some(e.to_string()),
            }
            self.snapshot_of(&alerts)
        };
        self.persist(saved).await;
    }

    fn build(&self, new: NewAlert) -> Result<Alert, InvalidQuery> {
        let currency = new.target_price.currency.trim().to_ascii_uppercase();
        if !ALERT_CURRENCIES.contains(&currency.as_str()) {
            return Err(InvalidQueryReason::Currency { code: currency }.into());
        }
        if new.target_price.amount_minor <= 0 {
            return Err(invalid_alert("target price must be positive"));
        }
        if new.recipients.is_empty() {
            return Err(invalid_alert("at least one notification channel is required"));
        }

        let mut by_channel: BTreeMap<Channel, Vec<String>> = BTreeMap::new();
        for (channel, address) in new.recipients {
            let address = address.trim().to_string();
            validate_recipient(channel, &address)?;
            let list = by_channel.entry(channel).or_default();
            if !list.contains(&address) {
                list.push(address);
            }
        }

        let mut query = new.query;
        query.currency = currency.clone();
        let now = self.clock.now();
        Ok(Alert {
            id: tagged_id("alert", now, &query.origin, &query.destination),
            query,
            target_price: Price::new(new.target_price.amount_minor, currency),
            channels: by_channel
                .into_iter()
                .map(|(channel, recipients)| ChannelState::new(channel, recipients))
                .collect(),
            status: AlertStatus::Active,
            in_episode: false,
            created_at: now,
            last_evaluated_at: None,
            last_best_price: None,
            last_search_id: None,
            last_error: None,
            deactivated_at: None,
        })
    }

    /// Copy of the store for saving. Call with the write lock held so the
    /// generation order matches the order of changes.
    fn snapshot_of(&self, alerts: &BTreeMap<String, Alert>) -> Option<(u64, Vec<Alert>)> {
        self.snapshot
            .as_ref()
            .map(|snapshot| (snapshot.next_generation(), alerts.values().cloned().collect()))
    }

    async fn persist(&self, saved: Option<(u64, Vec<Alert>)>) {
        if let (Some(snapshot), Some((generation, all))) = (&self.snapshot, saved) {
            if let Err(e) = snapshot.save_generation(generation, &all).await {
                tracing::error!("Failed to persist alerts: {:#}", e);
            }
        }
    }
}

fn invalid_alert(detail: &str) -> InvalidQuery {
    InvalidQueryReason::Alert {
        detail: detail.to_string(),
    }
    .into()
}

/// Absolute http(s) URL with a host.
pub(crate) fn is_http_url(address: &str) -> bool {
    address
        .parse::<Uri>()
        .map(|uri| matches!(uri.scheme_str(), Some("http" | "https")) && uri.host().is_some())
        .unwrap_or(false)
}

fn validate_recipient(channel: Channel, address: &str) -> Result<(), InvalidQuery> {
    let ok = match channel {
        Channel::Email => EMAIL_RE.is_match(address),
        Channel::Webhook => is_http_url(address),
    };
    if ok {
        Ok(())
    } else {
        Err(invalid_alert(&format!("invalid {} recipient '{}'", channel, address)))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::flights_query::tests::one_way;
    use chrono::NaiveDate;

    pub(crate) fn sample_alert() -> Alert {
        let now = Utc::now();
        let mut query = one_way("ARN", "LHR", NaiveDate::from_ymd_opt(2025, 12, 25).unwrap());
        query.currency = "SEK".into();
        Alert {
            id: tagged_id("alert", now, "ARN", "LHR"),
            query,
            target_price: Price::from_major(5000, "SEK"),
            channels: vec![
                ChannelState::new(Channel::Email, vec!["traveller@example.test".into()]),
                ChannelState::new(Channel::Webhook, vec!["https://hooks.example.test/fares".into()]),
            ],
            status: AlertStatus::Active,
            in_episode: false,
            created_at: now,
            last_evaluated_at: None,
            last_best_price: None,
            last_search_id: None,
            last_error: None,
            deactivated_at: None,
        }
    }

    fn new_alert(target_sek: i64) -> NewAlert {
        NewAlert {
            query: one_way("ARN", "LHR", NaiveDate::from_ymd_opt(2025, 12, 25).unwrap()),
            target_price: Price::from_major(target_sek, "sek"),
            recipients: vec![
                (Channel::Email, "traveller@example.test".into()),
                (Channel::Webhook, "https://hooks.example.test/fares".into()),
            ],
        }
    }

    fn store() -> AlertStore {
        AlertStore::new(Arc::new(ManualClock::at_date(
            NaiveDate::from_ymd_opt(2025, 12, 1).unwrap(),
        )))
    }

    fn seen(sek: i64) -> PriceObservation {
        PriceObservation {
            best: Some(Price::from_major(sek, "SEK")),
            search_ids: vec![format!("search_{}", sek)],
            ..Default::default()
        }
    }

    async fn evaluate(store: &AlertStore, id: &str, sek: i64) -> Evaluation {
        assert!(store.begin_evaluation(id).await.is_some());
        store.complete_evaluation(id, &seen(sek)).await
    }

    #[tokio::test]
    async fn test_create_normalizes_currency_and_groups_channels() {
        let store = store();
        let mut new = new_alert(5000);
        new.recipients.push((Channel::Email, "second@example.test".into()));
        let alert = store.create(new).await.unwrap();

        assert!(alert.id.starts_with("alert_20251201_000000_ARN_LHR_"));
        assert_eq!(alert.currency(), "SEK");
        assert_eq!(alert.query.currency, "SEK");
        assert_eq!(alert.recipients(Channel::Email).len(), 2);
        assert_eq!(alert.status, AlertStatus::Active);
        assert_eq!(store.list().await, vec![alert]);
    }

    #[tokio::test]
    async fn test_create_rejects_bad_input() {
        let store = store();

        let mut jpy = new_alert(5000);
        jpy.target_price = Price::from_major(5000, "JPY");
        assert!(matches!(
            store.create(jpy).await.unwrap_err().reason,
            InvalidQueryReason::Currency { .. }
        ));

        let zero = new_alert(0);
        assert!(store.create(zero).await.is_err());

        let mut email = new_alert(5000);
        email.recipients = vec![(Channel::Email, "not-an-address".into())];
        assert!(store.create(email).await.is_err());

        let mut hook = new_alert(5000);
        hook.recipients = vec![(Channel::Webhook, "ftp://hooks.example.test".into())];
        assert!(store.create(hook).await.is_err());

        let mut none = new_alert(5000);
        none.recipients.clear();
        assert!(store.create(none).await.is_err());

        assert_eq!(store.len().await, 0);
    }

    #[tokio::test]
    async fn test_episode_fires_once_and_rearms() {
        let store = store();
        let id = store.create(new_alert(5000)).await.unwrap().id;

        match evaluate(&store, &id, 4800).await {
            Evaluation::Fire { channels, .. } => assert_eq!(channels, [Channel::Email, Channel::Webhook]),
            other => panic!("expected fire, got {:?}", other),
        }
        assert_eq!(store.get(&id).await.unwrap().status, AlertStatus::Triggered);

        assert!(matches!(evaluate(&store, &id, 4700).await, Evaluation::Suppressed { .. }));
        assert!(matches!(
            evaluate(&store, &id, 5200).await,
            Evaluation::AboveTarget { rearmed: true, .. }
        ));
        assert_eq!(store.get(&id).await.unwrap().status, AlertStatus::Active);
        assert!(matches!(evaluate(&store, &id, 4900).await, Evaluation::Fire { .. }));

        let alert = store.get(&id).await.unwrap();
        assert_eq!(alert.last_best_price, Some(Price::from_major(4900, "SEK")));
        assert_eq!(alert.last_search_id.as_deref(), Some("search_4900"));
    }

    #[tokio::test]
    async fn test_target_is_inclusive() {
        let store = store();
        let id = store.create(new_alert(5000)).await.unwrap().id;
        assert!(matches!(evaluate(&store, &id, 5000).await, Evaluation::Fire { .. }));
    }

    #[tokio::test]
    async fn test_abort_and_missing_price_keep_state() {
        let store = store();
        let id = store.create(new_alert(5000)).await.unwrap().id;
        evaluate(&store, &id, 4800).await;

        store.begin_evaluation(&id).await.unwrap();
        assert!(store.begin_evaluation(&id).await.is_none());
        store.abort_evaluation(&id, "scrape failed (timeout): slow").await;
        let alert = store.get(&id).await.unwrap();
        assert_eq!(alert.status, AlertStatus::Triggered);
        assert!(alert.in_episode);
        assert_eq!(alert.last_best_price, Some(Price::from_major(4800, "SEK")));
        assert!(alert.last_error.is_some());

        store.begin_evaluation(&id).await.unwrap();
        let none = PriceObservation::default();
        assert_eq!(store.complete_evaluation(&id, &none).await, Evaluation::NoPrice);
        let alert = store.get(&id).await.unwrap();
        assert_eq!(alert.status, AlertStatus::Triggered);
        assert!(alert.channels.iter().all(|c| c.fired));
    }

    #[tokio::test]
    async fn test_deactivate_wins_over_running_evaluation() {
        let store = store();
        let id = store.create(new_alert(5000)).await.unwrap().id;

        store.begin_evaluation(&id).await.unwrap();
        let deactivated = store.deactivate(&id).await.unwrap();
        assert!(deactivated.deactivated_at.is_some());
        assert_eq!(store.complete_evaluation(&id, &seen(100)).await, Evaluation::Skipped);
        assert_eq!(store.get(&id).await.unwrap().status, AlertStatus::Deactivated);
        assert!(store.due_ids().await.is_empty());
        assert!(store.deactivate("alert_missing").await.is_err());
    }

    #[tokio::test]
    async fn test_failed_dispatch_is_recorded() {
        let store = store();
        let id = store.create(new_alert(5000)).await.unwrap().id;
        evaluate(&store, &id, 4800).await;

        let failure = Err(DispatchError::Transport {
            channel: Channel::Webhook,
            recipient: "https://hooks.example.test/fares".into(),
            detail: "HTTP 503".into(),
        });
        store.record_dispatch(&id, Channel::Webhook, &failure).await;
        let alert = store.get(&id).await.unwrap();
        let hook = alert.channels.iter().find(|c| c.channel == Channel::Webhook).unwrap();
        assert!(hook.fired);
        assert_eq!(hook.notifications_sent, 0);
        assert!(hook.last_error.as_deref().unwrap().contains("503"));
        assert_ne!(alert.status, AlertStatus::Deactivated);
    }

    #[tokio::test]
    async fn test_snapshot_rolls_back_interrupted_evaluation() -> anyhow::Result<()> {
        let dir = std::env::temp_dir().join(format!("farewatch-alerts-{}", uuid::Uuid::new_v4()));
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::at_date(NaiveDate::from_ymd_opt(2025, 12, 1).unwrap()));

        let store = AlertStore::new(clock.clone())
            .with_snapshot(JsonSnapshot::in_dir(&dir, "alerts.json"))
            .await?;
        let id = store.create(new_alert(5000)).await?.id;
        store.begin_evaluation(&id).await.unwrap();
        // Any later write captures the in-flight status.
        store.create(new_alert(6000)).await?;

        let reloaded = AlertStore::new(clock)
            .with_snapshot(JsonSnapshot::in_dir(&dir, "alerts.json"))
            .await?;
        assert_eq!(reloaded.len().await, 2);
        assert_eq!(reloaded.get(&id).await.unwrap().status, AlertStatus::Active);

        tokio::fs::remove_dir_all(&dir).await?;
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_deactivation_survives_racing_evaluation_save() -> anyhow::Result<()> {
        let dir = std::env::temp_dir().join(format!("farewatch-alerts-{}", uuid::Uuid::new_v4()));
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::at_date(NaiveDate::from_ymd_opt(2025, 12, 1).unwrap()));
        let store = Arc::new(
            AlertStore::new(clock.clone())
                .with_snapshot(JsonSnapshot::in_dir(&dir, "alerts.json"))
                .await?,
        );

        for _ in 0..20 {
            let id = store.create(new_alert(5000)).await?.id;
            store.begin_evaluation(&id).await.unwrap();
            let (a, b) = (Arc::clone(&store), Arc::clone(&store));
            let (id_a, id_b) = (id.clone(), id.clone());
            let evaluation = tokio::spawn(async move { a.complete_evaluation(&id_a, &seen(5200)).await });
            let deactivation = tokio::spawn(async move { b.deactivate(&id_b).await });
            evaluation.await?;
            deactivation.await??;
        }

        let reloaded = AlertStore::new(clock)
            .with_snapshot(JsonSnapshot::in_dir(&dir, "alerts.json"))
            .await?;
        let alerts = reloaded.list().await;
        assert_eq!(alerts.len(), 20);
        assert!(alerts.iter().all(|a| a.status == AlertStatus::Deactivated));

        tokio::fs::remove_dir_all(&dir).await?;
        Ok(())
    }
}
