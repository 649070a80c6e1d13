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

//! # Alert Scheduler
//!
//! Periodic re-check of every due alert through the regular search
//! pipeline, on the background lane. Each tick re-reads the store; nothing
//! about an alert is kept between ticks.

use farewatch_query_queues::Lane;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::alerts::{Alert, AlertStore, Evaluation, PriceObservation};
use crate::errors::{ScrapeError, SearchError};
use crate::flights_multi_city::MultiCityOrchestrator;
use crate::flights_query::TripType;
use crate::flights_search::FareSearchService;
use crate::notify::NotificationDispatcher;

pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(30 * 60);
pub const DEFAULT_ALERT_TIMEOUT: Duration = Duration::from_secs(180);

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub evaluated: usize,
    pub triggered: usize,
    pub notifications_sent: usize,
    pub dispatch_failures: usize,
    pub failed: usize,
}

pub struct AlertScheduler {
    store: Arc<AlertStore>,
    service: Arc<FareSearchService>,
    dispatcher: Arc<NotificationDispatcher>,
    interval: Duration,
    alert_timeout: Duration,
}

impl AlertScheduler {
    pub fn new(
        store: Arc<AlertStore>,
        service: Arc<FareSearchService>,
        dispatcher: Arc<NotificationDispatcher>,
    ) -> Self {
        Self {
            store,
            service,
            dispatcher,
            interval: DEFAULT_CHECK_INTERVAL,
            alert_timeout: DEFAULT_ALERT_TIMEOUT,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval.max(Duration::from_secs(1));
        self
    }

    pub fn with_alert_timeout(mut self, timeout: Duration) -> Self {
        self.alert_timeout = timeout;
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Cache TTL for re-checks. Slightly under the interval so each tick
    /// sees a fresh scrape, while interactive searches in between still
    /// share it.
    pub fn recheck_ttl(&self) -> Duration {
        self.interval.mul_f64(0.9)
    }

    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(cancel))
    }

    /// Tick until cancelled. Cancellation is observed between ticks only;
    /// an overrunning tick delays the next one instead of overlapping it.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(interval = ?self.interval, "Alert scheduler started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            let start = std::time::Instant::now();
            let report = self.tick().await;
            tracing::info!(
                evaluated = report.evaluated,
                triggered = report.triggered,
                sent = report.notifications_sent,
                failed = report.failed,
                "Alert tick finished in {:?}",
                start.elapsed()
            );
        }
        tracing::info!("Alert scheduler stopped");
    }

    /// Evaluate every due alert once, one after another.
    pub async fn tick(&self) -> TickReport {
        let mut report = TickReport::default();
        for id in self.store.due_ids().await {
            match self.evaluate(&id).await {
                Ok(None) => {}
                Ok(Some(outcome)) => {
                    report.evaluated += 1;
                    if outcome.triggered {
                        report.triggered += 1;
                    }
                    report.notifications_sent += outcome.sent;
                    report.dispatch_failures += outcome.failed;
                }
                Err(_) => {
                    report.evaluated += 1;
                    report.failed += 1;
                }
            }
        }
        report
    }

    /// Evaluate one alert now. `Ok(None)` when it was not due.
    pub async fn evaluate(&self, id: &str) -> Result<Option<EvaluationOutcome>, SearchError> {
        let Some(alert) = self.store.begin_evaluation(id).await else {
            return Ok(None);
        };

        let observed = match tokio::time::timeout(self.alert_timeout, self.observe(&alert)).await {
            Ok(result) => result,
            Err(_) => Err(ScrapeError::timeout(format!(
                "evaluation exceeded {:?}",
                self.alert_timeout
            ))
            .into()),
        };
        let observation = match observed {
            Ok(observation) => observation,
            Err(e) => {
                tracing::warn!(alert_id = %id, route = %alert.query, code = e.code(), "Alert evaluation failed: {}", e);
                self.store.abort_evaluation(id, &e.to_string()).await;
                return Err(e);
            }
        };

        let evaluation = self.store.complete_evaluation(id, &observation).await;
        let mut outcome = EvaluationOutcome::default();
        match evaluation {
            Evaluation::Fire { alert, channels } => {
                outcome.triggered = true;
                tracing::info!(
                    alert_id = %id,
                    best = ?observation.best,
                    target = %alert.target_price,
                    "Alert triggered"
                );
                for channel in channels {
                    let result = self.dispatcher.notify(&alert, &observation, channel).await;
                    match &result {
                        Ok(_) => outcome.sent += 1,
                        Err(_) => outcome.failed += 1,
                    }
                    self.store.record_dispatch(id, channel, &result).await;
                }
            }
            Evaluation::AboveTarget { rearmed: true, best } => {
                tracing::info!(alert_id = %id, %best, "Price back above target, alert re-armed");
            }
            Evaluation::NoPrice => {
                tracing::debug!(alert_id = %id, "No comparable price this cycle");
            }
            Evaluation::AboveTarget { .. } | Evaluation::Suppressed { .. } | Evaluation::Skipped => {}
        }
        Ok(Some(outcome))
    }

    async fn observe(&self, alert: &Alert) -> Result<PriceObservation, SearchError> {
        let ttl = self.recheck_ttl();
        let currency = alert.currency();
        if alert.trip_type() == TripType::MultiCity {
            let legs = alert.query.segment_queries();
            let orchestrator = MultiCityOrchestrator::new(Arc::clone(&self.service), ttl);
            let outcome = orchestrator.run(&legs, Lane::Background).await?;
            if outcome.is_partial() {
                tracing::warn!(alert_id = %alert.id, failed = outcome.failures.len(), "Itinerary only partially priced");
            }
            Ok(PriceObservation::from_segments(&outcome, legs.len(), currency))
        } else {
            let result = self
                .service
                .search_canonical(&alert.query, ttl, Lane::Background)
                .await?;
            Ok(PriceObservation::from_result(&result, currency))
        }
    }
}

/// What one alert evaluation did.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct EvaluationOutcome {
    pub triggered: bool,
    pub sent: usize,
    pub failed: usize,
}
