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

//! # Fare Monitor
//!
//! Wires the pipeline together from a [`MonitorConfig`] and exposes the
//! inbound calls: search, multi-city search, history lookup and alert
//! management.

use anyhow::Context;
use farewatch_query_queues::{QueryQueue, RetryPolicy};
use std::sync::Arc;
use std::time::Duration;

use crate::alert_scheduler::AlertScheduler;
use crate::alerts::{Alert, AlertStore, NewAlert};
use crate::browser::{BrowserDriver, WebDriverBrowser};
use crate::clock::{Clock, SystemClock};
use crate::config::MonitorConfig;
use crate::errors::{AlertNotFound, SearchError};
use crate::fare_cache::FareCache;
use crate::flights_multi_city::{MultiCityOrchestrator, MultiCityOutcome};
use crate::flights_normalizer::{QueryNormalizer, RawQuery};
use crate::flights_results_parser::Price;
use crate::flights_search::{FareSearchService, SearchResult};
use crate::locations::LocationTable;
use crate::notify::{Channel, HttpNotificationTransport, NotificationDispatcher, NotificationTransport};
use crate::persistence::JsonSnapshot;
use crate::scrape_executor::{ScrapeExecutor, ScrapeSettings};
use crate::search_history::SearchHistory;
use crate::webhooks::WebhookRegistry;

pub struct FareMonitor {
    config: MonitorConfig,
    search: Arc<FareSearchService>,
    multi_city: MultiCityOrchestrator,
    alerts: Arc<AlertStore>,
    scheduler: Arc<AlertScheduler>,
    webhooks: WebhookRegistry,
}

impl FareMonitor {
    /// Chrome over WebDriver, notifications over HTTP, wall-clock time.
    pub async fn start(config: MonitorConfig) -> anyhow::Result<Self> {
        let driver = Arc::new(WebDriverBrowser::new(config.webdriver_url.clone(), config.headless));
        let mut transport = HttpNotificationTransport::new(config.notify_timeout)?;
        if let Some(relay) = &config.email_relay {
            transport = transport.with_email_relay(relay.clone());
        }
        Self::assemble(config, driver, Arc::new(transport), Arc::new(SystemClock)).await
    }

    pub async fn assemble(
        config: MonitorConfig,
        driver: Arc<dyn BrowserDriver>,
        transport: Arc<dyn NotificationTransport>,
        clock: Arc<dyn Clock>,
    ) -> anyhow::Result<Self> {
        let table = Arc::new(LocationTable::builtin().with_threshold(config.similarity_threshold));
        let normalizer = QueryNormalizer::new(table, Arc::clone(&clock))
            .with_max_days_ahead(config.max_days_ahead)
            .with_default_currency(&config.currency);

        let mut sessions = QueryQueue::with_concurrency_limit(config.max_sessions)
            .background_share(config.background_sessions)
            .retry_policy(
                RetryPolicy::default()
                    .with_max_attempts(config.scrape_attempts)
                    .with_delays(config.backoff_base, config.backoff_max),
            );
        if let Some(qps) = config.sessions_per_second {
            sessions = sessions.qps_limit(qps);
        }
        let settings = ScrapeSettings {
            language: config.language.clone(),
            session_timeout: config.session_timeout,
            results_wait: config.results_wait,
            step_delay: config.step_delay,
        };
        let executor = Arc::new(ScrapeExecutor::new(driver, sessions, Arc::clone(&clock), settings));

        let mut history = SearchHistory::default();
        let mut alerts = AlertStore::new(Arc::clone(&clock));
        if let Some(dir) = &config.data_dir {
            history = history
                .with_snapshot(JsonSnapshot::in_dir(dir, "searches.json"))
                .await
                .context("Failed to load search history")?;
            alerts = alerts
                .with_snapshot(JsonSnapshot::in_dir(dir, "alerts.json"))
                .await
                .context("Failed to load alerts")?;
        }

        let search = Arc::new(
            FareSearchService::new(
                normalizer,
                Arc::new(FareCache::in_memory(Arc::clone(&clock))),
                executor,
                Arc::new(history),
                Arc::clone(&clock),
            )
            .with_interactive_ttl(config.interactive_ttl),
        );
        let multi_city = MultiCityOrchestrator::new(Arc::clone(&search), config.interactive_ttl);

        let dispatcher = Arc::new(
            NotificationDispatcher::new(transport, Arc::clone(&clock)).with_retry_policy(
                RetryPolicy::default()
                    .with_max_attempts(config.dispatch_attempts)
                    .with_delays(Duration::from_millis(500), Duration::from_secs(10)),
            ),
        );
        let mut webhooks = WebhookRegistry::new(Arc::clone(&dispatcher), clock);
        if let Some(dir) = &config.data_dir {
            webhooks = webhooks
                .with_snapshot(JsonSnapshot::in_dir(dir, "webhooks.json"))
                .await
                .context("Failed to load search webhooks")?;
        }
        let alerts = Arc::new(alerts);
        let scheduler = Arc::new(
            AlertScheduler::new(Arc::clone(&alerts), Arc::clone(&search), dispatcher)
                .with_interval(config.check_interval)
                .with_alert_timeout(config.alert_timeout),
        );

        tracing::info!(
            sessions = config.max_sessions,
            interval = ?config.check_interval,
            persistent = config.data_dir.is_some(),
            "Fare monitor ready"
        );
        Ok(Self {
            config,
            search,
            multi_city,
            alerts,
            scheduler,
            webhooks,
        })
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn search_service(&self) -> &Arc<FareSearchService> {
        &self.search
    }

    pub fn alerts(&self) -> &Arc<AlertStore> {
        &self.alerts
    }

    pub fn scheduler(&self) -> &Arc<AlertScheduler> {
        &self.scheduler
    }

    pub async fn search(&self, raw: &RawQuery) -> Result<SearchResult, SearchError> {
        let result = self.search.search(raw).await?;
        self.webhooks.publish_search(&result).await;
        Ok(result)
    }

    /// Each leg that succeeded is published as its own search event.
    pub async fn search_multi_city(&self, raw: &RawQuery) -> Result<MultiCityOutcome, SearchError> {
        let outcome = self.multi_city.search(raw).await?;
        for segment in &outcome.results {
            self.webhooks.publish_search(&segment.result).await;
        }
        Ok(outcome)
    }

    pub async fn get_search(&self, search_id: &str) -> Result<SearchResult, SearchError> {
        self.search.get_search(search_id).await
    }

    /// Normalize the watched query and register an alert on it. `target`
    /// is in major units of `currency`.
    pub async fn create_alert(
        &self,
        raw: &RawQuery,
        target: f64,
        currency: &str,
        recipients: Vec<(Channel, String)>,
    ) -> Result<Alert, SearchError> {
        let mut raw = raw.clone();
        raw.currency = Some(currency.to_string());
        let query = self.search.normalizer().normalize(&raw)?;
        let new = NewAlert {
            query,
            target_price: Price::new((target * 100.0).round() as i64, currency),
            recipients,
        };
        Ok(self.alerts.create(new).await?)
    }

    /// `Ok(false)` when the URL was already registered.
    pub async fn register_webhook(&self, url: &str) -> Result<bool, SearchError> {
        Ok(self.webhooks.register(url).await?)
    }

    pub async fn unregister_webhook(&self, url: &str) -> bool {
        self.webhooks.unregister(url).await
    }

    pub async fn list_webhooks(&self) -> Vec<String> {
        self.webhooks.list().await
    }

    /// Write pending history to disk. Call before exiting.
    pub async fn flush(&self) {
        self.search.history().flush().await;
    }

    pub async fn list_alerts(&self) -> Vec<Alert> {
        self.alerts.list().await
    }

    pub async fn deactivate_alert(&self, id: &str) -> Result<Alert, AlertNotFound> {
        self.alerts.deactivate(id).await
    }
}
