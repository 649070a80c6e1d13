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

//! Price alerts end to end: scheduler ticks drive real searches against a
//! fake surface, and notifications land on a recording transport.
//!
//! Each tick advances the clock by the check interval so the previous
//! scrape has expired from the cache.
//!
//! Run with:
//!     cargo test --test t_alert_episodes


use chrono::NaiveDate;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use fakes::{FakeBrowser, FakePage, RecordingTransport, fast_config, monitor, sek_page};
use farewatch_fare_monitor::{
    Alert, AlertStatus, Channel, FareMonitor, ManualClock, MonitorConfig, Price, RawQuery, RawSegment, TickReport,
};

struct Harness {
    browser: Arc<FakeBrowser>,
    transport: Arc<RecordingTransport>,
    clock: Arc<ManualClock>,
    monitor: FareMonitor,
}

impl Harness {
    async fn new(config: MonitorConfig) -> Self {
        let browser = Arc::new(FakeBrowser::new(FakePage::NavigationFailure));
        let transport = Arc::new(RecordingTransport::default());
        let clock = Arc::new(ManualClock::at_date(NaiveDate::from_ymd_opt(2025, 12, 1).unwrap()));
        let monitor = monitor(config, Arc::clone(&browser), Arc::clone(&transport), clock.clone()).await;
        Self {
            browser,
            transport,
            clock,
            monitor,
        }
    }

    async fn watch(&self, raw: &RawQuery, target: f64) -> Alert {
        self.monitor
            .create_alert(
                raw,
                target,
                "SEK",
                vec![
                    (Channel::Email, "traveller@example.test".into()),
                    (Channel::Webhook, "https://hooks.example.test/fares".into()),
                ],
            )
            .await
            .expect("alert is valid")
    }

    /// Serve `amounts` for the alert's route and run one tick.
    async fn tick_at(&self, alert: &Alert, amounts: &[i64]) -> TickReport {
        self.browser.serve(&alert.query, FakePage::Results(sek_page(amounts)));
        self.tick().await
    }

    async fn tick(&self) -> TickReport {
        let report = self.monitor.scheduler().tick().await;
        let interval = self.monitor.scheduler().interval();
        self.clock.advance(chrono::Duration::from_std(interval).unwrap());
        report
    }

    async fn alert(&self, id: &str) -> Alert {
        self.monitor.alerts().get(id).await.expect("alert exists")
    }
}

fn arn_lhr() -> RawQuery {
    RawQuery {
        origin: "Stockholm".into(),
        destination: "London".into(),
        depart_date: "2025-12-25".into(),
        ..RawQuery::default()
    }
}

#[tokio::test]
async fn test_one_notification_per_episode() {
    let h = Harness::new(fast_config()).await;
    let alert = h.watch(&arn_lhr(), 5000.0).await;
    assert_eq!(alert.status, AlertStatus::Active);
    assert_eq!(alert.query.currency, "SEK");

    // Drops below target: one notification per channel.
    let report = h.tick_at(&alert, &[5300, 4800, 6100]).await;
    assert_eq!(report.triggered, 1);
    assert_eq!(report.notifications_sent, 2);
    assert_eq!(h.transport.emails(), 1);
    assert_eq!(h.transport.webhooks().len(), 1);
    let after = h.alert(&alert.id).await;
    assert_eq!(after.status, AlertStatus::Triggered);
    assert_eq!(after.last_best_price, Some(Price::from_major(4800, "SEK")));

    // Still below target: silent.
    let report = h.tick_at(&alert, &[4700]).await;
    assert_eq!(report, TickReport { evaluated: 1, ..TickReport::default() });
    assert_eq!(h.transport.emails(), 1);
    assert_eq!(h.transport.webhooks().len(), 1);
    assert_eq!(h.alert(&alert.id).await.last_best_price, Some(Price::from_major(4700, "SEK")));

    // Back above target: re-armed.
    h.tick_at(&alert, &[5200]).await;
    let rearmed = h.alert(&alert.id).await;
    assert_eq!(rearmed.status, AlertStatus::Active);
    assert!(rearmed.channels.iter().all(|c| !c.fired));

    // Below again: a new episode, notified once more.
    let report = h.tick_at(&alert, &[4900]).await;
    assert_eq!(report.notifications_sent, 2);
    assert_eq!(h.transport.emails(), 2);
    assert_eq!(h.transport.webhooks().len(), 2);

    let final_state = h.alert(&alert.id).await;
    for channel in &final_state.channels {
        assert_eq!(channel.notifications_sent, 2, "{}", channel.channel);
        assert!(channel.last_error.is_none());
    }
    assert_eq!(h.browser.opened(), 4, "every tick scraped fresh");
}

#[tokio::test]
async fn test_webhook_payload() {
    let h = Harness::new(fast_config()).await;
    let alert = h.watch(&arn_lhr(), 5000.0).await;
    h.tick_at(&alert, &[4800, 5100]).await;

    let webhooks = h.transport.webhooks();
    let (url, payload) = &webhooks[0];
    assert_eq!(url, "https://hooks.example.test/fares");
    assert_eq!(payload["event"], "price_alert_triggered");
    assert_eq!(payload["alert_id"], alert.id.as_str());
    assert_eq!(payload["data"]["origin"], "ARN");
    assert_eq!(payload["data"]["destination"], "LHR");
    assert_eq!(payload["data"]["currency"], "SEK");
    assert_eq!(payload["data"]["target_price"], 5000.0);
    assert_eq!(payload["data"]["best_price"], 4800.0);
    assert_eq!(payload["data"]["total_flights"], 2);
    assert!(payload["search_id"].as_str().unwrap().starts_with("search_"));
    assert!(payload["data"]["deep_link"].as_str().unwrap().contains("tfs="));

    let emails = h.transport.emails.lock().unwrap().clone();
    assert_eq!(emails[0].0, "traveller@example.test");
    assert!(emails[0].1.contains("SEK 4800"), "{}", emails[0].1);
}

#[tokio::test]
async fn test_price_equal_to_target_triggers() {
    let h = Harness::new(fast_config()).await;
    let alert = h.watch(&arn_lhr(), 5000.0).await;
    let report = h.tick_at(&alert, &[5000]).await;
    assert_eq!(report.triggered, 1);
}

#[tokio::test]
async fn test_failed_search_leaves_alert_due() {
    let h = Harness::new(fast_config()).await;
    let alert = h.watch(&arn_lhr(), 5000.0).await;

    // Nothing served: every scrape attempt fails to navigate.
    let report = h.tick().await;
    assert_eq!(report.failed, 1);
    let after = h.alert(&alert.id).await;
    assert_eq!(after.status, AlertStatus::Active);
    assert!(after.last_error.is_some());
    assert_eq!(h.transport.emails(), 0);

    let report = h.tick_at(&alert, &[4500]).await;
    assert_eq!(report.triggered, 1);
    assert!(h.alert(&alert.id).await.last_error.is_none());
}

#[tokio::test]
async fn test_dispatch_failure_is_recorded_not_repeated() {
    let h = Harness::new(MonitorConfig {
        dispatch_attempts: 2,
        ..fast_config()
    })
    .await;
    h.transport.fail_webhooks.store(true, Ordering::SeqCst);
    let alert = h.watch(&arn_lhr(), 5000.0).await;

    let report = h.tick_at(&alert, &[4800]).await;
    assert_eq!(report.notifications_sent, 1);
    assert_eq!(report.dispatch_failures, 1);

    let after = h.alert(&alert.id).await;
    let webhook = after.channels.iter().find(|c| c.channel == Channel::Webhook).unwrap();
    assert!(webhook.fired, "an exhausted channel still counts as notified for this episode");
    assert!(webhook.last_error.as_deref().unwrap().contains("503"));
    assert_eq!(webhook.notifications_sent, 0);

    h.transport.fail_webhooks.store(false, Ordering::SeqCst);
    let report = h.tick_at(&alert, &[4700]).await;
    assert_eq!(report.notifications_sent, 0);
    assert!(h.transport.webhooks().is_empty());
}

#[tokio::test]
async fn test_deactivated_alerts_are_skipped() {
    let h = Harness::new(fast_config()).await;
    let alert = h.watch(&arn_lhr(), 5000.0).await;
    let stopped = h.monitor.deactivate_alert(&alert.id).await.unwrap();
    assert_eq!(stopped.status, AlertStatus::Deactivated);
    assert!(stopped.deactivated_at.is_some());

    let report = h.tick_at(&alert, &[100]).await;
    assert_eq!(report, TickReport::default());
    assert_eq!(h.browser.opened(), 0);
    assert!(h.monitor.deactivate_alert("alert_missing").await.is_err());
}

#[tokio::test]
async fn test_multi_city_alert_uses_sum_of_legs() {
    let h = Harness::new(fast_config()).await;
    let raw = RawQuery {
        segments: vec![
            RawSegment {
                origin: "Stockholm".into(),
                destination: "Paris".into(),
                date: "2025-12-10".into(),
            },
            RawSegment {
                origin: "Paris".into(),
                destination: "Stockholm".into(),
                date: "2025-12-17".into(),
            },
        ],
        ..RawQuery::default()
    };
    let alert = h.watch(&raw, 5000.0).await;
    let legs = alert.query.segment_queries();
    assert_eq!(legs.len(), 2);

    // One leg unavailable: no comparable total, nothing fires.
    h.browser.serve(&legs[0], FakePage::Results(sek_page(&[2000, 2600])));
    let report = h.tick().await;
    assert_eq!(report.triggered, 0);
    assert_eq!(h.alert(&alert.id).await.status, AlertStatus::Active);

    // 2000 + 2900 is under target.
    h.browser.serve(&legs[1], FakePage::Results(sek_page(&[3100, 2900])));
    let report = h.tick().await;
    assert_eq!(report.triggered, 1);
    let after = h.alert(&alert.id).await;
    assert_eq!(after.last_best_price, Some(Price::from_major(4900, "SEK")));
    let payload = &h.transport.webhooks()[0].1;
    assert_eq!(payload["data"]["search_ids"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_scheduler_task_stops_on_cancel() {
    let h = Harness::new(MonitorConfig {
        check_interval: Duration::from_secs(1),
        ..fast_config()
    })
    .await;
    let alert = h.watch(&arn_lhr(), 5000.0).await;
    h.browser.serve(&alert.query, FakePage::Results(sek_page(&[4000])));

    let cancel = CancellationToken::new();
    let handle = Arc::clone(h.monitor.scheduler()).spawn(cancel.clone());

    // The first tick runs immediately.
    let delivered = tokio::time::timeout(Duration::from_secs(5), async {
        while h.transport.emails() == 0 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(delivered.is_ok(), "scheduler never notified");

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("scheduler stops after cancel")
        .expect("scheduler task did not panic");
    assert_eq!(h.transport.emails(), 1);
}
