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

//! # Notification Dispatcher
//!
//! Decides what to send for a triggered alert and hands it to a
//! [`NotificationTransport`]. Each recipient gets a bounded number of
//! attempts with backoff; what happens on the wire is the transport's job.

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use farewatch_query_queues::{Lane, QueryQueue, QueryQueueError, RetryPolicy};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use wreq_util::Emulation;

use crate::alerts::{Alert, PriceObservation};
use crate::clock::Clock;
use crate::errors::DispatchError;

pub const PRICE_ALERT_EVENT: &str = "price_alert_triggered";
pub const DEFAULT_DISPATCH_ATTEMPTS: u32 = 3;
const DISPATCH_CONCURRENCY: u64 = 4;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Email,
    Webhook,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Webhook => "webhook",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Channel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "email" => Ok(Self::Email),
            "webhook" => Ok(Self::Webhook),
            other => Err(format!("unknown channel '{}'", other)),
        }
    }
}

/// Outbound delivery. Implementations classify their own failures:
/// `Transport` is retried, `Rejected` is not.
#[async_trait]
pub trait NotificationTransport: Send + Sync {
    async fn send_email(&self, to: &str, subject: &str, body: &str) -> Result<(), DispatchError>;
    async fn send_webhook(&self, url: &str, payload: &Value) -> Result<(), DispatchError>;
}

/// Webhooks are POSTed as JSON. Email goes to a JSON relay endpoint, if one
/// is configured.
pub struct HttpNotificationTransport {
    client: wreq::Client,
    email_relay: Option<String>,
}

impl HttpNotificationTransport {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = wreq::Client::builder()
            .emulation(Emulation::Safari18_5)
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            email_relay: None,
        })
    }

    pub fn with_email_relay(mut self, url: impl Into<String>) -> Self {
        self.email_relay = Some(url.into());
        self
    }

    async fn post_json(
        &self,
        channel: Channel,
        recipient: &str,
        url: &str,
        body: &Value,
    ) -> Result<(), DispatchError> {
        let start = std::time::Instant::now();
        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| DispatchError::Transport {
                channel,
                recipient: recipient.to_string(),
                detail: e.to_string(),
            })?;

        let status = response.status();
        tracing::debug!(%channel, recipient, status = status.as_u16(), "POST completed in {:?}", start.elapsed());
        if status.is_success() {
            return Ok(());
        }

        let detail = format!("HTTP {}", status);
        // 408 and 429 are worth retrying, other 4xx are not.
        if status.is_client_error() && !matches!(status.as_u16(), 408 | 429) {
            Err(DispatchError::Rejected {
                channel,
                recipient: recipient.to_string(),
                detail,
            })
        } else {
            Err(DispatchError::Transport {
                channel,
                recipient: recipient.to_string(),
                detail,
            })
        }
    }
}

#[async_trait]
impl NotificationTransport for HttpNotificationTransport {
    async fn send_email(&self, to: &str, subject: &str, body: &str) -> Result<(), DispatchError> {
        let Some(relay) = &self.email_relay else {
            return Err(DispatchError::Rejected {
                channel: Channel::Email,
                recipient: to.to_string(),
                detail: "no email relay configured".to_string(),
            });
        };
        let message = json!({ "to": to, "subject": subject, "text": body });
        self.post_json(Channel::Email, to, relay, &message).await
    }

    async fn send_webhook(&self, url: &str, payload: &Value) -> Result<(), DispatchError> {
        self.post_json(Channel::Webhook, url, url, payload).await
    }
}

/// Delivery receipt for one channel of one trigger.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Ack {
    pub channel: Channel,
    pub recipients: Vec<String>,
    pub sent_at: DateTime<Utc>,
}

enum Message {
    Email { subject: String, body: String },
    Webhook(Value),
}

pub struct NotificationDispatcher {
    transport: Arc<dyn NotificationTransport>,
    queue: QueryQueue,
    clock: Arc<dyn Clock>,
}

impl NotificationDispatcher {
    pub fn new(transport: Arc<dyn NotificationTransport>, clock: Arc<dyn Clock>) -> Self {
        let policy = RetryPolicy::default()
            .with_max_attempts(DEFAULT_DISPATCH_ATTEMPTS)
            .with_delays(Duration::from_millis(500), Duration::from_secs(10));
        Self {
            transport,
            queue: QueryQueue::with_concurrency_limit(DISPATCH_CONCURRENCY).retry_policy(policy),
            clock,
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.queue = self.queue.retry_policy(policy);
        self
    }

    /// Send one trigger event on `channel` to every recipient configured for
    /// it. All recipients are attempted; the first failure is returned.
    pub async fn notify(
        &self,
        alert: &Alert,
        observation: &PriceObservation,
        channel: Channel,
    ) -> Result<Ack, DispatchError> {
        let recipients = alert.recipients(channel);
        if recipients.is_empty() {
            return Err(DispatchError::NoRecipients(channel));
        }

        let now = self.clock.now();
        let message = match channel {
            Channel::Email => {
                let (subject, body) = email_message(alert, observation);
                Message::Email { subject, body }
            }
            Channel::Webhook => Message::Webhook(webhook_payload(alert, observation, now)),
        };

        let mut first_error = None;
        for recipient in recipients {
            if let Err(e) = self.deliver(channel, recipient, &message).await {
                tracing::error!(alert_id = %alert.id, %channel, recipient = %recipient, "Notification failed: {}", e);
                first_error.get_or_insert(e);
            } else {
                tracing::info!(alert_id = %alert.id, %channel, recipient = %recipient, "Notification sent");
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(Ack {
                channel,
                recipients: recipients.to_vec(),
                sent_at: now,
            }),
        }
    }

    /// Deliver a standalone webhook event, retried like alert webhooks.
    pub async fn send_event(&self, url: &str, payload: Value) -> Result<(), DispatchError> {
        self.deliver(Channel::Webhook, url, &Message::Webhook(payload)).await
    }

    async fn deliver(&self, channel: Channel, recipient: &str, message: &Message) -> Result<(), DispatchError> {
        let transport = &self.transport;
        let outcome = self
            .queue
            .with_retry(Lane::Interactive, || async move {
                match message {
                    Message::Email { subject, body } => transport.send_email(recipient, subject, body).await,
                    Message::Webhook(payload) => transport.send_webhook(recipient, payload).await,
                }
            })
            .await;

        outcome.map_err(|e| {
            if let QueryQueueError::Exhausted { attempts, .. } = &e {
                tracing::warn!(%channel, recipient, attempts, "Delivery attempts exhausted");
            }
            e.into_inner().unwrap_or_else(|| DispatchError::Transport {
                channel,
                recipient: recipient.to_string(),
                detail: "dispatch queue closed".to_string(),
            })
        })
    }
}

/// `{event, alert_id, search_id, data, timestamp}`.
pub fn webhook_payload(alert: &Alert, observation: &PriceObservation, now: DateTime<Utc>) -> Value {
    let query = &alert.query;
    json!({
        "event": PRICE_ALERT_EVENT,
        "alert_id": alert.id,
        "search_id": observation.search_ids.first(),
        "data": {
            "origin": query.origin,
            "destination": query.destination,
            "trip_type": query.trip_type,
            "depart_date": query.depart_date,
            "return_date": query.return_date,
            "segments": query.segments,
            "currency": alert.target_price.currency,
            "target_price": alert.target_price.as_f64(),
            "best_price": observation.best.as_ref().map(|p| p.as_f64()),
            "total_flights": observation.total_flights,
            "search_ids": observation.search_ids,
            "deep_link": observation.deep_link,
        },
        "timestamp": now.to_rfc3339(),
    })
}

fn email_message(alert: &Alert, observation: &PriceObservation) -> (String, String) {
    let best = observation
        .best
        .as_ref()
        .map(|p| p.to_string())
        .unwrap_or_else(|| "n/a".to_string());
    let subject = format!("Price alert: {} now {}", alert.query, best);
    let body = format!(
        "The lowest fare for {} is {}, at or below your target of {}.\n\n\
         Flights found: {}\nBook: {}\n\nAlert id: {}\n",
        alert.query, best, alert.target_price, observation.total_flights, observation.deep_link, alert.id
    );
    (subject, body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::tests::sample_alert;
    use crate::clock::ManualClock;
    use crate::flights_results_parser::Price;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingTransport {
        emails: Mutex<Vec<String>>,
        webhooks: Mutex<Vec<Value>>,
        failures_left: Mutex<u32>,
    }

    #[async_trait]
    impl NotificationTransport for RecordingTransport {
        async fn send_email(&self, to: &str, _subject: &str, _body: &str) -> Result<(), DispatchError> {
            self.emails.lock().unwrap().push(to.to_string());
            Ok(())
        }

        async fn send_webhook(&self, url: &str, payload: &Value) -> Result<(), DispatchError> {
            let mut left = self.failures_left.lock().unwrap();
            if *left > 0 {
                *left -= 1;
                return Err(DispatchError::Transport {
                    channel: Channel::Webhook,
                    recipient: url.to_string(),
                    detail: "connection reset".into(),
                });
            }
            self.webhooks.lock().unwrap().push(payload.clone());
            Ok(())
        }
    }

    fn observation() -> PriceObservation {
        PriceObservation {
            best: Some(Price::from_major(4800, "SEK")),
            search_ids: vec!["search_1".into()],
            deep_link: "https://example.test/flights".into(),
            total_flights: 12,
        }
    }

    fn dispatcher(transport: Arc<RecordingTransport>) -> NotificationDispatcher {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        NotificationDispatcher::new(transport, clock)
            .with_retry_policy(RetryPolicy::default().with_delays(Duration::from_millis(1), Duration::from_millis(2)))
    }

    #[tokio::test]
    async fn test_webhook_retried_then_delivered() {
        let transport = Arc::new(RecordingTransport::default());
        *transport.failures_left.lock().unwrap() = 2;
        let alert = sample_alert();

        let ack = dispatcher(transport.clone())
            .notify(&alert, &observation(), Channel::Webhook)
            .await
            .unwrap();
        assert_eq!(ack.recipients, ["https://hooks.example.test/fares"]);

        let sent = transport.webhooks.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0]["event"], PRICE_ALERT_EVENT);
        assert_eq!(sent[0]["alert_id"], alert.id.as_str());
        assert_eq!(sent[0]["search_id"], "search_1");
        assert_eq!(sent[0]["data"]["best_price"], 4800.0);
    }

    #[tokio::test]
    async fn test_webhook_exhausts_retries() {
        let transport = Arc::new(RecordingTransport::default());
        *transport.failures_left.lock().unwrap() = 10;

        let err = dispatcher(transport.clone())
            .notify(&sample_alert(), &observation(), Channel::Webhook)
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Transport { .. }));
        assert_eq!(*transport.failures_left.lock().unwrap(), 10 - DEFAULT_DISPATCH_ATTEMPTS);
    }

    #[tokio::test]
    async fn test_missing_relay_is_rejected_without_retry() {
        let transport = HttpNotificationTransport::new(Duration::from_secs(1)).unwrap();
        let err = transport.send_email("a@b.se", "s", "b").await.unwrap_err();
        assert!(matches!(err, DispatchError::Rejected { .. }));
    }

    #[test]
    fn test_channel_parse() {
        assert_eq!("Email".parse::<Channel>(), Ok(Channel::Email));
        assert_eq!(Channel::Webhook.to_string(), "webhook");
        assert!("sms".parse::<Channel>().is_err());
    }
}
