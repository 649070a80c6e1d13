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

//! # Scrape Executor
//!
//! Effectful (time, network) retrieval of one canonical query's result
//! page through a browser session.
//!
//! Every attempt opens a fresh session with a random [`Fingerprint`],
//! paces its navigation steps with random delays and runs under a hard
//! wall-clock timeout. Sessions are drawn from a [`QueryQueue`], which caps
//! how many are open at once and owns the retry policy:
//! - `timeout` and `navigation_failed` are retried with backoff,
//! - `blocked` goes to the challenge solver, if any, for one last attempt,
//! - `no_results` is returned as is.

use farewatch_query_queues::{Lane, QueryQueue, QueryQueueError, RetryPolicy};
use once_cell::sync::Lazy;
use rand::Rng;
use regex::Regex;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::browser::{
    BrowserDriver, BrowserSession, ChallengeClearance, ChallengeContext, ChallengeSolver, Fingerprint,
    SessionGuard,
};
use crate::clock::Clock;
use crate::consent_cookie::{COOKIE_DOMAIN, consent_cookies};
use crate::errors::{ScrapeError, ScrapeErrorKind};
use crate::flights_query::CanonicalQuery;
use crate::flights_results_parser::RawContent;

/// Page visited first so the consent cookies land on the right domain.
const LANDING_URL: &str = "https://www.google.com/travel/flights";

const RESULTS_READY: &[&str] = &[
    r#"div[jsname="IWWDBc"]"#,
    r#"div[jsname="YdtKid"]"#,
    "ul.Rk10dc",
    ".pIav2d",
];

static CHALLENGE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)(g-recaptcha|id="captcha-form"|unusual traffic from your computer|/sorry/index)"#)
        .unwrap()
});
static NO_RESULTS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)no (results returned|flights found|options matching your search)").unwrap()
});

#[derive(Debug, Clone)]
pub struct ScrapeSettings {
    /// Language the surface renders in, also drives the session locale.
    pub language: String,
    /// Hard limit for one session, from open to page source.
    pub session_timeout: Duration,
    /// How long to wait for results to render once navigated.
    pub results_wait: Duration,
    /// Random pause between navigation steps, inclusive bounds.
    pub step_delay: (Duration, Duration),
}

impl Default for ScrapeSettings {
    fn default() -> Self {
        Self {
            language: "en".to_string(),
            session_timeout: Duration::from_secs(60),
            results_wait: Duration::from_secs(20),
            step_delay: (Duration::from_millis(400), Duration::from_millis(1500)),
        }
    }
}

pub struct ScrapeExecutor {
    driver: Arc<dyn BrowserDriver>,
    sessions: QueryQueue,
    solver: Option<Arc<dyn ChallengeSolver>>,
    clock: Arc<dyn Clock>,
    settings: ScrapeSettings,
}

impl ScrapeExecutor {
    /// `sessions` bounds concurrent browser sessions and carries the retry
    /// policy for transient failures.
    pub fn new(
        driver: Arc<dyn BrowserDriver>,
        sessions: QueryQueue,
        clock: Arc<dyn Clock>,
        settings: ScrapeSettings,
    ) -> Self {
        Self {
            driver,
            sessions,
            solver: None,
            clock,
            settings,
        }
    }

    pub fn with_challenge_solver(mut self, solver: Arc<dyn ChallengeSolver>) -> Self {
        self.solver = Some(solver);
        self
    }

    pub fn sessions(&self) -> &QueryQueue {
        &self.sessions
    }

    pub fn settings(&self) -> &ScrapeSettings {
        &self.settings
    }

    pub async fn fetch(&self, query: &CanonicalQuery, lane: Lane) -> Result<RawContent, ScrapeError> {
        let url = query
            .deep_link(&self.settings.language)
            .map_err(|e| ScrapeError::navigation(format!("deep link: {:#}", e)))?;
        let currency = query.currency.as_str();
        let challenge: Mutex<Option<ChallengeContext>> = Mutex::new(None);

        let start = std::time::Instant::now();
        let outcome = self
            .sessions
            .with_retry(lane, || self.attempt(&url, currency, None, &challenge))
            .await;

        let result = match outcome {
            Ok(raw) => Ok(raw),
            Err(QueryQueueError::Terminal(e)) if e.kind == ScrapeErrorKind::Blocked => {
                let context = challenge.lock().unwrap_or_else(|p| p.into_inner()).take();
                self.escalate(e, context, &url, currency, lane).await
            }
            Err(QueryQueueError::Exhausted { attempts, last }) => {
                tracing::warn!(route = %query, attempts, "Scrape retries exhausted: {}", last);
                Err(last)
            }
            Err(QueryQueueError::Terminal(e)) => Err(e),
            Err(QueryQueueError::QueueClosed) => Err(ScrapeError::navigation("session pool closed")),
        };

        match &result {
            Ok(raw) => tracing::info!(
                route = %query,
                ?lane,
                "Fetched {} KB in {:?}",
                raw.body.len() / 1024,
                start.elapsed()
            ),
            Err(e) => tracing::debug!(route = %query, kind = %e.kind, "Fetch failed after {:?}", start.elapsed()),
        }
        result
    }

    async fn escalate(
        &self,
        blocked: ScrapeError,
        context: Option<ChallengeContext>,
        url: &str,
        currency: &str,
        lane: Lane,
    ) -> Result<RawContent, ScrapeError> {
        let Some(solver) = &self.solver else {
            tracing::warn!("Bot challenge and no solver configured: {}", blocked.detail);
            return Err(blocked);
        };
        let context = context.unwrap_or_else(|| ChallengeContext {
            url: url.to_string(),
            page_source: String::new(),
        });

        tracing::info!(url = %context.url, "Bot challenge, escalating to solver");
        let clearance = solver.solve(&context).await.map_err(|e| {
            tracing::warn!("Challenge solver failed: {}", e);
            ScrapeError::blocked(format!("challenge unsolved: {}", e.detail))
        })?;

        let unused = Mutex::new(None);
        self.sessions
            .with_policy(lane, &RetryPolicy::no_retry(), || {
                self.attempt(url, currency, Some(&clearance), &unused)
            })
            .await
            .map_err(|e| {
                e.into_inner()
                    .unwrap_or_else(|| ScrapeError::navigation("session pool closed"))
            })
    }

    /// One session, open to close.
    async fn attempt(
        &self,
        url: &str,
        currency: &str,
        clearance: Option<&ChallengeClearance>,
        challenge: &Mutex<Option<ChallengeContext>>,
    ) -> Result<RawContent, ScrapeError> {
        let fingerprint = Fingerprint::random(&self.settings.language);
        let timeout = self.settings.session_timeout;

        // The guard closes the session on every exit, including the hard
        // timeout and the caller dropping `fetch`.
        let run = async {
            let guard = SessionGuard::new(self.driver.open(&fingerprint).await?);
            let pages = match guard.session() {
                Some(session) => self.drive(session, url, clearance).await,
                None => Err(ScrapeError::navigation("session already closed")),
            };
            guard.close().await;
            pages
        };
        let outcome = tokio::time::timeout(timeout, run).await;

        let (body, landed_on) = match outcome {
            Ok(pages) => pages?,
            Err(_) => {
                tracing::warn!(?timeout, "Session exceeded its wall-clock limit");
                return Err(ScrapeError::timeout(format!("session exceeded {:?}", timeout)));
            }
        };

        if CHALLENGE_RE.is_match(&body) || landed_on.contains("/sorry/") {
            *challenge.lock().unwrap_or_else(|p| p.into_inner()) = Some(ChallengeContext {
                url: landed_on.clone(),
                page_source: body,
            });
            return Err(ScrapeError::blocked(format!("bot challenge at {}", landed_on)));
        }

        if landed_on.contains("consent.google.com") || body.contains("ppConfig") {
            return Err(ScrapeError::navigation("consent wall still showing"));
        }

        Ok(RawContent::new(body, url, currency))
    }

    /// Navigation steps within one session. Returns page source and final URL.
    async fn drive(
        &self,
        session: &dyn BrowserSession,
        url: &str,
        clearance: Option<&ChallengeClearance>,
    ) -> Result<(String, String), ScrapeError> {
        session.navigate(LANDING_URL).await?;
        self.pause().await;

        let mut cookies: Vec<(String, String)> =
            consent_cookies(self.clock.today(), &self.settings.language)
                .into_iter()
                .map(|(name, value)| (name.to_string(), value))
                .collect();
        if let Some(clearance) = clearance {
            cookies.extend(clearance.cookies.iter().cloned());
        }
        session.set_cookies(COOKIE_DOMAIN, &cookies).await?;
        self.pause().await;

        session.navigate(url).await?;
        if session.accept_consent().await? {
            tracing::debug!("Clicked through consent wall");
            self.pause().await;
        }

        let ready = session.wait_for(RESULTS_READY, self.settings.results_wait).await?;
        let body = session.page_source().await?;
        let landed_on = session.current_url().await.unwrap_or_else(|_| url.to_string());

        if !ready && !CHALLENGE_RE.is_match(&body) {
            if NO_RESULTS_RE.is_match(&body) {
                return Err(ScrapeError::new(ScrapeErrorKind::NoResults, "surface reported no offers"));
            }
            return Err(ScrapeError::timeout(format!(
                "results did not render within {:?}",
                self.settings.results_wait
            )));
        }

        Ok((body, landed_on))
    }

    async fn pause(&self) {
        let delay = self.step_delay();
        tokio::time::sleep(delay).await;
    }

    fn step_delay(&self) -> Duration {
        let (lo, hi) = self.settings.step_delay;
        if hi <= lo {
            return lo;
        }
        let ms = rand::thread_rng().gen_range(lo.as_millis() as u64..=hi.as_millis() as u64);
        Duration::from_millis(ms)
    }
}
