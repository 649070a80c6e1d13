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

//! # Browser automation
//!
//! The capability the scrape executor drives: open a session with a given
//! [`Fingerprint`], navigate, read the page, close. [`WebDriverBrowser`]
//! implements it over a WebDriver endpoint with thirtyfour.

use async_trait::async_trait;
use rand::Rng;
use rand::seq::SliceRandom;
use std::time::Duration;
use thirtyfour::{ChromeCapabilities, ChromiumLikeCapabilities};
use thirtyfour::prelude::*;

use crate::errors::ScrapeError;

const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/138.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/137.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/138.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/18.5 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/138.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/138.0.0.0 Safari/537.36 Edg/138.0.0.0",
];

const VIEWPORTS: &[(u32, u32)] = &[
    (1920, 1080),
    (1680, 1050),
    (1536, 864),
    (1440, 900),
    (1366, 768),
    (1280, 800),
];

const ENGLISH_REGIONS: &[&str] = &["US", "GB", "CA", "AU", "IE"];

/// Observable attributes of a browser session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    pub user_agent: String,
    pub viewport: (u32, u32),
    pub locale: String,
}

impl Fingerprint {
    pub fn random(language: &str) -> Self {
        Self::random_with(&mut rand::thread_rng(), language)
    }

    pub fn random_with<R: Rng>(rng: &mut R, language: &str) -> Self {
        let user_agent = USER_AGENTS.choose(rng).copied().unwrap_or(USER_AGENTS[0]);
        let (w, h) = VIEWPORTS.choose(rng).copied().unwrap_or(VIEWPORTS[0]);
        // Small offsets keep window sizes off the exact preset grid.
        let viewport = (w - rng.gen_range(0..=24), h - rng.gen_range(0..=16));

        let language = language.trim().to_ascii_lowercase();
        let locale = if language == "en" {
            let region = ENGLISH_REGIONS.choose(rng).copied().unwrap_or("US");
            format!("en-{}", region)
        } else if language.contains('-') {
            language
        } else {
            let region = match language.as_str() {
                "sv" => "SE",
                "da" => "DK",
                "nb" | "no" => "NO",
                "ja" => "JP",
                "ko" => "KR",
                "zh" => "CN",
                "el" => "GR",
                _ => "",
            };
            if region.is_empty() {
                format!("{}-{}", language, language.to_ascii_uppercase())
            } else {
                format!("{}-{}", language, region)
            }
        };

        Self {
            user_agent: user_agent.to_string(),
            viewport,
            locale,
        }
    }
}

/// One live browser session. Dropped sessions are not guaranteed to be
/// torn down; call [`BrowserSession::close`] or hold it in a [`SessionGuard`].
#[async_trait]
pub trait BrowserSession: Send + Sync {
    async fn navigate(&self, url: &str) -> Result<(), ScrapeError>;

    /// Install cookies for `domain`. The session must already be on a page
    /// of that domain.
    async fn set_cookies(&self, domain: &str, cookies: &[(String, String)]) -> Result<(), ScrapeError>;

    /// Click through a consent interstitial if one is showing.
    async fn accept_consent(&self) -> Result<bool, ScrapeError>;

    /// Wait until any of `selectors` matches, up to `timeout`.
    async fn wait_for(&self, selectors: &[&str], timeout: Duration) -> Result<bool, ScrapeError>;

    async fn page_source(&self) -> Result<String, ScrapeError>;

    async fn current_url(&self) -> Result<String, ScrapeError>;

    async fn close(self: Box<Self>) -> Result<(), ScrapeError>;
}

#[async_trait]
pub trait BrowserDriver: Send + Sync {
    async fn open(&self, fingerprint: &Fingerprint) -> Result<Box<dyn BrowserSession>, ScrapeError>;
}

/// Owns a session and closes it when dropped, so a cancelled scrape never
/// leaves a browser behind.
pub struct SessionGuard {
    session: Option<Box<dyn BrowserSession>>,
}

impl SessionGuard {
    pub fn new(session: Box<dyn BrowserSession>) -> Self {
        Self { session: Some(session) }
    }

    pub fn session(&self) -> Option<&dyn BrowserSession> {
        self.session.as_deref()
    }

    pub async fn close(mut self) {
        if let Some(session) = self.session.take() {
            if let Err(e) = session.close().await {
                tracing::debug!("Session close failed: {}", e);
            }
        }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                tracing::debug!("Session dropped mid-scrape, closing in background");
                handle.spawn(async move {
                    if let Err(e) = session.close().await {
                        tracing::debug!("Background session close failed: {}", e);
                    }
                });
            }
            Err(_) => tracing::warn!("Session dropped outside a runtime, left open"),
        }
    }
}

/// Page state handed to a [`ChallengeSolver`].
#[derive(Debug, Clone)]
pub struct ChallengeContext {
    pub url: String,
    pub page_source: String,
}

/// Clearance produced by a solver, replayed into the final attempt.
#[derive(Debug, Clone, Default)]
pub struct ChallengeClearance {
    pub cookies: Vec<(String, String)>,
}

/// External bot-challenge solving capability.
#[async_trait]
pub trait ChallengeSolver: Send + Sync {
    async fn solve(&self, challenge: &ChallengeContext) -> Result<ChallengeClearance, ScrapeError>;
}

fn webdriver_error(context: &str, e: WebDriverError) -> ScrapeError {
    let detail = format!("{}: {}", context, e);
    if detail.to_lowercase().contains("timeout") || detail.to_lowercase().contains("timed out") {
        ScrapeError::timeout(detail)
    } else {
        ScrapeError::navigation(detail)
    }
}

/// Chrome over a WebDriver endpoint such as chromedriver or Selenium.
#[derive(Debug, Clone)]
pub struct WebDriverBrowser {
    server_url: String,
    headless: bool,
}

impl WebDriverBrowser {
    pub fn new(server_url: impl Into<String>, headless: bool) -> Self {
        Self {
            server_url: server_url.into(),
            headless,
        }
    }

    fn capabilities(&self, fp: &Fingerprint) -> WebDriverResult<ChromeCapabilities> {
        let mut caps = DesiredCapabilities::chrome();
        if self.headless {
            caps.add_arg("--headless=new")?;
        }
        caps.add_arg(&format!("--user-agent={}", fp.user_agent))?;
        caps.add_arg(&format!("--window-size={},{}", fp.viewport.0, fp.viewport.1))?;
        caps.add_arg(&format!("--lang={}", fp.locale))?;
        caps.add_arg("--disable-blink-features=AutomationControlled")?;
        caps.add_arg("--no-first-run")?;
        Ok(caps)
    }
}

#[async_trait]
impl BrowserDriver for WebDriverBrowser {
    async fn open(&self, fingerprint: &Fingerprint) -> Result<Box<dyn BrowserSession>, ScrapeError> {
        let caps = self
            .capabilities(fingerprint)
            .map_err(|e| webdriver_error("capabilities", e))?;
        let start = std::time::Instant::now();
        let driver = WebDriver::new(&self.server_url, caps)
            .await
            .map_err(|e| webdriver_error("session start", e))?;
        tracing::debug!(
            locale = %fingerprint.locale,
            viewport = ?fingerprint.viewport,
            "WebDriver session opened in {:?}",
            start.elapsed()
        );
        Ok(Box::new(WebDriverSession { driver }))
    }
}

struct WebDriverSession {
    driver: WebDriver,
}

#[async_trait]
impl BrowserSession for WebDriverSession {
    async fn navigate(&self, url: &str) -> Result<(), ScrapeError> {
        self.driver
            .goto(url)
            .await
            .map_err(|e| webdriver_error("navigate", e))
    }

    async fn set_cookies(&self, domain: &str, cookies: &[(String, String)]) -> Result<(), ScrapeError> {
        let script = cookies
            .iter()
            .map(|(name, value)| {
                format!(
                    "document.cookie = {};",
                    serde_json::Value::String(format!(
                        "{}={}; domain={}; path=/; max-age=31536000",
                        name, value, domain
                    ))
                )
            })
            .collect::<Vec<_>>()
            .join("\n");
        self.driver
            .execute(script, Vec::new())
            .await
            .map(|_| ())
            .map_err(|e| webdriver_error("set cookies", e))
    }

    async fn accept_consent(&self) -> Result<bool, ScrapeError> {
        let Ok(button) = self
            .driver
            .query(By::Css("button[aria-label*='Accept']"))
            .wait(Duration::from_secs(2), Duration::from_millis(250))
            .first()
            .await
        else {
            return Ok(false);
        };
        if let Ok(true) = button.is_displayed().await {
            button
                .click()
                .await
                .map_err(|e| webdriver_error("consent click", e))?;
            return Ok(true);
        }
        Ok(false)
    }

    async fn wait_for(&self, selectors: &[&str], timeout: Duration) -> Result<bool, ScrapeError> {
        let css = selectors.join(", ");
        Ok(self
            .driver
            .query(By::Css(css))
            .wait(timeout, Duration::from_millis(250))
            .first()
            .await
            .is_ok())
    }

    async fn page_source(&self) -> Result<String, ScrapeError> {
        self.driver
            .source()
            .await
            .map_err(|e| webdriver_error("page source", e))
    }

    async fn current_url(&self) -> Result<String, ScrapeError> {
        self.driver
            .current_url()
            .await
            .map(|u| u.to_string())
            .map_err(|e| webdriver_error("current url", e))
    }

    async fn close(self: Box<Self>) -> Result<(), ScrapeError> {
        self.driver
            .quit()
            .await
            .map_err(|e| webdriver_error("quit", e))
    }
}
