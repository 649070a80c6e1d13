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

//! Runtime configuration. Binaries fill it from command-line flags, each
//! also readable from a `FAREWATCH_*` environment variable.

use std::path::PathBuf;
use std::time::Duration;

use crate::alert_scheduler::{DEFAULT_ALERT_TIMEOUT, DEFAULT_CHECK_INTERVAL};
use crate::flights_normalizer::DEFAULT_MAX_DAYS_AHEAD;
use crate::flights_search::DEFAULT_INTERACTIVE_TTL;
use crate::locations::DEFAULT_SIMILARITY_THRESHOLD;
use crate::notify::DEFAULT_DISPATCH_ATTEMPTS;

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// WebDriver endpoint (chromedriver, Selenium).
    pub webdriver_url: String,
    pub headless: bool,
    /// Browser sessions open at once.
    pub max_sessions: u64,
    /// Of those, how many alert re-checks may hold.
    pub background_sessions: u64,
    pub sessions_per_second: Option<u64>,
    pub session_timeout: Duration,
    pub results_wait: Duration,
    pub scrape_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    pub step_delay: (Duration, Duration),
    pub interactive_ttl: Duration,
    pub check_interval: Duration,
    pub alert_timeout: Duration,
    pub dispatch_attempts: u32,
    pub notify_timeout: Duration,
    pub similarity_threshold: f64,
    pub max_days_ahead: u32,
    pub language: String,
    pub currency: String,
    /// Alerts and search history are kept in memory only when unset.
    pub data_dir: Option<PathBuf>,
    pub email_relay: Option<String>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            webdriver_url: "http://localhost:9515".to_string(),
            headless: true,
            max_sessions: 2,
            background_sessions: 1,
            sessions_per_second: None,
            session_timeout: Duration::from_secs(60),
            results_wait: Duration::from_secs(20),
            scrape_attempts: 3,
            backoff_base: Duration::from_secs(1),
            backoff_max: Duration::from_secs(30),
            step_delay: (Duration::from_millis(400), Duration::from_millis(1500)),
            interactive_ttl: DEFAULT_INTERACTIVE_TTL,
            check_interval: DEFAULT_CHECK_INTERVAL,
            alert_timeout: DEFAULT_ALERT_TIMEOUT,
            dispatch_attempts: DEFAULT_DISPATCH_ATTEMPTS,
            notify_timeout: Duration::from_secs(10),
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            max_days_ahead: DEFAULT_MAX_DAYS_AHEAD,
            language: "en".to_string(),
            currency: "USD".to_string(),
            data_dir: None,
            email_relay: None,
        }
    }
}

#[cfg(feature = "cli")]
pub use args::ConfigArgs;

#[cfg(feature = "cli")]
mod args {
    use super::*;
    use clap::Args;

    #[derive(Args, Debug, Clone)]
    pub struct ConfigArgs {
        /// WebDriver endpoint
        #[arg(long, env = "FAREWATCH_WEBDRIVER_URL", default_value = "http://localhost:9515")]
        pub webdriver_url: String,

        /// Show the browser window
        #[arg(long, env = "FAREWATCH_HEADFUL")]
        pub headful: bool,

        /// Concurrent browser sessions
        #[arg(long, env = "FAREWATCH_MAX_SESSIONS", default_value = "2")]
        pub max_sessions: u64,

        /// Sessions alert re-checks may use
        #[arg(long, env = "FAREWATCH_BACKGROUND_SESSIONS", default_value = "1")]
        pub background_sessions: u64,

        /// New sessions per second
        #[arg(long, env = "FAREWATCH_SESSIONS_PER_SECOND")]
        pub sessions_per_second: Option<u64>,

        /// Hard timeout for one browser session, in seconds
        #[arg(long, env = "FAREWATCH_SESSION_TIMEOUT", default_value = "60")]
        pub session_timeout: u64,

        /// Time allowed for results to render, in seconds
        #[arg(long, env = "FAREWATCH_RESULTS_WAIT", default_value = "20")]
        pub results_wait: u64,

        /// Scrape attempts on timeouts and navigation failures
        #[arg(long, env = "FAREWATCH_SCRAPE_ATTEMPTS", default_value = "3")]
        pub scrape_attempts: u32,

        /// First retry backoff, in milliseconds
        #[arg(long, env = "FAREWATCH_BACKOFF_BASE_MS", default_value = "1000")]
        pub backoff_base_ms: u64,

        /// Longest retry backoff, in milliseconds
        #[arg(long, env = "FAREWATCH_BACKOFF_MAX_MS", default_value = "30000")]
        pub backoff_max_ms: u64,

        /// Shortest pause between navigation steps, in milliseconds
        #[arg(long, env = "FAREWATCH_STEP_DELAY_MIN_MS", default_value = "400")]
        pub step_delay_min_ms: u64,

        /// Longest pause between navigation steps, in milliseconds
        #[arg(long, env = "FAREWATCH_STEP_DELAY_MAX_MS", default_value = "1500")]
        pub step_delay_max_ms: u64,

        /// Cache lifetime of interactive searches, in seconds
        #[arg(long, env = "FAREWATCH_CACHE_TTL", default_value = "900")]
        pub cache_ttl: u64,

        /// Alert check interval, in seconds
        #[arg(long, env = "FAREWATCH_CHECK_INTERVAL", default_value = "1800")]
        pub check_interval: u64,

        /// Time budget for evaluating one alert, in seconds
        #[arg(long, env = "FAREWATCH_ALERT_TIMEOUT", default_value = "180")]
        pub alert_timeout: u64,

        /// Delivery attempts per notification recipient
        #[arg(long, env = "FAREWATCH_DISPATCH_ATTEMPTS", default_value = "3")]
        pub dispatch_attempts: u32,

        /// Minimum Jaro-Winkler similarity for fuzzy location matches
        #[arg(long, env = "FAREWATCH_SIMILARITY_THRESHOLD", default_value = "0.88")]
        pub similarity_threshold: f64,

        /// Surface language
        #[arg(long, env = "FAREWATCH_LANGUAGE", default_value = "en")]
        pub language: String,

        /// Currency when a search names none
        #[arg(long, env = "FAREWATCH_CURRENCY", default_value = "USD")]
        pub currency: String,

        /// Directory for alert and history snapshots
        #[arg(long, env = "FAREWATCH_DATA_DIR")]
        pub data_dir: Option<PathBuf>,

        /// JSON endpoint that relays email notifications
        #[arg(long, env = "FAREWATCH_EMAIL_RELAY")]
        pub email_relay: Option<String>,
    }

    impl From<ConfigArgs> for MonitorConfig {
        fn from(args: ConfigArgs) -> Self {
            let min_delay = Duration::from_millis(args.step_delay_min_ms);
            let max_delay = Duration::from_millis(args.step_delay_max_ms).max(min_delay);
            Self {
                webdriver_url: args.webdriver_url,
                headless: !args.headful,
                max_sessions: args.max_sessions.max(1),
                background_sessions: args.background_sessions.max(1),
                sessions_per_second: args.sessions_per_second,
                session_timeout: Duration::from_secs(args.session_timeout),
                results_wait: Duration::from_secs(args.results_wait),
                scrape_attempts: args.scrape_attempts.max(1),
                backoff_base: Duration::from_millis(args.backoff_base_ms),
                backoff_max: Duration::from_millis(args.backoff_max_ms),
                step_delay: (min_delay, max_delay),
                interactive_ttl: Duration::from_secs(args.cache_ttl),
                check_interval: Duration::from_secs(args.check_interval.max(1)),
                alert_timeout: Duration::from_secs(args.alert_timeout),
                dispatch_attempts: args.dispatch_attempts.max(1),
                similarity_threshold: args.similarity_threshold.clamp(0.0, 1.0),
                language: args.language,
                currency: args.currency.to_ascii_uppercase(),
                data_dir: args.data_dir,
                email_relay: args.email_relay,
                ..MonitorConfig::default()
            }
        }
    }

}
