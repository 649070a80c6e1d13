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

// Library for farewatch-fare-monitor
// Flight search, result caching and price alerts

pub mod alert_scheduler;
pub mod alerts;
pub mod browser;
pub mod clock;
pub mod config;
pub mod consent_cookie;
pub mod errors;
pub mod fare_cache;
pub mod flights_multi_city;
pub mod flights_normalizer;
mod flights_proto;
pub mod flights_query;
pub mod flights_results_parser;
pub mod flights_search;
pub mod locations;
pub mod monitor;
pub mod notify;
pub mod persistence;
pub mod scrape_executor;
pub mod search_history;
pub mod webhooks;

pub use alert_scheduler::{AlertScheduler, TickReport};
pub use alerts::{Alert, AlertStatus, AlertStore, Evaluation, NewAlert, PriceObservation};
pub use browser::{BrowserDriver, BrowserSession, ChallengeSolver, Fingerprint, WebDriverBrowser};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::MonitorConfig;
pub use errors::{
    AlertNotFound, DispatchError, InvalidQuery, InvalidQueryReason, ParseError, ScrapeError, ScrapeErrorKind,
    SearchError, SegmentFailure,
};
pub use fare_cache::{CacheBackend, CacheSource, FareCache, MemoryCacheBackend};
pub use flights_multi_city::{MultiCityOrchestrator, MultiCityOutcome, SegmentResult};
pub use flights_normalizer::{QueryNormalizer, RawQuery, RawSegment};
pub use flights_query::{CabinClass, CanonicalQuery, Passengers, Segment, TripType};
pub use flights_results_parser::{FareRecord, Price, PriceLevel, RawContent};
pub use flights_search::{FareSearchService, SearchResult};
pub use locations::LocationTable;
pub use monitor::FareMonitor;
pub use notify::{Channel, HttpNotificationTransport, NotificationDispatcher, NotificationTransport};
pub use scrape_executor::{ScrapeExecutor, ScrapeSettings};
pub use search_history::SearchHistory;
pub use webhooks::{SEARCH_COMPLETED_EVENT, WebhookRegistry};
