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

//! Live searches against the real results surface through a local
//! chromedriver.
//!
//! Needs `chromedriver --port=9515` running (or FAREWATCH_WEBDRIVER_URL).
//!
//! Run with: cargo test --test t_flights_integration_live -- --include-ignored

use anyhow::{Context, Result};
use chrono::{Months, NaiveDate};

use farewatch_fare_monitor::{FareMonitor, MonitorConfig, RawQuery, RawSegment};

fn today() -> NaiveDate {
    chrono::Local::now().date_naive()
}

fn in_months(n: u32) -> String {
    (today() + Months::new(n)).format("%Y-%m-%d").to_string()
}

async fn live_monitor() -> Result<FareMonitor> {
    let mut config = MonitorConfig::default();
    if let Ok(url) = std::env::var("FAREWATCH_WEBDRIVER_URL") {
        config.webdriver_url = url;
    }
    config.max_sessions = 1;
    FareMonitor::start(config).await.context("start monitor")
}

#[tokio::test]
#[ignore = "hits the live search surface"]
async fn test_live_one_way_international() -> Result<()> {
    let monitor = live_monitor().await?;
    let raw = RawQuery {
        origin: "New York".into(),
        destination: "London".into(),
        depart_date: in_months(2),
        currency: Some("USD".into()),
        ..RawQuery::default()
    };
    let result = monitor.search(&raw).await?;
    println!("{}: {} flights, best {:?}", result.query, result.total_flights(), result.lowest_price());

    assert!(result.total_flights() > 0, "a busy route has offers");
    assert!(result.fares.iter().all(|f| f.price.amount_minor > 0));
    assert!(result.lowest_price().is_some());
    Ok(())
}

#[tokio::test]
#[ignore = "hits the live search surface"]
async fn test_live_multi_city() -> Result<()> {
    let monitor = live_monitor().await?;
    let raw = RawQuery {
        segments: vec![
            RawSegment {
                origin: "ARN".into(),
                destination: "CDG".into(),
                date: in_months(2),
            },
            RawSegment {
                origin: "CDG".into(),
                destination: "ARN".into(),
                date: in_months(3),
            },
        ],
        currency: Some("SEK".into()),
        ..RawQuery::default()
    };
    let outcome = monitor.search_multi_city(&raw).await?;
    for failure in &outcome.failures {
        println!("leg {} failed: {}", failure.index, failure.error);
    }
    assert!(!outcome.results.is_empty());
    Ok(())
}
