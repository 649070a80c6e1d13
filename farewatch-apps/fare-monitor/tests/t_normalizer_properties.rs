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

//! Normalizer properties over a grid of inputs:
//! - normalizing an already canonical query gives it back unchanged
//! - relative dates depend only on the clock
//! - equal inputs give equal cache keys
//!
//! Run with:
//!     cargo test --test t_normalizer_properties

use chrono::NaiveDate;
use std::sync::Arc;

use farewatch_fare_monitor::{
    Clock, InvalidQueryReason, LocationTable, ManualClock, Passengers, QueryNormalizer, RawQuery, RawSegment,
    TripType,
};

fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn normalizer_at(today: NaiveDate) -> QueryNormalizer {
    let clock: Arc<dyn Clock> = Arc::new(ManualClock::at_date(today));
    QueryNormalizer::new(Arc::new(LocationTable::builtin()), clock)
}

fn one_way(origin: &str, destination: &str, date: &str) -> RawQuery {
    RawQuery {
        origin: origin.into(),
        destination: destination.into(),
        depart_date: date.into(),
        ..RawQuery::default()
    }
}

#[test]
fn test_normalize_is_idempotent() {
    let n = normalizer_at(ymd(2025, 12, 1));
    let locations = ["New York", "london", "Paris (ORY)", "ARN", "stockholm"];
    let dates = ["tomorrow", "+10 days", "in 3 days", "weekend", "march", "2026-01-15"];
    let cabins = [None, Some("business"), Some("premium")];

    let mut checked = 0;
    for origin in locations {
        for destination in locations {
            for date in dates {
                for cabin in cabins {
                    let mut raw = one_way(origin, destination, date);
                    raw.cabin = cabin.map(String::from);
                    raw.currency = Some("sek".into());
                    let Ok(first) = n.normalize(&raw) else {
                        continue;
                    };
                    let second = n
                        .normalize(&RawQuery::from(&first))
                        .unwrap_or_else(|e| panic!("re-normalizing {} failed: {}", first, e));
                    assert_eq!(first, second);
                    assert_eq!(first.cache_key(), second.cache_key());
                    checked += 1;
                }
            }
        }
    }
    // Same-city pairs are rejected; everything else must have gone through.
    assert!(checked >= 4 * 4 * dates.len() * cabins.len(), "only {} queries checked", checked);
}

#[test]
fn test_round_trip_and_multi_city_are_idempotent() {
    let n = normalizer_at(ymd(2025, 12, 1));

    let mut round = one_way("stockholm", "london", "+5 days");
    round.return_date = Some("+12 days".into());
    let q = n.normalize(&round).unwrap();
    assert_eq!(q.trip_type, TripType::RoundTrip);
    assert_eq!(n.normalize(&RawQuery::from(&q)).unwrap(), q);

    let multi = RawQuery {
        segments: vec![
            RawSegment { origin: "stockholm".into(), destination: "paris".into(), date: "2026-02-01".into() },
            RawSegment { origin: "paris".into(), destination: "rome".into(), date: "2026-02-05".into() },
            RawSegment { origin: "rome".into(), destination: "stockholm".into(), date: "2026-02-09".into() },
        ],
        passengers: Passengers { children: 1, ..Passengers::adults(2) },
        ..RawQuery::default()
    };
    let q = n.normalize(&multi).unwrap();
    assert_eq!(q.trip_type, TripType::MultiCity);
    assert_eq!((q.origin.as_str(), q.destination.as_str()), ("ARN", "CDG"));
    assert_eq!(n.normalize(&RawQuery::from(&q)).unwrap(), q);
}

#[test]
fn test_relative_dates_follow_the_clock() {
    // 2025-12-01 is a Monday.
    let cases = [
        ("today", ymd(2025, 12, 1)),
        ("tomorrow", ymd(2025, 12, 2)),
        ("+7 days", ymd(2025, 12, 8)),
        ("in 30 days", ymd(2025, 12, 31)),
        ("weekend", ymd(2025, 12, 6)),
        ("December", ymd(2025, 12, 1)),
        ("jan", ymd(2026, 1, 1)),
        ("november", ymd(2026, 11, 1)),
    ];
    for (expr, expected) in cases {
        let first = normalizer_at(ymd(2025, 12, 1))
            .normalize(&one_way("JFK", "LHR", expr))
            .unwrap_or_else(|e| panic!("{}: {}", expr, e));
        let again = normalizer_at(ymd(2025, 12, 1))
            .normalize(&one_way("JFK", "LHR", expr))
            .unwrap();
        assert_eq!(first.depart_date, expected, "{}", expr);
        assert_eq!(first, again, "{} must not depend on anything but the clock", expr);
    }

    let moved = normalizer_at(ymd(2025, 12, 6))
        .normalize(&one_way("JFK", "LHR", "weekend"))
        .unwrap();
    assert_eq!(moved.depart_date, ymd(2025, 12, 13), "on a Saturday the weekend is next week");
}

#[test]
fn test_dates_outside_the_window_are_rejected() {
    let n = normalizer_at(ymd(2025, 12, 1));
    for (expr, past) in [("2025-11-30", true), ("-1 days", true), ("2026-12-02", false), ("+366 days", false)] {
        let err = n.normalize(&one_way("JFK", "LHR", expr)).unwrap_err();
        match err.reason {
            InvalidQueryReason::PastDate { .. } => assert!(past, "{}", expr),
            InvalidQueryReason::TooFarAhead { max_days, .. } => {
                assert!(!past, "{}", expr);
                assert_eq!(max_days, 365);
            }
            other => panic!("{}: unexpected {:?}", expr, other),
        }
    }
    assert!(n.normalize(&one_way("JFK", "LHR", "+365 days")).is_ok());
}

#[test]
fn test_city_names_resolve_to_primary_airport() {
    let n = normalizer_at(ymd(2025, 12, 1));
    for (input, code) in [("New York", "JFK"), ("LONDON", "LHR"), ("  paris ", "CDG"), ("Tokio", "NRT")] {
        let q = n.normalize(&one_way(input, "Dubai", "tomorrow")).unwrap();
        assert_eq!(q.origin, code, "{}", input);
        assert_eq!(q.destination, "DXB");
    }
}
