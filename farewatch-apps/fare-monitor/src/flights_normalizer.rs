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

//! # Query Normalizer
//!
//! Side-effect free conversion of user input into a [`CanonicalQuery`].
//! Locations resolve through a [`LocationTable`]; relative dates resolve
//! against the injected [`Clock`], never the wall clock.

use chrono::{Datelike, Duration, NaiveDate, Weekday};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::clock::Clock;
use crate::errors::{InvalidQuery, InvalidQueryReason};
use crate::flights_query::{CabinClass, CanonicalQuery, Passengers, Segment, TripType};
use crate::locations::LocationTable;

pub const DEFAULT_MAX_DAYS_AHEAD: u32 = 365;
pub const MAX_SEGMENTS: usize = 5;
pub const MIN_MULTI_CITY_SEGMENTS: usize = 2;

static PLUS_DAYS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^([+-])\s*(\d{1,4})\s*days?$").unwrap());
static IN_DAYS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^in\s+(\d{1,4})\s+days?$").unwrap());
static CURRENCY_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Z]{3}$").unwrap());

/// One leg as typed by the user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawSegment {
    pub origin: String,
    pub destination: String,
    pub date: String,
}

/// Query fields as they arrive from a caller, before any resolution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawQuery {
    #[serde(default)]
    pub origin: String,
    #[serde(default)]
    pub destination: String,
    #[serde(default)]
    pub depart_date: String,
    #[serde(default)]
    pub return_date: Option<String>,
    #[serde(default)]
    pub passengers: Passengers,
    #[serde(default)]
    pub cabin: Option<String>,
    /// Inferred from the other fields when absent.
    #[serde(default)]
    pub trip_type: Option<String>,
    #[serde(default)]
    pub segments: Vec<RawSegment>,
    #[serde(default)]
    pub max_stops: Option<u8>,
    #[serde(default)]
    pub currency: Option<String>,
}

impl From<&CanonicalQuery> for RawQuery {
    fn from(q: &CanonicalQuery) -> Self {
        Self {
            origin: q.origin.clone(),
            destination: q.destination.clone(),
            depart_date: q.depart_date.to_string(),
            return_date: q.return_date.map(|d| d.to_string()),
            passengers: q.passengers,
            cabin: Some(q.cabin.to_string()),
            trip_type: Some(q.trip_type.to_string()),
            segments: q
                .segments
                .iter()
                .map(|s| RawSegment {
                    origin: s.origin.clone(),
                    destination: s.destination.clone(),
                    date: s.depart_date.to_string(),
                })
                .collect(),
            max_stops: q.max_stops,
            currency: Some(q.currency.clone()),
        }
    }
}

#[derive(Clone)]
pub struct QueryNormalizer {
    table: Arc<LocationTable>,
    clock: Arc<dyn Clock>,
    max_days_ahead: u32,
    default_currency: String,
}

impl QueryNormalizer {
    pub fn new(table: Arc<LocationTable>, clock: Arc<dyn Clock>) -> Self {
        Self {
            table,
            clock,
            max_days_ahead: DEFAULT_MAX_DAYS_AHEAD,
            default_currency: "USD".to_string(),
        }
    }

    pub fn with_max_days_ahead(mut self, days: u32) -> Self {
        self.max_days_ahead = days;
        self
    }

    pub fn with_default_currency(mut self, currency: &str) -> Self {
        self.default_currency = currency.trim().to_ascii_uppercase();
        self
    }

    pub fn table(&self) -> &LocationTable {
        &self.table
    }

    pub fn normalize(&self, raw: &RawQuery) -> Result<CanonicalQuery, InvalidQuery> {
        let trip_type = self.trip_type(raw)?;
        if trip_type == TripType::MultiCity {
            return self.normalize_multi_city(raw);
        }

        if !raw.segments.is_empty() {
            return Err(unexpected("segments"));
        }
        let origin = self.resolve_location("origin", &raw.origin)?;
        let destination = self.resolve_location("destination", &raw.destination)?;
        if origin == destination {
            return Err(InvalidQueryReason::SameOriginDestination { code: origin }.into());
        }
        let depart_date = self.resolve_date("depart_date", &raw.depart_date)?;

        let return_date = match (trip_type, raw.return_date.as_deref().map(str::trim)) {
            (TripType::RoundTrip, Some(expr)) if !expr.is_empty() => {
                let ret = self.resolve_date("return_date", expr)?;
                if ret <= depart_date {
                    return Err(InvalidQueryReason::ReturnBeforeDeparture {
                        depart_date,
                        return_date: ret,
                    }
                    .into());
                }
                Some(ret)
            }
            (TripType::RoundTrip, _) => return Err(missing("return_date")),
            (_, Some(expr)) if !expr.is_empty() => return Err(unexpected("return_date")),
            _ => None,
        };

        Ok(CanonicalQuery {
            origin,
            destination,
            depart_date,
            return_date,
            passengers: self.passengers(raw)?,
            cabin: self.cabin(raw)?,
            trip_type,
            segments: Vec::new(),
            max_stops: self.max_stops(raw)?,
            currency: self.currency(raw.currency.as_deref())?,
        })
    }

    /// Multi-city: 2 to 5 legs, each resolved on its own. Leg dates are not
    /// required to be in chronological order.
    pub fn normalize_multi_city(&self, raw: &RawQuery) -> Result<CanonicalQuery, InvalidQuery> {
        let count = raw.segments.len();
        if !(MIN_MULTI_CITY_SEGMENTS..=MAX_SEGMENTS).contains(&count) {
            return Err(InvalidQueryReason::SegmentCount { count }.into());
        }
        if raw.return_date.as_deref().is_some_and(|s| !s.trim().is_empty()) {
            return Err(unexpected("return_date"));
        }

        let mut segments = Vec::with_capacity(count);
        for (idx, seg) in raw.segments.iter().enumerate() {
            let origin = self.resolve_location(&format!("segments[{}].origin", idx), &seg.origin)?;
            let destination =
                self.resolve_location(&format!("segments[{}].destination", idx), &seg.destination)?;
            if origin == destination {
                return Err(InvalidQueryReason::SameOriginDestination { code: origin }.into());
            }
            let depart_date = self.resolve_date(&format!("segments[{}].date", idx), &seg.date)?;
            segments.push(Segment {
                origin,
                destination,
                depart_date,
            });
        }

        let first = segments[0].clone();
        Ok(CanonicalQuery {
            origin: first.origin,
            destination: first.destination,
            depart_date: first.depart_date,
            return_date: None,
            passengers: self.passengers(raw)?,
            cabin: self.cabin(raw)?,
            trip_type: TripType::MultiCity,
            segments,
            max_stops: self.max_stops(raw)?,
            currency: self.currency(raw.currency.as_deref())?,
        })
    }

    pub fn resolve_location(&self, field: &str, input: &str) -> Result<String, InvalidQuery> {
        if input.trim().is_empty() {
            return Err(missing(field));
        }
        self.table
            .resolve(input)
            .map(|r| r.code)
            .ok_or_else(|| {
                InvalidQueryReason::UnresolvedLocation {
                    input: input.trim().to_string(),
                }
                .into()
            })
    }

    /// Resolve an absolute or relative date expression and check it falls
    /// within `[today, today + max_days_ahead]`.
    pub fn resolve_date(&self, field: &str, input: &str) -> Result<NaiveDate, InvalidQuery> {
        let expr = input.trim();
        if expr.is_empty() {
            return Err(missing(field));
        }
        let today = self.clock.today();
        let date = resolve_date_expr(expr, today).ok_or_else(|| InvalidQueryReason::InvalidDate {
            input: expr.to_string(),
        })?;

        if date < today {
            return Err(InvalidQueryReason::PastDate {
                field: field.to_string(),
                date,
            }
            .into());
        }
        if date > today + Duration::days(i64::from(self.max_days_ahead)) {
            return Err(InvalidQueryReason::TooFarAhead {
                field: field.to_string(),
                date,
                max_days: self.max_days_ahead,
            }
            .into());
        }
        Ok(date)
    }

    fn trip_type(&self, raw: &RawQuery) -> Result<TripType, InvalidQuery> {
        match raw.trip_type.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            Some(s) => s.parse().map_err(|value| unknown("trip_type", value)),
            None if !raw.segments.is_empty() => Ok(TripType::MultiCity),
            None if raw.return_date.as_deref().is_some_and(|s| !s.trim().is_empty()) => {
                Ok(TripType::RoundTrip)
            }
            None => Ok(TripType::OneWay),
        }
    }

    fn cabin(&self, raw: &RawQuery) -> Result<CabinClass, InvalidQuery> {
        match raw.cabin.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            Some(s) => s.parse().map_err(|value| unknown("cabin", value)),
            None => Ok(CabinClass::Economy),
        }
    }

    fn passengers(&self, raw: &RawQuery) -> Result<Passengers, InvalidQuery> {
        raw.passengers
            .validate()
            .map_err(|detail| InvalidQueryReason::Passengers { detail }.into())
            .map(|_| raw.passengers)
    }

    fn max_stops(&self, raw: &RawQuery) -> Result<Option<u8>, InvalidQuery> {
        match raw.max_stops {
            Some(value) if value > 2 => Err(InvalidQueryReason::MaxStops { value }.into()),
            other => Ok(other),
        }
    }

    pub fn currency(&self, input: Option<&str>) -> Result<String, InvalidQuery> {
        let code = match input.map(str::trim).filter(|s| !s.is_empty()) {
            Some(c) => c.to_ascii_uppercase(),
            None => return Ok(self.default_currency.clone()),
        };
        if CURRENCY_RE.is_match(&code) {
            Ok(code)
        } else {
            Err(InvalidQueryReason::Currency { code }.into())
        }
    }
}

fn missing(field: &str) -> InvalidQuery {
    InvalidQueryReason::MissingField {
        field: field.to_string(),
    }
    .into()
}

fn unexpected(field: &str) -> InvalidQuery {
    InvalidQueryReason::UnexpectedField {
        field: field.to_string(),
    }
    .into()
}

fn unknown(field: &str, value: String) -> InvalidQuery {
    InvalidQueryReason::UnknownValue {
        field: field.to_string(),
        value,
    }
    .into()
}

/// Pure date-expression resolution relative to `today`. Range checks are
/// left to the caller.
pub fn resolve_date_expr(expr: &str, today: NaiveDate) -> Option<NaiveDate> {
    let expr = expr.trim();
    for fmt in ["%Y-%m-%d", "%Y/%m/%d"] {
        if let Ok(d) = NaiveDate::parse_from_str(expr, fmt) {
            return Some(d);
        }
    }

    let lower = expr.to_lowercase();
    match lower.as_str() {
        "today" => return Some(today),
        "tomorrow" => return today.succ_opt(),
        "weekend" | "this weekend" | "next weekend" => return Some(next_weekday(today, Weekday::Sat)),
        _ => {}
    }

    if let Some(cap) = PLUS_DAYS_RE.captures(&lower) {
        let n: i64 = cap.get(2)?.as_str().parse().ok()?;
        let signed = if cap.get(1)?.as_str() == "-" { -n } else { n };
        return today.checked_add_signed(Duration::days(signed));
    }
    if let Some(cap) = IN_DAYS_RE.captures(&lower) {
        let n: i64 = cap.get(1)?.as_str().parse().ok()?;
        return today.checked_add_signed(Duration::days(n));
    }

    month_from_name(&lower).and_then(|month| nearest_month_start(month, today))
}

/// Strictly after `today`: on a Saturday, "weekend" is a week away.
fn next_weekday(today: NaiveDate, target: Weekday) -> NaiveDate {
    let ahead = (7 + target.num_days_from_monday() as i64 - today.weekday().num_days_from_monday() as i64) % 7;
    let ahead = if ahead == 0 { 7 } else { ahead };
    today + Duration::days(ahead)
}

fn month_from_name(name: &str) -> Option<u32> {
    const MONTHS: [&str; 12] = [
        "january",
        "february",
        "march",
        "april",
        "may",
        "june",
        "july",
        "august",
        "september",
        "october",
        "november",
        "december",
    ];
    let name = name.trim_end_matches('.');
    MONTHS
        .iter()
        .position(|m| *m == name || (name.len() == 3 && m.starts_with(name)))
        .map(|idx| idx as u32 + 1)
}

/// First day of `month` that is not in the past: today for the current
/// month, otherwise the 1st of its next occurrence.
fn nearest_month_start(month: u32, today: NaiveDate) -> Option<NaiveDate> {
    if month == today.month() {
        return Some(today);
    }
    let year = if month > today.month() {
        today.year()
    } else {
        today.year() + 1
    };
    NaiveDate::from_ymd_opt(year, month, 1)
}
