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

//! # Flights Results Parser
//!
//! Side-effect free parsing of scraped result content into [`FareRecord`]s.
//!
//! Content is matched against a small fixed set of [`Layout`]s. Anything
//! else is a [`ParseError`]: a drifted page must fail loudly instead of
//! yielding a silently empty result.
//!
//! A card whose price cannot be read is dropped; the rest of the page is
//! still returned.

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::ParseError;

/// What the scrape executor hands over for parsing.
#[derive(Debug, Clone)]
pub struct RawContent {
    pub body: String,
    pub source_url: String,
    /// Currency the surface was asked to render prices in.
    pub requested_currency: String,
}

impl RawContent {
    pub fn new(body: impl Into<String>, source_url: impl Into<String>, currency: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            source_url: source_url.into(),
            requested_currency: currency.into(),
        }
    }
}

/// Amount in minor units (cents, öre) with an explicit ISO 4217 code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Price {
    pub amount_minor: i64,
    pub currency: String,
}

impl Price {
    pub fn new(amount_minor: i64, currency: impl Into<String>) -> Self {
        Self {
            amount_minor,
            currency: currency.into(),
        }
    }

    pub fn from_major(amount: i64, currency: impl Into<String>) -> Self {
        Self::new(amount * 100, currency)
    }

    pub fn as_f64(&self) -> f64 {
        self.amount_minor as f64 / 100.0
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let major = self.amount_minor / 100;
        let minor = (self.amount_minor % 100).abs();
        if minor == 0 {
            write!(f, "{} {}", self.currency, major)
        } else {
            write!(f, "{} {}.{:02}", self.currency, major, minor)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FareRecord {
    pub carrier: String,
    pub departure: String,
    pub arrival: String,
    pub duration: String,
    pub duration_minutes: Option<u32>,
    pub stops: u32,
    pub price: Price,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay: Option<String>,
}

/// The "prices are currently low/typical/high" banner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriceLevel {
    Low,
    Typical,
    High,
}

impl PriceLevel {
    fn from_label(label: &str) -> Option<Self> {
        let label = label.to_lowercase();
        if label.contains("low") {
            Some(Self::Low)
        } else if label.contains("typical") {
            Some(Self::Typical)
        } else if label.contains("high") {
            Some(Self::High)
        } else {
            None
        }
    }
}

/// Result layouts the parser understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    /// Rendered results page with offer cards.
    CardList,
    /// Well-formed results page stating that nothing matched.
    EmptyResults,
    /// JSON document `{ "current_price": .., "flights": [..] }`.
    JsonFeed,
}

#[derive(Debug, Clone)]
pub struct ParsedPage {
    pub layout: Layout,
    pub fares: Vec<FareRecord>,
    pub price_level: Option<PriceLevel>,
    /// Offers skipped because their price could not be read.
    pub dropped: usize,
}

struct FlightSelectors {
    containers: Selector,
    flight_card: Selector,
    airline: Selector,
    times: Selector,
    duration: Selector,
    stops: Selector,
    arrives_next_day: Selector,
    price: Selector,
    delay: Selector,
    price_level: Selector,
}

static SELECTORS: Lazy<FlightSelectors> = Lazy::new(|| FlightSelectors {
    containers: Selector::parse(r#"div[jsname="IWWDBc"], div[jsname="YdtKid"]"#).unwrap(),
    flight_card: Selector::parse(r#"ul.Rk10dc li"#).unwrap(),
    airline: Selector::parse(r#"div.sSHqwe.tPgKwe.ogfYpf span"#).unwrap(),
    times: Selector::parse(r#"span.mv1WYe div"#).unwrap(),
    duration: Selector::parse(r#"li div.Ak5kof div"#).unwrap(),
    stops: Selector::parse(r#".BbR8Ec .ogfYpf"#).unwrap(),
    arrives_next_day: Selector::parse(r#"span.bOzv6"#).unwrap(),
    price: Selector::parse(r#".YMlIz.FpEdX"#).unwrap(),
    delay: Selector::parse(r#".GsCCve"#).unwrap(),
    price_level: Selector::parse(r#"span.gOatQ"#).unwrap(),
});

static DURATION_H_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+)\s*h").unwrap());
static DURATION_M_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+)\s*m").unwrap());
static ISO_CODE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b([A-Z]{3})\b").unwrap());
static AMOUNT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d[\d.,\s\u{a0}\u{202f}']*").unwrap());
static EMPTY_MARKER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)no (results returned|flights found|options matching your search)").unwrap()
});
static PRICE_LEVEL_TEXT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)prices are currently\s+(low|typical|high)").unwrap());

/// Parse content into fare records, in page order.
pub fn parse(raw: &RawContent) -> Result<Vec<FareRecord>, ParseError> {
    parse_page(raw).map(|page| page.fares)
}

pub fn parse_page(raw: &RawContent) -> Result<ParsedPage, ParseError> {
    let trimmed = raw.body.trim_start();
    if trimmed.starts_with('{') {
        return parse_json_feed(trimmed, &raw.requested_currency);
    }

    let document = Html::parse_document(&raw.body);
    let sel = &*SELECTORS;

    let containers: Vec<_> = document.select(&sel.containers).collect();
    let cards: Vec<_> = containers
        .iter()
        .flat_map(|c| c.select(&sel.flight_card))
        .collect();

    let price_level = document
        .select(&sel.price_level)
        .next()
        .and_then(|el| PriceLevel::from_label(&el.text().collect::<String>()))
        .or_else(|| {
            PRICE_LEVEL_TEXT_RE
                .captures(&raw.body)
                .and_then(|c| PriceLevel::from_label(c.get(1)?.as_str()))
        });

    if cards.is_empty() {
        // Containers holding content we cannot read are layout drift, not
        // a genuine zero-offer page.
        let containers_blank = !containers.is_empty()
            && containers
                .iter()
                .all(|c| c.text().all(|t| t.trim().is_empty()));
        if containers_blank || EMPTY_MARKER_RE.is_match(&raw.body) {
            return Ok(ParsedPage {
                layout: Layout::EmptyResults,
                fares: Vec::new(),
                price_level,
                dropped: 0,
            });
        }
        if !containers.is_empty() {
            return Err(ParseError(format!(
                "{} result container(s) without readable flight cards from {}",
                containers.len(),
                raw.source_url
            )));
        }
        return Err(ParseError(format!(
            "no result containers in {} bytes from {}",
            raw.body.len(),
            raw.source_url
        )));
    }

    let mut fares = Vec::with_capacity(cards.len());
    let mut dropped = 0;
    for card in cards {
        match parse_single_flight(card, sel, &raw.requested_currency) {
            Some(fare) => fares.push(fare),
            None => dropped += 1,
        }
    }

    if dropped > 0 {
        tracing::warn!(dropped, kept = fares.len(), "Dropped offers with unreadable fields");
    }

    Ok(ParsedPage {
        layout: Layout::CardList,
        fares,
        price_level,
        dropped,
    })
}

fn text_of(el: ElementRef<'_>) -> String {
    collapse_ws(&el.text().collect::<String>())
}

fn parse_single_flight(card: ElementRef<'_>, sel: &FlightSelectors, requested: &str) -> Option<FareRecord> {
    let price_text = card.select(&sel.price).next().map(text_of)?;
    let price = match parse_price(&price_text, requested) {
        Some(p) => p,
        None => {
            tracing::debug!("Unreadable price: '{}'", price_text);
            return None;
        }
    };

    let carrier = card
        .select(&sel.airline)
        .next()
        .map(text_of)
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "Unknown".to_string());

    let times: Vec<String> = card.select(&sel.times).map(text_of).collect();
    let departure = times.first().cloned().unwrap_or_default();
    let mut arrival = times.get(1).cloned().unwrap_or_default();
    if let Some(ahead) = card.select(&sel.arrives_next_day).next().map(text_of) {
        if !ahead.is_empty() {
            arrival = format!("{} {}", arrival, ahead);
        }
    }

    let duration = card.select(&sel.duration).next().map(text_of).unwrap_or_default();
    let stops = card
        .select(&sel.stops)
        .next()
        .map(|el| parse_stops(&text_of(el)))
        .unwrap_or(0);

    let delay = card
        .select(&sel.delay)
        .next()
        .map(text_of)
        .filter(|s| !s.is_empty());

    Some(FareRecord {
        carrier,
        departure,
        arrival,
        duration_minutes: parse_duration(&duration),
        duration,
        stops,
        price,
        delay,
    })
}

#[derive(Deserialize)]
struct FeedDocument {
    #[serde(default)]
    current_price: Option<String>,
    flights: Vec<FeedFlight>,
}

#[derive(Deserialize)]
struct FeedFlight {
    name: String,
    #[serde(default)]
    departure: String,
    #[serde(default)]
    arrival: String,
    #[serde(default)]
    arrival_time_ahead: Option<String>,
    #[serde(default)]
    duration: String,
    #[serde(default)]
    stops: serde_json::Value,
    price: serde_json::Value,
    #[serde(default)]
    delay: Option<String>,
}

fn parse_json_feed(body: &str, requested: &str) -> Result<ParsedPage, ParseError> {
    let doc: FeedDocument =
        serde_json::from_str(body).map_err(|e| ParseError(format!("JSON feed: {}", e)))?;

    let mut fares = Vec::with_capacity(doc.flights.len());
    let mut dropped = 0;
    for f in doc.flights {
        let price_text = match &f.price {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Number(n) => n.to_string(),
            _ => String::new(),
        };
        let Some(price) = parse_price(&price_text, requested) else {
            dropped += 1;
            continue;
        };
        let stops = match &f.stops {
            serde_json::Value::Number(n) => n.as_u64().unwrap_or(0) as u32,
            serde_json::Value::String(s) => parse_stops(s),
            _ => 0,
        };
        let arrival = match f.arrival_time_ahead.as_deref().map(str::trim) {
            Some(ahead) if !ahead.is_empty() => format!("{} {}", collapse_ws(&f.arrival), ahead),
            _ => collapse_ws(&f.arrival),
        };
        fares.push(FareRecord {
            carrier: collapse_ws(&f.name),
            departure: collapse_ws(&f.departure),
            arrival,
            duration_minutes: parse_duration(&f.duration),
            duration: f.duration,
            stops,
            price,
            delay: f.delay.filter(|d| !d.trim().is_empty()),
        });
    }

    let layout = if fares.is_empty() && dropped == 0 {
        Layout::EmptyResults
    } else {
        Layout::JsonFeed
    };

    Ok(ParsedPage {
        layout,
        fares,
        price_level: doc.current_price.as_deref().and_then(PriceLevel::from_label),
        dropped,
    })
}

fn collapse_ws(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn parse_stops(label: &str) -> u32 {
    if label.to_lowercase().contains("nonstop") {
        return 0;
    }
    label
        .split_whitespace()
        .next()
        .and_then(|s| s.parse().ok())
        .unwrap_or_else(|| {
            tracing::warn!("Could not parse number of stops from: '{}'", label);
            1
        })
}

fn parse_duration(s: &str) -> Option<u32> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    let hours = DURATION_H_RE
        .captures(s)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<u32>().ok());
    let minutes = DURATION_M_RE
        .captures(s)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<u32>().ok());

    if hours.is_none() && minutes.is_none() {
        tracing::debug!("Could not parse duration from: '{}'", s);
        return None;
    }
    Some(hours.unwrap_or(0) * 60 + minutes.unwrap_or(0))
}

/// Map a rendered price to an amount and a currency code.
///
/// An ISO code in the text wins. Otherwise the symbol decides, with the
/// requested currency breaking ties for symbols shared by several
/// currencies. A bare number is in the requested currency.
pub fn parse_price(text: &str, requested: &str) -> Option<Price> {
    let amount_minor = parse_amount(text)?;
    let currency = detect_currency(text, requested);
    Some(Price::new(amount_minor, currency))
}

fn parse_amount(text: &str) -> Option<i64> {
    let raw = AMOUNT_RE.find(text)?.as_str();
    let compact: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == ',')
        .collect();
    let compact = compact.trim_end_matches(['.', ',']);

    // A trailing separator followed by 1-2 digits is a decimal point;
    // any other separator groups thousands.
    let (int_part, frac_part) = match compact.rfind(['.', ',']) {
        Some(idx) if (1..=2).contains(&(compact.len() - idx - 1)) => {
            (&compact[..idx], &compact[idx + 1..])
        }
        _ => (compact, ""),
    };

    let digits: String = int_part.chars().filter(char::is_ascii_digit).collect();
    if digits.is_empty() {
        return None;
    }
    let major: i64 = digits.parse().ok()?;
    let minor: i64 = match frac_part.len() {
        0 => 0,
        1 => frac_part.parse::<i64>().ok()? * 10,
        _ => frac_part.parse().ok()?,
    };
    major.checked_mul(100)?.checked_add(minor)
}

const DOLLAR_CURRENCIES: &[&str] = &["USD", "CAD", "AUD", "NZD", "SGD", "HKD", "MXN"];
const KRONA_CURRENCIES: &[&str] = &["SEK", "NOK", "DKK", "ISK"];

fn detect_currency(text: &str, requested: &str) -> String {
    let requested = requested.trim().to_ascii_uppercase();
    if let Some(cap) = ISO_CODE_RE.captures(text) {
        if let Some(code) = cap.get(1) {
            return code.as_str().to_string();
        }
    }
    let pick = |family: &[&str], fallback: &str| {
        if family.contains(&requested.as_str()) {
            requested.clone()
        } else {
            fallback.to_string()
        }
    };
    if text.contains("US$") {
        return "USD".into();
    }
    if text.contains('$') {
        return pick(DOLLAR_CURRENCIES, "USD");
    }
    if text.contains('€') {
        return "EUR".into();
    }
    if text.contains('£') {
        return "GBP".into();
    }
    if text.contains('¥') {
        return pick(&["JPY", "CNY"], "JPY");
    }
    if text.contains('₹') {
        return "INR".into();
    }
    if text.contains('₩') {
        return "KRW".into();
    }
    if text.contains("zł") {
        return "PLN".into();
    }
    if text.to_lowercase().contains("kr") {
        return pick(KRONA_CURRENCIES, "SEK");
    }
    requested
}
