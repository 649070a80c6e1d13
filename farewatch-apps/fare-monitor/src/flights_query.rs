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

//! # Canonical queries
//!
//! Side-effect free value types for fully resolved searches, plus the
//! protobuf-encoded base64 `tfs` deep link that the browser navigates to.

use anyhow::Result;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::flights_proto::{self, LegSpec, Passenger, Seat, Trip};

const SEARCH_BASE_URL: &str = "https://www.google.com/travel/flights/search";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CabinClass {
    #[default]
    Economy,
    PremiumEconomy,
    Business,
    First,
}

impl CabinClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Economy => "economy",
            Self::PremiumEconomy => "premium_economy",
            Self::Business => "business",
            Self::First => "first",
        }
    }

    fn seat(self) -> Seat {
        match self {
            Self::Economy => Seat::Economy,
            Self::PremiumEconomy => Seat::PremiumEconomy,
            Self::Business => Seat::Business,
            Self::First => Seat::First,
        }
    }
}

impl FromStr for CabinClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "economy" | "e" => Ok(Self::Economy),
            "premium_economy" | "premium" | "pe" => Ok(Self::PremiumEconomy),
            "business" | "b" => Ok(Self::Business),
            "first" | "f" => Ok(Self::First),
            other => Err(other.to_string()),
        }
    }
}

impl fmt::Display for CabinClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TripType {
    OneWay,
    #[default]
    RoundTrip,
    MultiCity,
}

impl TripType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OneWay => "one-way",
            Self::RoundTrip => "round-trip",
            Self::MultiCity => "multi-city",
        }
    }

    fn trip(self) -> Trip {
        match self {
            Self::OneWay => Trip::OneWay,
            Self::RoundTrip => Trip::RoundTrip,
            Self::MultiCity => Trip::MultiCity,
        }
    }
}

impl FromStr for TripType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('_', "-").as_str() {
            "one-way" | "oneway" | "one" | "ow" => Ok(Self::OneWay),
            "round-trip" | "roundtrip" | "round" | "rt" => Ok(Self::RoundTrip),
            "multi-city" | "multicity" | "multi" | "mc" => Ok(Self::MultiCity),
            other => Err(other.to_string()),
        }
    }
}

impl fmt::Display for TripType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Passengers {
    pub adults: u32,
    #[serde(default)]
    pub children: u32,
    #[serde(default)]
    pub infants_in_seat: u32,
    #[serde(default)]
    pub infants_on_lap: u32,
}

impl Default for Passengers {
    fn default() -> Self {
        Self::adults(1)
    }
}

impl Passengers {
    pub fn adults(adults: u32) -> Self {
        Self {
            adults,
            children: 0,
            infants_in_seat: 0,
            infants_on_lap: 0,
        }
    }

    pub fn total(&self) -> u32 {
        self.adults + self.children + self.infants_in_seat + self.infants_on_lap
    }

    /// Limits the search surface accepts for a single booking.
    pub fn validate(&self) -> Result<(), String> {
        if self.adults < 1 {
            return Err("at least 1 adult passenger is required".into());
        }
        if self.adults > 9 {
            return Err("maximum 9 adult passengers allowed".into());
        }
        if self.children > 8 {
            return Err("maximum 8 children allowed".into());
        }
        if self.infants_in_seat > 4 {
            return Err("maximum 4 infants in seat allowed".into());
        }
        if self.infants_on_lap > 4 {
            return Err("maximum 4 infants on lap allowed".into());
        }
        if self.infants_on_lap > self.adults {
            return Err(format!(
                "cannot have more infants on lap ({}) than adults ({})",
                self.infants_on_lap, self.adults
            ));
        }
        if self.total() > 9 {
            return Err("total passengers cannot exceed 9".into());
        }
        Ok(())
    }

    fn pairs(&self) -> Vec<(Passenger, u32)> {
        [
            (Passenger::Adult, self.adults),
            (Passenger::Child, self.children),
            (Passenger::InfantInSeat, self.infants_in_seat),
            (Passenger::InfantOnLap, self.infants_on_lap),
        ]
        .into_iter()
        .filter(|(_, n)| *n > 0)
        .collect()
    }
}

/// One origin→destination leg on one date.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Segment {
    pub origin: String,
    pub destination: String,
    pub depart_date: NaiveDate,
}

/// A fully resolved search: location codes and absolute dates only.
///
/// For one-way and round-trip queries `segments` is empty. For multi-city
/// queries it holds every leg, and `origin`, `destination` and
/// `depart_date` mirror the first one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CanonicalQuery {
    pub origin: String,
    pub destination: String,
    pub depart_date: NaiveDate,
    pub return_date: Option<NaiveDate>,
    pub passengers: Passengers,
    pub cabin: CabinClass,
    pub trip_type: TripType,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub segments: Vec<Segment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_stops: Option<u8>,
    pub currency: String,
}

impl CanonicalQuery {
    /// Stable, human-readable key; equal queries always produce equal keys.
    pub fn cache_key(&self) -> String {
        let legs = self
            .legs()
            .iter()
            .map(|s| format!("{}-{}@{}", s.origin, s.destination, s.depart_date))
            .collect::<Vec<_>>()
            .join(",");
        let ret = self
            .return_date
            .map(|d| d.to_string())
            .unwrap_or_else(|| "-".into());
        let p = &self.passengers;
        let stops = self
            .max_stops
            .map(|s| s.to_string())
            .unwrap_or_else(|| "any".into());
        format!(
            "fares:{}:{}:ret={}:pax={}.{}.{}.{}:{}:stops={}:{}",
            self.trip_type,
            legs,
            ret,
            p.adults,
            p.children,
            p.infants_in_seat,
            p.infants_on_lap,
            self.cabin,
            stops,
            self.currency
        )
    }

    /// Outbound legs in travel order. Round-trip returns only the outbound
    /// leg; the return is implied by `return_date`.
    pub fn legs(&self) -> Vec<Segment> {
        if self.trip_type == TripType::MultiCity && !self.segments.is_empty() {
            return self.segments.clone();
        }
        vec![Segment {
            origin: self.origin.clone(),
            destination: self.destination.clone(),
            depart_date: self.depart_date,
        }]
    }

    /// Split a multi-city query into independent one-way queries that share
    /// passengers, cabin, stops and currency.
    pub fn segment_queries(&self) -> Vec<CanonicalQuery> {
        if self.trip_type != TripType::MultiCity {
            return vec![self.clone()];
        }
        self.segments
            .iter()
            .map(|s| CanonicalQuery {
                origin: s.origin.clone(),
                destination: s.destination.clone(),
                depart_date: s.depart_date,
                return_date: None,
                passengers: self.passengers,
                cabin: self.cabin,
                trip_type: TripType::OneWay,
                segments: Vec::new(),
                max_stops: self.max_stops,
                currency: self.currency.clone(),
            })
            .collect()
    }

    pub fn generate_tfs(&self) -> Result<String> {
        let outbound = self.legs();
        let mut legs: Vec<LegSpec<'_>> = outbound
            .iter()
            .map(|s| LegSpec {
                from_airport: &s.origin,
                to_airport: &s.destination,
                date: s.depart_date,
            })
            .collect();

        if let (TripType::RoundTrip, Some(ret)) = (self.trip_type, self.return_date) {
            legs.push(LegSpec {
                from_airport: &self.destination,
                to_airport: &self.origin,
                date: ret,
            });
        }

        let bytes = flights_proto::encode_search(
            &legs,
            self.cabin.seat(),
            self.trip_type.trip(),
            &self.passengers.pairs(),
            self.max_stops.map(i32::from),
        )?;
        Ok(STANDARD.encode(&bytes))
    }

    /// Deep link to the results page for this query, in `language`.
    pub fn deep_link(&self, language: &str) -> Result<String> {
        let tfs_param = self.generate_tfs()?;
        Ok(format!(
            "{}?tfs={}&hl={}&curr={}&tfu=EgQIABABIgA",
            SEARCH_BASE_URL,
            urlencoding::encode(&tfs_param),
            urlencoding::encode(language),
            urlencoding::encode(&self.currency)
        ))
    }
}

impl fmt::Display for CanonicalQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let route = self
            .legs()
            .iter()
            .map(|s| format!("{}→{} {}", s.origin, s.destination, s.depart_date))
            .collect::<Vec<_>>()
            .join(", ");
        match self.return_date {
            Some(ret) => write!(f, "{} (return {}) [{}]", route, ret, self.trip_type),
            None => write!(f, "{} [{}]", route, self.trip_type),
        }
    }
}
