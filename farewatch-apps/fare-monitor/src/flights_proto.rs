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

//! # Prost Abstraction Layer
//!
//! Protobuf messages behind the Google Flights `tfs` search parameter,
//! declared with prost derives. Field tags mirror the wire format the
//! search surface accepts.

use anyhow::{Result, anyhow};
use prost::Message;

#[derive(Clone, PartialEq, prost::Message)]
pub struct Airport {
    #[prost(string, tag = "2")]
    pub airport: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct FlightData {
    #[prost(string, tag = "2")]
    pub date: String,
    #[prost(int32, optional, tag = "5")]
    pub max_stops: Option<i32>,
    #[prost(string, repeated, tag = "6")]
    pub airlines: Vec<String>,
    #[prost(message, optional, tag = "13")]
    pub from_flight: Option<Airport>,
    #[prost(message, optional, tag = "14")]
    pub to_flight: Option<Airport>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum Seat {
    UnknownSeat = 0,
    Economy = 1,
    PremiumEconomy = 2,
    Business = 3,
    First = 4,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum Trip {
    UnknownTrip = 0,
    RoundTrip = 1,
    OneWay = 2,
    MultiCity = 3,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum Passenger {
    UnknownPassenger = 0,
    Adult = 1,
    Child = 2,
    InfantInSeat = 3,
    InfantOnLap = 4,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Info {
    #[prost(message, repeated, tag = "3")]
    pub data: Vec<FlightData>,
    #[prost(enumeration = "Passenger", repeated, tag = "8")]
    pub passengers: Vec<i32>,
    #[prost(enumeration = "Seat", optional, tag = "9")]
    pub seat: Option<i32>,
    #[prost(enumeration = "Trip", optional, tag = "19")]
    pub trip: Option<i32>,
}

/// One leg as the encoder sees it.
pub(crate) struct LegSpec<'a> {
    pub from_airport: &'a str,
    pub to_airport: &'a str,
    pub date: chrono::NaiveDate,
}

/// Encode a search to protobuf bytes.
pub(crate) fn encode_search(
    legs: &[LegSpec<'_>],
    seat: Seat,
    trip: Trip,
    passengers: &[(Passenger, u32)],
    max_stops: Option<i32>,
) -> Result<Vec<u8>> {
    let info = Info {
        data: legs
            .iter()
            .map(|leg| FlightData {
                date: format_date(leg.date),
                max_stops: max_stops.filter(|&v| v != 0), // proto3 omits defaults
                airlines: Vec::new(),
                from_flight: Some(Airport {
                    airport: leg.from_airport.to_string(),
                }),
                to_flight: Some(Airport {
                    airport: leg.to_airport.to_string(),
                }),
            })
            .collect(),
        passengers: passengers
            .iter()
            .flat_map(|(ptype, count)| std::iter::repeat_n(*ptype as i32, *count as usize))
            .collect(),
        seat: Some(seat as i32),
        trip: Some(trip as i32),
    };

    let mut buf = Vec::new();
    info.encode(&mut buf)
        .map_err(|e| anyhow!("Encode failed: {}", e))?;
    Ok(buf)
}

fn format_date(date: chrono::NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn decode_info(data: &[u8]) -> Result<Info> {
        Info::decode(data).map_err(|e| anyhow!("Decode failed: {}", e))
    }

    #[test]
    fn roundtrip_simple() {
        let legs = [LegSpec {
            from_airport: "SFO",
            to_airport: "JFK",
            date: NaiveDate::from_ymd_opt(2025, 7, 15).unwrap(),
        }];
        let encoded = encode_search(
            &legs,
            Seat::Economy,
            Trip::OneWay,
            &[(Passenger::Adult, 1)],
            Some(0),
        )
        .unwrap();

        let decoded = decode_info(&encoded).unwrap();
        assert_eq!(decoded.data.len(), 1);
        assert_eq!(decoded.data[0].date, "2025-07-15");
        assert_eq!(decoded.data[0].max_stops, None);
        assert_eq!(decoded.data[0].from_flight.as_ref().unwrap().airport, "SFO");
        assert_eq!(decoded.data[0].to_flight.as_ref().unwrap().airport, "JFK");
    }

    #[test]
    fn multi_city_keeps_leg_order() {
        let legs = [
            LegSpec {
                from_airport: "ARN",
                to_airport: "CDG",
                date: NaiveDate::from_ymd_opt(2025, 9, 1).unwrap(),
            },
            LegSpec {
                from_airport: "CDG",
                to_airport: "FCO",
                date: NaiveDate::from_ymd_opt(2025, 9, 5).unwrap(),
            },
            LegSpec {
                from_airport: "FCO",
                to_airport: "ARN",
                date: NaiveDate::from_ymd_opt(2025, 9, 9).unwrap(),
            },
        ];
        let encoded = encode_search(
            &legs,
            Seat::Business,
            Trip::MultiCity,
            &[(Passenger::Adult, 2), (Passenger::Child, 1)],
            Some(1),
        )
        .unwrap();

        let decoded = decode_info(&encoded).unwrap();
        let route: Vec<_> = decoded
            .data
            .iter()
            .map(|d| d.to_flight.as_ref().unwrap().airport.as_str())
            .collect();
        assert_eq!(route, ["CDG", "FCO", "ARN"]);
        assert_eq!(decoded.passengers, vec![1, 1, 2]);
        assert_eq!(decoded.trip, Some(Trip::MultiCity as i32));
        assert_eq!(decoded.data[2].max_stops, Some(1));
    }
}
