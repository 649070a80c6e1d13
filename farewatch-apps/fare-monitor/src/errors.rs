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

//! # Error taxonomy
//!
//! Typed failures of the search pipeline. Input problems are 4xx-class,
//! scrape and layout problems are 5xx-class.

use chrono::NaiveDate;
use farewatch_query_queues::{RetryClass, Retryable};
use http::StatusCode;
use serde::Serialize;
use thiserror::Error;

use crate::notify::Channel;

#[derive(Clone, Debug, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum InvalidQueryReason {
    #[error("could not resolve location '{input}'")]
    UnresolvedLocation { input: String },
    #[error("{field} {date} is in the past")]
    PastDate { field: String, date: NaiveDate },
    #[error("{field} {date} is more than {max_days} days ahead")]
    TooFarAhead {
        field: String,
        date: NaiveDate,
        max_days: u32,
    },
    #[error("unrecognized date expression '{input}'")]
    InvalidDate { input: String },
    #[error("origin and destination are both {code}")]
    SameOriginDestination { code: String },
    #[error("return date {return_date} is not after departure {depart_date}")]
    ReturnBeforeDeparture {
        depart_date: NaiveDate,
        return_date: NaiveDate,
    },
    #[error("{field} is required")]
    MissingField { field: String },
    #[error("{field} is not allowed for this trip type")]
    UnexpectedField { field: String },
    #[error("multi-city trips need 2 to 5 segments, got {count}")]
    SegmentCount { count: usize },
    #[error("invalid passengers: {detail}")]
    Passengers { detail: String },
    #[error("max_stops must be 0, 1 or 2, got {value}")]
    MaxStops { value: u8 },
    #[error("unknown {field} '{value}'")]
    UnknownValue { field: String, value: String },
    #[error("unsupported currency '{code}'")]
    Currency { code: String },
    #[error("invalid alert: {detail}")]
    Alert { detail: String },
    #[error("webhook url must be http(s) with a host, got '{url}'")]
    WebhookUrl { url: String },
}

/// Client input that cannot be normalized. Never retried.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("invalid query: {reason}")]
pub struct InvalidQuery {
    pub reason: InvalidQueryReason,
}

impl From<InvalidQueryReason> for InvalidQuery {
    fn from(reason: InvalidQueryReason) -> Self {
        Self { reason }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScrapeErrorKind {
    Timeout,
    Blocked,
    NavigationFailed,
    NoResults,
}

impl std::fmt::Display for ScrapeErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Timeout => "timeout",
            Self::Blocked => "blocked",
            Self::NavigationFailed => "navigation_failed",
            Self::NoResults => "no_results",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("scrape failed ({kind}): {detail}")]
pub struct ScrapeError {
    pub kind: ScrapeErrorKind,
    pub detail: String,
}

impl ScrapeError {
    pub fn new(kind: ScrapeErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    pub fn timeout(detail: impl Into<String>) -> Self {
        Self::new(ScrapeErrorKind::Timeout, detail)
    }

    pub fn blocked(detail: impl Into<String>) -> Self {
        Self::new(ScrapeErrorKind::Blocked, detail)
    }

    pub fn navigation(detail: impl Into<String>) -> Self {
        Self::new(ScrapeErrorKind::NavigationFailed, detail)
    }
}

impl Retryable for ScrapeError {
    fn retry_class(&self) -> RetryClass {
        match self.kind {
            ScrapeErrorKind::Timeout | ScrapeErrorKind::NavigationFailed => RetryClass::Transient,
            ScrapeErrorKind::Blocked | ScrapeErrorKind::NoResults => RetryClass::Terminal,
        }
    }
}

/// Content did not match any recognized results layout.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("unrecognized results layout: {0}")]
pub struct ParseError(pub String);

/// One failed leg of a multi-city run.
#[derive(Clone, Debug, Serialize)]
pub struct SegmentFailure {
    /// Zero-based position of the leg in the request.
    pub index: usize,
    /// One-based leg number, as shown to people.
    pub leg: usize,
    pub error: String,
}

impl SegmentFailure {
    pub fn new(index: usize, error: impl Into<String>) -> Self {
        Self {
            index,
            leg: index + 1,
            error: error.into(),
        }
    }
}

#[derive(Clone, Debug, Error)]
pub enum SearchError {
    #[error(transparent)]
    Invalid(#[from] InvalidQuery),
    #[error(transparent)]
    Scrape(#[from] ScrapeError),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("all {} segments failed", .0.len())]
    AllSegmentsFailed(Vec<SegmentFailure>),
    #[error("no search with id '{0}'")]
    NotFound(String),
}

impl From<InvalidQueryReason> for SearchError {
    fn from(reason: InvalidQueryReason) -> Self {
        Self::Invalid(reason.into())
    }
}

impl SearchError {
    /// HTTP-equivalent classification for callers that surface errors to users.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Invalid(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Scrape(e) if e.kind == ScrapeErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
            Self::Scrape(_) | Self::Parse(_) | Self::AllSegmentsFailed(_) => StatusCode::BAD_GATEWAY,
        }
    }

    /// Stable code for programmatic handling.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Invalid(_) => "INVALID_QUERY",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Scrape(_) => "SCRAPE_ERROR",
            Self::Parse(_) => "PARSE_ERROR",
            Self::AllSegmentsFailed(_) => "ALL_SEGMENTS_FAILED",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("no alert with id '{0}'")]
pub struct AlertNotFound(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("{channel} delivery to {recipient} failed: {detail}")]
    Transport {
        channel: Channel,
        recipient: String,
        detail: String,
    },
    #[error("{channel} delivery to {recipient} rejected: {detail}")]
    Rejected {
        channel: Channel,
        recipient: String,
        detail: String,
    },
    #[error("no {0} recipients configured")]
    NoRecipients(Channel),
}

impl Retryable for DispatchError {
    fn retry_class(&self) -> RetryClass {
        match self {
            Self::Transport { .. } => RetryClass::Transient,
            Self::Rejected { .. } | Self::NoRecipients(_) => RetryClass::Terminal,
        }
    }
}
