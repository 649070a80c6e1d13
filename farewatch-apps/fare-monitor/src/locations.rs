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

//! # Location table
//!
//! Side-effect free resolution of free-text places to airport codes.
//!
//! Resolution order:
//! 1. `"London (LHR)"` style input yields the parenthesised code.
//! 2. A bare three-letter uppercase code passes through unchanged.
//! 3. Exact (case and whitespace insensitive) name or alias match.
//! 4. A code known to the table, in any case.
//! 5. Jaro-Winkler similarity against every name, keeping the best score
//!    at or above the threshold.
//!
//! Ties go to the entry with the best traffic rank (1 is busiest), then to
//! the entry registered first.

use once_cell::sync::Lazy;
use regex::Regex;
use std::cmp::Ordering;

pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.88;

static PAREN_CODE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\(([A-Za-z]{3})\)").unwrap());

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocationEntry {
    pub name: String,
    pub code: String,
    pub rank: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub code: String,
    /// Table name that matched, `None` for codes taken verbatim.
    pub matched: Option<String>,
    pub score: f64,
}

#[derive(Debug, Clone)]
pub struct LocationTable {
    entries: Vec<LocationEntry>,
    threshold: f64,
}

impl Default for LocationTable {
    fn default() -> Self {
        Self::builtin()
    }
}

impl LocationTable {
    pub fn empty() -> Self {
        Self {
            entries: Vec::new(),
            threshold: DEFAULT_SIMILARITY_THRESHOLD,
        }
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold.clamp(0.0, 1.0);
        self
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn register(&mut self, name: &str, code: &str, rank: Option<u32>) -> &mut Self {
        self.entries.push(LocationEntry {
            name: normalize_name(name),
            code: code.trim().to_ascii_uppercase(),
            rank,
        });
        self
    }

    pub fn with_entry(mut self, name: &str, code: &str, rank: Option<u32>) -> Self {
        self.register(name, code, rank);
        self
    }

    pub fn entries(&self) -> &[LocationEntry] {
        &self.entries
    }

    pub fn contains_code(&self, code: &str) -> bool {
        self.entries
            .iter()
            .any(|e| e.code.eq_ignore_ascii_case(code.trim()))
    }

    pub fn resolve(&self, input: &str) -> Option<Resolution> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return None;
        }

        if let Some(cap) = PAREN_CODE_RE.captures(trimmed) {
            let code = cap.get(1)?.as_str().to_ascii_uppercase();
            return Some(Resolution {
                code,
                matched: None,
                score: 1.0,
            });
        }

        if trimmed.len() == 3 && trimmed.chars().all(|c| c.is_ascii_uppercase()) {
            return Some(Resolution {
                code: trimmed.to_string(),
                matched: None,
                score: 1.0,
            });
        }

        let needle = normalize_name(trimmed);

        let exact = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.name == needle)
            .min_by(|a, b| tie_break(a, b));
        if let Some((_, entry)) = exact {
            return Some(Resolution {
                code: entry.code.clone(),
                matched: Some(entry.name.clone()),
                score: 1.0,
            });
        }

        if needle.len() == 3 && self.contains_code(&needle) {
            return Some(Resolution {
                code: needle.to_ascii_uppercase(),
                matched: None,
                score: 1.0,
            });
        }

        let mut best: Option<(f64, usize, &LocationEntry)> = None;
        for (idx, entry) in self.entries.iter().enumerate() {
            let score = strsim::jaro_winkler(&needle, &entry.name);
            if score < self.threshold {
                continue;
            }
            let better = match &best {
                None => true,
                Some((best_score, best_idx, best_entry)) => match score.partial_cmp(best_score) {
                    Some(Ordering::Greater) => true,
                    Some(Ordering::Equal) => {
                        tie_break(&(idx, entry), &(*best_idx, *best_entry)) == Ordering::Less
                    }
                    _ => false,
                },
            };
            if better {
                best = Some((score, idx, entry));
            }
        }

        match best {
            Some((score, _, entry)) => {
                tracing::debug!(input, code = %entry.code, matched = %entry.name, score, "fuzzy location match");
                Some(Resolution {
                    code: entry.code.clone(),
                    matched: Some(entry.name.clone()),
                    score,
                })
            }
            None => None,
        }
    }

    /// Cities and aliases known out of the box. Multi-airport cities list
    /// their airports busiest first.
    pub fn builtin() -> Self {
        let mut table = Self::empty();
        for (name, code, rank) in BUILTIN_LOCATIONS {
            table.register(name, code, *rank);
        }
        table
    }
}

/// Smaller is preferred: ranked before unranked, busier first, then
/// registration order.
fn tie_break(a: &(usize, &LocationEntry), b: &(usize, &LocationEntry)) -> Ordering {
    let rank_key = |e: &LocationEntry| e.rank.unwrap_or(u32::MAX);
    rank_key(a.1)
        .cmp(&rank_key(b.1))
        .then_with(|| a.0.cmp(&b.0))
}

fn normalize_name(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_alphanumeric() { c.to_ascii_lowercase() } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

const BUILTIN_LOCATIONS: &[(&str, &str, Option<u32>)] = &[
    ("new york", "JFK", Some(1)),
    ("new york", "EWR", Some(2)),
    ("new york", "LGA", Some(3)),
    ("new york city", "JFK", Some(1)),
    ("nyc", "JFK", Some(1)),
    ("newark", "EWR", None),
    ("los angeles", "LAX", Some(1)),
    ("la", "LAX", Some(1)),
    ("london", "LHR", Some(1)),
    ("london", "LGW", Some(2)),
    ("london", "STN", Some(3)),
    ("paris", "CDG", Some(1)),
    ("paris", "ORY", Some(2)),
    ("tokyo", "NRT", Some(1)),
    ("tokyo", "HND", Some(2)),
    ("berlin", "BER", None),
    ("amsterdam", "AMS", None),
    ("rome", "FCO", None),
    ("barcelona", "BCN", None),
    ("madrid", "MAD", None),
    ("vienna", "VIE", None),
    ("prague", "PRG", None),
    ("budapest", "BUD", None),
    ("warsaw", "WAW", None),
    ("stockholm", "ARN", Some(1)),
    ("stockholm", "BMA", Some(2)),
    ("copenhagen", "CPH", None),
    ("oslo", "OSL", None),
    ("helsinki", "HEL", None),
    ("dublin", "DUB", None),
    ("edinburgh", "EDI", None),
    ("manchester", "MAN", None),
    ("birmingham", "BHX", None),
    ("glasgow", "GLA", None),
    ("dubai", "DXB", None),
    ("abu dhabi", "AUH", None),
    ("sharjah", "SHJ", None),
    ("moscow", "SVO", None),
    ("saint petersburg", "LED", None),
    ("nairobi", "NBO", None),
    ("miami", "MIA", None),
    ("chicago", "ORD", Some(1)),
    ("chicago", "MDW", Some(2)),
    ("san francisco", "SFO", None),
    ("seattle", "SEA", None),
    ("boston", "BOS", None),
    ("washington", "IAD", Some(1)),
    ("washington", "DCA", Some(2)),
    ("atlanta", "ATL", None),
    ("denver", "DEN", None),
    ("las vegas", "LAS", None),
    ("orlando", "MCO", None),
    ("houston", "IAH", Some(1)),
    ("houston", "HOU", Some(2)),
    ("phoenix", "PHX", None),
    ("salt lake city", "SLC", None),
    ("portland", "PDX", None),
    ("austin", "AUS", None),
    ("nashville", "BNA", None),
    ("charlotte", "CLT", None),
    ("detroit", "DTW", None),
    ("minneapolis", "MSP", None),
    ("new orleans", "MSY", None),
    ("sydney", "SYD", None),
    ("singapore", "SIN", None),
    ("hong kong", "HKG", None),
    ("bangkok", "BKK", None),
    ("istanbul", "IST", None),
    ("toronto", "YYZ", None),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_names_prefer_busiest_airport() {
        let table = LocationTable::builtin();
        assert_eq!(table.resolve("New York").unwrap().code, "JFK");
        assert_eq!(table.resolve("  LONDON ").unwrap().code, "LHR");
        assert_eq!(table.resolve("nyc").unwrap().code, "JFK");
    }

    #[test]
    fn test_codes_pass_through() {
        let table = LocationTable::builtin();
        assert_eq!(table.resolve("ZRH").unwrap().code, "ZRH");
        assert_eq!(table.resolve("lhr").unwrap().code, "LHR");
        assert_eq!(table.resolve("London (LGW)").unwrap().code, "LGW");
    }

    #[test]
    fn test_fuzzy_match_above_threshold() {
        let table = LocationTable::builtin();
        let res = table.resolve("Londn").unwrap();
        assert_eq!(res.code, "LHR");
        assert!(res.score >= DEFAULT_SIMILARITY_THRESHOLD);
        assert_eq!(table.resolve("Barcelonna").unwrap().code, "BCN");
    }

    #[test]
    fn test_unresolvable_input() {
        let table = LocationTable::builtin();
        assert!(table.resolve("Xqzvwk").is_none());
        assert!(table.resolve("   ").is_none());
    }

    #[test]
    fn test_unranked_ties_keep_registration_order() {
        let table = LocationTable::empty()
            .with_entry("springfield", "SGF", None)
            .with_entry("springfield", "SPI", None);
        assert_eq!(table.resolve("Springfield").unwrap().code, "SGF");

        let ranked = LocationTable::empty()
            .with_entry("springfield", "SGF", None)
            .with_entry("springfield", "SPI", Some(1));
        assert_eq!(ranked.resolve("Springfield").unwrap().code, "SPI");
    }
}
