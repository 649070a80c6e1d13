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

//! Consent cookies seeded into each browser session so the search surface
//! skips its consent interstitial.

use base64::{Engine as _, engine::general_purpose::STANDARD};
use chrono::{Datelike, NaiveDate};

/// Opaque trailer the consent server expects after the product tag.
const CONSENT_BLOB: &[u8] = &[0x08, 0x80, 0xc4, 0xf6, 0xca];

const WIRE_LENGTH_DELIMITED: u8 = 2;

pub const COOKIE_DOMAIN: &str = ".google.com";

fn encode_varint(mut value: u32, out: &mut Vec<u8>) {
    while value > 0x7F {
        out.push(((value & 0x7F) | 0x80) as u8);
        value >>= 7;
    }
    out.push(value as u8);
}

fn push_length_delimited(field_number: u8, data: &[u8], out: &mut Vec<u8>) {
    out.push((field_number << 3) | WIRE_LENGTH_DELIMITED);
    encode_varint(data.len() as u32, out);
    out.extend_from_slice(data);
}

/// SOCS value stamped with the consent-server build of the day before
/// `today`, in `language`.
pub fn socs_value(today: NaiveDate, language: &str) -> String {
    let build_day = today.pred_opt().unwrap_or(today);
    let server_tag = format!(
        "boq_identityfrontenduiserver_{}{:02}{:02}.03_p0{}",
        build_day.year(),
        build_day.month(),
        build_day.day(),
        language
    );

    let mut protobuf = Vec::with_capacity(server_tag.len() + CONSENT_BLOB.len() + 4);
    push_length_delimited(2, server_tag.as_bytes(), &mut protobuf);
    push_length_delimited(3, CONSENT_BLOB, &mut protobuf);
    STANDARD.encode(&protobuf)
}

/// `(name, value)` pairs to install on [`COOKIE_DOMAIN`].
pub fn consent_cookies(today: NaiveDate, language: &str) -> Vec<(&'static str, String)> {
    vec![
        ("CONSENT", "PENDING+987".to_string()),
        ("SOCS", socs_value(today, language)),
    ]
}

/// Same cookies as a single `Cookie` header value.
pub fn cookie_header(today: NaiveDate, language: &str) -> String {
    consent_cookies(today, language)
        .into_iter()
        .map(|(name, value)| format!("{}={}", name, value))
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn produces_well_formed_protobuf() {
        let today = NaiveDate::from_ymd_opt(2026, 3, 1).unwrap();
        let decoded = STANDARD.decode(socs_value(today, "en")).expect("valid base64");

        assert_eq!(decoded[0] >> 3, 2, "first field must be tag=2");
        assert_eq!(decoded[0] & 0x07, 2, "first field must be length-delimited");
        let len = decoded[1] as usize;
        let tag = std::str::from_utf8(&decoded[2..2 + len]).unwrap();
        assert_eq!(tag, "boq_identityfrontenduiserver_20260228.03_p0en");
        assert!(decoded.ends_with(CONSENT_BLOB));
    }

    #[test]
    fn header_format_correct() {
        let header = cookie_header(NaiveDate::from_ymd_opt(2026, 1, 10).unwrap(), "sv");
        assert!(header.starts_with("CONSENT=PENDING+987; SOCS="));
        let socs = header.split("SOCS=").nth(1).unwrap();
        STANDARD.decode(socs).expect("valid b64");
    }
}
