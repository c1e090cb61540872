// Copyright (C) 2020-2026  The Blockhouse Technology Limited (TBTL).
//
// This program is free software: you can redistribute it and/or modify it
// under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or (at your
// option) any later version.
//
// This program is distributed in the hope that it will be useful, but
// WITHOUT ANY WARRANTY; without even the implied warranty of MERCHANTABILITY
// or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU Affero General Public
// License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! Decoding of the compact JWS carried by a SMART Health Card.
//!
//! The token is not a regular JWT: its payload is raw-DEFLATE compressed
//! (`"zip": "DEF"`), so generic JWT parsers cannot be used to split it.

use base64::{
    engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD},
    Engine as _,
};
use bherror::traits::{ErrorContext as _, ForeignError as _};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::{Error, FormatError, Result};

/// Names of the JWS segments, used in error messages.
const SEGMENT_NAMES: [&str; 3] = ["header", "payload", "signature"];

/// JWS header of a SMART Health Card.
///
/// Unlike in a plain JWS, all three members are required: the card cannot be
/// decompressed without `zip`, nor verified without `alg` and `kid`.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct ShcHeader {
    /// Signature algorithm, only `ES256` is accepted during verification.
    pub alg: String,
    /// Payload compression, only `DEF` is accepted during decompression.
    pub zip: String,
    /// Identifier of the issuer key that signed the card.
    pub kid: String,
}

/// Shadow type of [`ShcHeader`] used to report exactly which required member
/// is missing, instead of a generic deserialization error.
struct ShcHeaderUnverified {
    alg: Option<Value>,
    zip: Option<Value>,
    kid: Option<Value>,
}

impl ShcHeaderUnverified {
    fn validate(self) -> Result<ShcHeader> {
        Ok(ShcHeader {
            alg: required_str(self.alg, "alg")?,
            zip: required_str(self.zip, "zip")?,
            kid: required_str(self.kid, "kid")?,
        })
    }
}

fn required_str(value: Option<Value>, field: &'static str) -> Result<String> {
    match value {
        Some(Value::String(value)) => Ok(value),
        Some(other) => Err(FormatError::MissingHeaderField(field).root())
            .ctx(|| format!("`{field}` must be a string, but is {other}")),
        None => Err(FormatError::MissingHeaderField(field).root()),
    }
}

/// A signed token split into its decoded parts.
///
/// The payload is still compressed and, more importantly, **untrusted**.
#[derive(Debug, Clone)]
pub struct CompactJws {
    header_segment: String,
    payload_segment: String,
    /// Decoded and validated header.
    pub header: ShcHeader,
    /// Raw DEFLATE-compressed payload bytes.
    pub payload: Vec<u8>,
    /// Raw signature bytes, `r || s` for ECDSA.
    pub signature: Vec<u8>,
}

impl CompactJws {
    /// Splits the signed token and decodes each of its segments.
    ///
    /// # Errors
    ///
    /// A [`FormatError`] is returned if the token does not consist of exactly
    /// three non-empty base64url segments, if the header is not a JSON object,
    /// or if any of the `alg`, `zip` or `kid` header members is missing.
    pub fn parse(token: &str) -> Result<Self> {
        let segments: Vec<&str> = token.split('.').collect();
        let [header_segment, payload_segment, signature_segment] = segments[..] else {
            return Err(FormatError::InvalidSegmentCount(segments.len()).root());
        };

        for (segment, name) in [header_segment, payload_segment, signature_segment]
            .into_iter()
            .zip(SEGMENT_NAMES)
        {
            if segment.is_empty() {
                return Err(FormatError::EmptySegment(name).root());
            }
        }

        let header_bytes = decode_segment(header_segment, SEGMENT_NAMES[0])?;
        let payload = decode_segment(payload_segment, SEGMENT_NAMES[1])?;
        let signature = decode_segment(signature_segment, SEGMENT_NAMES[2])?;

        let mut header: Map<String, Value> = serde_json::from_slice(&header_bytes)
            .foreign_err(|| Error::Format(FormatError::MalformedHeader))?;
        let header = ShcHeaderUnverified {
            alg: header.remove("alg"),
            zip: header.remove("zip"),
            kid: header.remove("kid"),
        }
        .validate()?;

        tracing::debug!(
            alg = %header.alg,
            zip = %header.zip,
            kid = %header.kid,
            payload_len = payload.len(),
            "decoded JWS"
        );

        Ok(Self {
            header_segment: header_segment.to_owned(),
            payload_segment: payload_segment.to_owned(),
            header,
            payload,
            signature,
        })
    }

    /// The JWS signing input, `<header>.<payload>` as originally encoded.
    pub fn signing_input(&self) -> String {
        construct_jws_payload(&self.header_segment, &self.payload_segment)
    }
}

fn decode_segment(segment: &str, name: &'static str) -> Result<Vec<u8>> {
    base64_url_decode(segment).foreign_err(|| Error::Format(FormatError::InvalidBase64(name)))
}

/// Create payload for a `JWS`, given its header and claims.
///
/// The payload is constructed by concatenating the header and claims by `.`
/// character, i.e. `<header>.<claims>`, as defined [here].
///
/// [here]: https://www.rfc-editor.org/rfc/rfc7515.html#section-5.1
pub fn construct_jws_payload(header: &str, claims: &str) -> String {
    format!("{header}.{claims}")
}

/// Returns the `base64url`-encoded string of the given `input`, without
/// padding.
pub fn base64_url_encode<T: AsRef<[u8]>>(input: T) -> String {
    URL_SAFE_NO_PAD.encode(input)
}

/// Decodes the given `base64url`-encoded `payload` into bytes.
///
/// Missing padding is restored before decoding, so both padded and unpadded
/// input is accepted.
pub fn base64_url_decode<T: AsRef<[u8]>>(
    payload: T,
) -> std::result::Result<Vec<u8>, base64::DecodeError> {
    let mut padded = payload.as_ref().to_vec();
    while padded.len() % 4 != 0 {
        padded.push(b'=');
    }
    URL_SAFE.decode(padded)
}
