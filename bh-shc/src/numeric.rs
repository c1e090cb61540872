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

//! Numeric QR encoding of the signed token.
//!
//! A SMART Health Card QR code carries `shc:/` followed by a string of
//! decimal digits. Every pair of digits is one character of the JWS, shifted
//! down by [`CHAR_OFFSET`] so that the whole base64url alphabet fits into two
//! digits.
//!
//! See the [QR encoding section][1] of the SMART Health Cards framework.
//!
//! [1]: https://spec.smarthealth.cards/#encoding-qrs

use crate::{FormatError, Result};

/// Scheme of the QR payload, as in `shc:/<digits>`.
pub const SHC_SCHEME: &str = "shc";

const SCHEME_SEPARATOR: &str = ":/";

/// Value subtracted from every character code point before it is written as
/// two decimal digits.
pub const CHAR_OFFSET: u32 = 45;

/// Reassembles the signed token from the QR payloads, given in scan order.
///
/// The data segments are concatenated exactly in the order they are provided;
/// they are never sorted.
///
/// # Errors
///
/// A [`FormatError`] is returned if there are no payloads, if any payload has
/// a wrong scheme or non-digit data, or if the total number of digits is odd.
/// An odd digit count is never truncated, since the dropped digit would
/// corrupt the signing input.
pub fn assemble<S: AsRef<str>>(scanned: &[S]) -> Result<String> {
    if scanned.is_empty() {
        return Err(FormatError::NoPayloads.root());
    }

    let mut digits = String::new();
    for payload in scanned {
        digits.push_str(data_segment(payload.as_ref())?);
    }

    tracing::debug!(
        payloads = scanned.len(),
        digits = digits.len(),
        "assembled numeric token"
    );

    decode_numeric(&digits)
}

/// Splits a single QR payload into its scheme and data, returning the data
/// segment if the payload is well-formed.
fn data_segment(payload: &str) -> Result<&str> {
    let payload = payload.trim_end();

    let (scheme, data) = payload
        .split_once(SCHEME_SEPARATOR)
        .ok_or_else(|| FormatError::MissingSchemeSeparator.root())?;

    if scheme != SHC_SCHEME {
        return Err(FormatError::InvalidScheme(scheme.to_owned()).root());
    }

    if !data.bytes().all(|byte| byte.is_ascii_digit()) {
        return Err(FormatError::NonNumericData.root());
    }

    Ok(data)
}

/// Decodes a string of digit pairs into the characters they encode.
pub fn decode_numeric(digits: &str) -> Result<String> {
    if digits.len() % 2 != 0 {
        return Err(FormatError::OddDigitCount(digits.len()).root());
    }

    digits
        .as_bytes()
        .chunks_exact(2)
        .map(|pair| {
            let (tens, ones) = (digit_value(pair[0])?, digit_value(pair[1])?);
            // At most 99 + 45, always a valid scalar value.
            char::from_u32(tens * 10 + ones + CHAR_OFFSET)
                .ok_or_else(|| FormatError::NonNumericData.root())
        })
        .collect()
}

fn digit_value(byte: u8) -> Result<u32> {
    if !byte.is_ascii_digit() {
        return Err(FormatError::NonNumericData.root());
    }
    Ok(u32::from(byte - b'0'))
}

/// Encodes the signed token into the numeric form, i.e. the inverse of
/// [`decode_numeric`].
///
/// # Errors
///
/// [`FormatError::UnencodableCharacter`] is returned for characters whose
/// shifted code point does not fit into two digits. Characters of a compact
/// JWS always fit.
pub fn encode_numeric(token: &str) -> Result<String> {
    let mut digits = String::with_capacity(token.len() * 2);

    for ch in token.chars() {
        let value = u32::from(ch)
            .checked_sub(CHAR_OFFSET)
            .filter(|value| *value < 100)
            .ok_or_else(|| FormatError::UnencodableCharacter(ch).root())?;
        digits.push_str(&format!("{value:02}"));
    }

    Ok(digits)
}

/// Encodes the signed token into a complete single QR payload, `shc:/<digits>`.
pub fn to_qr_payload(token: &str) -> Result<String> {
    Ok(format!(
        "{SHC_SCHEME}{SCHEME_SEPARATOR}{}",
        encode_numeric(token)?
    ))
}
