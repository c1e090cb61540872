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

//! Expansion of the compressed card payload.
//!
//! The payload has to be expanded **before** its signature can be verified,
//! because the issuer whose keys verify it is named inside the payload. All
//! of this module therefore operates on untrusted input.

use std::io::{Read as _, Write as _};

use bherror::traits::{ErrorContext as _, ForeignError as _};
use flate2::{read::DeflateDecoder, write::DeflateEncoder, Compression};

use crate::{jws::ShcHeader, Error, FormatError, JsonObject, Result};

/// The only supported `zip` header value: raw DEFLATE, without the ZLIB or
/// GZIP wrappers.
pub const ZIP_DEFLATE: &str = "DEF";

/// Decompressed card payload whose signature has **not** been verified yet.
///
/// It can only be promoted to a
/// [`VerifiedPayload`](crate::verifier::VerifiedPayload) by the
/// [verifier](crate::verifier).
#[derive(Debug, Clone, PartialEq)]
pub struct UnverifiedPayload(pub(crate) JsonObject);

impl UnverifiedPayload {
    /// Returns the alleged issuer, i.e. the `iss` claim.
    ///
    /// # Errors
    ///
    /// [`FormatError::MissingPayloadField`] is returned if `iss` is absent or
    /// not a string.
    pub fn alleged_issuer(&self) -> Result<&str> {
        self.0
            .get("iss")
            .and_then(|iss| iss.as_str())
            .ok_or_else(|| FormatError::MissingPayloadField("iss").root())
    }

    /// Returns the untrusted claims.
    pub fn claims(&self) -> &JsonObject {
        &self.0
    }
}

/// Decompresses the card payload according to the `zip` header member and
/// parses it as a JSON object.
///
/// No more than `max_size + 1` bytes are ever inflated, so a small malicious
/// payload cannot force a large allocation.
///
/// # Errors
///
/// - [`Error::UnsupportedAlgorithm`] if `zip` is not `DEF`; nothing is
///   decompressed in that case,
/// - [`FormatError::MalformedCompressedData`] if the payload is not a valid
///   raw DEFLATE stream,
/// - [`FormatError::PayloadTooLarge`] if the output exceeds `max_size`,
/// - [`FormatError::MalformedPayload`] if the output is not a JSON object.
pub fn inflate_payload(
    header: &ShcHeader,
    compressed: &[u8],
    max_size: usize,
) -> Result<UnverifiedPayload> {
    if header.zip != ZIP_DEFLATE {
        return Err(bherror::Error::root(Error::UnsupportedAlgorithm(format!(
            "compression method \"{}\"",
            header.zip
        ))));
    }

    let decompressed = decompress_deflate_raw(compressed, max_size)?;

    tracing::debug!(
        compressed = compressed.len(),
        decompressed = decompressed.len(),
        "inflated payload"
    );

    let claims: JsonObject = serde_json::from_slice(&decompressed)
        .foreign_err(|| Error::Format(FormatError::MalformedPayload))?;

    Ok(UnverifiedPayload(claims))
}

/// Decompresses the given raw DEFLATE `payload`, refusing output larger than
/// `max_size`.
fn decompress_deflate_raw(payload: &[u8], max_size: usize) -> Result<Vec<u8>> {
    let limit = u64::try_from(max_size).unwrap_or(u64::MAX).saturating_add(1);

    let mut decompressed = Vec::new();
    DeflateDecoder::new(payload)
        .take(limit)
        .read_to_end(&mut decompressed)
        .foreign_err(|| Error::Format(FormatError::MalformedCompressedData))?;

    if decompressed.len() > max_size {
        return Err(FormatError::PayloadTooLarge(max_size).root())
            .ctx(|| format!("compressed payload was {} bytes", payload.len()));
    }

    Ok(decompressed)
}

/// Compresses the given `payload` using raw DEFLATE, without the ZLIB
/// wrapper.
///
/// The highest compression level is used, since the output has to fit into
/// QR codes.
pub(crate) fn compress_deflate_raw(payload: impl AsRef<[u8]>) -> std::io::Result<Vec<u8>> {
    let mut e = DeflateEncoder::new(Vec::new(), Compression::best());
    e.write_all(payload.as_ref())?;
    e.finish()
}
