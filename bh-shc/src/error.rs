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

/// Top-level error type for the SMART Health Card pipeline.
///
/// Every variant is fatal for the card being processed; nothing is retried.
#[derive(strum_macros::Display, Debug, PartialEq, Clone)]
pub enum Error {
    /// Malformed input at any stage of the pipeline.
    #[strum(to_string = "Format error: {0}")]
    Format(FormatError),

    /// Signature or compression algorithm outside the allow-list.
    #[strum(to_string = "Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// Transport failure, timeout or non-success status while fetching the
    /// issuer key set.
    #[strum(to_string = "Network error: {0}")]
    Network(String),

    /// The `kid` from the JWS header is not in the issuer key set.
    #[strum(to_string = "Key `{0}` not found in the issuer key set")]
    KeyNotFound(String),

    /// Cryptographic verification of the signature failed.
    #[strum(to_string = "Invalid signature")]
    InvalidSignature,
}

impl bherror::BhError for Error {}

impl From<FormatError> for Error {
    fn from(error: FormatError) -> Self {
        Self::Format(error)
    }
}

/// Detailed reason for an [`Error::Format`].
#[derive(strum_macros::Display, Debug, PartialEq, Clone)]
pub enum FormatError {
    /// QR payload has no `scheme:/` separator.
    #[strum(to_string = "QR payload is missing the `:/` scheme separator")]
    MissingSchemeSeparator,

    /// QR payload scheme is not `shc`.
    #[strum(to_string = "QR payload scheme must be \"shc\", but is \"{0}\"")]
    InvalidScheme(String),

    /// QR payload data segment contains something other than digits.
    #[strum(to_string = "QR payload data must contain only digits")]
    NonNumericData,

    /// No QR payloads were provided.
    #[strum(to_string = "No QR payloads were provided")]
    NoPayloads,

    /// The concatenated digit string cannot be split into pairs.
    #[strum(to_string = "Numeric token has an odd number of digits ({0})")]
    OddDigitCount(usize),

    /// A character cannot be represented in the numeric QR encoding.
    #[strum(to_string = "Character '{0}' cannot be numerically encoded")]
    UnencodableCharacter(char),

    /// The signed token does not have exactly three segments.
    #[strum(to_string = "Signed token must have 3 segments, but has {0}")]
    InvalidSegmentCount(usize),

    /// One of the signed token segments is empty.
    #[strum(to_string = "Signed token {0} segment is empty")]
    EmptySegment(&'static str),

    /// One of the signed token segments is not valid base64url.
    #[strum(to_string = "Signed token {0} segment is not valid base64url")]
    InvalidBase64(&'static str),

    /// The JWS header is not a JSON object.
    #[strum(to_string = "JWS header is not a valid JSON object")]
    MalformedHeader,

    /// A required JWS header field is missing.
    #[strum(to_string = "JWS header field `{0}` is missing")]
    MissingHeaderField(&'static str),

    /// The payload is not a valid raw DEFLATE stream.
    #[strum(to_string = "Payload is not valid raw DEFLATE data")]
    MalformedCompressedData,

    /// The decompressed payload exceeds the configured bound.
    #[strum(to_string = "Decompressed payload exceeds {0} bytes")]
    PayloadTooLarge(usize),

    /// The decompressed payload is not a JSON object.
    #[strum(to_string = "Payload is not a valid JSON object")]
    MalformedPayload,

    /// A required payload claim is missing.
    #[strum(to_string = "Payload claim `{0}` is missing")]
    MissingPayloadField(&'static str),

    /// The `iss` claim is not an acceptable issuer URI.
    #[strum(to_string = "Invalid issuer `{0}`")]
    InvalidIssuer(String),

    /// The issuer key set response is not a valid JWK Set.
    #[strum(to_string = "Issuer key set is malformed: {0}")]
    InvalidKeySet(String),

    /// The issuer key set response exceeds the configured bound.
    #[strum(to_string = "Issuer key set exceeds {0} bytes")]
    KeySetTooLarge(usize),

    /// The FHIR bundle does not have the expected shape.
    #[strum(to_string = "Malformed FHIR bundle: {0}")]
    InvalidFhirBundle(String),
}

impl bherror::BhError for FormatError {}

impl FormatError {
    /// Wraps `self` into a root [`Error::Format`], logging it as a warning.
    #[track_caller]
    pub(crate) fn root(self) -> bherror::Error<Error> {
        bherror::Error::root(Error::Format(self))
    }
}

/// Result type used across the crate.
pub type Result<T> = bherror::Result<T, Error>;
