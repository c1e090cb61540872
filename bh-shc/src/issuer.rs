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

//! Provides helpers for issuing SMART Health Cards.
//!
//! Issuance is the inverse of decoding: the claims are serialized, compressed
//! with raw DEFLATE and signed as a compact JWS. The resulting token can be
//! turned into a QR payload with [`to_qr_payload`](crate::numeric::to_qr_payload).

use bherror::traits::{ErrorContext as _, ForeignBoxed as _, ForeignError as _};

use crate::{
    inflate::{compress_deflate_raw, ZIP_DEFLATE},
    jws::{base64_url_encode, construct_jws_payload, ShcHeader},
    HasJwkKid, JsonObject,
};

/// Error type related to the issuance of cards.
#[derive(strum_macros::Display, Debug, PartialEq, Eq)]
pub enum IssuerError {
    /// Error indicating that the claims could not be serialized.
    #[strum(to_string = "Serialization failed")]
    SerializationFailed,

    /// Error indicating that the claims could not be compressed.
    #[strum(to_string = "Compression failed")]
    CompressionFailed,

    /// Error indicating that the signing of the JWS failed.
    #[strum(to_string = "Signing failed")]
    SigningFailed,
}

impl bherror::BhError for IssuerError {}

/// Result type used by the [`issuer`][crate::issuer] module.
pub type Result<T> = bherror::Result<T, IssuerError>;

/// Serializes the `claims` and compresses them with raw DEFLATE, without the
/// ZLIB wrapper, at the best compression level.
pub fn compress_payload(claims: &JsonObject) -> Result<Vec<u8>> {
    let serialized =
        serde_json::to_vec(claims).foreign_err(|| IssuerError::SerializationFailed)?;

    compress_deflate_raw(&serialized)
        .foreign_err(|| IssuerError::CompressionFailed)
        .ctx(|| format!("serialized claims were {} bytes", serialized.len()))
}

/// Signs the `claims` as a compact JWS with the
/// `{"alg": "ES256", "zip": "DEF", "kid": <kid>}` header, where `kid` is the
/// one of the `signer`.
pub fn sign_credential<S: HasJwkKid>(claims: &JsonObject, signer: &S) -> Result<String> {
    let header = ShcHeader {
        alg: signer.algorithm().to_string(),
        zip: ZIP_DEFLATE.to_owned(),
        kid: signer.jwk_kid().to_owned(),
    };
    let header =
        serde_json::to_vec(&header).foreign_err(|| IssuerError::SerializationFailed)?;

    let payload = compress_payload(claims)?;

    let signing_input =
        construct_jws_payload(&base64_url_encode(header), &base64_url_encode(payload));

    let signature = signer
        .sign(signing_input.as_bytes())
        .foreign_boxed_err(|| IssuerError::SigningFailed)?;

    tracing::debug!(kid = %signer.jwk_kid(), "signed card");

    Ok(format!("{}.{}", signing_input, base64_url_encode(signature)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        jws::CompactJws,
        test_utils::{sample_claims, ISSUER_SIGNER, KID},
        BoxError, Es256Verifier, SignatureVerifier, Signer, SigningAlgorithm,
    };

    struct FailingSigner;

    impl Signer for FailingSigner {
        fn algorithm(&self) -> SigningAlgorithm {
            SigningAlgorithm::Es256
        }

        fn sign(&self, _message: &[u8]) -> std::result::Result<Vec<u8>, BoxError> {
            Err("signing backend unavailable".into())
        }
    }

    impl HasJwkKid for FailingSigner {
        fn jwk_kid(&self) -> &str {
            "failing"
        }
    }

    #[test]
    fn signed_card_has_shc_header_and_verifies() {
        let token = sign_credential(&sample_claims(), &*ISSUER_SIGNER).unwrap();

        let jws = CompactJws::parse(&token).unwrap();

        assert_eq!(
            jws.header,
            ShcHeader {
                alg: "ES256".to_owned(),
                zip: "DEF".to_owned(),
                kid: KID.to_owned(),
            }
        );
        assert_eq!(jws.payload, compress_payload(&sample_claims()).unwrap());
        assert!(Es256Verifier
            .verify(
                jws.signing_input().as_bytes(),
                &jws.signature,
                &ISSUER_SIGNER.public_jwk().unwrap()
            )
            .unwrap());
    }

    #[test]
    fn compression_shrinks_the_claims() {
        let claims = sample_claims();

        let compressed = compress_payload(&claims).unwrap();

        assert!(compressed.len() < serde_json::to_vec(&claims).unwrap().len());
    }

    #[test]
    fn signer_failure_is_reported() {
        let error = sign_credential(&sample_claims(), &FailingSigner).unwrap_err();

        assert_eq!(error.error, IssuerError::SigningFailed);
    }
}
