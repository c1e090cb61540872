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

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! This crate decodes and verifies [SMART Health Cards][1].
//!
//! A card is a compact JWS with a raw DEFLATE compressed payload, signed by
//! the issuer with `ES256` and carried by one or more numeric QR codes. The
//! payload holds a FHIR bundle with the patient and immunization records.
//!
//! [1]: <https://spec.smarthealth.cards/>
//!
//! # Details
//!
//! The main components of this crate are the following.
//!
//! * [`numeric`] -- Reassembles the signed token from the scanned `shc:/` QR payloads.
//! * [`jws`] -- Splits the signed token and validates its header.
//! * [`inflate`] -- Decompresses the payload, with a bounded output size.
//! * [`verifier`] -- Verifies the signature with a key from the issuer key set.
//! * [`lookup`] -- Provides different methods of retrieving an issuer's key set.
//! * [`fhir`] -- Extracts patient and immunization facts from the verified bundle.
//! * [`decoder`] -- Runs all of the above in order.
//! * [`issuer`] -- Signs cards, mostly useful for tests and fixtures.
//!
//! The payload has to be decompressed **before** the signature is verified,
//! since the issuer is named inside it. Until verification succeeds it is an
//! [`inflate::UnverifiedPayload`], and only the [`verifier`] can promote it
//! to the [`verifier::VerifiedPayload`] which the [`fhir`] extractor accepts.
//!
//! # Examples
//!
//! ## Issue and decode a card
//!
//! ```
//! use bh_shc::{
//!     issuer::sign_credential, numeric::to_qr_payload, DecoderConfig, Es256Signer, Fact,
//!     JwkSet, KeySetLookup, ShcDecoder,
//! };
//! use serde_json::json;
//!
//! // A lookup serving a fixed key set instead of fetching it over HTTPS
//! struct FixedLookup(JwkSet);
//!
//! impl KeySetLookup for FixedLookup {
//!     async fn fetch_key_set(&self, _alleged_iss: &str) -> bh_shc::Result<JwkSet> {
//!         Ok(self.0.clone())
//!     }
//! }
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let signer = Es256Signer::generate("issuer-key".to_string()).unwrap();
//! let key_set = JwkSet::try_from(vec![signer.public_jwk().unwrap()]).unwrap();
//!
//! let claims = json!({
//!     "iss": "https://issuer.example",
//!     "vc": {"credentialSubject": {"fhirBundle": {"entry": [
//!         {"resource": {"resourceType": "Patient", "name": [{"family": "Doe", "given": ["Jane"]}]}}
//!     ]}}}
//! });
//! let token = sign_credential(claims.as_object().unwrap(), &signer).unwrap();
//! let scanned = [to_qr_payload(&token).unwrap()];
//!
//! let decoder = ShcDecoder::new(DecoderConfig::default(), FixedLookup(key_set));
//! let card = decoder.decode(&scanned).await.unwrap();
//!
//! assert_eq!(card.verification.kid, "issuer-key");
//! assert_eq!(card.facts, vec![Fact::Patient { name: "Jane Doe".to_string() }]);
//! # });
//! ```

mod config;
mod error;
mod jwk;
mod openssl_impl;
#[cfg(test)]
mod test_utils;
mod traits;

pub mod decoder;
pub mod fhir;
pub mod inflate;
pub mod issuer;
pub mod jws;
pub mod lookup;
pub mod numeric;
pub mod verifier;

pub use config::*;
pub use decoder::{HealthCard, HttpsShcDecoder, ShcDecoder};
pub use error::{Error, FormatError, Result};
pub use fhir::{Fact, Identifier};
pub use jwk::*;
pub use lookup::{CachingKeySetLookup, HttpsKeySetLookup, KeySetLookup};
pub use openssl_impl::{CryptoError, Es256Signer, Es256Verifier};
pub use traits::*;
pub use verifier::VerificationResult;

/// Type alias for a JSON object.
pub type JsonObject = serde_json::Map<String, serde_json::Value>;
