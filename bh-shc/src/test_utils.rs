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

use std::sync::atomic::{AtomicUsize, Ordering};

use serde_json::{json, Value};

use crate::{
    inflate::compress_deflate_raw,
    jws::{base64_url_encode, construct_jws_payload},
    verifier::VerifiedPayload,
    Es256Signer, JsonObject, JwkSet, KeySetLookup, Result, Signer,
};

pub(crate) const ISSUER: &str = "https://issuer.example";
pub(crate) const KID: &str = "issuer-key-1";

lazy_static::lazy_static! {
    /// The key of [`ISSUER`], published by [`StaticLookup::for_issuer`].
    pub(crate) static ref ISSUER_SIGNER: Es256Signer =
        Es256Signer::generate(KID.to_owned()).unwrap();
}

pub(crate) fn into_object(value: Value) -> JsonObject {
    if let Value::Object(object) = value {
        object
    } else {
        panic!("Argument wasn't an object")
    }
}

/// Claims of a card for Jane Q Doe, vaccinated on 2021-05-01.
pub(crate) fn sample_claims() -> JsonObject {
    into_object(json!({
        "iss": ISSUER,
        "nbf": 1620000000,
        "vc": {
            "type": [
                "https://smarthealth.cards#health-card",
                "https://smarthealth.cards#immunization"
            ],
            "credentialSubject": {
                "fhirVersion": "4.0.1",
                "fhirBundle": {
                    "resourceType": "Bundle",
                    "type": "collection",
                    "entry": [
                        {
                            "fullUrl": "resource:0",
                            "resource": {
                                "resourceType": "Patient",
                                "name": [{"family": "Doe", "given": ["Jane", "Q"]}],
                                "birthDate": "1960-01-20"
                            }
                        },
                        {
                            "fullUrl": "resource:1",
                            "resource": {
                                "resourceType": "Immunization",
                                "status": "completed",
                                "vaccineCode": {
                                    "coding": [{
                                        "system": "http://hl7.org/fhir/sid/cvx",
                                        "code": "207"
                                    }]
                                },
                                "patient": {"reference": "resource:0"},
                                "occurrenceDateTime": "2021-05-01",
                                "manufacturer": {
                                    "identifier": {
                                        "system": "http://hl7.org/fhir/sid/mvx",
                                        "value": "MOD"
                                    }
                                },
                                "lotNumber": "0000001"
                            }
                        }
                    ]
                }
            }
        }
    }))
}

pub(crate) fn verified(claims: JsonObject) -> VerifiedPayload {
    VerifiedPayload::new_unchecked(claims)
}

/// Signs the `claims` with [`ISSUER_SIGNER`] under an arbitrary `header`,
/// which does not have to be a valid card header.
pub(crate) fn sign_with_header(header: &Value, claims: &JsonObject) -> String {
    let payload = compress_deflate_raw(serde_json::to_vec(claims).unwrap()).unwrap();
    let signing_input = construct_jws_payload(
        &base64_url_encode(header.to_string()),
        &base64_url_encode(payload),
    );
    let signature = ISSUER_SIGNER.sign(signing_input.as_bytes()).unwrap();

    format!("{signing_input}.{}", base64_url_encode(signature))
}

/// Lookup serving a fixed key set for [`ISSUER`], counting the fetches.
pub(crate) struct StaticLookup {
    key_set: JwkSet,
    pub(crate) fetches: AtomicUsize,
}

impl StaticLookup {
    pub(crate) fn new(key_set: JwkSet) -> Self {
        Self {
            key_set,
            fetches: AtomicUsize::new(0),
        }
    }

    /// Publishes the public key of [`ISSUER_SIGNER`].
    pub(crate) fn for_issuer() -> Self {
        Self::new(vec![ISSUER_SIGNER.public_jwk().unwrap()].try_into().unwrap())
    }

    /// Publishes an unrelated key under the [`KID`] of [`ISSUER_SIGNER`].
    pub(crate) fn with_foreign_key() -> Self {
        let foreign = Es256Signer::generate(KID.to_owned()).unwrap();
        Self::new(vec![foreign.public_jwk().unwrap()].try_into().unwrap())
    }
}

impl KeySetLookup for StaticLookup {
    async fn fetch_key_set(&self, alleged_iss: &str) -> Result<JwkSet> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        assert_eq!(alleged_iss, ISSUER, "key set requested for unexpected issuer");

        Ok(self.key_set.clone())
    }
}
