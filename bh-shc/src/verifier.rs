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

//! Cryptographic verification of a decoded card.

use bherror::traits::{ErrorContext as _, ForeignBoxed as _};

use crate::{
    inflate::UnverifiedPayload, jws::CompactJws, lookup::KeySetLookup, Error, JsonObject,
    Result, SignatureVerifier, SigningAlgorithm,
};

/// Outcome of a successful verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationResult {
    /// `kid` of the issuer key which verified the signature.
    pub kid: String,
    /// The issuer URL, i.e. the `iss` claim.
    pub issuer: String,
}

/// Card payload whose signature has been verified.
///
/// Values of this type can only be created by [`verify_signature`].
#[derive(Debug, Clone, PartialEq)]
pub struct VerifiedPayload(JsonObject);

impl VerifiedPayload {
    /// Returns the verified claims.
    pub fn claims(&self) -> &JsonObject {
        &self.0
    }

    /// Consumes `self`, returning the verified claims.
    pub fn into_claims(self) -> JsonObject {
        self.0
    }

    #[cfg(test)]
    pub(crate) fn new_unchecked(claims: JsonObject) -> Self {
        Self(claims)
    }
}

/// Verifies the signature of the `jws` with the issuer key identified by its
/// `kid` header member, promoting the `payload` on success.
///
/// The steps are performed in order, and the first failure is returned:
///
/// 1. `alg` must be `ES256`, otherwise [`Error::UnsupportedAlgorithm`] is
///    returned,
/// 2. the payload must contain the `iss` claim,
/// 3. the key set of `iss` is fetched using the `lookup`,
/// 4. the key set must contain a key with the header `kid`, otherwise
///    [`Error::KeyNotFound`] is returned,
/// 5. the signature over the original `<header>.<payload>` segments must
///    verify, otherwise [`Error::InvalidSignature`] is returned.
///
/// No network request is made unless the first two steps succeed.
pub async fn verify_signature(
    jws: &CompactJws,
    payload: UnverifiedPayload,
    lookup: &impl KeySetLookup,
    verifier: &dyn SignatureVerifier,
) -> Result<(VerificationResult, VerifiedPayload)> {
    jws.header.alg.parse::<SigningAlgorithm>()?;

    let issuer = payload.alleged_issuer()?.to_owned();

    let key_set = lookup.fetch_key_set(&issuer).await?;

    let kid = &jws.header.kid;
    let keys = key_set.index_by_kid();
    let Some(public_key) = keys.get(kid.as_str()) else {
        return Err(bherror::Error::root(Error::KeyNotFound(kid.clone())))
            .ctx(|| format!("issuer {issuer} publishes {} keys", keys.len()));
    };

    let valid = verifier
        .verify(jws.signing_input().as_bytes(), &jws.signature, public_key)
        .foreign_boxed_err(|| Error::InvalidSignature)?;
    if !valid {
        return Err(bherror::Error::root(Error::InvalidSignature));
    }

    tracing::info!(iss = %issuer, %kid, "card signature verified");

    Ok((
        VerificationResult {
            kid: kid.clone(),
            issuer,
        },
        VerifiedPayload(payload.0),
    ))
}
