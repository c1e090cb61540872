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
use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{Error, JwkPublic};

/// Boxed error returned by the signing backends.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// JWS `alg` value of ECDSA over P-256 with SHA-256, the only algorithm
/// SMART Health Cards are signed with.
///
/// <https://spec.smarthealth.cards/#signing-health-cards>
pub const SIGNING_ALG_ES256: &str = "ES256";

/// Signature algorithms accepted on a card.
///
/// This is an allow-list. Parsing any other `alg` fails with
/// [`Error::UnsupportedAlgorithm`], so nothing is negotiated with the issuer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SigningAlgorithm {
    /// ECDSA over P-256 with SHA-256
    Es256,
}

impl FromStr for SigningAlgorithm {
    type Err = bherror::Error<Error>;

    fn from_str(alg: &str) -> Result<Self, Self::Err> {
        match alg {
            SIGNING_ALG_ES256 => Ok(Self::Es256),
            _ => Err(bherror::Error::root(Error::UnsupportedAlgorithm(format!(
                "signing algorithm \"{alg}\""
            )))),
        }
    }
}

impl fmt::Display for SigningAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Es256 => f.write_str(SIGNING_ALG_ES256),
        }
    }
}

/// Backend producing the signature of a card.
pub trait Signer {
    /// The algorithm of the produced signatures.
    fn algorithm(&self) -> SigningAlgorithm;

    /// Signs the `<header>.<payload>` signing input of a card, returning the
    /// raw JWS signature bytes, before base64url encoding.
    fn sign(&self, message: &[u8]) -> Result<Vec<u8>, BoxError>;
}

/// A [`Signer`] whose public key is published in the issuer key set under a
/// known `kid`, which is then put in the JWS header of the signed cards.
pub trait HasJwkKid: Signer {
    /// The `kid` of the public key in the issuer key set.
    fn jwk_kid(&self) -> &str;
}

/// Backend checking the signature of a card against an issuer key.
pub trait SignatureVerifier: Sync {
    /// The only algorithm this verifier accepts.
    fn algorithm(&self) -> SigningAlgorithm;

    /// Checks `signature` over `message` with the `public_key` entry of the
    /// issuer key set.
    ///
    /// Returns `Ok(false)` for a well-formed signature which does not match,
    /// and `Err(_)` when the key or the signature cannot be used at all.
    fn verify(
        &self,
        message: &[u8],
        signature: &[u8],
        public_key: &JwkPublic,
    ) -> Result<bool, BoxError>;
}
