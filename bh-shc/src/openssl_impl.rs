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
//! `ES256` on top of openssl: the [`Es256Signer`] minting cards and the
//! [`Es256Verifier`] checking them against an issuer key set entry.

use bherror::{
    traits::{ErrorContext as _, ForeignError as _},
    BhError, Error,
};
use openssl::{
    bn::{BigNum, BigNumContext, BigNumRef},
    ec::{EcGroup, EcKey},
    ecdsa::EcdsaSig,
    nid::Nid,
    pkey::{Private, Public},
    sha::sha256,
};
use serde::Deserialize;
use serde_json::Value;

use crate::{
    jws::{base64_url_decode, base64_url_encode},
    BoxError, HasJwkKid, JwkPublic, SignatureVerifier, Signer, SigningAlgorithm,
    SIGNING_ALG_ES256,
};

/// NIST P-256, which openssl calls `prime256v1`.
const P256: Nid = Nid::X9_62_PRIME256V1;
const P256_CRV: &str = "P-256";
const EC_KTY: &str = "EC";

/// Byte length of a P-256 field element: each coordinate of a public key, and
/// each of the `r` and `s` halves of a signature.
const FIELD_LEN: usize = 32;

/// Error in ES256 key material, or in openssl while handling it.
#[derive(strum_macros::Display, Debug, PartialEq, Clone)]
pub enum CryptoError {
    /// A fresh key could not be generated.
    #[strum(to_string = "Could not generate a P-256 key")]
    KeyGeneration,

    /// The private key is not a PEM encoded P-256 key.
    #[strum(to_string = "Invalid P-256 private key")]
    InvalidPrivateKey,

    /// The key set entry is not a P-256 public key usable with `ES256`.
    #[strum(to_string = "Invalid ES256 public key: {0}")]
    InvalidPublicKey(String),

    /// openssl failed unexpectedly.
    #[strum(to_string = "Crypto backend failed")]
    Backend,
}

impl BhError for CryptoError {}

type CryptoResult<T> = bherror::Result<T, CryptoError>;

fn p256() -> CryptoResult<EcGroup> {
    EcGroup::from_curve_name(P256).foreign_err(|| CryptoError::Backend)
}

fn field_bytes(value: &BigNumRef) -> CryptoResult<Vec<u8>> {
    value
        .to_vec_padded(FIELD_LEN as i32)
        .foreign_err(|| CryptoError::Backend)
}

/// Issuer-side [`Signer`] for `ES256`, holding a P-256 private key and the
/// `kid` under which its public key is published.
pub struct Es256Signer {
    key: EcKey<Private>,
    kid: String,
}

impl Es256Signer {
    /// Generates a fresh P-256 key, to be published under `kid`.
    pub fn generate(kid: String) -> CryptoResult<Self> {
        let group = p256()?;
        let key = EcKey::generate(&group).foreign_err(|| CryptoError::KeyGeneration)?;

        Ok(Self { key, kid })
    }

    /// Loads a PEM encoded P-256 private key, to be published under `kid`.
    pub fn from_private_key_pem(kid: String, pem: &[u8]) -> CryptoResult<Self> {
        let key = EcKey::private_key_from_pem(pem).foreign_err(|| CryptoError::InvalidPrivateKey)?;

        if key.group().curve_name() != Some(P256) {
            return Err(Error::root(CryptoError::InvalidPrivateKey))
                .ctx(|| "key is not on the P-256 curve");
        }

        Ok(Self { key, kid })
    }

    /// The public key in the form an issuer lists it in its
    /// `.well-known/jwks.json` key set.
    pub fn public_jwk(&self) -> CryptoResult<JwkPublic> {
        let mut x = BigNum::new().foreign_err(|| CryptoError::Backend)?;
        let mut y = BigNum::new().foreign_err(|| CryptoError::Backend)?;
        let mut ctx = BigNumContext::new().foreign_err(|| CryptoError::Backend)?;
        self.key
            .public_key()
            .affine_coordinates(self.key.group(), &mut x, &mut y, &mut ctx)
            .foreign_err(|| CryptoError::Backend)?;

        let members = [
            ("kty", Value::from(EC_KTY)),
            ("kid", Value::from(self.kid.as_str())),
            ("use", Value::from("sig")),
            ("alg", Value::from(SIGNING_ALG_ES256)),
            ("crv", Value::from(P256_CRV)),
            ("x", Value::from(base64_url_encode(field_bytes(&x)?))),
            ("y", Value::from(base64_url_encode(field_bytes(&y)?))),
        ];

        Ok(members
            .into_iter()
            .map(|(name, value)| (name.to_owned(), value))
            .collect())
    }
}

impl Signer for Es256Signer {
    fn algorithm(&self) -> SigningAlgorithm {
        SigningAlgorithm::Es256
    }

    fn sign(&self, message: &[u8]) -> Result<Vec<u8>, BoxError> {
        let signature = EcdsaSig::sign(&sha256(message), &self.key)?;

        // JWS wants `r || s`, not DER
        let mut jws_signature = field_bytes(signature.r())?;
        jws_signature.extend(field_bytes(signature.s())?);
        Ok(jws_signature)
    }
}

impl HasJwkKid for Es256Signer {
    fn jwk_kid(&self) -> &str {
        &self.kid
    }
}

/// [`SignatureVerifier`] for `ES256` signatures, taking the public key from an
/// issuer key set entry.
///
/// Key material which is not a P-256 public key (other `kty`, `crv` or
/// `alg`, malformed coordinates, a point off the curve) is reported as an
/// error, as is a signature which is not 64 bytes long.
#[derive(Debug, Default, Clone, Copy)]
pub struct Es256Verifier;

impl SignatureVerifier for Es256Verifier {
    fn algorithm(&self) -> SigningAlgorithm {
        SigningAlgorithm::Es256
    }

    fn verify(
        &self,
        message: &[u8],
        signature: &[u8],
        public_key: &JwkPublic,
    ) -> Result<bool, BoxError> {
        let public_key = EcPublicJwk::parse(public_key)?.to_ec_key()?;

        if signature.len() != 2 * FIELD_LEN {
            return Err(format!(
                "ES256 signature must have {} bytes, but has {}",
                2 * FIELD_LEN,
                signature.len()
            )
            .into());
        }
        let (r, s) = signature.split_at(FIELD_LEN);
        let signature =
            EcdsaSig::from_private_components(BigNum::from_slice(r)?, BigNum::from_slice(s)?)?;

        Ok(signature.verify(&sha256(message), &public_key)?)
    }
}

/// The members of a key set entry needed to rebuild an EC public key.
#[derive(Deserialize)]
struct EcPublicJwk {
    kty: String,
    crv: String,
    alg: Option<String>,
    x: String,
    y: String,
}

impl EcPublicJwk {
    fn parse(jwk: &JwkPublic) -> CryptoResult<Self> {
        serde_json::from_value(Value::Object(jwk.clone()))
            .match_foreign_err(|error| CryptoError::InvalidPublicKey(error.to_string()))
    }

    fn to_ec_key(&self) -> CryptoResult<EcKey<Public>> {
        expect_member("kty", &self.kty, EC_KTY)?;
        expect_member("crv", &self.crv, P256_CRV)?;
        if let Some(alg) = &self.alg {
            expect_member("alg", alg, SIGNING_ALG_ES256)?;
        }

        let x = coordinate("x", &self.x)?;
        let y = coordinate("y", &self.y)?;

        // openssl rejects points which are not on the curve
        let group = p256()?;
        EcKey::from_public_key_affine_coordinates(&group, &x, &y).foreign_err(|| {
            CryptoError::InvalidPublicKey("point is not on the P-256 curve".to_owned())
        })
    }
}

fn expect_member(name: &str, value: &str, expected: &str) -> CryptoResult<()> {
    if value == expected {
        return Ok(());
    }

    Err(Error::root(CryptoError::InvalidPublicKey(format!(
        "`{name}` must be \"{expected}\""
    ))))
    .ctx(|| format!("`{name}` is \"{value}\""))
}

fn coordinate(name: &str, encoded: &str) -> CryptoResult<BigNum> {
    let invalid = || CryptoError::InvalidPublicKey(format!("`{name}` is not a P-256 coordinate"));

    let bytes = base64_url_decode(encoded).foreign_err(|| invalid())?;
    if bytes.len() != FIELD_LEN {
        return Err(Error::root(invalid())).ctx(|| format!("coordinate has {} bytes", bytes.len()));
    }

    BigNum::from_slice(&bytes).foreign_err(|| CryptoError::Backend)
}
