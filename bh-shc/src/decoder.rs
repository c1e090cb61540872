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

//! This module provides the [`ShcDecoder`] type, running the whole pipeline
//! from scanned QR payloads to verified facts.

use bherror::traits::ForeignError as _;

use crate::{
    fhir::{extract_facts, Fact},
    inflate::inflate_payload,
    jws::CompactJws,
    lookup::{CachingKeySetLookup, HttpsKeySetLookup, KeySetLookup, ReqwestGetClient},
    numeric::assemble,
    verifier::{verify_signature, VerificationResult},
    DecoderConfig, Error, Es256Verifier, Result,
};

/// A decoded and verified SMART Health Card.
#[derive(Debug, Clone, PartialEq)]
pub struct HealthCard {
    /// Issuer and key which verified the card.
    pub verification: VerificationResult,
    /// Facts of the card bundle, in entry order.
    pub facts: Vec<Fact>,
}

/// Decoder of SMART Health Cards.
///
/// The pipeline is sequential: QR payloads are assembled into the signed
/// token, the token is split and its payload decompressed, the signature is
/// verified with a key fetched through the [`KeySetLookup`], and the facts
/// are extracted from the verified bundle. The first failure aborts the
/// pipeline and nothing is returned for the card.
pub struct ShcDecoder<L: KeySetLookup> {
    config: DecoderConfig,
    lookup: L,
    verifier: Es256Verifier,
}

/// [`ShcDecoder`] fetching issuer key sets over HTTPS, with caching.
pub type HttpsShcDecoder = ShcDecoder<CachingKeySetLookup<HttpsKeySetLookup<ReqwestGetClient>>>;

impl<L: KeySetLookup> ShcDecoder<L> {
    /// Construct a decoder using the given key set `lookup`.
    ///
    /// Only [`DecoderConfig::max_payload_size`] is applied here. The other
    /// fields are properties of the `lookup`, see
    /// [`HttpsShcDecoder::with_https_lookup`].
    pub fn new(config: DecoderConfig, lookup: L) -> Self {
        Self {
            config,
            lookup,
            verifier: Es256Verifier,
        }
    }

    /// The configuration of this decoder.
    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    /// The key set lookup of this decoder.
    pub fn lookup(&self) -> &L {
        &self.lookup
    }

    /// Decodes and verifies the card from its QR payloads, given in scan
    /// order.
    ///
    /// # Errors
    ///
    /// The variant of the returned [`Error`] reports the kind of the failure.
    /// No network request is made for cards rejected before the signature
    /// verification step.
    pub async fn decode<S: AsRef<str>>(&self, scanned: &[S]) -> Result<HealthCard> {
        let token = assemble(scanned)?;

        let jws = CompactJws::parse(&token)?;

        let payload = inflate_payload(&jws.header, &jws.payload, self.config.max_payload_size)?;

        let (verification, payload) =
            verify_signature(&jws, payload, &self.lookup, &self.verifier).await?;

        let facts = extract_facts(&payload)?;

        tracing::info!(
            iss = %verification.issuer,
            kid = %verification.kid,
            facts = facts.len(),
            "decoded health card"
        );

        Ok(HealthCard {
            verification,
            facts,
        })
    }
}

impl HttpsShcDecoder {
    /// Construct a decoder fetching key sets from the issuers over HTTPS.
    ///
    /// The HTTP client is built with the timeout and `User-Agent` of the
    /// `config`. Key set responses are capped at
    /// [`DecoderConfig::max_key_set_size`], and the fetched key sets are cached
    /// within [`DecoderConfig::key_set_cache_capacity`] and
    /// [`DecoderConfig::key_set_cache_ttl`].
    pub fn with_https_lookup(config: DecoderConfig) -> Result<Self> {
        let client = ReqwestGetClient::from_config(&config)
            .foreign_err(|| Error::Network("could not build HTTP client".to_owned()))?;

        let https = HttpsKeySetLookup::new(client)
            .allow_insecure_issuer(config.allow_insecure_issuer)
            .max_key_set_size(config.max_key_set_size);
        let lookup = CachingKeySetLookup::new(https, config.max_concurrent_fetches)
            .cache_limits(config.key_set_cache_capacity, config.key_set_cache_ttl);

        Ok(Self::new(config, lookup))
    }
}
