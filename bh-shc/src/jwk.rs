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
use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A single entry of an issuer key set.
///
/// Only the `kid` member is looked at here; the rest is interpreted by the
/// [`SignatureVerifier`](crate::SignatureVerifier) using the key.
pub type JwkPublic = Map<String, Value>;

/// The key set an issuer publishes at `<iss>/.well-known/jwks.json`.
///
/// Cards name their signing key by `kid`, so every key **MUST** carry a string
/// `kid` and no two keys may share one. Sets breaking this fail to
/// deserialize.
///
/// <https://spec.smarthealth.cards/#determining-keys-associated-with-an-issuer>
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(try_from = "RawJwkSet")]
pub struct JwkSet {
    keys: Vec<JwkPublic>,
}

/// Reason a key set is rejected.
#[derive(strum_macros::Display, Debug, PartialEq, Clone)]
pub enum KeySetError {
    /// A key has no `kid` member.
    #[strum(to_string = "key #{0} has no `kid`")]
    MissingKid(usize),

    /// A key has a `kid` member which is not a string.
    #[strum(to_string = "key #{0} has a non-string `kid`")]
    NonStringKid(usize),

    /// Two keys share a `kid`.
    #[strum(to_string = "`kid` \"{0}\" is used by more than one key")]
    DuplicateKid(String),
}

impl JwkSet {
    /// A set without keys.
    pub fn empty() -> Self {
        Self { keys: Vec::new() }
    }

    /// The keys of the set, in published order.
    pub fn keys(&self) -> &[JwkPublic] {
        &self.keys
    }

    /// Maps each `kid` to its key.
    ///
    /// The mapping is built anew on every call.
    pub fn index_by_kid(&self) -> HashMap<&str, &JwkPublic> {
        self.keys
            .iter()
            .filter_map(|key| Some((key.get("kid")?.as_str()?, key)))
            .collect()
    }
}

impl TryFrom<Vec<JwkPublic>> for JwkSet {
    type Error = KeySetError;

    fn try_from(keys: Vec<JwkPublic>) -> Result<Self, Self::Error> {
        let mut seen = HashSet::new();
        for (position, key) in keys.iter().enumerate() {
            let kid = key
                .get("kid")
                .ok_or(KeySetError::MissingKid(position))?
                .as_str()
                .ok_or(KeySetError::NonStringKid(position))?;

            if !seen.insert(kid) {
                return Err(KeySetError::DuplicateKid(kid.to_owned()));
            }
        }

        Ok(Self { keys })
    }
}

// Deserialized first, then checked by `TryFrom`
#[derive(Deserialize)]
struct RawJwkSet {
    keys: Vec<JwkPublic>,
}

impl TryFrom<RawJwkSet> for JwkSet {
    type Error = KeySetError;

    fn try_from(raw: RawJwkSet) -> Result<Self, Self::Error> {
        raw.keys.try_into()
    }
}
