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

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default upper bound of the decompressed payload, in bytes.
pub const DEFAULT_MAX_PAYLOAD_SIZE: usize = 256 * 1024;

/// Default timeout of the issuer key set fetch.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(5);

/// Default number of key set fetches allowed in flight at once when using
/// [`CachingKeySetLookup`](crate::CachingKeySetLookup).
pub const DEFAULT_MAX_CONCURRENT_FETCHES: usize = 4;

/// Default upper bound of an issuer key set response body, in bytes.
pub const DEFAULT_MAX_KEY_SET_SIZE: usize = 64 * 1024;

/// Default number of issuer key sets kept by
/// [`CachingKeySetLookup`](crate::CachingKeySetLookup).
pub const DEFAULT_KEY_SET_CACHE_CAPACITY: u64 = 1000;

/// Default time a cached issuer key set is used before it is fetched again.
pub const DEFAULT_KEY_SET_CACHE_TTL: Duration = Duration::from_secs(300);

/// `User-Agent` sent with every key set request.
pub const DEFAULT_USER_AGENT: &str = concat!("bh-shc/", env!("CARGO_PKG_VERSION"));

/// Tunables of the [`ShcDecoder`](crate::ShcDecoder).
///
/// All fields have sensible defaults, so a service embedding the decoder can
/// deserialize a partial configuration and rely on [`Default`] for the rest.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct DecoderConfig {
    /// Maximum size of the decompressed payload.
    ///
    /// The payload is decompressed before its signature can be checked, so
    /// this bound is what stands between an unverified QR code and an
    /// arbitrarily large allocation.
    pub max_payload_size: usize,

    /// Timeout of the whole key set request, connection included.
    #[serde(with = "duration_secs")]
    pub fetch_timeout: Duration,

    /// `User-Agent` header value identifying this client to issuers.
    pub user_agent: String,

    /// Accept `http` issuers. Only meant for local testing.
    pub allow_insecure_issuer: bool,

    /// Number of permits of the key set fetch pool.
    pub max_concurrent_fetches: usize,

    /// Maximum size of an issuer key set response body.
    ///
    /// The key set location is derived from the unverified `iss` claim.
    pub max_key_set_size: usize,

    /// Maximum number of issuers whose key sets are cached.
    pub key_set_cache_capacity: u64,

    /// Time after which a cached key set expires, so that keys added by an
    /// issuer are picked up.
    #[serde(with = "duration_secs")]
    pub key_set_cache_ttl: Duration,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            allow_insecure_issuer: false,
            max_concurrent_fetches: DEFAULT_MAX_CONCURRENT_FETCHES,
            max_key_set_size: DEFAULT_MAX_KEY_SET_SIZE,
            key_set_cache_capacity: DEFAULT_KEY_SET_CACHE_CAPACITY,
            key_set_cache_ttl: DEFAULT_KEY_SET_CACHE_TTL,
        }
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S: Serializer>(
        value: &Duration,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn partial_config_falls_back_to_defaults() {
        let config: DecoderConfig = serde_json::from_value(json!({
            "max_payload_size": 1024,
            "fetch_timeout": 1.5,
            "key_set_cache_ttl": 60,
        }))
        .unwrap();

        assert_eq!(config.max_payload_size, 1024);
        assert_eq!(config.fetch_timeout, Duration::from_millis(1500));
        assert_eq!(config.user_agent, DEFAULT_USER_AGENT);
        assert!(!config.allow_insecure_issuer);
        assert_eq!(config.max_concurrent_fetches, DEFAULT_MAX_CONCURRENT_FETCHES);
        assert_eq!(config.max_key_set_size, DEFAULT_MAX_KEY_SET_SIZE);
        assert_eq!(config.key_set_cache_capacity, DEFAULT_KEY_SET_CACHE_CAPACITY);
        assert_eq!(config.key_set_cache_ttl, Duration::from_secs(60));
    }

    #[test]
    fn negative_timeout_is_rejected() {
        let error = serde_json::from_value::<DecoderConfig>(json!({ "fetch_timeout": -1.0 }));

        assert!(error.is_err());
    }
}
