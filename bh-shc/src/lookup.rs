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

//! Contains implementations for issuer key set lookup strategies.
//!
//! * [`HttpsKeySetLookup`] fetches the key set from the issuer's well-known
//!   location.
//! * [`CachingKeySetLookup`] wraps any [`KeySetLookup`] with a per-issuer
//!   cache and a bounded fetch pool.
//!
//! <https://spec.smarthealth.cards/#determining-keys-associated-with-an-issuer>

use std::{future::Future, sync::Arc, time::Duration};

use bherror::traits::{ErrorContext as _, ForeignError as _};
use iref::Uri;
use moka::future::Cache;
use reqwest::{Client, ClientBuilder};
use tokio::sync::Semaphore;

use crate::{
    DecoderConfig, Error, FormatError, JwkSet, Result, DEFAULT_KEY_SET_CACHE_CAPACITY,
    DEFAULT_KEY_SET_CACHE_TTL, DEFAULT_MAX_KEY_SET_SIZE,
};

/// Path appended to the issuer URL to locate its key set.
pub const JWKS_URL_SUFFIX: &str = "/.well-known/jwks.json";

/// Strategy for obtaining the key set published by an issuer.
pub trait KeySetLookup: Sync {
    /// Fetches the key set of the `alleged_iss` issuer.
    ///
    /// The issuer is taken from the **unverified** payload, so implementations
    /// must treat it as untrusted input.
    fn fetch_key_set(&self, alleged_iss: &str) -> impl Future<Output = Result<JwkSet>> + Send;
}

/// HTTP GET transport of the [`HttpsKeySetLookup`].
///
/// The key set URL is derived from the unverified `iss` claim, so embedders
/// may plug in a client restricting the reachable hosts, e.g. to a list of
/// trusted issuers.
pub trait HttpGetClient: Sync {
    /// Transport error of the client.
    type Err: std::error::Error + Send + Sync + 'static;
    /// Sends a GET request to `url`.
    fn get(
        &self,
        url: &str,
    ) -> impl Future<Output = std::result::Result<reqwest::Response, Self::Err>> + Send;
}

/// [`HttpGetClient`] backed by a [`reqwest`] client.
pub struct ReqwestGetClient(Client);

impl ReqwestGetClient {
    /// Wraps an already configured [`Client`].
    pub fn new(client: Client) -> Self {
        Self(client)
    }

    /// Builds the wrapped [`Client`] from `builder`.
    pub fn from_builder(builder: ClientBuilder) -> reqwest::Result<Self> {
        Ok(ReqwestGetClient(builder.build()?))
    }

    /// Construct [`ReqwestGetClient`] with the timeout and `User-Agent` of the
    /// given `config`.
    ///
    /// The timeout covers the whole request, from connecting until the body
    /// has been read.
    pub fn from_config(config: &DecoderConfig) -> reqwest::Result<Self> {
        Self::from_builder(
            Client::builder()
                .timeout(config.fetch_timeout)
                .user_agent(config.user_agent.as_str()),
        )
    }
}

impl HttpGetClient for ReqwestGetClient {
    type Err = reqwest::Error;

    fn get(&self, url: &str) -> impl Future<Output = reqwest::Result<reqwest::Response>> {
        self.0.get(url).send()
    }
}

/// Key set lookup over HTTPS, from `<iss>/.well-known/jwks.json`.
///
/// Lookup requires a [`HttpGetClient`] that provides the functionality of
/// sending HTTP GET request to retrieve the key set.
pub struct HttpsKeySetLookup<C: HttpGetClient> {
    client: C,
    allow_insecure_issuer: bool,
    max_key_set_size: usize,
}

impl<C: HttpGetClient> HttpsKeySetLookup<C> {
    /// Construct [`HttpsKeySetLookup`] from a [`HttpGetClient`].
    ///
    /// Only `https` issuers are accepted.
    pub fn new(client: C) -> Self {
        HttpsKeySetLookup {
            client,
            allow_insecure_issuer: false,
            max_key_set_size: DEFAULT_MAX_KEY_SET_SIZE,
        }
    }

    /// Rejects key set responses larger than `max_key_set_size` bytes.
    pub fn max_key_set_size(mut self, max_key_set_size: usize) -> Self {
        self.max_key_set_size = max_key_set_size;
        self
    }

    /// Also accept `http` issuers. Only meant for local testing.
    pub fn allow_insecure_issuer(mut self, allow: bool) -> Self {
        if allow {
            tracing::warn!("key sets of `http` issuers will be accepted");
        }
        self.allow_insecure_issuer = allow;
        self
    }
}

impl<C: HttpGetClient> KeySetLookup for HttpsKeySetLookup<C> {
    async fn fetch_key_set(&self, alleged_iss: &str) -> Result<JwkSet> {
        let iss = check_valid_iss(alleged_iss, self.allow_insecure_issuer)?;
        let url = url_from_iss(iss)?;

        tracing::debug!(%url, "fetching issuer key set");

        let mut response = self
            .client
            .get(url.as_str())
            .await
            .foreign_err(|| Error::Network("could not get issuer key set".to_owned()))
            .ctx(|| format!("GET {url}"))?;

        let status = response.status();
        if !status.is_success() {
            return Err(bherror::Error::root(Error::Network(format!(
                "key set response status code was {status}"
            ))))
            .ctx(|| format!("GET {url}"));
        }

        let too_large = || FormatError::KeySetTooLarge(self.max_key_set_size).root();
        if response
            .content_length()
            .is_some_and(|length| length > self.max_key_set_size as u64)
        {
            return Err(too_large()).ctx(|| format!("GET {url}"));
        }

        let mut body = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .foreign_err(|| Error::Network("could not read issuer key set".to_owned()))?
        {
            if body.len() + chunk.len() > self.max_key_set_size {
                return Err(too_large()).ctx(|| format!("GET {url}"));
            }
            body.extend_from_slice(&chunk);
        }

        let key_set: JwkSet = serde_json::from_slice(&body).match_foreign_err(|error| {
            Error::Format(FormatError::InvalidKeySet(error.to_string()))
        })?;

        tracing::debug!(keys = key_set.keys().len(), "fetched issuer key set");

        Ok(key_set)
    }
}

/// Checks that `alleged_iss` is a URI which can be used to locate a key set.
///
/// The scheme must be `https`, unless `allow_insecure` is set in which case
/// `http` is accepted as well. A host is required, and query and fragment
/// parts are never allowed.
pub fn check_valid_iss(alleged_iss: &str, allow_insecure: bool) -> Result<&Uri> {
    let invalid = || FormatError::InvalidIssuer(alleged_iss.to_owned()).root();

    let Ok(uri): std::result::Result<&Uri, _> = alleged_iss.try_into() else {
        return Err(invalid()).ctx(|| "iss is not a valid URI");
    };

    let scheme = uri.scheme().as_str();
    if scheme != "https" && !(allow_insecure && scheme == "http") {
        return Err(invalid()).ctx(|| format!("iss uri scheme should be https, but is {scheme}"));
    }

    if uri
        .authority()
        .map_or(true, |authority| authority.host().as_str().is_empty())
    {
        return Err(invalid()).ctx(|| "iss uri should have a host");
    }

    if uri.query().is_some() || uri.fragment().is_some() {
        return Err(invalid()).ctx(|| "iss uri should not contain query or fragment parts");
    }

    Ok(uri)
}

/// Builds the key set URL of the issuer.
///
/// A trailing `/` of the issuer is dropped, so that the suffix is not
/// appended as an empty path segment.
pub fn url_from_iss(iss: &Uri) -> Result<reqwest::Url> {
    let url = format!("{}{JWKS_URL_SUFFIX}", iss.as_str().trim_end_matches('/'));

    reqwest::Url::parse(&url)
        .foreign_err(|| Error::Format(FormatError::InvalidIssuer(iss.as_str().to_owned())))
}

/// [`KeySetLookup`] decorator caching the fetched key sets per issuer.
///
/// At most `max_concurrent_fetches` fetches of the wrapped lookup are in
/// flight at once. Concurrent lookups of the same issuer share a single fetch.
///
/// The issuer comes from the unverified payload, so the cache is bounded: it
/// keeps at most [`DEFAULT_KEY_SET_CACHE_CAPACITY`] issuers by default, and
/// failed fetches leave no entry behind. Cached key sets expire after
/// [`DEFAULT_KEY_SET_CACHE_TTL`], so keys added by an issuer are picked up.
/// Both limits can be changed with [`CachingKeySetLookup::cache_limits`].
pub struct CachingKeySetLookup<L: KeySetLookup> {
    inner: L,
    cache: Cache<String, JwkSet>,
    permits: Semaphore,
}

impl<L: KeySetLookup> CachingKeySetLookup<L> {
    /// Wraps `inner`, allowing `max_concurrent_fetches` fetches at once.
    ///
    /// A limit of `0` is raised to `1`.
    pub fn new(inner: L, max_concurrent_fetches: usize) -> Self {
        Self {
            inner,
            cache: key_set_cache(DEFAULT_KEY_SET_CACHE_CAPACITY, DEFAULT_KEY_SET_CACHE_TTL),
            permits: Semaphore::new(max_concurrent_fetches.max(1)),
        }
    }

    /// Keeps at most `capacity` issuers, each for at most `time_to_live`.
    pub fn cache_limits(mut self, capacity: u64, time_to_live: Duration) -> Self {
        self.cache = key_set_cache(capacity, time_to_live);
        self
    }

    /// The wrapped lookup.
    pub fn inner(&self) -> &L {
        &self.inner
    }

    async fn fetch_with_permit(&self, alleged_iss: &str) -> Result<JwkSet> {
        let _permit = self
            .permits
            .acquire()
            .await
            .foreign_err(|| Error::Network("key set fetch pool is closed".to_owned()))?;

        self.inner.fetch_key_set(alleged_iss).await
    }
}

fn key_set_cache(capacity: u64, time_to_live: Duration) -> Cache<String, JwkSet> {
    Cache::builder()
        .max_capacity(capacity)
        .time_to_live(time_to_live)
        .build()
}

impl<L: KeySetLookup> KeySetLookup for CachingKeySetLookup<L> {
    async fn fetch_key_set(&self, alleged_iss: &str) -> Result<JwkSet> {
        if let Some(key_set) = self.cache.get(alleged_iss).await {
            tracing::debug!(iss = %alleged_iss, "key set cache hit");
            return Ok(key_set);
        }

        self.cache
            .try_get_with(alleged_iss.to_owned(), self.fetch_with_permit(alleged_iss))
            .await
            .map_err(unshare_error)
    }
}

// Callers waiting on the same fetch all receive its error
fn unshare_error(error: Arc<bherror::Error<Error>>) -> bherror::Error<Error> {
    Arc::try_unwrap(error).unwrap_or_else(|shared| {
        bherror::Error::root(shared.error.clone()).ctx("key set fetch shared with another lookup")
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;

    use super::*;

    struct StubClient {
        expected_url: String,
        response: http::Response<String>,
    }

    impl StubClient {
        fn new(expected_url: &str, status: u16, body: String) -> Self {
            Self {
                expected_url: expected_url.to_owned(),
                response: http::Response::builder()
                    .status(status)
                    .header("Content-Type", "application/json")
                    .body(body)
                    .unwrap(),
            }
        }
    }

    impl HttpGetClient for StubClient {
        type Err = reqwest::Error;

        async fn get(&self, url: &str) -> reqwest::Result<reqwest::Response> {
            if url != self.expected_url {
                panic!("Unexpected url: {}", url);
            }
            Ok(reqwest::Response::from(self.response.clone()))
        }
    }

    /// Lookup counting its fetches, failing for issuers containing `fail`.
    ///
    /// The `n`-th fetch serves a single key with `kid` `key-<n>`, as if the
    /// issuer rotated its key between fetches.
    #[derive(Default)]
    pub(crate) struct CountingLookup {
        pub(crate) fetches: AtomicUsize,
    }

    impl KeySetLookup for CountingLookup {
        async fn fetch_key_set(&self, alleged_iss: &str) -> Result<JwkSet> {
            let fetch = self.fetches.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::task::yield_now().await;

            if alleged_iss.contains("fail") {
                return Err(bherror::Error::root(Error::Network("stub".to_owned())));
            }

            let key = json!({"kty": "EC", "kid": format!("key-{fetch}")});
            Ok(JwkSet::try_from(vec![key.as_object().unwrap().clone()]).unwrap())
        }
    }

    /// Client whose requests never reach the issuer.
    struct UnreachableClient;

    impl HttpGetClient for UnreachableClient {
        type Err = std::io::Error;

        async fn get(&self, _url: &str) -> std::result::Result<reqwest::Response, Self::Err> {
            Err(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "connection timed out",
            ))
        }
    }

    fn key_set_body() -> String {
        json!({"keys": [{
            "kty": "EC",
            "kid": "3Kfdg-XwP-7gXyywtUfUADwBumDOPKMQx-iELL11W9s",
            "use": "sig",
            "alg": "ES256",
            "crv": "P-256",
            "x": "11XvRWy1I2S0EyJlyf_bWfw_TQ5CJJNLw78bHXNxcgw",
            "y": "eZXwxvO1hvCY0KucrPfKo7yAyMT6Ajc3N7OkAB6VYy8"
        }]})
        .to_string()
    }

    fn format_error(result: Result<JwkSet>) -> FormatError {
        match result.unwrap_err().error {
            Error::Format(error) => error,
            other => panic!("expected a format error, got {other}"),
        }
    }

    #[tokio::test]
    async fn fetches_key_set_from_well_known_location() {
        let lookup = HttpsKeySetLookup::new(StubClient::new(
            "https://issuer.example/.well-known/jwks.json",
            200,
            key_set_body(),
        ));

        let key_set = lookup
            .fetch_key_set("https://issuer.example")
            .await
            .unwrap();

        assert!(key_set
            .index_by_kid()
            .contains_key("3Kfdg-XwP-7gXyywtUfUADwBumDOPKMQx-iELL11W9s"));
    }

    #[tokio::test]
    async fn issuer_path_is_kept() {
        let lookup = HttpsKeySetLookup::new(StubClient::new(
            "https://issuer.example/shc/v1/.well-known/jwks.json",
            200,
            key_set_body(),
        ));

        assert!(lookup
            .fetch_key_set("https://issuer.example/shc/v1/")
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn non_success_status_is_network_error() {
        let lookup = HttpsKeySetLookup::new(StubClient::new(
            "https://issuer.example/.well-known/jwks.json",
            404,
            "not found".to_owned(),
        ));

        let error = lookup
            .fetch_key_set("https://issuer.example")
            .await
            .unwrap_err();

        assert!(matches!(error.error, Error::Network(_)));
    }

    #[tokio::test]
    async fn transport_failure_is_network_error() {
        let error = HttpsKeySetLookup::new(UnreachableClient)
            .fetch_key_set("https://issuer.example")
            .await
            .unwrap_err();

        assert!(matches!(error.error, Error::Network(_)));
    }

    #[tokio::test]
    async fn oversized_key_set_is_rejected() {
        let body = key_set_body();
        let limit = body.len() - 1;
        let lookup = HttpsKeySetLookup::new(StubClient::new(
            "https://issuer.example/.well-known/jwks.json",
            200,
            body,
        ))
        .max_key_set_size(limit);

        assert_eq!(
            format_error(lookup.fetch_key_set("https://issuer.example").await),
            FormatError::KeySetTooLarge(limit)
        );
    }

    #[tokio::test]
    async fn key_set_at_size_limit_is_accepted() {
        let body = key_set_body();
        let limit = body.len();
        let lookup = HttpsKeySetLookup::new(StubClient::new(
            "https://issuer.example/.well-known/jwks.json",
            200,
            body,
        ))
        .max_key_set_size(limit);

        assert!(lookup.fetch_key_set("https://issuer.example").await.is_ok());
    }

    #[tokio::test]
    async fn malformed_body_is_format_error() {
        for body in [
            "not json".to_owned(),
            json!({"jwks": []}).to_string(),
            json!({"keys": [{"kid": "a"}, {"kid": "a"}]}).to_string(),
            json!({"keys": [{"kty": "EC"}]}).to_string(),
        ] {
            let lookup = HttpsKeySetLookup::new(StubClient::new(
                "https://issuer.example/.well-known/jwks.json",
                200,
                body,
            ));

            assert!(matches!(
                format_error(lookup.fetch_key_set("https://issuer.example").await),
                FormatError::InvalidKeySet(_)
            ));
        }
    }

    #[tokio::test]
    async fn insecure_issuer_is_rejected_by_default() {
        let client = || {
            StubClient::new(
                "http://localhost:8080/.well-known/jwks.json",
                200,
                key_set_body(),
            )
        };

        assert_eq!(
            format_error(
                HttpsKeySetLookup::new(client())
                    .fetch_key_set("http://localhost:8080")
                    .await
            ),
            FormatError::InvalidIssuer("http://localhost:8080".to_owned())
        );

        assert!(HttpsKeySetLookup::new(client())
            .allow_insecure_issuer(true)
            .fetch_key_set("http://localhost:8080")
            .await
            .is_ok());
    }

    #[test]
    fn invalid_issuers_are_rejected() {
        for iss in [
            "issuer.example",
            "not a uri",
            "ftp://issuer.example",
            "https://issuer.example?kid=1",
            "https://issuer.example#keys",
            "https:issuer.example",
            "https:///issuer.example",
        ] {
            let error = check_valid_iss(iss, true).unwrap_err();

            assert_eq!(
                error.error,
                Error::Format(FormatError::InvalidIssuer(iss.to_owned()))
            );
        }
    }

    #[tokio::test]
    async fn cache_fetches_each_issuer_once() {
        let lookup = CachingKeySetLookup::new(CountingLookup::default(), 2);

        lookup.fetch_key_set("https://a.example").await.unwrap();
        lookup.fetch_key_set("https://a.example").await.unwrap();
        lookup.fetch_key_set("https://b.example").await.unwrap();

        assert_eq!(lookup.inner().fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn concurrent_lookups_share_a_fetch() {
        let lookup = CachingKeySetLookup::new(CountingLookup::default(), 4);

        let (first, second) = tokio::join!(
            lookup.fetch_key_set("https://a.example"),
            lookup.fetch_key_set("https://a.example")
        );

        assert!(first.is_ok() && second.is_ok());
        assert_eq!(lookup.inner().fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_fetch_is_not_cached() {
        let lookup = CachingKeySetLookup::new(CountingLookup::default(), 1);

        assert!(lookup.fetch_key_set("https://fail.example").await.is_err());
        assert!(lookup.fetch_key_set("https://fail.example").await.is_err());

        assert_eq!(lookup.inner().fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failed_fetches_leave_no_entries() {
        let lookup = CachingKeySetLookup::new(CountingLookup::default(), 4);

        for i in 0..1000 {
            let iss = format!("https://fail{i}.example");
            assert!(lookup.fetch_key_set(&iss).await.is_err());
        }
        lookup.cache.run_pending_tasks().await;

        assert_eq!(lookup.cache.entry_count(), 0);
    }

    #[tokio::test]
    async fn cache_keeps_at_most_capacity_issuers() {
        let lookup = CachingKeySetLookup::new(CountingLookup::default(), 4)
            .cache_limits(10, Duration::from_secs(60));

        for i in 0..200 {
            let iss = format!("https://issuer{i}.example");
            lookup.fetch_key_set(&iss).await.unwrap();
        }
        lookup.cache.run_pending_tasks().await;

        assert!(lookup.cache.entry_count() <= 10);
    }

    #[tokio::test]
    async fn expired_key_set_is_fetched_again() {
        let lookup = CachingKeySetLookup::new(CountingLookup::default(), 1)
            .cache_limits(10, Duration::from_millis(500));

        let first = lookup.fetch_key_set("https://a.example").await.unwrap();
        let cached = lookup.fetch_key_set("https://a.example").await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        let refreshed = lookup.fetch_key_set("https://a.example").await.unwrap();

        assert!(first.index_by_kid().contains_key("key-1"));
        assert_eq!(cached, first);
        assert!(refreshed.index_by_kid().contains_key("key-2"));
        assert_eq!(lookup.inner().fetches.load(Ordering::SeqCst), 2);
    }
}
