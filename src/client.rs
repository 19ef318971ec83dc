// src/client.rs

use crate::context::Context;
use crate::error::ResolutionError;
use crate::model::{JsonWebKeySet, OidcDiscoveryDocument};
use moka::future::Cache;
use moka::Expiry;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, instrument};
use url::Url;

/// Resolved URIs are kept for a day unless the provider says otherwise.
pub const DEFAULT_DISCOVERY_CACHE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// A client for OIDC discovery and remote JWKS documents.
///
/// Resolved JWKS URIs are cached per issuer, honoring the `Cache-Control`
/// header of the discovery response.
#[derive(Clone)]
pub struct DiscoveryClient {
    // The client is internally ref-counted to allow for cheap cloning.
    inner: Arc<Inner>,
}

struct Inner {
    http_client: reqwest::Client,
    default_cache_ttl: Duration,
    // Cache stores `issuer` -> resolved JWKS URI.
    uri_cache: Cache<String, CachedUri>,
}

#[derive(Clone)]
struct CachedUri {
    uri: Url,
    ttl: Duration,
}

struct PerEntryTtl;

impl Expiry<String, CachedUri> for PerEntryTtl {
    fn expire_after_create(
        &self,
        _issuer: &String,
        value: &CachedUri,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

impl DiscoveryClient {
    pub fn new(default_cache_ttl: Duration) -> Self {
        Self::with_http_client(reqwest::Client::new(), default_cache_ttl)
    }

    /// Uses a caller supplied `reqwest::Client` (proxies, TLS roots, timeouts).
    pub fn with_http_client(http_client: reqwest::Client, default_cache_ttl: Duration) -> Self {
        let uri_cache = Cache::builder()
            .max_capacity(1_000)
            .expire_after(PerEntryTtl)
            .build();
        Self {
            inner: Arc::new(Inner {
                http_client,
                default_cache_ttl,
                uri_cache,
            }),
        }
    }

    /// Returns the JWKS URI advertised by `issuer`'s discovery document.
    ///
    /// The document is fetched from `{issuer}/.well-known/openid-configuration`
    /// on a cache miss. Its `issuer` member must match the requested issuer.
    #[instrument(skip(self, ctx), err)]
    pub async fn discover_jwks_uri(
        &self,
        ctx: &Context,
        issuer: &str,
    ) -> Result<Url, ResolutionError> {
        if let Some(cached) = self.inner.uri_cache.get(issuer).await {
            debug!("Discovery cache hit for issuer: {}", issuer);
            return Ok(cached.uri);
        }

        debug!("Discovery cache miss for issuer: {}. Fetching from provider.", issuer);
        let discovery_url = well_known_url(issuer, "openid-configuration")?;

        let (document, ttl) = ctx
            .run(async {
                let response = self
                    .inner
                    .http_client
                    .get(discovery_url.clone())
                    .send()
                    .await?;
                let response = check_status(response)?;
                let ttl = parse_cache_control(&response).unwrap_or(self.inner.default_cache_ttl);
                let document: OidcDiscoveryDocument = read_json(response).await?;
                Ok::<_, ResolutionError>((document, ttl))
            })
            .await?;

        if trim_slash(&document.issuer) != trim_slash(issuer) {
            return Err(ResolutionError::IssuerMismatch {
                expected: issuer.to_string(),
                actual: document.issuer,
            });
        }

        let jwks_uri = Url::parse(&document.jwks_uri).map_err(|e| ResolutionError::InvalidUri {
            issuer: issuer.to_string(),
            reason: e.to_string(),
        })?;
        debug!("Discovered JWKS URI: {} (cached for {:?})", jwks_uri, ttl);

        if !ttl.is_zero() {
            self.inner
                .uri_cache
                .insert(
                    issuer.to_string(),
                    CachedUri {
                        uri: jwks_uri.clone(),
                        ttl,
                    },
                )
                .await;
        }
        Ok(jwks_uri)
    }

    /// Fetches a JWKS document.
    #[instrument(skip(self, ctx, uri), fields(uri = %uri), err)]
    pub async fn fetch_jwks(&self, ctx: &Context, uri: &Url) -> Result<JsonWebKeySet, ResolutionError> {
        let jwks: JsonWebKeySet = ctx
            .run(async {
                let response = self.inner.http_client.get(uri.clone()).send().await?;
                read_json::<JsonWebKeySet>(check_status(response)?).await
            })
            .await?;
        debug!("Fetched {} keys", jwks.keys.len());
        Ok(jwks)
    }

    /// Drops every cached discovery result.
    pub fn invalidate_all(&self) {
        self.inner.uri_cache.invalidate_all();
    }
}

/// Builds `{issuer}/.well-known/{suffix}`, keeping any path on the issuer.
pub(crate) fn well_known_url(issuer: &str, suffix: &str) -> Result<Url, ResolutionError> {
    let raw = format!("{}/.well-known/{}", trim_slash(issuer), suffix);
    let url = Url::parse(&raw).map_err(|e| ResolutionError::InvalidUri {
        issuer: issuer.to_string(),
        reason: e.to_string(),
    })?;
    if url.cannot_be_a_base() {
        return Err(ResolutionError::InvalidUri {
            issuer: issuer.to_string(),
            reason: "issuer is not a hierarchical URL".to_string(),
        });
    }
    Ok(url)
}

fn trim_slash(value: &str) -> &str {
    value.trim_end_matches('/')
}

fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ResolutionError> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(ResolutionError::UnexpectedStatus {
            uri: response.url().to_string(),
            status: status.as_u16(),
        })
    }
}

/// Reads the body and decodes it as JSON. A body that does not decode is an
/// `InvalidDocument`, not a transport failure.
async fn read_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ResolutionError> {
    let uri = response.url().to_string();
    let body = response.bytes().await?;
    serde_json::from_slice(&body).map_err(|e| ResolutionError::InvalidDocument {
        uri,
        reason: e.to_string(),
    })
}

/// Parses the `Cache-Control` header to determine the TTL.
///
/// `no-store` and `no-cache` yield a zero TTL wherever they appear.
fn parse_cache_control(response: &reqwest::Response) -> Option<Duration> {
    let header = response
        .headers()
        .get(reqwest::header::CACHE_CONTROL)?
        .to_str()
        .ok()?;
    parse_cache_control_value(header)
}

fn parse_cache_control_value(header: &str) -> Option<Duration> {
    let directives: Vec<String> = header
        .split(',')
        .map(|part| part.trim().to_ascii_lowercase())
        .collect();
    if directives
        .iter()
        .any(|directive| directive == "no-store" || directive == "no-cache")
    {
        return Some(Duration::ZERO);
    }
    directives.iter().find_map(|directive| {
        directive
            .strip_prefix("max-age=")?
            .parse::<u64>()
            .ok()
            .map(Duration::from_secs)
    })
}
