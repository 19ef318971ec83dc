// src/strategy/issuer.rs

use crate::client::{well_known_url, DiscoveryClient};
use crate::config::Issuer;
use crate::context::Context;
use crate::error::{ConfigError, ResolutionError};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;

/// Finds the JWKS URI of a subject token issuer.
///
/// Implementations decide *how* (static table, well-known convention,
/// discovery). Unknown issuers must fail with
/// [`ResolutionError::UntrustedIssuer`] so the caller can reject the token
/// without retrying.
#[async_trait]
pub trait IssuerJwksUriStrategy: Send + Sync {
    async fn issuer_jwks_uri(&self, ctx: &Context, issuer: &str) -> Result<Url, ResolutionError>;
}

/// Table lookup over the configured subject token issuers.
///
/// Issuers listed without a JWKS URI are delegated to the fallback strategy,
/// if one is set.
pub struct StaticIssuerJwksUriStrategy {
    issuers: HashMap<String, Option<Url>>,
    fallback: Option<Arc<dyn IssuerJwksUriStrategy>>,
}

impl StaticIssuerJwksUriStrategy {
    pub fn new(issuers: &[Issuer]) -> Result<Self, ConfigError> {
        let mut table = HashMap::with_capacity(issuers.len());
        for issuer in issuers {
            let uri = issuer.parsed_jwks_uri()?;
            if table.insert(issuer.name.clone(), uri).is_some() {
                return Err(ConfigError::DuplicateIssuer(issuer.name.clone()));
            }
        }
        Ok(Self {
            issuers: table,
            fallback: None,
        })
    }

    pub fn with_fallback(mut self, fallback: Arc<dyn IssuerJwksUriStrategy>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn is_trusted(&self, issuer: &str) -> bool {
        self.issuers.contains_key(issuer)
    }
}

#[async_trait]
impl IssuerJwksUriStrategy for StaticIssuerJwksUriStrategy {
    async fn issuer_jwks_uri(&self, ctx: &Context, issuer: &str) -> Result<Url, ResolutionError> {
        match self.issuers.get(issuer) {
            None => {
                warn!(issuer, "Rejected subject token from untrusted issuer");
                Err(ResolutionError::UntrustedIssuer(issuer.to_string()))
            }
            Some(Some(uri)) => Ok(uri.clone()),
            Some(None) => match &self.fallback {
                Some(fallback) => {
                    debug!(issuer, "No static JWKS URI, delegating to fallback strategy");
                    fallback.issuer_jwks_uri(ctx, issuer).await
                }
                None => Err(ResolutionError::MissingJwksUri(issuer.to_string())),
            },
        }
    }
}

/// Derives `{issuer}/.well-known/jwks.json` for trusted issuers.
pub struct WellKnownIssuerJwksUriStrategy {
    trusted: HashSet<String>,
}

impl WellKnownIssuerJwksUriStrategy {
    pub fn new<I, S>(trusted: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            trusted: trusted.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl IssuerJwksUriStrategy for WellKnownIssuerJwksUriStrategy {
    async fn issuer_jwks_uri(&self, _ctx: &Context, issuer: &str) -> Result<Url, ResolutionError> {
        if !self.trusted.contains(issuer) {
            warn!(issuer, "Rejected subject token from untrusted issuer");
            return Err(ResolutionError::UntrustedIssuer(issuer.to_string()));
        }
        well_known_url(issuer, "jwks.json")
    }
}

/// Resolves trusted issuers through OIDC discovery.
pub struct DiscoveryIssuerJwksUriStrategy {
    trusted: HashSet<String>,
    client: DiscoveryClient,
}

impl DiscoveryIssuerJwksUriStrategy {
    pub fn new<I, S>(trusted: I, client: DiscoveryClient) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            trusted: trusted.into_iter().map(Into::into).collect(),
            client,
        }
    }
}

#[async_trait]
impl IssuerJwksUriStrategy for DiscoveryIssuerJwksUriStrategy {
    async fn issuer_jwks_uri(&self, ctx: &Context, issuer: &str) -> Result<Url, ResolutionError> {
        if !self.trusted.contains(issuer) {
            warn!(issuer, "Rejected subject token from untrusted issuer");
            return Err(ResolutionError::UntrustedIssuer(issuer.to_string()));
        }
        self.client.discover_jwks_uri(ctx, issuer).await
    }
}
