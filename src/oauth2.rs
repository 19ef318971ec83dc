// src/oauth2.rs

use crate::client::{DiscoveryClient, DEFAULT_DISCOVERY_CACHE_TTL};
use crate::config::Config;
use crate::context::Context;
use crate::error::ConfigError;
use crate::keys::{load_signing_keys, KeyLoader, SigningJwks, SigningJwksProvider, SigningKey, SigningKeyProvider};
use crate::strategy::{
    ClaimMappingStrategy, DiscoveryIssuerJwksUriStrategy, IssuerJwksUriStrategy,
    PassthroughClaimMappingStrategy, StaticIssuerJwksUriStrategy, TableClaimMappingStrategy,
};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Settings read by the protocol engine itself.
#[derive(Clone)]
pub struct ProtocolConfig {
    pub access_token_issuer: String,
    pub id_token_issuer: String,
    pub access_token_lifespan: Duration,
    /// Secret for HMAC based token strategies. May be empty.
    pub global_secret: Vec<u8>,
}

impl ProtocolConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            access_token_issuer: config.issuer.clone(),
            id_token_issuer: config.issuer.clone(),
            access_token_lifespan: config.access_token_lifespan(),
            global_secret: config.secret.as_bytes().to_vec(),
        }
    }
}

impl fmt::Debug for ProtocolConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProtocolConfig")
            .field("access_token_issuer", &self.access_token_issuer)
            .field("id_token_issuer", &self.id_token_issuer)
            .field("access_token_lifespan", &self.access_token_lifespan)
            .field("global_secret", &"<redacted>")
            .finish()
    }
}

/// The configuration contract of a generic OAuth2 protocol engine.
pub trait ProtocolConfigurator {
    fn access_token_issuer(&self, ctx: &Context) -> &str;
    fn id_token_issuer(&self, ctx: &Context) -> &str;
    fn access_token_lifespan(&self, ctx: &Context) -> Duration;
    fn global_secret(&self, ctx: &Context) -> &[u8];
}

impl ProtocolConfigurator for ProtocolConfig {
    fn access_token_issuer(&self, _ctx: &Context) -> &str {
        &self.access_token_issuer
    }

    fn id_token_issuer(&self, _ctx: &Context) -> &str {
        &self.id_token_issuer
    }

    fn access_token_lifespan(&self, _ctx: &Context) -> Duration {
        self.access_token_lifespan
    }

    fn global_secret(&self, _ctx: &Context) -> &[u8] {
        &self.global_secret
    }
}

/// Provides the strategy that resolves subject token issuer JWKS URIs.
pub trait IssuerJwksUriStrategyProvider {
    fn issuer_jwks_uri_strategy(&self, ctx: &Context) -> &dyn IssuerJwksUriStrategy;
}

/// Provides the claim mapping strategy.
pub trait ClaimMappingStrategyProvider {
    fn claim_mapping_strategy(&self, ctx: &Context) -> &dyn ClaimMappingStrategy;
}

/// Everything a protocol engine needs from one object.
pub trait OAuth2Configurator:
    ProtocolConfigurator
    + IssuerJwksUriStrategyProvider
    + SigningKeyProvider
    + SigningJwksProvider
    + ClaimMappingStrategyProvider
    + Send
    + Sync
{
}

impl<T> OAuth2Configurator for T where
    T: ProtocolConfigurator
        + IssuerJwksUriStrategyProvider
        + SigningKeyProvider
        + SigningJwksProvider
        + ClaimMappingStrategyProvider
        + Send
        + Sync
{
}

/// An OAuth 2.0 provider configuration composed of injected strategies.
///
/// Immutable once built. Every accessor returns the injected value as is; to
/// rotate keys or change strategies build a new instance and swap it in
/// through [`crate::holder::ConfigHolder`].
pub struct OAuth2Config {
    protocol: ProtocolConfig,
    signing_key: Option<SigningKey>,
    signing_jwks: SigningJwks,
    issuer_jwks_uri_strategy: Arc<dyn IssuerJwksUriStrategy>,
    claim_mapping_strategy: Arc<dyn ClaimMappingStrategy>,
}

impl OAuth2Config {
    pub fn builder() -> OAuth2ConfigBuilder {
        OAuth2ConfigBuilder::new()
    }

    /// Builds the configuration from raw settings with the default strategies.
    ///
    /// Keys are loaded through `loader`. Subject token issuers listed with a
    /// JWKS URI are served from a static table; those without one are
    /// resolved through OIDC discovery. An empty claim mapping table yields a
    /// passthrough strategy.
    pub fn from_config(config: &Config, loader: &dyn KeyLoader) -> Result<Self, ConfigError> {
        config.validate()?;

        let signing_jwks = load_signing_keys(&config.private_keys, loader)?;

        let mut issuer_strategy = StaticIssuerJwksUriStrategy::new(&config.subject_token_issuers)?;
        let dynamic: Vec<&str> = config
            .subject_token_issuers
            .iter()
            .filter(|issuer| issuer.jwks_uri.is_empty())
            .map(|issuer| issuer.name.as_str())
            .collect();
        if !dynamic.is_empty() {
            issuer_strategy = issuer_strategy.with_fallback(Arc::new(
                DiscoveryIssuerJwksUriStrategy::new(
                    dynamic,
                    DiscoveryClient::new(DEFAULT_DISCOVERY_CACHE_TTL),
                ),
            ));
        }

        let claim_strategy: Arc<dyn ClaimMappingStrategy> = if config.claim_mappings.is_empty() {
            Arc::new(PassthroughClaimMappingStrategy)
        } else {
            Arc::new(TableClaimMappingStrategy::new(config.claim_mappings.clone()))
        };

        Self::builder()
            .protocol(ProtocolConfig::from_config(config))
            .signing_jwks(signing_jwks)
            .issuer_jwks_uri_strategy(Arc::new(issuer_strategy))
            .claim_mapping_strategy(claim_strategy)
            .build()
    }

    pub fn protocol(&self) -> &ProtocolConfig {
        &self.protocol
    }
}

impl fmt::Debug for OAuth2Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuth2Config")
            .field("protocol", &self.protocol)
            .field("signing_key", &self.signing_key)
            .field("signing_jwks", &self.signing_jwks.len())
            .finish_non_exhaustive()
    }
}

impl ProtocolConfigurator for OAuth2Config {
    fn access_token_issuer(&self, ctx: &Context) -> &str {
        self.protocol.access_token_issuer(ctx)
    }

    fn id_token_issuer(&self, ctx: &Context) -> &str {
        self.protocol.id_token_issuer(ctx)
    }

    fn access_token_lifespan(&self, ctx: &Context) -> Duration {
        self.protocol.access_token_lifespan(ctx)
    }

    fn global_secret(&self, ctx: &Context) -> &[u8] {
        self.protocol.global_secret(ctx)
    }
}

impl IssuerJwksUriStrategyProvider for OAuth2Config {
    fn issuer_jwks_uri_strategy(&self, _ctx: &Context) -> &dyn IssuerJwksUriStrategy {
        self.issuer_jwks_uri_strategy.as_ref()
    }
}

impl SigningKeyProvider for OAuth2Config {
    fn signing_key(&self, _ctx: &Context) -> Option<&SigningKey> {
        self.signing_key.as_ref()
    }
}

impl SigningJwksProvider for OAuth2Config {
    /// Includes private keys.
    fn signing_jwks(&self, _ctx: &Context) -> &SigningJwks {
        &self.signing_jwks
    }
}

impl ClaimMappingStrategyProvider for OAuth2Config {
    fn claim_mapping_strategy(&self, _ctx: &Context) -> &dyn ClaimMappingStrategy {
        self.claim_mapping_strategy.as_ref()
    }
}

/// A builder for creating an `OAuth2Config`.
pub struct OAuth2ConfigBuilder {
    protocol: Option<ProtocolConfig>,
    signing_key: Option<SigningKey>,
    signing_jwks: SigningJwks,
    issuer_jwks_uri_strategy: Option<Arc<dyn IssuerJwksUriStrategy>>,
    claim_mapping_strategy: Option<Arc<dyn ClaimMappingStrategy>>,
    require_signing_key: bool,
}

impl Default for OAuth2ConfigBuilder {
    fn default() -> Self {
        Self {
            protocol: None,
            signing_key: None,
            signing_jwks: SigningJwks::default(),
            issuer_jwks_uri_strategy: None,
            claim_mapping_strategy: None,
            require_signing_key: true,
        }
    }
}

impl OAuth2ConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn protocol(mut self, protocol: ProtocolConfig) -> Self {
        self.protocol = Some(protocol);
        self
    }

    /// Sets the key set. Its first key becomes the signing key unless one is
    /// set explicitly with [`OAuth2ConfigBuilder::signing_key`].
    pub fn signing_jwks(mut self, jwks: SigningJwks) -> Self {
        self.signing_jwks = jwks;
        self
    }

    pub fn signing_key(mut self, key: SigningKey) -> Self {
        self.signing_key = Some(key);
        self
    }

    pub fn issuer_jwks_uri_strategy(mut self, strategy: Arc<dyn IssuerJwksUriStrategy>) -> Self {
        self.issuer_jwks_uri_strategy = Some(strategy);
        self
    }

    pub fn claim_mapping_strategy(mut self, strategy: Arc<dyn ClaimMappingStrategy>) -> Self {
        self.claim_mapping_strategy = Some(strategy);
        self
    }

    /// Whether a missing signing key fails the build. Defaults to `true`.
    pub fn require_signing_key(mut self, required: bool) -> Self {
        self.require_signing_key = required;
        self
    }

    /// Consumes the builder and returns an `OAuth2Config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the protocol settings or a strategy are missing,
    /// if a signing key is required but absent, or if an explicit signing key
    /// is not part of a non-empty key set. An explicit signing key with no key
    /// set becomes the only key of the set.
    pub fn build(self) -> Result<OAuth2Config, ConfigError> {
        let protocol = self
            .protocol
            .ok_or_else(|| ConfigError::MissingConfiguration("protocol".to_string()))?;
        let issuer_jwks_uri_strategy = self
            .issuer_jwks_uri_strategy
            .ok_or(ConfigError::MissingStrategy("issuer JWKS URI"))?;
        let claim_mapping_strategy = self
            .claim_mapping_strategy
            .ok_or(ConfigError::MissingStrategy("claim mapping"))?;

        let mut signing_jwks = self.signing_jwks;
        let signing_key = match self.signing_key {
            Some(key) if signing_jwks.is_empty() => {
                signing_jwks = SigningJwks::new(vec![key.clone()])?;
                Some(key)
            }
            Some(key) => {
                if signing_jwks.find(key.key_id()).is_none() {
                    return Err(ConfigError::InvalidConfiguration(format!(
                        "signing key '{}' is not part of the signing JWKS",
                        key.key_id()
                    )));
                }
                Some(key)
            }
            None => signing_jwks.active().cloned(),
        };
        if self.require_signing_key && signing_key.is_none() {
            return Err(ConfigError::MissingSigningKey);
        }

        info!(
            issuer = %protocol.access_token_issuer,
            signing_key = signing_key.as_ref().map(SigningKey::key_id),
            jwks_keys = signing_jwks.len(),
            "Built OAuth2 configuration"
        );

        Ok(OAuth2Config {
            protocol,
            signing_key,
            signing_jwks,
            issuer_jwks_uri_strategy,
            claim_mapping_strategy,
        })
    }
}
