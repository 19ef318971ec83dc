// src/lib.rs

pub mod client;
pub mod config;
pub mod context;
pub mod error;
pub mod holder;
pub mod keys;
pub mod logging;
pub mod model;
pub mod oauth2;
pub mod strategy;

/// The public prelude for the `nila-oauth-config` crate.
///
/// This module re-exports the most commonly used types for convenience.
pub mod prelude {
    pub use crate::client::DiscoveryClient;
    pub use crate::config::{ClaimMappings, Config, ConfigBuilder, Issuer, PrivateKey, PrivateKeyType};
    pub use crate::context::Context;
    pub use crate::error::{ConfigError, Error, MappingError, ResolutionError};
    pub use crate::holder::ConfigHolder;
    pub use crate::keys::{
        KeyLoader, PemKeyLoader, SigningJwks, SigningJwksProvider, SigningKey, SigningKeyProvider,
    };
    pub use crate::model::{JsonWebKey, JsonWebKeySet};
    pub use crate::oauth2::{
        ClaimMappingStrategyProvider, IssuerJwksUriStrategyProvider, OAuth2Config,
        OAuth2Configurator, ProtocolConfig, ProtocolConfigurator,
    };
    pub use crate::strategy::{
        ClaimMappingStrategy, Claims, ConflictPolicy, DiscoveryIssuerJwksUriStrategy,
        IssuerJwksUriStrategy, PassthroughClaimMappingStrategy, SourcePolicy,
        StaticIssuerJwksUriStrategy, TableClaimMappingStrategy, WellKnownIssuerJwksUriStrategy,
    };
    pub use jsonwebtoken::Algorithm;
}
