// src/strategy/mod.rs

//! Interchangeable strategies consumed by the composed OAuth2 configuration.

pub mod claims;
pub mod issuer;

pub use claims::{
    ClaimMappingStrategy, Claims, ConflictPolicy, PassthroughClaimMappingStrategy, SourcePolicy,
    TableClaimMappingStrategy,
};
pub use issuer::{
    DiscoveryIssuerJwksUriStrategy, IssuerJwksUriStrategy, StaticIssuerJwksUriStrategy,
    WellKnownIssuerJwksUriStrategy,
};
