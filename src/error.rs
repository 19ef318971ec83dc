// src/error.rs

use jsonwebtoken::Algorithm;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while assembling an OAuth2 configuration.
///
/// These are fatal at startup: a configuration that produced one of these must
/// never become active.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required configuration field is missing.
    #[error("A required configuration field is missing: {0}")]
    MissingConfiguration(String),

    /// A configuration value is invalid.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A provided URL could not be parsed or is not absolute.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Two private keys share the same key ID.
    #[error("Duplicate private key ID: {0}")]
    DuplicateKeyId(String),

    /// Two subject token issuers share the same name.
    #[error("Duplicate subject token issuer: {0}")]
    DuplicateIssuer(String),

    /// A claim appears more than once as a mapping source.
    #[error("Duplicate claim mapping for source claim: {0}")]
    DuplicateClaimMapping(String),

    /// A claim mapping rule is malformed (e.g. an empty claim name).
    #[error("Invalid claim mapping: {0}")]
    InvalidClaimMapping(String),

    /// A key file could not be read.
    #[error("Failed to read key file {path:?}: {source}")]
    KeyFile {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A configuration file could not be read.
    #[error("Failed to read configuration file {path:?}: {source}")]
    ConfigFile {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The configuration document could not be parsed.
    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// A cryptographic key (PEM, secret) is malformed or invalid.
    #[error("Invalid key format: {0}")]
    InvalidKeyFormat(String),

    /// The key's algorithm cannot be loaded by this key loader.
    #[error("Unsupported signing algorithm: {0:?}")]
    UnsupportedAlgorithm(Algorithm),

    /// No signing key is configured but the issuer must sign tokens.
    #[error("No signing key is configured")]
    MissingSigningKey,

    /// Token exchange is enabled without any trusted subject token issuer.
    #[error("Token exchange is enabled but no subject token issuers are configured")]
    NoSubjectTokenIssuers,

    /// A strategy required by the composed configuration was not provided.
    #[error("Missing strategy: {0}")]
    MissingStrategy(&'static str),
}

/// Errors raised while resolving the JWKS URI of a subject token issuer.
///
/// These only affect the request that triggered the lookup.
#[derive(Debug, Error)]
pub enum ResolutionError {
    /// The issuer is not in the trusted set.
    #[error("Issuer is not trusted: {0}")]
    UntrustedIssuer(String),

    /// The issuer is trusted but has no JWKS URI and nothing can resolve one.
    #[error("No JWKS URI is configured for issuer: {0}")]
    MissingJwksUri(String),

    /// A resolved or derived URI is not a valid absolute URL.
    #[error("Invalid JWKS URI for issuer '{issuer}': {reason}")]
    InvalidUri { issuer: String, reason: String },

    /// The discovery document names a different issuer.
    #[error("Discovery document issuer mismatch. Expected: {expected}, Actual: {actual}")]
    IssuerMismatch { expected: String, actual: String },

    /// An error occurred during an HTTP request.
    #[error("HTTP request error: {0}")]
    HttpError(#[from] reqwest::Error),

    /// The response body is not the expected JSON document.
    #[error("Invalid document from {uri}: {reason}")]
    InvalidDocument { uri: String, reason: String },

    /// The remote endpoint answered with a non-success status.
    #[error("Unexpected HTTP status {status} from {uri}")]
    UnexpectedStatus { uri: String, status: u16 },

    /// The request context deadline elapsed before the lookup completed.
    #[error("Deadline exceeded while resolving JWKS URI")]
    DeadlineExceeded,
}

impl ResolutionError {
    /// Returns `true` if the issuer itself is rejected. Retrying will not help.
    pub fn is_untrusted(&self) -> bool {
        matches!(self, ResolutionError::UntrustedIssuer(_))
    }

    /// Returns `true` for lookup failures that may succeed on a later attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            ResolutionError::HttpError(_) | ResolutionError::DeadlineExceeded => true,
            ResolutionError::UnexpectedStatus { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

/// Errors raised while rewriting token claims.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MappingError {
    /// Two present source claims map to the same destination claim.
    #[error("Claims '{first}' and '{second}' both map to '{destination}'")]
    ConflictingDestination {
        destination: String,
        first: String,
        second: String,
    },
}

/// Any error produced by this crate.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error(transparent)]
    Mapping(#[from] MappingError),
}

impl Error {
    /// Configuration errors mean the process should not have started; every
    /// other kind is scoped to a single request.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Config(_))
    }
}
