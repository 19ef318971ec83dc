// src/config.rs

use crate::error::ConfigError;
use jsonwebtoken::Algorithm;
use serde::de::{self, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Access tokens live for one hour unless configured otherwise.
pub const DEFAULT_ACCESS_TOKEN_LIFESPAN_SECS: u64 = 3600;

/// Key ID given to the key created from `oauth.privatekeyfile` when no
/// private keys are listed.
pub const DEFAULT_KEY_ID: &str = "default";

/// Classifies how a key is rendered in a JWKS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrivateKeyType {
    /// An asymmetric key whose public half may be published.
    Public,
    /// A shared secret. Never published.
    Symmetric,
}

impl PrivateKeyType {
    pub fn for_algorithm(algorithm: Algorithm) -> Self {
        match algorithm {
            Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => PrivateKeyType::Symmetric,
            _ => PrivateKeyType::Public,
        }
    }
}

/// A private key on disk with a given key ID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivateKey {
    #[serde(rename = "keyid", alias = "key_id")]
    pub key_id: String,
    pub algorithm: Algorithm,
    pub path: PathBuf,
}

impl PrivateKey {
    pub fn new(key_id: impl Into<String>, algorithm: Algorithm, path: impl Into<PathBuf>) -> Self {
        Self {
            key_id: key_id.into(),
            algorithm,
            path: path.into(),
        }
    }

    pub fn key_type(&self) -> PrivateKeyType {
        PrivateKeyType::for_algorithm(self.algorithm)
    }
}

/// A trusted issuer of subject tokens.
///
/// `name` must equal the `iss` claim of that issuer's tokens. An empty
/// `jwks_uri` means the URI is resolved dynamically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issuer {
    pub name: String,
    #[serde(rename = "jwksuri", alias = "jwks_uri", default)]
    pub jwks_uri: String,
}

impl Issuer {
    pub fn new(name: impl Into<String>, jwks_uri: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            jwks_uri: jwks_uri.into(),
        }
    }

    /// Parses `jwks_uri`, returning `None` when it is empty.
    pub fn parsed_jwks_uri(&self) -> Result<Option<Url>, ConfigError> {
        if self.jwks_uri.is_empty() {
            return Ok(None);
        }
        let url = Url::parse(&self.jwks_uri)
            .map_err(|e| ConfigError::InvalidUrl(format!("{}: {}", self.jwks_uri, e)))?;
        if url.cannot_be_a_base() {
            return Err(ConfigError::InvalidUrl(format!(
                "{}: JWKS URI must be an absolute hierarchical URL",
                self.jwks_uri
            )));
        }
        Ok(Some(url))
    }
}

/// One source → destination claim rename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimMapping {
    pub source: String,
    pub destination: String,
}

/// Claim rename table.
///
/// Entries keep the order in which they were inserted (or appeared in the
/// configuration document). Sources are unique.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClaimMappings {
    entries: Vec<ClaimMapping>,
}

impl ClaimMappings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<I, S, D>(pairs: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (S, D)>,
        S: Into<String>,
        D: Into<String>,
    {
        let mut mappings = Self::new();
        for (source, destination) in pairs {
            mappings.insert(source, destination)?;
        }
        Ok(mappings)
    }

    /// Appends a rule. Fails on empty names or an already mapped source.
    pub fn insert(
        &mut self,
        source: impl Into<String>,
        destination: impl Into<String>,
    ) -> Result<(), ConfigError> {
        let source = source.into();
        let destination = destination.into();
        if source.is_empty() || destination.is_empty() {
            return Err(ConfigError::InvalidClaimMapping(format!(
                "claim names must not be empty ('{}' -> '{}')",
                source, destination
            )));
        }
        if self.get(&source).is_some() {
            return Err(ConfigError::DuplicateClaimMapping(source));
        }
        self.entries.push(ClaimMapping {
            source,
            destination,
        });
        Ok(())
    }

    pub fn get(&self, source: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|m| m.source == source)
            .map(|m| m.destination.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &ClaimMapping> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Serialize for ClaimMappings {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for mapping in &self.entries {
            map.serialize_entry(&mapping.source, &mapping.destination)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for ClaimMappings {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(ClaimMappingsVisitor)
    }
}

struct ClaimMappingsVisitor;

impl<'de> Visitor<'de> for ClaimMappingsVisitor {
    type Value = ClaimMappings;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a map of source claim names to destination claim names")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
        let mut mappings = ClaimMappings::new();
        while let Some((source, destination)) = access.next_entry::<String, String>()? {
            mappings.insert(source, destination).map_err(de::Error::custom)?;
        }
        Ok(mappings)
    }
}

/// Raw OAuth2 settings, as found under the `oauth` section of a config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// This service's own issuer, placed in the `iss` claim of issued tokens.
    pub issuer: String,
    /// Access token lifetime in seconds.
    #[serde(rename = "accesstokenlifespan", alias = "access_token_lifespan")]
    pub access_token_lifespan: u64,
    #[serde(rename = "subjecttokenissuers", alias = "subject_token_issuers")]
    pub subject_token_issuers: Vec<Issuer>,
    /// Fallback symmetric secret. May be empty.
    pub secret: String,
    /// When configuring an OAuth provider, the first private key is used to sign JWTs.
    #[serde(rename = "privatekeys", alias = "private_keys")]
    pub private_keys: Vec<PrivateKey>,
    #[serde(rename = "claimmappings", alias = "claim_mappings")]
    pub claim_mappings: ClaimMappings,
    /// Whether tokens from `subject_token_issuers` may be exchanged.
    #[serde(rename = "tokenexchange", alias = "token_exchange")]
    pub token_exchange: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            issuer: String::new(),
            access_token_lifespan: DEFAULT_ACCESS_TOKEN_LIFESPAN_SECS,
            subject_token_issuers: Vec::new(),
            secret: String::new(),
            private_keys: Vec::new(),
            claim_mappings: ClaimMappings::new(),
            token_exchange: false,
        }
    }
}

#[derive(Deserialize)]
struct Document {
    oauth: FileSection,
}

#[derive(Deserialize)]
struct FileSection {
    #[serde(flatten)]
    config: Config,
    #[serde(default, rename = "privatekeyfile", alias = "private_key_file")]
    private_key_file: Option<PathBuf>,
}

impl Config {
    pub fn access_token_lifespan(&self) -> Duration {
        Duration::from_secs(self.access_token_lifespan)
    }

    /// The private key that signs new tokens.
    pub fn active_private_key(&self) -> Option<&PrivateKey> {
        self.private_keys.first()
    }

    /// Parses a YAML document with a top-level `oauth` section.
    ///
    /// The result is not validated; call [`Config::validate`] once every
    /// override has been applied.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let document: Document = serde_yaml::from_str(yaml)?;
        let FileSection {
            mut config,
            private_key_file,
        } = document.oauth;
        if let Some(path) = private_key_file {
            config.set_private_key_file(path);
        }
        Ok(config)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|source| ConfigError::ConfigFile {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&yaml)
    }

    /// Reads a config file, applies `OAUTH_*` environment overrides and validates.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let mut config = Self::from_yaml_file(path)?;
        config.apply_env(std::env::vars())?;
        config.validate()?;
        Ok(config)
    }

    /// Points the active signing key at `path`.
    ///
    /// Creates an RS256 key named [`DEFAULT_KEY_ID`] when no keys are listed,
    /// otherwise replaces the first key's path.
    pub fn set_private_key_file(&mut self, path: impl Into<PathBuf>) {
        let path = path.into();
        match self.private_keys.first_mut() {
            Some(active) => active.path = path,
            None => self
                .private_keys
                .push(PrivateKey::new(DEFAULT_KEY_ID, Algorithm::RS256, path)),
        }
    }

    /// Applies overrides from `OAUTH_ISSUER`, `OAUTH_PRIVATEKEYFILE`,
    /// `OAUTH_ACCESSTOKENLIFESPAN` and `OAUTH_SECRET`. Other variables are ignored.
    pub fn apply_env<I, K, V>(&mut self, vars: I) -> Result<(), ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        for (key, value) in vars {
            match key.as_ref() {
                "OAUTH_ISSUER" => self.issuer = value.into(),
                "OAUTH_PRIVATEKEYFILE" => self.set_private_key_file(value.into()),
                "OAUTH_ACCESSTOKENLIFESPAN" => {
                    let raw: String = value.into();
                    self.access_token_lifespan = raw.trim().parse().map_err(|_| {
                        ConfigError::InvalidConfiguration(format!(
                            "OAUTH_ACCESSTOKENLIFESPAN must be a number of seconds, got '{}'",
                            raw
                        ))
                    })?;
                }
                "OAUTH_SECRET" => self.secret = value.into(),
                _ => continue,
            }
            debug!(variable = key.as_ref(), "Applied environment override");
        }
        Ok(())
    }

    /// Checks every invariant of the raw settings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.issuer.trim().is_empty() {
            return Err(ConfigError::MissingConfiguration("issuer".to_string()));
        }
        if self.access_token_lifespan == 0 {
            return Err(ConfigError::InvalidConfiguration(
                "access token lifespan must be greater than zero".to_string(),
            ));
        }

        let mut names = HashSet::new();
        for issuer in &self.subject_token_issuers {
            if issuer.name.is_empty() {
                return Err(ConfigError::MissingConfiguration(
                    "subject token issuer name".to_string(),
                ));
            }
            if !names.insert(issuer.name.as_str()) {
                return Err(ConfigError::DuplicateIssuer(issuer.name.clone()));
            }
            issuer.parsed_jwks_uri()?;
        }
        if self.token_exchange && self.subject_token_issuers.is_empty() {
            return Err(ConfigError::NoSubjectTokenIssuers);
        }

        let mut key_ids = HashSet::new();
        for key in &self.private_keys {
            if key.key_id.is_empty() {
                return Err(ConfigError::MissingConfiguration("private key ID".to_string()));
            }
            if key.path.as_os_str().is_empty() {
                return Err(ConfigError::MissingConfiguration(format!(
                    "path for private key '{}'",
                    key.key_id
                )));
            }
            if !key_ids.insert(key.key_id.as_str()) {
                return Err(ConfigError::DuplicateKeyId(key.key_id.clone()));
            }
        }
        Ok(())
    }
}

/// A builder for creating a `Config` instance.
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets this service's issuer. This is a required field.
    pub fn issuer(mut self, issuer: impl Into<String>) -> Self {
        self.config.issuer = issuer.into();
        self
    }

    pub fn access_token_lifespan(mut self, lifespan: Duration) -> Result<Self, ConfigError> {
        if lifespan.as_secs() == 0 {
            return Err(ConfigError::InvalidConfiguration(
                "access token lifespan must be at least one second".to_string(),
            ));
        }
        self.config.access_token_lifespan = lifespan.as_secs();
        Ok(self)
    }

    /// Trusts an issuer of subject tokens. Pass an empty `jwks_uri` to resolve it dynamically.
    pub fn subject_token_issuer(
        mut self,
        name: impl Into<String>,
        jwks_uri: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        let issuer = Issuer::new(name, jwks_uri);
        issuer.parsed_jwks_uri()?;
        if self
            .config
            .subject_token_issuers
            .iter()
            .any(|existing| existing.name == issuer.name)
        {
            return Err(ConfigError::DuplicateIssuer(issuer.name));
        }
        self.config.subject_token_issuers.push(issuer);
        Ok(self)
    }

    pub fn secret(mut self, secret: impl Into<String>) -> Self {
        self.config.secret = secret.into();
        self
    }

    /// Adds a private key. The first key added becomes the signing key.
    pub fn private_key(
        mut self,
        key_id: impl Into<String>,
        algorithm: Algorithm,
        path: impl Into<PathBuf>,
    ) -> Result<Self, ConfigError> {
        let key = PrivateKey::new(key_id, algorithm, path);
        if self
            .config
            .private_keys
            .iter()
            .any(|existing| existing.key_id == key.key_id)
        {
            return Err(ConfigError::DuplicateKeyId(key.key_id));
        }
        self.config.private_keys.push(key);
        Ok(self)
    }

    pub fn claim_mapping(
        mut self,
        source: impl Into<String>,
        destination: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        self.config.claim_mappings.insert(source, destination)?;
        Ok(self)
    }

    pub fn token_exchange(mut self, enabled: bool) -> Self {
        self.config.token_exchange = enabled;
        self
    }

    /// Consumes the builder and returns a validated `Config`.
    ///
    /// # Errors
    ///
    /// Returns an error if `issuer` is missing or any invariant is violated.
    pub fn build(self) -> Result<Config, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
