// src/keys.rs

use crate::config::{PrivateKey, PrivateKeyType};
use crate::context::Context;
use crate::error::ConfigError;
use crate::model::{JsonWebKey, JsonWebKeySet};
use base64::engine::{general_purpose::URL_SAFE_NO_PAD, Engine};
use jsonwebtoken::{Algorithm, EncodingKey};
use rsa::pkcs1::{DecodeRsaPrivateKey, EncodeRsaPrivateKey};
use rsa::pkcs8::DecodePrivateKey;
use rsa::traits::{PrivateKeyParts, PublicKeyParts};
use rsa::{BigUint, RsaPrivateKey};
use std::collections::HashSet;
use std::fmt;
use tracing::{debug, info};

/// A loaded key that can sign tokens.
///
/// Holds the full JWK, private members included, and the matching
/// `jsonwebtoken` encoding key. `Debug` never prints key material.
#[derive(Clone)]
pub struct SigningKey {
    key_id: String,
    algorithm: Algorithm,
    key_type: PrivateKeyType,
    jwk: JsonWebKey,
    encoding_key: EncodingKey,
}

impl SigningKey {
    /// Builds a signing key from a PKCS#8 or PKCS#1 PEM encoded RSA private key.
    pub fn from_rsa_pem(
        key_id: impl Into<String>,
        algorithm: Algorithm,
        pem: &str,
    ) -> Result<Self, ConfigError> {
        if !is_rsa(algorithm) {
            return Err(ConfigError::UnsupportedAlgorithm(algorithm));
        }
        let key_id = key_id.into();

        let private_key = RsaPrivateKey::from_pkcs8_pem(pem)
            .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
            .map_err(|e| {
                ConfigError::InvalidKeyFormat(format!(
                    "Failed to parse RSA private key '{}' as PKCS#8 or PKCS#1 PEM: {}",
                    key_id, e
                ))
            })?;

        // jsonwebtoken takes the PKCS#1 DER form most reliably.
        let pkcs1_der = private_key.to_pkcs1_der().map_err(|e| {
            ConfigError::InvalidKeyFormat(format!("Failed to convert RSA key to PKCS#1 DER: {}", e))
        })?;
        let encoding_key = EncodingKey::from_rsa_der(pkcs1_der.as_bytes());

        let primes = private_key.primes();
        let jwk = JsonWebKey {
            kid: Some(key_id.clone()),
            kty: "RSA".to_string(),
            use_purpose: Some("sig".to_string()),
            alg: Some(format!("{:?}", algorithm)),
            n: Some(encode_uint(private_key.n())),
            e: Some(encode_uint(private_key.e())),
            crv: None,
            x: None,
            y: None,
            d: Some(encode_uint(private_key.d())),
            p: primes.first().map(encode_uint),
            q: primes.get(1).map(encode_uint),
            dp: private_key.dp().map(encode_uint),
            dq: private_key.dq().map(encode_uint),
            qi: private_key.crt_coefficient().as_ref().map(encode_uint),
            k: None,
            extra: serde_json::Map::new(),
        };

        Ok(Self {
            key_id,
            algorithm,
            key_type: PrivateKeyType::Public,
            jwk,
            encoding_key,
        })
    }

    /// Builds an HMAC signing key from a shared secret.
    pub fn from_secret(
        key_id: impl Into<String>,
        algorithm: Algorithm,
        secret: &[u8],
    ) -> Result<Self, ConfigError> {
        if PrivateKeyType::for_algorithm(algorithm) != PrivateKeyType::Symmetric {
            return Err(ConfigError::UnsupportedAlgorithm(algorithm));
        }
        let key_id = key_id.into();
        if secret.is_empty() {
            return Err(ConfigError::InvalidKeyFormat(format!(
                "secret for key '{}' is empty",
                key_id
            )));
        }

        let jwk = JsonWebKey {
            kid: Some(key_id.clone()),
            kty: "oct".to_string(),
            use_purpose: Some("sig".to_string()),
            alg: Some(format!("{:?}", algorithm)),
            n: None,
            e: None,
            crv: None,
            x: None,
            y: None,
            d: None,
            p: None,
            q: None,
            dp: None,
            dq: None,
            qi: None,
            k: Some(URL_SAFE_NO_PAD.encode(secret)),
            extra: serde_json::Map::new(),
        };

        Ok(Self {
            key_id,
            algorithm,
            key_type: PrivateKeyType::Symmetric,
            jwk,
            encoding_key: EncodingKey::from_secret(secret),
        })
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    pub fn key_type(&self) -> PrivateKeyType {
        self.key_type
    }

    /// The full JWK, including private members.
    pub fn jwk(&self) -> &JsonWebKey {
        &self.jwk
    }

    pub fn encoding_key(&self) -> &EncodingKey {
        &self.encoding_key
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("key_id", &self.key_id)
            .field("algorithm", &self.algorithm)
            .field("key_type", &self.key_type)
            .finish_non_exhaustive()
    }
}

fn is_rsa(algorithm: Algorithm) -> bool {
    matches!(
        algorithm,
        Algorithm::RS256
            | Algorithm::RS384
            | Algorithm::RS512
            | Algorithm::PS256
            | Algorithm::PS384
            | Algorithm::PS512
    )
}

fn encode_uint(value: &BigUint) -> String {
    URL_SAFE_NO_PAD.encode(value.to_bytes_be())
}

/// The complete key set held by the issuer, private material included.
///
/// Not `Serialize`. Publishing goes through [`SigningJwks::to_public`];
/// [`SigningJwks::to_private_jwk_set`] must never reach an untrusted client.
#[derive(Debug, Clone, Default)]
pub struct SigningJwks {
    keys: Vec<SigningKey>,
}

impl SigningJwks {
    /// Builds a key set. The first key is the active signing key.
    pub fn new(keys: Vec<SigningKey>) -> Result<Self, ConfigError> {
        let mut seen = HashSet::new();
        for key in &keys {
            if !seen.insert(key.key_id()) {
                return Err(ConfigError::DuplicateKeyId(key.key_id().to_string()));
            }
        }
        Ok(Self { keys })
    }

    /// The key that signs new tokens.
    pub fn active(&self) -> Option<&SigningKey> {
        self.keys.first()
    }

    pub fn find(&self, key_id: &str) -> Option<&SigningKey> {
        self.keys.iter().find(|key| key.key_id() == key_id)
    }

    pub fn keys(&self) -> &[SigningKey] {
        &self.keys
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Every key as a JWK with private members. Trust boundary internal only.
    pub fn to_private_jwk_set(&self) -> JsonWebKeySet {
        JsonWebKeySet {
            keys: self.keys.iter().map(|key| key.jwk().clone()).collect(),
        }
    }

    /// The publishable form: private members stripped, symmetric keys omitted.
    pub fn to_public(&self) -> JsonWebKeySet {
        JsonWebKeySet {
            keys: self
                .keys
                .iter()
                .filter(|key| key.key_type() == PrivateKeyType::Public)
                .filter_map(|key| key.jwk().to_public())
                .collect(),
        }
    }
}

/// Selects the active key from an already loaded set.
pub trait SigningKeyProvider {
    /// Returns the single key that signs new tokens, if one is configured.
    fn signing_key(&self, ctx: &Context) -> Option<&SigningKey>;
}

/// Exposes the complete signing key set.
pub trait SigningJwksProvider {
    /// Returns every key the issuer holds, **including private material**.
    ///
    /// This is not the document served at a public JWKS endpoint. Callers
    /// publishing keys must go through [`SigningJwks::to_public`].
    fn signing_jwks(&self, ctx: &Context) -> &SigningJwks;
}

impl SigningKeyProvider for SigningJwks {
    fn signing_key(&self, _ctx: &Context) -> Option<&SigningKey> {
        self.active()
    }
}

impl SigningJwksProvider for SigningJwks {
    fn signing_jwks(&self, _ctx: &Context) -> &SigningJwks {
        self
    }
}

/// Turns a configured [`PrivateKey`] into key material.
pub trait KeyLoader: Send + Sync {
    fn load(&self, key: &PrivateKey) -> Result<SigningKey, ConfigError>;
}

/// Loads keys from the filesystem.
///
/// RS*/PS* keys are read as PEM. HS* keys are read as raw secret bytes with
/// surrounding whitespace trimmed.
#[derive(Debug, Clone, Copy, Default)]
pub struct PemKeyLoader;

impl KeyLoader for PemKeyLoader {
    fn load(&self, key: &PrivateKey) -> Result<SigningKey, ConfigError> {
        debug!(key_id = %key.key_id, path = ?key.path, "Loading private key");
        let read_error = |source| ConfigError::KeyFile {
            path: key.path.clone(),
            source,
        };

        match key.key_type() {
            PrivateKeyType::Symmetric => {
                let raw = std::fs::read(&key.path).map_err(read_error)?;
                SigningKey::from_secret(&key.key_id, key.algorithm, raw.trim_ascii())
            }
            PrivateKeyType::Public => {
                if !is_rsa(key.algorithm) {
                    return Err(ConfigError::UnsupportedAlgorithm(key.algorithm));
                }
                let pem = std::fs::read_to_string(&key.path).map_err(read_error)?;
                SigningKey::from_rsa_pem(&key.key_id, key.algorithm, &pem)
            }
        }
    }
}

/// Loads every configured key, in order, into a [`SigningJwks`].
pub fn load_signing_keys(
    keys: &[PrivateKey],
    loader: &dyn KeyLoader,
) -> Result<SigningJwks, ConfigError> {
    let loaded = keys
        .iter()
        .map(|key| loader.load(key))
        .collect::<Result<Vec<_>, _>>()?;
    let jwks = SigningJwks::new(loaded)?;
    info!(
        count = jwks.len(),
        active = jwks.active().map(SigningKey::key_id),
        "Loaded signing keys"
    );
    Ok(jwks)
}
