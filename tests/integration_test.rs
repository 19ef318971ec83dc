use jsonwebtoken::{decode, encode, DecodingKey, Header, Validation};
use nila_oauth_config::prelude::*;
use serde_json::json;
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tempfile::tempdir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const RSA_PKCS8_PEM: &str = include_str!("fixtures/rsa_pkcs8.pem");
const RSA_PKCS1_PEM: &str = include_str!("fixtures/rsa_pkcs1.pem");
const RSA_ROTATED_PEM: &str = include_str!("fixtures/rsa_rotated_pkcs8.pem");

/// Writes `contents` to `name` inside a fresh temporary directory.
fn write_temp(name: &str, contents: &str) -> (tempfile::TempDir, PathBuf) {
    let dir = tempdir().unwrap();
    let file_path = dir.path().join(name);
    let mut file = File::create(&file_path).unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    (dir, file_path)
}

fn claims(value: serde_json::Value) -> Claims {
    match value {
        serde_json::Value::Object(map) => map,
        _ => panic!("claims must be a JSON object"),
    }
}

/// Loads every key as an HMAC secret so tests need no files.
struct SecretLoader;

impl KeyLoader for SecretLoader {
    fn load(&self, key: &PrivateKey) -> Result<SigningKey, ConfigError> {
        SigningKey::from_secret(&key.key_id, Algorithm::HS256, key.key_id.as_bytes())
    }
}

#[tokio::test]
async fn test_yaml_config_to_signed_token_end_to_end() {
    let _ = nila_oauth_config::logging::try_init("nila_oauth_config=debug");

    // --- 1. SETUP: key files and a config document ---
    let dir = tempdir().unwrap();
    let active_path = dir.path().join("k1.pem");
    let rotated_path = dir.path().join("k0.pem");
    std::fs::write(&active_path, RSA_PKCS8_PEM).unwrap();
    std::fs::write(&rotated_path, RSA_ROTATED_PEM).unwrap();

    let yaml = format!(
        r#"
oauth:
  issuer: https://id.test.local
  accesstokenlifespan: 300
  secret: global-secret
  subjecttokenissuers:
    - name: https://partner.test.local
      jwksuri: https://partner.test.local/keys
  privatekeys:
    - keyid: k1
      algorithm: RS256
      path: {}
    - keyid: k0
      algorithm: RS256
      path: {}
  claimmappings:
    sub: user_id
"#,
        active_path.display(),
        rotated_path.display()
    );
    let (_config_dir, config_path) = write_temp("config.yaml", &yaml);

    // --- 2. BUILD ---
    let config = Config::from_yaml_file(&config_path).unwrap();
    let oauth = OAuth2Config::from_config(&config, &PemKeyLoader).expect("config should build");
    let ctx = Context::background();

    assert_eq!(oauth.access_token_issuer(&ctx), "https://id.test.local");
    assert_eq!(oauth.access_token_lifespan(&ctx), Duration::from_secs(300));

    // --- 3. KEYS: the first configured key signs, both are held ---
    let signing_key = oauth.signing_key(&ctx).expect("signing key");
    assert_eq!(signing_key.key_id(), "k1");
    assert_eq!(signing_key.key_type(), PrivateKeyType::Public);

    let jwks = oauth.signing_jwks(&ctx);
    assert_eq!(jwks.len(), 2);
    let private_set = jwks.to_private_jwk_set();
    assert!(private_set.keys.iter().all(JsonWebKey::has_private_material));
    let public_set = jwks.to_public();
    assert_eq!(public_set.keys.len(), 2);
    assert!(public_set.keys.iter().all(|k| !k.has_private_material()));
    let published = serde_json::to_value(&public_set).unwrap();
    assert!(published["keys"][0].get("d").is_none());
    assert_eq!(published["keys"][0]["kid"], "k1");

    // --- 4. MAP CLAIMS, SIGN WITH THE ACTIVE KEY, VERIFY WITH THE PUBLISHED KEY ---
    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs();
    let mapped = oauth
        .claim_mapping_strategy(&ctx)
        .map_claims(&claims(json!({"sub": "abc123", "exp": now + 300})))
        .unwrap();
    assert_eq!(mapped.get("user_id"), Some(&json!("abc123")));
    assert!(mapped.get("sub").is_none());

    let mut header = Header::new(signing_key.algorithm());
    header.kid = Some(signing_key.key_id().to_string());
    let token = encode(&header, &mapped, signing_key.encoding_key()).unwrap();

    let public_jwk = public_set.find("k1").unwrap();
    let decoding_key =
        DecodingKey::from_rsa_components(public_jwk.n.as_deref().unwrap(), public_jwk.e.as_deref().unwrap())
            .unwrap();
    let mut validation = Validation::new(Algorithm::RS256);
    validation.validate_aud = false;
    validation.set_required_spec_claims(&["exp"]);
    let decoded = decode::<serde_json::Value>(&token, &decoding_key, &validation)
        .expect("token signed by the active key should verify against the published JWKS");
    assert_eq!(decoded.claims["user_id"], "abc123");
    println!("✅ End-to-end test passed: config loaded, claims mapped, token signed and verified.");
}

#[test]
fn test_signing_key_is_first_entry_and_stable() {
    let (_dir, key_path) = write_temp("k1.pem", RSA_PKCS8_PEM);
    let config = ConfigBuilder::new()
        .issuer("https://id.test.local")
        .private_key("k1", Algorithm::RS256, key_path)
        .unwrap()
        .build()
        .unwrap();
    let oauth = OAuth2Config::from_config(&config, &PemKeyLoader).unwrap();
    let ctx = Context::background();

    let first = oauth.signing_key(&ctx).unwrap();
    let second = oauth.signing_key(&ctx).unwrap();
    assert_eq!(first.key_id(), "k1");
    assert_eq!(second.key_id(), "k1");
    assert!(std::ptr::eq(first, second));
}

#[test]
fn test_pkcs1_and_pkcs8_produce_the_same_jwk() {
    let from_pkcs8 = SigningKey::from_rsa_pem("k", Algorithm::RS256, RSA_PKCS8_PEM).unwrap();
    let from_pkcs1 = SigningKey::from_rsa_pem("k", Algorithm::RS256, RSA_PKCS1_PEM).unwrap();
    assert_eq!(from_pkcs8.jwk(), from_pkcs1.jwk());

    let jwk = from_pkcs8.jwk();
    assert_eq!(jwk.kty, "RSA");
    assert_eq!(jwk.alg.as_deref(), Some("RS256"));
    assert_eq!(jwk.e.as_deref(), Some("AQAB"));
    for member in [&jwk.d, &jwk.p, &jwk.q, &jwk.dp, &jwk.dq, &jwk.qi] {
        assert!(member.is_some());
    }
}

#[test]
fn test_symmetric_keys_are_never_published() {
    let (_dir, secret_path) = write_temp("hmac.key", "shared-secret\n");
    let (_dir2, rsa_path) = write_temp("k1.pem", RSA_PKCS8_PEM);
    let config = ConfigBuilder::new()
        .issuer("https://id.test.local")
        .private_key("hmac", Algorithm::HS256, secret_path)
        .unwrap()
        .private_key("rsa", Algorithm::RS256, rsa_path)
        .unwrap()
        .build()
        .unwrap();
    let oauth = OAuth2Config::from_config(&config, &PemKeyLoader).unwrap();
    let ctx = Context::background();

    assert_eq!(oauth.signing_key(&ctx).unwrap().key_type(), PrivateKeyType::Symmetric);
    let public_set = oauth.signing_jwks(&ctx).to_public();
    let kids: Vec<&str> = public_set.keys.iter().map(|k| k.kid.as_deref().unwrap_or_default()).collect();
    assert_eq!(kids, ["rsa"]);
}

#[tokio::test]
async fn test_configured_issuer_uri_returned_and_unknown_issuer_rejected() {
    let config = ConfigBuilder::new()
        .issuer("https://id.test.local")
        .private_key("k1", Algorithm::HS256, "/unused")
        .unwrap()
        .subject_token_issuer("https://partner.test.local", "https://partner.test.local/oauth/jwks.json")
        .unwrap()
        .token_exchange(true)
        .build()
        .unwrap();
    let oauth = OAuth2Config::from_config(&config, &SecretLoader).unwrap();
    let ctx = Context::background();
    let strategy = oauth.issuer_jwks_uri_strategy(&ctx);

    let uri = strategy
        .issuer_jwks_uri(&ctx, "https://partner.test.local")
        .await
        .unwrap();
    assert_eq!(uri.as_str(), "https://partner.test.local/oauth/jwks.json");

    let err = strategy
        .issuer_jwks_uri(&ctx, "https://stranger.test.local")
        .await
        .unwrap_err();
    assert!(matches!(err, ResolutionError::UntrustedIssuer(_)));
    assert!(!err.is_transient());
}

#[tokio::test]
async fn test_dynamic_issuer_resolved_through_discovery_and_cached() {
    // --- 1. SETUP MOCK DISCOVERY + JWKS ENDPOINTS ---
    let mock_server = MockServer::start().await;
    let issuer = mock_server.uri();
    let jwks_uri = format!("{}/oauth/keys", issuer);
    Mock::given(method("GET"))
        .and(path("/.well-known/openid-configuration"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("cache-control", "public, max-age=300")
                .set_body_json(json!({"issuer": issuer, "jwks_uri": jwks_uri})),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let remote_key = SigningKey::from_rsa_pem("remote", Algorithm::RS256, RSA_ROTATED_PEM).unwrap();
    let remote_jwks = SigningJwks::new(vec![remote_key]).unwrap().to_public();
    Mock::given(method("GET"))
        .and(path("/oauth/keys"))
        .respond_with(ResponseTemplate::new(200).set_body_json(&remote_jwks))
        .mount(&mock_server)
        .await;

    // --- 2. BUILD: listed without a URI, so discovery is used ---
    let config = Config {
        issuer: "https://id.test.local".into(),
        subject_token_issuers: vec![Issuer::new(issuer.clone(), "")],
        private_keys: vec![PrivateKey::new("k1", Algorithm::HS256, "/unused")],
        token_exchange: true,
        ..Config::default()
    };
    let oauth = OAuth2Config::from_config(&config, &SecretLoader).unwrap();
    let ctx = Context::with_timeout(Duration::from_secs(5));
    let strategy = oauth.issuer_jwks_uri_strategy(&ctx);

    // --- 3. RESOLVE TWICE: second answer comes from the cache ---
    let first = strategy.issuer_jwks_uri(&ctx, &issuer).await.unwrap();
    let second = strategy.issuer_jwks_uri(&ctx, &issuer).await.unwrap();
    assert_eq!(first.as_str(), jwks_uri);
    assert_eq!(first, second);

    // --- 4. FETCH THE REMOTE KEY SET ---
    let fetched = DiscoveryClient::new(Duration::from_secs(60))
        .fetch_jwks(&ctx, &first)
        .await
        .unwrap();
    assert_eq!(fetched, remote_jwks);
    assert!(fetched.find("remote").is_some());
}

#[tokio::test]
async fn test_discovery_rejects_issuer_mismatch_and_http_errors() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/.well-known/openid-configuration"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "issuer": "https://impostor.test.local",
            "jwks_uri": "https://impostor.test.local/keys"
        })))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/broken/.well-known/openid-configuration"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&mock_server)
        .await;

    let issuer = mock_server.uri();
    let broken = format!("{}/broken", issuer);
    let strategy = DiscoveryIssuerJwksUriStrategy::new(
        [issuer.clone(), broken.clone()],
        DiscoveryClient::new(Duration::from_secs(60)),
    );
    let ctx = Context::background();

    let mismatch = strategy.issuer_jwks_uri(&ctx, &issuer).await.unwrap_err();
    assert!(matches!(mismatch, ResolutionError::IssuerMismatch { .. }));

    let unavailable = strategy.issuer_jwks_uri(&ctx, &broken).await.unwrap_err();
    assert!(matches!(unavailable, ResolutionError::UnexpectedStatus { status: 503, .. }));
    assert!(unavailable.is_transient());

    let untrusted = strategy
        .issuer_jwks_uri(&ctx, "https://stranger.test.local")
        .await
        .unwrap_err();
    assert!(untrusted.is_untrusted());
}

#[tokio::test]
async fn test_malformed_discovery_document_is_not_retried() {
    let mock_server = MockServer::start().await;
    let issuer = mock_server.uri();
    Mock::given(method("GET"))
        .and(path("/.well-known/openid-configuration"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"issuer": issuer})))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/html/.well-known/openid-configuration"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>login</html>"))
        .mount(&mock_server)
        .await;

    let client = DiscoveryClient::new(Duration::from_secs(60));
    let ctx = Context::background();

    let missing_field = client.discover_jwks_uri(&ctx, &issuer).await.unwrap_err();
    assert!(matches!(missing_field, ResolutionError::InvalidDocument { .. }));
    assert!(!missing_field.is_transient());

    let html = client
        .discover_jwks_uri(&ctx, &format!("{}/html", issuer))
        .await
        .unwrap_err();
    assert!(matches!(html, ResolutionError::InvalidDocument { .. }));
    assert!(!html.is_transient());
}

#[tokio::test]
async fn test_remote_jwks_accepts_keys_without_kid_and_ec_keys() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/keys"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"keys": [
            {"kty": "RSA", "n": "modulus", "e": "AQAB"},
            {"kid": "ec1", "kty": "EC", "crv": "P-256", "x": "XX", "y": "YY"}
        ]})))
        .mount(&mock_server)
        .await;

    let uri = url::Url::parse(&format!("{}/keys", mock_server.uri())).unwrap();
    let jwks = DiscoveryClient::new(Duration::from_secs(60))
        .fetch_jwks(&Context::background(), &uri)
        .await
        .unwrap();

    assert_eq!(jwks.keys.len(), 2);
    assert_eq!(jwks.keys[0].kid, None);
    assert_eq!(jwks.keys[0].n.as_deref(), Some("modulus"));
    let ec = jwks.find("ec1").unwrap();
    assert_eq!(ec.crv.as_deref(), Some("P-256"));
    assert_eq!(ec.x.as_deref(), Some("XX"));
    assert_eq!(ec.y.as_deref(), Some("YY"));
}

#[tokio::test]
async fn test_invalidated_discovery_cache_refetches() {
    let mock_server = MockServer::start().await;
    let issuer = mock_server.uri();
    Mock::given(method("GET"))
        .and(path("/.well-known/openid-configuration"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("cache-control", "max-age=300")
                .set_body_json(json!({"issuer": issuer, "jwks_uri": format!("{}/keys", issuer)})),
        )
        .expect(2)
        .mount(&mock_server)
        .await;

    let client = DiscoveryClient::new(Duration::from_secs(60));
    let ctx = Context::background();
    client.discover_jwks_uri(&ctx, &issuer).await.unwrap();
    client.discover_jwks_uri(&ctx, &issuer).await.unwrap();
    client.invalidate_all();
    client.discover_jwks_uri(&ctx, &issuer).await.unwrap();
}

#[tokio::test]
async fn test_discovery_honors_context_deadline() {
    let mock_server = MockServer::start().await;
    let issuer = mock_server.uri();
    Mock::given(method("GET"))
        .and(path("/.well-known/openid-configuration"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_delay(Duration::from_secs(3))
                .set_body_json(json!({"issuer": issuer, "jwks_uri": format!("{}/keys", issuer)})),
        )
        .mount(&mock_server)
        .await;

    let strategy = DiscoveryIssuerJwksUriStrategy::new(
        [issuer.clone()],
        DiscoveryClient::new(Duration::from_secs(60)),
    );
    let ctx = Context::with_timeout(Duration::from_millis(100));
    let err = strategy.issuer_jwks_uri(&ctx, &issuer).await.unwrap_err();
    assert!(matches!(err, ResolutionError::DeadlineExceeded));
}

fn config_with(key_id: &str, destination: &str) -> Config {
    Config {
        issuer: "https://id.test.local".into(),
        subject_token_issuers: vec![Issuer::new(
            "https://partner.test.local",
            "https://partner.test.local/keys",
        )],
        private_keys: vec![PrivateKey::new(key_id, Algorithm::HS256, "/unused")],
        claim_mappings: ClaimMappings::from_pairs([("sub", destination)]).unwrap(),
        ..Config::default()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_accessor_calls_on_one_config() {
    let oauth = Arc::new(OAuth2Config::from_config(&config_with("k1", "user_id"), &SecretLoader).unwrap());
    let input = claims(json!({"sub": "abc123"}));

    let mut tasks = Vec::new();
    for _ in 0..32 {
        let oauth = Arc::clone(&oauth);
        let input = input.clone();
        tasks.push(tokio::spawn(async move {
            let ctx = Context::background();
            for _ in 0..50 {
                assert_eq!(oauth.signing_key(&ctx).unwrap().key_id(), "k1");
                assert_eq!(oauth.signing_jwks(&ctx).len(), 1);
                let uri = oauth
                    .issuer_jwks_uri_strategy(&ctx)
                    .issuer_jwks_uri(&ctx, "https://partner.test.local")
                    .await
                    .unwrap();
                assert_eq!(uri.as_str(), "https://partner.test.local/keys");
                let mapped = oauth.claim_mapping_strategy(&ctx).map_claims(&input).unwrap();
                assert_eq!(mapped.get("user_id"), Some(&json!("abc123")));
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_swap_is_atomic_for_readers() {
    let holder = Arc::new(ConfigHolder::new(
        OAuth2Config::from_config(&config_with("key-a", "uid_a"), &SecretLoader).unwrap(),
    ));
    let input = claims(json!({"sub": "abc123"}));

    let writer = {
        let holder = Arc::clone(&holder);
        tokio::spawn(async move {
            for round in 0..200 {
                let next = if round % 2 == 0 {
                    config_with("key-b", "uid_b")
                } else {
                    config_with("key-a", "uid_a")
                };
                holder.reload(&next, &SecretLoader).unwrap();
                tokio::task::yield_now().await;
            }
        })
    };

    let mut readers = Vec::new();
    for _ in 0..8 {
        let holder = Arc::clone(&holder);
        let input = input.clone();
        readers.push(tokio::spawn(async move {
            let ctx = Context::background();
            for _ in 0..200 {
                let snapshot = holder.snapshot();
                let key_id = snapshot.signing_key(&ctx).unwrap().key_id().to_string();
                let mapped = snapshot.claim_mapping_strategy(&ctx).map_claims(&input).unwrap();
                let expected = if key_id == "key-a" { "uid_a" } else { "uid_b" };
                assert!(
                    mapped.contains_key(expected),
                    "key {} observed with mismatched claim mappings {:?}",
                    key_id,
                    mapped
                );
                tokio::task::yield_now().await;
            }
        }));
    }

    writer.await.unwrap();
    for reader in readers {
        reader.await.unwrap();
    }
}

#[test]
fn test_missing_key_material_is_fatal() {
    let config = ConfigBuilder::new()
        .issuer("https://id.test.local")
        .private_key("k1", Algorithm::RS256, "/does/not/exist.pem")
        .unwrap()
        .build()
        .unwrap();
    let err = OAuth2Config::from_config(&config, &PemKeyLoader).unwrap_err();
    assert!(matches!(err, ConfigError::KeyFile { .. }));
    assert!(Error::from(err).is_fatal());

    let no_keys = ConfigBuilder::new().issuer("https://id.test.local").build().unwrap();
    assert!(matches!(
        OAuth2Config::from_config(&no_keys, &PemKeyLoader),
        Err(ConfigError::MissingSigningKey)
    ));
}
