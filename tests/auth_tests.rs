//! End-to-end authorization tests
//!
//! Tests the full token flow including:
//! - HMAC tokens against the shared secret
//! - RSA tokens against a realm key served by a local HTTP endpoint
//! - Claim cache hits, expiry and eviction
//! - Open mode and username resolution

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use base64::Engine;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde_json::{Value, json};
use tokio::net::TcpListener;

use playermgr::auth::{
    AuthError, Authorizer, ClaimCache, Claims, KeyProvider, SecurityMode, TokenValidator,
    claims::unix_now,
};
use playermgr::config::SecurityConfig;

const SECRET: &[u8] = b"amazebot-test-secret";
const PRIVATE_KEY: &[u8] = include_bytes!("fixtures/realm_private.pem");
const PUBLIC_KEY: &str = include_str!("fixtures/realm_public.pem");

// ── Helpers ────────────────────────────────────────────────────────────

fn claims_t1() -> Value {
    json!({
        "preferred_username": "joe",
        "realm_access": {"roles": ["ui.player"]},
        "resource_access": {"playermgr": {"roles": ["player.view"]}},
        "iat": unix_now() - 10,
        "exp": unix_now() + 3600,
    })
}

fn claims_t2() -> Value {
    let mut claims = claims_t1();
    claims["iat"] = json!(unix_now() - 7200);
    claims["exp"] = json!(unix_now() - 3600);
    claims
}

fn hs_token(claims: &Value) -> String {
    jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        claims,
        &EncodingKey::from_secret(SECRET),
    )
    .unwrap()
}

fn rs_token(claims: &Value) -> String {
    jsonwebtoken::encode(
        &Header::new(Algorithm::RS256),
        claims,
        &EncodingKey::from_rsa_pem(PRIVATE_KEY).unwrap(),
    )
    .unwrap()
}

/// Token with an arbitrary header algorithm and a junk signature
fn forged_token(alg: &str, claims: &Value) -> String {
    let engine = base64::engine::general_purpose::URL_SAFE_NO_PAD;
    let header = engine.encode(json!({"alg": alg, "typ": "JWT"}).to_string());
    let payload = engine.encode(claims.to_string());
    format!("{header}.{payload}.c2lnbmF0dXJl")
}

fn bearer(token: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {token}")).unwrap(),
    );
    headers
}

fn secured(realm_url: Option<String>) -> Authorizer {
    let validator = TokenValidator::new(
        Some(SECRET),
        KeyProvider::new(realm_url, Duration::from_secs(5)),
        Arc::new(ClaimCache::new()),
    );
    Authorizer::new(SecurityMode::Secured, validator)
}

/// Realm info endpoint double
struct Realm {
    hits: AtomicUsize,
    failing: AtomicBool,
}

async fn realm_info(State(realm): State<Arc<Realm>>) -> Response {
    realm.hits.fetch_add(1, Ordering::SeqCst);
    if realm.failing.load(Ordering::SeqCst) {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    let body: String = PUBLIC_KEY
        .lines()
        .filter(|line| !line.starts_with("-----"))
        .collect();
    Json(json!({
        "realm": "amazebot",
        "public_key": body,
        "token-service": "http://localhost/auth/realms/amazebot/protocol/openid-connect",
        "account-service": "http://localhost/auth/realms/amazebot/account",
        "tokens-not-before": 0
    }))
    .into_response()
}

async fn spawn_realm(failing: bool) -> (String, Arc<Realm>) {
    let realm = Arc::new(Realm {
        hits: AtomicUsize::new(0),
        failing: AtomicBool::new(failing),
    });
    let app = Router::new()
        .route("/auth/realms/amazebot", get(realm_info))
        .with_state(Arc::clone(&realm));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{addr}/auth/realms/amazebot"), realm)
}

// ── Shared secret (HMAC) ───────────────────────────────────────────────

#[tokio::test]
async fn test_hmac_token_role_check() {
    let authorizer = secured(None);
    let headers = bearer(&hs_token(&claims_t1()));

    assert!(authorizer.authorize(&headers, "player.view").await);
    assert!(!authorizer.authorize(&headers, "player.admin").await);
    assert!(!authorizer.authorize(&headers, "ui.player").await);
}

#[tokio::test]
async fn test_expired_token_denied() {
    let authorizer = secured(None);
    let headers = bearer(&hs_token(&claims_t2()));

    assert!(!authorizer.authorize(&headers, "player.view").await);
    assert_eq!(authorizer.username(&headers).await, "");
}

#[tokio::test]
async fn test_expired_error_reports_timestamps() {
    let authorizer = secured(None);
    let claims = claims_t2();
    let err = authorizer
        .validator()
        .validate(&hs_token(&claims))
        .await
        .unwrap_err();

    match err {
        AuthError::Expired { exp, now } => {
            assert_eq!(exp, claims["exp"].as_u64().unwrap());
            assert!(now > exp);
        }
        other => panic!("expected Expired, got {other:?}"),
    }
}

#[tokio::test]
async fn test_not_before_in_future_denied() {
    let authorizer = secured(None);
    let mut claims = claims_t1();
    claims["nbf"] = json!(unix_now() + 600);

    let err = authorizer
        .validator()
        .validate(&hs_token(&claims))
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::NotYetValid { .. }));
}

#[tokio::test]
async fn test_wrong_secret_is_signature_invalid() {
    let token = jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        &claims_t1(),
        &EncodingKey::from_secret(b"some-other-secret"),
    )
    .unwrap();

    let authorizer = secured(None);
    let err = authorizer.validator().validate(&token).await.unwrap_err();
    assert!(matches!(err, AuthError::SignatureInvalid));
    assert!(!authorizer.authorize(&bearer(&token), "player.view").await);
}

#[tokio::test]
async fn test_hmac_without_secret_is_key_unavailable() {
    let validator = TokenValidator::new(
        None,
        KeyProvider::new(None, Duration::from_secs(1)),
        Arc::new(ClaimCache::new()),
    );
    let err = validator.validate(&hs_token(&claims_t1())).await.unwrap_err();
    assert!(matches!(err, AuthError::KeyUnavailable(_)));
}

#[tokio::test]
async fn test_missing_exp_is_malformed() {
    let mut claims = claims_t1();
    claims.as_object_mut().unwrap().remove("exp");

    let authorizer = secured(None);
    let err = authorizer
        .validator()
        .validate(&hs_token(&claims))
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::MalformedToken(_)));
}

// ── Algorithm families ─────────────────────────────────────────────────

#[tokio::test]
async fn test_unsupported_algorithm_denied() {
    let authorizer = secured(None);

    for alg in ["ES256", "PS256", "EdDSA"] {
        let token = forged_token(alg, &claims_t1());
        let err = authorizer.validator().validate(&token).await.unwrap_err();
        assert!(
            matches!(err, AuthError::UnsupportedAlgorithm(_)),
            "{alg}: {err:?}"
        );
        assert!(!authorizer.authorize(&bearer(&token), "player.view").await);
    }
}

#[tokio::test]
async fn test_garbage_token_is_malformed() {
    let authorizer = secured(None);
    let err = authorizer.validator().validate("not-a-jwt").await.unwrap_err();
    assert!(matches!(err, AuthError::MalformedToken(_)));
}

// ── Realm key (RSA) ────────────────────────────────────────────────────

#[tokio::test]
async fn test_rsa_token_verified_with_realm_key() {
    let (url, realm) = spawn_realm(false).await;
    let authorizer = secured(Some(url));

    let headers = bearer(&rs_token(&claims_t1()));
    assert!(authorizer.authorize(&headers, "player.view").await);
    assert!(!authorizer.authorize(&headers, "player.admin").await);
    assert_eq!(authorizer.username(&headers).await, "joe");

    // A different token reuses the fetched key
    let mut claims = claims_t1();
    claims["preferred_username"] = json!("jack");
    let other = bearer(&rs_token(&claims));
    assert_eq!(authorizer.username(&other).await, "jack");

    assert_eq!(realm.hits.load(Ordering::SeqCst), 1);
    assert!(authorizer.validator().keys().is_cached());
}

#[tokio::test]
async fn test_realm_failure_is_not_cached() {
    let (url, realm) = spawn_realm(true).await;
    let authorizer = secured(Some(url));
    let token = rs_token(&claims_t1());

    let err = authorizer.validator().validate(&token).await.unwrap_err();
    assert!(matches!(err, AuthError::KeyUnavailable(_)));
    assert!(!authorizer.authorize(&bearer(&token), "player.view").await);
    assert!(!authorizer.validator().keys().is_cached());

    realm.failing.store(false, Ordering::SeqCst);
    assert!(authorizer.authorize(&bearer(&token), "player.view").await);
    assert!(authorizer.validator().keys().is_cached());
    assert_eq!(realm.hits.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_rsa_signature_checked_against_realm_key() {
    let (url, _realm) = spawn_realm(false).await;
    let authorizer = secured(Some(url));

    // RS256 header, signed by nobody
    let token = forged_token("RS256", &claims_t1());
    let err = authorizer.validator().validate(&token).await.unwrap_err();
    assert!(matches!(
        err,
        AuthError::SignatureInvalid | AuthError::MalformedToken(_)
    ));
}

#[tokio::test]
async fn test_concurrent_first_use_fetches_key_once() {
    let (url, realm) = spawn_realm(false).await;
    let authorizer = Arc::new(secured(Some(url)));

    let mut tasks = Vec::new();
    for i in 0..8 {
        let authorizer = Arc::clone(&authorizer);
        tasks.push(tokio::spawn(async move {
            let mut claims = claims_t1();
            claims["preferred_username"] = json!(format!("user{i}"));
            authorizer
                .authorize(&bearer(&rs_token(&claims)), "player.view")
                .await
        }));
    }
    for task in tasks {
        assert!(task.await.unwrap());
    }

    assert_eq!(realm.hits.load(Ordering::SeqCst), 1);
    assert_eq!(authorizer.validator().keys().fetch_count(), 1);
}

// ── Claim cache ────────────────────────────────────────────────────────

#[tokio::test]
async fn test_repeated_token_is_cache_hit() {
    let (url, realm) = spawn_realm(false).await;
    let authorizer = secured(Some(url));
    let headers = bearer(&rs_token(&claims_t1()));

    let first = authorizer.authorize(&headers, "player.view").await;
    let second = authorizer.authorize(&headers, "player.view").await;
    assert_eq!(first, second);
    assert!(second);

    let stats = authorizer.validator().cache().stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.size, 1);
    assert_eq!(realm.hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_expired_cache_entry_is_evicted() {
    let authorizer = secured(None);
    let claims = claims_t2();
    let token = hs_token(&claims);

    // Cached while it was still valid
    let cached: Claims = serde_json::from_value(claims).unwrap();
    authorizer.validator().cache().insert(&token, Arc::new(cached));
    assert!(authorizer.validator().cache().contains(&token));

    assert!(!authorizer.authorize(&bearer(&token), "player.view").await);
    assert!(!authorizer.validator().cache().contains(&token));
    assert_eq!(authorizer.validator().cache().stats().evictions, 1);
}

#[tokio::test]
async fn test_failed_tokens_are_not_cached() {
    let authorizer = secured(None);
    let token = hs_token(&claims_t2());

    assert!(!authorizer.authorize(&bearer(&token), "player.view").await);
    assert!(authorizer.validator().cache().is_empty());
}

// ── Headers and modes ──────────────────────────────────────────────────

#[tokio::test]
async fn test_missing_header_in_secured_mode() {
    let authorizer = secured(None);
    let headers = HeaderMap::new();

    assert!(!authorizer.authorize(&headers, "player.view").await);
    assert_eq!(authorizer.username(&headers).await, "");
}

#[tokio::test]
async fn test_non_bearer_scheme_denied() {
    let authorizer = secured(None);
    let token = hs_token(&claims_t1());

    for value in [format!("bearer {token}"), format!("Token {token}"), token.clone()] {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_str(&value).unwrap());
        assert!(!authorizer.authorize(&headers, "player.view").await, "{value}");
    }
}

#[tokio::test]
async fn test_open_mode_allows_everything() {
    let validator = TokenValidator::new(
        None,
        KeyProvider::new(None, Duration::from_secs(1)),
        Arc::new(ClaimCache::new()),
    );
    let authorizer = Authorizer::new(SecurityMode::Open, validator);

    assert!(authorizer.authorize(&HeaderMap::new(), "player.admin").await);
    assert!(authorizer.authorize(&bearer("garbage"), "player.admin").await);
    assert_eq!(authorizer.username(&HeaderMap::new()).await, "");

    // Username comes from the payload even when the signature is junk
    let headers = bearer(&forged_token("HS256", &claims_t2()));
    assert_eq!(authorizer.username(&headers).await, "joe");
}

#[tokio::test]
async fn test_from_config_uses_shared_secret() {
    let config = SecurityConfig {
        shared_secret: Some("amazebot-test-secret".to_string()),
        ..SecurityConfig::default()
    };
    let authorizer = Authorizer::from_config(&config);

    assert_eq!(authorizer.mode(), SecurityMode::Secured);
    assert!(
        authorizer
            .authorize(&bearer(&hs_token(&claims_t1())), "player.view")
            .await
    );
}
