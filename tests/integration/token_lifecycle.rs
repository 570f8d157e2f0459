//! Integration test: token lifecycle through the service entry point.
//!
//! Tests the complete lifecycle:
//! 1. Onboard a provider and a consumer
//! 2. Provider grants the consumer capabilities on a resource group
//! 3. Consumer requests a token
//! 4. Resource server introspects it
//! 5. Consumer and provider revoke, then audit

use std::collections::BTreeMap;

use serde_json::{json, Value};

use iudx_auth::config::RateLimit;
use iudx_auth::crypto::sha256_hex;
use iudx_auth::storage::{crl, tokens, users};
use iudx_auth::trust::DistinguishedName;
use iudx_auth::{
    AuthConfig, AuthService, CapabilityTable, Certificate, ProviderId, Response, RevocationEntry,
    Role, RoleStatus, ServiceRequest, Store,
};

const PROVIDER: &str = "provider@acme.com";
const CONSUMER: &str = "consumer@user.org";
const RS1: &str = "rs1.example.org";
const RS2: &str = "rs2.example.org";
const TEMPORAL: &str = "/ngsi-ld/v1/temporal/entities";

const CAPS: &str = r#"{
    "rs1.example.org": {
        "consumer": {
            "temporal": ["/ngsi-ld/v1/temporal/entities"],
            "complex": ["/ngsi-ld/v1/entityOperations/query"],
            "subscription": ["/ngsi-ld/v1/subscription"]
        },
        "data ingester": { "default": ["/iudx/v1/adapter"] }
    },
    "rs2.example.org": {
        "consumer": { "temporal": ["/ngsi-ld/v1/temporal/entities"] }
    }
}"#;

fn service_with(config: AuthConfig) -> AuthService {
    let store = Store::memory().expect("in-memory store");
    store
        .with_conn(|conn| {
            let p = users::add_user(conn, PROVIDER, None, Some("Pat"), Some("Provider"))?;
            users::set_role(conn, p, Role::Provider, RoleStatus::Approved)?;
            let c = users::add_user(conn, CONSUMER, None, Some("Casey"), None)?;
            users::set_role(conn, c, Role::Consumer, RoleStatus::Approved)?;
            Ok(())
        })
        .expect("seed users");
    let table = CapabilityTable::from_json(CAPS).expect("capability table");
    AuthService::new(config, store, table)
}

fn service() -> AuthService {
    service_with(AuthConfig::default())
}

fn cert(email: &str, cn: &str, class: u8) -> Certificate {
    Certificate {
        subject: Some(DistinguishedName {
            cn: Some(cn.into()),
            email: Some(email.into()),
            user_notice: Some(format!("class:{class}")),
            ..Default::default()
        }),
        issuer: DistinguishedName {
            cn: Some("IUDX CA".into()),
            email: Some("ca@iudx.org.in".into()),
            ..Default::default()
        },
        serial: "4A".repeat(20),
        fingerprint: vec!["4A"; 20].join(":"),
        chain: Default::default(),
    }
}

fn call(svc: &AuthService, method: &str, path: &str, cert: Certificate, body: Value) -> Response {
    svc.handle(&ServiceRequest {
        method: method.into(),
        path: path.into(),
        certificate: cert,
        ip: "10.0.0.7".into(),
        origin: Some("https://portal.example.org".into()),
        geo: json!({"country": "IN", "city": "Bengaluru"}),
        headers: BTreeMap::new(),
        body,
    })
}

fn provider_id() -> String {
    ProviderId::from_email(PROVIDER).expect("provider id").0
}

fn group(server: &str) -> String {
    format!("{}/{server}/grp", provider_id())
}

fn item(server: &str) -> String {
    format!("{}/item1", group(server))
}

fn grant(svc: &AuthService, server: &str, caps: &[&str]) {
    let resp = call(
        svc,
        "POST",
        "/auth/v1/provider/access",
        cert(PROVIDER, "provider", 3),
        json!([{
            "user_email": CONSUMER,
            "user_role": "consumer",
            "item_id": group(server),
            "item_type": "resourcegroup",
            "capabilities": caps,
        }]),
    );
    assert_eq!(resp.status, 200, "grant failed: {}", resp.body);
}

fn request_token(svc: &AuthService, body: Value) -> Response {
    call(svc, "POST", "/auth/v1/token", cert(CONSUMER, "consumer", 2), body)
}

fn temporal_request(server: &str) -> Value {
    json!({"id": item(server), "methods": ["GET"], "apis": [TEMPORAL]})
}

fn issued_rows(svc: &AuthService) -> usize {
    svc.store()
        .with_conn(|conn| tokens::issued_to(conn, CONSUMER, 0))
        .expect("query tokens")
        .len()
}

#[test]
fn full_workflow_grant_to_revocation() {
    let svc = service();

    // ── Step 1: Certificate info ────────────────────────────────────────
    let resp = call(&svc, "GET", "/auth/v1/certificate-info", cert(PROVIDER, "provider", 3), json!({}));
    assert_eq!(resp.status, 200);
    assert_eq!(resp.body["id"], PROVIDER);
    assert_eq!(resp.body["certificate-class"], 3);
    assert_eq!(resp.body["roles"], json!(["provider"]));

    // ── Step 2: Grant ───────────────────────────────────────────────────
    grant(&svc, RS1, &["temporal"]);

    // ── Step 3: Request a token ─────────────────────────────────────────
    let resp = request_token(&svc, json!({"request": [temporal_request(RS1)]}));
    assert_eq!(resp.status, 200, "token failed: {}", resp.body);
    assert_eq!(resp.body["expires-in"], 604_800);
    assert_eq!(resp.body["server-token"], json!({"rs1.example.org": true}));

    let token = resp.body["token"].as_str().expect("token string").to_string();
    assert!(token.starts_with(&format!("auth.iudx.org.in/{CONSUMER}/")));

    // ── Step 4: Introspect as the resource server ───────────────────────
    let rs_cert = cert("admin@rs1.example.org", RS1, 1);
    let resp = call(&svc, "POST", "/auth/v1/token/introspect", rs_cert.clone(), json!({"token": token}));
    assert_eq!(resp.status, 200, "introspect failed: {}", resp.body);
    assert_eq!(resp.body["consumer"], CONSUMER);
    assert_eq!(resp.body["consumer-certificate-class"], 2);
    assert_eq!(resp.body["request"][0]["id"], item(RS1));
    assert_eq!(resp.body["request"][0]["apis"], json!([TEMPORAL]));

    // A different server sees nothing
    let other = cert("admin@rs2.example.org", RS2, 1);
    let resp = call(&svc, "POST", "/auth/v1/token/introspect", other, json!({"token": token}));
    assert_eq!(resp.status, 403);
    assert_eq!(resp.body["error"]["message"], "Invalid 'token'");

    // ── Step 5: Consumer revokes ────────────────────────────────────────
    let revoker = cert(CONSUMER, "consumer", 3);
    let resp = call(&svc, "POST", "/auth/v1/token/revoke", revoker.clone(), json!({"tokens": [token]}));
    assert_eq!(resp.status, 200);
    assert_eq!(resp.body["num-tokens-revoked"], 1);

    // Revoking again changes nothing
    let resp = call(&svc, "POST", "/auth/v1/token/revoke", revoker.clone(), json!({"tokens": [token]}));
    assert_eq!(resp.status, 200);
    assert_eq!(resp.body["num-tokens-revoked"], 0);

    let resp = call(&svc, "POST", "/auth/v1/token/introspect", rs_cert, json!({"token": token}));
    assert_eq!(resp.status, 403);

    // ── Step 6: Audit ───────────────────────────────────────────────────
    let resp = call(&svc, "POST", "/auth/v1/audit/tokens", revoker, json!({"hours": 1}));
    assert_eq!(resp.status, 200);
    let issued = resp.body["as-consumer"].as_array().expect("as-consumer");
    assert_eq!(issued.len(), 1);
    assert_eq!(issued[0]["revoked"], true);
    assert_eq!(issued[0]["introspected"], true);
}

#[test]
fn full_workflow_provider_revokes_by_hash() {
    let svc = service();
    grant(&svc, RS1, &["temporal"]);

    let resp = request_token(&svc, json!({"request": temporal_request(RS1)}));
    assert_eq!(resp.status, 200, "token failed: {}", resp.body);
    let token = resp.body["token"].as_str().expect("token").to_string();
    let hash = sha256_hex(&token);

    let provider = cert(PROVIDER, "provider", 3);
    let body = json!({"token-hashes": [hash]});
    let resp = call(&svc, "POST", "/auth/v1/token/revoke", provider.clone(), body.clone());
    assert_eq!(resp.body["num-tokens-revoked"], 1);

    let resp = call(&svc, "POST", "/auth/v1/token/revoke", provider.clone(), body);
    assert_eq!(resp.status, 200);
    assert_eq!(resp.body["num-tokens-revoked"], 0);

    // The provider's resources are withdrawn from the token
    let rs_cert = cert("admin@rs1.example.org", RS1, 1);
    let resp = call(&svc, "POST", "/auth/v1/token/introspect", rs_cert, json!({"token": token}));
    assert_eq!(resp.status, 403);

    let resp = call(&svc, "POST", "/auth/v1/audit/tokens", provider, json!({"hours": 1}));
    let named = resp.body["as-provider"].as_array().expect("as-provider");
    assert_eq!(named.len(), 1);
    assert_eq!(named[0]["consumer"], CONSUMER);
    assert_eq!(named[0]["revoked"], true);
}

#[test]
fn full_workflow_multi_server_sub_tokens() {
    let svc = service();
    grant(&svc, RS1, &["temporal"]);
    grant(&svc, RS2, &["temporal"]);

    let resp = request_token(
        &svc,
        json!({"request": [temporal_request(RS1), temporal_request(RS2)], "token-time": 300}),
    );
    assert_eq!(resp.status, 200, "token failed: {}", resp.body);
    assert_eq!(resp.body["expires-in"], 300);

    let token = resp.body["token"].as_str().expect("token").to_string();
    let rs1_token = resp.body["server-token"][RS1].as_str().expect("rs1 sub-token").to_string();
    assert!(rs1_token.starts_with(&format!("{RS1}/")));
    assert!(resp.body["server-token"][RS2].is_string());

    let rs_cert = cert("admin@rs1.example.org", RS1, 1);

    // Without the sub-token
    let resp = call(&svc, "POST", "/auth/v1/token/introspect", rs_cert.clone(), json!({"token": token}));
    assert_eq!(resp.status, 403);
    assert_eq!(resp.body["error"]["message"], "Invalid 'server-token'");

    // With it, only rs1 resources are visible
    let resp = call(
        &svc,
        "POST",
        "/auth/v1/token/introspect",
        rs_cert.clone(),
        json!({"token": token, "server-token": rs1_token}),
    );
    assert_eq!(resp.status, 200, "introspect failed: {}", resp.body);
    let request = resp.body["request"].as_array().expect("request");
    assert_eq!(request.len(), 1);
    assert_eq!(request[0]["id"], item(RS1));

    // Consumer-supplied request must match as sets
    let resp = call(
        &svc,
        "POST",
        "/auth/v1/token/introspect",
        rs_cert,
        json!({
            "token": token,
            "server-token": rs1_token,
            "request": [{"id": item(RS1), "methods": ["GET"], "apis": [TEMPORAL, "/other"]}],
        }),
    );
    assert_eq!(resp.status, 403);
}

#[test]
fn full_workflow_all_or_nothing_issuance() {
    let svc = service();
    grant(&svc, RS1, &["temporal"]);

    let ungranted = json!({
        "id": format!("{}/{RS1}/other-grp/item", provider_id()),
        "apis": [TEMPORAL],
    });
    let resp = request_token(&svc, json!({"request": [temporal_request(RS1), ungranted]}));
    assert_eq!(resp.status, 403);
    assert_eq!(issued_rows(&svc), 0);

    // Capability not granted
    let resp = request_token(
        &svc,
        json!({"request": [{"id": item(RS1), "apis": ["/ngsi-ld/v1/subscription"]}]}),
    );
    assert_eq!(resp.status, 403);
    assert_eq!(resp.body["error"]["message"], "Unauthorized");
    assert_eq!(issued_rows(&svc), 0);
}

#[test]
fn full_workflow_request_validation() {
    let svc = service();
    grant(&svc, RS1, &["temporal"]);

    let resp = request_token(&svc, json!({}));
    assert_eq!(resp.status, 400);
    assert_eq!(
        resp.body["error"]["message"],
        "'request' must be a valid JSON array with at least 1 element"
    );

    let resp = request_token(&svc, json!({"request": [item(RS1)]}));
    assert_eq!(resp.status, 400);
    assert_eq!(resp.body["error"]["message"], "'apis' is required for this id");

    let resp = request_token(&svc, json!({"request": [{"id": item(RS1), "apis": ["/nope"]}]}));
    assert_eq!(resp.status, 400);
    assert_eq!(resp.body["error"]["message"], "Invalid api");
    assert!(resp.body.get("//").is_some());

    let resp = request_token(&svc, json!({"request": [temporal_request(RS1)], "token-time": 0}));
    assert_eq!(resp.status, 400);

    let resp = request_token(
        &svc,
        json!({"request": [{"id": format!("{}/{RS1}/unknown/x", provider_id()), "apis": [TEMPORAL]}]}),
    );
    assert_eq!(resp.status, 403);
    assert_eq!(resp.body["error"]["invalid-input"], format!("{}/{RS1}/unknown/x", provider_id()));
}

#[test]
fn full_workflow_revoke_all_by_certificate() {
    let svc = service();
    grant(&svc, RS1, &["temporal"]);

    for _ in 0..2 {
        let resp = request_token(&svc, json!({"request": [temporal_request(RS1)]}));
        assert_eq!(resp.status, 200);
    }

    let consumer = cert(CONSUMER, "consumer", 3);
    let body = json!({
        "serial": "4A".repeat(20),
        "fingerprint": vec!["4A"; 20].join(":"),
    });
    let resp = call(&svc, "POST", "/auth/v1/token/revoke-all", consumer.clone(), body.clone());
    assert_eq!(resp.status, 200, "revoke-all failed: {}", resp.body);
    assert_eq!(resp.body["num-tokens-revoked"], 2);

    let resp = call(&svc, "POST", "/auth/v1/token/revoke-all", consumer.clone(), body);
    assert_eq!(resp.body["num-tokens-revoked"], 0);

    let resp = call(
        &svc,
        "POST",
        "/auth/v1/token/revoke-all",
        consumer,
        json!({"serial": "xyz", "fingerprint": "aa"}),
    );
    assert_eq!(resp.status, 400);
    assert_eq!(resp.body["error"]["message"], "Invalid 'serial'");
}

#[test]
fn full_workflow_rate_limit() {
    let mut config = AuthConfig::default();
    config.rate_limit = RateLimit {
        window_secs: 3600,
        max_tokens: 2,
    };
    let svc = service_with(config);
    grant(&svc, RS1, &["temporal"]);

    // Refused only once the window already holds more than `max_tokens`
    for _ in 0..3 {
        let resp = request_token(&svc, json!({"request": [temporal_request(RS1)]}));
        assert_eq!(resp.status, 200);
    }

    let resp = request_token(&svc, json!({"request": [temporal_request(RS1)]}));
    assert_eq!(resp.status, 429);
    assert_eq!(resp.body["error"]["message"], "Too many requests");
    assert_eq!(issued_rows(&svc), 3);
}

#[test]
fn full_workflow_revoked_certificate_is_refused() {
    let svc = service();
    grant(&svc, RS1, &["temporal"]);

    svc.store()
        .with_conn(|conn| {
            crl::replace(
                conn,
                &[RevocationEntry::new("ca@iudx.org.in", "4A".repeat(20), vec!["4A"; 20].join(":"))],
            )
        })
        .expect("replace crl");

    let resp = request_token(&svc, json!({"request": [temporal_request(RS1)]}));
    assert_eq!(resp.status, 403);
    assert_eq!(resp.body["error"]["message"], "Certificate has been revoked");
}
