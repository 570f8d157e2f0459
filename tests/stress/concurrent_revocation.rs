//! Concurrency test: parallel revocation of the same tokens.
//!
//! Validates that a token is counted as revoked exactly once no matter how
//! many callers race to revoke it.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::thread;

use serde_json::{json, Value};

use iudx_auth::config::RateLimit;
use iudx_auth::crypto::sha256_hex;
use iudx_auth::storage::users;
use iudx_auth::trust::DistinguishedName;
use iudx_auth::{
    AuthConfig, AuthService, CapabilityTable, Certificate, ProviderId, Response, Role, RoleStatus,
    ServiceRequest, Store,
};

const PROVIDER: &str = "provider@acme.com";
const CONSUMER: &str = "consumer@user.org";
const CAPS: &str = r#"{"rs1.example.org": {"consumer": {"temporal": ["/ngsi-ld/v1/temporal/entities"]}}}"#;

fn cert(email: &str, class: u8) -> Certificate {
    Certificate {
        subject: Some(DistinguishedName {
            cn: Some("user".into()),
            email: Some(email.into()),
            user_notice: Some(format!("class:{class}")),
            ..Default::default()
        }),
        issuer: DistinguishedName {
            email: Some("ca@iudx.org.in".into()),
            ..Default::default()
        },
        serial: "1C".repeat(20),
        fingerprint: vec!["1C"; 20].join(":"),
        chain: Default::default(),
    }
}

fn call(svc: &AuthService, path: &str, cert: Certificate, body: Value) -> Response {
    svc.handle(&ServiceRequest {
        method: "POST".into(),
        path: path.into(),
        certificate: cert,
        ip: "10.1.1.1".into(),
        origin: None,
        geo: Value::Null,
        headers: BTreeMap::new(),
        body,
    })
}

/// A service where the consumer holds `count` live tokens.
fn setup(count: usize) -> (Arc<AuthService>, Vec<String>) {
    let mut config = AuthConfig::default();
    config.rate_limit = RateLimit {
        window_secs: 60,
        max_tokens: 10_000,
    };

    let store = Store::memory().expect("in-memory store");
    store
        .with_conn(|conn| {
            let p = users::add_user(conn, PROVIDER, None, None, None)?;
            users::set_role(conn, p, Role::Provider, RoleStatus::Approved)?;
            let c = users::add_user(conn, CONSUMER, None, None, None)?;
            users::set_role(conn, c, Role::Consumer, RoleStatus::Approved)?;
            Ok(())
        })
        .expect("seed users");

    let svc = AuthService::new(config, store, CapabilityTable::from_json(CAPS).expect("caps"));
    let group = format!(
        "{}/rs1.example.org/grp",
        ProviderId::from_email(PROVIDER).expect("id").0
    );

    let resp = call(
        &svc,
        "/auth/v1/provider/access",
        cert(PROVIDER, 3),
        json!([{
            "user_email": CONSUMER,
            "user_role": "consumer",
            "item_id": group,
            "item_type": "resourcegroup",
            "capabilities": ["temporal"],
        }]),
    );
    assert_eq!(resp.status, 200, "grant failed: {}", resp.body);

    let request = json!({"request": [{
        "id": format!("{group}/item"),
        "apis": ["/ngsi-ld/v1/temporal/entities"],
    }]});

    let tokens = (0..count)
        .map(|_| {
            let resp = call(&svc, "/auth/v1/token", cert(CONSUMER, 2), request.clone());
            assert_eq!(resp.status, 200, "token failed: {}", resp.body);
            resp.body["token"].as_str().expect("token").to_string()
        })
        .collect();

    (Arc::new(svc), tokens)
}

fn revoked_count(resp: &Response) -> u64 {
    assert_eq!(resp.status, 200, "revoke failed: {}", resp.body);
    resp.body["num-tokens-revoked"].as_u64().expect("count")
}

#[test]
fn stress_consumers_race_to_revoke() {
    let (svc, tokens) = setup(25);
    let tokens = Arc::new(tokens);
    let total = Arc::new(Mutex::new(0u64));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let svc = Arc::clone(&svc);
        let tokens = Arc::clone(&tokens);
        let total = Arc::clone(&total);
        handles.push(thread::spawn(move || {
            let resp = call(
                &svc,
                "/auth/v1/token/revoke",
                cert(CONSUMER, 3),
                json!({ "tokens": tokens.as_slice() }),
            );
            *total.lock().unwrap() += revoked_count(&resp);
        }));
    }

    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(*total.lock().unwrap(), 25);
}

#[test]
fn stress_providers_race_to_revoke_hashes() {
    let (svc, tokens) = setup(25);
    let hashes: Vec<String> = tokens.iter().map(|t| sha256_hex(t)).collect();
    let hashes = Arc::new(hashes);
    let total = Arc::new(Mutex::new(0u64));

    let mut handles = Vec::new();
    for thread_id in 0..8 {
        let svc = Arc::clone(&svc);
        let hashes = Arc::clone(&hashes);
        let total = Arc::clone(&total);
        handles.push(thread::spawn(move || {
            // Alternate the order so threads collide mid-batch
            let mut batch: Vec<String> = hashes.to_vec();
            if thread_id % 2 == 1 {
                batch.reverse();
            }
            let resp = call(
                &svc,
                "/auth/v1/token/revoke",
                cert(PROVIDER, 3),
                json!({ "token-hashes": batch }),
            );
            *total.lock().unwrap() += revoked_count(&resp);
        }));
    }

    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(*total.lock().unwrap(), 25);

    // Every token is now dead for the resource server
    let rs = Certificate {
        subject: Some(DistinguishedName {
            cn: Some("rs1.example.org".into()),
            email: Some("admin@rs1.example.org".into()),
            user_notice: Some("class:1".into()),
            ..Default::default()
        }),
        ..cert(PROVIDER, 1)
    };
    for token in tokens.iter().take(5) {
        let resp = call(&svc, "/auth/v1/token/introspect", rs.clone(), json!({ "token": token }));
        assert_eq!(resp.status, 403);
    }
}

#[test]
fn stress_revoke_all_races_single_revokes() {
    let (svc, tokens) = setup(40);
    let total = Arc::new(Mutex::new(0u64));

    let mut handles = Vec::new();
    for chunk in tokens.chunks(10).map(|c| c.to_vec()) {
        let svc = Arc::clone(&svc);
        let total = Arc::clone(&total);
        handles.push(thread::spawn(move || {
            let resp = call(&svc, "/auth/v1/token/revoke", cert(CONSUMER, 3), json!({ "tokens": chunk }));
            *total.lock().unwrap() += revoked_count(&resp);
        }));
    }

    {
        let svc = Arc::clone(&svc);
        let total = Arc::clone(&total);
        handles.push(thread::spawn(move || {
            let body = json!({
                "serial": "1C".repeat(20),
                "fingerprint": vec!["1C"; 20].join(":"),
            });
            let resp = call(&svc, "/auth/v1/token/revoke-all", cert(CONSUMER, 3), body);
            *total.lock().unwrap() += revoked_count(&resp);
        }));
    }

    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(*total.lock().unwrap(), 40);
}
