//! Integration test: provider-side grant management.
//!
//! Covers:
//! 1. Creating consumer grants and merging capabilities
//! 2. All-or-nothing batches
//! 3. Partial and whole deletes
//! 4. Delegates acting for a provider
//! 5. Onboarder and data ingester grants feeding token issuance
//! 6. Grants that would carry no API restriction
//! 7. Token expiry bounded by the shortest matching policy

use std::collections::BTreeMap;

use serde_json::{json, Value};

use iudx_auth::grant::compile;
use iudx_auth::storage::{grants, users};
use iudx_auth::trust::DistinguishedName;
use iudx_auth::{
    AuthConfig, AuthService, CapabilityTable, Certificate, ItemType, ProviderId, Response, Role,
    RoleStatus, ServiceRequest, Store,
};

const PROVIDER: &str = "provider@acme.com";
const DELEGATE: &str = "delegate@acme.com";
const CONSUMER: &str = "consumer@user.org";
const ONBOARDER: &str = "onboarder@acme.com";
const INGESTER: &str = "ingester@user.org";
const ACCESS: &str = "/auth/v1/provider/access";

const CAPS: &str = r#"{
    "rs1.example.org": {
        "consumer": {
            "temporal": ["/ngsi-ld/v1/temporal/entities"],
            "complex": ["/ngsi-ld/v1/entityOperations/query"],
            "subscription": ["/ngsi-ld/v1/subscription"]
        },
        "data ingester": { "default": ["/iudx/v1/adapter"] }
    }
}"#;

fn service() -> AuthService {
    let store = Store::memory().expect("in-memory store");
    store
        .with_conn(|conn| {
            let seed = [
                (PROVIDER, Role::Provider),
                (DELEGATE, Role::Delegate),
                (CONSUMER, Role::Consumer),
                (ONBOARDER, Role::Onboarder),
                (INGESTER, Role::DataIngester),
            ];
            for (email, role) in seed {
                let uid = users::add_user(conn, email, None, Some("Test"), Some("User"))?;
                users::set_role(conn, uid, role, RoleStatus::Approved)?;
            }
            Ok(())
        })
        .expect("seed users");
    let table = CapabilityTable::from_json(CAPS).expect("capability table");
    AuthService::new(AuthConfig::default(), store, table)
}

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
        serial: "0B".repeat(20),
        fingerprint: vec!["0B"; 20].join(":"),
        chain: Default::default(),
    }
}

fn call_as(
    svc: &AuthService,
    caller: &str,
    method: &str,
    path: &str,
    provider_email: Option<&str>,
    body: Value,
) -> Response {
    let mut headers = BTreeMap::new();
    if let Some(p) = provider_email {
        headers.insert("provider-email".to_string(), p.to_string());
    }
    svc.handle(&ServiceRequest {
        method: method.into(),
        path: path.into(),
        certificate: cert(caller, 3),
        ip: "10.0.0.9".into(),
        origin: None,
        geo: Value::Null,
        headers,
        body,
    })
}

fn provider(svc: &AuthService, method: &str, body: Value) -> Response {
    call_as(svc, PROVIDER, method, ACCESS, None, body)
}

fn group() -> String {
    format!("{}/rs1.example.org/grp", ProviderId::from_email(PROVIDER).expect("id").0)
}

fn consumer_grant(caps: &[&str]) -> Value {
    json!({
        "user_email": CONSUMER,
        "user_role": "consumer",
        "item_id": group(),
        "item_type": "resourcegroup",
        "capabilities": caps,
    })
}

fn listing(svc: &AuthService) -> Vec<Value> {
    let resp = provider(svc, "GET", Value::Null);
    assert_eq!(resp.status, 200, "list failed: {}", resp.body);
    resp.body.as_array().expect("listing array").clone()
}

fn consumer_entry(svc: &AuthService) -> Option<Value> {
    listing(svc).into_iter().find(|g| g["role"] == "consumer")
}

fn capabilities(entry: &Value) -> Vec<String> {
    let mut caps: Vec<String> = entry["capabilities"]
        .as_array()
        .expect("capabilities")
        .iter()
        .filter_map(|c| c.as_str().map(str::to_string))
        .collect();
    caps.sort();
    caps
}

#[test]
fn full_workflow_merge_capabilities() {
    let svc = service();

    // ── Step 1: First grant ─────────────────────────────────────────────
    let resp = provider(&svc, "POST", json!([consumer_grant(&["temporal"])]));
    assert_eq!(resp.status, 200, "create failed: {}", resp.body);
    assert_eq!(resp.body, json!({"success": true}));

    // ── Step 2: Second grant merges into the same row ───────────────────
    let resp = provider(&svc, "POST", json!([consumer_grant(&["complex"])]));
    assert_eq!(resp.status, 200, "merge failed: {}", resp.body);

    let grants = listing(&svc);
    assert_eq!(grants.len(), 1);
    assert_eq!(grants[0]["email"], CONSUMER);
    assert_eq!(grants[0]["item_type"], "resourcegroup");
    assert_eq!(grants[0]["item"]["cat_id"], group());
    assert_eq!(capabilities(&grants[0]), vec!["complex", "temporal"]);

    // ── Step 3: Re-granting an existing capability conflicts ────────────
    let resp = provider(&svc, "POST", json!([consumer_grant(&["temporal", "subscription"])]));
    assert_eq!(resp.status, 403);
    assert_eq!(resp.body["error"]["message"], "Rule exists for temporal");
    assert_eq!(resp.body["error"]["id"], 0);
}

#[test]
fn full_workflow_batches_are_all_or_nothing() {
    let svc = service();

    let bad = json!({
        "user_email": "not-an-email",
        "user_role": "consumer",
        "item_id": group(),
        "item_type": "resourcegroup",
        "capabilities": ["temporal"],
    });
    let resp = provider(&svc, "POST", json!([consumer_grant(&["temporal"]), bad]));
    assert_eq!(resp.status, 400);
    assert_eq!(resp.body["error"]["message"], "Invalid data (email)");
    assert_eq!(resp.body["error"]["id"], 1);
    assert!(listing(&svc).is_empty());

    let resp = provider(
        &svc,
        "POST",
        json!([consumer_grant(&["temporal"]), consumer_grant(&["temporal"])]),
    );
    assert_eq!(resp.status, 400);
    assert_eq!(resp.body["error"]["message"], "Invalid data (duplicate)");
    assert!(listing(&svc).is_empty());

    let resp = provider(&svc, "POST", json!([]));
    assert_eq!(resp.status, 400);
    assert_eq!(resp.body["error"]["message"], "Invalid data (body)");
}

#[test]
fn full_workflow_resource_must_belong_to_provider() {
    let svc = service();
    let foreign = ProviderId::from_email("someone@other.org").expect("id").0;

    let mut grant = consumer_grant(&["temporal"]);
    grant["item_id"] = json!(format!("{foreign}/rs1.example.org/grp"));
    let resp = provider(&svc, "POST", json!([grant]));
    assert_eq!(resp.status, 403);
    assert_eq!(resp.body["error"]["message"], "Provider does not match resource owner");

    let resp = provider(&svc, "POST", json!([consumer_grant(&["teleport"])]));
    assert_eq!(resp.status, 400);
    assert_eq!(resp.body["error"]["message"], "Invalid data (capabilities)");
}

#[test]
fn full_workflow_partial_and_whole_delete() {
    let svc = service();
    let resp = provider(&svc, "POST", json!([consumer_grant(&["temporal", "complex"])]));
    assert_eq!(resp.status, 200, "create failed: {}", resp.body);

    let id = consumer_entry(&svc).expect("consumer grant")["id"].clone();

    // ── Partial delete keeps the rest ───────────────────────────────────
    let resp = provider(&svc, "DELETE", json!([{"id": id, "capabilities": ["temporal"]}]));
    assert_eq!(resp.status, 200, "delete failed: {}", resp.body);
    let entry = consumer_entry(&svc).expect("grant still present");
    assert_eq!(capabilities(&entry), vec!["complex"]);

    // The withdrawn capability no longer authorizes a token
    let resp = call_as(
        &svc,
        CONSUMER,
        "POST",
        "/auth/v1/token",
        None,
        json!({"request": [{"id": format!("{}/x", group()), "apis": ["/ngsi-ld/v1/temporal/entities"]}]}),
    );
    assert_eq!(resp.status, 403);

    // ── Deleting a capability that is gone fails ────────────────────────
    let resp = provider(&svc, "DELETE", json!([{"id": id, "capabilities": ["temporal"]}]));
    assert_eq!(resp.status, 403);
    assert_eq!(resp.body["error"]["message"], "Invalid id");

    // ── Whole delete ────────────────────────────────────────────────────
    let resp = provider(&svc, "DELETE", json!([{"id": id}]));
    assert_eq!(resp.status, 200);
    assert!(consumer_entry(&svc).is_none());

    let resp = provider(&svc, "DELETE", json!([{"id": 99_999}]));
    assert_eq!(resp.status, 403);
    assert_eq!(resp.body["error"]["id"], 0);

    let resp = provider(&svc, "DELETE", json!([{"id": "nope"}]));
    assert_eq!(resp.status, 400);
    assert_eq!(resp.body["error"]["message"], "Invalid data (id)");
}

#[test]
fn full_workflow_delegate_acts_for_provider() {
    let svc = service();

    // ── Step 1: Not yet a delegate ──────────────────────────────────────
    let resp = call_as(&svc, DELEGATE, "GET", "/auth/v1/delegate/providers", None, Value::Null);
    assert_eq!(resp.status, 404);
    assert_eq!(resp.body["error"]["message"], "Not approved by any providers");

    let resp = call_as(&svc, DELEGATE, "POST", ACCESS, Some(PROVIDER), json!([consumer_grant(&["temporal"])]));
    assert_eq!(resp.status, 401);

    // ── Step 2: Provider appoints the delegate ──────────────────────────
    let resp = provider(&svc, "POST", json!([{"user_email": DELEGATE, "user_role": "delegate"}]));
    assert_eq!(resp.status, 200, "delegate grant failed: {}", resp.body);

    let resp = call_as(&svc, DELEGATE, "GET", "/auth/v1/delegate/providers", None, Value::Null);
    assert_eq!(resp.status, 200);
    assert_eq!(resp.body[0]["email"], PROVIDER);

    // ── Step 3: Delegate manages grants ─────────────────────────────────
    let resp = call_as(&svc, DELEGATE, "POST", ACCESS, None, json!([consumer_grant(&["temporal"])]));
    assert_eq!(resp.status, 400);
    assert_eq!(resp.body["error"]["message"], "Invalid data (provider_email)");

    let resp = call_as(&svc, DELEGATE, "POST", ACCESS, Some(PROVIDER), json!([consumer_grant(&["temporal"])]));
    assert_eq!(resp.status, 200, "delegated create failed: {}", resp.body);
    assert!(consumer_entry(&svc).is_some());

    let resp = call_as(
        &svc,
        DELEGATE,
        "POST",
        ACCESS,
        Some(PROVIDER),
        json!([{"user_email": DELEGATE, "user_role": "delegate"}]),
    );
    assert_eq!(resp.status, 403);
    assert_eq!(resp.body["error"]["message"], "Delegate cannot set delegate rule");

    let delegate_grant = listing(&svc)
        .into_iter()
        .find(|g| g["role"] == "delegate")
        .expect("delegate grant");
    let resp = call_as(
        &svc,
        DELEGATE,
        "DELETE",
        ACCESS,
        Some(PROVIDER),
        json!([{"id": delegate_grant["id"]}]),
    );
    assert_eq!(resp.status, 403);
    assert_eq!(resp.body["error"]["message"], "Delegate cannot delete delegate rules");

    // ── Step 4: Provider withdraws the delegation ───────────────────────
    let resp = provider(&svc, "DELETE", json!([{"id": delegate_grant["id"]}]));
    assert_eq!(resp.status, 200);
    let resp = call_as(&svc, DELEGATE, "GET", ACCESS, Some(PROVIDER), Value::Null);
    assert_eq!(resp.status, 401);
}

#[test]
fn full_workflow_onboarder_and_ingester_tokens() {
    let svc = service();
    let pid = ProviderId::from_email(PROVIDER).expect("id").0;

    let resp = provider(
        &svc,
        "POST",
        json!([
            {"user_email": ONBOARDER, "user_role": "onboarder"},
            {"user_email": INGESTER, "user_role": "data ingester",
             "item_id": group(), "item_type": "resourcegroup"},
        ]),
    );
    assert_eq!(resp.status, 200, "create failed: {}", resp.body);

    let resp = provider(&svc, "POST", json!([{"user_email": ONBOARDER, "user_role": "onboarder"}]));
    assert_eq!(resp.status, 403);
    assert_eq!(resp.body["error"]["message"], "Rule exists");

    // Onboarder gets the catalogue
    let resp = call_as(
        &svc,
        ONBOARDER,
        "POST",
        "/auth/v1/token",
        None,
        json!({"request": [format!("{pid}/catalogue.iudx.io/catalogue/crud")]}),
    );
    assert_eq!(resp.status, 200, "onboarder token failed: {}", resp.body);
    assert_eq!(resp.body["server-token"], json!({"catalogue.iudx.io": true}));

    // Ingester gets the adapter API only
    let resp = call_as(
        &svc,
        INGESTER,
        "POST",
        "/auth/v1/token",
        None,
        json!({"request": [{"id": format!("{}/sensor", group()), "apis": ["/iudx/v1/adapter"]}]}),
    );
    assert_eq!(resp.status, 200, "ingester token failed: {}", resp.body);

    let resp = call_as(
        &svc,
        INGESTER,
        "POST",
        "/auth/v1/token",
        None,
        json!({"request": [{"id": format!("{}/sensor", group()), "apis": ["/ngsi-ld/v1/temporal/entities"]}]}),
    );
    assert_eq!(resp.status, 403);
}

#[test]
fn full_workflow_grantee_must_hold_role() {
    let svc = service();
    let mut grant = consumer_grant(&["temporal"]);
    grant["user_email"] = json!("stranger@user.org");
    let resp = provider(&svc, "POST", json!([grant]));
    assert_eq!(resp.status, 403);
    assert_eq!(resp.body["error"]["message"], "Invalid accesser");
}

fn service_with_caps(caps: &str) -> AuthService {
    let svc = service();
    let table = CapabilityTable::from_json(caps).expect("capability table");
    AuthService::new(AuthConfig::default(), svc.store().clone(), table)
}

#[test]
fn full_workflow_grant_without_apis_is_rejected() {
    let svc = service_with_caps(
        r#"{
            "rs1.example.org": {
                "consumer": {
                    "temporal": ["/ngsi-ld/v1/temporal/entities"],
                    "complex": []
                }
            }
        }"#,
    );

    // No data ingester section for the server
    let resp = provider(
        &svc,
        "POST",
        json!([{"user_email": INGESTER, "user_role": "data ingester",
                "item_id": group(), "item_type": "resourcegroup"}]),
    );
    assert_eq!(resp.status, 400, "ingester grant accepted: {}", resp.body);
    assert_eq!(resp.body["error"]["message"], "Invalid data (capabilities)");
    assert_eq!(resp.body["error"]["id"], 0);
    assert!(listing(&svc).is_empty());

    let resp = call_as(
        &svc,
        INGESTER,
        "POST",
        "/auth/v1/token",
        None,
        json!({"request": [{"id": format!("{}/sensor", group()),
                            "apis": ["/ngsi-ld/v1/temporal/entities"]}]}),
    );
    assert_eq!(resp.status, 403);

    // A capability mapped to no APIs
    let resp = provider(&svc, "POST", json!([consumer_grant(&["complex"])]));
    assert_eq!(resp.status, 400);
    assert_eq!(resp.body["error"]["message"], "Invalid data (capabilities)");
    assert!(consumer_entry(&svc).is_none());

    let resp = provider(&svc, "POST", json!([consumer_grant(&["temporal"])]));
    assert_eq!(resp.status, 200, "create failed: {}", resp.body);
}

/// Insert a consumer grant with hand-written policy text on `cat_id`.
fn seed_consumer_policy(svc: &AuthService, cat_id: &str, text: &str) {
    svc.store()
        .with_conn(|conn| {
            let provider_uid = users::user_id(conn, PROVIDER)?.expect("provider");
            let consumer_uid = users::user_id(conn, CONSUMER)?.expect("consumer");
            let role_id = users::role_id(conn, consumer_uid, Role::Consumer)?.expect("role");
            let item_id = grants::resolve_or_insert_resource_group(conn, provider_uid, cat_id)?;
            let policy_json = compile(text)?;
            grants::insert_grant(
                conn,
                &grants::NewGrant {
                    provider_id: provider_uid,
                    role_id,
                    policy_text: text,
                    policy_json: &policy_json,
                    item_id,
                    item_type: ItemType::ResourceGroup,
                },
            )?;
            Ok(())
        })
        .expect("seed policy");
}

fn consumer_token(svc: &AuthService, body: Value) -> Response {
    call_as(svc, CONSUMER, "POST", "/auth/v1/token", None, body)
}

#[test]
fn full_workflow_token_expiry_follows_policy_duration() {
    let svc = service();
    let pid = ProviderId::from_email(PROVIDER).expect("id").0;
    let temporal = "/ngsi-ld/v1/temporal/entities";

    seed_consumer_policy(
        &svc,
        &format!("{pid}/rs1.example.org/grp"),
        &format!(r#"{CONSUMER} can access rs1.example.org/grp/* for 3600 seconds if api = "{temporal}""#),
    );
    seed_consumer_policy(
        &svc,
        &format!("{pid}/rs1.example.org/grp2"),
        &format!(r#"{CONSUMER} can access rs1.example.org/grp2/* for 2 hours if api = "{temporal}""#),
    );
    let item = |g: &str| json!({"id": format!("{pid}/rs1.example.org/{g}/sensor"), "apis": [temporal]});

    let resp = consumer_token(&svc, json!({"request": [item("grp")]}));
    assert_eq!(resp.status, 200, "token failed: {}", resp.body);
    assert_eq!(resp.body["expires-in"], 3600);

    let resp = consumer_token(&svc, json!({"request": [item("grp2")]}));
    assert_eq!(resp.status, 200, "token failed: {}", resp.body);
    assert_eq!(resp.body["expires-in"], 7200);

    // Shortest policy wins across items
    let resp = consumer_token(&svc, json!({"request": [item("grp2"), item("grp")]}));
    assert_eq!(resp.status, 200, "token failed: {}", resp.body);
    assert_eq!(resp.body["expires-in"], 3600);

    // A shorter token-time wins over the policy
    let resp = consumer_token(&svc, json!({"request": [item("grp")], "token-time": 600}));
    assert_eq!(resp.status, 200, "token failed: {}", resp.body);
    assert_eq!(resp.body["expires-in"], 600);

    // A longer token-time does not extend it
    let resp = consumer_token(&svc, json!({"request": [item("grp")], "token-time": 86_400}));
    assert_eq!(resp.status, 200, "token failed: {}", resp.body);
    assert_eq!(resp.body["expires-in"], 3600);
}
