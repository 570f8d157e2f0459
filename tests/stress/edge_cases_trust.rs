//! Edge case tests: certificate trust evaluation.
//!
//! Covers class extraction, sub-CA domain checks, revocation of leaf and
//! chain certificates, and foreign-CA downgrades.

use iudx_auth::storage::crl;
use iudx_auth::trust::{
    evaluate, ChainCertificate, DistinguishedName, IssuerChain, TrustAnchors, TrustError,
};
use iudx_auth::{AuthConfig, AuthError, AuthService, CapabilityTable, Certificate, Endpoint, RevocationEntry, Store};

const SERIAL: &str = "00AB12CD34EF56AB12CD34EF56AB12CD34EF5601";

fn fingerprint(byte: &str) -> String {
    vec![byte; 20].join(":")
}

fn cert(email: Option<&str>, notice: Option<&str>, issuer: &str) -> Certificate {
    Certificate {
        subject: Some(DistinguishedName {
            cn: Some("holder".into()),
            email: email.map(str::to_string),
            user_notice: notice.map(str::to_string),
            ..Default::default()
        }),
        issuer: DistinguishedName {
            cn: Some("issuer".into()),
            email: Some(issuer.into()),
            ..Default::default()
        },
        serial: SERIAL.into(),
        fingerprint: fingerprint("AB"),
        chain: IssuerChain::default(),
    }
}

fn anchors() -> TrustAnchors {
    TrustAnchors::default()
}

#[test]
fn edge_class_notice_variants() {
    let cases = [
        (Some("class:3"), Ok(3)),
        (Some("policy:x;class:2"), Ok(2)),
        (Some("class:0"), Err(TrustError::InvalidClass)),
        (Some("class:high"), Err(TrustError::InvalidClass)),
        (None, Err(TrustError::InvalidClass)),
    ];

    for (notice, expected) in cases {
        let c = cert(Some("alice@acme.com"), notice, "ca@iudx.org.in");
        let got = evaluate(&c, &[], Endpoint::CertificateInfo, &anchors()).map(|d| d.class);
        assert_eq!(got, expected, "notice {notice:?}");
    }
}

#[test]
fn edge_class_checked_before_email() {
    // A class-2 certificate without an email fails on class for a class-3 API
    let c = cert(None, Some("class:2"), "ca@iudx.org.in");
    assert_eq!(
        evaluate(&c, &[], Endpoint::Audit, &anchors()).unwrap_err(),
        TrustError::ClassRequired(3)
    );
    assert_eq!(
        evaluate(&c, &[], Endpoint::Token, &anchors()).unwrap_err(),
        TrustError::InvalidSubjectEmail
    );
}

#[test]
fn edge_missing_subject_or_cn() {
    let mut c = cert(Some("alice@acme.com"), Some("class:2"), "ca@iudx.org.in");
    c.subject.as_mut().unwrap().cn = None;
    let err = evaluate(&c, &[], Endpoint::Token, &anchors()).unwrap_err();
    assert_eq!(err, TrustError::MissingCommonName);
    assert!(matches!(AuthError::from(err), AuthError::Certificate(_)));

    c.subject = None;
    assert_eq!(
        evaluate(&c, &[], Endpoint::Token, &anchors()).unwrap_err(),
        TrustError::MissingSubject
    );
}

#[test]
fn edge_sub_ca_must_match_subject_domain() {
    let ok = cert(Some("alice@acme.com"), Some("class:2"), "iudx.sub.ca@acme.com");
    let d = evaluate(&ok, &[], Endpoint::Token, &anchors()).expect("same domain");
    assert!(d.platform_issued);

    let fraud = cert(Some("alice@evil.com"), Some("class:2"), "iudx.sub.ca@acme.com");
    assert_eq!(
        evaluate(&fraud, &[], Endpoint::Token, &anchors()).unwrap_err(),
        TrustError::FraudulentIssuer
    );
}

#[test]
fn edge_leaf_revocation_normalizes_serial_and_fingerprint() {
    let c = cert(Some("alice@acme.com"), Some("class:2"), "CA@iudx.org.in");
    let entry = RevocationEntry::new(
        "ca@iudx.org.in",
        SERIAL.trim_start_matches('0').to_ascii_lowercase(),
        fingerprint("ab").replace(':', ""),
    );
    assert_eq!(
        evaluate(&c, &[entry], Endpoint::Token, &anchors()).unwrap_err(),
        TrustError::Revoked
    );

    // Same serial from a different issuer does not apply
    let other = RevocationEntry::new("ca@iudx.io", SERIAL, fingerprint("AB"));
    assert!(evaluate(&c, &[other], Endpoint::Token, &anchors()).is_ok());
}

#[test]
fn edge_chain_revocation() {
    let sub_ca_serial = "77".repeat(20);
    let sub_ca_fp = fingerprint("77");

    let mut c = cert(Some("alice@acme.com"), Some("class:2"), "iudx.sub.ca@acme.com");
    c.chain = IssuerChain::new(vec![ChainCertificate {
        serial: Some(sub_ca_serial.clone()),
        fingerprint: Some(sub_ca_fp.clone()),
    }])
    .expect("chain");

    let crl = [RevocationEntry::new("ca@iudx.org.in", &sub_ca_serial, &sub_ca_fp)];
    assert_eq!(
        evaluate(&c, &crl, Endpoint::Token, &anchors()).unwrap_err(),
        TrustError::Revoked
    );

    // Entries by another issuer do not revoke the chain
    let crl = [RevocationEntry::new("ca@iudx.io", &sub_ca_serial, &sub_ca_fp)];
    assert!(evaluate(&c, &crl, Endpoint::Token, &anchors()).is_ok());

    // Resumed sessions carry no chain details
    c.chain = IssuerChain::new(vec![ChainCertificate::default()]).expect("chain");
    let crl = [RevocationEntry::new("ca@iudx.org.in", &sub_ca_serial, &sub_ca_fp)];
    assert!(evaluate(&c, &crl, Endpoint::Token, &anchors()).is_ok());
}

#[test]
fn edge_chain_length_is_bounded() {
    let links = vec![ChainCertificate::default(); 3];
    assert!(IssuerChain::new(links).is_err());
}

#[test]
fn edge_foreign_certificates() {
    let c = cert(Some("Bob@Example.org"), Some("class:5"), "ca@letsencrypt.org");
    let d = evaluate(&c, &[], Endpoint::Token, &anchors()).expect("foreign with email");
    assert_eq!(d.class, 2);
    assert_eq!(d.identity, "bob@example.org");
    assert!(!d.platform_issued);

    assert_eq!(
        evaluate(&c, &[], Endpoint::Revoke, &anchors()).unwrap_err(),
        TrustError::ClassRequired(3)
    );

    let d = evaluate(&c, &[], Endpoint::Introspect, &anchors()).expect("introspect");
    assert_eq!(d.class, 1);

    let anonymous = cert(None, None, "ca@letsencrypt.org");
    let d = evaluate(&anonymous, &[], Endpoint::ProviderAccess, &anchors()).expect("any class");
    assert_eq!(d.identity, "");
    assert_eq!(d.caller_name(), "holder");
}

#[test]
fn stress_large_revocation_list_from_store() {
    let store = Store::memory().expect("store");
    let entries: Vec<RevocationEntry> = (0..5_000)
        .map(|i| RevocationEntry::new("ca@iudx.org.in", format!("{i:040x}"), fingerprint("CD")))
        .collect();
    store
        .with_transaction(|conn| crl::replace(conn, &entries))
        .expect("replace crl");

    let svc = AuthService::new(AuthConfig::default(), store, CapabilityTable::default());

    let clean = cert(Some("alice@acme.com"), Some("class:3"), "ca@iudx.org.in");
    let d = svc.authenticate(&clean, Endpoint::Audit).expect("not revoked");
    assert_eq!(d.class, 3);

    let mut revoked = clean.clone();
    revoked.serial = format!("{:040x}", 4_321);
    revoked.fingerprint = fingerprint("cd");
    let err = svc.authenticate(&revoked, Endpoint::Audit).unwrap_err();
    assert!(matches!(err, AuthError::CertificateRevoked));
    assert_eq!(err.status(), 403);

    // Replacing the list takes effect on the next call
    svc.store()
        .with_conn(|conn| crl::replace(conn, &[]))
        .expect("clear crl");
    assert!(svc.authenticate(&revoked, Endpoint::Audit).is_ok());
}
