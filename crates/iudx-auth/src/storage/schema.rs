//! Database schema. Times are Unix seconds; JSON columns hold text.

pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    email       TEXT NOT NULL UNIQUE,
    title       TEXT,
    first_name  TEXT,
    last_name   TEXT,
    created_at  INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS roles (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id     INTEGER NOT NULL REFERENCES users(id),
    role        TEXT NOT NULL CHECK (role IN ('provider', 'consumer', 'data ingester', 'onboarder', 'delegate', 'admin')),
    status      TEXT NOT NULL CHECK (status IN ('pending', 'approved', 'rejected')),
    created_at  INTEGER NOT NULL,
    updated_at  INTEGER NOT NULL,
    UNIQUE (user_id, role)
);

CREATE TABLE IF NOT EXISTS resource_groups (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    provider_id INTEGER NOT NULL REFERENCES users(id),
    cat_id      TEXT NOT NULL UNIQUE,
    created_at  INTEGER NOT NULL,
    updated_at  INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS access (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    provider_id      INTEGER NOT NULL REFERENCES users(id),
    role_id          INTEGER NOT NULL REFERENCES roles(id),
    policy_text      TEXT NOT NULL,
    policy_json      TEXT NOT NULL,
    access_item_id   INTEGER NOT NULL,
    access_item_type TEXT NOT NULL CHECK (access_item_type IN ('resourcegroup', 'catalogue', 'provider-caps')),
    status           TEXT NOT NULL CHECK (status IN ('active', 'deleted')),
    created_at       INTEGER NOT NULL,
    updated_at       INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_access_lookup
    ON access (provider_id, access_item_id, access_item_type, status);

CREATE TABLE IF NOT EXISTS capability (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    access_id   INTEGER NOT NULL REFERENCES access(id),
    capability  TEXT NOT NULL,
    status      TEXT NOT NULL CHECK (status IN ('active', 'deleted')),
    created_at  INTEGER NOT NULL,
    updated_at  INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_capability_access ON capability (access_id, status);

CREATE TABLE IF NOT EXISTS token (
    id               TEXT NOT NULL,
    token            TEXT NOT NULL PRIMARY KEY,
    expiry           INTEGER NOT NULL,
    request          TEXT NOT NULL,
    cert_serial      TEXT NOT NULL,
    cert_fingerprint TEXT NOT NULL,
    issued_at        INTEGER NOT NULL,
    resource_ids     TEXT NOT NULL,
    introspected     INTEGER NOT NULL DEFAULT 0,
    revoked          INTEGER NOT NULL DEFAULT 0,
    cert_class       INTEGER NOT NULL,
    server_token     TEXT NOT NULL,
    providers        TEXT NOT NULL,
    geoip            TEXT NOT NULL,
    api_called_from  TEXT
);

CREATE INDEX IF NOT EXISTS idx_token_id_issued ON token (id, issued_at);
CREATE INDEX IF NOT EXISTS idx_token_cert ON token (cert_serial, cert_fingerprint);

CREATE TABLE IF NOT EXISTS crl (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    issuer      TEXT NOT NULL,
    serial      TEXT NOT NULL,
    fingerprint TEXT NOT NULL
);
"#;
