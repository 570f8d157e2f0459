//! Server configuration.
//!
//! Loaded from a TOML file; every field has a default so an empty file (or
//! no file at all) yields a working setup.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{AuthError, Result};

/// Hard ceiling on any token lifetime: one year.
pub const MAX_TOKEN_TIME: i64 = 31_536_000;

/// Token issuance rate limit, per identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimit {
    pub window_secs: i64,
    pub max_tokens: i64,
}

impl Default for RateLimit {
    fn default() -> Self {
        Self {
            window_secs: 60,
            max_tokens: 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Issuer prefix of every main token.
    pub server_name: String,
    pub catalogue_server: String,
    /// Issuer emails of certificates signed by the platform root CAs.
    pub root_ca_emails: Vec<String>,
    /// Root CA whose revocation entries cover sub-CA chain certificates.
    pub chain_root_ca_email: String,
    pub sub_ca_prefix: String,
    pub max_token_time: i64,
    pub rate_limit: RateLimit,
    pub database_path: PathBuf,
    pub capabilities_path: PathBuf,
    pub listen: SocketAddr,
    pub workers: usize,
    pub request_timeout_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            server_name: "auth.iudx.org.in".into(),
            catalogue_server: "catalogue.iudx.io".into(),
            root_ca_emails: vec!["ca@iudx.org.in".into(), "ca@iudx.io".into()],
            chain_root_ca_email: "ca@iudx.org.in".into(),
            sub_ca_prefix: "iudx.sub.ca@".into(),
            max_token_time: MAX_TOKEN_TIME,
            rate_limit: RateLimit::default(),
            database_path: PathBuf::from("iudx-auth.db"),
            capabilities_path: PathBuf::from("capabilities.json"),
            listen: SocketAddr::from(([127, 0, 0, 1], 7443)),
            workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            request_timeout_secs: 5,
        }
    }
}

impl AuthConfig {
    /// Parse a TOML document.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| AuthError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// The `{catalogue_server}/catalogue/crud` resource granted to onboarders.
    pub fn catalogue_resource(&self) -> String {
        format!("{}/catalogue/crud", self.catalogue_server)
    }

    fn validate(&self) -> Result<()> {
        if self.max_token_time < 1 || self.max_token_time > MAX_TOKEN_TIME {
            return Err(AuthError::Config(format!(
                "max_token_time must be in 1..={MAX_TOKEN_TIME}"
            )));
        }
        if self.rate_limit.window_secs < 1 || self.rate_limit.max_tokens < 1 {
            return Err(AuthError::Config(
                "rate_limit values must be positive".into(),
            ));
        }
        if self.workers == 0 {
            return Err(AuthError::Config("workers must be at least 1".into()));
        }
        Ok(())
    }
}
