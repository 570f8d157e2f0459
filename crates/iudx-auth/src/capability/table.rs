//! The capability table, loaded from JSON:
//!
//! ```json
//! { "rs1.example.org": { "consumer": { "temporal": ["/ngsi-ld/v1/temporal/entities"] } } }
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{AuthError, Result};

use super::set::{CapabilityId, CapabilitySet, MAX_CAPABILITIES};

/// Placeholder substituted with the resource group id inside API paths.
pub const RESOURCE_GROUP_PLACEHOLDER: &str = "{{RESOURCE_GROUP_ID}}";

const CONSUMER_ROLE: &str = "consumer";

type RoleCapabilities = BTreeMap<String, BTreeMap<String, Vec<String>>>;

/// Capabilities recognised by one resource server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerCapabilities {
    roles: RoleCapabilities,
    /// Consumer capability names; a name's position is its [`CapabilityId`].
    consumer_index: Vec<String>,
}

impl ServerCapabilities {
    fn new(roles: RoleCapabilities) -> Result<Self> {
        let consumer_index: Vec<String> = roles
            .get(CONSUMER_ROLE)
            .map(|caps| caps.keys().cloned().collect())
            .unwrap_or_default();

        if consumer_index.len() > MAX_CAPABILITIES {
            return Err(AuthError::Config(format!(
                "at most {MAX_CAPABILITIES} consumer capabilities per server"
            )));
        }

        Ok(Self {
            roles,
            consumer_index,
        })
    }

    /// APIs unlocked by `capability` of `role`, unsubstituted.
    pub fn apis(&self, role: &str, capability: &str) -> Option<&[String]> {
        self.roles
            .get(role)?
            .get(capability)
            .map(Vec::as_slice)
    }

    /// Number of consumer capabilities this server defines.
    pub fn consumer_len(&self) -> usize {
        self.consumer_index.len()
    }

    pub fn consumer_id(&self, name: &str) -> Option<CapabilityId> {
        self.consumer_index
            .iter()
            .position(|n| n == name)
            .map(|i| CapabilityId(i as u8))
    }

    /// Resolve consumer capability names into a set. Repeated names are
    /// folded; the first unknown name is returned as the error.
    pub fn consumer_set<S: AsRef<str>>(
        &self,
        names: &[S],
    ) -> std::result::Result<CapabilitySet, String> {
        names
            .iter()
            .map(|n| {
                self.consumer_id(n.as_ref())
                    .ok_or_else(|| n.as_ref().to_string())
            })
            .collect()
    }

    /// Capability names of a consumer set, in enumeration order.
    pub fn consumer_names(&self, set: CapabilitySet) -> Vec<String> {
        set.iter()
            .filter_map(|id| self.consumer_index.get(id.index()).cloned())
            .collect()
    }

    /// Union of the APIs of `capabilities` for `role`, first occurrence
    /// kept, with the resource group placeholder substituted.
    ///
    /// `None` when a capability is not defined for `role` or the union is
    /// empty.
    pub fn apis_for<S: AsRef<str>>(
        &self,
        role: &str,
        capabilities: &[S],
        resource_group: &str,
    ) -> Option<Vec<String>> {
        let mut out: Vec<String> = Vec::new();
        for cap in capabilities {
            for api in self.apis(role, cap.as_ref())? {
                let api = api.replace(RESOURCE_GROUP_PLACEHOLDER, resource_group);
                if !out.contains(&api) {
                    out.push(api);
                }
            }
        }
        (!out.is_empty()).then_some(out)
    }

    /// Split stored consumer capability names into the set of names this
    /// server still knows and the names it no longer defines.
    pub fn partition_consumer<S: AsRef<str>>(&self, names: &[S]) -> (CapabilitySet, Vec<String>) {
        let mut set = CapabilitySet::EMPTY;
        let mut unknown = Vec::new();
        for name in names {
            match self.consumer_id(name.as_ref()) {
                Some(id) => set.insert(id),
                None => unknown.push(name.as_ref().to_string()),
            }
        }
        (set, unknown)
    }

    /// Every API of every role, substituted for `resource_group`.
    pub fn all_apis(&self, resource_group: &str) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for caps in self.roles.values() {
            for apis in caps.values() {
                for api in apis {
                    let api = api.replace(RESOURCE_GROUP_PLACEHOLDER, resource_group);
                    if !out.contains(&api) {
                        out.push(api);
                    }
                }
            }
        }
        out
    }
}

/// Capabilities of every known resource server.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapabilityTable {
    servers: BTreeMap<String, ServerCapabilities>,
}

impl CapabilityTable {
    pub fn from_json(content: &str) -> Result<Self> {
        let raw: BTreeMap<String, RoleCapabilities> = serde_json::from_str(content)
            .map_err(|e| AuthError::Config(format!("capability table: {e}")))?;

        let servers = raw
            .into_iter()
            .map(|(server, roles)| {
                ServerCapabilities::new(roles).map(|caps| (server.to_ascii_lowercase(), caps))
            })
            .collect::<Result<_>>()?;

        Ok(Self { servers })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn server(&self, server: &str) -> Option<&ServerCapabilities> {
        self.servers.get(server)
    }

    pub fn servers(&self) -> impl Iterator<Item = &str> {
        self.servers.keys().map(String::as_str)
    }
}
