//! Access grant model.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::identity::Role;

/// Sentinel item id for grants not tied to a resource group.
pub const NO_ITEM: i64 = -1;

/// Largest grant id accepted from callers.
pub const MAX_GRANT_ID: i64 = 2_147_483_647;

/// What a grant is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ItemType {
    #[serde(rename = "resourcegroup")]
    ResourceGroup,
    #[serde(rename = "catalogue")]
    Catalogue,
    #[serde(rename = "provider-caps")]
    ProviderCaps,
}

impl ItemType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ResourceGroup => "resourcegroup",
            Self::Catalogue => "catalogue",
            Self::ProviderCaps => "provider-caps",
        }
    }
}

impl fmt::Display for ItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ItemType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "resourcegroup" => Ok(Self::ResourceGroup),
            "catalogue" => Ok(Self::Catalogue),
            "provider-caps" => Ok(Self::ProviderCaps),
            other => Err(format!("unknown item type '{other}'")),
        }
    }
}

/// A stored grant row.
#[derive(Debug, Clone, PartialEq)]
pub struct Grant {
    pub id: i64,
    /// User id of the granting provider.
    pub provider_id: i64,
    /// Role row of the grantee.
    pub role_id: i64,
    pub item_type: ItemType,
    pub item_id: i64,
    pub policy_text: String,
    pub policy_json: Value,
    pub active: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

/// One item of a create request. Fields of the wrong JSON type read as
/// absent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GrantRequest {
    pub user_email: Option<String>,
    pub user_role: Option<String>,
    pub item_id: Option<String>,
    pub item_type: Option<String>,
    pub capabilities: Option<Value>,
}

impl GrantRequest {
    pub fn from_value(item: &Value) -> Self {
        let text = |k: &str| item.get(k).and_then(Value::as_str).map(str::to_string);
        Self {
            user_email: text("user_email"),
            user_role: text("user_role"),
            item_id: text("item_id"),
            item_type: text("item_type"),
            capabilities: item.get("capabilities").filter(|v| !v.is_null()).cloned(),
        }
    }
}

/// One item of a delete request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeleteRequest {
    pub id: Option<Value>,
    pub capabilities: Option<Value>,
}

impl DeleteRequest {
    pub fn from_value(item: &Value) -> Self {
        Self {
            id: item.get("id").cloned(),
            capabilities: item.get("capabilities").filter(|v| !v.is_null()).cloned(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserName {
    pub title: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GrantItem {
    pub cat_id: String,
}

/// One active grant as shown to its provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GrantListing {
    pub id: i64,
    pub email: String,
    pub role: Role,
    pub user_name: UserName,
    pub item_type: ItemType,
    pub item: Option<GrantItem>,
    pub created: i64,
    pub capabilities: Option<Vec<String>>,
}

/// A provider who delegated grant management to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DelegatingProvider {
    pub email: String,
    pub title: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}
