//! Platform roles and their approval states.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Role {
    #[serde(rename = "provider")]
    Provider,
    #[serde(rename = "consumer")]
    Consumer,
    #[serde(rename = "data ingester")]
    DataIngester,
    #[serde(rename = "onboarder")]
    Onboarder,
    #[serde(rename = "delegate")]
    Delegate,
    #[serde(rename = "admin")]
    Admin,
}

impl Role {
    /// Roles a provider may grant access to.
    pub const GRANTABLE: [Role; 4] = [
        Role::Consumer,
        Role::DataIngester,
        Role::Onboarder,
        Role::Delegate,
    ];

    /// Roles allowed to request tokens.
    pub const TOKEN_REQUESTERS: [Role; 3] = [Role::Consumer, Role::Onboarder, Role::DataIngester];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Provider => "provider",
            Self::Consumer => "consumer",
            Self::DataIngester => "data ingester",
            Self::Onboarder => "onboarder",
            Self::Delegate => "delegate",
            Self::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "provider" => Ok(Self::Provider),
            "consumer" => Ok(Self::Consumer),
            "data ingester" => Ok(Self::DataIngester),
            "onboarder" => Ok(Self::Onboarder),
            "delegate" => Ok(Self::Delegate),
            "admin" => Ok(Self::Admin),
            other => Err(format!("unknown role '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoleStatus {
    Pending,
    Approved,
    Rejected,
}

impl RoleStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }
}

impl FromStr for RoleStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            other => Err(format!("unknown role status '{other}'")),
        }
    }
}
