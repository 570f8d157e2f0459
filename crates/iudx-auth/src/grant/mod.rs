//! Access grants: who may access what, decided by providers.
//!
//! The grant module provides:
//! - The grant data model and request shapes
//! - Policy text synthesis from capabilities
//! - Owner resolution (provider directly, or a delegate acting for one)
//! - Batch create / list / delete with all-or-nothing writes

pub mod manager;
pub mod policy_text;
pub mod types;

pub use manager::{resolve_owner, GrantManager, Owner};
pub use policy_text::{catalogue_rule, compile, resource_rule};
pub use types::{
    DeleteRequest, DelegatingProvider, Grant, GrantItem, GrantListing, GrantRequest, ItemType,
    UserName, MAX_GRANT_ID, NO_ITEM,
};
