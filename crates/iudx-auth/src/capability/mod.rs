//! Capability table and capability-set algebra.
//!
//! The table maps each resource server to the capabilities it recognises
//! per grantee role, and each capability to the server APIs it unlocks.
//! Consumer capabilities of a server are enumerated so sets of them can be
//! combined with plain bit operations.

pub mod set;
pub mod table;

pub use set::{CapabilityId, CapabilitySet, MAX_CAPABILITIES};
pub use table::{CapabilityTable, ServerCapabilities, RESOURCE_GROUP_PLACEHOLDER};
