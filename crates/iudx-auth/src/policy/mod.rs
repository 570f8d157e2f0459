//! Attribute-based access policies.
//!
//! A policy is a list of rules of the form
//!
//! ```text
//! alice@acme.com can access rs1.example.org/streetlight/* for 1 week
//!     if api = "/ngsi-ld/v1/entities" or api = "/ngsi-ld/v1/temporal/entities"
//! ```
//!
//! Rules are compiled once when a grant is written and stored as JSON next
//! to their source text. At token issuance the compiled rules are evaluated
//! against a [`PolicyContext`].

pub mod context;
pub mod rule;

pub use context::{AttrValue, GeoInfo, PolicyContext};
pub use rule::{evaluate, parse, CompareOp, Condition, Evaluation, PolicyError, Rule};
