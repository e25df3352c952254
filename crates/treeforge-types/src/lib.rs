//! Shared domain types for TreeForge.
//!
//! This crate contains the schema model (`ForgeTree` and friends), the
//! action response envelope, walk statuses, and the state error type.
//! Zero infrastructure dependencies -- only serde, serde_json, indexmap,
//! thiserror.

pub mod error;
pub mod response;
pub mod schema;
pub mod status;
