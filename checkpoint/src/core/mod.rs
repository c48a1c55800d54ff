//! Deterministic, pure building blocks.
//!
//! Nothing here touches a store or the filesystem: identities, the record
//! codec and size accounting operate on in-memory values only.

pub mod identity;
pub mod record;
pub mod size;
