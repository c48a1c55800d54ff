//! Stable exit codes for the `checkpoint` CLI.

/// Command succeeded.
pub const OK: i32 = 0;
/// Invalid arguments or configuration, or a store error.
pub const INVALID: i32 = 1;
/// `checkpoint show` found nothing stored under the key.
pub const NOT_FOUND: i32 = 2;
