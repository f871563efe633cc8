//! Stable exit codes for the `tc-checkout` CLI.

/// Checkout reached the requested revision.
pub const OK: i32 = 0;
/// Checkout failed in one of its phases, or configuration could not be loaded.
pub const FAILED: i32 = 1;
/// Usage error or invalid checkout request; the directory was not touched.
pub const INVALID: i32 = 2;
