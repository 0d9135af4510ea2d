//! Exit code constants for the leasepool CLI.
//!
//! CI jobs branch on these codes:
//! - 0: Success (machines assigned, released or renewed)
//! - 1: User error (bad args, invalid request, unreadable files)
//! - 2: Lock timeout (no machines within the configured bound)
//! - 3: Lock store unavailable after retries
//! - 4: Lock conflict (lease no longer held by the caller)

/// Successful execution.
pub const SUCCESS: i32 = 0;

/// User error: bad arguments, malformed pool file, or an invalid lock request.
pub const USER_ERROR: i32 = 1;

/// The acquisition deadline passed before the minimum machine count was locked.
pub const LOCK_TIMEOUT: i32 = 2;

/// The lock store kept failing after the retry budget was spent.
pub const STORE_FAILURE: i32 = 3;

/// The caller operated on a lease it does not hold.
pub const LOCK_CONFLICT: i32 = 4;
