//! Crate-wide constants.

/// First uid/gid considered a regular (non-system) account.
pub const STANDARD_ID_FLOOR: u32 = 1000;

/// First uid/gid handed out when allocating a system account.
pub const SYSTEM_ID_FLOOR: u32 = 100;

/// Default `shadow(5)` aging values used when synthesizing a missing entry.
pub const SHADOW_DEFAULT_MAX: i64 = 99999;
pub const SHADOW_DEFAULT_WARNING: i64 = 7;

/// Seconds an advisory `.lock` file of an external tool is waited for.
pub const FILE_LOCK_WAIT_MAX_SECS: u64 = 10;

/// Delay before a hint-triggered reload fires, coalescing event bursts.
pub const DEFAULT_SETTLE_DELAY_MS: u64 = 250;

/// Worker threads serving the event dispatcher queue.
pub const DEFAULT_DISPATCHER_WORKERS: usize = 2;

/// Watch count above which further registrations are logged.
pub const WATCH_BULK_LOG_THRESHOLD: usize = 64;

/// Event priorities: lower value means delivered first.
pub mod priorities {
    pub const HIGH: i32 = 0;
    pub const NORMAL: i32 = 100;
    pub const LOW: i32 = 200;
}
