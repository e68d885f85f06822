//! Memory budgeting for the host backend.
//!
//! Provides system memory detection and environment variable overrides.
//!
//! # Environment Variables
//!
//! - `CBCT_MEM_MB` - Explicit memory limit in megabytes
//! - `CBCT_MEM_PCT` - Maximum RAM as percentage (10-95)
//! - `CBCT_DEVICES` - Number of logical devices to expose

use std::env;
use std::sync::OnceLock;

/// Default safety margin - use at most 80% of detected memory.
pub const SAFE_MEMORY_FRACTION: f64 = 0.80;

/// Cache for system memory detection.
static SYSTEM_MEMORY: OnceLock<u64> = OnceLock::new();

/// Detect total system RAM in bytes.
pub fn system_memory() -> u64 {
    *SYSTEM_MEMORY.get_or_init(|| {
        sys_info::mem_info()
            .map(|m| m.total * 1024) // KB to bytes
            .unwrap_or(8 * 1024 * 1024 * 1024) // 8 GB fallback
    })
}

/// Get the memory budget considering environment overrides.
///
/// Priority:
/// 1. `CBCT_MEM_MB` - explicit MB limit
/// 2. `CBCT_MEM_PCT` - percentage of system RAM
/// 3. Default: 80% of system RAM
pub fn available_memory() -> u64 {
    if let Some(mb) = env_u64("CBCT_MEM_MB") {
        return mb * 1024 * 1024;
    }

    let pct = env_u64("CBCT_MEM_PCT").unwrap_or((SAFE_MEMORY_FRACTION * 100.0) as u64);
    let pct = pct.clamp(10, 95); // Sanity bounds

    system_memory() * pct / 100
}

/// Number of logical devices requested via the environment, if any.
pub fn device_count_override() -> Option<usize> {
    env_u64("CBCT_DEVICES").map(|n| n.max(1) as usize)
}

fn env_u64(key: &str) -> Option<u64> {
    env::var(key).ok().and_then(|v| v.parse().ok())
}

/// Format bytes as human-readable string.
pub fn format_bytes(bytes: u64) -> String {
    if bytes >= 1024 * 1024 * 1024 {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    } else if bytes >= 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else if bytes >= 1024 {
        format!("{} KB", bytes / 1024)
    } else {
        format!("{} B", bytes)
    }
}
