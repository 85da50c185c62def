//! Allocation-pressure hook.
//!
//! Rust has no supported, portable equivalent of installing a process-wide
//! `new_handler`; the reference implementation used one to detect
//! allocation failure and trigger eviction. This is modeled instead as a
//! configurable soft byte budget tracked against the sum of all shards'
//! key-index sizes (an approximation of resident memory, not a precise
//! accounting), checked before every write-path mutation.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

pub struct MemoryGuard {
    budget_bytes: u64,
    used_bytes: AtomicU64,
    read_only: AtomicBool,
}

impl MemoryGuard {
    pub fn new(budget_bytes: u64) -> Self {
        Self {
            budget_bytes,
            used_bytes: AtomicU64::new(0),
            read_only: AtomicBool::new(false),
        }
    }

    pub fn record_allocation(&self, bytes: u64) {
        self.used_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_release(&self, bytes: u64) {
        self.used_bytes.fetch_sub(bytes.min(self.used_bytes.load(Ordering::Relaxed)), Ordering::Relaxed);
    }

    /// True once usage has crossed the budget; the caller should request
    /// eviction from each shard until this clears or all shards report
    /// empty, then enter read-only mode.
    pub fn under_pressure(&self) -> bool {
        self.used_bytes.load(Ordering::Relaxed) > self.budget_bytes
    }

    pub fn enter_read_only(&self) {
        self.read_only.store(true, Ordering::Relaxed);
    }

    pub fn clear_read_only(&self) {
        self.read_only.store(false, Ordering::Relaxed);
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pressure_triggers_once_budget_is_exceeded() {
        let guard = MemoryGuard::new(100);
        guard.record_allocation(50);
        assert!(!guard.under_pressure());
        guard.record_allocation(60);
        assert!(guard.under_pressure());
    }

    #[test]
    fn read_only_mode_is_sticky_until_cleared() {
        let guard = MemoryGuard::new(100);
        guard.enter_read_only();
        assert!(guard.is_read_only());
        guard.clear_read_only();
        assert!(!guard.is_read_only());
    }
}
