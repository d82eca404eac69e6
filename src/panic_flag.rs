//! The process-wide "panicked" flag (spec.md §7 error propagation policy).
//!
//! Shaped like [`crate::interrupt::InterruptFlag`]: a cheaply cloned handle
//! over a shared [`AtomicBool`], set once and never cleared by normal
//! operation (only [`crate::env::Environment::refresh`]/`remove` let a
//! caller get past it, per spec.md §4.5.1).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Clone, Default)]
pub struct PanicFlag(Arc<AtomicBool>);

impl PanicFlag {
    pub fn new() -> Self {
        PanicFlag(Arc::new(AtomicBool::new(false)))
    }

    pub fn set(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_clear_then_latches() {
        let flag = PanicFlag::new();
        assert!(!flag.is_set());
        flag.set();
        assert!(flag.is_set());
    }

    #[test]
    fn clone_shares_state() {
        let flag = PanicFlag::new();
        let handle = flag.clone();
        handle.set();
        assert!(flag.is_set());
    }
}
