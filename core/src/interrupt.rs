use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{LinkError, Result};

/// Shared user-cancel flag, set from a signal handler and polled by every
/// waiting loop in the engines
#[derive(Debug, Clone, Default)]
pub struct Interrupt(Arc<AtomicBool>);

impl Interrupt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    /// `Err(Interrupted)` once the flag is set
    pub fn check(&self) -> Result<()> {
        if self.is_set() {
            Err(LinkError::Interrupted)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_flag() {
        let interrupt = Interrupt::new();
        let handle = interrupt.clone();
        assert!(interrupt.check().is_ok());
        handle.trigger();
        assert!(interrupt.is_set());
        assert!(matches!(interrupt.check(), Err(LinkError::Interrupted)));
        interrupt.clear();
        assert!(!handle.is_set());
    }
}
