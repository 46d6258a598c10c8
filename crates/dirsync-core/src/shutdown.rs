//! Process-wide shutdown signal (spec §5): polled at every tick loop
//! boundary and immediately after any blocking call. Cheap to clone and
//! share between the source state machine and the Cookie State's
//! non-blocking `cn=config` pre-commit path.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Clone, Default)]
pub struct ShutdownFlag(Arc<AtomicBool>);

impl ShutdownFlag {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
