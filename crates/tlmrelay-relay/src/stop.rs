use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cloneable cooperative stop flag.
///
/// Relays check it once per iteration, so a stop takes effect after the
/// current byte (and any packet it completed) has been handled.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask every relay sharing this handle to stop.
    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
