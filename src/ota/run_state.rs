use std::sync::atomic::{AtomicU8, Ordering};

const IDLE: u8 = 0;
const RUNNING: u8 = 1;
const CANCELING: u8 = 2;

/// Single-flight flag gating worker creation.
///
/// `Canceling` keeps new submissions out until the canceled worker has
/// finished its cleanup, so two workers never overlap.
#[derive(Debug, Default)]
pub struct OtaRunState {
    state: AtomicU8,
}

impl OtaRunState {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(IDLE),
        }
    }

    /// Idle -> Running. Returns false if an update is already active.
    pub fn try_start(&self) -> bool {
        self.state
            .compare_exchange(IDLE, RUNNING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Running -> Canceling. Returns false if nothing is running.
    pub fn request_cancel(&self) -> bool {
        self.state
            .compare_exchange(RUNNING, CANCELING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// True while the worker may keep going; false once canceled or finished.
    pub fn is_running(&self) -> bool {
        self.state.load(Ordering::Acquire) == RUNNING
    }

    /// True while any worker exists, including one winding down after cancel.
    pub fn is_busy(&self) -> bool {
        self.state.load(Ordering::Acquire) != IDLE
    }

    pub fn finish(&self) {
        self.state.store(IDLE, Ordering::Release);
    }
}
