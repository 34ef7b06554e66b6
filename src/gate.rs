use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

/// Process-wide ceiling on concurrently running sessions.
///
/// One gate is shared by every listener, so the ceiling applies across all
/// forwarding rules rather than per rule.
#[derive(Debug)]
pub struct AdmissionGate {
    active: AtomicUsize,
    capacity: usize,
}

impl AdmissionGate {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            active: AtomicUsize::new(0),
            capacity,
        }
    }

    /// Takes a slot if one is free. The check and the increment are a single
    /// atomic step, so concurrent accepts can never push the count past the
    /// ceiling.
    pub fn try_admit(&self) -> bool {
        self.active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current < self.capacity).then_some(current + 1)
            })
            .is_ok()
    }

    /// Gives a slot back. Saturates at zero.
    pub fn release(&self) {
        let _ = self
            .active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                current.checked_sub(1)
            });
    }

    /// Admits and wraps the slot in a permit that releases it on drop.
    #[must_use]
    pub fn try_acquire(self: &Arc<Self>) -> Option<AdmissionPermit> {
        self.try_admit().then(|| AdmissionPermit {
            gate: Arc::clone(self),
        })
    }

    #[must_use]
    pub fn active(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// An admitted slot. Dropping it releases the slot exactly once.
#[derive(Debug)]
pub struct AdmissionPermit {
    gate: Arc<AdmissionGate>,
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        self.gate.release();
    }
}
