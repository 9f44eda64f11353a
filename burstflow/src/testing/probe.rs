//! Measures how many operations run at once.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Tracks current and peak concurrency of guarded sections.
#[derive(Debug, Default)]
pub struct ConcurrencyProbe {
    current: AtomicUsize,
    peak: AtomicUsize,
    entries: AtomicUsize,
}

impl ConcurrencyProbe {
    /// Creates a new probe.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the start of a section; the section ends when the guard drops.
    #[must_use]
    pub fn enter(self: &Arc<Self>) -> ProbeGuard {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.entries.fetch_add(1, Ordering::SeqCst);
        ProbeGuard {
            probe: Arc::clone(self),
        }
    }

    /// Sections currently running.
    #[must_use]
    pub fn current(&self) -> usize {
        self.current.load(Ordering::SeqCst)
    }

    /// Highest number of sections seen running together.
    #[must_use]
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Total sections entered.
    #[must_use]
    pub fn entries(&self) -> usize {
        self.entries.load(Ordering::SeqCst)
    }
}

/// Leaves the probed section on drop.
#[derive(Debug)]
pub struct ProbeGuard {
    probe: Arc<ConcurrencyProbe>,
}

impl Drop for ProbeGuard {
    fn drop(&mut self) {
        self.probe.current.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_tracks_peak() {
        let probe = Arc::new(ConcurrencyProbe::new());

        let a = probe.enter();
        let b = probe.enter();
        assert_eq!(probe.current(), 2);
        drop(a);
        let c = probe.enter();
        drop(b);
        drop(c);

        assert_eq!(probe.current(), 0);
        assert_eq!(probe.peak(), 2);
        assert_eq!(probe.entries(), 3);
    }
}
