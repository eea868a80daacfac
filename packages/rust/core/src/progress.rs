use threatintel_shared::CollectorOutcome;

/// Progress callback for runs, implemented by front ends.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called as each collector's outcome arrives (arrival order, not registration order).
    fn collector_reported(&self, outcome: &CollectorOutcome, reported: usize, total: usize);
    /// Called once the report is assembled and the persistence attempt is over.
    fn done(&self, summary: &str);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn collector_reported(&self, _outcome: &CollectorOutcome, _reported: usize, _total: usize) {}
    fn done(&self, _summary: &str) {}
}
