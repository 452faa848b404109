//! Cooperative cancellation and the counters summarizing a run
use std::ops::{Add, AddAssign};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// How many parent ions or scans are processed between cancellation checks
pub const ABORT_POLL_INTERVAL: usize = 100;

/// A shared flag any thread may raise to ask a long-running operation to stop early.
///
/// Operations that observe it stop at their next polling point, mark the scan list
/// as incomplete, and return what they have finished so far.
#[derive(Debug, Default, Clone)]
pub struct AbortFlag(Arc<AtomicBool>);

impl AbortFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, serde::Serialize)]
pub struct ProgressRecord {
    pub chunks: usize,
    pub parent_ions_processed: usize,
    pub peaks_found: usize,
    pub peaks_synthesized: usize,
    pub mrm_transitions: usize,
    pub similarity_clusters: usize,
    pub parent_ions_grouped: usize,
    pub reporter_ion_scans: usize,
}

impl Add for ProgressRecord {
    type Output = ProgressRecord;

    fn add(self, rhs: Self) -> Self::Output {
        let mut dup = self;
        dup += rhs;
        dup
    }
}

impl AddAssign for ProgressRecord {
    fn add_assign(&mut self, rhs: Self) {
        self.chunks += rhs.chunks;
        self.parent_ions_processed += rhs.parent_ions_processed;
        self.peaks_found += rhs.peaks_found;
        self.peaks_synthesized += rhs.peaks_synthesized;
        self.mrm_transitions += rhs.mrm_transitions;
        self.similarity_clusters += rhs.similarity_clusters;
        self.parent_ions_grouped += rhs.parent_ions_grouped;
        self.reporter_ion_scans += rhs.reporter_ion_scans;
    }
}
