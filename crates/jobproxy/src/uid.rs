//! # Job Identifier Allocation

use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use jobwire::JobUid;

/// Issues strictly increasing job identifiers, starting at 1.
///
/// A counter is an owned value rather than a global so that independent links
/// (and tests) do not share an identifier space unless they are handed the
/// same `Arc<JobCounter>`.
#[derive(Debug)]
pub struct JobCounter {
    next: AtomicU64,
}

impl JobCounter {
    pub fn new() -> Self {
        Self { next: AtomicU64::new(1) }
    }

    pub fn next(&self) -> JobUid {
        JobUid(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for JobCounter {
    fn default() -> Self {
        Self::new()
    }
}
