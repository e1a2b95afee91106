use std::sync::Arc;

/// Pipeline phase reported through [`SortProgress`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortPhase {
    /// Reading, sorting and writing phase one runs.
    Chunking,
    /// Combining sorted runs into the final output.
    Merging,
    /// The output file is complete.
    Done,
}

/// A progress observation. Within one phase `current` never decreases.
///
/// During [`SortPhase::Chunking`] the counters are bytes of input consumed;
/// during [`SortPhase::Merging`] they count sorted runs consumed by finished
/// merges. `total` may grow during the merge phase when additional
/// intermediate runs are produced.
#[derive(Debug, Clone, Copy)]
pub struct SortProgress {
    pub phase: SortPhase,
    pub current: u64,
    pub total: u64,
}

pub(crate) type ProgressFn = Arc<dyn Fn(SortProgress) + Send + Sync>;
