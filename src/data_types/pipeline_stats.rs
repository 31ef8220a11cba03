
use std::ops::AddAssign;

use crate::stages::{StageKind, NUM_STAGES};

/// Counters collected while a partition threads through the stage chain
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PipelineStats {
    /// Records that converted successfully and entered stage 1
    pub accepted: u64,
    /// Candidates that failed conversion and were skipped
    pub malformed: u64,
    /// Annotations skipped because the lookup had no entry for the chromosome
    pub missing_context: u64,
    /// Records delivered to the sink
    pub emitted: u64,
    /// Records permanently removed, indexed by stage order
    pub suppressed: [u64; NUM_STAGES],
    /// New MNV records created from SNV runs
    pub mnv_created: u64,
    /// Germline/somatic pairs tagged by the identifier
    pub mixed_pairs_tagged: u64,
    /// Indels that received an in-frame hint
    pub inframe_links: u64,
    /// Indels shifted to their rightmost anchor
    pub right_aligned: u64,
    /// Realignment set ids handed out
    pub realignment_sets: u64,
    /// Phase set ids that were finalized
    pub phase_sets: u64,
    /// Phase set ids that were finalized as passing
    pub passing_phase_sets: u64
}

impl AddAssign for PipelineStats {
    // Enables += with stats
    fn add_assign(&mut self, rhs: Self) {
        self.accepted += rhs.accepted;
        self.malformed += rhs.malformed;
        self.missing_context += rhs.missing_context;
        self.emitted += rhs.emitted;
        for (s, r) in self.suppressed.iter_mut().zip(rhs.suppressed.iter()) {
            *s += r;
        }
        self.mnv_created += rhs.mnv_created;
        self.mixed_pairs_tagged += rhs.mixed_pairs_tagged;
        self.inframe_links += rhs.inframe_links;
        self.right_aligned += rhs.right_aligned;
        self.realignment_sets += rhs.realignment_sets;
        self.phase_sets += rhs.phase_sets;
        self.passing_phase_sets += rhs.passing_phase_sets;
    }
}

impl PipelineStats {
    /// Records a suppression at the given stage
    pub fn add_suppressed(&mut self, stage: StageKind) {
        self.suppressed[stage as usize] += 1;
    }

    /// Suppressions for a single stage
    pub fn suppressed_at(&self, stage: StageKind) -> u64 {
        self.suppressed[stage as usize]
    }

    /// Suppressions across all stages
    pub fn total_suppressed(&self) -> u64 {
        self.suppressed.iter().sum()
    }

    /// Every record that entered the chain (including created MNVs) is either emitted or suppressed once the chain is flushed
    pub fn is_balanced(&self) -> bool {
        self.accepted + self.mnv_created == self.emitted + self.total_suppressed()
    }
}
