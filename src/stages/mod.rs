/*!
# Stages module
The nine windowed stages of the chain and the contract they share.
Every stage receives records in position order per chromosome, holds them in a window buffer while they can still interact, and forwards them in position order.
*/

use log::{debug, trace, warn};
use rustc_hash::FxHashSet as HashSet;
use std::collections::BTreeSet;

use crate::data_types::pipeline_stats::PipelineStats;
use crate::data_types::variants::{RecordId, VariantRecord};

/// Identity deduplication stages (1, 2, 3) and the shared representative policy
pub mod dedup;
/// Stage 6, links frameshift indels that restore the frame inside one coding exon
pub mod inframe_indel;
/// Stages 4 and 5, germline calls explained by a somatic call
pub mod mixed_germline;
/// Stage 9, connected components of linked records
pub mod phase_set;
/// Stage 8, groups alternate representations of one event
pub mod realign_set;
/// Stage 7, shifts indels to their rightmost anchor
pub mod right_align;
/// Position-ordered buffer shared by all stages
pub mod window_buffer;

/// Number of stages in the chain
pub const NUM_STAGES: usize = 9;

/// The stages in chain order; the discriminant is the index into the chain
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, serde::Serialize, strum_macros::Display, strum_macros::EnumIter)]
pub enum StageKind {
    DedupRealign=0,
    DedupIndel,
    DedupMnv,
    MixedGermlineIdentifier,
    MixedGermlineDedup,
    PhasedInframeIndel,
    RightAlignMicrohomology,
    LocalRealignSet,
    LocalPhaseSet
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    #[error("record at {chromosome}:{position} arrived after {chromosome}:{previous}")]
    OrderingViolation { chromosome: String, previous: u64, position: u64 },
    #[error("chromosome {chromosome} was already completed and cannot receive more records")]
    ChromosomeRevisited { chromosome: String },
    #[error("pipeline refused input after an earlier ordering violation")]
    Poisoned
}

/// Partition-scoped id counters, never comparable across partitions
#[derive(Debug)]
pub struct PartitionIds {
    next_record: RecordId,
    next_inframe_hint: u32,
    next_realignment_set: u32,
    next_phase_set: u32
}

impl Default for PartitionIds {
    fn default() -> Self {
        Self {
            next_record: 0,
            next_inframe_hint: 1,
            next_realignment_set: 1,
            next_phase_set: 1
        }
    }
}

impl PartitionIds {
    pub fn record_id(&mut self) -> RecordId {
        let id = self.next_record;
        self.next_record += 1;
        id
    }

    pub fn inframe_hint(&mut self) -> u32 {
        let id = self.next_inframe_hint;
        self.next_inframe_hint += 1;
        id
    }

    pub fn realignment_set(&mut self) -> u32 {
        let id = self.next_realignment_set;
        self.next_realignment_set += 1;
        id
    }

    pub fn phase_set(&mut self) -> u32 {
        let id = self.next_phase_set;
        self.next_phase_set += 1;
        id
    }
}

/// A record that was permanently removed, kept when auditing is enabled
#[derive(Clone, Debug, PartialEq)]
pub struct SuppressedRecord {
    /// The stage that removed it
    pub stage: StageKind,
    /// The removed record with the annotations it had at removal
    pub record: VariantRecord,
    /// The record that represents it downstream, if any
    pub survivor: Option<RecordId>
}

/// Mutable state shared by the stages of one chain
#[derive(Debug, Default)]
pub struct StageContext {
    ids: PartitionIds,
    stats: PipelineStats,
    /// None when auditing is disabled
    audit: Option<Vec<SuppressedRecord>>,
    passing_phase_sets: BTreeSet<u32>,
    /// Chromosomes we already warned about for missing lookup context
    warned_missing: HashSet<String>
}

impl StageContext {
    pub fn new(enable_audit: bool) -> Self {
        Self {
            audit: if enable_audit { Some(vec![]) } else { None },
            ..Default::default()
        }
    }

    /// Permanently removes a record from the chain.
    /// # Arguments
    /// * `stage` - the stage removing the record
    /// * `record` - the removed record
    /// * `survivor` - the record that represents it going forward, if any
    pub fn suppress(&mut self, stage: StageKind, record: VariantRecord, survivor: Option<RecordId>) {
        trace!("{stage}: suppressed {}:{} {}>{} (survivor {survivor:?})",
            record.chromosome(), record.position(),
            String::from_utf8_lossy(record.ref_allele()), String::from_utf8_lossy(record.alt_allele())
        );
        self.stats.add_suppressed(stage);
        if let Some(audit) = self.audit.as_mut() {
            audit.push(SuppressedRecord { stage, record, survivor });
        }
    }

    /// Counts an annotation skipped because the lookup has no entry for the chromosome.
    /// Warns once per chromosome, the rest goes to debug.
    pub fn missing_context(&mut self, stage: StageKind, chrom: &str) {
        self.stats.missing_context += 1;
        if self.warned_missing.insert(chrom.to_string()) {
            warn!("No coding exon context for chromosome {chrom}, skipping exon-based annotation");
        } else {
            debug!("{stage}: no coding exon context for {chrom}");
        }
    }

    /// Marks a phase set as passing
    pub fn add_passing_phase_set(&mut self, phase_set: u32) {
        if self.passing_phase_sets.insert(phase_set) {
            self.stats.passing_phase_sets += 1;
        }
    }

    pub fn ids_mut(&mut self) -> &mut PartitionIds {
        &mut self.ids
    }

    pub fn stats_mut(&mut self) -> &mut PipelineStats {
        &mut self.stats
    }

    /// Consumes the context into (stats, passing phase sets, audit trail)
    pub fn into_parts(self) -> (PipelineStats, BTreeSet<u32>, Vec<SuppressedRecord>) {
        (self.stats, self.passing_phase_sets, self.audit.unwrap_or_default())
    }

    // getters
    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }

    pub fn passing_phase_sets(&self) -> &BTreeSet<u32> {
        &self.passing_phase_sets
    }

    pub fn audit(&self) -> Option<&[SuppressedRecord]> {
        self.audit.as_deref()
    }
}

/// Contract shared by every stage of the chain.
/// Stages never call each other; the controller moves records from one stage's output into the next.
pub trait VariantStage: Send {
    /// Which stage this is
    fn kind(&self) -> StageKind;

    /// Takes ownership of one record, appending anything that is now resolved to `out` in position order.
    /// # Errors
    /// * if the record is before the last accepted position on the same chromosome
    fn accept(&mut self, record: VariantRecord, ctx: &mut StageContext, out: &mut Vec<VariantRecord>) -> Result<(), PipelineError>;

    /// Resolves and forwards every held record with what has been seen so far
    fn flush(&mut self, ctx: &mut StageContext, out: &mut Vec<VariantRecord>);

    /// Number of records currently held
    fn buffered(&self) -> usize;
}
