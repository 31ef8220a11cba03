/*!
Controller that owns the nine-stage chain for one partition.
Records are pushed in position order per chromosome; resolved records come out the other end into a sink.

# Example usage
```rust
use std::sync::Arc;
use varphase::data_types::candidate::CandidateRecord;
use varphase::data_types::transcripts::{CodingExon, TranscriptLookup};
use varphase::pipeline::{Pipeline, PipelineConfig};
use varphase::stages::phase_set::default_reportability;

let transcripts = Arc::new(TranscriptLookup::from_exons([
    ("1".to_string(), CodingExon { first: 900, last: 1100 })
]).unwrap());

// the same deletion reported at two anchors inside a T homopolymer
let mut pipeline = Pipeline::new(PipelineConfig::default(), transcripts, default_reportability(), vec![]);
pipeline.accept(&CandidateRecord::new("1", 1000, "AT", "A", "SOMATIC").with_microhomology("TTTTT")).unwrap();
pipeline.accept(&CandidateRecord::new("1", 1005, "TT", "T", "SOMATIC")).unwrap();

let output = pipeline.finish().unwrap();
assert_eq!(output.sink.len(), 1);
assert_eq!(output.sink[0].position(), 1005);
assert_eq!(output.sink[0].realignment_set(), Some(1));
assert_eq!(output.passing_phase_sets.len(), 1);
```
*/
use derive_builder::Builder;
use log::{debug, warn};
use rustc_hash::FxHashSet as HashSet;
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::data_types::candidate::CandidateRecord;
use crate::data_types::pipeline_stats::PipelineStats;
use crate::data_types::transcripts::TranscriptLookup;
use crate::data_types::variants::VariantRecord;
use crate::stages::dedup::{DedupIndel, DedupMnv, DedupRealign};
use crate::stages::inframe_indel::PhasedInframeIndel;
use crate::stages::mixed_germline::{MixedGermlineDedup, MixedGermlineIdentifier};
use crate::stages::phase_set::{LocalPhaseSet, Reportability};
use crate::stages::realign_set::LocalRealignSet;
use crate::stages::right_align::RightAlignMicrohomology;
use crate::stages::{PipelineError, StageContext, SuppressedRecord, VariantStage};

/// Records further apart than this cannot interact
pub const DEFAULT_BUFFER_DISTANCE: u64 = 150;

/// Controls the windowing and bookkeeping of a chain
#[derive(Builder, Clone, Copy, Debug)]
#[builder(default)]
pub struct PipelineConfig {
    /// Maximum distance from the end of a held record to the newest position
    buffer_distance: u64,
    /// If true, suppressed records are retained for the audit output
    enable_audit: bool
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            buffer_distance: DEFAULT_BUFFER_DISTANCE,
            enable_audit: false
        }
    }
}

impl PipelineConfig {
    // getters
    pub fn buffer_distance(&self) -> u64 {
        self.buffer_distance
    }

    pub fn enable_audit(&self) -> bool {
        self.enable_audit
    }
}

/// Receives fully resolved records in position order
pub trait VariantSink {
    fn emit(&mut self, record: VariantRecord);
}

impl VariantSink for Vec<VariantRecord> {
    fn emit(&mut self, record: VariantRecord) {
        self.push(record);
    }
}

/// Adapts a closure into a sink
pub struct SinkFn<F: FnMut(VariantRecord)>(pub F);

impl<F: FnMut(VariantRecord)> VariantSink for SinkFn<F> {
    fn emit(&mut self, record: VariantRecord) {
        (self.0)(record)
    }
}

/// Everything a chain produced once its input is complete
pub struct PipelineOutput<S: VariantSink> {
    pub sink: S,
    pub stats: PipelineStats,
    pub passing_phase_sets: BTreeSet<u32>,
    pub audit: Vec<SuppressedRecord>
}

/// Enforces input order before anything reaches stage 1
#[derive(Debug, Default)]
struct IngestGuard {
    chromosome: Option<String>,
    last_position: u64,
    finished: HashSet<String>
}

impl IngestGuard {
    /// Returns true if the record starts a new chromosome
    fn check(&mut self, record: &VariantRecord) -> Result<bool, PipelineError> {
        match self.chromosome.as_deref() {
            Some(chrom) if chrom == record.chromosome() => {
                if record.position() < self.last_position {
                    return Err(PipelineError::OrderingViolation {
                        chromosome: chrom.to_string(),
                        previous: self.last_position,
                        position: record.position()
                    });
                }
                self.last_position = record.position();
                Ok(false)
            },
            _ => {
                if self.finished.contains(record.chromosome()) {
                    return Err(PipelineError::ChromosomeRevisited { chromosome: record.chromosome().to_string() });
                }
                let changed = match self.chromosome.take() {
                    Some(previous) => {
                        debug!("Finished chromosome {previous}");
                        self.finished.insert(previous);
                        true
                    },
                    None => false
                };
                self.chromosome = Some(record.chromosome().to_string());
                self.last_position = record.position();
                Ok(changed)
            }
        }
    }
}

/// The nine-stage chain for one partition
pub struct Pipeline<S: VariantSink> {
    stages: Vec<Box<dyn VariantStage>>,
    context: StageContext,
    sink: S,
    guard: IngestGuard,
    /// Set after an ordering violation; no further input is accepted
    poisoned: bool
}

impl<S: VariantSink> Pipeline<S> {
    /// Builds the chain in its fixed order.
    /// # Arguments
    /// * `config` - windowing and audit settings
    /// * `transcripts` - coding exon lookup for stages 6 and 7
    /// * `reportable` - predicate deciding which phase sets pass
    /// * `sink` - receives the resolved records
    pub fn new(config: PipelineConfig, transcripts: Arc<TranscriptLookup>, reportable: Reportability, sink: S) -> Self {
        let distance = config.buffer_distance();
        let stages: Vec<Box<dyn VariantStage>> = vec![
            Box::new(DedupRealign::new(distance)),
            Box::new(DedupIndel::new(distance)),
            Box::new(DedupMnv::new(distance)),
            Box::new(MixedGermlineIdentifier::new(distance)),
            Box::new(MixedGermlineDedup::new(distance)),
            Box::new(PhasedInframeIndel::new(distance, transcripts.clone())),
            Box::new(RightAlignMicrohomology::new(distance, transcripts)),
            Box::new(LocalRealignSet::new(distance)),
            Box::new(LocalPhaseSet::new(distance, reportable))
        ];
        debug_assert!(stages.iter().enumerate().all(|(i, s)| s.kind() as usize == i));

        Self {
            stages,
            context: StageContext::new(config.enable_audit()),
            sink,
            guard: Default::default(),
            poisoned: false
        }
    }

    /// Converts and pushes one candidate through the chain.
    /// Malformed candidates are logged, counted, and skipped.
    /// # Errors
    /// * `OrderingViolation` if the candidate is before the last one on the same chromosome
    /// * `ChromosomeRevisited` if its chromosome was already completed
    /// * `Poisoned` if an earlier call failed
    pub fn accept(&mut self, candidate: &CandidateRecord) -> Result<(), PipelineError> {
        if self.poisoned {
            return Err(PipelineError::Poisoned);
        }

        let record_id = self.context.ids_mut().record_id();
        let record = match candidate.to_record(record_id) {
            Ok(r) => r,
            Err(e) => {
                warn!("Skipping malformed candidate {}:{}: {e}",
                    candidate.chrom.as_deref().unwrap_or("?"), candidate.pos.unwrap_or_default());
                self.context.stats_mut().malformed += 1;
                return Ok(());
            }
        };

        match self.guard.check(&record) {
            Ok(true) => {
                // everything from the previous chromosome is final
                if let Err(e) = self.flush() {
                    self.poisoned = true;
                    return Err(e);
                }
            },
            Ok(false) => {},
            Err(e) => {
                self.poisoned = true;
                return Err(e);
            }
        };
        self.context.stats_mut().accepted += 1;

        let mut batch = vec![record];
        for stage in self.stages.iter_mut() {
            let mut out = vec![];
            for r in batch.into_iter() {
                if let Err(e) = stage.accept(r, &mut self.context, &mut out) {
                    self.poisoned = true;
                    return Err(e);
                }
            }
            batch = out;
        }
        self.emit(batch);
        Ok(())
    }

    /// Flushes source to sink: each stage first receives what the previous flush released, then flushes itself.
    /// # Errors
    /// * if a stage rejects the order of flushed records, which means a stage broke its ordering contract
    pub fn flush(&mut self) -> Result<(), PipelineError> {
        let mut carried = vec![];
        for stage in self.stages.iter_mut() {
            let mut out = vec![];
            for r in carried.into_iter() {
                stage.accept(r, &mut self.context, &mut out)?;
            }
            stage.flush(&mut self.context, &mut out);
            carried = out;
        }
        self.emit(carried);
        debug_assert_eq!(self.buffered(), 0);
        Ok(())
    }

    /// Flushes and hands back the sink with the partition results
    pub fn finish(mut self) -> Result<PipelineOutput<S>, PipelineError> {
        self.flush()?;
        let (stats, passing_phase_sets, audit) = self.context.into_parts();
        Ok(PipelineOutput {
            sink: self.sink,
            stats,
            passing_phase_sets,
            audit
        })
    }

    fn emit(&mut self, records: Vec<VariantRecord>) {
        for record in records.into_iter() {
            self.context.stats_mut().emitted += 1;
            self.sink.emit(record);
        }
    }

    /// Records held across all stages
    pub fn buffered(&self) -> usize {
        self.stages.iter().map(|s| s.buffered()).sum()
    }

    // getters
    pub fn stats(&self) -> &PipelineStats {
        self.context.stats()
    }

    /// Phase sets finalized as passing so far; complete after `finish` or a final `flush`
    pub fn passing_phase_sets(&self) -> &BTreeSet<u32> {
        self.context.passing_phase_sets()
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }
}
