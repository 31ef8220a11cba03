use anyhow::Context;
use indicatif::ParallelProgressIterator;
use log::debug;
use rayon::prelude::*;
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::data_types::candidate::CandidateRecord;
use crate::data_types::pipeline_stats::PipelineStats;
use crate::data_types::transcripts::TranscriptLookup;
use crate::data_types::variants::VariantRecord;
use crate::pipeline::{Pipeline, PipelineConfig};
use crate::stages::phase_set::Reportability;
use crate::stages::{PipelineError, SuppressedRecord};
use crate::util::progress_bar::get_progress_style;

/// An independent slice of the input, processed by its own chain
#[derive(Clone, Debug, Default)]
pub struct Partition {
    /// Index in the input order
    partition_id: usize,
    /// Label for logging, usually the chromosome
    label: String,
    /// Position-sorted candidates
    candidates: Vec<CandidateRecord>
}

impl Partition {
    pub fn new(partition_id: usize, label: String, candidates: Vec<CandidateRecord>) -> Self {
        Self { partition_id, label, candidates }
    }

    pub fn push(&mut self, candidate: CandidateRecord) {
        self.candidates.push(candidate);
    }

    // getters
    pub fn partition_id(&self) -> usize {
        self.partition_id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn candidates(&self) -> &[CandidateRecord] {
        &self.candidates
    }
}

/// Everything one partition produced. Ids inside are only meaningful within the partition.
#[derive(Debug)]
pub struct PartitionResult {
    pub partition_id: usize,
    pub label: String,
    pub records: Vec<VariantRecord>,
    pub stats: PipelineStats,
    pub passing_phase_sets: BTreeSet<u32>,
    pub audit: Vec<SuppressedRecord>
}

/// Runs a single partition through a fresh chain.
/// # Arguments
/// * `partition` - the partition to process
/// * `config` - chain configuration
/// * `transcripts` - shared coding exon lookup
/// * `reportable` - phase set reportability predicate
/// # Errors
/// * if the partition input is out of order
pub fn run_partition(partition: &Partition, config: PipelineConfig, transcripts: Arc<TranscriptLookup>, reportable: Reportability) -> Result<PartitionResult, PipelineError> {
    debug!("Starting partition {} ({}) with {} candidates", partition.partition_id(), partition.label(), partition.candidates().len());
    let mut pipeline = Pipeline::new(config, transcripts, reportable, vec![]);
    for candidate in partition.candidates().iter() {
        pipeline.accept(candidate)?;
    }
    let output = pipeline.finish()?;
    debug!("Finished partition {}: {} emitted, {} suppressed", partition.label(), output.stats.emitted, output.stats.total_suppressed());

    Ok(PartitionResult {
        partition_id: partition.partition_id(),
        label: partition.label().to_string(),
        records: output.sink,
        stats: output.stats,
        passing_phase_sets: output.passing_phase_sets,
        audit: output.audit
    })
}

/// Runs partitions in parallel on the global rayon pool, returning results in partition order.
/// # Errors
/// * if any partition fails, the error names the partition
pub fn run_partitions(partitions: Vec<Partition>, config: PipelineConfig, transcripts: Arc<TranscriptLookup>, reportable: Reportability) -> anyhow::Result<Vec<PartitionResult>> {
    let style = get_progress_style();
    let mut all_results: Vec<PartitionResult> = partitions.into_par_iter()
        .map(|partition| {
            run_partition(&partition, config, transcripts.clone(), reportable.clone())
                .with_context(|| format!("Error while processing partition {}:", partition.label()))
        })
        .progress_with_style(style)
        .collect::<anyhow::Result<_>>()?;

    // sort them by partition ID
    all_results.sort_by_key(|r| r.partition_id);
    Ok(all_results)
}
