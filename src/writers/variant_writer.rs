use itertools::Itertools;
use serde::Serialize;
use std::fs::File;
use std::path::Path;

use crate::data_types::variants::VariantRecord;
use crate::stages::SuppressedRecord;

/// Writes resolved (or suppressed) records as a delimited table
pub struct VariantWriter {
    /// Handle on the writer
    csv_writer: csv::Writer<File>
}

/// Contains all the data written to each row of the variant file
#[derive(Serialize)]
struct VariantRow<'a> {
    /// Partition label, ids below are only unique within it
    partition: &'a str,
    record_id: u64,
    chrom: &'a str,
    pos: u64,
    #[serde(rename = "ref")]
    ref_allele: String,
    #[serde(rename = "alt")]
    alt_allele: String,
    kind: String,
    classification: String,
    /// ";" joined, "PASS" if empty
    filters: String,
    alt_support: u32,
    depth: u32,
    quality: u32,
    /// ";" joined haplotype tags
    haplotype_tags: String,
    germline_component: bool,
    right_aligned: bool,
    inframe_hint: Option<u32>,
    realignment_set: Option<u32>,
    phase_set: Option<u32>,
    unphased_filtered: bool,
    /// Only filled for suppressed records
    suppressed_by: Option<String>,
    survivor_id: Option<u64>
}

impl<'a> VariantRow<'a> {
    fn new(partition: &'a str, record: &'a VariantRecord) -> Self {
        let filters = if record.is_passing() {
            "PASS".to_string()
        } else {
            record.filters().iter().join(";")
        };
        let evidence = record.evidence();
        Self {
            partition,
            record_id: record.record_id(),
            chrom: record.chromosome(),
            pos: record.position(),
            ref_allele: String::from_utf8_lossy(record.ref_allele()).to_string(),
            alt_allele: String::from_utf8_lossy(record.alt_allele()).to_string(),
            kind: record.kind().as_ref().to_string(),
            classification: record.classification().to_string(),
            filters,
            alt_support: evidence.alt_support,
            depth: evidence.depth,
            quality: evidence.quality,
            haplotype_tags: evidence.haplotype_tags.iter().join(";"),
            germline_component: record.germline_component(),
            right_aligned: record.is_right_aligned(),
            inframe_hint: record.inframe_hint(),
            realignment_set: record.realignment_set(),
            phase_set: record.phase_set(),
            unphased_filtered: record.is_unphased_filtered(),
            suppressed_by: None,
            survivor_id: None
        }
    }
}

impl VariantWriter {
    /// Creates a new variant table writer
    /// # Arguments
    /// * `filename` - path to the filename that will get opened, must be .csv/.tsv
    pub fn new(filename: &Path) -> csv::Result<Self> {
        // modify the delimiter to "," if it ends with .csv
        let is_csv: bool = filename.extension().unwrap_or_default() == "csv";
        let delimiter: u8 = if is_csv { b',' } else { b'\t' };
        let csv_writer: csv::Writer<File> = csv::WriterBuilder::new()
            .delimiter(delimiter)
            .from_path(filename)?;
        Ok(Self {
            csv_writer
        })
    }

    /// Writes all emitted records for one partition
    /// # Arguments
    /// * `partition` - label of the partition the records came from
    /// * `records` - the records in output order
    pub fn write_records(&mut self, partition: &str, records: &[VariantRecord]) -> csv::Result<()> {
        for record in records.iter() {
            self.csv_writer.serialize(VariantRow::new(partition, record))?;
        }
        Ok(())
    }

    /// Writes the audit trail for one partition
    /// # Arguments
    /// * `partition` - label of the partition the records came from
    /// * `suppressed` - the removed records
    pub fn write_suppressed(&mut self, partition: &str, suppressed: &[SuppressedRecord]) -> csv::Result<()> {
        for s in suppressed.iter() {
            let mut row = VariantRow::new(partition, &s.record);
            row.suppressed_by = Some(s.stage.to_string());
            row.survivor_id = s.survivor;
            self.csv_writer.serialize(row)?;
        }
        Ok(())
    }

    /// Flushes anything pending to disk
    pub fn flush(&mut self) -> std::io::Result<()> {
        self.csv_writer.flush()
    }
}
