use serde::Deserialize;
use std::collections::BTreeSet;

use crate::data_types::variants::{parse_classification, ReadContext, RecordId, SupportingEvidence, VariantError, VariantRecord};

/// A raw candidate call as provided by the upstream aggregator.
/// Every field is optional so that malformed rows can be reported and skipped instead of failing the whole file.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct CandidateRecord {
    pub chrom: Option<String>,
    pub pos: Option<u64>,
    #[serde(rename = "ref")]
    pub ref_allele: Option<String>,
    #[serde(rename = "alt")]
    pub alt_allele: Option<String>,
    pub classification: Option<String>,
    /// `;` separated, "." or "PASS" means none
    pub filters: Option<String>,
    pub alt_support: Option<u32>,
    pub depth: Option<u32>,
    pub quality: Option<u32>,
    pub microhomology: Option<String>,
    /// `;` separated read-evidence group ids
    pub haplotype_tags: Option<String>,
    pub read_context_start: Option<u64>,
    pub read_context_end: Option<u64>,
    pub read_context: Option<String>
}

impl CandidateRecord {
    /// Minimal candidate, mostly for tests and programmatic callers
    pub fn new(chrom: &str, pos: u64, ref_allele: &str, alt_allele: &str, classification: &str) -> Self {
        Self {
            chrom: Some(chrom.to_string()),
            pos: Some(pos),
            ref_allele: Some(ref_allele.to_string()),
            alt_allele: Some(alt_allele.to_string()),
            classification: Some(classification.to_string()),
            ..Default::default()
        }
    }

    pub fn with_filters(mut self, filters: &str) -> Self {
        self.filters = Some(filters.to_string());
        self
    }

    pub fn with_microhomology(mut self, microhomology: &str) -> Self {
        self.microhomology = Some(microhomology.to_string());
        self
    }

    pub fn with_haplotype_tags(mut self, tags: &[u32]) -> Self {
        self.haplotype_tags = Some(tags.iter().map(|t| t.to_string()).collect::<Vec<_>>().join(";"));
        self
    }

    pub fn with_read_context(mut self, start: u64, end: u64, bases: &str) -> Self {
        self.read_context_start = Some(start);
        self.read_context_end = Some(end);
        self.read_context = Some(bases.to_string());
        self
    }

    /// Converts this candidate into a validated pipeline record.
    /// # Arguments
    /// * `record_id` - the partition-scoped id to assign
    /// # Errors
    /// * if any required field is missing
    /// * if the alleles, classification, tags, or read context are invalid
    pub fn to_record(&self, record_id: RecordId) -> Result<VariantRecord, VariantError> {
        let chromosome = required(&self.chrom, "chrom")?.trim().to_string();
        let position = self.pos.ok_or(VariantError::MissingField { field: "pos" })?;
        let ref_allele = required(&self.ref_allele, "ref")?.trim().to_ascii_uppercase().into_bytes();
        let alt_allele = required(&self.alt_allele, "alt")?.trim().to_ascii_uppercase().into_bytes();
        let classification = parse_classification(required(&self.classification, "classification")?)?;

        let haplotype_tags = split_list(self.haplotype_tags.as_deref())
            .map(|t| t.parse::<u32>().map_err(|_e| VariantError::InvalidHaplotypeTag { value: t.to_string() }))
            .collect::<Result<BTreeSet<u32>, VariantError>>()?;

        let read_context = match (self.read_context_start, self.read_context_end, none_if_empty(self.read_context.as_deref())) {
            (None, None, None) => None,
            (Some(start), Some(end), Some(bases)) => Some(ReadContext {
                start,
                end,
                bases: bases.to_ascii_uppercase().into_bytes()
            }),
            _ => return Err(VariantError::InvalidReadContext)
        };

        let evidence = SupportingEvidence {
            alt_support: self.alt_support.unwrap_or_default(),
            depth: self.depth.unwrap_or_default(),
            quality: self.quality.unwrap_or_default(),
            microhomology: none_if_empty(self.microhomology.as_deref())
                .map(|mh| mh.to_ascii_uppercase().into_bytes())
                .unwrap_or_default(),
            haplotype_tags,
            read_context
        };

        let filters = split_list(self.filters.as_deref())
            .filter(|f| *f != "PASS")
            .map(|f| f.to_string());
        Ok(VariantRecord::new(record_id, chromosome, position, ref_allele, alt_allele, classification, evidence)?
            .with_filters(filters))
    }
}

fn required<'a>(value: &'a Option<String>, field: &'static str) -> Result<&'a str, VariantError> {
    none_if_empty(value.as_deref()).ok_or(VariantError::MissingField { field })
}

/// "." and empty both mean a missing value
fn none_if_empty(value: Option<&str>) -> Option<&str> {
    value.map(|v| v.trim()).filter(|v| !v.is_empty() && *v != ".")
}

fn split_list(value: Option<&str>) -> impl Iterator<Item = &str> {
    none_if_empty(value).into_iter()
        .flat_map(|v| v.split(';'))
        .map(|v| v.trim())
        .filter(|v| !v.is_empty() && *v != ".")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_types::variants::{Classification, VariantKind};

    #[test]
    fn test_to_record() {
        let candidate = CandidateRecord::new("1", 1000, "at", "A", "somatic")
            .with_microhomology("TTTTT")
            .with_haplotype_tags(&[3, 1])
            .with_filters("PASS");
        let record = candidate.to_record(4).unwrap();
        assert_eq!(record.record_id(), 4);
        assert_eq!(record.chromosome(), "1");
        assert_eq!(record.ref_allele(), b"AT");
        assert_eq!(record.kind(), VariantKind::Deletion);
        assert_eq!(record.classification(), Classification::Somatic);
        assert_eq!(record.evidence().microhomology, b"TTTTT".to_vec());
        assert_eq!(record.evidence().haplotype_tags, [1, 3].into_iter().collect());
        assert!(record.is_passing());

        let filtered = CandidateRecord::new("1", 10, "A", "C", "GERMLINE")
            .with_filters("min_germline_depth;max_germline_vaf")
            .to_record(0).unwrap();
        assert_eq!(filtered.filters().len(), 2);
        assert!(!filtered.is_passing());
    }

    #[test]
    fn test_malformed() {
        let mut candidate = CandidateRecord::new("1", 10, "A", "C", "SOMATIC");
        candidate.pos = None;
        assert_eq!(candidate.to_record(0), Err(VariantError::MissingField { field: "pos" }));

        let candidate = CandidateRecord::new(".", 10, "A", "C", "SOMATIC");
        assert_eq!(candidate.to_record(0), Err(VariantError::MissingField { field: "chrom" }));

        let candidate = CandidateRecord::new("1", 10, "A", "C", "tumor");
        assert!(matches!(candidate.to_record(0), Err(VariantError::UnknownClassification { .. })));

        let mut candidate = CandidateRecord::new("1", 10, "A", "C", "SOMATIC");
        candidate.haplotype_tags = Some("1;x".to_string());
        assert!(matches!(candidate.to_record(0), Err(VariantError::InvalidHaplotypeTag { .. })));

        let mut candidate = CandidateRecord::new("1", 10, "A", "C", "SOMATIC");
        candidate.read_context_start = Some(5);
        assert_eq!(candidate.to_record(0), Err(VariantError::InvalidReadContext));

        let candidate = CandidateRecord::new("1", 10, "A", "C", "SOMATIC").with_read_context(12, 5, "ACGT");
        assert_eq!(candidate.to_record(0), Err(VariantError::InvalidReadContext));
    }

    #[test]
    fn test_read_context() {
        let record = CandidateRecord::new("1", 10, "A", "C", "SOMATIC")
            .with_read_context(8, 12, "ttcgg")
            .to_record(0).unwrap();
        let rc = record.evidence().read_context.as_ref().unwrap();
        assert_eq!((rc.start, rc.end), (8, 12));
        assert_eq!(rc.bases, b"TTCGG".to_vec());
    }
}
