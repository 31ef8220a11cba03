use std::collections::BTreeSet;
use std::str::FromStr;

/// Partition-scoped identifier handed out when a record enters the pipeline
pub type RecordId = u64;

/// All the variant kinds that flow through the pipeline
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, PartialOrd, Ord, strum_macros::AsRefStr)]
pub enum VariantKind {
    /// REF and ALT are both length = 1
    #[strum(serialize = "SNV")]
    Snv=0,
    /// REF and ALT have the same length > 1
    #[strum(serialize = "MNV")]
    Mnv,
    /// ALT is longer than REF
    #[strum(serialize = "INS")]
    Insertion,
    /// REF is longer than ALT
    #[strum(serialize = "DEL")]
    Deletion
}

impl VariantKind {
    /// Derives the kind purely from the allele lengths
    pub fn from_alleles(ref_allele: &[u8], alt_allele: &[u8]) -> Self {
        match ref_allele.len().cmp(&alt_allele.len()) {
            std::cmp::Ordering::Equal if ref_allele.len() == 1 => VariantKind::Snv,
            std::cmp::Ordering::Equal => VariantKind::Mnv,
            std::cmp::Ordering::Less => VariantKind::Insertion,
            std::cmp::Ordering::Greater => VariantKind::Deletion
        }
    }
}

/// Origin of a call, as decided by the upstream caller
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, PartialOrd, Ord, serde::Serialize, strum_macros::Display, strum_macros::EnumString)]
pub enum Classification {
    #[strum(ascii_case_insensitive, serialize = "GERMLINE")]
    Germline,
    #[strum(ascii_case_insensitive, serialize = "SOMATIC")]
    Somatic
}

/// Typed link between the mixed germline/somatic identifier and its deduplicator
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum MixedTag {
    #[default]
    Untagged,
    /// This record and `paired_with` describe the same allele from a germline and a somatic call
    MixedGermlineSomaticCandidate { paired_with: RecordId }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum VariantError {
    #[error("required field {field} is missing")]
    MissingField { field: &'static str },
    #[error("position must be 1-based (>0)")]
    ZeroPosition,
    #[error("{allele} allele is empty (length = 0)")]
    EmptyAllele { allele: &'static str },
    #[error("{allele} allele contains unsupported base {base:?}")]
    InvalidBase { allele: &'static str, base: char },
    #[error("reference and alternate alleles are identical")]
    IdenticalAlleles,
    #[error("unknown classification {value:?}")]
    UnknownClassification { value: String },
    #[error("haplotype tag {value:?} is not an unsigned integer")]
    InvalidHaplotypeTag { value: String },
    #[error("read context must provide start, end, and bases together with start <= end")]
    InvalidReadContext
}

/// The alternate haplotype observed around a variant.
/// The `bases` replace the reference span `start..=end` (1-based, inclusive).
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct ReadContext {
    pub start: u64,
    pub end: u64,
    pub bases: Vec<u8>
}

/// Evidence attached upstream; the pipeline only reads microhomology, haplotype tags, and the read context.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SupportingEvidence {
    /// Number of reads supporting the alternate allele
    pub alt_support: u32,
    /// Total read depth at the locus
    pub depth: u32,
    /// Summed quality of the supporting reads
    pub quality: u32,
    /// Bases following the indel that make the anchor ambiguous, empty if none
    pub microhomology: Vec<u8>,
    /// Ids of read-evidence groups that observed this allele; a shared tag means co-observed in phase
    pub haplotype_tags: BTreeSet<u32>,
    /// Optional alternate haplotype around the event
    pub read_context: Option<ReadContext>
}

/// Identity used for duplicate detection
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct VariantKey {
    pub chromosome: String,
    pub position: u64,
    pub ref_allele: Vec<u8>,
    pub alt_allele: Vec<u8>
}

/// Result of shifting an indel through its microhomology
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ShiftedIndel {
    pub position: u64,
    pub ref_allele: Vec<u8>,
    pub alt_allele: Vec<u8>
}

impl ShiftedIndel {
    /// Last reference base covered by the shifted event
    pub fn end(&self) -> u64 {
        self.position + self.ref_allele.len() as u64 - 1
    }
}

/// A single candidate call as it threads through the stages.
#[derive(Clone, Debug, PartialEq)]
pub struct VariantRecord {
    /// Partition-scoped id, never compare across partitions
    record_id: RecordId,
    chromosome: String,
    /// 1-based coordinate of the first reference base
    position: u64,
    ref_allele: Vec<u8>,
    alt_allele: Vec<u8>,
    kind: VariantKind,
    classification: Classification,
    /// Soft filters from upstream, empty means passing
    filters: BTreeSet<String>,
    evidence: SupportingEvidence,

    // stage annotations
    mixed_tag: MixedTag,
    germline_component: bool,
    collapsed_realignments: u32,
    inframe_hint: Option<u32>,
    right_aligned: bool,
    realignment_set: Option<u32>,
    phase_set: Option<u32>,
    unphased_filtered: bool
}

impl VariantRecord {
    /// Creates a new record after validating the alleles.
    /// # Arguments
    /// * `record_id` - partition-scoped identifier
    /// * `chromosome` - contig name
    /// * `position` - 1-based coordinate
    /// * `ref_allele` - reference allele, upper-case ACGTN
    /// * `alt_allele` - alternate allele, upper-case ACGTN
    /// * `classification` - germline or somatic origin
    /// * `evidence` - pass-through evidence payload
    /// # Errors
    /// * if the chromosome is empty or the position is 0
    /// * if either allele is empty, contains unsupported bases, or both are identical
    pub fn new(
        record_id: RecordId, chromosome: String, position: u64,
        ref_allele: Vec<u8>, alt_allele: Vec<u8>,
        classification: Classification, evidence: SupportingEvidence
    ) -> Result<Self, VariantError> {
        if chromosome.is_empty() {
            return Err(VariantError::MissingField { field: "chrom" });
        }
        if position == 0 {
            return Err(VariantError::ZeroPosition);
        }
        check_allele(&ref_allele, "reference")?;
        check_allele(&alt_allele, "alternate")?;
        if ref_allele == alt_allele {
            return Err(VariantError::IdenticalAlleles);
        }
        if let Some(rc) = evidence.read_context.as_ref() {
            if rc.start > rc.end || rc.bases.is_empty() {
                return Err(VariantError::InvalidReadContext);
            }
        }

        let kind = VariantKind::from_alleles(&ref_allele, &alt_allele);
        Ok(Self {
            record_id,
            chromosome,
            position,
            ref_allele,
            alt_allele,
            kind,
            classification,
            filters: Default::default(),
            evidence,
            mixed_tag: MixedTag::Untagged,
            germline_component: false,
            collapsed_realignments: 0,
            inframe_hint: None,
            right_aligned: false,
            realignment_set: None,
            phase_set: None,
            unphased_filtered: false
        })
    }

    /// Builder-style helper to attach soft filters
    pub fn with_filters<I: IntoIterator<Item = String>>(mut self, filters: I) -> Self {
        self.filters.extend(filters);
        self
    }

    /// Collapses a run of contiguous SNVs into one MNV record.
    /// Evidence is combined conservatively: minimum support, maximum depth, summed quality, shared haplotype tags.
    /// # Panics
    /// * if `run` is empty
    pub fn merge_substitutions(record_id: RecordId, run: &[VariantRecord]) -> Self {
        let first = &run[0];
        let mut ref_allele = Vec::with_capacity(run.len());
        let mut alt_allele = Vec::with_capacity(run.len());
        let mut filters = BTreeSet::new();
        let mut haplotype_tags = first.evidence.haplotype_tags.clone();
        let mut alt_support = u32::MAX;
        let mut depth = 0;
        let mut quality: u32 = 0;
        for snv in run.iter() {
            ref_allele.extend_from_slice(&snv.ref_allele);
            alt_allele.extend_from_slice(&snv.alt_allele);
            filters.extend(snv.filters.iter().cloned());
            haplotype_tags.retain(|t| snv.evidence.haplotype_tags.contains(t));
            alt_support = alt_support.min(snv.evidence.alt_support);
            depth = depth.max(snv.evidence.depth);
            quality = quality.saturating_add(snv.evidence.quality);
        }

        let evidence = SupportingEvidence {
            alt_support,
            depth,
            quality,
            microhomology: vec![],
            haplotype_tags,
            read_context: None
        };
        let kind = VariantKind::from_alleles(&ref_allele, &alt_allele);
        Self {
            record_id,
            chromosome: first.chromosome.clone(),
            position: first.position,
            ref_allele,
            alt_allele,
            kind,
            classification: first.classification,
            filters,
            evidence,
            mixed_tag: MixedTag::Untagged,
            germline_component: false,
            collapsed_realignments: 0,
            inframe_hint: None,
            right_aligned: false,
            realignment_set: None,
            phase_set: None,
            unphased_filtered: false
        }
    }

    /// Identity key for exact duplicate detection
    pub fn key(&self) -> VariantKey {
        VariantKey {
            chromosome: self.chromosome.clone(),
            position: self.position,
            ref_allele: self.ref_allele.clone(),
            alt_allele: self.alt_allele.clone()
        }
    }

    /// Identity key after shifting an indel through its microhomology, used to spot alternate anchors of one indel
    pub fn canonical_key(&self) -> VariantKey {
        match self.right_shifted() {
            Some(shifted) => VariantKey {
                chromosome: self.chromosome.clone(),
                position: shifted.position,
                ref_allele: shifted.ref_allele,
                alt_allele: shifted.alt_allele
            },
            None => self.key()
        }
    }

    /// Computes the rightmost equivalent representation of an anchored indel.
    /// Returns None if this is not a simple anchored indel, has no microhomology,
    /// or if the microhomology is not a repeat of the inserted/deleted bases.
    pub fn right_shifted(&self) -> Option<ShiftedIndel> {
        let mh = &self.evidence.microhomology;
        if mh.is_empty() || self.ref_allele[0] != self.alt_allele[0] {
            return None;
        }

        let indel_bases: &[u8] = match self.kind {
            VariantKind::Deletion if self.alt_allele.len() == 1 => &self.ref_allele[1..],
            VariantKind::Insertion if self.ref_allele.len() == 1 => &self.alt_allele[1..],
            _ => return None
        };

        // the flanking bases must repeat the indel bases for a shift to be equivalent
        let period = indel_bases.len();
        if mh.iter().enumerate().any(|(i, &b)| b != indel_bases[i % period]) {
            return None;
        }

        let shift = mh.len();
        let anchor = indel_bases[(shift - 1) % period];
        let rotation = shift % period;
        let mut rotated = Vec::with_capacity(period + 1);
        rotated.push(anchor);
        rotated.extend_from_slice(&indel_bases[rotation..]);
        rotated.extend_from_slice(&indel_bases[..rotation]);

        let (ref_allele, alt_allele) = match self.kind {
            VariantKind::Deletion => (rotated, vec![anchor]),
            _ => (vec![anchor], rotated)
        };
        Some(ShiftedIndel {
            position: self.position + shift as u64,
            ref_allele,
            alt_allele
        })
    }

    /// Moves this record onto a shifted representation; the microhomology is consumed by the shift
    pub fn apply_shift(&mut self, shifted: ShiftedIndel) {
        self.position = shifted.position;
        self.ref_allele = shifted.ref_allele;
        self.alt_allele = shifted.alt_allele;
        self.evidence.microhomology.clear();
        self.right_aligned = true;
    }

    /// Returns true if every base of `inner` is explained by this record's alleles at the same coordinates.
    /// Both records must be substitutions.
    pub fn subsumes(&self, inner: &VariantRecord) -> bool {
        if !self.is_substitution() || !inner.is_substitution() || self.chromosome != inner.chromosome {
            return false;
        }
        if inner.position < self.position || inner.end() > self.end() {
            return false;
        }
        let offset = (inner.position - self.position) as usize;
        let span = offset..(offset + inner.ref_allele.len());
        self.ref_allele[span.clone()] == inner.ref_allele[..] &&
            self.alt_allele[span] == inner.alt_allele[..]
    }

    /// Net change in sequence length; positive for insertions
    pub fn length_change(&self) -> i64 {
        self.alt_allele.len() as i64 - self.ref_allele.len() as i64
    }

    /// Last reference base covered by this record, 1-based inclusive
    pub fn end(&self) -> u64 {
        self.position + self.ref_allele.len() as u64 - 1
    }

    pub fn is_indel(&self) -> bool {
        matches!(self.kind, VariantKind::Insertion | VariantKind::Deletion)
    }

    pub fn is_substitution(&self) -> bool {
        matches!(self.kind, VariantKind::Snv | VariantKind::Mnv)
    }

    /// Indels whose length change breaks the reading frame
    pub fn is_frameshift(&self) -> bool {
        self.is_indel() && self.length_change() % 3 != 0
    }

    /// A record passes when no soft filter was applied
    pub fn is_passing(&self) -> bool {
        self.filters.is_empty()
    }

    /// Returns true if the two records were observed on a shared read-evidence group
    pub fn shares_haplotype(&self, other: &VariantRecord) -> bool {
        !self.evidence.haplotype_tags.is_disjoint(&other.evidence.haplotype_tags)
    }

    // getters
    pub fn record_id(&self) -> RecordId {
        self.record_id
    }

    pub fn chromosome(&self) -> &str {
        &self.chromosome
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn ref_allele(&self) -> &[u8] {
        &self.ref_allele
    }

    pub fn alt_allele(&self) -> &[u8] {
        &self.alt_allele
    }

    pub fn kind(&self) -> VariantKind {
        self.kind
    }

    pub fn classification(&self) -> Classification {
        self.classification
    }

    pub fn filters(&self) -> &BTreeSet<String> {
        &self.filters
    }

    pub fn evidence(&self) -> &SupportingEvidence {
        &self.evidence
    }

    pub fn mixed_tag(&self) -> MixedTag {
        self.mixed_tag
    }

    pub fn germline_component(&self) -> bool {
        self.germline_component
    }

    pub fn collapsed_realignments(&self) -> u32 {
        self.collapsed_realignments
    }

    pub fn inframe_hint(&self) -> Option<u32> {
        self.inframe_hint
    }

    pub fn is_right_aligned(&self) -> bool {
        self.right_aligned
    }

    pub fn realignment_set(&self) -> Option<u32> {
        self.realignment_set
    }

    pub fn phase_set(&self) -> Option<u32> {
        self.phase_set
    }

    pub fn is_unphased_filtered(&self) -> bool {
        self.unphased_filtered
    }

    // stage annotations
    pub fn set_mixed_tag(&mut self, mixed_tag: MixedTag) {
        self.mixed_tag = mixed_tag;
    }

    pub fn set_germline_component(&mut self) {
        self.germline_component = true;
    }

    pub fn add_collapsed_realignments(&mut self, count: u32) {
        self.collapsed_realignments += count;
    }

    pub fn set_inframe_hint(&mut self, hint: u32) {
        self.inframe_hint = Some(hint);
    }

    pub fn set_realignment_set(&mut self, realignment_set: u32) {
        self.realignment_set = Some(realignment_set);
    }

    pub fn set_phase_set(&mut self, phase_set: u32) {
        self.phase_set = Some(phase_set);
    }

    pub fn set_unphased_filtered(&mut self, unphased_filtered: bool) {
        self.unphased_filtered = unphased_filtered;
    }
}

/// Makes sure an allele is non-empty and only contains upper-case nucleotides
fn check_allele(allele: &[u8], label: &'static str) -> Result<(), VariantError> {
    if allele.is_empty() {
        return Err(VariantError::EmptyAllele { allele: label });
    }
    if let Some(&b) = allele.iter().find(|b| !matches!(b, b'A' | b'C' | b'G' | b'T' | b'N')) {
        return Err(VariantError::InvalidBase { allele: label, base: b as char });
    }
    Ok(())
}

/// Parses a classification label, case-insensitive
pub fn parse_classification(value: &str) -> Result<Classification, VariantError> {
    Classification::from_str(value.trim())
        .map_err(|_e| VariantError::UnknownClassification { value: value.to_string() })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(position: u64, ref_allele: &str, alt_allele: &str, mh: &str) -> VariantRecord {
        let evidence = SupportingEvidence {
            microhomology: mh.as_bytes().to_vec(),
            ..Default::default()
        };
        VariantRecord::new(
            0, "1".to_string(), position,
            ref_allele.as_bytes().to_vec(), alt_allele.as_bytes().to_vec(),
            Classification::Somatic, evidence
        ).unwrap()
    }

    #[test]
    fn test_kinds() {
        assert_eq!(record(10, "A", "C", "").kind(), VariantKind::Snv);
        assert_eq!(record(10, "AC", "GT", "").kind(), VariantKind::Mnv);
        assert_eq!(record(10, "A", "AGT", "").kind(), VariantKind::Insertion);
        assert_eq!(record(10, "AGT", "A", "").kind(), VariantKind::Deletion);
        assert_eq!(record(10, "AGT", "A", "").end(), 12);
        assert_eq!(record(10, "AGT", "A", "").length_change(), -2);
        assert!(record(10, "AGT", "A", "").is_frameshift());
        assert!(!record(10, "AGTC", "A", "").is_frameshift());
    }

    #[test]
    fn test_invalid_records() {
        let ev = SupportingEvidence::default();
        assert_eq!(
            VariantRecord::new(0, "1".to_string(), 0, b"A".to_vec(), b"C".to_vec(), Classification::Somatic, ev.clone()),
            Err(VariantError::ZeroPosition)
        );
        assert_eq!(
            VariantRecord::new(0, "".to_string(), 5, b"A".to_vec(), b"C".to_vec(), Classification::Somatic, ev.clone()),
            Err(VariantError::MissingField { field: "chrom" })
        );
        assert_eq!(
            VariantRecord::new(0, "1".to_string(), 5, b"".to_vec(), b"C".to_vec(), Classification::Somatic, ev.clone()),
            Err(VariantError::EmptyAllele { allele: "reference" })
        );
        assert_eq!(
            VariantRecord::new(0, "1".to_string(), 5, b"A".to_vec(), b"c".to_vec(), Classification::Somatic, ev.clone()),
            Err(VariantError::InvalidBase { allele: "alternate", base: 'c' })
        );
        assert_eq!(
            VariantRecord::new(0, "1".to_string(), 5, b"A".to_vec(), b"A".to_vec(), Classification::Somatic, ev),
            Err(VariantError::IdenticalAlleles)
        );
    }

    #[test]
    fn test_right_shift_homopolymer_deletion() {
        // A TTTTTT G; deleting one T can be anchored anywhere in the run
        let del = record(1000, "AT", "A", "TTTTT");
        let shifted = del.right_shifted().unwrap();
        assert_eq!(shifted.position, 1005);
        assert_eq!(shifted.ref_allele, b"TT".to_vec());
        assert_eq!(shifted.alt_allele, b"T".to_vec());
        assert_eq!(del.canonical_key(), record(1005, "TT", "T", "").key());
    }

    #[test]
    fn test_right_shift_dinucleotide() {
        // C AG AG AG T; deleting one AG from the anchor C
        let del = record(100, "CAG", "C", "AGAG");
        let shifted = del.right_shifted().unwrap();
        assert_eq!(shifted.position, 104);
        assert_eq!(shifted.ref_allele, b"GAG".to_vec());
        assert_eq!(shifted.alt_allele, b"G".to_vec());

        // partial period shift rotates the deleted bases
        let del = record(100, "CAG", "C", "A");
        let shifted = del.right_shifted().unwrap();
        assert_eq!(shifted.position, 101);
        assert_eq!(shifted.ref_allele, b"AGA".to_vec());
        assert_eq!(shifted.alt_allele, b"A".to_vec());
    }

    #[test]
    fn test_right_shift_insertion() {
        let ins = record(50, "G", "GCA", "CAC");
        let shifted = ins.right_shifted().unwrap();
        assert_eq!(shifted.position, 53);
        assert_eq!(shifted.ref_allele, b"C".to_vec());
        assert_eq!(shifted.alt_allele, b"CAC".to_vec());
    }

    #[test]
    fn test_no_right_shift() {
        // no microhomology
        assert!(record(50, "G", "GCA", "").right_shifted().is_none());
        // microhomology does not repeat the inserted bases
        assert!(record(50, "G", "GCA", "CT").right_shifted().is_none());
        // substitutions never shift
        assert!(record(50, "G", "C", "G").right_shifted().is_none());
        // complex indel without a shared anchor
        assert!(record(50, "GT", "CAA", "A").right_shifted().is_none());
    }

    #[test]
    fn test_apply_shift() {
        let mut del = record(1000, "AT", "A", "TTTTT");
        let shifted = del.right_shifted().unwrap();
        del.apply_shift(shifted);
        assert_eq!(del.position(), 1005);
        assert!(del.is_right_aligned());
        assert!(del.evidence().microhomology.is_empty());
        assert!(del.right_shifted().is_none());
    }

    #[test]
    fn test_subsumes() {
        let mnv = record(1999, "CAT", "CGT", "");
        let snv = record(2000, "A", "G", "");
        assert!(mnv.subsumes(&snv));
        assert!(!snv.subsumes(&mnv));
        assert!(!mnv.subsumes(&record(2000, "A", "T", "")));
        assert!(!mnv.subsumes(&record(2002, "G", "A", "")));
        assert!(!mnv.subsumes(&record(2000, "A", "AG", "")));
    }

    #[test]
    fn test_merge_substitutions() {
        let mut evidence = SupportingEvidence {
            alt_support: 10, depth: 40, quality: 300,
            ..Default::default()
        };
        evidence.haplotype_tags.extend([1, 2]);
        let s1 = VariantRecord::new(1, "1".to_string(), 10, b"A".to_vec(), b"C".to_vec(), Classification::Somatic, evidence.clone()).unwrap();
        evidence.haplotype_tags = [2, 3].into_iter().collect();
        evidence.alt_support = 8;
        evidence.depth = 42;
        let s2 = VariantRecord::new(2, "1".to_string(), 11, b"G".to_vec(), b"T".to_vec(), Classification::Somatic, evidence).unwrap()
            .with_filters(["min_tumor_qual".to_string()]);

        let mnv = VariantRecord::merge_substitutions(7, &[s1, s2]);
        assert_eq!(mnv.record_id(), 7);
        assert_eq!(mnv.kind(), VariantKind::Mnv);
        assert_eq!(mnv.position(), 10);
        assert_eq!(mnv.ref_allele(), b"AG");
        assert_eq!(mnv.alt_allele(), b"CT");
        assert_eq!(mnv.evidence().alt_support, 8);
        assert_eq!(mnv.evidence().depth, 42);
        assert_eq!(mnv.evidence().quality, 600);
        assert_eq!(mnv.evidence().haplotype_tags, [2].into_iter().collect());
        assert!(!mnv.is_passing());
    }

    #[test]
    fn test_parse_classification() {
        assert_eq!(parse_classification("SOMATIC").unwrap(), Classification::Somatic);
        assert_eq!(parse_classification("germline").unwrap(), Classification::Germline);
        assert!(parse_classification("tumor").is_err());
        assert_eq!(Classification::Somatic.to_string(), "SOMATIC");
    }
}
