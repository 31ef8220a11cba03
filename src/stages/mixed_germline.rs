use log::trace;

use crate::data_types::variants::{Classification, MixedTag, VariantKey, VariantRecord};
use crate::stages::dedup::insert_deduplicated;
use crate::stages::window_buffer::WindowBuffer;
use crate::stages::{PipelineError, StageContext, StageKind, VariantStage};

/// Returns true if one record is germline, the other somatic, and the germline allele is fully explained by the somatic one
fn is_mixed_pair(a: &VariantRecord, b: &VariantRecord) -> bool {
    let (germline, somatic) = match (a.classification(), b.classification()) {
        (Classification::Germline, Classification::Somatic) => (a, b),
        (Classification::Somatic, Classification::Germline) => (b, a),
        _ => return false
    };
    somatic.subsumes(germline)
}

/// Stage 4: tags germline/somatic substitution pairs that describe the same allele
#[derive(Debug)]
pub struct MixedGermlineIdentifier {
    buffer: WindowBuffer
}

impl MixedGermlineIdentifier {
    pub fn new(buffer_distance: u64) -> Self {
        Self { buffer: WindowBuffer::new(buffer_distance) }
    }
}

impl VariantStage for MixedGermlineIdentifier {
    fn kind(&self) -> StageKind {
        StageKind::MixedGermlineIdentifier
    }

    fn accept(&mut self, mut record: VariantRecord, ctx: &mut StageContext, out: &mut Vec<VariantRecord>) -> Result<(), PipelineError> {
        if self.buffer.check_order(&record)? {
            out.extend(self.buffer.drain_all());
        } else {
            out.extend(self.buffer.drain_closed(record.position()));
        }

        if record.mixed_tag() == MixedTag::Untagged {
            let partner = self.buffer.iter_mut()
                .find(|b| b.mixed_tag() == MixedTag::Untagged && is_mixed_pair(b, &record));
            if let Some(partner) = partner {
                trace!("Tagged mixed germline/somatic pair at {}:{} and {}",
                    record.chromosome(), partner.position(), record.position());
                partner.set_mixed_tag(MixedTag::MixedGermlineSomaticCandidate { paired_with: record.record_id() });
                record.set_mixed_tag(MixedTag::MixedGermlineSomaticCandidate { paired_with: partner.record_id() });
                ctx.stats_mut().mixed_pairs_tagged += 1;
            }
        }
        self.buffer.push_back(record);
        Ok(())
    }

    fn flush(&mut self, _ctx: &mut StageContext, out: &mut Vec<VariantRecord>) {
        out.extend(self.buffer.drain_all());
    }

    fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

/// Stage 5: resolves tagged pairs to the somatic record, then removes exact duplicates
#[derive(Debug)]
pub struct MixedGermlineDedup {
    buffer: WindowBuffer
}

impl MixedGermlineDedup {
    pub fn new(buffer_distance: u64) -> Self {
        Self { buffer: WindowBuffer::new(buffer_distance) }
    }

    /// A tag whose partner never showed up is dropped when the record leaves
    fn release(closing: Vec<VariantRecord>, out: &mut Vec<VariantRecord>) {
        out.extend(closing.into_iter().map(|mut r| {
            if r.mixed_tag() != MixedTag::Untagged {
                trace!("Clearing unresolved mixed tag at {}:{}", r.chromosome(), r.position());
                r.set_mixed_tag(MixedTag::Untagged);
            }
            r
        }));
    }

    /// Resolves a tagged incoming record against its buffered partner.
    /// Returns the record if it should continue into the buffer.
    fn resolve_pair(&mut self, mut record: VariantRecord, ctx: &mut StageContext) -> Option<VariantRecord> {
        let MixedTag::MixedGermlineSomaticCandidate { paired_with } = record.mixed_tag() else {
            return Some(record);
        };
        let Some(index) = self.buffer.find(|b| b.record_id() == paired_with) else {
            // partner was removed upstream or already left, keep the tag until release
            return Some(record);
        };

        if record.classification() == Classification::Germline {
            let partner = self.buffer.get_mut(index)?;
            partner.set_mixed_tag(MixedTag::Untagged);
            partner.set_germline_component();
            let survivor = partner.record_id();
            ctx.suppress(StageKind::MixedGermlineDedup, record, Some(survivor));
            None
        } else {
            if let Some(partner) = self.buffer.remove(index) {
                ctx.suppress(StageKind::MixedGermlineDedup, partner, Some(record.record_id()));
            }
            record.set_mixed_tag(MixedTag::Untagged);
            record.set_germline_component();
            Some(record)
        }
    }
}

fn exact_key(record: &VariantRecord) -> Option<VariantKey> {
    Some(record.key())
}

impl VariantStage for MixedGermlineDedup {
    fn kind(&self) -> StageKind {
        StageKind::MixedGermlineDedup
    }

    fn accept(&mut self, record: VariantRecord, ctx: &mut StageContext, out: &mut Vec<VariantRecord>) -> Result<(), PipelineError> {
        let closing = if self.buffer.check_order(&record)? {
            self.buffer.drain_all()
        } else {
            self.buffer.drain_closed(record.position())
        };
        Self::release(closing, out);

        if let Some(record) = self.resolve_pair(record, ctx) {
            insert_deduplicated(&mut self.buffer, record, StageKind::MixedGermlineDedup, ctx, exact_key, |survivor, loser| {
                if loser.germline_component() {
                    survivor.set_germline_component();
                }
            });
        }
        Ok(())
    }

    fn flush(&mut self, _ctx: &mut StageContext, out: &mut Vec<VariantRecord>) {
        let closing = self.buffer.drain_all();
        Self::release(closing, out);
    }

    fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_types::candidate::CandidateRecord;
    use crate::stages::test_util::{record, run_stage};

    #[test]
    fn test_identifier_tags_pair() {
        let mut ctx = StageContext::new(false);
        let mut stage = MixedGermlineIdentifier::new(150);
        let out = run_stage(&mut stage, &mut ctx, vec![
            record("1", 1999, "CAT", "CGT", "SOMATIC"),
            record("1", 2000, "A", "G", "GERMLINE"),
            // same allele but both germline
            record("1", 2000, "A", "G", "GERMLINE")
        ]);
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].mixed_tag(), MixedTag::MixedGermlineSomaticCandidate { paired_with: 2000 });
        assert_eq!(out[1].mixed_tag(), MixedTag::MixedGermlineSomaticCandidate { paired_with: 1999 });
        assert_eq!(out[2].mixed_tag(), MixedTag::Untagged);
        assert_eq!(ctx.stats().mixed_pairs_tagged, 1);
    }

    #[test]
    fn test_identifier_no_subsumption() {
        let mut ctx = StageContext::new(false);
        let mut stage = MixedGermlineIdentifier::new(150);
        let out = run_stage(&mut stage, &mut ctx, vec![
            record("1", 1999, "CAT", "CTT", "SOMATIC"),
            record("1", 2000, "A", "G", "GERMLINE"),
            record("1", 2000, "AT", "A", "SOMATIC")
        ]);
        assert!(out.iter().all(|r| r.mixed_tag() == MixedTag::Untagged));
    }

    #[test]
    fn test_dedup_resolves_germline_newcomer() {
        let mut ctx = StageContext::new(true);
        let mut identifier = MixedGermlineIdentifier::new(150);
        let tagged = run_stage(&mut identifier, &mut ctx, vec![
            record("1", 1999, "CAT", "CGT", "SOMATIC"),
            record("1", 2000, "A", "G", "GERMLINE")
        ]);

        let mut stage = MixedGermlineDedup::new(150);
        let out = run_stage(&mut stage, &mut ctx, tagged);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].position(), 1999);
        assert_eq!(out[0].classification(), Classification::Somatic);
        assert!(out[0].germline_component());
        assert_eq!(out[0].mixed_tag(), MixedTag::Untagged);
        assert_eq!(ctx.stats().suppressed_at(StageKind::MixedGermlineDedup), 1);
        assert_eq!(ctx.audit().unwrap()[0].record.classification(), Classification::Germline);
    }

    #[test]
    fn test_dedup_resolves_somatic_newcomer() {
        let mut ctx = StageContext::new(false);
        let mut identifier = MixedGermlineIdentifier::new(150);
        let tagged = run_stage(&mut identifier, &mut ctx, vec![
            CandidateRecord::new("1", 2000, "A", "G", "GERMLINE").to_record(1).unwrap(),
            CandidateRecord::new("1", 2000, "AT", "GC", "SOMATIC").to_record(2).unwrap()
        ]);

        let mut stage = MixedGermlineDedup::new(150);
        let out = run_stage(&mut stage, &mut ctx, tagged);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].ref_allele(), b"AT");
        assert!(out[0].germline_component());
    }

    #[test]
    fn test_dedup_clears_orphan_tag() {
        let mut ctx = StageContext::new(false);
        let mut orphan = record("1", 2000, "A", "G", "GERMLINE");
        orphan.set_mixed_tag(MixedTag::MixedGermlineSomaticCandidate { paired_with: 12 });

        let mut stage = MixedGermlineDedup::new(150);
        let out = run_stage(&mut stage, &mut ctx, vec![orphan, record("1", 2001, "C", "G", "SOMATIC")]);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].mixed_tag(), MixedTag::Untagged);
        assert!(!out[0].germline_component());
    }

    #[test]
    fn test_dedup_exact() {
        let mut ctx = StageContext::new(false);
        let mut stage = MixedGermlineDedup::new(150);
        let out = run_stage(&mut stage, &mut ctx, vec![
            record("1", 10, "A", "G", "GERMLINE"),
            record("1", 10, "A", "G", "GERMLINE"),
            record("1", 10, "AT", "A", "SOMATIC")
        ]);
        assert_eq!(out.len(), 2);
        assert_eq!(ctx.stats().suppressed_at(StageKind::MixedGermlineDedup), 1);
    }
}
