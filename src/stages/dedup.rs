/*!
# Dedup stages
Stages 1 to 3: realignment dedup, exact indel dedup, and SNV run merging with substitution dedup.
*/

use log::trace;

use crate::data_types::variants::{Classification, VariantKey, VariantKind, VariantRecord};
use crate::stages::window_buffer::WindowBuffer;
use crate::stages::{PipelineError, StageContext, StageKind, VariantStage};

/// Representative policy shared by every dedup stage: a somatic call beats a germline call for the same event, otherwise the first-seen record is kept.
/// Returns true if `incoming` should replace `existing`.
pub fn prefer_incoming(existing: &VariantRecord, incoming: &VariantRecord) -> bool {
    existing.classification() == Classification::Germline && incoming.classification() == Classification::Somatic
}

/// Buffers `record` unless an equivalent record is already held, in which case one of the two is suppressed.
/// # Arguments
/// * `buffer` - the stage buffer
/// * `record` - the incoming record
/// * `stage` - the stage doing the suppression
/// * `ctx` - chain context for suppression
/// * `key_fn` - identity for a record, None if the record does not participate
/// * `on_merge` - called with (survivor, loser) before the loser is suppressed
pub fn insert_deduplicated<K, M>(
    buffer: &mut WindowBuffer, record: VariantRecord, stage: StageKind, ctx: &mut StageContext,
    key_fn: K, mut on_merge: M
) where
    K: Fn(&VariantRecord) -> Option<VariantKey>,
    M: FnMut(&mut VariantRecord, &VariantRecord)
{
    let Some(key) = key_fn(&record) else {
        buffer.push_back(record);
        return;
    };

    let Some(index) = buffer.find(|b| key_fn(b).as_ref() == Some(&key)) else {
        buffer.push_back(record);
        return;
    };

    // index is valid, it was just found
    let Some(existing) = buffer.get_mut(index) else {
        return;
    };
    if prefer_incoming(existing, &record) {
        let mut survivor = record;
        if let Some(loser) = buffer.remove(index) {
            on_merge(&mut survivor, &loser);
            let survivor_id = survivor.record_id();
            ctx.suppress(stage, loser, Some(survivor_id));
        }
        // the incoming record is at the newest position, so appending keeps the order
        buffer.push_back(survivor);
    } else {
        on_merge(existing, &record);
        let survivor_id = existing.record_id();
        ctx.suppress(stage, record, Some(survivor_id));
    }
}

fn indel_canonical_key(record: &VariantRecord) -> Option<VariantKey> {
    record.is_indel().then(|| record.canonical_key())
}

fn indel_key(record: &VariantRecord) -> Option<VariantKey> {
    record.is_indel().then(|| record.key())
}

fn substitution_key(record: &VariantRecord) -> Option<VariantKey> {
    record.is_substitution().then(|| record.key())
}

/// Stage 1: collapses alternate anchors of the same indel inside a repeat
#[derive(Debug)]
pub struct DedupRealign {
    buffer: WindowBuffer
}

impl DedupRealign {
    pub fn new(buffer_distance: u64) -> Self {
        Self { buffer: WindowBuffer::new(buffer_distance) }
    }
}

impl VariantStage for DedupRealign {
    fn kind(&self) -> StageKind {
        StageKind::DedupRealign
    }

    fn accept(&mut self, record: VariantRecord, ctx: &mut StageContext, out: &mut Vec<VariantRecord>) -> Result<(), PipelineError> {
        if self.buffer.check_order(&record)? {
            out.extend(self.buffer.drain_all());
        } else {
            out.extend(self.buffer.drain_closed(record.position()));
        }
        insert_deduplicated(&mut self.buffer, record, StageKind::DedupRealign, ctx, indel_canonical_key, |survivor, loser| {
            // an exact duplicate is not a realignment, stage 2 would have caught it anyways
            if survivor.key() != loser.key() {
                trace!("Collapsed realigned indel at {}:{} into {}", loser.chromosome(), loser.position(), survivor.position());
                survivor.add_collapsed_realignments(1);
            }
            survivor.add_collapsed_realignments(loser.collapsed_realignments());
        });
        Ok(())
    }

    fn flush(&mut self, _ctx: &mut StageContext, out: &mut Vec<VariantRecord>) {
        out.extend(self.buffer.drain_all());
    }

    fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

/// Stage 2: removes exact duplicate indels
#[derive(Debug)]
pub struct DedupIndel {
    buffer: WindowBuffer
}

impl DedupIndel {
    pub fn new(buffer_distance: u64) -> Self {
        Self { buffer: WindowBuffer::new(buffer_distance) }
    }
}

impl VariantStage for DedupIndel {
    fn kind(&self) -> StageKind {
        StageKind::DedupIndel
    }

    fn accept(&mut self, record: VariantRecord, ctx: &mut StageContext, out: &mut Vec<VariantRecord>) -> Result<(), PipelineError> {
        if self.buffer.check_order(&record)? {
            out.extend(self.buffer.drain_all());
        } else {
            out.extend(self.buffer.drain_closed(record.position()));
        }
        insert_deduplicated(&mut self.buffer, record, StageKind::DedupIndel, ctx, indel_key, |survivor, loser| {
            survivor.add_collapsed_realignments(loser.collapsed_realignments());
        });
        Ok(())
    }

    fn flush(&mut self, _ctx: &mut StageContext, out: &mut Vec<VariantRecord>) {
        out.extend(self.buffer.drain_all());
    }

    fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

/// Stage 3: merges phased runs of adjacent SNVs into MNVs, then removes exact duplicate substitutions
#[derive(Debug)]
pub struct DedupMnv {
    buffer: WindowBuffer
}

impl DedupMnv {
    pub fn new(buffer_distance: u64) -> Self {
        Self { buffer: WindowBuffer::new(buffer_distance) }
    }

    /// Resolves records leaving the window, merging any SNV run that starts in them.
    /// Run members can come from later closing records or from the buffer.
    fn close(&mut self, closing: Vec<VariantRecord>, ctx: &mut StageContext, out: &mut Vec<VariantRecord>) {
        let mut pending: Vec<Option<VariantRecord>> = closing.into_iter().map(Some).collect();
        // (record, created here) in output order
        let mut resolved: Vec<(VariantRecord, bool)> = Vec::with_capacity(pending.len());

        for i in 0..pending.len() {
            let Some(first) = pending[i].take() else {
                // already absorbed into an earlier run
                continue;
            };

            let mut run = self.extract_run(first, &mut pending[(i+1)..]);
            if run.len() == 1 {
                if let Some(record) = run.pop() {
                    push_resolved(record, false, &mut resolved, ctx);
                }
                continue;
            }

            let mnv = VariantRecord::merge_substitutions(ctx.ids_mut().record_id(), &run);
            trace!("Merged {} SNVs into MNV at {}:{}", run.len(), mnv.chromosome(), mnv.position());
            ctx.stats_mut().mnv_created += 1;
            for member in run.into_iter() {
                ctx.suppress(StageKind::DedupMnv, member, Some(mnv.record_id()));
            }
            if let Some(mnv) = self.dedup_against_buffer(mnv, ctx) {
                push_resolved(mnv, true, &mut resolved, ctx);
            }
        }
        out.extend(resolved.into_iter().map(|(r, _created)| r));
    }

    /// Grows a run of adjacent, phased SNVs starting at `first`.
    /// Members are taken out of `later` or the buffer.
    fn extract_run(&mut self, first: VariantRecord, later: &mut [Option<VariantRecord>]) -> Vec<VariantRecord> {
        let mut run = vec![first];
        loop {
            let Some(last) = run.last() else { break; };
            if last.kind() != VariantKind::Snv {
                break;
            }
            let mut shared_tags = run[0].evidence().haplotype_tags.clone();
            for r in run.iter().skip(1) {
                shared_tags.retain(|t| r.evidence().haplotype_tags.contains(t));
            }
            if shared_tags.is_empty() {
                break;
            }

            let next_position = last.position() + 1;
            let classification = last.classification();
            let extends = |r: &VariantRecord| {
                r.kind() == VariantKind::Snv &&
                    r.position() == next_position &&
                    r.classification() == classification &&
                    r.evidence().haplotype_tags.iter().any(|t| shared_tags.contains(t))
            };

            if let Some(slot) = later.iter_mut().find(|s| matches!(s, Some(r) if extends(r))) {
                if let Some(next) = slot.take() {
                    run.push(next);
                    continue;
                }
            }
            match self.buffer.find(&extends).and_then(|index| self.buffer.remove(index)) {
                Some(next) => run.push(next),
                None => break
            }
        }
        run
    }

    /// Deduplicates a newly created MNV against a raw substitution still in the buffer.
    /// The MNV counts as the newer record. Returns the MNV if it survives.
    fn dedup_against_buffer(&mut self, mnv: VariantRecord, ctx: &mut StageContext) -> Option<VariantRecord> {
        let key = mnv.key();
        let Some(index) = self.buffer.find(|r| r.key() == key) else {
            return Some(mnv);
        };
        let existing = self.buffer.get(index)?;
        if prefer_incoming(existing, &mnv) {
            if let Some(loser) = self.buffer.remove(index) {
                ctx.suppress(StageKind::DedupMnv, loser, Some(mnv.record_id()));
            }
            Some(mnv)
        } else {
            ctx.suppress(StageKind::DedupMnv, mnv, Some(existing.record_id()));
            None
        }
    }
}

/// Adds a record to the resolved batch, deduplicating it against what is already there.
/// Created MNVs count as newer than raw records for the first-seen rule.
fn push_resolved(record: VariantRecord, created: bool, resolved: &mut Vec<(VariantRecord, bool)>, ctx: &mut StageContext) {
    let key = record.key();
    let Some(index) = resolved.iter().position(|(r, _c)| r.key() == key) else {
        resolved.push((record, created));
        return;
    };
    let slot = &mut resolved[index];

    let incoming_is_newer = created || !slot.1;
    let replace = if incoming_is_newer {
        prefer_incoming(&slot.0, &record)
    } else {
        !prefer_incoming(&record, &slot.0)
    };
    if replace {
        // same identity means same position, so the slot keeps the order
        let loser = std::mem::replace(slot, (record, created)).0;
        ctx.suppress(StageKind::DedupMnv, loser, Some(slot.0.record_id()));
    } else {
        ctx.suppress(StageKind::DedupMnv, record, Some(slot.0.record_id()));
    }
}

impl VariantStage for DedupMnv {
    fn kind(&self) -> StageKind {
        StageKind::DedupMnv
    }

    fn accept(&mut self, record: VariantRecord, ctx: &mut StageContext, out: &mut Vec<VariantRecord>) -> Result<(), PipelineError> {
        let closing = if self.buffer.check_order(&record)? {
            self.buffer.drain_all()
        } else {
            self.buffer.drain_closed(record.position())
        };
        self.close(closing, ctx, out);
        insert_deduplicated(&mut self.buffer, record, StageKind::DedupMnv, ctx, substitution_key, |_s, _l| {});
        Ok(())
    }

    fn flush(&mut self, ctx: &mut StageContext, out: &mut Vec<VariantRecord>) {
        let closing = self.buffer.drain_all();
        self.close(closing, ctx, out);
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

    fn tagged_snv(position: u64, ref_allele: &str, alt_allele: &str, tags: &[u32]) -> VariantRecord {
        CandidateRecord::new("1", position, ref_allele, alt_allele, "SOMATIC")
            .with_haplotype_tags(tags)
            .to_record(position).unwrap()
    }

    #[test]
    fn test_prefer_incoming() {
        let germline = record("1", 10, "A", "C", "GERMLINE");
        let somatic = record("1", 10, "A", "C", "SOMATIC");
        assert!(prefer_incoming(&germline, &somatic));
        assert!(!prefer_incoming(&somatic, &germline));
        assert!(!prefer_incoming(&somatic, &somatic));
        assert!(!prefer_incoming(&germline, &germline));
    }

    #[test]
    fn test_dedup_realign() {
        let mut ctx = StageContext::new(true);
        let mut stage = DedupRealign::new(150);
        let first = CandidateRecord::new("1", 1000, "AT", "A", "SOMATIC")
            .with_microhomology("TTTTT")
            .to_record(1).unwrap();
        let second = CandidateRecord::new("1", 1005, "TT", "T", "SOMATIC")
            .to_record(2).unwrap();
        let out = run_stage(&mut stage, &mut ctx, vec![first, second]);

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].record_id(), 1);
        assert_eq!(out[0].collapsed_realignments(), 1);
        assert_eq!(ctx.stats().suppressed_at(StageKind::DedupRealign), 1);
        assert_eq!(ctx.audit().unwrap()[0].survivor, Some(1));
    }

    #[test]
    fn test_dedup_realign_somatic_preferred() {
        let mut ctx = StageContext::new(false);
        let mut stage = DedupRealign::new(150);
        let first = CandidateRecord::new("1", 1000, "AT", "A", "GERMLINE")
            .with_microhomology("TTTTT")
            .to_record(1).unwrap();
        let second = CandidateRecord::new("1", 1005, "TT", "T", "SOMATIC")
            .to_record(2).unwrap();
        let out = run_stage(&mut stage, &mut ctx, vec![first, second]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].record_id(), 2);
        assert_eq!(out[0].collapsed_realignments(), 1);
    }

    #[test]
    fn test_dedup_indel_exact() {
        let mut ctx = StageContext::new(false);
        let mut stage = DedupIndel::new(150);
        let out = run_stage(&mut stage, &mut ctx, vec![
            record("1", 100, "AT", "A", "SOMATIC"),
            record("1", 100, "AT", "A", "GERMLINE"),
            record("1", 100, "A", "C", "SOMATIC"),
            record("1", 100, "A", "C", "SOMATIC"),
            record("1", 400, "AT", "A", "SOMATIC")
        ]);
        // substitutions are not touched here
        assert_eq!(out.len(), 4);
        assert_eq!(ctx.stats().suppressed_at(StageKind::DedupIndel), 1);
        // a duplicate outside the window is not merged
        assert_eq!(out.iter().filter(|r| r.ref_allele() == b"AT").count(), 2);
    }

    #[test]
    fn test_dedup_mnv_merge() {
        let mut ctx = StageContext::new(true);
        let mut stage = DedupMnv::new(150);
        let out = run_stage(&mut stage, &mut ctx, vec![
            tagged_snv(100, "A", "C", &[1, 2]),
            tagged_snv(101, "G", "T", &[2]),
            tagged_snv(102, "T", "A", &[2, 5]),
            // not phased with the run
            tagged_snv(103, "C", "G", &[7]),
            // not adjacent
            tagged_snv(110, "C", "G", &[2])
        ]);

        assert_eq!(out.len(), 3);
        assert_eq!(out[0].kind(), VariantKind::Mnv);
        assert_eq!(out[0].position(), 100);
        assert_eq!(out[0].ref_allele(), b"AGT");
        assert_eq!(out[0].alt_allele(), b"CTA");
        assert_eq!(out[1].position(), 103);
        assert_eq!(out[2].position(), 110);
        assert_eq!(ctx.stats().mnv_created, 1);
        assert_eq!(ctx.stats().suppressed_at(StageKind::DedupMnv), 3);
        assert!(ctx.audit().unwrap().iter().all(|s| s.survivor == Some(out[0].record_id())));
    }

    #[test]
    fn test_dedup_mnv_untagged() {
        // SNVs without haplotype evidence are never merged
        let mut ctx = StageContext::new(false);
        let mut stage = DedupMnv::new(150);
        let out = run_stage(&mut stage, &mut ctx, vec![
            record("1", 100, "A", "C", "SOMATIC"),
            record("1", 101, "G", "T", "SOMATIC")
        ]);
        assert_eq!(out.len(), 2);
        assert_eq!(ctx.stats().mnv_created, 0);
    }

    #[test]
    fn test_dedup_mnv_created_duplicate() {
        let mut ctx = StageContext::new(false);
        let mut stage = DedupMnv::new(150);
        let raw_mnv = CandidateRecord::new("1", 100, "AG", "CT", "SOMATIC")
            .to_record(50).unwrap();
        let out = run_stage(&mut stage, &mut ctx, vec![
            tagged_snv(100, "A", "C", &[1]),
            raw_mnv,
            tagged_snv(101, "G", "T", &[1])
        ]);

        // the merged MNV matches the raw one, which was seen first
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].record_id(), 50);
        assert_eq!(ctx.stats().mnv_created, 1);
        assert_eq!(ctx.stats().suppressed_at(StageKind::DedupMnv), 3);
    }

    #[test]
    fn test_dedup_substitutions() {
        let mut ctx = StageContext::new(false);
        let mut stage = DedupMnv::new(150);
        let out = run_stage(&mut stage, &mut ctx, vec![
            record("1", 100, "A", "C", "GERMLINE"),
            record("1", 100, "A", "C", "SOMATIC"),
            record("2", 100, "A", "C", "SOMATIC")
        ]);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].classification(), Classification::Somatic);
        assert_eq!(out[1].chromosome(), "2");
    }
}
