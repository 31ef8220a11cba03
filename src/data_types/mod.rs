/// Raw candidate rows and their conversion into validated records
pub mod candidate;
/// Counters collected while threading records through the stages
pub mod pipeline_stats;
/// Coding exon boundaries used for in-frame and right-alignment context
pub mod transcripts;
/// Contains variant definition functionality and checks
pub mod variants;
