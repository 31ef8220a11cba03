/*!
# Writers module
Contains the logic for writing the output files of a run: the resolved variant table, the optional suppression audit, and the run summary.
*/
/// Generates the run summary JSON and per-stage table
pub mod run_summary;
/// Generates the resolved (and suppressed) variant tables
pub mod variant_writer;
