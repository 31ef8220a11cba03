/*!
# Parsing module
Contains the logic for parsing input files into meaningful structs / data.
*/
/// Loads candidate tables and groups them into partitions
pub mod candidates;
/// Helper functions for noodles
pub mod noodles_helper;
