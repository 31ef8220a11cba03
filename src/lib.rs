/// Command line interface functionality
pub mod cli;
/// Contains various shared data types
pub mod data_types;
/// Tooling for parsing input files into meaningful structs / data
pub mod parsing;
/// Splits input into independent partitions and runs them in parallel
pub mod partition;
/// The controller that wires the stage chain together
pub mod pipeline;
/// The nine windowed stages and their shared plumbing
pub mod stages;
/// Various utility functions that tend to be very generic
pub mod util;
/// All output writers
pub mod writers;
