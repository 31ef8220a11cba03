/*!
# CLI module
Command line interface functionality for varphase.
*/

/// The main CLI module that contains the top-level CLI parser and help text
pub mod core;
/// The run CLI subcommand
pub mod run;
