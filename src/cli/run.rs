use anyhow::{bail, ensure};
use clap::Args;
use log::info;
use serde::Serialize;
use std::path::PathBuf;

use crate::cli::core::{check_required_filename, AFTER_HELP, FULL_VERSION};
use crate::pipeline::DEFAULT_BUFFER_DISTANCE;

#[derive(Args, Clone, Default, Serialize)]
#[clap(author, about,
    after_help = &**AFTER_HELP
)]
pub struct RunSettings {
    #[clap(default_value = "")]
    #[clap(hide = true)]
    varphase_version: String,

    /// Position-sorted candidate calls (TSV/CSV, optionally gzipped)
    #[clap(required = true)]
    #[clap(short = 'i')]
    #[clap(long = "candidates")]
    #[clap(value_name = "TSV")]
    #[clap(help_heading = Some("Input/Output"))]
    pub candidates_filename: PathBuf,

    /// Coding exon boundaries (BED)
    #[clap(required = true)]
    #[clap(short = 'c')]
    #[clap(long = "coding-exons")]
    #[clap(value_name = "BED")]
    #[clap(help_heading = Some("Input/Output"))]
    pub coding_exons_filename: PathBuf,

    /// Output directory containing the variant table and summary
    #[clap(required = true)]
    #[clap(short = 'o')]
    #[clap(long = "output-dir")]
    #[clap(value_name = "DIR")]
    #[clap(help_heading = Some("Input/Output"))]
    pub output_folder: PathBuf,

    /// Also write every suppressed record with the stage that removed it
    #[clap(long = "audit")]
    #[clap(help_heading = Some("Input/Output"))]
    pub enable_audit: bool,

    /// Maximum distance (bp) over which records may interact
    #[clap(long = "buffer-distance")]
    #[clap(value_name = "BP")]
    #[clap(help_heading = Some("Pipeline parameters"))]
    #[clap(default_value_t = DEFAULT_BUFFER_DISTANCE)]
    pub buffer_distance: u64,

    /// Number of threads to use, partitions are processed in parallel
    #[clap(long = "threads")]
    #[clap(value_name = "THREADS")]
    #[clap(default_value = "1")]
    pub threads: usize,

    /// Enable verbose output.
    #[clap(short = 'v')]
    #[clap(long = "verbose")]
    #[clap(action = clap::ArgAction::Count)]
    pub verbosity: u8,

    // Debug options that are generally hidden and just for quick testing
    /// Skips a number of partitions (debug only)
    #[clap(hide = true)]
    #[clap(long = "skip")]
    #[clap(default_value = "0")]
    pub skip_partitions: usize,

    /// Takes a number of partitions (debug only); 0 means all
    #[clap(hide = true)]
    #[clap(long = "take")]
    #[clap(default_value = "0")]
    pub take_partitions: usize,
}

/// Validates and logs the run settings, filling in any derived values
/// # Errors
/// * if an input file does not exist
/// * if the buffer distance is 0
/// * if the output folder exists as a regular file
pub fn check_run_settings(mut settings: RunSettings) -> anyhow::Result<RunSettings> {
    // hard code the version in
    settings.varphase_version = FULL_VERSION.clone();
    info!("varphase version: {:?}", &settings.varphase_version);
    info!("Sub-command: run");
    info!("Inputs:");

    check_required_filename(&settings.candidates_filename, "Candidate file")?;
    check_required_filename(&settings.coding_exons_filename, "Coding exon BED")?;
    info!("\tCandidates: {:?}", &settings.candidates_filename);
    info!("\tCoding exons: {:?}", &settings.coding_exons_filename);

    info!("Outputs:");
    if settings.output_folder.is_file() {
        bail!("Output folder is an existing file: \"{}\"", settings.output_folder.display());
    }
    info!("\tOutput folder: {:?}", &settings.output_folder);
    info!("\tSuppression audit: {}", if settings.enable_audit { "ENABLED" } else { "DISABLED" });

    info!("Pipeline parameters:");
    ensure!(settings.buffer_distance > 0, "--buffer-distance must be >0");
    info!("\tBuffer distance: {}", settings.buffer_distance);

    // 0 is just a sentinel for everything
    if settings.take_partitions == 0 {
        settings.take_partitions = usize::MAX;
    }

    if settings.threads == 0 {
        settings.threads = 1;
    }
    info!("Processing threads: {}", settings.threads);

    Ok(settings)
}
