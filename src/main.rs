use log::{LevelFilter, error, info, warn};
use std::sync::Arc;
use std::time::Instant;

use varphase::cli::core::{Commands, get_cli};
use varphase::cli::run::{RunSettings, check_run_settings};
use varphase::data_types::transcripts::TranscriptLookup;
use varphase::parsing::candidates::load_candidate_partitions;
use varphase::partition::{Partition, run_partitions};
use varphase::pipeline::PipelineConfigBuilder;
use varphase::stages::phase_set::default_reportability;
use varphase::util::json_io::save_json;
use varphase::writers::run_summary::RunSummary;
use varphase::writers::variant_writer::VariantWriter;

fn run_pipeline(settings: RunSettings) {
    // start the timer
    let start_time = Instant::now();

    // set up logging before we check the other settings
    let filter_level: LevelFilter = match settings.verbosity {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace
    };
    env_logger::builder()
        .format_timestamp_millis()
        .filter_level(filter_level)
        .init();

    let settings = match check_run_settings(settings) {
        Ok(s) => s,
        Err(e) => {
            error!("Error while verifying settings: {e:#}");
            std::process::exit(exitcode::CONFIG);
        }
    };

    // set up the number of threads for rayon
    match rayon::ThreadPoolBuilder::new().num_threads(settings.threads).build_global() {
        Ok(()) => {},
        Err(e) => {
            error!("Error while building thread pool: {e}");
            std::process::exit(exitcode::OSERR);
        }
    };

    // create the primary output folder
    info!("Creating output folder at {:?}...", settings.output_folder);
    match std::fs::create_dir_all(&settings.output_folder) {
        Ok(()) => {},
        Err(e) => {
            error!("Error while creating output folder: {e}");
            std::process::exit(exitcode::IOERR);
        }
    }

    // save the CLI options
    let cli_json = settings.output_folder.join("cli_settings.json");
    info!("Saving CLI options to {cli_json:?}...");
    if let Err(e) = save_json(&settings, &cli_json) {
        error!("Error while saving CLI options: {e:#}");
        std::process::exit(exitcode::IOERR);
    }

    // load the coding exons
    info!("Pre-loading coding exons into memory...");
    let transcripts = match TranscriptLookup::from_bed(&settings.coding_exons_filename) {
        Ok(t) => Arc::new(t),
        Err(e) => {
            error!("Error while loading coding exons: {e:#}");
            std::process::exit(exitcode::IOERR);
        }
    };
    info!("Loaded {} coding exons.", transcripts.num_exons());

    // load and partition the candidates
    info!("Loading candidates...");
    let loaded = match load_candidate_partitions(&settings.candidates_filename) {
        Ok(l) => l,
        Err(e) => {
            error!("Error while loading candidates: {e:#}");
            std::process::exit(exitcode::IOERR);
        }
    };
    if loaded.unparsed_rows > 0 {
        warn!("Skipped {} candidate rows that could not be parsed.", loaded.unparsed_rows);
    }

    // check if we're in debug mode
    let skip_count = settings.skip_partitions;
    let take_count = settings.take_partitions;
    if skip_count != 0 || take_count != usize::MAX {
        warn!("Debug run detected, output may be truncated.");
        warn!("Partitions to skip: {skip_count}");
        warn!("Partitions to process: {take_count}");
    }
    let partitions: Vec<Partition> = loaded.partitions.into_iter()
        .skip(skip_count)
        .take(take_count)
        .collect();
    info!("Generated {} partitions.", partitions.len());

    // build our configuration
    let pipeline_config = match PipelineConfigBuilder::default()
        .buffer_distance(settings.buffer_distance)
        .enable_audit(settings.enable_audit)
        .build() {
        Ok(pc) => pc,
        Err(e) => {
            error!("Error while building pipeline config: {e:?}");
            std::process::exit(exitcode::SOFTWARE);
        }
    };

    info!("Processing partitions...");
    let all_results = match run_partitions(partitions, pipeline_config, transcripts, default_reportability()) {
        Ok(r) => r,
        Err(e) => {
            error!("Error while processing partitions: {e:#}");
            std::process::exit(exitcode::DATAERR);
        }
    };
    info!("Partition processing complete, saving all outputs...");

    let variants_fn = settings.output_folder.join("variants.tsv");
    info!("Saving resolved variants to {variants_fn:?}...");
    let mut summary = RunSummary::new(loaded.unparsed_rows);
    let mut audit_writer = if settings.enable_audit {
        let audit_fn = settings.output_folder.join("suppressed.tsv");
        info!("Saving suppressed variants to {audit_fn:?}...");
        match VariantWriter::new(&audit_fn) {
            Ok(w) => Some(w),
            Err(e) => {
                error!("Error while creating suppressed variant writer: {e:#}");
                std::process::exit(exitcode::IOERR);
            }
        }
    } else {
        None
    };
    let write_result = VariantWriter::new(&variants_fn)
        .and_then(|mut variant_writer| {
            for result in all_results.iter() {
                variant_writer.write_records(&result.label, &result.records)?;
                if let Some(w) = audit_writer.as_mut() {
                    w.write_suppressed(&result.label, &result.audit)?;
                }
                summary.add_partition(result);
            }
            variant_writer.flush()?;
            if let Some(w) = audit_writer.as_mut() {
                w.flush()?;
            }
            Ok(())
        });
    if let Err(e) = write_result {
        error!("Error while saving variant files: {e:#}");
        std::process::exit(exitcode::IOERR);
    }

    let totals = summary.totals;
    info!("Accepted:malformed candidates: {} : {}", totals.accepted, totals.malformed);
    info!("Emitted:suppressed records: {} : {}", totals.emitted, totals.total_suppressed());
    info!("\tMNVs created: {}", totals.mnv_created);
    info!("\tIndels right-aligned: {}", totals.right_aligned);
    info!("\tMissing context: {}", totals.missing_context);
    info!("Phase sets (passing): {} ({})", totals.phase_sets, totals.passing_phase_sets);
    if !totals.is_balanced() {
        warn!("Record counts do not balance, some records were neither emitted nor suppressed.");
    }

    // now write the summaries
    let summary_fn = settings.output_folder.join("summary.json");
    info!("Saving run summary to {summary_fn:?}...");
    if let Err(e) = summary.write_json(&summary_fn) {
        error!("Error while saving run summary: {e:#}");
        std::process::exit(exitcode::IOERR);
    }
    let stage_fn = settings.output_folder.join("stage_summary.tsv");
    if let Err(e) = summary.write_stage_table(&stage_fn) {
        error!("Error while saving stage summary: {e:#}");
        std::process::exit(exitcode::IOERR);
    }

    info!("Run completed in {} seconds.", start_time.elapsed().as_secs_f64());
}

fn main() {
    let cli = get_cli();
    match cli.command {
        Commands::Run(settings) => {
            run_pipeline(*settings);
        }
    }

    info!("Process finished successfully.");
}
