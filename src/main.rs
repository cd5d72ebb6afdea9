use anyhow::{Context, Result};
use clap::Parser;
use contend::analyzer::CaptureAnalyzer;
use contend::cli::Cli;
use contend::config::AnalysisConfig;
use contend::decoder::{resolve_decoder, ExternalDecoder};
use contend::discovery::discover_captures;
use contend::scheduler::WorkScheduler;
use contend::summary;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

/// Initialize the tracing subscriber on stderr
fn init_tracing(debug: bool, quiet: bool) {
    let level = if debug {
        tracing::Level::TRACE
    } else if quiet {
        tracing::Level::WARN
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .with_writer(std::io::stderr)
        .init();
}

/// File configuration with command-line overrides applied
fn load_config(args: &Cli) -> Result<AnalysisConfig> {
    let mut config = match &args.config {
        Some(path) => AnalysisConfig::from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => AnalysisConfig::default(),
    };
    if let Some(pattern) = &args.target_pattern {
        config.target_pattern = pattern.clone();
    }
    config.validate()?;
    Ok(config)
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.debug, args.quiet);

    let config = load_config(&args)?;

    let binary = resolve_decoder(args.decoder.as_deref())?;
    tracing::info!(decoder = %binary.display(), "decoder resolved");
    let decoder = ExternalDecoder::new(binary)
        .with_timeout(args.decoder_timeout_secs.map(Duration::from_secs));

    let captures = discover_captures(&args.source, &args.extension)?;
    let work_dir = args.work_dir.clone().unwrap_or_else(std::env::temp_dir);
    let analyzer = CaptureAnalyzer::new(config, Arc::new(decoder), work_dir)?;

    let started = Instant::now();
    let run = WorkScheduler::new(args.jobs).run(captures, |capture| analyzer.analyze(capture));

    tracing::info!(
        analyzed = run.records.len(),
        skipped = run.skipped.len(),
        failed = run.failed.len(),
        dedup_hits = run.total_dedup_hits(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "run complete"
    );

    if let Some(output_dir) = &args.output_dir {
        let path = summary::write_outputs(&run, output_dir, args.format)?;
        tracing::info!(summary = %path.display(), "fleet summary written");
    }
    print!("{}", summary::render(&run, args.format)?);

    Ok(())
}
