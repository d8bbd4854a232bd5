//! File-based pipeline processing command.

use crate::pipeline::Chain;
use anyhow::Context;
use audiopipe_config::PipelineConfig;
use audiopipe_core::{DEFAULT_READ_BLOCK, EventLoop, SampleReader};
use audiopipe_io::{WavSink, WavSpec, read_wav};
use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::time::Duration;

/// Virtual time advanced between progress updates.
const PROGRESS_STEP: Duration = Duration::from_millis(100);

/// Process a WAV file through a pipeline.
#[derive(Args)]
pub struct ProcessArgs {
    /// Input WAV file
    #[arg(value_name = "INPUT")]
    input: PathBuf,

    /// Output WAV file
    #[arg(value_name = "OUTPUT")]
    output: PathBuf,

    /// Pipeline file (TOML). Without one the audio is copied unchanged.
    #[arg(short, long)]
    pipeline: Option<PathBuf>,

    /// Samples pushed into the pipeline per write
    #[arg(long, default_value_t = DEFAULT_READ_BLOCK)]
    block_size: usize,

    /// Output bit depth (8, 16, 24, or 32)
    #[arg(long, default_value = "16")]
    bit_depth: u16,

    /// Pace timers on the wall clock instead of virtual time
    #[arg(long)]
    realtime: bool,
}

/// Run the process command.
pub fn run(args: ProcessArgs) -> anyhow::Result<()> {
    anyhow::ensure!(args.block_size > 0, "--block-size must be > 0");

    println!("Reading {}...", args.input.display());
    let (samples, spec) = read_wav(&args.input)
        .with_context(|| format!("failed to read {}", args.input.display()))?;
    println!(
        "  {} samples, {} Hz, {:.2}s",
        samples.len(),
        spec.sample_rate,
        samples.len() as f64 / f64::from(spec.sample_rate)
    );

    let config = match &args.pipeline {
        Some(path) => PipelineConfig::load(path)
            .with_context(|| format!("failed to load pipeline {}", path.display()))?,
        None => PipelineConfig::new("copy").with_sample_rate(spec.sample_rate),
    };
    config
        .validate()
        .with_context(|| format!("pipeline '{}' is invalid", config.name))?;
    anyhow::ensure!(
        config.sample_rate == spec.sample_rate,
        "pipeline '{}' runs at {} Hz but the input is {} Hz",
        config.name,
        config.sample_rate,
        spec.sample_rate
    );

    let events = EventLoop::with_sample_rate(config.sample_rate);
    let chain = Chain::build(&config, &events)?;
    let reader = SampleReader::new(&events, args.block_size);
    let out_spec = WavSpec::mono(config.sample_rate).with_bits(args.bit_depth);
    let sink = WavSink::create(&args.output, out_spec)
        .with_context(|| format!("failed to create {}", args.output.display()))?;
    chain.attach(&reader, &sink)?;

    println!("Processing through '{}' ({} stage(s))...", config.name, chain.len());
    tracing::info!(
        pipeline = %config.name,
        stages = chain.len(),
        sample_rate = config.sample_rate,
        "processing"
    );

    reader.borrow_mut().feed(&samples);
    reader.borrow_mut().finish();

    if args.realtime {
        events.run_realtime();
    } else {
        let pb = ProgressBar::new(samples.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")?
                .progress_chars("##-"),
        );
        while !reader.borrow().is_done() {
            if events.is_idle() {
                break;
            }
            events.advance(PROGRESS_STEP);
            pb.set_position(reader.borrow().written() as u64);
        }
        pb.finish_and_clear();
    }

    if !reader.borrow().is_done() {
        anyhow::bail!(
            "pipeline stalled after {} of {} samples",
            reader.borrow().written(),
            samples.len()
        );
    }

    let written = sink.borrow_mut().finalize()?;
    println!(
        "Wrote {} samples ({:.2}s) to {}",
        written,
        written as f64 / f64::from(config.sample_rate),
        args.output.display()
    );
    println!("  Virtual time: {:.2}s", events.now().as_secs_f64());

    Ok(())
}
