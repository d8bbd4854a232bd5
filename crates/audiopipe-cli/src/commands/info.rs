//! Display pipeline or WAV file details.

use audiopipe_config::{PipelineConfig, StageConfig};
use audiopipe_io::{WavFormat, read_wav_info};
use clap::Args;
use std::path::Path;

/// Display pipeline file or WAV file information.
#[derive(Args)]
pub struct InfoArgs {
    /// Path to a pipeline file (TOML) or a WAV file
    pub file: std::path::PathBuf,
}

/// Run the info command.
pub fn run(args: InfoArgs) -> anyhow::Result<()> {
    let is_wav = args
        .file
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("wav"));
    if is_wav {
        wav_info(&args.file)
    } else {
        pipeline_info(&args.file)
    }
}

fn pipeline_info(path: &Path) -> anyhow::Result<()> {
    let config = PipelineConfig::load(path)?;

    println!("Pipeline:    {}", config.name);
    if let Some(description) = &config.description {
        println!("Description: {description}");
    }
    println!("Sample Rate: {} Hz", config.sample_rate);
    let latency = config.latency_samples();
    println!(
        "Latency:     {} samples ({:.1} ms fixed)",
        latency,
        latency as f64 * 1000.0 / f64::from(config.sample_rate.max(1))
    );
    println!("Stages:      {}", config.len());
    for (i, stage) in config.stages.iter().enumerate() {
        println!("  {i}. {}", describe(stage));
    }

    if let Err(e) = config.validate() {
        println!();
        println!("Invalid: {e}");
    }
    Ok(())
}

fn describe(stage: &StageConfig) -> String {
    let kind = stage.kind();
    match *stage {
        StageConfig::Passthrough => kind.to_string(),
        StageConfig::Valve {
            open,
            block_when_closed,
        } => format!(
            "{kind} ({}, {} when closed)",
            if open { "open" } else { "closed" },
            if block_when_closed { "blocks" } else { "discards" }
        ),
        StageConfig::Gain { gain } => format!("{kind} x{gain}"),
        StageConfig::DelayLine { length_ms, fade_ms } => {
            format!("{kind} {length_ms} ms (fade {fade_ms} ms)")
        }
        StageConfig::JitterFifo { size } => format!("{kind} {size} samples"),
        StageConfig::Fifo {
            size,
            prebuf_samples,
            overwrite,
        } => format!(
            "{kind} {size} samples (prebuffer {prebuf_samples}{})",
            if overwrite { ", overwrites" } else { "" }
        ),
        StageConfig::Pacer {
            block_size,
            prebuf_ms,
        } => format!("{kind} {block_size}-sample blocks (prebuffer {prebuf_ms} ms)"),
    }
}

fn wav_info(path: &Path) -> anyhow::Result<()> {
    let info = read_wav_info(path)?;

    let format_str = match info.format {
        WavFormat::Pcm => "PCM",
        WavFormat::IeeeFloat => "IEEE Float",
    };

    println!("File:        {}", path.display());
    println!("Format:      {} {}-bit", format_str, info.bits_per_sample);
    println!("Channels:    {}", info.channels);
    println!("Sample Rate: {} Hz", info.sample_rate);
    println!(
        "Duration:    {:.3}s ({} frames)",
        info.duration_secs, info.num_frames
    );
    Ok(())
}
