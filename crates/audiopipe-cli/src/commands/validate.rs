//! Pipeline file validation command.

use audiopipe_config::{PipelineConfig, ValidationError};
use clap::Args;
use std::path::PathBuf;

/// Check pipeline files without running them.
#[derive(Args)]
pub struct ValidateArgs {
    /// Pipeline files (TOML)
    #[arg(required = true, value_name = "FILE")]
    files: Vec<PathBuf>,
}

/// Run the validate command. Every file is checked; the command fails if
/// any of them does.
pub fn run(args: ValidateArgs) -> anyhow::Result<()> {
    let mut failed = 0;

    for path in &args.files {
        let config = match PipelineConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                println!("{}: {e}", path.display());
                failed += 1;
                continue;
            }
        };

        match config.validate() {
            Ok(()) => println!(
                "{}: ok ('{}', {} stage(s) at {} Hz)",
                path.display(),
                config.name,
                config.len(),
                config.sample_rate
            ),
            Err(ValidationError::Multiple(errors)) => {
                println!("{}: {} problems", path.display(), errors.len());
                for e in errors {
                    println!("  - {e}");
                }
                failed += 1;
            }
            Err(e) => {
                println!("{}: {e}", path.display());
                failed += 1;
            }
        }
    }

    if failed > 0 {
        anyhow::bail!("{failed} of {} pipeline file(s) failed validation", args.files.len());
    }
    Ok(())
}
