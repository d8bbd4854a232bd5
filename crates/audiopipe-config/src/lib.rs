//! Pipeline descriptions for audiopipe.
//!
//! This crate describes linear audiopipe pipelines as data: a sample rate and
//! an ordered list of stages with plain numeric parameters. Descriptions are
//! stored as TOML and validated before anything is built from them.
//!
//! # Features
//!
//! - **Pipeline files**: Load and save [`PipelineConfig`] from TOML
//! - **Stages**: [`StageConfig`] variants mirror the core's node constructors
//! - **Validation**: Range checks that report every problem at once
//!
//! # Example
//!
//! ```rust
//! use audiopipe_config::{PipelineConfig, StageConfig};
//!
//! let config = PipelineConfig::from_toml(
//!     r#"
//!     name = "link-rx"
//!     sample_rate = 8000
//!
//!     [[stages]]
//!     type = "jitter_fifo"
//!     size = 1600
//!
//!     [[stages]]
//!     type = "pacer"
//!     block_size = 160
//!     "#,
//! )
//! .unwrap();
//!
//! assert_eq!(config.stages[0], StageConfig::JitterFifo { size: 1600 });
//! config.validate().unwrap();
//! ```

mod error;
mod pipeline;
mod stage;

/// Pipeline validation.
pub mod validation;

pub use error::ConfigError;
pub use pipeline::PipelineConfig;
pub use stage::StageConfig;
pub use validation::{
    MAX_DURATION_MS, MAX_SAMPLE_RATE, ValidationError, ValidationResult, validate_pipeline,
    validate_sample_rate, validate_stage,
};
