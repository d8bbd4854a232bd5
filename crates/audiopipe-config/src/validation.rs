//! Pipeline validation.
//!
//! The core treats bad constructor arguments as programming errors and
//! panics. Validation catches them while the pipeline is still text, and
//! reports every problem at once instead of stopping at the first.
//!
//! # Example
//!
//! ```rust
//! use audiopipe_config::{PipelineConfig, StageConfig, ValidationError, validate_pipeline};
//!
//! let config = PipelineConfig::new("bad")
//!     .with_sample_rate(44100)
//!     .with_stage(StageConfig::JitterFifo { size: 1 });
//!
//! match validate_pipeline(&config) {
//!     Err(ValidationError::Multiple(errors)) => assert_eq!(errors.len(), 2),
//!     other => panic!("unexpected: {other:?}"),
//! }
//! ```

use thiserror::Error;

use crate::pipeline::PipelineConfig;
use crate::stage::StageConfig;

/// Highest accepted sample rate, in Hz.
pub const MAX_SAMPLE_RATE: u32 = 192_000;

/// Longest accepted duration parameter, in milliseconds.
pub const MAX_DURATION_MS: u32 = 60_000;

/// Validation error types.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    /// The sample rate is zero, too high or not a whole number of kHz.
    #[error("sample rate {0} Hz must be a non-zero multiple of 1000 Hz up to 192000 Hz")]
    InvalidSampleRate(u32),

    /// Parameter value out of range.
    #[error("stage {stage} ({kind}): parameter '{param}' value {value} out of range [{min}, {max}]")]
    OutOfRange {
        /// Index of the stage in the pipeline.
        stage: usize,
        /// Stage type tag.
        kind: &'static str,
        /// Name of the parameter.
        param: &'static str,
        /// The value that was out of range.
        value: f64,
        /// Minimum allowed value.
        min: f64,
        /// Maximum allowed value.
        max: f64,
    },

    /// Parameter is NaN or infinite.
    #[error("stage {stage} ({kind}): parameter '{param}' must be finite")]
    NotFinite {
        /// Index of the stage in the pipeline.
        stage: usize,
        /// Stage type tag.
        kind: &'static str,
        /// Name of the parameter.
        param: &'static str,
    },

    /// Multiple validation errors.
    #[error("multiple validation errors: {}", .0.iter().map(|e| e.to_string()).collect::<Vec<_>>().join("; "))]
    Multiple(Vec<ValidationError>),
}

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validates the sample rate and every stage.
///
/// A single problem is returned as is; several are wrapped in
/// [`ValidationError::Multiple`].
pub fn validate_pipeline(config: &PipelineConfig) -> ValidationResult<()> {
    let mut errors = Vec::new();
    if let Err(e) = validate_sample_rate(config.sample_rate) {
        errors.push(e);
    }
    for (index, stage) in config.stages.iter().enumerate() {
        errors.extend(validate_stage(index, stage, config.sample_rate));
    }
    match errors.len() {
        0 => Ok(()),
        1 => Err(errors.remove(0)),
        _ => Err(ValidationError::Multiple(errors)),
    }
}

/// Checks that `sample_rate` is a non-zero multiple of 1000 Hz.
pub fn validate_sample_rate(sample_rate: u32) -> ValidationResult<()> {
    if sample_rate == 0 || sample_rate % 1000 != 0 || sample_rate > MAX_SAMPLE_RATE {
        Err(ValidationError::InvalidSampleRate(sample_rate))
    } else {
        Ok(())
    }
}

/// Returns every problem with one stage.
pub fn validate_stage(index: usize, stage: &StageConfig, sample_rate: u32) -> Vec<ValidationError> {
    let kind = stage.kind();
    let mut errors = Vec::new();
    let mut check = |param: &'static str, value: f64, min: f64, max: f64| {
        if !(min..=max).contains(&value) {
            errors.push(ValidationError::OutOfRange {
                stage: index,
                kind,
                param,
                value,
                min,
                max,
            });
        }
    };

    match *stage {
        StageConfig::Passthrough | StageConfig::Valve { .. } => {}
        StageConfig::Gain { gain } => {
            if !gain.is_finite() {
                return vec![ValidationError::NotFinite {
                    stage: index,
                    kind,
                    param: "gain",
                }];
            }
        }
        StageConfig::DelayLine { length_ms, fade_ms } => {
            // At least one sample of ring at this rate.
            let min_ms = 1000.0 / f64::from(sample_rate.max(1));
            check(
                "length_ms",
                f64::from(length_ms),
                min_ms.ceil(),
                f64::from(MAX_DURATION_MS),
            );
            check("fade_ms", f64::from(fade_ms), 0.0, f64::from(MAX_DURATION_MS));
        }
        StageConfig::JitterFifo { size } => {
            check("size", size as f64, 2.0, f64::from(MAX_SAMPLE_RATE) * 60.0);
        }
        StageConfig::Fifo {
            size,
            prebuf_samples,
            ..
        } => {
            check("size", size as f64, 1.0, f64::from(MAX_SAMPLE_RATE) * 60.0);
            check(
                "prebuf_samples",
                prebuf_samples as f64,
                0.0,
                size.saturating_sub(1) as f64,
            );
        }
        StageConfig::Pacer {
            block_size,
            prebuf_ms,
        } => {
            check("block_size", block_size as f64, 1.0, f64::from(MAX_SAMPLE_RATE));
            check("prebuf_ms", f64::from(prebuf_ms), 0.0, f64::from(MAX_DURATION_MS));
        }
    }
    errors
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_rate_rules() {
        assert!(validate_sample_rate(8000).is_ok());
        assert!(validate_sample_rate(48000).is_ok());
        assert_eq!(
            validate_sample_rate(0),
            Err(ValidationError::InvalidSampleRate(0))
        );
        assert!(validate_sample_rate(44100).is_err());
        assert!(validate_sample_rate(384_000).is_err());
    }

    #[test]
    fn single_error_is_not_wrapped() {
        let config = PipelineConfig::new("x").with_stage(StageConfig::Pacer {
            block_size: 0,
            prebuf_ms: 0,
        });
        let err = validate_pipeline(&config).unwrap_err();
        assert!(
            matches!(err, ValidationError::OutOfRange { stage: 0, param: "block_size", .. }),
            "got: {err:?}"
        );
    }

    #[test]
    fn every_problem_is_reported() {
        let config = PipelineConfig::new("x")
            .with_stage(StageConfig::DelayLine {
                length_ms: 0,
                fade_ms: 70_000,
            })
            .with_stage(StageConfig::Gain { gain: f32::NAN })
            .with_stage(StageConfig::JitterFifo { size: 0 });
        let Err(ValidationError::Multiple(errors)) = validate_pipeline(&config) else {
            panic!("expected several errors");
        };
        assert_eq!(errors.len(), 4);
        assert!(errors.contains(&ValidationError::NotFinite {
            stage: 1,
            kind: "gain",
            param: "gain"
        }));
    }

    #[test]
    fn fifo_prebuffer_must_fit_in_ring() {
        let stage = StageConfig::Fifo {
            size: 100,
            prebuf_samples: 100,
            overwrite: false,
        };
        let errors = validate_stage(0, &stage, 8000);
        assert_eq!(errors.len(), 1);
        assert!(matches!(
            errors[0],
            ValidationError::OutOfRange {
                param: "prebuf_samples",
                ..
            }
        ));
    }

    #[test]
    fn one_millisecond_delay_is_valid() {
        assert!(
            validate_stage(
                0,
                &StageConfig::DelayLine {
                    length_ms: 1,
                    fade_ms: 0
                },
                8000
            )
            .is_empty()
        );
    }

    #[test]
    fn display_mentions_stage_and_param() {
        let err = ValidationError::OutOfRange {
            stage: 2,
            kind: "pacer",
            param: "block_size",
            value: 0.0,
            min: 1.0,
            max: 192000.0,
        };
        let msg = err.to_string();
        assert!(msg.contains("stage 2 (pacer)"), "got: {msg}");
        assert!(msg.contains("block_size"), "got: {msg}");
    }
}
