//! Stage descriptions.

use audiopipe_core::DEFAULT_FADE_TIME_MS;
use serde::{Deserialize, Serialize};

/// One node of a linear pipeline.
///
/// Stored in TOML as a table whose `type` key selects the variant:
///
/// ```toml
/// [[stages]]
/// type = "delay_line"
/// length_ms = 200
/// fade_ms = 10
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StageConfig {
    /// Forwards everything unchanged.
    Passthrough,

    /// Open/closed gate.
    Valve {
        /// Whether audio passes initially.
        #[serde(default = "default_true")]
        open: bool,
        /// Backpressure instead of discarding while closed.
        #[serde(default)]
        block_when_closed: bool,
    },

    /// Constant linear gain.
    Gain {
        /// Linear gain factor.
        gain: f32,
    },

    /// Fixed delay with faded mute and clear.
    DelayLine {
        /// Delay in milliseconds.
        length_ms: u32,
        /// Fade time in milliseconds.
        #[serde(default = "default_fade_ms")]
        fade_ms: u32,
    },

    /// Elastic jitter buffer.
    JitterFifo {
        /// Capacity in samples.
        size: usize,
    },

    /// Bounded FIFO.
    Fifo {
        /// Capacity in samples.
        size: usize,
        /// Samples stored before output starts.
        #[serde(default)]
        prebuf_samples: usize,
        /// Drop the oldest samples instead of blocking when full.
        #[serde(default)]
        overwrite: bool,
    },

    /// Fixed-cadence block pacer.
    Pacer {
        /// Samples per emitted block.
        block_size: usize,
        /// Samples passed straight through after idle, in milliseconds.
        #[serde(default)]
        prebuf_ms: u32,
    },
}

fn default_true() -> bool {
    true
}

fn default_fade_ms() -> u32 {
    DEFAULT_FADE_TIME_MS
}

impl StageConfig {
    /// The `type` tag of this stage.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Passthrough => "passthrough",
            Self::Valve { .. } => "valve",
            Self::Gain { .. } => "gain",
            Self::DelayLine { .. } => "delay_line",
            Self::JitterFifo { .. } => "jitter_fifo",
            Self::Fifo { .. } => "fifo",
            Self::Pacer { .. } => "pacer",
        }
    }

    /// Latency this stage adds before any audio comes out, in samples.
    ///
    /// Jitter buffers and pacers add a load-dependent latency and report 0.
    pub fn latency_samples(&self, sample_rate: u32) -> usize {
        match self {
            Self::DelayLine { length_ms, .. } => {
                (u64::from(*length_ms) * u64::from(sample_rate) / 1000) as usize
            }
            _ => 0,
        }
    }
}
