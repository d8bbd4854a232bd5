//! Gain curves for click-free muting and level changes.
//!
//! [`FadeCurve`] is an exponential fade-out table used by the
//! [`DelayLine`](crate::DelayLine) to ramp retained audio down to silence and
//! back up again. Entry `i` of an `n`-entry curve is `2^(-15 i / n)`, so the
//! ramp spans roughly 90 dB; the final entry is exactly zero. Walking the
//! table backwards gives the matching fade-in.

use libm::{expf, powf};

/// Exponential fade-out gain table.
#[derive(Debug, Clone, Default)]
pub struct FadeCurve {
    gains: Vec<f32>,
}

impl FadeCurve {
    /// Builds an `len`-entry fade-out. A zero length gives an empty curve,
    /// meaning "switch instantly".
    pub fn new(len: usize) -> Self {
        let mut gains: Vec<f32> = (0..len)
            .map(|i| powf(2.0, -15.0 * i as f32 / len as f32))
            .collect();
        if let Some(last) = gains.last_mut() {
            *last = 0.0;
        }
        Self { gains }
    }

    /// Builds a curve spanning `fade_ms` milliseconds at `sample_rate` Hz.
    pub fn with_duration_ms(fade_ms: u32, sample_rate: u32) -> Self {
        Self::new((u64::from(fade_ms) * u64::from(sample_rate) / 1000) as usize)
    }

    /// Number of entries.
    #[inline]
    pub fn len(&self) -> usize {
        self.gains.len()
    }

    /// Returns true for an instant (zero-length) curve.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.gains.is_empty()
    }

    /// Gain at step `index` of the fade-out; 0 past the end.
    #[inline]
    pub fn gain(&self, index: usize) -> f32 {
        self.gains.get(index).copied().unwrap_or(0.0)
    }
}

/// Converts decibels to linear gain.
///
/// ```rust
/// use audiopipe_core::db_to_linear;
///
/// assert!((db_to_linear(0.0) - 1.0).abs() < 0.001);
/// assert!((db_to_linear(-6.02) - 0.5).abs() < 0.01);
/// ```
#[inline]
pub fn db_to_linear(db: f32) -> f32 {
    const FACTOR: f32 = core::f32::consts::LN_10 / 20.0;
    expf(db * FACTOR)
}
