//! WAV file endpoints for audiopipe pipelines.
//!
//! This crate provides:
//!
//! - **WAV file I/O**: [`read_wav`] and [`write_wav`] for loading and saving
//!   whole files as mono `f32` samples
//! - **Streaming output**: [`WavSink`], a pipeline [`Sink`](audiopipe_core::Sink)
//!   that encodes samples as they arrive
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use audiopipe_core::{DelayLine, EventLoop, SampleReader, connect};
//! use audiopipe_io::{WavSink, WavSpec, read_wav};
//!
//! let (samples, spec) = read_wav("input.wav")?;
//! let events = EventLoop::with_sample_rate(spec.sample_rate);
//!
//! let reader = SampleReader::new(&events, 256);
//! let delay = DelayLine::new(&events, 100);
//! let sink = WavSink::create("output.wav", WavSpec::mono(spec.sample_rate))?;
//! connect(&reader, &delay)?;
//! connect(&delay, &sink)?;
//!
//! reader.borrow_mut().feed(&samples);
//! reader.borrow_mut().finish();
//! events.run();
//! sink.borrow_mut().finalize()?;
//! ```

mod sink;
mod wav;

pub use sink::WavSink;
pub use wav::{WavFormat, WavInfo, WavSpec, read_wav, read_wav_info, write_wav};

/// Error types for audio I/O operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// WAV file read/write error.
    #[error("WAV file error: {0}")]
    Wav(#[from] hound::Error),

    /// The requested sample format is not supported.
    #[error("Unsupported sample format: {0}")]
    UnsupportedFormat(String),

    /// A streaming sink was used after it was finalized.
    #[error("WAV writer already finalized")]
    Finalized,

    /// Standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type for audio I/O operations.
pub type Result<T> = std::result::Result<T, Error>;
