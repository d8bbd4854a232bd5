//! Streaming WAV output.

use std::cell::RefCell;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use std::rc::Rc;

use audiopipe_core::{Input, Sink};
use hound::WavWriter;

use crate::wav::{WavSpec, to_int};
use crate::{Error, Result};

/// A pipeline tail that encodes every accepted sample into a WAV file.
///
/// Writes are always accepted in full. A flush pushes the encoded data and
/// header to disk before it completes. An encoding failure is logged and
/// kept; later samples are discarded and the error is returned by
/// [`finalize()`](Self::finalize).
pub struct WavSink {
    input: Input,
    writer: Option<WavWriter<BufWriter<File>>>,
    spec: WavSpec,
    written: u64,
    error: Option<Error>,
}

impl WavSink {
    /// Creates `path` and returns a sink writing to it.
    pub fn create<P: AsRef<Path>>(path: P, spec: WavSpec) -> Result<Rc<RefCell<Self>>> {
        spec.check()?;
        let writer = WavWriter::create(path, hound::WavSpec::from(spec))?;
        Ok(Rc::new(RefCell::new(Self {
            input: Input::new(),
            writer: Some(writer),
            spec,
            written: 0,
            error: None,
        })))
    }

    /// The output format.
    pub fn spec(&self) -> WavSpec {
        self.spec
    }

    /// Samples encoded so far (per channel).
    pub fn samples_written(&self) -> u64 {
        self.written
    }

    /// Returns true once an encoding error has been recorded.
    pub fn has_failed(&self) -> bool {
        self.error.is_some()
    }

    /// Completes the file header and closes the file.
    ///
    /// Returns the number of samples written, or the first error seen while
    /// streaming.
    pub fn finalize(&mut self) -> Result<u64> {
        if let Some(err) = self.error.take() {
            self.writer = None;
            return Err(err);
        }
        let writer = self.writer.take().ok_or(Error::Finalized)?;
        writer.finalize()?;
        tracing::debug!(samples = self.written, "WAV sink finalized");
        Ok(self.written)
    }

    fn encode(&mut self, samples: &[f32]) -> Result<()> {
        let writer = self.writer.as_mut().ok_or(Error::Finalized)?;
        for &sample in samples {
            for _ in 0..self.spec.channels {
                if self.spec.is_float() {
                    writer.write_sample(sample)?;
                } else {
                    writer.write_sample(to_int(sample, self.spec.bits_per_sample))?;
                }
            }
        }
        self.written += samples.len() as u64;
        Ok(())
    }

    fn fail(&mut self, err: Error) {
        tracing::error!(error = %err, "WAV sink failed, discarding further audio");
        self.error = Some(err);
    }
}

impl Sink for WavSink {
    fn write(&mut self, samples: &[f32]) -> usize {
        if !self.input.accepting() {
            return 0;
        }
        if self.error.is_none()
            && let Err(err) = self.encode(samples)
        {
            self.fail(err);
        }
        samples.len()
    }

    fn flush(&mut self) {
        if !self.input.begin_flush() {
            return;
        }
        if self.error.is_none()
            && let Some(writer) = self.writer.as_mut()
            && let Err(err) = writer.flush()
        {
            self.fail(err.into());
        }
        self.input.all_flushed();
    }

    fn input(&mut self) -> &mut Input {
        &mut self.input
    }
}
