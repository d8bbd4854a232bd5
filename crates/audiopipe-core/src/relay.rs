//! Buffered, rate-converting adapter for sample transforms.
//!
//! A [`Relay`] wraps a [`Transform`] and handles the flow-control plumbing
//! around it: a bounded output buffer, backpressure in both directions and
//! flush propagation. The transform itself only ever sees whole frames.
//!
//! # Rates
//!
//! The relay converts between an input and an output rate whose ratio is an
//! integer either way:
//!
//! | Ratio | Frame | Transform call |
//! |-------|-------|----------------|
//! | 1:1 | 1 sample | whole block, same length out |
//! | D:1 (decimate) | D input samples | once per frame, 1 sample out |
//! | 1:I (interpolate) | 1 input sample | whole block, I× length out |
//!
//! When decimating, a fractional frame left at the end of a write is kept in
//! an assembly buffer and completed by the next write. On flush it is
//! zero-padded to a full frame and transformed, so a stream tail is never
//! dropped.
//!
//! # Example
//!
//! ```rust
//! use audiopipe_core::{EventLoop, Gain, Relay, Sink};
//!
//! let events = EventLoop::new();
//! let relay = Relay::new(&events, Gain::new(0.5));
//! // Unconnected: output is discarded, input fully accepted.
//! assert_eq!(relay.borrow_mut().write(&[1.0; 64]), 64);
//! ```

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use crate::contract::{Input, Output, Producer, Sink, Source};
use crate::event_loop::EventLoop;

/// Capacity of the relay's output buffer, in samples.
pub const RELAY_BUFFER_SIZE: usize = 256;

/// A sample transform driven by a [`Relay`].
pub trait Transform {
    /// Processes `src` into `dst` and returns the number of samples produced.
    ///
    /// `src` always holds whole frames and `dst` is sized for exactly the
    /// output those frames map to. Implementations must consume all of
    /// `src` and fill `dst` completely.
    fn transform(&mut self, dst: &mut [f32], src: &[f32]) -> usize;
}

/// Constant gain, 1:1.
#[derive(Debug, Clone, Copy)]
pub struct Gain {
    gain: f32,
}

impl Gain {
    /// Creates a linear gain.
    pub fn new(gain: f32) -> Self {
        Self { gain }
    }

    /// Creates a gain from decibels.
    pub fn from_db(db: f32) -> Self {
        Self::new(crate::fade::db_to_linear(db))
    }

    /// Linear gain factor.
    pub fn gain(&self) -> f32 {
        self.gain
    }

    /// Sets the linear gain factor.
    pub fn set_gain(&mut self, gain: f32) {
        self.gain = gain;
    }
}

impl Transform for Gain {
    fn transform(&mut self, dst: &mut [f32], src: &[f32]) -> usize {
        for (out, &x) in dst.iter_mut().zip(src) {
            *out = x * self.gain;
        }
        dst.len()
    }
}

/// Adapts a closure `FnMut(dst, src) -> produced` into a [`Transform`].
pub struct FnTransform<F> {
    f: F,
}

impl<F> FnTransform<F>
where
    F: FnMut(&mut [f32], &[f32]) -> usize,
{
    /// Wraps `f`.
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> Transform for FnTransform<F>
where
    F: FnMut(&mut [f32], &[f32]) -> usize,
{
    fn transform(&mut self, dst: &mut [f32], src: &[f32]) -> usize {
        (self.f)(dst, src)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ratio {
    Unity,
    Decimate(usize),
    Interpolate(usize),
}

impl Ratio {
    fn new(input_rate: u32, output_rate: u32) -> Self {
        assert!(input_rate > 0 && output_rate > 0, "rates must be > 0");
        assert!(
            input_rate % output_rate == 0 || output_rate % input_rate == 0,
            "rate ratio must be an integer ({input_rate}:{output_rate})"
        );
        match input_rate.cmp(&output_rate) {
            std::cmp::Ordering::Equal => Self::Unity,
            std::cmp::Ordering::Greater => Self::Decimate((input_rate / output_rate) as usize),
            std::cmp::Ordering::Less => {
                let factor = (output_rate / input_rate) as usize;
                // One input sample must fit in the output buffer.
                assert!(
                    factor <= RELAY_BUFFER_SIZE,
                    "interpolation factor {factor} exceeds the relay buffer ({RELAY_BUFFER_SIZE})"
                );
                Self::Interpolate(factor)
            }
        }
    }

    fn output_len(self, input_len: usize) -> usize {
        match self {
            Self::Unity => input_len,
            Self::Decimate(d) => input_len / d,
            Self::Interpolate(i) => input_len * i,
        }
    }
}

/// Rate-converting relay around a [`Transform`].
pub struct Relay<T: Transform> {
    input: Input,
    output: Output,
    transform: T,
    ratio: Ratio,
    buf: Vec<f32>,
    frame: Vec<f32>,
    output_stalled: bool,
    input_stopped: bool,
    /// Downstream flush to issue once everything has drained.
    do_flush: bool,
}

impl<T: Transform + 'static> Relay<T> {
    /// Creates a 1:1 relay.
    pub fn new(events: &EventLoop, transform: T) -> Rc<RefCell<Self>> {
        Self::with_rates(events, 1, 1, transform)
    }

    /// Creates a relay converting `input_rate` to `output_rate`.
    ///
    /// # Panics
    ///
    /// Panics unless one rate is an integer multiple of the other, or if the
    /// interpolation factor exceeds [`RELAY_BUFFER_SIZE`].
    pub fn with_rates(
        events: &EventLoop,
        input_rate: u32,
        output_rate: u32,
        transform: T,
    ) -> Rc<RefCell<Self>> {
        let ratio = Ratio::new(input_rate, output_rate);
        let frame_len = match ratio {
            Ratio::Decimate(d) => d,
            _ => 0,
        };
        Rc::new_cyclic(|me: &Weak<RefCell<Self>>| {
            let owner: Weak<RefCell<dyn Source>> = me.clone();
            RefCell::new(Self {
                input: Input::new(),
                output: Output::new(events, owner),
                transform,
                ratio,
                buf: Vec::with_capacity(RELAY_BUFFER_SIZE),
                frame: Vec::with_capacity(frame_len),
                output_stalled: false,
                input_stopped: false,
                do_flush: false,
            })
        })
    }
}

impl<T: Transform> Relay<T> {
    /// The wrapped transform.
    pub fn transform(&self) -> &T {
        &self.transform
    }

    /// Mutable access to the wrapped transform.
    pub fn transform_mut(&mut self) -> &mut T {
        &mut self.transform
    }

    /// Samples waiting in the output buffer.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Input samples held in the frame assembly buffer.
    pub fn pending_frame(&self) -> usize {
        self.frame.len()
    }

    /// Largest input count that cannot overflow the output buffer.
    fn input_capacity(&self) -> usize {
        let space = RELAY_BUFFER_SIZE - self.buf.len();
        match self.ratio {
            Ratio::Unity => space,
            Ratio::Decimate(d) => (space * d).saturating_sub(self.frame.len()),
            Ratio::Interpolate(i) => space / i,
        }
    }

    /// Transforms whole frames of `src` into the output buffer.
    fn process(&mut self, src: &[f32]) {
        let expected = self.ratio.output_len(src.len());
        let start = self.buf.len();
        self.buf.resize(start + expected, 0.0);
        let produced = self.transform.transform(&mut self.buf[start..], src);
        debug_assert_eq!(produced, expected, "transform must fill its output");
        self.buf.truncate(start + produced.min(expected));
    }

    fn process_decimated(&mut self, d: usize, mut src: &[f32]) {
        if !self.frame.is_empty() {
            let take = (d - self.frame.len()).min(src.len());
            self.frame.extend_from_slice(&src[..take]);
            src = &src[take..];
            if self.frame.len() == d {
                let frame = std::mem::take(&mut self.frame);
                self.process(&frame);
                self.frame = frame;
                self.frame.clear();
            }
        }
        let whole = src.len() / d * d;
        for frame in src[..whole].chunks_exact(d) {
            self.process(frame);
        }
        self.frame.extend_from_slice(&src[whole..]);
    }

    /// Zero-pads and transforms a fractional frame.
    fn pad_frame(&mut self, d: usize) {
        let mut frame = std::mem::take(&mut self.frame);
        frame.resize(d, 0.0);
        self.process(&frame);
        frame.clear();
        self.frame = frame;
    }

    fn write_out(&mut self) {
        while !self.output_stalled && !self.buf.is_empty() {
            let len = self.buf.len();
            let written = self.output.write(&self.buf);
            self.buf.drain(..written);
            if written < len {
                self.output_stalled = true;
            }
        }
    }

    fn drain(&mut self) {
        self.write_out();
        if self.do_flush && self.buf.is_empty() && !self.frame.is_empty() {
            if let Ratio::Decimate(d) = self.ratio {
                self.pad_frame(d);
                self.write_out();
            }
        }
        if self.do_flush && self.buf.is_empty() {
            self.do_flush = false;
            #[cfg(feature = "tracing")]
            tracing::trace!("relay drained, flushing downstream");
            self.output.flush();
        }
        if self.input_stopped && self.input_capacity() > 0 {
            self.input_stopped = false;
            self.input.resume();
        }
    }
}

impl<T: Transform> Sink for Relay<T> {
    fn write(&mut self, samples: &[f32]) -> usize {
        if !self.input.accepting() {
            return 0;
        }
        self.write_out();

        let len = self.input_capacity().min(samples.len());
        if len > 0 {
            let src = &samples[..len];
            match self.ratio {
                Ratio::Decimate(d) => self.process_decimated(d, src),
                _ => self.process(src),
            }
        }
        if len < samples.len() {
            self.input_stopped = true;
        }

        self.drain();
        len
    }

    fn flush(&mut self) {
        if self.input.begin_flush() {
            self.do_flush = true;
            self.drain();
        }
    }

    fn input(&mut self) -> &mut Input {
        &mut self.input
    }
}

impl<T: Transform> Source for Relay<T> {
    fn resume(&mut self) {
        self.output_stalled = false;
        self.drain();
    }

    fn all_flushed(&mut self) {
        self.output.flush_completed();
        self.input.all_flushed();
    }
}

impl<T: Transform> Producer for Relay<T> {
    fn output(&mut self) -> &mut Output {
        &mut self.output
    }
}
