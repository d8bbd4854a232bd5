//! Elastic buffer for audio arriving at an irregular cadence.
//!
//! The FIFO always accepts everything written to it. When the ring overflows,
//! the oldest half is dropped in one jump, which restores headroom at once
//! instead of shaving one sample per write.
//!
//! Output is held back until the ring is at least half full (pre-buffering).
//! Once output has started it keeps going until the ring runs empty, at which
//! point pre-buffering re-arms. A flush request overrides pre-buffering and
//! drains whatever is left. If the downstream asks for audio (a resume) while
//! pre-buffering, silence is sent instead so its timing keeps running.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use crate::contract::{Input, Output, Producer, Sink, Source};
use crate::event_loop::EventLoop;

/// Largest block written downstream per call.
pub const MAX_WRITE_SIZE: usize = 800;

static SILENCE: [f32; MAX_WRITE_SIZE] = [0.0; MAX_WRITE_SIZE];

/// Jitter FIFO node.
pub struct JitterFifo {
    input: Input,
    output: Output,
    fifo: Vec<f32>,
    head: usize,
    tail: usize,
    output_stopped: bool,
    prebuf: bool,
    is_flushing: bool,
    flush_sent: bool,
    discarded: usize,
}

impl JitterFifo {
    /// Creates a FIFO with room for `size` samples.
    ///
    /// # Panics
    ///
    /// Panics if `size` is below 2.
    pub fn new(events: &EventLoop, size: usize) -> Rc<RefCell<Self>> {
        assert!(size >= 2, "jitter fifo needs room for at least 2 samples");
        Rc::new_cyclic(|me: &Weak<RefCell<Self>>| {
            let owner: Weak<RefCell<dyn Source>> = me.clone();
            RefCell::new(Self {
                input: Input::new(),
                output: Output::new(events, owner),
                fifo: vec![0.0; size],
                head: 0,
                tail: 0,
                output_stopped: false,
                prebuf: true,
                is_flushing: false,
                flush_sent: false,
                discarded: 0,
            })
        })
    }

    /// Ring capacity in samples.
    pub fn size(&self) -> usize {
        self.fifo.len()
    }

    /// Resizes the ring. The contents are cleared.
    pub fn set_size(&mut self, size: usize) {
        assert!(size >= 2, "jitter fifo needs room for at least 2 samples");
        if size != self.fifo.len() {
            self.fifo = vec![0.0; size];
        }
        self.clear();
    }

    /// Returns true if the ring holds no samples.
    pub fn is_empty(&self) -> bool {
        self.head == self.tail
    }

    /// Samples available for output: 0 while pre-buffering below the
    /// threshold, otherwise the ring fill level.
    pub fn samples_in_fifo(&self) -> usize {
        let size = self.fifo.len();
        let stored = (self.head + size - self.tail) % size;
        if self.prebuf && !self.is_flushing && stored < size / 2 {
            return 0;
        }
        stored
    }

    /// Returns true while output is held back.
    pub fn is_prebuffering(&self) -> bool {
        self.prebuf
    }

    /// Total samples dropped on overflow.
    pub fn discarded(&self) -> usize {
        self.discarded
    }

    /// Drops the ring contents and re-arms pre-buffering. A flush in
    /// progress completes as soon as the downstream has drained.
    pub fn clear(&mut self) {
        self.head = 0;
        self.tail = 0;
        self.prebuf = true;
        self.output_stopped = false;
        if self.is_flushing && !self.flush_sent {
            self.flush_sent = true;
            self.output.flush();
        }
    }

    fn write_from_fifo(&mut self, fill_silence: bool) {
        if self.output_stopped {
            return;
        }
        let size = self.fifo.len();
        if self.prebuf && !self.is_empty() {
            if fill_silence {
                let mut budget = (size * 16 / MAX_WRITE_SIZE).max(1);
                while budget > 0 {
                    if self.output.write(&SILENCE) < MAX_WRITE_SIZE {
                        self.output_stopped = true;
                        break;
                    }
                    budget -= 1;
                }
            }
            return;
        }
        loop {
            let count = MAX_WRITE_SIZE
                .min(self.samples_in_fifo())
                .min(size - self.tail);
            if count == 0 {
                break;
            }
            let written = self.output.write(&self.fifo[self.tail..self.tail + count]);
            self.tail = (self.tail + written) % size;
            if written < count {
                self.output_stopped = true;
                break;
            }
        }
        if self.is_empty() {
            if self.is_flushing {
                if !self.flush_sent {
                    self.flush_sent = true;
                    self.output.flush();
                }
            } else {
                self.prebuf = true;
            }
        }
    }
}

impl Sink for JitterFifo {
    fn write(&mut self, samples: &[f32]) -> usize {
        if !self.input.accepting() {
            return 0;
        }
        let size = self.fifo.len();
        for &sample in samples {
            self.fifo[self.head] = sample;
            self.head = (self.head + 1) % size;
            if self.head == self.tail {
                self.tail = (self.tail + size / 2) % size;
                self.discarded += size / 2;
                #[cfg(feature = "tracing")]
                tracing::debug!(dropped = size / 2, "jitter fifo overflow");
            }
        }
        if self.samples_in_fifo() > 0 {
            self.prebuf = false;
        }
        self.write_from_fifo(false);
        samples.len()
    }

    fn flush(&mut self) {
        if !self.input.begin_flush() {
            return;
        }
        self.is_flushing = true;
        self.flush_sent = false;
        if self.is_empty() {
            self.flush_sent = true;
            self.output.flush();
        } else {
            self.prebuf = false;
            self.write_from_fifo(false);
        }
    }

    fn input(&mut self) -> &mut Input {
        &mut self.input
    }
}

impl Source for JitterFifo {
    fn resume(&mut self) {
        self.output_stopped = false;
        self.write_from_fifo(true);
    }

    fn all_flushed(&mut self) {
        self.output.flush_completed();
        if self.is_empty() {
            if self.is_flushing {
                self.is_flushing = false;
                self.flush_sent = false;
                self.input.all_flushed();
            }
            self.prebuf = true;
        }
    }
}

impl Producer for JitterFifo {
    fn output(&mut self) -> &mut Output {
        &mut self.output
    }
}
