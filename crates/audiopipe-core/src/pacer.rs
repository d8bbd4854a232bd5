//! Turns a bursty producer into fixed-size blocks at a fixed cadence.
//!
//! The pacer owns one block buffer. While pacing, writes fill the buffer and
//! a periodic timer, firing every `block_size / rate` seconds, pushes the
//! buffer downstream and moves any unconsumed remainder to the front.
//!
//! The first `prebuf_ms` worth of samples after an idle period go straight
//! through without waiting for the timer, so an initial burst reaches the
//! consumer quickly. With no prebuffer time, the first block passes straight
//! through. Whatever exceeds the quota enters the buffer and starts the
//! timer. A tick that finds the buffer empty, or a completed flush, ends
//! pacing and re-arms the quota.

use std::cell::RefCell;
use std::rc::{Rc, Weak};
use std::time::Duration;

use crate::contract::{Input, Output, Producer, Sink, Source};
use crate::event_loop::{EventLoop, TimerHandler, TimerId};

/// Pacer node.
pub struct Pacer {
    input: Input,
    output: Output,
    events: EventLoop,
    timer: TimerId,
    block_size: usize,
    prebuf_samples: usize,
    quota: usize,
    buf: Vec<f32>,
    pacing: bool,
    /// Downstream took less than a full push; waiting for its resume.
    output_stopped: bool,
    input_stopped: bool,
    do_flush: bool,
}

impl Pacer {
    /// Creates a pacer emitting `block_size` samples per tick, passing the
    /// first `prebuf_ms` of each burst straight through.
    ///
    /// # Panics
    ///
    /// Panics if `block_size` is 0.
    pub fn new(events: &EventLoop, block_size: usize, prebuf_ms: u32) -> Rc<RefCell<Self>> {
        assert!(block_size > 0, "block size must be > 0");
        let rate = u64::from(events.sample_rate());
        let interval = Duration::from_nanos(block_size as u64 * 1_000_000_000 / rate);
        let prebuf_samples = events.ms_to_samples(prebuf_ms);
        Rc::new_cyclic(|me: &Weak<RefCell<Self>>| {
            let owner: Weak<RefCell<dyn Source>> = me.clone();
            let handler: Weak<RefCell<dyn TimerHandler>> = me.clone();
            let timer = events.add_timer(interval, handler);
            RefCell::new(Self {
                input: Input::new(),
                output: Output::new(events, owner),
                events: events.clone(),
                timer,
                block_size,
                prebuf_samples,
                quota: prebuf_samples,
                buf: Vec::with_capacity(block_size),
                pacing: false,
                output_stopped: false,
                input_stopped: false,
                do_flush: false,
            })
        })
    }

    /// Samples per emitted block.
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Samples waiting for the next tick.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Returns true while the block cadence is running.
    pub fn is_pacing(&self) -> bool {
        self.pacing
    }

    fn start_pacing(&mut self) {
        if !self.pacing {
            self.pacing = true;
            self.events.set_timer_enabled(self.timer, true);
            #[cfg(feature = "tracing")]
            tracing::debug!(block = self.block_size, "pacer started");
        }
    }

    fn stop_pacing(&mut self) {
        self.pacing = false;
        self.quota = self.prebuf_samples;
        self.events.set_timer_enabled(self.timer, false);
        #[cfg(feature = "tracing")]
        tracing::debug!("pacer idle");
    }

    /// Pushes the buffer downstream and compacts the remainder.
    fn output_block(&mut self) {
        if !self.buf.is_empty() {
            let len = self.buf.len();
            let written = self.output.write(&self.buf);
            self.buf.drain(..written);
            if written < len {
                self.output_stopped = true;
                self.events.set_timer_enabled(self.timer, false);
            }
        }
        if self.input_stopped && self.buf.len() < self.block_size {
            self.input_stopped = false;
            self.input.resume();
        }
        if self.do_flush && self.buf.is_empty() {
            self.do_flush = false;
            self.output.flush();
        }
    }

    fn buffer(&mut self, samples: &[f32]) -> usize {
        let room = self.block_size - self.buf.len();
        let take = room.min(samples.len());
        self.buf.extend_from_slice(&samples[..take]);
        if take < samples.len() {
            self.input_stopped = true;
        }
        take
    }
}

impl Sink for Pacer {
    fn write(&mut self, samples: &[f32]) -> usize {
        if !self.input.accepting() {
            return 0;
        }
        if self.pacing {
            return self.buffer(samples);
        }

        let direct = if self.quota > 0 {
            self.quota.min(samples.len())
        } else {
            self.block_size.min(samples.len())
        };
        let written = self.output.write(&samples[..direct]);
        self.quota = self.quota.saturating_sub(written);
        if written < direct {
            return written;
        }
        if self.quota > 0 {
            return written;
        }
        self.start_pacing();
        written + self.buffer(&samples[written..])
    }

    fn flush(&mut self) {
        if !self.input.begin_flush() {
            return;
        }
        if self.buf.is_empty() {
            self.output.flush();
        } else {
            self.do_flush = true;
        }
    }

    fn input(&mut self) -> &mut Input {
        &mut self.input
    }
}

impl Source for Pacer {
    fn resume(&mut self) {
        if self.output_stopped {
            self.output_stopped = false;
            self.output_block();
            if self.pacing && !self.output_stopped {
                self.events.set_timer_enabled(self.timer, true);
            }
        } else if !self.pacing {
            self.input.resume();
        }
    }

    fn all_flushed(&mut self) {
        self.output.flush_completed();
        if self.buf.is_empty() {
            self.stop_pacing();
        }
        self.input.all_flushed();
    }
}

impl Producer for Pacer {
    fn output(&mut self) -> &mut Output {
        &mut self.output
    }
}

impl TimerHandler for Pacer {
    fn on_timer(&mut self, _timer: TimerId) {
        if self.buf.is_empty() {
            self.stop_pacing();
            return;
        }
        self.output_block();
    }
}

impl Drop for Pacer {
    fn drop(&mut self) {
        self.events.remove_timer(self.timer);
    }
}
