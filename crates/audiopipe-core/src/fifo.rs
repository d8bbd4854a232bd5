//! General-purpose bounded FIFO between a producer and a slower consumer.
//!
//! Writes pass straight through while the ring is empty and the downstream
//! keeps up. Whatever the downstream refuses is stored and pushed out on its
//! next resume. A full ring refuses further writes and resumes the source
//! once there is room, unless overwrite mode is on, in which case the oldest
//! samples are dropped instead.
//!
//! With a prebuffer threshold set, output is held back until that many
//! samples are stored. The threshold applies to the start of each stream: a
//! flush drains regardless of it and re-arms it for the next one.
//!
//! Buffering can be switched off, turning the FIFO into a pass-through that
//! forwards backpressure as is. Switching it off while samples are stored
//! takes effect once they have been flushed out.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use crate::contract::{Input, Output, Producer, Sink, Source};
use crate::event_loop::EventLoop;
use crate::jitter_fifo::MAX_WRITE_SIZE;

/// Bounded FIFO node.
pub struct AudioFifo {
    input: Input,
    output: Output,
    fifo: Vec<f32>,
    head: usize,
    tail: usize,
    /// Distinguishes a full ring from an empty one when `head == tail`.
    full: bool,
    overwrite: bool,
    prebuf_samples: usize,
    prebuf: bool,
    output_stopped: bool,
    input_stopped: bool,
    is_flushing: bool,
    flush_sent: bool,
    buffering: bool,
    disable_buffering_when_flushed: bool,
}

impl AudioFifo {
    /// Creates a FIFO with room for `size` samples.
    ///
    /// # Panics
    ///
    /// Panics if `size` is 0.
    pub fn new(events: &EventLoop, size: usize) -> Rc<RefCell<Self>> {
        assert!(size > 0, "fifo size must be > 0");
        Rc::new_cyclic(|me: &Weak<RefCell<Self>>| {
            let owner: Weak<RefCell<dyn Source>> = me.clone();
            RefCell::new(Self {
                input: Input::new(),
                output: Output::new(events, owner),
                fifo: vec![0.0; size],
                head: 0,
                tail: 0,
                full: false,
                overwrite: false,
                prebuf_samples: 0,
                prebuf: false,
                output_stopped: false,
                input_stopped: false,
                is_flushing: false,
                flush_sent: false,
                buffering: true,
                disable_buffering_when_flushed: false,
            })
        })
    }

    /// Ring capacity in samples.
    pub fn size(&self) -> usize {
        self.fifo.len()
    }

    /// Resizes the ring. The contents are cleared.
    ///
    /// # Panics
    ///
    /// Panics if `size` is 0.
    pub fn set_size(&mut self, size: usize) {
        assert!(size > 0, "fifo size must be > 0");
        if size != self.fifo.len() {
            self.fifo = vec![0.0; size];
            self.prebuf_samples = self.prebuf_samples.min(size - 1);
        }
        self.clear();
    }

    /// In overwrite mode a full ring drops its oldest samples instead of
    /// refusing writes.
    pub fn set_overwrite(&mut self, overwrite: bool) {
        self.overwrite = overwrite;
    }

    /// Returns true in overwrite mode.
    pub fn overwrite(&self) -> bool {
        self.overwrite
    }

    /// Holds output back until `samples` are stored. Clamped to one less
    /// than the ring size.
    pub fn set_prebuf_samples(&mut self, samples: usize) {
        self.prebuf_samples = samples.min(self.fifo.len() - 1);
        if self.is_empty() {
            self.prebuf = self.prebuf_samples > 0;
        }
    }

    /// Returns true while output is held back by the prebuffer threshold.
    pub fn is_prebuffering(&self) -> bool {
        self.prebuf
    }

    /// Turns buffering on or off.
    pub fn enable_buffering(&mut self, enable: bool) {
        if enable {
            self.disable_buffering_when_flushed = false;
            if !self.buffering {
                self.buffering = true;
                if self.input_stopped {
                    self.input_stopped = false;
                    self.input.resume();
                }
            }
        } else if self.buffering {
            if self.is_empty() {
                self.buffering = false;
            } else {
                self.disable_buffering_when_flushed = true;
            }
        }
    }

    /// Returns true while buffering is on.
    pub fn buffering_enabled(&self) -> bool {
        self.buffering
    }

    /// Returns true if the ring holds no samples.
    pub fn is_empty(&self) -> bool {
        self.head == self.tail && !self.full
    }

    /// Returns true if the ring cannot take another sample.
    pub fn is_full(&self) -> bool {
        self.full
    }

    /// Samples available for output: 0 while below the prebuffer threshold,
    /// otherwise the fill level.
    pub fn samples_in_fifo(&self) -> usize {
        let stored = self.stored();
        if self.prebuf && !self.is_flushing && stored < self.prebuf_samples {
            return 0;
        }
        stored
    }

    /// Drops the ring contents and re-arms the prebuffer. A flush in
    /// progress continues downstream.
    pub fn clear(&mut self) {
        self.head = 0;
        self.tail = 0;
        self.full = false;
        self.prebuf = self.prebuf_samples > 0;
        self.output_stopped = false;
        if self.is_flushing && !self.flush_sent {
            self.flush_sent = true;
            self.output.flush();
        }
        if self.input_stopped {
            self.input_stopped = false;
            self.input.resume();
        }
    }

    fn stored(&self) -> usize {
        let size = self.fifo.len();
        if self.full {
            size
        } else {
            (self.head + size - self.tail) % size
        }
    }

    fn push(&mut self, sample: f32) {
        let size = self.fifo.len();
        self.fifo[self.head] = sample;
        self.head = (self.head + 1) % size;
        if self.head == self.tail {
            if self.overwrite {
                self.tail = (self.tail + 1) % size;
            } else {
                self.full = true;
            }
        }
    }

    fn write_from_fifo(&mut self) {
        if self.output_stopped || self.samples_in_fifo() == 0 {
            return;
        }
        let size = self.fifo.len();
        loop {
            let count = MAX_WRITE_SIZE.min(self.stored()).min(size - self.tail);
            if count == 0 {
                break;
            }
            let written = self.output.write(&self.fifo[self.tail..self.tail + count]);
            if written > 0 {
                self.full = false;
            }
            self.tail = (self.tail + written) % size;
            if written < count {
                self.output_stopped = true;
                break;
            }
        }
        if self.input_stopped && !self.full {
            self.input_stopped = false;
            self.input.resume();
        }
        if self.is_flushing && self.is_empty() && !self.flush_sent {
            self.flush_sent = true;
            self.output.flush();
        }
    }
}

impl Sink for AudioFifo {
    fn write(&mut self, samples: &[f32]) -> usize {
        if !self.input.accepting() {
            return 0;
        }
        if self.full {
            self.input_stopped = true;
            return 0;
        }

        let mut written = 0;
        if self.is_empty() && !self.prebuf && !self.output_stopped {
            written = self.output.write(samples);
            if written < samples.len() {
                self.output_stopped = true;
            }
        }
        if self.buffering {
            while !self.full && written < samples.len() {
                while !self.full && written < samples.len() {
                    self.push(samples[written]);
                    written += 1;
                }
                if self.prebuf && self.samples_in_fifo() > 0 {
                    self.prebuf = false;
                }
                self.write_from_fifo();
            }
        }
        self.input_stopped = written < samples.len();
        written
    }

    fn flush(&mut self) {
        if !self.input.begin_flush() {
            return;
        }
        self.is_flushing = true;
        self.flush_sent = false;
        self.prebuf = self.prebuf_samples > 0;
        if self.is_empty() {
            self.flush_sent = true;
            self.output.flush();
        } else {
            self.write_from_fifo();
        }
    }

    fn input(&mut self) -> &mut Input {
        &mut self.input
    }
}

impl Source for AudioFifo {
    fn resume(&mut self) {
        if !self.output_stopped {
            return;
        }
        self.output_stopped = false;
        if self.buffering {
            self.write_from_fifo();
        } else if self.input_stopped {
            self.input_stopped = false;
            self.input.resume();
        }
    }

    fn all_flushed(&mut self) {
        self.output.flush_completed();
        if !self.is_empty() {
            return;
        }
        if self.disable_buffering_when_flushed {
            self.disable_buffering_when_flushed = false;
            self.buffering = false;
        }
        if self.is_flushing {
            self.is_flushing = false;
            self.flush_sent = false;
            self.input.all_flushed();
        }
    }
}

impl Producer for AudioFifo {
    fn output(&mut self) -> &mut Output {
        &mut self.output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::connect;
    use crate::endpoints::{SampleCollector, SampleReader};

    fn ramp(range: std::ops::Range<usize>) -> Vec<f32> {
        range.map(|i| i as f32).collect()
    }

    fn fifo_with_sink(size: usize) -> (EventLoop, Rc<RefCell<AudioFifo>>, Rc<RefCell<SampleCollector>>) {
        let events = EventLoop::new();
        let fifo = AudioFifo::new(&events, size);
        let sink = SampleCollector::new(&events);
        connect(&fifo, &sink).unwrap();
        (events, fifo, sink)
    }

    #[test]
    fn empty_fifo_passes_straight_through() {
        let (_events, fifo, sink) = fifo_with_sink(16);
        assert_eq!(fifo.borrow_mut().write(&ramp(0..10)), 10);
        assert_eq!(sink.borrow().samples(), ramp(0..10).as_slice());
        assert!(fifo.borrow().is_empty());
    }

    #[test]
    fn stores_refused_audio_and_resumes_source_when_drained() {
        let (events, fifo, sink) = fifo_with_sink(100);
        let reader = SampleReader::new(&events, 60);
        connect(&reader, &fifo).unwrap();
        sink.borrow_mut().set_stalled(true);

        reader.borrow_mut().feed(&ramp(0..120));
        assert_eq!(reader.borrow().written(), 100);
        assert!(reader.borrow().is_stalled());
        assert!(fifo.borrow().is_full());

        sink.borrow_mut().set_stalled(false);
        events.run_until_idle();
        assert_eq!(sink.borrow().samples(), ramp(0..120).as_slice());
        assert!(fifo.borrow().is_empty());
    }

    #[test]
    fn prebuffer_holds_output_until_threshold() {
        let (_events, fifo, sink) = fifo_with_sink(100);
        fifo.borrow_mut().set_prebuf_samples(50);
        assert!(fifo.borrow().is_prebuffering());

        fifo.borrow_mut().write(&ramp(0..30));
        assert!(sink.borrow().samples().is_empty());
        assert_eq!(fifo.borrow().samples_in_fifo(), 0);

        fifo.borrow_mut().write(&ramp(30..60));
        assert_eq!(sink.borrow().samples(), ramp(0..60).as_slice());

        // Only the start of a stream waits.
        fifo.borrow_mut().write(&ramp(60..70));
        assert_eq!(sink.borrow().samples().len(), 70);
    }

    #[test]
    fn flush_drains_below_threshold_and_rearms_it() {
        let (events, fifo, sink) = fifo_with_sink(100);
        let reader = SampleReader::new(&events, 64);
        connect(&reader, &fifo).unwrap();
        fifo.borrow_mut().set_prebuf_samples(50);

        reader.borrow_mut().feed(&ramp(0..20));
        assert!(sink.borrow().samples().is_empty());
        reader.borrow_mut().finish();
        events.run_until_idle();
        assert_eq!(sink.borrow().samples(), ramp(0..20).as_slice());
        assert_eq!(sink.borrow().flush_requests(), 1);
        assert_eq!(reader.borrow().flushes_completed(), 1);
        assert!(fifo.borrow().is_prebuffering());
    }

    #[test]
    fn overwrite_drops_oldest_samples() {
        let (events, fifo, sink) = fifo_with_sink(10);
        fifo.borrow_mut().set_overwrite(true);
        sink.borrow_mut().set_stalled(true);

        assert_eq!(fifo.borrow_mut().write(&ramp(0..15)), 15);
        assert!(!fifo.borrow().is_full());

        sink.borrow_mut().set_stalled(false);
        events.run_until_idle();
        assert_eq!(sink.borrow().samples(), ramp(6..15).as_slice());
    }

    #[test]
    fn unbuffered_fifo_forwards_backpressure() {
        let (events, fifo, sink) = fifo_with_sink(100);
        let reader = SampleReader::new(&events, 8);
        connect(&reader, &fifo).unwrap();
        fifo.borrow_mut().enable_buffering(false);
        sink.borrow_mut().set_write_limit(Some(5));

        reader.borrow_mut().feed(&ramp(0..8));
        assert_eq!(reader.borrow().written(), 5);
        assert!(fifo.borrow().is_empty());

        events.run_until_idle();
        assert_eq!(sink.borrow().samples(), ramp(0..8).as_slice());
    }

    #[test]
    fn disabling_buffering_waits_for_flush() {
        let (events, fifo, sink) = fifo_with_sink(100);
        sink.borrow_mut().set_stalled(true);
        fifo.borrow_mut().write(&ramp(0..10));
        fifo.borrow_mut().enable_buffering(false);
        assert!(fifo.borrow().buffering_enabled());

        fifo.borrow_mut().flush();
        sink.borrow_mut().set_stalled(false);
        events.run_until_idle();
        assert_eq!(sink.borrow().samples(), ramp(0..10).as_slice());
        assert!(!fifo.borrow().buffering_enabled());
    }

    #[test]
    fn clear_drops_contents_and_finishes_flush() {
        let (events, fifo, sink) = fifo_with_sink(100);
        let reader = SampleReader::new(&events, 64);
        connect(&reader, &fifo).unwrap();
        sink.borrow_mut().set_stalled(true);
        reader.borrow_mut().feed(&ramp(0..10));
        reader.borrow_mut().finish();
        events.run_until_idle();
        assert_eq!(sink.borrow().flush_requests(), 0);

        fifo.borrow_mut().clear();
        events.run_until_idle();
        assert!(fifo.borrow().is_empty());
        assert_eq!(sink.borrow().flush_requests(), 1);
        assert_eq!(reader.borrow().flushes_completed(), 1);
        assert!(sink.borrow().samples().is_empty());
    }

    #[test]
    fn set_size_clears_and_clamps_prebuffer() {
        let (_events, fifo, sink) = fifo_with_sink(100);
        fifo.borrow_mut().set_prebuf_samples(80);
        fifo.borrow_mut().write(&ramp(0..10));
        fifo.borrow_mut().set_size(20);
        assert_eq!(fifo.borrow().size(), 20);
        assert!(fifo.borrow().is_empty());
        assert!(fifo.borrow().is_prebuffering());

        sink.borrow_mut().set_stalled(true);
        fifo.borrow_mut().write(&ramp(0..19));
        assert!(!fifo.borrow().is_prebuffering(), "threshold clamped to 19");
        assert_eq!(fifo.borrow().samples_in_fifo(), 19);
    }
}
