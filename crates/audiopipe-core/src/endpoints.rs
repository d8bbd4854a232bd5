//! Pipeline endpoints: a buffered sample feeder and a recording sink.
//!
//! [`SampleReader`] is the head of a pipeline. It queues samples handed to it
//! and pushes them downstream in blocks, honoring backpressure. Calling
//! [`finish()`](SampleReader::finish) requests a flush once the queue drains.
//!
//! [`SampleCollector`] is the tail. It records everything it accepts and can
//! simulate a slow consumer (a per-write limit, a stall switch) and a slow
//! drain (held flush completions).

use std::cell::RefCell;
use std::rc::{Rc, Weak};
use std::time::Duration;

use crate::contract::{Input, Output, Producer, Sink, Source};
use crate::event_loop::EventLoop;

/// Block size used by [`SampleReader`] unless configured otherwise.
pub const DEFAULT_READ_BLOCK: usize = 256;

/// Pushes queued samples downstream.
pub struct SampleReader {
    output: Output,
    queue: Vec<f32>,
    pos: usize,
    block_size: usize,
    finishing: bool,
    flush_sent: bool,
    flushes_completed: usize,
    stalled: bool,
    written: usize,
}

impl SampleReader {
    /// Creates a reader writing at most `block_size` samples per call.
    ///
    /// # Panics
    ///
    /// Panics if `block_size` is 0.
    pub fn new(events: &EventLoop, block_size: usize) -> Rc<RefCell<Self>> {
        assert!(block_size > 0, "block size must be > 0");
        Rc::new_cyclic(|me: &Weak<RefCell<Self>>| {
            let owner: Weak<RefCell<dyn Source>> = me.clone();
            RefCell::new(Self {
                output: Output::new(events, owner),
                queue: Vec::new(),
                pos: 0,
                block_size,
                finishing: false,
                flush_sent: false,
                flushes_completed: 0,
                stalled: false,
                written: 0,
            })
        })
    }

    /// Queues `samples` and pushes as many as the pipeline accepts.
    pub fn feed(&mut self, samples: &[f32]) {
        self.queue.extend_from_slice(samples);
        self.flush_sent = false;
        self.pump();
    }

    /// Requests a flush once every queued sample has been written.
    pub fn finish(&mut self) {
        self.finishing = true;
        self.pump();
    }

    /// Samples still waiting to be written.
    pub fn remaining(&self) -> usize {
        self.queue.len() - self.pos
    }

    /// Total samples accepted downstream so far.
    pub fn written(&self) -> usize {
        self.written
    }

    /// Returns true if the last write was cut short.
    pub fn is_stalled(&self) -> bool {
        self.stalled
    }

    /// Number of flush completions received.
    pub fn flushes_completed(&self) -> usize {
        self.flushes_completed
    }

    /// Returns true once the final flush has completed and nothing new was
    /// queued since.
    pub fn is_done(&self) -> bool {
        self.finishing && self.flush_sent && !self.output.is_flushing() && self.remaining() == 0
    }

    fn pump(&mut self) {
        while self.pos < self.queue.len() {
            let end = (self.pos + self.block_size).min(self.queue.len());
            let offered = end - self.pos;
            let accepted = self.output.write(&self.queue[self.pos..end]);
            self.pos += accepted;
            self.written += accepted;
            if accepted < offered {
                self.stalled = true;
                return;
            }
        }
        self.stalled = false;
        self.queue.clear();
        self.pos = 0;
        if self.finishing && !self.flush_sent {
            self.flush_sent = true;
            self.output.flush();
        }
    }
}

impl Source for SampleReader {
    fn resume(&mut self) {
        self.pump();
    }

    fn all_flushed(&mut self) {
        self.output.flush_completed();
        self.flushes_completed += 1;
    }
}

impl Producer for SampleReader {
    fn output(&mut self) -> &mut Output {
        &mut self.output
    }
}

/// A single accepted write as seen by a [`SampleCollector`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteRecord {
    /// Loop time of the write.
    pub at: Duration,
    /// Samples accepted.
    pub len: usize,
}

/// Records every sample it accepts.
pub struct SampleCollector {
    input: Input,
    events: EventLoop,
    samples: Vec<f32>,
    writes: Vec<WriteRecord>,
    write_limit: Option<usize>,
    stalled: bool,
    refused: bool,
    hold_flush: bool,
    flush_requests: usize,
}

impl SampleCollector {
    /// Creates a collector that accepts everything and completes flushes
    /// immediately.
    pub fn new(events: &EventLoop) -> Rc<RefCell<Self>> {
        Rc::new(RefCell::new(Self {
            input: Input::new(),
            events: events.clone(),
            samples: Vec::new(),
            writes: Vec::new(),
            write_limit: None,
            stalled: false,
            refused: false,
            hold_flush: false,
            flush_requests: 0,
        }))
    }

    /// Accepts at most `limit` samples per write. A capped write is followed
    /// by a deferred resume.
    ///
    /// # Panics
    ///
    /// Panics on a zero limit; use [`set_stalled()`](Self::set_stalled) to
    /// refuse writes.
    pub fn set_write_limit(&mut self, limit: Option<usize>) {
        assert!(limit != Some(0), "write limit must be > 0");
        self.write_limit = limit;
    }

    /// While stalled, every write is refused. Un-stalling resumes a refused
    /// source.
    pub fn set_stalled(&mut self, stalled: bool) {
        self.stalled = stalled;
        if !stalled && std::mem::take(&mut self.refused) {
            self.input.resume();
        }
    }

    /// When set, flush requests stay pending until
    /// [`complete_flush()`](Self::complete_flush).
    pub fn set_hold_flush(&mut self, hold: bool) {
        self.hold_flush = hold;
    }

    /// Completes a held flush.
    pub fn complete_flush(&mut self) {
        self.input.all_flushed();
    }

    /// Everything accepted so far.
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Takes the recorded samples, leaving the collector empty.
    pub fn take_samples(&mut self) -> Vec<f32> {
        std::mem::take(&mut self.samples)
    }

    /// One record per write that accepted at least one sample.
    pub fn writes(&self) -> &[WriteRecord] {
        &self.writes
    }

    /// Number of flush requests received.
    pub fn flush_requests(&self) -> usize {
        self.flush_requests
    }

    /// Returns true while a flush request is held.
    pub fn is_flush_pending(&self) -> bool {
        self.input.is_flushing()
    }
}

impl Sink for SampleCollector {
    fn write(&mut self, samples: &[f32]) -> usize {
        if !self.input.accepting() {
            return 0;
        }
        if self.stalled {
            self.refused = true;
            return 0;
        }
        let len = self
            .write_limit
            .map_or(samples.len(), |limit| samples.len().min(limit));
        if len < samples.len() {
            // Room again on the next dispatch.
            self.input.resume();
        }
        if len > 0 {
            self.samples.extend_from_slice(&samples[..len]);
            self.writes.push(WriteRecord {
                at: self.events.now(),
                len,
            });
        }
        len
    }

    fn flush(&mut self) {
        self.flush_requests += 1;
        self.input.begin_flush();
        if !self.hold_flush {
            self.input.all_flushed();
        }
    }

    fn input(&mut self) -> &mut Input {
        &mut self.input
    }
}
