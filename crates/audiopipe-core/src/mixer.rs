//! Fan-in: many sources summed into one stream.
//!
//! Each source connected with [`Mixer::add_source`] writes into its own lane
//! buffer. Samples leave the mixer once every active lane has them, so
//! sources that write in different chunk sizes stay aligned. A lane that
//! fills up forces a mix with whatever the other lanes hold, so a source
//! that goes quiet without flushing delays the others by at most one lane
//! buffer but never stalls them.
//!
//! A lane that flushes stops gating the mix and its tail is drained. The
//! downstream flush is issued once no lane is active and everything is
//! drained; its completion is reported to every flushing lane. A lane that
//! never wrote anything completes its flush at once.
//!
//! ```rust
//! use audiopipe_core::{EventLoop, Mixer, SampleCollector, SampleReader, connect};
//!
//! let events = EventLoop::new();
//! let mixer = Mixer::new(&events);
//! let sink = SampleCollector::new(&events);
//! connect(&mixer, &sink).unwrap();
//! let a = SampleReader::new(&events, 64);
//! let b = SampleReader::new(&events, 64);
//! mixer.borrow_mut().add_source(&a).unwrap();
//! mixer.borrow_mut().add_source(&b).unwrap();
//!
//! // Alone, a passes straight through; b then waits for a's next block.
//! a.borrow_mut().feed(&[0.25; 4]);
//! b.borrow_mut().feed(&[0.5; 4]);
//! a.borrow_mut().feed(&[0.25; 4]);
//! let out = sink.borrow().samples().to_vec();
//! assert_eq!(out, [0.25, 0.25, 0.25, 0.25, 0.75, 0.75, 0.75, 0.75]);
//! ```

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use crate::contract::{BranchId, ConnectError, Input, Output, Producer, Sink, SinkRef, Source};
use crate::event_loop::EventLoop;

/// Capacity of each lane buffer, in samples.
pub const MIXER_LANE_SIZE: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LaneState {
    Idle,
    Active,
    Flushing,
}

/// Sink-side adapter the upstream source of a lane writes into.
struct MixerPort {
    input: Input,
    mixer: Weak<RefCell<Mixer>>,
    id: BranchId,
}

impl Sink for MixerPort {
    fn write(&mut self, samples: &[f32]) -> usize {
        if !self.input.accepting() {
            return 0;
        }
        match self.mixer.upgrade() {
            Some(mixer) => mixer.borrow_mut().lane_write(self.id, samples),
            None => samples.len(),
        }
    }

    fn flush(&mut self) {
        if !self.input.begin_flush() {
            return;
        }
        let done = self
            .mixer
            .upgrade()
            .is_none_or(|mixer| mixer.borrow_mut().lane_flush(self.id));
        if done {
            self.input.all_flushed();
        }
    }

    fn input(&mut self) -> &mut Input {
        &mut self.input
    }
}

struct Lane {
    id: BranchId,
    port: Rc<RefCell<MixerPort>>,
    source: Weak<RefCell<dyn Producer>>,
    buf: Vec<f32>,
    state: LaneState,
    /// A write was cut short; the source waits for a resume.
    stopped: bool,
}

/// Summing fan-in node.
pub struct Mixer {
    me: Weak<RefCell<Mixer>>,
    output: Output,
    lanes: Vec<Lane>,
    next_id: u32,
    /// Mixed block not yet accepted downstream.
    mixed: Vec<f32>,
    output_stalled: bool,
    /// A downstream flush is outstanding.
    flushing: bool,
}

impl Mixer {
    /// Creates a mixer with no sources.
    pub fn new(events: &EventLoop) -> Rc<RefCell<Self>> {
        Rc::new_cyclic(|me: &Weak<RefCell<Self>>| {
            let owner: Weak<RefCell<dyn Source>> = me.clone();
            RefCell::new(Self {
                me: me.clone(),
                output: Output::new(events, owner),
                lanes: Vec::new(),
                next_id: 0,
                mixed: Vec::with_capacity(MIXER_LANE_SIZE),
                output_stalled: false,
                flushing: false,
            })
        })
    }

    /// Connects `source` through a new lane.
    pub fn add_source<P: Producer + 'static>(
        &mut self,
        source: &Rc<RefCell<P>>,
    ) -> Result<BranchId, ConnectError> {
        let id = BranchId(self.next_id);
        let port = Rc::new(RefCell::new(MixerPort {
            input: Input::new(),
            mixer: self.me.clone(),
            id,
        }));
        source
            .borrow_mut()
            .output()
            .register(SinkRef::borrowed(&port))?;
        self.next_id += 1;
        let producer: Rc<RefCell<dyn Producer>> = source.clone();
        self.lanes.push(Lane {
            id,
            port,
            source: Rc::downgrade(&producer),
            buf: Vec::with_capacity(MIXER_LANE_SIZE),
            state: LaneState::Idle,
            stopped: false,
        });
        #[cfg(feature = "tracing")]
        tracing::debug!(lane = id.index(), lanes = self.lanes.len(), "mixer source added");
        Ok(id)
    }

    /// Disconnects a lane's source and drops whatever it had buffered.
    pub fn remove_source(&mut self, id: BranchId) -> bool {
        let Some(index) = self.lanes.iter().position(|l| l.id == id) else {
            return false;
        };
        let lane = self.lanes.remove(index);
        if let Some(source) = lane.source.upgrade()
            && let Ok(mut source) = source.try_borrow_mut()
        {
            source.output().unregister();
        }
        #[cfg(feature = "tracing")]
        tracing::debug!(lane = id.index(), lanes = self.lanes.len(), "mixer source removed");
        self.check_flush(None);
        true
    }

    /// Number of connected sources.
    pub fn source_count(&self) -> usize {
        self.lanes.len()
    }

    /// Returns true if any lane has unflushed audio.
    pub fn is_active(&self) -> bool {
        self.lanes.iter().any(|l| l.state != LaneState::Idle)
    }

    /// Samples buffered in a lane, or `None` for an unknown lane.
    pub fn lane_buffered(&self, id: BranchId) -> Option<usize> {
        self.lanes.iter().find(|l| l.id == id).map(|l| l.buf.len())
    }

    fn lane_mut(&mut self, id: BranchId) -> Option<&mut Lane> {
        self.lanes.iter_mut().find(|l| l.id == id)
    }

    /// Number of samples that can be mixed right now.
    fn mixable(&self) -> usize {
        let longest = self.lanes.iter().map(|l| l.buf.len()).max().unwrap_or(0);
        let shortest_active = self
            .lanes
            .iter()
            .filter(|l| l.state == LaneState::Active)
            .map(|l| l.buf.len())
            .min();
        match shortest_active {
            Some(n) if longest < MIXER_LANE_SIZE => n,
            _ => longest,
        }
    }

    fn write_out(&mut self) {
        if self.output_stalled || self.mixed.is_empty() {
            return;
        }
        let len = self.mixed.len();
        let written = self.output.write(&self.mixed);
        self.mixed.drain(..written);
        self.output_stalled = written < len;
    }

    /// Sums lane buffers into blocks and pushes them downstream. Returns the
    /// number of samples taken from the lanes.
    ///
    /// The port of `busy` may be mid-call and is not resumed.
    fn mix(&mut self, busy: Option<BranchId>) -> usize {
        let mut consumed = 0;
        loop {
            self.write_out();
            if self.output_stalled || !self.mixed.is_empty() {
                break;
            }
            let n = self.mixable();
            if n == 0 {
                break;
            }
            self.mixed.resize(n, 0.0);
            for lane in &mut self.lanes {
                let take = n.min(lane.buf.len());
                for (out, x) in self.mixed.iter_mut().zip(lane.buf.drain(..take)) {
                    *out += x;
                }
            }
            consumed += n;
        }
        for lane in &mut self.lanes {
            if lane.stopped && lane.buf.len() < MIXER_LANE_SIZE && Some(lane.id) != busy {
                lane.stopped = false;
                lane.port.borrow_mut().input.resume();
            }
        }
        consumed
    }

    /// Issues the downstream flush once no lane is active and all audio has
    /// been pushed out.
    fn check_flush(&mut self, busy: Option<BranchId>) {
        self.mix(busy);
        if self.flushing
            || !self.mixed.is_empty()
            || self.lanes.iter().any(|l| l.state == LaneState::Active || !l.buf.is_empty())
            || !self.lanes.iter().any(|l| l.state == LaneState::Flushing)
        {
            return;
        }
        self.flushing = true;
        #[cfg(feature = "tracing")]
        tracing::trace!("mixer drained, flushing downstream");
        self.output.flush();
    }

    fn lane_write(&mut self, id: BranchId, samples: &[f32]) -> usize {
        let mut accepted = 0;
        loop {
            let Some(lane) = self.lane_mut(id) else {
                return samples.len();
            };
            lane.state = LaneState::Active;
            let take = (MIXER_LANE_SIZE - lane.buf.len()).min(samples.len() - accepted);
            lane.buf.extend_from_slice(&samples[accepted..accepted + take]);
            accepted += take;
            let consumed = self.mix(Some(id));
            if accepted == samples.len() || consumed == 0 {
                break;
            }
        }
        if let Some(lane) = self.lane_mut(id) {
            lane.stopped = accepted < samples.len();
        }
        accepted
    }

    /// Returns true if the port should complete the flush itself.
    fn lane_flush(&mut self, id: BranchId) -> bool {
        let Some(lane) = self.lane_mut(id) else {
            return true;
        };
        if lane.state == LaneState::Idle {
            return true;
        }
        lane.state = LaneState::Flushing;
        self.check_flush(Some(id));
        false
    }
}

impl Source for Mixer {
    fn resume(&mut self) {
        self.output_stalled = false;
        self.check_flush(None);
    }

    fn all_flushed(&mut self) {
        self.output.flush_completed();
        self.flushing = false;
        // Lanes that wrote again after the flush was issued wait for the next one.
        let drained = self.mixed.is_empty();
        for lane in &mut self.lanes {
            if lane.state == LaneState::Flushing && lane.buf.is_empty() && drained {
                lane.state = LaneState::Idle;
                lane.port.borrow_mut().input.all_flushed();
            }
        }
        self.check_flush(None);
    }
}

impl Producer for Mixer {
    fn output(&mut self) -> &mut Output {
        &mut self.output
    }
}
