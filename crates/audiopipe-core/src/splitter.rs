//! Fan-out: one input stream delivered to many sinks.
//!
//! Every write is offered to all branches at once. Branches drain at their
//! own pace: if any of them takes less than the whole block, the block is
//! copied once into a shared overflow buffer and each branch keeps its own
//! read position into it. Only one block may be outstanding, so a write
//! arriving while the overflow buffer still holds data is refused with 0 and
//! the source is resumed once every branch has caught up.
//!
//! Flush is an AND-join: the splitter's own completion fires once every
//! branch has reported completion. With no branches it completes at once.
//!
//! ```rust
//! use audiopipe_core::{EventLoop, SampleCollector, SinkRef, Sink, Splitter};
//!
//! let events = EventLoop::new();
//! let splitter = Splitter::new(&events);
//! let a = SampleCollector::new(&events);
//! let b = SampleCollector::new(&events);
//! splitter.borrow_mut().add_sink(SinkRef::borrowed(&a)).unwrap();
//! splitter.borrow_mut().add_sink(SinkRef::borrowed(&b)).unwrap();
//!
//! assert_eq!(splitter.borrow_mut().write(&[0.5; 4]), 4);
//! assert_eq!(a.borrow().samples(), b.borrow().samples());
//! ```

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use crate::contract::{BranchId, ConnectError, Input, Output, Sink, SinkRef, Source};
use crate::event_loop::EventLoop;

/// Source-side adapter of one splitter branch.
///
/// Receives the branch sink's upstream signals and hands them to the
/// splitter together with the branch id.
struct BranchPort {
    splitter: Weak<RefCell<Splitter>>,
    id: BranchId,
}

impl Source for BranchPort {
    fn resume(&mut self) {
        if let Some(splitter) = self.splitter.upgrade() {
            splitter.borrow_mut().branch_resume(self.id);
        }
    }

    fn all_flushed(&mut self) {
        if let Some(splitter) = self.splitter.upgrade() {
            splitter.borrow_mut().branch_all_flushed(self.id);
        }
    }
}

struct Branch {
    id: BranchId,
    output: Output,
    /// Keeps the notification target of `output` alive.
    _port: Rc<RefCell<BranchPort>>,
    /// Read position into the overflow buffer.
    pos: usize,
    stopped: bool,
    flush_done: bool,
    enabled: bool,
}

impl Branch {
    fn write(&mut self, samples: &[f32]) -> usize {
        if !self.enabled {
            self.pos += samples.len();
            return samples.len();
        }
        if self.stopped {
            return 0;
        }
        let written = self.output.write(samples);
        self.stopped = written < samples.len();
        self.pos += written;
        written
    }
}

/// Fan-out node.
pub struct Splitter {
    me: Weak<RefCell<Splitter>>,
    events: EventLoop,
    input: Input,
    branches: Vec<Branch>,
    next_id: u32,
    buf: Vec<f32>,
    do_flush: bool,
    input_stopped: bool,
}

impl Splitter {
    /// Creates a splitter with no branches.
    pub fn new(events: &EventLoop) -> Rc<RefCell<Self>> {
        Rc::new_cyclic(|me| {
            RefCell::new(Self {
                me: me.clone(),
                events: events.clone(),
                input: Input::new(),
                branches: Vec::new(),
                next_id: 0,
                buf: Vec::new(),
                do_flush: false,
                input_stopped: false,
            })
        })
    }

    /// Adds a branch feeding `sink`.
    ///
    /// A branch added while a flush is in progress is flushed as well.
    pub fn add_sink(&mut self, sink: SinkRef) -> Result<BranchId, ConnectError> {
        let id = BranchId(self.next_id);
        let port = Rc::new(RefCell::new(BranchPort {
            splitter: self.me.clone(),
            id,
        }));
        let owner: Rc<RefCell<dyn Source>> = port.clone();
        let mut output = Output::new(&self.events, Rc::downgrade(&owner));
        output.register(sink)?;
        self.next_id += 1;

        let mut branch = Branch {
            id,
            output,
            _port: port,
            // A new branch does not receive the block already in flight.
            pos: self.buf.len(),
            stopped: false,
            flush_done: false,
            enabled: true,
        };
        if self.do_flush && self.buf.is_empty() {
            branch.output.flush();
        }
        self.branches.push(branch);
        #[cfg(feature = "tracing")]
        tracing::debug!(branch = id.index(), branches = self.branches.len(), "splitter branch added");
        Ok(id)
    }

    /// Removes a branch. Its edge is torn down and an owned sink is dropped.
    pub fn remove_sink(&mut self, id: BranchId) -> bool {
        let Some(index) = self.branches.iter().position(|b| b.id == id) else {
            return false;
        };
        self.branches.remove(index);
        #[cfg(feature = "tracing")]
        tracing::debug!(branch = id.index(), branches = self.branches.len(), "splitter branch removed");
        self.write_from_buffer();
        self.check_flush_complete();
        true
    }

    /// Removes every branch.
    pub fn remove_all_sinks(&mut self) {
        self.branches.clear();
        self.write_from_buffer();
        self.check_flush_complete();
    }

    /// Enables or disables a branch. A disabled branch discards its audio and
    /// counts as flushed. Disabling an idle branch flushes its sink. A branch
    /// enabled during a flush rejoins it and must complete its own flush.
    pub fn enable_sink(&mut self, id: BranchId, enable: bool) {
        let do_flush = self.do_flush;
        let buffered = !self.buf.is_empty();
        let Some(branch) = self.branches.iter_mut().find(|b| b.id == id) else {
            return;
        };
        if branch.enabled == enable {
            return;
        }
        branch.enabled = enable;
        if enable {
            branch.stopped = false;
            if do_flush {
                branch.flush_done = false;
                // Otherwise flush_all_branches reaches it once the buffer drains.
                if !buffered {
                    branch.output.flush();
                }
            }
            return;
        }
        if do_flush {
            branch.flush_done = true;
        } else {
            branch.output.flush();
        }
        self.write_from_buffer();
        self.check_flush_complete();
    }

    /// Returns true if the branch exists and is enabled.
    pub fn is_sink_enabled(&self, id: BranchId) -> bool {
        self.branches.iter().any(|b| b.id == id && b.enabled)
    }

    /// Number of branches.
    pub fn branch_count(&self) -> usize {
        self.branches.len()
    }

    /// Samples held in the overflow buffer.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Offers the overflow buffer to every branch that has not consumed it
    /// yet. Once all have, clears it, continues a pending flush and resumes
    /// a refused source.
    fn write_from_buffer(&mut self) {
        if self.buf.is_empty() {
            return;
        }
        let len = self.buf.len();
        for branch in &mut self.branches {
            if branch.pos < len {
                branch.write(&self.buf[branch.pos..]);
            }
        }
        if self.branches.iter().any(|b| b.pos < len) {
            return;
        }
        self.buf.clear();
        if self.do_flush {
            self.flush_all_branches();
        }
        if self.input_stopped {
            self.input_stopped = false;
            self.input.resume();
        }
    }

    fn flush_all_branches(&mut self) {
        for branch in &mut self.branches {
            if branch.enabled {
                branch.output.flush();
            } else {
                branch.flush_done = true;
            }
        }
        self.check_flush_complete();
    }

    fn check_flush_complete(&mut self) {
        if self.do_flush && self.buf.is_empty() && self.branches.iter().all(|b| b.flush_done) {
            self.do_flush = false;
            #[cfg(feature = "tracing")]
            tracing::trace!("splitter flush joined");
            self.input.all_flushed();
        }
    }

    fn branch_resume(&mut self, id: BranchId) {
        if let Some(branch) = self.branches.iter_mut().find(|b| b.id == id) {
            branch.stopped = false;
        }
        self.write_from_buffer();
    }

    fn branch_all_flushed(&mut self, id: BranchId) {
        if let Some(branch) = self.branches.iter_mut().find(|b| b.id == id) {
            branch.output.flush_completed();
            branch.flush_done = true;
        }
        self.check_flush_complete();
    }
}

impl Sink for Splitter {
    fn write(&mut self, samples: &[f32]) -> usize {
        if !self.input.accepting() {
            return 0;
        }
        if !self.buf.is_empty() {
            self.input_stopped = true;
            return 0;
        }
        let len = samples.len();
        for branch in &mut self.branches {
            branch.pos = 0;
            let written = branch.write(samples);
            if written != len && self.buf.is_empty() {
                self.buf.extend_from_slice(samples);
            }
        }
        self.write_from_buffer();
        len
    }

    fn flush(&mut self) {
        if !self.input.begin_flush() {
            return;
        }
        if self.branches.is_empty() {
            self.input.all_flushed();
            return;
        }
        self.do_flush = true;
        for branch in &mut self.branches {
            branch.flush_done = false;
        }
        if self.buf.is_empty() {
            self.flush_all_branches();
        }
    }

    fn input(&mut self) -> &mut Input {
        &mut self.input
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::connect;
    use crate::endpoints::{SampleCollector, SampleReader};

    struct Rig {
        events: EventLoop,
        reader: Rc<RefCell<SampleReader>>,
        splitter: Rc<RefCell<Splitter>>,
    }

    fn rig() -> Rig {
        let events = EventLoop::new();
        let reader = SampleReader::new(&events, 32);
        let splitter = Splitter::new(&events);
        connect(&reader, &splitter).unwrap();
        Rig {
            events,
            reader,
            splitter,
        }
    }

    fn add(rig: &Rig) -> (BranchId, Rc<RefCell<SampleCollector>>) {
        let sink = SampleCollector::new(&rig.events);
        let id = rig
            .splitter
            .borrow_mut()
            .add_sink(SinkRef::borrowed(&sink))
            .unwrap();
        (id, sink)
    }

    #[test]
    fn every_branch_gets_every_sample() {
        let rig = rig();
        let (_, a) = add(&rig);
        let (_, b) = add(&rig);
        let (_, c) = add(&rig);
        let ramp: Vec<f32> = (0..100).map(|i| i as f32).collect();
        rig.reader.borrow_mut().feed(&ramp);
        rig.events.run_until_idle();
        for sink in [&a, &b, &c] {
            assert_eq!(sink.borrow().samples(), ramp.as_slice());
        }
    }

    #[test]
    fn slow_branch_holds_one_block() {
        let rig = rig();
        let (_, fast) = add(&rig);
        let (_, slow) = add(&rig);
        slow.borrow_mut().set_stalled(true);

        rig.reader.borrow_mut().feed(&[1.0; 64]);
        assert_eq!(rig.reader.borrow().written(), 32, "second block refused");
        assert_eq!(rig.splitter.borrow().buffered(), 32);
        assert_eq!(fast.borrow().samples().len(), 32);

        slow.borrow_mut().set_stalled(false);
        rig.events.run_until_idle();
        assert_eq!(fast.borrow().samples().len(), 64);
        assert_eq!(slow.borrow().samples().len(), 64);
        assert_eq!(rig.splitter.borrow().buffered(), 0);
    }

    #[test]
    fn partial_branch_catches_up_from_its_own_position() {
        let rig = rig();
        let (_, a) = add(&rig);
        let (_, b) = add(&rig);
        b.borrow_mut().set_write_limit(Some(5));
        let ramp: Vec<f32> = (0..32).map(|i| i as f32).collect();
        rig.reader.borrow_mut().feed(&ramp);
        rig.events.run_until_idle();
        assert_eq!(a.borrow().samples(), ramp.as_slice());
        assert_eq!(b.borrow().samples(), ramp.as_slice());
    }

    #[test]
    fn flush_joins_all_branches_in_any_order() {
        let rig = rig();
        let (_, a) = add(&rig);
        let (_, b) = add(&rig);
        a.borrow_mut().set_hold_flush(true);
        b.borrow_mut().set_hold_flush(true);

        rig.reader.borrow_mut().finish();
        rig.events.run_until_idle();
        assert_eq!(a.borrow().flush_requests(), 1);
        assert_eq!(b.borrow().flush_requests(), 1);

        b.borrow_mut().complete_flush();
        rig.events.run_until_idle();
        assert_eq!(rig.reader.borrow().flushes_completed(), 0);

        a.borrow_mut().complete_flush();
        rig.events.run_until_idle();
        assert_eq!(rig.reader.borrow().flushes_completed(), 1);
    }

    #[test]
    fn flush_without_branches_completes_immediately() {
        let rig = rig();
        rig.reader.borrow_mut().finish();
        rig.events.run_until_idle();
        assert_eq!(rig.reader.borrow().flushes_completed(), 1);
    }

    #[test]
    fn flush_waits_for_overflow_buffer() {
        let rig = rig();
        let (_, a) = add(&rig);
        a.borrow_mut().set_stalled(true);
        rig.reader.borrow_mut().feed(&[0.0; 8]);
        rig.reader.borrow_mut().finish();
        rig.events.run_until_idle();
        assert_eq!(a.borrow().flush_requests(), 0);

        a.borrow_mut().set_stalled(false);
        rig.events.run_until_idle();
        assert_eq!(a.borrow().samples().len(), 8);
        assert_eq!(rig.reader.borrow().flushes_completed(), 1);
    }

    #[test]
    fn disabled_branch_discards_and_counts_as_flushed() {
        let rig = rig();
        let (_, a) = add(&rig);
        let (b_id, b) = add(&rig);
        b.borrow_mut().set_hold_flush(true);
        rig.splitter.borrow_mut().enable_sink(b_id, false);
        rig.events.run_until_idle();
        b.borrow_mut().complete_flush();

        rig.reader.borrow_mut().feed(&[0.5; 10]);
        rig.reader.borrow_mut().finish();
        rig.events.run_until_idle();
        assert_eq!(a.borrow().samples().len(), 10);
        assert!(b.borrow().samples().is_empty());
        assert_eq!(rig.reader.borrow().flushes_completed(), 1);
        assert!(!rig.splitter.borrow().is_sink_enabled(b_id));
    }

    #[test]
    fn branch_reenabled_during_flush_rejoins_join() {
        let rig = rig();
        let (_, a) = add(&rig);
        let (b_id, b) = add(&rig);
        a.borrow_mut().set_hold_flush(true);
        b.borrow_mut().set_hold_flush(true);
        rig.reader.borrow_mut().feed(&[0.5; 8]);
        rig.reader.borrow_mut().finish();
        rig.events.run_until_idle();

        rig.splitter.borrow_mut().enable_sink(b_id, false);
        rig.splitter.borrow_mut().enable_sink(b_id, true);
        a.borrow_mut().complete_flush();
        rig.events.run_until_idle();
        assert_eq!(rig.reader.borrow().flushes_completed(), 0);
        assert!(b.borrow().is_flush_pending());

        b.borrow_mut().complete_flush();
        rig.events.run_until_idle();
        assert_eq!(rig.reader.borrow().flushes_completed(), 1);
    }

    #[test]
    fn removing_pending_branch_completes_join() {
        let rig = rig();
        let (_, _a) = add(&rig);
        let (b_id, b) = add(&rig);
        b.borrow_mut().set_hold_flush(true);
        rig.reader.borrow_mut().finish();
        rig.events.run_until_idle();
        assert_eq!(rig.reader.borrow().flushes_completed(), 0);

        assert!(rig.splitter.borrow_mut().remove_sink(b_id));
        rig.events.run_until_idle();
        assert_eq!(rig.reader.borrow().flushes_completed(), 1);
        assert!(!b.borrow_mut().input().is_registered());
    }

    #[test]
    fn branch_added_during_flush_is_flushed() {
        let rig = rig();
        let (_, a) = add(&rig);
        a.borrow_mut().set_hold_flush(true);
        rig.reader.borrow_mut().finish();
        rig.events.run_until_idle();

        let (_, late) = add(&rig);
        assert_eq!(late.borrow().flush_requests(), 1);
        a.borrow_mut().complete_flush();
        rig.events.run_until_idle();
        assert_eq!(rig.reader.borrow().flushes_completed(), 1);
    }

    #[test]
    fn owned_branch_sink_is_dropped_on_removal() {
        let rig = rig();
        let sink = SampleCollector::new(&rig.events);
        let weak = Rc::downgrade(&sink);
        let id = rig
            .splitter
            .borrow_mut()
            .add_sink(SinkRef::owned(sink))
            .unwrap();
        assert!(weak.upgrade().is_some());
        rig.splitter.borrow_mut().remove_sink(id);
        assert!(weak.upgrade().is_none());
    }
}
