//! Transparent forwarding nodes.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use crate::contract::{Input, Output, Producer, Sink, Source};
use crate::event_loop::EventLoop;

/// Forwards every call unchanged in both directions.
///
/// Useful as a fixed attachment point in front of a sink that gets swapped
/// at runtime.
pub struct Passthrough {
    input: Input,
    output: Output,
}

impl Passthrough {
    /// Creates an unconnected passthrough.
    pub fn new(events: &EventLoop) -> Rc<RefCell<Self>> {
        Rc::new_cyclic(|me: &Weak<RefCell<Self>>| {
            let owner: Weak<RefCell<dyn Source>> = me.clone();
            RefCell::new(Self {
                input: Input::new(),
                output: Output::new(events, owner),
            })
        })
    }
}

impl Sink for Passthrough {
    fn write(&mut self, samples: &[f32]) -> usize {
        if !self.input.accepting() {
            return 0;
        }
        self.output.write(samples)
    }

    fn flush(&mut self) {
        if self.input.begin_flush() {
            self.output.flush();
        }
    }

    fn input(&mut self) -> &mut Input {
        &mut self.input
    }
}

impl Source for Passthrough {
    fn resume(&mut self) {
        self.input.resume();
    }

    fn all_flushed(&mut self) {
        self.output.flush_completed();
        self.input.all_flushed();
    }
}

impl Producer for Passthrough {
    fn output(&mut self) -> &mut Output {
        &mut self.output
    }
}

/// Activity of a stream as seen by a [`StreamStateDetector`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamState {
    /// No audio since the last completed flush.
    #[default]
    Idle,
    /// Samples are flowing.
    Active,
    /// A flush was requested and has not completed yet.
    Flushing,
}

type StateCallback = Box<dyn FnMut(StreamState, StreamState)>;

/// Passthrough that tracks whether a stream is idle, active or flushing.
///
/// The optional callback receives `(old, new)` on every transition.
pub struct StreamStateDetector {
    input: Input,
    output: Output,
    state: StreamState,
    on_change: Option<StateCallback>,
}

impl StreamStateDetector {
    /// Creates a detector in the [`StreamState::Idle`] state.
    pub fn new(events: &EventLoop) -> Rc<RefCell<Self>> {
        Rc::new_cyclic(|me: &Weak<RefCell<Self>>| {
            let owner: Weak<RefCell<dyn Source>> = me.clone();
            RefCell::new(Self {
                input: Input::new(),
                output: Output::new(events, owner),
                state: StreamState::Idle,
                on_change: None,
            })
        })
    }

    /// Installs the transition callback.
    pub fn on_change(&mut self, callback: impl FnMut(StreamState, StreamState) + 'static) {
        self.on_change = Some(Box::new(callback));
    }

    /// Current state.
    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Returns true if samples have flowed since the last completed flush.
    pub fn is_active(&self) -> bool {
        self.state == StreamState::Active
    }

    /// Returns true while a flush is in progress.
    pub fn is_flushing(&self) -> bool {
        self.state == StreamState::Flushing
    }

    /// Returns true when the stream is idle.
    pub fn is_idle(&self) -> bool {
        self.state == StreamState::Idle
    }

    fn transition(&mut self, next: StreamState) {
        if self.state == next {
            return;
        }
        let prev = std::mem::replace(&mut self.state, next);
        #[cfg(feature = "tracing")]
        tracing::trace!(?prev, ?next, "stream state changed");
        if let Some(callback) = self.on_change.as_mut() {
            callback(prev, next);
        }
    }
}

impl Sink for StreamStateDetector {
    fn write(&mut self, samples: &[f32]) -> usize {
        if !self.input.accepting() {
            return 0;
        }
        self.transition(StreamState::Active);
        self.output.write(samples)
    }

    fn flush(&mut self) {
        if self.input.begin_flush() {
            self.transition(StreamState::Flushing);
            self.output.flush();
        }
    }

    fn input(&mut self) -> &mut Input {
        &mut self.input
    }
}

impl Source for StreamStateDetector {
    fn resume(&mut self) {
        self.input.resume();
    }

    fn all_flushed(&mut self) {
        self.output.flush_completed();
        self.transition(StreamState::Idle);
        self.input.all_flushed();
    }
}

impl Producer for StreamStateDetector {
    fn output(&mut self) -> &mut Output {
        &mut self.output
    }
}
