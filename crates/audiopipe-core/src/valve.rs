//! Open/closed gate for a stream.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use crate::contract::{Input, Output, Producer, Sink, Source};
use crate::event_loop::EventLoop;

/// Passes audio while open; discards or blocks it while closed.
///
/// Closing the valve flushes whatever is downstream. While closed:
///
/// - without blocking, writes are accepted and dropped and flushes complete
///   at once;
/// - with blocking, writes are refused and a flush request is held until the
///   valve reopens.
///
/// Reopening resumes the source.
pub struct Valve {
    input: Input,
    output: Output,
    open: bool,
    block_when_closed: bool,
    /// Upstream flush waiting for the valve to reopen.
    held_flush: bool,
    /// An upstream flush was passed downstream and awaits completion.
    forwarded: bool,
    /// Downstream completed the flush issued on close.
    drained: bool,
}

impl Valve {
    /// Creates a valve. Valves start open and non-blocking.
    pub fn new(events: &EventLoop) -> Rc<RefCell<Self>> {
        Rc::new_cyclic(|me: &Weak<RefCell<Self>>| {
            let owner: Weak<RefCell<dyn Source>> = me.clone();
            RefCell::new(Self {
                input: Input::new(),
                output: Output::new(events, owner),
                open: true,
                block_when_closed: false,
                held_flush: false,
                forwarded: false,
                drained: true,
            })
        })
    }

    /// Returns true if audio passes.
    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Chooses between discarding (false) and blocking (true) while closed.
    pub fn set_block_when_closed(&mut self, block: bool) {
        if block == self.block_when_closed {
            return;
        }
        self.block_when_closed = block;
        if !self.open && !block {
            if std::mem::take(&mut self.held_flush) {
                self.input.all_flushed();
            } else {
                self.input.resume();
            }
        }
    }

    /// Opens or closes the valve.
    pub fn set_open(&mut self, open: bool) {
        if open == self.open {
            return;
        }
        self.open = open;
        #[cfg(feature = "tracing")]
        tracing::debug!(open, "valve switched");
        if open {
            if std::mem::take(&mut self.held_flush) {
                if self.drained {
                    self.input.all_flushed();
                } else {
                    self.forwarded = true;
                    self.output.flush();
                }
            } else {
                self.input.resume();
            }
        } else if !self.forwarded {
            self.drained = false;
            self.output.flush();
        }
    }
}

impl Sink for Valve {
    fn write(&mut self, samples: &[f32]) -> usize {
        if !self.input.accepting() {
            return 0;
        }
        if self.open {
            self.drained = false;
            self.output.write(samples)
        } else if self.block_when_closed {
            0
        } else {
            samples.len()
        }
    }

    fn flush(&mut self) {
        if !self.input.begin_flush() {
            return;
        }
        if self.open {
            self.forwarded = true;
            self.output.flush();
        } else if self.block_when_closed {
            self.held_flush = true;
        } else {
            self.input.all_flushed();
        }
    }

    fn input(&mut self) -> &mut Input {
        &mut self.input
    }
}

impl Source for Valve {
    fn resume(&mut self) {
        if self.open {
            self.input.resume();
        }
    }

    fn all_flushed(&mut self) {
        self.output.flush_completed();
        self.drained = true;
        if std::mem::take(&mut self.forwarded) {
            self.input.all_flushed();
        }
    }
}

impl Producer for Valve {
    fn output(&mut self) -> &mut Output {
        &mut self.output
    }
}
