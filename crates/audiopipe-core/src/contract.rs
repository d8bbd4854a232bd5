//! The source/sink contract every pipeline component speaks.
//!
//! A pipeline is a chain of components joined by one-to-one edges. Each edge
//! has a *source* end ([`Output`], held by the producer) and a *sink* end
//! ([`Input`], held by the consumer). Audio flows downstream by push:
//!
//! - [`Sink::write`] returns how many leading samples were accepted. A short
//!   count is backpressure: the source must hold the remainder and wait for
//!   [`Source::resume`].
//! - [`Sink::flush`] asks the sink to drain everything written so far. The
//!   sink answers with exactly one [`Source::all_flushed`] once the drain has
//!   reached the end of the chain. While a flush is pending the sink refuses
//!   writes with 0, and once it completes the refused source is resumed.
//!
//! Upstream signals are never delivered inline. [`Input`] queues them on the
//! [`EventLoop`], which keeps every call inside one dispatch flowing strictly
//! downstream.
//!
//! # Ownership
//!
//! An edge either *owns* its sink ([`SinkRef::Owned`]: dropping the source
//! drops the sink) or *borrows* it ([`SinkRef::Borrowed`]: a weak link that
//! reads as "no sink" once the sink is gone). Dropping either end detaches the
//! edge.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use crate::event_loop::{EventLoop, Notification};

/// Consumer end of an edge.
pub trait Sink {
    /// Offers `samples` and returns how many leading samples were accepted.
    ///
    /// Must return a count in `0..=samples.len()`. Sources never pass an
    /// empty slice.
    fn write(&mut self, samples: &[f32]) -> usize;

    /// Requests that all previously written samples be drained downstream.
    fn flush(&mut self);

    /// The edge endpoint that links this sink to its source.
    fn input(&mut self) -> &mut Input;
}

/// Receiver of upstream signals.
pub trait Source {
    /// The sink has room again.
    fn resume(&mut self);

    /// A previously requested flush has fully drained.
    fn all_flushed(&mut self);
}

/// A [`Source`] that owns an outgoing edge.
pub trait Producer: Source {
    /// The outgoing edge endpoint.
    fn output(&mut self) -> &mut Output;
}

/// Identifies one branch of a fan-out or fan-in node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BranchId(pub(crate) u32);

impl BranchId {
    /// Returns the raw numeric identifier.
    #[inline]
    pub fn index(self) -> u32 {
        self.0
    }
}

/// Why an edge could not be created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectError {
    /// The source already feeds a different sink.
    SourceOccupied,
    /// The sink is already fed by a different source.
    SinkOccupied,
    /// A borrowed sink was dropped before the edge was made.
    SinkDropped,
}

impl fmt::Display for ConnectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SourceOccupied => write!(f, "source is already connected to another sink"),
            Self::SinkOccupied => write!(f, "sink is already connected to another source"),
            Self::SinkDropped => write!(f, "sink no longer exists"),
        }
    }
}

impl std::error::Error for ConnectError {}

/// How a source holds its sink.
pub enum SinkRef {
    /// The source keeps the sink alive.
    Owned(Rc<RefCell<dyn Sink>>),
    /// The source only observes the sink.
    Borrowed(Weak<RefCell<dyn Sink>>),
}

impl SinkRef {
    /// An owning reference to `sink`.
    pub fn owned<S: Sink + 'static>(sink: Rc<RefCell<S>>) -> Self {
        Self::Owned(sink)
    }

    /// A non-owning reference to `sink`.
    pub fn borrowed<S: Sink + 'static>(sink: &Rc<RefCell<S>>) -> Self {
        let sink: Rc<RefCell<dyn Sink>> = sink.clone();
        Self::Borrowed(Rc::downgrade(&sink))
    }

    /// The sink, if it is still alive.
    pub fn get(&self) -> Option<Rc<RefCell<dyn Sink>>> {
        match self {
            Self::Owned(sink) => Some(Rc::clone(sink)),
            Self::Borrowed(sink) => sink.upgrade(),
        }
    }

    /// Returns true for [`SinkRef::Owned`].
    pub fn is_owned(&self) -> bool {
        matches!(self, Self::Owned(_))
    }

    fn addr(&self) -> *const () {
        match self {
            Self::Owned(sink) => Rc::as_ptr(sink).cast(),
            Self::Borrowed(sink) => sink.as_ptr().cast(),
        }
    }
}

/// Back link from an [`Input`] to the source feeding it.
struct SourceLink {
    source: Weak<RefCell<dyn Source>>,
    events: EventLoop,
}

impl SourceLink {
    fn is_alive(&self) -> bool {
        self.source.strong_count() > 0
    }

    fn addr(&self) -> *const () {
        self.source.as_ptr().cast()
    }

    fn notify(&self, notification: Notification) {
        self.events.defer(self.source.clone(), notification);
    }
}

/// Sink end of an edge.
///
/// Besides the back link, `Input` tracks the flush handshake: while a flush
/// is pending it refuses writes (see [`accepting()`](Self::accepting)), it
/// delivers exactly one completion per flush request, and it resumes a source
/// whose write was refused once the flush is over.
#[derive(Default)]
pub struct Input {
    source: Option<SourceLink>,
    pending_flushes: u32,
    refused: bool,
}

impl Input {
    /// Creates an unconnected input.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if a live source feeds this input.
    pub fn is_registered(&self) -> bool {
        self.source.as_ref().is_some_and(SourceLink::is_alive)
    }

    /// Returns true while a flush request awaits completion.
    #[inline]
    pub fn is_flushing(&self) -> bool {
        self.pending_flushes > 0
    }

    /// Gate for [`Sink::write`]: false while a flush is pending.
    ///
    /// A refused write is remembered and answered with a resume once the
    /// flush completes.
    pub fn accepting(&mut self) -> bool {
        if self.pending_flushes > 0 {
            self.refused = true;
            false
        } else {
            true
        }
    }

    /// Records a flush request. Returns true if it starts a new flush, false
    /// if one is already in progress and will answer for both.
    pub fn begin_flush(&mut self) -> bool {
        self.pending_flushes += 1;
        self.pending_flushes == 1
    }

    /// Tells the source there is room again.
    pub fn resume(&mut self) {
        if let Some(link) = &self.source {
            link.notify(Notification::Resume);
        }
    }

    /// Completes every pending flush request. A no-op when none is pending.
    pub fn all_flushed(&mut self) {
        if self.pending_flushes == 0 {
            return;
        }
        let completions = std::mem::take(&mut self.pending_flushes);
        let refused = std::mem::take(&mut self.refused);
        if let Some(link) = &self.source {
            for _ in 0..completions {
                link.notify(Notification::AllFlushed);
            }
            if refused {
                link.notify(Notification::Resume);
            }
        }
    }

    fn attach(&mut self, link: SourceLink) -> bool {
        if let Some(current) = &self.source
            && current.is_alive()
        {
            return current.addr() == link.addr();
        }
        self.source = Some(link);
        self.pending_flushes = 0;
        self.refused = false;
        true
    }

    fn detach_from(&mut self, source: *const ()) {
        if self.source.as_ref().is_some_and(|l| l.addr() == source) {
            self.source = None;
            self.pending_flushes = 0;
            self.refused = false;
        }
    }
}

/// Source end of an edge.
///
/// An output with no live sink behaves like a bottomless sink: writes are
/// accepted in full and flushes complete (deferred) immediately.
pub struct Output {
    owner: Weak<RefCell<dyn Source>>,
    events: EventLoop,
    sink: Option<SinkRef>,
    flushing: bool,
}

impl Output {
    /// Creates an unconnected output whose upstream signals go to `owner`.
    pub fn new(events: &EventLoop, owner: Weak<RefCell<dyn Source>>) -> Self {
        Self {
            owner,
            events: events.clone(),
            sink: None,
            flushing: false,
        }
    }

    /// The event loop this output defers its notifications on.
    pub fn events(&self) -> &EventLoop {
        &self.events
    }

    /// Returns true if a live sink is attached.
    pub fn is_registered(&self) -> bool {
        self.live_sink().is_some()
    }

    /// Returns true if the attached sink is owned by this edge.
    pub fn is_sink_owned(&self) -> bool {
        self.sink.as_ref().is_some_and(SinkRef::is_owned)
    }

    /// Returns true between a flush request and its completion, unless a
    /// write intervened.
    #[inline]
    pub fn is_flushing(&self) -> bool {
        self.flushing
    }

    /// Attaches `sink`.
    ///
    /// Registering the sink that is already attached succeeds without effect.
    pub fn register(&mut self, sink: SinkRef) -> Result<(), ConnectError> {
        if let Some(current) = &self.sink
            && current.get().is_some()
        {
            return if current.addr() == sink.addr() {
                Ok(())
            } else {
                Err(ConnectError::SourceOccupied)
            };
        }
        let target = sink.get().ok_or(ConnectError::SinkDropped)?;
        let link = SourceLink {
            source: self.owner.clone(),
            events: self.events.clone(),
        };
        if !target.borrow_mut().input().attach(link) {
            return Err(ConnectError::SinkOccupied);
        }
        self.sink = Some(sink);
        self.flushing = false;
        Ok(())
    }

    /// Detaches the sink.
    ///
    /// The owner gets a deferred [`all_flushed`](Source::all_flushed) if a
    /// flush was outstanding, otherwise a deferred
    /// [`resume`](Source::resume). Nothing happens if no sink was attached.
    pub fn unregister(&mut self) {
        if !self.disconnect() {
            return;
        }
        let notification = if std::mem::take(&mut self.flushing) {
            Notification::AllFlushed
        } else {
            Notification::Resume
        };
        self.events.defer(self.owner.clone(), notification);
    }

    /// Forwards `samples` to the sink and returns the accepted count.
    pub fn write(&mut self, samples: &[f32]) -> usize {
        debug_assert!(!samples.is_empty(), "sources never write empty blocks");
        self.flushing = false;
        match self.live_sink() {
            Some(sink) => {
                let accepted = sink.borrow_mut().write(samples);
                debug_assert!(accepted <= samples.len());
                accepted.min(samples.len())
            }
            None => samples.len(),
        }
    }

    /// Forwards a flush request to the sink.
    pub fn flush(&mut self) {
        self.flushing = true;
        match self.live_sink() {
            Some(sink) => sink.borrow_mut().flush(),
            None => self
                .events
                .defer(self.owner.clone(), Notification::AllFlushed),
        }
    }

    /// Marks the outstanding flush as completed. Owners call this from their
    /// [`Source::all_flushed`].
    #[inline]
    pub fn flush_completed(&mut self) {
        self.flushing = false;
    }

    fn live_sink(&self) -> Option<Rc<RefCell<dyn Sink>>> {
        self.sink.as_ref().and_then(SinkRef::get)
    }

    fn disconnect(&mut self) -> bool {
        let Some(sink) = self.sink.take() else {
            return false;
        };
        if let Some(target) = sink.get()
            && let Ok(mut target) = target.try_borrow_mut()
        {
            target.input().detach_from(self.owner.as_ptr().cast());
        }
        true
    }
}

impl Drop for Output {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Connects `source` to `sink`.
pub fn register_sink<P: Producer + ?Sized>(
    source: &RefCell<P>,
    sink: SinkRef,
) -> Result<(), ConnectError> {
    source.borrow_mut().output().register(sink)
}

/// Disconnects `source` from its sink, if any.
pub fn unregister_sink<P: Producer + ?Sized>(source: &RefCell<P>) {
    source.borrow_mut().output().unregister();
}

/// Connects `source` to `sink` without taking ownership of the sink.
pub fn connect<P: Producer + ?Sized, S: Sink + 'static>(
    source: &RefCell<P>,
    sink: &Rc<RefCell<S>>,
) -> Result<(), ConnectError> {
    register_sink(source, SinkRef::borrowed(sink))
}
