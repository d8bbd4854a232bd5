//! Cooperative single-threaded event loop.
//!
//! Every component of a pipeline runs on one [`EventLoop`]. The loop owns
//! two kinds of work:
//!
//! - **Deferred notifications**: upstream signals ([`Notification::Resume`]
//!   and [`Notification::AllFlushed`]) are never delivered inline. A sink
//!   queues them here and the loop dispatches them in FIFO order once the
//!   current call chain has unwound. A component is therefore never re-entered
//!   while it is mid-call, and a pipeline draining in one cascade cannot grow
//!   the native stack without bound.
//! - **Timers**: periodic, cooperative callbacks (e.g. the
//!   [`Pacer`](crate::Pacer) cadence). They fire only from the loop, so their
//!   precision is bounded by how often the loop is driven.
//!
//! Time is virtual. [`advance()`](EventLoop::advance) and
//! [`run()`](EventLoop::run) move the clock forward instantly, which keeps
//! offline rendering and tests deterministic;
//! [`run_realtime()`](EventLoop::run_realtime) sleeps on the wall clock
//! between timer deadlines instead.
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//! use audiopipe_core::EventLoop;
//!
//! let events = EventLoop::with_sample_rate(8000);
//! assert_eq!(events.ms_to_samples(20), 160);
//!
//! events.advance(Duration::from_millis(40));
//! assert_eq!(events.now(), Duration::from_millis(40));
//! ```

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::{Rc, Weak};
use std::time::{Duration, Instant};

use crate::contract::Source;

/// Sample rate used by [`EventLoop::new`], in Hz.
pub const DEFAULT_SAMPLE_RATE: u32 = 16_000;

/// An upstream signal travelling from a sink back to its source.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Notification {
    /// The sink has room again; the source may retry writing.
    Resume,
    /// Everything written before the flush request has drained.
    AllFlushed,
}

/// Unique identifier for a timer registered on an [`EventLoop`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TimerId(u32);

impl TimerId {
    /// Returns the raw numeric identifier.
    #[inline]
    pub fn index(self) -> u32 {
        self.0
    }
}

/// Receiver of timer expirations.
pub trait TimerHandler {
    /// Called by the loop each time the timer `timer` expires.
    fn on_timer(&mut self, timer: TimerId);
}

struct Deferred {
    target: Weak<RefCell<dyn Source>>,
    notification: Notification,
}

struct Timer {
    id: TimerId,
    interval: Duration,
    /// Next expiry; `None` while disabled.
    due: Option<Duration>,
    handler: Weak<RefCell<dyn TimerHandler>>,
}

struct Inner {
    sample_rate: u32,
    now: Cell<Duration>,
    deferred: RefCell<VecDeque<Deferred>>,
    timers: RefCell<Vec<Timer>>,
    next_timer: Cell<u32>,
}

/// Handle to a cooperative event loop.
///
/// Cloning the handle is cheap; all clones drive the same loop. The handle is
/// deliberately `!Send`: a pipeline belongs to the thread that built it.
#[derive(Clone)]
pub struct EventLoop {
    inner: Rc<Inner>,
}

impl Default for EventLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl EventLoop {
    /// Creates a loop running at [`DEFAULT_SAMPLE_RATE`].
    pub fn new() -> Self {
        Self::with_sample_rate(DEFAULT_SAMPLE_RATE)
    }

    /// Creates a loop whose pipelines run at `sample_rate` Hz.
    ///
    /// # Panics
    ///
    /// Panics if `sample_rate` is 0.
    pub fn with_sample_rate(sample_rate: u32) -> Self {
        assert!(sample_rate > 0, "sample rate must be > 0");
        Self {
            inner: Rc::new(Inner {
                sample_rate,
                now: Cell::new(Duration::ZERO),
                deferred: RefCell::new(VecDeque::new()),
                timers: RefCell::new(Vec::new()),
                next_timer: Cell::new(0),
            }),
        }
    }

    /// Process-wide sample rate of every pipeline on this loop, in Hz.
    #[inline]
    pub fn sample_rate(&self) -> u32 {
        self.inner.sample_rate
    }

    /// Converts a duration in milliseconds to a sample count (truncating).
    #[inline]
    pub fn ms_to_samples(&self, ms: u32) -> usize {
        (u64::from(ms) * u64::from(self.inner.sample_rate) / 1000) as usize
    }

    /// Current loop time.
    #[inline]
    pub fn now(&self) -> Duration {
        self.inner.now.get()
    }

    /// Returns true if two handles drive the same loop.
    pub fn same_loop(&self, other: &EventLoop) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Queues `notification` for delivery to `target` on the next dispatch.
    ///
    /// A target that has been dropped by then is skipped silently.
    pub fn defer(&self, target: Weak<RefCell<dyn Source>>, notification: Notification) {
        self.inner.deferred.borrow_mut().push_back(Deferred {
            target,
            notification,
        });
    }

    /// Number of notifications waiting for dispatch.
    pub fn pending(&self) -> usize {
        self.inner.deferred.borrow().len()
    }

    /// Returns true if nothing is queued and no timer is enabled.
    pub fn is_idle(&self) -> bool {
        self.pending() == 0 && self.next_due().is_none()
    }

    /// Registers a periodic timer. The timer starts disabled.
    ///
    /// # Panics
    ///
    /// Panics if `interval` is zero.
    pub fn add_timer(
        &self,
        interval: Duration,
        handler: Weak<RefCell<dyn TimerHandler>>,
    ) -> TimerId {
        assert!(!interval.is_zero(), "timer interval must be > 0");
        let id = TimerId(self.inner.next_timer.get());
        self.inner.next_timer.set(id.0 + 1);
        self.inner.timers.borrow_mut().push(Timer {
            id,
            interval,
            due: None,
            handler,
        });
        id
    }

    /// Enables or disables a timer.
    ///
    /// Enabling a disabled timer schedules its first expiry one interval from
    /// now. Enabling an already running timer keeps its phase.
    pub fn set_timer_enabled(&self, id: TimerId, enabled: bool) {
        let now = self.now();
        let mut timers = self.inner.timers.borrow_mut();
        if let Some(timer) = timers.iter_mut().find(|t| t.id == id) {
            match (enabled, timer.due) {
                (true, None) => timer.due = Some(now + timer.interval),
                (false, Some(_)) => timer.due = None,
                _ => {}
            }
        }
    }

    /// Returns true if the timer exists and is currently enabled.
    pub fn is_timer_enabled(&self, id: TimerId) -> bool {
        self.inner
            .timers
            .borrow()
            .iter()
            .any(|t| t.id == id && t.due.is_some())
    }

    /// Removes a timer. Unknown ids are ignored.
    pub fn remove_timer(&self, id: TimerId) {
        self.inner.timers.borrow_mut().retain(|t| t.id != id);
    }

    /// Dispatches all deferred notifications and every timer already due.
    ///
    /// Does not move the clock. Returns the number of notifications delivered.
    pub fn run_until_idle(&self) -> usize {
        let mut delivered = 0;
        loop {
            delivered += self.dispatch_deferred();
            if !self.fire_next(self.now()) {
                break;
            }
        }
        delivered
    }

    /// Moves virtual time forward by `dt`, firing timers at their deadlines
    /// and draining deferred work between them.
    pub fn advance(&self, dt: Duration) {
        let target = self.now() + dt;
        loop {
            self.dispatch_deferred();
            match self.next_due() {
                Some(due) if due <= target => {
                    self.inner.now.set(due.max(self.now()));
                    self.fire_next(self.now());
                }
                _ => break,
            }
        }
        self.inner.now.set(target);
        self.run_until_idle();
    }

    /// Runs in virtual time until no notification is queued and no timer is
    /// enabled.
    ///
    /// A timer that never disables itself makes this loop forever; bound such
    /// pipelines with [`advance()`](Self::advance) instead.
    pub fn run(&self) {
        loop {
            self.dispatch_deferred();
            match self.next_due() {
                Some(due) => {
                    self.inner.now.set(due.max(self.now()));
                    self.fire_next(self.now());
                }
                None => break,
            }
        }
    }

    /// Like [`run()`](Self::run), but sleeps on the wall clock until each
    /// timer deadline.
    pub fn run_realtime(&self) {
        let origin = Instant::now().checked_sub(self.now()).unwrap_or_else(Instant::now);
        loop {
            self.dispatch_deferred();
            let Some(due) = self.next_due() else {
                break;
            };
            let wall = origin + due;
            let now = Instant::now();
            if wall > now {
                std::thread::sleep(wall - now);
            }
            self.inner.now.set(due.max(self.now()));
            self.fire_next(self.now());
        }
    }

    fn dispatch_deferred(&self) -> usize {
        let mut delivered = 0;
        loop {
            // The queue borrow must end before dispatch: targets defer more work.
            let next = self.inner.deferred.borrow_mut().pop_front();
            let Some(Deferred {
                target,
                notification,
            }) = next
            else {
                break;
            };
            if let Some(target) = target.upgrade() {
                let mut source = target.borrow_mut();
                match notification {
                    Notification::Resume => source.resume(),
                    Notification::AllFlushed => source.all_flushed(),
                }
                delivered += 1;
            }
        }
        delivered
    }

    fn next_due(&self) -> Option<Duration> {
        self.inner.timers.borrow().iter().filter_map(|t| t.due).min()
    }

    /// Fires the earliest timer due at or before `limit`. Returns false if
    /// none was due.
    fn fire_next(&self, limit: Duration) -> bool {
        let fired = {
            let mut timers = self.inner.timers.borrow_mut();
            let Some(timer) = timers
                .iter_mut()
                .filter(|t| t.due.is_some_and(|due| due <= limit))
                .min_by_key(|t| t.due)
            else {
                return false;
            };
            let due = timer.due.unwrap_or(limit);
            timer.due = Some(due + timer.interval);
            (timer.id, timer.handler.clone())
        };
        let (id, handler) = fired;
        match handler.upgrade() {
            Some(handler) => handler.borrow_mut().on_timer(id),
            None => self.remove_timer(id),
        }
        true
    }
}
