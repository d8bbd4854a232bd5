//! Audiopipe Core - push-based audio streaming with cooperative backpressure
//!
//! This crate provides the building blocks of a mono audio streaming pipeline:
//! components joined by one-to-one edges, audio pushed downstream, and two
//! signals travelling back upstream (resume and flush completion). Everything
//! runs on a single-threaded cooperative [`EventLoop`].
//!
//! # Core Abstractions
//!
//! ## Contract
//!
//! - [`Sink`] / [`Source`] / [`Producer`] - The three roles of a component
//! - [`Input`] / [`Output`] - Sink-side and source-side edge endpoints
//! - [`SinkRef`] - Owned or borrowed link to a sink
//! - [`register_sink`], [`unregister_sink`], [`connect`] - Edge management
//!
//! ## Scheduling
//!
//! - [`EventLoop`] - Deferred notification queue, timers and a virtual clock
//!
//! ## Nodes
//!
//! - [`Relay`] - Buffered 1:N / N:1 rate converter around a [`Transform`]
//! - [`Splitter`] - Fan-out, paced by the slowest branch, AND-joined flush
//! - [`Selector`] - Fan-in, one selected branch with priority auto-selection
//! - [`Mixer`] - Fan-in, all active sources summed in step
//! - [`DelayLine`] - Ring buffer delay with faded mute and clear
//! - [`JitterFifo`] - Elastic buffer with half-full pre-buffering
//! - [`AudioFifo`] - Bounded FIFO with prebuffer threshold and overwrite mode
//! - [`Pacer`] - Fixed-size blocks at a fixed cadence
//! - [`Passthrough`], [`StreamStateDetector`], [`Valve`] - Small utilities
//!
//! ## Endpoints
//!
//! - [`SampleReader`] - Pushes prepared samples into a pipeline
//! - [`SampleCollector`] - Records what reaches the end of a pipeline
//!
//! # Example
//!
//! ```rust
//! use audiopipe_core::{connect, DelayLine, EventLoop, SampleCollector, SampleReader};
//!
//! let events = EventLoop::with_sample_rate(8000);
//! let reader = SampleReader::new(&events, 64);
//! let delay = DelayLine::new(&events, 1);
//! let sink = SampleCollector::new(&events);
//! connect(&reader, &delay).unwrap();
//! connect(&delay, &sink).unwrap();
//!
//! reader.borrow_mut().feed(&[1.0; 16]);
//! reader.borrow_mut().finish();
//! events.run();
//!
//! // One millisecond at 8 kHz: eight samples of silence come out first.
//! let out = sink.borrow().samples().to_vec();
//! assert_eq!(out.len(), 24);
//! assert!(out[..8].iter().all(|&s| s == 0.0));
//! assert!(reader.borrow().is_done());
//! ```
//!
//! # Design Principles
//!
//! - **Single-threaded**: components live in `Rc<RefCell<_>>` handles
//! - **Calls flow downstream**: upstream signals are always deferred, so no
//!   component is re-entered while it is mid-call
//! - **No errors in the data path**: backpressure is a count, not a failure

pub mod contract;
pub mod delay_line;
pub mod endpoints;
pub mod event_loop;
pub mod fade;
pub mod fifo;
pub mod jitter_fifo;
pub mod mixer;
pub mod pacer;
pub mod passthrough;
pub mod relay;
pub mod selector;
pub mod splitter;
pub mod valve;

// Re-export main types at crate root
pub use contract::{
    BranchId, ConnectError, Input, Output, Producer, Sink, SinkRef, Source, connect,
    register_sink, unregister_sink,
};
pub use delay_line::{DEFAULT_FADE_TIME_MS, DelayLine};
pub use endpoints::{DEFAULT_READ_BLOCK, SampleCollector, SampleReader, WriteRecord};
pub use event_loop::{DEFAULT_SAMPLE_RATE, EventLoop, Notification, TimerHandler, TimerId};
pub use fade::{FadeCurve, db_to_linear};
pub use fifo::AudioFifo;
pub use jitter_fifo::{JitterFifo, MAX_WRITE_SIZE};
pub use mixer::{MIXER_LANE_SIZE, Mixer};
pub use pacer::Pacer;
pub use passthrough::{Passthrough, StreamState, StreamStateDetector};
pub use relay::{FnTransform, Gain, RELAY_BUFFER_SIZE, Relay, Transform};
pub use selector::{NULL_BRANCH_PRIO, Selector};
pub use splitter::Splitter;
pub use valve::Valve;
