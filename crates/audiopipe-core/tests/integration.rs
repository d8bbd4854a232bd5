//! Integration tests for audiopipe-core pipelines.
//!
//! Each test wires several nodes together and drives the event loop the way
//! an application would: feed a reader, request a flush, run the loop, then
//! inspect what reached the collector and whether every flush completed.

use std::rc::Rc;
use std::time::Duration;

use audiopipe_core::{
    DelayLine, EventLoop, FnTransform, Gain, JitterFifo, Pacer, Passthrough, Producer, Relay,
    SampleCollector, SampleReader, Selector, Sink, SinkRef, Splitter, StreamState, StreamStateDetector,
    Valve, connect, register_sink,
};

fn ramp(n: usize) -> Vec<f32> {
    (1..=n).map(|i| i as f32).collect()
}

// ============================================================================
// 1. Linear chains
// ============================================================================

/// reader -> delay -> gain relay -> pacer -> collector. Output is the input
/// scaled, preceded by one ring of silence, and the final flush reaches the
/// reader exactly once.
#[test]
fn delay_gain_pacer_chain() {
    let events = EventLoop::with_sample_rate(8000);
    let reader = SampleReader::new(&events, 100);
    let delay = DelayLine::new(&events, 10);
    delay.borrow_mut().set_fade_time(0);
    let relay = Relay::new(&events, Gain::new(0.5));
    let pacer = Pacer::new(&events, 160, 0);
    let sink = SampleCollector::new(&events);
    connect(&reader, &delay).unwrap();
    connect(&delay, &relay).unwrap();
    connect(&relay, &pacer).unwrap();
    connect(&pacer, &sink).unwrap();

    let input = ramp(1000);
    reader.borrow_mut().feed(&input);
    reader.borrow_mut().finish();
    events.run();

    let out = sink.borrow().samples().to_vec();
    assert_eq!(out.len(), 80 + input.len());
    assert!(out[..80].iter().all(|&s| s == 0.0));
    for (got, want) in out[80..].iter().zip(&input) {
        assert_eq!(*got, want * 0.5);
    }
    assert!(reader.borrow().is_done());
    assert_eq!(reader.borrow().flushes_completed(), 1);
    assert_eq!(sink.borrow().flush_requests(), 1);

    // After the first pass-through block everything left on the tick grid.
    for w in &sink.borrow().writes()[1..] {
        assert!(w.len <= 160);
        assert_eq!(w.at.as_millis() % 20, 0, "write at {:?}", w.at);
    }
}

/// Two 2:1 relays in series decimate 4:1 and keep frame accounting across
/// block boundaries.
#[test]
fn cascaded_decimation() {
    let events = EventLoop::with_sample_rate(32000);
    let pick_first = || {
        FnTransform::new(|dst: &mut [f32], src: &[f32]| {
            for (out, frame) in dst.iter_mut().zip(src.chunks_exact(2)) {
                *out = frame[0];
            }
            dst.len()
        })
    };
    let reader = SampleReader::new(&events, 7);
    let first = Relay::with_rates(&events, 32000, 16000, pick_first());
    let second = Relay::with_rates(&events, 16000, 8000, pick_first());
    let sink = SampleCollector::new(&events);
    connect(&reader, &first).unwrap();
    connect(&first, &second).unwrap();
    connect(&second, &sink).unwrap();

    reader.borrow_mut().feed(&ramp(41));
    reader.borrow_mut().finish();
    events.run_until_idle();

    // 41 samples -> 21 (padded) -> 11 (padded).
    let want: Vec<f32> = (0..11).map(|i| (i * 4 + 1) as f32).collect();
    assert_eq!(sink.borrow().samples(), want.as_slice());
    assert!(reader.borrow().is_done());
}

/// Reaching the jitter FIFO's half-full mark starts output; once the ring
/// runs dry it pre-buffers again until the flush drains the rest.
#[test]
fn jitter_fifo_absorbs_bursts() {
    let events = EventLoop::with_sample_rate(8000);
    let reader = SampleReader::new(&events, 160);
    let fifo = JitterFifo::new(&events, 1600);
    let sink = SampleCollector::new(&events);
    connect(&reader, &fifo).unwrap();
    connect(&fifo, &sink).unwrap();

    reader.borrow_mut().feed(&ramp(640));
    assert!(sink.borrow().samples().is_empty(), "still pre-buffering");

    reader.borrow_mut().feed(&ramp(320));
    assert_eq!(sink.borrow().samples().len(), 800);
    assert!(fifo.borrow().is_prebuffering());

    reader.borrow_mut().feed(&ramp(100));
    reader.borrow_mut().finish();
    events.run_until_idle();
    assert_eq!(sink.borrow().samples().len(), 1060);
    assert!(reader.borrow().is_done());
    assert_eq!(fifo.borrow().discarded(), 0);
}

// ============================================================================
// 2. Fan-out and fan-in
// ============================================================================

/// A fast and a slow branch both see the whole stream; the flush completes
/// only after both have drained.
#[test]
fn splitter_with_fast_and_slow_branch() {
    let events = EventLoop::new();
    let reader = SampleReader::new(&events, 64);
    let splitter = Splitter::new(&events);
    let fast = SampleCollector::new(&events);
    let slow = SampleCollector::new(&events);
    slow.borrow_mut().set_write_limit(Some(5));
    slow.borrow_mut().set_hold_flush(true);
    connect(&reader, &splitter).unwrap();
    splitter
        .borrow_mut()
        .add_sink(SinkRef::borrowed(&fast))
        .unwrap();
    splitter
        .borrow_mut()
        .add_sink(SinkRef::borrowed(&slow))
        .unwrap();

    let input = ramp(300);
    reader.borrow_mut().feed(&input);
    reader.borrow_mut().finish();
    events.run_until_idle();

    assert_eq!(fast.borrow().samples(), input.as_slice());
    assert_eq!(slow.borrow().samples(), input.as_slice());
    assert_eq!(reader.borrow().flushes_completed(), 0, "slow branch holds the join");

    slow.borrow_mut().complete_flush();
    events.run_until_idle();
    assert_eq!(reader.borrow().flushes_completed(), 1);
}

/// Splitter branches can be whole sub-chains owned by the splitter.
#[test]
fn splitter_owns_branch_chains() {
    let events = EventLoop::with_sample_rate(8000);
    let reader = SampleReader::new(&events, 50);
    let splitter = Splitter::new(&events);
    let delay = DelayLine::new(&events, 5);
    delay.borrow_mut().set_fade_time(0);
    let delayed = SampleCollector::new(&events);
    let direct = SampleCollector::new(&events);
    connect(&delay, &delayed).unwrap();
    connect(&reader, &splitter).unwrap();
    let delay_id = splitter
        .borrow_mut()
        .add_sink(SinkRef::owned(Rc::clone(&delay)))
        .unwrap();
    splitter
        .borrow_mut()
        .add_sink(SinkRef::borrowed(&direct))
        .unwrap();

    reader.borrow_mut().feed(&ramp(100));
    reader.borrow_mut().finish();
    events.run_until_idle();
    assert_eq!(direct.borrow().samples().len(), 100);
    assert_eq!(delayed.borrow().samples().len(), 140);
    assert!(reader.borrow().is_done());

    let weak = Rc::downgrade(&delay);
    drop(delay);
    assert!(weak.upgrade().is_some(), "splitter keeps its owned sink");
    assert!(splitter.borrow_mut().remove_sink(delay_id));
    assert!(weak.upgrade().is_none());
}

/// Two producers on a selector: the higher priority one takes over, the
/// lower one keeps being accepted in full without reaching the output.
#[test]
fn selector_priority_takeover() {
    let events = EventLoop::new();
    let low = SampleReader::new(&events, 32);
    let high = SampleReader::new(&events, 32);
    let selector = Selector::new(&events);
    let sink = SampleCollector::new(&events);
    connect(&selector, &sink).unwrap();
    let a = selector.borrow_mut().add_source(&low).unwrap();
    let b = selector.borrow_mut().add_source(&high).unwrap();
    selector.borrow_mut().enable_auto_select(a, 1);
    selector.borrow_mut().enable_auto_select(b, 5);

    low.borrow_mut().feed(&[1.0; 32]);
    assert_eq!(selector.borrow().selected(), Some(a));

    high.borrow_mut().feed(&[2.0; 32]);
    assert_eq!(selector.borrow().selected(), Some(b));

    low.borrow_mut().feed(&[3.0; 32]);
    assert_eq!(selector.borrow().selected(), Some(b));
    assert_eq!(low.borrow().remaining(), 0, "deselected producer never stalls");

    let out = sink.borrow().samples().to_vec();
    assert_eq!(out.len(), 64);
    assert!(out[..32].iter().all(|&s| s == 1.0));
    assert!(out[32..].iter().all(|&s| s == 2.0));

    // The high priority talker ends: selection falls back to the other
    // active branch.
    high.borrow_mut().finish();
    events.run_until_idle();
    assert_eq!(high.borrow().flushes_completed(), 1);
    assert_eq!(selector.borrow().selected(), Some(a));
}

// ============================================================================
// 3. Contract behavior across nodes
// ============================================================================

/// Two flush requests with no write in between yield two completions.
#[test]
fn repeated_flush_completes_each_request() {
    let events = EventLoop::new();
    let reader = SampleReader::new(&events, 16);
    let pass = Passthrough::new(&events);
    let sink = SampleCollector::new(&events);
    sink.borrow_mut().set_hold_flush(true);
    connect(&reader, &pass).unwrap();
    connect(&pass, &sink).unwrap();

    reader.borrow_mut().output().flush();
    reader.borrow_mut().output().flush();
    events.run_until_idle();
    assert_eq!(reader.borrow().flushes_completed(), 0);
    assert_eq!(sink.borrow().flush_requests(), 1);

    sink.borrow_mut().complete_flush();
    events.run_until_idle();
    assert_eq!(reader.borrow().flushes_completed(), 2);
}

/// A state detector in front of a closed, blocking valve sees the stream go
/// active and stay there until the valve reopens and the flush completes.
#[test]
fn detector_and_valve() {
    let events = EventLoop::new();
    let reader = SampleReader::new(&events, 16);
    let detector = StreamStateDetector::new(&events);
    let valve = Valve::new(&events);
    let sink = SampleCollector::new(&events);
    valve.borrow_mut().set_block_when_closed(true);
    valve.borrow_mut().set_open(false);
    connect(&reader, &detector).unwrap();
    connect(&detector, &valve).unwrap();
    connect(&valve, &sink).unwrap();

    reader.borrow_mut().feed(&[0.5; 48]);
    reader.borrow_mut().finish();
    events.run_until_idle();
    assert_eq!(detector.borrow().state(), StreamState::Active);
    assert!(sink.borrow().samples().is_empty());

    valve.borrow_mut().set_open(true);
    events.run_until_idle();
    assert_eq!(sink.borrow().samples().len(), 48);
    assert!(reader.borrow().is_done());
    assert_eq!(detector.borrow().state(), StreamState::Idle);
}

/// An owned chain lives as long as its head.
#[test]
fn owned_chain_drops_with_head() {
    let events = EventLoop::new();
    let reader = SampleReader::new(&events, 16);
    let pass = Passthrough::new(&events);
    let sink = SampleCollector::new(&events);
    register_sink(&pass, SinkRef::owned(Rc::clone(&sink))).unwrap();
    register_sink(&reader, SinkRef::owned(Rc::clone(&pass))).unwrap();
    let weak_pass = Rc::downgrade(&pass);
    drop(pass);

    reader.borrow_mut().feed(&[1.0; 20]);
    assert_eq!(sink.borrow().samples().len(), 20);

    drop(reader);
    assert!(weak_pass.upgrade().is_none());
    assert!(!sink.borrow_mut().input().is_registered());
}

/// The pacer holds the cadence while upstream stalls and recovers.
#[test]
fn pacer_cadence_survives_downstream_stall() {
    let events = EventLoop::with_sample_rate(8000);
    let reader = SampleReader::new(&events, 160);
    let pacer = Pacer::new(&events, 160, 0);
    let sink = SampleCollector::new(&events);
    connect(&reader, &pacer).unwrap();
    connect(&pacer, &sink).unwrap();

    reader.borrow_mut().feed(&[0.1; 1600]);
    events.advance(Duration::from_millis(50));
    sink.borrow_mut().set_stalled(true);
    events.advance(Duration::from_millis(50));
    let before = sink.borrow().samples().len();
    sink.borrow_mut().set_stalled(false);
    events.run();

    assert!(before < 1600);
    assert_eq!(sink.borrow().samples().len(), 1600);
    assert!(sink.borrow().writes().iter().all(|w| w.len == 160));
}
