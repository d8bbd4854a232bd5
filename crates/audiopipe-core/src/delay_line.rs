//! Fixed-latency delay line with click-free mute and clear.
//!
//! The ring holds `length_ms` of audio. Each incoming sample pushes out the
//! sample at the read cursor, then takes its slot scaled by the current fade
//! gain. Mute and clear act *retroactively*: they walk the most recent part of
//! the ring and apply the fade-out curve to it, so the cut is smooth even
//! though it is logically instantaneous.
//!
//! ```rust
//! use audiopipe_core::{DelayLine, EventLoop, SampleCollector, Sink, connect};
//!
//! let events = EventLoop::with_sample_rate(8000);
//! let delay = DelayLine::new(&events, 1); // 8 samples
//! let sink = SampleCollector::new(&events);
//! connect(&delay, &sink).unwrap();
//!
//! let ramp: Vec<f32> = (1..=10).map(|i| i as f32).collect();
//! delay.borrow_mut().write(&ramp[..8]);
//! delay.borrow_mut().write(&ramp[8..]);
//! assert_eq!(&sink.borrow().samples()[8..], &[1.0, 2.0]);
//! ```

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use crate::contract::{Input, Output, Producer, Sink, Source};
use crate::event_loop::EventLoop;
use crate::fade::FadeCurve;

/// Fade time used by a new delay line, in milliseconds.
pub const DEFAULT_FADE_TIME_MS: u32 = 10;

/// Largest block written downstream per call while flushing.
const FLUSH_CHUNK: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FadeDir {
    Hold,
    Out,
    In,
}

/// Delay line node.
pub struct DelayLine {
    input: Input,
    output: Output,
    sample_rate: u32,
    buf: Vec<f32>,
    scratch: Vec<f32>,
    ptr: usize,
    /// Samples still to emit for an in-progress flush.
    flush_cnt: usize,
    /// Trailing samples silenced by the last clear, skipped on flush.
    last_clear: usize,
    is_muted: bool,
    /// Samples left before a delayed unmute starts fading in.
    mute_cnt: usize,
    curve: FadeCurve,
    fade_pos: usize,
    fade_dir: FadeDir,
    /// Gain state for a zero-length curve.
    silent: bool,
}

impl DelayLine {
    /// Creates a delay line holding `length_ms` of audio.
    ///
    /// # Panics
    ///
    /// Panics if `length_ms` maps to zero samples at the loop's rate.
    pub fn new(events: &EventLoop, length_ms: u32) -> Rc<RefCell<Self>> {
        let size = events.ms_to_samples(length_ms);
        assert!(size > 0, "delay line must hold at least one sample");
        let sample_rate = events.sample_rate();
        Rc::new_cyclic(|me: &Weak<RefCell<Self>>| {
            let owner: Weak<RefCell<dyn Source>> = me.clone();
            RefCell::new(Self {
                input: Input::new(),
                output: Output::new(events, owner),
                sample_rate,
                buf: vec![0.0; size],
                scratch: Vec::with_capacity(size.min(FLUSH_CHUNK).max(1)),
                ptr: 0,
                flush_cnt: 0,
                // A fresh ring is silent: nothing to flush.
                last_clear: size,
                is_muted: false,
                mute_cnt: 0,
                curve: FadeCurve::with_duration_ms(DEFAULT_FADE_TIME_MS, sample_rate),
                fade_pos: 0,
                fade_dir: FadeDir::Hold,
                silent: false,
            })
        })
    }

    /// Ring capacity in samples.
    pub fn size(&self) -> usize {
        self.buf.len()
    }

    /// Returns true while muted.
    pub fn is_muted(&self) -> bool {
        self.is_muted
    }

    /// Length of the fade curve in samples.
    pub fn fade_len(&self) -> usize {
        self.curve.len()
    }

    /// Sets the fade-in/fade-out time. Zero switches gain instantly.
    pub fn set_fade_time(&mut self, time_ms: u32) {
        self.curve = FadeCurve::with_duration_ms(time_ms, self.sample_rate);
        if self.curve.is_empty() {
            self.fade_pos = 0;
            self.fade_dir = FadeDir::Hold;
            self.silent = self.is_muted;
        } else {
            self.fade_pos = self.fade_pos.min(self.curve.len() - 1);
        }
    }

    /// Mutes or unmutes.
    ///
    /// Muting fades out the last `time_ms` of audio already in the ring.
    /// Unmuting with `time_ms == 0` starts fading in at once; otherwise the
    /// fade-in starts after `time_ms` more samples have been written.
    pub fn mute(&mut self, do_mute: bool, time_ms: u32) {
        let ext = self.ms_to_ring_samples(time_ms);
        if do_mute {
            self.fade_pos = 0;
            self.start_fade_out();
            self.fade_recent(ext);
            self.is_muted = true;
            self.mute_cnt = 0;
        } else if ext == 0 {
            self.start_fade_in();
            self.is_muted = false;
        } else {
            self.mute_cnt = ext;
        }
        #[cfg(feature = "tracing")]
        tracing::debug!(do_mute, time_ms, "delay line mute");
    }

    /// Silences the last `time_ms` of audio in the ring, or all of it for
    /// `None`. A following flush does not re-emit the silenced tail.
    pub fn clear(&mut self, time_ms: Option<u32>) {
        let count = time_ms.map_or(self.buf.len(), |ms| self.ms_to_ring_samples(ms));
        self.start_fade_out();
        self.fade_recent(count);
        if !self.is_muted {
            self.start_fade_in();
        }
        self.last_clear = count.saturating_sub(self.curve.len());
    }

    fn ms_to_ring_samples(&self, time_ms: u32) -> usize {
        let samples = (u64::from(time_ms) * u64::from(self.sample_rate) / 1000) as usize;
        samples.min(self.buf.len())
    }

    fn start_fade_out(&mut self) {
        self.fade_dir = FadeDir::Out;
        if self.curve.is_empty() {
            self.silent = true;
        }
    }

    fn start_fade_in(&mut self) {
        self.fade_dir = FadeDir::In;
        if self.curve.is_empty() {
            self.silent = false;
        }
    }

    /// Walks the `count` most recently written slots, oldest first, scaling
    /// them by the advancing fade gain.
    fn fade_recent(&mut self, count: usize) {
        let size = self.buf.len();
        let mut pos = (self.ptr + size - count) % size;
        for _ in 0..count {
            let gain = self.current_gain();
            self.buf[pos] *= gain;
            pos = if pos + 1 < size { pos + 1 } else { 0 };
        }
    }

    /// Current fade gain; advances the fade position.
    fn current_gain(&mut self) -> f32 {
        if self.curve.is_empty() {
            return if self.silent { 0.0 } else { 1.0 };
        }
        let gain = self.curve.gain(self.fade_pos);
        let last = self.curve.len() - 1;
        match self.fade_dir {
            FadeDir::Hold => {}
            FadeDir::Out => {
                self.fade_pos += 1;
                if self.fade_pos >= last {
                    self.fade_pos = last;
                    self.fade_dir = FadeDir::Hold;
                }
            }
            FadeDir::In => {
                self.fade_pos = self.fade_pos.saturating_sub(1);
                if self.fade_pos == 0 {
                    self.fade_dir = FadeDir::Hold;
                }
            }
        }
        gain
    }

    fn advance(&self, pos: usize) -> usize {
        if pos + 1 < self.buf.len() { pos + 1 } else { 0 }
    }

    /// Copies `count` samples starting at the cursor into the scratch buffer.
    fn gather(&mut self, count: usize) {
        self.scratch.clear();
        let size = self.buf.len();
        let first = count.min(size - self.ptr);
        self.scratch.extend_from_slice(&self.buf[self.ptr..self.ptr + first]);
        self.scratch.extend_from_slice(&self.buf[..count - first]);
    }

    fn write_remaining(&mut self) {
        while self.flush_cnt > 0 {
            let count = self.flush_cnt.min(FLUSH_CHUNK);
            self.gather(count);
            let written = self.output.write(&self.scratch);
            for _ in 0..written {
                self.buf[self.ptr] = 0.0;
                self.ptr = self.advance(self.ptr);
            }
            self.flush_cnt -= written;
            if written < count {
                return;
            }
        }
        // The whole ring is silent now.
        self.last_clear = self.buf.len();
        self.output.flush();
    }
}

impl Sink for DelayLine {
    fn write(&mut self, samples: &[f32]) -> usize {
        if !self.input.accepting() {
            return 0;
        }
        self.last_clear = 0;
        let count = samples.len().min(self.buf.len());
        self.gather(count);
        let written = self.output.write(&self.scratch);
        for &sample in &samples[..written] {
            let gain = self.current_gain();
            self.buf[self.ptr] = sample * gain;
            if self.is_muted && self.mute_cnt > 0 {
                self.mute_cnt -= 1;
                if self.mute_cnt == 0 {
                    self.start_fade_in();
                    self.is_muted = false;
                }
            }
            self.ptr = self.advance(self.ptr);
        }
        if written == count && count < samples.len() {
            // Clipped to the ring size, not by downstream: nobody else will resume.
            self.input.resume();
        }
        written
    }

    fn flush(&mut self) {
        if !self.input.begin_flush() {
            return;
        }
        self.flush_cnt = self.buf.len() - self.last_clear;
        if self.flush_cnt > 0 {
            self.write_remaining();
        } else {
            self.output.flush();
        }
    }

    fn input(&mut self) -> &mut Input {
        &mut self.input
    }
}

impl Source for DelayLine {
    fn resume(&mut self) {
        if self.flush_cnt > 0 {
            self.write_remaining();
        } else {
            self.input.resume();
        }
    }

    fn all_flushed(&mut self) {
        self.output.flush_completed();
        self.input.all_flushed();
    }
}

impl Producer for DelayLine {
    fn output(&mut self) -> &mut Output {
        &mut self.output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::connect;
    use crate::endpoints::{SampleCollector, SampleReader};

    fn ramp(n: usize) -> Vec<f32> {
        (1..=n).map(|i| i as f32).collect()
    }

    #[test]
    fn pure_delay_reproduces_input() {
        let events = EventLoop::with_sample_rate(8000);
        let delay = DelayLine::new(&events, 1);
        delay.borrow_mut().set_fade_time(0);
        let sink = SampleCollector::new(&events);
        connect(&delay, &sink).unwrap();

        let input = ramp(20);
        assert_eq!(delay.borrow_mut().write(&input), 8);
        assert_eq!(delay.borrow_mut().write(&input[8..]), 8);
        assert_eq!(delay.borrow_mut().write(&input[16..]), 4);

        let out = sink.borrow().samples().to_vec();
        assert_eq!(&out[..8], &[0.0; 8]);
        assert_eq!(&out[8..], &input[..12]);
    }

    #[test]
    fn flush_emits_tail_and_zeroes_ring() {
        let events = EventLoop::with_sample_rate(8000);
        let delay = DelayLine::new(&events, 1);
        let reader = SampleReader::new(&events, 4);
        let sink = SampleCollector::new(&events);
        connect(&reader, &delay).unwrap();
        connect(&delay, &sink).unwrap();

        let input = ramp(12);
        reader.borrow_mut().feed(&input);
        reader.borrow_mut().finish();
        events.run_until_idle();

        let out = sink.borrow().samples().to_vec();
        assert_eq!(out.len(), 20);
        assert_eq!(&out[8..], input.as_slice());
        assert_eq!(reader.borrow().flushes_completed(), 1);
        assert!(delay.borrow().buf.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn second_flush_without_writes_emits_nothing() {
        let events = EventLoop::with_sample_rate(8000);
        let delay = DelayLine::new(&events, 1);
        let reader = SampleReader::new(&events, 4);
        let sink = SampleCollector::new(&events);
        connect(&reader, &delay).unwrap();
        connect(&delay, &sink).unwrap();

        reader.borrow_mut().feed(&ramp(12));
        reader.borrow_mut().finish();
        events.run_until_idle();
        assert_eq!(sink.borrow().samples().len(), 20);

        reader.borrow_mut().feed(&[]);
        events.run_until_idle();
        assert_eq!(sink.borrow().samples().len(), 20);
        assert_eq!(sink.borrow().flush_requests(), 2);
        assert_eq!(reader.borrow().flushes_completed(), 2);
    }

    #[test]
    fn fresh_delay_line_flushes_nothing() {
        let events = EventLoop::with_sample_rate(8000);
        let delay = DelayLine::new(&events, 10);
        let reader = SampleReader::new(&events, 4);
        let sink = SampleCollector::new(&events);
        connect(&reader, &delay).unwrap();
        connect(&delay, &sink).unwrap();

        reader.borrow_mut().finish();
        events.run_until_idle();
        assert!(sink.borrow().samples().is_empty());
        assert_eq!(reader.borrow().flushes_completed(), 1);
    }

    #[test]
    fn oversized_write_is_clipped_and_resumed() {
        let events = EventLoop::with_sample_rate(8000);
        let delay = DelayLine::new(&events, 1);
        let reader = SampleReader::new(&events, 64);
        let sink = SampleCollector::new(&events);
        connect(&reader, &delay).unwrap();
        connect(&delay, &sink).unwrap();

        reader.borrow_mut().feed(&ramp(20));
        assert_eq!(reader.borrow().written(), 8);
        events.run_until_idle();
        assert_eq!(reader.borrow().written(), 20);
        assert_eq!(sink.borrow().samples().len(), 20);
    }

    #[test]
    fn mute_fades_recent_audio_to_silence() {
        let events = EventLoop::with_sample_rate(8000);
        let delay = DelayLine::new(&events, 10);
        delay.borrow_mut().set_fade_time(2);
        let sink = SampleCollector::new(&events);
        connect(&delay, &sink).unwrap();

        delay.borrow_mut().write(&[1.0; 80]);
        delay.borrow_mut().mute(true, 10);
        assert!(delay.borrow().is_muted());
        delay.borrow_mut().write(&[1.0; 80]);

        let out = sink.borrow().samples()[80..].to_vec();
        assert_eq!(out[0], 1.0);
        for pair in out.windows(2) {
            assert!(pair[1] <= pair[0]);
        }
        assert!(out[16..].iter().all(|&s| s == 0.0));
    }

    #[test]
    fn muted_input_is_silent_until_unmute() {
        let events = EventLoop::with_sample_rate(8000);
        let delay = DelayLine::new(&events, 1);
        delay.borrow_mut().set_fade_time(0);
        let sink = SampleCollector::new(&events);
        connect(&delay, &sink).unwrap();

        delay.borrow_mut().mute(true, 0);
        delay.borrow_mut().write(&[1.0; 8]);
        delay.borrow_mut().mute(false, 0);
        delay.borrow_mut().write(&[1.0; 8]);
        delay.borrow_mut().write(&[0.0; 8]);

        let out = sink.borrow().samples().to_vec();
        assert_eq!(&out[8..16], &[0.0; 8]);
        assert_eq!(&out[16..24], &[1.0; 8]);
    }

    #[test]
    fn delayed_unmute_counts_samples() {
        let events = EventLoop::with_sample_rate(8000);
        let delay = DelayLine::new(&events, 1);
        delay.borrow_mut().set_fade_time(0);
        delay.borrow_mut().mute(true, 0);
        delay.borrow_mut().mute(false, 1);
        assert!(delay.borrow().is_muted());
        delay.borrow_mut().write(&[1.0; 7]);
        assert!(delay.borrow().is_muted());
        delay.borrow_mut().write(&[1.0]);
        assert!(!delay.borrow().is_muted());
    }

    #[test]
    fn clear_silences_ring_and_shortens_flush() {
        let events = EventLoop::with_sample_rate(8000);
        let delay = DelayLine::new(&events, 2);
        delay.borrow_mut().set_fade_time(0);
        let reader = SampleReader::new(&events, 16);
        let sink = SampleCollector::new(&events);
        connect(&reader, &delay).unwrap();
        connect(&delay, &sink).unwrap();

        reader.borrow_mut().feed(&[1.0; 16]);
        delay.borrow_mut().clear(None);
        assert!(delay.borrow().buf.iter().all(|&s| s == 0.0));

        reader.borrow_mut().finish();
        events.run_until_idle();
        assert_eq!(sink.borrow().samples().len(), 16, "nothing re-emitted");
        assert_eq!(reader.borrow().flushes_completed(), 1);

        reader.borrow_mut().feed(&[0.5; 4]);
        assert_eq!(&sink.borrow().samples()[16..], &[0.0; 4]);
    }

    #[test]
    fn flush_resumes_after_backpressure() {
        let events = EventLoop::with_sample_rate(8000);
        let delay = DelayLine::new(&events, 100);
        let reader = SampleReader::new(&events, 800);
        let sink = SampleCollector::new(&events);
        connect(&reader, &delay).unwrap();
        connect(&delay, &sink).unwrap();
        sink.borrow_mut().set_write_limit(Some(300));

        reader.borrow_mut().feed(&[0.25; 800]);
        reader.borrow_mut().finish();
        events.run_until_idle();
        assert_eq!(sink.borrow().samples().len(), 1600);
        assert_eq!(reader.borrow().flushes_completed(), 1);
    }
}
