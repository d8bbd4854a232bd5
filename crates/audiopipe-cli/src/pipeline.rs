//! Builds live core nodes from a pipeline description.

use std::cell::RefCell;
use std::rc::Rc;

use audiopipe_config::{PipelineConfig, StageConfig};
use audiopipe_core::{
    AudioFifo, ConnectError, DelayLine, EventLoop, Gain, JitterFifo, Pacer, Passthrough, Producer,
    Relay, Sink, SinkRef, Valve, register_sink,
};

/// One built node, seen from both of its edges.
struct Node {
    sink: Rc<RefCell<dyn Sink>>,
    producer: Rc<RefCell<dyn Producer>>,
}

impl Node {
    fn new<T: Sink + Producer + 'static>(node: Rc<RefCell<T>>) -> Self {
        Self {
            sink: node.clone(),
            producer: node,
        }
    }
}

/// A linear chain of nodes, connected head to tail.
///
/// The chain keeps every node alive; edges between them are borrowed.
pub struct Chain {
    nodes: Vec<Node>,
}

impl Chain {
    /// Instantiates every stage of `config` on `events` and links them in
    /// order.
    ///
    /// The description must have passed validation; the node constructors
    /// panic on out-of-range values.
    pub fn build(config: &PipelineConfig, events: &EventLoop) -> Result<Self, ConnectError> {
        let nodes: Vec<Node> = config
            .stages
            .iter()
            .map(|stage| build_stage(stage, events))
            .collect();
        for pair in nodes.windows(2) {
            register_sink(&*pair[0].producer, borrowed(&pair[1].sink))?;
        }
        tracing::debug!(stages = nodes.len(), "pipeline built");
        Ok(Self { nodes })
    }

    /// Connects `source` to the head of the chain. With no stages, `source`
    /// feeds `tail` directly.
    pub fn attach<P, S>(
        &self,
        source: &Rc<RefCell<P>>,
        tail: &Rc<RefCell<S>>,
    ) -> Result<(), ConnectError>
    where
        P: Producer + 'static,
        S: Sink + 'static,
    {
        let tail: Rc<RefCell<dyn Sink>> = tail.clone();
        match (self.nodes.first(), self.nodes.last()) {
            (Some(head), Some(last)) => {
                register_sink(&**source, borrowed(&head.sink))?;
                register_sink(&*last.producer, borrowed(&tail))
            }
            _ => register_sink(&**source, borrowed(&tail)),
        }
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }
}

fn borrowed(sink: &Rc<RefCell<dyn Sink>>) -> SinkRef {
    SinkRef::Borrowed(Rc::downgrade(sink))
}

fn build_stage(stage: &StageConfig, events: &EventLoop) -> Node {
    match *stage {
        StageConfig::Passthrough => Node::new(Passthrough::new(events)),
        StageConfig::Valve {
            open,
            block_when_closed,
        } => {
            let valve = Valve::new(events);
            {
                let mut v = valve.borrow_mut();
                v.set_block_when_closed(block_when_closed);
                v.set_open(open);
            }
            Node::new(valve)
        }
        StageConfig::Gain { gain } => Node::new(Relay::new(events, Gain::new(gain))),
        StageConfig::DelayLine { length_ms, fade_ms } => {
            let delay = DelayLine::new(events, length_ms);
            delay.borrow_mut().set_fade_time(fade_ms);
            Node::new(delay)
        }
        StageConfig::JitterFifo { size } => Node::new(JitterFifo::new(events, size)),
        StageConfig::Fifo {
            size,
            prebuf_samples,
            overwrite,
        } => {
            let fifo = AudioFifo::new(events, size);
            {
                let mut f = fifo.borrow_mut();
                f.set_prebuf_samples(prebuf_samples);
                f.set_overwrite(overwrite);
            }
            Node::new(fifo)
        }
        StageConfig::Pacer {
            block_size,
            prebuf_ms,
        } => Node::new(Pacer::new(events, block_size, prebuf_ms)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use audiopipe_core::{SampleCollector, SampleReader};

    fn run(config: &PipelineConfig, input: &[f32]) -> Vec<f32> {
        let events = EventLoop::with_sample_rate(config.sample_rate);
        let chain = Chain::build(config, &events).unwrap();
        let reader = SampleReader::new(&events, 100);
        let collector = SampleCollector::new(&events);
        chain.attach(&reader, &collector).unwrap();

        reader.borrow_mut().feed(input);
        reader.borrow_mut().finish();
        events.run();
        assert!(reader.borrow().is_done());
        collector.borrow_mut().take_samples()
    }

    #[test]
    fn empty_pipeline_connects_source_to_tail() {
        let config = PipelineConfig::new("empty").with_sample_rate(8000);
        assert_eq!(run(&config, &[0.5; 300]), vec![0.5; 300]);
    }

    #[test]
    fn stages_run_in_order() {
        let config = PipelineConfig::new("rx")
            .with_sample_rate(8000)
            .with_stage(StageConfig::Gain { gain: 2.0 })
            .with_stage(StageConfig::DelayLine {
                length_ms: 1,
                fade_ms: 0,
            })
            .with_stage(StageConfig::Passthrough);
        let out = run(&config, &[0.25; 40]);
        assert_eq!(out.len(), 48);
        assert!(out[..8].iter().all(|&s| s == 0.0));
        assert!(out[8..].iter().all(|&s| s == 0.5));
    }

    #[test]
    fn closed_discarding_valve_drops_audio() {
        let config = PipelineConfig::new("gate")
            .with_sample_rate(8000)
            .with_stage(StageConfig::Valve {
                open: false,
                block_when_closed: false,
            });
        assert!(run(&config, &[1.0; 64]).is_empty());
    }

    #[test]
    fn paced_chain_delivers_everything() {
        let config = PipelineConfig::new("paced")
            .with_sample_rate(8000)
            .with_stage(StageConfig::JitterFifo { size: 1600 })
            .with_stage(StageConfig::Pacer {
                block_size: 160,
                prebuf_ms: 20,
            });
        let input: Vec<f32> = (0..1000).map(|i| i as f32).collect();
        assert_eq!(run(&config, &input), input);
    }

    #[test]
    fn prebuffered_fifo_delivers_short_stream_on_flush() {
        let config = PipelineConfig::new("fifo")
            .with_sample_rate(8000)
            .with_stage(StageConfig::Fifo {
                size: 800,
                prebuf_samples: 400,
                overwrite: false,
            });
        let input: Vec<f32> = (0..250).map(|i| i as f32).collect();
        assert_eq!(run(&config, &input), input);
    }
}
