// src/renderer.rs

use std::sync::Arc;

use crate::audio_buffer::interleave;
use crate::capture::CaptureSink;
use crate::graph::RenderGraph;
use crate::handoff::UpdateReceiver;
use crate::transport::{CAPTURE_EXPORTING, CAPTURE_RECORDING, TransportShared};

/// Real-time render pass.
///
/// This struct runs exclusively on the audio thread.
/// It must be deterministic, allocation-free, and lock-free.
/// Everything it knows about the project arrives as graph snapshots.
pub struct Renderer {
    /// Live graph, `None` until the first snapshot arrives
    graph: Option<Box<RenderGraph>>,

    updates: UpdateReceiver,
    shared: Arc<TransportShared>,
    capture: CaptureSink,

    sample_rate: u32,
    max_block: usize,

    /// Current timeline position in frames
    frame_pos: u64,

    /// Blocks started, used to stamp retired snapshots
    block: u64,
}

impl Renderer {
    pub(crate) fn new(
        updates: UpdateReceiver,
        shared: Arc<TransportShared>,
        capture: CaptureSink,
        sample_rate: u32,
        max_block: usize,
    ) -> Self {
        Self {
            graph: None,
            updates,
            shared,
            capture,
            sample_rate,
            max_block: max_block.max(1),
            frame_pos: 0,
            block: 0,
        }
    }

    /// Render interleaved stereo `output` from interleaved stereo `input`.
    ///
    /// Called once per device callback. `input` is the capture signal used
    /// while recording and may be shorter than `output` (missing samples
    /// are recorded as silence). Long buffers are split into blocks of at
    /// most the configured size.
    pub fn render(&mut self, input: &[f32], output: &mut [f32]) {
        let mut done = 0;
        while done + 1 < output.len() {
            let frames = ((output.len() - done) / 2).min(self.max_block);
            let len = frames * 2;
            let chunk_in = input.get(done..).map_or(&[][..], |s| &s[..s.len().min(len)]);
            self.render_block(chunk_in, &mut output[done..done + len], frames);
            done += frames * 2;
        }
        // Odd trailing sample
        output[done..].fill(0.0);
    }

    /// Process one block.
    #[inline]
    fn render_block(&mut self, input: &[f32], output: &mut [f32], frames: usize) {
        self.updates.poll(&mut self.graph, self.block);
        self.block += 1;

        if let Some(ms) = self.shared.take_seek() {
            self.frame_pos = (ms * self.sample_rate as f64 / 1000.0) as u64;
        }

        match self.graph.as_mut() {
            Some(graph) if self.shared.is_rolling() => {
                graph.process(frames, self.frame_pos);
                interleave(graph.output(frames), frames, output);
                self.frame_pos += frames as u64;
            }
            _ => output.fill(0.0),
        }

        let pushed = match self.shared.enter_capture() {
            CAPTURE_RECORDING => {
                let len = input.len().min(output.len());
                self.capture.push(&input[..len]) && self.capture.push_silence(output.len() - len)
            }
            CAPTURE_EXPORTING => self.capture.push(output),
            _ => true,
        };
        self.shared.leave_capture();
        if !pushed {
            self.shared.count_overrun();
        }

        self.shared
            .publish_position(self.frame_pos as f64 * 1000.0 / self.sample_rate as f64);
        self.shared.block_done();
    }

    /// Current timeline position in frames.
    pub fn frame_position(&self) -> u64 {
        self.frame_pos
    }

    /// Generation of the live graph, if any.
    pub fn graph_generation(&self) -> Option<u64> {
        self.graph.as_ref().map(|g| g.generation())
    }

    #[cfg(test)]
    pub(crate) fn graph(&self) -> Option<&RenderGraph> {
        self.graph.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::capture_ring;
    use crate::graph::{ChannelLevels, RenderChannel};
    use crate::handoff::{GraphUpdate, UpdatePublisher, handoff};
    use crate::transport::TransportEngine;
    use std::path::PathBuf;

    fn renderer() -> (Renderer, UpdatePublisher, TransportEngine) {
        let shared = Arc::new(TransportShared::new());
        let (publisher, receiver) = handoff(4, shared.blocks_rendered.clone());
        let (sink, source) = capture_ring(1024, 16);
        let renderer = Renderer::new(receiver, shared.clone(), sink, 1000, 16);
        let transport = TransportEngine::new(shared, source, 1000, PathBuf::from("rec"));
        (renderer, publisher, transport)
    }

    fn master_only(generation: u64) -> Box<RenderGraph> {
        let levels = ChannelLevels {
            volume: 1.0,
            pan: 0.0,
            enabled: true,
        };
        let master = RenderChannel::new(0, None, levels, 16, false, true);
        Box::new(RenderGraph::new(generation, vec![master], 0, 1000, 16))
    }

    #[test]
    fn test_silence_without_graph() {
        let (mut r, _publisher, mut transport) = renderer();
        transport.start().unwrap();
        let mut out = vec![1.0; 33];
        r.render(&[], &mut out);
        assert!(out.iter().all(|s| *s == 0.0));
        assert_eq!(r.frame_position(), 0);
    }

    #[test]
    fn test_position_advances_only_while_rolling() {
        let (mut r, mut publisher, mut transport) = renderer();
        publisher.publish(GraphUpdate::Graph(master_only(1)));
        let mut out = vec![0.0; 40];
        r.render(&[], &mut out);
        assert_eq!(r.graph_generation(), Some(1));
        assert_eq!(r.frame_position(), 0);

        transport.start().unwrap();
        r.render(&[], &mut out);
        // 20 frames split into 16 + 4.
        assert_eq!(r.frame_position(), 20);
        assert_eq!(transport.blocks_rendered(), 4);
        assert_eq!(transport.get_playback_time(), 20.0);
        assert!(r.graph().is_some());
    }

    #[test]
    fn test_seek_applies_at_block_boundary() {
        let (mut r, mut publisher, mut transport) = renderer();
        publisher.publish(GraphUpdate::Graph(master_only(1)));
        transport.set_playback_time(500.0).unwrap();
        transport.start().unwrap();
        let mut out = vec![0.0; 8];
        r.render(&[], &mut out);
        assert_eq!(r.frame_position(), 504);
        assert_eq!(transport.get_playback_time(), 504.0);
    }

    #[test]
    fn test_recording_captures_input() {
        let (mut r, _publisher, mut transport) = renderer();
        transport.start_recording().unwrap();
        let input = [0.5_f32; 8];
        let mut out = vec![0.0; 12];
        r.render(&input, &mut out);
        assert_eq!(transport.pump(), 12);
        assert_eq!(transport.overruns(), 0);
    }
}
