//! Render graph: the immutable-topology snapshot the render pass runs.
//!
//! Channels are stored in topological order with preallocated buffers, so
//! processing a block is a single forward sweep that never allocates.

use std::sync::Arc;

use crate::audio_buffer::mix_into;
use crate::chain::ChainInstance;
use crate::state::{ChannelId, DecodedAudio};
use crate::unit::ProcessContext;

// ═══════════════════════════════════════════════════════════════════
// Clip schedule
// ═══════════════════════════════════════════════════════════════════

/// A content-bound part resolved to frames on one graph channel.
#[derive(Debug, Clone)]
pub(crate) struct ScheduledClip {
    /// Index of the channel in the graph it was resolved against.
    pub channel: usize,
    pub start_frame: u64,
    pub end_frame: u64,
    /// In-point inside the audio, in output-rate frames.
    pub offset_frame: u64,
    pub audio: Arc<DecodedAudio>,
}

/// Every clip to play, tagged with the graph generation it targets.
#[derive(Debug, Clone, Default)]
pub(crate) struct ClipSchedule {
    generation: u64,
    clips: Vec<ScheduledClip>,
}

impl ClipSchedule {
    pub(crate) fn new(generation: u64, clips: Vec<ScheduledClip>) -> Self {
        Self { generation, clips }
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn len(&self) -> usize {
        self.clips.len()
    }
}

// ═══════════════════════════════════════════════════════════════════
// Channels
// ═══════════════════════════════════════════════════════════════════

/// Fader state of one channel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct ChannelLevels {
    pub volume: f32,
    pub pan: f32,
    pub enabled: bool,
}

impl ChannelLevels {
    /// Constant-power pan gains including volume.
    fn gains(&self) -> (f32, f32) {
        let angle = (self.pan + 1.0) * std::f32::consts::FRAC_PI_4;
        (angle.cos() * self.volume, angle.sin() * self.volume)
    }
}

/// One mixer channel inside the render graph.
pub(crate) struct RenderChannel {
    pub id: ChannelId,
    chain: Option<ChainInstance>,
    levels: ChannelLevels,
    left_gain: f32,
    right_gain: f32,

    /// Graph indices fed with this channel's audio (always after it).
    destinations: Vec<usize>,

    /// Sidechained channels keyed on this one.
    detectors: Vec<usize>,

    /// Planar stereo mix of everything routed here, processed in place.
    input: Vec<f32>,

    /// Detector signal, present on sidechained channels only.
    sidechain_in: Option<Vec<f32>>,

    is_master: bool,
}

impl RenderChannel {
    pub(crate) fn new(
        id: ChannelId,
        chain: Option<ChainInstance>,
        levels: ChannelLevels,
        max_block: usize,
        has_sidechain: bool,
        is_master: bool,
    ) -> Self {
        let (left_gain, right_gain) = levels.gains();
        Self {
            id,
            chain,
            levels,
            left_gain,
            right_gain,
            destinations: Vec::new(),
            detectors: Vec::new(),
            input: vec![0.0; max_block * 2],
            sidechain_in: has_sidechain.then(|| vec![0.0; max_block * 2]),
            is_master,
        }
    }

    pub(crate) fn connect(&mut self, dest: usize) {
        if !self.destinations.contains(&dest) {
            self.destinations.push(dest);
        }
    }

    pub(crate) fn connect_detector(&mut self, dest: usize) {
        if !self.detectors.contains(&dest) {
            self.detectors.push(dest);
        }
    }

    fn set_levels(&mut self, levels: ChannelLevels) {
        self.levels = levels;
        let (l, r) = levels.gains();
        self.left_gain = l;
        self.right_gain = r;
    }
}

// ═══════════════════════════════════════════════════════════════════
// Graph
// ═══════════════════════════════════════════════════════════════════

/// Compiled mixer graph plus the clips it plays.
pub struct RenderGraph {
    generation: u64,
    channels: Vec<RenderChannel>,
    master: usize,
    schedule: ClipSchedule,
    sample_rate: u32,
    max_block: usize,

    /// Planar stereo master output of the last block.
    output: Vec<f32>,
}

impl RenderGraph {
    pub(crate) fn new(
        generation: u64,
        channels: Vec<RenderChannel>,
        master: usize,
        sample_rate: u32,
        max_block: usize,
    ) -> Self {
        Self {
            generation,
            channels,
            master,
            schedule: ClipSchedule::new(generation, Vec::new()),
            sample_rate,
            max_block,
            output: vec![0.0; max_block * 2],
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Position of the master in processing order.
    pub fn master_index(&self) -> usize {
        self.master
    }

    /// Mixer channel ids in processing order.
    pub fn channel_ids(&self) -> impl Iterator<Item = ChannelId> + '_ {
        self.channels.iter().map(|c| c.id)
    }

    pub fn scheduled_clips(&self) -> usize {
        self.schedule.len()
    }

    /// Swap in a new schedule, returning the old one.
    pub(crate) fn replace_schedule(&mut self, schedule: ClipSchedule) -> ClipSchedule {
        std::mem::replace(&mut self.schedule, schedule)
    }

    /// Overwrite fader state, indexed like the graph's channels.
    pub(crate) fn apply_levels(&mut self, levels: &[ChannelLevels]) {
        for (channel, levels) in self.channels.iter_mut().zip(levels) {
            channel.set_levels(*levels);
        }
    }

    #[cfg(test)]
    pub(crate) fn levels(&self, index: usize) -> Option<ChannelLevels> {
        self.channels.get(index).map(|c| c.levels)
    }

    /// Planar stereo output of the last processed block.
    pub(crate) fn output(&self, frames: usize) -> &[f32] {
        &self.output[..frames * 2]
    }

    /// Render one block starting at timeline frame `frame_pos`.
    pub(crate) fn process(&mut self, frames: usize, frame_pos: u64) {
        let frames = frames.min(self.max_block);
        let len = frames * 2;
        let ctx = ProcessContext::new(frames, self.sample_rate as f64, frame_pos);

        for channel in &mut self.channels {
            channel.input[..len].fill(0.0);
            if let Some(side) = channel.sidechain_in.as_mut() {
                side[..len].fill(0.0);
            }
        }
        self.output[..len].fill(0.0);

        self.mix_clips(frames, frame_pos);

        for i in 0..self.channels.len() {
            let (head, tail) = self.channels.split_at_mut(i + 1);
            let channel = &mut head[i];

            if let Some(chain) = channel.chain.as_mut() {
                chain.process(
                    &ctx,
                    &mut channel.input,
                    channel.sidechain_in.as_deref_mut(),
                );
            }

            // Detection runs even while the channel is disabled.
            for &d in &channel.detectors {
                let Some(dest) = d.checked_sub(i + 1).and_then(|k| tail.get_mut(k)) else {
                    continue;
                };
                if let Some(side) = dest.sidechain_in.as_mut() {
                    let gain = channel.levels.volume;
                    mix_into(side, &channel.input, frames, gain, gain);
                }
            }

            if !channel.levels.enabled {
                continue;
            }
            if channel.is_master {
                mix_into(
                    &mut self.output,
                    &channel.input,
                    frames,
                    channel.left_gain,
                    channel.right_gain,
                );
                continue;
            }
            for &d in &channel.destinations {
                if let Some(dest) = d.checked_sub(i + 1).and_then(|k| tail.get_mut(k)) {
                    mix_into(
                        &mut dest.input,
                        &channel.input,
                        frames,
                        channel.left_gain,
                        channel.right_gain,
                    );
                }
            }
        }
    }

    /// Add scheduled clip audio into channel inputs.
    fn mix_clips(&mut self, frames: usize, frame_pos: u64) {
        let block_end = frame_pos + frames as u64;
        let out_rate = self.sample_rate.max(1) as u64;

        for clip in &self.schedule.clips {
            if clip.start_frame >= block_end {
                break;
            }
            if clip.end_frame <= frame_pos {
                continue;
            }
            let Some(channel) = self.channels.get_mut(clip.channel) else {
                continue;
            };
            let audio = &clip.audio;
            let src_channels = audio.channels.max(1);
            let src_frames = audio.frames() as u64;
            let src_rate = audio.sample_rate as u64;

            let from = clip.start_frame.max(frame_pos);
            let to = clip.end_frame.min(block_end);
            let (left, right) = channel.input[..frames * 2].split_at_mut(frames);
            for f in from..to {
                let local = f - clip.start_frame + clip.offset_frame;
                let src = local * src_rate / out_rate;
                if src >= src_frames {
                    break;
                }
                let base = src as usize * src_channels;
                let l = audio.samples[base];
                let r = if src_channels > 1 {
                    audio.samples[base + 1]
                } else {
                    l
                };
                let i = (f - frame_pos) as usize;
                left[i] += l;
                right[i] += r;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const UNITY: ChannelLevels = ChannelLevels {
        volume: 1.0,
        pan: 0.0,
        enabled: true,
    };

    fn tone(value: f32, frames: usize) -> Arc<DecodedAudio> {
        Arc::new(DecodedAudio {
            sample_rate: 1000,
            channels: 1,
            samples: vec![value; frames],
        })
    }

    /// source -> master, no chains.
    fn two_channel_graph(levels: ChannelLevels) -> RenderGraph {
        let mut source = RenderChannel::new(1, None, levels, 8, false, false);
        source.connect(1);
        let master = RenderChannel::new(0, None, UNITY, 8, false, true);
        RenderGraph::new(1, vec![source, master], 1, 1000, 8)
    }

    #[test]
    fn test_clip_reaches_master_with_pan_law() {
        let mut graph = two_channel_graph(UNITY);
        graph.replace_schedule(ClipSchedule::new(
            1,
            vec![ScheduledClip {
                channel: 0,
                start_frame: 2,
                end_frame: 6,
                offset_frame: 0,
                audio: tone(1.0, 100),
            }],
        ));
        graph.process(8, 0);
        let out = graph.output(8);
        let centre = std::f32::consts::FRAC_PI_4.cos();
        let expected = centre * centre;
        assert_eq!(out[0], 0.0);
        assert!((out[2] - expected).abs() < 1e-6);
        assert!((out[5] - expected).abs() < 1e-6);
        assert_eq!(out[6], 0.0);
        // Right channel mirrors the left at centre pan.
        assert!((out[8 + 3] - expected).abs() < 1e-6);
    }

    #[test]
    fn test_disabled_channel_is_silent() {
        let mut graph = two_channel_graph(ChannelLevels {
            enabled: false,
            ..UNITY
        });
        graph.replace_schedule(ClipSchedule::new(
            1,
            vec![ScheduledClip {
                channel: 0,
                start_frame: 0,
                end_frame: 8,
                offset_frame: 0,
                audio: tone(1.0, 100),
            }],
        ));
        graph.process(8, 0);
        assert!(graph.output(8).iter().all(|s| *s == 0.0));

        graph.apply_levels(&[UNITY, UNITY]);
        graph.process(8, 0);
        assert!(graph.output(8).iter().any(|s| *s != 0.0));
    }

    #[test]
    fn test_disabled_master_silences_output() {
        let mut graph = two_channel_graph(UNITY);
        graph.replace_schedule(ClipSchedule::new(
            1,
            vec![ScheduledClip {
                channel: 0,
                start_frame: 0,
                end_frame: 8,
                offset_frame: 0,
                audio: tone(1.0, 100),
            }],
        ));
        let master_off = ChannelLevels {
            enabled: false,
            ..UNITY
        };
        graph.apply_levels(&[UNITY, master_off]);
        graph.process(8, 0);
        assert!(graph.output(8).iter().all(|s| *s == 0.0));

        graph.apply_levels(&[UNITY, UNITY]);
        graph.process(8, 0);
        assert!(graph.output(8).iter().any(|s| *s != 0.0));
    }

    #[test]
    fn test_content_offset_and_end() {
        let mut graph = two_channel_graph(ChannelLevels { pan: -1.0, ..UNITY });
        let audio = Arc::new(DecodedAudio {
            sample_rate: 1000,
            channels: 1,
            samples: (0..6).map(|i| i as f32).collect(),
        });
        graph.replace_schedule(ClipSchedule::new(
            1,
            vec![ScheduledClip {
                channel: 0,
                start_frame: 0,
                end_frame: 8,
                offset_frame: 3,
                audio,
            }],
        ));
        graph.process(8, 0);
        let out = graph.output(8);
        // Hard left at unity: cos(0) * master centre gain.
        let centre = std::f32::consts::FRAC_PI_4.cos();
        assert!((out[0] - 3.0 * centre).abs() < 1e-5);
        assert!((out[2] - 5.0 * centre).abs() < 1e-5);
        // Audio ran out after three frames.
        assert_eq!(out[3], 0.0);
    }
}
