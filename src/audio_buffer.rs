// src/audio_buffer.rs

/// Planar view over one block of audio: `[ch0 frames.., ch1 frames..]`.
#[derive(Debug)]
pub struct AudioBuffer<'a> {
    pub channels: usize,
    pub frames: usize,
    pub data: &'a mut [f32],
}

impl<'a> AudioBuffer<'a> {
    /// Wrap planar data holding `channels` channels.
    #[inline]
    pub fn new(data: &'a mut [f32], channels: usize) -> Self {
        let frames = data.len() / channels;
        Self {
            channels,
            frames,
            data,
        }
    }

    #[inline]
    pub fn clear(&mut self) {
        self.data.fill(0.0);
    }

    #[inline]
    pub fn channel(&self, ch: usize) -> &[f32] {
        let start = ch * self.frames;
        &self.data[start..start + self.frames]
    }

    #[inline]
    pub fn channel_mut(&mut self, ch: usize) -> &mut [f32] {
        let start = ch * self.frames;
        &mut self.data[start..start + self.frames]
    }

    /// Overwrite this buffer with `other`. Channel counts must match.
    #[inline]
    pub fn copy_from(&mut self, other: &AudioBuffer) {
        let len = self.data.len().min(other.data.len());
        self.data[..len].copy_from_slice(&other.data[..len]);
    }

    /// Peak absolute sample value across all channels.
    pub fn peak(&self) -> f32 {
        self.data.iter().fold(0.0_f32, |acc, s| acc.max(s.abs()))
    }
}

/// Add a planar stereo block into another with per-channel gains.
#[inline]
pub fn mix_into(dest: &mut [f32], src: &[f32], frames: usize, left_gain: f32, right_gain: f32) {
    let (dl, dr) = dest[..frames * 2].split_at_mut(frames);
    let (sl, sr) = src[..frames * 2].split_at(frames);
    for i in 0..frames {
        dl[i] += sl[i] * left_gain;
        dr[i] += sr[i] * right_gain;
    }
}

/// Interleave a planar stereo block into `out` (`[l0, r0, l1, r1, ..]`).
#[inline]
pub fn interleave(planar: &[f32], frames: usize, out: &mut [f32]) {
    let (left, right) = planar[..frames * 2].split_at(frames);
    for (i, frame) in out.chunks_exact_mut(2).take(frames).enumerate() {
        frame[0] = left[i];
        frame[1] = right[i];
    }
}
