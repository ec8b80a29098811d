// src/units/reverb.rs
//
// Simple Schroeder reverb: 4 parallel damped combs into 2 series allpasses.

use crate::audio_buffer::AudioBuffer;
use crate::unit::{AudioUnit, ParamMap, ProcessContext};

use super::apply_known;

// Delay times in samples at 48kHz, scaled to the prepared rate.
const COMB_DELAYS: [usize; 4] = [1557, 1617, 1491, 1422];
const ALLPASS_DELAYS: [usize; 2] = [225, 556];
const ALLPASS_GAIN: f32 = 0.5;

/// One fixed-length delay line with a write cursor.
struct DelayLine {
    buffer: Vec<f32>,
    delay: usize,
    pos: usize,
}

impl DelayLine {
    fn new(delay: usize) -> Self {
        Self {
            buffer: vec![0.0; delay.max(1) + 1],
            delay: delay.max(1),
            pos: 0,
        }
    }

    #[inline]
    fn read(&self) -> f32 {
        let len = self.buffer.len();
        self.buffer[(self.pos + len - self.delay) % len]
    }

    #[inline]
    fn write(&mut self, value: f32) {
        self.buffer[self.pos] = value;
        self.pos = (self.pos + 1) % self.buffer.len();
    }
}

/// Stereo-in, shared-tail reverb.
///
/// Both channels feed one mono tail; each output keeps its own dry signal.
pub struct ReverbUnit {
    decay: f32,
    damping: f32,
    mix: f32,

    combs: Vec<DelayLine>,
    comb_filter: [f32; 4],
    allpasses: Vec<DelayLine>,
}

impl ReverbUnit {
    pub fn new() -> Self {
        let mut unit = Self {
            decay: 0.5,
            damping: 0.5,
            mix: 0.3,
            combs: Vec::new(),
            comb_filter: [0.0; 4],
            allpasses: Vec::new(),
        };
        unit.allocate(48_000.0);
        unit
    }

    fn allocate(&mut self, sample_rate: f64) {
        let scale = |base: usize| (base as f64 * sample_rate / 48_000.0) as usize;
        self.combs = COMB_DELAYS.iter().map(|&d| DelayLine::new(scale(d))).collect();
        self.allpasses = ALLPASS_DELAYS
            .iter()
            .map(|&d| DelayLine::new(scale(d)))
            .collect();
        self.comb_filter = [0.0; 4];
    }

    #[inline]
    fn tail(&mut self, input: f32) -> f32 {
        let mut wet = 0.0_f32;
        for (c, comb) in self.combs.iter_mut().enumerate() {
            let delayed = comb.read();
            // Low-pass filtered feedback for damping
            self.comb_filter[c] =
                delayed * (1.0 - self.damping) + self.comb_filter[c] * self.damping;
            comb.write(input + self.comb_filter[c] * self.decay);
            wet += delayed;
        }
        wet *= 0.25;

        for allpass in &mut self.allpasses {
            let delayed = allpass.read();
            let out = -ALLPASS_GAIN * wet + delayed;
            allpass.write(wet + ALLPASS_GAIN * delayed);
            wet = out;
        }
        wet
    }
}

impl Default for ReverbUnit {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioUnit for ReverbUnit {
    fn prepare(&mut self, sample_rate: f64, _max_block: usize) {
        self.allocate(sample_rate);
    }

    fn process(
        &mut self,
        ctx: &ProcessContext,
        input: &AudioBuffer,
        _sidechain: Option<&AudioBuffer>,
        output: &mut AudioBuffer,
    ) {
        let right_ch = if input.channels > 1 { 1 } else { 0 };
        for i in 0..ctx.frames {
            let dry_l = input.channel(0)[i];
            let dry_r = input.channel(right_ch)[i];
            let wet = self.tail((dry_l + dry_r) * 0.5);

            output.channel_mut(0)[i] = dry_l * (1.0 - self.mix) + wet * self.mix;
            if output.channels > 1 {
                output.channel_mut(1)[i] = dry_r * (1.0 - self.mix) + wet * self.mix;
            }
        }
    }

    fn parameters(&self) -> ParamMap {
        ParamMap::from([
            ("decay".to_string(), self.decay),
            ("damping".to_string(), self.damping),
            ("mix".to_string(), self.mix),
        ])
    }

    fn set_parameters(&mut self, params: &ParamMap) {
        apply_known(params, |key, value| {
            match key {
                "decay" => self.decay = value.clamp(0.0, 0.99),
                "damping" => self.damping = value.clamp(0.0, 1.0),
                "mix" => self.mix = value.clamp(0.0, 1.0),
                _ => return false,
            }
            true
        });
    }

    fn reset(&mut self) {
        for line in self.combs.iter_mut().chain(self.allpasses.iter_mut()) {
            line.buffer.fill(0.0);
        }
        self.comb_filter = [0.0; 4];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_impulse_produces_a_tail() {
        let mut reverb = ReverbUnit::new();
        reverb.prepare(48_000.0, 4096);
        let frames = 4096;
        let mut input_data = vec![0.0; frames * 2];
        input_data[0] = 1.0;
        input_data[frames] = 1.0;
        let mut output_data = vec![0.0; frames * 2];
        let input = AudioBuffer::new(&mut input_data, 2);
        let mut output = AudioBuffer::new(&mut output_data, 2);
        reverb.process(
            &ProcessContext::new(frames, 48_000.0, 0),
            &input,
            None,
            &mut output,
        );

        // Tail energy after the shortest comb delay
        let tail: f32 = output.channel(0)[1500..].iter().map(|s| s.abs()).sum();
        assert!(tail > 0.0);
        assert_eq!(output.channel(0)[1500..], output.channel(1)[1500..]);
    }

    #[test]
    fn test_mix_is_clamped() {
        let mut reverb = ReverbUnit::new();
        reverb.set_parameters(&ParamMap::from([("mix".to_string(), 3.0)]));
        assert_eq!(reverb.parameters()["mix"], 1.0);
    }
}
