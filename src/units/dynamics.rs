// src/units/dynamics.rs
//
// Gain and envelope-driven dynamics: gate and compressor.

use crate::audio_buffer::AudioBuffer;
use crate::unit::{AudioUnit, ParamMap, ProcessContext};

use super::apply_known;

// ═══════════════════════════════════════════════════════════════════
// Gain
// ═══════════════════════════════════════════════════════════════════

/// Static gain stage.
pub struct GainUnit {
    gain: f32,
}

impl GainUnit {
    pub fn new() -> Self {
        Self { gain: 1.0 }
    }
}

impl Default for GainUnit {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioUnit for GainUnit {
    fn prepare(&mut self, _sample_rate: f64, _max_block: usize) {}

    fn process(
        &mut self,
        ctx: &ProcessContext,
        input: &AudioBuffer,
        _sidechain: Option<&AudioBuffer>,
        output: &mut AudioBuffer,
    ) {
        for ch in 0..output.channels {
            let src = input.channel(ch.min(input.channels - 1));
            let dst = output.channel_mut(ch);
            for i in 0..ctx.frames {
                dst[i] = src[i] * self.gain;
            }
        }
    }

    fn parameters(&self) -> ParamMap {
        ParamMap::from([("gain".to_string(), self.gain)])
    }

    fn set_parameters(&mut self, params: &ParamMap) {
        apply_known(params, |key, value| {
            if key == "gain" {
                self.gain = value.max(0.0);
                true
            } else {
                false
            }
        });
    }
}

// ═══════════════════════════════════════════════════════════════════
// Envelope follower
// ═══════════════════════════════════════════════════════════════════

/// Peak follower with separate attack and decay times (ms).
#[derive(Debug, Clone, Copy)]
struct Envelope {
    level: f32,
    attack_coeff: f32,
    decay_coeff: f32,
}

impl Envelope {
    fn new() -> Self {
        Self {
            level: 0.0,
            attack_coeff: 0.0,
            decay_coeff: 0.0,
        }
    }

    fn configure(&mut self, attack_ms: f32, decay_ms: f32, sample_rate: f64) {
        self.attack_coeff = time_coeff(attack_ms, sample_rate);
        self.decay_coeff = time_coeff(decay_ms, sample_rate);
    }

    #[inline]
    fn follow(&mut self, input: f32) -> f32 {
        let coeff = if input > self.level {
            self.attack_coeff
        } else {
            self.decay_coeff
        };
        self.level = input + coeff * (self.level - input);
        self.level
    }
}

fn time_coeff(ms: f32, sample_rate: f64) -> f32 {
    if ms <= 0.0 {
        return 0.0;
    }
    let samples = ms as f64 * 0.001 * sample_rate;
    (-1.0 / samples).exp() as f32
}

/// Stereo peak of frame `i` in the detector buffer.
#[inline]
fn detector_level(buffer: &AudioBuffer, i: usize) -> f32 {
    let mut level = 0.0_f32;
    for ch in 0..buffer.channels {
        level = level.max(buffer.channel(ch)[i].abs());
    }
    level
}

// ═══════════════════════════════════════════════════════════════════
// Gate
// ═══════════════════════════════════════════════════════════════════

/// Noise gate: attenuates to `floor` while the envelope is below `threshold`.
pub struct GateUnit {
    threshold: f32,
    attack: f32,
    decay: f32,
    floor: f32,

    envelope: Envelope,
    sample_rate: f64,
}

impl GateUnit {
    pub fn new() -> Self {
        let mut gate = Self {
            threshold: 0.05,
            attack: 1.0,
            decay: 80.0,
            floor: 0.0,
            envelope: Envelope::new(),
            sample_rate: 48_000.0,
        };
        gate.envelope
            .configure(gate.attack, gate.decay, gate.sample_rate);
        gate
    }
}

impl Default for GateUnit {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioUnit for GateUnit {
    fn prepare(&mut self, sample_rate: f64, _max_block: usize) {
        self.sample_rate = sample_rate;
        self.envelope
            .configure(self.attack, self.decay, self.sample_rate);
    }

    fn process(
        &mut self,
        ctx: &ProcessContext,
        input: &AudioBuffer,
        _sidechain: Option<&AudioBuffer>,
        output: &mut AudioBuffer,
    ) {
        for i in 0..ctx.frames {
            let level = self.envelope.follow(detector_level(input, i));
            let gain = if level >= self.threshold { 1.0 } else { self.floor };
            for ch in 0..output.channels {
                let s = input.channel(ch.min(input.channels - 1))[i];
                output.channel_mut(ch)[i] = s * gain;
            }
        }
    }

    fn parameters(&self) -> ParamMap {
        ParamMap::from([
            ("threshold".to_string(), self.threshold),
            ("attack".to_string(), self.attack),
            ("decay".to_string(), self.decay),
            ("floor".to_string(), self.floor),
        ])
    }

    fn set_parameters(&mut self, params: &ParamMap) {
        apply_known(params, |key, value| {
            match key {
                "threshold" => self.threshold = value.max(0.0),
                "attack" => self.attack = value.max(0.0),
                "decay" => self.decay = value.max(0.0),
                "floor" => self.floor = value.clamp(0.0, 1.0),
                _ => return false,
            }
            true
        });
        self.envelope
            .configure(self.attack, self.decay, self.sample_rate);
    }

    fn reset(&mut self) {
        self.envelope.level = 0.0;
    }
}

// ═══════════════════════════════════════════════════════════════════
// Compressor
// ═══════════════════════════════════════════════════════════════════

/// Downward compressor.
///
/// The detector listens to the sidechain input when one is routed to the
/// chain, otherwise to the unit's own input.
pub struct CompressorUnit {
    threshold: f32,
    ratio: f32,
    attack: f32,
    decay: f32,

    envelope: Envelope,
    sample_rate: f64,
}

impl CompressorUnit {
    pub fn new() -> Self {
        let mut comp = Self {
            threshold: 0.5,
            ratio: 4.0,
            attack: 5.0,
            decay: 150.0,
            envelope: Envelope::new(),
            sample_rate: 48_000.0,
        };
        comp.envelope
            .configure(comp.attack, comp.decay, comp.sample_rate);
        comp
    }

    #[inline]
    fn gain_for(&self, level: f32) -> f32 {
        if level <= self.threshold || level <= 0.0 {
            1.0
        } else {
            (self.threshold + (level - self.threshold) / self.ratio) / level
        }
    }
}

impl Default for CompressorUnit {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioUnit for CompressorUnit {
    fn prepare(&mut self, sample_rate: f64, _max_block: usize) {
        self.sample_rate = sample_rate;
        self.envelope
            .configure(self.attack, self.decay, self.sample_rate);
    }

    fn process(
        &mut self,
        ctx: &ProcessContext,
        input: &AudioBuffer,
        sidechain: Option<&AudioBuffer>,
        output: &mut AudioBuffer,
    ) {
        let detector = sidechain.unwrap_or(input);
        for i in 0..ctx.frames {
            let level = self.envelope.follow(detector_level(detector, i));
            let gain = self.gain_for(level);
            for ch in 0..output.channels {
                let s = input.channel(ch.min(input.channels - 1))[i];
                output.channel_mut(ch)[i] = s * gain;
            }
        }
    }

    fn parameters(&self) -> ParamMap {
        ParamMap::from([
            ("threshold".to_string(), self.threshold),
            ("ratio".to_string(), self.ratio),
            ("attack".to_string(), self.attack),
            ("decay".to_string(), self.decay),
        ])
    }

    fn set_parameters(&mut self, params: &ParamMap) {
        apply_known(params, |key, value| {
            match key {
                "threshold" => self.threshold = value.max(0.0),
                "ratio" => self.ratio = value.max(1.0),
                "attack" => self.attack = value.max(0.0),
                "decay" => self.decay = value.max(0.0),
                _ => return false,
            }
            true
        });
        self.envelope
            .configure(self.attack, self.decay, self.sample_rate);
    }

    fn uses_sidechain(&self) -> bool {
        true
    }

    fn reset(&mut self) {
        self.envelope.level = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FRAMES: usize = 2048;

    fn run(
        unit: &mut dyn AudioUnit,
        input_value: f32,
        sidechain_value: Option<f32>,
    ) -> Vec<f32> {
        unit.prepare(48_000.0, FRAMES);
        let mut input_data = vec![input_value; FRAMES * 2];
        let mut side_data = vec![sidechain_value.unwrap_or(0.0); FRAMES * 2];
        let mut output_data = vec![0.0; FRAMES * 2];
        let input = AudioBuffer::new(&mut input_data, 2);
        let side = AudioBuffer::new(&mut side_data, 2);
        let mut output = AudioBuffer::new(&mut output_data, 2);
        unit.process(
            &ProcessContext::new(FRAMES, 48_000.0, 0),
            &input,
            sidechain_value.map(|_| &side),
            &mut output,
        );
        output_data
    }

    #[test]
    fn test_gain_scales() {
        let mut gain = GainUnit::new();
        gain.set_parameters(&ParamMap::from([("gain".to_string(), 0.5)]));
        let out = run(&mut gain, 0.8, None);
        assert!((out[10] - 0.4).abs() < 1e-6);
    }

    #[test]
    fn test_gate_closes_below_threshold() {
        let mut gate = GateUnit::new();
        let quiet = run(&mut gate, 0.01, None);
        assert_eq!(quiet[FRAMES - 1], 0.0);

        let mut gate = GateUnit::new();
        let loud = run(&mut gate, 0.5, None);
        assert_eq!(loud[FRAMES - 1], 0.5);
    }

    #[test]
    fn test_compressor_reduces_loud_input() {
        let mut comp = CompressorUnit::new();
        let out = run(&mut comp, 1.0, None);
        // Settled gain: (0.5 + 0.5 / 4) / 1.0
        assert!((out[FRAMES - 1] - 0.625).abs() < 0.05);
    }

    #[test]
    fn test_compressor_ducks_from_sidechain() {
        let mut comp = CompressorUnit::new();
        let quiet_key = run(&mut comp, 0.2, Some(0.0));
        assert!((quiet_key[FRAMES - 1] - 0.2).abs() < 1e-6);

        let mut comp = CompressorUnit::new();
        let loud_key = run(&mut comp, 0.2, Some(1.0));
        assert!(loud_key[FRAMES - 1] < 0.15);
        assert!(comp.uses_sidechain());
    }
}
