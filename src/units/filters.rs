// src/units/filters.rs
//
// Filter units using State Variable Filter (SVF) topology.
// One filter state per stereo channel.

use crate::audio_buffer::AudioBuffer;
use crate::unit::{AudioUnit, ParamMap, ProcessContext};

use super::apply_known;

/// Filter response of an [`SvfFilter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterType {
    Lowpass,
    Highpass,
}

#[derive(Debug, Clone, Copy, Default)]
struct SvfState {
    ic1eq: f32,
    ic2eq: f32,
}

/// Stereo state variable filter.
pub struct SvfFilter {
    filter_type: FilterType,
    cutoff: f32,
    resonance: f32,

    state: [SvfState; 2],

    // Cached coefficients
    g: f32,
    k: f32,
    a1: f32,
    a2: f32,
    a3: f32,

    sample_rate: f64,
}

impl SvfFilter {
    pub fn new(filter_type: FilterType) -> Self {
        let cutoff = match filter_type {
            FilterType::Lowpass => 8_000.0,
            FilterType::Highpass => 100.0,
        };
        let mut filter = Self {
            filter_type,
            cutoff,
            resonance: 0.1,
            state: [SvfState::default(); 2],
            g: 0.0,
            k: 0.0,
            a1: 0.0,
            a2: 0.0,
            a3: 0.0,
            sample_rate: 48_000.0,
        };
        filter.recalc_coeffs();
        filter
    }

    pub fn lowpass() -> Self {
        Self::new(FilterType::Lowpass)
    }

    pub fn highpass() -> Self {
        Self::new(FilterType::Highpass)
    }

    fn recalc_coeffs(&mut self) {
        // Clamp cutoff to valid range
        let nyquist_guard = (self.sample_rate as f32 * 0.49).max(20.0);
        let cutoff = self.cutoff.clamp(20.0, nyquist_guard);

        // Resonance clamped to prevent self-oscillation issues
        let resonance = self.resonance.clamp(0.0, 0.99);

        self.g = (std::f32::consts::PI * cutoff / self.sample_rate as f32).tan();
        self.k = 2.0 - 2.0 * resonance;
        self.a1 = 1.0 / (1.0 + self.g * (self.g + self.k));
        self.a2 = self.g * self.a1;
        self.a3 = self.g * self.a2;
    }

    #[inline]
    fn process_sample(&mut self, ch: usize, input: f32) -> f32 {
        let s = &mut self.state[ch];
        let v3 = input - s.ic2eq;
        let v1 = self.a1 * s.ic1eq + self.a2 * v3;
        let v2 = s.ic2eq + self.a2 * s.ic1eq + self.a3 * v3;

        s.ic1eq = 2.0 * v1 - s.ic1eq;
        s.ic2eq = 2.0 * v2 - s.ic2eq;

        match self.filter_type {
            FilterType::Lowpass => v2,
            FilterType::Highpass => input - self.k * v1 - v2,
        }
    }
}

impl AudioUnit for SvfFilter {
    fn prepare(&mut self, sample_rate: f64, _max_block: usize) {
        self.sample_rate = sample_rate;
        self.recalc_coeffs();
    }

    fn process(
        &mut self,
        ctx: &ProcessContext,
        input: &AudioBuffer,
        _sidechain: Option<&AudioBuffer>,
        output: &mut AudioBuffer,
    ) {
        for ch in 0..output.channels.min(2) {
            let src = input.channel(ch.min(input.channels - 1));
            for i in 0..ctx.frames {
                let y = self.process_sample(ch, src[i]);
                output.channel_mut(ch)[i] = y;
            }
        }
    }

    fn parameters(&self) -> ParamMap {
        ParamMap::from([
            ("cutoff".to_string(), self.cutoff),
            ("resonance".to_string(), self.resonance),
        ])
    }

    fn set_parameters(&mut self, params: &ParamMap) {
        apply_known(params, |key, value| match key {
            "cutoff" => {
                self.cutoff = value;
                true
            }
            "resonance" => {
                self.resonance = value;
                true
            }
            _ => false,
        });
        self.recalc_coeffs();
    }

    fn reset(&mut self) {
        self.state = [SvfState::default(); 2];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(filter: &mut SvfFilter, value: f32, frames: usize) -> Vec<f32> {
        let mut input_data = vec![value; frames * 2];
        let mut output_data = vec![0.0; frames * 2];
        let input = AudioBuffer::new(&mut input_data, 2);
        let mut output = AudioBuffer::new(&mut output_data, 2);
        filter.process(
            &ProcessContext::new(frames, 48_000.0, 0),
            &input,
            None,
            &mut output,
        );
        output_data
    }

    #[test]
    fn test_highpass_blocks_dc() {
        let mut filter = SvfFilter::highpass();
        filter.prepare(48_000.0, 4096);
        let out = run(&mut filter, 1.0, 4096);
        assert!(out[4095].abs() < 0.01);
    }

    #[test]
    fn test_lowpass_passes_dc() {
        let mut filter = SvfFilter::lowpass();
        filter.prepare(48_000.0, 4096);
        let out = run(&mut filter, 1.0, 4096);
        assert!((out[4095] - 1.0).abs() < 0.01);
    }

    #[test]
    fn test_unknown_parameters_are_ignored() {
        let mut filter = SvfFilter::lowpass();
        filter.set_parameters(&ParamMap::from([
            ("cutoff".to_string(), 500.0),
            ("wobble".to_string(), 3.0),
        ]));
        let params = filter.parameters();
        assert_eq!(params.len(), 2);
        assert_eq!(params["cutoff"], 500.0);
    }
}
