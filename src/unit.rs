// src/unit.rs

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::audio_buffer::AudioBuffer;

/// Named parameter values of one unit.
pub type ParamMap = BTreeMap<String, f32>;

/// The closed set of processing unit kinds.
///
/// Implementations are supplied by factories registered in a
/// [`UnitRegistry`](crate::unit_factory::UnitRegistry).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum UnitKind {
    LowPass,
    HighPass,
    Gate,
    Compressor,
    Reverb,
    Gain,
}

impl UnitKind {
    /// Default parameter values. The key set is the unit's full parameter set.
    pub fn default_parameters(self) -> ParamMap {
        let pairs: &[(&str, f32)] = match self {
            UnitKind::LowPass => &[("cutoff", 8_000.0), ("resonance", 0.1)],
            UnitKind::HighPass => &[("cutoff", 100.0), ("resonance", 0.1)],
            UnitKind::Gate => &[
                ("threshold", 0.05),
                ("attack", 1.0),
                ("decay", 80.0),
                ("floor", 0.0),
            ],
            UnitKind::Compressor => &[
                ("threshold", 0.5),
                ("ratio", 4.0),
                ("attack", 5.0),
                ("decay", 150.0),
            ],
            UnitKind::Reverb => &[("decay", 0.5), ("damping", 0.5), ("mix", 0.3)],
            UnitKind::Gain => &[("gain", 1.0)],
        };
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }
}

/// Context passed to units during processing.
#[derive(Debug, Clone, Copy)]
pub struct ProcessContext {
    /// Number of frames to process
    pub frames: usize,

    /// Sample rate
    pub sample_rate: f64,

    /// Timeline position of the first frame, in frames
    pub frame_pos: u64,
}

impl ProcessContext {
    pub fn new(frames: usize, sample_rate: f64, frame_pos: u64) -> Self {
        Self {
            frames,
            sample_rate,
            frame_pos,
        }
    }
}

/// Black-box block processor.
///
/// Units:
/// - do NOT allocate in `process`
/// - do NOT know about the timeline or routing
/// - ONLY transform `input` into `output` for the given context
pub trait AudioUnit: Send {
    /// Called once before the unit is handed to the render pass.
    fn prepare(&mut self, sample_rate: f64, max_block: usize);

    /// Process one stereo block.
    ///
    /// `sidechain` carries the detector signal for units that consume one;
    /// it is `None` when the chain has no sidechain input.
    fn process(
        &mut self,
        ctx: &ProcessContext,
        input: &AudioBuffer,
        sidechain: Option<&AudioBuffer>,
        output: &mut AudioBuffer,
    );

    /// Current parameter values.
    fn parameters(&self) -> ParamMap;

    /// Update the parameters named in `params`. Unknown keys are ignored.
    fn set_parameters(&mut self, params: &ParamMap);

    /// Whether this unit reads the chain's sidechain input.
    fn uses_sidechain(&self) -> bool {
        false
    }

    /// Clear internal state (delay lines, envelopes).
    fn reset(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_kind_has_parameters() {
        for kind in [
            UnitKind::LowPass,
            UnitKind::HighPass,
            UnitKind::Gate,
            UnitKind::Compressor,
            UnitKind::Reverb,
            UnitKind::Gain,
        ] {
            assert!(!kind.default_parameters().is_empty(), "{kind:?}");
        }
    }

    #[test]
    fn test_kind_serializes_as_tag() {
        let json = serde_json::to_string(&UnitKind::HighPass).unwrap();
        assert_eq!(json, "\"HighPass\"");
    }
}
