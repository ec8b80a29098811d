// src/units/mod.rs
//
// Standard processing units.

mod dynamics;
mod filters;
mod reverb;

pub use dynamics::*;
pub use filters::*;
pub use reverb::*;

use crate::unit::UnitKind;
use crate::unit_factory::{SimpleUnitFactory, UnitRegistry};

// ═══════════════════════════════════════════════════════════════════
// Registry Population
// ═══════════════════════════════════════════════════════════════════

/// Populate the registry with all standard unit kinds.
pub fn register_standard_units(registry: &mut UnitRegistry) {
    registry.register(
        UnitKind::LowPass,
        SimpleUnitFactory::new(|| Box::new(SvfFilter::lowpass())),
    );
    registry.register(
        UnitKind::HighPass,
        SimpleUnitFactory::new(|| Box::new(SvfFilter::highpass())),
    );
    registry.register(
        UnitKind::Gate,
        SimpleUnitFactory::new(|| Box::new(GateUnit::new())),
    );
    registry.register(
        UnitKind::Compressor,
        SimpleUnitFactory::new(|| Box::new(CompressorUnit::new())),
    );
    registry.register(
        UnitKind::Reverb,
        SimpleUnitFactory::new(|| Box::new(ReverbUnit::new())),
    );
    registry.register(
        UnitKind::Gain,
        SimpleUnitFactory::new(|| Box::new(GainUnit::new())),
    );
}

/// Registry with every standard unit already registered.
pub fn standard_registry() -> UnitRegistry {
    let mut registry = UnitRegistry::new();
    register_standard_units(&mut registry);
    registry
}

/// Apply the entries of `params` that name a known parameter.
///
/// Shared by the unit implementations so each one only lists its keys.
pub(crate) fn apply_known<F>(params: &crate::unit::ParamMap, mut set: F)
where
    F: FnMut(&str, f32) -> bool,
{
    for (key, &value) in params {
        if value.is_finite() && !set(key, value) {
            log::trace!("ignoring unknown unit parameter '{key}'");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio_buffer::AudioBuffer;
    use crate::unit::ProcessContext;

    #[test]
    fn test_standard_registry_covers_every_kind() {
        let registry = standard_registry();
        for kind in [
            UnitKind::LowPass,
            UnitKind::HighPass,
            UnitKind::Gate,
            UnitKind::Compressor,
            UnitKind::Reverb,
            UnitKind::Gain,
        ] {
            let unit = registry.create(kind).unwrap();
            let defaults = kind.default_parameters();
            assert_eq!(
                unit.parameters().keys().collect::<Vec<_>>(),
                defaults.keys().collect::<Vec<_>>(),
                "{kind:?}"
            );
        }
    }

    #[test]
    fn test_units_produce_finite_output() {
        let registry = standard_registry();
        let frames = 64;
        for kind in [
            UnitKind::LowPass,
            UnitKind::HighPass,
            UnitKind::Gate,
            UnitKind::Compressor,
            UnitKind::Reverb,
        ] {
            let mut unit = registry.create(kind).unwrap();
            unit.prepare(48_000.0, frames);
            let mut input_data: Vec<f32> = (0..frames * 2)
                .map(|i| ((i as f32) * 0.1).sin())
                .collect();
            let mut output_data = vec![0.0; frames * 2];
            let input = AudioBuffer::new(&mut input_data, 2);
            let mut output = AudioBuffer::new(&mut output_data, 2);
            unit.process(
                &ProcessContext::new(frames, 48_000.0, 0),
                &input,
                None,
                &mut output,
            );
            assert!(output.data.iter().all(|s| s.is_finite()), "{kind:?}");
        }
    }
}
