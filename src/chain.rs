// src/chain.rs
//
// Processing chains: the declarative unit list a channel carries, and the
// instantiated form the render pass runs.

use serde::{Deserialize, Serialize};

use crate::audio_buffer::AudioBuffer;
use crate::error::{EngineError, EngineResult, EntityKind};
use crate::state::ChannelId;
use crate::unit::{AudioUnit, ParamMap, ProcessContext, UnitKind};
use crate::unit_factory::UnitRegistry;

/// One step of a chain: a unit kind and its parameter values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitSpec {
    pub kind: UnitKind,
    pub parameters: ParamMap,
}

impl UnitSpec {
    /// A unit with its kind's default parameters.
    pub fn new(kind: UnitKind) -> Self {
        Self {
            kind,
            parameters: kind.default_parameters(),
        }
    }

    /// A unit with defaults overridden by the known keys of `params`.
    pub fn with_parameters(kind: UnitKind, params: &ParamMap) -> Self {
        let mut spec = Self::new(kind);
        spec.merge(params);
        spec
    }

    fn merge(&mut self, params: &ParamMap) {
        for (key, value) in params {
            if let Some(slot) = self.parameters.get_mut(key) {
                *slot = *value;
            }
        }
    }
}

/// Ordered, non-empty unit sequence plus an optional sidechain input.
///
/// Order is fixed once built; reordering means building a new chain.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessingChain {
    units: Vec<UnitSpec>,
    sidechain: Option<ChannelId>,
}

impl ProcessingChain {
    pub fn builder() -> ChainBuilder {
        ChainBuilder::default()
    }

    pub fn units(&self) -> &[UnitSpec] {
        &self.units
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    /// Always false for a built chain.
    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Channel feeding the detector input, if any.
    pub fn sidechain(&self) -> Option<ChannelId> {
        self.sidechain
    }

    pub(crate) fn set_sidechain(&mut self, sidechain: Option<ChannelId>) {
        self.sidechain = sidechain;
    }

    /// Change parameters of the unit at `index`. Unknown keys are ignored.
    pub fn set_unit_parameters(&mut self, index: usize, params: &ParamMap) -> EngineResult<()> {
        let len = self.units.len();
        let spec = self
            .units
            .get_mut(index)
            .ok_or_else(|| EngineError::not_found(EntityKind::Unit, format!("#{index} of {len}")))?;
        spec.merge(params);
        Ok(())
    }

    /// Instantiate the chain for the render pass.
    ///
    /// Kinds missing from the registry become pass-through steps.
    pub(crate) fn instantiate(
        &self,
        registry: &UnitRegistry,
        sample_rate: f64,
        max_block: usize,
    ) -> ChainInstance {
        let mut units = Vec::with_capacity(self.units.len());
        for spec in &self.units {
            match registry.create(spec.kind) {
                Ok(mut unit) => {
                    unit.set_parameters(&spec.parameters);
                    unit.prepare(sample_rate, max_block);
                    units.push(unit);
                }
                Err(e) => log::error!("skipping chain step: {e}"),
            }
        }
        ChainInstance {
            units,
            scratch: vec![0.0; max_block * 2],
        }
    }
}

/// Builder for [`ProcessingChain`].
#[derive(Debug, Default)]
pub struct ChainBuilder {
    units: Vec<UnitSpec>,
    sidechain: Option<ChannelId>,
}

impl ChainBuilder {
    pub fn unit(mut self, kind: UnitKind) -> Self {
        self.units.push(UnitSpec::new(kind));
        self
    }

    pub fn unit_with(mut self, kind: UnitKind, params: &ParamMap) -> Self {
        self.units.push(UnitSpec::with_parameters(kind, params));
        self
    }

    pub(crate) fn spec(mut self, spec: UnitSpec) -> Self {
        self.units.push(spec);
        self
    }

    /// Route `channel` into the detector input. The first call wins.
    pub fn sidechain(mut self, channel: ChannelId) -> Self {
        if self.sidechain.is_none() {
            self.sidechain = Some(channel);
        }
        self
    }

    pub fn build(self) -> EngineResult<ProcessingChain> {
        if self.units.is_empty() {
            return Err(EngineError::illegal(
                "a processing chain needs at least one unit",
            ));
        }
        Ok(ProcessingChain {
            units: self.units,
            sidechain: self.sidechain,
        })
    }
}

// ═══════════════════════════════════════════════════════════════════
// Runtime
// ═══════════════════════════════════════════════════════════════════

/// Instantiated chain owned by a render graph channel.
pub(crate) struct ChainInstance {
    units: Vec<Box<dyn AudioUnit>>,
    scratch: Vec<f32>,
}

impl ChainInstance {
    /// Run every unit in order over the planar stereo block in `block`.
    pub(crate) fn process(
        &mut self,
        ctx: &ProcessContext,
        block: &mut [f32],
        sidechain: Option<&mut [f32]>,
    ) {
        let len = ctx.frames * 2;
        let side = sidechain.map(|s| AudioBuffer::new(&mut s[..len], 2));
        for unit in &mut self.units {
            self.scratch[..len].copy_from_slice(&block[..len]);
            let input = AudioBuffer::new(&mut self.scratch[..len], 2);
            let mut output = AudioBuffer::new(&mut block[..len], 2);
            let detector = if unit.uses_sidechain() {
                side.as_ref()
            } else {
                None
            };
            unit.process(ctx, &input, detector, &mut output);
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.units.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::units::standard_registry;

    #[test]
    fn test_empty_chain_is_rejected() {
        let err = ProcessingChain::builder().build().unwrap_err();
        assert!(matches!(err, EngineError::IllegalState(_)));
    }

    #[test]
    fn test_order_follows_insertion() {
        let chain = ProcessingChain::builder()
            .unit(UnitKind::HighPass)
            .unit(UnitKind::Compressor)
            .unit(UnitKind::Reverb)
            .build()
            .unwrap();
        let kinds: Vec<_> = chain.units().iter().map(|u| u.kind).collect();
        assert_eq!(
            kinds,
            vec![UnitKind::HighPass, UnitKind::Compressor, UnitKind::Reverb]
        );
    }

    #[test]
    fn test_first_sidechain_wins_and_is_not_a_step() {
        let chain = ProcessingChain::builder()
            .sidechain(3)
            .unit(UnitKind::Compressor)
            .sidechain(7)
            .build()
            .unwrap();
        assert_eq!(chain.sidechain(), Some(3));
        assert_eq!(chain.len(), 1);
    }

    #[test]
    fn test_set_unit_parameters_ignores_unknown_keys() {
        let mut chain = ProcessingChain::builder()
            .unit(UnitKind::HighPass)
            .build()
            .unwrap();
        chain
            .set_unit_parameters(
                0,
                &ParamMap::from([
                    ("cutoff".to_string(), 250.0),
                    ("colour".to_string(), 1.0),
                ]),
            )
            .unwrap();
        let params = &chain.units()[0].parameters;
        assert_eq!(params["cutoff"], 250.0);
        assert!(!params.contains_key("colour"));

        let err = chain.set_unit_parameters(4, &ParamMap::new()).unwrap_err();
        assert!(matches!(err, EngineError::NotFound { .. }));
    }

    #[test]
    fn test_instance_runs_units_in_sequence() {
        let half = ParamMap::from([("gain".to_string(), 0.5)]);
        let chain = ProcessingChain::builder()
            .unit_with(UnitKind::Gain, &half)
            .unit_with(UnitKind::Gain, &half)
            .build()
            .unwrap();
        let mut instance = chain.instantiate(&standard_registry(), 48_000.0, 16);
        assert_eq!(instance.len(), 2);

        let mut block = vec![1.0; 32];
        instance.process(&ProcessContext::new(16, 48_000.0, 0), &mut block, None);
        assert!(block.iter().all(|s| (*s - 0.25).abs() < 1e-6));
    }

    #[test]
    fn test_missing_kind_becomes_pass_through() {
        let chain = ProcessingChain::builder()
            .unit(UnitKind::Reverb)
            .build()
            .unwrap();
        let mut instance = chain.instantiate(&UnitRegistry::new(), 48_000.0, 8);
        let mut block = vec![0.3; 16];
        instance.process(&ProcessContext::new(8, 48_000.0, 0), &mut block, None);
        assert!(block.iter().all(|s| *s == 0.3));
    }
}
