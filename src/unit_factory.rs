// src/unit_factory.rs

use std::collections::HashMap;

use crate::error::{EngineError, EngineResult, EntityKind};
use crate::unit::{AudioUnit, UnitKind};

/// A factory capable of creating fresh unit instances.
///
/// Only used while compiling a render graph, never on the render thread.
pub trait UnitFactory: Send + Sync {
    /// Create one unit instance
    fn create(&self) -> Box<dyn AudioUnit>;
}

/// Convenience factory for simple units
pub struct SimpleUnitFactory<F>
where
    F: Fn() -> Box<dyn AudioUnit> + Send + Sync,
{
    create_fn: F,
}

impl<F> SimpleUnitFactory<F>
where
    F: Fn() -> Box<dyn AudioUnit> + Send + Sync,
{
    pub fn new(create_fn: F) -> Self {
        Self { create_fn }
    }
}

impl<F> UnitFactory for SimpleUnitFactory<F>
where
    F: Fn() -> Box<dyn AudioUnit> + Send + Sync,
{
    fn create(&self) -> Box<dyn AudioUnit> {
        (self.create_fn)()
    }
}

/// Registry of unit implementations, keyed by kind.
#[derive(Default)]
pub struct UnitRegistry {
    factories: HashMap<UnitKind, Box<dyn UnitFactory>>,
}

impl UnitRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the implementation of `kind`.
    pub fn register(&mut self, kind: UnitKind, factory: impl UnitFactory + 'static) {
        self.factories.insert(kind, Box::new(factory));
    }

    pub fn contains(&self, kind: UnitKind) -> bool {
        self.factories.contains_key(&kind)
    }

    /// Instantiate a unit of `kind`.
    pub fn create(&self, kind: UnitKind) -> EngineResult<Box<dyn AudioUnit>> {
        self.factories
            .get(&kind)
            .map(|f| f.create())
            .ok_or_else(|| EngineError::not_found(EntityKind::Unit, format!("{kind:?}")))
    }
}

impl std::fmt::Debug for UnitRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.factories.keys()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::units::GainUnit;

    #[test]
    fn test_unknown_kind_is_not_found() {
        let registry = UnitRegistry::new();
        let err = registry.create(UnitKind::Reverb).err().unwrap();
        assert!(matches!(
            err,
            EngineError::NotFound {
                kind: EntityKind::Unit,
                ..
            }
        ));
    }

    #[test]
    fn test_registered_factory_creates_units() {
        let mut registry = UnitRegistry::new();
        registry.register(
            UnitKind::Gain,
            SimpleUnitFactory::new(|| Box::new(GainUnit::new())),
        );
        assert!(registry.contains(UnitKind::Gain));
        let unit = registry.create(UnitKind::Gain).unwrap();
        assert_eq!(unit.parameters().get("gain"), Some(&1.0));
    }
}
