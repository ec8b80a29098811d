// src/state/mute_solo.rs
//
// Mute/solo derivation.
//
// The enabled set is recomputed from (mode, muted, soloed) after every
// transition, never patched incrementally.

use std::collections::BTreeSet;

use crate::error::{EngineError, EngineResult, EntityKind};

use super::ChannelId;

/// Global mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SoloMode {
    #[default]
    NonSolo,
    Solo,
}

/// Classification of one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Normal,
    Muted,
    Soloed,
}

/// Tracks mute and solo sets over the registered channels.
///
/// The two sets are always disjoint.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MuteSoloController {
    registered: BTreeSet<ChannelId>,
    muted: BTreeSet<ChannelId>,
    soloed: BTreeSet<ChannelId>,
    enabled: BTreeSet<ChannelId>,
    mode: SoloMode,
}

impl MuteSoloController {
    pub fn new() -> Self {
        Self::default()
    }

    fn require(&self, id: ChannelId) -> EngineResult<()> {
        if self.registered.contains(&id) {
            Ok(())
        } else {
            Err(EngineError::not_found(EntityKind::Channel, format!("#{id}")))
        }
    }

    fn recompute(&mut self) {
        self.mode = if self.soloed.is_empty() {
            SoloMode::NonSolo
        } else {
            SoloMode::Solo
        };
        self.enabled = match self.mode {
            SoloMode::Solo => self.soloed.clone(),
            SoloMode::NonSolo => self.registered.difference(&self.muted).copied().collect(),
        };
    }

    pub fn register(&mut self, id: ChannelId) {
        self.registered.insert(id);
        self.recompute();
    }

    /// Forget a channel, dropping it from both sets.
    pub fn unregister(&mut self, id: ChannelId) {
        self.registered.remove(&id);
        self.muted.remove(&id);
        self.soloed.remove(&id);
        self.recompute();
    }

    /// Toggle mute. Returns whether the channel is now muted.
    ///
    /// Muting a soloed channel takes it out of the solo set.
    pub fn set_mute(&mut self, id: ChannelId) -> EngineResult<bool> {
        self.require(id)?;
        let muted = if self.muted.remove(&id) {
            false
        } else {
            self.soloed.remove(&id);
            self.muted.insert(id);
            true
        };
        self.recompute();
        Ok(muted)
    }

    pub fn set_solo(&mut self, id: ChannelId) -> EngineResult<()> {
        self.require(id)?;
        if self.muted.contains(&id) {
            return Err(EngineError::illegal(format!(
                "channel #{id} is muted and cannot be soloed"
            )));
        }
        self.soloed.insert(id);
        self.recompute();
        Ok(())
    }

    /// Take a channel out of the solo set. No-op if it was not soloed.
    pub fn remove_solo(&mut self, id: ChannelId) -> EngineResult<()> {
        self.require(id)?;
        self.soloed.remove(&id);
        self.recompute();
        Ok(())
    }

    pub fn mode(&self) -> SoloMode {
        self.mode
    }

    pub fn state(&self, id: ChannelId) -> ChannelState {
        if self.soloed.contains(&id) {
            ChannelState::Soloed
        } else if self.muted.contains(&id) {
            ChannelState::Muted
        } else {
            ChannelState::Normal
        }
    }

    /// Unregistered channels are always enabled.
    pub fn is_enabled(&self, id: ChannelId) -> bool {
        !self.registered.contains(&id) || self.enabled.contains(&id)
    }

    pub fn muted(&self) -> &BTreeSet<ChannelId> {
        &self.muted
    }

    pub fn soloed(&self) -> &BTreeSet<ChannelId> {
        &self.soloed
    }

    pub fn registered(&self) -> &BTreeSet<ChannelId> {
        &self.registered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller() -> MuteSoloController {
        let mut c = MuteSoloController::new();
        for id in 1..=4 {
            c.register(id);
        }
        c
    }

    fn law_holds(c: &MuteSoloController) -> bool {
        c.registered().iter().all(|&id| {
            let expected = match c.mode() {
                SoloMode::Solo => c.soloed().contains(&id),
                SoloMode::NonSolo => !c.muted().contains(&id),
            };
            c.is_enabled(id) == expected
        }) && c.muted().is_disjoint(c.soloed())
    }

    #[test]
    fn test_mute_toggles() {
        let mut c = controller();
        assert!(c.set_mute(2).unwrap());
        assert!(!c.is_enabled(2));
        assert!(c.is_enabled(1));
        assert!(!c.set_mute(2).unwrap());
        assert!(c.is_enabled(2));
    }

    #[test]
    fn test_solo_on_muted_rejected_without_change() {
        let mut c = controller();
        c.set_mute(3).unwrap();
        let before = c.clone();
        let err = c.set_solo(3).unwrap_err();
        assert!(matches!(err, EngineError::IllegalState(_)));
        assert_eq!(c, before);
    }

    #[test]
    fn test_last_solo_removed_reverts_to_mutes() {
        let mut c = controller();
        c.set_mute(1).unwrap();
        c.set_solo(2).unwrap();
        c.set_solo(3).unwrap();
        assert_eq!(c.mode(), SoloMode::Solo);
        assert!(!c.is_enabled(4));

        c.remove_solo(2).unwrap();
        assert_eq!(c.mode(), SoloMode::Solo);
        assert!(c.is_enabled(3) && !c.is_enabled(2));

        c.remove_solo(3).unwrap();
        assert_eq!(c.mode(), SoloMode::NonSolo);
        assert!(!c.is_enabled(1));
        assert!(c.is_enabled(2) && c.is_enabled(4));
    }

    #[test]
    fn test_mute_on_soloed_leaves_solo() {
        let mut c = controller();
        c.set_solo(2).unwrap();
        c.set_mute(2).unwrap();
        assert_eq!(c.state(2), ChannelState::Muted);
        assert_eq!(c.mode(), SoloMode::NonSolo);
        assert!(law_holds(&c));
    }

    #[test]
    fn test_law_over_transition_sequence() {
        let mut c = controller();
        let steps: [(u8, ChannelId); 10] = [
            (0, 1),
            (1, 2),
            (0, 3),
            (1, 4),
            (2, 2),
            (0, 1),
            (1, 1),
            (2, 4),
            (0, 4),
            (2, 1),
        ];
        for (op, id) in steps {
            let _ = match op {
                0 => c.set_mute(id).map(|_| ()),
                1 => c.set_solo(id),
                _ => c.remove_solo(id),
            };
            assert!(law_holds(&c), "after op {op} on {id}");
        }
    }

    #[test]
    fn test_unregistered_channels_stay_enabled() {
        let mut c = controller();
        c.set_solo(1).unwrap();
        assert!(c.is_enabled(42));
        assert!(c.set_mute(42).is_err());
        c.unregister(1);
        assert_eq!(c.mode(), SoloMode::NonSolo);
    }
}
