// src/state/linker.rs
//
// Bridge between planning entities (roles, parts) and runtime entities
// (mixer channels, scheduled clips).

use std::collections::BTreeMap;

use crate::compile::GraphLayout;
use crate::error::{EngineError, EngineResult, EntityKind};
use crate::graph::{ClipSchedule, ScheduledClip};

use super::content::ContentStore;
use super::timeline::Timeline;
use super::{ChannelId, TimeMs};

/// Which mixer channel plays which role.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChannelLinker {
    by_role: BTreeMap<String, ChannelId>,
}

/// Saturates; a clip that far out simply never plays.
pub(crate) fn ms_to_frames(ms: TimeMs, sample_rate: u32) -> u64 {
    let frames = ms as u128 * sample_rate as u128 / 1000;
    u64::try_from(frames).unwrap_or(u64::MAX)
}

impl ChannelLinker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn link(&mut self, role: impl Into<String>, channel: ChannelId) {
        self.by_role.insert(role.into(), channel);
    }

    pub fn unlink(&mut self, role: &str) -> Option<ChannelId> {
        self.by_role.remove(role)
    }

    pub fn channel_of(&self, role: &str) -> EngineResult<ChannelId> {
        self.by_role
            .get(role)
            .copied()
            .ok_or_else(|| EngineError::not_found(EntityKind::Channel, role))
    }

    pub fn role_of(&self, channel: ChannelId) -> Option<&str> {
        self.by_role
            .iter()
            .find(|&(_, &id)| id == channel)
            .map(|(title, _)| title.as_str())
    }

    pub fn is_role_channel(&self, channel: ChannelId) -> bool {
        self.by_role.values().any(|&id| id == channel)
    }

    pub fn clear(&mut self) {
        self.by_role.clear();
    }

    /// Resolve every content-bound part into frame positions on its channel.
    ///
    /// Parts whose channel is missing from `layout` or whose audio is no
    /// longer in the store are left out.
    pub(crate) fn schedule(
        &self,
        timeline: &Timeline,
        store: &ContentStore,
        layout: &GraphLayout,
        sample_rate: u32,
    ) -> ClipSchedule {
        let mut clips = Vec::new();
        for role in timeline.roles() {
            let Some(channel) = self
                .by_role
                .get(&role.title)
                .and_then(|id| layout.index_of(*id))
            else {
                continue;
            };
            for part in role.parts() {
                let Some(content) = &part.content else {
                    continue;
                };
                let Some(audio) = store.audio(content.handle.id) else {
                    log::warn!("content of '{}' is no longer loaded", part.title);
                    continue;
                };
                clips.push(ScheduledClip {
                    channel,
                    start_frame: ms_to_frames(part.position, sample_rate),
                    end_frame: ms_to_frames(part.end(), sample_rate),
                    offset_frame: ms_to_frames(content.offset_ms, sample_rate),
                    audio: audio.clone(),
                });
            }
        }
        clips.sort_by_key(|c| c.start_frame);
        ClipSchedule::new(layout.generation(), clips)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_both_ways() {
        let mut linker = ChannelLinker::new();
        linker.link("Host", 3);
        assert_eq!(linker.channel_of("Host").unwrap(), 3);
        assert_eq!(linker.role_of(3), Some("Host"));
        assert!(linker.is_role_channel(3));
        assert_eq!(linker.unlink("Host"), Some(3));
        assert!(linker.channel_of("Host").is_err());
    }

    #[test]
    fn test_ms_to_frames() {
        assert_eq!(ms_to_frames(1500, 48_000), 72_000);
        assert_eq!(ms_to_frames(1, 44_100), 44);
        assert_eq!(ms_to_frames(u64::MAX / 100, 48_000), u64::MAX);
        assert_eq!(ms_to_frames(u64::MAX / 1000, 1000), u64::MAX / 1000);
    }
}
