// src/state/mixer.rs
//
// Mixer routing graph.
//
// Channels are nodes; edges are:
// - the primary output (master, a group, or a sidechained channel's input)
// - return sends (extra fan-out into return buses)
// - detector edges (sidechain target -> sidechained channel), fixed at creation
//
// The graph is always acyclic and always has exactly one master.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use serde::{Deserialize, Serialize};

use crate::chain::ProcessingChain;
use crate::error::{EngineError, EngineResult, EntityKind};
use crate::unit::UnitKind;

/// Handle of a channel in the [`MixerGraph`].
pub type ChannelId = u32;

/// What a channel is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChannelKind {
    Basic,
    Gated,
    Sidechained,
    Return,
    Group,
    Master,
}

impl ChannelKind {
    /// Chain a fresh channel of this kind starts with.
    pub fn default_chain(self, sidechain: Option<ChannelId>) -> Option<ProcessingChain> {
        let builder = match self {
            ChannelKind::Basic | ChannelKind::Group => return None,
            ChannelKind::Gated => ProcessingChain::builder().unit(UnitKind::Gate),
            ChannelKind::Sidechained => {
                let builder = ProcessingChain::builder().unit(UnitKind::Compressor);
                match sidechain {
                    Some(target) => builder.sidechain(target),
                    None => builder,
                }
            }
            ChannelKind::Return => ProcessingChain::builder().unit(UnitKind::HighPass),
            ChannelKind::Master => ProcessingChain::builder().unit(UnitKind::Compressor),
        };
        builder.build().ok()
    }
}

/// Where a channel's audio goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputTarget {
    Master,
    Group(ChannelId),
    /// Audio input of a sidechained channel.
    Sidechained(ChannelId),
    /// The device output. Only the master uses this.
    Device,
}

/// One node of the mixer graph.
#[derive(Debug, Clone, PartialEq)]
pub struct Channel {
    pub id: ChannelId,
    pub name: String,
    pub kind: ChannelKind,

    /// 0.0 - 1.0
    pub volume: f32,

    /// -1.0 (left) - 1.0 (right)
    pub pan: f32,

    /// Disabled channels keep their routing but contribute no audio.
    pub enabled: bool,

    pub chain: Option<ProcessingChain>,

    /// Detector source of a sidechained channel.
    pub sidechain_target: Option<ChannelId>,

    pub output: OutputTarget,

    /// Return buses this channel also feeds.
    pub sends: Vec<ChannelId>,
}

/// Channels and the routing between them.
#[derive(Debug, Clone, PartialEq)]
pub struct MixerGraph {
    channels: BTreeMap<ChannelId, Channel>,
    master: ChannelId,
    next_id: ChannelId,
    default_volume: f32,
}

impl MixerGraph {
    /// A graph holding only the master channel.
    pub fn new(default_volume: f32) -> Self {
        let mut graph = Self {
            channels: BTreeMap::new(),
            master: 0,
            next_id: 0,
            default_volume,
        };
        graph.master = graph.insert("Master", ChannelKind::Master, None);
        if let Some(master) = graph.channels.get_mut(&graph.master) {
            master.output = OutputTarget::Device;
        }
        graph
    }

    fn insert(&mut self, name: &str, kind: ChannelKind, sidechain: Option<ChannelId>) -> ChannelId {
        let id = self.next_id;
        self.next_id += 1;
        self.channels.insert(
            id,
            Channel {
                id,
                name: name.to_string(),
                kind,
                volume: self.default_volume,
                pan: 0.0,
                enabled: true,
                chain: kind.default_chain(sidechain),
                sidechain_target: sidechain,
                output: OutputTarget::Master,
                sends: Vec::new(),
            },
        );
        id
    }

    fn create(&mut self, name: &str, kind: ChannelKind) -> EngineResult<ChannelId> {
        if self.channel_by_name(name).is_some() {
            return Err(EngineError::duplicate(EntityKind::Channel, name));
        }
        Ok(self.insert(name, kind, None))
    }

    // ───────────────────────────────────────────────────────────────
    // Creation
    // ───────────────────────────────────────────────────────────────

    pub fn create_basic_channel(&mut self, name: &str) -> EngineResult<ChannelId> {
        self.create(name, ChannelKind::Basic)
    }

    pub fn create_gated_channel(&mut self, name: &str) -> EngineResult<ChannelId> {
        self.create(name, ChannelKind::Gated)
    }

    pub fn create_return_channel(&mut self, name: &str) -> EngineResult<ChannelId> {
        self.create(name, ChannelKind::Return)
    }

    pub fn create_group_channel(&mut self, name: &str) -> EngineResult<ChannelId> {
        self.create(name, ChannelKind::Group)
    }

    /// A compressor channel keyed on `target`. The target never changes.
    pub fn create_sidechained_channel(
        &mut self,
        name: &str,
        target: ChannelId,
    ) -> EngineResult<ChannelId> {
        self.channel(target)?;
        if target == self.master {
            return Err(EngineError::illegal("the master cannot key a sidechain"));
        }
        if self.channel_by_name(name).is_some() {
            return Err(EngineError::duplicate(EntityKind::Channel, name));
        }
        Ok(self.insert(name, ChannelKind::Sidechained, Some(target)))
    }

    /// Re-create a sidechained channel whose target is gone. Used when loading.
    pub(crate) fn create_unkeyed_sidechained_channel(&mut self, name: &str) -> EngineResult<ChannelId> {
        self.create(name, ChannelKind::Sidechained)
    }

    /// Create a channel of any kind but the master. Used when loading.
    pub(crate) fn create_channel(
        &mut self,
        name: &str,
        kind: ChannelKind,
        sidechain: Option<ChannelId>,
    ) -> EngineResult<ChannelId> {
        match (kind, sidechain) {
            (ChannelKind::Master, _) => Err(EngineError::illegal("a project has exactly one master")),
            (ChannelKind::Sidechained, Some(target)) => self.create_sidechained_channel(name, target),
            (ChannelKind::Sidechained, None) => self.create_unkeyed_sidechained_channel(name),
            (kind, _) => self.create(name, kind),
        }
    }

    // ───────────────────────────────────────────────────────────────
    // Lookup
    // ───────────────────────────────────────────────────────────────

    pub fn master(&self) -> ChannelId {
        self.master
    }

    pub fn master_channel(&self) -> &Channel {
        // The master is inserted by `new` and can never be removed.
        &self.channels[&self.master]
    }

    pub fn channel(&self, id: ChannelId) -> EngineResult<&Channel> {
        self.channels
            .get(&id)
            .ok_or_else(|| EngineError::not_found(EntityKind::Channel, format!("#{id}")))
    }

    fn channel_mut(&mut self, id: ChannelId) -> EngineResult<&mut Channel> {
        self.channels
            .get_mut(&id)
            .ok_or_else(|| EngineError::not_found(EntityKind::Channel, format!("#{id}")))
    }

    pub fn channel_by_name(&self, name: &str) -> Option<ChannelId> {
        self.channels
            .values()
            .find(|c| c.name == name)
            .map(|c| c.id)
    }

    /// Channels in creation order.
    pub fn channels(&self) -> impl Iterator<Item = &Channel> {
        self.channels.values()
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    // ───────────────────────────────────────────────────────────────
    // Routing
    // ───────────────────────────────────────────────────────────────

    fn require_kind(&self, id: ChannelId, kind: ChannelKind) -> EngineResult<()> {
        let channel = self.channel(id)?;
        if channel.kind != kind {
            return Err(EngineError::illegal(format!(
                "channel '{}' is not a {kind:?} channel",
                channel.name
            )));
        }
        Ok(())
    }

    fn check_source(&self, src: ChannelId, dest: ChannelId) -> EngineResult<()> {
        self.channel(src)?;
        self.channel(dest)?;
        if src == dest {
            return Err(EngineError::illegal("a channel cannot be linked to itself"));
        }
        if src == self.master {
            return Err(EngineError::illegal("the master cannot feed other channels"));
        }
        Ok(())
    }

    /// Fan `src` additionally into the return bus `ret`.
    pub fn link_channel(&mut self, src: ChannelId, ret: ChannelId) -> EngineResult<()> {
        self.check_source(src, ret)?;
        self.require_kind(ret, ChannelKind::Return)?;
        if self.channel(src)?.sends.contains(&ret) {
            return Ok(());
        }
        self.check_acyclic(src, ret)?;
        self.channel_mut(src)?.sends.push(ret);
        Ok(())
    }

    pub fn unlink_channel(&mut self, src: ChannelId, ret: ChannelId) -> EngineResult<()> {
        self.channel(ret)?;
        let channel = self.channel_mut(src)?;
        let before = channel.sends.len();
        channel.sends.retain(|&r| r != ret);
        if channel.sends.len() == before {
            return Err(EngineError::illegal(format!(
                "channel '{}' does not send to #{ret}",
                channel.name
            )));
        }
        Ok(())
    }

    /// Route the primary output of `channel` into `group`.
    pub fn link_to_group(&mut self, channel: ChannelId, group: ChannelId) -> EngineResult<()> {
        self.check_source(channel, group)?;
        self.require_kind(group, ChannelKind::Group)?;
        self.reroute(channel, OutputTarget::Group(group), group)
    }

    /// Route `channel` from `group` back to the master.
    pub fn unlink_from_group(&mut self, channel: ChannelId, group: ChannelId) -> EngineResult<()> {
        self.channel(group)?;
        let channel = self.channel_mut(channel)?;
        if channel.output != OutputTarget::Group(group) {
            return Err(EngineError::illegal(format!(
                "channel '{}' is not routed to group #{group}",
                channel.name
            )));
        }
        channel.output = OutputTarget::Master;
        Ok(())
    }

    /// Route the primary output of `channel` into the audio input of `target`.
    pub fn link_to_sidechained(&mut self, channel: ChannelId, target: ChannelId) -> EngineResult<()> {
        self.check_source(channel, target)?;
        self.require_kind(target, ChannelKind::Sidechained)?;
        self.reroute(channel, OutputTarget::Sidechained(target), target)
    }

    fn reroute(&mut self, channel: ChannelId, output: OutputTarget, dest: ChannelId) -> EngineResult<()> {
        if self.channel(channel)?.output == output {
            return Ok(());
        }
        self.check_acyclic(channel, dest)?;
        self.channel_mut(channel)?.output = output;
        Ok(())
    }

    /// Every edge leaving `id`, detector edges included.
    fn successors(&self, id: ChannelId) -> Vec<ChannelId> {
        let Some(channel) = self.channels.get(&id) else {
            return Vec::new();
        };
        let mut out = Vec::with_capacity(channel.sends.len() + 2);
        match channel.output {
            OutputTarget::Master => out.push(self.master),
            OutputTarget::Group(g) | OutputTarget::Sidechained(g) => out.push(g),
            OutputTarget::Device => {}
        }
        out.extend(channel.sends.iter().copied());
        out.extend(
            self.channels
                .values()
                .filter(|c| c.sidechain_target == Some(id))
                .map(|c| c.id),
        );
        out
    }

    /// Fails if an edge `src -> dest` would close a cycle.
    fn check_acyclic(&self, src: ChannelId, dest: ChannelId) -> EngineResult<()> {
        let mut seen = BTreeSet::new();
        let mut stack = vec![dest];
        while let Some(id) = stack.pop() {
            if id == src {
                return Err(EngineError::illegal(format!(
                    "linking #{src} to #{dest} would create a routing cycle"
                )));
            }
            if seen.insert(id) {
                stack.extend(self.successors(id));
            }
        }
        Ok(())
    }

    /// Channel ids ordered so every edge points forward. Master is last.
    pub fn topological_order(&self) -> Vec<ChannelId> {
        let mut in_degree: BTreeMap<ChannelId, usize> =
            self.channels.keys().map(|&id| (id, 0)).collect();
        let successors: BTreeMap<ChannelId, Vec<ChannelId>> = self
            .channels
            .keys()
            .map(|&id| (id, self.successors(id)))
            .collect();
        for targets in successors.values() {
            for t in targets {
                if let Some(d) = in_degree.get_mut(t) {
                    *d += 1;
                }
            }
        }

        let mut queue: VecDeque<ChannelId> = in_degree
            .iter()
            .filter(|&(_, &d)| d == 0)
            .map(|(&id, _)| id)
            .collect();
        let mut order = Vec::with_capacity(self.channels.len());
        while let Some(id) = queue.pop_front() {
            order.push(id);
            for t in &successors[&id] {
                if let Some(d) = in_degree.get_mut(t) {
                    *d -= 1;
                    if *d == 0 {
                        queue.push_back(*t);
                    }
                }
            }
        }
        order
    }

    // ───────────────────────────────────────────────────────────────
    // Channel state
    // ───────────────────────────────────────────────────────────────

    pub fn enable(&mut self, id: ChannelId) -> EngineResult<()> {
        self.channel_mut(id)?.enabled = true;
        Ok(())
    }

    pub fn disable(&mut self, id: ChannelId) -> EngineResult<()> {
        self.channel_mut(id)?.enabled = false;
        Ok(())
    }

    pub fn set_volume(&mut self, id: ChannelId, volume: f32) -> EngineResult<()> {
        self.channel_mut(id)?.volume = volume.clamp(0.0, 1.0);
        Ok(())
    }

    pub fn set_pan(&mut self, id: ChannelId, pan: f32) -> EngineResult<()> {
        self.channel_mut(id)?.pan = pan.clamp(-1.0, 1.0);
        Ok(())
    }

    /// Replace the whole chain of a channel.
    ///
    /// Only sidechained channels take a sidechain input, and theirs is
    /// always the target fixed at creation.
    pub fn set_chain(&mut self, id: ChannelId, chain: Option<ProcessingChain>) -> EngineResult<()> {
        let channel = self.channel_mut(id)?;
        let chain = match chain {
            Some(mut chain) if channel.kind == ChannelKind::Sidechained => {
                chain.set_sidechain(channel.sidechain_target);
                Some(chain)
            }
            Some(chain) if chain.sidechain().is_some() => {
                return Err(EngineError::illegal(format!(
                    "channel '{}' has no sidechain input",
                    channel.name
                )));
            }
            other => other,
        };
        channel.chain = chain;
        Ok(())
    }

    pub(crate) fn chain_mut(&mut self, id: ChannelId) -> EngineResult<&mut ProcessingChain> {
        let channel = self.channel_mut(id)?;
        let name = channel.name.clone();
        channel
            .chain
            .as_mut()
            .ok_or_else(|| EngineError::illegal(format!("channel '{name}' has no processing chain")))
    }

    /// Silence a channel and cut every edge touching it, keeping the node.
    ///
    /// A detached channel can be rendered one more block before removal.
    pub(crate) fn detach(&mut self, id: ChannelId) -> EngineResult<()> {
        if id == self.master {
            return Err(EngineError::illegal("the master channel cannot be removed"));
        }
        let channel = self.channel_mut(id)?;
        channel.enabled = false;
        channel.output = OutputTarget::Device;
        channel.sends.clear();
        self.drop_edges_to(id);
        Ok(())
    }

    /// Remove a channel and every edge touching it.
    ///
    /// Channels routed into it fall back to the master; sidechained
    /// channels keyed on it lose their detector input.
    pub fn remove_channel(&mut self, id: ChannelId) -> EngineResult<Channel> {
        self.channel(id)?;
        if id == self.master {
            return Err(EngineError::illegal("the master channel cannot be removed"));
        }
        let Some(removed) = self.channels.remove(&id) else {
            return Err(EngineError::not_found(EntityKind::Channel, format!("#{id}")));
        };
        self.drop_edges_to(id);
        Ok(removed)
    }

    fn drop_edges_to(&mut self, id: ChannelId) {
        for channel in self.channels.values_mut().filter(|c| c.id != id) {
            if matches!(channel.output, OutputTarget::Group(g) | OutputTarget::Sidechained(g) if g == id)
            {
                channel.output = OutputTarget::Master;
            }
            channel.sends.retain(|&r| r != id);
            if channel.sidechain_target == Some(id) {
                channel.sidechain_target = None;
                if let Some(chain) = channel.chain.as_mut() {
                    chain.set_sidechain(None);
                }
                log::debug!("channel '{}' lost its sidechain source", channel.name);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph() -> MixerGraph {
        MixerGraph::new(0.8)
    }

    #[test]
    fn test_master_always_present() {
        let graph = graph();
        assert_eq!(graph.master_channel().name, "Master");
        assert_eq!(graph.master_channel().output, OutputTarget::Device);
        assert_eq!(
            graph.master_channel().chain.as_ref().unwrap().units()[0].kind,
            UnitKind::Compressor
        );
    }

    #[test]
    fn test_default_chains() {
        let mut graph = graph();
        let voice = graph.create_gated_channel("Voice").unwrap();
        let music = graph.create_basic_channel("Music").unwrap();
        let ret = graph.create_return_channel("Room").unwrap();
        let duck = graph.create_sidechained_channel("Duck", voice).unwrap();

        assert_eq!(
            graph.channel(voice).unwrap().chain.as_ref().unwrap().units()[0].kind,
            UnitKind::Gate
        );
        assert!(graph.channel(music).unwrap().chain.is_none());
        let hp = &graph.channel(ret).unwrap().chain.as_ref().unwrap().units()[0];
        assert_eq!(hp.kind, UnitKind::HighPass);
        assert_eq!(hp.parameters["cutoff"], 100.0);
        assert_eq!(
            graph.channel(duck).unwrap().chain.as_ref().unwrap().sidechain(),
            Some(voice)
        );
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let mut graph = graph();
        graph.create_basic_channel("Music").unwrap();
        let err = graph.create_group_channel("Music").unwrap_err();
        assert!(matches!(err, EngineError::DuplicateTitle { .. }));
        let err = graph.create_basic_channel("Master").unwrap_err();
        assert!(matches!(err, EngineError::DuplicateTitle { .. }));
    }

    #[test]
    fn test_return_cycle_rejected() {
        let mut graph = graph();
        let a = graph.create_return_channel("A").unwrap();
        let b = graph.create_return_channel("B").unwrap();
        graph.link_channel(a, b).unwrap();
        let before = graph.clone();
        let err = graph.link_channel(b, a).unwrap_err();
        assert!(matches!(err, EngineError::IllegalState(_)));
        assert_eq!(graph, before);

        let err = graph.link_channel(a, a).unwrap_err();
        assert!(matches!(err, EngineError::IllegalState(_)));
    }

    #[test]
    fn test_unknown_channel_not_found() {
        let mut graph = graph();
        let a = graph.create_basic_channel("A").unwrap();
        let err = graph.link_channel(a, 99).unwrap_err();
        assert!(matches!(err, EngineError::NotFound { .. }));
    }

    #[test]
    fn test_sidechain_detector_edge_counts_for_cycles() {
        let mut graph = graph();
        let voice = graph.create_basic_channel("Voice").unwrap();
        let duck = graph.create_sidechained_channel("Duck", voice).unwrap();
        let group = graph.create_group_channel("Bus").unwrap();
        graph.link_to_group(duck, group).unwrap();
        // Duck keys Duck2, so feeding Duck2 into Duck closes a loop.
        let duck2 = graph.create_sidechained_channel("Duck2", duck).unwrap();
        let err = graph.link_to_sidechained(duck2, duck).unwrap_err();
        assert!(matches!(err, EngineError::IllegalState(_)));
    }

    #[test]
    fn test_group_routing_round_trip() {
        let mut graph = graph();
        let a = graph.create_basic_channel("A").unwrap();
        let g = graph.create_group_channel("G").unwrap();
        graph.link_to_group(a, g).unwrap();
        assert_eq!(graph.channel(a).unwrap().output, OutputTarget::Group(g));
        graph.unlink_from_group(a, g).unwrap();
        assert_eq!(graph.channel(a).unwrap().output, OutputTarget::Master);
        let err = graph.unlink_from_group(a, g).unwrap_err();
        assert!(matches!(err, EngineError::IllegalState(_)));
    }

    #[test]
    fn test_topological_order_puts_sources_first() {
        let mut graph = graph();
        let g = graph.create_group_channel("G").unwrap();
        let r = graph.create_return_channel("R").unwrap();
        let a = graph.create_basic_channel("A").unwrap();
        graph.link_to_group(a, g).unwrap();
        graph.link_channel(a, r).unwrap();
        let order = graph.topological_order();
        let pos = |id| order.iter().position(|&x| x == id).unwrap();
        assert_eq!(order.len(), graph.len());
        assert!(pos(a) < pos(g));
        assert!(pos(a) < pos(r));
        assert_eq!(*order.last().unwrap(), graph.master());
    }

    #[test]
    fn test_remove_channel_drops_edges() {
        let mut graph = graph();
        let voice = graph.create_basic_channel("Voice").unwrap();
        let g = graph.create_group_channel("G").unwrap();
        let r = graph.create_return_channel("R").unwrap();
        let duck = graph.create_sidechained_channel("Duck", voice).unwrap();
        graph.link_to_group(voice, g).unwrap();
        graph.link_channel(voice, r).unwrap();

        graph.remove_channel(g).unwrap();
        assert_eq!(graph.channel(voice).unwrap().output, OutputTarget::Master);
        graph.remove_channel(voice).unwrap();
        let duck = graph.channel(duck).unwrap();
        assert_eq!(duck.sidechain_target, None);
        assert_eq!(duck.chain.as_ref().unwrap().sidechain(), None);

        let err = graph.remove_channel(graph.master()).unwrap_err();
        assert!(matches!(err, EngineError::IllegalState(_)));
    }

    #[test]
    fn test_detach_keeps_node_without_edges() {
        let mut graph = graph();
        let voice = graph.create_basic_channel("Voice").unwrap();
        let r = graph.create_return_channel("R").unwrap();
        let other = graph.create_basic_channel("Other").unwrap();
        graph.link_channel(voice, r).unwrap();
        graph.link_channel(other, r).unwrap();

        graph.detach(r).unwrap();
        let detached = graph.channel(r).unwrap();
        assert!(!detached.enabled);
        assert_eq!(detached.output, OutputTarget::Device);
        assert!(graph.channel(voice).unwrap().sends.is_empty());
        assert!(graph.channel(other).unwrap().sends.is_empty());
        assert_eq!(graph.len(), 5);
        assert!(graph.detach(graph.master()).is_err());
    }

    #[test]
    fn test_create_channel_by_kind() {
        let mut graph = graph();
        let voice = graph.create_channel("Voice", ChannelKind::Gated, None).unwrap();
        let duck = graph
            .create_channel("Duck", ChannelKind::Sidechained, Some(voice))
            .unwrap();
        assert_eq!(graph.channel(duck).unwrap().sidechain_target, Some(voice));
        let loose = graph
            .create_channel("Loose", ChannelKind::Sidechained, None)
            .unwrap();
        assert_eq!(graph.channel(loose).unwrap().sidechain_target, None);
        assert!(graph.create_channel("M2", ChannelKind::Master, None).is_err());
    }

    #[test]
    fn test_set_chain_keeps_sidechain_target() {
        let mut graph = graph();
        let voice = graph.create_basic_channel("Voice").unwrap();
        let duck = graph.create_sidechained_channel("Duck", voice).unwrap();
        let chain = ProcessingChain::builder()
            .unit(UnitKind::Compressor)
            .unit(UnitKind::Reverb)
            .build()
            .unwrap();
        graph.set_chain(duck, Some(chain.clone())).unwrap();
        assert_eq!(
            graph.channel(duck).unwrap().chain.as_ref().unwrap().sidechain(),
            Some(voice)
        );

        let keyed = ProcessingChain::builder()
            .unit(UnitKind::Compressor)
            .sidechain(duck)
            .build()
            .unwrap();
        let err = graph.set_chain(voice, Some(keyed)).unwrap_err();
        assert!(matches!(err, EngineError::IllegalState(_)));
    }

    #[test]
    fn test_volume_and_pan_are_clamped() {
        let mut graph = graph();
        let a = graph.create_basic_channel("A").unwrap();
        graph.set_volume(a, 1.5).unwrap();
        graph.set_pan(a, -3.0).unwrap();
        let a = graph.channel(a).unwrap();
        assert_eq!((a.volume, a.pan), (1.0, -1.0));
    }
}
