// src/compile.rs
//
// Compiles MixerGraph (declarative) into RenderGraph (runtime).
//
// This is the bridge between the control plane's routing model and the
// graph the render pass executes. The mixer graph is acyclic by
// construction, so compilation cannot fail; unknown unit kinds degrade to
// pass-through steps.

use std::collections::BTreeMap;

use crate::graph::{ChannelLevels, RenderChannel, RenderGraph};
use crate::state::{ChannelId, MixerGraph, OutputTarget};
use crate::unit_factory::UnitRegistry;

/// Where each mixer channel landed in a compiled graph.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct GraphLayout {
    generation: u64,
    index: BTreeMap<ChannelId, usize>,
}

impl GraphLayout {
    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn index_of(&self, id: ChannelId) -> Option<usize> {
        self.index.get(&id).copied()
    }

    pub(crate) fn len(&self) -> usize {
        self.index.len()
    }
}

/// Compile the mixer into a render graph with an empty clip schedule.
///
/// This function:
/// 1. Orders channels topologically (master last)
/// 2. Instantiates every channel's processing chain
/// 3. Wires outputs, return sends and detector edges by graph index
pub(crate) fn compile(
    mixer: &MixerGraph,
    registry: &UnitRegistry,
    sample_rate: u32,
    max_block: usize,
    generation: u64,
) -> (RenderGraph, GraphLayout) {
    let order = mixer.topological_order();
    let index: BTreeMap<ChannelId, usize> =
        order.iter().enumerate().map(|(i, &id)| (id, i)).collect();

    let mut channels = Vec::with_capacity(order.len());
    for &id in &order {
        let Ok(def) = mixer.channel(id) else {
            continue;
        };
        let chain = def
            .chain
            .as_ref()
            .map(|c| c.instantiate(registry, sample_rate as f64, max_block));
        let levels = ChannelLevels {
            volume: def.volume,
            pan: def.pan,
            enabled: def.enabled,
        };
        let mut channel = RenderChannel::new(
            id,
            chain,
            levels,
            max_block,
            def.sidechain_target.is_some(),
            id == mixer.master(),
        );

        let primary = match def.output {
            OutputTarget::Master => Some(mixer.master()),
            OutputTarget::Group(g) | OutputTarget::Sidechained(g) => Some(g),
            OutputTarget::Device => None,
        };
        for dest in primary.into_iter().chain(def.sends.iter().copied()) {
            if let Some(&i) = index.get(&dest) {
                channel.connect(i);
            }
        }
        for keyed in mixer
            .channels()
            .filter(|c| c.sidechain_target == Some(id))
        {
            if let Some(&i) = index.get(&keyed.id) {
                channel.connect_detector(i);
            }
        }
        channels.push(channel);
    }

    let master = index.get(&mixer.master()).copied().unwrap_or(0);
    let graph = RenderGraph::new(generation, channels, master, sample_rate, max_block);
    (graph, GraphLayout { generation, index })
}

/// Current fader state, indexed like the compiled graph.
pub(crate) fn levels(mixer: &MixerGraph, layout: &GraphLayout) -> Vec<ChannelLevels> {
    let mut levels = vec![
        ChannelLevels {
            volume: 0.0,
            pan: 0.0,
            enabled: false,
        };
        layout.len()
    ];
    for channel in mixer.channels() {
        if let Some(i) = layout.index_of(channel.id) {
            levels[i] = ChannelLevels {
                volume: channel.volume,
                pan: channel.pan,
                enabled: channel.enabled,
            };
        }
    }
    levels
}
