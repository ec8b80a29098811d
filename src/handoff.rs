// src/handoff.rs
//
// Lock-free handoff of render graph snapshots.
//
// Single producer (control plane), single consumer (render pass).
// The render pass installs at most one update per block and sends what it
// replaced back over a second channel; the control plane frees retired
// snapshots only after a further block has been rendered.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_channel::{Receiver, Sender, TryRecvError, TrySendError};

use crate::graph::{ChannelLevels, ClipSchedule, RenderGraph};

/// One substitution published to the render pass.
pub(crate) enum GraphUpdate {
    /// Replace the whole graph.
    Graph(Box<RenderGraph>),

    /// Replace the clip schedule of the graph with the same generation.
    Clips(Box<ClipSchedule>),

    /// Replace fader state of the graph with the same generation.
    Levels {
        generation: u64,
        levels: Box<[ChannelLevels]>,
    },
}

/// Something the render pass no longer uses.
pub(crate) enum Retired {
    Graph(Box<RenderGraph>),
    Clips(Box<ClipSchedule>),
    Levels(Box<[ChannelLevels]>),
}

/// Create a connected publisher/receiver pair.
///
/// `blocks_rendered` is the render pass's block counter.
pub(crate) fn handoff(
    depth: usize,
    blocks_rendered: Arc<AtomicU64>,
) -> (UpdatePublisher, UpdateReceiver) {
    let (tx, rx) = crossbeam_channel::bounded(depth.max(1));
    let (retired_tx, retired_rx) = crossbeam_channel::bounded(depth.max(1) + 1);
    (
        UpdatePublisher {
            tx,
            retired_rx,
            deferred: None,
            graveyard: Vec::new(),
            blocks_rendered,
        },
        UpdateReceiver {
            rx,
            retired_tx,
            pending: None,
        },
    )
}

// ═══════════════════════════════════════════════════════════════════
// Control plane side
// ═══════════════════════════════════════════════════════════════════

pub(crate) struct UpdatePublisher {
    tx: Sender<GraphUpdate>,
    retired_rx: Receiver<(u64, Retired)>,

    /// Newest full graph that did not fit in the queue.
    deferred: Option<Box<RenderGraph>>,

    /// Retired snapshots with the block they were retired in.
    graveyard: Vec<(u64, Retired)>,

    blocks_rendered: Arc<AtomicU64>,
}

impl UpdatePublisher {
    /// Send an update.
    ///
    /// Full graphs are always accepted: if the queue is full the newest one
    /// is kept back and retried later. Partial updates are folded into a
    /// kept-back graph; returns `false` if a partial update could not be
    /// delivered and a full graph must be published instead.
    pub(crate) fn publish(&mut self, update: GraphUpdate) -> bool {
        self.collect_garbage();

        let update = match (self.deferred.take(), update) {
            (_, GraphUpdate::Graph(graph)) => GraphUpdate::Graph(graph),
            (Some(mut graph), GraphUpdate::Clips(schedule)) => {
                if schedule.generation() == graph.generation() {
                    graph.replace_schedule(*schedule);
                }
                GraphUpdate::Graph(graph)
            }
            (Some(mut graph), GraphUpdate::Levels { generation, levels }) => {
                if generation == graph.generation() {
                    graph.apply_levels(&levels);
                }
                GraphUpdate::Graph(graph)
            }
            (None, partial) => partial,
        };

        match self.tx.try_send(update) {
            Ok(()) => true,
            Err(TrySendError::Full(GraphUpdate::Graph(graph))) => {
                log::warn!(
                    "render update queue full; deferring graph generation {}",
                    graph.generation()
                );
                self.deferred = Some(graph);
                true
            }
            Err(TrySendError::Full(_)) => false,
            Err(TrySendError::Disconnected(_)) => {
                log::debug!("render pass is gone; update dropped");
                true
            }
        }
    }

    /// Retry a kept-back graph. Returns whether nothing is left deferred.
    pub(crate) fn flush(&mut self) -> bool {
        self.collect_garbage();
        let Some(graph) = self.deferred.take() else {
            return true;
        };
        match self.tx.try_send(GraphUpdate::Graph(graph)) {
            Ok(()) => true,
            Err(TrySendError::Full(GraphUpdate::Graph(graph))) => {
                self.deferred = Some(graph);
                false
            }
            Err(_) => true,
        }
    }

    pub(crate) fn has_deferred(&self) -> bool {
        self.deferred.is_some()
    }

    fn collect_retired(&mut self) {
        while let Ok(item) = self.retired_rx.try_recv() {
            self.graveyard.push(item);
        }
    }

    /// Free retired snapshots the render pass has moved past. Returns how
    /// many were freed. Runs on every publish and flush as well.
    pub(crate) fn collect_garbage(&mut self) -> usize {
        self.collect_retired();
        let now = self.blocks_rendered.load(Ordering::Acquire);
        let before = self.graveyard.len();
        // Retired during block `b`; block `b + 1` has completed once the
        // counter reaches `b + 2`.
        self.graveyard.retain(|(block, _)| now < block + 2);
        before - self.graveyard.len()
    }

    pub(crate) fn pending_garbage(&self) -> usize {
        self.graveyard.len()
    }
}

// ═══════════════════════════════════════════════════════════════════
// Render side
// ═══════════════════════════════════════════════════════════════════

pub(crate) struct UpdateReceiver {
    rx: Receiver<GraphUpdate>,
    retired_tx: Sender<(u64, Retired)>,

    /// Retired item the control plane has not accepted yet.
    pending: Option<(u64, Retired)>,
}

impl UpdateReceiver {
    /// Install at most one update into `graph`.
    ///
    /// Real-time safe: never blocks, allocates or frees. No update is taken
    /// while a retired item is still waiting to be handed back.
    #[inline]
    pub(crate) fn poll(&mut self, graph: &mut Option<Box<RenderGraph>>, block: u64) {
        if !self.hand_back() {
            return;
        }

        let retired = match self.rx.try_recv() {
            Ok(GraphUpdate::Graph(new)) => graph.replace(new).map(Retired::Graph),
            Ok(GraphUpdate::Clips(mut schedule)) => {
                if let Some(g) = graph.as_mut() {
                    if g.generation() == schedule.generation() {
                        let incoming = std::mem::take(&mut *schedule);
                        *schedule = g.replace_schedule(incoming);
                    }
                }
                Some(Retired::Clips(schedule))
            }
            Ok(GraphUpdate::Levels { generation, levels }) => {
                if let Some(g) = graph.as_mut() {
                    if g.generation() == generation {
                        g.apply_levels(&levels);
                    }
                }
                Some(Retired::Levels(levels))
            }
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        };

        if let Some(item) = retired {
            self.pending = Some((block, item));
            self.hand_back();
        }
    }

    /// Try to return the pending retired item. True once nothing is pending.
    fn hand_back(&mut self) -> bool {
        let Some(item) = self.pending.take() else {
            return true;
        };
        match self.retired_tx.try_send(item) {
            Ok(()) => true,
            Err(TrySendError::Full(item)) | Err(TrySendError::Disconnected(item)) => {
                self.pending = Some(item);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{ChannelLevels, RenderChannel};

    fn graph(generation: u64) -> Box<RenderGraph> {
        let levels = ChannelLevels {
            volume: 1.0,
            pan: 0.0,
            enabled: true,
        };
        let master = RenderChannel::new(0, None, levels, 4, false, true);
        Box::new(RenderGraph::new(generation, vec![master], 0, 48_000, 4))
    }

    #[test]
    fn test_one_update_per_poll() {
        let blocks = Arc::new(AtomicU64::new(0));
        let (mut publisher, mut receiver) = handoff(4, blocks.clone());
        assert!(publisher.publish(GraphUpdate::Graph(graph(1))));
        assert!(publisher.publish(GraphUpdate::Graph(graph(2))));

        let mut live = None;
        receiver.poll(&mut live, 0);
        assert_eq!(live.as_ref().map(|g| g.generation()), Some(1));
        receiver.poll(&mut live, 1);
        assert_eq!(live.as_ref().map(|g| g.generation()), Some(2));
    }

    #[test]
    fn test_retired_graph_freed_after_a_further_block() {
        let blocks = Arc::new(AtomicU64::new(0));
        let (mut publisher, mut receiver) = handoff(4, blocks.clone());
        let mut live = None;
        publisher.publish(GraphUpdate::Graph(graph(1)));
        receiver.poll(&mut live, 0);
        blocks.store(1, Ordering::Release);

        publisher.publish(GraphUpdate::Graph(graph(2)));
        receiver.poll(&mut live, 1);
        // Still inside block 1.
        assert_eq!(publisher.collect_garbage(), 0);
        assert_eq!(publisher.pending_garbage(), 1);

        blocks.store(2, Ordering::Release);
        assert_eq!(publisher.collect_garbage(), 0);
        blocks.store(3, Ordering::Release);
        assert_eq!(publisher.collect_garbage(), 1);
    }

    #[test]
    fn test_publishing_frees_old_snapshots() {
        let blocks = Arc::new(AtomicU64::new(0));
        let (mut publisher, mut receiver) = handoff(4, blocks.clone());
        let mut live = None;
        for generation in 1..=50 {
            publisher.publish(GraphUpdate::Graph(graph(generation)));
            for _ in 0..2 {
                let block = blocks.load(Ordering::Acquire);
                receiver.poll(&mut live, block);
                blocks.store(block + 1, Ordering::Release);
            }
        }
        assert_eq!(live.as_ref().map(|g| g.generation()), Some(50));
        // Only the graph replaced by the last publish is still held.
        assert_eq!(publisher.pending_garbage(), 1);
    }

    #[test]
    fn test_full_queue_defers_newest_graph() {
        let blocks = Arc::new(AtomicU64::new(0));
        let (mut publisher, mut receiver) = handoff(1, blocks);
        publisher.publish(GraphUpdate::Graph(graph(1)));
        publisher.publish(GraphUpdate::Graph(graph(2)));
        publisher.publish(GraphUpdate::Graph(graph(3)));
        assert!(publisher.has_deferred());

        // A schedule for the deferred generation folds into it.
        let schedule = Box::new(ClipSchedule::new(3, Vec::new()));
        assert!(publisher.publish(GraphUpdate::Clips(schedule)));

        let mut live = None;
        receiver.poll(&mut live, 0);
        assert_eq!(live.as_ref().map(|g| g.generation()), Some(1));
        assert!(publisher.flush());
        receiver.poll(&mut live, 1);
        assert_eq!(live.as_ref().map(|g| g.generation()), Some(3));
    }

    #[test]
    fn test_stale_schedule_is_returned_unused() {
        let blocks = Arc::new(AtomicU64::new(0));
        let (mut publisher, mut receiver) = handoff(4, blocks);
        let mut live = None;
        publisher.publish(GraphUpdate::Graph(graph(5)));
        receiver.poll(&mut live, 0);
        publisher.publish(GraphUpdate::Clips(Box::new(ClipSchedule::new(4, Vec::new()))));
        receiver.poll(&mut live, 1);
        assert_eq!(live.as_ref().map(|g| g.generation()), Some(5));
        publisher.collect_garbage();
        assert_eq!(publisher.pending_garbage(), 1);
    }

    #[test]
    fn test_partial_update_on_full_queue_asks_for_full_graph() {
        let blocks = Arc::new(AtomicU64::new(0));
        let (mut publisher, _receiver) = handoff(1, blocks);
        publisher.publish(GraphUpdate::Graph(graph(1)));
        let accepted = publisher.publish(GraphUpdate::Levels {
            generation: 1,
            levels: vec![].into_boxed_slice(),
        });
        assert!(!accepted);
    }
}
