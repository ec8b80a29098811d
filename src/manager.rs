//! Control-plane façade over timeline, mixer and render publication.
//!
//! # Architecture
//!
//! - **Control thread** owns [`TimelineManager`] and [`TransportEngine`]
//! - **Audio thread** owns [`Renderer`]
//! - Edits are validated against the declarative model, then compiled into
//!   render graph snapshots and sent over a bounded lock-free queue
//!
//! # Usage
//!
//! ```ignore
//! let (mut manager, mut transport, mut renderer) =
//!     create_engine(EngineConfig::default(), WavImporter)?;
//!
//! // Control thread: edit and drive the transport
//! manager.add_channel(RoleType::Speech, "Host", None)?;
//! transport.start()?;
//!
//! // Audio thread: render each device block
//! renderer.render(&input, &mut output);
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;

use crate::capture::capture_ring;
use crate::chain::ProcessingChain;
use crate::compile::{GraphLayout, compile, levels};
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult, EntityKind};
use crate::handoff::{GraphUpdate, UpdatePublisher, handoff};
use crate::renderer::Renderer;
use crate::state::{
    Channel, ChannelId, ChannelKind, ChannelLinker, ChannelState, Content, ContentId,
    ContentImporter, ContentStore, MixerGraph, MuteSoloController, Part, PartType,
    ProjectDocument, RouteRecord, Role, RoleType, Section, SoloMode, Speaker, TimeMs, Timeline,
};
use crate::transport::{TransportEngine, TransportShared};
use crate::unit::ParamMap;
use crate::unit_factory::UnitRegistry;
use crate::units::standard_registry;

/// Outcome of the content import that may accompany clip creation.
///
/// The clip exists in every case; a failed import leaves it without content.
#[must_use]
#[derive(Debug)]
pub enum ClipImport {
    NoContent,
    Bound,
    Failed(EngineError),
}

impl ClipImport {
    pub fn is_failure(&self) -> bool {
        matches!(self, ClipImport::Failed(_))
    }
}

/// Create a linked manager, transport and renderer with the standard units.
pub fn create_engine(
    config: EngineConfig,
    importer: impl ContentImporter + 'static,
) -> EngineResult<(TimelineManager, TransportEngine, Renderer)> {
    create_engine_with_units(config, importer, standard_registry())
}

/// Like [`create_engine`], with a caller-supplied unit registry.
pub fn create_engine_with_units(
    config: EngineConfig,
    importer: impl ContentImporter + 'static,
    registry: UnitRegistry,
) -> EngineResult<(TimelineManager, TransportEngine, Renderer)> {
    config.validate()?;

    let shared = Arc::new(TransportShared::new());
    let (publisher, receiver) = handoff(config.update_queue_depth, Arc::clone(&shared.blocks_rendered));
    let (sink, source) = capture_ring(config.capture_capacity(), config.max_block_size);

    let mut manager = TimelineManager {
        timeline: Timeline::new(),
        mixer: MixerGraph::new(config.default_volume),
        mute_solo: MuteSoloController::new(),
        linker: ChannelLinker::new(),
        store: ContentStore::new(),
        importer: Box::new(importer),
        registry,
        publisher,
        layout: GraphLayout::default(),
        generation: 0,
        sample_rate: config.sample_rate,
        max_block: config.max_block_size,
        default_volume: config.default_volume,
    };
    manager.publish_graph();

    let transport = TransportEngine::new(
        Arc::clone(&shared),
        source,
        config.sample_rate,
        config.recordings_dir.clone(),
    );
    let renderer = Renderer::new(
        receiver,
        shared,
        sink,
        config.sample_rate,
        config.max_block_size,
    );

    log::debug!(
        "engine created: {} Hz, blocks of {} frames",
        config.sample_rate,
        config.max_block_size
    );
    Ok((manager, transport, renderer))
}

/// Owns the project model and keeps the render pass in sync with it.
///
/// All methods run on the control thread. Every operation validates before
/// it mutates, so an `Err` leaves the project unchanged.
pub struct TimelineManager {
    timeline: Timeline,
    mixer: MixerGraph,
    mute_solo: MuteSoloController,
    linker: ChannelLinker,

    /// Decoded audio shared with render graphs
    store: ContentStore,
    importer: Box<dyn ContentImporter>,
    registry: UnitRegistry,

    publisher: UpdatePublisher,

    /// Layout of the newest published graph
    layout: GraphLayout,
    generation: u64,

    sample_rate: u32,
    max_block: usize,
    default_volume: f32,
}

impl TimelineManager {
    // ═══════════════════════════════════════════════════════════════════
    // Roles and their channels
    // ═══════════════════════════════════════════════════════════════════

    /// Create a role and its paired mixer channel.
    ///
    /// Speech roles get a gated channel, everything else a basic one.
    pub fn add_channel(
        &mut self,
        role_type: RoleType,
        title: &str,
        description: Option<&str>,
    ) -> EngineResult<ChannelId> {
        if self.timeline.role(title).is_ok() {
            return Err(EngineError::duplicate(EntityKind::Role, title));
        }
        if self.mixer.channel_by_name(title).is_some() {
            return Err(EngineError::duplicate(EntityKind::Channel, title));
        }

        let mut role = Role::new(title, role_type);
        role.description = description.map(str::to_string);
        let id = match role_type {
            RoleType::Speech => self.mixer.create_gated_channel(title)?,
            RoleType::Soundtrack | RoleType::Effects => self.mixer.create_basic_channel(title)?,
        };
        if let Err(e) = self.timeline.add_role(role) {
            let _ = self.mixer.remove_channel(id);
            return Err(e);
        }
        self.linker.link(title, id);
        self.mute_solo.register(id);
        self.sync_enabled();
        self.publish_graph();

        log::debug!("added {role_type:?} channel '{title}' as #{id}");
        Ok(id)
    }

    /// Remove a role, all of its clips and its channel.
    pub fn remove_channel(&mut self, title: &str) -> EngineResult<()> {
        let id = self.role_channel(title)?;
        let role = self.timeline.remove_role(title)?;
        self.linker.unlink(title);
        self.mute_solo.unregister(id);
        self.sync_enabled();
        self.retire_channel(id)?;
        self.prune_content();

        log::debug!(
            "removed channel '{title}' with {} clip(s)",
            role.parts().len()
        );
        Ok(())
    }

    pub fn roles(&self) -> &[Role] {
        self.timeline.roles()
    }

    pub fn role(&self, title: &str) -> EngineResult<&Role> {
        self.timeline.role(title)
    }

    pub fn add_note(&mut self, role: &str, note: impl Into<String>) -> EngineResult<()> {
        self.timeline.add_note(role, note)
    }

    pub fn set_speaker(&mut self, role: &str, speaker: Option<Speaker>) -> EngineResult<()> {
        self.timeline.set_speaker(role, speaker)
    }

    /// Mixer channel of a role.
    pub fn channel_id(&self, title: &str) -> EngineResult<ChannelId> {
        self.role_channel(title)
    }

    fn role_channel(&self, title: &str) -> EngineResult<ChannelId> {
        self.timeline
            .role(title)
            .map_err(|_| EngineError::not_found(EntityKind::Channel, title))?;
        self.linker.channel_of(title)
    }

    // ═══════════════════════════════════════════════════════════════════
    // Clips
    // ═══════════════════════════════════════════════════════════════════

    /// Place a clip on a role's channel, optionally importing its content.
    ///
    /// Import failure does not undo the clip; it is reported in the
    /// returned [`ClipImport`].
    #[allow(clippy::too_many_arguments)]
    pub fn add_clip(
        &mut self,
        part_type: PartType,
        title: &str,
        description: Option<&str>,
        channel: &str,
        time: TimeMs,
        duration: TimeMs,
        content: Option<&Path>,
    ) -> EngineResult<ClipImport> {
        self.role_channel(channel)?;
        let mut part = Part::new(title, part_type, time, duration);
        part.description = description.map(str::to_string);
        self.timeline.add_part(channel, part)?;

        let import = match content {
            None => ClipImport::NoContent,
            Some(path) => match self.bind(title, channel, path) {
                Ok(()) => ClipImport::Bound,
                Err(e) => {
                    log::warn!("clip '{title}' created without content: {e}");
                    ClipImport::Failed(e)
                }
            },
        };
        self.publish_clips();

        log::debug!("added clip '{title}' on '{channel}' at {time} ms");
        Ok(import)
    }

    pub fn move_clip(&mut self, title: &str, channel: &str, new_time: TimeMs) -> EngineResult<()> {
        self.role_channel(channel)?;
        self.timeline.move_part(channel, title, new_time)?;
        self.publish_clips();
        log::debug!("moved clip '{title}' to {new_time} ms");
        Ok(())
    }

    /// Head trim. Position and content in-point move together.
    pub fn set_clip_time_in(&mut self, title: &str, channel: &str, new_in: TimeMs) -> EngineResult<()> {
        self.role_channel(channel)?;
        self.timeline.trim_in(channel, title, new_in)?;
        self.publish_clips();
        Ok(())
    }

    /// Tail trim. Only the duration changes.
    pub fn set_clip_time_out(&mut self, title: &str, channel: &str, new_out: TimeMs) -> EngineResult<()> {
        self.role_channel(channel)?;
        self.timeline.trim_out(channel, title, new_out)?;
        self.publish_clips();
        Ok(())
    }

    /// Split a clip at `split_time`. Returns the title of the right half.
    pub fn split_clip(&mut self, title: &str, channel: &str, split_time: TimeMs) -> EngineResult<String> {
        self.role_channel(channel)?;
        let right = self.timeline.split_part(channel, title, split_time)?;
        self.publish_clips();
        log::debug!("split clip '{title}' at {split_time} ms into '{right}'");
        Ok(right)
    }

    pub fn remove_clip(&mut self, title: &str, channel: &str) -> EngineResult<()> {
        self.role_channel(channel)?;
        self.timeline.remove_part(channel, title)?;
        self.publish_clips();
        self.prune_content();
        log::debug!("removed clip '{title}' from '{channel}'");
        Ok(())
    }

    /// Import `file` and bind it to an existing clip from its start.
    pub fn set_clip_content(&mut self, title: &str, channel: &str, file: &Path) -> EngineResult<()> {
        self.role_channel(channel)?;
        self.timeline.part(channel, title)?;
        self.bind(title, channel, file)?;
        self.publish_clips();
        self.prune_content();
        log::debug!("bound '{}' to clip '{title}'", file.display());
        Ok(())
    }

    fn bind(&mut self, title: &str, channel: &str, file: &Path) -> EngineResult<()> {
        let handle = self.store.import(self.importer.as_ref(), file)?;
        self.timeline.bind_content(channel, title, handle)
    }

    pub fn clips(&self, channel: &str) -> EngineResult<&[Part]> {
        self.role_channel(channel)?;
        Ok(self.timeline.role(channel)?.parts())
    }

    pub fn clip(&self, title: &str, channel: &str) -> EngineResult<&Part> {
        self.role_channel(channel)?;
        self.timeline.part(channel, title)
    }

    // ═══════════════════════════════════════════════════════════════════
    // Sections
    // ═══════════════════════════════════════════════════════════════════

    pub fn add_section(&mut self, title: &str, position: TimeMs, duration: TimeMs) -> EngineResult<()> {
        self.timeline.add_section(Section::new(title, position, duration))
    }

    pub fn remove_section(&mut self, position: TimeMs) -> EngineResult<Section> {
        self.timeline.remove_section(position)
    }

    pub fn sections(&self) -> impl Iterator<Item = &Section> {
        self.timeline.sections()
    }

    /// Latest end over all clips and sections.
    pub fn project_length(&self) -> TimeMs {
        self.timeline.project_length()
    }

    pub fn timeline(&self) -> &Timeline {
        &self.timeline
    }

    // ═══════════════════════════════════════════════════════════════════
    // Mixer
    // ═══════════════════════════════════════════════════════════════════

    pub fn mixer(&self) -> &MixerGraph {
        &self.mixer
    }

    pub fn master_channel(&self) -> &Channel {
        self.mixer.master_channel()
    }

    pub fn create_basic_channel(&mut self, name: &str) -> EngineResult<ChannelId> {
        let id = self.mixer.create_basic_channel(name)?;
        self.publish_graph();
        Ok(id)
    }

    pub fn create_gated_channel(&mut self, name: &str) -> EngineResult<ChannelId> {
        let id = self.mixer.create_gated_channel(name)?;
        self.publish_graph();
        Ok(id)
    }

    pub fn create_return_channel(&mut self, name: &str) -> EngineResult<ChannelId> {
        let id = self.mixer.create_return_channel(name)?;
        self.publish_graph();
        Ok(id)
    }

    pub fn create_group_channel(&mut self, name: &str) -> EngineResult<ChannelId> {
        let id = self.mixer.create_group_channel(name)?;
        self.publish_graph();
        Ok(id)
    }

    pub fn create_sidechained_channel(&mut self, name: &str, target: ChannelId) -> EngineResult<ChannelId> {
        let id = self.mixer.create_sidechained_channel(name, target)?;
        self.publish_graph();
        Ok(id)
    }

    /// Remove a bus. Role channels go through [`Self::remove_channel`].
    pub fn remove_mixer_channel(&mut self, id: ChannelId) -> EngineResult<()> {
        if let Some(role) = self.linker.role_of(id) {
            return Err(EngineError::illegal(format!(
                "channel #{id} belongs to role '{role}'"
            )));
        }
        self.retire_channel(id)
    }

    /// Take a channel out of the live graph in two steps: first a snapshot
    /// with it silenced and detached, then one without it.
    fn retire_channel(&mut self, id: ChannelId) -> EngineResult<()> {
        let mut staged = self.mixer.clone();
        staged.detach(id)?;
        self.mixer.remove_channel(id)?;
        self.publish_compiled(Some(&staged));
        self.publish_graph();
        Ok(())
    }

    pub fn link_channel(&mut self, src: ChannelId, ret: ChannelId) -> EngineResult<()> {
        self.mixer.link_channel(src, ret)?;
        self.publish_graph();
        Ok(())
    }

    pub fn unlink_channel(&mut self, src: ChannelId, ret: ChannelId) -> EngineResult<()> {
        self.mixer.unlink_channel(src, ret)?;
        self.publish_graph();
        Ok(())
    }

    pub fn link_to_group(&mut self, channel: ChannelId, group: ChannelId) -> EngineResult<()> {
        self.mixer.link_to_group(channel, group)?;
        self.publish_graph();
        Ok(())
    }

    pub fn unlink_from_group(&mut self, channel: ChannelId, group: ChannelId) -> EngineResult<()> {
        self.mixer.unlink_from_group(channel, group)?;
        self.publish_graph();
        Ok(())
    }

    pub fn link_to_sidechained(&mut self, channel: ChannelId, target: ChannelId) -> EngineResult<()> {
        self.mixer.link_to_sidechained(channel, target)?;
        self.publish_graph();
        Ok(())
    }

    pub fn set_volume(&mut self, id: ChannelId, volume: f32) -> EngineResult<()> {
        self.mixer.set_volume(id, volume)?;
        self.publish_levels();
        Ok(())
    }

    pub fn set_pan(&mut self, id: ChannelId, pan: f32) -> EngineResult<()> {
        self.mixer.set_pan(id, pan)?;
        self.publish_levels();
        Ok(())
    }

    /// Enable or disable a bus. Role channels follow mute/solo instead.
    pub fn set_enabled(&mut self, id: ChannelId, enabled: bool) -> EngineResult<()> {
        if self.linker.is_role_channel(id) {
            return Err(EngineError::illegal(format!(
                "channel #{id} is governed by mute and solo"
            )));
        }
        if enabled {
            self.mixer.enable(id)?;
        } else {
            self.mixer.disable(id)?;
        }
        self.publish_levels();
        Ok(())
    }

    /// Replace a channel's whole processing chain.
    pub fn set_chain(&mut self, id: ChannelId, chain: Option<ProcessingChain>) -> EngineResult<()> {
        if let Some(chain) = &chain {
            self.check_units(chain)?;
        }
        self.mixer.set_chain(id, chain)?;
        self.publish_graph();
        Ok(())
    }

    pub fn set_unit_parameters(
        &mut self,
        id: ChannelId,
        index: usize,
        params: &ParamMap,
    ) -> EngineResult<()> {
        self.mixer.chain_mut(id)?.set_unit_parameters(index, params)?;
        self.publish_graph();
        Ok(())
    }

    fn check_units(&self, chain: &ProcessingChain) -> EngineResult<()> {
        match chain.units().iter().find(|u| !self.registry.contains(u.kind)) {
            Some(missing) => Err(EngineError::not_found(
                EntityKind::Unit,
                format!("{:?}", missing.kind),
            )),
            None => Ok(()),
        }
    }

    // ═══════════════════════════════════════════════════════════════════
    // Mute / solo
    // ═══════════════════════════════════════════════════════════════════

    /// Toggle mute on a role's channel. Returns whether it is now muted.
    pub fn set_mute(&mut self, title: &str) -> EngineResult<bool> {
        let id = self.role_channel(title)?;
        let muted = self.mute_solo.set_mute(id)?;
        self.sync_enabled();
        self.publish_levels();
        log::debug!("'{title}' muted: {muted}");
        Ok(muted)
    }

    pub fn set_solo(&mut self, title: &str) -> EngineResult<()> {
        let id = self.role_channel(title)?;
        self.mute_solo.set_solo(id)?;
        self.sync_enabled();
        self.publish_levels();
        log::debug!("'{title}' soloed");
        Ok(())
    }

    pub fn remove_solo(&mut self, title: &str) -> EngineResult<()> {
        let id = self.role_channel(title)?;
        self.mute_solo.remove_solo(id)?;
        self.sync_enabled();
        self.publish_levels();
        Ok(())
    }

    pub fn channel_state(&self, title: &str) -> EngineResult<ChannelState> {
        Ok(self.mute_solo.state(self.role_channel(title)?))
    }

    pub fn solo_mode(&self) -> SoloMode {
        self.mute_solo.mode()
    }

    /// Write the derived enabled flags into the mixer.
    fn sync_enabled(&mut self) {
        for &id in self.mute_solo.registered() {
            let result = if self.mute_solo.is_enabled(id) {
                self.mixer.enable(id)
            } else {
                self.mixer.disable(id)
            };
            if let Err(e) = result {
                log::warn!("mute/solo out of sync with mixer: {e}");
            }
        }
    }

    // ═══════════════════════════════════════════════════════════════════
    // Persistence
    // ═══════════════════════════════════════════════════════════════════

    pub fn document(&self) -> ProjectDocument {
        ProjectDocument::capture(&self.timeline, &self.mixer, &self.mute_solo, &self.linker)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> EngineResult<()> {
        let path = path.as_ref();
        self.document().save(path)?;
        log::debug!("saved project to {}", path.display());
        Ok(())
    }

    /// Replace the project with the one stored at `path`.
    ///
    /// Content that fails to re-import leaves its clip without content; those
    /// failures are returned. Any other problem leaves the current project
    /// untouched.
    pub fn load(&mut self, path: impl AsRef<Path>) -> EngineResult<Vec<EngineError>> {
        let path = path.as_ref();
        let doc = ProjectDocument::load(path)?;
        let failures = self.restore(&doc)?;
        log::debug!(
            "loaded project from {} ({} import failure(s))",
            path.display(),
            failures.len()
        );
        Ok(failures)
    }

    /// Rebuild the whole project from a document.
    pub fn restore(&mut self, doc: &ProjectDocument) -> EngineResult<Vec<EngineError>> {
        let mut mixer = MixerGraph::new(self.default_volume);
        let mut linker = ChannelLinker::new();
        let mut mute_solo = MuteSoloController::new();
        let mut timeline = Timeline::new();
        let mut store = ContentStore::new();
        let mut failures = Vec::new();

        let mut ids: BTreeMap<&str, ChannelId> = BTreeMap::new();
        let lookup = |ids: &BTreeMap<&str, ChannelId>, name: &str| {
            ids.get(name)
                .copied()
                .ok_or_else(|| EngineError::not_found(EntityKind::Channel, name))
        };

        for record in &doc.mixer.channels {
            let id = if record.kind == ChannelKind::Master {
                mixer.master()
            } else {
                let sidechain = record
                    .sidechain
                    .as_deref()
                    .map(|name| lookup(&ids, name))
                    .transpose()?;
                mixer.create_channel(&record.name, record.kind, sidechain)?
            };
            ids.insert(&record.name, id);
            mixer.set_volume(id, record.volume)?;
            mixer.set_pan(id, record.pan)?;

            let chain = match &record.chain {
                Some(units) => {
                    let chain = units
                        .iter()
                        .cloned()
                        .fold(ProcessingChain::builder(), |b, spec| b.spec(spec))
                        .build()?;
                    self.check_units(&chain)?;
                    Some(chain)
                }
                None => None,
            };
            mixer.set_chain(id, chain)?;

            if record.role {
                linker.link(record.name.clone(), id);
                mute_solo.register(id);
            }
        }

        for record in &doc.mixer.channels {
            let id = lookup(&ids, &record.name)?;
            match &record.output {
                RouteRecord::Group(name) => mixer.link_to_group(id, lookup(&ids, name)?)?,
                RouteRecord::Sidechained(name) => {
                    mixer.link_to_sidechained(id, lookup(&ids, name)?)?
                }
                RouteRecord::Master | RouteRecord::Device => {}
            }
            for name in &record.sends {
                mixer.link_channel(id, lookup(&ids, name)?)?;
            }
        }

        for name in &doc.mixer.muted {
            mute_solo.set_mute(lookup(&ids, name)?)?;
        }
        for name in &doc.mixer.soloed {
            mute_solo.set_solo(lookup(&ids, name)?)?;
        }

        for record in &doc.roles {
            let key = &record.key;
            linker.channel_of(&key.title)?;
            let mut role = Role::new(key.title.clone(), key.role_type);
            role.description = record.description.clone();
            role.notes = record.notes.clone();
            timeline.add_role(role)?;
            if let Some(speaker) = &key.speaker {
                timeline.set_speaker(&key.title, Some(speaker.clone()))?;
            }

            for part_record in &record.parts {
                let mut part = Part::new(
                    part_record.title.clone(),
                    part_record.part_type,
                    part_record.position,
                    part_record.duration,
                );
                part.description = part_record.description.clone();
                if let Some(content) = &part_record.content {
                    match store.import(self.importer.as_ref(), &content.path) {
                        Ok(handle) => {
                            part.content = Some(Content {
                                handle,
                                offset_ms: content.offset_ms,
                                duration_ms: content.duration_ms,
                            });
                        }
                        Err(e) => {
                            log::warn!("clip '{}' loaded without content: {e}", part.title);
                            failures.push(e);
                        }
                    }
                }
                timeline.restore_part(&key.title, part)?;
            }
        }

        for section in &doc.sections {
            timeline.add_section(section.clone())?;
        }

        for &id in mute_solo.registered() {
            if mute_solo.is_enabled(id) {
                mixer.enable(id)?;
            } else {
                mixer.disable(id)?;
            }
        }

        self.timeline = timeline;
        self.mixer = mixer;
        self.mute_solo = mute_solo;
        self.linker = linker;
        self.store = store;
        self.publish_graph();
        Ok(failures)
    }

    // ═══════════════════════════════════════════════════════════════════
    // Render publication
    // ═══════════════════════════════════════════════════════════════════

    /// Retry deferred snapshots and free graphs the render pass is done with.
    /// Returns how many retired snapshots were freed.
    ///
    /// Every edit already does this; call it when the project sits idle.
    pub fn collect_garbage(&mut self) -> usize {
        let freed = self.publisher.collect_garbage();
        if !self.publisher.flush() {
            log::debug!("render queue still full; newest graph stays deferred");
        }
        freed
    }

    /// Whether a graph is waiting for room in the render queue.
    pub fn has_deferred_update(&self) -> bool {
        self.publisher.has_deferred()
    }

    /// Retired snapshots not yet freed.
    pub fn retired_snapshots(&self) -> usize {
        self.publisher.pending_garbage()
    }

    /// Generation of the newest published graph.
    pub fn graph_generation(&self) -> u64 {
        self.generation
    }

    fn publish_graph(&mut self) {
        self.publish_compiled(None);
    }

    /// Compile and publish a full graph, from `staged` instead of the live
    /// mixer if given.
    fn publish_compiled(&mut self, staged: Option<&MixerGraph>) {
        self.generation += 1;
        let mixer = staged.unwrap_or(&self.mixer);
        let (mut graph, layout) = compile(
            mixer,
            &self.registry,
            self.sample_rate,
            self.max_block,
            self.generation,
        );
        let schedule = self
            .linker
            .schedule(&self.timeline, &self.store, &layout, self.sample_rate);
        graph.replace_schedule(schedule);
        self.layout = layout;
        self.publisher.publish(GraphUpdate::Graph(Box::new(graph)));
    }

    fn publish_clips(&mut self) {
        let schedule = self
            .linker
            .schedule(&self.timeline, &self.store, &self.layout, self.sample_rate);
        if !self.publisher.publish(GraphUpdate::Clips(Box::new(schedule))) {
            self.publish_graph();
        }
    }

    fn publish_levels(&mut self) {
        let levels = levels(&self.mixer, &self.layout).into_boxed_slice();
        let update = GraphUpdate::Levels {
            generation: self.layout.generation(),
            levels,
        };
        if !self.publisher.publish(update) {
            self.publish_graph();
        }
    }

    /// Forget decoded audio no clip refers to any more.
    fn prune_content(&mut self) {
        let in_use: BTreeSet<ContentId> = self
            .timeline
            .roles()
            .iter()
            .flat_map(|r| r.parts())
            .filter_map(|p| p.content.as_ref())
            .map(|c| c.handle.id)
            .collect();
        self.store.retain(|id| in_use.contains(&id));
    }

    #[cfg(test)]
    pub(crate) fn content_count(&self) -> usize {
        self.store.len()
    }
}
