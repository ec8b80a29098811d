// src/lib.rs
//
// Library entry point.
//
// Timeline/mixer engine for multi-track spoken-word productions: roles
// carry clips on a timeline, clips route through a mixer graph, and a
// transport drives real-time playback, recording and export.

mod audio_buffer;
mod capture;
mod chain;
mod compile;
mod config;
mod error;
mod graph;
mod handoff;
mod manager;
mod renderer;
mod state;
mod transport;
mod unit;
mod unit_factory;
mod units;

// Re-export key types for Rust consumers
pub use audio_buffer::AudioBuffer;
pub use capture::write_wav;
pub use chain::{ChainBuilder, ProcessingChain, UnitSpec};
pub use config::EngineConfig;
pub use error::{EngineError, EngineResult, EntityKind};
pub use graph::RenderGraph;
pub use manager::{ClipImport, TimelineManager, create_engine, create_engine_with_units};
pub use renderer::Renderer;
pub use state::{
    Channel, ChannelId, ChannelKind, ChannelLinker, ChannelRecord, ChannelState, Content,
    ContentHandle, ContentId, ContentImporter, ContentRecord, ContentStore, DecodedAudio,
    DOCUMENT_VERSION, MixerGraph, MixerRecord, MuteSoloController, OutputTarget, Part, PartRecord,
    PartType, ProjectDocument, Role, RoleKey, RoleRecord, RoleType, RouteRecord, Section, SoloMode,
    Speaker, TimeMs, Timeline, WavImporter,
};
pub use transport::{TransportEngine, TransportState};
pub use unit::{AudioUnit, ParamMap, ProcessContext, UnitKind};
pub use unit_factory::{SimpleUnitFactory, UnitFactory, UnitRegistry};
pub use units::{
    CompressorUnit, FilterType, GainUnit, GateUnit, ReverbUnit, SvfFilter, register_standard_units,
    standard_registry,
};
