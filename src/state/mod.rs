// src/state/mod.rs
//
// Declarative control-plane model.
//
// These structures describe the project: what should play, where, and
// through which routing. The render pass never touches them; the
// manager compiles them into render graphs and publishes those.
//
// Key principles:
// - Every mutation validates first, so a failed call changes nothing
// - Identity is by title (roles, parts, channels) or position (sections)
// - Persistence goes through `ProjectDocument`, never these types directly

mod content;
mod linker;
mod mixer;
mod mute_solo;
mod project;
mod role;
mod timeline;

pub use content::*;
pub use linker::*;
pub use mixer::*;
pub use mute_solo::*;
pub use project::*;
pub use role::*;
pub use timeline::*;

/// Timeline time in milliseconds.
pub type TimeMs = u64;
