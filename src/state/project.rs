// src/state/project.rs
//
// Persisted project document.
//
// Roles are keyed by a structured record rather than an encoded string.
// Mixer topology is stored as adjacency by channel name, so ids never
// leak into the file.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::chain::UnitSpec;
use crate::error::{EngineError, EngineResult};

use super::mixer::{ChannelKind, MixerGraph, OutputTarget};
use super::mute_solo::MuteSoloController;
use super::role::{PartType, RoleType, Section, Speaker};
use super::timeline::Timeline;
use super::{ChannelId, ChannelLinker, TimeMs};

/// Current document format.
pub const DOCUMENT_VERSION: u32 = 1;

/// Identity of a role in the document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleKey {
    pub title: String,
    pub speaker: Option<Speaker>,
    pub role_type: RoleType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleRecord {
    pub key: RoleKey,
    pub description: Option<String>,
    #[serde(default)]
    pub notes: Vec<String>,
    #[serde(default)]
    pub parts: Vec<PartRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentRecord {
    pub path: PathBuf,
    pub offset_ms: TimeMs,
    pub duration_ms: TimeMs,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartRecord {
    pub title: String,
    pub part_type: PartType,
    pub description: Option<String>,
    pub position: TimeMs,
    pub duration: TimeMs,
    pub content: Option<ContentRecord>,
}

/// Primary output of a channel, by name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RouteRecord {
    Master,
    Group(String),
    Sidechained(String),
    Device,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelRecord {
    pub name: String,
    pub kind: ChannelKind,

    /// Channel of the role with the same title.
    #[serde(default)]
    pub role: bool,

    pub volume: f32,
    pub pan: f32,
    pub chain: Option<Vec<UnitSpec>>,
    pub output: RouteRecord,

    /// Return buses fed by this channel.
    #[serde(default)]
    pub sends: Vec<String>,

    /// Detector source of a sidechained channel.
    pub sidechain: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MixerRecord {
    /// In creation order; every channel appears after its sidechain source.
    pub channels: Vec<ChannelRecord>,
    #[serde(default)]
    pub muted: Vec<String>,
    #[serde(default)]
    pub soloed: Vec<String>,
}

/// The whole persisted project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectDocument {
    pub version: u32,
    pub roles: Vec<RoleRecord>,
    #[serde(default)]
    pub sections: Vec<Section>,
    pub mixer: MixerRecord,
}

impl ProjectDocument {
    /// Snapshot the control-plane state.
    pub fn capture(
        timeline: &Timeline,
        mixer: &MixerGraph,
        mute_solo: &MuteSoloController,
        linker: &ChannelLinker,
    ) -> Self {
        let roles = timeline
            .roles()
            .iter()
            .map(|role| RoleRecord {
                key: RoleKey {
                    title: role.title.clone(),
                    speaker: role.speaker.clone(),
                    role_type: role.role_type,
                },
                description: role.description.clone(),
                notes: role.notes.clone(),
                parts: role
                    .parts()
                    .iter()
                    .map(|part| PartRecord {
                        title: part.title.clone(),
                        part_type: part.part_type,
                        description: part.description.clone(),
                        position: part.position,
                        duration: part.duration,
                        content: part.content.as_ref().map(|c| ContentRecord {
                            path: c.handle.path.clone(),
                            offset_ms: c.offset_ms,
                            duration_ms: c.duration_ms,
                        }),
                    })
                    .collect(),
            })
            .collect();

        let name_of = |id: ChannelId| {
            mixer
                .channel(id)
                .map(|c| c.name.clone())
                .unwrap_or_default()
        };
        let channels = mixer
            .channels()
            .map(|channel| ChannelRecord {
                name: channel.name.clone(),
                kind: channel.kind,
                role: linker.is_role_channel(channel.id),
                volume: channel.volume,
                pan: channel.pan,
                chain: channel.chain.as_ref().map(|c| c.units().to_vec()),
                output: match channel.output {
                    OutputTarget::Master => RouteRecord::Master,
                    OutputTarget::Group(g) => RouteRecord::Group(name_of(g)),
                    OutputTarget::Sidechained(s) => RouteRecord::Sidechained(name_of(s)),
                    OutputTarget::Device => RouteRecord::Device,
                },
                sends: channel.sends.iter().map(|&r| name_of(r)).collect(),
                sidechain: channel.sidechain_target.map(name_of),
            })
            .collect();

        Self {
            version: DOCUMENT_VERSION,
            roles,
            sections: timeline.sections().cloned().collect(),
            mixer: MixerRecord {
                channels,
                muted: mute_solo.muted().iter().map(|&id| name_of(id)).collect(),
                soloed: mute_solo.soloed().iter().map(|&id| name_of(id)).collect(),
            },
        }
    }

    pub fn to_json(&self) -> EngineResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(text: &str) -> EngineResult<Self> {
        let doc: ProjectDocument = serde_json::from_str(text)?;
        if doc.version != DOCUMENT_VERSION {
            return Err(EngineError::illegal(format!(
                "unsupported project version {}",
                doc.version
            )));
        }
        Ok(doc)
    }

    pub fn save(&self, path: &Path) -> EngineResult<()> {
        let text = self.to_json()?;
        std::fs::write(path, text).map_err(|e| EngineError::io(path, e))
    }

    pub fn load(path: &Path) -> EngineResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| EngineError::io(path, e))?;
        Self::from_json(&text)
    }
}
