// src/state/content.rs
//
// Content store: decoded audio shared between parts and render graphs.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{EngineError, EngineResult};

use super::TimeMs;

/// Identifier of decoded audio in the [`ContentStore`].
pub type ContentId = u32;

/// Reference to imported audio, as held by a part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentHandle {
    pub id: ContentId,

    /// File the audio was imported from.
    pub path: PathBuf,

    /// Length of the whole file.
    pub duration_ms: TimeMs,
}

/// Decoded audio as produced by a [`ContentImporter`].
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    pub sample_rate: u32,

    /// 1 = mono, 2 = stereo. Extra channels are ignored on playback.
    pub channels: usize,

    /// Interleaved samples.
    pub samples: Vec<f32>,
}

impl DecodedAudio {
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels.max(1)
    }

    pub fn duration_ms(&self) -> TimeMs {
        (self.frames() as u64 * 1000) / self.sample_rate.max(1) as u64
    }
}

/// Collaborator turning a file into decoded audio.
pub trait ContentImporter: Send {
    /// Fails with `ImportFailure` for unreadable or unsupported files.
    fn import(&self, path: &Path) -> EngineResult<DecodedAudio>;
}

/// Imports WAV files (integer or float PCM) with `hound`.
#[derive(Debug, Clone, Copy, Default)]
pub struct WavImporter;

impl ContentImporter for WavImporter {
    fn import(&self, path: &Path) -> EngineResult<DecodedAudio> {
        let failure = |reason: String| EngineError::ImportFailure {
            path: path.to_path_buf(),
            reason,
        };

        let reader = hound::WavReader::open(path).map_err(|e| failure(e.to_string()))?;
        let spec = reader.spec();
        let samples: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Int => {
                let max_val = (1i64 << (spec.bits_per_sample - 1)) as f32;
                reader
                    .into_samples::<i32>()
                    .map(|s| s.map(|s| s as f32 / max_val))
                    .collect::<Result<_, _>>()
                    .map_err(|e| failure(e.to_string()))?
            }
            hound::SampleFormat::Float => reader
                .into_samples::<f32>()
                .collect::<Result<_, _>>()
                .map_err(|e| failure(e.to_string()))?,
        };

        let audio = DecodedAudio {
            sample_rate: spec.sample_rate,
            channels: spec.channels as usize,
            samples,
        };
        if audio.channels == 0 || audio.frames() == 0 {
            return Err(failure("file holds no audio".into()));
        }
        Ok(audio)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Store
// ═══════════════════════════════════════════════════════════════════════════

/// All imported audio, deduplicated by path.
///
/// Render graphs hold `Arc` clones, so entries stay alive while a
/// snapshot referencing them is still in flight.
#[derive(Debug, Default)]
pub struct ContentStore {
    entries: HashMap<ContentId, (ContentHandle, Arc<DecodedAudio>)>,
    by_path: HashMap<PathBuf, ContentId>,
    next_id: ContentId,
}

impl ContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Import `path`, reusing an earlier import of the same file.
    pub fn import(
        &mut self,
        importer: &dyn ContentImporter,
        path: &Path,
    ) -> EngineResult<ContentHandle> {
        if let Some(id) = self.by_path.get(path) {
            if let Some((handle, _)) = self.entries.get(id) {
                return Ok(handle.clone());
            }
        }
        let audio = importer.import(path)?;
        Ok(self.insert(path, audio))
    }

    /// Add decoded audio under `path`, replacing any previous entry for it.
    pub fn insert(&mut self, path: &Path, audio: DecodedAudio) -> ContentHandle {
        let id = self.next_id;
        self.next_id += 1;
        let handle = ContentHandle {
            id,
            path: path.to_path_buf(),
            duration_ms: audio.duration_ms(),
        };
        if let Some(old) = self.by_path.insert(path.to_path_buf(), id) {
            self.entries.remove(&old);
        }
        self.entries.insert(id, (handle.clone(), Arc::new(audio)));
        handle
    }

    pub fn audio(&self, id: ContentId) -> Option<&Arc<DecodedAudio>> {
        self.entries.get(&id).map(|(_, audio)| audio)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop entries no part refers to any more.
    pub fn retain(&mut self, mut in_use: impl FnMut(ContentId) -> bool) {
        self.entries.retain(|id, _| in_use(*id));
        let entries = &self.entries;
        self.by_path.retain(|_, id| entries.contains_key(id));
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.by_path.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_wav(path: &Path, frames: usize) {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 8_000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for i in 0..frames {
            writer.write_sample((i % 100) as i16 * 100).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn test_wav_import_reports_duration() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        write_wav(&path, 4_000);

        let audio = WavImporter.import(&path).unwrap();
        assert_eq!(audio.channels, 1);
        assert_eq!(audio.duration_ms(), 500);
        assert!(audio.samples.iter().all(|s| s.abs() <= 1.0));
    }

    #[test]
    fn test_unreadable_file_is_import_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, "not audio").unwrap();
        let err = WavImporter.import(&path).unwrap_err();
        assert!(matches!(err, EngineError::ImportFailure { .. }));
    }

    #[test]
    fn test_store_deduplicates_by_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        write_wav(&path, 800);

        let mut store = ContentStore::new();
        let a = store.import(&WavImporter, &path).unwrap();
        let b = store.import(&WavImporter, &path).unwrap();
        assert_eq!(a, b);
        assert_eq!(store.len(), 1);

        store.retain(|_| false);
        assert!(store.is_empty());
    }
}
