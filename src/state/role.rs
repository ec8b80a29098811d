// src/state/role.rs
//
// Planning entities: roles, their parts (clips), and sections.

use serde::{Deserialize, Serialize};

use super::content::ContentHandle;
use super::TimeMs;

/// What a role carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RoleType {
    Speech,
    Soundtrack,
    Effects,
}

/// What a part carries. Independent of the owning role's type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PartType {
    Speech,
    Soundtrack,
    Effects,
}

/// The person voicing a speech role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Speaker {
    pub name: String,
    pub description: Option<String>,
}

impl Speaker {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Content binding
// ═══════════════════════════════════════════════════════════════════════════

/// Audio bound to a part: which file, and which slice of it.
///
/// `duration_ms` always equals the owning part's duration.
#[derive(Debug, Clone, PartialEq)]
pub struct Content {
    pub handle: ContentHandle,

    /// In-point inside the file.
    pub offset_ms: TimeMs,

    pub duration_ms: TimeMs,
}

// ═══════════════════════════════════════════════════════════════════════════
// Parts
// ═══════════════════════════════════════════════════════════════════════════

/// A time-bounded entry on a role: `[position, position + duration)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Part {
    pub title: String,
    pub part_type: PartType,
    pub description: Option<String>,
    pub position: TimeMs,
    pub duration: TimeMs,
    pub content: Option<Content>,
}

impl Part {
    pub fn new(
        title: impl Into<String>,
        part_type: PartType,
        position: TimeMs,
        duration: TimeMs,
    ) -> Self {
        Self {
            title: title.into(),
            part_type,
            description: None,
            position,
            duration,
            content: None,
        }
    }

    /// Exclusive end time.
    pub fn end(&self) -> TimeMs {
        self.position + self.duration
    }

    /// Half-open interval intersection.
    pub fn overlaps(&self, start: TimeMs, end: TimeMs) -> bool {
        self.position < end && start < self.end()
    }

    pub fn contains(&self, time: TimeMs) -> bool {
        self.position <= time && time < self.end()
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Roles
// ═══════════════════════════════════════════════════════════════════════════

/// A planning lane: speaker, soundtrack or effects.
///
/// Parts are kept sorted by position and never overlap.
#[derive(Debug, Clone, PartialEq)]
pub struct Role {
    pub title: String,
    pub role_type: RoleType,
    pub description: Option<String>,
    pub notes: Vec<String>,
    pub speaker: Option<Speaker>,
    pub(crate) parts: Vec<Part>,
}

impl Role {
    pub fn new(title: impl Into<String>, role_type: RoleType) -> Self {
        Self {
            title: title.into(),
            role_type,
            description: None,
            notes: Vec::new(),
            speaker: None,
            parts: Vec::new(),
        }
    }

    pub fn parts(&self) -> &[Part] {
        &self.parts
    }

    pub fn part(&self, title: &str) -> Option<&Part> {
        self.parts.iter().find(|p| p.title == title)
    }

    pub(crate) fn part_index(&self, title: &str) -> Option<usize> {
        self.parts.iter().position(|p| p.title == title)
    }

    /// First part other than `exclude` intersecting `[start, end)`.
    pub(crate) fn find_overlap(
        &self,
        start: TimeMs,
        end: TimeMs,
        exclude: Option<&str>,
    ) -> Option<&Part> {
        self.parts
            .iter()
            .filter(|p| Some(p.title.as_str()) != exclude)
            .find(|p| p.overlaps(start, end))
    }

    pub(crate) fn sort_parts(&mut self) {
        self.parts.sort_by_key(|p| p.position);
    }

    /// End of the last part, or 0.
    pub fn end(&self) -> TimeMs {
        self.parts.iter().map(Part::end).max().unwrap_or(0)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Sections
// ═══════════════════════════════════════════════════════════════════════════

/// A named timeline marker, keyed by position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    pub title: String,
    pub position: TimeMs,
    pub duration: TimeMs,
}

impl Section {
    pub fn new(title: impl Into<String>, position: TimeMs, duration: TimeMs) -> Self {
        Self {
            title: title.into(),
            position,
            duration,
        }
    }

    pub fn end(&self) -> TimeMs {
        self.position + self.duration
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_touching_parts_do_not_overlap() {
        let part = Part::new("Intro", PartType::Speech, 0, 5000);
        assert!(!part.overlaps(5000, 8000));
        assert!(part.overlaps(4000, 7000));
        assert!(part.contains(4999));
        assert!(!part.contains(5000));
    }

    #[test]
    fn test_find_overlap_excludes_self() {
        let mut role = Role::new("Host", RoleType::Speech);
        role.parts.push(Part::new("Intro", PartType::Speech, 0, 5000));
        assert!(role.find_overlap(1000, 2000, Some("Intro")).is_none());
        assert_eq!(
            role.find_overlap(1000, 2000, None).map(|p| p.title.as_str()),
            Some("Intro")
        );
    }
}
