// src/state/timeline.rs
//
// The planning timeline: roles with their parts, and sections.
//
// Every operation validates before it mutates. An `Err` leaves the
// timeline exactly as it was.

use std::collections::BTreeMap;

use crate::error::{EngineError, EngineResult, EntityKind};

use super::content::ContentHandle;
use super::role::{Content, Part, Role, Section, Speaker};
use super::{RoleType, TimeMs};

/// Roles (in creation order) and sections (by position).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Timeline {
    roles: Vec<Role>,
    sections: BTreeMap<TimeMs, Section>,
}

fn end_of(position: TimeMs, duration: TimeMs) -> EngineResult<TimeMs> {
    position
        .checked_add(duration)
        .ok_or_else(|| EngineError::boundary(format!("{position} + {duration} overflows")))
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    // ───────────────────────────────────────────────────────────────
    // Roles
    // ───────────────────────────────────────────────────────────────

    pub fn roles(&self) -> &[Role] {
        &self.roles
    }

    pub fn role(&self, title: &str) -> EngineResult<&Role> {
        self.roles
            .iter()
            .find(|r| r.title == title)
            .ok_or_else(|| EngineError::not_found(EntityKind::Role, title))
    }

    fn role_mut(&mut self, title: &str) -> EngineResult<&mut Role> {
        self.roles
            .iter_mut()
            .find(|r| r.title == title)
            .ok_or_else(|| EngineError::not_found(EntityKind::Role, title))
    }

    pub fn add_role(&mut self, role: Role) -> EngineResult<()> {
        if self.roles.iter().any(|r| r.title == role.title) {
            return Err(EngineError::duplicate(EntityKind::Role, role.title));
        }
        self.roles.push(role);
        Ok(())
    }

    /// Remove a role together with all of its parts.
    pub fn remove_role(&mut self, title: &str) -> EngineResult<Role> {
        let index = self
            .roles
            .iter()
            .position(|r| r.title == title)
            .ok_or_else(|| EngineError::not_found(EntityKind::Role, title))?;
        Ok(self.roles.remove(index))
    }

    pub fn add_note(&mut self, role: &str, note: impl Into<String>) -> EngineResult<()> {
        self.role_mut(role)?.notes.push(note.into());
        Ok(())
    }

    /// Assign the speaker of a speech role.
    pub fn set_speaker(&mut self, role: &str, speaker: Option<Speaker>) -> EngineResult<()> {
        let role = self.role_mut(role)?;
        if role.role_type != RoleType::Speech {
            return Err(EngineError::illegal(format!(
                "role '{}' is not a speech role",
                role.title
            )));
        }
        role.speaker = speaker;
        Ok(())
    }

    // ───────────────────────────────────────────────────────────────
    // Parts
    // ───────────────────────────────────────────────────────────────

    pub fn part(&self, role: &str, title: &str) -> EngineResult<&Part> {
        self.role(role)?
            .part(title)
            .ok_or_else(|| EngineError::not_found(EntityKind::Clip, title))
    }

    fn locate(&mut self, role: &str, title: &str) -> EngineResult<(&mut Role, usize)> {
        let role = self.role_mut(role)?;
        let index = role
            .part_index(title)
            .ok_or_else(|| EngineError::not_found(EntityKind::Clip, title))?;
        Ok((role, index))
    }

    fn check_free(
        role: &Role,
        clip: &str,
        start: TimeMs,
        end: TimeMs,
        exclude: Option<&str>,
    ) -> EngineResult<()> {
        match role.find_overlap(start, end, exclude) {
            Some(_) => Err(EngineError::Overlap {
                clip: clip.to_string(),
                channel: role.title.clone(),
                start,
                end,
            }),
            None => Ok(()),
        }
    }

    /// Place a new part on `role`.
    pub fn add_part(&mut self, role: &str, part: Part) -> EngineResult<()> {
        if part.duration == 0 {
            return Err(EngineError::boundary("a clip cannot be empty"));
        }
        let end = end_of(part.position, part.duration)?;
        let role = self.role_mut(role)?;
        if role.part(&part.title).is_some() {
            return Err(EngineError::duplicate(EntityKind::Clip, part.title));
        }
        Self::check_free(role, &part.title, part.position, end, None)?;
        role.parts.push(part);
        role.sort_parts();
        Ok(())
    }

    pub fn remove_part(&mut self, role: &str, title: &str) -> EngineResult<Part> {
        let (role, index) = self.locate(role, title)?;
        Ok(role.parts.remove(index))
    }

    /// Move a part to `new_time`, keeping its duration and content.
    pub fn move_part(&mut self, role: &str, title: &str, new_time: TimeMs) -> EngineResult<()> {
        let (role, index) = self.locate(role, title)?;
        let end = end_of(new_time, role.parts[index].duration)?;
        Self::check_free(role, title, new_time, end, Some(title))?;
        role.parts[index].position = new_time;
        role.sort_parts();
        Ok(())
    }

    /// Head trim: move the start edge and the content in-point together.
    pub fn trim_in(&mut self, role: &str, title: &str, new_in: TimeMs) -> EngineResult<()> {
        let (role, index) = self.locate(role, title)?;
        let part = &role.parts[index];
        let end = part.end();
        if new_in >= end {
            return Err(EngineError::boundary(format!(
                "time-in {new_in} must lie before the clip end {end}"
            )));
        }

        let new_offset = match &part.content {
            Some(content) => {
                let shifted = content.offset_ms as i128 + new_in as i128 - part.position as i128;
                if shifted < 0 {
                    return Err(EngineError::boundary(format!(
                        "time-in {new_in} reaches before the start of the content"
                    )));
                }
                Some(shifted as TimeMs)
            }
            None => None,
        };
        Self::check_free(role, title, new_in, end, Some(title))?;

        let part = &mut role.parts[index];
        part.position = new_in;
        part.duration = end - new_in;
        if let (Some(content), Some(offset)) = (part.content.as_mut(), new_offset) {
            content.offset_ms = offset;
            content.duration_ms = end - new_in;
        }
        role.sort_parts();
        Ok(())
    }

    /// Tail trim: change the duration only.
    pub fn trim_out(&mut self, role: &str, title: &str, new_out: TimeMs) -> EngineResult<()> {
        let (role, index) = self.locate(role, title)?;
        let position = role.parts[index].position;
        if new_out <= position {
            return Err(EngineError::boundary(format!(
                "time-out {new_out} must lie after the clip start {position}"
            )));
        }
        Self::check_free(role, title, position, new_out, Some(title))?;

        let part = &mut role.parts[index];
        part.duration = new_out - position;
        if let Some(content) = part.content.as_mut() {
            content.duration_ms = part.duration;
        }
        Ok(())
    }

    /// Split a part at `split_time`, strictly inside its interval.
    ///
    /// The left half keeps the title; the right half's title is returned.
    pub fn split_part(&mut self, role: &str, title: &str, split_time: TimeMs) -> EngineResult<String> {
        let (role, index) = self.locate(role, title)?;
        let part = &role.parts[index];
        if split_time <= part.position || split_time >= part.end() {
            return Err(EngineError::boundary(format!(
                "split point {split_time} is not inside [{}, {})",
                part.position,
                part.end()
            )));
        }

        let right_title = Self::fresh_title(role, title);
        let left_len = split_time - part.position;

        let mut right = part.clone();
        right.title = right_title.clone();
        right.position = split_time;
        right.duration = part.duration - left_len;
        if let Some(content) = right.content.as_mut() {
            content.offset_ms += left_len;
            content.duration_ms = right.duration;
        }

        let left = &mut role.parts[index];
        left.duration = left_len;
        if let Some(content) = left.content.as_mut() {
            content.duration_ms = left_len;
        }
        role.parts.insert(index + 1, right);
        Ok(right_title)
    }

    fn fresh_title(role: &Role, base: &str) -> String {
        let mut n = 2;
        loop {
            let candidate = format!("{base} ({n})");
            if role.part(&candidate).is_none() {
                return candidate;
            }
            n += 1;
        }
    }

    /// Bind imported content to a part, starting at the file's beginning.
    pub fn bind_content(&mut self, role: &str, title: &str, handle: ContentHandle) -> EngineResult<()> {
        let (role, index) = self.locate(role, title)?;
        let part = &mut role.parts[index];
        part.content = Some(Content {
            handle,
            offset_ms: 0,
            duration_ms: part.duration,
        });
        Ok(())
    }

    /// Restore a part verbatim, content included. Used when loading.
    pub(crate) fn restore_part(&mut self, role: &str, part: Part) -> EngineResult<()> {
        if let Some(content) = &part.content {
            if content.duration_ms != part.duration {
                return Err(EngineError::boundary(format!(
                    "content of '{}' does not match its duration",
                    part.title
                )));
            }
        }
        self.add_part(role, part)
    }

    // ───────────────────────────────────────────────────────────────
    // Sections
    // ───────────────────────────────────────────────────────────────

    pub fn sections(&self) -> impl Iterator<Item = &Section> {
        self.sections.values()
    }

    pub fn add_section(&mut self, section: Section) -> EngineResult<()> {
        if section.duration == 0 {
            return Err(EngineError::boundary("a section cannot be empty"));
        }
        end_of(section.position, section.duration)?;
        if self.sections.contains_key(&section.position) {
            return Err(EngineError::illegal(format!(
                "a section already starts at {}",
                section.position
            )));
        }
        self.sections.insert(section.position, section);
        Ok(())
    }

    pub fn remove_section(&mut self, position: TimeMs) -> EngineResult<Section> {
        self.sections
            .remove(&position)
            .ok_or_else(|| EngineError::not_found(EntityKind::Section, position.to_string()))
    }

    /// Latest end time over all parts and sections.
    pub fn project_length(&self) -> TimeMs {
        let parts = self.roles.iter().map(Role::end).max().unwrap_or(0);
        let sections = self.sections.values().map(Section::end).max().unwrap_or(0);
        parts.max(sections)
    }
}
