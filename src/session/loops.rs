// src/session/loops.rs
// Markers, marker-bounded loops and the single-active-loop rule

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Notice, Session};
use crate::store::now_millis;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Marker {
    pub id: String,
    pub time: f64,
    pub created_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Insertion order, breaks ties between markers at the same time.
    #[serde(default)]
    pub seq: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Loop {
    pub id: String,
    pub start_marker_id: String,
    pub end_marker_id: String,
    pub enabled: bool,
    pub created_at: i64,
}

/// Result of flipping a loop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LoopToggle {
    /// Loop is now the active one; transport should jump to `start`.
    Enabled { start: f64 },
    Disabled,
}

/// Markers, loops and which loop (if any) is active.
///
/// Invariants kept by every method: markers sorted by `(time, seq)`; at most
/// one loop enabled; `active_loop_id` names that loop or is `None`; every
/// loop references two existing markers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoopState {
    pub markers: Vec<Marker>,
    pub loops: Vec<Loop>,
    pub active_loop_id: Option<String>,
    pub edit_mode: bool,
}

impl LoopState {
    /// Adds a marker at `time` clamped into the piece. Returns `None` when
    /// `max_markers` already exist.
    pub fn add_marker(
        &mut self,
        time: f64,
        label: Option<String>,
        duration: f64,
        max_markers: usize,
    ) -> Option<String> {
        if self.markers.len() >= max_markers {
            log::warn!("marker limit of {} reached", max_markers);
            return None;
        }

        let seq = self.markers.iter().map(|m| m.seq + 1).max().unwrap_or(0);
        let marker = Marker {
            id: Uuid::new_v4().to_string(),
            time: clamp_time(time, duration),
            created_at: now_millis(),
            label,
            seq,
        };
        let id = marker.id.clone();
        log::debug!("marker {} added at {:.3}s", id, marker.time);
        self.markers.push(marker);
        self.sort_markers();
        Some(id)
    }

    /// Removes a marker together with every loop bounded by it.
    pub fn remove_marker(&mut self, id: &str) -> bool {
        let before = self.markers.len();
        self.markers.retain(|m| m.id != id);
        if self.markers.len() == before {
            return false;
        }

        let dependent: Vec<String> = self
            .loops
            .iter()
            .filter(|l| l.start_marker_id == id || l.end_marker_id == id)
            .map(|l| l.id.clone())
            .collect();
        for loop_id in dependent {
            self.remove_loop(&loop_id);
        }
        true
    }

    /// Moves a marker. Loops bounded by it are not re-validated, so a loop
    /// can end up with its start marker after its end marker.
    pub fn update_marker_time(&mut self, id: &str, time: f64, duration: f64) -> bool {
        let Some(marker) = self.markers.iter_mut().find(|m| m.id == id) else {
            return false;
        };
        marker.time = clamp_time(time, duration);
        self.sort_markers();
        true
    }

    pub fn update_marker_label(&mut self, id: &str, label: Option<String>) -> bool {
        let Some(marker) = self.markers.iter_mut().find(|m| m.id == id) else {
            return false;
        };
        marker.label = label;
        true
    }

    pub fn marker(&self, id: &str) -> Option<&Marker> {
        self.markers.iter().find(|m| m.id == id)
    }

    pub fn get_loop(&self, id: &str) -> Option<&Loop> {
        self.loops.iter().find(|l| l.id == id)
    }

    /// Creates a disabled loop between two markers, earlier marker first.
    /// Returns `None` at `max_loops` or when either marker is unknown.
    pub fn create_loop(&mut self, a: &str, b: &str, max_loops: usize) -> Option<String> {
        if self.loops.len() >= max_loops {
            log::warn!("loop limit of {} reached", max_loops);
            return None;
        }
        let (Some(first), Some(second)) = (self.marker(a), self.marker(b)) else {
            log::warn!("cannot create loop: unknown marker ({}, {})", a, b);
            return None;
        };

        let (start, end) = if first.time > second.time {
            (second.id.clone(), first.id.clone())
        } else {
            (first.id.clone(), second.id.clone())
        };

        let id = Uuid::new_v4().to_string();
        self.loops.push(Loop {
            id: id.clone(),
            start_marker_id: start,
            end_marker_id: end,
            enabled: false,
            created_at: now_millis(),
        });
        Some(id)
    }

    pub fn remove_loop(&mut self, id: &str) -> bool {
        let before = self.loops.len();
        self.loops.retain(|l| l.id != id);
        if self.active_loop_id.as_deref() == Some(id) {
            self.active_loop_id = None;
        }
        self.loops.len() != before
    }

    /// Flips `id`, disabling every other loop. `None` if `id` is unknown.
    pub fn toggle_loop(&mut self, id: &str) -> Option<LoopToggle> {
        let enable = !self.get_loop(id)?.enabled;
        if enable {
            self.activate(id);
            let (start, _) = self.loop_bounds(id)?;
            Some(LoopToggle::Enabled { start })
        } else {
            self.disable_all();
            Some(LoopToggle::Disabled)
        }
    }

    /// Makes `id` the only enabled loop, or disables all loops for `None`.
    /// Unknown ids leave the state unchanged and return `false`.
    pub fn set_active_loop(&mut self, id: Option<&str>) -> bool {
        match id {
            Some(id) if self.get_loop(id).is_some() => {
                self.activate(id);
                true
            }
            Some(_) => false,
            None => {
                self.disable_all();
                true
            }
        }
    }

    /// Disables every loop. Returns whether anything was enabled.
    pub fn disable_all(&mut self) -> bool {
        let was_active = self.active_loop_id.is_some() || self.loops.iter().any(|l| l.enabled);
        for l in &mut self.loops {
            l.enabled = false;
        }
        self.active_loop_id = None;
        was_active
    }

    pub fn active_loop(&self) -> Option<&Loop> {
        self.active_loop_id.as_deref().and_then(|id| self.get_loop(id))
    }

    /// `[start, end]` of a loop in seconds, lower bound first.
    ///
    /// A loop whose markers were moved past each other is treated as the
    /// interval between them.
    pub fn loop_bounds(&self, id: &str) -> Option<(f64, f64)> {
        let l = self.get_loop(id)?;
        let start = self.marker(&l.start_marker_id)?.time;
        let end = self.marker(&l.end_marker_id)?.time;
        Some((start.min(end), start.max(end)))
    }

    pub fn active_bounds(&self) -> Option<(f64, f64)> {
        self.loop_bounds(self.active_loop_id.as_deref()?)
    }

    pub fn clear(&mut self) {
        self.markers.clear();
        self.loops.clear();
        self.active_loop_id = None;
    }

    /// Repairs a snapshot read from storage so the invariants hold again.
    pub fn normalize(&mut self) {
        self.sort_markers();
        let markers = &self.markers;
        self.loops.retain(|l| {
            markers.iter().any(|m| m.id == l.start_marker_id)
                && markers.iter().any(|m| m.id == l.end_marker_id)
        });

        let active = self
            .active_loop_id
            .clone()
            .filter(|id| self.get_loop(id).is_some())
            .or_else(|| self.loops.iter().find(|l| l.enabled).map(|l| l.id.clone()));
        match active {
            Some(id) => self.activate(&id),
            None => {
                self.disable_all();
            }
        }
    }

    fn activate(&mut self, id: &str) {
        for l in &mut self.loops {
            l.enabled = l.id == id;
        }
        self.active_loop_id = Some(id.to_string());
    }

    fn sort_markers(&mut self) {
        self.markers
            .sort_by(|a, b| a.time.total_cmp(&b.time).then(a.seq.cmp(&b.seq)));
    }
}

/// Clamps a marker time into `[0, duration]`; with no media loaded yet only
/// the lower bound applies.
fn clamp_time(time: f64, duration: f64) -> f64 {
    if time.is_nan() {
        return 0.0;
    }
    if duration > 0.0 {
        time.clamp(0.0, duration)
    } else {
        time.max(0.0)
    }
}

impl Session {
    /// Adds a marker at `time`, clamped into the piece. `None` at the marker cap.
    pub fn add_marker(&mut self, time: f64, label: Option<String>) -> Option<String> {
        let max = self.config.max_markers;
        let id = self
            .loops
            .add_marker(time, label, self.playback.duration, max);
        match id {
            Some(_) => self.save_settings_to_piece(),
            None => self.notices.push(Notice::MarkerLimitReached { max }),
        }
        id
    }

    pub fn remove_marker(&mut self, id: &str) -> bool {
        self.edit_loops(|loops| loops.remove_marker(id))
    }

    pub fn update_marker_time(&mut self, id: &str, time: f64) -> bool {
        let duration = self.playback.duration;
        self.edit_loops(|loops| loops.update_marker_time(id, time, duration))
    }

    pub fn update_marker_label(&mut self, id: &str, label: Option<String>) -> bool {
        self.edit_loops(|loops| loops.update_marker_label(id, label))
    }

    /// Creates a disabled loop between two markers. `None` at the loop cap
    /// or for an unknown marker.
    pub fn create_loop(&mut self, a: &str, b: &str) -> Option<String> {
        let max = self.config.max_loops;
        let at_cap = self.loops.loops.len() >= max;
        let id = self.loops.create_loop(a, b, max);
        if id.is_some() {
            self.save_settings_to_piece();
        } else if at_cap {
            self.notices.push(Notice::LoopLimitReached { max });
        }
        id
    }

    pub fn remove_loop(&mut self, id: &str) -> bool {
        self.edit_loops(|loops| loops.remove_loop(id))
    }

    /// Flips a loop. Enabling jumps the transport to the loop start without
    /// the jump disabling the loop again.
    pub fn toggle_loop_by_id(&mut self, id: &str) -> bool {
        let Some(toggle) = self.loops.toggle_loop(id) else {
            return false;
        };
        if let LoopToggle::Enabled { start } = toggle {
            self.preserve_loop_on_seek = true;
            self.seek(start);
        }
        self.save_settings_to_piece();
        true
    }

    /// Activates `id` (or disables all loops for `None`) without seeking.
    /// The next seek will not disable the newly active loop.
    pub fn set_active_loop(&mut self, id: Option<&str>) -> bool {
        if !self.loops.set_active_loop(id) {
            return false;
        }
        if id.is_some() {
            self.preserve_loop_on_seek = true;
        }
        self.save_settings_to_piece();
        true
    }

    pub fn toggle_edit_mode(&mut self) -> bool {
        self.loops.edit_mode = !self.loops.edit_mode;
        self.save_settings_to_piece();
        self.loops.edit_mode
    }

    pub fn set_edit_mode(&mut self, enabled: bool) {
        if self.loops.edit_mode != enabled {
            self.loops.edit_mode = enabled;
            self.save_settings_to_piece();
        }
    }

    fn edit_loops(&mut self, edit: impl FnOnce(&mut LoopState) -> bool) -> bool {
        let changed = edit(&mut self.loops);
        if changed {
            self.save_settings_to_piece();
        }
        changed
    }
}
