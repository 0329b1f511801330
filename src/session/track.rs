use serde::{Deserialize, Serialize};

/// Mix attributes persisted per track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MixState {
    pub volume: f64,
    pub is_muted: bool,
    pub is_solo: bool,
    pub is_collapsed: bool,
}

impl Default for MixState {
    fn default() -> Self {
        Self {
            volume: 1.0,
            is_muted: false,
            is_solo: false,
            is_collapsed: false,
        }
    }
}

impl MixState {
    pub fn set_volume(&mut self, volume: f64) {
        self.volume = if volume.is_nan() {
            1.0
        } else {
            volume.clamp(0.0, 1.0)
        };
    }

    pub fn toggle_mute(&mut self) {
        self.is_muted = !self.is_muted;
    }

    pub fn toggle_solo(&mut self) {
        self.is_solo = !self.is_solo;
    }

    /// Audible iff not muted and either nothing is soloed or this track is.
    pub fn is_audible(&self, any_solo: bool) -> bool {
        !self.is_muted && (!any_solo || self.is_solo)
    }
}

/// Recording lifecycle: `Idle -> Armed -> Recording -> Stopped -> Idle`.
///
/// `Armed -> Idle` is the only shortcut (disarming before a take starts).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RecordingState {
    #[default]
    Idle,
    Armed,
    Recording,
    Stopped,
}

impl RecordingState {
    pub fn can_advance_to(self, next: RecordingState) -> bool {
        use RecordingState::*;
        matches!(
            (self, next),
            (Idle, Armed)
                | (Armed, Recording)
                | (Armed, Idle)
                | (Recording, Stopped)
                | (Stopped, Idle)
        )
    }
}

/// Recording fields carried only by recordable tracks.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Recordable {
    pub is_armed: bool,
    pub state: RecordingState,
    /// Transport time at which the take started.
    pub start_offset: f64,
}

impl Recordable {
    /// Moves to `next` if the lifecycle allows it.
    pub fn advance(&mut self, next: RecordingState) -> bool {
        if !self.state.can_advance_to(next) {
            log::warn!("invalid recording transition {:?} -> {:?}", self.state, next);
            return false;
        }
        self.state = next;
        true
    }
}

/// Name and size of the audio attached to a track.
#[derive(Debug, Clone, PartialEq)]
pub struct FileRef {
    pub name: String,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    pub id: String,
    pub name: String,
    pub color: String,
    pub mix: MixState,
    pub file: Option<FileRef>,
    pub is_loading: bool,
    pub recordable: Option<Recordable>,
}

impl Track {
    pub fn new(id: impl Into<String>, name: impl Into<String>, color: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            color: color.into(),
            mix: MixState::default(),
            file: None,
            is_loading: false,
            recordable: None,
        }
    }

    pub fn recordable(mut self) -> Self {
        self.recordable = Some(Recordable::default());
        self
    }

    pub fn is_recordable(&self) -> bool {
        self.recordable.is_some()
    }

    pub fn is_armed(&self) -> bool {
        self.recordable.as_ref().is_some_and(|r| r.is_armed)
    }

    pub fn recording_state(&self) -> Option<RecordingState> {
        self.recordable.as_ref().map(|r| r.state)
    }

    pub fn is_recording(&self) -> bool {
        self.recording_state() == Some(RecordingState::Recording)
    }
}

/// Display name for an imported file: its name without extension.
pub(crate) fn track_name_from_file(file_name: &str) -> String {
    match file_name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem.to_string(),
        _ => file_name.to_string(),
    }
}
