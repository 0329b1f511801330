use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::{Storage, TrackSettings};
use crate::Result;
use crate::session::LoopState;

pub const CURRENT_PIECE_ID: &str = "currentPieceId";
pub const PLAYBACK_RATE: &str = "playbackRate";
pub const MASTER_VOLUME: &str = "masterVolume";
pub const WAVEFORM_STYLE: &str = "waveformStyle";
pub const WAVEFORM_NORMALIZE: &str = "waveformNormalize";
pub const WAVEFORM_TIMELINE: &str = "waveformTimeline";
pub const WAVEFORM_MINIMAP: &str = "waveformMinimap";
/// Pre-piece flat track settings (JSON), read only by migration.
pub const LEGACY_TRACK_SETTINGS: &str = "trackSettings";
/// Pre-piece flat loop state (JSON), read only by migration.
pub const LEGACY_LOOP_STATE: &str = "loopState";
/// Set once the legacy keys have been adopted (or found empty).
pub const LEGACY_MIGRATED: &str = "legacyMigrated";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WaveformStyle {
    #[default]
    Modern,
    Classic,
}

impl fmt::Display for WaveformStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WaveformStyle::Modern => f.write_str("modern"),
            WaveformStyle::Classic => f.write_str("classic"),
        }
    }
}

impl FromStr for WaveformStyle {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "modern" => Ok(WaveformStyle::Modern),
            "classic" => Ok(WaveformStyle::Classic),
            other => Err(format!("unknown waveform style '{}'", other)),
        }
    }
}

/// Typed view over the string preferences of a [`Storage`].
///
/// Reads never fail: a missing, unreadable or unparseable value yields the
/// documented default.
pub struct Preferences<'a> {
    storage: &'a dyn Storage,
}

impl<'a> Preferences<'a> {
    pub fn new(storage: &'a dyn Storage) -> Self {
        Self { storage }
    }

    pub fn current_piece_id(&self) -> Option<String> {
        self.raw(CURRENT_PIECE_ID).filter(|id| !id.is_empty())
    }

    pub fn set_current_piece_id(&self, id: Option<&str>) -> Result<()> {
        match id {
            Some(id) => self.storage.set_pref(CURRENT_PIECE_ID, id),
            None => self.storage.remove_pref(CURRENT_PIECE_ID),
        }
    }

    pub fn playback_rate(&self) -> f64 {
        self.parsed(PLAYBACK_RATE).unwrap_or(1.0)
    }

    pub fn master_volume(&self) -> f64 {
        self.parsed(MASTER_VOLUME).unwrap_or(1.0)
    }

    pub fn waveform_style(&self) -> WaveformStyle {
        self.parsed(WAVEFORM_STYLE).unwrap_or_default()
    }

    pub fn waveform_normalize(&self) -> bool {
        self.parsed(WAVEFORM_NORMALIZE).unwrap_or(false)
    }

    pub fn waveform_timeline(&self) -> bool {
        self.parsed(WAVEFORM_TIMELINE).unwrap_or(false)
    }

    pub fn waveform_minimap(&self) -> bool {
        self.parsed(WAVEFORM_MINIMAP).unwrap_or(false)
    }

    pub fn set<T: ToString>(&self, key: &str, value: T) -> Result<()> {
        self.storage.set_pref(key, &value.to_string())
    }

    pub fn legacy_migrated(&self) -> bool {
        self.parsed(LEGACY_MIGRATED).unwrap_or(false)
    }

    pub fn legacy_track_settings(&self) -> Option<Vec<TrackSettings>> {
        self.json(LEGACY_TRACK_SETTINGS)
    }

    pub fn legacy_loop_state(&self) -> Option<LoopState> {
        self.json(LEGACY_LOOP_STATE)
    }

    fn raw(&self, key: &str) -> Option<String> {
        match self.storage.get_pref(key) {
            Ok(value) => value,
            Err(e) => {
                log::warn!("failed to read preference '{}': {}", key, e);
                None
            }
        }
    }

    fn parsed<T: FromStr>(&self, key: &str) -> Option<T> {
        let raw = self.raw(key)?;
        match raw.trim().parse() {
            Ok(value) => Some(value),
            Err(_) => {
                log::warn!("ignoring malformed preference {}={:?}", key, raw);
                None
            }
        }
    }

    fn json<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.raw(key)?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                log::warn!("ignoring malformed legacy preference '{}': {}", key, e);
                None
            }
        }
    }
}
