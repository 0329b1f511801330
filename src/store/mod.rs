// src/store/mod.rs
// Durable storage for pieces, settings, track audio and preferences.
// `pieces` and `settings` share piece ids by convention only.

pub mod fs;
pub mod memory;
pub mod prefs;
pub mod writer;

use serde::{Deserialize, Serialize};

use crate::Result;
use crate::session::{LoopState, MixState};

pub use fs::FsStorage;
pub use memory::MemoryStorage;
pub use prefs::{Preferences, WaveformStyle};
pub use writer::{StoreWriter, WriteJob, WriteOutcome};

/// Catalog entry for a saved piece.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Piece {
    pub id: String,
    pub name: String,
    pub created_at: i64,
    pub updated_at: i64,
    pub track_ids: Vec<String>,
}

impl Piece {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        let now = now_millis();
        Self {
            id: id.into(),
            name: name.into(),
            created_at: now,
            updated_at: now,
            track_ids: Vec::new(),
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = now_millis().max(self.updated_at);
    }
}

/// Per-track mix snapshot stored alongside a piece.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackSettings {
    pub id: String,
    pub name: String,
    pub color: String,
    pub mix: MixState,
    #[serde(default)]
    pub recordable: bool,
    #[serde(default)]
    pub recording_start_offset: f64,
}

/// Durable mix/loop snapshot for one piece.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PieceSettings {
    pub track_settings: Vec<TrackSettings>,
    pub loop_state: LoopState,
    pub playback_rate: f64,
    pub master_volume: f64,
}

impl Default for PieceSettings {
    fn default() -> Self {
        Self {
            track_settings: Vec::new(),
            loop_state: LoopState::default(),
            playback_rate: 1.0,
            master_volume: 1.0,
        }
    }
}

/// One stored audio file, keyed by track id in the blob collection.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFile {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl AudioFile {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            bytes,
        }
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }
}

/// Piece listing row enriched with computed aggregates.
#[derive(Debug, Clone, PartialEq)]
pub struct PieceSummary {
    pub piece: Piece,
    pub track_count: usize,
    pub size_bytes: u64,
}

/// Backing document/blob/preference store.
///
/// Implementations must tolerate deletes of missing records.
pub trait Storage: Send + Sync {
    fn list_pieces(&self) -> Result<Vec<Piece>>;
    fn get_piece(&self, id: &str) -> Result<Option<Piece>>;
    fn put_piece(&self, piece: &Piece) -> Result<()>;
    fn delete_piece(&self, id: &str) -> Result<()>;

    fn get_settings(&self, piece_id: &str) -> Result<Option<PieceSettings>>;
    fn put_settings(&self, piece_id: &str, settings: &PieceSettings) -> Result<()>;
    fn delete_settings(&self, piece_id: &str) -> Result<()>;

    fn get_blob(&self, track_id: &str) -> Result<Option<AudioFile>>;
    fn put_blob(&self, track_id: &str, file: &AudioFile) -> Result<()>;
    fn delete_blob(&self, track_id: &str) -> Result<()>;
    fn blob_ids(&self) -> Result<Vec<String>>;
    /// Size of a stored blob without reading its contents.
    fn blob_size(&self, track_id: &str) -> Result<Option<u64>>;
    /// File name of a stored blob without reading its contents.
    fn blob_name(&self, track_id: &str) -> Result<Option<String>>;

    fn get_pref(&self, key: &str) -> Result<Option<String>>;
    fn set_pref(&self, key: &str, value: &str) -> Result<()>;
    fn remove_pref(&self, key: &str) -> Result<()>;
}

pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
