// src/session/mod.rs
// The synchronization core. Session is the single writer over transport
// state; engines and the store writer report back through channels drained
// by pump(). Mutations update memory first, then enqueue a trailing write.

pub mod loops;
pub mod mix;
pub mod pieces;
pub mod recording;
pub mod track;
pub mod transport;

use crossbeam::channel::{self, Receiver, Sender};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use crate::Result;
use crate::audio::{EngineEvent, EngineNotifier, EngineRegistry, TrackEngine};
use crate::config::SessionConfig;
use crate::store::{
    AudioFile, PieceSettings, Preferences, Storage, StoreWriter, TrackSettings, WriteJob,
    WriteOutcome,
};

pub use loops::{Loop, LoopState, LoopToggle, Marker};
pub use pieces::OrphanReport;
pub use track::{FileRef, MixState, Recordable, RecordingState, Track};

/// Shared transport snapshot. `current_time` is advisory; engines own the
/// true position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaybackState {
    pub is_playing: bool,
    pub current_time: f64,
    pub duration: f64,
    pub playback_rate: f64,
}

impl Default for PlaybackState {
    fn default() -> Self {
        Self {
            is_playing: false,
            current_time: 0.0,
            duration: 0.0,
            playback_rate: 1.0,
        }
    }
}

/// User-visible messages for rejected operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    TrackLimitReached { max: usize },
    MarkerLimitReached { max: usize },
    LoopLimitReached { max: usize },
}

pub struct Session {
    config: SessionConfig,
    storage: Arc<dyn Storage>,
    writer: StoreWriter,
    current_piece_id: Option<String>,

    tracks: Vec<Track>,
    colors_assigned: usize,
    engines: EngineRegistry,
    engine_tx: Sender<EngineEvent>,
    engine_rx: Receiver<EngineEvent>,

    playback: PlaybackState,
    master_volume: f64,
    // engine time updates are ignored until this instant
    sync_until: Option<Instant>,
    // one-shot: the next seek must not disable the active loop
    preserve_loop_on_seek: bool,

    loops: LoopState,

    recording_start_time: Option<f64>,
    // active loop stashed while a track is armed
    loop_backup: Option<String>,
    // post-recording seeks, consumed when the track's engine reports ready
    pending_seeks: HashMap<String, f64>,

    notices: Vec<Notice>,
}

impl Session {
    /// Creates an empty session over `storage` without loading any piece.
    pub fn new(storage: Arc<dyn Storage>, config: SessionConfig) -> Result<Self> {
        let writer = StoreWriter::spawn(storage.clone())?;
        let (engine_tx, engine_rx) = channel::unbounded();
        Ok(Self {
            config,
            storage,
            writer,
            current_piece_id: None,
            tracks: Vec::new(),
            colors_assigned: 0,
            engines: EngineRegistry::new(),
            engine_tx,
            engine_rx,
            playback: PlaybackState::default(),
            master_volume: 1.0,
            sync_until: None,
            preserve_loop_on_seek: false,
            loops: LoopState::default(),
            recording_start_time: None,
            loop_backup: None,
            pending_seeks: HashMap::new(),
            notices: Vec::new(),
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn storage(&self) -> &dyn Storage {
        self.storage.as_ref()
    }

    pub fn preferences(&self) -> Preferences<'_> {
        Preferences::new(self.storage.as_ref())
    }

    pub fn current_piece_id(&self) -> Option<&str> {
        self.current_piece_id.as_deref()
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn track(&self, id: &str) -> Option<&Track> {
        self.tracks.iter().find(|t| t.id == id)
    }

    pub fn playback(&self) -> &PlaybackState {
        &self.playback
    }

    pub fn master_volume(&self) -> f64 {
        self.master_volume
    }

    pub fn loop_state(&self) -> &LoopState {
        &self.loops
    }

    pub fn engines(&self) -> &EngineRegistry {
        &self.engines
    }

    pub fn recording_start_time(&self) -> Option<f64> {
        self.recording_start_time
    }

    pub fn loop_backup(&self) -> Option<&str> {
        self.loop_backup.as_deref()
    }

    pub fn pending_seek(&self, track_id: &str) -> Option<f64> {
        self.pending_seeks.get(track_id).copied()
    }

    pub fn is_preserving_loop(&self) -> bool {
        self.preserve_loop_on_seek
    }

    /// Drains queued user notices.
    pub fn take_notices(&mut self) -> Vec<Notice> {
        std::mem::take(&mut self.notices)
    }

    /// Sender handle for the engine of `track_id`.
    pub fn engine_notifier(&self, track_id: &str) -> EngineNotifier {
        EngineNotifier::new(track_id, self.engine_tx.clone())
    }

    /// Mounts the engine for an existing track and aligns it with the
    /// transport (mute policy, rate, position).
    pub fn register_engine(&mut self, track_id: &str, mut engine: Box<dyn TrackEngine>) -> bool {
        let Some(track) = self.track(track_id) else {
            log::warn!("refusing engine for unknown track {}", track_id);
            return false;
        };
        let audible = track.mix.is_audible(self.any_solo());
        engine.set_muted(!audible);
        engine.set_playback_rate(self.playback.playback_rate, true);
        engine.set_time(self.playback.current_time);
        self.engines.register(track_id, engine);
        self.refresh_duration();
        log::debug!("engine mounted for track {}", track_id);
        true
    }

    pub fn unregister_engine(&mut self, track_id: &str) -> bool {
        let removed = self.engines.unregister(track_id).is_some();
        if removed {
            self.refresh_duration();
        }
        removed
    }

    /// Handles everything engines and the store writer reported since the
    /// last call. Returns the number of events processed.
    pub fn pump(&mut self) -> usize {
        let mut handled = 0;
        for outcome in self.writer.drain_outcomes() {
            self.handle_write_outcome(outcome);
            handled += 1;
        }
        while let Ok(event) = self.engine_rx.try_recv() {
            self.handle_engine_event(event);
            handled += 1;
        }
        handled
    }

    /// Blocks until every queued durable write has been applied.
    pub fn flush(&self) -> Result<()> {
        self.writer.flush()
    }

    pub fn handle_engine_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::Ready { track_id, duration } => {
                log::debug!("track {} ready ({:.3}s)", track_id, duration);
                self.refresh_duration();
                if let Some(offset) = self.pending_seeks.remove(&track_id) {
                    self.seek(offset);
                }
            }
            EngineEvent::Finished { track_id } => self.handle_track_finished(&track_id),
            EngineEvent::TimeUpdate { track_id, seconds } => {
                self.handle_time_update(&track_id, seconds)
            }
        }
    }

    fn handle_write_outcome(&mut self, outcome: WriteOutcome) {
        match outcome {
            WriteOutcome::BlobSaved { track_id, ok } => {
                if !ok {
                    log::warn!("audio for track {} was not persisted", track_id);
                }
                if let Some(track) = self.tracks.iter_mut().find(|t| t.id == track_id) {
                    track.is_loading = false;
                }
            }
        }
    }

    /// Reads the stored audio of a track, for an engine to load.
    pub fn track_audio(&self, track_id: &str) -> Result<Option<AudioFile>> {
        self.storage.get_blob(track_id)
    }

    pub(crate) fn settings_snapshot(&self) -> PieceSettings {
        PieceSettings {
            track_settings: self
                .tracks
                .iter()
                .map(|t| TrackSettings {
                    id: t.id.clone(),
                    name: t.name.clone(),
                    color: t.color.clone(),
                    mix: t.mix.clone(),
                    recordable: t.is_recordable(),
                    recording_start_offset: t
                        .recordable
                        .as_ref()
                        .map(|r| r.start_offset)
                        .unwrap_or(0.0),
                })
                .collect(),
            loop_state: self.loops.clone(),
            playback_rate: self.playback.playback_rate,
            master_volume: self.master_volume,
        }
    }

    /// Queues a write of the full settings snapshot for the current piece.
    pub fn save_settings_to_piece(&self) {
        let Some(piece_id) = self.current_piece_id.clone() else {
            log::debug!("no current piece, settings not persisted");
            return;
        };
        self.writer.submit(WriteJob::SaveSettings {
            piece_id,
            settings: self.settings_snapshot(),
        });
    }

    pub(crate) fn persist_pref(&self, key: &str, value: impl ToString) {
        self.writer.submit(WriteJob::SetPref {
            key: key.to_string(),
            value: value.to_string(),
        });
    }

    pub(crate) fn submit(&self, job: WriteJob) {
        self.writer.submit(job);
    }

    /// Drops all in-memory piece state back to empty defaults.
    pub(crate) fn reset_state(&mut self) {
        for (_, engine) in self.engines.iter_mut() {
            engine.pause();
        }
        self.engines.clear();
        self.tracks.clear();
        self.colors_assigned = 0;
        self.playback = PlaybackState::default();
        self.master_volume = 1.0;
        self.sync_until = None;
        self.preserve_loop_on_seek = false;
        self.loops = LoopState::default();
        self.recording_start_time = None;
        self.loop_backup = None;
        self.pending_seeks.clear();
    }

    pub(crate) fn next_color(&mut self) -> String {
        let color = self.config.palette_color(self.colors_assigned);
        self.colors_assigned += 1;
        color
    }

    pub(crate) fn track_mut(&mut self, id: &str) -> Option<&mut Track> {
        self.tracks.iter_mut().find(|t| t.id == id)
    }
}
