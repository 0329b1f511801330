// src/session/pieces.rs
// Piece lifecycle, catalog queries, startup migration and orphan cleanup.
// Each operation flushes the store writer first so a queued write cannot
// land after a delete.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Local;
use uuid::Uuid;

use super::track::{FileRef, Recordable, Track, track_name_from_file};
use super::{PlaybackState, Session};
use crate::config::SessionConfig;
use crate::store::{Piece, PieceSettings, PieceSummary, Preferences, Storage, prefs};
use crate::{Error, Result};

const DEFAULT_PIECE_NAME: &str = "Untitled";

/// What [`Session::cleanup_orphans`] removed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrphanReport {
    pub deleted_blobs: Vec<String>,
    pub stripped_track_ids: Vec<String>,
}

impl OrphanReport {
    pub fn is_empty(&self) -> bool {
        self.deleted_blobs.is_empty() && self.stripped_track_ids.is_empty()
    }
}

impl Session {
    /// Opens a session and restores the last piece.
    ///
    /// Legacy data is migrated first. Then the current piece preference is
    /// loaded, else the most recently updated piece, else a new empty piece
    /// is created.
    pub fn open(storage: Arc<dyn Storage>, config: SessionConfig) -> Result<Self> {
        let mut session = Self::new(storage, config)?;
        session.migrate_legacy()?;

        if let Some(id) = session.preferences().current_piece_id() {
            match session.load_piece(&id) {
                Ok(()) => return Ok(session),
                Err(Error::PieceNotFound(_)) => {
                    log::warn!("current piece {} is gone, falling back", id);
                }
                Err(e) => return Err(e),
            }
        }

        let recent = session.recent_pieces(1)?;
        if let Some(summary) = recent.first() {
            match session.load_piece(&summary.piece.id) {
                Ok(()) => return Ok(session),
                Err(Error::PieceNotFound(id)) => {
                    log::warn!("piece {} has no settings, starting fresh", id);
                }
                Err(e) => return Err(e),
            }
        }

        session.create_piece(DEFAULT_PIECE_NAME)?;
        Ok(session)
    }

    /// Writes a new empty piece with its settings and makes it current.
    pub fn create_piece(&mut self, name: &str) -> Result<String> {
        self.pause();
        self.flush()?;

        let piece = Piece::new(Uuid::new_v4().to_string(), name);
        self.storage.put_piece(&piece)?;
        self.storage
            .put_settings(&piece.id, &PieceSettings::default())?;
        self.preferences().set_current_piece_id(Some(&piece.id))?;

        self.reset_state();
        self.current_piece_id = Some(piece.id.clone());
        log::info!("created piece '{}' ({})", name, piece.id);
        Ok(piece.id)
    }

    /// Replaces all in-memory state with the stored piece `id`.
    ///
    /// Tracks follow the settings order; ids listed only on the piece are
    /// appended. A non-recordable track whose audio is missing is skipped.
    /// Engines must be registered again for the new tracks.
    pub fn load_piece(&mut self, id: &str) -> Result<()> {
        self.pause();
        self.flush()?;

        let piece = self
            .storage
            .get_piece(id)?
            .ok_or_else(|| Error::PieceNotFound(id.to_string()))?;
        let settings = self
            .storage
            .get_settings(id)?
            .ok_or_else(|| Error::PieceNotFound(id.to_string()))?;

        let mut tracks = Vec::new();
        for ts in &settings.track_settings {
            let file = if piece.track_ids.contains(&ts.id) {
                self.file_ref(&ts.id)
            } else {
                None
            };
            if file.is_none() && !ts.recordable {
                log::warn!("audio for track {} is missing, skipping it", ts.id);
                continue;
            }
            let mut track = Track::new(&ts.id, &ts.name, &ts.color);
            track.mix = ts.mix.clone();
            track.file = file;
            if ts.recordable {
                track.recordable = Some(Recordable {
                    start_offset: ts.recording_start_offset,
                    ..Recordable::default()
                });
            }
            tracks.push(track);
        }

        let mut colors_assigned = tracks.len();
        for track_id in &piece.track_ids {
            if tracks.iter().any(|t| &t.id == track_id) {
                continue;
            }
            let Some(file) = self.file_ref(track_id) else {
                log::warn!("audio for track {} is missing, skipping it", track_id);
                continue;
            };
            let color = self.config.palette_color(colors_assigned);
            colors_assigned += 1;
            let mut track = Track::new(track_id, track_name_from_file(&file.name), color);
            track.file = Some(file);
            tracks.push(track);
        }

        self.reset_state();
        self.tracks = tracks;
        self.colors_assigned = colors_assigned;
        self.loops = settings.loop_state;
        self.loops.normalize();
        self.playback = PlaybackState {
            playback_rate: self.config.clamp_playback_rate(settings.playback_rate),
            ..PlaybackState::default()
        };
        self.master_volume = settings.master_volume.clamp(0.0, 1.0);
        self.current_piece_id = Some(piece.id.clone());
        self.persist_pref(prefs::CURRENT_PIECE_ID, &piece.id);

        log::info!(
            "loaded piece '{}' with {} track(s)",
            piece.name,
            self.tracks.len()
        );
        Ok(())
    }

    /// Looks up a track's stored audio; an unreadable blob counts as missing.
    fn file_ref(&self, track_id: &str) -> Option<FileRef> {
        let lookup = self.storage.blob_name(track_id).and_then(|name| match name {
            Some(name) => Ok(self
                .storage
                .blob_size(track_id)?
                .map(|size| FileRef { name, size })),
            None => Ok(None),
        });
        match lookup {
            Ok(file) => file,
            Err(e) => {
                log::warn!("cannot read audio for track {}: {}", track_id, e);
                None
            }
        }
    }

    /// Deletes a piece, its settings and every blob it references.
    ///
    /// Deleting the current piece resets the session onto a new empty piece.
    pub fn delete_piece(&mut self, id: &str) -> Result<()> {
        self.flush()?;
        if self.remove_piece_records(id)? {
            self.create_piece(DEFAULT_PIECE_NAME)?;
        }
        Ok(())
    }

    /// Removes the stored records of piece `id`. Returns whether it was the
    /// current piece, in which case in-memory state has been reset.
    fn remove_piece_records(&mut self, id: &str) -> Result<bool> {
        let piece = self
            .storage
            .get_piece(id)?
            .ok_or_else(|| Error::PieceNotFound(id.to_string()))?;

        let mut track_ids: Vec<String> = piece.track_ids.clone();
        if let Some(settings) = self.storage.get_settings(id)? {
            for ts in settings.track_settings {
                if !track_ids.contains(&ts.id) {
                    track_ids.push(ts.id);
                }
            }
        }
        for track_id in &track_ids {
            if let Err(e) = self.storage.delete_blob(track_id) {
                log::error!("failed to delete audio for track {}: {}", track_id, e);
            }
        }
        self.storage.delete_piece(id)?;
        self.storage.delete_settings(id)?;

        let was_current = self.current_piece_id.as_deref() == Some(id);
        if was_current {
            self.reset_state();
            self.current_piece_id = None;
            self.preferences().set_current_piece_id(None)?;
        }
        log::info!("deleted piece '{}' ({})", piece.name, id);
        Ok(was_current)
    }

    pub fn rename_piece(&mut self, id: &str, name: &str) -> Result<()> {
        self.flush()?;
        let mut piece = self
            .storage
            .get_piece(id)?
            .ok_or_else(|| Error::PieceNotFound(id.to_string()))?;
        piece.name = name.to_string();
        piece.touch();
        self.storage.put_piece(&piece)
    }

    /// Every piece with its track count and stored size, most recently
    /// updated first.
    pub fn list_pieces(&self) -> Result<Vec<PieceSummary>> {
        self.flush()?;
        let mut summaries = Vec::new();
        for piece in self.storage.list_pieces()? {
            let mut size_bytes = 0;
            for track_id in &piece.track_ids {
                size_bytes += self.storage.blob_size(track_id)?.unwrap_or(0);
            }
            summaries.push(PieceSummary {
                track_count: piece.track_ids.len(),
                size_bytes,
                piece,
            });
        }
        summaries.sort_by(|a, b| {
            b.piece
                .updated_at
                .cmp(&a.piece.updated_at)
                .then_with(|| a.piece.name.cmp(&b.piece.name))
        });
        Ok(summaries)
    }

    pub fn recent_pieces(&self, limit: usize) -> Result<Vec<PieceSummary>> {
        let mut pieces = self.list_pieces()?;
        pieces.truncate(limit);
        Ok(pieces)
    }

    pub fn current_piece(&self) -> Result<Option<Piece>> {
        match &self.current_piece_id {
            Some(id) => {
                self.flush()?;
                self.storage.get_piece(id)
            }
            None => Ok(None),
        }
    }

    /// Deletes every piece and continues on a new empty piece.
    pub fn delete_all_pieces(&mut self) -> Result<()> {
        self.flush()?;
        for piece in self.storage.list_pieces()? {
            self.remove_piece_records(&piece.id)?;
        }
        self.create_piece(DEFAULT_PIECE_NAME)?;
        Ok(())
    }

    /// Bytes held by every stored blob.
    pub fn total_storage_size(&self) -> Result<u64> {
        self.flush()?;
        let mut total = 0;
        for track_id in self.storage.blob_ids()? {
            total += self.storage.blob_size(&track_id)?.unwrap_or(0);
        }
        Ok(total)
    }

    /// Deletes blobs no piece knows about and strips stale ids from the
    /// current piece.
    ///
    /// The current piece's settings define its valid tracks. Blobs listed by
    /// any other piece are kept.
    pub fn cleanup_orphans(&mut self) -> Result<OrphanReport> {
        self.flush()?;
        let Some(current_id) = self.current_piece_id.clone() else {
            return Ok(OrphanReport::default());
        };
        let settings = self
            .storage
            .get_settings(&current_id)?
            .ok_or_else(|| Error::PieceNotFound(current_id.clone()))?;
        let valid: HashSet<String> = settings.track_settings.into_iter().map(|t| t.id).collect();

        let mut elsewhere = HashSet::new();
        for piece in self.storage.list_pieces()? {
            if piece.id == current_id {
                continue;
            }
            if let Some(other) = self.storage.get_settings(&piece.id)? {
                elsewhere.extend(other.track_settings.into_iter().map(|t| t.id));
            }
            elsewhere.extend(piece.track_ids);
        }

        let mut report = OrphanReport::default();
        for blob_id in self.storage.blob_ids()? {
            if !valid.contains(&blob_id) && !elsewhere.contains(&blob_id) {
                self.storage.delete_blob(&blob_id)?;
                report.deleted_blobs.push(blob_id);
            }
        }

        if let Some(mut piece) = self.storage.get_piece(&current_id)? {
            let (kept, stripped): (Vec<String>, Vec<String>) = piece
                .track_ids
                .into_iter()
                .partition(|id| valid.contains(id));
            if !stripped.is_empty() {
                piece.track_ids = kept;
                piece.touch();
                self.storage.put_piece(&piece)?;
            }
            report.stripped_track_ids = stripped;
        }

        if !report.is_empty() {
            log::info!(
                "orphan cleanup removed {} blob(s), {} stale id(s)",
                report.deleted_blobs.len(),
                report.stripped_track_ids.len()
            );
        }
        Ok(report)
    }

    /// Adopts pre-piece data into one new piece when no piece exists yet.
    ///
    /// Runs at most once per store. The legacy preferences and blobs are left
    /// where they are.
    pub fn migrate_legacy(&self) -> Result<Option<String>> {
        let prefs = Preferences::new(self.storage.as_ref());
        if prefs.legacy_migrated() {
            return Ok(None);
        }
        if !self.storage.list_pieces()?.is_empty() {
            prefs.set(prefs::LEGACY_MIGRATED, true)?;
            return Ok(None);
        }
        let legacy_tracks = prefs.legacy_track_settings();
        let legacy_loops = prefs.legacy_loop_state();
        let blob_ids = self.storage.blob_ids()?;
        if legacy_tracks.is_none() && legacy_loops.is_none() && blob_ids.is_empty() {
            prefs.set(prefs::LEGACY_MIGRATED, true)?;
            return Ok(None);
        }

        let name = format!("Session {}", Local::now().format("%Y-%m-%d %H:%M"));
        let mut piece = Piece::new(Uuid::new_v4().to_string(), &name);
        let track_settings = legacy_tracks.unwrap_or_default();
        for ts in &track_settings {
            if blob_ids.contains(&ts.id) {
                piece.track_ids.push(ts.id.clone());
            }
        }
        for blob_id in blob_ids {
            if !piece.track_ids.contains(&blob_id) {
                piece.track_ids.push(blob_id);
            }
        }

        let mut loop_state = legacy_loops.unwrap_or_default();
        loop_state.normalize();
        let settings = PieceSettings {
            track_settings,
            loop_state,
            playback_rate: prefs.playback_rate(),
            master_volume: prefs.master_volume(),
        };

        self.storage.put_piece(&piece)?;
        self.storage.put_settings(&piece.id, &settings)?;
        prefs.set_current_piece_id(Some(&piece.id))?;
        prefs.set(prefs::LEGACY_MIGRATED, true)?;
        log::info!(
            "migrated legacy data into piece '{}' ({} track(s))",
            name,
            piece.track_ids.len()
        );
        Ok(Some(piece.id))
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::session::{MixState, RecordingState};
    use crate::store::{AudioFile, FsStorage, MemoryStorage, TrackSettings};

    #[test]
    fn test_open_creates_empty_piece() {
        let (session, storage) = session();
        let id = session.current_piece_id().unwrap().to_string();
        assert_eq!(storage.list_pieces().unwrap().len(), 1);
        assert!(storage.get_settings(&id).unwrap().is_some());
        assert_eq!(
            Preferences::new(storage.as_ref()).current_piece_id(),
            Some(id)
        );
        assert!(session.tracks().is_empty());
    }

    #[test]
    fn test_settings_round_trip_through_load() {
        let (mut session, _storage) = session();
        let (a, _) = add_track_with_engine(&mut session, 6.0);
        let b = session.add_track(wav_file("b.wav", 0.2)).unwrap();
        let mic = session.add_recording_track("Mic").unwrap();
        session.set_volume(&a, 0.3);
        session.toggle_mute(&b);
        session.toggle_solo(&a);
        session.toggle_collapse(&mic);
        let s = session.add_marker(1.0, Some("in".into())).unwrap();
        let e = session.add_marker(4.0, None).unwrap();
        let l = session.create_loop(&s, &e).unwrap();
        session.set_active_loop(Some(&l));
        session.set_playback_rate(0.75);
        session.set_master_volume(0.6);

        let mixes: Vec<MixState> = session.tracks().iter().map(|t| t.mix.clone()).collect();
        let loops = session.loop_state().clone();
        session.save_settings_to_piece();

        let id = session.current_piece_id().unwrap().to_string();
        session.load_piece(&id).unwrap();

        let reloaded: Vec<MixState> = session.tracks().iter().map(|t| t.mix.clone()).collect();
        assert_eq!(reloaded, mixes);
        assert_eq!(session.loop_state(), &loops);
        assert_eq!(session.playback().playback_rate, 0.75);
        assert_eq!(session.master_volume(), 0.6);
        assert!(session.track(&mic).unwrap().is_recordable());
        assert!(!session.playback().is_playing);
    }

    #[test]
    fn test_load_switches_pieces() {
        let (mut session, _storage) = session();
        let first = session.current_piece_id().unwrap().to_string();
        session.add_track(wav_file("drums.wav", 0.2)).unwrap();

        let second = session.create_piece("Second").unwrap();
        assert!(session.tracks().is_empty());
        session.add_recording_track("Vox").unwrap();

        session.load_piece(&first).unwrap();
        assert_eq!(session.tracks().len(), 1);
        assert_eq!(session.tracks()[0].name, "drums");
        session.load_piece(&second).unwrap();
        assert_eq!(session.tracks()[0].name, "Vox");
        assert_eq!(
            session.tracks()[0].recording_state(),
            Some(RecordingState::Idle)
        );
    }

    #[test]
    fn test_piece_operations_reject_unknown_ids() {
        let (mut session, storage) = session();
        assert!(matches!(
            session.load_piece("ghost"),
            Err(Error::PieceNotFound(_))
        ));
        assert!(matches!(
            session.delete_piece("ghost"),
            Err(Error::PieceNotFound(_))
        ));
        assert!(matches!(
            session.rename_piece("ghost", "x"),
            Err(Error::PieceNotFound(_))
        ));

        storage.put_piece(&Piece::new("bare", "No settings")).unwrap();
        assert!(matches!(
            session.load_piece("bare"),
            Err(Error::PieceNotFound(_))
        ));
    }

    #[test]
    fn test_load_tolerates_missing_audio() {
        let (mut session, storage) = session();
        let id = session.current_piece_id().unwrap().to_string();
        let kept = session.add_track(wav_file("kept.wav", 0.2)).unwrap();
        let lost = session.add_track(wav_file("lost.wav", 0.2)).unwrap();
        let mic = session.add_recording_track("Mic").unwrap();
        settle(&mut session);
        storage.delete_blob(&lost).unwrap();

        session.load_piece(&id).unwrap();
        let ids: Vec<&str> = session.tracks().iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec![kept.as_str(), mic.as_str()]);
        assert_eq!(
            session.track(&kept).unwrap().file.as_ref().unwrap().name,
            "kept.wav"
        );
    }

    #[test]
    fn test_load_appends_tracks_missing_from_settings() {
        let (mut session, storage) = session();
        let id = session.current_piece_id().unwrap().to_string();
        storage
            .put_blob("stray", &AudioFile::new("stray.wav", vec![0; 4]))
            .unwrap();
        let mut piece = storage.get_piece(&id).unwrap().unwrap();
        piece.track_ids.push("stray".into());
        storage.put_piece(&piece).unwrap();

        session.load_piece(&id).unwrap();
        assert_eq!(session.tracks().len(), 1);
        assert_eq!(session.tracks()[0].name, "stray");
        assert_eq!(session.tracks()[0].mix, MixState::default());
    }

    #[test]
    fn test_delete_current_piece_resets_state() {
        let (mut session, storage) = session();
        let id = session.current_piece_id().unwrap().to_string();
        let track = session.add_track(wav_file("a.wav", 0.2)).unwrap();
        session.add_marker(1.0, None).unwrap();

        session.delete_piece(&id).unwrap();
        assert!(session.tracks().is_empty());
        assert!(session.loop_state().markers.is_empty());
        assert!(storage.get_piece(&id).unwrap().is_none());
        assert!(storage.get_settings(&id).unwrap().is_none());
        assert!(storage.get_blob(&track).unwrap().is_none());

        let fresh = session.current_piece_id().unwrap().to_string();
        assert_ne!(fresh, id);
        assert_eq!(storage.list_pieces().unwrap().len(), 1);
        assert_eq!(
            Preferences::new(storage.as_ref()).current_piece_id(),
            Some(fresh)
        );
    }

    #[test]
    fn test_edits_after_deleting_current_piece_persist() {
        let (mut session, storage) = session();
        let id = session.current_piece_id().unwrap().to_string();
        session.delete_piece(&id).unwrap();

        let track = session.add_track(wav_file("after.wav", 0.2)).unwrap();
        session.set_volume(&track, 0.3);
        settle(&mut session);
        let current = session.current_piece_id().unwrap().to_string();
        assert_eq!(
            storage.get_piece(&current).unwrap().unwrap().track_ids,
            vec![track.clone()]
        );

        drop(session);
        let reopened = Session::open(storage.clone(), SessionConfig::default()).unwrap();
        assert_eq!(reopened.current_piece_id(), Some(current.as_str()));
        assert_eq!(reopened.track(&track).unwrap().mix.volume, 0.3);
    }

    #[test]
    fn test_listing_sizes_and_order() {
        let (mut session, _storage) = session();
        let first = session.current_piece_id().unwrap().to_string();
        session
            .add_track(AudioFile::new("a.wav", vec![0; 100]))
            .unwrap();
        session
            .add_track(AudioFile::new("b.wav", vec![0; 50]))
            .unwrap();
        session.flush().unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let second = session.create_piece("Later").unwrap();

        let pieces = session.list_pieces().unwrap();
        assert_eq!(pieces.len(), 2);
        assert_eq!(pieces[0].piece.id, second);
        assert_eq!(pieces[1].piece.id, first);
        assert_eq!(pieces[1].track_count, 2);
        assert_eq!(pieces[1].size_bytes, 150);
        assert_eq!(session.total_storage_size().unwrap(), 150);
        assert_eq!(session.recent_pieces(1).unwrap().len(), 1);

        session.rename_piece(&second, "Renamed").unwrap();
        assert_eq!(session.current_piece().unwrap().unwrap().name, "Renamed");
    }

    #[test]
    fn test_delete_all_pieces() {
        let (mut session, storage) = session();
        session.add_track(wav_file("a.wav", 0.1)).unwrap();
        session.create_piece("Two").unwrap();
        session.add_track(wav_file("b.wav", 0.1)).unwrap();

        session.delete_all_pieces().unwrap();
        assert!(storage.blob_ids().unwrap().is_empty());
        assert!(session.tracks().is_empty());
        let pieces = storage.list_pieces().unwrap();
        assert_eq!(pieces.len(), 1);
        assert!(pieces[0].track_ids.is_empty());
        assert_eq!(session.current_piece_id(), Some(pieces[0].id.as_str()));
        assert_eq!(session.current_piece().unwrap().unwrap().name, "Untitled");
    }

    #[test]
    fn test_legacy_data_is_not_adopted_twice() {
        let storage = Arc::new(MemoryStorage::new());
        let mut legacy_loops = crate::session::LoopState::default();
        legacy_loops.add_marker(1.0, None, 0.0, 20).unwrap();
        storage
            .set_pref(
                prefs::LEGACY_LOOP_STATE,
                &serde_json::to_string(&legacy_loops).unwrap(),
            )
            .unwrap();

        let mut session = Session::open(storage.clone(), SessionConfig::default()).unwrap();
        assert_eq!(session.loop_state().markers.len(), 1);
        session.delete_all_pieces().unwrap();
        drop(session);

        let reopened = Session::open(storage.clone(), SessionConfig::default()).unwrap();
        let pieces = storage.list_pieces().unwrap();
        assert_eq!(pieces.len(), 1);
        assert_eq!(pieces[0].name, "Untitled");
        assert!(reopened.loop_state().markers.is_empty());
        assert!(Preferences::new(storage.as_ref()).legacy_migrated());
    }

    #[test]
    fn test_cleanup_orphans_respects_other_pieces() {
        let (mut session, storage) = session();
        let first = session.current_piece_id().unwrap().to_string();
        let shared = session.add_track(wav_file("a.wav", 0.1)).unwrap();
        session.create_piece("Current").unwrap();
        let current = session.current_piece_id().unwrap().to_string();
        let own = session.add_track(wav_file("b.wav", 0.1)).unwrap();
        session.flush().unwrap();

        storage
            .put_blob("orphan", &AudioFile::new("o.wav", vec![1]))
            .unwrap();
        let mut piece = storage.get_piece(&current).unwrap().unwrap();
        piece.track_ids.push("stale".into());
        storage.put_piece(&piece).unwrap();

        let report = session.cleanup_orphans().unwrap();
        assert_eq!(report.deleted_blobs, vec!["orphan".to_string()]);
        assert_eq!(report.stripped_track_ids, vec!["stale".to_string()]);
        assert!(storage.get_blob(&shared).unwrap().is_some());
        assert!(storage.get_blob(&own).unwrap().is_some());
        assert_eq!(
            storage.get_piece(&current).unwrap().unwrap().track_ids,
            vec![own]
        );
        assert!(storage.get_piece(&first).unwrap().is_some());
        assert!(session.cleanup_orphans().unwrap().is_empty());
    }

    #[test]
    fn test_legacy_migration_adopts_flat_data() {
        let storage = Arc::new(MemoryStorage::new());
        let legacy = vec![TrackSettings {
            id: "old-1".into(),
            name: "Guitar".into(),
            color: "#123456".into(),
            mix: MixState {
                volume: 0.5,
                ..MixState::default()
            },
            recordable: false,
            recording_start_offset: 0.0,
        }];
        storage
            .set_pref(
                prefs::LEGACY_TRACK_SETTINGS,
                &serde_json::to_string(&legacy).unwrap(),
            )
            .unwrap();
        storage
            .put_blob("old-1", &AudioFile::new("guitar.wav", vec![0; 8]))
            .unwrap();
        storage
            .put_blob("old-2", &AudioFile::new("bass.wav", vec![0; 8]))
            .unwrap();

        let session = Session::open(storage.clone(), SessionConfig::default()).unwrap();
        let pieces = storage.list_pieces().unwrap();
        assert_eq!(pieces.len(), 1);
        assert!(pieces[0].name.starts_with("Session "));
        assert_eq!(pieces[0].track_ids, vec!["old-1", "old-2"]);

        let names: Vec<&str> = session.tracks().iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["Guitar", "bass"]);
        assert_eq!(session.tracks()[0].mix.volume, 0.5);
        assert!(
            storage
                .get_pref(prefs::LEGACY_TRACK_SETTINGS)
                .unwrap()
                .is_some()
        );

        drop(session);
        let reopened = Session::open(storage.clone(), SessionConfig::default()).unwrap();
        assert_eq!(storage.list_pieces().unwrap().len(), 1);
        assert_eq!(reopened.tracks().len(), 2);
    }

    #[test]
    fn test_open_falls_back_to_most_recent_piece() {
        let storage = Arc::new(MemoryStorage::new());
        {
            let mut session = Session::open(storage.clone(), SessionConfig::default()).unwrap();
            session.add_recording_track("Keep").unwrap();
            session.flush().unwrap();
        }
        storage.remove_pref(prefs::CURRENT_PIECE_ID).unwrap();

        let session = Session::open(storage.clone(), SessionConfig::default()).unwrap();
        assert_eq!(session.tracks()[0].name, "Keep");
        assert_eq!(storage.list_pieces().unwrap().len(), 1);
    }

    #[test]
    fn test_load_skips_unreadable_audio() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(FsStorage::open(dir.path()).unwrap());
        let mut session = Session::open(storage.clone(), SessionConfig::default()).unwrap();
        let id = session.current_piece_id().unwrap().to_string();
        let good = session.add_track(wav_file("good.wav", 0.2)).unwrap();
        let bad = session.add_track(wav_file("bad.wav", 0.2)).unwrap();
        settle(&mut session);

        // a plain file where the blob directory should be
        let blob_dir = dir.path().join("blobs").join(&bad);
        std::fs::remove_dir_all(&blob_dir).unwrap();
        std::fs::write(&blob_dir, b"not a directory").unwrap();

        session.load_piece(&id).unwrap();
        let ids: Vec<&str> = session.tracks().iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec![good.as_str()]);
        let file = session.track(&good).unwrap().file.as_ref().unwrap();
        assert_eq!(file.name, "good.wav");
        assert_eq!(Some(file.size), storage.blob_size(&good).unwrap());
    }

    #[test]
    fn test_reopen_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let piece_id;
        {
            let storage = Arc::new(FsStorage::open(dir.path()).unwrap());
            let mut session = Session::open(storage, SessionConfig::default()).unwrap();
            let id = session.add_track(wav_file("loop.wav", 0.3)).unwrap();
            session.set_volume(&id, 0.25);
            session.set_playback_rate(1.25);
            piece_id = session.current_piece_id().unwrap().to_string();
        }

        let storage = Arc::new(FsStorage::open(dir.path()).unwrap());
        let session = Session::open(storage, SessionConfig::default()).unwrap();
        assert_eq!(session.current_piece_id(), Some(piece_id.as_str()));
        assert_eq!(session.tracks()[0].name, "loop");
        assert_eq!(session.tracks()[0].mix.volume, 0.25);
        assert_eq!(session.playback().playback_rate, 1.25);
    }
}
