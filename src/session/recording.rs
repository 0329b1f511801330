// src/session/recording.rs
// Exclusive arming, take lifecycle and the loop stash kept while armed

use super::Session;
use super::track::{FileRef, Recordable, RecordingState};
use crate::store::{AudioFile, WriteJob};

impl Session {
    pub fn armed_track_id(&self) -> Option<String> {
        self.tracks
            .iter()
            .find(|t| t.is_armed())
            .map(|t| t.id.clone())
    }

    pub fn recording_track_id(&self) -> Option<String> {
        self.tracks
            .iter()
            .find(|t| t.is_recording())
            .map(|t| t.id.clone())
    }

    pub fn is_recording(&self) -> bool {
        self.tracks.iter().any(|t| t.is_recording())
    }

    /// Arms or disarms a recordable track that has no take yet.
    ///
    /// Arming disarms every other track and stashes the active loop.
    pub fn toggle_record_arm(&mut self, track_id: &str) -> bool {
        let Some(track) = self.track(track_id) else {
            return false;
        };
        if !track.is_recordable() || track.file.is_some() {
            log::warn!("track {} cannot be armed", track_id);
            return false;
        }
        if !matches!(
            track.recording_state(),
            Some(RecordingState::Idle | RecordingState::Armed)
        ) {
            log::warn!(
                "track {} has a take in progress, save or clear it first",
                track_id
            );
            return false;
        }

        if track.is_armed() {
            self.disarm(track_id);
        } else {
            let others: Vec<String> = self
                .tracks
                .iter()
                .filter(|t| t.id != track_id && t.is_armed())
                .map(|t| t.id.clone())
                .collect();
            for other in others {
                if self.track(&other).is_some_and(|t| t.is_recording()) {
                    self.stop_recording(&other);
                }
                self.disarm(&other);
            }
            self.arm(track_id);
        }
        self.save_settings_to_piece();
        true
    }

    fn arm(&mut self, track_id: &str) {
        let active = self.loops.active_loop_id.clone();
        let Some(rec) = self.track_mut(track_id).and_then(|t| t.recordable.as_mut()) else {
            return;
        };
        if !rec.advance(RecordingState::Armed) {
            return;
        }
        rec.is_armed = true;

        if let Some(loop_id) = active {
            log::debug!("stashing active loop {} while armed", loop_id);
            self.loops.disable_all();
            self.loop_backup = Some(loop_id);
        }
        log::info!("track {} armed", track_id);
    }

    /// Clears the armed flag and restores a stashed loop that still exists.
    pub(crate) fn disarm(&mut self, track_id: &str) {
        let Some(rec) = self.track_mut(track_id).and_then(|t| t.recordable.as_mut()) else {
            return;
        };
        rec.is_armed = false;
        if rec.state == RecordingState::Armed {
            rec.advance(RecordingState::Idle);
        }

        if let Some(loop_id) = self.loop_backup.take() {
            if self.loops.set_active_loop(Some(&loop_id)) {
                log::debug!("restored loop {} after disarm", loop_id);
            } else {
                log::debug!("stashed loop {} no longer exists", loop_id);
            }
        }
        log::info!("track {} disarmed", track_id);
    }

    /// Begins a take on an armed track at the most precise transport time
    /// available.
    pub fn start_recording(&mut self, track_id: &str) -> bool {
        let offset = self.engine_time().unwrap_or(self.playback.current_time);
        let Some(rec) = self.track_mut(track_id).and_then(|t| t.recordable.as_mut()) else {
            return false;
        };
        if !rec.is_armed || !rec.advance(RecordingState::Recording) {
            return false;
        }
        rec.start_offset = offset;
        self.recording_start_time = Some(offset);
        log::info!("recording on track {} from {:.3}s", track_id, offset);
        true
    }

    pub fn stop_recording(&mut self, track_id: &str) -> bool {
        let Some(rec) = self.track_mut(track_id).and_then(|t| t.recordable.as_mut()) else {
            return false;
        };
        if !rec.advance(RecordingState::Stopped) {
            return false;
        }
        self.recording_start_time = None;
        log::info!("recording on track {} stopped", track_id);
        true
    }

    /// Attaches a finished take to its track and persists it.
    ///
    /// Once the track's engine reports ready, the transport seeks to where
    /// the take started.
    pub fn save_recording(&mut self, track_id: &str, audio: Vec<u8>) -> bool {
        if self.track(track_id).is_some_and(|t| t.is_recording()) {
            self.stop_recording(track_id);
        }
        if self.track(track_id).is_some_and(|t| t.is_armed()) {
            self.disarm(track_id);
        }

        let file = AudioFile::new(format!("recording-{}.wav", track_id), audio);
        let Some(track) = self.track_mut(track_id) else {
            return false;
        };
        let Some(rec) = track.recordable.as_mut() else {
            log::warn!("track {} is not recordable", track_id);
            return false;
        };
        if !rec.advance(RecordingState::Idle) {
            return false;
        }
        let offset = rec.start_offset;
        track.file = Some(FileRef {
            name: file.name.clone(),
            size: file.size(),
        });

        self.submit(WriteJob::SaveBlob {
            piece_id: self.current_piece_id.clone(),
            track_id: track_id.to_string(),
            file,
        });
        self.save_settings_to_piece();
        self.pending_seeks.insert(track_id.to_string(), offset);
        log::info!("take saved for track {} (offset {:.3}s)", track_id, offset);
        true
    }

    /// Drops the take of a recordable track. No-op on other tracks.
    pub fn clear_recording(&mut self, track_id: &str) -> bool {
        if !self.track(track_id).is_some_and(|t| t.is_recordable()) {
            return false;
        }
        if self.track(track_id).is_some_and(|t| t.is_recording()) {
            self.stop_recording(track_id);
        }
        if self.track(track_id).is_some_and(|t| t.is_armed()) {
            self.disarm(track_id);
        }

        if let Some(track) = self.track_mut(track_id) {
            track.file = None;
            track.is_loading = false;
            track.recordable = Some(Recordable::default());
        }
        self.pending_seeks.remove(track_id);

        self.submit(WriteJob::DeleteBlob {
            track_id: track_id.to_string(),
        });
        if let Some(piece_id) = self.current_piece_id.clone() {
            self.submit(WriteJob::RemoveTrackIds {
                piece_id,
                track_ids: vec![track_id.to_string()],
            });
        }
        self.save_settings_to_piece();
        true
    }
}
