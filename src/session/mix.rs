// src/session/mix.rs
// Track registry and the solo/mute composition policy

use uuid::Uuid;

use super::track::{FileRef, Track, track_name_from_file};
use super::{Notice, Session};
use crate::store::{AudioFile, WriteJob};

impl Session {
    /// Adds a track holding `file`. Stops the transport first.
    ///
    /// Returns `None` at the track cap; a [`Notice`] is queued instead.
    pub fn add_track(&mut self, file: AudioFile) -> Option<String> {
        if !self.has_track_capacity() {
            return None;
        }
        self.stop();

        let id = Uuid::new_v4().to_string();
        let color = self.next_color();
        let mut track = Track::new(&id, track_name_from_file(&file.name), color);
        track.file = Some(FileRef {
            name: file.name.clone(),
            size: file.size(),
        });
        track.is_loading = true;
        log::info!("adding track '{}' ({} bytes)", track.name, file.size());
        self.tracks.push(track);

        self.submit(WriteJob::SaveBlob {
            piece_id: self.current_piece_id.clone(),
            track_id: id.clone(),
            file,
        });
        self.save_settings_to_piece();
        Some(id)
    }

    /// Adds an empty recordable track.
    pub fn add_recording_track(&mut self, name: &str) -> Option<String> {
        if !self.has_track_capacity() {
            return None;
        }
        let id = Uuid::new_v4().to_string();
        let color = self.next_color();
        self.tracks.push(Track::new(&id, name, color).recordable());
        self.save_settings_to_piece();
        Some(id)
    }

    fn has_track_capacity(&mut self) -> bool {
        let max = self.config.max_tracks;
        if self.tracks.len() >= max {
            log::warn!("track limit of {} reached", max);
            self.notices.push(Notice::TrackLimitReached { max });
            return false;
        }
        true
    }

    pub fn remove_track(&mut self, id: &str) -> bool {
        let Some(track) = self.track(id) else {
            return false;
        };
        if track.is_recording() {
            self.stop_recording(id);
        }
        if self.track(id).is_some_and(|t| t.is_armed()) {
            self.disarm(id);
        }

        self.tracks.retain(|t| t.id != id);
        if let Some(mut engine) = self.engines.unregister(id) {
            engine.pause();
        }
        self.pending_seeks.remove(id);
        self.refresh_duration();
        self.apply_mix();

        self.submit(WriteJob::DeleteBlob {
            track_id: id.to_string(),
        });
        if let Some(piece_id) = self.current_piece_id.clone() {
            self.submit(WriteJob::RemoveTrackIds {
                piece_id,
                track_ids: vec![id.to_string()],
            });
        }
        self.save_settings_to_piece();

        if self.playback.is_playing && self.engines.all_finished() {
            self.finish_piece();
        }
        true
    }

    /// Removes every track and wipes markers and loops with them.
    pub fn remove_all_tracks(&mut self) {
        self.pause();
        let ids: Vec<String> = self.tracks.iter().map(|t| t.id.clone()).collect();
        for id in &ids {
            self.submit(WriteJob::DeleteBlob {
                track_id: id.clone(),
            });
        }
        if let Some(piece_id) = self.current_piece_id.clone() {
            self.submit(WriteJob::RemoveTrackIds {
                piece_id,
                track_ids: ids,
            });
        }

        self.tracks.clear();
        self.engines.clear();
        self.pending_seeks.clear();
        self.loop_backup = None;
        self.recording_start_time = None;
        self.loops.clear();
        self.playback.current_time = 0.0;
        self.refresh_duration();
        self.save_settings_to_piece();
    }

    /// Moves the track at `from` to index `to`.
    pub fn reorder_tracks(&mut self, from: usize, to: usize) -> bool {
        let len = self.tracks.len();
        if from >= len || to >= len {
            log::warn!("reorder out of range: {} -> {} ({} tracks)", from, to, len);
            return false;
        }
        if from == to {
            return true;
        }
        let track = self.tracks.remove(from);
        self.tracks.insert(to, track);

        if let Some(piece_id) = self.current_piece_id.clone() {
            self.submit(WriteJob::SetTrackOrder {
                piece_id,
                track_ids: self.tracks.iter().map(|t| t.id.clone()).collect(),
            });
        }
        self.save_settings_to_piece();
        true
    }

    pub fn set_volume(&mut self, id: &str, volume: f64) -> bool {
        let Some(track) = self.track_mut(id) else {
            return false;
        };
        track.mix.set_volume(volume);
        self.save_settings_to_piece();
        true
    }

    pub fn toggle_mute(&mut self, id: &str) -> bool {
        self.edit_mix(id, |t| t.mix.toggle_mute())
    }

    pub fn toggle_solo(&mut self, id: &str) -> bool {
        self.edit_mix(id, |t| t.mix.toggle_solo())
    }

    pub fn toggle_collapse(&mut self, id: &str) -> bool {
        let Some(track) = self.track_mut(id) else {
            return false;
        };
        track.mix.is_collapsed = !track.mix.is_collapsed;
        self.save_settings_to_piece();
        true
    }

    pub fn rename_track(&mut self, id: &str, name: &str) -> bool {
        let Some(track) = self.track_mut(id) else {
            return false;
        };
        track.name = name.to_string();
        self.save_settings_to_piece();
        true
    }

    /// Solos exactly `id`.
    pub fn exclusive_solo(&mut self, id: &str) -> bool {
        if self.track(id).is_none() {
            return false;
        }
        for track in &mut self.tracks {
            track.mix.is_solo = track.id == id;
        }
        self.apply_mix();
        self.save_settings_to_piece();
        true
    }

    /// Clears mute on every track; solo flags are left alone.
    pub fn unmute_all(&mut self) {
        for track in &mut self.tracks {
            track.mix.is_muted = false;
        }
        self.apply_mix();
        self.save_settings_to_piece();
    }

    pub fn any_solo(&self) -> bool {
        self.tracks.iter().any(|t| t.mix.is_solo)
    }

    pub fn is_audible(&self, id: &str) -> Option<bool> {
        let any_solo = self.any_solo();
        self.track(id).map(|t| t.mix.is_audible(any_solo))
    }

    /// Output gain for a track: its volume scaled by the master volume, or
    /// zero when the mix policy silences it.
    pub fn track_gain(&self, id: &str) -> Option<f64> {
        let audible = self.is_audible(id)?;
        let volume = self.track(id)?.mix.volume;
        Some(if audible {
            volume * self.master_volume
        } else {
            0.0
        })
    }

    /// Pushes the computed mute state to every mounted engine.
    pub fn apply_mix(&mut self) {
        let any_solo = self.any_solo();
        for track in &self.tracks {
            if let Some(engine) = self.engines.get_mut(&track.id) {
                engine.set_muted(!track.mix.is_audible(any_solo));
            }
        }
    }

    fn edit_mix(&mut self, id: &str, edit: impl FnOnce(&mut Track)) -> bool {
        let Some(track) = self.track_mut(id) else {
            return false;
        };
        edit(track);
        self.apply_mix();
        self.save_settings_to_piece();
        true
    }
}
