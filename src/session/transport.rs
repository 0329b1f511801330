// src/session/transport.rs
// Playback controller: fans transport commands out to every engine and
// reconciles what the engines report back

use std::time::Instant;

use super::Session;
use crate::store::prefs;

impl Session {
    /// Starts every engine. An armed track begins recording first.
    ///
    /// Engines already at (or past) their end are marked finished instead of
    /// being started; a failing engine is logged and skipped.
    pub fn play(&mut self) {
        if let Some(id) = self.armed_track_id() {
            self.start_recording(&id);
        }
        self.engines.clear_finished();

        let mut exhausted = Vec::new();
        for (id, engine) in self.engines.iter_mut() {
            if engine.current_time() >= engine.duration() {
                exhausted.push(id.to_string());
                continue;
            }
            if let Err(e) = engine.play() {
                log::warn!("track {} failed to start: {}", id, e);
            }
        }
        for id in &exhausted {
            self.engines.mark_finished(id);
        }
        self.playback.is_playing = true;
        log::debug!("playing from {:.3}s", self.playback.current_time);

        if !exhausted.is_empty() && self.engines.all_finished() && !self.is_recording() {
            self.finish_piece();
        }
    }

    /// Pauses every engine. A running take is stopped and the armed track
    /// disarmed first.
    pub fn pause(&mut self) {
        if let Some(id) = self.recording_track_id() {
            self.stop_recording(&id);
        }
        if let Some(id) = self.armed_track_id() {
            self.disarm(&id);
        }
        for (_, engine) in self.engines.iter_mut() {
            engine.pause();
        }
        self.playback.is_playing = false;
        self.refresh_current_time();
    }

    /// Pauses and rewinds to 0 without touching loop state.
    pub fn stop(&mut self) {
        self.pause();
        self.jump_to(0.0);
    }

    /// Moves the transport to `time`.
    ///
    /// Leaving the active loop's interval disables it, unless the seek was
    /// issued with the preserve flag armed (loop toggles, wraparound).
    pub fn seek(&mut self, time: f64) {
        let time = if time.is_nan() { 0.0 } else { time.max(0.0) };
        let preserve = std::mem::take(&mut self.preserve_loop_on_seek);

        if !preserve
            && let Some((start, end)) = self.loops.active_bounds()
            && !(start..=end).contains(&time)
        {
            log::debug!(
                "seek to {:.3}s leaves loop [{:.3}, {:.3}], disabling it",
                time,
                start,
                end
            );
            self.loops.disable_all();
            self.save_settings_to_piece();
        }
        self.jump_to(time);
    }

    /// Repositions every engine and opens the synchronizing window.
    fn jump_to(&mut self, time: f64) {
        self.playback.current_time = time;
        self.sync_until = Some(Instant::now() + self.config.sync_window());

        let revived: Vec<String> = self
            .engines
            .iter()
            .filter(|(id, engine)| self.engines.is_finished(id) && engine.duration() > time)
            .map(|(id, _)| id.to_string())
            .collect();

        for (_, engine) in self.engines.iter_mut() {
            engine.set_time(time);
        }
        for id in revived {
            self.engines.unmark_finished(&id);
            if self.playback.is_playing
                && let Some(engine) = self.engines.get_mut(&id)
                && let Err(e) = engine.play()
            {
                log::warn!("track {} failed to restart: {}", id, e);
            }
        }
    }

    /// True while engine time updates are being ignored after a seek.
    pub fn is_synchronizing(&self) -> bool {
        self.sync_until.is_some_and(|until| Instant::now() < until)
    }

    /// Sets the rate on every engine (pitch preserved) and persists it.
    pub fn set_playback_rate(&mut self, rate: f64) {
        let rate = self.config.clamp_playback_rate(rate);
        for (_, engine) in self.engines.iter_mut() {
            engine.set_playback_rate(rate, true);
        }
        self.playback.playback_rate = rate;
        self.persist_pref(prefs::PLAYBACK_RATE, rate);
        self.save_settings_to_piece();
    }

    pub fn set_master_volume(&mut self, volume: f64) {
        self.master_volume = if volume.is_nan() {
            1.0
        } else {
            volume.clamp(0.0, 1.0)
        };
        self.persist_pref(prefs::MASTER_VOLUME, self.master_volume);
        self.save_settings_to_piece();
    }

    /// Re-reads the advisory transport time from the engines, unless a seek
    /// is still settling.
    pub fn refresh_current_time(&mut self) {
        if self.is_synchronizing() {
            return;
        }
        if let Some(time) = self.engine_time() {
            self.playback.current_time = time;
        }
    }

    /// Live position of the first engine with media loaded.
    pub(crate) fn engine_time(&self) -> Option<f64> {
        self.engines
            .iter()
            .find(|(_, engine)| engine.duration() > 0.0)
            .map(|(_, engine)| engine.current_time())
    }

    pub(crate) fn refresh_duration(&mut self) {
        self.playback.duration = self.engines.max_duration();
    }

    pub(crate) fn handle_time_update(&mut self, track_id: &str, seconds: f64) {
        if self.is_synchronizing() {
            log::trace!("ignoring time update from {} while synchronizing", track_id);
            return;
        }
        self.playback.current_time = seconds;

        if self.playback.is_playing
            && let Some((start, end)) = self.loops.active_bounds()
            && end > start
            && seconds >= end
        {
            log::debug!("loop wraps at {:.3}s back to {:.3}s", seconds, start);
            self.preserve_loop_on_seek = true;
            self.seek(start);
        }
    }

    pub(crate) fn handle_track_finished(&mut self, track_id: &str) {
        if !self.engines.contains(track_id) {
            log::debug!("finish from unmounted track {}", track_id);
            return;
        }
        self.engines.mark_finished(track_id);
        log::debug!(
            "track {} finished ({}/{})",
            track_id,
            self.engines.finished_count(),
            self.engines.len()
        );
        if !self.engines.all_finished() || self.is_recording() {
            return;
        }

        // a loop ending at the very end of the media wraps instead
        if self.playback.is_playing
            && let Some((start, end)) = self.loops.active_bounds()
            && end > start
        {
            self.preserve_loop_on_seek = true;
            self.seek(start);
            return;
        }
        self.finish_piece();
    }

    /// End of piece: pause and rewind for the next play cycle.
    pub(crate) fn finish_piece(&mut self) {
        log::info!("end of piece reached");
        self.pause();
        self.seek(0.0);
        self.engines.clear_finished();
    }
}

#[cfg(test)]
mod tests {
    use super::super::Session;
    use super::super::test_support::*;
    use crate::audio::{EngineError, TrackEngine};
    use crate::config::SessionConfig;
    use crate::store::{MemoryStorage, Preferences, Storage};
    use std::sync::Arc;

    fn session_with_long_sync_window() -> Session {
        let config = SessionConfig {
            sync_window_ms: 60_000,
            ..SessionConfig::default()
        };
        Session::open(Arc::new(MemoryStorage::new()), config).unwrap()
    }

    #[test]
    fn test_end_of_piece_pauses_and_rewinds() {
        let (mut session, _storage) = session();
        let (_, short) = add_track_with_engine(&mut session, 3.0);
        let (_, long) = add_track_with_engine(&mut session, 5.0);
        session.play();
        assert!(session.playback().is_playing);

        short.advance(3.0);
        long.advance(3.0);
        session.pump();
        assert!(session.playback().is_playing);
        assert_eq!(session.engines().finished_count(), 1);

        long.advance(2.0);
        session.pump();
        assert!(!session.playback().is_playing);
        assert_eq!(session.playback().current_time, 0.0);
        assert_eq!(short.snapshot().position, 0.0);
        assert_eq!(long.snapshot().position, 0.0);
        assert_eq!(session.engines().finished_count(), 0);
    }

    #[test]
    fn test_seek_inside_loop_keeps_it_outside_disables_it() {
        let (mut session, storage) = session();
        add_track_with_engine(&mut session, 10.0);
        let s = session.add_marker(2.0, None).unwrap();
        let e = session.add_marker(6.0, None).unwrap();
        let l = session.create_loop(&s, &e).unwrap();
        assert!(session.toggle_loop_by_id(&l));

        for t in [2.0, 4.0, 6.0] {
            session.seek(t);
            assert_eq!(session.loop_state().active_loop_id.as_deref(), Some(l.as_str()));
            assert!(session.loop_state().get_loop(&l).unwrap().enabled);
        }

        session.seek(8.0);
        assert_eq!(session.loop_state().active_loop_id, None);
        assert!(!session.loop_state().get_loop(&l).unwrap().enabled);

        settle(&mut session);
        let piece_id = session.current_piece_id().unwrap().to_string();
        let stored = storage.get_settings(&piece_id).unwrap().unwrap().loop_state;
        assert_eq!(stored.active_loop_id, None);
        assert!(!stored.get_loop(&l).unwrap().enabled);
    }

    #[test]
    fn test_toggle_loop_seeks_to_start_and_stays_enabled() {
        let (mut session, _storage) = session();
        let (_, engine) = add_track_with_engine(&mut session, 10.0);
        session.seek(9.0);
        let a = session.add_marker(7.0, None).unwrap();
        let b = session.add_marker(3.0, None).unwrap();
        let l = session.create_loop(&a, &b).unwrap();

        assert!(session.toggle_loop_by_id(&l));
        assert_eq!(session.playback().current_time, 3.0);
        assert_eq!(engine.snapshot().position, 3.0);
        assert!(session.loop_state().get_loop(&l).unwrap().enabled);
        assert!(!session.is_preserving_loop());

        assert!(session.toggle_loop_by_id(&l));
        assert_eq!(session.loop_state().active_loop_id, None);
        assert!(!session.toggle_loop_by_id("ghost"));
    }

    #[test]
    fn test_failing_engine_does_not_block_others() {
        let (mut session, _storage) = session();
        let (_, broken) = add_track_with_engine(&mut session, 5.0);
        let (_, healthy) = add_track_with_engine(&mut session, 5.0);
        broken.set_fail_play(true);

        session.play();
        assert!(session.playback().is_playing);
        assert!(healthy.snapshot().is_playing);
        assert!(!broken.snapshot().is_playing);
        assert_eq!(broken.snapshot().play_calls, 1);

        session.seek(2.0);
        assert_eq!(broken.snapshot().position, 2.0);
        assert_eq!(healthy.snapshot().position, 2.0);
    }

    struct RejectingEngine;

    impl TrackEngine for RejectingEngine {
        fn play(&mut self) -> Result<(), EngineError> {
            Err(EngineError::Playback("device lost".into()))
        }
        fn pause(&mut self) {}
        fn set_time(&mut self, _seconds: f64) {}
        fn current_time(&self) -> f64 {
            0.0
        }
        fn duration(&self) -> f64 {
            4.0
        }
        fn set_playback_rate(&mut self, _rate: f64, _preserve_pitch: bool) {}
        fn set_muted(&mut self, _muted: bool) {}
    }

    #[test]
    fn test_rejecting_engine_is_isolated() {
        let (mut session, _storage) = session();
        let (_, healthy) = add_track_with_engine(&mut session, 5.0);
        let id = session.add_recording_track("Other").unwrap();
        session.register_engine(&id, Box::new(RejectingEngine));

        session.play();
        assert!(session.playback().is_playing);
        assert!(healthy.snapshot().is_playing);
    }

    #[test]
    fn test_seek_back_restarts_finished_engine() {
        let (mut session, _storage) = session();
        let (short_id, short) = add_track_with_engine(&mut session, 3.0);
        let (_, long) = add_track_with_engine(&mut session, 5.0);
        session.play();
        short.advance(3.0);
        long.advance(3.0);
        session.pump();
        assert!(session.engines().is_finished(&short_id));

        session.seek(1.0);
        assert!(!session.engines().is_finished(&short_id));
        assert_eq!(short.snapshot().play_calls, 2);
        assert!(short.snapshot().is_playing);
    }

    #[test]
    fn test_play_skips_exhausted_engines() {
        let (mut session, _storage) = session();
        let (short_id, short) = add_track_with_engine(&mut session, 3.0);
        let (_, long) = add_track_with_engine(&mut session, 5.0);
        session.seek(4.0);

        session.play();
        assert!(session.engines().is_finished(&short_id));
        assert_eq!(short.snapshot().play_calls, 0);
        assert!(long.snapshot().is_playing);
        assert!(session.playback().is_playing);
    }

    #[test]
    fn test_play_at_end_of_everything_rewinds() {
        let (mut session, _storage) = session();
        let (_, engine) = add_track_with_engine(&mut session, 3.0);
        session.seek(3.0);
        session.play();
        assert!(!session.playback().is_playing);
        assert_eq!(engine.snapshot().position, 0.0);
    }

    #[test]
    fn test_loop_wraps_at_end_marker() {
        let (mut session, _storage) = session_without_sync_window();
        let (_, engine) = add_track_with_engine(&mut session, 10.0);
        let s = session.add_marker(2.0, None).unwrap();
        let e = session.add_marker(4.0, None).unwrap();
        let l = session.create_loop(&s, &e).unwrap();
        session.toggle_loop_by_id(&l);
        session.play();

        engine.advance(1.0);
        session.pump();
        assert_eq!(session.playback().current_time, 3.0);

        engine.advance(1.5);
        session.pump();
        assert_eq!(session.playback().current_time, 2.0);
        assert_eq!(engine.snapshot().position, 2.0);
        assert_eq!(session.loop_state().active_loop_id.as_deref(), Some(l.as_str()));
    }

    #[test]
    fn test_loop_ending_at_media_end_wraps_instead_of_finishing() {
        let (mut session, _storage) = session_without_sync_window();
        let (_, engine) = add_track_with_engine(&mut session, 4.0);
        let s = session.add_marker(1.0, None).unwrap();
        let e = session.add_marker(4.0, None).unwrap();
        let l = session.create_loop(&s, &e).unwrap();
        session.toggle_loop_by_id(&l);
        session.play();

        engine.advance(3.0);
        session.pump();
        assert!(session.playback().is_playing);
        assert_eq!(engine.snapshot().position, 1.0);
        assert!(engine.snapshot().is_playing);
    }

    #[test]
    fn test_time_updates_ignored_while_synchronizing() {
        let mut session = session_with_long_sync_window();
        let (_, engine) = add_track_with_engine(&mut session, 10.0);
        session.seek(3.0);
        assert!(session.is_synchronizing());

        session.play();
        engine.advance(1.0);
        session.pump();
        assert_eq!(session.playback().current_time, 3.0);
        session.refresh_current_time();
        assert_eq!(session.playback().current_time, 3.0);
    }

    #[test]
    fn test_refresh_current_time_reads_engine() {
        let (mut session, _storage) = session_without_sync_window();
        let (_, engine) = add_track_with_engine(&mut session, 10.0);
        session.play();
        engine.advance(2.5);
        session.refresh_current_time();
        assert_eq!(session.playback().current_time, 2.5);
        assert!(!session.is_synchronizing());
    }

    #[test]
    fn test_rate_clamped_propagated_and_persisted() {
        let (mut session, storage) = session();
        let (_, engine) = add_track_with_engine(&mut session, 1.0);
        session.set_playback_rate(3.0);
        session.set_master_volume(-1.0);
        settle(&mut session);

        let snap = engine.snapshot();
        assert_eq!(snap.rate, 2.0);
        assert!(snap.preserve_pitch);
        assert_eq!(session.playback().playback_rate, 2.0);
        assert_eq!(session.master_volume(), 0.0);

        let prefs = Preferences::new(storage.as_ref());
        assert_eq!(prefs.playback_rate(), 2.0);
        assert_eq!(prefs.master_volume(), 0.0);
    }
}
