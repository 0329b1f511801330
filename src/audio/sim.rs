// src/audio/sim.rs
// Clock-driven track engine: keeps a transport position without producing sound

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::engine::{EngineError, EngineNotifier, TrackEngine};

#[derive(Debug, Clone, PartialEq)]
pub struct SimSnapshot {
    pub position: f64,
    pub duration: f64,
    pub rate: f64,
    pub preserve_pitch: bool,
    pub is_playing: bool,
    pub is_muted: bool,
    pub play_calls: usize,
    pub seek_calls: usize,
}

#[derive(Debug)]
struct SimTransport {
    position: f64,
    duration: f64,
    rate: f64,
    preserve_pitch: bool,
    is_playing: bool,
    is_muted: bool,
    fail_play: bool,
    play_calls: usize,
    seek_calls: usize,
}

/// Engine whose position only moves when [`SimEngine::advance`] is called.
///
/// Clones share one transport, so a caller can keep a handle to drive the
/// clock after registering a boxed clone with the session.
#[derive(Debug, Clone)]
pub struct SimEngine {
    inner: Arc<Mutex<SimTransport>>,
    notifier: Option<EngineNotifier>,
}

impl SimEngine {
    pub fn new(duration: f64) -> Self {
        Self {
            inner: Arc::new(Mutex::new(SimTransport {
                position: 0.0,
                duration: duration.max(0.0),
                rate: 1.0,
                preserve_pitch: true,
                is_playing: false,
                is_muted: false,
                fail_play: false,
                play_calls: 0,
                seek_calls: 0,
            })),
            notifier: None,
        }
    }

    pub fn with_notifier(mut self, notifier: EngineNotifier) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Attaches new media of `duration` seconds and signals readiness.
    pub fn load(&self, duration: f64) {
        {
            let mut state = self.state();
            state.duration = duration.max(0.0);
            state.position = 0.0;
            state.is_playing = false;
        }
        if let Some(notifier) = &self.notifier {
            notifier.ready(duration.max(0.0));
        }
    }

    /// Moves the clock forward by `seconds` of wall time, scaled by rate.
    pub fn advance(&self, seconds: f64) {
        let (position, finished) = {
            let mut state = self.state();
            if !state.is_playing {
                return;
            }
            state.position = (state.position + seconds * state.rate).min(state.duration);
            let finished = state.position >= state.duration;
            if finished {
                state.is_playing = false;
            }
            (state.position, finished)
        };

        if let Some(notifier) = &self.notifier {
            notifier.time_update(position);
            if finished {
                notifier.finished();
            }
        }
    }

    /// Makes subsequent `play` calls fail.
    pub fn set_fail_play(&self, fail: bool) {
        self.state().fail_play = fail;
    }

    pub fn snapshot(&self) -> SimSnapshot {
        let state = self.state();
        SimSnapshot {
            position: state.position,
            duration: state.duration,
            rate: state.rate,
            preserve_pitch: state.preserve_pitch,
            is_playing: state.is_playing,
            is_muted: state.is_muted,
            play_calls: state.play_calls,
            seek_calls: state.seek_calls,
        }
    }

    fn state(&self) -> MutexGuard<'_, SimTransport> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl TrackEngine for SimEngine {
    fn play(&mut self) -> Result<(), EngineError> {
        let mut state = self.state();
        state.play_calls += 1;
        if state.fail_play {
            return Err(EngineError::Playback(String::from("simulated failure")));
        }
        if state.duration <= 0.0 {
            return Err(EngineError::NotLoaded);
        }
        state.is_playing = true;
        Ok(())
    }

    fn pause(&mut self) {
        self.state().is_playing = false;
    }

    fn set_time(&mut self, seconds: f64) {
        let mut state = self.state();
        state.seek_calls += 1;
        state.position = seconds.clamp(0.0, state.duration);
    }

    fn current_time(&self) -> f64 {
        self.state().position
    }

    fn duration(&self) -> f64 {
        self.state().duration
    }

    fn set_playback_rate(&mut self, rate: f64, preserve_pitch: bool) {
        let mut state = self.state();
        state.rate = rate;
        state.preserve_pitch = preserve_pitch;
    }

    fn set_muted(&mut self, muted: bool) {
        self.state().is_muted = muted;
    }
}
