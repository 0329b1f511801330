// src/audio/engine.rs
// Track engine contract and the registry the transport fans commands out to

use crossbeam::channel::Sender;
use std::collections::HashSet;
use thiserror::Error;

/// Failure reported by a single track engine.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EngineError {
    #[error("engine has no media loaded")]
    NotLoaded,
    #[error("engine playback failed: {0}")]
    Playback(String),
}

/// Per-track audio unit driven by the session.
///
/// Commands are dispatched back-to-back across every registered engine;
/// none of them is awaited. Engines report back through an
/// [`EngineNotifier`].
pub trait TrackEngine {
    fn play(&mut self) -> Result<(), EngineError>;
    fn pause(&mut self);
    fn set_time(&mut self, seconds: f64);
    fn current_time(&self) -> f64;
    fn duration(&self) -> f64;
    fn set_playback_rate(&mut self, rate: f64, preserve_pitch: bool);
    fn set_muted(&mut self, muted: bool);
}

/// Notifications emitted by engines, drained by [`Session::pump`](crate::Session::pump).
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// Media attached and playable.
    Ready { track_id: String, duration: f64 },
    /// Reached end of media during the current play cycle.
    Finished { track_id: String },
    /// Engine-originated position change.
    TimeUpdate { track_id: String, seconds: f64 },
}

/// Sending half handed to one engine so it can report on its own track.
#[derive(Debug, Clone)]
pub struct EngineNotifier {
    track_id: String,
    sender: Sender<EngineEvent>,
}

impl EngineNotifier {
    pub(crate) fn new(track_id: impl Into<String>, sender: Sender<EngineEvent>) -> Self {
        Self {
            track_id: track_id.into(),
            sender,
        }
    }

    pub fn track_id(&self) -> &str {
        &self.track_id
    }

    pub fn ready(&self, duration: f64) {
        self.send(EngineEvent::Ready {
            track_id: self.track_id.clone(),
            duration,
        });
    }

    pub fn finished(&self) {
        self.send(EngineEvent::Finished {
            track_id: self.track_id.clone(),
        });
    }

    pub fn time_update(&self, seconds: f64) {
        self.send(EngineEvent::TimeUpdate {
            track_id: self.track_id.clone(),
            seconds,
        });
    }

    fn send(&self, event: EngineEvent) {
        // The session may already be gone; nothing left to notify.
        let _ = self.sender.try_send(event);
    }
}

/// Engine handles keyed by track id, plus the finished set of the
/// current play cycle.
#[derive(Default)]
pub struct EngineRegistry {
    engines: Vec<(String, Box<dyn TrackEngine>)>,
    finished: HashSet<String>,
}

impl EngineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mounts an engine for `track_id`, replacing any previous one.
    pub fn register(&mut self, track_id: &str, engine: Box<dyn TrackEngine>) {
        if let Some(slot) = self.engines.iter_mut().find(|(id, _)| id == track_id) {
            slot.1 = engine;
        } else {
            self.engines.push((track_id.to_string(), engine));
        }
        self.finished.remove(track_id);
    }

    pub fn unregister(&mut self, track_id: &str) -> Option<Box<dyn TrackEngine>> {
        self.finished.remove(track_id);
        let index = self.engines.iter().position(|(id, _)| id == track_id)?;
        Some(self.engines.remove(index).1)
    }

    pub fn clear(&mut self) {
        self.engines.clear();
        self.finished.clear();
    }

    pub fn len(&self) -> usize {
        self.engines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.engines.is_empty()
    }

    pub fn contains(&self, track_id: &str) -> bool {
        self.engines.iter().any(|(id, _)| id == track_id)
    }

    pub fn get(&self, track_id: &str) -> Option<&dyn TrackEngine> {
        self.engines
            .iter()
            .find(|(id, _)| id == track_id)
            .map(|(_, engine)| engine.as_ref())
    }

    pub fn get_mut(&mut self, track_id: &str) -> Option<&mut Box<dyn TrackEngine>> {
        self.engines
            .iter_mut()
            .find(|(id, _)| id == track_id)
            .map(|(_, engine)| engine)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &dyn TrackEngine)> {
        self.engines
            .iter()
            .map(|(id, engine)| (id.as_str(), engine.as_ref()))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&str, &mut Box<dyn TrackEngine>)> {
        self.engines
            .iter_mut()
            .map(|(id, engine)| (id.as_str(), engine))
    }

    /// Longest media among mounted engines.
    pub fn max_duration(&self) -> f64 {
        self.engines
            .iter()
            .map(|(_, engine)| engine.duration())
            .fold(0.0, f64::max)
    }

    /// Records that `track_id` reached its end. Unknown ids are ignored.
    pub fn mark_finished(&mut self, track_id: &str) -> bool {
        if !self.contains(track_id) {
            return false;
        }
        self.finished.insert(track_id.to_string())
    }

    pub fn unmark_finished(&mut self, track_id: &str) -> bool {
        self.finished.remove(track_id)
    }

    pub fn is_finished(&self, track_id: &str) -> bool {
        self.finished.contains(track_id)
    }

    pub fn finished_count(&self) -> usize {
        self.finished.len()
    }

    pub fn clear_finished(&mut self) {
        self.finished.clear();
    }

    /// Every mounted engine has finished, and there is at least one.
    pub fn all_finished(&self) -> bool {
        !self.engines.is_empty() && self.finished.len() == self.engines.len()
    }
}
