use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::Result;

/// Limits and timing knobs for a [`Session`](crate::Session).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub max_tracks: usize,
    pub max_markers: usize,
    pub max_loops: usize,
    /// How long engine time updates are ignored after a seek.
    pub sync_window_ms: u64,
    pub min_playback_rate: f64,
    pub max_playback_rate: f64,
    /// Track colours, handed out in rotation.
    pub palette: Vec<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_tracks: 8,
            max_markers: 20,
            max_loops: 10,
            sync_window_ms: 50,
            min_playback_rate: 0.5,
            max_playback_rate: 2.0,
            palette: [
                "#4f9cf9", "#f97b4f", "#5cc98a", "#c77dff", "#f9d34f", "#4fd1c5", "#f25f8a",
                "#9aa5b1",
            ]
            .iter()
            .map(|c| c.to_string())
            .collect(),
        }
    }
}

impl SessionConfig {
    pub fn sync_window(&self) -> Duration {
        Duration::from_millis(self.sync_window_ms)
    }

    pub fn clamp_playback_rate(&self, rate: f64) -> f64 {
        if rate.is_nan() {
            return 1.0;
        }
        rate.clamp(self.min_playback_rate, self.max_playback_rate)
    }

    /// Colour for the `n`th track created in this session.
    pub fn palette_color(&self, n: usize) -> String {
        if self.palette.is_empty() {
            return String::from("#888888");
        }
        self.palette[n % self.palette.len()].clone()
    }

    /// Reads a TOML config file.
    ///
    /// A missing or unparseable file yields the defaults; the failure is logged.
    pub fn load(path: &Path) -> Self {
        if !path.exists() {
            log::info!("config {:?} not found, using defaults", path);
            return Self::default();
        }

        match std::fs::read_to_string(path) {
            Ok(contents) => match toml::from_str::<Self>(&contents) {
                Ok(config) => config,
                Err(e) => {
                    log::warn!("failed to parse config {:?}: {}, using defaults", path, e);
                    Self::default()
                }
            },
            Err(e) => {
                log::warn!("failed to read config {:?}: {}, using defaults", path, e);
                Self::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }
}
