// src/ui/shell.rs
// Line-oriented control surface: one command per line, driving a session
// whose tracks play on simulated engines.

use anyhow::{Context, Result, anyhow, bail};
use std::collections::HashMap;
use std::fmt::Write as _;

use crate::audio::{SimEngine, encode_wav, read_audio_file, wav_duration};
use crate::session::{RecordingState, Session};

/// Sample rate of the silent takes produced by the shell's recorder.
const TAKE_SAMPLE_RATE: u32 = 8_000;

pub const HELP: &str = "\
COMMANDS:
    add <file.wav>          Import a WAV file as a new track
    record-track <name>     Add an empty recordable track
    arm <n>                 Arm/disarm track n for recording
    play | pause | stop     Transport
    seek <seconds>          Move the transport
    tick <seconds>          Let the engines run for a while
    marker <seconds> [label]
    loop <m1> <m2>          Create a loop between markers m1 and m2
    toggle-loop <n>         Enable/disable loop n (and jump to its start)
    mute <n> | solo <n>     Toggle mute/solo on track n
    volume <n> <0..1>       Set track volume
    rate <0.5..2>           Set playback rate
    remove <n>              Remove track n
    pieces                  List saved pieces
    new <name>              Start a new piece
    load <n>                Load piece n from the list
    cleanup                 Remove orphaned audio
    status                  Show transport, tracks, markers and loops
    quit";

/// Result of one command.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Text(String),
    Quit,
}

pub struct Shell {
    session: Session,
    engines: HashMap<String, SimEngine>,
    // seconds captured by the running take
    take_seconds: f64,
}

impl Shell {
    pub fn new(session: Session) -> Self {
        let mut shell = Self {
            session,
            engines: HashMap::new(),
            take_seconds: 0.0,
        };
        shell.mount_engines();
        shell
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn execute(&mut self, line: &str) -> Result<Reply> {
        let mut words = line.split_whitespace();
        let Some(command) = words.next() else {
            return Ok(Reply::Text(String::new()));
        };
        let args: Vec<&str> = words.collect();

        let text = match command {
            "quit" | "exit" | "q" => return Ok(Reply::Quit),
            "help" | "h" => HELP.to_string(),
            "add" => {
                let path = args.first().ok_or_else(|| anyhow!("usage: add <file.wav>"))?;
                let file = read_audio_file(path).with_context(|| format!("reading {}", path))?;
                let duration = wav_duration(&file.bytes)
                    .with_context(|| format!("{} is not a readable WAV file", path))?;
                let name = file.name.clone();
                let Some(id) = self.session.add_track(file) else {
                    return Ok(Reply::Text(self.notices()));
                };
                self.mount(&id, duration);
                format!("added '{}' ({:.2}s)", name, duration)
            }
            "record-track" => {
                let name = if args.is_empty() {
                    String::from("Recording")
                } else {
                    args.join(" ")
                };
                match self.session.add_recording_track(&name) {
                    Some(_) => format!("added recordable track '{}'", name),
                    None => self.notices(),
                }
            }
            "arm" => {
                let id = self.track_arg(&args, 0)?;
                if !self.session.toggle_record_arm(&id) {
                    bail!("track cannot be armed");
                }
                if self.session.track(&id).is_some_and(|t| t.is_armed()) {
                    String::from("armed")
                } else {
                    String::from("disarmed")
                }
            }
            "play" => {
                if self.session.armed_track_id().is_some() {
                    self.take_seconds = 0.0;
                }
                self.session.play();
                self.describe_transport()
            }
            "pause" => {
                self.session.pause();
                self.save_take()?;
                self.describe_transport()
            }
            "stop" => {
                self.session.stop();
                self.save_take()?;
                self.describe_transport()
            }
            "seek" => {
                let time = number_arg(&args, 0)?;
                self.session.seek(time);
                self.describe_transport()
            }
            "tick" => {
                let seconds = number_arg(&args, 0)?;
                self.tick(seconds);
                self.describe_transport()
            }
            "marker" => {
                let time = number_arg(&args, 0)?;
                let label = (args.len() > 1).then(|| args[1..].join(" "));
                match self.session.add_marker(time, label) {
                    Some(_) => format!("{} marker(s)", self.session.loop_state().markers.len()),
                    None => self.notices(),
                }
            }
            "loop" => {
                let a = self.marker_arg(&args, 0)?;
                let b = self.marker_arg(&args, 1)?;
                match self.session.create_loop(&a, &b) {
                    Some(_) => format!("{} loop(s)", self.session.loop_state().loops.len()),
                    None => {
                        let notices = self.notices();
                        if notices.is_empty() {
                            bail!("loop rejected");
                        }
                        notices
                    }
                }
            }
            "toggle-loop" => {
                let index = index_arg(&args, 0)?;
                let id = self
                    .session
                    .loop_state()
                    .loops
                    .get(index)
                    .map(|l| l.id.clone())
                    .ok_or_else(|| anyhow!("no loop {}", index + 1))?;
                self.session.toggle_loop_by_id(&id);
                self.describe_transport()
            }
            "mute" => {
                let id = self.track_arg(&args, 0)?;
                self.session.toggle_mute(&id);
                self.describe_track(&id)
            }
            "solo" => {
                let id = self.track_arg(&args, 0)?;
                self.session.toggle_solo(&id);
                self.describe_track(&id)
            }
            "volume" => {
                let id = self.track_arg(&args, 0)?;
                let volume = number_arg(&args, 1)?;
                self.session.set_volume(&id, volume);
                self.describe_track(&id)
            }
            "rate" => {
                let rate = number_arg(&args, 0)?;
                self.session.set_playback_rate(rate);
                self.describe_transport()
            }
            "remove" => {
                let id = self.track_arg(&args, 0)?;
                self.session.remove_track(&id);
                self.engines.remove(&id);
                format!("{} track(s)", self.session.tracks().len())
            }
            "pieces" => {
                let mut out = String::new();
                for (i, summary) in self.session.list_pieces()?.iter().enumerate() {
                    let current = self.session.current_piece_id() == Some(summary.piece.id.as_str());
                    let _ = writeln!(
                        out,
                        "{}{}. {} ({} track(s), {} bytes)",
                        if current { "*" } else { " " },
                        i + 1,
                        summary.piece.name,
                        summary.track_count,
                        summary.size_bytes
                    );
                }
                let _ = write!(out, "total {} bytes", self.session.total_storage_size()?);
                out
            }
            "new" => {
                let name = if args.is_empty() {
                    String::from("Untitled")
                } else {
                    args.join(" ")
                };
                self.session.create_piece(&name)?;
                self.mount_engines();
                format!("new piece '{}'", name)
            }
            "load" => {
                let index = index_arg(&args, 0)?;
                let pieces = self.session.list_pieces()?;
                let summary = pieces
                    .get(index)
                    .ok_or_else(|| anyhow!("no piece {}", index + 1))?;
                self.session.load_piece(&summary.piece.id)?;
                self.mount_engines();
                format!(
                    "loaded '{}' ({} track(s))",
                    summary.piece.name,
                    self.session.tracks().len()
                )
            }
            "cleanup" => {
                let report = self.session.cleanup_orphans()?;
                format!(
                    "removed {} orphaned file(s), {} stale reference(s)",
                    report.deleted_blobs.len(),
                    report.stripped_track_ids.len()
                )
            }
            "status" => self.status(),
            other => bail!("unknown command '{}', try 'help'", other),
        };
        Ok(Reply::Text(text))
    }

    /// Mounts a simulated engine for every track with stored audio.
    fn mount_engines(&mut self) {
        self.engines.clear();
        let ids: Vec<String> = self
            .session
            .tracks()
            .iter()
            .filter(|t| t.file.is_some())
            .map(|t| t.id.clone())
            .collect();

        for id in ids {
            let duration = match self.session.track_audio(&id) {
                Ok(Some(file)) => wav_duration(&file.bytes),
                Ok(None) => continue,
                Err(e) => Err(e),
            };
            match duration {
                Ok(duration) => self.mount(&id, duration),
                Err(e) => log::warn!("cannot mount track {}: {}", id, e),
            }
        }
    }

    fn mount(&mut self, track_id: &str, duration: f64) {
        let engine = SimEngine::new(0.0).with_notifier(self.session.engine_notifier(track_id));
        if self
            .session
            .register_engine(track_id, Box::new(engine.clone()))
        {
            engine.load(duration);
            self.engines.insert(track_id.to_string(), engine);
            self.session.pump();
        }
    }

    fn tick(&mut self, seconds: f64) {
        if self.session.is_recording() {
            self.take_seconds += seconds * self.session.playback().playback_rate;
        }
        for engine in self.engines.values() {
            engine.advance(seconds);
        }
        self.session.pump();
        self.session.refresh_current_time();
    }

    /// Attaches the take of a stopped recording as silent audio of the
    /// recorded length.
    fn save_take(&mut self) -> Result<()> {
        let Some(id) = self
            .session
            .tracks()
            .iter()
            .find(|t| t.recording_state() == Some(RecordingState::Stopped))
            .map(|t| t.id.clone())
        else {
            return Ok(());
        };

        let seconds = std::mem::take(&mut self.take_seconds);
        let samples = vec![0.0f32; (seconds * TAKE_SAMPLE_RATE as f64) as usize];
        let bytes = encode_wav(&samples, TAKE_SAMPLE_RATE)?;
        if self.session.save_recording(&id, bytes) {
            self.mount(&id, seconds);
        }
        Ok(())
    }

    fn track_arg(&self, args: &[&str], position: usize) -> Result<String> {
        let index = index_arg(args, position)?;
        self.session
            .tracks()
            .get(index)
            .map(|t| t.id.clone())
            .ok_or_else(|| anyhow!("no track {}", index + 1))
    }

    fn marker_arg(&self, args: &[&str], position: usize) -> Result<String> {
        let index = index_arg(args, position)?;
        self.session
            .loop_state()
            .markers
            .get(index)
            .map(|m| m.id.clone())
            .ok_or_else(|| anyhow!("no marker {}", index + 1))
    }

    fn notices(&mut self) -> String {
        self.session
            .take_notices()
            .iter()
            .map(|notice| format!("{:?}", notice))
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn describe_transport(&self) -> String {
        let playback = self.session.playback();
        format!(
            "{} {:.2}/{:.2}s x{:.2}",
            if playback.is_playing {
                "playing"
            } else {
                "paused"
            },
            playback.current_time,
            playback.duration,
            playback.playback_rate
        )
    }

    fn describe_track(&self, id: &str) -> String {
        let Some(track) = self.session.track(id) else {
            return String::new();
        };
        let mut flags = String::new();
        if track.mix.is_muted {
            flags.push_str(" [M]");
        }
        if track.mix.is_solo {
            flags.push_str(" [S]");
        }
        match track.recording_state() {
            Some(RecordingState::Armed) => flags.push_str(" [armed]"),
            Some(RecordingState::Recording) => flags.push_str(" [rec]"),
            Some(RecordingState::Stopped) => flags.push_str(" [stopped]"),
            _ => {}
        }
        if self.session.is_audible(id) == Some(false) {
            flags.push_str(" (silent)");
        }
        format!("{} vol {:.2}{}", track.name, track.mix.volume, flags)
    }

    fn status(&self) -> String {
        let mut out = self.describe_transport();
        for (i, track) in self.session.tracks().iter().enumerate() {
            let _ = write!(out, "\n{}. {}", i + 1, self.describe_track(&track.id));
        }
        let loops = self.session.loop_state();
        for (i, marker) in loops.markers.iter().enumerate() {
            let _ = write!(
                out,
                "\nm{} {:.2}s {}",
                i + 1,
                marker.time,
                marker.label.as_deref().unwrap_or("")
            );
        }
        for (i, l) in loops.loops.iter().enumerate() {
            if let Some((start, end)) = loops.loop_bounds(&l.id) {
                let _ = write!(
                    out,
                    "\nl{} {:.2}-{:.2}s{}",
                    i + 1,
                    start,
                    end,
                    if l.enabled { " [on]" } else { "" }
                );
            }
        }
        out
    }
}

fn number_arg(args: &[&str], position: usize) -> Result<f64> {
    let raw = args
        .get(position)
        .ok_or_else(|| anyhow!("missing number argument"))?;
    raw.parse()
        .with_context(|| format!("'{}' is not a number", raw))
}

/// Parses a 1-based list position into an index.
fn index_arg(args: &[&str], position: usize) -> Result<usize> {
    let raw = args
        .get(position)
        .ok_or_else(|| anyhow!("missing index argument"))?;
    let n: usize = raw
        .parse()
        .with_context(|| format!("'{}' is not an index", raw))?;
    n.checked_sub(1).ok_or_else(|| anyhow!("indices start at 1"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use crate::store::MemoryStorage;
    use std::sync::Arc;

    fn shell() -> Shell {
        let config = SessionConfig {
            sync_window_ms: 0,
            ..SessionConfig::default()
        };
        Shell::new(Session::open(Arc::new(MemoryStorage::new()), config).unwrap())
    }

    fn run(shell: &mut Shell, line: &str) -> String {
        match shell.execute(line).unwrap() {
            Reply::Text(text) => text,
            Reply::Quit => String::from("<quit>"),
        }
    }

    fn write_wav(dir: &std::path::Path, name: &str, seconds: f64) -> String {
        let samples = vec![0.0f32; (seconds * 1000.0) as usize];
        let path = dir.join(name);
        std::fs::write(&path, encode_wav(&samples, 1000).unwrap()).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[test]
    fn test_import_play_and_finish() {
        let dir = tempfile::tempdir().unwrap();
        let mut shell = shell();
        let path = write_wav(dir.path(), "drums.wav", 2.0);

        assert_eq!(run(&mut shell, &format!("add {}", path)), "added 'drums.wav' (2.00s)");
        assert_eq!(shell.session().playback().duration, 2.0);
        assert!(run(&mut shell, "play").starts_with("playing"));
        assert!(run(&mut shell, "tick 1").starts_with("playing 1.00/2.00s"));
        assert!(run(&mut shell, "tick 1.5").starts_with("paused 0.00/2.00s"));
    }

    #[test]
    fn test_recording_take_is_attached() {
        let mut shell = shell();
        run(&mut shell, "record-track Vocals");
        assert_eq!(run(&mut shell, "arm 1"), "armed");
        run(&mut shell, "play");
        assert!(shell.session().is_recording());
        run(&mut shell, "tick 0.5");
        run(&mut shell, "pause");

        let track = &shell.session().tracks()[0];
        assert_eq!(track.file.as_ref().unwrap().name, format!("recording-{}.wav", track.id));
        assert_eq!(track.recording_state(), Some(RecordingState::Idle));
        assert_eq!(shell.session().playback().duration, 0.5);
    }

    #[test]
    fn test_loop_commands() {
        let mut shell = shell();
        run(&mut shell, "marker 1 intro");
        run(&mut shell, "marker 3");
        assert_eq!(run(&mut shell, "loop 2 1"), "1 loop(s)");
        run(&mut shell, "toggle-loop 1");
        let status = run(&mut shell, "status");
        assert!(status.contains("l1 1.00-3.00s [on]"));
        assert!(status.contains("m1 1.00s intro"));
        assert!(shell.execute("loop 1 9").is_err());
    }

    #[test]
    fn test_bad_input_is_an_error_not_a_panic() {
        let mut shell = shell();
        assert!(shell.execute("seek soon").is_err());
        assert!(shell.execute("mute 0").is_err());
        assert!(shell.execute("mute 4").is_err());
        assert!(shell.execute("frobnicate").is_err());
        assert_eq!(shell.execute("quit").unwrap(), Reply::Quit);
        assert_eq!(shell.execute("   ").unwrap(), Reply::Text(String::new()));
    }

    #[test]
    fn test_pieces_new_and_load() {
        let mut shell = shell();
        run(&mut shell, "record-track Keys");
        run(&mut shell, "new Second");
        assert!(shell.session().tracks().is_empty());
        let listing = run(&mut shell, "pieces");
        assert!(listing.contains("Second"));
        assert!(listing.contains("Untitled"));

        let untitled = shell
            .session()
            .list_pieces()
            .unwrap()
            .iter()
            .position(|p| p.piece.name == "Untitled")
            .unwrap();
        run(&mut shell, &format!("load {}", untitled + 1));
        assert_eq!(shell.session().tracks()[0].name, "Keys");
    }
}
