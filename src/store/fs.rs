// src/store/fs.rs
// Directory-backed storage:
//   <root>/pieces/<id>.json
//   <root>/settings/<id>.json
//   <root>/blobs/<track-id>/<file name>
//   <root>/prefs.toml

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use super::{AudioFile, Piece, PieceSettings, Storage};
use crate::Result;

const PIECES_DIR: &str = "pieces";
const SETTINGS_DIR: &str = "settings";
const BLOBS_DIR: &str = "blobs";
const PREFS_FILE: &str = "prefs.toml";

#[derive(Debug)]
pub struct FsStorage {
    root: PathBuf,
    // serializes read-modify-write of the preferences file
    prefs_lock: Mutex<()>,
}

impl FsStorage {
    /// Opens (creating if needed) a store rooted at `root`.
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        for dir in [PIECES_DIR, SETTINGS_DIR, BLOBS_DIR] {
            std::fs::create_dir_all(root.join(dir))?;
        }
        log::debug!("opened store at {:?}", root);
        Ok(Self {
            root,
            prefs_lock: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn doc_path(&self, dir: &str, id: &str) -> PathBuf {
        self.root.join(dir).join(format!("{}.json", file_key(id)))
    }

    fn blob_dir(&self, track_id: &str) -> PathBuf {
        self.root.join(BLOBS_DIR).join(file_key(track_id))
    }

    fn blob_path(&self, track_id: &str) -> Result<Option<PathBuf>> {
        let dir = self.blob_dir(track_id);
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        for entry in entries {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                return Ok(Some(entry.path()));
            }
        }
        Ok(None)
    }

    fn read_prefs(&self) -> Result<BTreeMap<String, String>> {
        match std::fs::read_to_string(self.root.join(PREFS_FILE)) {
            Ok(contents) => Ok(toml::from_str(&contents)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn write_prefs(&self, prefs: &BTreeMap<String, String>) -> Result<()> {
        let contents = toml::to_string(prefs)?;
        std::fs::write(self.root.join(PREFS_FILE), contents)?;
        Ok(())
    }
}

impl Storage for FsStorage {
    fn list_pieces(&self) -> Result<Vec<Piece>> {
        let mut pieces = Vec::new();
        for entry in std::fs::read_dir(self.root.join(PIECES_DIR))? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                match read_doc::<Piece>(&path) {
                    Ok(Some(piece)) => pieces.push(piece),
                    Ok(None) => {}
                    Err(e) => log::warn!("skipping unreadable piece {:?}: {}", path, e),
                }
            }
        }
        Ok(pieces)
    }

    fn get_piece(&self, id: &str) -> Result<Option<Piece>> {
        read_doc(&self.doc_path(PIECES_DIR, id))
    }

    fn put_piece(&self, piece: &Piece) -> Result<()> {
        write_doc(&self.doc_path(PIECES_DIR, &piece.id), piece)
    }

    fn delete_piece(&self, id: &str) -> Result<()> {
        remove_file(&self.doc_path(PIECES_DIR, id))
    }

    fn get_settings(&self, piece_id: &str) -> Result<Option<PieceSettings>> {
        read_doc(&self.doc_path(SETTINGS_DIR, piece_id))
    }

    fn put_settings(&self, piece_id: &str, settings: &PieceSettings) -> Result<()> {
        write_doc(&self.doc_path(SETTINGS_DIR, piece_id), settings)
    }

    fn delete_settings(&self, piece_id: &str) -> Result<()> {
        remove_file(&self.doc_path(SETTINGS_DIR, piece_id))
    }

    fn get_blob(&self, track_id: &str) -> Result<Option<AudioFile>> {
        let Some(path) = self.blob_path(track_id)? else {
            return Ok(None);
        };
        let bytes = std::fs::read(&path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Some(AudioFile::new(name, bytes)))
    }

    fn put_blob(&self, track_id: &str, file: &AudioFile) -> Result<()> {
        let dir = self.blob_dir(track_id);
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        std::fs::create_dir_all(&dir)?;
        let name = match file_key(&file.name) {
            name if name.is_empty() => String::from("audio"),
            name => name,
        };
        std::fs::write(dir.join(name), &file.bytes)?;
        Ok(())
    }

    fn delete_blob(&self, track_id: &str) -> Result<()> {
        match std::fs::remove_dir_all(self.blob_dir(track_id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn blob_ids(&self) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        for entry in std::fs::read_dir(self.root.join(BLOBS_DIR))? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                ids.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        ids.sort();
        Ok(ids)
    }

    fn blob_size(&self, track_id: &str) -> Result<Option<u64>> {
        match self.blob_path(track_id)? {
            Some(path) => Ok(Some(std::fs::metadata(path)?.len())),
            None => Ok(None),
        }
    }

    fn blob_name(&self, track_id: &str) -> Result<Option<String>> {
        Ok(self.blob_path(track_id)?.and_then(|path| {
            path.file_name()
                .map(|name| name.to_string_lossy().into_owned())
        }))
    }

    fn get_pref(&self, key: &str) -> Result<Option<String>> {
        let _guard = self.prefs_lock.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(self.read_prefs()?.remove(key))
    }

    fn set_pref(&self, key: &str, value: &str) -> Result<()> {
        let _guard = self.prefs_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut prefs = self.read_prefs()?;
        prefs.insert(key.to_string(), value.to_string());
        self.write_prefs(&prefs)
    }

    fn remove_pref(&self, key: &str) -> Result<()> {
        let _guard = self.prefs_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut prefs = self.read_prefs()?;
        if prefs.remove(key).is_some() {
            self.write_prefs(&prefs)?;
        }
        Ok(())
    }
}

/// Restricts an id or file name to characters safe for a single path segment.
fn file_key(raw: &str) -> String {
    let key: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ' ') {
                c
            } else {
                '_'
            }
        })
        .collect();
    key.trim_start_matches('.').to_string()
}

fn read_doc<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match std::fs::read_to_string(path) {
        Ok(contents) => Ok(Some(serde_json::from_str(&contents)?)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn write_doc<T: Serialize>(path: &Path, doc: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(doc)?;
    // write-then-rename so a crash never leaves a truncated document
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

fn remove_file(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{LoopState, MixState};
    use crate::store::TrackSettings;

    fn open_temp() -> (FsStorage, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStorage::open(dir.path()).unwrap();
        (store, dir)
    }

    #[test]
    fn test_piece_documents_roundtrip_through_disk() {
        let (store, _dir) = open_temp();
        let mut piece = Piece::new("p-1", "Chorale");
        piece.track_ids = vec!["a".into(), "b".into()];
        store.put_piece(&piece).unwrap();

        let mut loop_state = LoopState::default();
        loop_state.add_marker(1.0, Some("intro".into()), 10.0, 20);
        let settings = PieceSettings {
            track_settings: vec![TrackSettings {
                id: "a".into(),
                name: "Soprano".into(),
                color: "#fff".into(),
                mix: MixState {
                    volume: 0.4,
                    is_muted: true,
                    ..MixState::default()
                },
                recordable: false,
                recording_start_offset: 0.0,
            }],
            loop_state,
            playback_rate: 0.75,
            master_volume: 0.5,
        };
        store.put_settings("p-1", &settings).unwrap();

        // a fresh handle on the same directory sees everything
        let reopened = FsStorage::open(store.root()).unwrap();
        assert_eq!(reopened.get_piece("p-1").unwrap(), Some(piece));
        assert_eq!(reopened.get_settings("p-1").unwrap(), Some(settings));
        assert_eq!(reopened.list_pieces().unwrap().len(), 1);
    }

    #[test]
    fn test_blobs_keep_name_and_size() {
        let (store, _dir) = open_temp();
        store
            .put_blob("t1", &AudioFile::new("alto take.wav", vec![7; 100]))
            .unwrap();
        store
            .put_blob("t1", &AudioFile::new("alto take 2.wav", vec![7; 40]))
            .unwrap();

        let blob = store.get_blob("t1").unwrap().unwrap();
        assert_eq!(blob.name, "alto take 2.wav");
        assert_eq!(store.blob_size("t1").unwrap(), Some(40));
        assert_eq!(store.blob_name("t1").unwrap().as_deref(), Some("alto take 2.wav"));
        assert_eq!(store.blob_ids().unwrap(), vec!["t1".to_string()]);

        store.delete_blob("t1").unwrap();
        store.delete_blob("t1").unwrap();
        assert!(store.get_blob("t1").unwrap().is_none());
    }

    #[test]
    fn test_prefs_are_independent_keys() {
        let (store, _dir) = open_temp();
        assert_eq!(store.get_pref("playbackRate").unwrap(), None);
        store.set_pref("playbackRate", "1.25").unwrap();
        store.set_pref("masterVolume", "0.5").unwrap();
        store.remove_pref("playbackRate").unwrap();
        assert_eq!(store.get_pref("playbackRate").unwrap(), None);
        assert_eq!(store.get_pref("masterVolume").unwrap().as_deref(), Some("0.5"));
    }

    #[test]
    fn test_file_key_strips_separators() {
        assert_eq!(file_key("../etc/passwd"), "_etc_passwd");
        assert_eq!(file_key("take 1.wav"), "take 1.wav");
    }
}
