use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::{AudioFile, Piece, PieceSettings, Storage};
use crate::Result;

#[derive(Debug, Default)]
struct Collections {
    pieces: BTreeMap<String, Piece>,
    settings: BTreeMap<String, PieceSettings>,
    blobs: BTreeMap<String, AudioFile>,
    prefs: BTreeMap<String, String>,
}

/// Process-local store; contents vanish with the value.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    inner: Mutex<Collections>,
    fail_blob_writes: AtomicBool,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent `put_blob` fail with an I/O error.
    pub fn set_fail_blob_writes(&self, fail: bool) {
        self.fail_blob_writes.store(fail, Ordering::Relaxed);
    }

    fn lock(&self) -> MutexGuard<'_, Collections> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Storage for MemoryStorage {
    fn list_pieces(&self) -> Result<Vec<Piece>> {
        Ok(self.lock().pieces.values().cloned().collect())
    }

    fn get_piece(&self, id: &str) -> Result<Option<Piece>> {
        Ok(self.lock().pieces.get(id).cloned())
    }

    fn put_piece(&self, piece: &Piece) -> Result<()> {
        self.lock().pieces.insert(piece.id.clone(), piece.clone());
        Ok(())
    }

    fn delete_piece(&self, id: &str) -> Result<()> {
        self.lock().pieces.remove(id);
        Ok(())
    }

    fn get_settings(&self, piece_id: &str) -> Result<Option<PieceSettings>> {
        Ok(self.lock().settings.get(piece_id).cloned())
    }

    fn put_settings(&self, piece_id: &str, settings: &PieceSettings) -> Result<()> {
        self.lock()
            .settings
            .insert(piece_id.to_string(), settings.clone());
        Ok(())
    }

    fn delete_settings(&self, piece_id: &str) -> Result<()> {
        self.lock().settings.remove(piece_id);
        Ok(())
    }

    fn get_blob(&self, track_id: &str) -> Result<Option<AudioFile>> {
        Ok(self.lock().blobs.get(track_id).cloned())
    }

    fn put_blob(&self, track_id: &str, file: &AudioFile) -> Result<()> {
        if self.fail_blob_writes.load(Ordering::Relaxed) {
            return Err(std::io::Error::other("blob writes disabled").into());
        }
        self.lock().blobs.insert(track_id.to_string(), file.clone());
        Ok(())
    }

    fn delete_blob(&self, track_id: &str) -> Result<()> {
        self.lock().blobs.remove(track_id);
        Ok(())
    }

    fn blob_ids(&self) -> Result<Vec<String>> {
        Ok(self.lock().blobs.keys().cloned().collect())
    }

    fn blob_size(&self, track_id: &str) -> Result<Option<u64>> {
        Ok(self.lock().blobs.get(track_id).map(AudioFile::size))
    }

    fn blob_name(&self, track_id: &str) -> Result<Option<String>> {
        Ok(self.lock().blobs.get(track_id).map(|file| file.name.clone()))
    }

    fn get_pref(&self, key: &str) -> Result<Option<String>> {
        Ok(self.lock().prefs.get(key).cloned())
    }

    fn set_pref(&self, key: &str, value: &str) -> Result<()> {
        self.lock()
            .prefs
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_pref(&self, key: &str) -> Result<()> {
        self.lock().prefs.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_piece_and_settings_are_independent_collections() {
        let store = MemoryStorage::new();
        let piece = Piece::new("p1", "Etude");
        store.put_piece(&piece).unwrap();
        store
            .put_settings("p1", &PieceSettings::default())
            .unwrap();

        store.delete_piece("p1").unwrap();
        assert!(store.get_piece("p1").unwrap().is_none());
        assert!(store.get_settings("p1").unwrap().is_some());

        // Deleting again is fine.
        store.delete_piece("p1").unwrap();
    }

    #[test]
    fn test_blob_size_and_failure_switch() {
        let store = MemoryStorage::new();
        store
            .put_blob("t1", &AudioFile::new("a.wav", vec![0; 12]))
            .unwrap();
        assert_eq!(store.blob_size("t1").unwrap(), Some(12));
        assert_eq!(store.blob_size("t2").unwrap(), None);
        assert_eq!(store.blob_name("t1").unwrap().as_deref(), Some("a.wav"));

        store.set_fail_blob_writes(true);
        assert!(store.put_blob("t2", &AudioFile::new("b.wav", vec![1])).is_err());
        assert_eq!(store.blob_ids().unwrap(), vec!["t1".to_string()]);
    }
}
