// src/store/writer.rs
// Background writer: state mutations enqueue jobs and return immediately;
// jobs are applied in order on a dedicated thread, failures are only logged.

use crossbeam::channel::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use super::{AudioFile, PieceSettings, Storage};
use crate::{Error, Result};

#[derive(Debug)]
pub enum WriteJob {
    SaveSettings {
        piece_id: String,
        settings: PieceSettings,
    },
    /// Stores a track's audio, then lists the track on `piece_id` if given.
    SaveBlob {
        piece_id: Option<String>,
        track_id: String,
        file: AudioFile,
    },
    DeleteBlob {
        track_id: String,
    },
    AddTrackId {
        piece_id: String,
        track_id: String,
    },
    RemoveTrackIds {
        piece_id: String,
        track_ids: Vec<String>,
    },
    /// Reorders the piece's track ids; ids not mentioned keep their place at the end.
    SetTrackOrder {
        piece_id: String,
        track_ids: Vec<String>,
    },
    SetPref {
        key: String,
        value: String,
    },
    Flush(Sender<()>),
}

/// Completion notices sent back to the session.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOutcome {
    BlobSaved { track_id: String, ok: bool },
}

pub struct StoreWriter {
    jobs: Option<Sender<WriteJob>>,
    outcomes: Receiver<WriteOutcome>,
    worker: Option<JoinHandle<()>>,
}

impl StoreWriter {
    pub fn spawn(storage: Arc<dyn Storage>) -> Result<Self> {
        let (job_tx, job_rx) = channel::unbounded::<WriteJob>();
        let (outcome_tx, outcome_rx) = channel::unbounded::<WriteOutcome>();

        let worker = thread::Builder::new()
            .name(String::from("loopdeck-store"))
            .spawn(move || {
                for job in job_rx {
                    apply(storage.as_ref(), job, &outcome_tx);
                }
                log::debug!("store writer stopped");
            })?;

        Ok(Self {
            jobs: Some(job_tx),
            outcomes: outcome_rx,
            worker: Some(worker),
        })
    }

    /// Enqueues a job without waiting for it.
    pub fn submit(&self, job: WriteJob) {
        let sent = self.jobs.as_ref().map(|jobs| jobs.send(job));
        if !matches!(sent, Some(Ok(()))) {
            log::error!("store writer is gone, dropping write");
        }
    }

    /// Blocks until every job submitted so far has been applied.
    pub fn flush(&self) -> Result<()> {
        let (ack_tx, ack_rx) = channel::bounded(1);
        let jobs = self.jobs.as_ref().ok_or(Error::WriterClosed)?;
        jobs.send(WriteJob::Flush(ack_tx))
            .map_err(|_| Error::WriterClosed)?;
        ack_rx.recv().map_err(|_| Error::WriterClosed)
    }

    /// Completion notices received so far.
    pub fn drain_outcomes(&self) -> Vec<WriteOutcome> {
        self.outcomes.try_iter().collect()
    }
}

impl Drop for StoreWriter {
    fn drop(&mut self) {
        // closing the channel ends the worker loop once the queue is drained
        self.jobs.take();
        if let Some(worker) = self.worker.take()
            && worker.join().is_err()
        {
            log::error!("store writer thread panicked");
        }
    }
}

fn apply(storage: &dyn Storage, job: WriteJob, outcomes: &Sender<WriteOutcome>) {
    match job {
        WriteJob::SaveSettings { piece_id, settings } => {
            if let Err(e) = storage.put_settings(&piece_id, &settings) {
                log::error!("failed to save settings for piece {}: {}", piece_id, e);
            }
        }
        WriteJob::SaveBlob {
            piece_id,
            track_id,
            file,
        } => {
            let ok = match storage.put_blob(&track_id, &file) {
                Ok(()) => {
                    if let Some(piece_id) = piece_id {
                        update_track_ids(storage, &piece_id, |ids| {
                            if !ids.contains(&track_id) {
                                ids.push(track_id.clone());
                            }
                        });
                    }
                    true
                }
                Err(e) => {
                    log::error!("failed to store audio for track {}: {}", track_id, e);
                    false
                }
            };
            let _ = outcomes.send(WriteOutcome::BlobSaved { track_id, ok });
        }
        WriteJob::DeleteBlob { track_id } => {
            if let Err(e) = storage.delete_blob(&track_id) {
                log::error!("failed to delete audio for track {}: {}", track_id, e);
            }
        }
        WriteJob::AddTrackId { piece_id, track_id } => {
            update_track_ids(storage, &piece_id, |ids| {
                if !ids.contains(&track_id) {
                    ids.push(track_id.clone());
                }
            });
        }
        WriteJob::RemoveTrackIds {
            piece_id,
            track_ids,
        } => {
            update_track_ids(storage, &piece_id, |ids| {
                ids.retain(|id| !track_ids.contains(id));
            });
        }
        WriteJob::SetTrackOrder {
            piece_id,
            track_ids,
        } => {
            update_track_ids(storage, &piece_id, |ids| {
                let mut ordered: Vec<String> = track_ids
                    .iter()
                    .filter(|id| ids.contains(id))
                    .cloned()
                    .collect();
                ordered.extend(ids.iter().filter(|id| !track_ids.contains(id)).cloned());
                *ids = ordered;
            });
        }
        WriteJob::SetPref { key, value } => {
            if let Err(e) = storage.set_pref(&key, &value) {
                log::error!("failed to save preference '{}': {}", key, e);
            }
        }
        WriteJob::Flush(ack) => {
            let _ = ack.send(());
        }
    }
}

fn update_track_ids(storage: &dyn Storage, piece_id: &str, edit: impl FnOnce(&mut Vec<String>)) {
    let mut piece = match storage.get_piece(piece_id) {
        Ok(Some(piece)) => piece,
        Ok(None) => {
            log::warn!("piece {} vanished before its track list was updated", piece_id);
            return;
        }
        Err(e) => {
            log::error!("failed to read piece {}: {}", piece_id, e);
            return;
        }
    };
    edit(&mut piece.track_ids);
    piece.touch();
    if let Err(e) = storage.put_piece(&piece) {
        log::error!("failed to update piece {}: {}", piece_id, e);
    }
}
