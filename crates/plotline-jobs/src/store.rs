//! In-memory job table.
//!
//! Each job lives in its own slot with its own lock. Writers clone the
//! record, apply the change, and swap the new copy in; readers clone the
//! current `Arc`, so a snapshot never shows a half-applied update.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use plotline_pipeline::{ExportBundle, PipelineError, ProcessingParams};
use tokio_util::sync::CancellationToken;

use crate::record::{JobId, JobRecord};

/// The image and parameters of a job that has not run yet.
#[derive(Debug, Clone)]
pub struct JobInput {
    pub image: Arc<[u8]>,
    pub params: ProcessingParams,
}

#[derive(Debug)]
struct Slot {
    seq: u64,
    record: RwLock<Arc<JobRecord>>,
    input: Mutex<Option<JobInput>>,
    bundle: RwLock<Option<Arc<ExportBundle>>>,
    cancel: CancellationToken,
}

/// Every job the service knows about.
#[derive(Debug, Default)]
pub struct JobStore {
    slots: RwLock<HashMap<JobId, Arc<Slot>>>,
    next_seq: AtomicU64,
}

fn not_found(id: JobId) -> PipelineError {
    PipelineError::NotFound(id.to_string())
}

impl JobStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, id: JobId) -> Result<Arc<Slot>, PipelineError> {
        let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
        slots.get(&id).cloned().ok_or_else(|| not_found(id))
    }

    /// Add a pending job and return its first snapshot.
    pub fn insert(&self, id: JobId, input: JobInput) -> JobRecord {
        let record = JobRecord::new(id);
        let slot = Slot {
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
            record: RwLock::new(Arc::new(record.clone())),
            input: Mutex::new(Some(input)),
            bundle: RwLock::new(None),
            cancel: CancellationToken::new(),
        };
        self.slots
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, Arc::new(slot));
        record
    }

    /// Consistent copy of one record.
    ///
    /// # Errors
    ///
    /// [`PipelineError::NotFound`] for unknown ids.
    pub fn snapshot(&self, id: JobId) -> Result<JobRecord, PipelineError> {
        let slot = self.slot(id)?;
        let current = Arc::clone(&slot.record.read().unwrap_or_else(PoisonError::into_inner));
        Ok((*current).clone())
    }

    /// Apply `change` to a copy of the record and publish the copy.
    ///
    /// The record is left untouched when `change` fails.
    ///
    /// # Errors
    ///
    /// [`PipelineError::NotFound`] for unknown ids, or whatever `change`
    /// returns.
    pub fn update<T>(
        &self,
        id: JobId,
        change: impl FnOnce(&mut JobRecord) -> Result<T, PipelineError>,
    ) -> Result<(T, JobRecord), PipelineError> {
        let slot = self.slot(id)?;
        let mut guard = slot.record.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = (**guard).clone();
        let value = change(&mut next)?;
        *guard = Arc::new(next.clone());
        Ok((value, next))
    }

    /// Remove the pending input so the job can run exactly once.
    ///
    /// # Errors
    ///
    /// [`PipelineError::NotFound`] for unknown ids.
    pub fn take_input(&self, id: JobId) -> Result<Option<JobInput>, PipelineError> {
        let slot = self.slot(id)?;
        let taken = slot.input.lock().unwrap_or_else(PoisonError::into_inner).take();
        Ok(taken)
    }

    /// Attach the serialized outputs of a finished job.
    ///
    /// # Errors
    ///
    /// [`PipelineError::NotFound`] for unknown ids.
    pub fn set_bundle(&self, id: JobId, bundle: ExportBundle) -> Result<(), PipelineError> {
        let slot = self.slot(id)?;
        *slot.bundle.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(bundle));
        Ok(())
    }

    /// # Errors
    ///
    /// [`PipelineError::NotFound`] for unknown ids.
    pub fn bundle(&self, id: JobId) -> Result<Option<Arc<ExportBundle>>, PipelineError> {
        let slot = self.slot(id)?;
        let bundle = slot.bundle.read().unwrap_or_else(PoisonError::into_inner).clone();
        Ok(bundle)
    }

    /// The job's cancellation marker.
    ///
    /// # Errors
    ///
    /// [`PipelineError::NotFound`] for unknown ids.
    pub fn cancel_token(&self, id: JobId) -> Result<CancellationToken, PipelineError> {
        Ok(self.slot(id)?.cancel.clone())
    }

    /// Forget a job, its input, and its outputs. Returns the last record.
    ///
    /// # Errors
    ///
    /// [`PipelineError::NotFound`] for unknown ids.
    pub fn remove(&self, id: JobId) -> Result<JobRecord, PipelineError> {
        let slot = self
            .slots
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
            .ok_or_else(|| not_found(id))?;
        let last = Arc::clone(&slot.record.read().unwrap_or_else(PoisonError::into_inner));
        Ok((*last).clone())
    }

    /// Remove every job whose current record matches `select`, returning
    /// the removed records oldest submission first.
    pub fn remove_where(&self, mut select: impl FnMut(&JobRecord) -> bool) -> Vec<JobRecord> {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        let mut removed = Vec::new();
        slots.retain(|_, slot| {
            let current = Arc::clone(&slot.record.read().unwrap_or_else(PoisonError::into_inner));
            if select(&current) {
                removed.push((slot.seq, (*current).clone()));
                false
            } else {
                true
            }
        });
        drop(slots);
        removed.sort_by_key(|(seq, _)| *seq);
        removed.into_iter().map(|(_, record)| record).collect()
    }

    /// Snapshots of every job, oldest submission first.
    #[must_use]
    pub fn list(&self) -> Vec<JobRecord> {
        let mut slots: Vec<Arc<Slot>> = self
            .slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        slots.sort_by_key(|s| s.seq);
        slots
            .iter()
            .map(|s| {
                let current = Arc::clone(&s.record.read().unwrap_or_else(PoisonError::into_inner));
                (*current).clone()
            })
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use plotline_pipeline::{Device, StageKind};

    use super::*;
    use crate::record::JobStatus;

    fn input() -> JobInput {
        JobInput {
            image: Arc::from(&b"png"[..]),
            params: ProcessingParams::new(50.0, 50.0, 0.3),
        }
    }

    #[test]
    fn inserted_jobs_start_pending() {
        let store = JobStore::new();
        let id = JobId::new();
        store.insert(id, input());
        assert_eq!(store.snapshot(id).unwrap().status, JobStatus::Pending);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn failed_update_leaves_record_unchanged() {
        let store = JobStore::new();
        let id = JobId::new();
        store.insert(id, input());
        let err = store
            .update(id, |r| {
                r.progress = 50;
                Err::<(), _>(PipelineError::Internal("nope".into()))
            })
            .unwrap_err();
        assert!(matches!(err, PipelineError::Internal(_)));
        assert_eq!(store.snapshot(id).unwrap().progress, 0);
    }

    #[test]
    fn snapshots_do_not_see_later_updates() {
        let store = JobStore::new();
        let id = JobId::new();
        store.insert(id, input());
        let before = store.snapshot(id).unwrap();
        store
            .update(id, |r| {
                r.start(Device::Cpu)?;
                r.advance(StageKind::Preprocess, 20);
                Ok(())
            })
            .unwrap();
        assert_eq!(before.status, JobStatus::Pending);
        assert_eq!(store.snapshot(id).unwrap().progress, 20);
    }

    #[test]
    fn input_can_be_taken_once() {
        let store = JobStore::new();
        let id = JobId::new();
        store.insert(id, input());
        assert!(store.take_input(id).unwrap().is_some());
        assert!(store.take_input(id).unwrap().is_none());
    }

    #[test]
    fn unknown_ids_are_not_found() {
        let store = JobStore::new();
        let id = JobId::new();
        assert!(matches!(store.snapshot(id), Err(PipelineError::NotFound(_))));
        assert!(matches!(store.cancel_token(id), Err(PipelineError::NotFound(_))));
    }

    #[test]
    fn removed_jobs_are_gone() {
        let store = JobStore::new();
        let id = JobId::new();
        store.insert(id, input());
        let last = store.remove(id).unwrap();
        assert_eq!(last.id, id);
        assert!(store.is_empty());
        assert!(matches!(store.snapshot(id), Err(PipelineError::NotFound(_))));
        assert!(matches!(store.remove(id), Err(PipelineError::NotFound(_))));
    }

    #[test]
    fn remove_where_keeps_unselected_jobs() {
        let store = JobStore::new();
        let ids: Vec<JobId> = (0..4).map(|_| JobId::new()).collect();
        for &id in &ids {
            store.insert(id, input());
        }
        for &id in &ids[..2] {
            store.update(id, |r| r.start(Device::Cpu)).unwrap();
        }
        let removed = store.remove_where(|r| r.status == JobStatus::Processing);
        let removed_ids: Vec<JobId> = removed.iter().map(|r| r.id).collect();
        assert_eq!(removed_ids, ids[..2]);
        let kept: Vec<JobId> = store.list().iter().map(|r| r.id).collect();
        assert_eq!(kept, ids[2..]);
    }

    #[test]
    fn list_keeps_submission_order() {
        let store = JobStore::new();
        let ids: Vec<JobId> = (0..5).map(|_| JobId::new()).collect();
        for &id in &ids {
            store.insert(id, input());
        }
        let listed: Vec<JobId> = store.list().iter().map(|r| r.id).collect();
        assert_eq!(listed, ids);
    }
}
