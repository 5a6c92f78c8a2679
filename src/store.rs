//! Repository interface
//!
//! Persistence is an external collaborator: the engine only requires the
//! small contract below. [`MemoryStore`] is the reference implementation used
//! by tests and the CLI; a database-backed implementation satisfies the same
//! trait.

use crate::error::EngineError;
use crate::types::{
    ActivityEvent, ActivityKind, CheckinRecord, ExperimentRecord, SubjectProfile,
};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

/// Result of an activity-event upsert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

/// Storage contract required by the engine.
///
/// Writes for one experiment are serialized by the caller (single-writer
/// discipline); no ordering is required across experiments. Activity upserts
/// are idempotent and commutative with staging computation, which always
/// re-derives its series from current data.
pub trait DataStore {
    fn put_subject(&self, profile: SubjectProfile) -> Result<(), EngineError>;
    fn subject(&self, key: &str) -> Result<SubjectProfile, EngineError>;

    /// Insert or replace an experiment record by key.
    fn put_experiment(&self, record: ExperimentRecord) -> Result<(), EngineError>;
    fn experiment(&self, key: &str) -> Result<ExperimentRecord, EngineError>;
    fn experiments_for_subject(&self, subject: &str) -> Result<Vec<ExperimentRecord>, EngineError>;

    fn append_checkin(&self, checkin: CheckinRecord) -> Result<(), EngineError>;
    /// Check-ins for an experiment, ascending by submission time.
    fn checkins_for(&self, experiment: &str) -> Result<Vec<CheckinRecord>, EngineError>;

    /// Insert the event, or refresh the attributes of the existing row with
    /// the same (subject, kind, source id).
    fn upsert_event(&self, event: ActivityEvent) -> Result<UpsertOutcome, EngineError>;
    /// Events of one kind whose interval touches `[from, to]`, ascending by
    /// start time.
    fn events_in_range(
        &self,
        subject: &str,
        kind: ActivityKind,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<ActivityEvent>, EngineError>;
}

#[derive(Default)]
struct MemoryInner {
    subjects: HashMap<String, SubjectProfile>,
    experiments: HashMap<String, ExperimentRecord>,
    checkins: HashMap<String, Vec<CheckinRecord>>,
    events: HashMap<(String, ActivityKind), Vec<ActivityEvent>>,
}

/// In-memory store. One lock guards all maps, which trivially provides the
/// per-record write serialization the engine requires.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryInner>, EngineError> {
        self.inner
            .lock()
            .map_err(|_| EngineError::DataIntegrity("store lock poisoned".to_string()))
    }
}

impl DataStore for MemoryStore {
    fn put_subject(&self, profile: SubjectProfile) -> Result<(), EngineError> {
        self.lock()?.subjects.insert(profile.key.clone(), profile);
        Ok(())
    }

    fn subject(&self, key: &str) -> Result<SubjectProfile, EngineError> {
        self.lock()?
            .subjects
            .get(key)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("subject {key}")))
    }

    fn put_experiment(&self, record: ExperimentRecord) -> Result<(), EngineError> {
        self.lock()?.experiments.insert(record.key.clone(), record);
        Ok(())
    }

    fn experiment(&self, key: &str) -> Result<ExperimentRecord, EngineError> {
        self.lock()?
            .experiments
            .get(key)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("experiment {key}")))
    }

    fn experiments_for_subject(&self, subject: &str) -> Result<Vec<ExperimentRecord>, EngineError> {
        let inner = self.lock()?;
        let mut records: Vec<ExperimentRecord> = inner
            .experiments
            .values()
            .filter(|r| r.subject == subject)
            .cloned()
            .collect();
        records.sort_by_key(|r| r.start_time);
        Ok(records)
    }

    fn append_checkin(&self, checkin: CheckinRecord) -> Result<(), EngineError> {
        self.lock()?
            .checkins
            .entry(checkin.experiment.clone())
            .or_default()
            .push(checkin);
        Ok(())
    }

    fn checkins_for(&self, experiment: &str) -> Result<Vec<CheckinRecord>, EngineError> {
        let inner = self.lock()?;
        let mut checkins = inner
            .checkins
            .get(experiment)
            .cloned()
            .unwrap_or_default();
        checkins.sort_by_key(|c| c.checkin_time);
        Ok(checkins)
    }

    fn upsert_event(&self, event: ActivityEvent) -> Result<UpsertOutcome, EngineError> {
        let mut inner = self.lock()?;
        let rows = inner
            .events
            .entry((event.subject.clone(), event.kind))
            .or_default();
        match rows.iter_mut().find(|e| e.source_id == event.source_id) {
            Some(existing) => {
                *existing = event;
                Ok(UpsertOutcome::Updated)
            }
            None => {
                rows.push(event);
                Ok(UpsertOutcome::Inserted)
            }
        }
    }

    fn events_in_range(
        &self,
        subject: &str,
        kind: ActivityKind,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<ActivityEvent>, EngineError> {
        let inner = self.lock()?;
        let mut events: Vec<ActivityEvent> = inner
            .events
            .get(&(subject.to_string(), kind))
            .map(|rows| {
                rows.iter()
                    .filter(|e| e.end_time >= from && e.start_time <= to)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        events.sort_by_key(|e| e.start_time);
        Ok(events)
    }
}
