//! Wearable feed adapter
//!
//! Parses the tracker feed's JSON payloads into [`ActivityEvent`]s and
//! upserts them into a store. Network fetch and scheduling belong to the
//! sync collaborator; the engine only depends on the upsert being idempotent
//! (keyed by subject + kind + source id), which makes re-imports commutative
//! with staging computation.

use crate::error::EngineError;
use crate::store::{DataStore, UpsertOutcome};
use crate::types::{ActivityEvent, ActivityKind};
use chrono::DateTime;
use serde::Deserialize;

/// Counts from one sync pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStats {
    pub inserted: usize,
    pub updated: usize,
}

/// Adapter for a feed payload of one activity kind
pub trait ActivityFeedAdapter {
    /// Parse raw feed JSON into events owned by `subject`.
    fn parse(
        &self,
        raw_json: &str,
        subject: &str,
        kind: ActivityKind,
    ) -> Result<Vec<ActivityEvent>, EngineError>;
}

/// Adapter for the tracker feed's `data.items[]` shape: epoch-second
/// intervals with a per-item `details` object carrying the type-specific
/// numbers (`awake` in seconds, `steps`, `distance` in meters).
pub struct TrackerFeedAdapter;

impl ActivityFeedAdapter for TrackerFeedAdapter {
    fn parse(
        &self,
        raw_json: &str,
        subject: &str,
        kind: ActivityKind,
    ) -> Result<Vec<ActivityEvent>, EngineError> {
        let payload: FeedPayload = serde_json::from_str(raw_json)?;
        let mut events = Vec::new();

        for item in payload.data.items {
            let start = DateTime::from_timestamp(item.time_created, 0).ok_or_else(|| {
                EngineError::Parse(format!("bad start timestamp on item {}", item.xid))
            })?;
            let end = DateTime::from_timestamp(item.time_completed, 0).ok_or_else(|| {
                EngineError::Parse(format!("bad end timestamp on item {}", item.xid))
            })?;

            let raw = serde_json::to_value(&item).unwrap_or(serde_json::Value::Null);
            let mut event = ActivityEvent::new(subject, kind, item.xid, start, end)
                .with_steps(item.details.steps)
                .with_awake_minutes(item.details.awake / 60.0)
                .with_raw(raw);
            event.distance_meters = item.details.distance;
            events.push(event);
        }

        Ok(events)
    }
}

/// Upsert parsed events into the store. Re-running with the same payload is
/// a pure refresh: no new rows, identical aggregation results.
pub fn sync_events<S: DataStore>(
    store: &S,
    events: Vec<ActivityEvent>,
) -> Result<SyncStats, EngineError> {
    let mut stats = SyncStats::default();
    for event in events {
        match store.upsert_event(event)? {
            UpsertOutcome::Inserted => stats.inserted += 1,
            UpsertOutcome::Updated => stats.updated += 1,
        }
    }
    Ok(stats)
}

#[derive(Debug, Deserialize)]
struct FeedPayload {
    #[serde(default)]
    data: FeedData,
}

#[derive(Debug, Default, Deserialize)]
struct FeedData {
    #[serde(default)]
    items: Vec<FeedItem>,
}

#[derive(Debug, Deserialize, serde::Serialize)]
struct FeedItem {
    xid: String,
    time_created: i64,
    time_completed: i64,
    #[serde(default)]
    details: FeedDetails,
}

#[derive(Debug, Default, Deserialize, serde::Serialize)]
struct FeedDetails {
    #[serde(default)]
    steps: u32,
    #[serde(default)]
    distance: f64,
    /// Awake time in seconds
    #[serde(default)]
    awake: f64,
    /// Vendor-reported duration in seconds; intervals are authoritative
    #[serde(default)]
    duration: f64,
}
