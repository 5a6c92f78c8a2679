//! Engine operations
//!
//! The external interface of the engine, abstracted from any transport
//! layer: start an experiment, record a daily check-in (which runs the full
//! stage-transition and, on completion, result pipeline), read the current
//! stage view, cancel, and list.
//!
//! Every mutating operation takes `now` explicitly, so the whole pipeline is
//! a deterministic function of stored data. Mutations to the experiment
//! record are only persisted after the entire transition computation
//! succeeds.

use crate::error::EngineError;
use crate::stage::{StageDecision, StageEngine};
use crate::store::DataStore;
use crate::strategy::{InputMode, SubjectData};
use crate::types::{
    ActivityEvent, ActivityKind, CheckinRecord, EfficacyScores, ExperimentRecord,
    ExperimentSummary, ExperimentType, StageResult,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One submitted daily check-in
#[derive(Debug, Clone, Deserialize)]
pub struct CheckinInput {
    pub followed_instructions: i32,
    pub happiness: f64,
    pub stress: f64,
    pub productivity: f64,
    pub leisure_minutes: f64,
    #[serde(default)]
    pub app_version: String,
}

/// Read-only view of the current stage
#[derive(Debug, Clone, Serialize)]
pub struct StageView {
    pub stage_inputs: Vec<Option<f64>>,
    pub stage_outputs: Vec<Option<f64>>,
    pub target: Option<f64>,
    pub current_stage: usize,
}

/// Post-transition view returned by [`ExperimentService::record_checkin`]
#[derive(Debug, Clone, Serialize)]
pub struct CheckinOutcome {
    /// 1-based day of the experiment the check-in arrived on
    pub day: i64,
    pub stage_inputs: Vec<Option<f64>>,
    pub stage_outputs: Vec<Option<f64>>,
    /// Daily target for the day the next check-in will answer for
    pub target: Option<f64>,
    pub current_stage: usize,
    pub restarted_stage: bool,
    pub advanced_stage: bool,
    pub ended_early: bool,
    pub is_complete: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_value: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_confidence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage_results: Option<Vec<StageResult>>,
}

/// Engine front door over a [`DataStore`].
pub struct ExperimentService<S: DataStore> {
    store: S,
}

impl<S: DataStore> ExperimentService<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Register a subject and the UTC offset of their local day boundary.
    pub fn register_subject(
        &self,
        key: &str,
        utc_offset_minutes: i32,
    ) -> Result<crate::types::SubjectProfile, EngineError> {
        if utc_offset_minutes.abs() >= 24 * 60 {
            return Err(EngineError::Validation(format!(
                "utc offset out of range: {utc_offset_minutes}"
            )));
        }
        let profile = crate::types::SubjectProfile::new(key, utc_offset_minutes);
        self.store.put_subject(profile.clone())?;
        Ok(profile)
    }

    /// Start an experiment: validates the type tag and opens the baseline
    /// stage with a `[today, today + 7)` window.
    pub fn create_experiment(
        &self,
        subject: &str,
        type_tag: &str,
        efficacy: EfficacyScores,
        now: DateTime<Utc>,
    ) -> Result<ExperimentRecord, EngineError> {
        let experiment_type = ExperimentType::from_tag(type_tag)
            .ok_or_else(|| EngineError::Validation(format!("unknown experiment type {type_tag}")))?;
        let profile = self.store.subject(subject)?;

        let mut record = ExperimentRecord::new(
            Uuid::new_v4().to_string(),
            subject,
            experiment_type,
            efficacy,
        );
        record.init(now, profile.tz());
        self.store.put_experiment(record.clone())?;
        Ok(record)
    }

    /// Record a check-in and run the stage-transition pipeline.
    ///
    /// The check-in answers the previous day's questions. Evaluation order:
    /// append the check-in, apply the end-of-stage rules (which may restart
    /// the stage), advance if the stage ended, and on advancing past the
    /// last stage compute the final results. The returned view reflects the
    /// post-transition stage.
    pub fn record_checkin(
        &self,
        experiment_key: &str,
        input: CheckinInput,
        now: DateTime<Utc>,
    ) -> Result<CheckinOutcome, EngineError> {
        for (name, value) in [
            ("happiness", input.happiness),
            ("stress", input.stress),
            ("productivity", input.productivity),
            ("leisure_minutes", input.leisure_minutes),
        ] {
            if !value.is_finite() {
                return Err(EngineError::Validation(format!("{name} is not finite")));
            }
        }

        let mut record = self.store.experiment(experiment_key)?;
        if !record.is_active {
            return Err(EngineError::InvalidState(format!(
                "experiment {experiment_key} is not active"
            )));
        }
        let profile = self.store.subject(&record.subject)?;

        self.store.append_checkin(CheckinRecord {
            experiment: experiment_key.to_string(),
            checkin_time: now,
            followed_instructions: input.followed_instructions,
            happiness: input.happiness,
            stress: input.stress,
            productivity: input.productivity,
            leisure_minutes: input.leisure_minutes,
            app_version: input.app_version,
        })?;

        let day = (now.date_naive() - record.start_time.date_naive()).num_days() + 1;

        let checkins = self.store.checkins_for(experiment_key)?;
        let events = self.load_events(&record, now)?;
        let data = SubjectData {
            checkins: &checkins,
            events: &events,
            tz: profile.tz(),
        };

        let decision = {
            let mut engine = StageEngine::new(&mut record, data, now);
            let decision = engine.evaluate()?;
            if decision.should_end() {
                engine.advance_stage()?;
            }
            decision
        };

        if !record.is_active {
            let mut engine = StageEngine::new(&mut record, data, now);
            engine.finalize_results()?;
        }

        let view = build_view(&mut record, data, now);
        let is_complete = !record.is_active;

        self.store.put_experiment(record.clone())?;

        Ok(CheckinOutcome {
            day,
            stage_inputs: view.stage_inputs,
            stage_outputs: view.stage_outputs,
            target: view.target,
            current_stage: view.current_stage,
            restarted_stage: decision == StageDecision::Restart,
            advanced_stage: decision.should_end(),
            ended_early: decision == StageDecision::EndEarly,
            is_complete,
            result_value: is_complete.then_some(record.result_value),
            result_confidence: is_complete.then_some(record.result_confidence),
            stage_results: is_complete.then(|| record.stage_results.clone()),
        })
    }

    /// Current stage view without running any transition.
    pub fn stage_snapshot(
        &self,
        experiment_key: &str,
        now: DateTime<Utc>,
    ) -> Result<StageView, EngineError> {
        let mut record = self.store.experiment(experiment_key)?;
        let profile = self.store.subject(&record.subject)?;
        let checkins = self.store.checkins_for(experiment_key)?;
        let events = self.load_events(&record, now)?;
        let data = SubjectData {
            checkins: &checkins,
            events: &events,
            tz: profile.tz(),
        };
        Ok(build_view(&mut record, data, now))
    }

    /// Cancel an active experiment. Terminal: freezes all staging state.
    pub fn cancel(
        &self,
        experiment_key: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<ExperimentRecord, EngineError> {
        let mut record = self.store.experiment(experiment_key)?;
        if !record.is_active {
            return Err(EngineError::InvalidState(format!(
                "experiment {experiment_key} is not active"
            )));
        }
        record.is_active = false;
        record.is_cancelled = true;
        record.end_time = Some(now);
        record.cancel_reason = reason.to_string();
        self.store.put_experiment(record.clone())?;
        Ok(record)
    }

    /// Summaries of a subject's experiments, most recent first.
    pub fn list_experiments(
        &self,
        subject: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<ExperimentSummary>, EngineError> {
        let mut records = self.store.experiments_for_subject(subject)?;
        records.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        Ok(records.iter().map(|r| r.summary(now)).collect())
    }

    /// All sleep and move events that could touch the experiment's day
    /// windows. The margin covers the shifted sleep windows on both edges.
    fn load_events(
        &self,
        record: &ExperimentRecord,
        now: DateTime<Utc>,
    ) -> Result<Vec<ActivityEvent>, EngineError> {
        let from = record.start_time - Duration::days(2);
        let to = now + Duration::days(2);
        let mut events = self
            .store
            .events_in_range(&record.subject, ActivityKind::Sleep, from, to)?;
        events.extend(
            self.store
                .events_in_range(&record.subject, ActivityKind::Move, from, to)?,
        );
        Ok(events)
    }
}

/// Assemble the subject-facing stage view: raw-mode series for the current
/// stage and the daily target for the day the next check-in answers for.
fn build_view(record: &mut ExperimentRecord, data: SubjectData, now: DateTime<Utc>) -> StageView {
    let current_stage = record.current_stage;
    let (stage_inputs, stage_outputs) = {
        let engine = StageEngine::new(record, data, now);
        (
            engine.stage_inputs(current_stage, InputMode::Raw),
            engine.stage_outputs(current_stage),
        )
    };
    let target = record.daily_target(current_stage, stage_inputs.len() as i64 - 1);
    StageView {
        stage_inputs,
        stage_outputs,
        target,
        current_stage,
    }
}
