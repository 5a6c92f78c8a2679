//! Core types for the experiment engine
//!
//! This module defines the persisted data model: raw activity events imported
//! from a wearable feed, daily self-report check-ins, and the experiment
//! record whose staging state the engine reads and mutates.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Number of targeted stages in every experiment (stage 0 is the baseline).
pub const TARGET_STAGES: usize = 3;

/// Number of per-stage slots in the persisted arrays (baseline + targets).
pub const STAGE_SLOTS: usize = TARGET_STAGES + 1;

/// Length of every stage window in days.
pub const STAGE_LENGTH_DAYS: i64 = 7;

/// Activity type of an imported wearable event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityKind {
    Sleep,
    Move,
    Workout,
}

impl ActivityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityKind::Sleep => "sleep",
            ActivityKind::Move => "move",
            ActivityKind::Workout => "workout",
        }
    }
}

/// One interval-valued observation imported from the wearable feed.
///
/// Events are owned by a subject and immutable once stored, except for
/// attribute refresh when the same source record is re-imported (upsert keyed
/// by subject + kind + source id). The engine never deletes them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityEvent {
    /// Feed-assigned identifier, unique per subject + kind
    pub source_id: String,
    /// Owning subject key
    pub subject: String,
    /// Activity type
    pub kind: ActivityKind,
    /// Interval start (UTC)
    pub start_time: DateTime<Utc>,
    /// Interval end (UTC)
    pub end_time: DateTime<Utc>,
    /// Step count (move events)
    #[serde(default)]
    pub steps: u32,
    /// Distance covered (meters)
    #[serde(default)]
    pub distance_meters: f64,
    /// Time awake during the interval (sleep events, minutes)
    #[serde(default)]
    pub awake_minutes: f64,
    /// Raw feed payload preserved for transparency
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<serde_json::Value>,
}

impl ActivityEvent {
    pub fn new(
        subject: impl Into<String>,
        kind: ActivityKind,
        source_id: impl Into<String>,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            subject: subject.into(),
            kind,
            start_time,
            end_time,
            steps: 0,
            distance_meters: 0.0,
            awake_minutes: 0.0,
            raw: None,
        }
    }

    pub fn with_steps(mut self, steps: u32) -> Self {
        self.steps = steps;
        self
    }

    pub fn with_awake_minutes(mut self, awake_minutes: f64) -> Self {
        self.awake_minutes = awake_minutes;
        self
    }

    pub fn with_raw(mut self, raw: serde_json::Value) -> Self {
        self.raw = Some(raw);
        self
    }
}

/// One daily self-report for an experiment.
///
/// Append-only; one is expected per day but the engine tolerates
/// zero-or-more and keeps the first match per day. A check-in answers
/// questions about the previous day.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckinRecord {
    /// Owning experiment key
    pub experiment: String,
    /// When the check-in was submitted (UTC)
    pub checkin_time: DateTime<Utc>,
    /// Self-assessed instruction adherence
    pub followed_instructions: i32,
    pub happiness: f64,
    pub stress: f64,
    pub productivity: f64,
    /// Leisure time spent yesterday (minutes)
    pub leisure_minutes: f64,
    #[serde(default)]
    pub app_version: String,
}

/// Registered subject with the local day boundary used for all calendar math
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubjectProfile {
    pub key: String,
    /// Registered UTC offset in minutes (e.g. -300 for UTC-5)
    pub utc_offset_minutes: i32,
}

impl SubjectProfile {
    pub fn new(key: impl Into<String>, utc_offset_minutes: i32) -> Self {
        Self {
            key: key.into(),
            utc_offset_minutes,
        }
    }

    /// Fixed offset of the subject's registered time zone.
    ///
    /// Falls back to UTC if the stored offset is out of chrono's valid range;
    /// `ExperimentService::register_subject` rejects such offsets up front.
    pub fn tz(&self) -> chrono::FixedOffset {
        use chrono::Offset;
        chrono::FixedOffset::east_opt(self.utc_offset_minutes * 60).unwrap_or_else(|| Utc.fix())
    }
}

/// Supported experiment types.
///
/// The set is closed and small, so dispatch is a tagged enum resolved at
/// compile time rather than a runtime registry. Wire tags are the legacy
/// values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExperimentType {
    #[serde(rename = "stepssleepefficiency")]
    StepsSleepEfficiency,
    #[serde(rename = "sleepdurationproductivity")]
    SleepDurationProductivity,
    #[serde(rename = "sleepvariabilitystress")]
    SleepVariabilityStress,
    #[serde(rename = "leisurehappiness")]
    LeisureHappiness,
}

impl ExperimentType {
    pub const ALL: [ExperimentType; 4] = [
        ExperimentType::StepsSleepEfficiency,
        ExperimentType::SleepDurationProductivity,
        ExperimentType::SleepVariabilityStress,
        ExperimentType::LeisureHappiness,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ExperimentType::StepsSleepEfficiency => "stepssleepefficiency",
            ExperimentType::SleepDurationProductivity => "sleepdurationproductivity",
            ExperimentType::SleepVariabilityStress => "sleepvariabilitystress",
            ExperimentType::LeisureHappiness => "leisurehappiness",
        }
    }

    pub fn from_tag(tag: &str) -> Option<ExperimentType> {
        ExperimentType::ALL.into_iter().find(|t| t.as_str() == tag)
    }
}

/// Half-open `[start, end)` date window of one stage attempt.
///
/// Persisted as a 2-element `["YYYY-MM-DD", "YYYY-MM-DD"]` array (legacy
/// shape).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "(NaiveDate, NaiveDate)", into = "(NaiveDate, NaiveDate)")]
pub struct StageWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl From<(NaiveDate, NaiveDate)> for StageWindow {
    fn from((start, end): (NaiveDate, NaiveDate)) -> Self {
        Self { start, end }
    }
}

impl From<StageWindow> for (NaiveDate, NaiveDate) {
    fn from(w: StageWindow) -> Self {
        (w.start, w.end)
    }
}

/// Efficacy self-ratings captured when an experiment starts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EfficacyScores {
    pub self_efficacy: i32,
    pub app_efficacy: i32,
    pub experiment_efficacy: i32,
}

/// Summary of one targeted stage, produced by result calculation.
///
/// Field names follow the legacy storage shape: `input` is the stage target,
/// `output` the mean outcome, `values` the raw per-day outputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageResult {
    pub stage: usize,
    #[serde(rename = "input")]
    pub target: f64,
    #[serde(rename = "output")]
    pub mean_output: f64,
    #[serde(rename = "min")]
    pub min_output: f64,
    #[serde(rename = "max")]
    pub max_output: f64,
    pub inputs: Vec<f64>,
    #[serde(rename = "values")]
    pub outputs: Vec<f64>,
}

/// The experiment aggregate: identity, lifecycle flags, staging state, and
/// final results.
///
/// All list-valued per-stage fields are fixed-length arrays indexed by stage
/// number, serialized as 4-element JSON arrays with `null` for absent entries
/// (legacy compatibility shape). `current_stage` runs 0 (baseline) through
/// `TARGET_STAGES`, then one past it once the experiment completes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentRecord {
    pub key: String,
    pub subject: String,
    pub experiment_type: ExperimentType,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub is_cancelled: bool,
    #[serde(default)]
    pub cancel_reason: String,

    /// Baseline personal average (or variability anchor), frozen at the
    /// stage-0 → 1 transition
    pub initial_stage_average: Option<f64>,

    /// Winning stage's target, set by result calculation
    #[serde(default)]
    pub result_value: f64,
    /// Confidence in the winning stage, in [0, 0.9]
    #[serde(default)]
    pub result_confidence: f64,
    /// Per-stage summaries for stages 1.., empty until completion
    #[serde(default)]
    pub stage_results: Vec<StageResult>,

    pub stage_dates: [Option<StageWindow>; STAGE_SLOTS],
    pub stage_target_values: [Option<f64>; STAGE_SLOTS],
    pub stage_restart_count: [u32; STAGE_SLOTS],
    pub current_stage: usize,

    pub efficacy: EfficacyScores,
}

impl ExperimentRecord {
    pub fn new(
        key: impl Into<String>,
        subject: impl Into<String>,
        experiment_type: ExperimentType,
        efficacy: EfficacyScores,
    ) -> Self {
        Self {
            key: key.into(),
            subject: subject.into(),
            experiment_type,
            start_time: DateTime::<Utc>::MIN_UTC,
            end_time: None,
            is_active: false,
            is_cancelled: false,
            cancel_reason: String::new(),
            initial_stage_average: None,
            result_value: 0.0,
            result_confidence: 0.0,
            stage_results: Vec::new(),
            stage_dates: [None; STAGE_SLOTS],
            stage_target_values: [None; STAGE_SLOTS],
            stage_restart_count: [0; STAGE_SLOTS],
            current_stage: 0,
            efficacy,
        }
    }

    /// Open the experiment: stamp the start instant and set the baseline
    /// window to `[today, today + 7)` in the subject's local calendar.
    pub fn init(&mut self, now: DateTime<Utc>, tz: chrono::FixedOffset) {
        let start = now.with_timezone(&tz).date_naive();
        self.set_stage_window(0, start, start + Duration::days(STAGE_LENGTH_DAYS));
        self.start_time = now;
        self.is_active = true;
    }

    pub fn set_stage_window(&mut self, stage: usize, start: NaiveDate, end: NaiveDate) {
        if stage < STAGE_SLOTS {
            self.stage_dates[stage] = Some(StageWindow { start, end });
        }
    }

    /// The stage's date window as recorded, without clipping.
    pub fn stage_window(&self, stage: usize) -> Option<StageWindow> {
        self.stage_dates.get(stage).copied().flatten()
    }

    /// The stage's date window clipped to `today`.
    ///
    /// For the terminal stage index (one past the last target stage) this is
    /// the empty window at the end date, so series queries over a completed
    /// experiment yield no days.
    pub fn clipped_window(
        &self,
        stage: usize,
        today: NaiveDate,
        tz: chrono::FixedOffset,
    ) -> Option<StageWindow> {
        if stage >= STAGE_SLOTS {
            let end = self.end_time?.with_timezone(&tz).date_naive();
            return Some(StageWindow { start: end, end });
        }
        self.stage_window(stage).map(|w| StageWindow {
            start: w.start,
            end: w.end.min(today),
        })
    }

    /// The numeric target assigned to a stage, if any.
    pub fn stage_target(&self, stage: usize) -> Option<f64> {
        self.stage_target_values.get(stage).copied().flatten()
    }

    /// The target shown to the subject on a given day of a stage.
    ///
    /// Equal to the stage target, except for variability types where the
    /// displayed value oscillates around the frozen baseline average:
    /// `average + target` on odd days-in-stage, `average - target` on even
    /// days. Reconstructs a concrete alternating bed-time target from the
    /// magnitude-only stored value.
    pub fn daily_target(&self, stage: usize, day_in_stage: i64) -> Option<f64> {
        let stage_target = self.stage_target(stage);
        if !self.experiment_type.uses_variability() {
            return stage_target;
        }
        let (target, base) = match (stage_target, self.initial_stage_average) {
            (Some(t), Some(b)) => (t, b),
            _ => return stage_target,
        };
        if day_in_stage % 2 != 0 {
            Some(base + target)
        } else {
            Some(base - target)
        }
    }

    /// Restart the current stage: bump its restart counter and reset its
    /// window to `[today, today + 7)`. The stage number itself never changes.
    pub fn restart_current_stage(&mut self, today: NaiveDate) {
        if let Some(count) = self.stage_restart_count.get_mut(self.current_stage) {
            *count += 1;
        }
        self.set_stage_window(
            self.current_stage,
            today,
            today + Duration::days(STAGE_LENGTH_DAYS),
        );
    }

    /// Whole days covered by the experiment so far (inclusive of day one).
    pub fn days_elapsed(&self, now: DateTime<Utc>) -> i64 {
        let end = self.end_time.unwrap_or(now);
        (end.date_naive() - self.start_time.date_naive()).num_days() + 1
    }

    pub fn summary(&self, now: DateTime<Utc>) -> ExperimentSummary {
        ExperimentSummary {
            key: self.key.clone(),
            days: self.days_elapsed(now),
            result_value: self.result_value,
            result_confidence: self.result_confidence,
            experiment_type: self.experiment_type,
            start_time: self.start_time,
            end_time: self.end_time,
            is_cancelled: self.is_cancelled,
            is_active: self.is_active,
        }
    }
}

/// Listing view of one experiment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentSummary {
    pub key: String,
    pub days: i64,
    pub result_value: f64,
    pub result_confidence: f64,
    #[serde(rename = "type")]
    pub experiment_type: ExperimentType,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub is_cancelled: bool,
    pub is_active: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn make_record() -> ExperimentRecord {
        ExperimentRecord::new(
            "exp-1",
            "subject-1",
            ExperimentType::LeisureHappiness,
            EfficacyScores {
                self_efficacy: 3,
                app_efficacy: 5,
                experiment_efficacy: 8,
            },
        )
    }

    fn utc(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_init_sets_baseline_window() {
        let mut record = make_record();
        record.init(utc(2012, 1, 14, 9), SubjectProfile::new("subject-1", 0).tz());

        assert!(record.is_active);
        assert_eq!(record.start_time, utc(2012, 1, 14, 9));
        let window = record.stage_window(0).unwrap();
        assert_eq!(window.start, date(2012, 1, 14));
        assert_eq!(window.end, date(2012, 1, 21));
        assert_eq!(record.current_stage, 0);
    }

    #[test]
    fn test_init_uses_subject_local_date() {
        // 01:00 UTC is still the previous day at UTC-5
        let mut record = make_record();
        record.init(utc(2012, 1, 14, 1), SubjectProfile::new("subject-1", -300).tz());

        let window = record.stage_window(0).unwrap();
        assert_eq!(window.start, date(2012, 1, 13));
    }

    #[test]
    fn test_restart_keeps_stage_number() {
        let mut record = make_record();
        record.init(utc(2012, 1, 14, 9), SubjectProfile::new("subject-1", 0).tz());
        record.current_stage = 1;
        record.set_stage_window(1, date(2012, 1, 21), date(2012, 1, 28));

        record.restart_current_stage(date(2012, 1, 25));

        assert_eq!(record.current_stage, 1);
        assert_eq!(record.stage_restart_count, [0, 1, 0, 0]);
        let window = record.stage_window(1).unwrap();
        assert_eq!(window.start, date(2012, 1, 25));
        assert_eq!(window.end, date(2012, 2, 1));
    }

    #[test]
    fn test_clipped_window() {
        let mut record = make_record();
        record.set_stage_window(0, date(2012, 1, 14), date(2012, 1, 21));

        let tz = SubjectProfile::new("subject-1", 0).tz();
        let clipped = record.clipped_window(0, date(2012, 1, 17), tz).unwrap();
        assert_eq!(clipped.start, date(2012, 1, 14));
        assert_eq!(clipped.end, date(2012, 1, 17));

        // beyond the window end the clip is a no-op
        let clipped = record.clipped_window(0, date(2012, 2, 1), tz).unwrap();
        assert_eq!(clipped.end, date(2012, 1, 21));

        // terminal stage index: empty window at the end date
        record.end_time = Some(utc(2012, 2, 8, 9));
        let clipped = record.clipped_window(4, date(2012, 2, 10), tz).unwrap();
        assert_eq!(clipped.start, clipped.end);
        assert_eq!(clipped.start, date(2012, 2, 8));
    }

    #[test]
    fn test_daily_target_plain_type() {
        let mut record = make_record();
        record.stage_target_values = [Some(105.0), Some(90.0), Some(30.0), Some(60.0)];

        assert_eq!(record.daily_target(1, 0), Some(90.0));
        assert_eq!(record.daily_target(1, 3), Some(90.0));
        // one past the last target stage has no target
        assert_eq!(record.daily_target(4, 0), None);
    }

    #[test]
    fn test_daily_target_oscillates_for_variability() {
        let mut record = make_record();
        record.experiment_type = ExperimentType::SleepVariabilityStress;
        record.stage_target_values = [Some(60.0), Some(90.0), Some(30.0), Some(60.0)];
        record.initial_stage_average = Some(1260.0);

        assert_eq!(record.daily_target(1, 0), Some(1170.0));
        assert_eq!(record.daily_target(1, 1), Some(1350.0));
        assert_eq!(record.daily_target(1, 2), Some(1170.0));
        // an empty series queries day -1, which takes the odd branch
        assert_eq!(record.daily_target(1, -1), Some(1350.0));
    }

    #[test]
    fn test_record_wire_shape() {
        let mut record = make_record();
        record.init(utc(2012, 1, 14, 9), SubjectProfile::new("subject-1", 0).tz());

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["experiment_type"], "leisurehappiness");

        // per-stage fields keep the legacy fixed-length-4 array shape
        let dates = json["stage_dates"].as_array().unwrap();
        assert_eq!(dates.len(), 4);
        assert_eq!(
            dates[0],
            serde_json::json!(["2012-01-14", "2012-01-21"])
        );
        assert!(dates[1].is_null());
        assert_eq!(json["stage_target_values"], serde_json::json!([null, null, null, null]));
        assert_eq!(json["stage_restart_count"], serde_json::json!([0, 0, 0, 0]));

        let back: ExperimentRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back.stage_window(0), record.stage_window(0));
        assert_eq!(back.current_stage, 0);
    }

    #[test]
    fn test_stage_result_wire_shape() {
        let result = StageResult {
            stage: 1,
            target: 90.0,
            mean_output: 5.8,
            min_output: 5.0,
            max_output: 7.0,
            inputs: vec![90.0, 90.0],
            outputs: vec![5.0, 7.0],
        };

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["input"], 90.0);
        assert_eq!(json["output"], 5.8);
        assert_eq!(json["min"], 5.0);
        assert_eq!(json["max"], 7.0);
        assert_eq!(json["values"], serde_json::json!([5.0, 7.0]));
    }

    #[test]
    fn test_type_tags_round_trip() {
        for t in ExperimentType::ALL {
            assert_eq!(ExperimentType::from_tag(t.as_str()), Some(t));
        }
        assert_eq!(ExperimentType::from_tag("unknown"), None);
    }

    #[test]
    fn test_days_elapsed() {
        let mut record = make_record();
        record.init(utc(2012, 1, 14, 9), SubjectProfile::new("subject-1", 0).tz());
        assert_eq!(record.days_elapsed(utc(2012, 1, 14, 23)), 1);
        assert_eq!(record.days_elapsed(utc(2012, 1, 16, 9)), 3);

        record.end_time = Some(utc(2012, 1, 20, 9));
        assert_eq!(record.days_elapsed(utc(2012, 3, 1, 0)), 7);
    }
}
