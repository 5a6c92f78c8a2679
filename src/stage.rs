//! Stage lifecycle engine
//!
//! Owns the per-experiment stage state machine: day-validity bookkeeping, the
//! end-of-stage/restart decision evaluated on every check-in, adaptive target
//! assignment at the baseline → stage-1 transition, and final best-stage
//! selection with a confidence score derived from distributional overlap.
//!
//! All computation is synchronous over a snapshot of one experiment record
//! plus its owned check-ins and the subject's activity events; the caller
//! serializes mutations per record.

use crate::aggregate::DateRange;
use crate::error::EngineError;
use crate::strategy::{mean, Band, InputMode, SubjectData};
use crate::types::{ExperimentRecord, StageResult, STAGE_LENGTH_DAYS, TARGET_STAGES};
use chrono::{DateTime, NaiveDate, Utc};

/// Outcome of evaluating the end-of-stage rules on a check-in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageDecision {
    /// Keep collecting days
    Continue,
    /// The stage was restarted: counter bumped, window reset to today
    Restart,
    /// Enough valid days and a stable outcome; the stage ends before day 7
    EndEarly,
    /// Day 7 reached; the stage ends on time
    EndOnTime,
}

impl StageDecision {
    pub fn should_end(&self) -> bool {
        matches!(self, StageDecision::EndEarly | StageDecision::EndOnTime)
    }
}

/// Stage state machine for one experiment instance.
///
/// Borrows the record mutably for the duration of one transition; `now` is
/// threaded explicitly so the whole computation is deterministic.
pub struct StageEngine<'a> {
    record: &'a mut ExperimentRecord,
    data: SubjectData<'a>,
    now: DateTime<Utc>,
}

impl<'a> StageEngine<'a> {
    pub fn new(record: &'a mut ExperimentRecord, data: SubjectData<'a>, now: DateTime<Utc>) -> Self {
        Self { record, data, now }
    }

    fn today(&self) -> NaiveDate {
        self.now.with_timezone(&self.data.tz).date_naive()
    }

    /// Day-by-day inputs for a stage, clipped to today. Empty if the stage
    /// has no recorded window (or the experiment is complete).
    pub fn stage_inputs(&self, stage: usize, mode: InputMode) -> Vec<Option<f64>> {
        match self.record.clipped_window(stage, self.today(), self.data.tz) {
            Some(w) => self.record.experiment_type.inputs(
                &self.data,
                DateRange::new(w.start, w.end),
                mode,
                self.record.initial_stage_average,
            ),
            None => Vec::new(),
        }
    }

    /// Day-by-day outputs for a stage, clipped to today.
    pub fn stage_outputs(&self, stage: usize) -> Vec<Option<f64>> {
        match self.record.clipped_window(stage, self.today(), self.data.tz) {
            Some(w) => self
                .record
                .experiment_type
                .outputs(&self.data, DateRange::new(w.start, w.end)),
            None => Vec::new(),
        }
    }

    /// (input, output) pairs for the stage's valid days: both present, and
    /// within the stage target band when a target is assigned.
    fn valid_pairs(&self, stage: usize) -> Vec<(f64, f64)> {
        let inputs = self.stage_inputs(stage, InputMode::Adjusted);
        let outputs = self.stage_outputs(stage);
        let target = self.record.stage_target(stage);
        let width = self.record.experiment_type.band_width();

        inputs
            .into_iter()
            .zip(outputs)
            .filter_map(|(input, output)| match (input, output) {
                (Some(i), Some(o)) => match target {
                    Some(t) if i < t - width || i > t + width => None,
                    _ => Some((i, o)),
                },
                _ => None,
            })
            .collect()
    }

    /// Days in the current stage with input or output absent. A day that
    /// merely misses the target band is not a missed day.
    fn missed_days(&self) -> usize {
        let stage = self.record.current_stage;
        let inputs = self.stage_inputs(stage, InputMode::Adjusted);
        let outputs = self.stage_outputs(stage);
        inputs
            .iter()
            .zip(&outputs)
            .filter(|(i, o)| i.is_none() || o.is_none())
            .count()
    }

    /// Whether the last five non-absent outputs span no more than the type's
    /// stability tolerance. The baseline stage is never considered stable.
    fn output_stable(&self) -> bool {
        if self.record.current_stage == 0 {
            return false;
        }
        let outputs = self.stage_outputs(self.record.current_stage);
        let present: Vec<f64> = outputs.into_iter().flatten().collect();
        let recent = &present[present.len().saturating_sub(5)..];
        if recent.is_empty() {
            return false;
        }
        let max = recent.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let min = recent.iter().cloned().fold(f64::INFINITY, f64::min);
        max - min <= self.record.experiment_type.stable_range()
    }

    /// Apply the end-of-stage rules for the current stage.
    ///
    /// Rule order (evaluated on every check-in):
    /// 1. too many missed days (>=2 targeted, >2 baseline) -> restart
    /// 2. >=5 valid days with stable outputs -> end early (targeted only)
    /// 3. from day 4, fewer than 4 achievable valid days -> restart
    /// 4. day 7 -> end on time
    /// 5. otherwise continue
    ///
    /// A restart is applied to the record here; ending a stage is the
    /// caller's move via [`StageEngine::advance_stage`].
    pub fn evaluate(&mut self) -> Result<StageDecision, EngineError> {
        let stage = self.record.current_stage;
        let window = self.record.stage_window(stage).ok_or_else(|| {
            EngineError::DataIntegrity(format!("stage {stage} has no recorded date window"))
        })?;

        let today = self.today();
        let stage_day = (today - window.start).num_days();
        let missed = self.missed_days();
        let valid = self.valid_pairs(stage).len() as i64;

        if (stage > 0 && missed >= 2) || (stage == 0 && missed > 2) {
            self.record.restart_current_stage(today);
            return Ok(StageDecision::Restart);
        }

        if stage > 0 {
            if valid >= 5 && self.output_stable() {
                return Ok(StageDecision::EndEarly);
            }

            if stage_day >= 4 {
                let days_left = STAGE_LENGTH_DAYS - stage_day;
                if valid + days_left < 4 {
                    self.record.restart_current_stage(today);
                    return Ok(StageDecision::Restart);
                }
            }
        }

        if stage_day == STAGE_LENGTH_DAYS {
            return Ok(StageDecision::EndOnTime);
        }

        Ok(StageDecision::Continue)
    }

    /// Move to the next stage. Leaving the baseline assigns the adaptive
    /// target sequence from the baseline inputs; leaving the last targeted
    /// stage closes the experiment (`is_active` false, `end_time` stamped).
    pub fn advance_stage(&mut self) -> Result<(), EngineError> {
        if self.record.current_stage == 0 {
            let baseline_inputs = self.stage_inputs(0, InputMode::Raw);
            set_stage_targets(self.record, &baseline_inputs)?;
        }

        self.record.current_stage += 1;

        if self.record.current_stage > TARGET_STAGES {
            self.record.is_active = false;
            self.record.end_time = Some(self.now);
        } else {
            let today = self.today();
            let stage = self.record.current_stage;
            self.record
                .set_stage_window(stage, today, today + chrono::Duration::days(STAGE_LENGTH_DAYS));
        }
        Ok(())
    }

    /// Compute the final result once the experiment is complete: pick the
    /// best targeted stage by mean output and score how distinct its outcome
    /// distribution is from every other stage's.
    pub fn finalize_results(&mut self) -> Result<(), EngineError> {
        let minimize = self.record.experiment_type.minimizes_result();

        let mut results: Vec<StageResult> = Vec::new();
        let mut best_stage = 0usize;
        let mut best_output = if minimize {
            f64::INFINITY
        } else {
            f64::NEG_INFINITY
        };

        for stage in 1..=TARGET_STAGES {
            let target = self.record.stage_target(stage).ok_or_else(|| {
                EngineError::DataIntegrity(format!("stage {stage} has no assigned target"))
            })?;
            let pairs = self.valid_pairs(stage);
            if pairs.is_empty() {
                return Err(EngineError::DataIntegrity(format!(
                    "stage {stage} has no valid days to analyze"
                )));
            }

            let (inputs, outputs): (Vec<f64>, Vec<f64>) = pairs.into_iter().unzip();
            let mean_output = mean(&outputs);
            let min_output = outputs.iter().cloned().fold(f64::INFINITY, f64::min);
            let max_output = outputs.iter().cloned().fold(f64::NEG_INFINITY, f64::max);

            if (!minimize && mean_output > best_output) || (minimize && mean_output < best_output) {
                best_output = mean_output;
                best_stage = stage;
            }

            results.push(StageResult {
                stage,
                target,
                mean_output,
                min_output,
                max_output,
                inputs,
                outputs,
            });
        }

        // Confidence: the fraction of each losing stage's outputs on the
        // wrong side of the winner's extreme, folded to the worst case
        // across stages, inverted and rounded to two decimals.
        let best = &results[best_stage - 1];
        let (best_target, best_min, best_max) = (best.target, best.min_output, best.max_output);

        let mut max_overlap = if minimize {
            f64::INFINITY
        } else {
            f64::NEG_INFINITY
        };
        for result in &results {
            if result.stage == best_stage {
                continue;
            }
            let count = if minimize {
                result.outputs.iter().filter(|v| **v <= best_max).count()
            } else {
                result.outputs.iter().filter(|v| **v >= best_min).count()
            };
            let overlap = count as f64 / result.outputs.len() as f64;
            max_overlap = if minimize {
                max_overlap.min(overlap)
            } else {
                max_overlap.max(overlap)
            };
        }

        let confidence = ((1.0 - max_overlap) * 100.0).round() / 100.0;

        self.record.result_value = best_target;
        self.record.result_confidence = confidence.min(0.9);
        self.record.stage_results = results;
        Ok(())
    }
}

/// Assign the adaptive 4-stage target sequence from the baseline inputs.
///
/// Classifies the baseline measurement (average, or max-min spread for
/// variability types) against the widened band thresholds and resolves a
/// fixed band sequence to concrete numeric targets. Freezes the baseline
/// average on the record. Pure in its inputs: identical baselines always
/// produce identical targets.
pub fn set_stage_targets(
    record: &mut ExperimentRecord,
    baseline_inputs: &[Option<f64>],
) -> Result<(), EngineError> {
    let values: Vec<f64> = baseline_inputs.iter().flatten().copied().collect();
    if values.is_empty() {
        return Err(EngineError::DataIntegrity(
            "baseline stage produced no input values".to_string(),
        ));
    }

    let experiment_type = record.experiment_type;
    let bands = experiment_type.bands();
    let width = experiment_type.band_width();

    let average = experiment_type.input_average(&values);
    let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let min = values.iter().cloned().fold(f64::INFINITY, f64::min);
    let variability = max - min;

    let target_value = if experiment_type.uses_variability() {
        variability
    } else {
        average
    };

    let sequence: [Band; 4] = if target_value <= bands.under {
        [Band::Under, Band::N1, Band::N3, Band::N2]
    } else if target_value <= bands.n1 + width {
        [Band::N1, Band::N3, Band::N1, Band::N2]
    } else if target_value <= bands.n2 + width {
        [Band::N2, Band::N3, Band::N1, Band::N2]
    } else if target_value <= bands.n3 + width {
        [Band::N3, Band::N1, Band::N3, Band::N2]
    } else {
        [Band::Over, Band::N3, Band::N1, Band::N2]
    };

    record.stage_target_values = sequence.map(|band| Some(bands.value(band)));
    record.initial_stage_average = Some(average);
    Ok(())
}
