//! Experiment-type strategies
//!
//! Each supported experiment type declares how the day-by-day input sequence
//! (the controllable behavior) and output sequence (the reported outcome) are
//! derived for a date range, plus its policy constants: target bands, band
//! width, stability tolerance, and whether it analyzes variability and
//! minimizes the outcome.
//!
//! The type set is fixed, so dispatch is a match table on the
//! [`ExperimentType`] tag; there is no runtime registry.

use crate::aggregate::{local_midnight_utc, DateRange, DayAggregator};
use crate::types::{ActivityEvent, ActivityKind, CheckinRecord, ExperimentType};
use chrono::{Duration, FixedOffset};

/// Day offset (hours) applied to sleep-derived series, so a night that
/// starts the previous evening counts toward the day it begins.
pub const SLEEP_DAY_OFFSET_HOURS: i64 = -5;

const MINUTES_PER_DAY: f64 = 24.0 * 60.0;

/// Named band thresholds used to classify a baseline measurement and to
/// define per-stage targets.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct TargetBands {
    pub under: f64,
    pub n1: f64,
    pub n2: f64,
    pub n3: f64,
    pub over: f64,
}

/// One of the five named bands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Band {
    Under,
    N1,
    N2,
    N3,
    Over,
}

impl TargetBands {
    pub fn value(&self, band: Band) -> f64 {
        match band {
            Band::Under => self.under,
            Band::N1 => self.n1,
            Band::N2 => self.n2,
            Band::N3 => self.n3,
            Band::Over => self.over,
        }
    }
}

/// Whether an input series is variability-adjusted.
///
/// `Raw` is used for the subject-facing view and for baseline target
/// assignment; `Adjusted` applies the deviation-from-average transform for
/// variability types and is what validity checks consume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    Raw,
    Adjusted,
}

/// Snapshot of one subject's data that strategies read from
#[derive(Debug, Clone, Copy)]
pub struct SubjectData<'a> {
    pub checkins: &'a [CheckinRecord],
    pub events: &'a [ActivityEvent],
    pub tz: FixedOffset,
}

impl<'a> SubjectData<'a> {
    fn events_of_kind(&self, kind: ActivityKind) -> Vec<ActivityEvent> {
        self.events
            .iter()
            .filter(|e| e.kind == kind)
            .cloned()
            .collect()
    }
}

/// Mean of the non-absent values; 0 when none are present.
pub(crate) fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

impl ExperimentType {
    pub fn bands(&self) -> TargetBands {
        match self {
            ExperimentType::StepsSleepEfficiency => TargetBands {
                under: 6500.0,
                n1: 8000.0,
                n2: 11000.0,
                n3: 14000.0,
                over: 15500.0,
            },
            ExperimentType::SleepDurationProductivity => TargetBands {
                under: 6.0 * 60.0,
                n1: 6.5 * 60.0,
                n2: 7.5 * 60.0,
                n3: 8.5 * 60.0,
                over: 9.0 * 60.0,
            },
            ExperimentType::SleepVariabilityStress | ExperimentType::LeisureHappiness => {
                TargetBands {
                    under: 15.0,
                    n1: 30.0,
                    n2: 60.0,
                    n3: 90.0,
                    over: 105.0,
                }
            }
        }
    }

    /// Half-width used both for "within target" checks and for widening the
    /// band thresholds during classification.
    pub fn band_width(&self) -> f64 {
        match self {
            ExperimentType::StepsSleepEfficiency => 1500.0,
            ExperimentType::SleepDurationProductivity => 30.0,
            ExperimentType::SleepVariabilityStress | ExperimentType::LeisureHappiness => 15.0,
        }
    }

    /// Maximum spread tolerated among the last five non-absent outputs
    /// before a stage is considered stable.
    pub fn stable_range(&self) -> f64 {
        match self {
            ExperimentType::StepsSleepEfficiency => 0.1,
            _ => 3.0,
        }
    }

    /// Whether the input is a deviation from a personal baseline average
    /// rather than an absolute magnitude.
    pub fn uses_variability(&self) -> bool {
        matches!(self, ExperimentType::SleepVariabilityStress)
    }

    /// Whether the best outcome is the minimum rather than the maximum.
    pub fn minimizes_result(&self) -> bool {
        matches!(self, ExperimentType::SleepVariabilityStress)
    }

    /// Aggregate used for the baseline personal average.
    pub fn input_average(&self, values: &[f64]) -> f64 {
        mean(values)
    }

    /// Day-by-day input values over `[range.start, range.end)`.
    ///
    /// `baseline_average` is the frozen stage-0 average, consulted only by
    /// variability types in `Adjusted` mode; when it is not yet frozen the
    /// series' own mean (mod 24h) anchors the deviations.
    pub fn inputs(
        &self,
        data: &SubjectData,
        range: DateRange,
        mode: InputMode,
        baseline_average: Option<f64>,
    ) -> Vec<Option<f64>> {
        match self {
            ExperimentType::StepsSleepEfficiency => {
                let moves = data.events_of_kind(ActivityKind::Move);
                DayAggregator::new(data.tz, 0)
                    .daily_scalar(&moves, range, |e| e.steps as f64)
                    .into_iter()
                    .map(Some)
                    .collect()
            }
            ExperimentType::SleepDurationProductivity => {
                let sleeps = data.events_of_kind(ActivityKind::Sleep);
                DayAggregator::new(data.tz, SLEEP_DAY_OFFSET_HOURS)
                    .overlap_minutes(&sleeps, range)
                    .into_iter()
                    .map(Some)
                    .collect()
            }
            ExperimentType::SleepVariabilityStress => {
                let starts = sleep_start_minutes(data, range);
                match mode {
                    InputMode::Raw => starts,
                    InputMode::Adjusted => {
                        let average = baseline_average.unwrap_or_else(|| {
                            let present: Vec<f64> = starts.iter().flatten().copied().collect();
                            mean(&present).rem_euclid(MINUTES_PER_DAY)
                        });
                        // Deviations are expected positive on the first day
                        // and negative on the second; flipping odd days here
                        // lets everything downstream treat the series as
                        // magnitudes.
                        starts
                            .iter()
                            .enumerate()
                            .map(|(i, v)| {
                                v.map(|start| {
                                    let sign = if i % 2 == 0 { 1.0 } else { -1.0 };
                                    (start - average) * sign
                                })
                            })
                            .collect()
                    }
                }
            }
            ExperimentType::LeisureHappiness => {
                checkin_series(data, range, |c| c.leisure_minutes)
            }
        }
    }

    /// Day-by-day output values over `[range.start, range.end)`.
    pub fn outputs(&self, data: &SubjectData, range: DateRange) -> Vec<Option<f64>> {
        match self {
            ExperimentType::StepsSleepEfficiency => {
                let sleeps = data.events_of_kind(ActivityKind::Sleep);
                DayAggregator::new(data.tz, SLEEP_DAY_OFFSET_HOURS)
                    .efficiency_ratios(&sleeps, range)
            }
            ExperimentType::SleepDurationProductivity => {
                checkin_series(data, range, |c| c.productivity)
            }
            ExperimentType::SleepVariabilityStress => checkin_series(data, range, |c| c.stress),
            ExperimentType::LeisureHappiness => checkin_series(data, range, |c| c.happiness),
        }
    }
}

/// Self-reported value per day: for day `d`, the first check-in (ascending by
/// time) whose subject-local date is `d + 1`, since a check-in answers the
/// previous day's questions. Absent if no check-in matches.
fn checkin_series<F>(data: &SubjectData, range: DateRange, value: F) -> Vec<Option<f64>>
where
    F: Fn(&CheckinRecord) -> f64,
{
    let mut ordered: Vec<&CheckinRecord> = data.checkins.iter().collect();
    ordered.sort_by_key(|c| c.checkin_time);

    range
        .days()
        .map(|day| {
            let report_date = day + Duration::days(1);
            ordered
                .iter()
                .find(|c| c.checkin_time.with_timezone(&data.tz).date_naive() == report_date)
                .map(|c| value(c))
        })
        .collect()
}

/// Nightly sleep-start offset per day: minutes from the subject-local
/// midnight of `day - 1` to the first sleep start attributed to `day` (with
/// the -5h window shift). A 9pm bedtime the evening before reads as 1260.
fn sleep_start_minutes(data: &SubjectData, range: DateRange) -> Vec<Option<f64>> {
    let sleeps = data.events_of_kind(ActivityKind::Sleep);
    let starts =
        DayAggregator::new(data.tz, SLEEP_DAY_OFFSET_HOURS).first_starts(&sleeps, range);

    range
        .days()
        .zip(starts)
        .map(|(day, start)| {
            start.map(|instant| {
                let anchor = local_midnight_utc(day - Duration::days(1), data.tz);
                ((instant - anchor).num_seconds() as f64 / 60.0).round()
            })
        })
        .collect()
}
