//! Time-windowed day aggregation
//!
//! This module converts a set of irregular, interval-valued activity events
//! into one scalar per calendar day over a half-open date range. The day
//! boundary is subject-local midnight plus an optional time-of-day offset, so
//! a 9pm-to-9pm sleep window can be attributed to the day it starts rather
//! than the calendar day it ends.
//!
//! Absent values propagate as `None` wherever the distinction from zero
//! matters downstream (validity and missed-day checks); series whose legacy
//! semantics default to zero keep that behavior and say so.

use crate::types::ActivityEvent;
use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveTime, TimeZone, Utc};

/// Half-open `[start, end)` range of calendar days
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    pub fn days(&self) -> impl Iterator<Item = NaiveDate> {
        let (start, end) = (self.start, self.end);
        std::iter::successors(Some(start), move |d| Some(*d + Duration::days(1)))
            .take_while(move |d| *d < end)
    }

    pub fn num_days(&self) -> i64 {
        (self.end - self.start).num_days().max(0)
    }
}

/// Instant of subject-local midnight for a calendar day, as UTC.
pub fn local_midnight_utc(day: NaiveDate, tz: FixedOffset) -> DateTime<Utc> {
    let naive = day.and_time(NaiveTime::MIN);
    Utc.from_utc_datetime(&naive) - Duration::seconds(tz.local_minus_utc() as i64)
}

/// Per-day aggregator over interval events.
///
/// `offset` shifts every day window by a fixed amount; sleep-derived series
/// use -5h so that a night starting the previous evening counts toward the
/// day it begins.
#[derive(Debug, Clone, Copy)]
pub struct DayAggregator {
    tz: FixedOffset,
    offset: Duration,
}

impl DayAggregator {
    pub fn new(tz: FixedOffset, offset_hours: i64) -> Self {
        Self {
            tz,
            offset: Duration::hours(offset_hours),
        }
    }

    /// `[start, end)` instants of the shifted window for one day.
    fn day_bounds(&self, day: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
        let start = local_midnight_utc(day, self.tz) + self.offset;
        (start, start + Duration::days(1))
    }

    /// Total minutes of event time overlapping each day window.
    ///
    /// Every intersecting event contributes its overlap, clipped to the
    /// window and rounded to whole minutes per event. Days without events
    /// yield `0.0` (legacy behavior: duration series are never absent, so
    /// missed-day detection for duration inputs is driven by the output
    /// side).
    pub fn overlap_minutes(&self, events: &[ActivityEvent], range: DateRange) -> Vec<f64> {
        range
            .days()
            .map(|day| {
                let (window_start, window_end) = self.day_bounds(day);
                events
                    .iter()
                    .filter(|e| e.end_time >= window_start && e.start_time <= window_end)
                    .map(|e| {
                        let start = e.start_time.max(window_start);
                        let end = e.end_time.min(window_end);
                        let seconds = (end - start).num_seconds().max(0);
                        (seconds as f64 / 60.0).round()
                    })
                    .sum()
            })
            .collect()
    }

    /// Sleep-efficiency ratio `1 - awake/duration` per day, from events whose
    /// start instant falls strictly inside the day window (left-exclusive,
    /// right-inclusive). Days with zero summed duration are absent, not zero.
    pub fn efficiency_ratios(&self, events: &[ActivityEvent], range: DateRange) -> Vec<Option<f64>> {
        range
            .days()
            .map(|day| {
                let (window_start, window_end) = self.day_bounds(day);
                let mut duration = 0.0;
                let mut awake = 0.0;
                for e in events {
                    if e.start_time > window_start && e.start_time <= window_end {
                        let seconds = (e.end_time - e.start_time).num_seconds();
                        duration += (seconds as f64 / 60.0).round();
                        awake += e.awake_minutes;
                    }
                }
                if duration > 0.0 {
                    Some(1.0 - awake / duration)
                } else {
                    None
                }
            })
            .collect()
    }

    /// Start instant of the first event (by start time) whose start falls in
    /// each day window (left-inclusive, right-exclusive); absent if none.
    pub fn first_starts(
        &self,
        events: &[ActivityEvent],
        range: DateRange,
    ) -> Vec<Option<DateTime<Utc>>> {
        let mut ordered: Vec<&ActivityEvent> = events.iter().collect();
        ordered.sort_by_key(|e| e.start_time);

        range
            .days()
            .map(|day| {
                let (window_start, window_end) = self.day_bounds(day);
                ordered
                    .iter()
                    .find(|e| e.start_time >= window_start && e.start_time < window_end)
                    .map(|e| e.start_time)
            })
            .collect()
    }

    /// Value of an accessor on the first event whose start instant's local
    /// calendar date equals the day exactly (no window offset applied); `0.0`
    /// if none. Used for raw daily totals such as step counts.
    pub fn daily_scalar<F>(&self, events: &[ActivityEvent], range: DateRange, value: F) -> Vec<f64>
    where
        F: Fn(&ActivityEvent) -> f64,
    {
        let mut ordered: Vec<&ActivityEvent> = events.iter().collect();
        ordered.sort_by_key(|e| e.start_time);

        range
            .days()
            .map(|day| {
                ordered
                    .iter()
                    .find(|e| e.start_time.with_timezone(&self.tz).date_naive() == day)
                    .map(|e| value(e))
                    .unwrap_or(0.0)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ActivityKind;
    use chrono::Offset;

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn sleep_event(id: &str, start: DateTime<Utc>, end: DateTime<Utc>, awake: f64) -> ActivityEvent {
        ActivityEvent::new("subject-1", ActivityKind::Sleep, id, start, end)
            .with_awake_minutes(awake)
    }

    fn steps_event(id: &str, start: DateTime<Utc>, steps: u32) -> ActivityEvent {
        ActivityEvent::new(
            "subject-1",
            ActivityKind::Move,
            id,
            start,
            start + Duration::hours(2),
        )
        .with_steps(steps)
    }

    #[test]
    fn test_date_range_days() {
        let range = DateRange::new(date(2012, 1, 14), date(2012, 1, 17));
        let days: Vec<NaiveDate> = range.days().collect();
        assert_eq!(days, vec![date(2012, 1, 14), date(2012, 1, 15), date(2012, 1, 16)]);
        assert_eq!(range.num_days(), 3);

        let empty = DateRange::new(date(2012, 1, 14), date(2012, 1, 14));
        assert_eq!(empty.days().count(), 0);
    }

    #[test]
    fn test_overlap_minutes_single_event() {
        // -5h offset: the window for Jan 14 is [Jan 13 19:00, Jan 14 19:00)
        let agg = DayAggregator::new(Utc.fix(), -5);
        let events = vec![sleep_event("a", utc(2012, 1, 14, 1, 0), utc(2012, 1, 14, 7, 0), 0.0)];

        let range = DateRange::new(date(2012, 1, 13), date(2012, 1, 15));
        assert_eq!(agg.overlap_minutes(&events, range), vec![0.0, 360.0]);
    }

    #[test]
    fn test_overlap_minutes_splits_across_boundary() {
        let agg = DayAggregator::new(Utc.fix(), -5);
        // spans the 19:00 boundary: one hour lands on each side
        let events = vec![sleep_event("a", utc(2012, 1, 13, 18, 0), utc(2012, 1, 13, 20, 0), 0.0)];

        let range = DateRange::new(date(2012, 1, 13), date(2012, 1, 15));
        assert_eq!(agg.overlap_minutes(&events, range), vec![60.0, 60.0]);
    }

    #[test]
    fn test_overlap_minutes_sums_multiple_events() {
        let agg = DayAggregator::new(Utc.fix(), -5);
        let events = vec![
            sleep_event("a", utc(2012, 1, 14, 1, 0), utc(2012, 1, 14, 7, 0), 0.0),
            sleep_event("b", utc(2012, 1, 13, 21, 0), utc(2012, 1, 13, 23, 30), 0.0),
        ];

        let range = DateRange::new(date(2012, 1, 14), date(2012, 1, 15));
        assert_eq!(agg.overlap_minutes(&events, range), vec![510.0]);
    }

    #[test]
    fn test_overlap_minutes_nonzero_timezone() {
        // At UTC-5 with the -5h offset the window for Jan 14 is
        // [Jan 14 00:00 UTC, Jan 15 00:00 UTC)
        let tz = FixedOffset::east_opt(-5 * 3600).unwrap();
        let agg = DayAggregator::new(tz, -5);
        let events = vec![sleep_event("a", utc(2012, 1, 14, 1, 0), utc(2012, 1, 14, 7, 0), 0.0)];

        let range = DateRange::new(date(2012, 1, 13), date(2012, 1, 15));
        assert_eq!(agg.overlap_minutes(&events, range), vec![0.0, 360.0]);
    }

    #[test]
    fn test_efficiency_ratio_basic() {
        let agg = DayAggregator::new(Utc.fix(), -5);
        let events = vec![sleep_event("a", utc(2012, 1, 14, 1, 0), utc(2012, 1, 14, 7, 0), 60.0)];

        let range = DateRange::new(date(2012, 1, 13), date(2012, 1, 15));
        let ratios = agg.efficiency_ratios(&events, range);
        assert_eq!(ratios[0], None);
        assert!((ratios[1].unwrap() - 5.0 / 6.0).abs() < 1e-9);
    }

    #[test]
    fn test_efficiency_absent_is_not_zero() {
        let agg = DayAggregator::new(Utc.fix(), -5);
        let range = DateRange::new(date(2012, 1, 13), date(2012, 1, 15));
        let ratios = agg.efficiency_ratios(&[], range);
        assert_eq!(ratios, vec![None, None]);
    }

    #[test]
    fn test_efficiency_start_boundary_is_left_exclusive() {
        let agg = DayAggregator::new(Utc.fix(), -5);
        // starts exactly at the 19:00 boundary: counts toward the earlier
        // day's window (whose right edge is inclusive), not the later one
        let events = vec![sleep_event("a", utc(2012, 1, 13, 19, 0), utc(2012, 1, 14, 1, 0), 90.0)];

        let range = DateRange::new(date(2012, 1, 13), date(2012, 1, 15));
        let ratios = agg.efficiency_ratios(&events, range);
        assert!((ratios[0].unwrap() - (1.0 - 90.0 / 360.0)).abs() < 1e-9);
        assert_eq!(ratios[1], None);
    }

    #[test]
    fn test_efficiency_sums_all_sleeps_in_window() {
        let agg = DayAggregator::new(Utc.fix(), -5);
        let events = vec![
            sleep_event("a", utc(2012, 1, 13, 21, 0), utc(2012, 1, 14, 5, 0), 60.0),
            sleep_event("b", utc(2012, 1, 14, 13, 0), utc(2012, 1, 14, 14, 0), 0.0),
        ];

        let range = DateRange::new(date(2012, 1, 14), date(2012, 1, 15));
        let ratios = agg.efficiency_ratios(&events, range);
        // 480 + 60 minutes in bed, 60 awake
        assert!((ratios[0].unwrap() - (1.0 - 60.0 / 540.0)).abs() < 1e-9);
    }

    #[test]
    fn test_first_starts_picks_earliest() {
        let agg = DayAggregator::new(Utc.fix(), -5);
        let events = vec![
            sleep_event("late", utc(2012, 1, 14, 2, 0), utc(2012, 1, 14, 3, 0), 0.0),
            sleep_event("early", utc(2012, 1, 13, 21, 0), utc(2012, 1, 14, 5, 0), 0.0),
        ];

        let range = DateRange::new(date(2012, 1, 14), date(2012, 1, 15));
        let starts = agg.first_starts(&events, range);
        assert_eq!(starts, vec![Some(utc(2012, 1, 13, 21, 0))]);
    }

    #[test]
    fn test_first_starts_boundary_is_left_inclusive() {
        let agg = DayAggregator::new(Utc.fix(), -5);
        let events = vec![sleep_event("a", utc(2012, 1, 13, 19, 0), utc(2012, 1, 14, 1, 0), 0.0)];

        let range = DateRange::new(date(2012, 1, 13), date(2012, 1, 15));
        let starts = agg.first_starts(&events, range);
        // 19:00 is the start of day 14's window, exclusive end of day 13's
        assert_eq!(starts, vec![None, Some(utc(2012, 1, 13, 19, 0))]);
    }

    #[test]
    fn test_daily_scalar_matches_local_date_without_offset() {
        let agg = DayAggregator::new(Utc.fix(), -5);
        let events = vec![steps_event("a", utc(2012, 1, 14, 9, 0), 1000)];

        let range = DateRange::new(date(2012, 1, 13), date(2012, 1, 15));
        let steps = agg.daily_scalar(&events, range, |e| e.steps as f64);
        assert_eq!(steps, vec![0.0, 1000.0]);
    }

    #[test]
    fn test_daily_scalar_takes_first_event_only() {
        let agg = DayAggregator::new(Utc.fix(), 0);
        let events = vec![
            steps_event("b", utc(2012, 1, 14, 15, 0), 2000),
            steps_event("a", utc(2012, 1, 14, 9, 0), 1000),
        ];

        let range = DateRange::new(date(2012, 1, 14), date(2012, 1, 15));
        let steps = agg.daily_scalar(&events, range, |e| e.steps as f64);
        assert_eq!(steps, vec![1000.0]);
    }

    #[test]
    fn test_aggregation_unchanged_by_event_order() {
        let agg = DayAggregator::new(Utc.fix(), -5);
        let mut events = vec![
            sleep_event("a", utc(2012, 1, 14, 1, 0), utc(2012, 1, 14, 7, 0), 30.0),
            sleep_event("b", utc(2012, 1, 13, 21, 0), utc(2012, 1, 13, 23, 0), 10.0),
        ];
        let range = DateRange::new(date(2012, 1, 13), date(2012, 1, 15));

        let forward = agg.efficiency_ratios(&events, range);
        events.reverse();
        assert_eq!(agg.efficiency_ratios(&events, range), forward);
    }
}
