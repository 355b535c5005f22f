//! Attention metrics for a single study session.
//!
//! Status samples are point readings; each one holds until the next sample
//! (or the end of the session). The timeline they describe is reconstructed
//! into intervals, from which the aggregate metrics, distraction runs and
//! per-minute buckets are derived.

use focus_core::error::Result;
use focus_core::types::{Analysis, SessionRecord, TimeBucket};

/// Width of one time-series bucket in milliseconds.
pub const BUCKET_WIDTH_MS: i64 = 60_000;

/// A first or last bucket below this fraction of the session ratio is flagged.
pub const SLUMP_FACTOR: f64 = 0.8;

/// A span of the session during which one status held.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interval {
    pub start: i64,
    pub end: i64,
    pub attentive: bool,
}

impl Interval {
    /// Length in milliseconds. Intervals that end before they start are empty.
    pub fn duration(&self) -> i64 {
        self.end.saturating_sub(self.start).max(0)
    }

    /// Length of the part of this interval inside `[lo, hi)`.
    pub fn overlap(&self, lo: i64, hi: i64) -> i64 {
        self.end.min(hi).saturating_sub(self.start.max(lo)).max(0)
    }
}

/// Count and total length of distraction runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DistractionStats {
    pub count: u32,
    pub total_ms: i64,
}

impl DistractionStats {
    fn close_run(&mut self, length: i64) {
        self.count += 1;
        self.total_ms = self.total_ms.saturating_add(length.max(0));
    }

    /// Mean run length in milliseconds; 0 when there were no runs.
    pub fn average_ms(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.total_ms as f64 / self.count as f64
        }
    }
}

/// Turn the session's samples into a step-function timeline.
///
/// Samples are stably sorted by timestamp first, so input that is already in
/// order is used exactly as given. Intervals are clipped to
/// `[start_time, end_time]`.
pub fn intervals(record: &SessionRecord) -> Vec<Interval> {
    let mut samples: Vec<_> = record.logs.iter().collect();
    samples.sort_by_key(|s| s.timestamp);

    samples
        .iter()
        .enumerate()
        .map(|(i, sample)| {
            let next = samples
                .get(i + 1)
                .map_or(record.end_time, |next| next.timestamp);
            Interval {
                start: sample.timestamp.max(record.start_time),
                end: next.min(record.end_time),
                attentive: sample.is_attentive(),
            }
        })
        .collect()
}

/// Find maximal runs of non-attentive intervals.
///
/// A run opens at the first non-attentive interval and closes at the start of
/// the next attentive one, or at `end_time` if the session ends distracted.
pub fn distraction_runs(intervals: &[Interval], end_time: i64) -> DistractionStats {
    let mut stats = DistractionStats::default();
    let mut run_start: Option<i64> = None;

    for interval in intervals {
        match (interval.attentive, run_start) {
            (false, None) => run_start = Some(interval.start),
            (true, Some(start)) => {
                stats.close_run(interval.start.saturating_sub(start));
                run_start = None;
            }
            _ => {}
        }
    }
    if let Some(start) = run_start {
        stats.close_run(end_time.saturating_sub(start));
    }

    stats
}

/// Split `[start_time, start_time + total)` into fixed-width buckets and
/// compute the attentive fraction of the covered time in each.
///
/// Every bucket rescans all intervals and clips them to its own window, so
/// an interval spanning a boundary contributes to each bucket it touches.
/// A sample is not credited to the bucket holding its timestamp alone: a
/// reading held for three minutes fills three buckets.
///
/// Callers bound `total` (see [`SessionRecord::validate`]); the bucket count
/// is linear in it.
pub fn time_series(start_time: i64, total: i64, intervals: &[Interval]) -> Vec<TimeBucket> {
    if total <= 0 {
        return Vec::new();
    }
    let count = total / BUCKET_WIDTH_MS + i64::from(total % BUCKET_WIDTH_MS != 0);

    (0..count)
        .map(|i| {
            let start = start_time.saturating_add(i * BUCKET_WIDTH_MS);
            let end = start.saturating_add(BUCKET_WIDTH_MS);

            let (attentive, covered) =
                intervals
                    .iter()
                    .fold((0i64, 0i64), |(attentive, covered), interval| {
                        let overlap = interval.overlap(start, end);
                        if interval.attentive {
                            (attentive + overlap, covered + overlap)
                        } else {
                            (attentive, covered + overlap)
                        }
                    });

            TimeBucket {
                start,
                duration: BUCKET_WIDTH_MS,
                ratio: ratio(attentive, covered),
            }
        })
        .collect()
}

/// Slump and fatigue flags: whether the first and last buckets fall below
/// [`SLUMP_FACTOR`] times the overall ratio.
pub fn cycle_flags(series: &[TimeBucket], attention_ratio: f64) -> (bool, bool) {
    let threshold = SLUMP_FACTOR * attention_ratio;
    match (series.first(), series.last()) {
        (Some(first), Some(last)) => (first.ratio < threshold, last.ratio < threshold),
        _ => (false, false),
    }
}

fn ratio(part: i64, whole: i64) -> f64 {
    if whole > 0 {
        part as f64 / whole as f64
    } else {
        0.0
    }
}

/// Compute every metric of the analysis. The summary is left empty.
///
/// Fails with `InvalidInput` when the session span is out of range.
pub fn compute_metrics(record: &SessionRecord) -> Result<Analysis> {
    record.validate()?;
    let total = record.total_duration();
    let timeline = intervals(record);

    let attentive = timeline
        .iter()
        .filter(|i| i.attentive)
        .map(Interval::duration)
        .fold(0i64, i64::saturating_add);
    let distractions = distraction_runs(&timeline, record.end_time);
    let attention_ratio = ratio(attentive, total);
    let time_series = time_series(record.start_time, total, &timeline);
    let (start_cycle_slump, end_cycle_fatigue) = cycle_flags(&time_series, attention_ratio);

    Ok(Analysis {
        total_duration: total,
        attentive_duration: attentive,
        attention_ratio,
        distraction_count: distractions.count,
        avg_distraction_duration: distractions.average_ms(),
        time_series,
        start_cycle_slump,
        end_cycle_fatigue,
        summary: String::new(),
    })
}
