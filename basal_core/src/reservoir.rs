//! Reservoir-volume based delivery estimation.
//!
//! Reservoir readings give an independent measure of delivery: the drop in
//! volume between two readings is what the pump pushed in that interval.
//! Before trusting them the run must be continuous:
//! - It must start at or before the requested window
//! - No zero readings (the pump can't tell what's left)
//! - No rises above 1 U (rewind and prime)
//! - No gaps longer than the allowed maximum
//! - No prime event inside the window

use crate::{DoseEntry, DoseType, DoseUnit, ReservoirReading};
use chrono::{DateTime, Duration, Utc};

/// Fastest the pump hardware can drain the reservoir
pub const MAXIMUM_RESERVOIR_DROP_PER_MINUTE: f64 = 6.5;

/// Rises up to this size come from mixed-precision readings, not refills
const MAXIMUM_VOLUME_RISE: f64 = 1.0;

/// Default longest allowed interval between consecutive readings
pub fn default_max_gap() -> Duration {
    Duration::minutes(30)
}

/// Window and limits for a continuity check
#[derive(Clone, Debug)]
pub struct ContinuityWindow {
    pub start: Option<DateTime<Utc>>,
    pub end: DateTime<Utc>,
    pub max_gap: Duration,
    pub last_prime: Option<DateTime<Utc>>,
}

impl ContinuityWindow {
    pub fn new(start: Option<DateTime<Utc>>, end: DateTime<Utc>) -> Self {
        Self {
            start,
            end,
            max_gap: default_max_gap(),
            last_prime: None,
        }
    }

    pub fn with_max_gap(mut self, max_gap: Duration) -> Self {
        self.max_gap = max_gap;
        self
    }

    pub fn with_last_prime(mut self, last_prime: Option<DateTime<Utc>>) -> Self {
        self.last_prime = last_prime;
        self
    }

    fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start.map_or(true, |s| at >= s) && at <= self.end
    }
}

/// Outcome of a continuity check
#[derive(Clone, Debug, PartialEq)]
pub struct ContinuityVerdict {
    pub is_continuous: bool,
    /// Most recent reading, reported even when the run is untrustworthy
    pub last_known: Option<ReservoirReading>,
}

/// Decide whether chronological readings can be trusted over the window
pub fn check_continuity(readings: &[ReservoirReading], window: &ContinuityWindow) -> ContinuityVerdict {
    let verdict = |is_continuous| ContinuityVerdict {
        is_continuous,
        last_known: readings.last().copied(),
    };

    match first_violation(readings, window) {
        Some(reason) => {
            tracing::debug!("Reservoir readings not continuous: {}", reason);
            verdict(false)
        }
        None => verdict(true),
    }
}

fn first_violation(readings: &[ReservoirReading], window: &ContinuityWindow) -> Option<String> {
    let first = readings.first()?;
    if window.start.is_some_and(|start| first.timestamp > start) {
        return Some(format!("first reading at {} is after window start", first.timestamp));
    }

    let mut previous = first;
    for reading in readings {
        let prior = previous;
        previous = reading;

        if !window.contains(reading.timestamp) {
            continue;
        }
        if reading.remaining_units <= 0.0 {
            return Some(format!("zero reading at {}", reading.timestamp));
        }
        if reading.remaining_units > prior.remaining_units + MAXIMUM_VOLUME_RISE {
            return Some(format!(
                "volume rose from {} to {} at {}",
                prior.remaining_units, reading.remaining_units, reading.timestamp
            ));
        }
        let gap = reading.timestamp - prior.timestamp;
        if gap > window.max_gap || gap < Duration::zero() {
            return Some(format!(
                "gap of {} minutes before {}",
                gap.num_minutes(),
                reading.timestamp
            ));
        }
    }

    if let Some(prime) = window.last_prime.filter(|p| window.contains(*p)) {
        return Some(format!("prime recorded at {}", prime));
    }

    None
}

/// Convenience wrapper returning just the boolean verdict
pub fn is_continuous(readings: &[ReservoirReading], window: &ContinuityWindow) -> bool {
    check_continuity(readings, window).is_continuous
}

/// Convert adjacent reading pairs into unit-valued temp basal records
///
/// Pairs with no elapsed time, a rising volume, or a drop faster than the
/// hardware can deliver are skipped.
pub fn doses_from_readings(readings: &[ReservoirReading]) -> Vec<DoseEntry> {
    let doses: Vec<DoseEntry> = readings
        .windows(2)
        .filter_map(|pair| dose_between(&pair[0], &pair[1]))
        .collect();

    tracing::debug!(
        "Derived {} doses from {} reservoir readings",
        doses.len(),
        readings.len()
    );
    doses
}

fn dose_between(previous: &ReservoirReading, current: &ReservoirReading) -> Option<DoseEntry> {
    let drop = previous.remaining_units - current.remaining_units;
    let duration = current.timestamp - previous.timestamp;
    let minutes = duration.num_milliseconds() as f64 / 60_000.0;

    let plausible = duration > Duration::zero()
        && drop >= 0.0
        && drop <= MAXIMUM_RESERVOIR_DROP_PER_MINUTE * minutes;
    if !plausible {
        tracing::debug!(
            "Skipping reservoir pair at {}: drop {} over {} min",
            current.timestamp,
            drop,
            minutes
        );
        return None;
    }

    Some(
        DoseEntry::new(
            DoseType::TempBasal,
            previous.timestamp,
            current.timestamp,
            drop,
            DoseUnit::Units,
        )
        .with_delivered_units(drop),
    )
}
