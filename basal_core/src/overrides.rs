//! Applying temporary overrides to absolute-time therapy schedules.
//!
//! Two modes:
//! - Scaling: wherever an override is active, the segment's value is
//!   transformed (basal ×, sensitivity ÷, carb ratio ÷ the insulin-needs
//!   scale factor). Segments are split at override boundaries.
//! - Target replacement: the nearest current-or-future override carrying a
//!   target range replaces the target timeline from its start onward.

use crate::{AbsoluteScheduleValue, GlucoseRange, TemporaryScheduleOverride};
use chrono::{DateTime, Utc};

/// Apply `transform` to every part of `timeline` covered by an active override
///
/// Overrides are consumed in ascending start order; deleted overrides never
/// apply. Where two overrides overlap, the earlier-starting one holds until it
/// ends. Uncovered parts pass through unchanged.
pub fn apply_overrides<T, F>(
    timeline: &[AbsoluteScheduleValue<T>],
    overrides: &[TemporaryScheduleOverride],
    transform: F,
) -> Vec<AbsoluteScheduleValue<T>>
where
    T: Clone,
    F: Fn(&T, &TemporaryScheduleOverride) -> T,
{
    let mut sorted: Vec<&TemporaryScheduleOverride> =
        overrides.iter().filter(|o| !o.is_deleted()).collect();
    sorted.sort_by_key(|o| o.start_date);

    let mut result = Vec::with_capacity(timeline.len());
    let mut first_live = 0;

    for entry in timeline {
        while first_live < sorted.len() && sorted[first_live].has_ended_by(entry.start_date) {
            first_live += 1;
        }

        let mut position = entry.start_date;
        for o in &sorted[first_live..] {
            if position >= entry.end_date || o.start_date >= entry.end_date {
                break;
            }

            let start = o.start_date.max(position);
            let end = o
                .actual_end_date()
                .map_or(entry.end_date, |e| e.min(entry.end_date));
            if end <= start {
                continue;
            }

            if start > position {
                result.push(AbsoluteScheduleValue::new(position, start, entry.value.clone()));
            }
            result.push(AbsoluteScheduleValue::new(start, end, transform(&entry.value, o)));
            position = end;
        }

        if position < entry.end_date {
            result.push(AbsoluteScheduleValue::new(
                position,
                entry.end_date,
                entry.value.clone(),
            ));
        }
    }

    result
}

/// Collapse contiguous segments that carry equal values
pub fn merge_adjacent<T: Clone + PartialEq>(
    timeline: &[AbsoluteScheduleValue<T>],
) -> Vec<AbsoluteScheduleValue<T>> {
    let mut merged: Vec<AbsoluteScheduleValue<T>> = Vec::with_capacity(timeline.len());
    for segment in timeline {
        match merged.last_mut() {
            Some(last) if last.end_date == segment.start_date && last.value == segment.value => {
                last.end_date = segment.end_date;
            }
            _ => merged.push(segment.clone()),
        }
    }
    merged
}

/// Basal rates scaled up by each override's insulin-needs factor
pub fn basal_with_overrides(
    timeline: &[AbsoluteScheduleValue<f64>],
    overrides: &[TemporaryScheduleOverride],
) -> Vec<AbsoluteScheduleValue<f64>> {
    merge_adjacent(&apply_overrides(timeline, overrides, |rate, o| {
        rate * o.settings.effective_scale_factor()
    }))
}

/// Insulin sensitivity reduced as insulin needs rise
pub fn sensitivity_with_overrides(
    timeline: &[AbsoluteScheduleValue<f64>],
    overrides: &[TemporaryScheduleOverride],
) -> Vec<AbsoluteScheduleValue<f64>> {
    merge_adjacent(&apply_overrides(timeline, overrides, |isf, o| {
        isf / o.settings.effective_scale_factor()
    }))
}

/// Carb ratios reduced as insulin needs rise
pub fn carb_ratio_with_overrides(
    timeline: &[AbsoluteScheduleValue<f64>],
    overrides: &[TemporaryScheduleOverride],
) -> Vec<AbsoluteScheduleValue<f64>> {
    merge_adjacent(&apply_overrides(timeline, overrides, |ratio, o| {
        ratio / o.settings.effective_scale_factor()
    }))
}

/// Replace the target timeline from the nearest current-or-future override onward
///
/// Only overrides with a target range that have not ended by `now` qualify;
/// the one starting earliest wins. Segments before its start pass through
/// unchanged and everything after is its fixed range, through the end of
/// the timeline.
pub fn apply_target_override(
    timeline: &[AbsoluteScheduleValue<GlucoseRange>],
    overrides: &[TemporaryScheduleOverride],
    now: DateTime<Utc>,
) -> Vec<AbsoluteScheduleValue<GlucoseRange>> {
    let nearest = overrides
        .iter()
        .filter(|o| !o.is_deleted() && !o.has_ended_by(now))
        .filter_map(|o| o.settings.target_range.map(|range| (o.start_date, range)))
        .min_by_key(|(start, _)| *start);

    let (Some((start, range)), Some(first), Some(last)) = (nearest, timeline.first(), timeline.last())
    else {
        return timeline.to_vec();
    };

    if start >= last.end_date {
        return timeline.to_vec();
    }

    let replace_from = start.max(first.start_date);
    let mut result: Vec<_> = timeline
        .iter()
        .filter(|segment| segment.start_date < replace_from)
        .map(|segment| {
            AbsoluteScheduleValue::new(
                segment.start_date,
                segment.end_date.min(replace_from),
                segment.value,
            )
        })
        .collect();
    result.push(AbsoluteScheduleValue::new(replace_from, last.end_date, range));

    tracing::debug!("Target override from {} replaces {:?}", replace_from, range);
    result
}
