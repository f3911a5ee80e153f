//! Scheduled basal overlay for reconciled dose timelines.
//!
//! Reconciled pump history only records what the pump reported: scheduled
//! basal delivery between temp basals usually shows up as a gap. This module
//! fills those gaps with synthetic basal records at the scheduled rate, split
//! wherever the schedule changes rate.

use crate::{AbsoluteScheduleValue, DoseEntry, DoseType, DoseUnit, Error, Result};
use chrono::{DateTime, Duration, Utc};

/// Tuning for [`overlay_basal_schedule`]
#[derive(Clone, Debug)]
pub struct OverlayOptions {
    /// Fill through this time after the last record
    pub end_date: Option<DateTime<Utc>>,
    /// Synthetic records ending at or after this are still subject to change
    pub last_reconciled: Option<DateTime<Utc>>,
    /// Gaps no longer than this are treated as rounding and closed by snapping
    ///
    /// A snapped record starts earlier but keeps its `delivered_units`: the
    /// measured amount stands and only the reported start is corrected.
    pub gap_patch_interval: Duration,
}

impl Default for OverlayOptions {
    fn default() -> Self {
        Self {
            end_date: None,
            last_reconciled: None,
            gap_patch_interval: Duration::zero(),
        }
    }
}

/// Fill gaps in a reconciled timeline with scheduled basal delivery
///
/// `basal_history` must be sorted and start at or before the first basal,
/// temp basal or suspend record. Resume records must already have been
/// folded away by reconciliation; either violation is a precondition error.
pub fn overlay_basal_schedule(
    doses: &[DoseEntry],
    basal_history: &[AbsoluteScheduleValue<f64>],
    options: &OverlayOptions,
) -> Result<Vec<DoseEntry>> {
    validate_input(doses, basal_history)?;

    let Some(first_value) = basal_history.first() else {
        tracing::warn!("No basal schedule supplied; returning timeline without overlay");
        return Ok(doses.to_vec());
    };

    let mut schedule = ScheduleWalker::new(basal_history, options.last_reconciled);
    let mut cursor = first_value.start_date;
    let mut output = Vec::with_capacity(doses.len() * 2);
    let mut trailing: Option<usize> = None;

    for dose in doses {
        if dose.dose_type == DoseType::Bolus {
            output.push(dose.clone());
            continue;
        }

        let mut dose = dose.clone();
        if dose.start_date - cursor > options.gap_patch_interval {
            output.extend(schedule.fill(cursor, dose.start_date));
        } else {
            // Delivered units are kept as measured
            dose.start_date = cursor.min(dose.end_date);
        }

        cursor = cursor.max(dose.end_date);
        trailing = Some(output.len());
        output.push(dose);
    }

    if let Some(end) = options.end_date.filter(|end| *end > cursor) {
        let unterminated_suspend = trailing
            .map(|i| &output[i])
            .is_some_and(|d| d.dose_type == DoseType::Suspend && (d.is_mutable || d.end_date == d.start_date));

        match trailing {
            Some(i) if unterminated_suspend => output[i].end_date = end,
            _ => output.extend(schedule.fill(cursor, end)),
        }
    }

    output.sort_by_key(|d| d.start_date);

    tracing::debug!(
        "Overlaid basal schedule: {} records in, {} out",
        doses.len(),
        output.len()
    );
    Ok(output)
}

fn validate_input(doses: &[DoseEntry], basal_history: &[AbsoluteScheduleValue<f64>]) -> Result<()> {
    if let Some(resume) = doses.iter().find(|d| d.dose_type == DoseType::Resume) {
        return Err(Error::Precondition(format!(
            "resume at {} in reconciled timeline",
            resume.start_date
        )));
    }

    if basal_history
        .windows(2)
        .any(|pair| pair[1].start_date < pair[0].start_date)
    {
        return Err(Error::Precondition("basal history is not sorted".into()));
    }

    let first_timeline = doses.iter().find(|d| d.dose_type != DoseType::Bolus);
    if let (Some(first_value), Some(dose)) = (basal_history.first(), first_timeline) {
        if first_value.start_date > dose.start_date {
            return Err(Error::Precondition(format!(
                "basal history starts at {}, after first record at {}",
                first_value.start_date, dose.start_date
            )));
        }
    }

    Ok(())
}

/// Monotonic index into the basal history
///
/// Gaps are filled in increasing time order, so the index only moves forward.
struct ScheduleWalker<'a> {
    history: &'a [AbsoluteScheduleValue<f64>],
    index: usize,
    last_reconciled: Option<DateTime<Utc>>,
}

impl<'a> ScheduleWalker<'a> {
    fn new(history: &'a [AbsoluteScheduleValue<f64>], last_reconciled: Option<DateTime<Utc>>) -> Self {
        Self {
            history,
            index: 0,
            last_reconciled,
        }
    }

    /// Start of the segment after the current one; the last segment never ends
    fn next_boundary(&self) -> Option<DateTime<Utc>> {
        self.history.get(self.index + 1).map(|v| v.start_date)
    }

    /// Synthetic basal records covering `[from, to)`, one per schedule segment
    fn fill(&mut self, from: DateTime<Utc>, to: DateTime<Utc>) -> Vec<DoseEntry> {
        let mut filled = Vec::new();

        while self.next_boundary().is_some_and(|b| b <= from) {
            self.index += 1;
        }

        let mut start = from;
        while start < to {
            let end = self.next_boundary().map_or(to, |b| b.min(to));
            filled.push(self.synthesize(start, end, self.history[self.index].value));
            start = end;
            if start < to {
                self.index += 1;
            }
        }

        filled
    }

    fn synthesize(&self, start: DateTime<Utc>, end: DateTime<Utc>, rate: f64) -> DoseEntry {
        let mut dose = DoseEntry::new(DoseType::Basal, start, end, rate, DoseUnit::UnitsPerHour);
        dose.scheduled_basal_rate = Some(rate);
        dose.is_mutable = self.last_reconciled.is_some_and(|cutoff| end >= cutoff);
        dose.resolving_delivery()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(min: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap() + Duration::minutes(min)
    }

    fn h(hours: i64) -> DateTime<Utc> {
        t(hours * 60)
    }

    fn two_rate_schedule() -> Vec<AbsoluteScheduleValue<f64>> {
        vec![
            AbsoluteScheduleValue::new(h(0), h(12), 1.0),
            AbsoluteScheduleValue::new(h(12), h(24), 1.5),
        ]
    }

    fn temp(start: i64, end: i64, rate: f64) -> DoseEntry {
        DoseEntry::new(DoseType::TempBasal, t(start), t(end), rate, DoseUnit::UnitsPerHour)
    }

    fn with_end(end: DateTime<Utc>) -> OverlayOptions {
        OverlayOptions {
            end_date: Some(end),
            ..Default::default()
        }
    }

    #[test]
    fn test_empty_timeline_filled_at_rate_boundary() {
        let overlaid = overlay_basal_schedule(&[], &two_rate_schedule(), &with_end(h(24))).unwrap();

        assert_eq!(overlaid.len(), 2);
        assert_eq!(overlaid[0].start_date, h(0));
        assert_eq!(overlaid[0].end_date, h(12));
        assert_eq!(overlaid[0].value, 1.0);
        assert_eq!(overlaid[1].start_date, h(12));
        assert_eq!(overlaid[1].end_date, h(24));
        assert_eq!(overlaid[1].value, 1.5);
        assert!(overlaid.iter().all(|d| d.dose_type == DoseType::Basal));
        assert!((overlaid[0].delivered_units.unwrap() - 12.0).abs() < 1e-9);
    }

    #[test]
    fn test_gap_spanning_boundary_is_split() {
        let doses = vec![temp(0, 600, 2.0), temp(780, 840, 0.5)];

        let overlaid =
            overlay_basal_schedule(&doses, &two_rate_schedule(), &OverlayOptions::default())
                .unwrap();

        assert_eq!(overlaid.len(), 4);
        assert_eq!(overlaid[1].dose_type, DoseType::Basal);
        assert_eq!(overlaid[1].start_date, t(600));
        assert_eq!(overlaid[1].end_date, h(12));
        assert_eq!(overlaid[1].scheduled_basal_rate, Some(1.0));
        assert_eq!(overlaid[2].start_date, h(12));
        assert_eq!(overlaid[2].end_date, t(780));
        assert_eq!(overlaid[2].value, 1.5);
    }

    #[test]
    fn test_gap_within_patch_interval_is_snapped() {
        let doses = vec![temp(0, 30, 2.0), temp(33, 60, 0.5)];
        let options = OverlayOptions {
            gap_patch_interval: Duration::minutes(5),
            ..Default::default()
        };

        let overlaid = overlay_basal_schedule(&doses, &two_rate_schedule(), &options).unwrap();
        assert_eq!(overlaid.len(), 2);
        assert_eq!(overlaid[1].start_date, t(30));
    }

    #[test]
    fn test_gap_equal_to_patch_interval_is_snapped() {
        let doses = vec![temp(0, 30, 2.0), temp(35, 60, 0.5)];
        let options = OverlayOptions {
            gap_patch_interval: Duration::minutes(5),
            ..Default::default()
        };

        let overlaid = overlay_basal_schedule(&doses, &two_rate_schedule(), &options).unwrap();
        assert_eq!(overlaid.len(), 2);
        assert_eq!(overlaid[1].start_date, t(30));

        let doses = vec![temp(0, 30, 2.0), temp(36, 60, 0.5)];
        let overlaid = overlay_basal_schedule(&doses, &two_rate_schedule(), &options).unwrap();
        assert_eq!(overlaid.len(), 3);
        assert_eq!(overlaid[1].start_date, t(30));
        assert_eq!(overlaid[1].end_date, t(36));
    }

    #[test]
    fn test_snapped_record_keeps_delivered_units() {
        let doses = vec![
            temp(0, 30, 2.0).with_delivered_units(1.0),
            temp(33, 60, 0.5).with_delivered_units(0.225),
        ];
        let options = OverlayOptions {
            gap_patch_interval: Duration::minutes(5),
            ..Default::default()
        };

        let overlaid = overlay_basal_schedule(&doses, &two_rate_schedule(), &options).unwrap();
        assert_eq!(overlaid[1].start_date, t(30));
        assert_eq!(overlaid[1].delivered_units, Some(0.225));
    }

    #[test]
    fn test_trailing_fill_through_end_date() {
        let doses = vec![temp(0, 60, 2.0)];

        let overlaid = overlay_basal_schedule(&doses, &two_rate_schedule(), &with_end(h(3))).unwrap();
        assert_eq!(overlaid.len(), 2);
        assert_eq!(overlaid[1].start_date, t(60));
        assert_eq!(overlaid[1].end_date, h(3));
    }

    #[test]
    fn test_trailing_suspend_extended_to_end() {
        let suspend = DoseEntry::new(DoseType::Suspend, t(60), t(60), 0.0, DoseUnit::UnitsPerHour)
            .mutable();
        let doses = vec![temp(0, 60, 2.0), suspend];

        let overlaid = overlay_basal_schedule(&doses, &two_rate_schedule(), &with_end(h(2))).unwrap();
        assert_eq!(overlaid.len(), 2);
        assert_eq!(overlaid[1].dose_type, DoseType::Suspend);
        assert_eq!(overlaid[1].end_date, h(2));
        assert!(overlaid[1].is_mutable);
    }

    #[test]
    fn test_bolus_does_not_move_cursor() {
        let bolus = DoseEntry::new(DoseType::Bolus, t(45), t(45), 2.0, DoseUnit::Units);
        let doses = vec![temp(0, 30, 2.0), bolus, temp(60, 90, 0.5)];

        let overlaid =
            overlay_basal_schedule(&doses, &two_rate_schedule(), &OverlayOptions::default())
                .unwrap();
        let kinds: Vec<_> = overlaid.iter().map(|d| d.dose_type).collect();
        assert_eq!(
            kinds,
            vec![DoseType::TempBasal, DoseType::Basal, DoseType::Bolus, DoseType::TempBasal]
        );
        assert_eq!(overlaid[1].start_date, t(30));
        assert_eq!(overlaid[1].end_date, t(60));
    }

    #[test]
    fn test_synthetic_records_mutable_after_cutoff() {
        let options = OverlayOptions {
            end_date: Some(h(24)),
            last_reconciled: Some(h(18)),
            ..Default::default()
        };

        let overlaid = overlay_basal_schedule(&[], &two_rate_schedule(), &options).unwrap();
        assert!(!overlaid[0].is_mutable);
        assert!(overlaid[0].delivered_units.is_some());
        assert!(overlaid[1].is_mutable);
        assert_eq!(overlaid[1].delivered_units, None);
    }

    #[test]
    fn test_last_schedule_value_held_past_its_end() {
        let overlaid = overlay_basal_schedule(&[], &two_rate_schedule(), &with_end(h(30))).unwrap();
        assert_eq!(overlaid.len(), 2);
        assert_eq!(overlaid[1].end_date, h(30));
        assert_eq!(overlaid[1].value, 1.5);
    }

    #[test]
    fn test_resume_in_input_rejected() {
        let resume = DoseEntry::new(DoseType::Resume, t(10), t(10), 0.0, DoseUnit::UnitsPerHour);

        let result = overlay_basal_schedule(&[resume], &two_rate_schedule(), &OverlayOptions::default());
        assert!(matches!(result, Err(Error::Precondition(_))));
    }

    #[test]
    fn test_schedule_starting_late_rejected() {
        let late = vec![AbsoluteScheduleValue::new(h(1), h(24), 1.0)];

        let result = overlay_basal_schedule(&[temp(0, 30, 1.0)], &late, &OverlayOptions::default());
        assert!(matches!(result, Err(Error::Precondition(_))));
    }

    #[test]
    fn test_empty_schedule_returns_input() {
        let doses = vec![temp(0, 30, 1.0)];
        let overlaid = overlay_basal_schedule(&doses, &[], &with_end(h(1))).unwrap();
        assert_eq!(overlaid, doses);
    }
}
