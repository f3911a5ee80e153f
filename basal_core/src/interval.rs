//! Interval clipping and delivery resolution for dose records.

use crate::types::seconds;
use crate::{DoseEntry, DoseType, DoseUnit};
use chrono::{DateTime, Utc};

impl DoseEntry {
    /// Clip this record to `[from, to]`, rescaling amounts by the kept fraction
    ///
    /// Either bound may be omitted. The result never has `end < start`; a
    /// window that misses the record yields a zero-length record at the
    /// nearest boundary.
    pub fn trimmed(&self, from: Option<DateTime<Utc>>, to: Option<DateTime<Utc>>) -> DoseEntry {
        let original = self.duration();
        let start = from.map_or(self.start_date, |f| f.max(self.start_date));
        let end = to
            .map_or(self.end_date, |t| t.min(self.end_date))
            .max(start);

        let mut trimmed = self.clone();
        trimmed.start_date = start;
        trimmed.end_date = end;

        let shortened = start > self.start_date || end < self.end_date;
        if shortened && original > chrono::Duration::zero() {
            let fraction = seconds(end - start) / seconds(original);
            if let Some(delivered) = self.delivered_units {
                trimmed.delivered_units = Some(delivered * fraction);
            }
            if self.unit == DoseUnit::Units {
                trimmed.value = self.value * fraction;
            }
        }

        trimmed
    }

    /// Fill in `delivered_units` for records whose delivery is settled
    ///
    /// Mutable records stay unresolved. Unit-valued records resolve to their
    /// programmed value; immutable basal and temp basal records resolve to the
    /// rate prorated over their interval.
    pub fn resolving_delivery(self) -> DoseEntry {
        if self.is_mutable || self.delivered_units.is_some() {
            return self;
        }

        let resolved = match (self.unit, self.dose_type) {
            (DoseUnit::Units, _) => self.value,
            (DoseUnit::UnitsPerHour, DoseType::Basal | DoseType::TempBasal) => {
                self.programmed_units()
            }
            _ => return self,
        };

        DoseEntry {
            delivered_units: Some(resolved),
            ..self
        }
    }
}

/// Trim each record to `[start, end]`, dropping records that fall outside
///
/// Zero-length records are kept only when they sit inside the window, so
/// instantaneous boluses survive. Open-ended records are still running, so
/// one that started before the window is kept as-is.
pub fn clamp_to_window(
    doses: &[DoseEntry],
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
) -> Vec<DoseEntry> {
    doses
        .iter()
        .filter(|d| {
            let after_start = d.is_open_ended() || start.map_or(true, |s| d.end_date >= s);
            let before_end = end.map_or(true, |e| d.start_date <= e);
            after_start && before_end
        })
        .map(|d| {
            if d.is_open_ended() {
                d.clone()
            } else {
                d.trimmed(start, end)
            }
        })
        .filter(|d| d.end_date > d.start_date || d.is_open_ended() || d.dose_type == DoseType::Bolus)
        .collect()
}

/// Total insulin across the records, preferring delivered over programmed amounts
pub fn total_delivered_units(doses: &[DoseEntry]) -> f64 {
    doses
        .iter()
        .filter(|d| d.dose_type != DoseType::Suspend && d.dose_type != DoseType::Resume)
        .map(DoseEntry::units)
        .sum()
}
