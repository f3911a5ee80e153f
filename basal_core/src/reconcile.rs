//! Event reconciliation into a canonical delivery timeline.
//!
//! Pump event histories overlap: a temp basal is reported with its programmed
//! end even when a later command cut it short, and suspends interrupt whatever
//! basal was running. This module folds a chronological event stream into a
//! sequence where basal, temp basal and suspend records never overlap:
//! - Boluses pass through untouched
//! - Each basal-like record is trimmed to the start of the next one
//! - Suspend/resume pairs collapse into a single closed suspend record
//! - Basal delivery interrupted by a suspend is reopened at the resume

use crate::{DoseEntry, DoseType, Error, Result};
use std::cmp::Ordering;

/// Sort events into reconciliation order: by start, then by kind
///
/// Callers merging several event sources should apply this before
/// calling [`reconcile`]. Equal start times order as
/// `basal < bolus < resume < suspend < temp_basal`.
pub fn sort_for_reconciliation(doses: &mut [DoseEntry]) {
    doses.sort_by(compare_for_reconciliation);
}

fn compare_for_reconciliation(a: &DoseEntry, b: &DoseEntry) -> Ordering {
    a.start_date.cmp(&b.start_date).then_with(|| {
        a.dose_type
            .tie_break_rank()
            .cmp(&b.dose_type.tie_break_rank())
    })
}

/// Reconcile a chronological event stream into non-overlapping delivery records
///
/// Input must be in [`sort_for_reconciliation`] order and every record must end at or after
/// it starts; violations are rejected with [`Error::Precondition`] before any
/// processing. The output is sorted in reconciliation order and has missing
/// `delivered_units` resolved for every immutable record.
pub fn reconcile(doses: &[DoseEntry]) -> Result<Vec<DoseEntry>> {
    validate_input(doses)?;

    let state = doses
        .iter()
        .fold(Reconciliation::default(), |state, dose| state.step(dose));
    let mut reconciled = state.finish();

    sort_for_reconciliation(&mut reconciled);

    tracing::debug!(
        "Reconciled {} events into {} records",
        doses.len(),
        reconciled.len()
    );

    Ok(reconciled
        .into_iter()
        .map(DoseEntry::resolving_delivery)
        .collect())
}

fn validate_input(doses: &[DoseEntry]) -> Result<()> {
    for (index, dose) in doses.iter().enumerate() {
        if dose.end_date < dose.start_date {
            return Err(Error::Precondition(format!(
                "{:?} at index {} ends ({}) before it starts ({})",
                dose.dose_type, index, dose.end_date, dose.start_date
            )));
        }
    }

    if let Some(index) = doses
        .windows(2)
        .position(|pair| compare_for_reconciliation(&pair[0], &pair[1]) == Ordering::Greater)
    {
        return Err(Error::Precondition(format!(
            "events out of order at index {}: {:?} at {} follows {:?} at {}",
            index + 1,
            doses[index + 1].dose_type,
            doses[index + 1].start_date,
            doses[index].dose_type,
            doses[index].start_date
        )));
    }

    Ok(())
}

/// Fold accumulator: emitted records plus the two open cursors
#[derive(Default)]
struct Reconciliation {
    output: Vec<DoseEntry>,
    last_basal: Option<DoseEntry>,
    last_suspend: Option<DoseEntry>,
}

impl Reconciliation {
    fn step(mut self, dose: &DoseEntry) -> Self {
        match dose.dose_type {
            DoseType::Bolus => self.output.push(dose.clone()),
            DoseType::Basal | DoseType::TempBasal => self.on_basal(dose),
            DoseType::Resume => self.on_resume(dose),
            DoseType::Suspend => self.on_suspend(dose),
        }
        self
    }

    fn on_basal(&mut self, dose: &DoseEntry) {
        match self.last_suspend.take() {
            None => {
                if let Some(last) = self.last_basal.take() {
                    self.emit_trimmed(&last, dose);
                }
            }
            Some(suspend) if dose.dose_type == DoseType::TempBasal => {
                // A temp basal issued while suspended implies the pump resumed
                tracing::debug!(
                    "Temp basal at {} closes suspend from {} without a resume",
                    dose.start_date,
                    suspend.start_date
                );
                self.output.push(closed_suspend(&suspend, dose));
            }
            Some(suspend) => self.last_suspend = Some(suspend),
        }

        self.last_basal = Some(dose.clone());
    }

    fn on_resume(&mut self, resume: &DoseEntry) {
        let Some(suspend) = self.last_suspend.take() else {
            tracing::debug!("Ignoring resume at {} with no pending suspend", resume.start_date);
            return;
        };

        self.output.push(closed_suspend(&suspend, resume));

        if let Some(last) = self.last_basal.take() {
            if last.end_date > resume.end_date {
                // The resume's identifier is used; the original basal was already emitted
                let mut reopened = last.trimmed(Some(resume.end_date), None);
                reopened.sync_identifier = resume.sync_identifier.clone();
                self.last_basal = Some(reopened);
            }
        }
    }

    fn on_suspend(&mut self, suspend: &DoseEntry) {
        if let Some(pending) = self.last_suspend.take() {
            // Basal delivery was already cut off by the pending suspend
            tracing::debug!(
                "Suspend at {} closes earlier suspend from {}",
                suspend.start_date,
                pending.start_date
            );
            self.output.push(closed_suspend(&pending, suspend));
        } else if let Some(last) = self.last_basal.take() {
            self.emit_trimmed(&last, suspend);
            if last.end_date > suspend.start_date {
                self.last_basal = Some(last);
            }
        }

        if suspend.end_date > suspend.start_date {
            // Already paired with its resume, as in previously reconciled output
            self.output.push(suspend.clone());
            if let Some(last) = self.last_basal.take() {
                if last.end_date > suspend.end_date {
                    self.last_basal = Some(last.trimmed(Some(suspend.end_date), None));
                }
            }
        } else {
            self.last_suspend = Some(suspend.clone());
        }
    }

    /// Emit `last` cut off at `next`'s start, dropping zero-length results
    fn emit_trimmed(&mut self, last: &DoseEntry, next: &DoseEntry) {
        let end = last.end_date.min(next.start_date);
        if end > last.start_date {
            self.output.push(last.trimmed(None, Some(end)));
        } else {
            tracing::debug!(
                "Dropping zero-duration {:?} at {}",
                last.dose_type,
                last.start_date
            );
        }
    }

    fn finish(mut self) -> Vec<DoseEntry> {
        if let Some(suspend) = self.last_suspend {
            let mut open = suspend;
            open.end_date = open.start_date;
            open.is_mutable = true;
            self.output.push(open);
        } else if let Some(last) = self.last_basal {
            if last.end_date > last.start_date {
                self.output.push(last);
            }
        }
        self.output
    }
}

/// A suspend record running from its own start until `until` begins
fn closed_suspend(suspend: &DoseEntry, until: &DoseEntry) -> DoseEntry {
    DoseEntry {
        end_date: until.start_date,
        description: suspend
            .description
            .clone()
            .or_else(|| until.description.clone()),
        ..suspend.clone()
    }
}
