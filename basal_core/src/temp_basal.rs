//! Deciding whether a temp basal recommendation needs to reach the pump.
//!
//! A candidate recommendation is filtered down to the command (if any) that
//! should actually be sent. Asking for the scheduled rate while a temp basal
//! runs becomes a cancel.

use crate::{DoseEntry, DoseType, TempBasalRecommendation};
use chrono::{DateTime, Duration, Utc};

/// Rates closer than this are the same rate
pub const RATE_EPSILON: f64 = f64::EPSILON;

/// Default remaining time below which a matching temp basal is re-issued
pub fn default_continuation_interval() -> Duration {
    Duration::minutes(11)
}

/// Pump state the recommendation is evaluated against
#[derive(Clone, Debug)]
pub struct DeliveryContext<'a> {
    pub now: DateTime<Utc>,
    pub scheduled_basal_rate: f64,
    pub last_temp_basal: Option<&'a DoseEntry>,
    pub continuation_interval: Duration,
    /// False when the pump is known to be running a different schedule
    pub scheduled_rate_matches_pump: bool,
}

impl<'a> DeliveryContext<'a> {
    pub fn new(now: DateTime<Utc>, scheduled_basal_rate: f64) -> Self {
        Self {
            now,
            scheduled_basal_rate,
            last_temp_basal: None,
            continuation_interval: default_continuation_interval(),
            scheduled_rate_matches_pump: true,
        }
    }

    pub fn with_last_temp_basal(mut self, dose: Option<&'a DoseEntry>) -> Self {
        self.last_temp_basal = dose;
        self
    }

    pub fn with_continuation_interval(mut self, interval: Duration) -> Self {
        self.continuation_interval = interval;
        self
    }

    /// Temp basal still running at `now`, if any
    fn active_temp_basal(&self) -> Option<&'a DoseEntry> {
        self.last_temp_basal
            .filter(|d| d.dose_type == DoseType::TempBasal && d.end_date > self.now)
    }
}

impl TempBasalRecommendation {
    pub fn matches_rate(&self, rate: f64) -> bool {
        (rate - self.units_per_hour).abs() < RATE_EPSILON
    }

    /// The command to send for this recommendation, or `None` if nothing should change
    ///
    /// A cancel is returned when a temp basal is running and the candidate
    /// asks for the scheduled rate.
    pub fn if_necessary(&self, ctx: &DeliveryContext<'_>) -> Option<TempBasalRecommendation> {
        let matches_schedule =
            ctx.scheduled_rate_matches_pump && self.matches_rate(ctx.scheduled_basal_rate);

        if let Some(active) = ctx.active_temp_basal() {
            let remaining = active.end_date - ctx.now;
            if self.matches_rate(active.units_per_hour()) && remaining > ctx.continuation_interval {
                tracing::debug!(
                    "Temp basal at {} U/hr continues for {} min; no command",
                    self.units_per_hour,
                    remaining.num_minutes()
                );
                return None;
            }
            if matches_schedule {
                tracing::debug!("Recommendation matches scheduled rate; cancelling temp basal");
                return Some(TempBasalRecommendation::cancel());
            }
        } else if matches_schedule {
            tracing::debug!("Scheduled basal already running; no command");
            return None;
        }

        Some(*self)
    }
}
