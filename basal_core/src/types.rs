//! Core domain types for insulin delivery reconciliation.
//!
//! This module defines the fundamental types used throughout the system:
//! - Dose records and their kinds
//! - Reservoir readings
//! - Absolute-time schedule segments
//! - Temp basal recommendations
//! - Temporary schedule overrides

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Dose Types
// ============================================================================

/// Kind of insulin delivery event
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DoseType {
    Basal,
    TempBasal,
    Bolus,
    Suspend,
    Resume,
}

impl DoseType {
    /// Ordering rank for events sharing a start time.
    ///
    /// `basal < bolus < resume < suspend < temp_basal`
    pub fn tie_break_rank(self) -> u8 {
        match self {
            DoseType::Basal => 0,
            DoseType::Bolus => 1,
            DoseType::Resume => 2,
            DoseType::Suspend => 3,
            DoseType::TempBasal => 4,
        }
    }

    /// Basal and temp basal records both describe a delivery rate over time
    pub fn is_basal_like(self) -> bool {
        matches!(self, DoseType::Basal | DoseType::TempBasal)
    }
}

/// Unit of a dose's programmed value
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DoseUnit {
    UnitsPerHour,
    Units,
}

/// A typed interval of insulin delivery
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct DoseEntry {
    #[serde(rename = "type")]
    pub dose_type: DoseType,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub value: f64,
    pub unit: DoseUnit,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivered_units: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_basal_rate: Option<f64>,
    #[serde(default)]
    pub is_mutable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_identifier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub automatic: Option<bool>,
    #[serde(default)]
    pub manually_entered: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl DoseEntry {
    /// Build an immutable dose with no delivery or identity annotations
    pub fn new(
        dose_type: DoseType,
        start_date: DateTime<Utc>,
        end_date: DateTime<Utc>,
        value: f64,
        unit: DoseUnit,
    ) -> Self {
        Self {
            dose_type,
            start_date,
            end_date,
            value,
            unit,
            delivered_units: None,
            scheduled_basal_rate: None,
            is_mutable: false,
            sync_identifier: None,
            automatic: None,
            manually_entered: false,
            description: None,
        }
    }

    pub fn with_sync_identifier(mut self, id: impl Into<String>) -> Self {
        self.sync_identifier = Some(id.into());
        self
    }

    pub fn with_delivered_units(mut self, units: f64) -> Self {
        self.delivered_units = Some(units);
        self
    }

    pub fn mutable(mut self) -> Self {
        self.is_mutable = true;
        self
    }

    pub fn duration(&self) -> Duration {
        self.end_date - self.start_date
    }

    /// Interval length in fractional hours
    pub fn hours(&self) -> f64 {
        seconds(self.duration()) / 3600.0
    }

    /// An open-ended record has no known end yet: zero length and still mutable
    pub fn is_open_ended(&self) -> bool {
        self.is_mutable && self.end_date == self.start_date
    }

    /// Units the pump was asked to deliver over this record's interval
    pub fn programmed_units(&self) -> f64 {
        match self.unit {
            DoseUnit::Units => self.value,
            DoseUnit::UnitsPerHour => self.value * self.hours(),
        }
    }

    /// Delivered units if known, otherwise the programmed amount
    pub fn units(&self) -> f64 {
        self.delivered_units.unwrap_or_else(|| self.programmed_units())
    }

    /// Average delivery rate across the interval
    pub fn units_per_hour(&self) -> f64 {
        match self.unit {
            DoseUnit::UnitsPerHour => self.value,
            DoseUnit::Units => {
                let hours = self.hours();
                if hours > 0.0 {
                    self.value / hours
                } else {
                    0.0
                }
            }
        }
    }

    /// Delivery above (or below) the scheduled basal rate for this interval
    ///
    /// Returns `None` for boluses and records without a scheduled rate.
    pub fn net_basal_units(&self) -> Option<f64> {
        if self.dose_type == DoseType::Bolus {
            return None;
        }
        let scheduled = self.scheduled_basal_rate? * self.hours();
        Some(self.units() - scheduled)
    }
}

/// Duration in fractional seconds
pub(crate) fn seconds(d: Duration) -> f64 {
    d.num_milliseconds() as f64 / 1000.0
}

// ============================================================================
// Reservoir Types
// ============================================================================

/// A timestamped measurement of remaining insulin in the pump reservoir
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct ReservoirReading {
    pub timestamp: DateTime<Utc>,
    pub remaining_units: f64,
}

impl ReservoirReading {
    pub fn new(timestamp: DateTime<Utc>, remaining_units: f64) -> Self {
        Self {
            timestamp,
            remaining_units,
        }
    }
}

// ============================================================================
// Schedule Types
// ============================================================================

/// One piecewise-constant segment of an absolute-time timeline
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct AbsoluteScheduleValue<T> {
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub value: T,
}

impl<T> AbsoluteScheduleValue<T> {
    pub fn new(start_date: DateTime<Utc>, end_date: DateTime<Utc>, value: T) -> Self {
        Self {
            start_date,
            end_date,
            value,
        }
    }

    pub fn duration(&self) -> Duration {
        self.end_date - self.start_date
    }
}

/// Glucose target bounds in mg/dL
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct GlucoseRange {
    pub min_value: f64,
    pub max_value: f64,
}

impl GlucoseRange {
    pub fn new(min_value: f64, max_value: f64) -> Self {
        Self {
            min_value,
            max_value,
        }
    }
}

// ============================================================================
// Temp Basal Types
// ============================================================================

/// A candidate temporary basal command
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct TempBasalRecommendation {
    pub units_per_hour: f64,
    #[serde(with = "duration_seconds")]
    pub duration: Duration,
}

impl TempBasalRecommendation {
    pub fn new(units_per_hour: f64, duration: Duration) -> Self {
        Self {
            units_per_hour,
            duration,
        }
    }

    /// A zero-rate, zero-duration command cancels any running temp basal
    pub fn cancel() -> Self {
        Self::new(0.0, Duration::zero())
    }

    pub fn is_cancel(&self) -> bool {
        self.units_per_hour == 0.0 && self.duration.is_zero()
    }
}

// ============================================================================
// Override Types
// ============================================================================

/// What prompted an override
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OverrideContext {
    PreMeal,
    LegacyWorkout,
    Preset(String),
    Custom,
}

/// Therapy parameters replaced or scaled while an override is active
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Default)]
pub struct OverrideSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_range: Option<GlucoseRange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insulin_needs_scale_factor: Option<f64>,
}

impl OverrideSettings {
    /// Scale factor to apply, `1.0` when the override leaves insulin needs alone
    pub fn effective_scale_factor(&self) -> f64 {
        self.insulin_needs_scale_factor.unwrap_or(1.0)
    }
}

/// Planned length of an override
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OverrideDuration {
    Finite {
        #[serde(with = "duration_seconds")]
        length: Duration,
    },
    Indefinite,
}

/// How an override actually finished
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", content = "at", rename_all = "snake_case")]
pub enum OverrideEnd {
    Natural,
    Early(DateTime<Utc>),
    Deleted,
}

/// A time-bounded modification to therapy settings
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TemporaryScheduleOverride {
    pub context: OverrideContext,
    pub settings: OverrideSettings,
    pub start_date: DateTime<Utc>,
    pub duration: OverrideDuration,
    #[serde(default = "natural_end")]
    pub actual_end: OverrideEnd,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_identifier: Option<String>,
}

fn natural_end() -> OverrideEnd {
    OverrideEnd::Natural
}

impl TemporaryScheduleOverride {
    /// End implied by the planned duration; `None` for indefinite overrides
    pub fn scheduled_end_date(&self) -> Option<DateTime<Utc>> {
        match self.duration {
            OverrideDuration::Finite { length } => Some(self.start_date + length),
            OverrideDuration::Indefinite => None,
        }
    }

    /// When the override actually stopped applying; `None` means it never ends
    pub fn actual_end_date(&self) -> Option<DateTime<Utc>> {
        match self.actual_end {
            OverrideEnd::Early(at) => Some(at.max(self.start_date)),
            OverrideEnd::Natural | OverrideEnd::Deleted => self.scheduled_end_date(),
        }
    }

    pub fn is_deleted(&self) -> bool {
        matches!(self.actual_end, OverrideEnd::Deleted)
    }

    /// True when the override has fully ended at or before `date`
    pub fn has_ended_by(&self, date: DateTime<Utc>) -> bool {
        self.actual_end_date().is_some_and(|end| end <= date)
    }

    pub fn is_active(&self, at: DateTime<Utc>) -> bool {
        !self.is_deleted() && self.start_date <= at && !self.has_ended_by(at)
    }
}

/// Serialize a `chrono::Duration` as whole seconds
mod duration_seconds {
    use chrono::Duration;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_i64(d.num_seconds())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = i64::deserialize(d)?;
        Ok(Duration::seconds(secs))
    }
}
