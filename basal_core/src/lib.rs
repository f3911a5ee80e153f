#![forbid(unsafe_code)]

//! Deterministic reconciliation and scheduling core for insulin delivery.
//!
//! This crate provides:
//! - Domain types (dose records, reservoir readings, schedules, overrides)
//! - Event reconciliation into a non-overlapping delivery timeline
//! - Reservoir continuity checks and reservoir-derived doses
//! - Scheduled basal overlay for timeline gaps
//! - Temp basal command filtering
//! - Override application onto therapy schedules
//!
//! Every operation is a pure function over its inputs.

pub mod types;
pub mod error;
pub mod config;
pub mod logging;
pub mod interval;
pub mod reconcile;
pub mod reservoir;
pub mod overlay;
pub mod temp_basal;
pub mod overrides;

// Re-export commonly used types
pub use error::{Error, Result};
pub use types::*;
pub use config::Config;
pub use interval::{clamp_to_window, total_delivered_units};
pub use reconcile::{reconcile, sort_for_reconciliation};
pub use reservoir::{check_continuity, doses_from_readings, is_continuous, ContinuityVerdict, ContinuityWindow};
pub use overlay::{overlay_basal_schedule, OverlayOptions};
pub use temp_basal::DeliveryContext;
pub use overrides::{
    apply_overrides, apply_target_override, basal_with_overrides, carb_ratio_with_overrides,
    merge_adjacent, sensitivity_with_overrides,
};
