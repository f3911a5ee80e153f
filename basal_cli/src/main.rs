mod event_log;
mod export;

use basal_core::*;
use chrono::{DateTime, Duration, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use event_log::{read_json, read_records, JsonlSink};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "basal")]
#[command(about = "Insulin delivery reconciliation and temp basal scheduling", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Override data directory
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Use this config file instead of the default location
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Json,
    Csv,
}

#[derive(Clone, Copy, ValueEnum)]
enum ScheduleKind {
    Basal,
    Sensitivity,
    CarbRatio,
    Target,
}

#[derive(Subcommand)]
enum Commands {
    /// Reconcile pump events into a non-overlapping timeline
    Reconcile {
        /// JSONL event log (defaults to <data-dir>/events.jsonl)
        #[arg(long)]
        events: Option<PathBuf>,

        /// Trim output to start at this time
        #[arg(long)]
        start: Option<DateTime<Utc>>,

        /// Trim output to end at this time
        #[arg(long)]
        end: Option<DateTime<Utc>>,

        #[arg(long, value_enum, default_value = "json")]
        format: Format,
    },

    /// Check whether reservoir readings can be trusted over a window
    Continuity {
        /// JSONL reservoir readings
        #[arg(long)]
        readings: PathBuf,

        #[arg(long)]
        start: Option<DateTime<Utc>>,

        #[arg(long)]
        end: DateTime<Utc>,

        /// Time of the most recent prime event
        #[arg(long)]
        prime: Option<DateTime<Utc>>,
    },

    /// Derive doses from reservoir volume drops
    ReservoirDoses {
        /// JSONL reservoir readings
        #[arg(long)]
        readings: PathBuf,

        #[arg(long, value_enum, default_value = "json")]
        format: Format,
    },

    /// Reconcile events and fill gaps with the scheduled basal rate
    Overlay {
        /// JSONL event log (defaults to <data-dir>/events.jsonl)
        #[arg(long)]
        events: Option<PathBuf>,

        /// JSON array of basal schedule segments
        #[arg(long)]
        schedule: PathBuf,

        /// Fill through this time
        #[arg(long)]
        end: Option<DateTime<Utc>>,

        /// Synthetic records ending at or after this stay mutable
        #[arg(long)]
        last_reconciled: Option<DateTime<Utc>>,

        #[arg(long, value_enum, default_value = "json")]
        format: Format,
    },

    /// Decide whether a temp basal recommendation must be sent
    TempBasal {
        /// Recommended rate in U/hr
        #[arg(long)]
        rate: f64,

        /// Recommended duration in minutes
        #[arg(long, default_value_t = 30, value_parser = clap::value_parser!(i64).range(0..=1440))]
        minutes: i64,

        /// Scheduled basal rate in U/hr
        #[arg(long)]
        scheduled_rate: f64,

        /// JSONL event log used to find the running temp basal
        #[arg(long)]
        events: Option<PathBuf>,

        /// Evaluation time (defaults to now)
        #[arg(long)]
        now: Option<DateTime<Utc>>,
    },

    /// Apply temporary overrides to a therapy schedule
    Overrides {
        /// JSON array of schedule segments
        #[arg(long)]
        schedule: PathBuf,

        /// JSON array of overrides
        #[arg(long)]
        overrides: PathBuf,

        #[arg(long, value_enum)]
        kind: ScheduleKind,

        /// Reference time for target overrides (defaults to now)
        #[arg(long)]
        now: Option<DateTime<Utc>>,
    },

    /// Record a manually entered bolus in the event log
    LogBolus {
        /// Units delivered
        #[arg(long)]
        units: f64,

        /// Delivery time (defaults to now)
        #[arg(long)]
        at: Option<DateTime<Utc>>,
    },
}

fn main() -> Result<()> {
    basal_core::logging::init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    let data_dir = cli.data_dir.unwrap_or_else(|| config.data.data_dir.clone());
    let default_log = data_dir.join("events.jsonl");

    match cli.command {
        Commands::Reconcile {
            events,
            start,
            end,
            format,
        } => cmd_reconcile(&events.unwrap_or(default_log), start, end, format),
        Commands::Continuity {
            readings,
            start,
            end,
            prime,
        } => cmd_continuity(&readings, start, end, prime, &config),
        Commands::ReservoirDoses { readings, format } => cmd_reservoir_doses(&readings, format),
        Commands::Overlay {
            events,
            schedule,
            end,
            last_reconciled,
            format,
        } => {
            let mut options = config.overlay_options();
            options.end_date = end;
            options.last_reconciled = last_reconciled;
            cmd_overlay(&events.unwrap_or(default_log), &schedule, &options, format)
        }
        Commands::TempBasal {
            rate,
            minutes,
            scheduled_rate,
            events,
            now,
        } => {
            let recommendation = TempBasalRecommendation::new(rate, Duration::minutes(minutes));
            cmd_temp_basal(
                recommendation,
                scheduled_rate,
                &events.unwrap_or(default_log),
                now.unwrap_or_else(Utc::now),
                &config,
            )
        }
        Commands::Overrides {
            schedule,
            overrides,
            kind,
            now,
        } => cmd_overrides(&schedule, &overrides, kind, now.unwrap_or_else(Utc::now)),
        Commands::LogBolus { units, at } => cmd_log_bolus(&default_log, units, at.unwrap_or_else(Utc::now)),
    }
}

/// Load, order and reconcile the event log
fn load_reconciled(events: &Path) -> Result<Vec<DoseEntry>> {
    let mut doses: Vec<DoseEntry> = read_records(events)?;
    sort_for_reconciliation(&mut doses);
    reconcile(&doses)
}

fn print_doses(doses: &[DoseEntry], format: Format) -> Result<()> {
    let stdout = std::io::stdout().lock();
    match format {
        Format::Json => export::write_jsonl(doses, stdout),
        Format::Csv => export::write_csv(doses, stdout),
    }
}

fn cmd_reconcile(
    events: &Path,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    format: Format,
) -> Result<()> {
    let mut reconciled = load_reconciled(events)?;
    if start.is_some() || end.is_some() {
        reconciled = clamp_to_window(&reconciled, start, end);
    }

    tracing::info!(
        "Reconciled {} records, {:.3} U delivered",
        reconciled.len(),
        total_delivered_units(&reconciled)
    );
    print_doses(&reconciled, format)
}

fn cmd_continuity(
    readings: &Path,
    start: Option<DateTime<Utc>>,
    end: DateTime<Utc>,
    prime: Option<DateTime<Utc>>,
    config: &Config,
) -> Result<()> {
    let mut readings: Vec<ReservoirReading> = read_records(readings)?;
    readings.sort_by_key(|r| r.timestamp);

    let window = config.continuity_window(start, end).with_last_prime(prime);
    let verdict = check_continuity(&readings, &window);

    if verdict.is_continuous {
        println!("continuous");
    } else {
        println!("not continuous");
    }
    if let Some(last) = verdict.last_known {
        println!(
            "last reading: {:.2} U at {}",
            last.remaining_units,
            last.timestamp.to_rfc3339()
        );
    }
    Ok(())
}

fn cmd_reservoir_doses(readings: &Path, format: Format) -> Result<()> {
    let mut readings: Vec<ReservoirReading> = read_records(readings)?;
    readings.sort_by_key(|r| r.timestamp);

    print_doses(&doses_from_readings(&readings), format)
}

fn cmd_overlay(
    events: &Path,
    schedule: &Path,
    options: &OverlayOptions,
    format: Format,
) -> Result<()> {
    let reconciled = load_reconciled(events)?;
    let basal_history: Vec<AbsoluteScheduleValue<f64>> = read_json(schedule)?;

    let overlaid = overlay_basal_schedule(&reconciled, &basal_history, options)?;
    print_doses(&overlaid, format)
}

fn cmd_temp_basal(
    recommendation: TempBasalRecommendation,
    scheduled_rate: f64,
    events: &Path,
    now: DateTime<Utc>,
    config: &Config,
) -> Result<()> {
    let reconciled = load_reconciled(events)?;
    let last_temp = reconciled
        .iter()
        .rev()
        .find(|d| d.dose_type == DoseType::TempBasal);

    let ctx = DeliveryContext::new(now, scheduled_rate)
        .with_last_temp_basal(last_temp)
        .with_continuation_interval(config.continuation_interval());

    match recommendation.if_necessary(&ctx) {
        None => println!("no command"),
        Some(command) if command.is_cancel() => println!("cancel temp basal"),
        Some(command) => println!(
            "set temp basal {:.3} U/hr for {} min",
            command.units_per_hour,
            command.duration.num_minutes()
        ),
    }
    Ok(())
}

fn cmd_overrides(
    schedule: &Path,
    overrides: &Path,
    kind: ScheduleKind,
    now: DateTime<Utc>,
) -> Result<()> {
    let overrides: Vec<TemporaryScheduleOverride> = read_json(overrides)?;

    let output = match kind {
        ScheduleKind::Target => {
            let timeline: Vec<AbsoluteScheduleValue<GlucoseRange>> = read_json(schedule)?;
            serde_json::to_string_pretty(&apply_target_override(&timeline, &overrides, now))?
        }
        ScheduleKind::Basal | ScheduleKind::Sensitivity | ScheduleKind::CarbRatio => {
            let timeline: Vec<AbsoluteScheduleValue<f64>> = read_json(schedule)?;
            let applied = match kind {
                ScheduleKind::Basal => basal_with_overrides(&timeline, &overrides),
                ScheduleKind::Sensitivity => sensitivity_with_overrides(&timeline, &overrides),
                _ => carb_ratio_with_overrides(&timeline, &overrides),
            };
            serde_json::to_string_pretty(&applied)?
        }
    };

    println!("{}", output);
    Ok(())
}

fn cmd_log_bolus(log_path: &Path, units: f64, at: DateTime<Utc>) -> Result<()> {
    if !(units > 0.0) {
        return Err(Error::Other(format!("bolus must be positive, got {}", units)));
    }

    let mut dose = DoseEntry::new(DoseType::Bolus, at, at, units, DoseUnit::Units)
        .with_sync_identifier(uuid::Uuid::new_v4().to_string());
    dose.manually_entered = true;

    let sink = JsonlSink::new(log_path);
    sink.append(&dose)?;

    println!("✓ Logged {:.2} U bolus at {}", units, at.to_rfc3339());
    Ok(())
}
