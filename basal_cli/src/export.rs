//! Output formats for dose timelines.

use basal_core::{DoseEntry, DoseType, DoseUnit, Result};
use std::io::Write;

/// A row in the CSV output
#[derive(Debug, serde::Serialize)]
struct CsvRow {
    dose_type: DoseType,
    start_date: String,
    end_date: String,
    value: f64,
    unit: DoseUnit,
    delivered_units: Option<f64>,
    scheduled_basal_rate: Option<f64>,
    is_mutable: bool,
    sync_identifier: Option<String>,
}

impl From<&DoseEntry> for CsvRow {
    fn from(dose: &DoseEntry) -> Self {
        CsvRow {
            dose_type: dose.dose_type,
            start_date: dose.start_date.to_rfc3339(),
            end_date: dose.end_date.to_rfc3339(),
            value: dose.value,
            unit: dose.unit,
            delivered_units: dose.delivered_units,
            scheduled_basal_rate: dose.scheduled_basal_rate,
            is_mutable: dose.is_mutable,
            sync_identifier: dose.sync_identifier.clone(),
        }
    }
}

/// Write doses as CSV with a header row
pub fn write_csv<W: Write>(doses: &[DoseEntry], out: W) -> Result<()> {
    let mut writer = csv::WriterBuilder::new().has_headers(true).from_writer(out);
    for dose in doses {
        writer
            .serialize(CsvRow::from(dose))
            .map_err(std::io::Error::from)?;
    }
    writer.flush()?;
    Ok(())
}

/// Write doses as JSON lines
pub fn write_jsonl<W: Write>(doses: &[DoseEntry], mut out: W) -> Result<()> {
    for dose in doses {
        serde_json::to_writer(&mut out, dose)?;
        out.write_all(b"\n")?;
    }
    out.flush()?;
    Ok(())
}
