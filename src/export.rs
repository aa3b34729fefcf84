//! Writers for analysis results.

use anyhow::{anyhow, Result};
use serde::Serialize;
use std::io::Write;
use std::str::FromStr;

use crate::analysis::{AngleStress, ContributionShare};
use crate::job::Aggregate;

/// Output format of the results file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExportFormat {
    #[default]
    Json,
    Csv,
}

impl FromStr for ExportFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "csv" => Ok(ExportFormat::Csv),
            other => Err(anyhow!("format must be json or csv, got {}", other)),
        }
    }
}

/// Post-processed view of an aggregate.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Summary {
    MaxDamageAngle(AngleStress),
    Contributions(Vec<ContributionShare>),
}

/// Everything one analysis run reports.
#[derive(Debug, Serialize)]
pub struct Report<'a, T: Serialize> {
    pub analysis: &'a str,
    /// Populated slots in index order.
    pub results: Vec<&'a T>,
    /// Indices of jobs that produced no result.
    pub missing: Vec<usize>,
    pub warnings: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<Summary>,
}

impl<'a, T: Serialize> Report<'a, T> {
    pub fn new(analysis: &'a str, aggregate: &'a Aggregate<T>, warnings: &'a [String]) -> Self {
        Report {
            analysis,
            results: aggregate.iter().map(|(_, value)| value).collect(),
            missing: aggregate.missing(),
            warnings,
            summary: None,
        }
    }

    pub fn with_summary(mut self, summary: Summary) -> Self {
        self.summary = Some(summary);
        self
    }
}

/// Writes `report` in `format`.
///
/// JSON carries the whole report. CSV carries one row per populated result,
/// with a header taken from the result's field names.
pub fn write_report<W: Write, T: Serialize>(format: ExportFormat, writer: W, report: &Report<T>) -> Result<()> {
    match format {
        ExportFormat::Json => write_json(writer, report),
        ExportFormat::Csv => write_csv(writer, &report.results),
    }
}

fn write_json<W: Write, T: Serialize>(mut writer: W, report: &Report<T>) -> Result<()> {
    serde_json::to_writer_pretty(&mut writer, report)?;
    writeln!(writer)?;
    writer.flush()?;
    Ok(())
}

fn write_csv<W: Write, T: Serialize>(writer: W, rows: &[&T]) -> Result<()> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    for row in rows {
        csv_writer.serialize(row)?;
    }
    csv_writer.flush()?;
    Ok(())
}
