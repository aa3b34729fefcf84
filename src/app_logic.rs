//! A module for the main application logic of the equivalent stress analysis tool.

use anyhow::{anyhow, Context, Result};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use crate::analysis::{AnalysisKind, AnalysisType, AngleSweep, ContributionBreakdown};
use crate::config::{load_config, Config};
use crate::context::RecordingContext;
use crate::export::{write_report, ExportFormat, Report, Summary};
use crate::job::{Aggregate, Outcome};
use crate::orchestrator::{Backends, Orchestrator};
use crate::pool::WorkerPool;

/// Loads `config_path`, runs the configured analysis and writes the results to
/// `output`, or to stdout when no output file is given.
pub fn run(config_path: &str, format: ExportFormat, output: Option<&Path>) -> Result<()> {
    info!("Running with configuration: {}", config_path);
    let config = load_config(config_path).map_err(|e| anyhow!("cannot load {}: {}", config_path, e))?;
    config.validate().context("invalid configuration")?;

    let pool = WorkerPool::new(config.pool.threads).context("cannot start the worker pool")?;
    let context = Arc::new(RecordingContext::new(&config.engine.working_directory));

    match config.analysis.kind {
        AnalysisType::DamageAngle => {
            let Some(aggregate) = execute(&config, pool, AngleSweep, &context)? else {
                return Ok(());
            };
            let warnings = context.warnings();
            let mut report = Report::new(AngleSweep.name(), &aggregate, &warnings);
            if let Some(max) = AngleSweep::max_damage_angle(&aggregate) {
                info!(angle = max.angle, stress = max.stress, "angle with maximum damage");
                report = report.with_summary(Summary::MaxDamageAngle(*max));
            }
            write_report(format, &mut open_output(output)?, &report)
        }
        AnalysisType::DamageContribution => {
            let Some(aggregate) = execute(&config, pool, ContributionBreakdown, &context)? else {
                return Ok(());
            };
            let summary = match ContributionBreakdown::percentages(&aggregate) {
                Ok(shares) => Some(Summary::Contributions(shares)),
                Err(e) => {
                    warn!("{}", e);
                    None
                }
            };
            let warnings = context.warnings();
            let mut report = Report::new(ContributionBreakdown.name(), &aggregate, &warnings);
            if let Some(summary) = summary {
                report = report.with_summary(summary);
            }
            write_report(format, &mut open_output(output)?, &report)
        }
    }
}

/// Opens the results destination. Only called once there are results to write.
fn open_output(output: Option<&Path>) -> Result<Box<dyn Write>> {
    Ok(match output {
        Some(path) => Box::new(BufWriter::new(
            File::create(path).with_context(|| format!("cannot create {}", path.display()))?,
        )),
        None => Box::new(io::stdout().lock()),
    })
}

/// Runs the analysis of `kind`. Returns `None` when it was cancelled.
fn execute<K: AnalysisKind>(
    config: &Config,
    pool: WorkerPool,
    kind: K,
    context: &Arc<RecordingContext>,
) -> Result<Option<Aggregate<K::Output>>> {
    let mut backends = Backends::new(Arc::new(config.engine.inbuilt.backend()))
        .fallback_to_inbuilt(config.engine.fallback_to_inbuilt);
    if let Some(safe) = &config.engine.safe {
        backends = backends.with_safe(Arc::new(safe.backend()));
    }

    let mut orchestrator = Orchestrator::new(pool, backends, kind, context.clone())
        .keep_failed_outputs(config.engine.keep_failed_outputs);
    if let Some(step) = config.engine.omission_step() {
        orchestrator = orchestrator.with_omission(step);
    }

    match orchestrator.run(config.analysis.request())? {
        Outcome::Completed(aggregate) => {
            if !aggregate.missing().is_empty() {
                warn!(missing = ?aggregate.missing(), "some sub-analyses produced no result");
            }
            Ok(Some(aggregate))
        }
        Outcome::Cancelled => {
            info!("analysis was cancelled, no results are written");
            Ok(None)
        }
    }
}
