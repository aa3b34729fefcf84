//! Engine backends.
//!
//! A backend knows how to turn one job into an input deck for its external
//! engine, how to run that engine and how to read the engine's output. The
//! runner and the orchestrator are generic over [`EngineBackend`], so the two
//! analysis kinds share one implementation per backend.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::command::CommandLine;
use crate::error::EngineError;
use crate::job::{EngineCapability, JobDescriptor};
use crate::template::MaterialTemplate;

mod inbuilt;
mod safe;

pub use inbuilt::InbuiltBackend;
pub use safe::SafeBackend;

/// Numbers an engine run yields for one job.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineOutput {
    /// Fatigue equivalent stress (MPa).
    pub equivalent_stress: f64,
    /// Total damage of the sequence, when the engine reports it.
    pub total_damage: Option<f64>,
}

/// The capability interface an engine backend implements.
pub trait EngineBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Template the shared material file is rendered from.
    fn material_template(&self) -> &MaterialTemplate;

    /// Whether this backend can analyse flights of the given size. Bounded only by default.
    fn supports(&self, capability: EngineCapability) -> bool {
        capability == EngineCapability::Bounded
    }

    /// Writes the engine input deck for `job` into `work_dir`.
    ///
    /// `input_file` is the job's load data, possibly already filtered by omission.
    fn build_input_deck(&self, job: &JobDescriptor, input_file: &Path, work_dir: &Path) -> Result<PathBuf, EngineError>;

    /// Runs the engine on `deck` and returns its raw textual output.
    fn invoke_engine(&self, job: &JobDescriptor, deck: &Path, work_dir: &Path) -> Result<String, EngineError>;

    fn parse_output(&self, raw: &str) -> Result<EngineOutput, EngineError>;
}

/// Filters a job's load data with the external omission tool.
#[derive(Debug, Clone)]
pub struct OmissionStep {
    pub command: CommandLine,
}

impl OmissionStep {
    /// Extension the omission tool appends to its output file.
    pub const OUTPUT_EXTENSION: &'static str = "rfort";

    pub fn new(command: CommandLine) -> Self {
        OmissionStep { command }
    }

    /// Copies `input_file` into `work_dir`, filters it at `level` and returns the filtered file.
    pub fn apply(&self, input_file: &Path, level: f64, work_dir: &Path) -> Result<PathBuf, EngineError> {
        let copy = work_dir.join("input.sth");
        fs::copy(input_file, &copy)?;

        let mut vars = HashMap::new();
        vars.insert("input", "input.sth".to_owned());
        vars.insert("level", level.to_string());
        self.command.run(&vars, work_dir, "input.sth_omission.log")?;

        let output = work_dir.join(format!("input.sth.{}", Self::OUTPUT_EXTENSION));
        if !output.exists() {
            return Err(EngineError::new(
                "Stress sequence omission failed! See omission log file for details.",
            ));
        }
        Ok(output)
    }
}

/// Copies the job's load and flight files next to each other under `stem` and
/// runs the deck writer, which must produce `<stem>.sigma`.
pub(crate) fn write_sigma_deck(
    deck_writer: &CommandLine,
    stem: &str,
    mode: &str,
    job: &JobDescriptor,
    input_file: &Path,
    work_dir: &Path,
) -> Result<PathBuf, EngineError> {
    let sth = format!("{}.sth", stem);
    let fls = format!("{}.fls", stem);
    fs::copy(input_file, work_dir.join(&sth))?;
    fs::copy(job.flight_file.as_path(), work_dir.join(&fls))?;

    let mut vars = HashMap::new();
    vars.insert("sth", sth);
    vars.insert("fls", fls);
    vars.insert("validity", job.validity.to_string());
    vars.insert("mode", mode.to_owned());
    vars.insert("job", job.index.to_string());
    deck_writer
        .run(&vars, work_dir, "writeSigmaFile.log")
        .map_err(|e| EngineError::new(format!("Writing sigma file for {} has failed: {}", job.label, e)))?;

    let sigma = work_dir.join(format!("{}.sigma", stem));
    if !sigma.exists() {
        return Err(EngineError::new(format!(
            "Writing sigma file for {} has failed! See 'writeSigmaFile.log' file for details.",
            job.label
        )));
    }
    Ok(sigma)
}

/// Reads an engine output file, dropping bytes that are not valid UTF-8.
pub(crate) fn read_lossy(path: &Path) -> Result<String, EngineError> {
    let bytes = fs::read(path)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

pub(crate) fn parse_number(field: Option<&str>, what: &str) -> Result<f64, EngineError> {
    let field = field.map(str::trim).unwrap_or_default();
    field
        .parse::<f64>()
        .map_err(|_| EngineError::new(format!("cannot parse {} from '{}'", what, field)))
}
