//! A module for loading and validating the configuration of an equivalent stress analysis run.

use serde::Deserialize;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use crate::analysis::AnalysisType;
use crate::backend::{InbuiltBackend, OmissionStep, SafeBackend};
use crate::command::CommandLine;
use crate::job::{JobInput, OmissionPolicy};
use crate::material::FatigueMaterial;
use crate::orchestrator::{AnalysisRequest, BackendChoice};
use crate::template::{MaterialTemplate, TemplateSyntax};

/// Placeholders the deck writers are given for every job.
const DECK_WRITER_PLACEHOLDERS: &[&str] = &["sth", "fls", "validity", "mode", "job"];
/// Placeholders the engines are given for every job.
const ENGINE_PLACEHOLDERS: &[&str] = &["deck", "sigma", "job"];
/// Placeholders the omission tool is given for every job.
const OMISSION_PLACEHOLDERS: &[&str] = &["input", "level"];

/// Represents an error that can occur during validation of configuration data.
#[derive(Debug)]
pub struct ValidationError {
    message: String,
}

impl ValidationError {
    /// Creates a new `ValidationError` with a given message.
    ///
    /// # Arguments
    ///
    /// * `message` - A description of the error.
    pub fn new(message: &str) -> ValidationError {
        ValidationError {
            message: message.to_owned(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ValidationError {}

/// Represents the configuration of an analysis run.
#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub pool: PoolConfig,
    pub engine: EngineConfig,
    pub analysis: AnalysisConfig,
}

impl Config {
    /// Validates the entire configuration.
    ///
    /// This method checks the validity of each section and the requirements
    /// one section places on another.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.pool.validate()?;
        self.engine.validate()?;
        self.analysis.validate()?;
        self.validate_analysis_against_engine()?;
        Ok(())
    }

    /// Validates that the engine section provides what the analysis asks for.
    fn validate_analysis_against_engine(&self) -> Result<(), ValidationError> {
        if self.analysis.backend == BackendChoice::Safe
            && self.engine.safe.is_none()
            && !self.engine.fallback_to_inbuilt
        {
            return Err(ValidationError::new(
                "analysis.backend is safe but engine.safe is not configured and fallback_to_inbuilt is off",
            ));
        }
        if self.analysis.omission.is_active() && self.engine.omission.is_none() {
            return Err(ValidationError::new(
                "analysis.omission is enabled but engine.omission is not configured",
            ));
        }
        Ok(())
    }
}

/// Size of the worker pool shared by every job.
#[derive(Debug, Deserialize, Default)]
pub struct PoolConfig {
    /// Number of worker threads. 0 means one per available CPU.
    #[serde(default)]
    pub threads: usize,
}

impl PoolConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.threads > 1024 {
            return Err(ValidationError::new(&format!(
                "pool.threads must be at most 1024, got {}",
                self.threads
            )));
        }
        Ok(())
    }
}

/// Represents the external engines and where they work.
///
/// The inbuilt engine is always required. The SAFE engine and the omission
/// tool are optional.
#[derive(Debug, Deserialize)]
pub struct EngineConfig {
    /// Private working directory of the run. Each job works in its own subdirectory.
    pub working_directory: PathBuf,
    /// Keep the subdirectories of failed jobs for inspection.
    #[serde(default)]
    pub keep_failed_outputs: bool,
    /// Run SAFE requests on the inbuilt engine when SAFE is not configured.
    #[serde(default)]
    pub fallback_to_inbuilt: bool,
    pub omission: Option<CommandLine>,
    pub inbuilt: InbuiltEngine,
    pub safe: Option<SafeEngine>,
}

impl EngineConfig {
    /// Validates the `EngineConfig` and each configured engine.
    ///
    /// # Returns
    ///
    /// Returns `Ok(())` if the working directory is set and every command only
    /// uses placeholders it will be given.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.working_directory.as_os_str().is_empty() {
            return Err(ValidationError::new("engine.working_directory must not be empty"));
        }
        if let Some(omission) = &self.omission {
            validate_command("engine.omission", omission, OMISSION_PLACEHOLDERS)?;
        }
        self.inbuilt.validate()?;
        if let Some(safe) = &self.safe {
            safe.validate()?;
        }
        Ok(())
    }

    pub fn omission_step(&self) -> Option<OmissionStep> {
        self.omission.clone().map(OmissionStep::new)
    }
}

/// The locally installed engine.
#[derive(Debug, Deserialize)]
pub struct InbuiltEngine {
    /// Material template, written with double-quoted directives.
    pub template: PathBuf,
    pub deck_writer: CommandLine,
    pub engine: CommandLine,
    /// Engine without a limit on peaks per typical flight.
    pub extended_engine: Option<CommandLine>,
}

impl InbuiltEngine {
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_template("engine.inbuilt.template", &self.template)?;
        validate_command("engine.inbuilt.deck_writer", &self.deck_writer, DECK_WRITER_PLACEHOLDERS)?;
        validate_command("engine.inbuilt.engine", &self.engine, ENGINE_PLACEHOLDERS)?;
        if let Some(extended) = &self.extended_engine {
            validate_command("engine.inbuilt.extended_engine", extended, ENGINE_PLACEHOLDERS)?;
        }
        Ok(())
    }

    pub fn backend(&self) -> InbuiltBackend {
        InbuiltBackend::new(
            MaterialTemplate::new(&self.template, TemplateSyntax::DoubleQuoted),
            self.deck_writer.clone(),
            self.engine.clone(),
            self.extended_engine.clone(),
        )
    }
}

/// The SAFE engine.
#[derive(Debug, Deserialize)]
pub struct SafeEngine {
    /// Material template, written with single-quoted directives.
    pub template: PathBuf,
    pub deck_writer: CommandLine,
    pub engine: CommandLine,
}

impl SafeEngine {
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_template("engine.safe.template", &self.template)?;
        validate_command("engine.safe.deck_writer", &self.deck_writer, DECK_WRITER_PLACEHOLDERS)?;
        validate_command("engine.safe.engine", &self.engine, ENGINE_PLACEHOLDERS)?;
        Ok(())
    }

    pub fn backend(&self) -> SafeBackend {
        SafeBackend::new(
            MaterialTemplate::new(&self.template, TemplateSyntax::SingleQuoted),
            self.deck_writer.clone(),
            self.engine.clone(),
        )
    }
}

/// Represents the analysis to run and its inputs.
#[derive(Debug, Deserialize)]
pub struct AnalysisConfig {
    pub kind: AnalysisType,
    #[serde(default)]
    pub backend: BackendChoice,
    pub material: FatigueMaterial,
    #[serde(default)]
    pub omission: OmissionPolicy,
    /// Peaks per typical flight of the spectrum.
    #[serde(default)]
    pub peaks_per_flight: usize,
    /// Spectrum validity in flights.
    pub validity: u32,
    pub flight_file: PathBuf,
    /// One entry per job. Angles for a damage angle analysis, contribution names
    /// (starting with `full`) for a damage contribution analysis.
    pub inputs: Vec<JobInput>,
}

impl AnalysisConfig {
    /// Validates the `AnalysisConfig`.
    ///
    /// Label rules specific to the analysis kind are checked when the request
    /// is run, together with the existence of the input files.
    ///
    /// # Examples
    ///
    /// ```
    /// use fatigue_esa::config::AnalysisConfig;
    ///
    /// let yaml = "
    /// kind: damage_angle
    /// material: { name: 2024-T3, p: 3.1, q: -2.0, m: 0.5 }
    /// validity: 100
    /// flight_file: spectrum.fls
    /// inputs:
    ///   - { label: 0, file: angle_0.sth }
    /// ";
    /// let analysis: AnalysisConfig = serde_yaml::from_str(yaml).unwrap();
    /// assert!(analysis.validate().is_ok());
    /// ```
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.inputs.is_empty() {
            return Err(ValidationError::new("analysis.inputs must not be empty"));
        }
        if self.validity == 0 {
            return Err(ValidationError::new("analysis.validity must be greater than 0"));
        }
        if self.omission.apply && !(self.omission.level.is_finite() && self.omission.level >= 0.0) {
            return Err(ValidationError::new(&format!(
                "analysis.omission.level must be a non-negative number, got {}",
                self.omission.level
            )));
        }
        self.material
            .validate()
            .map_err(|e| ValidationError::new(&format!("analysis.material: {}", e)))?;
        Ok(())
    }

    pub fn request(&self) -> AnalysisRequest {
        AnalysisRequest {
            inputs: self.inputs.clone(),
            material: self.material.clone(),
            backend: self.backend,
            omission: self.omission,
            peaks_per_flight: self.peaks_per_flight,
            flight_file: self.flight_file.clone(),
            validity: self.validity,
        }
    }
}

fn validate_template(field: &str, template: &Path) -> Result<(), ValidationError> {
    if template.as_os_str().is_empty() {
        return Err(ValidationError::new(&format!("{} must not be empty", field)));
    }
    Ok(())
}

fn validate_command(field: &str, command: &CommandLine, allowed: &[&str]) -> Result<(), ValidationError> {
    if command.program.as_os_str().is_empty() {
        return Err(ValidationError::new(&format!("{}.program must not be empty", field)));
    }
    match command
        .placeholders()
        .into_iter()
        .find(|name| !allowed.contains(&name.as_str()))
    {
        Some(name) => Err(ValidationError::new(&format!(
            "{} uses unknown placeholder {{{}}}, expected one of {:?}",
            field, name, allowed
        ))),
        None => Ok(()),
    }
}

/// Loads the configuration from a YAML or TOML file.
///
/// Files ending in `.toml` are read as TOML, anything else as YAML.
///
/// # Arguments
///
/// * `config_path` - A path reference to the configuration file.
///
/// # Errors
///
/// This function will return an error if reading or parsing the configuration file fails.
pub fn load_config<P: AsRef<Path>>(config_path: P) -> Result<Config, Box<dyn std::error::Error>> {
    let path = config_path.as_ref();
    let content = fs::read_to_string(path)?;
    let config: Config = match path.extension().and_then(|ext| ext.to_str()) {
        Some("toml") => toml::from_str(&content)?,
        _ => serde_yaml::from_str(&content)?,
    };
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobLabel;

    const YAML: &str = r#"
pool:
  threads: 4
engine:
  working_directory: /tmp/esa
  keep_failed_outputs: true
  omission:
    program: omission
    args: ["{input}", "{level}"]
  inbuilt:
    template: templates/material.mat
    deck_writer:
      program: perl
      args: [writeSigmaFile.pl, "{sth}", "{fls}", "{validity}", "{mode}"]
    engine:
      program: spectre_proto_CG_linux
      args: ["{deck}"]
    extended_engine:
      program: spectre_proto_CG_extended_linux
      args: ["{deck}"]
  safe:
    template: templates/materialServer.mat
    deck_writer:
      program: perl
      args: [writeSigmaFileServer.pl, "{sth}", "{fls}", "{validity}", "{mode}"]
    engine:
      program: safe
      args: ["{deck}"]
analysis:
  kind: damage_contribution
  backend: safe
  material: { name: 2024-T351, p: 3.1, q: -2.0, m: 0.5 }
  omission: { apply: true, level: 2.5 }
  peaks_per_flight: 1200
  validity: 5000
  flight_file: spectrum.fls
  inputs:
    - { label: full, file: full.sth }
    - { label: gust, file: gust.sth }
"#;

    const TOML: &str = r#"
[engine]
working_directory = "/tmp/esa"

[engine.inbuilt]
template = "material.mat"
deck_writer = { program = "perl", args = ["writeSigmaFile.pl", "{sth}", "{fls}", "{validity}", "{mode}"] }
engine = { program = "spectre", args = ["{deck}"] }

[analysis]
kind = "damage_angle"
material = { name = "7075", p = 4.0, q = -1.5, m = 0.6 }
validity = 100
flight_file = "spectrum.fls"
inputs = [
    { label = 0, file = "angle_0.sth" },
    { label = 45, file = "angle_45.sth" },
]
"#;

    #[test]
    fn test_load_yaml_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(&path, YAML).unwrap();

        let config = load_config(&path).expect("Failed to load config");
        assert!(config.validate().is_ok(), "Expected Ok(()) but got Err with {:?}", config.validate());
        assert_eq!(config.pool.threads, 4);
        assert!(config.engine.omission_step().is_some());
        assert_eq!(config.analysis.kind, AnalysisType::DamageContribution);

        let request = config.analysis.request();
        assert_eq!(request.backend, BackendChoice::Safe);
        assert!(request.inputs[0].label.is_full());
        assert_eq!(request.inputs[1].label, JobLabel::Contribution("gust".into()));
        assert!(request.omission.is_active());
    }

    #[test]
    fn test_load_toml_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, TOML).unwrap();

        let config = load_config(&path).expect("Failed to load config");
        assert!(config.validate().is_ok(), "Expected Ok(()) but got Err with {:?}", config.validate());
        assert_eq!(config.pool.threads, 0);
        assert_eq!(config.analysis.backend, BackendChoice::Inbuilt);
        assert_eq!(config.analysis.inputs[1].label, JobLabel::Angle(45));
        assert!(config.engine.safe.is_none());
    }

    #[test]
    fn test_cross_section_validation() {
        let mut config: Config = serde_yaml::from_str(YAML).unwrap();
        config.engine.safe = None;
        assert!(config.validate().is_err());
        config.engine.fallback_to_inbuilt = true;
        assert!(config.validate().is_ok());

        config.engine.omission = None;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("engine.omission"));
    }

    #[test]
    fn test_unknown_placeholder_is_rejected() {
        let mut config: Config = serde_yaml::from_str(YAML).unwrap();
        config.engine.inbuilt.engine.args.push("{flight}".into());
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("{flight}"));
    }

    #[test]
    fn test_analysis_validation() {
        let mut config: Config = serde_yaml::from_str(MINIMAL_YAML).unwrap();
        assert!(config.analysis.validate().is_ok());
        config.analysis.validity = 0;
        assert!(config.analysis.validate().is_err());
        config.analysis.validity = 1;
        config.analysis.omission = OmissionPolicy::at(f64::NAN);
        assert!(config.analysis.validate().is_err());
        config.analysis.omission = OmissionPolicy::disabled();
        config.analysis.inputs.clear();
        assert!(config.analysis.validate().is_err());
    }

    const MINIMAL_YAML: &str = r#"
engine:
  working_directory: work
  inbuilt:
    template: material.mat
    deck_writer: { program: perl }
    engine: { program: spectre }
analysis:
  kind: damage_angle
  material: { name: "7075", p: 4.0, q: -1.5, m: 0.6 }
  validity: 100
  flight_file: spectrum.fls
  inputs: [{ label: 0, file: angle_0.sth }]
"#;
}
