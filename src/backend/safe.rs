use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::{parse_number, read_lossy, write_sigma_deck, EngineBackend, EngineOutput};
use crate::command::CommandLine;
use crate::error::EngineError;
use crate::job::{EngineCapability, JobDescriptor};
use crate::template::MaterialTemplate;

const STEM: &str = "input";
const MODE: &str = "initiation";
const EQUIVALENT_STRESS: &str = "EQUIVALENT STRESS";
const TOTAL_DAMAGE: &str = "TOTAL DAMAGE";

/// The SAFE engine. Only handles flights within the bounded peak limit.
#[derive(Debug, Clone)]
pub struct SafeBackend {
    template: MaterialTemplate,
    deck_writer: CommandLine,
    engine: CommandLine,
}

impl SafeBackend {
    pub fn new(template: MaterialTemplate, deck_writer: CommandLine, engine: CommandLine) -> Self {
        SafeBackend {
            template,
            deck_writer,
            engine,
        }
    }
}

impl EngineBackend for SafeBackend {
    fn name(&self) -> &str {
        "safe"
    }

    fn material_template(&self) -> &MaterialTemplate {
        &self.template
    }

    fn build_input_deck(&self, job: &JobDescriptor, input_file: &Path, work_dir: &Path) -> Result<PathBuf, EngineError> {
        write_sigma_deck(&self.deck_writer, STEM, MODE, job, input_file, work_dir)
    }

    fn invoke_engine(&self, job: &JobDescriptor, deck: &Path, work_dir: &Path) -> Result<String, EngineError> {
        if job.capability == EngineCapability::Unbounded {
            return Err(EngineError::new("SAFE engine cannot analyse flights above the peak limit"));
        }
        let mut vars = HashMap::new();
        vars.insert("deck", STEM.to_owned());
        vars.insert("sigma", deck.display().to_string());
        vars.insert("job", job.index.to_string());

        debug!(job = job.index, "running SAFE engine");
        self.engine.run(&vars, work_dir, "safe.log")?;

        let output = work_dir.join(format!("{}.out", STEM));
        if !output.exists() {
            return Err(EngineError::new(format!(
                "Analysis for {} has failed! See 'safe.log' file for details.",
                job.label
            )));
        }
        read_lossy(&output)
    }

    fn parse_output(&self, raw: &str) -> Result<EngineOutput, EngineError> {
        let mut stress = None;
        let mut damage = None;
        for line in raw.lines() {
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            match key.trim() {
                EQUIVALENT_STRESS => stress = Some(parse_number(Some(value), "equivalent stress")?),
                TOTAL_DAMAGE => damage = Some(parse_number(Some(value), "total damage")?),
                _ => {}
            }
        }
        let equivalent_stress =
            stress.ok_or_else(|| EngineError::new("SAFE output has no equivalent stress"))?;
        Ok(EngineOutput {
            equivalent_stress,
            total_damage: damage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::TemplateSyntax;

    fn backend() -> SafeBackend {
        SafeBackend::new(
            MaterialTemplate::new("materialServer.mat", TemplateSyntax::SingleQuoted),
            CommandLine::new("perl", &["writeSigmaFileServer.pl", "{sth}", "{fls}", "{mode}"]),
            CommandLine::new("safe", &["{deck}"]),
        )
    }

    #[test]
    fn test_parse_output() {
        let raw = "# SAFE 2.1\nEQUIVALENT STRESS = 201.5\nTOTAL DAMAGE = 0.004\n";
        let output = backend().parse_output(raw).unwrap();
        assert_eq!(output.equivalent_stress, 201.5);
        assert_eq!(output.total_damage, Some(0.004));
    }

    #[test]
    fn test_bounded_only() {
        assert!(backend().supports(EngineCapability::Bounded));
        assert!(!backend().supports(EngineCapability::Unbounded));
    }

    #[test]
    fn test_parse_output_without_stress() {
        assert!(backend().parse_output("TOTAL DAMAGE = 0.1\n").is_err());
        assert!(backend().parse_output("EQUIVALENT STRESS = high\n").is_err());
    }
}
