use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::{parse_number, read_lossy, write_sigma_deck, EngineBackend, EngineOutput};
use crate::command::CommandLine;
use crate::error::EngineError;
use crate::job::{EngineCapability, JobDescriptor};
use crate::template::MaterialTemplate;

const STEM: &str = "jobstpa_SIGMA_proto";
const MODE: &str = "AMORCAGE";
const SEQUENCE_SECTION: &str = "ANALYSE DE LA SEQUENCE";
const EQUIVALENT_STRESS: &str = "SMAX equivalent amor (MPa)";
const SEQUENCE_DAMAGE: &str = "ENDOMMAGEMENT SEQUENCE";

/// The locally installed spectrum engine.
///
/// Has a bounded executable and, optionally, an extended one without a limit
/// on the number of peaks per typical flight.
#[derive(Debug, Clone)]
pub struct InbuiltBackend {
    template: MaterialTemplate,
    deck_writer: CommandLine,
    engine: CommandLine,
    extended_engine: Option<CommandLine>,
}

impl InbuiltBackend {
    pub fn new(
        template: MaterialTemplate,
        deck_writer: CommandLine,
        engine: CommandLine,
        extended_engine: Option<CommandLine>,
    ) -> Self {
        InbuiltBackend {
            template,
            deck_writer,
            engine,
            extended_engine,
        }
    }

    fn engine_for(&self, capability: EngineCapability) -> Result<&CommandLine, EngineError> {
        match capability {
            EngineCapability::Bounded => Ok(&self.engine),
            EngineCapability::Unbounded => self
                .extended_engine
                .as_ref()
                .ok_or_else(|| EngineError::new("extended inbuilt engine is not configured")),
        }
    }
}

impl EngineBackend for InbuiltBackend {
    fn name(&self) -> &str {
        "inbuilt"
    }

    fn material_template(&self) -> &MaterialTemplate {
        &self.template
    }

    fn supports(&self, capability: EngineCapability) -> bool {
        capability == EngineCapability::Bounded || self.extended_engine.is_some()
    }

    fn build_input_deck(&self, job: &JobDescriptor, input_file: &Path, work_dir: &Path) -> Result<PathBuf, EngineError> {
        write_sigma_deck(&self.deck_writer, STEM, MODE, job, input_file, work_dir)
    }

    fn invoke_engine(&self, job: &JobDescriptor, deck: &Path, work_dir: &Path) -> Result<String, EngineError> {
        let engine = self.engine_for(job.capability)?;
        let mut vars = HashMap::new();
        vars.insert("deck", STEM.to_owned());
        vars.insert("sigma", deck.display().to_string());
        vars.insert("job", job.index.to_string());

        debug!(job = job.index, capability = ?job.capability, "running inbuilt engine");
        let failed = || {
            EngineError::new(format!(
                "Analysis for {} has failed! See 'engine.log' file for details.",
                job.label
            ))
        };
        engine.run(&vars, work_dir, "engine.log").map_err(|_| failed())?;

        let dossier = work_dir.join(format!("{}.dossier", STEM));
        let errors = work_dir.join(format!("{}.erreurs", STEM));
        if errors.exists() || !dossier.exists() {
            return Err(failed());
        }
        read_lossy(&dossier)
    }

    fn parse_output(&self, raw: &str) -> Result<EngineOutput, EngineError> {
        let mut in_sequence = false;
        let mut stress = None;
        let mut damage = None;
        for line in raw.lines() {
            if !in_sequence && line.contains(SEQUENCE_SECTION) {
                in_sequence = true;
                continue;
            }
            if in_sequence && stress.is_none() && line.contains(EQUIVALENT_STRESS) {
                stress = Some(parse_number(line.split(':').nth(2), "fatigue equivalent stress")?);
            } else if damage.is_none() && line.contains(SEQUENCE_DAMAGE) {
                damage = Some(parse_number(line.split('=').nth(1), "sequence damage")?);
            }
        }

        match stress {
            Some(equivalent_stress) => Ok(EngineOutput {
                equivalent_stress,
                total_damage: damage,
            }),
            None => Err(EngineError::new(
                "Cannot find fatigue equivalent stress in output dossier file.",
            )),
        }
    }
}
