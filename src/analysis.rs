//! The two analysis kinds: damage angle sweeps and loadcase damage contribution breakdowns.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::backend::EngineOutput;
use crate::error::{AnalysisError, EngineError};
use crate::job::{Aggregate, JobDescriptor, JobInput, JobLabel, FULL_CONTRIBUTION};

/// Selects which analysis a configuration runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisType {
    DamageAngle,
    DamageContribution,
}

/// Decides which labels a request may carry and what a job's engine output becomes.
pub trait AnalysisKind: Send + Sync {
    type Output: Send;

    fn name(&self) -> &'static str;

    fn validate_inputs(&self, inputs: &[JobInput]) -> Result<(), AnalysisError>;

    fn extract(&self, job: &JobDescriptor, output: EngineOutput) -> Result<Self::Output, EngineError>;
}

/// Equivalent stress at one sweep angle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AngleStress {
    pub angle_index: usize,
    pub angle: i32,
    pub stress: f64,
}

/// Sweeps the loading direction and reports the equivalent stress per angle.
#[derive(Debug, Clone, Copy, Default)]
pub struct AngleSweep;

impl AngleSweep {
    /// The angle with the highest equivalent stress among the populated slots.
    pub fn max_damage_angle(aggregate: &Aggregate<AngleStress>) -> Option<&AngleStress> {
        aggregate
            .iter()
            .map(|(_, result)| result)
            .fold(None, |best: Option<&AngleStress>, candidate| match best {
                Some(current) if current.stress >= candidate.stress => Some(current),
                _ => Some(candidate),
            })
    }
}

impl AnalysisKind for AngleSweep {
    type Output = AngleStress;

    fn name(&self) -> &'static str {
        "damage angle"
    }

    fn validate_inputs(&self, inputs: &[JobInput]) -> Result<(), AnalysisError> {
        let mut seen = HashSet::new();
        for input in inputs {
            match input.label {
                JobLabel::Angle(angle) => {
                    if !seen.insert(angle) {
                        return Err(AnalysisError::setup(format!("angle {} is listed twice", angle)));
                    }
                }
                JobLabel::Contribution(ref name) => {
                    return Err(AnalysisError::setup(format!(
                        "damage angle analysis expects angles, got '{}'",
                        name
                    )))
                }
            }
        }
        Ok(())
    }

    fn extract(&self, job: &JobDescriptor, output: EngineOutput) -> Result<AngleStress, EngineError> {
        match job.label {
            JobLabel::Angle(angle) => Ok(AngleStress {
                angle_index: job.index,
                angle,
                stress: output.equivalent_stress,
            }),
            JobLabel::Contribution(_) => Err(EngineError::new(format!("{} is not a sweep angle", job.label))),
        }
    }
}

/// Damage and equivalent stress of one contribution variant.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContributionDamage {
    pub index: usize,
    pub name: String,
    pub stress: f64,
    pub damage: f64,
}

/// Share of the baseline damage a contribution accounts for.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContributionShare {
    pub name: String,
    pub stress: f64,
    pub damage: f64,
    pub percent: f64,
}

/// Runs the full spectrum plus one variant per contribution and compares their damage.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContributionBreakdown;

impl ContributionBreakdown {
    /// Damage of every populated contribution as a percentage of the `full` baseline.
    ///
    /// Fails when the baseline is absent, since there is nothing to compare against.
    pub fn percentages(aggregate: &Aggregate<ContributionDamage>) -> Result<Vec<ContributionShare>, AnalysisError> {
        let full = aggregate
            .get(0)
            .filter(|full| full.name == FULL_CONTRIBUTION && full.damage > 0.0)
            .ok_or_else(|| AnalysisError::Incomplete("total damage could not be calculated".into()))?;

        Ok(aggregate
            .iter()
            .filter(|(index, _)| *index != 0)
            .map(|(_, result)| ContributionShare {
                name: result.name.clone(),
                stress: result.stress,
                damage: result.damage,
                percent: result.damage * 100.0 / full.damage,
            })
            .collect())
    }
}

impl AnalysisKind for ContributionBreakdown {
    type Output = ContributionDamage;

    fn name(&self) -> &'static str {
        "loadcase damage contribution"
    }

    fn validate_inputs(&self, inputs: &[JobInput]) -> Result<(), AnalysisError> {
        match inputs.first() {
            Some(first) if first.label.is_full() => {}
            _ => {
                return Err(AnalysisError::setup(format!(
                    "the first contribution must be the '{}' baseline",
                    FULL_CONTRIBUTION
                )))
            }
        }
        let mut seen = HashSet::new();
        for input in &inputs[1..] {
            match &input.label {
                JobLabel::Contribution(name) if name.trim().is_empty() => {
                    return Err(AnalysisError::setup("contribution names must not be empty"))
                }
                JobLabel::Contribution(name) if name == FULL_CONTRIBUTION => {
                    return Err(AnalysisError::setup(format!("'{}' is reserved for the baseline", FULL_CONTRIBUTION)))
                }
                JobLabel::Contribution(name) => {
                    if !seen.insert(name.as_str()) {
                        return Err(AnalysisError::setup(format!("contribution '{}' is listed twice", name)));
                    }
                }
                JobLabel::Angle(angle) => {
                    return Err(AnalysisError::setup(format!(
                        "damage contribution analysis expects names, got angle {}",
                        angle
                    )))
                }
            }
        }
        Ok(())
    }

    fn extract(&self, job: &JobDescriptor, output: EngineOutput) -> Result<ContributionDamage, EngineError> {
        let name = match &job.label {
            JobLabel::Contribution(name) => name.clone(),
            JobLabel::Angle(_) => return Err(EngineError::new(format!("{} is not a contribution", job.label))),
        };
        let damage = output
            .total_damage
            .ok_or_else(|| EngineError::new(format!("engine reported no damage for {}", job.label)))?;
        Ok(ContributionDamage {
            index: job.index,
            name,
            stress: output.equivalent_stress,
            damage,
        })
    }
}
