//! A module for the fatigue material definition fed to the analysis engines.

use serde::{Deserialize, Serialize};
use anyhow::{Result, anyhow};

/// Represents a fatigue material used in equivalent stress analysis.
///
/// The engines only consume the three scalar coefficients; the name is carried
/// for reporting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FatigueMaterial {
    /// Name of the material.
    pub name: String,
    /// Slope of the fatigue law. Written to the engine sign-negated.
    pub p: f64,
    /// Coefficient of the stress ratio function f(R).
    pub q: f64,
    /// Material influence factor.
    pub m: f64,
}

impl FatigueMaterial {
    pub fn new(name: &str, p: f64, q: f64, m: f64) -> Self {
        FatigueMaterial {
            name: name.to_owned(),
            p,
            q,
            m,
        }
    }

    /// Validates the `FatigueMaterial` so that every coefficient can be written
    /// to a material file.
    ///
    /// # Returns
    ///
    /// Returns `Ok(())` if the name is set and all coefficients are finite numbers.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(anyhow!("material name must not be empty"));
        }
        for (label, value) in [("p", self.p), ("q", self.q), ("m", self.m)] {
            if !value.is_finite() {
                return Err(anyhow!("material coefficient {} must be a finite number, got {}", label, value));
            }
        }
        Ok(())
    }
}
