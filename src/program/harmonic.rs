//! A built-in reference program: a harmonic bond force field with tabulated
//! equilibrium distances. It exists so the dispatch layer has one program
//! that is always available, fully deterministic, and cheap enough for a
//! test suite to drive through entire optimizations. It is not a chemistry
//! method.

use std::time::Instant;

use log::debug;

use crate::{
    config::TaskConfig,
    models::{
        AtomicInput, AtomicResult, Driver, Properties, Provenance,
        ReturnValue,
    },
};

use super::{Program, ProgramError};

/// default force constant in hartree / bohr^2, overridable per call with the
/// `force_constant` keyword
const FORCE_CONSTANT: f64 = 0.5;

/// reference equilibrium bond lengths in bohr. the H-H entry is the HF/STO-3G
/// equilibrium distance, so hydrogen optimizations land on a recognizable
/// literature value
fn equilibrium(a: &str, b: &str) -> Option<f64> {
    let r0 = match (a, b) {
        ("H", "H") => 1.3459150737,
        ("O", "H") | ("H", "O") => 1.8103,
        ("N", "H") | ("H", "N") => 1.9124,
        ("C", "H") | ("H", "C") => 2.0598,
        ("C", "C") => 2.9103,
        ("C", "O") | ("O", "C") => 2.7022,
        _ => return None,
    };
    Some(r0)
}

pub struct Harmonic;

impl Program for Harmonic {
    fn name(&self) -> &'static str {
        "harmonic"
    }

    /// built in, so always available
    fn found(&self) -> bool {
        true
    }

    fn compute(
        &self,
        input: &AtomicInput,
        cfg: &TaskConfig,
    ) -> Result<AtomicResult, ProgramError> {
        let start = Instant::now();
        let mol = &input.molecule;
        let Some(bonds) = &mol.connectivity else {
            return Err(ProgramError::MissingConnectivity(
                self.name().to_string(),
            ));
        };
        let k = input
            .keywords
            .get("force_constant")
            .and_then(|v| v.as_f64())
            .unwrap_or(FORCE_CONSTANT);

        let mut energy = 0.0;
        let mut gradient = vec![0.0; mol.geometry.len()];
        for (i, j, _order) in bonds {
            let (i, j) = (*i, *j);
            if i >= mol.natoms() || j >= mol.natoms() {
                return Err(ProgramError::Run(format!(
                    "bond ({i}, {j}) out of range for {} atoms",
                    mol.natoms()
                )));
            }
            let r = mol.distance(i, j);
            if r < 1e-8 {
                return Err(ProgramError::Run(format!(
                    "coincident atoms {i} and {j}"
                )));
            }
            let (a, b) = (&mol.symbols[i], &mol.symbols[j]);
            let Some(r0) = equilibrium(a, b) else {
                return Err(ProgramError::Run(format!(
                    "no reference bond length for {a}-{b}"
                )));
            };
            let dr = r - r0;
            energy += 0.5 * k * dr * dr;
            // dE/dx_i = k (r - r0) (x_i - x_j) / r
            for c in 0..3 {
                let u = (mol.coord(i)[c] - mol.coord(j)[c]) / r;
                gradient[3 * i + c] += k * dr * u;
                gradient[3 * j + c] -= k * dr * u;
            }
        }
        debug!("harmonic: {} bonds, energy {energy:.10}", bonds.len());

        let return_result = match input.driver {
            Driver::Energy => ReturnValue::Energy(energy),
            Driver::Gradient => ReturnValue::Gradient(gradient),
        };
        let stdout = format!(
            "harmonic force field: {} bonds, k = {k:.3}\n\
             energy = {energy:.10} hartree\n",
            bonds.len()
        );
        Ok(AtomicResult {
            molecule: mol.clone(),
            driver: input.driver,
            model: input.model.clone(),
            return_result: Some(return_result),
            properties: Properties {
                return_energy: Some(energy),
            },
            success: true,
            provenance: Provenance {
                memory: Some(cfg.memory),
                ncores: Some(cfg.ncores),
                wall_time: Some(start.elapsed().as_secs_f64()),
                ..Provenance::new(self.name(), "harmonic::compute")
            },
            stdout: Some(stdout),
            error: None,
            extras: input.extras.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::molecule::get_molecule;

    use super::*;

    fn test_config() -> TaskConfig {
        TaskConfig {
            memory: 1.0,
            ncores: 1,
            scratch_directory: String::from("/tmp"),
        }
    }

    fn test_input(name: &str, driver: Driver) -> AtomicInput {
        AtomicInput::new(
            get_molecule(name).unwrap(),
            driver,
            crate::models::Model::new("harmonic", ""),
        )
    }

    #[test]
    fn test_energy() {
        let res = Harmonic
            .compute(&test_input("hydrogen", Driver::Energy), &test_config())
            .unwrap();
        assert!(res.success);
        // stock hydrogen starts slightly inside the equilibrium distance
        let want = 0.5 * 0.5 * (1.3 - 1.3459150737_f64).powi(2);
        assert!((res.energy().unwrap() - want).abs() < 1e-12);
        assert_eq!(res.provenance.creator, "harmonic");
    }

    #[test]
    fn test_gradient() {
        let res = Harmonic
            .compute(&test_input("hydrogen", Driver::Gradient), &test_config())
            .unwrap();
        let grad = res.gradient().unwrap().to_vec();
        assert_eq!(grad.len(), 6);
        // equal and opposite forces along z, zero elsewhere
        assert_eq!(grad[2], -grad[5]);
        assert_eq!(&grad[..2], &[0.0, 0.0][..]);
        let dr: f64 = 1.3 - 1.3459150737;
        assert!((grad[5] - 0.5 * dr).abs() < 1e-10);
    }

    #[test]
    fn test_missing_connectivity() {
        let mut input = test_input("water", Driver::Gradient);
        input.molecule = input.molecule.without_connectivity();
        let got = Harmonic.compute(&input, &test_config());
        assert!(matches!(got, Err(ProgramError::MissingConnectivity(_))));
    }

    #[test]
    fn test_unknown_bond() {
        let mut input = test_input("hydrogen", Driver::Energy);
        input.molecule.symbols = crate::string!["He", "He"];
        let got = Harmonic.compute(&input, &test_config());
        assert!(matches!(got, Err(ProgramError::Run(_))));
    }
}
