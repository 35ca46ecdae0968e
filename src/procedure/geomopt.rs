//! A steepest-descent geometry optimization driver. Each step delegates a
//! gradient computation to the program named in the optimization keywords,
//! so the trajectory entries carry that program's provenance while the
//! top-level result carries ours.

use std::{fmt::Write, time::Instant};

use chrono::Local;
use log::debug;

use crate::{
    config::TaskConfig,
    models::{
        AtomicInput, AtomicResult, ComputeError, Driver, OptimizationInput,
        OptimizationResult, Provenance,
    },
    program::{get_program, ProgramError},
};

use super::Procedure;

#[cfg(test)]
mod tests;

pub struct GeomOpt;

impl GeomOpt {
    /// a failed result that still carries the partial trajectory and the log
    /// accumulated so far
    #[allow(clippy::too_many_arguments)]
    fn fail(
        input: &OptimizationInput,
        trajectory: Vec<AtomicResult>,
        energies: Vec<f64>,
        mut stdout: String,
        error_type: &str,
        message: String,
        cfg: &TaskConfig,
        start: Instant,
    ) -> OptimizationResult {
        writeln!(stdout, "geomopt failed: {message}").unwrap();
        OptimizationResult {
            trajectory,
            energies,
            stdout: Some(stdout),
            provenance: Self::provenance(cfg, start),
            ..OptimizationResult::failure(
                input,
                "geomopt",
                ComputeError::new(error_type, message),
            )
        }
    }

    fn provenance(cfg: &TaskConfig, start: Instant) -> Provenance {
        Provenance {
            memory: Some(cfg.memory),
            ncores: Some(cfg.ncores),
            wall_time: Some(start.elapsed().as_secs_f64()),
            ..Provenance::new("geomopt", "geomopt::run")
        }
    }
}

impl Procedure for GeomOpt {
    fn name(&self) -> &'static str {
        "geomopt"
    }

    /// built in, so always available
    fn found(&self) -> bool {
        true
    }

    fn run(
        &self,
        input: &OptimizationInput,
        cfg: &TaskConfig,
    ) -> Result<OptimizationResult, ProgramError> {
        let start = Instant::now();
        let kw = &input.keywords;
        let mut stdout = format!(
            "geomopt started {}\n{} atoms, gradients from `{}`\n",
            Local::now().format("%Y-%m-%d %H:%M:%S"),
            input.initial_molecule.natoms(),
            kw.program,
        );

        let Some(program) = get_program(&kw.program) else {
            return Ok(Self::fail(
                input,
                Vec::new(),
                Vec::new(),
                stdout,
                "input_error",
                format!("program `{}` is not registered", kw.program),
                cfg,
                start,
            ));
        };

        if input.initial_molecule.natoms() == 0 {
            return Ok(Self::fail(
                input,
                Vec::new(),
                Vec::new(),
                stdout,
                "input_error",
                String::from("molecule has no atoms"),
                cfg,
                start,
            ));
        }

        let mut mol = input.initial_molecule.clone();
        let mut trajectory = Vec::new();
        let mut energies = Vec::new();
        for iter in 0..kw.maxiter {
            // the optimizer always needs gradients, whatever driver the
            // input specification carries
            let step_input = AtomicInput::new(
                mol.clone(),
                Driver::Gradient,
                input.input_specification.model.clone(),
            );
            let res = match program.compute(&step_input, cfg) {
                Ok(res) if res.success => res,
                Ok(res) => {
                    let message = res
                        .error
                        .map(|e| e.error_message)
                        .unwrap_or_else(|| {
                            format!("`{}` failed without a message", kw.program)
                        });
                    return Ok(Self::fail(
                        input, trajectory, energies, stdout,
                        "execution_error", message, cfg, start,
                    ));
                }
                Err(e) => {
                    return Ok(Self::fail(
                        input,
                        trajectory,
                        energies,
                        stdout,
                        e.kind(),
                        e.to_string(),
                        cfg,
                        start,
                    ));
                }
            };
            let Some(gradient) = res.gradient().map(<[f64]>::to_vec) else {
                return Ok(Self::fail(
                    input,
                    trajectory,
                    energies,
                    stdout,
                    "execution_error",
                    format!("`{}` returned no gradient", kw.program),
                    cfg,
                    start,
                ));
            };
            if gradient.len() != mol.geometry.len() {
                return Ok(Self::fail(
                    input,
                    trajectory,
                    energies,
                    stdout,
                    "execution_error",
                    format!(
                        "`{}` returned a gradient of length {}, expected {}",
                        kw.program,
                        gradient.len(),
                        mol.geometry.len()
                    ),
                    cfg,
                    start,
                ));
            }
            let energy = res.properties.return_energy.unwrap_or(f64::NAN);
            let rms = (gradient.iter().map(|g| g * g).sum::<f64>()
                / gradient.len() as f64)
                .sqrt();
            writeln!(
                stdout,
                "  iter {iter:3}  energy {energy:18.10}  grms {rms:12.3e}"
            )
            .unwrap();
            debug!("geomopt iter {iter}: energy {energy}, grms {rms}");
            energies.push(energy);
            trajectory.push(res);

            if rms < kw.gtol {
                writeln!(stdout, "Converged!").unwrap();
                return Ok(OptimizationResult {
                    input_specification: input.input_specification.clone(),
                    initial_molecule: input.initial_molecule.clone(),
                    final_molecule: Some(mol),
                    trajectory,
                    energies,
                    success: true,
                    provenance: Self::provenance(cfg, start),
                    stdout: Some(stdout),
                    error: None,
                });
            }
            for (x, g) in mol.geometry.iter_mut().zip(&gradient) {
                *x -= kw.step * g;
            }
        }

        Ok(Self::fail(
            input,
            trajectory,
            energies,
            stdout,
            "convergence_error",
            format!("failed to converge after {} steps", kw.maxiter),
            cfg,
            start,
        ))
    }
}
