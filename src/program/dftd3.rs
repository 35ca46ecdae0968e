//! Adapter for the classic `dftd3` dispersion-correction executable. The
//! correction energy is scraped from stdout and the gradient, when asked
//! for, from the `dftd3_gradient` file it leaves in the working directory.

use std::{
    fs::{read_to_string, File},
    io::Write,
    process::Command,
    sync::OnceLock,
    time::Instant,
};

use regex::Regex;

use crate::{
    config::TaskConfig,
    models::{
        AtomicInput, AtomicResult, Driver, Properties, Provenance,
        ReturnValue,
    },
    molecule::BOHR_TO_ANGSTROM,
};

use super::{which, Program, ProgramError};

pub struct Dftd3;

impl Dftd3 {
    /// extract the dispersion energy in hartrees from a line like
    /// ` Edisp /kcal,au    :    -0.1234     -0.000196`
    fn parse_energy(stdout: &str) -> Option<f64> {
        static CELL: OnceLock<Regex> = OnceLock::new();
        let re = CELL.get_or_init(|| {
            Regex::new(
                r"Edisp /kcal,au\s*:\s*-?\d+\.\d+\s+(-?\d+\.\d+(?:[Ee][+-]?\d+)?)",
            )
            .unwrap()
        });
        re.captures(stdout)?[1].parse().ok()
    }
}

impl Program for Dftd3 {
    fn name(&self) -> &'static str {
        "dftd3"
    }

    fn found(&self) -> bool {
        which("dftd3").is_some()
    }

    fn compute(
        &self,
        input: &AtomicInput,
        cfg: &TaskConfig,
    ) -> Result<AtomicResult, ProgramError> {
        let start = Instant::now();
        let Some(exe) = which("dftd3") else {
            return Err(ProgramError::ExecutableNotFound(
                self.name().to_string(),
            ));
        };
        let dir = super::scratch_dir(self.name(), cfg)?;
        let geomfile = format!("{dir}/geom.xyz");
        let mol = &input.molecule;
        let mut f = File::create(&geomfile)?;
        write!(
            f,
            "{}\ndftd3 input\n{}",
            mol.natoms(),
            mol.xyz_lines(BOHR_TO_ANGSTROM)
        )?;

        let func = input.model.method.to_lowercase();
        let mut cmd = Command::new(exe);
        cmd.arg(&geomfile)
            .args(["-func", func.as_str(), "-bj"])
            .current_dir(&dir);
        if input.driver == Driver::Gradient {
            cmd.arg("-grad");
        }
        let out = cmd.output()?;
        if !out.status.success() {
            return Err(ProgramError::Run(format!(
                "dftd3 exited with {}: {}",
                out.status,
                String::from_utf8_lossy(&out.stderr).trim()
            )));
        }
        let stdout = String::from_utf8_lossy(&out.stdout).to_string();
        let Some(energy) = Self::parse_energy(&stdout) else {
            return Err(ProgramError::EnergyNotFound(format!(
                "{dir}/stdout"
            )));
        };

        let return_result = match input.driver {
            Driver::Energy => ReturnValue::Energy(energy),
            Driver::Gradient => {
                let gradfile = format!("{dir}/dftd3_gradient");
                let Ok(contents) = read_to_string(&gradfile) else {
                    return Err(ProgramError::FileNotFound(gradfile));
                };
                let mut gradient = Vec::with_capacity(mol.geometry.len());
                for field in contents.split_whitespace() {
                    gradient.push(
                        field.replace(['D', 'd'], "E").parse().map_err(
                            |_| ProgramError::EnergyParseError(gradfile.clone()),
                        )?,
                    );
                }
                ReturnValue::Gradient(gradient)
            }
        };
        let _ = std::fs::remove_dir_all(&dir);

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
                ..Provenance::new(self.name(), "dftd3::compute")
            },
            stdout: Some(stdout),
            error: None,
            extras: input.extras.clone(),
        })
    }
}
