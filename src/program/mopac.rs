//! Adapter for MOPAC, a semi-empirical package. Input is a `.mop` file with
//! a keyword header and an xyz block; results come back through the `.aux`
//! file MOPAC writes alongside its main output.

use std::{
    fs::File,
    io::{BufRead, BufReader, Write},
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

/// kcal/mol per hartree
pub const KCALHT: f64 = 627.5091809;

/// energy and gradient pulled out of a `.aux` file. the gradient is empty
/// for single-point energies
struct AuxData {
    /// heat of formation in kcal/mol, as MOPAC reports it
    heat: f64,

    /// kcal/mol/angstrom, in MOPAC's units
    gradient: Vec<f64>,

    /// CPU time in seconds
    time: Option<f64>,
}

pub struct Mopac;

impl Mopac {
    fn executable() -> Option<std::path::PathBuf> {
        which("mopac").or_else(|| {
            let p = std::path::PathBuf::from("/opt/mopac/mopac");
            p.is_file().then_some(p)
        })
    }

    /// parse a MOPAC float like +0.1234D+03
    fn parse_float(s: &str) -> Option<f64> {
        s.replace(['D', 'd'], "E").parse().ok()
    }

    fn write_input(
        input: &AtomicInput,
        cfg: &TaskConfig,
        filename: &str,
    ) -> Result<(), ProgramError> {
        use std::fmt::Write;
        let method = if input.model.method.is_empty() {
            "PM6"
        } else {
            &input.model.method
        };
        let mut header = format!(
            "{} 1SCF AUX(PRECISION=9) THREADS={} charge={}",
            method.to_uppercase(),
            cfg.ncores,
            input.molecule.charge
        );
        if input.driver == Driver::Gradient {
            write!(header, " GRADIENTS").unwrap();
        }
        header.push_str(" XYZ");
        let mut file = File::create(filename)?;
        write!(
            file,
            "{header}
Comment line 1
Comment line 2
{}",
            input.molecule.xyz_lines(BOHR_TO_ANGSTROM)
        )?;
        Ok(())
    }

    /// read the heat of formation, gradient, and CPU time from a MOPAC aux
    /// file. `base` should not include the .aux extension
    fn read_aux(base: &str) -> Result<AuxData, ProgramError> {
        static CELL: OnceLock<[Regex; 3]> = OnceLock::new();
        let [heat_re, grad_re, time_re] = CELL.get_or_init(|| {
            [
                Regex::new(r"^ HEAT_OF_FORMATION:KCAL/MOL=(.+)$").unwrap(),
                Regex::new(r"^ GRADIENTS:KCAL/MOL/ANGSTROM\[(\d+)\]=")
                    .unwrap(),
                Regex::new(r"^ CPU_TIME:SEC=(.+)$").unwrap(),
            ]
        });
        let auxfile = format!("{base}.aux");
        let Ok(f) = File::open(&auxfile) else {
            return Err(ProgramError::FileNotFound(auxfile));
        };
        let mut heat = None;
        let mut gradient = Vec::new();
        let mut want_grads = 0;
        let mut time = None;
        for line in BufReader::new(f).lines().map_while(Result::ok) {
            if gradient.len() < want_grads {
                for field in line.split_whitespace() {
                    match Self::parse_float(field) {
                        Some(v) => gradient.push(v),
                        None => {
                            return Err(ProgramError::EnergyParseError(
                                auxfile,
                            ))
                        }
                    }
                }
            } else if let Some(cap) = heat_re.captures(&line) {
                heat = Self::parse_float(cap[1].trim());
                if heat.is_none() {
                    return Err(ProgramError::EnergyParseError(auxfile));
                }
            } else if let Some(cap) = grad_re.captures(&line) {
                want_grads = cap[1]
                    .parse()
                    .map_err(|_| ProgramError::EnergyParseError(auxfile.clone()))?;
            } else if let Some(cap) = time_re.captures(&line) {
                time = cap[1].trim().parse().ok();
            }
        }
        let Some(heat) = heat else {
            return Err(ProgramError::EnergyNotFound(auxfile));
        };
        if gradient.len() < want_grads {
            return Err(ProgramError::EnergyParseError(auxfile));
        }
        Ok(AuxData {
            heat,
            gradient,
            time,
        })
    }
}

impl Program for Mopac {
    fn name(&self) -> &'static str {
        "mopac"
    }

    fn found(&self) -> bool {
        Self::executable().is_some()
    }

    fn compute(
        &self,
        input: &AtomicInput,
        cfg: &TaskConfig,
    ) -> Result<AtomicResult, ProgramError> {
        let start = Instant::now();
        let Some(exe) = Self::executable() else {
            return Err(ProgramError::ExecutableNotFound(
                self.name().to_string(),
            ));
        };
        let dir = super::scratch_dir(self.name(), cfg)?;
        let base = format!("{dir}/job");
        let infile = format!("{base}.mop");
        Self::write_input(input, cfg, &infile)?;

        let out = Command::new(exe).arg(&infile).output()?;
        if !out.status.success() {
            return Err(ProgramError::Run(format!(
                "mopac exited with {}: {}",
                out.status,
                String::from_utf8_lossy(&out.stderr).trim()
            )));
        }
        let aux = Self::read_aux(&base)?;
        let stdout = std::fs::read_to_string(format!("{base}.out")).ok();
        let _ = std::fs::remove_dir_all(&dir);

        let energy = aux.heat / KCALHT;
        let return_result = match input.driver {
            Driver::Energy => ReturnValue::Energy(energy),
            Driver::Gradient => ReturnValue::Gradient(
                aux.gradient
                    .iter()
                    .map(|g| g / KCALHT * BOHR_TO_ANGSTROM)
                    .collect(),
            ),
        };
        Ok(AtomicResult {
            molecule: input.molecule.clone(),
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
                wall_time: Some(
                    aux.time.unwrap_or(start.elapsed().as_secs_f64()),
                ),
                ..Provenance::new(self.name(), "mopac::compute")
            },
            stdout,
            error: None,
            extras: input.extras.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use crate::molecule::get_molecule;

    use super::*;

    #[test]
    fn test_write_input() {
        let dir = tempdir().unwrap();
        let infile =
            dir.path().join("job.mop").to_string_lossy().to_string();
        let input = AtomicInput::new(
            get_molecule("hydrogen").unwrap(),
            Driver::Gradient,
            crate::models::Model::new("pm6", ""),
        );
        let cfg = TaskConfig {
            memory: 1.0,
            ncores: 4,
            scratch_directory: dir.path().to_string_lossy().to_string(),
        };
        Mopac::write_input(&input, &cfg, &infile).unwrap();
        let got = std::fs::read_to_string(&infile).unwrap();
        let mut lines = got.lines();
        assert_eq!(
            lines.next().unwrap(),
            "PM6 1SCF AUX(PRECISION=9) THREADS=4 charge=0 GRADIENTS XYZ"
        );
        assert_eq!(lines.next().unwrap(), "Comment line 1");
        assert_eq!(lines.next().unwrap(), "Comment line 2");
        // geometry is written in angstroms
        let h1: crate::molecule::Atom =
            lines.next().unwrap().parse().unwrap();
        assert_eq!(h1.label, "H");
        assert!((h1.coord[2] + 0.65 * BOHR_TO_ANGSTROM).abs() < 1e-10);
    }

    #[test]
    fn test_read_aux() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("job").to_string_lossy().to_string();
        std::fs::write(
            format!("{base}.aux"),
            " HEAT_OF_FORMATION:KCAL/MOL=+0.97127D+02
 GRADIENTS:KCAL/MOL/ANGSTROM[06]=
  -1.243D+00 +0.000D+00 +0.500D+00 +1.243D+00 +0.000D+00 -0.500D+00
 CPU_TIME:SEC=0.035
",
        )
        .unwrap();
        let aux = Mopac::read_aux(&base).unwrap();
        assert!((aux.heat - 97.127).abs() < 1e-10);
        assert_eq!(aux.gradient.len(), 6);
        assert!((aux.gradient[0] + 1.243).abs() < 1e-10);
        assert_eq!(aux.time, Some(0.035));
    }

    #[test]
    fn test_read_aux_missing() {
        let got = Mopac::read_aux("/nonexistent/job");
        assert!(matches!(got, Err(ProgramError::FileNotFound(_))));
    }
}
