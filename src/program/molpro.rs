//! Adapter for Molpro. The input file is generated from the model instead of
//! a user template, and the energy, gradient, and timing are pulled back out
//! of the main output file.

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

struct OutData {
    energy: f64,
    gradient: Vec<f64>,
    time: f64,
}

pub struct Molpro;

impl Molpro {
    /// Example input:
    /// ```text
    /// ***, qcdispatch
    /// memory,128,m
    /// geometry={
    ///  H    0.0000000000   0.0000000000  -0.3439651937
    ///  H    0.0000000000   0.0000000000   0.3439651937
    /// }
    /// basis=sto-3g
    /// set,charge=0
    /// set,spin=0
    /// hf
    /// forces
    /// ```
    /// `forces` is only present for gradient jobs
    fn write_input(
        input: &AtomicInput,
        cfg: &TaskConfig,
        filename: &str,
    ) -> Result<(), ProgramError> {
        // memory card is in megawords of 8 bytes
        let mw = ((cfg.memory * 1024.0 * 1024.0 * 1024.0 / 8.0 / 1e6)
            as usize)
            .max(1);
        let mol = &input.molecule;
        let mut body = format!(
            "***, qcdispatch
memory,{mw},m
geometry={{
{}}}
basis={}
set,charge={}
set,spin={}
{}
",
            mol.xyz_lines(BOHR_TO_ANGSTROM),
            input.model.basis,
            mol.charge,
            mol.multiplicity.saturating_sub(1),
            input.model.method.to_lowercase(),
        );
        if input.driver == Driver::Gradient {
            body.push_str("forces\n");
        }
        let mut file = File::create(filename)?;
        write!(file, "{body}")?;
        Ok(())
    }

    fn read_output(outfile: &str) -> Result<OutData, ProgramError> {
        static CELL: OnceLock<[Regex; 4]> = OnceLock::new();
        let [error_re, energy_re, grad_re, time_re] = CELL.get_or_init(|| {
            [
                Regex::new(r"(?i)\berror\b").unwrap(),
                Regex::new(r"!\w+ STATE\s+\d+\.\d+\s+Energy\s+(-?\d+\.\d+)")
                    .unwrap(),
                Regex::new(r"GRADIENT FOR STATE").unwrap(),
                Regex::new(r"^ REAL TIME").unwrap(),
            ]
        });
        let contents = match read_to_string(outfile) {
            Ok(s) => s,
            Err(_) => {
                return Err(ProgramError::FileNotFound(outfile.to_owned()))
            }
        };
        if error_re.is_match(&contents) {
            return Err(ProgramError::ErrorInOutput(outfile.to_owned()));
        }

        let mut energy = None;
        let mut gradient = Vec::new();
        let mut time = 0.0;
        let mut skip = 0;
        let mut in_grad = false;
        for line in contents.lines() {
            if skip > 0 {
                skip -= 1;
            } else if let Some(cap) = energy_re.captures(line) {
                energy = match cap[1].parse::<f64>() {
                    Ok(v) => Some(v),
                    Err(_) => {
                        return Err(ProgramError::EnergyParseError(
                            outfile.to_owned(),
                        ))
                    }
                };
            } else if grad_re.is_match(line) {
                // header is followed by a blank line and a column-label line
                skip = 3;
                in_grad = true;
            } else if in_grad && line.trim().is_empty() {
                in_grad = false;
            } else if in_grad {
                // lines like "   1    0.0000    0.0000   -0.0123"
                for field in line.split_whitespace().skip(1) {
                    gradient.push(field.parse().map_err(|_| {
                        ProgramError::EnergyParseError(outfile.to_owned())
                    })?);
                }
            } else if time_re.is_match(line) {
                if let Some(t) = line
                    .split_ascii_whitespace()
                    .nth(3)
                    .and_then(|t| t.parse().ok())
                {
                    time = t;
                }
            }
        }

        let Some(energy) = energy else {
            return Err(ProgramError::EnergyNotFound(outfile.to_owned()));
        };
        Ok(OutData {
            energy,
            gradient,
            time,
        })
    }
}

impl Program for Molpro {
    fn name(&self) -> &'static str {
        "molpro"
    }

    fn found(&self) -> bool {
        which("molpro").is_some()
    }

    fn compute(
        &self,
        input: &AtomicInput,
        cfg: &TaskConfig,
    ) -> Result<AtomicResult, ProgramError> {
        let start = Instant::now();
        let Some(exe) = which("molpro") else {
            return Err(ProgramError::ExecutableNotFound(
                self.name().to_string(),
            ));
        };
        let dir = super::scratch_dir(self.name(), cfg)?;
        let infile = format!("{dir}/job.inp");
        let outfile = format!("{dir}/job.out");
        Self::write_input(input, cfg, &infile)?;

        let ncores = cfg.ncores.to_string();
        let out = Command::new(exe)
            .args(["-n", ncores.as_str()])
            .arg(&infile)
            .current_dir(&dir)
            .output()?;
        if !out.status.success() {
            return Err(ProgramError::Run(format!(
                "molpro exited with {}: {}",
                out.status,
                String::from_utf8_lossy(&out.stderr).trim()
            )));
        }
        let data = Self::read_output(&outfile)?;
        if input.driver == Driver::Gradient && data.gradient.is_empty() {
            return Err(ProgramError::EnergyParseError(outfile));
        }
        let stdout = read_to_string(&outfile).ok();
        let _ = std::fs::remove_dir_all(&dir);

        let return_result = match input.driver {
            Driver::Energy => ReturnValue::Energy(data.energy),
            Driver::Gradient => ReturnValue::Gradient(data.gradient),
        };
        Ok(AtomicResult {
            molecule: input.molecule.clone(),
            driver: input.driver,
            model: input.model.clone(),
            return_result: Some(return_result),
            properties: Properties {
                return_energy: Some(data.energy),
            },
            success: true,
            provenance: Provenance {
                memory: Some(cfg.memory),
                ncores: Some(cfg.ncores),
                wall_time: Some(if data.time > 0.0 {
                    data.time
                } else {
                    start.elapsed().as_secs_f64()
                }),
                ..Provenance::new(self.name(), "molpro::compute")
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
            dir.path().join("job.inp").to_string_lossy().to_string();
        let input = AtomicInput::new(
            get_molecule("hydrogen").unwrap(),
            Driver::Gradient,
            crate::models::Model::new("HF", "sto-3g"),
        );
        let cfg = TaskConfig {
            memory: 1.0,
            ncores: 1,
            scratch_directory: dir.path().to_string_lossy().to_string(),
        };
        Molpro::write_input(&input, &cfg, &infile).unwrap();
        let got = std::fs::read_to_string(&infile).unwrap();
        assert!(got.starts_with("***, qcdispatch\nmemory,134,m\n"));
        assert!(got.contains("basis=sto-3g\n"));
        assert!(got.contains("set,charge=0\n"));
        assert!(got.contains("\nhf\n"));
        assert!(got.ends_with("forces\n"));
    }

    #[test]
    fn test_read_output() {
        let dir = tempdir().unwrap();
        let outfile =
            dir.path().join("job.out").to_string_lossy().to_string();
        std::fs::write(
            &outfile,
            " !RHF STATE  1.1 Energy                 -1.117505881

 GRADIENT FOR STATE 1.1

 Atom          dE/dx               dE/dy               dE/dz

   1         0.000000000         0.000000000        -0.012345678
   2         0.000000000         0.000000000         0.012345678

 REAL TIME  *         1.23 SEC
",
        )
        .unwrap();
        let data = Molpro::read_output(&outfile).unwrap();
        assert!((data.energy + 1.117505881).abs() < 1e-10);
        assert_eq!(data.gradient.len(), 6);
        assert!((data.gradient[5] - 0.012345678).abs() < 1e-12);
        assert!((data.time - 1.23).abs() < 1e-10);
    }

    #[test]
    fn test_read_output_error() {
        let dir = tempdir().unwrap();
        let outfile =
            dir.path().join("job.out").to_string_lossy().to_string();
        std::fs::write(&outfile, " ERROR: insufficient memory\n").unwrap();
        assert!(matches!(
            Molpro::read_output(&outfile),
            Err(ProgramError::ErrorInOutput(_))
        ));
        assert!(matches!(
            Molpro::read_output("/nonexistent/job.out"),
            Err(ProgramError::FileNotFound(_))
        ));
    }
}
