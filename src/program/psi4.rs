//! Adapter for Psi4, driven through its JSON schema interface: serialize the
//! request to a JSON file, run `psi4 --qcschema`, and read the same file
//! back as the result.

use std::{fs::read_to_string, process::Command, time::Instant};

use serde_json::{json, Value};

use crate::{
    config::TaskConfig,
    models::{
        AtomicInput, AtomicResult, Properties, Provenance, ReturnValue,
    },
};

use super::{which, Program, ProgramError};

pub struct Psi4;

impl Psi4 {
    fn schema_input(input: &AtomicInput, cfg: &TaskConfig) -> Value {
        let mol = &input.molecule;
        json!({
            "schema_name": "qcschema_input",
            "schema_version": 1,
            "molecule": {
                "symbols": mol.symbols,
                "geometry": mol.geometry,
                "molecular_charge": mol.charge,
                "molecular_multiplicity": mol.multiplicity,
            },
            "driver": input.driver,
            "model": input.model,
            "keywords": input.keywords,
            // working memory in GiB; psi4 wants an explicit unit
            "memory": format!("{:.3} gib", cfg.memory),
        })
    }
}

impl Program for Psi4 {
    fn name(&self) -> &'static str {
        "psi4"
    }

    fn found(&self) -> bool {
        which("psi4").is_some()
    }

    fn compute(
        &self,
        input: &AtomicInput,
        cfg: &TaskConfig,
    ) -> Result<AtomicResult, ProgramError> {
        let start = Instant::now();
        let Some(exe) = which("psi4") else {
            return Err(ProgramError::ExecutableNotFound(
                self.name().to_string(),
            ));
        };
        let dir = super::scratch_dir(self.name(), cfg)?;
        let jobfile = format!("{dir}/job.json");
        let job = Self::schema_input(input, cfg);
        std::fs::write(&jobfile, serde_json::to_string(&job)?)?;

        // psi4 overwrites the input file with the output schema
        let ncores = cfg.ncores.to_string();
        let out = Command::new(exe)
            .args(["--qcschema", "-n", ncores.as_str()])
            .arg(&jobfile)
            .current_dir(&dir)
            .output()?;
        if !out.status.success() {
            return Err(ProgramError::Run(format!(
                "psi4 exited with {}: {}",
                out.status,
                String::from_utf8_lossy(&out.stderr).trim()
            )));
        }
        let contents = match read_to_string(&jobfile) {
            Ok(s) => s,
            Err(_) => return Err(ProgramError::FileNotFound(jobfile)),
        };
        let val: Value = serde_json::from_str(&contents)?;
        let _ = std::fs::remove_dir_all(&dir);

        if !val["success"].as_bool().unwrap_or(false) {
            let msg = val["error"]["error_message"]
                .as_str()
                .unwrap_or("psi4 failed without an error message");
            return Err(ProgramError::Run(msg.to_string()));
        }
        let return_result: ReturnValue =
            serde_json::from_value(val["return_result"].clone())
                .map_err(|_| ProgramError::EnergyNotFound(jobfile.clone()))?;
        let return_energy = val["properties"]["return_energy"].as_f64();
        let version = val["provenance"]["version"]
            .as_str()
            .unwrap_or_default()
            .to_string();
        Ok(AtomicResult {
            molecule: input.molecule.clone(),
            driver: input.driver,
            model: input.model.clone(),
            return_result: Some(return_result),
            properties: Properties { return_energy },
            success: true,
            provenance: Provenance {
                version,
                memory: Some(cfg.memory),
                ncores: Some(cfg.ncores),
                wall_time: Some(start.elapsed().as_secs_f64()),
                ..Provenance::new(self.name(), "psi4::compute")
            },
            stdout: val["stdout"].as_str().map(str::to_string),
            error: None,
            extras: input.extras.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        models::{Driver, Model},
        molecule::get_molecule,
    };

    use super::*;

    #[test]
    fn test_schema_input() {
        let input = AtomicInput::new(
            get_molecule("hydrogen").unwrap(),
            Driver::Gradient,
            Model::new("HF", "sto-3g"),
        );
        let cfg = TaskConfig {
            memory: 2.0,
            ncores: 2,
            scratch_directory: String::from("/tmp"),
        };
        let val = Psi4::schema_input(&input, &cfg);
        assert_eq!(val["schema_name"], "qcschema_input");
        assert_eq!(val["driver"], "gradient");
        assert_eq!(val["model"]["basis"], "sto-3g");
        assert_eq!(val["molecule"]["symbols"][0], "H");
        assert_eq!(val["memory"], "2.000 gib");
        // the call-scoped config itself must not be embedded
        assert!(val.get("local_config").is_none());
    }
}
