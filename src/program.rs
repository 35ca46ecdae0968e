//! The program registry: a mapping from target names to the adapters that
//! know how to invoke one external quantum-chemistry program. The registry
//! is populated once on first use and is read-only from the dispatcher's
//! side; [register_program] exists for callers that bring their own adapters
//! at startup.

use std::{
    collections::{BTreeSet, HashMap},
    env,
    path::PathBuf,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, OnceLock, RwLock,
    },
};

use log::debug;
use rayon::prelude::*;
use thiserror::Error;

use crate::{
    config::TaskConfig,
    models::{AtomicInput, AtomicResult},
};

pub mod dftd3;
pub mod harmonic;
pub mod molpro;
pub mod mopac;
pub mod psi4;

#[derive(Debug, Error)]
pub enum ProgramError {
    #[error("failed to find `{0}`")]
    FileNotFound(String),

    #[error("error detected in output file `{0}`")]
    ErrorInOutput(String),

    #[error("no energy found in `{0}`")]
    EnergyNotFound(String),

    #[error("failed to parse energy from `{0}`")]
    EnergyParseError(String),

    #[error("molecule has no connectivity, which `{0}` requires")]
    MissingConnectivity(String),

    #[error("executable for `{0}` not found on this host")]
    ExecutableNotFound(String),

    #[error("{0}")]
    Run(String),

    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Json(#[from] serde_json::Error),
}

impl ProgramError {
    /// a short tag for the error payload of a failed result
    pub fn kind(&self) -> &'static str {
        match self {
            Self::FileNotFound(_) => "file_not_found",
            Self::ErrorInOutput(_) => "error_in_output",
            Self::EnergyNotFound(_) => "energy_not_found",
            Self::EnergyParseError(_) => "energy_parse_error",
            Self::MissingConnectivity(_) => "input_error",
            Self::ExecutableNotFound(_) => "executable_not_found",
            Self::Run(_) => "execution_error",
            Self::Io(_) => "io_error",
            Self::Json(_) => "json_error",
        }
    }
}

/// one external program. `found` reports whether the backing executable or
/// library is actually usable on this host; a program can be registered
/// without being found
pub trait Program: Send + Sync {
    fn name(&self) -> &'static str;

    fn found(&self) -> bool;

    fn compute(
        &self,
        input: &AtomicInput,
        cfg: &TaskConfig,
    ) -> Result<AtomicResult, ProgramError>;
}

type Registry = RwLock<HashMap<String, Arc<dyn Program>>>;

static PROGRAMS: OnceLock<Registry> = OnceLock::new();

fn programs() -> &'static Registry {
    PROGRAMS.get_or_init(|| {
        let defaults: [Arc<dyn Program>; 5] = [
            Arc::new(harmonic::Harmonic),
            Arc::new(mopac::Mopac),
            Arc::new(molpro::Molpro),
            Arc::new(psi4::Psi4),
            Arc::new(dftd3::Dftd3),
        ];
        let mut map = HashMap::new();
        for p in defaults {
            debug!("registering program {}", p.name());
            map.insert(p.name().to_string(), p);
        }
        RwLock::new(map)
    })
}

/// add `program` to the registry, replacing any previous adapter with the
/// same name
pub fn register_program(program: Arc<dyn Program>) {
    programs()
        .write()
        .unwrap()
        .insert(program.name().to_string(), program);
}

pub(crate) fn get_program(name: &str) -> Option<Arc<dyn Program>> {
    programs().read().unwrap().get(name).cloned()
}

/// every program name known to the registry, regardless of whether the
/// backing executable is installed
pub fn list_all_programs() -> BTreeSet<String> {
    programs().read().unwrap().keys().cloned().collect()
}

/// the subset of registered programs actually usable on this host. probing
/// hits the filesystem once per program, so it runs in parallel
pub fn list_available_programs() -> BTreeSet<String> {
    let all: Vec<Arc<dyn Program>> =
        programs().read().unwrap().values().cloned().collect();
    all.par_iter()
        .filter(|p| p.found())
        .map(|p| p.name().to_string())
        .collect()
}

/// search PATH for an executable named `exe`
pub(crate) fn which(exe: &str) -> Option<PathBuf> {
    let paths = env::var_os("PATH")?;
    env::split_paths(&paths)
        .map(|p| p.join(exe))
        .find(|p| p.is_file())
}

/// create a fresh scratch subdirectory for one invocation of `prog`. the
/// counter keeps concurrent calls in the same process from sharing a
/// directory, since each caller deletes its own when finished
pub(crate) fn scratch_dir(
    prog: &str,
    cfg: &TaskConfig,
) -> Result<String, std::io::Error> {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let dir = format!(
        "{}/qcdispatch.{prog}.{}.{}",
        cfg.scratch_directory,
        std::process::id(),
        COUNTER.fetch_add(1, Ordering::Relaxed)
    );
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn test_scratch_dir_unique() {
        let tmp = tempdir().unwrap();
        let cfg = TaskConfig {
            memory: 1.0,
            ncores: 1,
            scratch_directory: tmp.path().to_string_lossy().to_string(),
        };
        let a = scratch_dir("mopac", &cfg).unwrap();
        let b = scratch_dir("mopac", &cfg).unwrap();
        assert_ne!(a, b);
        assert!(std::path::Path::new(&a).is_dir());
        assert!(std::path::Path::new(&b).is_dir());
    }
}
