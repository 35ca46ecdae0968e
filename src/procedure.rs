//! The procedure registry: multi-step drivers that themselves dispatch one
//! or more programs per step. Same shape as the program registry, with the
//! same registered-versus-available distinction.

use std::{
    collections::{BTreeSet, HashMap},
    sync::{Arc, OnceLock, RwLock},
};

use log::debug;
use rayon::prelude::*;

use crate::{
    config::TaskConfig,
    models::{OptimizationInput, OptimizationResult},
    program::ProgramError,
};

pub mod geomopt;

/// one multi-step procedure. `run` reports delegated-program failures by
/// returning a failed [OptimizationResult], not an error; `Err` is reserved
/// for failures of the procedure machinery itself
pub trait Procedure: Send + Sync {
    fn name(&self) -> &'static str;

    fn found(&self) -> bool;

    fn run(
        &self,
        input: &OptimizationInput,
        cfg: &TaskConfig,
    ) -> Result<OptimizationResult, ProgramError>;
}

type Registry = RwLock<HashMap<String, Arc<dyn Procedure>>>;

static PROCEDURES: OnceLock<Registry> = OnceLock::new();

fn procedures() -> &'static Registry {
    PROCEDURES.get_or_init(|| {
        let defaults: [Arc<dyn Procedure>; 1] = [Arc::new(geomopt::GeomOpt)];
        let mut map = HashMap::new();
        for p in defaults {
            debug!("registering procedure {}", p.name());
            map.insert(p.name().to_string(), p);
        }
        RwLock::new(map)
    })
}

/// add `procedure` to the registry, replacing any previous adapter with the
/// same name
pub fn register_procedure(procedure: Arc<dyn Procedure>) {
    procedures()
        .write()
        .unwrap()
        .insert(procedure.name().to_string(), procedure);
}

pub(crate) fn get_procedure(name: &str) -> Option<Arc<dyn Procedure>> {
    procedures().read().unwrap().get(name).cloned()
}

/// every procedure name known to the registry
pub fn list_all_procedures() -> BTreeSet<String> {
    procedures().read().unwrap().keys().cloned().collect()
}

/// the subset of registered procedures usable on this host
pub fn list_available_procedures() -> BTreeSet<String> {
    let all: Vec<Arc<dyn Procedure>> =
        procedures().read().unwrap().values().cloned().collect();
    all.par_iter()
        .filter(|p| p.found())
        .map(|p| p.name().to_string())
        .collect()
}
