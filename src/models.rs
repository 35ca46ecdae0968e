//! The input and result records exchanged with program and procedure
//! adapters. These are the only types that cross the dispatch boundary; the
//! call-scoped [TaskConfig](crate::config::TaskConfig) is deliberately not
//! part of any of them, so internal resource configuration can never leak
//! into a serialized result.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::molecule::Molecule;

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Driver {
    #[default]
    Energy,
    Gradient,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Model {
    pub method: String,

    #[serde(default)]
    pub basis: String,
}

impl Model {
    pub fn new(method: &str, basis: &str) -> Self {
        Self {
            method: method.to_string(),
            basis: basis.to_string(),
        }
    }
}

/// a single-program computation request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AtomicInput {
    pub molecule: Molecule,
    pub driver: Driver,
    pub model: Model,

    #[serde(default)]
    pub keywords: HashMap<String, Value>,

    #[serde(default)]
    pub extras: HashMap<String, Value>,
}

impl AtomicInput {
    pub fn new(molecule: Molecule, driver: Driver, model: Model) -> Self {
        Self {
            molecule,
            driver,
            model,
            ..Self::default()
        }
    }
}

/// who produced a result and what resources it used. `memory` is the working
/// memory ceiling in GiB actually handed to the program, which is at or below
/// whatever the caller requested
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    pub creator: String,

    #[serde(default)]
    pub version: String,

    #[serde(default)]
    pub routine: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ncores: Option<usize>,

    /// wall time of the invocation in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wall_time: Option<f64>,
}

impl Provenance {
    pub fn new(creator: &str, routine: &str) -> Self {
        Self {
            creator: creator.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            routine: routine.to_string(),
            ..Self::default()
        }
    }
}

/// the error payload embedded in a failed result when the caller did not ask
/// for errors to be raised
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputeError {
    pub error_type: String,
    pub error_message: String,
}

impl ComputeError {
    pub fn new(error_type: &str, error_message: impl Into<String>) -> Self {
        Self {
            error_type: error_type.to_string(),
            error_message: error_message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ReturnValue {
    Energy(f64),
    Gradient(Vec<f64>),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Properties {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_energy: Option<f64>,
}

/// the normalized outcome of one program invocation. exactly one of
/// `return_result` and `error` is populated, tracking `success`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AtomicResult {
    pub molecule: Molecule,
    pub driver: Driver,
    pub model: Model,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_result: Option<ReturnValue>,

    #[serde(default)]
    pub properties: Properties,

    pub success: bool,
    pub provenance: Provenance,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ComputeError>,

    #[serde(default)]
    pub extras: HashMap<String, Value>,
}

impl AtomicResult {
    /// a failed result echoing back the fields of `input`
    pub fn failure(
        input: &AtomicInput,
        creator: &str,
        error: ComputeError,
    ) -> Self {
        Self {
            molecule: input.molecule.clone(),
            driver: input.driver,
            model: input.model.clone(),
            success: false,
            provenance: Provenance::new(creator, "failure"),
            error: Some(error),
            ..Self::default()
        }
    }

    pub fn energy(&self) -> Option<f64> {
        match &self.return_result {
            Some(ReturnValue::Energy(e)) => Some(*e),
            _ => self.properties.return_energy,
        }
    }

    pub fn gradient(&self) -> Option<&[f64]> {
        match &self.return_result {
            Some(ReturnValue::Gradient(g)) => Some(g),
            _ => None,
        }
    }
}

/// the single-program part of an [OptimizationInput]: what to ask the
/// delegated program for at each step
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InputSpecification {
    pub driver: Driver,
    pub model: Model,

    #[serde(default)]
    pub keywords: HashMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationKeywords {
    /// the name of the program to delegate per-step computation to
    #[serde(default)]
    pub program: String,

    #[serde(default = "default_maxiter")]
    pub maxiter: usize,

    /// steepest-descent step length in bohr^2 / hartree
    #[serde(default = "default_step")]
    pub step: f64,

    /// rms gradient convergence threshold in hartree / bohr
    #[serde(default = "default_gtol")]
    pub gtol: f64,
}

fn default_maxiter() -> usize {
    100
}

fn default_step() -> f64 {
    0.9
}

fn default_gtol() -> f64 {
    1e-5
}

impl Default for OptimizationKeywords {
    fn default() -> Self {
        Self {
            program: String::new(),
            maxiter: default_maxiter(),
            step: default_step(),
            gtol: default_gtol(),
        }
    }
}

/// a multi-step procedure request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OptimizationInput {
    pub input_specification: InputSpecification,
    pub initial_molecule: Molecule,

    #[serde(default)]
    pub keywords: OptimizationKeywords,
}

/// the normalized outcome of one procedure invocation. each entry in
/// `trajectory` carries the provenance of the delegated program, while the
/// top-level `provenance` identifies the procedure itself. `trajectory` is
/// non-empty whenever `success` is true
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OptimizationResult {
    pub input_specification: InputSpecification,
    pub initial_molecule: Molecule,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_molecule: Option<Molecule>,

    pub trajectory: Vec<AtomicResult>,
    pub energies: Vec<f64>,

    pub success: bool,
    pub provenance: Provenance,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ComputeError>,
}

impl OptimizationResult {
    /// a failed result echoing back the fields of `input`
    pub fn failure(
        input: &OptimizationInput,
        creator: &str,
        error: ComputeError,
    ) -> Self {
        Self {
            input_specification: input.input_specification.clone(),
            initial_molecule: input.initial_molecule.clone(),
            success: false,
            provenance: Provenance::new(creator, "failure"),
            error: Some(error),
            ..Self::default()
        }
    }
}
