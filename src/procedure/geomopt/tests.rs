use std::sync::Arc;

use crate::{
    compute::compute_procedure,
    config::{LocalOptions, TaskConfig},
    models::{
        AtomicInput, AtomicResult, Driver, InputSpecification, Model,
        OptimizationInput, OptimizationKeywords, Properties, Provenance,
        ReturnValue,
    },
    molecule::{get_molecule, Molecule},
    program::{register_program, Program, ProgramError},
};

fn opt_input(mol: Molecule, program: &str) -> OptimizationInput {
    OptimizationInput {
        input_specification: InputSpecification {
            driver: Driver::Gradient,
            model: Model::new("harmonic", ""),
            keywords: Default::default(),
        },
        initial_molecule: mol,
        keywords: OptimizationKeywords {
            program: program.to_string(),
            ..Default::default()
        },
    }
}

#[test]
fn test_optimize_hydrogen() {
    let inp = opt_input(get_molecule("hydrogen").unwrap(), "harmonic");
    let ret = compute_procedure(&inp, "geomopt", true, None).unwrap();
    assert!(ret.success);

    let n = ret.trajectory.len();
    assert!(1 < n && n < 10, "unexpected trajectory length {n}");
    assert_eq!(ret.energies.len(), n);
    // steepest descent on a quadratic never goes uphill
    assert!(ret.energies.windows(2).all(|w| w[1] <= w[0]));

    let got = ret.final_molecule.as_ref().unwrap().distance(0, 1);
    let want = 1.3459150737;
    assert!(
        ((got - want) / want).abs() < 1e-4,
        "got {got}, want {want}"
    );

    assert_eq!(ret.provenance.creator, "geomopt");
    assert_eq!(ret.trajectory[0].provenance.creator, "harmonic");
}

#[test]
fn test_local_options() {
    let inp = opt_input(get_molecule("hydrogen").unwrap(), "harmonic");
    // an extremely large ceiling, to make the reported value unambiguous
    let ret = compute_procedure(
        &inp,
        "geomopt",
        true,
        Some(LocalOptions::with_memory(5000.0)),
    )
    .unwrap();

    let mem = ret.trajectory[0].provenance.memory.unwrap();
    assert!(mem <= 5000.0);
    assert!((mem - 4900.0).abs() < 1e-6);

    // the call-scoped config must not leak into the result anywhere,
    // including the nested trajectory entries
    let json = serde_json::to_string(&ret).unwrap();
    assert!(!json.contains("_local_config"));
    assert!(!json.contains("scratch_directory"));
    for step in &ret.trajectory {
        assert!(step.extras.is_empty());
    }
}

#[test]
fn test_stdout() {
    let inp = opt_input(get_molecule("water").unwrap(), "harmonic");
    let ret = compute_procedure(&inp, "geomopt", true, None).unwrap();
    assert!(ret.success);
    assert!(ret.stdout.as_ref().unwrap().contains("Converged!"));
}

#[test]
fn test_missing_connectivity() {
    let water = get_molecule("water").unwrap().without_connectivity();
    let inp = opt_input(water, "harmonic");
    // no raise_error: the failure must come back in the result
    let ret = compute_procedure(&inp, "geomopt", false, None).unwrap();
    assert!(!ret.success);
    assert!(ret.final_molecule.is_none());
    let err = ret.error.unwrap();
    assert!(!err.error_message.is_empty());
    assert!(err.error_message.contains("connectivity"));
}

#[test]
fn test_unregistered_delegate() {
    let inp = opt_input(get_molecule("hydrogen").unwrap(), "bad_program");
    let ret = compute_procedure(&inp, "geomopt", false, None).unwrap();
    assert!(!ret.success);
    assert!(ret
        .error
        .unwrap()
        .error_message
        .contains("not registered"));
}

/// reports success but with a gradient too short for the molecule
struct ShortGrad;

impl Program for ShortGrad {
    fn name(&self) -> &'static str {
        "shortgrad"
    }

    fn found(&self) -> bool {
        true
    }

    fn compute(
        &self,
        input: &AtomicInput,
        _cfg: &TaskConfig,
    ) -> Result<AtomicResult, ProgramError> {
        Ok(AtomicResult {
            molecule: input.molecule.clone(),
            driver: input.driver,
            model: input.model.clone(),
            return_result: Some(ReturnValue::Gradient(vec![0.1])),
            properties: Properties {
                return_energy: Some(1.0),
            },
            success: true,
            provenance: Provenance::new("shortgrad", "shortgrad"),
            ..Default::default()
        })
    }
}

#[test]
fn test_gradient_length_mismatch() {
    register_program(Arc::new(ShortGrad));
    let inp = opt_input(get_molecule("hydrogen").unwrap(), "shortgrad");
    let ret = compute_procedure(&inp, "geomopt", false, None).unwrap();
    assert!(!ret.success);
    // the geometry must not be partially updated from a truncated zip
    assert!(ret.final_molecule.is_none());
    let err = ret.error.unwrap();
    assert_eq!(err.error_type, "execution_error");
    assert!(err.error_message.contains("gradient of length 1"));
}

#[test]
fn test_empty_molecule() {
    let mol = Molecule {
        connectivity: Some(Vec::new()),
        ..Molecule::default()
    };
    let inp = opt_input(mol, "harmonic");
    let ret = compute_procedure(&inp, "geomopt", false, None).unwrap();
    assert!(!ret.success);
    assert!(ret.trajectory.is_empty());
    let err = ret.error.unwrap();
    assert_eq!(err.error_type, "input_error");
    assert!(err.error_message.contains("no atoms"));
}

#[test]
fn test_unconverged() {
    let mut inp = opt_input(get_molecule("hydrogen").unwrap(), "harmonic");
    inp.keywords.maxiter = 1;
    let ret = compute_procedure(&inp, "geomopt", false, None).unwrap();
    assert!(!ret.success);
    assert_eq!(ret.trajectory.len(), 1);
    assert!(ret.error.unwrap().error_message.contains("converge"));
}
