//! The dispatcher: resolve a target name in the program or procedure
//! registry, resolve local options into a call-scoped [TaskConfig], invoke
//! the adapter, and normalize the outcome. Failures follow a two-mode
//! policy selected by `raise_error`: either returned as `Err` or folded
//! into a failed result record, never both.

use log::debug;
use thiserror::Error;

use crate::{
    config::{get_config, ConfigError, LocalOptions, TaskConfig},
    models::{
        AtomicInput, AtomicResult, ComputeError, OptimizationInput,
        OptimizationResult,
    },
    procedure,
    program::{self, ProgramError},
};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("program `{0}` is not registered")]
    ProgramNotRegistered(String),

    #[error("procedure `{0}` is not registered")]
    ProcedureNotRegistered(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Program(#[from] ProgramError),

    /// a failed result surfaced as an error because the caller asked for
    /// errors to be raised
    #[error("{0}")]
    Operation(String),
}

impl DispatchError {
    fn kind(&self) -> &'static str {
        match self {
            Self::ProgramNotRegistered(_)
            | Self::ProcedureNotRegistered(_) => "input_error",
            Self::Config(_) => "config_error",
            Self::Program(e) => e.kind(),
            Self::Operation(_) => "execution_error",
        }
    }
}

fn resolve_config(
    local_options: Option<&LocalOptions>,
) -> Result<TaskConfig, DispatchError> {
    Ok(get_config(local_options)?)
}

/// run `program_name` on `input`. with `raise_error` any failure comes back
/// as `Err`; without it, failures are captured in the returned record with
/// `success` false and the error payload populated
pub fn compute(
    input: &AtomicInput,
    program_name: &str,
    raise_error: bool,
    local_options: Option<LocalOptions>,
) -> Result<AtomicResult, DispatchError> {
    let bounce = |e: DispatchError| {
        if raise_error {
            Err(e)
        } else {
            Ok(AtomicResult::failure(
                input,
                program_name,
                ComputeError::new(e.kind(), e.to_string()),
            ))
        }
    };

    let Some(program) = program::get_program(program_name) else {
        return bounce(DispatchError::ProgramNotRegistered(
            program_name.to_string(),
        ));
    };
    let cfg = match resolve_config(local_options.as_ref()) {
        Ok(cfg) => cfg,
        Err(e) => return bounce(e),
    };
    debug!("dispatching program {program_name}");
    match program.compute(input, &cfg) {
        Ok(res) if res.success || !raise_error => Ok(res),
        Ok(res) => {
            let msg = res
                .error
                .map(|e| e.error_message)
                .unwrap_or_else(|| {
                    format!("`{program_name}` failed without a message")
                });
            Err(DispatchError::Operation(msg))
        }
        Err(e) => bounce(e.into()),
    }
}

/// run `procedure_name` on `input`, under the same two-mode error policy as
/// [compute]
pub fn compute_procedure(
    input: &OptimizationInput,
    procedure_name: &str,
    raise_error: bool,
    local_options: Option<LocalOptions>,
) -> Result<OptimizationResult, DispatchError> {
    let bounce = |e: DispatchError| {
        if raise_error {
            Err(e)
        } else {
            Ok(OptimizationResult::failure(
                input,
                procedure_name,
                ComputeError::new(e.kind(), e.to_string()),
            ))
        }
    };

    let Some(procedure) = procedure::get_procedure(procedure_name) else {
        return bounce(DispatchError::ProcedureNotRegistered(
            procedure_name.to_string(),
        ));
    };
    let cfg = match resolve_config(local_options.as_ref()) {
        Ok(cfg) => cfg,
        Err(e) => return bounce(e),
    };
    debug!("dispatching procedure {procedure_name}");
    match procedure.run(input, &cfg) {
        Ok(res) if res.success || !raise_error => Ok(res),
        Ok(res) => {
            let msg = res
                .error
                .map(|e| e.error_message)
                .unwrap_or_else(|| {
                    format!("`{procedure_name}` failed without a message")
                });
            Err(DispatchError::Operation(msg))
        }
        Err(e) => bounce(e.into()),
    }
}
