//! qcdispatch is a compute-dispatch layer for quantum-chemistry programs:
//! a registry of programs and multi-step procedures, a per-call resource
//! resolver, and a dispatcher that normalizes success and failure into
//! structured result records. The chemistry itself happens in an external
//! program; this crate only knows how to find one, invoke it, and report
//! what it did.

pub mod compute;
pub mod config;
pub mod models;
pub mod molecule;
pub mod procedure;
pub mod program;


pub use compute::{compute, compute_procedure, DispatchError};
pub use config::{get_config, load_options, LocalOptions};
pub use molecule::get_molecule;
pub use procedure::{
    list_all_procedures, list_available_procedures, register_procedure,
};
pub use program::{
    list_all_programs, list_available_programs, register_program,
};

/// from [StackOverflow](https://stackoverflow.com/a/45145246)
#[macro_export]
macro_rules! string {
    // match a list of expressions separated by comma:
    ($($str:expr),*) => ({
        // create a Vec with this list of expressions,
        // calling String::from on each:
        vec![$(String::from($str),)*] as Vec<String>
    });
}
