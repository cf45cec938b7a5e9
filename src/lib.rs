mod ast;
mod constraints;
mod error;
mod graph;
mod interleave;
mod synth;
mod timeline;
mod tree;

pub use ast::{Instr, Program};
pub use constraints::{Constraint, ForkConstraint};
pub use error::Error;
pub use graph::{ProcessGraph, tree_csv};
pub use interleave::{
    answer_pool, possibly_invalid_interleaving, valid_interleaving, verify_interleaving, weave,
};
pub use synth::{SynthesisParams, Synthesizer};
pub use timeline::{Timeline, TimelineLink, TimelineNode};
pub use tree::{Line, Listing, Pid, ProcNode, ProcessTree, Simulation};

/// Parses fork DSL source into a program.
pub fn parse(input: &str) -> Result<Program, Error> {
    ast::parse(input)
}

/// Parses and runs a program, returning the finished tree, the transpiled
/// listing and the wait edges.
pub fn simulate(input: &str) -> Result<Simulation, Error> {
    Ok(tree::build(&parse(input)?))
}

/// Like [`simulate`] but stops after `max_lines` listing lines, leaving a
/// partial tree for step-by-step display.
pub fn simulate_partial(input: &str, max_lines: i64) -> Result<Simulation, Error> {
    Ok(tree::build_partial(&parse(input)?, max_lines))
}

/// Parses a program and derives its print-ordering constraints.
pub fn extract_constraints(input: &str) -> Result<Vec<Constraint>, Error> {
    Ok(constraints::extract(&parse(input)?))
}
