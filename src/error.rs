//! Error taxonomy.
//!
//! Recoverable conditions (a candidate that fails to decode, a relation that does not
//! match the wire) never show up here: they only drop the path being explored. The types
//! below are the fatal ones, surfaced to the caller of a top-level parse or specialize.

use crate::dsl::DslError;
use crate::factory::FactoryError;
use crate::types::TypeError;
use crate::variable::VariableId;

/// The variable tree is ill-formed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SpecificationError {
    #[error("Unknown node {0}")]
    UnknownNode(VariableId),
    #[error("{from} references unknown node {target}")]
    UnknownReference { from: String, target: VariableId },
    #[error("{0} has more than one parent")]
    SharedChild(String),
    #[error("{0} is its own descendant")]
    Cycle(String),
    #[error("Contradictory bounds on {node}: min {min} > max {max}")]
    ContradictoryBounds { node: String, min: usize, max: usize },
    #[error("Fixed value of {node} ({len} bits) is outside its size constraint")]
    FixedValueOutOfBounds { node: String, len: usize },
    #[error("Relation {0} has no targets")]
    EmptyRelation(String),
    #[error("Cyclic relation dependency through {0}")]
    CyclicRelation(String),
    #[error("Invalid relation {node}: {reason}")]
    InvalidRelation { node: String, reason: String },
}

/// Generation could not produce a message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SpecializationError {
    #[error("No value available for {0}")]
    NoValue(String),
    #[error("Relation {0} could not be resolved")]
    UnresolvedRelation(String),
    #[error("Width of relation {0} cannot be determined before its targets")]
    UndeterminedWidth(String),
    #[error("Forced value for {node} rejected: {reason}")]
    InvalidForcedValue { node: String, reason: String },
    #[error("No specialization of {0} succeeded")]
    Exhausted(String),
}

#[derive(Debug, thiserror::Error)]
pub enum DomainError {
    #[error("Specification: {0}")]
    Specification(#[from] SpecificationError),
    #[error("Specialization: {0}")]
    Specialization(#[from] SpecializationError),
    #[error("Search budget exceeded ({limit} steps)")]
    SearchBudgetExceeded { limit: u64 },
    #[error("Type: {0}")]
    Type(#[from] TypeError),
    #[error("Config: {0}")]
    Config(String),
    #[error("Description: {0}")]
    Dsl(#[from] DslError),
    #[error("Description: {0}")]
    Factory(#[from] FactoryError),
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
}
