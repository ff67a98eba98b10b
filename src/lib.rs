//! # protodomain: Symbolic protocol field domains
//!
//! Message formats are described as trees of variables (leaves, aggregates, alternatives,
//! repeats and relations). The same tree drives two directions:
//!
//! - **abstraction**: parse a received bit string into every consistent assignment of
//!   bits to variables ([`parser::VariableParser`]);
//! - **specialization**: produce a concrete bit string from the tree, generating free
//!   values and computing relations ([`specializer::VariableSpecializer`]).
//!
//! Relations (sizes, copied values, hashes, HMACs, checksums) whose targets are not yet
//! bound are resolved by callbacks once the targets are. Session memory carries values
//! between messages according to each variable's SVAS policy.
//!
//! ## Description language
//!
//! ```text
//! symbol Transfer {
//!   len: size(payload) uint8;
//!   payload: raw(1..64);
//!   digest: hash(md5, payload);
//! }
//! ```
//!
//! ## Usage
//!
//! ```no_run
//! use protodomain::{DomainFactory, EngineConfig, Memory, SpecializeOptions};
//!
//! let domain = DomainFactory::from_source("symbol Ping { kind: 0x08; id: uint16; }")?;
//! let config = EngineConfig::default();
//! let mut memory = Memory::new();
//! let message = domain.specialize("Ping", &mut memory, &SpecializeOptions::new(), &config)?;
//! let paths = domain.parse("Ping", &message.into_data(), &memory, &config)?;
//! assert!(!paths.is_empty());
//! # Ok::<(), protodomain::DomainError>(())
//! ```

pub mod ast;
pub mod bits;
pub mod budget;
pub mod config;
pub mod digest;
pub mod dsl;
pub mod dump;
pub mod error;
pub mod factory;
pub mod memory;
pub mod parser;
pub mod path;
pub mod relation;
pub mod specializer;
pub mod symbol;
pub mod types;
pub mod value;
pub mod variable;

pub use ast::DomainDescription;
pub use bits::BitBuffer;
pub use config::{AlternativeStrategy, EngineConfig, RepeatStrategy};
pub use error::{DomainError, SpecializationError, SpecificationError};
pub use factory::{DomainFactory, FactoryError};
pub use memory::Memory;
pub use parser::VariableParser;
pub use path::{FieldValue, GenericPath, ParsingPath, SpecializingPath};
pub use specializer::{SpecializeOptions, VariableSpecializer};
pub use symbol::{abstract_message, Abstraction, Domain, Symbol};
pub use types::DataType;
pub use value::Value;
pub use variable::{VariableId, VariableTree};
