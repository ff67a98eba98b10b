//! Symbols: named message formats of a domain, and message abstraction.
//!
//! A received message is abstracted by trying each symbol in declaration order; the
//! first one that parses wins and its memory writes are committed to the session.

use crate::bits::BitBuffer;
use crate::config::EngineConfig;
use crate::error::DomainError;
use crate::memory::Memory;
use crate::parser::VariableParser;
use crate::path::{FieldValue, GenericPath, ParsingPath, SpecializingPath};
use crate::specializer::{SpecializeOptions, VariableSpecializer};
use crate::variable::{VariableId, VariableTree};
use serde::Serialize;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Symbol {
    pub name: String,
    pub root: VariableId,
}

/// A normalized domain: one tree holding the roots of every symbol.
#[derive(Debug, Clone)]
pub struct Domain {
    pub tree: VariableTree,
    pub symbols: Vec<Symbol>,
}

#[derive(Debug, Clone)]
pub enum Abstraction {
    Matched { symbol: String, path: ParsingPath },
    /// No symbol matched the message.
    Unknown,
}

impl Abstraction {
    pub fn symbol(&self) -> Option<&str> {
        match self {
            Abstraction::Matched { symbol, .. } => Some(symbol),
            Abstraction::Unknown => None,
        }
    }
}

impl Domain {
    pub fn symbol(&self, name: &str) -> Option<&Symbol> {
        self.symbols.iter().find(|s| s.name == name)
    }

    /// Field `name` of `symbol` (nested fields included).
    pub fn field(&self, symbol: &str, name: &str) -> Option<VariableId> {
        let root = self.symbol(symbol)?.root;
        self.tree.find_within(root, name)
    }

    fn root_of(&self, symbol: &str) -> Result<VariableId, DomainError> {
        self.symbol(symbol)
            .map(|s| s.root)
            .ok_or_else(|| crate::factory::FactoryError::UnknownSymbol(symbol.to_string()).into())
    }

    /// All complete parses of `bits` as `symbol`; `memory` is not modified.
    pub fn parse(
        &self,
        symbol: &str,
        bits: &BitBuffer,
        memory: &Memory,
        config: &EngineConfig,
    ) -> Result<Vec<ParsingPath>, DomainError> {
        let root = self.root_of(symbol)?;
        VariableParser::with_config(&self.tree, config.clone()).parse(root, bits, memory)
    }

    /// One message of `symbol`, committing its memory writes.
    pub fn specialize(
        &self,
        symbol: &str,
        memory: &mut Memory,
        options: &SpecializeOptions,
        config: &EngineConfig,
    ) -> Result<SpecializingPath, DomainError> {
        let root = self.root_of(symbol)?;
        VariableSpecializer::with_config(&self.tree, config.clone()).specialize_with(root, memory, options)
    }

    pub fn fields(&self, path: &impl GenericPath) -> Vec<FieldValue> {
        path.fields(&self.tree)
    }
}

/// Find the first symbol that parses `bits` completely.
pub fn abstract_message(
    domain: &Domain,
    bits: &BitBuffer,
    memory: &mut Memory,
    config: &EngineConfig,
) -> Result<Abstraction, DomainError> {
    let parser = VariableParser::with_config(&domain.tree, config.clone());
    for symbol in &domain.symbols {
        if let Some(path) = parser.parse_first(symbol.root, bits, memory)? {
            debug!(symbol = %symbol.name, "message abstracted");
            return Ok(Abstraction::Matched {
                symbol: symbol.name.clone(),
                path,
            });
        }
    }
    debug!(len = bits.len(), "no symbol matched");
    Ok(Abstraction::Unknown)
}
