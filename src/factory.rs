//! Domain factory: normalizes descriptions into a validated variable tree.
//!
//! - a bare literal becomes a constant leaf of the matching type;
//! - an alternative with a single choice collapses into that choice, and identical
//!   literal choices are kept once (first occurrence wins);
//! - relation targets are field names of the same symbol, or `Symbol.field` to reach a
//!   field of another symbol through session memory.

use crate::ast::*;
use crate::bits::BitBuffer;
use crate::digest::{ChecksumAlgorithm, HashAlgorithm, HmacAlgorithm};
use crate::error::{DomainError, SpecificationError};
use crate::symbol::{Domain, Symbol};
use crate::types::{DataType, EnumConstant, Epoch, IntegerFormat, Sign, TimestampFormat, UnitSize, Unity};
use crate::value::Value;
use crate::variable::{Leaf, Relation, Repeat, SizeConstraint, TreeBuilder, VariableId};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FactoryError {
    #[error("Duplicate symbol {0}")]
    DuplicateSymbol(String),
    #[error("Duplicate field {field} in {symbol}")]
    DuplicateField { symbol: String, field: String },
    #[error("Unknown symbol {0}")]
    UnknownSymbol(String),
    #[error("Unknown target {target} in {symbol}")]
    UnknownTarget { symbol: String, target: String },
    #[error("Unknown type {0}")]
    UnknownType(String),
    #[error("Unknown algorithm {0}")]
    UnknownAlgorithm(String),
    #[error("Invalid literal for {field}: {reason}")]
    InvalidLiteral { field: String, reason: String },
    #[error("{0}")]
    Specification(#[from] SpecificationError),
}

struct PendingTargets {
    relation: VariableId,
    symbol: String,
    targets: Vec<String>,
}

#[derive(Default)]
pub struct DomainFactory {
    builder: TreeBuilder,
    scopes: HashMap<String, HashMap<String, VariableId>>,
    pending: Vec<PendingTargets>,
}

impl DomainFactory {
    pub fn build(description: &DomainDescription) -> Result<Domain, FactoryError> {
        let mut factory = DomainFactory::default();
        let mut symbols = Vec::with_capacity(description.symbols.len());
        for symbol in &description.symbols {
            if factory.scopes.contains_key(&symbol.name) {
                return Err(FactoryError::DuplicateSymbol(symbol.name.clone()));
            }
            factory.scopes.insert(symbol.name.clone(), HashMap::new());
            let children = symbol
                .fields
                .iter()
                .map(|f| factory.field(&symbol.name, f))
                .collect::<Result<Vec<_>, _>>()?;
            let root = factory.builder.aggregate(&symbol.name, children);
            symbols.push(Symbol {
                name: symbol.name.clone(),
                root,
            });
        }
        factory.resolve_targets()?;
        let tree = factory.builder.build()?;
        Ok(Domain { tree, symbols })
    }

    /// Parse description source and build it.
    pub fn from_source(source: &str) -> Result<Domain, DomainError> {
        let description = crate::dsl::parse(source)?;
        Ok(Self::build(&description)?)
    }

    fn field(&mut self, symbol: &str, field: &FieldDef) -> Result<VariableId, FactoryError> {
        let id = self.node(symbol, &field.name, &field.node)?;
        self.register(symbol, &field.name, id)?;
        if let Some(svas) = field.svas {
            self.builder.set_svas(id, svas);
        }
        if let Some(recall) = field.recall {
            self.builder.set_recall(id, recall);
        }
        Ok(id)
    }

    fn register(&mut self, symbol: &str, name: &str, id: VariableId) -> Result<(), FactoryError> {
        let scope = self.scopes.entry(symbol.to_string()).or_default();
        if scope.insert(name.to_string(), id).is_some() {
            return Err(FactoryError::DuplicateField {
                symbol: symbol.to_string(),
                field: name.to_string(),
            });
        }
        Ok(())
    }

    fn node(&mut self, symbol: &str, name: &str, node: &NodeDef) -> Result<VariableId, FactoryError> {
        match node {
            NodeDef::Leaf { data_type, size, value } => {
                let leaf = build_leaf(name, data_type, size.as_ref(), value.as_ref())?;
                Ok(self.builder.leaf(name, leaf))
            }
            NodeDef::Literal { value } => {
                let leaf = literal_leaf(name, value)?;
                Ok(self.builder.leaf(name, leaf))
            }
            NodeDef::Aggregate { fields } => {
                let children = fields
                    .iter()
                    .map(|f| self.field(symbol, f))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(self.builder.aggregate(name, children))
            }
            NodeDef::Alternative { fields } => {
                let mut kept: Vec<&FieldDef> = Vec::new();
                for f in fields {
                    if let NodeDef::Literal { value } = &f.node {
                        let seen = kept
                            .iter()
                            .any(|k| matches!(&k.node, NodeDef::Literal { value: v } if v == value));
                        if seen {
                            continue;
                        }
                    }
                    kept.push(f);
                }
                if let [only] = kept.as_slice() {
                    let id = self.node(symbol, name, &only.node)?;
                    if only.name != name {
                        self.register(symbol, &only.name, id)?;
                    }
                    if let Some(svas) = only.svas {
                        self.builder.set_svas(id, svas);
                    }
                    if let Some(recall) = only.recall {
                        self.builder.set_recall(id, recall);
                    }
                    return Ok(id);
                }
                let children = kept
                    .into_iter()
                    .map(|f| self.field(symbol, f))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(self.builder.alternative(name, children))
            }
            NodeDef::Repeat {
                min,
                max,
                delimiter,
                child,
            } => {
                let child = self.item(symbol, name, child)?;
                let mut repeat = Repeat::new(child, *min, *max);
                if let Some(delimiter) = delimiter {
                    repeat = repeat.with_delimiter(literal_bits(name, &DataType::Raw, delimiter)?);
                }
                Ok(self.builder.repeat(name, repeat))
            }
            NodeDef::Optional { child } => {
                let child = self.item(symbol, name, child)?;
                Ok(self.builder.optional(name, child))
            }
            NodeDef::Relation {
                relation,
                targets,
                format,
            } => {
                let format = format.as_deref().map(integer_format).transpose()?;
                let relation = match relation {
                    RelationDef::Size { unit, offset } => Relation::size_with(
                        Vec::new(),
                        format.unwrap_or_else(IntegerFormat::uint8),
                        unit.unwrap_or(8),
                        offset.unwrap_or(0),
                    ),
                    RelationDef::Value => Relation::value(Vec::new()),
                    RelationDef::Hash { algorithm } => Relation::hash(
                        HashAlgorithm::from_name(algorithm)
                            .ok_or_else(|| FactoryError::UnknownAlgorithm(algorithm.clone()))?,
                        Vec::new(),
                    ),
                    RelationDef::Hmac { algorithm, key } => Relation::hmac(
                        HmacAlgorithm::from_name(algorithm)
                            .ok_or_else(|| FactoryError::UnknownAlgorithm(algorithm.clone()))?,
                        literal_bits(name, &DataType::Raw, key)?.to_bytes(),
                        Vec::new(),
                    ),
                    RelationDef::Padding {
                        modulo,
                        offset,
                        once,
                        fill,
                    } => {
                        let fill = match fill {
                            Some(fill) => literal_bits(name, &DataType::Raw, fill)?,
                            None => BitBuffer::from_bytes(&[0]),
                        };
                        Relation::padding_with(*modulo, offset.unwrap_or(0), *once, fill, Vec::new())
                    }
                    RelationDef::Checksum { algorithm } => {
                        let algorithm = ChecksumAlgorithm::from_name(algorithm)
                            .ok_or_else(|| FactoryError::UnknownAlgorithm(algorithm.clone()))?;
                        match format {
                            Some(format) => Relation::checksum_with(algorithm, format, Vec::new()),
                            None => Relation::checksum(algorithm, Vec::new()),
                        }
                    }
                };
                let id = self.builder.relation(name, relation);
                self.pending.push(PendingTargets {
                    relation: id,
                    symbol: symbol.to_string(),
                    targets: targets.clone(),
                });
                Ok(id)
            }
        }
    }

    /// Repeated and optional children are named `<field>.item`.
    fn item(&mut self, symbol: &str, name: &str, child: &NodeDef) -> Result<VariableId, FactoryError> {
        let item = format!("{}.item", name);
        let id = self.node(symbol, &item, child)?;
        self.register(symbol, &item, id)?;
        Ok(id)
    }

    fn lookup(&self, symbol: &str, target: &str) -> Result<VariableId, FactoryError> {
        if let Some(id) = self.scopes.get(symbol).and_then(|scope| scope.get(target)) {
            return Ok(*id);
        }
        if let Some((other, field)) = target.split_once('.') {
            if let Some(scope) = self.scopes.get(other) {
                if let Some(id) = scope.get(field) {
                    return Ok(*id);
                }
            }
        }
        Err(FactoryError::UnknownTarget {
            symbol: symbol.to_string(),
            target: target.to_string(),
        })
    }

    fn resolve_targets(&mut self) -> Result<(), FactoryError> {
        let pending = std::mem::take(&mut self.pending);
        for p in pending {
            let ids = p
                .targets
                .iter()
                .map(|t| self.lookup(&p.symbol, t))
                .collect::<Result<Vec<_>, _>>()?;
            self.builder.set_targets(p.relation, ids);
        }
        Ok(())
    }
}

fn invalid(field: &str, reason: impl Into<String>) -> FactoryError {
    FactoryError::InvalidLiteral {
        field: field.to_string(),
        reason: reason.into(),
    }
}

fn integer_format(name: &str) -> Result<IntegerFormat, FactoryError> {
    IntegerFormat::from_name(name).ok_or_else(|| FactoryError::UnknownType(name.to_string()))
}

fn data_type(field: &str, def: &TypeDef) -> Result<DataType, FactoryError> {
    Ok(match def {
        TypeDef::Raw => DataType::Raw,
        TypeDef::Ascii => DataType::Ascii,
        TypeDef::Utf8 => DataType::Utf8,
        TypeDef::Decimal => DataType::DecimalWord,
        TypeDef::Hexword => DataType::HexWord,
        TypeDef::Bits => DataType::BitArray,
        TypeDef::Ipv4 => DataType::Ipv4,
        TypeDef::Integer(name) => DataType::Integer(integer_format(name)?),
        TypeDef::Timestamp { epoch, unity, format } => {
            let mut ts = TimestampFormat::default();
            if let Some(name) = epoch {
                ts.epoch = Epoch::from_name(name).ok_or_else(|| FactoryError::UnknownType(format!("epoch {}", name)))?;
            }
            if let Some(name) = unity {
                ts.unity = Unity::from_name(name).ok_or_else(|| FactoryError::UnknownType(format!("unity {}", name)))?;
            }
            if let Some(name) = format {
                ts.format = integer_format(name)?;
            }
            DataType::Timestamp(ts)
        }
        TypeDef::Enum(variants) => {
            let constants = variants
                .iter()
                .map(|v| {
                    Ok(EnumConstant {
                        name: v.name.clone(),
                        bytes: literal_bits(field, &DataType::Raw, &v.value)?.to_bytes(),
                    })
                })
                .collect::<Result<Vec<_>, FactoryError>>()?;
            DataType::Enumerated(constants)
        }
    })
}

fn build_leaf(
    field: &str,
    def: &TypeDef,
    size: Option<&SizeDef>,
    value: Option<&Literal>,
) -> Result<Leaf, FactoryError> {
    let data_type = data_type(field, def)?;
    let unit = if matches!(def, TypeDef::Bits) { 1 } else { 8 };
    let value = value.map(|v| literal_bits(field, &data_type, v)).transpose()?;
    Ok(match (size, value) {
        (Some(size), value) => Leaf {
            data_type,
            size: SizeConstraint::bits_range(size.min * unit, size.max.map(|m| m * unit)),
            value,
        },
        (None, Some(value)) => Leaf::fixed(data_type, value),
        (None, None) => Leaf::of_type(data_type),
    })
}

/// Big-endian bytes of a non-negative integer, at least one byte.
fn minimal_bytes(field: &str, n: i64) -> Result<Vec<u8>, FactoryError> {
    if n < 0 {
        return Err(invalid(field, format!("{} is negative", n)));
    }
    let bytes = (n as u64).to_be_bytes();
    let first = bytes.iter().position(|b| *b != 0).unwrap_or(7);
    Ok(bytes[first..].to_vec())
}

/// Encode a literal for a leaf of `data_type`.
fn literal_bits(field: &str, data_type: &DataType, literal: &Literal) -> Result<BitBuffer, FactoryError> {
    match literal {
        Literal::Hex(bytes) => Ok(BitBuffer::from_bytes(bytes)),
        Literal::Bits(bits) => BitBuffer::from_bit_str(bits).ok_or_else(|| invalid(field, "not a bit string")),
        Literal::Int(n) => match data_type {
            DataType::Integer(_) | DataType::Timestamp(_) => {
                let value = if *n < 0 {
                    Value::Signed(*n)
                } else {
                    Value::Unsigned(*n as u64)
                };
                data_type.encode(&value).map_err(|e| invalid(field, e.to_string()))
            }
            DataType::Ascii | DataType::Utf8 | DataType::DecimalWord => data_type
                .encode(&Value::Text(n.to_string()))
                .map_err(|e| invalid(field, e.to_string())),
            _ => minimal_bytes(field, *n).map(BitBuffer::from),
        },
        Literal::String(s) => match data_type {
            DataType::Raw | DataType::BitArray => Ok(BitBuffer::from_bytes(s.as_bytes())),
            _ => data_type
                .encode(&Value::Text(s.clone()))
                .map_err(|e| invalid(field, e.to_string())),
        },
    }
}

/// Constant leaf for a bare literal.
fn literal_leaf(field: &str, literal: &Literal) -> Result<Leaf, FactoryError> {
    let data_type = match literal {
        Literal::Hex(_) => DataType::Raw,
        Literal::Bits(_) => DataType::BitArray,
        Literal::String(s) if s.is_ascii() => DataType::Ascii,
        Literal::String(_) => DataType::Utf8,
        Literal::Int(n) => {
            let (unit, sign) = if *n >= 0 {
                let unit = match *n as u64 {
                    0..=0xFF => UnitSize::U8,
                    0x100..=0xFFFF => UnitSize::U16,
                    0x1_0000..=0xFFFF_FFFF => UnitSize::U32,
                    _ => UnitSize::U64,
                };
                (unit, Sign::Unsigned)
            } else {
                let unit = match *n {
                    -0x80..=-1 => UnitSize::U8,
                    -0x8000..=-0x81 => UnitSize::U16,
                    -0x8000_0000..=-0x8001 => UnitSize::U32,
                    _ => UnitSize::U64,
                };
                (unit, Sign::Signed)
            };
            DataType::Integer(IntegerFormat::new(unit, Default::default(), sign))
        }
    };
    let bits = literal_bits(field, &data_type, literal)?;
    Ok(Leaf::fixed(data_type, bits))
}
