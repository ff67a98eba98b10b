//! Raw domain descriptions, before normalization into a variable tree.
//!
//! Produced by the description language ([`crate::dsl`]) or deserialized from JSON, and
//! consumed by [`crate::factory::DomainFactory`].

use crate::variable::{Recall, Svas};
use serde::{Deserialize, Serialize};

/// A set of symbols (message formats) sharing one session.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DomainDescription {
    pub symbols: Vec<SymbolDef>,
}

impl DomainDescription {
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn symbol(&self, name: &str) -> Option<&SymbolDef> {
        self.symbols.iter().find(|s| s.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolDef {
    pub name: String,
    pub fields: Vec<FieldDef>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub svas: Option<Svas>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recall: Option<Recall>,
    pub node: NodeDef,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeDef {
    Leaf {
        data_type: TypeDef,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        size: Option<SizeDef>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<Literal>,
    },
    /// Bare literal: becomes a constant leaf of the matching type.
    Literal { value: Literal },
    Aggregate { fields: Vec<FieldDef> },
    Alternative { fields: Vec<FieldDef> },
    Repeat {
        min: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max: Option<usize>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        delimiter: Option<Literal>,
        child: Box<NodeDef>,
    },
    Optional { child: Box<NodeDef> },
    Relation {
        relation: RelationDef,
        targets: Vec<String>,
        /// Integer type name (`uint16be`, ...) for size and checksum values.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        format: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeDef {
    Raw,
    Ascii,
    Utf8,
    Decimal,
    Hexword,
    Bits,
    Ipv4,
    /// `uint8`, `int16le`, ...
    Integer(String),
    Enum(Vec<EnumVariantDef>),
    /// `timestamp(epoch = ntp, unity = ms) uint64be`; unix seconds in `uint32be` when omitted.
    Timestamp {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        epoch: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        unity: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        format: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumVariantDef {
    pub name: String,
    pub value: Literal,
}

/// In bytes (characters for text types), or in bits for `bits`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeDef {
    pub min: usize,
    pub max: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Literal {
    /// `0x...`, kept as bytes so leading zeros count.
    Hex(Vec<u8>),
    /// `0b...`, as a string of `0`/`1`.
    Bits(String),
    Int(i64),
    String(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RelationDef {
    Size {
        /// Bits per counted unit (8 when absent).
        #[serde(default, skip_serializing_if = "Option::is_none")]
        unit: Option<usize>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        offset: Option<i64>,
    },
    Value,
    Hash { algorithm: String },
    Hmac { algorithm: String, key: Literal },
    Checksum { algorithm: String },
    Padding {
        /// Alignment in bits.
        modulo: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        offset: Option<i64>,
        #[serde(default)]
        once: bool,
        /// Fill pattern (a zero byte when absent).
        #[serde(default, skip_serializing_if = "Option::is_none")]
        fill: Option<Literal>,
    },
}
