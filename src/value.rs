//! Typed values decoded from (or encoded into) bits by the type catalog.

use crate::bits::BitBuffer;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;

/// A single decoded field value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Value {
    Bytes(Vec<u8>),
    Text(String),
    Unsigned(u64),
    Signed(i64),
    Bits(Vec<bool>),
    Ipv4(Ipv4Addr),
    /// Name of an enumerated constant.
    Symbol(String),
    /// Instant decoded from a timestamp field.
    Time(DateTime<Utc>),
}

impl Value {
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::Unsigned(x) => Some(*x),
            Value::Signed(x) => (*x).try_into().ok(),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Signed(x) => Some(*x),
            Value::Unsigned(x) => (*x).try_into().ok(),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) | Value::Symbol(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_ipv4(&self) -> Option<Ipv4Addr> {
        match self {
            Value::Ipv4(a) => Some(*a),
            _ => None,
        }
    }

    pub fn as_bits(&self) -> Option<BitBuffer> {
        match self {
            Value::Bits(b) => Some(BitBuffer::from_bits(b.iter().copied())),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bytes(b) => write!(f, "0x{}", hex::encode(b)),
            Value::Text(s) => write!(f, "{:?}", s),
            Value::Unsigned(x) => write!(f, "{}", x),
            Value::Signed(x) => write!(f, "{}", x),
            Value::Bits(b) => {
                write!(f, "0b")?;
                for bit in b {
                    write!(f, "{}", if *bit { '1' } else { '0' })?;
                }
                Ok(())
            }
            Value::Ipv4(a) => write!(f, "{}", a),
            Value::Symbol(s) => write!(f, "{}", s),
            Value::Time(t) => write!(f, "{}", t.to_rfc3339()),
        }
    }
}
