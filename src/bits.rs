//! Bit buffers: the exchange currency between the type catalog, paths and the engine.
//!
//! A [`BitBuffer`] is a view (offset + length, both in bits) over shared byte storage.
//! Slicing never copies. Mutation ([`BitBuffer::overwrite`], [`BitBuffer::append`]) first
//! copies the storage when another view still shares it, so a sub-view never observes
//! writes made through its parent and vice versa.
//!
//! Bits are held most-significant-first inside each byte. [`BitOrder`] only matters when
//! converting from/to bytes with an explicit order.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Order of bits inside a byte when materializing a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BitOrder {
    /// First bit of the buffer is the most significant bit of the first byte.
    #[default]
    Msb0,
    /// First bit of the buffer is the least significant bit of the first byte.
    Lsb0,
}

#[derive(Clone)]
pub struct BitBuffer {
    storage: Arc<Vec<u8>>,
    offset: usize,
    len: usize,
}

fn read_bit(bytes: &[u8], pos: usize) -> bool {
    (bytes[pos / 8] >> (7 - pos % 8)) & 1 == 1
}

fn write_bit(bytes: &mut [u8], pos: usize, bit: bool) {
    let mask = 1u8 << (7 - pos % 8);
    if bit {
        bytes[pos / 8] |= mask;
    } else {
        bytes[pos / 8] &= !mask;
    }
}

impl BitBuffer {
    pub fn new() -> Self {
        BitBuffer {
            storage: Arc::new(Vec::new()),
            offset: 0,
            len: 0,
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        BitBuffer {
            storage: Arc::new(bytes.to_vec()),
            offset: 0,
            len: bytes.len() * 8,
        }
    }

    pub fn from_bytes_with_order(bytes: &[u8], order: BitOrder) -> Self {
        match order {
            BitOrder::Msb0 => Self::from_bytes(bytes),
            BitOrder::Lsb0 => {
                let reversed: Vec<u8> = bytes.iter().map(|b| b.reverse_bits()).collect();
                Self::from_bytes(&reversed)
            }
        }
    }

    pub fn from_bits<I: IntoIterator<Item = bool>>(bits: I) -> Self {
        let mut bytes = Vec::new();
        let mut len = 0usize;
        for bit in bits {
            if len % 8 == 0 {
                bytes.push(0);
            }
            write_bit(&mut bytes, len, bit);
            len += 1;
        }
        BitBuffer {
            storage: Arc::new(bytes),
            offset: 0,
            len,
        }
    }

    /// Parse a string of `0`/`1` characters (whitespace and `_` ignored).
    pub fn from_bit_str(s: &str) -> Option<Self> {
        let mut bits = Vec::with_capacity(s.len());
        for c in s.chars() {
            match c {
                '0' => bits.push(false),
                '1' => bits.push(true),
                '_' => {}
                c if c.is_whitespace() => {}
                _ => return None,
            }
        }
        Some(Self::from_bits(bits))
    }

    pub fn zeros(len: usize) -> Self {
        BitBuffer {
            storage: Arc::new(vec![0u8; len.div_ceil(8)]),
            offset: 0,
            len,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_byte_aligned(&self) -> bool {
        self.len % 8 == 0
    }

    pub fn get(&self, index: usize) -> Option<bool> {
        if index < self.len {
            Some(read_bit(&self.storage, self.offset + index))
        } else {
            None
        }
    }

    /// Sub-view of `len` bits starting at `start`. Shares storage with `self`.
    pub fn slice(&self, start: usize, len: usize) -> Option<BitBuffer> {
        let end = start.checked_add(len)?;
        if end > self.len {
            return None;
        }
        Some(BitBuffer {
            storage: Arc::clone(&self.storage),
            offset: self.offset + start,
            len,
        })
    }

    /// Everything from `start` to the end (empty when `start` is past the end).
    pub fn tail(&self, start: usize) -> BitBuffer {
        let start = start.min(self.len);
        BitBuffer {
            storage: Arc::clone(&self.storage),
            offset: self.offset + start,
            len: self.len - start,
        }
    }

    pub fn starts_with(&self, prefix: &BitBuffer) -> bool {
        match self.slice(0, prefix.len()) {
            Some(head) => head == *prefix,
            None => false,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = bool> + '_ {
        (0..self.len).map(move |i| read_bit(&self.storage, self.offset + i))
    }

    /// Bytes with the last partial byte zero-padded on its low-order side.
    pub fn to_bytes(&self) -> Vec<u8> {
        let nbytes = self.len.div_ceil(8);
        let mut out = if self.offset % 8 == 0 {
            let start = self.offset / 8;
            self.storage[start..start + nbytes].to_vec()
        } else {
            let mut out = vec![0u8; nbytes];
            for i in 0..self.len {
                if read_bit(&self.storage, self.offset + i) {
                    write_bit(&mut out, i, true);
                }
            }
            out
        };
        let rem = self.len % 8;
        if rem != 0 {
            if let Some(last) = out.last_mut() {
                *last &= 0xFFu8 << (8 - rem);
            }
        }
        out
    }

    pub fn to_bytes_with_order(&self, order: BitOrder) -> Vec<u8> {
        let bytes = self.to_bytes();
        match order {
            BitOrder::Msb0 => bytes,
            BitOrder::Lsb0 => bytes.into_iter().map(|b| b.reverse_bits()).collect(),
        }
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    pub fn to_bit_string(&self) -> String {
        self.iter().map(|b| if b { '1' } else { '0' }).collect()
    }

    pub fn concat(&self, other: &BitBuffer) -> BitBuffer {
        let mut out = self.clone();
        out.append(other);
        out
    }

    /// Append `other` at the end. Copies the storage if it is shared.
    pub fn append(&mut self, other: &BitBuffer) {
        if other.is_empty() {
            return;
        }
        let len = self.len;
        let storage = self.make_unique();
        if len % 8 == 0 && other.offset % 8 == 0 {
            storage.extend_from_slice(&other.to_bytes());
        } else {
            let needed = (len + other.len).div_ceil(8);
            storage.resize(needed, 0);
            for (i, bit) in other.iter().enumerate() {
                write_bit(storage, len + i, bit);
            }
        }
        self.len += other.len;
    }

    /// Replace the bits at `at..at + bits.len()` in place. Returns `false` (and leaves the
    /// buffer untouched) if the range does not fit.
    pub fn overwrite(&mut self, at: usize, bits: &BitBuffer) -> bool {
        match at.checked_add(bits.len()) {
            Some(end) if end <= self.len => {}
            _ => return false,
        }
        let storage = self.make_unique();
        for (i, bit) in bits.iter().enumerate() {
            write_bit(storage, at + i, bit);
        }
        true
    }

    /// Compact the view to offset 0 and detach it from other views.
    fn make_unique(&mut self) -> &mut Vec<u8> {
        let compact = self.offset == 0 && self.storage.len() == self.len.div_ceil(8);
        if !compact {
            self.storage = Arc::new(self.to_bytes());
            self.offset = 0;
        }
        Arc::make_mut(&mut self.storage)
    }

    /// True when both views point into the same allocation.
    pub fn shares_storage_with(&self, other: &BitBuffer) -> bool {
        Arc::ptr_eq(&self.storage, &other.storage)
    }
}

impl Default for BitBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for BitBuffer {
    fn eq(&self, other: &Self) -> bool {
        self.len == other.len && self.to_bytes() == other.to_bytes()
    }
}

impl Eq for BitBuffer {}

impl Hash for BitBuffer {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.len.hash(state);
        self.to_bytes().hash(state);
    }
}

impl From<Vec<u8>> for BitBuffer {
    fn from(bytes: Vec<u8>) -> Self {
        let len = bytes.len() * 8;
        BitBuffer {
            storage: Arc::new(bytes),
            offset: 0,
            len,
        }
    }
}

impl From<&[u8]> for BitBuffer {
    fn from(bytes: &[u8]) -> Self {
        Self::from_bytes(bytes)
    }
}

impl fmt::Display for BitBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_byte_aligned() {
            write!(f, "0x{}", self.to_hex())
        } else {
            write!(f, "0b{}", self.to_bit_string())
        }
    }
}

impl fmt::Debug for BitBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BitBuffer({} bits, {})", self.len, self)
    }
}
