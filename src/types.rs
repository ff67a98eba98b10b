//! Type catalog: leaf value encodings.
//!
//! Every [`DataType`] is a pure function pair over bits: [`DataType::encode`] turns a
//! [`Value`] into a [`BitBuffer`], [`DataType::decode`] does the reverse, and
//! [`DataType::can_parse`] is a cheap acceptance test used to prune candidates before a
//! full decode. Integers use `byteorder` for their byte layout.

use crate::bits::BitBuffer;
use crate::value::Value;
use byteorder::{BigEndian, ByteOrder, LittleEndian};
use chrono::{DateTime, NaiveDate, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Endianness {
    #[default]
    Big,
    Little,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sign {
    #[default]
    Unsigned,
    Signed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnitSize {
    U8,
    U16,
    U32,
    U64,
}

impl UnitSize {
    pub fn bits(self) -> usize {
        match self {
            UnitSize::U8 => 8,
            UnitSize::U16 => 16,
            UnitSize::U32 => 32,
            UnitSize::U64 => 64,
        }
    }

    pub fn from_bits(bits: usize) -> Option<Self> {
        match bits {
            8 => Some(UnitSize::U8),
            16 => Some(UnitSize::U16),
            32 => Some(UnitSize::U32),
            64 => Some(UnitSize::U64),
            _ => None,
        }
    }
}

/// Layout of an integer field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegerFormat {
    pub unit: UnitSize,
    pub endianness: Endianness,
    pub sign: Sign,
}

impl IntegerFormat {
    pub const fn new(unit: UnitSize, endianness: Endianness, sign: Sign) -> Self {
        IntegerFormat {
            unit,
            endianness,
            sign,
        }
    }

    pub const fn uint8() -> Self {
        Self::new(UnitSize::U8, Endianness::Big, Sign::Unsigned)
    }

    pub const fn uint16be() -> Self {
        Self::new(UnitSize::U16, Endianness::Big, Sign::Unsigned)
    }

    pub const fn uint16le() -> Self {
        Self::new(UnitSize::U16, Endianness::Little, Sign::Unsigned)
    }

    pub const fn uint32be() -> Self {
        Self::new(UnitSize::U32, Endianness::Big, Sign::Unsigned)
    }

    pub const fn uint32le() -> Self {
        Self::new(UnitSize::U32, Endianness::Little, Sign::Unsigned)
    }

    /// Parse names such as `uint8`, `int16le`, `uint32be` (big endian when unsuffixed).
    pub fn from_name(name: &str) -> Option<Self> {
        let (sign, rest) = match name.strip_prefix("uint") {
            Some(rest) => (Sign::Unsigned, rest),
            None => (Sign::Signed, name.strip_prefix("int")?),
        };
        let (digits, endianness) = if let Some(d) = rest.strip_suffix("le") {
            (d, Endianness::Little)
        } else if let Some(d) = rest.strip_suffix("be") {
            (d, Endianness::Big)
        } else {
            (rest, Endianness::Big)
        };
        let unit = UnitSize::from_bits(digits.parse().ok()?)?;
        Some(Self::new(unit, endianness, sign))
    }

    pub fn name(&self) -> String {
        let sign = match self.sign {
            Sign::Unsigned => "uint",
            Sign::Signed => "int",
        };
        let endian = match (self.unit, self.endianness) {
            (UnitSize::U8, _) => "",
            (_, Endianness::Big) => "be",
            (_, Endianness::Little) => "le",
        };
        format!("{}{}{}", sign, self.unit.bits(), endian)
    }
}

/// Reference instant a timestamp counts from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Epoch {
    Windows,
    Mumps,
    Vms,
    Excel,
    Ntp,
    Macos9,
    Pickos,
    #[default]
    Unix,
    Fat,
    Gps,
    Zigbee,
    Cocoa,
}

impl Epoch {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "windows" => Epoch::Windows,
            "mumps" => Epoch::Mumps,
            "vms" => Epoch::Vms,
            "excel" => Epoch::Excel,
            "ntp" => Epoch::Ntp,
            "macos9" => Epoch::Macos9,
            "pickos" => Epoch::Pickos,
            "unix" => Epoch::Unix,
            "fat" => Epoch::Fat,
            "gps" => Epoch::Gps,
            "zigbee" => Epoch::Zigbee,
            "cocoa" => Epoch::Cocoa,
            _ => return None,
        })
    }

    fn date(self) -> (i32, u32, u32) {
        match self {
            Epoch::Windows => (1601, 1, 1),
            Epoch::Mumps => (1840, 12, 31),
            Epoch::Vms => (1858, 11, 17),
            Epoch::Excel => (1899, 12, 31),
            Epoch::Ntp => (1900, 1, 1),
            Epoch::Macos9 => (1904, 1, 1),
            Epoch::Pickos => (1967, 12, 31),
            Epoch::Unix => (1970, 1, 1),
            Epoch::Fat => (1980, 1, 1),
            Epoch::Gps => (1980, 1, 6),
            Epoch::Zigbee => (2000, 1, 1),
            Epoch::Cocoa => (2001, 1, 1),
        }
    }

    /// Seconds from the Unix epoch to this epoch (negative before 1970).
    pub fn unix_offset(self) -> i64 {
        let (year, month, day) = self.date();
        NaiveDate::from_ymd_opt(year, month, day)
            .and_then(|date| date.and_hms_opt(0, 0, 0))
            .map_or(0, |midnight| midnight.and_utc().timestamp())
    }
}

/// Length of one timestamp tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Unity {
    #[default]
    Second,
    Decisecond,
    Centisecond,
    Millisecond,
    Microsecond,
    Nanosecond,
}

impl Unity {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "s" | "second" => Unity::Second,
            "ds" | "decisecond" => Unity::Decisecond,
            "cs" | "centisecond" => Unity::Centisecond,
            "ms" | "millisecond" => Unity::Millisecond,
            "us" | "microsecond" => Unity::Microsecond,
            "ns" | "nanosecond" => Unity::Nanosecond,
            _ => return None,
        })
    }

    /// Ticks per second.
    pub fn per_second(self) -> i128 {
        match self {
            Unity::Second => 1,
            Unity::Decisecond => 10,
            Unity::Centisecond => 100,
            Unity::Millisecond => 1_000,
            Unity::Microsecond => 1_000_000,
            Unity::Nanosecond => 1_000_000_000,
        }
    }
}

/// An integer count of `unity` ticks since `epoch`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimestampFormat {
    pub epoch: Epoch,
    pub unity: Unity,
    pub format: IntegerFormat,
}

impl Default for TimestampFormat {
    fn default() -> Self {
        TimestampFormat {
            epoch: Epoch::Unix,
            unity: Unity::Second,
            format: IntegerFormat::uint32be(),
        }
    }
}

impl TimestampFormat {
    /// Tick count of `instant`, or `None` when it precedes the epoch by more than i128 allows.
    pub fn ticks(&self, instant: &DateTime<Utc>) -> Option<i128> {
        let per_second = self.unity.per_second();
        let seconds = i128::from(instant.timestamp()) - i128::from(self.epoch.unix_offset());
        let fraction = i128::from(instant.timestamp_subsec_nanos()) / (1_000_000_000 / per_second);
        seconds.checked_mul(per_second)?.checked_add(fraction)
    }

    pub fn instant(&self, ticks: i128) -> Option<DateTime<Utc>> {
        let per_second = self.unity.per_second();
        let seconds = ticks.div_euclid(per_second) + i128::from(self.epoch.unix_offset());
        let nanos = ticks.rem_euclid(per_second) * (1_000_000_000 / per_second);
        DateTime::from_timestamp(i64::try_from(seconds).ok()?, u32::try_from(nanos).ok()?)
    }
}

/// A named constant of an enumerated type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumConstant {
    pub name: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TypeError {
    #[error("Encoding ({data_type}): {reason}")]
    Encoding { data_type: String, reason: String },
    #[error("Decoding ({data_type}): {reason}")]
    Decoding { data_type: String, reason: String },
}

/// Leaf encodings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataType {
    Raw,
    Ascii,
    Utf8,
    /// ASCII decimal digits.
    DecimalWord,
    /// ASCII hexadecimal digits.
    HexWord,
    Integer(IntegerFormat),
    BitArray,
    Ipv4,
    Enumerated(Vec<EnumConstant>),
    Timestamp(TimestampFormat),
}

impl DataType {
    pub fn name(&self) -> String {
        match self {
            DataType::Raw => "raw".to_string(),
            DataType::Ascii => "ascii".to_string(),
            DataType::Utf8 => "utf8".to_string(),
            DataType::DecimalWord => "decimal".to_string(),
            DataType::HexWord => "hexword".to_string(),
            DataType::Integer(fmt) => fmt.name(),
            DataType::BitArray => "bits".to_string(),
            DataType::Ipv4 => "ipv4".to_string(),
            DataType::Enumerated(_) => "enum".to_string(),
            DataType::Timestamp(ts) => format!("timestamp({})", ts.format.name()),
        }
    }

    /// Granularity, in bits, of values of this type.
    pub fn unit_bits(&self) -> usize {
        match self {
            DataType::BitArray => 1,
            DataType::Integer(fmt) => fmt.unit.bits(),
            DataType::Timestamp(ts) => ts.format.unit.bits(),
            DataType::Ipv4 => 32,
            DataType::Enumerated(constants) => {
                if constants.is_empty() {
                    8
                } else {
                    constants.iter().map(|c| c.bytes.len() * 8).min().unwrap_or(8).max(8)
                }
            }
            _ => 8,
        }
    }

    /// Size range (in bits) implied by the type alone, if any.
    pub fn natural_size(&self) -> Option<(usize, usize)> {
        match self {
            DataType::Integer(fmt) => Some((fmt.unit.bits(), fmt.unit.bits())),
            DataType::Timestamp(ts) => Some((ts.format.unit.bits(), ts.format.unit.bits())),
            DataType::Ipv4 => Some((32, 32)),
            DataType::Enumerated(constants) if !constants.is_empty() => {
                let lens = constants.iter().map(|c| c.bytes.len() * 8);
                let min = lens.clone().min().unwrap_or(0);
                let max = lens.max().unwrap_or(0);
                Some((min, max))
            }
            _ => None,
        }
    }

    /// Step between candidate lengths when enumerating windows.
    pub fn length_step(&self) -> usize {
        match self {
            DataType::Enumerated(_) => 8,
            other => other.unit_bits(),
        }
    }

    /// Cheap acceptance test; never decodes fully.
    pub fn can_parse(&self, bits: &BitBuffer) -> bool {
        if bits.is_empty() {
            return false;
        }
        match self {
            DataType::Raw => bits.is_byte_aligned(),
            DataType::BitArray => true,
            DataType::Ascii => bits.is_byte_aligned() && bits.to_bytes().iter().all(|b| *b < 0x80),
            DataType::Utf8 => bits.is_byte_aligned() && std::str::from_utf8(&bits.to_bytes()).is_ok(),
            DataType::DecimalWord => {
                bits.is_byte_aligned() && bits.to_bytes().iter().all(|b| b.is_ascii_digit())
            }
            DataType::HexWord => {
                bits.is_byte_aligned() && bits.to_bytes().iter().all(|b| b.is_ascii_hexdigit())
            }
            DataType::Integer(fmt) => bits.len() % fmt.unit.bits() == 0 && bits.len() <= 64,
            DataType::Ipv4 => bits.len() == 32,
            DataType::Timestamp(ts) => bits.len() == ts.format.unit.bits(),
            DataType::Enumerated(constants) => {
                let bytes = bits.to_bytes();
                bits.is_byte_aligned() && constants.iter().any(|c| c.bytes == bytes)
            }
        }
    }

    fn decoding_error(&self, reason: impl Into<String>) -> TypeError {
        TypeError::Decoding {
            data_type: self.name(),
            reason: reason.into(),
        }
    }

    fn encoding_error(&self, reason: impl Into<String>) -> TypeError {
        TypeError::Encoding {
            data_type: self.name(),
            reason: reason.into(),
        }
    }

    fn aligned_bytes(&self, bits: &BitBuffer) -> Result<Vec<u8>, TypeError> {
        if !bits.is_byte_aligned() {
            return Err(self.decoding_error(format!("{} bits is not a whole number of bytes", bits.len())));
        }
        Ok(bits.to_bytes())
    }

    pub fn decode(&self, bits: &BitBuffer) -> Result<Value, TypeError> {
        match self {
            DataType::Raw => Ok(Value::Bytes(self.aligned_bytes(bits)?)),
            DataType::BitArray => Ok(Value::Bits(bits.iter().collect())),
            DataType::Ascii | DataType::Utf8 | DataType::DecimalWord | DataType::HexWord => {
                let bytes = self.aligned_bytes(bits)?;
                if !self.can_parse(bits) && !bytes.is_empty() {
                    return Err(self.decoding_error("characters outside the type's charset"));
                }
                String::from_utf8(bytes)
                    .map(Value::Text)
                    .map_err(|e| self.decoding_error(e.to_string()))
            }
            DataType::Integer(fmt) => decode_integer(self, fmt, bits),
            DataType::Ipv4 => {
                if bits.len() != 32 {
                    return Err(self.decoding_error(format!("expected 32 bits, got {}", bits.len())));
                }
                let b = bits.to_bytes();
                Ok(Value::Ipv4(Ipv4Addr::new(b[0], b[1], b[2], b[3])))
            }
            DataType::Enumerated(constants) => {
                let bytes = self.aligned_bytes(bits)?;
                constants
                    .iter()
                    .find(|c| c.bytes == bytes)
                    .map(|c| Value::Symbol(c.name.clone()))
                    .ok_or_else(|| self.decoding_error(format!("0x{} is not a known constant", hex::encode(&bytes))))
            }
            DataType::Timestamp(ts) => {
                if bits.len() != ts.format.unit.bits() {
                    return Err(self.decoding_error(format!(
                        "expected {} bits, got {}",
                        ts.format.unit.bits(),
                        bits.len()
                    )));
                }
                let ticks = match decode_integer(self, &ts.format, bits)? {
                    Value::Unsigned(u) => i128::from(u),
                    Value::Signed(i) => i128::from(i),
                    other => return Err(self.decoding_error(format!("not a tick count: {}", other))),
                };
                ts.instant(ticks)
                    .map(Value::Time)
                    .ok_or_else(|| self.decoding_error(format!("{} ticks is outside the calendar", ticks)))
            }
        }
    }

    pub fn encode(&self, value: &Value) -> Result<BitBuffer, TypeError> {
        match (self, value) {
            (DataType::Raw, Value::Bytes(b)) => Ok(BitBuffer::from_bytes(b)),
            (DataType::Raw, Value::Text(s)) => Ok(BitBuffer::from_bytes(s.as_bytes())),
            (DataType::Raw | DataType::BitArray, Value::Bits(b)) => Ok(BitBuffer::from_bits(b.iter().copied())),
            (DataType::BitArray, Value::Bytes(b)) => Ok(BitBuffer::from_bytes(b)),
            (DataType::Ascii | DataType::Utf8 | DataType::DecimalWord | DataType::HexWord, Value::Text(s)) => {
                let bits = BitBuffer::from_bytes(s.as_bytes());
                if !s.is_empty() && !self.can_parse(&bits) {
                    return Err(self.encoding_error(format!("{:?} is outside the type's charset", s)));
                }
                Ok(bits)
            }
            (DataType::Integer(fmt), Value::Unsigned(_) | Value::Signed(_)) => encode_integer(self, fmt, value),
            (DataType::Timestamp(ts), Value::Unsigned(_) | Value::Signed(_)) => encode_integer(self, &ts.format, value),
            (DataType::Timestamp(ts), Value::Time(instant)) => encode_instant(self, ts, instant),
            (DataType::Timestamp(ts), Value::Text(s)) => DateTime::parse_from_rfc3339(s)
                .map_err(|e| self.encoding_error(e.to_string()))
                .and_then(|instant| encode_instant(self, ts, &instant.with_timezone(&Utc))),
            (DataType::Ipv4, Value::Ipv4(addr)) => Ok(BitBuffer::from_bytes(&addr.octets())),
            (DataType::Ipv4, Value::Text(s)) => s
                .parse::<Ipv4Addr>()
                .map(|addr| BitBuffer::from_bytes(&addr.octets()))
                .map_err(|e| self.encoding_error(e.to_string())),
            (DataType::Enumerated(constants), Value::Symbol(name) | Value::Text(name)) => constants
                .iter()
                .find(|c| &c.name == name)
                .map(|c| BitBuffer::from_bytes(&c.bytes))
                .ok_or_else(|| self.encoding_error(format!("unknown constant {}", name))),
            (DataType::Enumerated(constants), Value::Bytes(b)) => {
                if constants.iter().any(|c| &c.bytes == b) {
                    Ok(BitBuffer::from_bytes(b))
                } else {
                    Err(self.encoding_error("bytes do not match any constant"))
                }
            }
            (_, other) => Err(self.encoding_error(format!("cannot represent {:?}", other))),
        }
    }

    /// Produce a random value of exactly `len` bits (rounded down to the type's unit).
    /// Timestamps take the current time when it fits their width.
    pub fn generate<R: Rng + ?Sized>(&self, len: usize, rng: &mut R) -> BitBuffer {
        let nbytes = len / 8;
        match self {
            DataType::Timestamp(ts) if len == ts.format.unit.bits() => {
                match encode_instant(self, ts, &Utc::now()) {
                    Ok(now) => now,
                    Err(_) => DataType::Integer(ts.format).generate(len, rng),
                }
            }
            DataType::Raw | DataType::Integer(_) | DataType::Ipv4 | DataType::Timestamp(_) => {
                if len % 8 == 0 {
                    let bytes: Vec<u8> = (0..nbytes).map(|_| rng.gen()).collect();
                    BitBuffer::from(bytes)
                } else {
                    BitBuffer::from_bits((0..len).map(|_| rng.gen_bool(0.5)))
                }
            }
            DataType::BitArray => BitBuffer::from_bits((0..len).map(|_| rng.gen_bool(0.5))),
            DataType::Ascii | DataType::Utf8 => {
                let bytes: Vec<u8> = (0..nbytes).map(|_| rng.gen_range(0x20u8..=0x7E)).collect();
                BitBuffer::from(bytes)
            }
            DataType::DecimalWord => {
                let bytes: Vec<u8> = (0..nbytes).map(|_| b'0' + rng.gen_range(0u8..10)).collect();
                BitBuffer::from(bytes)
            }
            DataType::HexWord => {
                const DIGITS: &[u8] = b"0123456789abcdef";
                let bytes: Vec<u8> = (0..nbytes).map(|_| DIGITS[rng.gen_range(0..DIGITS.len())]).collect();
                BitBuffer::from(bytes)
            }
            DataType::Enumerated(constants) => {
                let fitting: Vec<&EnumConstant> = constants.iter().filter(|c| c.bytes.len() * 8 == len).collect();
                let pool: Vec<&EnumConstant> = if fitting.is_empty() { constants.iter().collect() } else { fitting };
                if pool.is_empty() {
                    return BitBuffer::new();
                }
                BitBuffer::from_bytes(&pool[rng.gen_range(0..pool.len())].bytes)
            }
        }
    }

    /// Next value in sequence (`+1`, wrapping within the width). Integers follow their
    /// format; other types count on the raw bits, most significant bit first.
    pub fn increment(&self, bits: &BitBuffer) -> Result<BitBuffer, TypeError> {
        if let DataType::Timestamp(ts) = self {
            return DataType::Integer(ts.format).increment(bits);
        }
        if let DataType::Integer(fmt) = self {
            if bits.len() == fmt.unit.bits() {
                let next = match self.decode(bits)? {
                    Value::Unsigned(u) => {
                        let max = width_mask(bits.len());
                        Value::Unsigned(if u >= max { 0 } else { u + 1 })
                    }
                    Value::Signed(i) => {
                        let max = (width_mask(bits.len()) >> 1) as i64;
                        Value::Signed(if i >= max { -max - 1 } else { i + 1 })
                    }
                    other => return Err(self.encoding_error(format!("cannot increment {:?}", other))),
                };
                return self.encode(&next);
            }
        }
        let mut out: Vec<bool> = bits.iter().collect();
        for bit in out.iter_mut().rev() {
            *bit = !*bit;
            if *bit {
                break;
            }
        }
        Ok(BitBuffer::from_bits(out))
    }
}

fn width_mask(bits: usize) -> u64 {
    if bits >= 64 {
        u64::MAX
    } else {
        (1u64 << bits) - 1
    }
}

fn encode_instant(ty: &DataType, ts: &TimestampFormat, instant: &DateTime<Utc>) -> Result<BitBuffer, TypeError> {
    let ticks = ts
        .ticks(instant)
        .ok_or_else(|| ty.encoding_error(format!("{} overflows the tick count", instant)))?;
    let value = if ticks < 0 {
        i64::try_from(ticks).map(Value::Signed)
    } else {
        u64::try_from(ticks).map(Value::Unsigned)
    }
    .map_err(|_| ty.encoding_error(format!("{} ticks does not fit in 64 bits", ticks)))?;
    encode_integer(ty, &ts.format, &value)
}

fn decode_integer(ty: &DataType, fmt: &IntegerFormat, bits: &BitBuffer) -> Result<Value, TypeError> {
    let len = bits.len();
    if len == 0 || len % fmt.unit.bits() != 0 || len > 64 {
        return Err(ty.decoding_error(format!(
            "{} bits is not a whole number of {}-bit units (max 64 bits)",
            len,
            fmt.unit.bits()
        )));
    }
    let bytes = bits.to_bytes();
    let n = bytes.len();
    Ok(match (fmt.sign, fmt.endianness) {
        (Sign::Unsigned, Endianness::Big) => Value::Unsigned(BigEndian::read_uint(&bytes, n)),
        (Sign::Unsigned, Endianness::Little) => Value::Unsigned(LittleEndian::read_uint(&bytes, n)),
        (Sign::Signed, Endianness::Big) => Value::Signed(BigEndian::read_int(&bytes, n)),
        (Sign::Signed, Endianness::Little) => Value::Signed(LittleEndian::read_int(&bytes, n)),
    })
}

fn encode_integer(ty: &DataType, fmt: &IntegerFormat, value: &Value) -> Result<BitBuffer, TypeError> {
    let width = fmt.unit.bits();
    let n = width / 8;
    let mut buf = vec![0u8; n];
    match fmt.sign {
        Sign::Unsigned => {
            let u = value
                .as_u64()
                .ok_or_else(|| ty.encoding_error(format!("{} is negative", value)))?;
            if u > width_mask(width) {
                return Err(ty.encoding_error(format!("{} does not fit in {} bits", u, width)));
            }
            match fmt.endianness {
                Endianness::Big => BigEndian::write_uint(&mut buf, u, n),
                Endianness::Little => LittleEndian::write_uint(&mut buf, u, n),
            }
        }
        Sign::Signed => {
            let i = value
                .as_i64()
                .ok_or_else(|| ty.encoding_error(format!("{} does not fit in i64", value)))?;
            let half = (width_mask(width) >> 1) as i64;
            if i > half || i < -half - 1 {
                return Err(ty.encoding_error(format!("{} does not fit in {} signed bits", i, width)));
            }
            match fmt.endianness {
                Endianness::Big => BigEndian::write_int(&mut buf, i, n),
                Endianness::Little => LittleEndian::write_int(&mut buf, i, n),
            }
        }
    }
    Ok(BitBuffer::from(buf))
}
