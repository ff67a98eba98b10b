//! Format bound fields for display (CLI dump text).

use crate::bits::BitBuffer;
use crate::path::FieldValue;
use crate::value::Value;

fn hex_string(b: &[u8]) -> String {
    b.iter().map(|x| format!("{:02x}", x)).collect::<Vec<_>>().join(" ")
}

/// Raw bits of a field: spaced hex bytes when aligned, else a bit string.
pub fn raw_summary(bits: &BitBuffer) -> String {
    if bits.is_byte_aligned() {
        format!("hex({})", hex_string(&bits.to_bytes()))
    } else {
        format!("bits({})", bits.to_bit_string())
    }
}

/// One-line decoded value; byte values are shown spaced like the raw column.
pub fn value_summary(v: &Value) -> String {
    match v {
        Value::Bytes(b) => format!("hex({})", hex_string(b)),
        other => other.to_string(),
    }
}

/// Render fields as an aligned table: name, width in bits, decoded value, raw bits.
pub fn render_fields(fields: &[FieldValue]) -> String {
    let name_width = fields.iter().map(|f| f.name.len()).max().unwrap_or(0).max(5);
    let mut lines = Vec::with_capacity(fields.len() + 1);
    lines.push(format!("{:<w$}  {:>5}  value", "field", "bits", w = name_width));
    for f in fields {
        let value = value_summary(&f.value);
        let raw = raw_summary(&f.bits);
        let line = if value == raw {
            format!("{:<w$}  {:>5}  {}", f.name, f.bits.len(), value, w = name_width)
        } else {
            format!("{:<w$}  {:>5}  {}  [{}]", f.name, f.bits.len(), value, raw, w = name_width)
        };
        lines.push(line);
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_aligned_rows() {
        let fields = vec![
            FieldValue {
                name: "len".to_string(),
                value: Value::Unsigned(2),
                bits: BitBuffer::from_bytes(&[2]),
            },
            FieldValue {
                name: "payload".to_string(),
                value: Value::Bytes(vec![0xAA, 0xBB]),
                bits: BitBuffer::from_bytes(&[0xAA, 0xBB]),
            },
        ];
        let out = render_fields(&fields);
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[1], "len          8  2  [hex(02)]");
        assert_eq!(lines[2], "payload     16  hex(aa bb)");
    }

    #[test]
    fn unaligned_bits_are_shown_as_bit_strings() {
        let bits = BitBuffer::from_bit_str("101").expect("bits");
        assert_eq!(raw_summary(&bits), "bits(101)");
    }
}
