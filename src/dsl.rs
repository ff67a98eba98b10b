//! Parse description-language source into an [`ast::DomainDescription`] using PEST.
//!
//! ```text
//! symbol Login {
//!     magic: 0xCAFE;
//!     len: size(user);
//!     user: ascii(1..32);
//!     seq: persistent increment uint16be;
//!     digest: hash(md5, user);
//! }
//! ```

use crate::ast::*;
use crate::variable::{Recall, Svas};
use pest::iterators::Pair;
use pest::Parser;
use pest_derive::Parser as PestParser;

#[derive(PestParser)]
#[grammar = "grammar.pest"]
struct DomainParser;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DslError {
    #[error("Parse error: {0}")]
    Syntax(String),
    #[error("Invalid {what}: {text}")]
    Invalid { what: &'static str, text: String },
    #[error("Malformed {0}")]
    Malformed(&'static str),
}

/// Parse description source into a domain description.
pub fn parse(source: &str) -> Result<DomainDescription, DslError> {
    let pairs = DomainParser::parse(Rule::domain, source).map_err(|e| DslError::Syntax(e.to_string()))?;
    let pair = pairs.into_iter().next().ok_or(DslError::Malformed("domain"))?;
    build_domain(pair)
}

fn build_domain(pair: Pair<Rule>) -> Result<DomainDescription, DslError> {
    let mut symbols = Vec::new();
    for inner in pair.into_inner() {
        if inner.as_rule() == Rule::symbol {
            symbols.push(build_symbol(inner)?);
        }
    }
    Ok(DomainDescription { symbols })
}

fn build_symbol(pair: Pair<Rule>) -> Result<SymbolDef, DslError> {
    let mut inner = pair.into_inner();
    let name = inner.next().ok_or(DslError::Malformed("symbol name"))?.as_str().to_string();
    let fields = inner.map(build_field).collect::<Result<Vec<_>, _>>()?;
    Ok(SymbolDef { name, fields })
}

fn build_fields(pair: Pair<Rule>) -> Result<Vec<FieldDef>, DslError> {
    pair.into_inner()
        .filter(|p| p.as_rule() == Rule::field)
        .map(build_field)
        .collect()
}

fn build_field(pair: Pair<Rule>) -> Result<FieldDef, DslError> {
    let mut name = None;
    let mut svas = None;
    let mut recall = None;
    let mut node = None;
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::ident => name = Some(inner.as_str().to_string()),
            Rule::svas => svas = Some(parse_svas(inner.as_str())?),
            Rule::recall => recall = Some(parse_recall(inner.as_str())?),
            Rule::node => node = Some(build_node(inner)?),
            _ => {}
        }
    }
    Ok(FieldDef {
        name: name.ok_or(DslError::Malformed("field name"))?,
        svas,
        recall,
        node: node.ok_or(DslError::Malformed("field node"))?,
    })
}

fn parse_svas(s: &str) -> Result<Svas, DslError> {
    match s {
        "constant" => Ok(Svas::Constant),
        "ephemeral" => Ok(Svas::Ephemeral),
        "volatile" => Ok(Svas::Volatile),
        "persistent" => Ok(Svas::Persistent),
        _ => Err(DslError::Invalid {
            what: "svas",
            text: s.to_string(),
        }),
    }
}

fn parse_recall(s: &str) -> Result<Recall, DslError> {
    match s {
        "reuse" => Ok(Recall::Reuse),
        "increment" => Ok(Recall::Increment),
        _ => Err(DslError::Invalid {
            what: "recall",
            text: s.to_string(),
        }),
    }
}

fn build_node(pair: Pair<Rule>) -> Result<NodeDef, DslError> {
    let inner = pair.into_inner().next().ok_or(DslError::Malformed("node"))?;
    match inner.as_rule() {
        Rule::aggregate => Ok(NodeDef::Aggregate {
            fields: build_fields(inner)?,
        }),
        Rule::alternative => Ok(NodeDef::Alternative {
            fields: build_fields(inner)?,
        }),
        Rule::repeat => build_repeat(inner),
        Rule::optional => {
            let child = inner.into_inner().next().ok_or(DslError::Malformed("optional"))?;
            Ok(NodeDef::Optional {
                child: Box::new(build_node(child)?),
            })
        }
        Rule::relation => build_relation(inner),
        Rule::leaf => build_leaf(inner),
        Rule::literal => Ok(NodeDef::Literal {
            value: build_literal(inner)?,
        }),
        _ => Err(DslError::Malformed("node")),
    }
}

fn build_repeat(pair: Pair<Rule>) -> Result<NodeDef, DslError> {
    let mut range = None;
    let mut delimiter = None;
    let mut child = None;
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::range => range = Some(build_range(inner)?),
            Rule::delimiter => {
                let lit = inner.into_inner().next().ok_or(DslError::Malformed("delimiter"))?;
                delimiter = Some(build_literal(lit)?);
            }
            Rule::node => child = Some(build_node(inner)?),
            _ => {}
        }
    }
    let range = range.ok_or(DslError::Malformed("repeat bounds"))?;
    Ok(NodeDef::Repeat {
        min: range.min,
        max: range.max,
        delimiter,
        child: Box::new(child.ok_or(DslError::Malformed("repeat child"))?),
    })
}

/// `n` is exactly n, `a..b` is inclusive, `a..` is open-ended.
fn build_range(pair: Pair<Rule>) -> Result<SizeDef, DslError> {
    let mut min = None;
    let mut max = None;
    let mut open = false;
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::number if min.is_none() => min = Some(parse_number(inner.as_str())?),
            Rule::number => max = Some(parse_number(inner.as_str())?),
            Rule::range_dots => open = true,
            _ => {}
        }
    }
    let min = min.ok_or(DslError::Malformed("range"))?;
    let max = match (open, max) {
        (false, _) => Some(min),
        (true, max) => max,
    };
    Ok(SizeDef { min, max })
}

fn parse_number(s: &str) -> Result<usize, DslError> {
    s.parse().map_err(|_| DslError::Invalid {
        what: "number",
        text: s.to_string(),
    })
}

fn parse_signed(s: &str) -> Result<i64, DslError> {
    s.parse().map_err(|_| DslError::Invalid {
        what: "integer",
        text: s.to_string(),
    })
}

fn build_leaf(pair: Pair<Rule>) -> Result<NodeDef, DslError> {
    let mut data_type = None;
    let mut size = None;
    let mut value = None;
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::leaf_type => data_type = Some(build_type(inner)?),
            Rule::size_spec => {
                let range = inner.into_inner().next().ok_or(DslError::Malformed("size"))?;
                size = Some(build_range(range)?);
            }
            Rule::literal => value = Some(build_literal(inner)?),
            _ => {}
        }
    }
    Ok(NodeDef::Leaf {
        data_type: data_type.ok_or(DslError::Malformed("leaf type"))?,
        size,
        value,
    })
}

fn build_type(pair: Pair<Rule>) -> Result<TypeDef, DslError> {
    let inner = pair.into_inner().next().ok_or(DslError::Malformed("type"))?;
    match inner.as_rule() {
        Rule::int_type => Ok(TypeDef::Integer(inner.as_str().to_string())),
        Rule::enum_type => {
            let mut variants = Vec::new();
            for variant in inner.into_inner() {
                let mut it = variant.into_inner();
                let name = it.next().ok_or(DslError::Malformed("enum variant name"))?;
                let lit = it.next().ok_or(DslError::Malformed("enum variant value"))?;
                variants.push(EnumVariantDef {
                    name: name.as_str().to_string(),
                    value: build_literal(lit)?,
                });
            }
            Ok(TypeDef::Enum(variants))
        }
        Rule::timestamp_type => {
            let (mut epoch, mut unity, mut format) = (None, None, None);
            for part in inner.into_inner() {
                match part.as_rule() {
                    Rule::int_type => format = Some(part.as_str().to_string()),
                    Rule::timestamp_opts => {
                        for opt in part.into_inner() {
                            let opt = opt.into_inner().next().ok_or(DslError::Malformed("timestamp option"))?;
                            let rule = opt.as_rule();
                            let name = opt
                                .into_inner()
                                .next()
                                .ok_or(DslError::Malformed("timestamp option"))?
                                .as_str()
                                .to_string();
                            match rule {
                                Rule::epoch_opt => epoch = Some(name),
                                _ => unity = Some(name),
                            }
                        }
                    }
                    _ => {}
                }
            }
            Ok(TypeDef::Timestamp { epoch, unity, format })
        }
        Rule::simple_type => match inner.as_str() {
            "raw" => Ok(TypeDef::Raw),
            "ascii" => Ok(TypeDef::Ascii),
            "utf8" => Ok(TypeDef::Utf8),
            "decimal" => Ok(TypeDef::Decimal),
            "hexword" => Ok(TypeDef::Hexword),
            "bits" => Ok(TypeDef::Bits),
            "ipv4" => Ok(TypeDef::Ipv4),
            other => Err(DslError::Invalid {
                what: "type",
                text: other.to_string(),
            }),
        },
        _ => Err(DslError::Malformed("type")),
    }
}

fn build_targets(pair: Pair<Rule>) -> Vec<String> {
    pair.into_inner()
        .filter_map(|target| target.into_inner().next())
        .map(|qualified| qualified.as_str().to_string())
        .collect()
}

fn build_relation(pair: Pair<Rule>) -> Result<NodeDef, DslError> {
    let inner = pair.into_inner().next().ok_or(DslError::Malformed("relation"))?;
    let rule = inner.as_rule();
    let mut algorithm = None;
    let mut key = None;
    let mut targets = Vec::new();
    let mut unit = None;
    let mut offset = None;
    let mut format = None;
    let mut modulo = None;
    let mut once = false;
    let mut fill = None;
    for part in inner.into_inner() {
        match part.as_rule() {
            Rule::ident => algorithm = Some(part.as_str().to_string()),
            Rule::literal => key = Some(build_literal(part)?),
            Rule::targets => targets = build_targets(part),
            Rule::int_type => format = Some(part.as_str().to_string()),
            Rule::size_opt => {
                let opt = part.into_inner().next().ok_or(DslError::Malformed("size option"))?;
                let rule = opt.as_rule();
                let text = opt.into_inner().last().ok_or(DslError::Malformed("size option"))?.as_str();
                match rule {
                    Rule::unit_opt => unit = Some(parse_number(text)?),
                    Rule::offset_opt => offset = Some(parse_signed(text)?),
                    _ => {}
                }
            }
            Rule::padding_opt => {
                let opt = part.into_inner().next().ok_or(DslError::Malformed("padding option"))?;
                let rule = opt.as_rule();
                let value = opt.into_inner().last().ok_or(DslError::Malformed("padding option"))?;
                match rule {
                    Rule::modulo_opt => modulo = Some(parse_number(value.as_str())?),
                    Rule::offset_opt => offset = Some(parse_signed(value.as_str())?),
                    Rule::once_opt => once = value.as_str() == "true",
                    Rule::fill_opt => fill = Some(build_literal(value)?),
                    _ => {}
                }
            }
            _ => {}
        }
    }
    let relation = match rule {
        Rule::size_rel => RelationDef::Size { unit, offset },
        Rule::value_rel => RelationDef::Value,
        Rule::hash_rel => RelationDef::Hash {
            algorithm: algorithm.ok_or(DslError::Malformed("hash algorithm"))?,
        },
        Rule::hmac_rel => RelationDef::Hmac {
            algorithm: algorithm.ok_or(DslError::Malformed("hmac algorithm"))?,
            key: key.ok_or(DslError::Malformed("hmac key"))?,
        },
        Rule::checksum_rel => RelationDef::Checksum {
            algorithm: algorithm.ok_or(DslError::Malformed("checksum algorithm"))?,
        },
        Rule::padding_rel => RelationDef::Padding {
            modulo: modulo.ok_or(DslError::Malformed("padding modulo"))?,
            offset,
            once,
            fill,
        },
        _ => return Err(DslError::Malformed("relation")),
    };
    Ok(NodeDef::Relation {
        relation,
        targets,
        format,
    })
}

fn build_literal(pair: Pair<Rule>) -> Result<Literal, DslError> {
    let inner = match pair.as_rule() {
        Rule::literal => pair.into_inner().next().ok_or(DslError::Malformed("literal"))?,
        _ => pair,
    };
    let s = inner.as_str();
    match inner.as_rule() {
        Rule::hex_lit => parse_hex_bytes(&s[2..]).map(Literal::Hex),
        Rule::bin_lit => Ok(Literal::Bits(s[2..].replace('_', ""))),
        Rule::string => Ok(Literal::String(unescape(&s[1..s.len() - 1]))),
        Rule::signed => parse_signed(s).map(Literal::Int),
        _ => Err(DslError::Malformed("literal")),
    }
}

/// Odd digit counts get a leading zero nibble: `0xABC` is `0x0ABC`.
fn parse_hex_bytes(digits: &str) -> Result<Vec<u8>, DslError> {
    let padded = if digits.len() % 2 == 1 {
        format!("0{}", digits)
    } else {
        digits.to_string()
    };
    hex::decode(&padded).map_err(|_| DslError::Invalid {
        what: "hex literal",
        text: digits.to_string(),
    })
}

fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some('0') => out.push('\0'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_literals_keep_leading_zeros() {
        assert_eq!(parse_hex_bytes("0001").expect("hex"), vec![0x00, 0x01]);
        assert_eq!(parse_hex_bytes("abc").expect("hex"), vec![0x0A, 0xBC]);
    }

    #[test]
    fn escapes() {
        assert_eq!(unescape(r#"a\"b\n"#), "a\"b\n");
    }
}
