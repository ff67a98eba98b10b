//! Description language tests: syntax (parse success/failure) and normalization
//! (references, literals, tree validation).

use protodomain::ast::{Literal, NodeDef, RelationDef, SizeDef, TypeDef};
use protodomain::dsl::{parse, DslError};
use protodomain::variable::{NodeKind, Recall, Svas};
use protodomain::{
    BitBuffer, DomainDescription, DomainError, DomainFactory, EngineConfig, FactoryError, Memory, SpecializeOptions,
    SpecificationError, Value,
};

fn build_err(source: &str) -> FactoryError {
    let description = parse(source).expect("parse");
    DomainFactory::build(&description).unwrap_err()
}

// ==================== Syntax: valid descriptions ====================

#[test]
fn parse_empty_description() {
    let d = parse("").expect("empty description can parse");
    assert!(d.symbols.is_empty());
}

#[test]
fn parse_minimal_symbol() {
    let d = parse("symbol M { x: uint8; }").expect("parse");
    assert_eq!(d.symbols.len(), 1);
    assert_eq!(d.symbols[0].name, "M");
    assert_eq!(d.symbols[0].fields[0].name, "x");
    assert_eq!(
        d.symbols[0].fields[0].node,
        NodeDef::Leaf {
            data_type: TypeDef::Integer("uint8".to_string()),
            size: None,
            value: None,
        }
    );
}

#[test]
fn parse_ranges() {
    let src = r#"
symbol R {
    exact: raw(4);
    open: ascii(1..);
    bounded: bits(3..12);
}
"#;
    let d = parse(src).expect("parse");
    let sizes: Vec<Option<SizeDef>> = d.symbols[0]
        .fields
        .iter()
        .map(|f| match &f.node {
            NodeDef::Leaf { size, .. } => *size,
            other => panic!("unexpected {:?}", other),
        })
        .collect();
    assert_eq!(
        sizes,
        vec![
            Some(SizeDef { min: 4, max: Some(4) }),
            Some(SizeDef { min: 1, max: None }),
            Some(SizeDef { min: 3, max: Some(12) }),
        ]
    );
}

#[test]
fn parse_svas_and_recall() {
    let d = parse("symbol S { seq: persistent increment uint16be; nonce: volatile raw(8); }").expect("parse");
    let fields = &d.symbols[0].fields;
    assert_eq!(fields[0].svas, Some(Svas::Persistent));
    assert_eq!(fields[0].recall, Some(Recall::Increment));
    assert_eq!(fields[1].svas, Some(Svas::Volatile));
    assert_eq!(fields[1].recall, None);
}

#[test]
fn parse_literals() {
    let src = r#"
// line comment
symbol L {
    a: 0xABC;      /* odd digit count */
    b: 0b1010_1;
    c: -5;
    d: "GET\r\n";
}
"#;
    let d = parse(src).expect("parse");
    let literals: Vec<Literal> = d.symbols[0]
        .fields
        .iter()
        .map(|f| match &f.node {
            NodeDef::Literal { value } => value.clone(),
            other => panic!("unexpected {:?}", other),
        })
        .collect();
    assert_eq!(
        literals,
        vec![
            Literal::Hex(vec![0x0A, 0xBC]),
            Literal::Bits("10101".to_string()),
            Literal::Int(-5),
            Literal::String("GET\r\n".to_string()),
        ]
    );
}

#[test]
fn parse_size_relation_options() {
    let d = parse("symbol M { len: size(a.b, unit = 1, offset = -3) uint16le; }").expect("parse");
    assert_eq!(
        d.symbols[0].fields[0].node,
        NodeDef::Relation {
            relation: RelationDef::Size {
                unit: Some(1),
                offset: Some(-3),
            },
            targets: vec!["a.b".to_string()],
            format: Some("uint16le".to_string()),
        }
    );
}

#[test]
fn parse_digest_relations() {
    let src = r#"
symbol D {
    h: hash(sha256, a, b);
    m: hmac(sha1_96, 0x0102, a);
    c: checksum(crc32, a) uint32le;
    v: value(a);
}
"#;
    let d = parse(src).expect("parse");
    let fields = &d.symbols[0].fields;
    assert!(matches!(
        &fields[0].node,
        NodeDef::Relation { relation: RelationDef::Hash { algorithm }, targets, .. }
            if algorithm == "sha256" && targets.len() == 2
    ));
    assert!(matches!(
        &fields[1].node,
        NodeDef::Relation { relation: RelationDef::Hmac { key: Literal::Hex(key), .. }, .. } if key == &[1, 2]
    ));
    assert!(matches!(
        &fields[2].node,
        NodeDef::Relation { format: Some(f), .. } if f == "uint32le"
    ));
    assert!(matches!(&fields[3].node, NodeDef::Relation { relation: RelationDef::Value, .. }));
}

#[test]
fn parse_padding_relation() {
    let d = parse("symbol P { a: raw(3); pad: padding(a, modulo = 64, offset = -8, once = true, fill = 0xFF); }")
        .expect("parse");
    assert_eq!(
        d.symbols[0].fields[1].node,
        NodeDef::Relation {
            relation: RelationDef::Padding {
                modulo: 64,
                offset: Some(-8),
                once: true,
                fill: Some(Literal::Hex(vec![0xFF])),
            },
            targets: vec!["a".to_string()],
            format: None,
        }
    );
    assert!(matches!(
        parse("symbol P { a: raw(3); pad: padding(a); }"),
        Err(DslError::Malformed(_))
    ));
}

#[test]
fn parse_timestamp_type() {
    let d = parse("symbol T { a: timestamp; b: timestamp(epoch = windows, unity = ns) uint64le; }").expect("parse");
    assert_eq!(
        d.symbols[0].fields[0].node,
        NodeDef::Leaf {
            data_type: TypeDef::Timestamp { epoch: None, unity: None, format: None },
            size: None,
            value: None,
        }
    );
    assert_eq!(
        d.symbols[0].fields[1].node,
        NodeDef::Leaf {
            data_type: TypeDef::Timestamp {
                epoch: Some("windows".to_string()),
                unity: Some("ns".to_string()),
                format: Some("uint64le".to_string()),
            },
            size: None,
            value: None,
        }
    );
}

#[test]
fn timestamp_fields_decode_to_instants() {
    let domain = DomainFactory::from_source("symbol T { sent: timestamp(epoch = ntp); }").expect("domain");
    let paths = domain
        .parse("T", &BitBuffer::from_bytes(&[0x83, 0xAA, 0x7E, 0x80]), &Memory::new(), &EngineConfig::default())
        .expect("parse");
    assert_eq!(paths.len(), 1);
    let unix_zero = chrono::DateTime::from_timestamp(0, 0).expect("instant");
    assert_eq!(domain.fields(&paths[0])[0].value, Value::Time(unix_zero));

    let fixed = DomainFactory::from_source("symbol F { at: timestamp = 1444494130; }").expect("domain");
    let bytes = fixed
        .specialize("F", &mut Memory::new(), &SpecializeOptions::default(), &EngineConfig::default())
        .expect("specialize")
        .into_data()
        .to_bytes();
    assert_eq!(bytes, vec![0x56, 0x19, 0x3b, 0x32]);

    assert!(DomainFactory::from_source("symbol B { at: timestamp(epoch = mars); }").is_err());
}

#[test]
fn parse_nested_structures() {
    let src = r#"
symbol N {
    header: agg { kind: uint8; flags: bits(8); };
    body: alt { empty: 0x00; text: ascii(1..16); };
    list: repeat(0..4, delimiter = ",") decimal(1..3);
    tail: optional 0xFF;
}
"#;
    let d = parse(src).expect("parse");
    let fields = &d.symbols[0].fields;
    assert!(matches!(&fields[0].node, NodeDef::Aggregate { fields } if fields.len() == 2));
    assert!(matches!(&fields[1].node, NodeDef::Alternative { fields } if fields.len() == 2));
    assert!(matches!(
        &fields[2].node,
        NodeDef::Repeat { min: 0, max: Some(4), delimiter: Some(Literal::String(d)), .. } if d == ","
    ));
    assert!(matches!(&fields[3].node, NodeDef::Optional { .. }));
}

#[test]
fn description_json_round_trip() {
    let d = parse("symbol M { kind: enum { req = 1, rep = 2 }; len: size(kind); }").expect("parse");
    let json = d.to_json().expect("json");
    assert_eq!(DomainDescription::from_json(&json).expect("from json"), d);
}

// ==================== Syntax: invalid descriptions ====================

#[test]
fn parse_missing_semicolon_fails() {
    assert!(matches!(parse("symbol M { x: uint8 }"), Err(DslError::Syntax(_))));
}

#[test]
fn parse_unknown_type_fails() {
    assert!(parse("symbol M { x: float; }").is_err());
}

#[test]
fn parse_unterminated_string_fails() {
    assert!(parse("symbol M { x: \"abc; }").is_err());
}

#[test]
fn parse_field_outside_symbol_fails() {
    assert!(parse("x: uint8;").is_err());
}

// ==================== Normalization ====================

#[test]
fn typed_leaf_with_value_is_constant() {
    let domain = DomainFactory::from_source("symbol V { ver: uint8 = 4; }").expect("domain");
    let ver = domain.field("V", "ver").expect("ver");
    assert_eq!(domain.tree.node(ver).expect("node").svas, Svas::Constant);
    let config = EngineConfig::default();
    let parse = |b: u8| {
        domain
            .parse("V", &BitBuffer::from_bytes(&[b]), &Memory::new(), &config)
            .expect("parse")
            .len()
    };
    assert_eq!(parse(4), 1);
    assert_eq!(parse(5), 0);
}

#[test]
fn integer_literal_uses_smallest_width() {
    let domain = DomainFactory::from_source("symbol C { code: 300; }").expect("domain");
    let code = domain.field("C", "code").expect("code");
    match &domain.tree.node(code).expect("node").kind {
        NodeKind::Leaf(leaf) => assert_eq!(leaf.value.as_ref().expect("value").to_hex(), "012c"),
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn enum_values_decode_to_names() {
    let domain = DomainFactory::from_source("symbol E { kind: enum { req = 1, rep = 2 }; }").expect("domain");
    let paths = domain
        .parse("E", &BitBuffer::from_bytes(&[2]), &Memory::new(), &EngineConfig::default())
        .expect("parse");
    assert_eq!(paths.len(), 1);
    assert_eq!(domain.fields(&paths[0])[0].value, Value::Symbol("rep".to_string()));
}

#[test]
fn repeated_items_are_named_after_their_field() {
    let domain = DomainFactory::from_source("symbol L { items: repeat(1..3) agg { a: uint8; }; }").expect("domain");
    assert!(domain.field("L", "items.item").is_some());
    assert!(domain.field("L", "a").is_some());
}

#[test]
fn unknown_target_is_reported() {
    assert!(matches!(
        build_err("symbol S { len: size(missing); }"),
        FactoryError::UnknownTarget { ref target, .. } if target == "missing"
    ));
}

#[test]
fn duplicate_names_are_rejected() {
    assert!(matches!(
        build_err("symbol S { x: uint8; } symbol S { y: uint8; }"),
        FactoryError::DuplicateSymbol(_)
    ));
    assert!(matches!(
        build_err("symbol S { x: uint8; x: raw(1); }"),
        FactoryError::DuplicateField { .. }
    ));
}

#[test]
fn unknown_algorithm_is_reported() {
    assert!(matches!(
        build_err("symbol S { x: raw(1); h: hash(md4, x); }"),
        FactoryError::UnknownAlgorithm(ref name) if name == "md4"
    ));
}

#[test]
fn unknown_integer_format_from_json() {
    let json = r#"{"symbols":[{"name":"S","fields":[{"name":"x","node":{"kind":"leaf","data_type":{"integer":"uint12"}}}]}]}"#;
    let description = DomainDescription::from_json(json).expect("json");
    assert!(matches!(
        DomainFactory::build(&description),
        Err(FactoryError::UnknownType(ref name)) if name == "uint12"
    ));
}

#[test]
fn cyclic_relations_are_rejected() {
    assert!(matches!(
        build_err("symbol S { a: hash(md5, b); b: hash(md5, a); }"),
        FactoryError::Specification(SpecificationError::CyclicRelation(_))
    ));
}

#[test]
fn contradictory_bounds_are_rejected() {
    assert!(matches!(
        build_err("symbol S { x: raw(8..2); }"),
        FactoryError::Specification(SpecificationError::ContradictoryBounds { .. })
    ));
    assert!(matches!(
        build_err("symbol S { x: raw(1) = 0xAABB; }"),
        FactoryError::Specification(SpecificationError::FixedValueOutOfBounds { len: 16, .. })
    ));
}

#[test]
fn value_copy_inside_its_target_is_rejected() {
    assert!(matches!(
        build_err("symbol S { outer: agg { c: value(outer); x: raw(1); }; }"),
        FactoryError::Specification(SpecificationError::InvalidRelation { .. })
    ));
}

#[test]
fn from_source_reports_syntax_errors() {
    assert!(matches!(
        DomainFactory::from_source("symbol {"),
        Err(DomainError::Dsl(DslError::Syntax(_)))
    ));
}
