//! Integration tests: specialize and parse whole symbols, session memory, abstraction and
//! search limits.

use protodomain::{
    abstract_message, Abstraction, BitBuffer, Domain, DomainError, DomainFactory, EngineConfig, FactoryError,
    GenericPath, Memory, SpecializationError, SpecializeOptions, Value,
};

const TRANSFER: &str = r#"
symbol Transfer {
    payload: raw(2);
    digest: hash(md5, payload);
}
"#;

const FRAME: &str = r#"
symbol Frame {
    body: raw(9);
    crc: checksum(crc16, body);
}
"#;

const SESSION: &str = r#"
symbol Login {
    token: persistent raw(4);
}

symbol Counter {
    seq: persistent increment uint8;
}

symbol Nonce {
    nonce: volatile raw(2);
}
"#;

fn domain(source: &str) -> Domain {
    DomainFactory::from_source(source).expect("description")
}

fn force(domain: &Domain, symbol: &str, field: &str, bytes: &[u8]) -> SpecializeOptions {
    let id = domain.field(symbol, field).expect("field");
    SpecializeOptions::new().force(id, BitBuffer::from_bytes(bytes))
}

#[test]
fn test_md5_digest_round_trip() {
    let domain = domain(TRANSFER);
    let config = EngineConfig::default();
    let options = force(&domain, "Transfer", "payload", &[0xAA, 0xBB]);
    let mut memory = Memory::new();
    let message = domain
        .specialize("Transfer", &mut memory, &options, &config)
        .expect("specialize")
        .into_data();
    assert_eq!(message.len(), 18 * 8);
    assert_eq!(message.to_hex(), "aabb58cea1f6b2b06520613e09af90dc1c47");

    let paths = domain
        .parse("Transfer", &message, &Memory::new(), &config)
        .expect("parse");
    assert_eq!(paths.len(), 1);
    let fields = domain.fields(&paths[0]);
    assert_eq!(fields[0].name, "payload");
    assert_eq!(fields[0].value, Value::Bytes(vec![0xAA, 0xBB]));
}

#[test]
fn test_wrong_digest_is_rejected() {
    let domain = domain(TRANSFER);
    let mut bytes = hex::decode("aabb58cea1f6b2b06520613e09af90dc1c47").expect("hex");
    bytes[17] ^= 0x01;
    let paths = domain
        .parse("Transfer", &BitBuffer::from(bytes), &Memory::new(), &EngineConfig::default())
        .expect("parse");
    assert!(paths.is_empty());
}

#[test]
fn test_seeded_specialization_is_deterministic() {
    let domain = domain(
        r#"
        symbol Random {
            blob: raw(1..16);
            digits: decimal(1..4);
            flag: bits(3);
        }
        "#,
    );
    let config = EngineConfig {
        seed: Some(42),
        ..EngineConfig::default()
    };
    let run = || {
        domain
            .specialize("Random", &mut Memory::new(), &SpecializeOptions::new(), &config)
            .expect("specialize")
            .into_data()
    };
    let first = run();
    assert_eq!(first, run());
    assert!(first.len() >= 8 + 8 + 3);
}

#[test]
fn test_ambiguous_text_yields_every_reading() {
    let domain = domain(
        r#"
        symbol Digit {
            digit: alt {
                dec: decimal(1);
                hex: hexword(1);
            };
        }
        "#,
    );
    let paths = domain
        .parse("Digit", &BitBuffer::from_bytes(&[0x35]), &Memory::new(), &EngineConfig::default())
        .expect("parse");
    assert!(paths.len() >= 2);
    let dec = domain.field("Digit", "dec").expect("dec");
    let hex = domain.field("Digit", "hex").expect("hex");
    assert!(paths[0].is_bound(dec));
    assert!(paths[1].is_bound(hex));
}

#[test]
fn test_exact_length_boundary() {
    let domain = domain("symbol Word { word: ascii(3); }");
    let config = EngineConfig::default();
    let parse = |bytes: &[u8]| {
        domain
            .parse("Word", &BitBuffer::from_bytes(bytes), &Memory::new(), &config)
            .expect("parse")
            .len()
    };
    assert_eq!(parse(b"abc"), 1);
    assert_eq!(parse(b"ab"), 0);
    assert_eq!(parse(b"abcd"), 0);
}

#[test]
fn test_crc16_is_computed_and_checked() {
    let domain = domain(FRAME);
    let config = EngineConfig::default();
    let options = force(&domain, "Frame", "body", b"123456789");
    let message = domain
        .specialize("Frame", &mut Memory::new(), &options, &config)
        .expect("specialize")
        .into_data();
    assert_eq!(message.to_hex(), "313233343536373839bb3d");
    assert_eq!(
        domain.parse("Frame", &message, &Memory::new(), &config).expect("parse").len(),
        1
    );

    let mut corrupted = message.to_bytes();
    corrupted[3] ^= 0x10;
    assert!(domain
        .parse("Frame", &BitBuffer::from(corrupted), &Memory::new(), &config)
        .expect("parse")
        .is_empty());
}

#[test]
fn test_persistent_reuse_across_messages() {
    let domain = domain(SESSION);
    let config = EngineConfig::default();
    let mut memory = Memory::new();
    let first = domain
        .specialize("Login", &mut memory, &SpecializeOptions::new(), &config)
        .expect("first")
        .into_data();
    let second = domain
        .specialize("Login", &mut memory, &SpecializeOptions::new(), &config)
        .expect("second")
        .into_data();
    assert_eq!(first, second);

    let fresh = Memory::new();
    let token = domain.field("Login", "token").expect("token");
    assert!(!fresh.has(token));
    assert_eq!(memory.get(token), Some(first));
}

#[test]
fn test_persistent_increment_across_messages() {
    let domain = domain(SESSION);
    let config = EngineConfig::default();
    let mut memory = Memory::new();
    let seq = domain.field("Counter", "seq").expect("seq");
    let mut values = Vec::new();
    for _ in 0..3 {
        let path = domain
            .specialize("Counter", &mut memory, &SpecializeOptions::new(), &config)
            .expect("specialize");
        values.push(path.value_of(seq).expect("seq").to_bytes()[0]);
    }
    assert_eq!(values[1], values[0].wrapping_add(1));
    assert_eq!(values[2], values[1].wrapping_add(1));
}

#[test]
fn test_volatile_values_are_not_memorized() {
    let domain = domain(SESSION);
    let mut memory = Memory::new();
    domain
        .specialize("Nonce", &mut memory, &SpecializeOptions::new(), &EngineConfig::default())
        .expect("specialize");
    assert!(memory.is_empty());
}

#[test]
fn test_parse_learns_persistent_values() {
    let domain = domain(SESSION);
    let config = EngineConfig::default();
    let mut memory = Memory::new();
    let login = |bytes: &[u8], memory: &mut Memory| {
        let parser = protodomain::VariableParser::with_config(&domain.tree, config.clone());
        let root = domain.symbol("Login").expect("Login").root;
        parser
            .parse_first(root, &BitBuffer::from_bytes(bytes), memory)
            .expect("parse")
            .is_some()
    };
    assert!(login(&[0xDE, 0xAD, 0xBE, 0xEF], &mut memory));
    assert!(login(&[0xDE, 0xAD, 0xBE, 0xEF], &mut memory));
    assert!(!login(&[0xCA, 0xFE, 0xBA, 0xBE], &mut memory));
}

#[test]
fn test_parse_accepts_reuse_or_increment() {
    let domain = domain("symbol Counter { seq: persistent increment uint8; }");
    let config = EngineConfig::default();
    let root = domain.symbol("Counter").expect("Counter").root;
    let parser = protodomain::VariableParser::with_config(&domain.tree, config);
    let mut memory = Memory::new();
    let mut accept = |byte: u8| {
        parser
            .parse_first(root, &BitBuffer::from_bytes(&[byte]), &mut memory)
            .expect("parse")
            .is_some()
    };
    assert!(accept(5));
    assert!(accept(6));
    assert!(accept(6));
    assert!(!accept(8));
}

#[test]
fn test_abstraction_picks_the_matching_symbol() {
    let domain = domain(
        r#"
        symbol Ping { kind: 0x01; id: uint16; }
        symbol Pong { kind: 0x02; id: uint16; }
        "#,
    );
    let config = EngineConfig::default();
    let mut memory = Memory::new();
    let result = abstract_message(&domain, &BitBuffer::from_bytes(&[0x02, 0x00, 0x07]), &mut memory, &config)
        .expect("abstract");
    assert_eq!(result.symbol(), Some("Pong"));
    if let Abstraction::Matched { path, .. } = &result {
        let fields = domain.fields(path);
        assert_eq!(fields[1].value, Value::Unsigned(7));
    }

    let unknown = abstract_message(&domain, &BitBuffer::from_bytes(&[0x03, 0x00, 0x07]), &mut memory, &config)
        .expect("abstract");
    assert!(matches!(unknown, Abstraction::Unknown));
}

#[test]
fn test_optional_field_present_or_absent() {
    let domain = domain("symbol Opt { head: 0xAA; tail: optional 0xBB; }");
    let config = EngineConfig::default();
    for bytes in [&[0xAA][..], &[0xAA, 0xBB][..]] {
        let paths = domain
            .parse("Opt", &BitBuffer::from_bytes(bytes), &Memory::new(), &config)
            .expect("parse");
        assert_eq!(paths.len(), 1, "{:02x?}", bytes);
    }
}

#[test]
fn test_repeat_count_override() {
    let domain = domain("symbol List { items: repeat(1..5) uint8; }");
    let config = EngineConfig::default();
    let items = domain.field("List", "items").expect("items");
    let options = SpecializeOptions::new().repeat_count(items, 3);
    let message = domain
        .specialize("List", &mut Memory::new(), &options, &config)
        .expect("specialize")
        .into_data();
    assert_eq!(message.len(), 24);

    let err = domain
        .specialize(
            "List",
            &mut Memory::new(),
            &SpecializeOptions::new().repeat_count(items, 9),
            &config,
        )
        .unwrap_err();
    assert!(matches!(
        err,
        DomainError::Specialization(SpecializationError::InvalidForcedValue { .. })
    ));
}

#[test]
fn test_search_budget_is_enforced() {
    let domain = domain("symbol Flood { items: repeat(0..) raw(1); }");
    let config = EngineConfig {
        parse_budget: 100,
        ..EngineConfig::default()
    };
    let input = BitBuffer::from(vec![0u8; 2000]);
    let err = domain.parse("Flood", &input, &Memory::new(), &config).unwrap_err();
    assert!(matches!(err, DomainError::SearchBudgetExceeded { limit: 100 }));
}

#[test]
fn test_unknown_symbol() {
    let domain = domain(TRANSFER);
    let err = domain
        .parse("Nope", &BitBuffer::new(), &Memory::new(), &EngineConfig::default())
        .unwrap_err();
    assert!(matches!(err, DomainError::Factory(FactoryError::UnknownSymbol(ref name)) if name == "Nope"));
}
