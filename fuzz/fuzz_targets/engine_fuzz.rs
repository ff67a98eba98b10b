//! Engine fuzz target: the first byte picks the input kind.
//! Even: the rest is description-language source. Odd: the rest is a message abstracted
//! against a fixed domain. Neither may panic.
//! Build with: cargo fuzz run engine_fuzz (requires nightly and cargo fuzz).

#![cfg_attr(fuzzing, no_main)]

#[cfg(fuzzing)]
use libfuzzer_sys::fuzz_target;

#[cfg(fuzzing)]
const DOMAIN: &str = r#"
symbol Request {
    kind: alt { get: "GET"; put: "PUT"; };
    sep: " ";
    len: size(body) uint16be;
    body: raw(0..32);
    crc: checksum(crc16, body);
}
symbol Reply {
    code: decimal(3);
    text: optional ascii(1..16);
}
"#;

#[cfg(fuzzing)]
fuzz_target!(|data: &[u8]| {
    let Some((selector, rest)) = data.split_first() else {
        return;
    };
    if selector % 2 == 0 {
        if let Ok(s) = std::str::from_utf8(rest) {
            let _ = protodomain::DomainFactory::from_source(s);
        }
        return;
    }
    let Ok(domain) = protodomain::DomainFactory::from_source(DOMAIN) else {
        return;
    };
    let config = protodomain::EngineConfig {
        parse_budget: 20_000,
        max_generation_size: 64,
        ..Default::default()
    };
    let mut memory = protodomain::Memory::new();
    let bits = protodomain::BitBuffer::from_bytes(rest);
    let _ = protodomain::abstract_message(&domain, &bits, &mut memory, &config);
});

#[cfg(not(fuzzing))]
fn main() {
    eprintln!("Build with: cargo fuzz run engine_fuzz");
}
