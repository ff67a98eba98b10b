//! Check, parse and specialize messages of a domain description.
//!
//! Usage:
//!   protodomain check DESCRIPTION
//!   protodomain parse DESCRIPTION [--symbol NAME] HEX
//!   protodomain specialize DESCRIPTION SYMBOL [--count N] [--set field=0xHEX ...]
//!
//! Descriptions ending in `.json` are read as serialized `DomainDescription`s; anything else
//! is parsed as description-language source. `--json` switches output to JSON lines.
//! Log level follows `RUST_LOG` (default `info`).

use anyhow::{anyhow, bail, Context};
use clap::{Parser, Subcommand};
use protodomain::dump::render_fields;
use protodomain::{
    abstract_message, Abstraction, BitBuffer, Domain, DomainDescription, DomainFactory, EngineConfig,
    GenericPath, Memory, SpecializeOptions,
};
use serde_json::json;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "protodomain", version, about = "Symbolic protocol field domains")]
struct Cli {
    /// Engine configuration (TOML).
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Emit JSON instead of tables.
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate a description and list its symbols.
    Check { description: PathBuf },
    /// Abstract a hex-encoded message.
    Parse {
        description: PathBuf,
        /// Parse as this symbol only, listing every complete path.
        #[arg(long)]
        symbol: Option<String>,
        hex: String,
    },
    /// Produce messages of a symbol, sharing one session memory.
    Specialize {
        description: PathBuf,
        symbol: String,
        #[arg(long, default_value_t = 1)]
        count: usize,
        /// Force a field: `name=0xHEX` or `name=0bBITS`.
        #[arg(long = "set")]
        set: Vec<String>,
    },
}

fn load_domain(path: &Path) -> anyhow::Result<Domain> {
    let source = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let domain = if path.extension().is_some_and(|e| e == "json") {
        let description = DomainDescription::from_json(&source)?;
        DomainFactory::build(&description)?
    } else {
        DomainFactory::from_source(&source)?
    };
    info!(symbols = domain.symbols.len(), nodes = domain.tree.len(), "domain loaded");
    Ok(domain)
}

fn parse_forced(spec: &str) -> anyhow::Result<(String, BitBuffer)> {
    let (name, value) = spec
        .split_once('=')
        .ok_or_else(|| anyhow!("expected name=value, got {:?}", spec))?;
    let bits = if let Some(digits) = value.strip_prefix("0x") {
        BitBuffer::from(hex::decode(digits)?)
    } else if let Some(digits) = value.strip_prefix("0b") {
        BitBuffer::from_bit_str(digits).ok_or_else(|| anyhow!("invalid bit string {:?}", digits))?
    } else {
        BitBuffer::from_bytes(value.as_bytes())
    };
    Ok((name.to_string(), bits))
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };

    match cli.command {
        Command::Check { description } => {
            let domain = load_domain(&description)?;
            for symbol in &domain.symbols {
                if cli.json {
                    println!("{}", json!({ "symbol": symbol.name }));
                } else {
                    println!("{}", symbol.name);
                }
            }
        }
        Command::Parse {
            description,
            symbol,
            hex,
        } => {
            let domain = load_domain(&description)?;
            let bits = BitBuffer::from(hex::decode(hex.trim()).context("message is not hex")?);
            let mut memory = Memory::new();
            match symbol {
                Some(symbol) => {
                    let paths = domain.parse(&symbol, &bits, &memory, &config)?;
                    if paths.is_empty() {
                        bail!("message does not match {}", symbol);
                    }
                    for (i, path) in paths.iter().enumerate() {
                        let fields = domain.fields(path);
                        if cli.json {
                            println!("{}", json!({ "symbol": symbol, "path": i, "fields": fields }));
                        } else {
                            println!("{} path {}:\n{}", symbol, i, render_fields(&fields));
                        }
                    }
                }
                None => match abstract_message(&domain, &bits, &mut memory, &config)? {
                    Abstraction::Matched { symbol, path } => {
                        let fields = domain.fields(&path);
                        if cli.json {
                            println!("{}", json!({ "symbol": symbol, "fields": fields }));
                        } else {
                            println!("{}:\n{}", symbol, render_fields(&fields));
                        }
                    }
                    Abstraction::Unknown => bail!("no symbol matched"),
                },
            }
        }
        Command::Specialize {
            description,
            symbol,
            count,
            set,
        } => {
            let domain = load_domain(&description)?;
            let mut options = SpecializeOptions::new();
            for spec in &set {
                let (name, bits) = parse_forced(spec)?;
                let id = domain
                    .field(&symbol, &name)
                    .ok_or_else(|| anyhow!("{} has no field {}", symbol, name))?;
                options = options.force(id, bits);
            }
            let mut memory = Memory::new();
            for _ in 0..count {
                let path = domain.specialize(&symbol, &mut memory, &options, &config)?;
                let fields = domain.fields(&path);
                let data = path.data().clone();
                if cli.json {
                    println!("{}", json!({ "symbol": symbol, "hex": data.to_hex(), "fields": fields }));
                } else {
                    println!("{}\n{}", data.to_hex(), render_fields(&fields));
                }
            }
        }
    }
    Ok(())
}
