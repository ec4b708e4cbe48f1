use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;

use disasm_semantics::decoder::CapstoneEngine;
use disasm_semantics::format::OutputFormat;
use disasm_semantics::session::{Disasm, DisasmConfig};
use disasm_semantics::{Address, Architecture, BitWidth, DisasmError, EngineOptions};

#[derive(Parser, Debug)]
#[command(author, version, about = "Classify and resolve instructions in a raw code buffer", long_about = None)]
struct Cli {
    /// Input file holding raw code
    #[arg(value_name = "BINFILE")]
    input: PathBuf,
    /// Instruction set
    #[arg(long, value_enum, default_value_t = Architecture::Intel)]
    arch: Architecture,
    /// Decode width
    #[arg(long, value_enum, default_value_t = BitWidth::Bits32)]
    bits: BitWidth,
    /// Address of the first decoded byte (hex or dec)
    #[arg(long, default_value = "0", value_parser = parse_address)]
    base: Address,
    /// Skip N bytes at start of file
    #[arg(long, default_value_t = 0usize)]
    skip: usize,
    /// Limit bytes loaded (default: to EOF after --skip)
    #[arg(long)]
    len: Option<usize>,
    /// Bytes per decode pass (default: the whole buffer in one pass)
    #[arg(long)]
    pass_size: Option<usize>,
    /// Stop at the first undecodable byte instead of emitting data records
    #[arg(long)]
    no_skip_data: bool,
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,
    /// Log decode passes (debug level); RUST_LOG overrides
    #[arg(short, long)]
    verbose: bool,
}

fn parse_address(s: &str) -> Result<Address> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Ok(Address::from_str_radix(hex, 16)?)
    } else {
        Ok(s.parse::<Address>()?)
    }
}

fn log_level(verbose: bool) -> log::LevelFilter {
    if verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Warn
    }
}

fn load(cli: &Cli) -> Result<Vec<u8>> {
    let data = fs::read(&cli.input).with_context(|| format!("failed to read {}", cli.input.display()))?;
    if cli.skip > data.len() {
        bail!("--skip {} is past the end of a {} byte file", cli.skip, data.len());
    }
    let end = cli
        .len
        .map(|len| cli.skip.saturating_add(len).min(data.len()))
        .unwrap_or(data.len());
    Ok(data[cli.skip..end].to_vec())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    env_logger::Builder::new()
        .filter_module("disasm_semantics", log_level(cli.verbose))
        .parse_default_env()
        .target(env_logger::Target::Stderr)
        .format_timestamp(None)
        .init();

    let code = load(&cli)?;

    let pass_size = cli.pass_size.unwrap_or(code.len());
    let options = EngineOptions {
        skip_data: !cli.no_skip_data,
        ..EngineOptions::default()
    };
    let config = DisasmConfig::new(cli.arch, cli.bits, pass_size)
        .with_offset(cli.base)
        .with_options(options);

    let mut disasm = Disasm::new(CapstoneEngine::default());
    disasm
        .init(code, config)
        .with_context(|| format!("cannot disassemble {} {}", cli.arch, cli.bits))?;

    let stdout = io::stdout();
    let mut out = stdout.lock();
    while disasm.is_init() {
        match disasm.fill_table() {
            Ok(_) => {}
            Err(DisasmError::EmptyTable) => break,
            Err(e) => return Err(e.into()),
        }
        let view = disasm.view();
        let rows = view.rows();
        let page_addr = view.virtual_address(0).unwrap_or(cli.base);
        cli.format.write(&rows, page_addr, &mut out)?;
    }
    out.flush()?;
    Ok(())
}
