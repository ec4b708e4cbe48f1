//! Output format module implementation

mod csv;
mod json;

use std::fmt;
use std::io::Write;
use std::str::FromStr;

use clap::ValueEnum;

use crate::analysis::InsnRow;
use crate::{Address, DisasmError};

/// Supported output formats for the analysed instruction table
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Plain text output (default)
    Text,
    /// JSON format (one document)
    Json,
    /// JSON Lines format (one JSON object per line)
    JsonLines,
    /// CSV format (comma-separated values)
    Csv,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
            OutputFormat::JsonLines => write!(f, "jsonl"),
            OutputFormat::Csv => write!(f, "csv"),
        }
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            "jsonl" | "jsonlines" => Ok(OutputFormat::JsonLines),
            "csv" => Ok(OutputFormat::Csv),
            _ => Err(format!("Unknown output format: {}", s)),
        }
    }
}

impl Default for OutputFormat {
    fn default() -> Self {
        OutputFormat::Text
    }
}

impl OutputFormat {
    /// Get all available output formats
    pub fn available_formats() -> &'static [Self] {
        &[
            OutputFormat::Text,
            OutputFormat::Json,
            OutputFormat::JsonLines,
            OutputFormat::Csv,
        ]
    }

    /// Get a formatter for this output format
    pub fn get_formatter(&self) -> Box<dyn TableFormatter> {
        match self {
            OutputFormat::Text => Box::new(TextFormatter),
            OutputFormat::Json => Box::new(JsonFormatter),
            OutputFormat::JsonLines => Box::new(JsonLinesFormatter),
            OutputFormat::Csv => Box::new(CsvFormatter),
        }
    }

    /// Render `rows` and write them to `out`.
    pub fn write<W: Write>(&self, rows: &[InsnRow], base_addr: Address, mut out: W) -> Result<(), DisasmError> {
        let rendered = self.get_formatter().format(rows, base_addr)?;
        out.write_all(rendered.as_bytes())?;
        out.flush()?;
        Ok(())
    }
}

/// Formatter trait for the analysed table
pub trait TableFormatter {
    /// Format the rows of one table decoded at `base_addr`
    fn format(&self, rows: &[InsnRow], base_addr: Address) -> Result<String, DisasmError>;
}

/// Format the table in plain text
pub struct TextFormatter;

/// Format the table in JSON
pub struct JsonFormatter;

/// Format the table in JSON Lines
pub struct JsonLinesFormatter;

/// Format the table in CSV
pub struct CsvFormatter;

/// Hex rendering of an optional address
pub(crate) fn hex_opt(addr: Option<Address>) -> String {
    addr.map(|a| format!("0x{:x}", a)).unwrap_or_default()
}

/// Short flag column for text output: `F` followable, `P` push-ret, `A` address operand.
fn flags(row: &InsnRow) -> String {
    let mut out = String::new();
    out.push(if row.followable { 'F' } else { '-' });
    out.push(if row.push_ret.is_some() { 'P' } else { '-' });
    out.push(if row.addr_operand { 'A' } else { '-' });
    out
}

impl TableFormatter for TextFormatter {
    fn format(&self, rows: &[InsnRow], base_addr: Address) -> Result<String, DisasmError> {
        let mut output = String::new();
        output.push_str(&format!("Disassembly at 0x{:x}:\n\n", base_addr));

        for row in rows {
            output.push_str(&format!(
                "0x{:08x} +{:<6x} {:<24} {:<8} {:<30} {:<10} {}",
                row.address,
                row.raw_offset,
                row.bytes,
                row.mnemonic,
                row.operands,
                row.mnem_type,
                flags(row)
            ));
            if let Some(target) = row.target {
                output.push_str(&format!(" -> 0x{:x}", target));
            }
            output.push('\n');
        }

        Ok(output)
    }
}
