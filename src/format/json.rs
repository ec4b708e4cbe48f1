//! JSON and JSON Lines output formatters

use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{hex_opt, TableFormatter};
use crate::analysis::InsnRow;
use crate::{Address, DisasmError};

/// Serializable instruction for JSON output
#[derive(Serialize, Deserialize)]
struct InstructionJson {
    /// Index in the table
    index: usize,
    /// Address of the instruction
    address: String,
    /// Offset from the start of the decoded buffer
    raw_offset: String,
    /// Size of the instruction in bytes
    size: u8,
    /// Bytes of the instruction as hex string
    bytes: String,
    /// Mnemonic (e.g., "mov", "add")
    mnemonic: String,
    /// Operands
    operands: String,
    /// Semantic category
    category: String,
    branching: bool,
    followable: bool,
    /// Index of the paired return for a push/ret
    #[serde(skip_serializing_if = "Option::is_none")]
    push_ret: Option<usize>,
    /// Static target of a followable instruction
    #[serde(skip_serializing_if = "Option::is_none")]
    target: Option<String>,
    addr_operand: bool,
}

/// Serializable table for JSON output
#[derive(Serialize, Deserialize)]
struct TableJson {
    /// Address the table was decoded from
    base_address: String,
    /// Number of instructions
    count: usize,
    instructions: Vec<InstructionJson>,
}

fn json_error(e: serde_json::Error) -> DisasmError {
    DisasmError::Format(format!("JSON serialization error: {}", e))
}

impl TableFormatter for super::JsonFormatter {
    fn format(&self, rows: &[InsnRow], base_addr: Address) -> Result<String, DisasmError> {
        let result = TableJson {
            base_address: format!("0x{:x}", base_addr),
            count: rows.len(),
            instructions: rows.iter().map(instruction_to_json).collect(),
        };

        serde_json::to_string_pretty(&result).map_err(json_error)
    }
}

impl TableFormatter for super::JsonLinesFormatter {
    fn format(&self, rows: &[InsnRow], base_addr: Address) -> Result<String, DisasmError> {
        let mut output = String::new();
        let base_addr_str = format!("0x{:x}", base_addr);

        for row in rows {
            let instruction = json!({
                "type": "instruction",
                "base_address": base_addr_str,
                "index": row.index,
                "address": format!("0x{:x}", row.address),
                "size": row.size,
                "mnemonic": row.mnemonic,
                "operands": row.operands,
                "category": row.mnem_type,
                "followable": row.followable,
                "target": hex_opt(row.target),
            });

            output.push_str(&serde_json::to_string(&instruction).map_err(json_error)?);
            output.push('\n');
        }

        Ok(output)
    }
}

/// Convert a row to JSON format
fn instruction_to_json(row: &InsnRow) -> InstructionJson {
    InstructionJson {
        index: row.index,
        address: format!("0x{:x}", row.address),
        raw_offset: format!("0x{:x}", row.raw_offset),
        size: row.size,
        bytes: row.bytes.clone(),
        mnemonic: row.mnemonic.clone(),
        operands: row.operands.clone(),
        category: row.mnem_type.to_string(),
        branching: row.branching,
        followable: row.followable,
        push_ret: row.push_ret,
        target: row.target.map(|t| format!("0x{:x}", t)),
        addr_operand: row.addr_operand,
    }
}
