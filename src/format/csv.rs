//! CSV output formatter

use super::{hex_opt, TableFormatter};
use crate::analysis::InsnRow;
use crate::{Address, DisasmError};

const HEADER: [&str; 13] = [
    "base_address",
    "index",
    "address",
    "raw_offset",
    "size",
    "bytes",
    "mnemonic",
    "operands",
    "category",
    "followable",
    "push_ret",
    "target",
    "addr_operand",
];

fn csv_error(e: impl std::fmt::Display) -> DisasmError {
    DisasmError::Format(format!("CSV error: {}", e))
}

impl TableFormatter for super::CsvFormatter {
    fn format(&self, rows: &[InsnRow], base_addr: Address) -> Result<String, DisasmError> {
        let mut writer = ::csv::Writer::from_writer(Vec::new());
        let base_addr_str = format!("0x{:x}", base_addr);

        writer.write_record(HEADER).map_err(csv_error)?;
        for row in rows {
            writer
                .write_record([
                    base_addr_str.clone(),
                    row.index.to_string(),
                    format!("0x{:x}", row.address),
                    format!("0x{:x}", row.raw_offset),
                    row.size.to_string(),
                    row.bytes.clone(),
                    row.mnemonic.clone(),
                    row.operands.clone(),
                    row.mnem_type.to_string(),
                    row.followable.to_string(),
                    row.push_ret.map(|i| i.to_string()).unwrap_or_default(),
                    hex_opt(row.target),
                    row.addr_operand.to_string(),
                ])
                .map_err(csv_error)?;
        }

        let bytes = writer.into_inner().map_err(csv_error)?;
        String::from_utf8(bytes).map_err(csv_error)
    }
}
