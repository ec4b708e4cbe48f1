//! Decoder session, instruction cursor and instruction table.
//!
//! A [`Disasm`] owns one decode engine, the buffer being decoded and the
//! table built from it. `init` binds the buffer and target and opens the
//! engine; `fill_table` runs one decode pass and is the only mutator of the
//! table. Both take `&mut self`, so a rebuild is exclusive for its whole
//! duration and readers (which borrow the table through [`Disasm::view`])
//! can never observe a half-built table.

use std::sync::Arc;

use crate::analysis::TableView;
use crate::classify::Target;
use crate::{
    Address, AddressSpace, Architecture, BitWidth, DecodeEngine, DisasmError, EngineOptions,
    FlatSpace, InsnDetail, InsnRecord,
};

/// What to decode and how.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisasmConfig {
    pub arch: Architecture,
    pub bits: BitWidth,
    /// Stop a decode pass once this many bytes were consumed
    pub disasm_size: usize,
    /// Raw offset of the buffer's first byte
    pub offset: Address,
    pub options: EngineOptions,
}

impl DisasmConfig {
    pub fn new(arch: Architecture, bits: BitWidth, disasm_size: usize) -> Self {
        Self {
            arch,
            bits,
            disasm_size,
            offset: 0,
            options: EngineOptions::default(),
        }
    }

    pub fn with_offset(mut self, offset: Address) -> Self {
        self.offset = offset;
        self
    }

    pub fn with_options(mut self, options: EngineOptions) -> Self {
        self.options = options;
        self
    }
}

/// Read position in the input buffer.
#[derive(Debug, Default, Clone)]
pub struct Cursor {
    buf: Vec<u8>,
    pos: usize,
    /// Virtual address of the next instruction
    va: Address,
    /// Bytes decoded since `init`
    decoded: usize,
}

impl Cursor {
    fn new(buf: Vec<u8>, va: Address) -> Self {
        Self { buf, pos: 0, va, decoded: 0 }
    }

    pub fn remaining(&self) -> &[u8] {
        &self.buf[self.pos..]
    }

    pub fn va(&self) -> Address {
        self.va
    }

    pub fn decoded(&self) -> usize {
        self.decoded
    }

    fn advance(&mut self, step: usize) {
        let step = step.min(self.buf.len() - self.pos);
        self.pos += step;
        self.va = self.va.wrapping_add(step as Address);
        self.decoded += step;
    }
}

/// Decoded instructions with their operand detail, index-aligned.
#[derive(Debug, Default, Clone)]
pub struct InsnTable {
    insns: Vec<InsnRecord>,
    details: Vec<InsnDetail>,
}

impl InsnTable {
    pub fn len(&self) -> usize {
        self.insns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.insns.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<(&InsnRecord, &InsnDetail)> {
        Some((self.insns.get(index)?, self.details.get(index)?))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&InsnRecord, &InsnDetail)> {
        self.insns.iter().zip(self.details.iter())
    }

    fn push(&mut self, insn: InsnRecord, detail: InsnDetail) {
        self.insns.push(insn);
        self.details.push(detail);
    }

    fn clear(&mut self) {
        self.insns.clear();
        self.details.clear();
    }
}

/// One disassembly session over a buffer.
pub struct Disasm<E: DecodeEngine> {
    engine: E,
    space: Arc<dyn AddressSpace>,
    config: Option<DisasmConfig>,
    target: Option<Target>,
    cursor: Cursor,
    /// VA of the buffer's first byte, if the offset is mapped
    start_va: Option<Address>,
    /// Result slot reused by every decode step
    current: Option<(InsnRecord, InsnDetail)>,
    is_init: bool,
    table: InsnTable,
}

impl<E: DecodeEngine> Disasm<E> {
    /// Create an uninitialized session around `engine`.
    pub fn new(engine: E) -> Self {
        Self {
            engine,
            space: Arc::new(FlatSpace),
            config: None,
            target: None,
            cursor: Cursor::default(),
            start_va: None,
            current: None,
            is_init: false,
            table: InsnTable::default(),
        }
    }

    /// Use `space` to translate offsets and validate addresses.
    pub fn with_address_space(mut self, space: Arc<dyn AddressSpace>) -> Self {
        self.space = space;
        self
    }

    /// Bind `buf` and `config`, then open the engine.
    ///
    /// Any previous table is discarded. On failure the session stays
    /// uninitialized.
    pub fn init(&mut self, buf: impl Into<Vec<u8>>, config: DisasmConfig) -> Result<(), DisasmError> {
        self.is_init = false;
        self.engine.close();
        self.table.clear();
        self.current = None;
        self.target = None;

        let buf = buf.into();
        if buf.is_empty() {
            return Err(DisasmError::EmptyBuffer);
        }

        self.start_va = self.space.offset_to_va(config.offset);
        self.cursor = Cursor::new(buf, self.start_va.unwrap_or(0));
        self.config = Some(config);

        let target = Target::select(config.arch, config.bits).map_err(|e| {
            log::warn!("Unknown target: {} {}", config.arch, config.bits);
            e
        })?;
        self.engine
            .open(config.arch, config.bits, config.options)
            .map_err(|e| {
                log::error!("Failed to open decode engine for {}: {}", target, e);
                e
            })?;

        log::debug!(
            "Initialized {} session: {} bytes, pass size {}, start VA {:?}",
            target,
            self.cursor.buf.len(),
            config.disasm_size,
            self.start_va
        );
        self.target = Some(target);
        self.is_init = true;
        Ok(())
    }

    pub fn is_init(&self) -> bool {
        self.is_init
    }

    pub fn config(&self) -> Option<&DisasmConfig> {
        self.config.as_ref()
    }

    pub fn cursor(&self) -> &Cursor {
        &self.cursor
    }

    /// The most recently decoded instruction.
    pub fn current(&self) -> Option<&(InsnRecord, InsnDetail)> {
        self.current.as_ref()
    }

    /// Decode one instruction at the cursor.
    ///
    /// # Returns
    /// The number of bytes consumed; 0 at end of input or on decode failure,
    /// after which the session stays uninitialized until the next `init`.
    pub fn decode_next(&mut self) -> usize {
        if !self.is_init {
            log::error!("Cannot decode next: not initialized");
            return 0;
        }
        let va = self.cursor.va;
        match self.engine.decode_one(self.cursor.remaining(), va) {
            Some(pair) if pair.0.size > 0 => {
                let step = pair.0.size as usize;
                self.cursor.advance(step);
                self.current = Some(pair);
                step
            }
            _ => {
                log::debug!("Decode stream ended at VA 0x{:x}", va);
                self.is_init = false;
                0
            }
        }
    }

    /// Rebuild the table with one decode pass of up to `disasm_size` bytes.
    ///
    /// The pass continues from where the cursor stopped, so consecutive calls
    /// walk the buffer window by window. Stops early on the first decode
    /// failure; a partial table is still a success.
    ///
    /// # Returns
    /// The number of instructions in the new table.
    pub fn fill_table(&mut self) -> Result<usize, DisasmError> {
        if !self.is_init {
            return Err(DisasmError::NotInitialized);
        }
        let limit = self.config.map(|c| c.disasm_size).unwrap_or(0);

        self.table.clear();
        let mut processed = 0usize;
        while processed < limit {
            let step = self.decode_next();
            if step == 0 {
                break;
            }
            processed += step;
            if let Some((insn, detail)) = self.current.clone() {
                self.table.push(insn, detail);
            }
        }

        log::debug!("Filled table: {} instructions, {} bytes", self.table.len(), processed);
        if self.table.is_empty() {
            return Err(DisasmError::EmptyTable);
        }
        Ok(self.table.len())
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn table(&self) -> &InsnTable {
        &self.table
    }

    /// Read-only query view over the current table.
    pub fn view(&self) -> TableView<'_> {
        TableView::new(
            &self.table,
            self.target.as_ref(),
            self.start_va,
            self.space.as_ref(),
        )
    }
}
