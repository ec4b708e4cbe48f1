//! Instruction semantics over a decoded instruction stream.
//!
//! This library sits on top of a decode engine (Capstone by default) and
//! answers the questions a reverse-engineering front end asks about each
//! decoded instruction: what kind of operation it is, which virtual address
//! an operand resolves to, and whether it is a statically followable
//! control-flow edge.
//!
//! # Basic Usage
//!
//! ```rust,no_run
//! use disasm_semantics::{
//!     decoder::CapstoneEngine,
//!     session::{Disasm, DisasmConfig},
//!     Architecture, BitWidth, MnemType,
//! };
//!
//! // push 0x401000; ret
//! let code = vec![0x68, 0x00, 0x10, 0x40, 0x00, 0xc3];
//!
//! let mut disasm = Disasm::new(CapstoneEngine::default());
//! let config = DisasmConfig::new(Architecture::Intel, BitWidth::Bits32, code.len())
//!     .with_offset(0x401000);
//! disasm.init(code, config).unwrap();
//! disasm.fill_table().unwrap();
//!
//! let view = disasm.view();
//! assert_eq!(view.mnem_type(0), Some(MnemType::Push));
//! assert_eq!(view.is_push_ret(0), Some(1));
//! assert!(view.is_followable(0));
//! ```

pub mod analysis;
pub mod classify;
pub mod decoder;
pub mod format;
pub mod scripted;
pub mod session;

/// Represents an address in memory
pub type Address = u64;

/// Engine-specific register identifier.
pub type RegId = u16;

use std::fmt;

use clap::ValueEnum;
use serde::Serialize;

/// Maximum instruction size in bytes
pub const MAX_INSTRUCTION_SIZE: usize = 16;

/// Supported architecture families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Architecture {
    /// x86 / x86-64
    Intel,
    /// ARM (32-bit) and AArch64
    Arm,
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Architecture::Intel => write!(f, "Intel"),
            Architecture::Arm => write!(f, "ARM"),
        }
    }
}

/// Addressing width of the analysed code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum, Serialize)]
pub enum BitWidth {
    #[value(name = "16")]
    Bits16,
    #[value(name = "32")]
    Bits32,
    #[value(name = "64")]
    Bits64,
}

impl BitWidth {
    /// Map a plain bit count onto a width.
    pub fn from_bits(bits: u32) -> Option<Self> {
        match bits {
            16 => Some(BitWidth::Bits16),
            32 => Some(BitWidth::Bits32),
            64 => Some(BitWidth::Bits64),
            _ => None,
        }
    }

    /// Number of bits.
    pub fn bits(self) -> u32 {
        match self {
            BitWidth::Bits16 => 16,
            BitWidth::Bits32 => 32,
            BitWidth::Bits64 => 64,
        }
    }

    /// Mask selecting the addressable bits.
    pub fn mask(self) -> Address {
        match self {
            BitWidth::Bits16 => 0xFFFF,
            BitWidth::Bits32 => 0xFFFF_FFFF,
            BitWidth::Bits64 => Address::MAX,
        }
    }

    /// Wrap `addr` to this width (two's-complement truncation).
    pub fn truncate(self, addr: Address) -> Address {
        addr & self.mask()
    }
}

impl fmt::Display for BitWidth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-bit", self.bits())
    }
}

/// Target of a relative jump: the address following the instruction plus `disp`.
pub fn relative_target(insn_va: Address, insn_size: u8, disp: i64) -> Address {
    insn_va
        .wrapping_add(insn_size as Address)
        .wrapping_add(disp as Address)
}

/// One decoded instruction, as reported by the decode engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsnRecord {
    /// Engine opcode identifier (0 is the engine's "invalid" id)
    pub id: u32,
    /// Virtual address of the instruction
    pub address: Address,
    /// Size of the instruction in bytes
    pub size: u8,
    /// Instruction mnemonic (e.g., "mov", "add")
    pub mnemonic: String,
    /// Instruction operands as string representation
    pub operands: String,
    /// Raw bytes of the instruction (up to MAX_INSTRUCTION_SIZE)
    pub bytes: [u8; MAX_INSTRUCTION_SIZE],
}

impl InsnRecord {
    /// Build a record with no text and zeroed bytes.
    pub fn new(id: u32, address: Address, size: u8) -> Self {
        Self {
            id,
            address,
            size,
            mnemonic: String::new(),
            operands: String::new(),
            bytes: [0; MAX_INSTRUCTION_SIZE],
        }
    }

    /// Set the textual form.
    pub fn with_text(mut self, mnemonic: &str, operands: &str) -> Self {
        self.mnemonic = mnemonic.to_string();
        self.operands = operands.to_string();
        self
    }

    /// Copy the encoding, truncated to MAX_INSTRUCTION_SIZE.
    pub fn with_bytes(mut self, raw: &[u8]) -> Self {
        for (j, b) in raw.iter().enumerate().take(MAX_INSTRUCTION_SIZE) {
            self.bytes[j] = *b;
        }
        self
    }

    /// Returns the instruction bytes, up to the actual instruction size.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes[..(self.size as usize).min(MAX_INSTRUCTION_SIZE)]
    }

    /// Address of the following instruction.
    pub fn end_address(&self) -> Address {
        self.address.wrapping_add(self.size as Address)
    }
}

impl fmt::Display for InsnRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\t{}", self.mnemonic, self.operands)
    }
}

/// Memory operand: `[base + index*scale + disp]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemOperand {
    /// Base register, `None` when no base is encoded
    pub base: Option<RegId>,
    /// Index register, `None` when no index is encoded
    pub index: Option<RegId>,
    /// Signed displacement
    pub disp: i64,
}

/// Shape of an operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandKind {
    Register(RegId),
    Immediate(i64),
    Memory(MemOperand),
    /// Anything the engine reports that is none of the above.
    Other,
}

/// One operand of an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Operand {
    pub kind: OperandKind,
    /// Operand size in bytes (0 when the engine does not report it)
    pub size: u8,
}

impl Operand {
    pub fn reg(reg: RegId, size: u8) -> Self {
        Self { kind: OperandKind::Register(reg), size }
    }

    pub fn imm(value: i64, size: u8) -> Self {
        Self { kind: OperandKind::Immediate(value), size }
    }

    pub fn mem(base: Option<RegId>, disp: i64, size: u8) -> Self {
        Self {
            kind: OperandKind::Memory(MemOperand { base, index: None, disp }),
            size,
        }
    }

    /// Returns the memory operand, if this is one.
    pub fn as_mem(&self) -> Option<&MemOperand> {
        match &self.kind {
            OperandKind::Memory(m) => Some(m),
            _ => None,
        }
    }
}

/// Engine-assigned semantic groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InsnGroup {
    Jump,
    Call,
    Return,
    Interrupt,
    InterruptReturn,
    Privilege,
    BranchRelative,
    /// Architecture-specific group id
    Other(u8),
}

impl InsnGroup {
    /// Map Capstone's generic group ids.
    pub fn from_raw(id: u8) -> Self {
        match id {
            1 => InsnGroup::Jump,
            2 => InsnGroup::Call,
            3 => InsnGroup::Return,
            4 => InsnGroup::Interrupt,
            5 => InsnGroup::InterruptReturn,
            6 => InsnGroup::Privilege,
            7 => InsnGroup::BranchRelative,
            other => InsnGroup::Other(other),
        }
    }
}

/// Operand detail for one instruction; one-to-one with its `InsnRecord`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InsnDetail {
    pub operands: Vec<Operand>,
    pub groups: Vec<InsnGroup>,
}

impl InsnDetail {
    pub fn with_operands(operands: Vec<Operand>) -> Self {
        Self { operands, groups: Vec::new() }
    }

    pub fn with_groups(mut self, groups: Vec<InsnGroup>) -> Self {
        self.groups = groups;
        self
    }

    pub fn has_group(&self, group: InsnGroup) -> bool {
        self.groups.contains(&group)
    }
}

/// Semantic category of an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MnemType {
    Invalid,
    Jump,
    CondJump,
    Call,
    Return,
    Move,
    Loop,
    Push,
    Pop,
    Nop,
    /// Breakpoint trap
    Int3,
    /// Software interrupt
    #[serde(rename = "intx")]
    IntX,
    Other,
}

impl MnemType {
    /// Jumps, conditional jumps, calls and loops.
    pub fn is_branching(self) -> bool {
        matches!(
            self,
            MnemType::Jump | MnemType::CondJump | MnemType::Call | MnemType::Loop
        )
    }
}

impl fmt::Display for MnemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MnemType::Invalid => "invalid",
            MnemType::Jump => "jump",
            MnemType::CondJump => "cond_jump",
            MnemType::Call => "call",
            MnemType::Return => "return",
            MnemType::Move => "move",
            MnemType::Loop => "loop",
            MnemType::Push => "push",
            MnemType::Pop => "pop",
            MnemType::Nop => "nop",
            MnemType::Int3 => "int3",
            MnemType::IntX => "intx",
            MnemType::Other => "other",
        };
        f.pad(name)
    }
}

/// Options applied to a freshly opened engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineOptions {
    /// Report operand detail for each instruction
    pub detail: bool,
    /// Treat undecodable bytes as opaque data and keep going
    pub skip_data: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self { detail: true, skip_data: true }
    }
}

/// Decode engine capability: open for one target, then decode one
/// instruction at a time.
pub trait DecodeEngine {
    /// Open (or reopen) the engine for `arch`/`bits`.
    fn open(
        &mut self,
        arch: Architecture,
        bits: BitWidth,
        options: EngineOptions,
    ) -> Result<(), DisasmError>;

    /// Release the handle. Decoding after `close` yields nothing.
    fn close(&mut self);

    /// Decode exactly one instruction from the start of `code`, which is
    /// mapped at `address`.
    ///
    /// # Returns
    /// The instruction and its operand detail, or `None` at end of input or
    /// when nothing could be decoded.
    fn decode_one(&mut self, code: &[u8], address: Address) -> Option<(InsnRecord, InsnDetail)>;
}

/// Offset/address translation for the binary being analysed.
pub trait AddressSpace: Send + Sync {
    /// Convert a raw (file) offset to a virtual address.
    fn offset_to_va(&self, offset: Address) -> Option<Address>;

    /// Whether `va` is a known address in this space.
    fn contains_va(&self, _va: Address) -> bool {
        true
    }
}

/// Identity mapping: raw offsets are virtual addresses.
#[derive(Debug, Default, Clone, Copy)]
pub struct FlatSpace;

impl AddressSpace for FlatSpace {
    fn offset_to_va(&self, offset: Address) -> Option<Address> {
        Some(offset)
    }
}

/// One mapped region, e.g. a section: `size` bytes at `raw_start` in the
/// file are loaded at `va_start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub raw_start: Address,
    pub va_start: Address,
    pub size: Address,
}

impl AddressSpace for Region {
    fn offset_to_va(&self, offset: Address) -> Option<Address> {
        let delta = offset.checked_sub(self.raw_start)?;
        if delta >= self.size {
            return None;
        }
        Some(self.va_start + delta)
    }

    fn contains_va(&self, va: Address) -> bool {
        va >= self.va_start && va - self.va_start < self.size
    }
}

/// Error type for disassembly operations
#[derive(Debug, thiserror::Error)]
pub enum DisasmError {
    /// Session never opened, or a previous decode ended the stream
    #[error("Disassembler not initialized")]
    NotInitialized,

    /// Architecture/width pair has no engine mapping
    #[error("Unsupported architecture: {arch} {bits}")]
    UnsupportedArchitecture { arch: Architecture, bits: BitWidth },

    /// The engine rejected the configuration
    #[error("Engine open failed: {0}")]
    EngineOpen(String),

    /// The engine could not allocate its decode buffer
    #[error("Engine allocation failed")]
    Allocation,

    /// A decode pass produced no instructions
    #[error("No instructions decoded")]
    EmptyTable,

    /// Empty input buffer
    #[error("Empty input buffer")]
    EmptyBuffer,

    /// Instruction index past the end of the table
    #[error("Instruction index {0} out of range")]
    IndexOutOfRange(usize),

    /// Operand index past the instruction's operand count
    #[error("Operand {operand} out of range for instruction {index}")]
    OperandOutOfRange { index: usize, operand: usize },

    /// Operand exists but its address is not statically known
    #[error("Operand {operand} of instruction {index} has no static address")]
    UnsupportedOperandShape { index: usize, operand: usize },

    /// Report rendering failed
    #[error("Format error: {0}")]
    Format(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
