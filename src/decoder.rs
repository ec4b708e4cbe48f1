//! Capstone-based decode engine.

use std::fmt;

use capstone::arch::arm::ArmOperandType;
use capstone::arch::arm64::Arm64OperandType;
use capstone::arch::x86::X86OperandType;
use capstone::arch::{self, ArchOperand};
use capstone::prelude::*;
use capstone::{Capstone, RegId as CsRegId};

use crate::{
    Address, Architecture, BitWidth, DecodeEngine, DisasmError, EngineOptions, InsnDetail,
    InsnGroup, InsnRecord, MemOperand, Operand, OperandKind, RegId,
};

/// Capstone handle bound to one (architecture, bit-width) target.
#[derive(Default)]
pub struct CapstoneEngine {
    cs: Option<Capstone>,
    target: Option<(Architecture, BitWidth)>,
    options: EngineOptions,
}

impl CapstoneEngine {
    /// Build a Capstone handle for a target.
    fn build(arch: Architecture, bits: BitWidth, detail: bool) -> Result<Capstone, DisasmError> {
        let built = match (arch, bits) {
            (Architecture::Intel, BitWidth::Bits16) => Capstone::new()
                .x86()
                .mode(arch::x86::ArchMode::Mode16)
                .detail(detail)
                .build(),
            (Architecture::Intel, BitWidth::Bits32) => Capstone::new()
                .x86()
                .mode(arch::x86::ArchMode::Mode32)
                .detail(detail)
                .build(),
            (Architecture::Intel, BitWidth::Bits64) => Capstone::new()
                .x86()
                .mode(arch::x86::ArchMode::Mode64)
                .detail(detail)
                .build(),
            (Architecture::Arm, BitWidth::Bits32) => Capstone::new()
                .arm()
                .mode(arch::arm::ArchMode::Arm)
                .detail(detail)
                .build(),
            (Architecture::Arm, BitWidth::Bits64) => Capstone::new()
                .arm64()
                .mode(arch::arm64::ArchMode::Arm)
                .detail(detail)
                .build(),
            (Architecture::Arm, BitWidth::Bits16) => {
                return Err(DisasmError::UnsupportedArchitecture { arch, bits });
            }
        };

        built.map_err(|e| match e {
            capstone::Error::UnsupportedArch => DisasmError::UnsupportedArchitecture { arch, bits },
            capstone::Error::OutOfMemory => DisasmError::Allocation,
            other => DisasmError::EngineOpen(other.to_string()),
        })
    }

    /// Get the architecture this engine was opened for
    pub fn target(&self) -> Option<(Architecture, BitWidth)> {
        self.target
    }
}

impl fmt::Debug for CapstoneEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapstoneEngine")
            .field("open", &self.cs.is_some())
            .field("target", &self.target)
            .field("options", &self.options)
            .finish()
    }
}

impl fmt::Display for CapstoneEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.target {
            Some((arch, bits)) => write!(f, "CapstoneEngine::{} {}", arch, bits),
            None => write!(f, "CapstoneEngine::closed"),
        }
    }
}

impl DecodeEngine for CapstoneEngine {
    fn open(
        &mut self,
        arch: Architecture,
        bits: BitWidth,
        options: EngineOptions,
    ) -> Result<(), DisasmError> {
        self.close();
        let mut cs = Self::build(arch, bits, options.detail)?;
        // undecodable bytes come back as id-0 ".byte" records
        cs.set_skipdata(options.skip_data)
            .map_err(|e| DisasmError::EngineOpen(e.to_string()))?;
        self.cs = Some(cs);
        self.target = Some((arch, bits));
        self.options = options;
        Ok(())
    }

    fn close(&mut self) {
        self.cs = None;
        self.target = None;
    }

    fn decode_one(&mut self, code: &[u8], address: Address) -> Option<(InsnRecord, InsnDetail)> {
        if code.is_empty() {
            return None;
        }
        let cs = self.cs.as_ref()?;

        cs.disasm_count(code, address, 1).ok().and_then(|insns| {
            let i = insns.iter().next()?;

            let record = InsnRecord::new(i.id().0, i.address(), i.len() as u8)
                .with_text(i.mnemonic().unwrap_or(""), i.op_str().unwrap_or(""))
                .with_bytes(i.bytes());

            let detail = if self.options.detail {
                cs.insn_detail(i).map(|d| convert_detail(&d)).unwrap_or_default()
            } else {
                InsnDetail::default()
            };
            Some((record, detail))
        })
    }
}

fn reg(id: CsRegId) -> Option<RegId> {
    // register id 0 is Capstone's "no register"
    if id.0 == 0 {
        None
    } else {
        Some(id.0)
    }
}

/// Copy Capstone's detail into the engine-neutral form.
fn convert_detail(detail: &capstone::InsnDetail) -> InsnDetail {
    let groups = detail.groups().iter().map(|g| InsnGroup::from_raw(g.0)).collect();
    let operands = detail
        .arch_detail()
        .operands()
        .into_iter()
        .map(convert_operand)
        .collect();
    InsnDetail { operands, groups }
}

fn convert_operand(op: ArchOperand) -> Operand {
    match op {
        ArchOperand::X86Operand(op) => {
            let kind = match op.op_type {
                X86OperandType::Reg(r) => OperandKind::Register(r.0),
                X86OperandType::Imm(v) => OperandKind::Immediate(v),
                X86OperandType::Mem(m) => OperandKind::Memory(MemOperand {
                    base: reg(m.base()),
                    index: reg(m.index()),
                    disp: m.disp(),
                }),
                _ => OperandKind::Other,
            };
            Operand { kind, size: op.size }
        }
        ArchOperand::Arm64Operand(op) => {
            let kind = match op.op_type {
                Arm64OperandType::Reg(r) => OperandKind::Register(r.0),
                Arm64OperandType::Imm(v) => OperandKind::Immediate(v),
                Arm64OperandType::Mem(m) => OperandKind::Memory(MemOperand {
                    base: reg(m.base()),
                    index: reg(m.index()),
                    disp: m.disp() as i64,
                }),
                _ => OperandKind::Other,
            };
            Operand { kind, size: 0 }
        }
        ArchOperand::ArmOperand(op) => {
            let kind = match op.op_type {
                ArmOperandType::Reg(r) => OperandKind::Register(r.0),
                ArmOperandType::Imm(v) => OperandKind::Immediate(v as i64),
                ArmOperandType::Mem(m) => OperandKind::Memory(MemOperand {
                    base: reg(m.base()),
                    index: reg(m.index()),
                    disp: m.disp() as i64,
                }),
                _ => OperandKind::Other,
            };
            Operand { kind, size: 0 }
        }
        _ => Operand { kind: OperandKind::Other, size: 0 },
    }
}
