//! ARM and AArch64 semantics: explicit opcode checks, then the engine's
//! instruction groups.

use capstone::arch::arm::ArmInsn;
use capstone::arch::arm64::Arm64Insn;

use super::{ArchSemantics, TargetShape};
use crate::{InsnDetail, InsnGroup, InsnRecord, MnemType, Operand, OperandKind, RegId};

/// Opcode ids a group-based classifier needs to know about.
#[derive(Debug)]
struct OpcodeSet {
    /// Trap opcode reported as a breakpoint
    trap: u32,
    invalid: u32,
    nop: u32,
    /// compare-and-branch / test-bit-and-branch
    cond_branches: &'static [u32],
}

const ARM64_OPCODES: OpcodeSet = OpcodeSet {
    trap: Arm64Insn::ARM64_INS_BRK as u32,
    invalid: Arm64Insn::ARM64_INS_INVALID as u32,
    nop: Arm64Insn::ARM64_INS_NOP as u32,
    cond_branches: &[
        Arm64Insn::ARM64_INS_CBZ as u32,
        Arm64Insn::ARM64_INS_CBNZ as u32,
        Arm64Insn::ARM64_INS_TBZ as u32,
        Arm64Insn::ARM64_INS_TBNZ as u32,
    ],
};

const ARM32_OPCODES: OpcodeSet = OpcodeSet {
    trap: ArmInsn::ARM_INS_UDF as u32,
    invalid: ArmInsn::ARM_INS_INVALID as u32,
    nop: ArmInsn::ARM_INS_NOP as u32,
    cond_branches: &[ArmInsn::ARM_INS_CBZ as u32, ArmInsn::ARM_INS_CBNZ as u32],
};

fn classify_grouped(set: &OpcodeSet, insn: &InsnRecord, detail: &InsnDetail) -> MnemType {
    let id = insn.id;
    if id == set.trap {
        return MnemType::Int3;
    }
    if id == set.invalid {
        return MnemType::Invalid;
    }
    if id == set.nop {
        return MnemType::Nop;
    }
    for group in &detail.groups {
        match group {
            InsnGroup::Call => return MnemType::Call,
            InsnGroup::Return => return MnemType::Return,
            InsnGroup::Interrupt => return MnemType::IntX,
            InsnGroup::Jump | InsnGroup::BranchRelative => {
                if set.cond_branches.contains(&id) {
                    return MnemType::CondJump;
                }
                return MnemType::Jump;
            }
            _ => {}
        }
    }
    MnemType::Other
}

/// Only immediates resolve on ARM; memory operands are register based.
fn immediate_only(op: &Operand) -> TargetShape {
    match op.kind {
        OperandKind::Immediate(v) => TargetShape::Immediate(v),
        _ => TargetShape::Dynamic,
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct Arm64Semantics;

impl ArchSemantics for Arm64Semantics {
    fn classify(&self, insn: &InsnRecord, detail: &InsnDetail) -> MnemType {
        classify_grouped(&ARM64_OPCODES, insn, detail)
    }

    fn is_instruction_pointer(&self, _reg: RegId) -> bool {
        false
    }

    fn target_shape(&self, op: &Operand) -> TargetShape {
        immediate_only(op)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct Arm32Semantics;

impl ArchSemantics for Arm32Semantics {
    fn classify(&self, insn: &InsnRecord, detail: &InsnDetail) -> MnemType {
        classify_grouped(&ARM32_OPCODES, insn, detail)
    }

    // PC reads as the instruction address plus 8, so PC-based operands are
    // not the x86-style "next instruction" relative form.
    fn is_instruction_pointer(&self, _reg: RegId) -> bool {
        false
    }

    fn target_shape(&self, op: &Operand) -> TargetShape {
        immediate_only(op)
    }
}
