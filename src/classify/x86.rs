//! x86 / x86-64 semantics.

use capstone::arch::x86::{X86Insn, X86Reg};

use super::{ArchSemantics, TargetShape};
use crate::{InsnDetail, InsnRecord, MnemType, Operand, OperandKind, RegId};

pub const INS_INVALID: u32 = X86Insn::X86_INS_INVALID as u32;
pub const INS_JMP: u32 = X86Insn::X86_INS_JMP as u32;
pub const INS_LJMP: u32 = X86Insn::X86_INS_LJMP as u32;

/// Conditional jumps occupy one contiguous block of opcode ids
/// (`jae` .. `js`). `jmp` sits elsewhere in the id space.
pub const COND_JUMP_FIRST: u32 = X86Insn::X86_INS_JAE as u32;
pub const COND_JUMP_LAST: u32 = X86Insn::X86_INS_JS as u32;

/// `mov` .. `movzx`
pub const MOVE_FIRST: u32 = X86Insn::X86_INS_MOV as u32;
pub const MOVE_LAST: u32 = X86Insn::X86_INS_MOVZX as u32;

const MNEM_TABLE: &[(u32, MnemType)] = &[
    (X86Insn::X86_INS_LOOP as u32, MnemType::Loop),
    (X86Insn::X86_INS_LOOPE as u32, MnemType::Loop),
    (X86Insn::X86_INS_LOOPNE as u32, MnemType::Loop),
    (X86Insn::X86_INS_CALL as u32, MnemType::Call),
    (X86Insn::X86_INS_LCALL as u32, MnemType::Call),
    (X86Insn::X86_INS_RET as u32, MnemType::Return),
    (X86Insn::X86_INS_RETF as u32, MnemType::Return),
    (X86Insn::X86_INS_RETFQ as u32, MnemType::Return),
    (X86Insn::X86_INS_NOP as u32, MnemType::Nop),
    (X86Insn::X86_INS_POP as u32, MnemType::Pop),
    (X86Insn::X86_INS_POPAW as u32, MnemType::Pop),
    (X86Insn::X86_INS_POPAL as u32, MnemType::Pop),
    (X86Insn::X86_INS_POPCNT as u32, MnemType::Pop),
    (X86Insn::X86_INS_POPF as u32, MnemType::Pop),
    (X86Insn::X86_INS_POPFD as u32, MnemType::Pop),
    (X86Insn::X86_INS_POPFQ as u32, MnemType::Pop),
    (X86Insn::X86_INS_PUSH as u32, MnemType::Push),
    (X86Insn::X86_INS_PUSHAW as u32, MnemType::Push),
    (X86Insn::X86_INS_PUSHAL as u32, MnemType::Push),
    (X86Insn::X86_INS_PUSHF as u32, MnemType::Push),
    (X86Insn::X86_INS_PUSHFD as u32, MnemType::Push),
    (X86Insn::X86_INS_PUSHFQ as u32, MnemType::Push),
    (X86Insn::X86_INS_INT3 as u32, MnemType::Int3),
    (X86Insn::X86_INS_INT as u32, MnemType::IntX),
];

const IP_REGS: [RegId; 3] = [
    X86Reg::X86_REG_IP as RegId,
    X86Reg::X86_REG_EIP as RegId,
    X86Reg::X86_REG_RIP as RegId,
];

/// Opcode-range classifier for Capstone's x86 ids.
#[derive(Debug, Default, Clone, Copy)]
pub struct X86Semantics;

impl X86Semantics {
    /// Classify by opcode id alone; x86 needs no detail.
    pub fn classify_id(id: u32) -> MnemType {
        if id == INS_INVALID {
            return MnemType::Invalid;
        }
        if id == INS_JMP || id == INS_LJMP {
            return MnemType::Jump;
        }
        if (COND_JUMP_FIRST..=COND_JUMP_LAST).contains(&id) {
            return MnemType::CondJump;
        }
        if (MOVE_FIRST..=MOVE_LAST).contains(&id) {
            return MnemType::Move;
        }
        MNEM_TABLE
            .iter()
            .find(|(op, _)| *op == id)
            .map(|(_, t)| *t)
            .unwrap_or(MnemType::Other)
    }
}

impl ArchSemantics for X86Semantics {
    fn classify(&self, insn: &InsnRecord, _detail: &InsnDetail) -> MnemType {
        Self::classify_id(insn.id)
    }

    fn is_instruction_pointer(&self, reg: RegId) -> bool {
        IP_REGS.contains(&reg)
    }

    /// A memory operand without a base resolves to its displacement even
    /// when it has an index register, so `jmp [eax*4 + table]` resolves to
    /// the table start.
    fn target_shape(&self, op: &Operand) -> TargetShape {
        match op.kind {
            OperandKind::Immediate(v) => TargetShape::Immediate(v),
            OperandKind::Memory(m) => match m.base {
                None => TargetShape::Absolute(m.disp),
                Some(reg) if self.is_instruction_pointer(reg) => TargetShape::IpRelative(m.disp),
                Some(_) => TargetShape::Dynamic,
            },
            _ => TargetShape::Dynamic,
        }
    }
}
