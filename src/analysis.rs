//! Operand resolution and control-flow queries over a finished table.
//!
//! All queries are index based (0-based) and read-only. They are not
//! synchronized against a rebuild; the borrow held by [`TableView`] keeps
//! `fill_table` from running while a view is alive.

use rayon::prelude::*;
use serde::Serialize;

use crate::classify::{Target, TargetShape};
use crate::session::InsnTable;
use crate::{relative_target, Address, AddressSpace, DisasmError, MnemType, OperandKind};

/// Immediates wider than this many bytes count as addresses in
/// [`TableView::is_addr_operand`]. No x86 immediate is wider than 8 bytes,
/// so in practice only IP-relative memory operands trigger that branch.
pub const ADDR_IMM_MIN_SIZE: u8 = 8;

/// Borrowed, read-only view of a session's table.
#[derive(Clone, Copy)]
pub struct TableView<'a> {
    table: &'a InsnTable,
    target: Option<&'a Target>,
    start_va: Option<Address>,
    space: &'a dyn AddressSpace,
}

impl<'a> TableView<'a> {
    pub fn new(
        table: &'a InsnTable,
        target: Option<&'a Target>,
        start_va: Option<Address>,
        space: &'a dyn AddressSpace,
    ) -> Self {
        Self { table, target, start_va, space }
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Virtual address of instruction `index`, if it is a known address.
    pub fn virtual_address(&self, index: usize) -> Option<Address> {
        let (insn, _) = self.table.get(index)?;
        Some(insn.address).filter(|va| self.space.contains_va(*va))
    }

    /// Offset of instruction `index` from the start of the buffer.
    pub fn raw_offset(&self, index: usize) -> Option<Address> {
        let (insn, _) = self.table.get(index)?;
        Some(match self.start_va {
            Some(start) => insn.address.wrapping_sub(start),
            None => insn.address,
        })
    }

    /// Length in bytes of instruction `index`.
    pub fn chunk_size(&self, index: usize) -> Option<usize> {
        self.table.get(index).map(|(insn, _)| insn.size as usize)
    }

    pub fn mnemonic(&self, index: usize) -> Option<&'a str> {
        self.table.get(index).map(|(insn, _)| insn.mnemonic.as_str())
    }

    pub fn operand_text(&self, index: usize) -> Option<&'a str> {
        self.table.get(index).map(|(insn, _)| insn.operands.as_str())
    }

    pub fn bytes(&self, index: usize) -> Option<&'a [u8]> {
        self.table.get(index).map(|(insn, _)| insn.bytes())
    }

    /// Semantic category of instruction `index`.
    pub fn mnem_type(&self, index: usize) -> Option<MnemType> {
        let target = self.target?;
        let (insn, detail) = self.table.get(index)?;
        Some(target.semantics.classify(insn, detail))
    }

    /// Jump, conditional jump, call or loop.
    pub fn is_branching(&self, index: usize) -> bool {
        self.mnem_type(index).is_some_and(MnemType::is_branching)
    }

    /// Resolve operand `operand` of instruction `index` to a virtual address.
    ///
    /// Immediates resolve to their value, displacement-only memory operands
    /// to the displacement, and IP-relative memory operands to the address
    /// after the instruction plus the displacement. The result is truncated
    /// to the session's bit width.
    pub fn resolve_operand_address(&self, index: usize, operand: usize) -> Result<Address, DisasmError> {
        let (insn, detail) = self.table.get(index).ok_or(DisasmError::IndexOutOfRange(index))?;
        let target = self.target.ok_or(DisasmError::NotInitialized)?;
        let op = detail
            .operands
            .get(operand)
            .ok_or(DisasmError::OperandOutOfRange { index, operand })?;

        let va = match target.semantics.target_shape(op) {
            TargetShape::Immediate(v) => v as Address,
            TargetShape::Absolute(disp) => disp as Address,
            TargetShape::IpRelative(disp) => relative_target(insn.address, insn.size, disp),
            TargetShape::Dynamic => {
                return Err(DisasmError::UnsupportedOperandShape { index, operand });
            }
        };
        Ok(target.bits.truncate(va))
    }

    /// `push` immediately followed by `ret`: an indirect jump through the
    /// stack.
    ///
    /// # Returns
    /// The index of the return instruction.
    pub fn is_push_ret(&self, index: usize) -> Option<usize> {
        if self.mnem_type(index)? != MnemType::Push {
            return None;
        }
        let next = index + 1;
        match self.mnem_type(next)? {
            MnemType::Return => Some(next),
            _ => None,
        }
    }

    /// Whether instruction `index` probably carries an address in an operand.
    pub fn is_addr_operand(&self, index: usize) -> bool {
        let Some(target) = self.target else {
            return false;
        };
        let Some((insn, detail)) = self.table.get(index) else {
            return false;
        };
        let mnem = target.semantics.classify(insn, detail);
        if mnem == MnemType::Push || mnem == MnemType::Move {
            return true;
        }
        detail.operands.iter().any(|op| match op.kind {
            OperandKind::Immediate(_) => op.size > ADDR_IMM_MIN_SIZE,
            OperandKind::Memory(m) => m.base.is_some_and(|r| target.semantics.is_instruction_pointer(r)),
            _ => false,
        })
    }

    /// Whether instruction `index` is a control-flow edge with a target known
    /// from its encoding alone.
    pub fn is_followable(&self, index: usize) -> bool {
        if self.virtual_address(index).is_none() {
            return false;
        }
        if !self.is_branching(index) && self.is_push_ret(index).is_none() {
            return false;
        }
        let (Some(target), Some((_, detail))) = (self.target, self.table.get(index)) else {
            return false;
        };
        detail
            .operands
            .first()
            .is_some_and(|op| target.semantics.target_shape(op).is_static())
    }

    /// Resolved target of a followable instruction.
    pub fn target_address(&self, index: usize) -> Option<Address> {
        if !self.is_followable(index) {
            return None;
        }
        self.resolve_operand_address(index, 0).ok()
    }

    /// Summarize one instruction.
    pub fn row(&self, index: usize) -> Option<InsnRow> {
        let (insn, _) = self.table.get(index)?;
        Some(InsnRow {
            index,
            address: insn.address,
            raw_offset: self.raw_offset(index)?,
            size: insn.size,
            bytes: insn.bytes().iter().map(|b| format!("{:02x}", b)).collect::<Vec<_>>().join(" "),
            mnemonic: insn.mnemonic.clone(),
            operands: insn.operands.clone(),
            mnem_type: self.mnem_type(index).unwrap_or(MnemType::Other),
            branching: self.is_branching(index),
            followable: self.is_followable(index),
            push_ret: self.is_push_ret(index),
            target: self.target_address(index),
            addr_operand: self.is_addr_operand(index),
        })
    }

    /// Summaries for the whole table, in index order.
    pub fn rows(&self) -> Vec<InsnRow> {
        (0..self.len())
            .into_par_iter()
            .filter_map(|i| self.row(i))
            .collect()
    }
}

/// Everything known about one table entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InsnRow {
    pub index: usize,
    pub address: Address,
    pub raw_offset: Address,
    pub size: u8,
    pub bytes: String,
    pub mnemonic: String,
    pub operands: String,
    pub mnem_type: MnemType,
    pub branching: bool,
    pub followable: bool,
    pub push_ret: Option<usize>,
    pub target: Option<Address>,
    pub addr_operand: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use capstone::arch::arm64::Arm64Insn;
    use capstone::arch::x86::{X86Insn, X86Reg};

    use crate::scripted::ScriptedEngine;
    use crate::session::{Disasm, DisasmConfig};
    use crate::{Architecture, BitWidth, InsnDetail, InsnGroup, InsnRecord, Operand, Region, RegId};

    const RIP: RegId = X86Reg::X86_REG_RIP as RegId;
    const EAX: RegId = X86Reg::X86_REG_EAX as RegId;

    fn x86(id: u32, size: u8, operands: Vec<Operand>) -> (InsnRecord, InsnDetail) {
        (InsnRecord::new(id, 0, size), InsnDetail::with_operands(operands))
    }

    fn session(
        arch: Architecture,
        bits: BitWidth,
        start: Address,
        script: Vec<(InsnRecord, InsnDetail)>,
    ) -> Disasm<ScriptedEngine> {
        let engine = ScriptedEngine::new(script);
        let size = engine.script_size();
        let mut disasm = Disasm::new(engine);
        let config = DisasmConfig::new(arch, bits, size).with_offset(start);
        disasm.init(vec![0u8; size], config).unwrap();
        disasm.fill_table().unwrap();
        disasm
    }

    #[test]
    fn test_push_ret_pair() {
        let disasm = session(
            Architecture::Intel,
            BitWidth::Bits32,
            0x401000,
            vec![
                x86(X86Insn::X86_INS_PUSH as u32, 5, vec![Operand::imm(0x402000, 4)]),
                x86(X86Insn::X86_INS_RET as u32, 1, vec![]),
            ],
        );
        let view = disasm.view();

        assert_eq!(view.len(), 2);
        assert_eq!(view.mnem_type(0), Some(MnemType::Push));
        assert_eq!(view.mnem_type(1), Some(MnemType::Return));
        assert_eq!(view.is_push_ret(0), Some(1));
        assert_eq!(view.is_push_ret(1), None);
        assert!(view.is_followable(0));
        assert!(!view.is_followable(1));
        assert_eq!(view.target_address(0), Some(0x402000));
        assert!(view.is_addr_operand(0));
    }

    #[test]
    fn test_push_at_end_of_table() {
        let disasm = session(
            Architecture::Intel,
            BitWidth::Bits32,
            0,
            vec![
                x86(X86Insn::X86_INS_NOP as u32, 1, vec![]),
                x86(X86Insn::X86_INS_PUSH as u32, 5, vec![Operand::imm(0x1000, 4)]),
            ],
        );
        let view = disasm.view();
        assert_eq!(view.is_push_ret(1), None);
        assert!(!view.is_followable(1));
        assert_eq!(view.is_push_ret(2), None);
    }

    #[test]
    fn test_push_before_non_return() {
        let disasm = session(
            Architecture::Intel,
            BitWidth::Bits32,
            0x401000,
            vec![
                x86(X86Insn::X86_INS_PUSH as u32, 5, vec![Operand::imm(0x402000, 4)]),
                x86(X86Insn::X86_INS_NOP as u32, 1, vec![]),
                x86(X86Insn::X86_INS_RET as u32, 1, vec![]),
            ],
        );
        let view = disasm.view();

        assert_eq!(view.mnem_type(0), Some(MnemType::Push));
        assert_eq!(view.is_push_ret(0), None);
        assert!(!view.is_followable(0));
        assert_eq!(view.target_address(0), None);
        // still an address-carrying push
        assert!(view.is_addr_operand(0));
    }

    #[test]
    fn test_ip_relative_resolution() {
        // jmp [rip + 0x10] at 0x1000, 6 bytes long
        let disasm = session(
            Architecture::Intel,
            BitWidth::Bits64,
            0x1000,
            vec![x86(X86Insn::X86_INS_JMP as u32, 6, vec![Operand::mem(Some(RIP), 0x10, 8)])],
        );
        let view = disasm.view();

        assert_eq!(view.resolve_operand_address(0, 0).unwrap(), 0x1016);
        assert!(view.is_followable(0));
        assert!(view.is_addr_operand(0));
        assert_eq!(view.target_address(0), Some(0x1016));
    }

    #[test]
    fn test_negative_displacement_wraps_to_width() {
        // jmp [ip - 0x20] at 0x0008 in 16-bit mode
        let ip = X86Reg::X86_REG_IP as RegId;
        let disasm = session(
            Architecture::Intel,
            BitWidth::Bits16,
            0x8,
            vec![x86(X86Insn::X86_INS_JMP as u32, 4, vec![Operand::mem(Some(ip), -0x20, 2)])],
        );
        assert_eq!(disasm.view().resolve_operand_address(0, 0).unwrap(), 0xFFEC);
    }

    #[test]
    fn test_absolute_memory_truncated() {
        // call [0x402000] with a sign-extended displacement
        let disasm = session(
            Architecture::Intel,
            BitWidth::Bits32,
            0,
            vec![
                x86(X86Insn::X86_INS_CALL as u32, 6, vec![Operand::mem(None, -0x10, 4)]),
                x86(X86Insn::X86_INS_JMP as u32, 6, vec![Operand::mem(None, 0x402000, 4)]),
            ],
        );
        let view = disasm.view();
        assert_eq!(view.resolve_operand_address(0, 0).unwrap(), 0xFFFF_FFF0);
        assert_eq!(view.resolve_operand_address(1, 0).unwrap(), 0x402000);
        assert!(view.is_followable(0));
        assert!(view.is_followable(1));
    }

    #[test]
    fn test_unresolvable_operands() {
        let disasm = session(
            Architecture::Intel,
            BitWidth::Bits32,
            0,
            vec![
                x86(X86Insn::X86_INS_JMP as u32, 2, vec![Operand::reg(EAX, 4)]),
                x86(X86Insn::X86_INS_CALL as u32, 3, vec![Operand::mem(Some(EAX), 4, 4)]),
                x86(X86Insn::X86_INS_RET as u32, 1, vec![]),
            ],
        );
        let view = disasm.view();

        assert!(matches!(
            view.resolve_operand_address(0, 0),
            Err(DisasmError::UnsupportedOperandShape { index: 0, operand: 0 })
        ));
        assert!(matches!(
            view.resolve_operand_address(1, 0),
            Err(DisasmError::UnsupportedOperandShape { .. })
        ));
        assert!(matches!(
            view.resolve_operand_address(2, 0),
            Err(DisasmError::OperandOutOfRange { index: 2, operand: 0 })
        ));
        assert!(matches!(view.resolve_operand_address(3, 0), Err(DisasmError::IndexOutOfRange(3))));

        assert!(!view.is_followable(0));
        assert!(!view.is_followable(1));
        assert!(!view.is_followable(2));
        assert_eq!(view.target_address(0), None);
    }

    #[test]
    fn test_raw_offset() {
        let script = vec![
            x86(X86Insn::X86_INS_NOP as u32, 1, vec![]),
            x86(X86Insn::X86_INS_NOP as u32, 1, vec![]),
        ];
        let text = Region { raw_start: 0x400, va_start: 0x401000, size: 0x100 };
        let mut disasm = Disasm::new(ScriptedEngine::new(script)).with_address_space(Arc::new(text));
        disasm
            .init(vec![0x90, 0x90], DisasmConfig::new(Architecture::Intel, BitWidth::Bits32, 2).with_offset(0x400))
            .unwrap();
        disasm.fill_table().unwrap();
        let view = disasm.view();

        assert_eq!(view.virtual_address(1), Some(0x401001));
        assert_eq!(view.raw_offset(1), Some(1));
        assert_eq!(view.raw_offset(2), None);
    }

    #[test]
    fn test_raw_offset_without_mapped_start() {
        let script = vec![x86(X86Insn::X86_INS_NOP as u32, 1, vec![])];
        let text = Region { raw_start: 0x400, va_start: 0x401000, size: 0x100 };
        let mut disasm = Disasm::new(ScriptedEngine::new(script)).with_address_space(Arc::new(text));
        // offset 0 is outside the region, so decoding starts at VA 0
        disasm
            .init(vec![0x90], DisasmConfig::new(Architecture::Intel, BitWidth::Bits32, 1))
            .unwrap();
        disasm.fill_table().unwrap();
        let view = disasm.view();

        assert_eq!(view.raw_offset(0), Some(0));
        // VA 0 is not inside the region
        assert_eq!(view.virtual_address(0), None);
    }

    #[test]
    fn test_unknown_address_is_never_followable() {
        let script = vec![x86(X86Insn::X86_INS_JMP as u32, 5, vec![Operand::imm(0x10, 4)])];
        let text = Region { raw_start: 0x400, va_start: 0x401000, size: 0x100 };
        let mut disasm = Disasm::new(ScriptedEngine::new(script)).with_address_space(Arc::new(text));
        disasm
            .init(vec![0u8; 5], DisasmConfig::new(Architecture::Intel, BitWidth::Bits32, 5))
            .unwrap();
        disasm.fill_table().unwrap();
        let view = disasm.view();

        assert!(view.is_branching(0));
        assert!(!view.is_followable(0));
        assert_eq!(view.resolve_operand_address(0, 0).unwrap(), 0x10);
    }

    #[test]
    fn test_addr_operand_heuristic() {
        let disasm = session(
            Architecture::Intel,
            BitWidth::Bits64,
            0,
            vec![
                x86(X86Insn::X86_INS_MOV as u32, 5, vec![Operand::reg(EAX, 4), Operand::imm(1, 4)]),
                x86(X86Insn::X86_INS_LEA as u32, 7, vec![Operand::reg(EAX, 8), Operand::mem(Some(RIP), 0x20, 8)]),
                x86(X86Insn::X86_INS_ADD as u32, 6, vec![Operand::reg(EAX, 8), Operand::imm(0x401000, 8)]),
                x86(X86Insn::X86_INS_ADD as u32, 3, vec![Operand::reg(EAX, 8), Operand::mem(Some(EAX), 8, 8)]),
            ],
        );
        let view = disasm.view();
        assert!(view.is_addr_operand(0));
        assert!(view.is_addr_operand(1));
        // 8-byte immediates do not pass the size threshold
        assert!(!view.is_addr_operand(2));
        assert!(!view.is_addr_operand(3));
        assert!(!view.is_addr_operand(9));
    }

    #[test]
    fn test_arm64_immediates_only() {
        let bl = (
            InsnRecord::new(Arm64Insn::ARM64_INS_BL as u32, 0, 4),
            InsnDetail::with_operands(vec![Operand::imm(0x2000, 0)])
                .with_groups(vec![InsnGroup::Call, InsnGroup::BranchRelative]),
        );
        let cbz = (
            InsnRecord::new(Arm64Insn::ARM64_INS_CBZ as u32, 0, 4),
            InsnDetail::with_operands(vec![Operand::reg(1, 0), Operand::imm(0x1010, 0)])
                .with_groups(vec![InsnGroup::Jump, InsnGroup::BranchRelative]),
        );
        let ldr = (
            InsnRecord::new(Arm64Insn::ARM64_INS_LDR as u32, 0, 4),
            InsnDetail::with_operands(vec![Operand::reg(1, 0), Operand::mem(Some(2), 8, 0)]),
        );
        let disasm = session(Architecture::Arm, BitWidth::Bits64, 0x1000, vec![bl, cbz, ldr]);
        let view = disasm.view();

        assert_eq!(view.mnem_type(0), Some(MnemType::Call));
        assert!(view.is_followable(0));
        assert_eq!(view.target_address(0), Some(0x2000));

        assert_eq!(view.mnem_type(1), Some(MnemType::CondJump));
        assert!(!view.is_followable(1));
        assert_eq!(view.resolve_operand_address(1, 1).unwrap(), 0x1010);

        assert!(matches!(
            view.resolve_operand_address(2, 1),
            Err(DisasmError::UnsupportedOperandShape { .. })
        ));
    }

    #[test]
    fn test_rows() {
        let disasm = session(
            Architecture::Intel,
            BitWidth::Bits32,
            0x401000,
            vec![
                x86(X86Insn::X86_INS_PUSH as u32, 5, vec![Operand::imm(0x402000, 4)]),
                x86(X86Insn::X86_INS_RET as u32, 1, vec![]),
            ],
        );
        let rows = disasm.view().rows();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].index, 0);
        assert_eq!(rows[0].push_ret, Some(1));
        assert_eq!(rows[0].target, Some(0x402000));
        assert_eq!(rows[1].address, 0x401005);
        assert_eq!(rows[1].raw_offset, 5);
        assert_eq!(rows[1].mnem_type, MnemType::Return);
        assert!(!rows[1].followable);
    }

    #[test]
    fn test_uninitialized_view() {
        let disasm = Disasm::new(ScriptedEngine::default());
        let view = disasm.view();
        assert!(view.is_empty());
        assert_eq!(view.mnem_type(0), None);
        assert!(!view.is_followable(0));
        assert!(view.rows().is_empty());
    }
}
