//! Per-architecture instruction semantics.

use std::fmt;

use crate::{Architecture, BitWidth, DisasmError, InsnDetail, InsnRecord, Operand, RegId};

pub mod arm;
pub mod x86;

pub use self::arm::{Arm32Semantics, Arm64Semantics};
pub use self::x86::X86Semantics;

/// How the address named by an operand can be computed without running
/// the code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetShape {
    /// The operand is the address.
    Immediate(i64),
    /// Displacement-only memory operand.
    Absolute(i64),
    /// Memory operand relative to the instruction pointer.
    IpRelative(i64),
    /// Depends on register values at run time.
    Dynamic,
}

impl TargetShape {
    pub fn is_static(self) -> bool {
        !matches!(self, TargetShape::Dynamic)
    }
}

/// Architecture-specific classification and operand rules.
pub trait ArchSemantics: Send + Sync + fmt::Debug {
    /// Map an instruction onto its semantic category.
    fn classify(&self, insn: &InsnRecord, detail: &InsnDetail) -> crate::MnemType;

    /// Whether `reg` is the instruction-pointer register.
    fn is_instruction_pointer(&self, reg: RegId) -> bool;

    /// How `op` can be resolved statically.
    fn target_shape(&self, op: &Operand) -> TargetShape;
}

/// The architecture/width an initialized session decodes, with its rules.
#[derive(Debug)]
pub struct Target {
    pub arch: Architecture,
    pub bits: BitWidth,
    pub semantics: Box<dyn ArchSemantics>,
}

impl Target {
    /// Select the semantics for `arch`/`bits`.
    pub fn select(arch: Architecture, bits: BitWidth) -> Result<Self, DisasmError> {
        let semantics: Box<dyn ArchSemantics> = match (arch, bits) {
            (Architecture::Intel, _) => Box::new(X86Semantics),
            (Architecture::Arm, BitWidth::Bits64) => Box::new(Arm64Semantics),
            (Architecture::Arm, BitWidth::Bits32) => Box::new(Arm32Semantics),
            (Architecture::Arm, BitWidth::Bits16) => {
                return Err(DisasmError::UnsupportedArchitecture { arch, bits });
            }
        };
        Ok(Self { arch, bits, semantics })
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.arch, self.bits)
    }
}
