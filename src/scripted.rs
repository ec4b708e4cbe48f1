//! A decode engine that replays a fixed instruction script.
//!
//! Each scripted entry is handed out in order, re-addressed to wherever the
//! cursor currently is. Useful for exercising the analysis without a real
//! decoder.

use std::collections::VecDeque;

use crate::{
    Address, Architecture, BitWidth, DecodeEngine, DisasmError, EngineOptions, InsnDetail,
    InsnRecord,
};

/// Scripted replacement for a real decode engine.
#[derive(Debug, Default, Clone)]
pub struct ScriptedEngine {
    script: VecDeque<(InsnRecord, InsnDetail)>,
    opened: Option<(Architecture, BitWidth)>,
    reject_open: bool,
}

impl ScriptedEngine {
    /// Create an engine that will replay `script`.
    pub fn new(script: Vec<(InsnRecord, InsnDetail)>) -> Self {
        Self {
            script: script.into(),
            opened: None,
            reject_open: false,
        }
    }

    /// An engine whose `open` always fails.
    pub fn rejecting() -> Self {
        Self {
            reject_open: true,
            ..Self::default()
        }
    }

    /// Total size of the remaining script in bytes.
    pub fn script_size(&self) -> usize {
        self.script.iter().map(|(i, _)| i.size as usize).sum()
    }

    pub fn is_open(&self) -> bool {
        self.opened.is_some()
    }
}

impl DecodeEngine for ScriptedEngine {
    fn open(
        &mut self,
        arch: Architecture,
        bits: BitWidth,
        _options: EngineOptions,
    ) -> Result<(), DisasmError> {
        if self.reject_open {
            return Err(DisasmError::EngineOpen("scripted engine rejects every target".into()));
        }
        self.opened = Some((arch, bits));
        Ok(())
    }

    fn close(&mut self) {
        self.opened = None;
    }

    fn decode_one(&mut self, code: &[u8], address: Address) -> Option<(InsnRecord, InsnDetail)> {
        self.opened?;
        let size = self.script.front()?.0.size as usize;
        if size == 0 || code.len() < size {
            return None;
        }
        let (mut insn, detail) = self.script.pop_front()?;
        insn.address = address;
        Some((insn.with_bytes(&code[..size]), detail))
    }
}
