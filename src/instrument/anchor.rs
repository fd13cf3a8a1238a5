//! Locating splice points in a method body

use std::fmt;

use crate::il::{MethodBody, OpCode};

use super::TranspileError;

/// Instruction shape an [`Anchor`] looks for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pattern {
    /// The first host instruction
    Start,
    /// `call` of the named method
    Calls(&'static str),
    /// `stloc` of the local
    StoresLocal(u16),
    /// `starg` of the argument
    StoresArg(u16),
    /// `ldloc` of the local
    LoadsLocal(u16),
    /// `ldarg` of the argument
    LoadsArg(u16),
    /// `ret`
    Returns,
}

impl Pattern {
    /// Whether `op` has this shape
    fn matches(&self, op: &OpCode) -> bool {
        match (self, op) {
            (Self::Start, _) => true,
            (Self::Calls(name), OpCode::Call(m)) => m.name == *name,
            (Self::StoresLocal(i), OpCode::StLoc(j))
            | (Self::StoresArg(i), OpCode::StArg(j))
            | (Self::LoadsLocal(i), OpCode::LdLoc(j))
            | (Self::LoadsArg(i), OpCode::LdArg(j)) => i == j,
            (Self::Returns, OpCode::Ret) => true,
            _ => false,
        }
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Start => write!(f, "start"),
            Self::Calls(name) => write!(f, "call {name}"),
            Self::StoresLocal(i) => write!(f, "stloc {i}"),
            Self::StoresArg(i) => write!(f, "starg {i}"),
            Self::LoadsLocal(i) => write!(f, "ldloc {i}"),
            Self::LoadsArg(i) => write!(f, "ldarg {i}"),
            Self::Returns => write!(f, "ret"),
        }
    }
}

/// A position in a method body: the `nth` host instruction matching `pattern`, moved by
/// `offset` host instructions.
///
/// Only instructions of the original host body are considered. Code injected by an earlier
/// transpiler is skipped both when matching and when applying the offset, so anchors keep
/// pointing at the same host instruction no matter how many patches ran before.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Anchor {
    /// Shape to look for
    pattern: Pattern,
    /// Zero-based occurrence
    nth: usize,
    /// Signed distance from the match
    offset: isize,
}

impl Anchor {
    /// First occurrence of `pattern`
    pub const fn new(pattern: Pattern) -> Self {
        Self {
            pattern,
            nth: 0,
            offset: 0,
        }
    }

    /// The first host instruction
    pub const fn start() -> Self {
        Self::new(Pattern::Start)
    }

    /// Selects the `nth` occurrence instead of the first
    pub const fn nth(mut self, nth: usize) -> Self {
        self.nth = nth;
        self
    }

    /// Moves the anchor `offset` host instructions away from the match
    pub const fn offset(mut self, offset: isize) -> Self {
        self.offset = offset;
        self
    }

    /// Index of the instruction this anchor points at
    pub fn resolve(&self, body: &MethodBody) -> Result<usize, TranspileError> {
        let host: Vec<usize> = body
            .instructions
            .iter()
            .enumerate()
            .filter(|(_, i)| !i.injected)
            .map(|(index, _)| index)
            .collect();

        let position = host
            .iter()
            .enumerate()
            .filter(|(_, index)| self.pattern.matches(&body.instructions[**index].op))
            .map(|(position, _)| position)
            .nth(self.nth)
            .ok_or_else(|| TranspileError::AnchorNotFound {
                pattern: self.pattern.to_string(),
                nth: self.nth,
            })?;

        position
            .checked_add_signed(self.offset)
            .and_then(|p| host.get(p))
            .copied()
            .ok_or_else(|| TranspileError::AnchorOutOfRange {
                pattern: self.pattern.to_string(),
                offset: self.offset,
            })
    }
}
