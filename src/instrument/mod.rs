//! # Instrument
//!
//! This module covers call-site instrumentation: transpilers that rewrite a host method body so it
//! raises an event at a chosen point. A [`Splice`] marshals frame slots into a new event,
//! dispatches it, leaves through a deny target when a subscriber refused the operation, and
//! copies mutated fields back into the frame. A [`Postfix`] runs code before every return and an
//! [`Inject`] places plain code at an anchor.
//!
//! Transpilers of one patch run in order over the same body and share one [`ILGenerator`].

use std::fmt;

use thiserror::Error;

use crate::event::EventKind;
use crate::il::verify::VerifyError;
use crate::il::{Constant, ILGenerator, Instruction, MethodBody, MethodRef, OpCode, Slot};

pub mod anchor;
pub mod postfix;
pub mod splice;

pub use anchor::{Anchor, Pattern};
pub use postfix::{Inject, Postfix};
pub use splice::{Deny, Splice};

/// Errors while rewriting a body
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TranspileError {
    /// No host instruction matches the anchor
    #[error("no occurrence {nth} of `{pattern}`")]
    AnchorNotFound {
        /// Pattern that was searched for
        pattern: String,
        /// Requested occurrence
        nth: usize,
    },
    /// The anchor offset leaves the body
    #[error("offset {offset} from `{pattern}` is outside the method")]
    AnchorOutOfRange {
        /// Pattern that matched
        pattern: String,
        /// Offset that was applied
        offset: isize,
    },
    /// Number of marshaled sources differs from the event's constructor
    #[error("{event} takes {expected} constructor parameters, {found} sources given")]
    Arity {
        /// Event kind
        event: &'static str,
        /// Constructor parameters
        expected: usize,
        /// Sources given
        found: usize,
    },
    /// Write-back of a field the host does not accept back
    #[error("{event}.{field} is read-only")]
    ReadOnlyField {
        /// Event kind
        event: &'static str,
        /// Field name
        field: &'static str,
    },
    /// Deny target on an event without an allowed-flag
    #[error("{0} cannot be denied")]
    NotDeniable(&'static str),
    /// Postfixes only raise events nobody can deny
    #[error("{0} is cancellable and cannot be raised after the fact")]
    Cancellable(&'static str),
    /// Deny target anchored on an instruction that is not a branch
    #[error("instruction {0} is not a branch")]
    NotABranch(usize),
    /// The body has no host `ret`
    #[error("method has no return")]
    NoReturn,
    /// The rewritten body does not verify
    #[error(transparent)]
    Verify(#[from] VerifyError),
}

/// One step of a patch pipeline
pub trait Transpiler: fmt::Debug + Send + Sync {
    /// Rewrites `body` in place
    fn transpile(&self, body: &mut MethodBody, gen: &mut ILGenerator) -> Result<(), TranspileError>;

    /// Event kinds the injected code raises
    fn raises(&self) -> Vec<EventKind> {
        Vec::new()
    }
}

/// Value marshaled into an event constructor
#[derive(Debug, Clone, PartialEq)]
pub enum Source {
    /// Current value of a frame slot
    Slot(Slot),
    /// Constant, e.g. the initial allowed-flag
    Const(Constant),
    /// Result of a getter called with the given slots
    Call(MethodRef, Vec<Slot>),
}

impl From<Slot> for Source {
    fn from(slot: Slot) -> Self {
        Self::Slot(slot)
    }
}
impl From<Constant> for Source {
    fn from(c: Constant) -> Self {
        Self::Const(c)
    }
}
impl From<bool> for Source {
    fn from(b: bool) -> Self {
        Self::Const(Constant::Bool(b))
    }
}

impl Source {
    /// Appends the code pushing this value
    fn emit(&self, gen: &mut ILGenerator, code: &mut Vec<Instruction>) {
        match self {
            Self::Slot(slot) => code.push(Instruction::injected(load(gen, *slot))),
            Self::Const(c) => code.push(Instruction::injected(OpCode::Ld(c.clone()))),
            Self::Call(method, args) => {
                for slot in args {
                    code.push(Instruction::injected(load(gen, *slot)));
                }
                code.push(Instruction::injected(OpCode::Call(method.clone())));
            }
        }
    }
}

/// Code emitted by [`Postfix`] and [`Inject`]
#[derive(Debug, Clone)]
pub enum Emit {
    /// Any opcode, emitted as is
    Op(OpCode),
    /// Push a slot
    Load(Slot),
    /// Pop into a slot
    Store(Slot),
}

impl Emit {
    /// Lowers to an injected instruction
    fn lower(&self, gen: &mut ILGenerator) -> Instruction {
        Instruction::injected(match self {
            Self::Op(op) => op.clone(),
            Self::Load(slot) => load(gen, *slot),
            Self::Store(slot) => store(gen, *slot),
        })
    }
}

/// Opcode pushing `slot`
fn load(gen: &mut ILGenerator, slot: Slot) -> OpCode {
    match slot {
        Slot::Arg(i) => OpCode::LdArg(i),
        Slot::Local(i) => OpCode::LdLoc(i),
        Slot::Scratch(name) => OpCode::LdLoc(gen.scratch(name)),
    }
}

/// Opcode popping into `slot`
fn store(gen: &mut ILGenerator, slot: Slot) -> OpCode {
    match slot {
        Slot::Arg(i) => OpCode::StArg(i),
        Slot::Local(i) => OpCode::StLoc(i),
        Slot::Scratch(name) => OpCode::StLoc(gen.scratch(name)),
    }
}

/// Inserts `code` in front of instruction `at`, moving the labels of `at` onto the first
/// inserted instruction so branches into the site run the new code too
fn insert(body: &mut MethodBody, at: usize, mut code: Vec<Instruction>) {
    if let Some(first) = code.first_mut() {
        first
            .labels
            .extend(std::mem::take(&mut body.instructions[at].labels));
    }
    body.instructions.splice(at..at, code);
}

/// Indices of the host `ret` instructions
fn host_returns(body: &MethodBody) -> Vec<usize> {
    body.instructions
        .iter()
        .enumerate()
        .filter(|(_, i)| !i.injected && matches!(i.op, OpCode::Ret))
        .map(|(index, _)| index)
        .collect()
}
