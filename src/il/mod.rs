//! # IL
//!
//! This module covers the host's instruction model: a small stack machine whose method bodies
//! are plain instruction lists that can be inspected, rewritten and swapped at runtime.

use std::fmt;

use crate::event::EventKind;

pub mod asm;
pub mod generator;
pub mod value;
pub mod verify;

pub use generator::ILGenerator;
pub use value::{Constant, ItemId, PlayerId, Value, ValueError, Vector3};

/// Branch target. Attached to at most one instruction of a body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Label(pub(crate) u32);
impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

/// Reference to a callable method: either another IL body registered with the host or a native
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodRef {
    /// Fully qualified signature, e.g. `Player::set_position`
    pub name: String,
    /// Number of arguments popped from the stack
    pub argc: u16,
    /// Whether a return value is pushed
    pub returns: bool,
}
impl MethodRef {
    /// Reference to a method returning nothing
    pub fn void(name: impl Into<String>, argc: u16) -> Self {
        Self {
            name: name.into(),
            argc,
            returns: false,
        }
    }
    /// Reference to a method that pushes a return value
    pub fn returning(name: impl Into<String>, argc: u16) -> Self {
        Self {
            name: name.into(),
            argc,
            returns: true,
        }
    }
}

/// Argument or local slot of a method frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    /// Method argument by index
    Arg(u16),
    /// Local variable by index
    Local(u16),
    /// Named local declared through an [`ILGenerator`]; shared by every transpiler of one pipeline
    Scratch(&'static str),
}

/// Operation performed by one instruction
#[derive(Debug, Clone)]
pub enum OpCode {
    /// Do nothing
    Nop,
    /// Push an argument
    LdArg(u16),
    /// Pop into an argument
    StArg(u16),
    /// Push a local
    LdLoc(u16),
    /// Pop into a local
    StLoc(u16),
    /// Push a constant
    Ld(Constant),
    /// Duplicate the top of the stack
    Dup,
    /// Discard the top of the stack
    Pop,
    /// Numeric addition, or concatenation when both operands are strings
    Add,
    /// Numeric subtraction
    Sub,
    /// Numeric multiplication
    Mul,
    /// Push whether the two operands are equal
    Ceq,
    /// Push whether the first operand is less than the second
    Clt,
    /// Push whether the first operand is greater than the second
    Cgt,
    /// Boolean negation
    Not,
    /// Unconditional branch
    Br(Label),
    /// Pop a bool and branch when it is true
    BrTrue(Label),
    /// Pop a bool and branch when it is false
    BrFalse(Label),
    /// Call an IL method or a host native
    Call(MethodRef),
    /// Pop the kind's constructor parameters and push a new event object
    NewEvent(EventKind),
    /// Pop an event object and run every subscriber of its kind
    Dispatch(EventKind),
    /// Pop an event object and push one of its fields
    LdField(&'static str),
    /// Return, popping the result for methods returning a value
    Ret,
}

impl OpCode {
    /// Number of values popped and pushed. `ret` is handled by the verifier.
    pub fn stack_effect(&self) -> (usize, usize) {
        match self {
            Self::Nop | Self::Br(_) | Self::Ret => (0, 0),
            Self::LdArg(_) | Self::LdLoc(_) | Self::Ld(_) => (0, 1),
            Self::StArg(_) | Self::StLoc(_) | Self::Pop => (1, 0),
            Self::Dup => (1, 2),
            Self::Add | Self::Sub | Self::Mul | Self::Ceq | Self::Clt | Self::Cgt => (2, 1),
            Self::Not | Self::LdField(_) => (1, 1),
            Self::BrTrue(_) | Self::BrFalse(_) | Self::Dispatch(_) => (1, 0),
            Self::Call(m) => (m.argc as usize, m.returns as usize),
            Self::NewEvent(kind) => (kind.arity(), 1),
        }
    }

    /// Label this instruction may jump to
    pub fn branch_target(&self) -> Option<Label> {
        match self {
            Self::Br(l) | Self::BrTrue(l) | Self::BrFalse(l) => Some(*l),
            _ => None,
        }
    }

    /// Whether execution never falls through to the next instruction
    pub fn ends_block(&self) -> bool {
        matches!(self, Self::Br(_) | Self::Ret)
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nop => write!(f, "nop"),
            Self::LdArg(i) => write!(f, "ldarg {i}"),
            Self::StArg(i) => write!(f, "starg {i}"),
            Self::LdLoc(i) => write!(f, "ldloc {i}"),
            Self::StLoc(i) => write!(f, "stloc {i}"),
            Self::Ld(c) => write!(f, "{c}"),
            Self::Dup => write!(f, "dup"),
            Self::Pop => write!(f, "pop"),
            Self::Add => write!(f, "add"),
            Self::Sub => write!(f, "sub"),
            Self::Mul => write!(f, "mul"),
            Self::Ceq => write!(f, "ceq"),
            Self::Clt => write!(f, "clt"),
            Self::Cgt => write!(f, "cgt"),
            Self::Not => write!(f, "not"),
            Self::Br(l) => write!(f, "br {l}"),
            Self::BrTrue(l) => write!(f, "brtrue {l}"),
            Self::BrFalse(l) => write!(f, "brfalse {l}"),
            Self::Call(m) => write!(
                f,
                "call {} {} {}",
                m.name,
                m.argc,
                if m.returns { "ret" } else { "void" }
            ),
            Self::NewEvent(k) => write!(f, "newevent {}", k.name()),
            Self::Dispatch(k) => write!(f, "dispatch {}", k.name()),
            Self::LdField(name) => write!(f, "ldfld {name}"),
            Self::Ret => write!(f, "ret"),
        }
    }
}

/// One instruction of a method body
#[derive(Debug, Clone)]
pub struct Instruction {
    /// Operation to perform
    pub op: OpCode,
    /// Labels that resolve to this instruction
    pub labels: Vec<Label>,
    /// Set on instructions spliced in by a patch. Anchors never match these.
    pub injected: bool,
}
impl Instruction {
    /// Creates a host instruction
    pub fn new(op: OpCode) -> Self {
        Self {
            op,
            labels: Vec::new(),
            injected: false,
        }
    }
    /// Creates an instruction marked as injected by a patch
    pub fn injected(op: OpCode) -> Self {
        Self {
            injected: true,
            ..Self::new(op)
        }
    }
    /// Attaches a label to this instruction
    pub fn with_label(mut self, label: Label) -> Self {
        self.labels.push(label);
        self
    }
}
impl From<OpCode> for Instruction {
    fn from(op: OpCode) -> Self {
        Self::new(op)
    }
}

/// Body of a host method
#[derive(Debug, Clone)]
pub struct MethodBody {
    /// Signature the method is registered under
    pub name: String,
    /// Number of arguments
    pub params: u16,
    /// Number of local slots
    pub locals: u16,
    /// Whether `ret` returns a value
    pub returns: bool,
    /// Instruction stream
    pub instructions: Vec<Instruction>,
}

impl MethodBody {
    /// Creates an empty body
    pub fn new(name: impl Into<String>, params: u16, locals: u16, returns: bool) -> Self {
        Self {
            name: name.into(),
            params,
            locals,
            returns,
            instructions: Vec::new(),
        }
    }

    /// Index of the instruction carrying `label`
    pub fn label_index(&self, label: Label) -> Option<usize> {
        self.instructions
            .iter()
            .position(|i| i.labels.contains(&label))
    }

    /// Number of instructions injected by patches
    pub fn injected_len(&self) -> usize {
        self.instructions.iter().filter(|i| i.injected).count()
    }
}

impl fmt::Display for MethodBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            ".method {} params {} locals {} {}",
            self.name,
            self.params,
            self.locals,
            if self.returns { "ret" } else { "void" }
        )?;
        for instr in &self.instructions {
            for label in &instr.labels {
                writeln!(f, "{label}:")?;
            }
            let marker = if instr.injected { '+' } else { ' ' };
            writeln!(f, "{marker}   {}", instr.op)?;
        }
        Ok(())
    }
}
