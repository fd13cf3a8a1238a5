//! Postfixes and plain code injection

use tracing::debug;

use crate::event::{EventKind, Marshal};
use crate::il::{ILGenerator, Instruction, MethodBody, OpCode};

use super::{host_returns, insert, Anchor, Emit, Source, TranspileError, Transpiler};

/// What a [`Postfix`] runs before each return
#[derive(Debug, Clone)]
enum Action {
    /// Stack-neutral code
    Code(Vec<Emit>),
    /// A non-cancellable event
    Raise {
        /// Event raised
        kind: EventKind,
        /// Constructor parameters
        sources: Vec<Source>,
    },
}

/// Runs code, or raises an event, before every host `ret`.
///
/// Labels on a `ret` move to the injected code, so every path out of the method runs it. A deny
/// target of type [`Return`](super::Deny::Return) that is set up *after* the postfix lands behind
/// the injected code and skips it.
#[derive(Debug, Clone)]
pub struct Postfix {
    /// Injected action
    action: Action,
}

impl Postfix {
    /// Runs `code` before every return. The code must leave the stack as it found it.
    pub fn code(code: Vec<Emit>) -> Self {
        Self {
            action: Action::Code(code),
        }
    }

    /// Raises `T` before every return
    pub fn raise<T: Marshal>(sources: Vec<Source>) -> Self {
        Self {
            action: Action::Raise {
                kind: EventKind::of::<T>(),
                sources,
            },
        }
    }

    /// Code for one return site
    fn emit(&self, gen: &mut ILGenerator) -> Vec<Instruction> {
        match &self.action {
            Action::Code(code) => code.iter().map(|e| e.lower(gen)).collect(),
            Action::Raise { kind, sources } => {
                let mut code = Vec::new();
                for source in sources {
                    source.emit(gen, &mut code);
                }
                code.push(Instruction::injected(OpCode::NewEvent(*kind)));
                code.push(Instruction::injected(OpCode::Dispatch(*kind)));
                code
            }
        }
    }
}

impl Transpiler for Postfix {
    fn transpile(&self, body: &mut MethodBody, gen: &mut ILGenerator) -> Result<(), TranspileError> {
        if let Action::Raise { kind, sources } = &self.action {
            if kind.is_deniable() {
                return Err(TranspileError::Cancellable(kind.name()));
            }
            if sources.len() != kind.arity() {
                return Err(TranspileError::Arity {
                    event: kind.name(),
                    expected: kind.arity(),
                    found: sources.len(),
                });
            }
        }

        let returns = host_returns(body);
        if returns.is_empty() {
            return Err(TranspileError::NoReturn);
        }
        debug!(method = %body.name, returns = returns.len(), "adding postfix");
        // back to front so earlier indices stay valid
        for at in returns.into_iter().rev() {
            let code = self.emit(gen);
            insert(body, at, code);
        }
        Ok(())
    }

    fn raises(&self) -> Vec<EventKind> {
        match &self.action {
            Action::Code(_) => Vec::new(),
            Action::Raise { kind, .. } => vec![*kind],
        }
    }
}

/// Places stack-neutral code in front of the instruction at an anchor
#[derive(Debug, Clone)]
pub struct Inject {
    /// Insertion point
    anchor: Anchor,
    /// Injected code
    code: Vec<Emit>,
}

impl Inject {
    /// Injects `code` at `anchor`
    pub fn new(anchor: Anchor, code: Vec<Emit>) -> Self {
        Self { anchor, code }
    }
}

impl Transpiler for Inject {
    fn transpile(&self, body: &mut MethodBody, gen: &mut ILGenerator) -> Result<(), TranspileError> {
        let at = self.anchor.resolve(body)?;
        let code = self.code.iter().map(|e| e.lower(gen)).collect();
        insert(body, at, code);
        Ok(())
    }
}
