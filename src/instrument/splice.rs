//! Event splices

use tracing::debug;

use crate::event::{EventKind, Marshal};
use crate::il::{ILGenerator, Instruction, Label, MethodBody, OpCode, Slot};

use super::{host_returns, insert, load, store, Anchor, Source, TranspileError, Transpiler};

/// Where a denied event sends execution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deny {
    /// The method's final `ret`
    Return,
    /// The instruction at an anchor
    At(Anchor),
    /// The target of the branch at an anchor, e.g. a loop's continue label
    BranchTargetOf(Anchor),
}

/// Resolved deny target
enum Target {
    /// Host instruction that still needs a label
    Index(usize),
    /// Label already carried by the body
    Label(Label),
}

impl Deny {
    /// Resolves the deny target without touching the body
    fn target(&self, body: &MethodBody) -> Result<Target, TranspileError> {
        Ok(match self {
            Self::Return => Target::Index(*host_returns(body).last().ok_or(TranspileError::NoReturn)?),
            Self::At(anchor) => Target::Index(anchor.resolve(body)?),
            Self::BranchTargetOf(anchor) => {
                let index = anchor.resolve(body)?;
                Target::Label(
                    body.instructions[index]
                        .op
                        .branch_target()
                        .ok_or(TranspileError::NotABranch(index))?,
                )
            }
        })
    }
}

/// Raises an event at an anchor.
///
/// The injected code marshals the sources, constructs the event once, dispatches it, leaves
/// through the deny target when the allowed-flag came back off, and otherwise copies the
/// write-back fields into their slots:
///
/// ```text
///     <prelude copies>
///     <sources>
///     newevent K
///     dup
///     stloc ev
///     dispatch K
///     ldloc ev            # when a deny target is set
///     ldfld is_allowed
///     brfalse DENY
///     ldloc ev            # per write-back field
///     ldfld F
///     st{arg,loc} S
///     <epilogue copies>
/// ```
#[derive(Debug, Clone)]
pub struct Splice {
    /// Event raised
    kind: EventKind,
    /// Insertion point
    anchor: Anchor,
    /// Constructor parameters
    sources: Vec<Source>,
    /// Where denial sends execution
    deny: Option<Deny>,
    /// Fields copied back after dispatch
    write_back: Vec<(&'static str, Slot)>,
    /// Slot copies before the sources are marshaled
    prelude: Vec<(Slot, Slot)>,
    /// Slot copies after the write-back
    epilogue: Vec<(Slot, Slot)>,
}

impl Splice {
    /// Splice raising `T` in front of the instruction at `anchor`
    pub fn new<T: Marshal>(anchor: Anchor) -> Self {
        Self {
            kind: EventKind::of::<T>(),
            anchor,
            sources: Vec::new(),
            deny: None,
            write_back: Vec::new(),
            prelude: Vec::new(),
            epilogue: Vec::new(),
        }
    }

    /// Adds the next constructor parameter
    pub fn source(mut self, source: impl Into<Source>) -> Self {
        self.sources.push(source.into());
        self
    }

    /// Skips to `deny` when a subscriber denies the event
    pub fn deny(mut self, deny: Deny) -> Self {
        self.deny = Some(deny);
        self
    }

    /// Copies `field` into `slot` after dispatch
    pub fn write_back(mut self, field: &'static str, slot: Slot) -> Self {
        self.write_back.push((field, slot));
        self
    }

    /// Copies `from` into `to` before anything else runs
    pub fn prelude(mut self, from: Slot, to: Slot) -> Self {
        self.prelude.push((from, to));
        self
    }

    /// Copies `from` into `to` once the write-back is done
    pub fn epilogue(mut self, from: Slot, to: Slot) -> Self {
        self.epilogue.push((from, to));
        self
    }

    /// Rejects splices that cannot work for this event kind
    fn check(&self) -> Result<(), TranspileError> {
        let event = self.kind.name();
        if self.sources.len() != self.kind.arity() {
            return Err(TranspileError::Arity {
                event,
                expected: self.kind.arity(),
                found: self.sources.len(),
            });
        }
        if self.deny.is_some() && !self.kind.is_deniable() {
            return Err(TranspileError::NotDeniable(event));
        }
        for (field, _) in &self.write_back {
            let flag = *field == "is_allowed" && self.kind.is_deniable();
            if !flag && !self.kind.is_writable(field) {
                return Err(TranspileError::ReadOnlyField {
                    event,
                    field: *field,
                });
            }
        }
        Ok(())
    }
}

/// Copies between two slots
fn copy(gen: &mut ILGenerator, code: &mut Vec<Instruction>, (from, to): (Slot, Slot)) {
    code.push(Instruction::injected(load(gen, from)));
    code.push(Instruction::injected(store(gen, to)));
}

impl Transpiler for Splice {
    fn transpile(&self, body: &mut MethodBody, gen: &mut ILGenerator) -> Result<(), TranspileError> {
        self.check()?;
        let at = self.anchor.resolve(body)?;
        // a target on the anchor itself is labeled behind the splice, once it is inserted
        let mut behind = None;
        let deny = match &self.deny {
            None => None,
            Some(deny) => Some(match deny.target(body)? {
                Target::Label(label) if body.label_index(label) != Some(at) => label,
                Target::Label(_) => {
                    let label = gen.define_label();
                    behind = Some(label);
                    label
                }
                Target::Index(index) => {
                    let label = gen.define_label();
                    if index == at {
                        behind = Some(label);
                    } else {
                        body.instructions[index].labels.push(label);
                    }
                    label
                }
            }),
        };

        let mut code = Vec::new();
        for pair in &self.prelude {
            copy(gen, &mut code, *pair);
        }
        for source in &self.sources {
            source.emit(gen, &mut code);
        }

        let ev = gen.declare_local();
        code.extend(
            [
                OpCode::NewEvent(self.kind),
                OpCode::Dup,
                OpCode::StLoc(ev),
                OpCode::Dispatch(self.kind),
            ]
            .map(Instruction::injected),
        );
        if let Some(label) = deny {
            code.extend(
                [
                    OpCode::LdLoc(ev),
                    OpCode::LdField("is_allowed"),
                    OpCode::BrFalse(label),
                ]
                .map(Instruction::injected),
            );
        }
        for (field, slot) in &self.write_back {
            code.push(Instruction::injected(OpCode::LdLoc(ev)));
            code.push(Instruction::injected(OpCode::LdField(*field)));
            code.push(Instruction::injected(store(gen, *slot)));
        }
        for pair in &self.epilogue {
            copy(gen, &mut code, *pair);
        }

        debug!(
            method = %body.name,
            event = self.kind.name(),
            at,
            len = code.len(),
            "splicing event"
        );
        let len = code.len();
        insert(body, at, code);
        if let Some(label) = behind {
            body.instructions[at + len].labels.push(label);
        }
        Ok(())
    }

    fn raises(&self) -> Vec<EventKind> {
        vec![self.kind]
    }
}
