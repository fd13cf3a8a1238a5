//! Interpreter for host method bodies

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tracing::trace;

use crate::event::{DispatchError, EventBus};
use crate::il::value::mismatch;
use crate::il::{Label, MethodBody, OpCode, Slot, Value, ValueError};

use super::{Host, HostError, MethodTable};

/// Errors while executing a method body
#[derive(Debug, Error)]
pub enum ExecError {
    /// Neither the method table nor the caller knows the method
    #[error("unknown method {0}")]
    UnknownMethod(String),
    /// A method was invoked with the wrong number of arguments
    #[error("{method} takes {expected} arguments, got {found}")]
    Arity {
        /// Method signature
        method: String,
        /// Declared parameter count
        expected: u16,
        /// Arguments supplied
        found: usize,
    },
    /// An instruction popped an empty stack
    #[error("{method}: stack underflow at instruction {index}")]
    StackUnderflow {
        /// Method signature
        method: String,
        /// Instruction index
        index: usize,
    },
    /// A slot operand is outside the frame
    #[error("{method}: {slot:?} is out of range")]
    BadSlot {
        /// Method signature
        method: String,
        /// Offending slot
        slot: Slot,
    },
    /// A branch targets a label the body does not define
    #[error("{method}: label {label} is not defined")]
    UnresolvedLabel {
        /// Method signature
        method: String,
        /// Missing label
        label: Label,
    },
    /// Execution ran past the last instruction
    #[error("{0}: execution fell off the end of the method")]
    FellOffEnd(String),
    /// An event was asked for a field it does not have
    #[error("event {event} has no field {field}")]
    UnknownField {
        /// Event kind name
        event: &'static str,
        /// Requested field
        field: &'static str,
    },
    /// Operand or marshaled value had the wrong type
    #[error(transparent)]
    Value(#[from] ValueError),
    /// A host native failed
    #[error(transparent)]
    Host(#[from] HostError),
    /// A subscriber failed while an instrumented site dispatched its event
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

/// Executes method bodies against a [`Host`], resolving calls through a [`MethodTable`] and
/// dispatching instrumented events on an [`EventBus`]
#[derive(Debug, Clone)]
pub struct Runtime {
    /// Methods calls are resolved through
    methods: Arc<MethodTable>,
    /// Bus instrumented sites dispatch on
    bus: Arc<EventBus>,
}

impl Runtime {
    /// Creates a runtime over `methods` and `bus`
    pub fn new(methods: Arc<MethodTable>, bus: Arc<EventBus>) -> Self {
        Self { methods, bus }
    }

    /// Table the bodies are looked up in
    pub fn methods(&self) -> &Arc<MethodTable> {
        &self.methods
    }

    /// Bus `dispatch` runs subscribers from
    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// Invokes the registered method `name`.
    ///
    /// The body is snapshotted when the call starts, so patching the method while the call runs
    /// only affects later calls.
    pub fn invoke(
        &self,
        host: &mut dyn Host,
        name: &str,
        args: Vec<Value>,
    ) -> Result<Option<Value>, ExecError> {
        let body = self
            .methods
            .get(name)
            .ok_or_else(|| ExecError::UnknownMethod(name.to_string()))?;
        self.execute(host, &body, args)
    }

    /// Runs one body to completion
    fn execute(
        &self,
        host: &mut dyn Host,
        body: &MethodBody,
        args: Vec<Value>,
    ) -> Result<Option<Value>, ExecError> {
        if args.len() != body.params as usize {
            return Err(ExecError::Arity {
                method: body.name.clone(),
                expected: body.params,
                found: args.len(),
            });
        }
        trace!(method = %body.name, "invoke");

        let labels: HashMap<Label, usize> = body
            .instructions
            .iter()
            .enumerate()
            .flat_map(|(index, instr)| instr.labels.iter().map(move |label| (*label, index)))
            .collect();
        let mut frame = Frame {
            body,
            args,
            locals: vec![Value::Null; body.locals as usize],
            stack: Vec::new(),
            index: 0,
        };

        while let Some(instr) = body.instructions.get(frame.index) {
            let mut next = frame.index + 1;
            match &instr.op {
                OpCode::Nop => {}
                OpCode::LdArg(i) => {
                    let v = frame.slot(Slot::Arg(*i))?.clone();
                    frame.stack.push(v);
                }
                OpCode::StArg(i) => {
                    let v = frame.pop()?;
                    *frame.slot(Slot::Arg(*i))? = v;
                }
                OpCode::LdLoc(i) => {
                    let v = frame.slot(Slot::Local(*i))?.clone();
                    frame.stack.push(v);
                }
                OpCode::StLoc(i) => {
                    let v = frame.pop()?;
                    *frame.slot(Slot::Local(*i))? = v;
                }
                OpCode::Ld(c) => frame.stack.push(c.clone().into()),
                OpCode::Dup => {
                    let v = frame.pop()?;
                    frame.stack.push(v.clone());
                    frame.stack.push(v);
                }
                OpCode::Pop => {
                    frame.pop()?;
                }
                OpCode::Add | OpCode::Sub | OpCode::Mul => {
                    let (a, b) = frame.pop2()?;
                    frame.stack.push(arithmetic(&instr.op, a, b)?);
                }
                OpCode::Ceq => {
                    let (a, b) = frame.pop2()?;
                    frame.stack.push(Value::Bool(a == b));
                }
                OpCode::Clt | OpCode::Cgt => {
                    let (a, b) = frame.pop2()?;
                    let wanted = match instr.op {
                        OpCode::Clt => Ordering::Less,
                        _ => Ordering::Greater,
                    };
                    frame.stack.push(Value::Bool(compare(&a, &b)? == wanted));
                }
                OpCode::Not => {
                    let v = frame.pop()?;
                    frame.stack.push(Value::Bool(!v.is_truthy()));
                }
                OpCode::Br(label) => next = frame.target(&labels, *label)?,
                OpCode::BrTrue(label) => {
                    if frame.pop()?.is_truthy() {
                        next = frame.target(&labels, *label)?;
                    }
                }
                OpCode::BrFalse(label) => {
                    if !frame.pop()?.is_truthy() {
                        next = frame.target(&labels, *label)?;
                    }
                }
                OpCode::Call(method) => {
                    let args = frame.pop_n(method.argc as usize)?;
                    let result = match self.methods.get(&method.name) {
                        Some(callee) => self.execute(host, &callee, args)?,
                        None => host.call(&method.name, args)?,
                    };
                    if method.returns {
                        frame.stack.push(result.unwrap_or_default());
                    }
                }
                OpCode::NewEvent(kind) => {
                    let params = frame.pop_n(kind.arity())?;
                    frame.stack.push(Value::Event(kind.construct(params)?));
                }
                OpCode::Dispatch(_) => {
                    let event = frame.pop()?;
                    let event = event.as_event()?;
                    event.borrow_mut().dispatch(&self.bus)?;
                }
                OpCode::LdField(field) => {
                    let event = frame.pop()?;
                    let event = event.as_event()?.borrow();
                    let v = event.read(field).ok_or(ExecError::UnknownField {
                        event: event.name(),
                        field: *field,
                    })?;
                    frame.stack.push(v);
                }
                OpCode::Ret => {
                    return if body.returns {
                        frame.pop().map(Some)
                    } else {
                        Ok(None)
                    };
                }
            }
            frame.index = next;
        }

        Err(ExecError::FellOffEnd(body.name.clone()))
    }
}

/// Activation record of one call
struct Frame<'a> {
    /// Body being executed
    body: &'a MethodBody,
    /// Argument slots
    args: Vec<Value>,
    /// Local slots
    locals: Vec<Value>,
    /// Evaluation stack
    stack: Vec<Value>,
    /// Index of the current instruction
    index: usize,
}

impl Frame<'_> {
    /// Pops one value
    fn pop(&mut self) -> Result<Value, ExecError> {
        self.stack.pop().ok_or_else(|| ExecError::StackUnderflow {
            method: self.body.name.clone(),
            index: self.index,
        })
    }

    /// Pops two values, returned in push order
    fn pop2(&mut self) -> Result<(Value, Value), ExecError> {
        let b = self.pop()?;
        let a = self.pop()?;
        Ok((a, b))
    }

    /// Pops `n` values, returned in push order
    fn pop_n(&mut self, n: usize) -> Result<Vec<Value>, ExecError> {
        let at = self
            .stack
            .len()
            .checked_sub(n)
            .ok_or_else(|| ExecError::StackUnderflow {
                method: self.body.name.clone(),
                index: self.index,
            })?;
        Ok(self.stack.split_off(at))
    }

    /// Argument or local slot
    fn slot(&mut self, slot: Slot) -> Result<&mut Value, ExecError> {
        let value = match slot {
            Slot::Arg(i) => self.args.get_mut(i as usize),
            Slot::Local(i) => self.locals.get_mut(i as usize),
            Slot::Scratch(_) => None,
        };
        value.ok_or_else(|| ExecError::BadSlot {
            method: self.body.name.clone(),
            slot,
        })
    }

    /// Instruction index of a branch target
    fn target(&self, labels: &HashMap<Label, usize>, label: Label) -> Result<usize, ExecError> {
        labels
            .get(&label)
            .copied()
            .ok_or_else(|| ExecError::UnresolvedLabel {
                method: self.body.name.clone(),
                label,
            })
    }
}

/// `add`, `sub` and `mul`. Integers stay integers, mixed operands widen to floats and `add`
/// concatenates strings.
fn arithmetic(op: &OpCode, a: Value, b: Value) -> Result<Value, ValueError> {
    Ok(match (op, a, b) {
        (OpCode::Add, Value::Str(a), Value::Str(b)) => Value::from(format!("{a}{b}")),
        (_, Value::Int(a), Value::Int(b)) => Value::Int(match op {
            OpCode::Add => a.wrapping_add(b),
            OpCode::Sub => a.wrapping_sub(b),
            _ => a.wrapping_mul(b),
        }),
        (_, a, b) => {
            let (a, b) = (number(&a)?, number(&b)?);
            Value::Float(match op {
                OpCode::Add => a + b,
                OpCode::Sub => a - b,
                _ => a * b,
            })
        }
    })
}

/// Numeric ordering for `clt` and `cgt`
fn compare(a: &Value, b: &Value) -> Result<Ordering, ValueError> {
    if let (Value::Int(a), Value::Int(b)) = (a, b) {
        return Ok(a.cmp(b));
    }
    let (a, b) = (number(a)?, number(b)?);
    Ok(a.partial_cmp(&b).unwrap_or(Ordering::Equal))
}

/// Numeric operand as a float
fn number(v: &Value) -> Result<f64, ValueError> {
    match v {
        Value::Int(i) => Ok(*i as f64),
        Value::Float(f) => Ok(*f),
        other => Err(mismatch("number", other)),
    }
}
