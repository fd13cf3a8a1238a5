//! # Verify
//!
//! Stack-depth and label verification for method bodies. Patched bodies are verified before they
//! are installed so a bad splice is reported as a patch failure instead of corrupting a host call.

use std::collections::HashMap;

use thiserror::Error;

use super::{Label, MethodBody, OpCode, Slot};

/// Errors found while verifying a body
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VerifyError {
    /// The body has no instructions
    #[error("method body is empty")]
    Empty,
    /// A label is attached to more than one instruction
    #[error("label {0} is attached to more than one instruction")]
    DuplicateLabel(Label),
    /// A branch targets a label that is not attached to any instruction
    #[error("instruction {index}: branch target {label} does not exist")]
    UnresolvedLabel {
        /// Instruction index
        index: usize,
        /// Missing label
        label: Label,
    },
    /// An argument or local index is outside the frame
    #[error("instruction {index}: {slot:?} is out of range")]
    SlotOutOfRange {
        /// Instruction index
        index: usize,
        /// Offending slot
        slot: Slot,
    },
    /// An instruction pops more values than are on the stack
    #[error("instruction {index}: pops {pops} values with only {depth} on the stack")]
    StackUnderflow {
        /// Instruction index
        index: usize,
        /// Depth before the instruction
        depth: usize,
        /// Values the instruction pops
        pops: usize,
    },
    /// Two paths reach the same instruction with different stack depths
    #[error("instruction {index}: reached with stack depth {found}, expected {expected}")]
    DepthMismatch {
        /// Instruction index
        index: usize,
        /// Depth recorded first
        expected: usize,
        /// Depth of the conflicting path
        found: usize,
    },
    /// `ret` executed with the wrong number of values on the stack
    #[error("instruction {index}: ret with stack depth {depth}, expected {expected}")]
    BadReturn {
        /// Instruction index
        index: usize,
        /// Depth at the `ret`
        depth: usize,
        /// 1 for methods returning a value, 0 otherwise
        expected: usize,
    },
    /// Execution can run past the last instruction
    #[error("execution falls off the end of the method")]
    FallsOffEnd,
}

/// Stack depth before each instruction; `None` for unreachable instructions
pub type StackMap = Vec<Option<usize>>;

/// Verifies `body` and returns the stack depth before every reachable instruction
pub fn verify(body: &MethodBody) -> Result<StackMap, VerifyError> {
    let instrs = &body.instructions;
    if instrs.is_empty() {
        return Err(VerifyError::Empty);
    }

    let mut targets = HashMap::new();
    for (index, instr) in instrs.iter().enumerate() {
        for label in &instr.labels {
            if targets.insert(*label, index).is_some() {
                return Err(VerifyError::DuplicateLabel(*label));
            }
        }
    }

    for (index, instr) in instrs.iter().enumerate() {
        check_slots(body, index, &instr.op)?;
    }

    let mut depths: StackMap = vec![None; instrs.len()];
    let mut work = vec![(0usize, 0usize)];
    depths[0] = Some(0);

    while let Some((index, depth)) = work.pop() {
        let op = &instrs[index].op;

        if let OpCode::Ret = op {
            let expected = body.returns as usize;
            if depth != expected {
                return Err(VerifyError::BadReturn {
                    index,
                    depth,
                    expected,
                });
            }
            continue;
        }

        let (pops, pushes) = op.stack_effect();
        if depth < pops {
            return Err(VerifyError::StackUnderflow { index, depth, pops });
        }
        let after = depth - pops + pushes;

        let mut successors = Vec::with_capacity(2);
        if let Some(label) = op.branch_target() {
            let target = *targets
                .get(&label)
                .ok_or(VerifyError::UnresolvedLabel { index, label })?;
            successors.push(target);
        }
        if !op.ends_block() {
            if index + 1 == instrs.len() {
                return Err(VerifyError::FallsOffEnd);
            }
            successors.push(index + 1);
        }

        for next in successors {
            match depths[next] {
                None => {
                    depths[next] = Some(after);
                    work.push((next, after));
                }
                Some(expected) if expected != after => {
                    return Err(VerifyError::DepthMismatch {
                        index: next,
                        expected,
                        found: after,
                    })
                }
                Some(_) => {}
            }
        }
    }

    Ok(depths)
}

/// Checks that slot operands fit the frame
fn check_slots(body: &MethodBody, index: usize, op: &OpCode) -> Result<(), VerifyError> {
    let (slot, in_range) = match *op {
        OpCode::LdArg(i) | OpCode::StArg(i) => (Slot::Arg(i), i < body.params),
        OpCode::LdLoc(i) | OpCode::StLoc(i) => (Slot::Local(i), i < body.locals),
        _ => return Ok(()),
    };
    if in_range {
        Ok(())
    } else {
        Err(VerifyError::SlotOutOfRange { index, slot })
    }
}
