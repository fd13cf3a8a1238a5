//! # Assembler
//!
//! Assembles textual method listings into [`MethodBody`] values. The syntax is the one produced by
//! the [`Display`](std::fmt::Display) impl of [`MethodBody`], so a disassembled host body can be
//! fed straight back in:
//!
//! ```text
//! .method PlayerMovement::teleport params 2 locals 0 void
//!     ldarg.0
//!     ldarg.1
//!     call Player::set_position 2 void
//! END:
//!     ret
//! ```
//!
//! Event opcodes (`newevent`, `dispatch`, `ldfld`) only exist in patched bodies and are rejected.

use std::collections::HashMap;
use std::mem;

use lazy_static::lazy_static;
use thiserror::Error;

use super::{Constant, Instruction, Label, MethodBody, MethodRef, OpCode};

/// Errors while assembling a listing
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AsmError {
    /// The listing has no `.method` header
    #[error("listing does not start with a .method header")]
    MissingHeader,
    /// The `.method` header is malformed
    #[error("line {0}: malformed .method header")]
    BadHeader(usize),
    /// Unknown instruction mnemonic
    #[error("line {line}: unknown mnemonic `{mnemonic}`")]
    UnknownMnemonic {
        /// Source line
        line: usize,
        /// Mnemonic as written
        mnemonic: String,
    },
    /// Mnemonic only produced by patches
    #[error("line {line}: `{mnemonic}` cannot be assembled from text")]
    NotAssemblable {
        /// Source line
        line: usize,
        /// Mnemonic as written
        mnemonic: String,
    },
    /// Missing or malformed operand
    #[error("line {line}: bad operand for `{mnemonic}`")]
    BadOperand {
        /// Source line
        line: usize,
        /// Mnemonic the operand belongs to
        mnemonic: String,
    },
    /// A label was defined twice
    #[error("line {line}: label `{label}` defined twice")]
    DuplicateLabel {
        /// Source line
        line: usize,
        /// Label name
        label: String,
    },
    /// A branch refers to a label that is never defined
    #[error("label `{0}` is never defined")]
    UndefinedLabel(String),
    /// Labels at the end of the listing have no instruction to attach to
    #[error("label `{0}` is not followed by an instruction")]
    DanglingLabel(String),
}

/// Instruction mnemonics understood by the assembler
#[allow(clippy::missing_docs_in_private_items)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mnemonic {
    Nop,
    LdArg,
    StArg,
    LdLoc,
    StLoc,
    LdcI,
    LdcF,
    LdcB,
    LdStr,
    LdNull,
    Dup,
    Pop,
    Add,
    Sub,
    Mul,
    Ceq,
    Clt,
    Cgt,
    Not,
    Br,
    BrTrue,
    BrFalse,
    Call,
    Ret,
    /// Event opcodes, rejected
    Patched,
}

lazy_static! {
    /// Mnemonic lookup table
    static ref MNEMONICS: HashMap<&'static str, Mnemonic> = {
        use Mnemonic::*;
        [
            ("nop", Nop),
            ("ldarg", LdArg),
            ("starg", StArg),
            ("ldloc", LdLoc),
            ("stloc", StLoc),
            ("ldc.i", LdcI),
            ("ldc.f", LdcF),
            ("ldc.b", LdcB),
            ("ldstr", LdStr),
            ("ldnull", LdNull),
            ("dup", Dup),
            ("pop", Pop),
            ("add", Add),
            ("sub", Sub),
            ("mul", Mul),
            ("ceq", Ceq),
            ("clt", Clt),
            ("cgt", Cgt),
            ("not", Not),
            ("br", Br),
            ("brtrue", BrTrue),
            ("brfalse", BrFalse),
            ("call", Call),
            ("ret", Ret),
            ("newevent", Patched),
            ("dispatch", Patched),
            ("ldfld", Patched),
        ]
        .into_iter()
        .collect()
    };
}

/// Maps label names to label ids and tracks which ones are defined
#[derive(Default)]
struct LabelTable {
    /// Name to label
    ids: HashMap<String, Label>,
    /// Names that have been attached to an instruction
    defined: Vec<String>,
}
impl LabelTable {
    /// Returns the label for `name`, allocating one on first use
    fn get(&mut self, name: &str) -> Label {
        let next = Label(self.ids.len() as u32);
        *self.ids.entry(name.to_string()).or_insert(next)
    }

    /// Defines `name` at the current position
    fn define(&mut self, line: usize, name: &str) -> Result<Label, AsmError> {
        if self.defined.iter().any(|d| d == name) {
            return Err(AsmError::DuplicateLabel {
                line,
                label: name.to_string(),
            });
        }
        self.defined.push(name.to_string());
        Ok(self.get(name))
    }

    /// Ensures every referenced label was defined
    fn check(&self) -> Result<(), AsmError> {
        let mut names: Vec<_> = self.ids.keys().collect();
        names.sort();
        match names.into_iter().find(|n| !self.defined.contains(n)) {
            Some(name) => Err(AsmError::UndefinedLabel(name.clone())),
            None => Ok(()),
        }
    }
}

/// Assembles a full method listing
pub fn assemble(source: &str) -> Result<MethodBody, AsmError> {
    let mut lines = source
        .lines()
        .enumerate()
        .map(|(n, l)| (n + 1, strip_comment(l).trim()))
        .filter(|(_, l)| !l.is_empty());

    let (line, header) = lines.next().ok_or(AsmError::MissingHeader)?;
    let mut body = parse_header(line, header)?;

    let mut labels = LabelTable::default();
    let mut pending = Vec::new();
    let mut pending_names = Vec::new();

    for (line, text) in lines {
        let (injected, mut rest) = match text.strip_prefix('+') {
            Some(rest) => (true, rest.trim_start()),
            None => (false, text),
        };

        while let Some((name, tail)) = split_label(rest) {
            pending.push(labels.define(line, name)?);
            pending_names.push(name.to_string());
            rest = tail.trim_start();
        }
        if rest.is_empty() {
            continue;
        }

        let mut instr = Instruction::new(parse_op(line, rest, &mut labels)?);
        instr.injected = injected;
        instr.labels = mem::take(&mut pending);
        pending_names.clear();
        body.instructions.push(instr);
    }

    if let Some(name) = pending_names.into_iter().next() {
        return Err(AsmError::DanglingLabel(name));
    }
    labels.check()?;

    Ok(body)
}

/// Removes a trailing `#` comment, ignoring `#` inside string literals
fn strip_comment(line: &str) -> &str {
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in line.char_indices() {
        match c {
            '\\' if in_string => {
                escaped = !escaped;
                continue;
            }
            '"' if !escaped => in_string = !in_string,
            '#' if !in_string => return &line[..i],
            _ => {}
        }
        escaped = false;
    }
    line
}

/// Splits `NAME: rest` into the label name and the remainder
fn split_label(text: &str) -> Option<(&str, &str)> {
    let token = text.split_whitespace().next()?;
    let name = token.strip_suffix(':')?;
    if name.is_empty() || name.contains(':') {
        return None;
    }
    Some((name, &text[token.len()..]))
}

/// Parses `.method NAME params N locals N ret|void`
fn parse_header(line: usize, text: &str) -> Result<MethodBody, AsmError> {
    let parts: Vec<_> = text.split_whitespace().collect();
    match parts.as_slice() {
        [".method", name, "params", params, "locals", locals, kind] => {
            let params = params.parse().map_err(|_| AsmError::BadHeader(line))?;
            let locals = locals.parse().map_err(|_| AsmError::BadHeader(line))?;
            let returns = match *kind {
                "ret" => true,
                "void" => false,
                _ => return Err(AsmError::BadHeader(line)),
            };
            Ok(MethodBody::new(*name, params, locals, returns))
        }
        [".method", ..] => Err(AsmError::BadHeader(line)),
        _ => Err(AsmError::MissingHeader),
    }
}

/// Looks up a mnemonic, accepting the `ldarg.0` shorthand for `ldarg 0`
fn lookup(token: &str) -> Option<(Mnemonic, Option<&str>)> {
    if let Some(m) = MNEMONICS.get(token) {
        return Some((*m, None));
    }
    let (head, index) = token.rsplit_once('.')?;
    match MNEMONICS.get(head)? {
        m @ (Mnemonic::LdArg | Mnemonic::StArg | Mnemonic::LdLoc | Mnemonic::StLoc) => {
            Some((*m, Some(index)))
        }
        _ => None,
    }
}

/// Parses one instruction
fn parse_op(line: usize, text: &str, labels: &mut LabelTable) -> Result<OpCode, AsmError> {
    let (token, rest) = match text.split_once(char::is_whitespace) {
        Some((token, rest)) => (token, rest.trim()),
        None => (text, ""),
    };
    let (mnemonic, inline) = lookup(token).ok_or_else(|| AsmError::UnknownMnemonic {
        line,
        mnemonic: token.to_string(),
    })?;
    let operand = inline.unwrap_or(rest);
    let bad = || AsmError::BadOperand {
        line,
        mnemonic: token.to_string(),
    };
    let index = || operand.parse::<u16>().map_err(|_| bad());
    let label = |labels: &mut LabelTable| {
        if operand.is_empty() || operand.contains(char::is_whitespace) {
            Err(bad())
        } else {
            Ok(labels.get(operand))
        }
    };

    use Mnemonic as M;
    Ok(match mnemonic {
        M::Nop => OpCode::Nop,
        M::LdArg => OpCode::LdArg(index()?),
        M::StArg => OpCode::StArg(index()?),
        M::LdLoc => OpCode::LdLoc(index()?),
        M::StLoc => OpCode::StLoc(index()?),
        M::LdcI => OpCode::Ld(Constant::Int(operand.parse().map_err(|_| bad())?)),
        M::LdcF => OpCode::Ld(Constant::Float(operand.parse().map_err(|_| bad())?)),
        M::LdcB => OpCode::Ld(Constant::Bool(operand.parse().map_err(|_| bad())?)),
        M::LdStr => OpCode::Ld(Constant::Str(parse_string(operand).ok_or_else(|| bad())?)),
        M::LdNull => OpCode::Ld(Constant::Null),
        M::Dup => OpCode::Dup,
        M::Pop => OpCode::Pop,
        M::Add => OpCode::Add,
        M::Sub => OpCode::Sub,
        M::Mul => OpCode::Mul,
        M::Ceq => OpCode::Ceq,
        M::Clt => OpCode::Clt,
        M::Cgt => OpCode::Cgt,
        M::Not => OpCode::Not,
        M::Br => OpCode::Br(label(labels)?),
        M::BrTrue => OpCode::BrTrue(label(labels)?),
        M::BrFalse => OpCode::BrFalse(label(labels)?),
        M::Call => {
            let parts: Vec<_> = operand.split_whitespace().collect();
            let [name, argc, kind] = parts.as_slice() else {
                return Err(bad());
            };
            let argc = argc.parse().map_err(|_| bad())?;
            match *kind {
                "ret" => OpCode::Call(MethodRef::returning(*name, argc)),
                "void" => OpCode::Call(MethodRef::void(*name, argc)),
                _ => return Err(bad()),
            }
        }
        M::Ret => OpCode::Ret,
        M::Patched => {
            return Err(AsmError::NotAssemblable {
                line,
                mnemonic: token.to_string(),
            })
        }
    })
}

/// Parses a string operand, either quoted with `\"`/`\\` escapes or bare
fn parse_string(operand: &str) -> Option<String> {
    let Some(inner) = operand.strip_prefix('"') else {
        return (!operand.is_empty()).then(|| operand.to_string());
    };
    let inner = inner.strip_suffix('"')?;
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next()? {
                'n' => out.push('\n'),
                other => out.push(other),
            }
        } else {
            out.push(c);
        }
    }
    Some(out)
}
