//! Allocates labels and locals while a body is being rewritten

use std::collections::HashMap;

use super::{Label, MethodBody};

/// Label and local allocator for one transpile pipeline.
///
/// Every transpiler applied to the same body shares one generator, so a named scratch local
/// declared by an earlier splice can be read back by a later one.
#[derive(Debug)]
pub struct ILGenerator {
    /// Next free label id
    next_label: u32,
    /// Number of locals including the ones declared here
    locals: u16,
    /// Named scratch locals
    scratch: HashMap<&'static str, u16>,
}

impl ILGenerator {
    /// Creates a generator that continues after the labels and locals already used by `body`
    pub fn for_body(body: &MethodBody) -> Self {
        let next_label = body
            .instructions
            .iter()
            .flat_map(|i| i.labels.iter().copied().chain(i.op.branch_target()))
            .map(|l| l.0 + 1)
            .max()
            .unwrap_or(0);
        Self {
            next_label,
            locals: body.locals,
            scratch: HashMap::new(),
        }
    }

    /// Defines a fresh label
    pub fn define_label(&mut self) -> Label {
        let label = Label(self.next_label);
        self.next_label += 1;
        label
    }

    /// Declares a fresh local and returns its index
    pub fn declare_local(&mut self) -> u16 {
        let index = self.locals;
        self.locals += 1;
        index
    }

    /// Returns the local backing the scratch slot `name`, declaring it on first use
    pub fn scratch(&mut self, name: &'static str) -> u16 {
        if let Some(index) = self.scratch.get(name) {
            return *index;
        }
        let index = self.declare_local();
        self.scratch.insert(name, index);
        index
    }

    /// Number of locals the rewritten body needs
    pub fn local_count(&self) -> u16 {
        self.locals
    }

    /// Writes the local count back into `body`
    pub fn finish(self, body: &mut MethodBody) {
        body.locals = self.locals;
    }
}
