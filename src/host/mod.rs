//! # Host
//!
//! This module covers the boundary to the host process: the [`Host`] trait its natives are reached
//! through, and the [`MethodTable`] every call is resolved through. Patching a method means
//! swapping its entry in the table; calls already in flight keep the body they started with.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use thiserror::Error;

use crate::il::{MethodBody, Value, ValueError};

pub mod interp;
#[cfg(test)]
pub(crate) mod testing;

pub use interp::{ExecError, Runtime};

/// Errors raised by host natives
#[derive(Debug, Error)]
pub enum HostError {
    /// The host has no native with this signature
    #[error("unknown native {0}")]
    UnknownNative(String),
    /// A native received an argument of the wrong type
    #[error("bad argument to {method}: {source}")]
    BadArgument {
        /// Native signature
        method: String,
        /// Conversion failure
        source: ValueError,
    },
    /// A native failed for a host-specific reason
    #[error("{method} failed: {message}")]
    Native {
        /// Native signature
        method: String,
        /// Host-supplied description
        message: String,
    },
}

/// The host process, as seen from interpreted method bodies
pub trait Host {
    /// Calls the native `method` with `args`. Returns `None` for natives without a return value.
    fn call(&mut self, method: &str, args: Vec<Value>) -> Result<Option<Value>, HostError>;
}

/// Method bodies by signature.
///
/// Bodies are immutable once registered; patching installs a new body instead of editing one.
#[derive(Debug, Default)]
pub struct MethodTable {
    /// Current body of every registered method
    bodies: RwLock<HashMap<String, Arc<MethodBody>>>,
}

impl MethodTable {
    /// Creates an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `body` under its own name, returning the body it replaced
    pub fn register(&self, body: MethodBody) -> Option<Arc<MethodBody>> {
        self.bodies
            .write()
            .unwrap()
            .insert(body.name.clone(), Arc::new(body))
    }

    /// Current body of `name`
    pub fn get(&self, name: &str) -> Option<Arc<MethodBody>> {
        self.bodies.read().unwrap().get(name).cloned()
    }

    /// Whether `name` is registered
    pub fn contains(&self, name: &str) -> bool {
        self.bodies.read().unwrap().contains_key(name)
    }

    /// Registered signatures, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.bodies.read().unwrap().keys().cloned().collect();
        names.sort();
        names
    }

    /// Replaces the body of an already registered method and returns the previous one.
    ///
    /// Returns `None`, and installs nothing, when `name` is not registered.
    pub fn swap(&self, name: &str, body: Arc<MethodBody>) -> Option<Arc<MethodBody>> {
        let mut bodies = self.bodies.write().unwrap();
        let slot = bodies.get_mut(name)?;
        Some(std::mem::replace(slot, body))
    }

    /// Installs `body` only if the current body of `name` is `current`
    pub fn compare_and_swap(
        &self,
        name: &str,
        current: &Arc<MethodBody>,
        body: Arc<MethodBody>,
    ) -> bool {
        let mut bodies = self.bodies.write().unwrap();
        match bodies.get_mut(name) {
            Some(slot) if Arc::ptr_eq(slot, current) => {
                *slot = body;
                true
            }
            _ => false,
        }
    }
}
