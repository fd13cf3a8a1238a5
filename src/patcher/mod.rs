//! # Patch
//!
//! This module covers patchers, which are used to replace and restore host method bodies

use thiserror::Error;

use crate::instrument::TranspileError;

pub mod body;
pub mod transpile;

pub use body::{BodyPatchGuard, BodyPatcher};
pub use transpile::TranspilePatcher;

/// Errors when patching a method
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PatchError {
    /// The method table has no method with this signature
    #[error("method {0} is not registered")]
    MissingTarget(String),
    /// Rewriting the body failed; nothing was installed
    #[error("failed to transpile {target}: {source}")]
    Transpile {
        /// Method signature
        target: String,
        /// Underlying failure
        source: TranspileError,
    },
}

/// All patchers save state from where they patched and are able to revert on-command
pub trait Patcher {
    /// Error type that can occur when patching
    type Error;
    /// What gets applied to the target
    type Patch: ?Sized;
    /// Guard type for the patcher. When this guard is dropped, the method should be restored.
    type Guard<'a>: PatchGuard + 'a
    where
        Self: 'a;

    /// Patches the method registered as `target`
    fn patch<'a>(&'a self, target: &str, patch: &Self::Patch)
        -> Result<Self::Guard<'a>, Self::Error>;
}

/// Guard for a patch
///
/// Guard must fully unpatch the method when dropped, even if `restore` is not called
pub trait PatchGuard: Sized {
    /// Restores the original body of a patch
    fn restore(self) {
        // most implementations have their functionality in their [`Drop::drop`] implementation
    }
}
