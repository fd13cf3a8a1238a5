//! This module contains a body patcher

use std::sync::Arc;

use tracing::{debug, warn};

use crate::host::MethodTable;
use crate::il::MethodBody;

use super::{PatchError, PatchGuard, Patcher};

/// Patcher for replacing a method body wholesale.
/// The only failure is a target that is not registered.
#[derive(Debug, Clone)]
pub struct BodyPatcher {
    /// Table the bodies are swapped in
    methods: Arc<MethodTable>,
}
impl BodyPatcher {
    /// Creates a new [`BodyPatcher`]
    pub fn new(methods: Arc<MethodTable>) -> Self {
        Self { methods }
    }

    /// Table the bodies are swapped in
    pub fn methods(&self) -> &Arc<MethodTable> {
        &self.methods
    }
}
impl Patcher for BodyPatcher {
    type Error = PatchError;
    type Patch = MethodBody;
    type Guard<'a> = BodyPatchGuard;

    fn patch<'a>(
        &'a self,
        target: &str,
        patch: &MethodBody,
    ) -> Result<Self::Guard<'a>, Self::Error> {
        BodyPatchGuard::patch(self.methods.clone(), target, patch.clone())
    }
}

/// Guard for body patches
///
/// See [`BodyPatcher`].
#[derive(Debug)]
pub struct BodyPatchGuard {
    /// Table the body was installed in
    methods: Arc<MethodTable>,
    /// Signature of the patched method
    target: String,
    /// Body that was installed
    installed: Arc<MethodBody>,
    /// Body that was replaced. Taken on restore.
    original: Option<Arc<MethodBody>>,
}
impl BodyPatchGuard {
    /// Installs `body` as `target`, returning a guard for unpatching
    pub(super) fn patch(
        methods: Arc<MethodTable>,
        target: &str,
        body: MethodBody,
    ) -> Result<Self, PatchError> {
        let installed = Arc::new(body);
        let original = methods
            .swap(target, installed.clone())
            .ok_or_else(|| PatchError::MissingTarget(target.to_string()))?;
        debug!(method = target, "installed patched body");

        Ok(Self {
            methods,
            target: target.to_string(),
            installed,
            original: Some(original),
        })
    }

    /// Signature of the patched method
    pub fn target(&self) -> &str {
        &self.target
    }

    /// The body this guard installed
    pub fn installed(&self) -> &Arc<MethodBody> {
        &self.installed
    }
}
impl PatchGuard for BodyPatchGuard {}
impl Drop for BodyPatchGuard {
    fn drop(&mut self) {
        let Some(original) = self.original.take() else {
            return;
        };
        // something else was installed on top of us; putting the original back would drop it
        if self
            .methods
            .compare_and_swap(&self.target, &self.installed, original)
        {
            debug!(method = %self.target, "restored original body");
        } else {
            warn!(method = %self.target, "patched body was replaced, leaving it in place");
        }
    }
}
