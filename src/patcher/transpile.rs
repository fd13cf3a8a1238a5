//! This module contains a patcher that rewrites a method through a transpiler pipeline

use std::sync::Arc;

use tracing::trace;

use crate::host::MethodTable;
use crate::il::verify::verify;
use crate::il::ILGenerator;
use crate::instrument::{TranspileError, Transpiler};

use super::body::BodyPatchGuard;
use super::{PatchError, Patcher};

/// Wrapper for patching methods through an ordered list of transpilers
///
/// The pipeline runs over a copy of the method's current body, so patches stack on top of each
/// other. The result is verified before it is installed; a failing transpiler or verification
/// leaves the method untouched.
#[derive(Debug, Clone)]
pub struct TranspilePatcher {
    /// Table the bodies are read from and swapped in
    methods: Arc<MethodTable>,
}
impl TranspilePatcher {
    /// Creates a new [`TranspilePatcher`]
    pub fn new(methods: Arc<MethodTable>) -> Self {
        Self { methods }
    }

    /// Table the bodies are read from and swapped in
    pub fn methods(&self) -> &Arc<MethodTable> {
        &self.methods
    }
}

impl Patcher for TranspilePatcher {
    type Error = PatchError;
    type Patch = [Box<dyn Transpiler>];
    type Guard<'a> = BodyPatchGuard;

    fn patch<'a>(
        &'a self,
        target: &str,
        pipeline: &[Box<dyn Transpiler>],
    ) -> Result<Self::Guard<'a>, Self::Error> {
        let current = self
            .methods
            .get(target)
            .ok_or_else(|| PatchError::MissingTarget(target.to_string()))?;
        let failed = |source: TranspileError| PatchError::Transpile {
            target: target.to_string(),
            source,
        };

        let mut body = (*current).clone();
        let mut gen = ILGenerator::for_body(&body);
        for transpiler in pipeline {
            transpiler.transpile(&mut body, &mut gen).map_err(failed)?;
        }
        gen.finish(&mut body);
        verify(&body).map_err(|e| failed(e.into()))?;
        trace!("patched body:\n{body}");

        BodyPatchGuard::patch(self.methods.clone(), target, body)
    }
}
