//! # Catalog
//!
//! This module covers the patch catalog: the fixed set of patch descriptors a framework owns,
//! and their `Unapplied -> Applied -> Unapplied` lifecycle. Applying is best-effort; a patch that
//! fails is logged and reported while the rest still go in.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::event::EventKind;
use crate::host::MethodTable;
use crate::instrument::Transpiler;
use crate::patcher::{BodyPatchGuard, PatchError, PatchGuard, Patcher, TranspilePatcher};

pub mod builtin;

/// Errors from single-entry catalog operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CatalogError {
    /// No entry has this id
    #[error("unknown patch {0}")]
    UnknownPatch(String),
    /// A later patch on the same method is still applied
    #[error("patch {id} is overlaid by {by}; revert {by} first")]
    Overlaid {
        /// Entry that was asked to revert
        id: &'static str,
        /// Entry applied on top of it
        by: &'static str,
    },
    /// Applying the entry failed
    #[error("patch {id}: {source}")]
    Patch {
        /// Entry that failed
        id: &'static str,
        /// Underlying failure
        source: PatchError,
    },
}

/// One patch: a target method and the transpilers applied to it, in order
pub struct PatchDescriptor {
    /// Unique id
    id: &'static str,
    /// Signature of the patched method
    target: &'static str,
    /// Transpilers, in application order
    pipeline: Vec<Box<dyn Transpiler>>,
}

impl PatchDescriptor {
    /// Creates an empty descriptor
    pub fn new(id: &'static str, target: &'static str) -> Self {
        Self {
            id,
            target,
            pipeline: Vec::new(),
        }
    }

    /// Appends a transpiler to the pipeline
    pub fn with(mut self, transpiler: impl Transpiler + 'static) -> Self {
        self.pipeline.push(Box::new(transpiler));
        self
    }

    /// Identifier used in config and reports
    pub fn id(&self) -> &'static str {
        self.id
    }

    /// Name of the patched host method
    pub fn target(&self) -> &'static str {
        self.target
    }

    /// Event kinds raised by the patched method
    pub fn raises(&self) -> Vec<EventKind> {
        let mut kinds: Vec<EventKind> = Vec::new();
        for kind in self.pipeline.iter().flat_map(|t| t.raises()) {
            if !kinds.contains(&kind) {
                kinds.push(kind);
            }
        }
        kinds
    }
}

impl fmt::Debug for PatchDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PatchDescriptor")
            .field("id", &self.id)
            .field("target", &self.target)
            .field("pipeline", &self.pipeline.len())
            .finish()
    }
}

/// State of one catalog entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchState {
    /// The target runs its unpatched body
    Unapplied,
    /// The entry's guard is held
    Applied,
}

/// Outcome of a batch activation
#[derive(Debug, Default)]
pub struct ActivationReport {
    /// Entries applied by this activation
    pub applied: Vec<&'static str>,
    /// Entries that were applied already and were left alone
    pub already_applied: Vec<&'static str>,
    /// Entries that failed, with the reason
    pub failed: Vec<(&'static str, PatchError)>,
}

impl ActivationReport {
    /// Whether no entry failed
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// The patch set of one framework and the guards of its applied entries
pub struct PatchCatalog {
    /// Patcher every entry goes through
    patcher: TranspilePatcher,
    /// Descriptors, in declaration order
    entries: Vec<PatchDescriptor>,
    /// Applied entries as (entry index, guard), in application order
    applied: Vec<(usize, BodyPatchGuard)>,
}

impl PatchCatalog {
    /// Builds a catalog over `methods`. Later entries with an id already seen are dropped.
    pub fn new(methods: Arc<MethodTable>, patches: Vec<PatchDescriptor>) -> Self {
        let mut entries: Vec<PatchDescriptor> = Vec::with_capacity(patches.len());
        for patch in patches {
            if entries.iter().any(|e| e.id == patch.id) {
                warn!(id = patch.id, "duplicate patch id, ignoring");
                continue;
            }
            entries.push(patch);
        }
        Self {
            patcher: TranspilePatcher::new(methods),
            entries,
            applied: Vec::new(),
        }
    }

    /// Entries in apply order
    pub fn entries(&self) -> &[PatchDescriptor] {
        &self.entries
    }

    /// Ids of the applied entries, in application order
    pub fn applied(&self) -> Vec<&'static str> {
        self.applied
            .iter()
            .map(|(index, _)| self.entries[*index].id)
            .collect()
    }

    /// State of entry `id`
    pub fn state(&self, id: &str) -> Result<PatchState, CatalogError> {
        let index = self.index(id)?;
        Ok(if self.is_applied(index) {
            PatchState::Applied
        } else {
            PatchState::Unapplied
        })
    }

    /// Applies entry `id`. Returns `false` if it was applied already.
    pub fn apply(&mut self, id: &str) -> Result<bool, CatalogError> {
        let index = self.index(id)?;
        if self.is_applied(index) {
            return Ok(false);
        }
        self.apply_index(index)
            .map(|_| true)
            .map_err(|source| CatalogError::Patch {
                id: self.entries[index].id,
                source,
            })
    }

    /// Reverts entry `id`. Returns `false` if it was not applied.
    ///
    /// Refused while another entry applied after it patches the same method, since restoring
    /// this entry's original body would throw the later patch away.
    pub fn revert(&mut self, id: &str) -> Result<bool, CatalogError> {
        let index = self.index(id)?;
        let Some(position) = self.applied.iter().position(|(i, _)| *i == index) else {
            return Ok(false);
        };
        let target = self.entries[index].target;
        if let Some((later, _)) = self.applied[position + 1..]
            .iter()
            .find(|(i, _)| self.entries[*i].target == target)
        {
            return Err(CatalogError::Overlaid {
                id: self.entries[index].id,
                by: self.entries[*later].id,
            });
        }
        let (_, guard) = self.applied.remove(position);
        guard.restore();
        info!(id = self.entries[index].id, "reverted patch");
        Ok(true)
    }

    /// Applies every entry, best-effort
    pub fn apply_all(&mut self) -> ActivationReport {
        self.apply_where(|_| true)
    }

    /// Applies the entries raising `kind`
    pub fn apply_for_event(&mut self, kind: EventKind) -> ActivationReport {
        self.apply_where(|entry| entry.raises().contains(&kind))
    }

    /// Applies every entry matching `filter`, in declaration order
    pub fn apply_where<F>(&mut self, filter: F) -> ActivationReport
    where
        F: Fn(&PatchDescriptor) -> bool,
    {
        let mut report = ActivationReport::default();
        for index in 0..self.entries.len() {
            let id = self.entries[index].id;
            if !filter(&self.entries[index]) {
                continue;
            }
            if self.is_applied(index) {
                report.already_applied.push(id);
                continue;
            }
            match self.apply_index(index) {
                Ok(()) => report.applied.push(id),
                Err(e) => {
                    warn!(id, error = %e, "failed to apply patch");
                    report.failed.push((id, e));
                }
            }
        }
        info!(
            applied = report.applied.len(),
            already_applied = report.already_applied.len(),
            failed = report.failed.len(),
            "patching complete"
        );
        report
    }

    /// Reverts every applied entry, most recent first. Returns how many were reverted.
    pub fn revert_all(&mut self) -> usize {
        let count = self.applied.len();
        while let Some((index, guard)) = self.applied.pop() {
            guard.restore();
            debug!(id = self.entries[index].id, "reverted patch");
        }
        if count > 0 {
            info!(count, "reverted patches");
        }
        count
    }

    /// Index of entry `id`
    fn index(&self, id: &str) -> Result<usize, CatalogError> {
        self.entries
            .iter()
            .position(|e| e.id == id)
            .ok_or_else(|| CatalogError::UnknownPatch(id.to_string()))
    }

    fn is_applied(&self, index: usize) -> bool {
        self.applied.iter().any(|(i, _)| *i == index)
    }

    /// Runs the pipeline of entry `index` and records the guard
    fn apply_index(&mut self, index: usize) -> Result<(), PatchError> {
        let entry = &self.entries[index];
        let guard = self.patcher.patch(entry.target, &entry.pipeline)?;
        debug!(id = entry.id, method = entry.target, "applied patch");
        self.applied.push((index, guard));
        Ok(())
    }
}

impl fmt::Debug for PatchCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PatchCatalog")
            .field("entries", &self.entries)
            .field("applied", &self.applied())
            .finish()
    }
}

impl Drop for PatchCatalog {
    fn drop(&mut self) {
        self.revert_all();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::event::player::{HurtEventArgs, HurtingEventArgs, TeleportingEventArgs};
    use crate::event::EventKind;
    use crate::host::testing;
    use crate::il::{OpCode, Slot};
    use crate::instrument::{Anchor, Deny, Emit, Inject, Postfix, Splice};

    use super::{CatalogError, PatchCatalog, PatchDescriptor, PatchState};

    const TELEPORT: &str = "PlayerMovement::teleport";

    fn teleporting(id: &'static str) -> PatchDescriptor {
        PatchDescriptor::new(id, TELEPORT).with(
            Splice::new::<TeleportingEventArgs>(Anchor::start())
                .source(Slot::Arg(0))
                .source(Slot::Arg(1))
                .source(true)
                .deny(Deny::Return),
        )
    }

    fn nop(id: &'static str) -> PatchDescriptor {
        PatchDescriptor::new(id, TELEPORT)
            .with(Inject::new(Anchor::start(), vec![Emit::Op(OpCode::Nop)]))
    }

    #[test]
    /// Test the lifecycle of a single entry
    fn test_apply_revert() {
        let methods = testing::methods();
        let original = methods.get(TELEPORT).unwrap();
        let mut catalog = PatchCatalog::new(methods.clone(), vec![teleporting("teleporting")]);

        assert_eq!(catalog.state("teleporting"), Ok(PatchState::Unapplied));
        assert_eq!(catalog.apply("teleporting"), Ok(true));
        assert_eq!(catalog.apply("teleporting"), Ok(false));
        assert_eq!(catalog.state("teleporting"), Ok(PatchState::Applied));
        assert_eq!(catalog.applied(), vec!["teleporting"]);

        assert_eq!(catalog.revert("teleporting"), Ok(true));
        assert_eq!(catalog.revert("teleporting"), Ok(false));
        assert!(Arc::ptr_eq(&methods.get(TELEPORT).unwrap(), &original));

        assert_eq!(
            catalog.apply("nope"),
            Err(CatalogError::UnknownPatch("nope".to_string()))
        );
    }

    #[test]
    /// Two entries on one method revert in reverse order only
    fn test_overlaid() {
        let methods = testing::methods();
        let original = methods.get(TELEPORT).unwrap();
        let mut catalog = PatchCatalog::new(methods.clone(), vec![teleporting("first"), nop("second")]);

        assert!(catalog.apply_all().is_complete());
        assert_eq!(
            catalog.revert("first"),
            Err(CatalogError::Overlaid {
                id: "first",
                by: "second"
            })
        );
        assert_eq!(catalog.state("first"), Ok(PatchState::Applied));

        assert_eq!(catalog.revert("second"), Ok(true));
        assert_eq!(catalog.revert("first"), Ok(true));
        assert!(Arc::ptr_eq(&methods.get(TELEPORT).unwrap(), &original));
    }

    #[test]
    fn test_apply_for_event() {
        let methods = testing::methods();
        let mut catalog = PatchCatalog::new(
            methods,
            vec![
                teleporting("teleporting"),
                PatchDescriptor::new("hurt", "PlayerStats::damage").with(
                    Postfix::raise::<HurtEventArgs>(vec![
                        Slot::Arg(0).into(),
                        Slot::Arg(1).into(),
                    ]),
                ),
            ],
        );

        let report = catalog.apply_for_event(EventKind::of::<HurtingEventArgs>());
        assert!(report.applied.is_empty());

        let report = catalog.apply_for_event(EventKind::of::<HurtEventArgs>());
        assert_eq!(report.applied, vec!["hurt"]);
        assert_eq!(catalog.state("teleporting"), Ok(PatchState::Unapplied));

        let report = catalog.apply_for_event(EventKind::of::<HurtEventArgs>());
        assert_eq!(report.already_applied, vec!["hurt"]);
    }

    #[test]
    /// Later entries reusing an id are dropped; dropping the catalog reverts everything
    fn test_duplicates_and_drop() {
        let methods = testing::methods();
        let original = methods.get(TELEPORT).unwrap();
        let mut catalog =
            PatchCatalog::new(methods.clone(), vec![teleporting("dup"), nop("dup")]);
        assert_eq!(catalog.entries().len(), 1);
        assert_eq!(
            catalog.entries()[0].raises(),
            vec![EventKind::of::<TeleportingEventArgs>()]
        );

        catalog.apply_all();
        assert!(!Arc::ptr_eq(&methods.get(TELEPORT).unwrap(), &original));
        drop(catalog);
        assert!(Arc::ptr_eq(&methods.get(TELEPORT).unwrap(), &original));
    }
}
