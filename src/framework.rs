//! # Framework
//!
//! The entry point for embedders: one [`Framework`] owns the event bus, the host's method table
//! and the patch catalog, and switches the catalog on and off as a whole.

use std::sync::Arc;

use tracing::{debug, info};

use crate::catalog::{builtin, ActivationReport, PatchCatalog, PatchDescriptor};
use crate::config::FrameworkConfig;
use crate::event::{DispatchError, EventArgs, EventBus, EventKind, Handler, Marshal};
use crate::host::{MethodTable, Runtime};

/// Event framework attached to one host
#[derive(Debug)]
pub struct Framework {
    /// Settings the framework was created with
    config: FrameworkConfig,
    /// Bus every instrumented call site dispatches to
    bus: Arc<EventBus>,
    /// Host methods the catalog patches
    methods: Arc<MethodTable>,
    /// Patch set and its per-entry state
    catalog: PatchCatalog,
    /// Whether [`Framework::enable`] ran since the last [`Framework::disable`]
    enabled: bool,
}

impl Framework {
    /// Creates a framework over `methods` with the built-in patch set
    pub fn new(config: FrameworkConfig, methods: Arc<MethodTable>) -> Self {
        let patches = builtin::patches(&config);
        Self::with_patches(config, methods, patches)
    }

    /// Creates a framework over `methods` with a custom patch set.
    ///
    /// Patches listed in `disabled_patches` are left out of the catalog.
    pub fn with_patches(
        config: FrameworkConfig,
        methods: Arc<MethodTable>,
        patches: Vec<PatchDescriptor>,
    ) -> Self {
        let patches = patches
            .into_iter()
            .filter(|patch| {
                let disabled = config.is_disabled(patch.id());
                if disabled {
                    debug!(id = patch.id(), "patch disabled by config");
                }
                !disabled
            })
            .collect();
        let bus = Arc::new(EventBus::new(config.subscriber_errors));
        let catalog = PatchCatalog::new(methods.clone(), patches);

        Self {
            config,
            bus,
            methods,
            catalog,
            enabled: false,
        }
    }

    /// Applies the catalog.
    ///
    /// With dynamic patching on, only patches raising no events or events that already have
    /// subscribers are applied; the rest follow as their events gain subscribers.
    pub fn enable(&mut self) -> ActivationReport {
        self.enabled = true;
        info!(dynamic = self.config.dynamic_patching, "enabling framework");
        if !self.config.dynamic_patching {
            return self.catalog.apply_all();
        }

        let bus = &self.bus;
        self.catalog.apply_where(|entry| {
            let raises = entry.raises();
            raises.is_empty() || raises.iter().any(|kind| bus.has_subscribers(kind.type_id()))
        })
    }

    /// Reverts every patch and drops every subscription. Returns how many patches were reverted.
    pub fn disable(&mut self) -> usize {
        let reverted = self.catalog.revert_all();
        self.bus.clear();
        self.enabled = false;
        info!(reverted, "disabled framework");
        reverted
    }

    /// Whether the catalog is switched on
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Subscribes `handler`. With dynamic patching on, patches raising `T` are applied now.
    pub fn subscribe<T: Marshal>(&mut self, handler: Handler<T>) -> Option<ActivationReport> {
        self.bus.subscribe(handler);
        if self.enabled && self.config.dynamic_patching {
            Some(self.catalog.apply_for_event(EventKind::of::<T>()))
        } else {
            None
        }
    }

    /// Unsubscribes `handler`. Patches stay applied.
    pub fn unsubscribe<T: EventArgs>(&self, handler: &Handler<T>) -> bool {
        self.bus.unsubscribe(handler)
    }

    /// Dispatches an event raised from Rust code rather than from a patched call site
    pub fn dispatch<T: EventArgs>(&self, ev: &mut T) -> Result<(), DispatchError> {
        self.bus.dispatch(ev)
    }

    /// Interpreter running host methods against this framework's bus
    pub fn runtime(&self) -> Runtime {
        Runtime::new(self.methods.clone(), self.bus.clone())
    }

    /// Settings the framework was created with
    pub fn config(&self) -> &FrameworkConfig {
        &self.config
    }

    /// Bus the patched call sites dispatch to.
    ///
    /// Handlers subscribed here directly do not trigger dynamic patching; use
    /// [`Framework::subscribe`] so the patches raising their event get applied.
    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// Host method table
    pub fn methods(&self) -> &Arc<MethodTable> {
        &self.methods
    }

    /// Patch catalog
    pub fn catalog(&self) -> &PatchCatalog {
        &self.catalog
    }

    /// Patch catalog, for applying or reverting single entries
    pub fn catalog_mut(&mut self) -> &mut PatchCatalog {
        &mut self.catalog
    }
}
