//! # Event
//!
//! This module covers event arguments: the records handed to subscribers when a host operation is
//! about to happen (or just happened). Cancellable kinds implement [`Deniable`]; the instrumented
//! call site reads the allowed-flag back after dispatch and skips the gated effect when it is off.

use std::fmt::Debug;

pub mod bus;
pub mod kind;
pub mod player;
pub mod scp914;
pub mod warhead;

pub use bus::{DispatchError, EventBus, Handler, SubscriberError, SubscriberErrorPolicy};
pub use kind::{DynEvent, EventKind, EventRef, Marshal, Params};

/// Arguments of one event kind
pub trait EventArgs: Debug + 'static {
    /// Name of the event kind, used in logs and errors
    const NAME: &'static str;
}

/// Event arguments that subscribers can deny
pub trait Deniable: EventArgs {
    /// Whether the host operation may go ahead
    fn is_allowed(&self) -> bool;
    /// Sets the allowed-flag
    fn set_allowed(&mut self, allowed: bool);
    /// Shorthand for `set_allowed(false)`
    fn deny(&mut self) {
        self.set_allowed(false);
    }
}

/// Implements [`Deniable`] on top of an `is_allowed: bool` field
macro_rules! impl_deniable {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl $crate::event::Deniable for $ty {
                fn is_allowed(&self) -> bool {
                    self.is_allowed
                }
                fn set_allowed(&mut self, allowed: bool) {
                    self.is_allowed = allowed;
                }
            }
        )+
    };
}
pub(crate) use impl_deniable;
