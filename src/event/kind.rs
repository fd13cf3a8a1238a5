//! Type-erased event identity and the marshaling used by instrumented call sites

use std::any::{Any, TypeId};
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::vec;

use crate::il::{Value, ValueError};

use super::bus::{DispatchError, EventBus};
use super::EventArgs;

/// Event arguments that an instrumented call site can construct and read back.
///
/// Deniable kinds expose their allowed-flag as the `is_allowed` field.
pub trait Marshal: EventArgs + Sized {
    /// Constructor parameters, in the order the call site pushes them
    const PARAMS: &'static [&'static str];
    /// Fields the host accepts back after dispatch
    const WRITABLE: &'static [&'static str] = &[];
    /// Whether the kind carries an allowed-flag
    const DENIABLE: bool = false;

    /// Builds the event from marshaled values
    fn construct(params: Params) -> Result<Self, ValueError>;
    /// Reads a field by name
    fn read(&self, field: &str) -> Option<Value>;
}

/// Constructor parameters popped off the host stack
pub struct Params {
    /// Remaining values, in push order
    values: vec::IntoIter<Value>,
}
impl Params {
    /// Wraps `values`, checking them against the parameter list of `T`
    pub fn new<T: Marshal>(values: Vec<Value>) -> Result<Self, ValueError> {
        if values.len() != T::PARAMS.len() {
            return Err(ValueError::Arity {
                expected: T::PARAMS.len(),
                found: values.len(),
            });
        }
        Ok(Self {
            values: values.into_iter(),
        })
    }

    /// Takes the next parameter
    #[allow(clippy::should_implement_trait)]
    pub fn next<V>(&mut self) -> Result<V, ValueError>
    where
        V: TryFrom<Value, Error = ValueError>,
    {
        self.values.next().unwrap_or_default().try_into()
    }
}

/// Object-safe view of an event living on the host stack
pub trait DynEvent: fmt::Debug {
    /// Name of the event kind
    fn name(&self) -> &'static str;
    /// Reads a field by name
    fn read(&self, field: &str) -> Option<Value>;
    /// Runs every subscriber of this kind
    fn dispatch(&mut self, bus: &EventBus) -> Result<(), DispatchError>;
    /// Access to the concrete type
    fn as_any(&self) -> &dyn Any;
}

impl<T: Marshal> DynEvent for T {
    fn name(&self) -> &'static str {
        T::NAME
    }
    fn read(&self, field: &str) -> Option<Value> {
        Marshal::read(self, field)
    }
    fn dispatch(&mut self, bus: &EventBus) -> Result<(), DispatchError> {
        bus.dispatch(self)
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Shared handle to an event constructed by the interpreter
pub type EventRef = Rc<RefCell<dyn DynEvent>>;

/// Identity of an event kind together with its marshaling metadata
#[derive(Clone, Copy)]
pub struct EventKind {
    /// Name of the kind
    name: &'static str,
    /// Concrete argument type
    type_id: TypeId,
    /// Constructor parameters
    params: &'static [&'static str],
    /// Fields that may be written back
    writable: &'static [&'static str],
    /// Whether the kind carries an allowed-flag
    deniable: bool,
    /// Erased constructor
    construct: fn(Vec<Value>) -> Result<EventRef, ValueError>,
}

impl EventKind {
    /// Kind of the event arguments `T`
    pub fn of<T: Marshal>() -> Self {
        Self {
            name: T::NAME,
            type_id: TypeId::of::<T>(),
            params: T::PARAMS,
            writable: T::WRITABLE,
            deniable: T::DENIABLE,
            construct: construct_erased::<T>,
        }
    }

    /// Event name, e.g. `Teleporting`
    pub fn name(&self) -> &'static str {
        self.name
    }
    /// Type id of the event arguments
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }
    /// Constructor parameter names
    pub fn params(&self) -> &'static [&'static str] {
        self.params
    }
    /// Number of constructor parameters
    pub fn arity(&self) -> usize {
        self.params.len()
    }
    /// Whether `field` may be written back into the host frame
    pub fn is_writable(&self, field: &str) -> bool {
        self.writable.contains(&field)
    }
    /// Whether subscribers can deny the event
    pub fn is_deniable(&self) -> bool {
        self.deniable
    }
    /// Constructs an event from marshaled values
    pub fn construct(&self, values: Vec<Value>) -> Result<EventRef, ValueError> {
        (self.construct)(values)
    }
}

/// Monomorphized constructor stored in [`EventKind`]
fn construct_erased<T: Marshal>(values: Vec<Value>) -> Result<EventRef, ValueError> {
    let event: EventRef = Rc::new(RefCell::new(T::construct(Params::new::<T>(values)?)?));
    Ok(event)
}

impl PartialEq for EventKind {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id
    }
}
impl Eq for EventKind {}

impl fmt::Debug for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventKind")
            .field("name", &self.name)
            .field("params", &self.params)
            .field("deniable", &self.deniable)
            .finish()
    }
}
