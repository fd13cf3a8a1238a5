//! # Value
//!
//! Runtime values that live on the host's evaluation stack, in argument slots and in local slots

use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use thiserror::Error;

use crate::event::EventRef;

/// Errors when converting between runtime values and typed event fields
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValueError {
    /// The value has a different runtime type than the one requested
    #[error("expected a value of type {expected}, found {found}")]
    TypeMismatch {
        /// Type that was requested
        expected: &'static str,
        /// Type that was actually found
        found: &'static str,
    },
    /// Wrong number of constructor parameters were marshaled
    #[error("expected {expected} constructor parameters, found {found}")]
    Arity {
        /// Number of parameters the event kind declares
        expected: usize,
        /// Number of parameters that were supplied
        found: usize,
    },
    /// Integer value does not map onto the requested enum
    #[error("{value} is not a valid {target}")]
    OutOfRange {
        /// Enum being converted to
        target: &'static str,
        /// Offending value
        value: i64,
    },
}

/// Position in the world
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vector3 {
    /// X coordinate
    pub x: f32,
    /// Height
    pub y: f32,
    /// Z coordinate
    pub z: f32,
}
impl Vector3 {
    /// Creates a new vector
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}
impl fmt::Display for Vector3 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

/// Handle to a player object owned by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PlayerId(pub u32);

/// Handle to an item object owned by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemId(pub u32);

/// Constant operand embedded in an instruction.
///
/// Unlike [`Value`] this never holds live host objects, so method bodies stay `Send + Sync`.
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    /// `ldnull`
    Null,
    /// `ldc.b`
    Bool(bool),
    /// `ldc.i`
    Int(i64),
    /// `ldc.f`
    Float(f64),
    /// `ldstr`
    Str(String),
}
impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "ldnull"),
            Self::Bool(v) => write!(f, "ldc.b {v}"),
            Self::Int(v) => write!(f, "ldc.i {v}"),
            Self::Float(v) => write!(f, "ldc.f {v}"),
            Self::Str(v) => write!(f, "ldstr {v:?}"),
        }
    }
}

/// A value on the evaluation stack or in a slot
#[derive(Debug, Clone, Default)]
pub enum Value {
    /// Uninitialized slot or explicit null
    #[default]
    Null,
    /// Boolean
    Bool(bool),
    /// Integer
    Int(i64),
    /// Floating-point number
    Float(f64),
    /// Shared string
    Str(Arc<str>),
    /// Position
    Vector(Vector3),
    /// Player handle
    Player(PlayerId),
    /// Item handle
    Item(ItemId),
    /// Event object constructed by an instrumented call site
    Event(EventRef),
}

impl Value {
    /// Name of the runtime type, used in error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "string",
            Self::Vector(_) => "vector",
            Self::Player(_) => "player",
            Self::Item(_) => "item",
            Self::Event(_) => "event",
        }
    }

    /// Truthiness used by conditional branches: `false`, `0` and `null` are false
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Null => false,
            Self::Bool(b) => *b,
            Self::Int(i) => *i != 0,
            Self::Float(f) => *f != 0.0,
            _ => true,
        }
    }

    /// Extracts the event object held by this value
    pub fn as_event(&self) -> Result<&EventRef, ValueError> {
        match self {
            Self::Event(e) => Ok(e),
            other => Err(mismatch("event", other)),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a == b,
            (Self::Int(a), Self::Float(b)) | (Self::Float(b), Self::Int(a)) => (*a as f64) == *b,
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Vector(a), Self::Vector(b)) => a == b,
            (Self::Player(a), Self::Player(b)) => a == b,
            (Self::Item(a), Self::Item(b)) => a == b,
            (Self::Event(a), Self::Event(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Str(v) => write!(f, "{v:?}"),
            Self::Vector(v) => write!(f, "{v}"),
            Self::Player(p) => write!(f, "player#{}", p.0),
            Self::Item(i) => write!(f, "item#{}", i.0),
            Self::Event(e) => write!(f, "<{}>", e.borrow().name()),
        }
    }
}

impl From<Constant> for Value {
    fn from(c: Constant) -> Self {
        match c {
            Constant::Null => Self::Null,
            Constant::Bool(v) => Self::Bool(v),
            Constant::Int(v) => Self::Int(v),
            Constant::Float(v) => Self::Float(v),
            Constant::Str(v) => Self::Str(v.into()),
        }
    }
}

/// Builds a type mismatch error for `found`
pub(crate) fn mismatch(expected: &'static str, found: &Value) -> ValueError {
    ValueError::TypeMismatch {
        expected,
        found: found.type_name(),
    }
}

/// Implements the conversions between a Rust type and one [`Value`] variant
macro_rules! value_conversions {
    ($ty:ty, $variant:ident, $name:literal) => {
        impl From<$ty> for Value {
            fn from(v: $ty) -> Self {
                Self::$variant(v)
            }
        }
        impl TryFrom<Value> for $ty {
            type Error = ValueError;

            fn try_from(v: Value) -> Result<Self, Self::Error> {
                match v {
                    Value::$variant(v) => Ok(v),
                    other => Err(mismatch($name, &other)),
                }
            }
        }
    };
}

value_conversions!(bool, Bool, "bool");
value_conversions!(i64, Int, "int");
value_conversions!(Vector3, Vector, "vector");
value_conversions!(PlayerId, Player, "player");
value_conversions!(ItemId, Item, "item");

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}
impl TryFrom<Value> for f64 {
    type Error = ValueError;

    fn try_from(v: Value) -> Result<Self, Self::Error> {
        match v {
            Value::Float(v) => Ok(v),
            // host code frequently passes whole amounts as integers
            Value::Int(v) => Ok(v as f64),
            other => Err(mismatch("float", &other)),
        }
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Str(v.into())
    }
}
impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Str(v.into())
    }
}
impl TryFrom<Value> for String {
    type Error = ValueError;

    fn try_from(v: Value) -> Result<Self, Self::Error> {
        match v {
            Value::Str(v) => Ok(v.to_string()),
            other => Err(mismatch("string", &other)),
        }
    }
}
