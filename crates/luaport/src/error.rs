//! Error types for the binding layer

use luaport_vm::LuaError;

/// Result type for binding operations
pub type Result<T> = std::result::Result<T, Error>;

/// Binding errors. Every variant surfaces in the VM as a catchable error
/// carrying the display text.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    /// Value or object of the wrong type
    #[error("{expected} expected, got {got}")]
    TypeMismatch {
        /// Expected type or class name
        expected: String,
        /// Actual type or class name
        got: String,
    },

    /// Object access on something that is not a userdata
    #[error("expect userdata, got {0}")]
    NotUserdata(String),

    /// Argument conversion failed
    #[error("bad argument #{index} ({message})")]
    BadArgument {
        /// Stack index of the argument
        index: i32,
        /// Conversion error text
        message: String,
    },

    /// The class has no metatable registered in this state
    #[error("unknown class (null metatable)")]
    UnknownClass,

    /// An object's metatable failed the signature check
    #[error("access '{0}' : metatable is invalid")]
    InvalidMetatable(String),

    /// Non-const member used through a const object
    #[error("class member function '{0}' can not be access by const object")]
    ConstViolation(String),

    /// Assignment to a read-only class member
    #[error("class member '{0}' is read-only")]
    ReadOnlyMember(String),

    /// Assignment to a read-only module variable
    #[error("'{0}' is read-only")]
    ReadOnlyVariable(String),

    /// Assignment to an unknown class member
    #[error("no writable class member '{0}'")]
    NoWritableMember(String),

    /// Assignment to an unknown module variable
    #[error("no writable variable '{0}'")]
    NoWritableVariable(String),

    /// Shared handle requested from an object that is not shared
    #[error("is not shared object")]
    NotShared,

    /// 64-bit integer that cannot be represented exactly as a float
    #[error("unsafe cast from 64-bit int")]
    UnsafeInt64,

    /// Integer outside the range of the target type
    #[error("number out of range")]
    OutOfRange,

    /// Float without an exact integer value
    #[error("number has no integer representation")]
    NotInteger,

    /// Object is already borrowed in a conflicting way
    #[error("object already borrowed: {0}")]
    Borrow(String),

    /// The object's payload was released by its finalizer
    #[error("attempt to use a destroyed object")]
    Destroyed,

    /// Nil where a reference is required
    #[error("nil passed to reference")]
    NilReference,

    /// A native callback panicked
    #[error("panic in native callback: {0}")]
    Panic(String),

    /// The owning state has been dropped
    #[error("state is closed")]
    StateClosed,

    /// Error raised by the VM or by a script-side callable
    #[error("{0}")]
    Runtime(String),
}

impl Error {
    /// Wrap an argument conversion failure
    pub fn bad_argument(index: i32, err: Error) -> Self {
        match err {
            Error::BadArgument { .. } => err,
            other => Error::BadArgument {
                index,
                message: other.to_string(),
            },
        }
    }

    pub(crate) fn mismatch(expected: impl Into<String>, got: impl Into<String>) -> Self {
        Error::TypeMismatch {
            expected: expected.into(),
            got: got.into(),
        }
    }
}

impl From<LuaError> for Error {
    fn from(e: LuaError) -> Self {
        match e {
            LuaError::Runtime(msg) => Error::Runtime(msg),
            LuaError::StackOverflow => Error::Runtime(e.to_string()),
            LuaError::Closed => Error::StateClosed,
        }
    }
}

impl From<Error> for LuaError {
    fn from(e: Error) -> Self {
        match e {
            Error::Runtime(msg) => LuaError::Runtime(msg),
            Error::StateClosed => LuaError::Closed,
            other => LuaError::Runtime(other.to_string()),
        }
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Runtime(s)
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Runtime(s.to_string())
    }
}
