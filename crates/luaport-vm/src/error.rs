//! Error types raised by the VM

/// Result type for VM operations
pub type LuaResult<T> = Result<T, LuaError>;

/// Errors that unwind through native calls up to the nearest protected call
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LuaError {
    /// Error raised by a native function or by a VM operation
    #[error("{0}")]
    Runtime(String),

    /// Call depth or stack size limit reached
    #[error("stack overflow")]
    StackOverflow,

    /// The state has been dropped
    #[error("state is closed")]
    Closed,
}

impl LuaError {
    /// Build a runtime error from a message
    pub fn runtime(msg: impl Into<String>) -> Self {
        LuaError::Runtime(msg.into())
    }

    /// The error message as raised
    pub fn message(&self) -> String {
        self.to_string()
    }
}

impl From<String> for LuaError {
    fn from(s: String) -> Self {
        LuaError::Runtime(s)
    }
}

impl From<&str> for LuaError {
    fn from(s: &str) -> Self {
        LuaError::Runtime(s.to_string())
    }
}
