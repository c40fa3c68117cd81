//! State configuration

/// Options for creating a [`State`](crate::State)
#[derive(Debug, Clone)]
pub struct StateOptions {
    /// Maximum nesting of native calls before `StackOverflow`
    pub max_call_depth: usize,

    /// Maximum number of live stack slots before `StackOverflow`
    pub max_stack: usize,

    /// Push integers as the integer subtype. When false every integer is
    /// pushed as a float, like a VM built without 64-bit integers.
    pub integer_subtype: bool,
}

impl Default for StateOptions {
    fn default() -> Self {
        Self {
            max_call_depth: 200,
            max_stack: 1_000_000,
            integer_subtype: true,
        }
    }
}
