//! Per-state binding configuration

use luaport_vm::State;

/// How 64-bit integers are narrowed when they cross the boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Int64Mode {
    /// Reject values that would lose precision or overflow the target type
    #[default]
    Checked,
    /// Wrap or truncate silently
    Unchecked,
}

/// Options for the binding layer, stored per state
#[derive(Debug, Clone, Default)]
pub struct BindOptions {
    /// Integer narrowing policy, applied by both `get` and `opt`
    pub int64_mode: Int64Mode,
}

/// Install binding options on a state
pub fn configure(state: &State, options: BindOptions) {
    state.set_app_data(options);
}

pub(crate) fn bind_options(state: &State) -> BindOptions {
    state
        .app_data::<BindOptions>()
        .map(|o| (*o).clone())
        .unwrap_or_default()
}
