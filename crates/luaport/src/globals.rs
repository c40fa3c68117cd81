//! Dotted-path access to global values (`"a.b.c"`)

use luaport_vm::State;

use crate::convert::{FromLua, ToLua};
use crate::error::Result;

/// Push the value at `path` below the globals table. A missing intermediate
/// step yields nil.
fn push_path(state: &State, path: &str) -> Result<()> {
    let mut steps = path.split('.');
    let first = steps.next().unwrap_or_default();
    state.get_global(first)?;
    for step in steps {
        if state.is_none_or_nil(-1) {
            return Ok(());
        }
        state.get_field(-1, step)?;
        state.remove(-2);
    }
    Ok(())
}

/// Read the global at a dotted path
pub fn get_global<V: FromLua>(state: &State, path: &str) -> Result<V> {
    let top = state.top();
    let result = push_path(state, path).and_then(|_| V::from_lua(state, -1));
    state.set_top(top);
    result
}

/// Write the global at a dotted path; every step but the last must exist
pub fn set_global<V: ToLua>(state: &State, path: &str, value: V) -> Result<()> {
    let top = state.top();
    let result = match path.rsplit_once('.') {
        None => value.push(state).and_then(|_| Ok(state.set_global(path)?)),
        Some((owner, key)) => push_path(state, owner).and_then(|_| {
            value.push(state)?;
            state.set_field(-2, key)?;
            Ok(())
        }),
    };
    state.set_top(top);
    result
}
