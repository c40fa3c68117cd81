//! Native functions and functor objects as VM values

use std::fmt;
use std::rc::Rc;

use luaport_vm::{NativeFn, State, REGISTRY_INDEX};

use super::ToLua;
use crate::error::Result;
use crate::invoke::protect;

/// A native function ready to be pushed as a VM function value
#[derive(Clone)]
pub struct LuaFunction(NativeFn);

impl LuaFunction {
    /// Wrap a raw stack-level function. Errors and panics are converted into
    /// VM errors.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&State) -> Result<i32> + 'static,
    {
        Self(Rc::new(move |state: &State| protect(|| f(state))))
    }

    pub(crate) fn from_native(f: NativeFn) -> Self {
        Self(f)
    }

    /// Push as a closure over the `upvalues` values on top of the stack
    pub(crate) fn push_with_upvalues(self, state: &State, upvalues: i32) {
        state.push_native(self.0, upvalues);
    }
}

impl fmt::Debug for LuaFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("LuaFunction")
    }
}

impl ToLua for LuaFunction {
    fn push(self, state: &State) -> Result<()> {
        state.push_native(self.0, 0);
        Ok(())
    }
}

/// A callable object. The VM sees a userdata with a `__call` metamethod;
/// arguments start at index 2 because index 1 holds the functor itself.
pub trait Functor: 'static {
    fn call(&self, state: &State) -> Result<i32>;
}

struct FunctorBox(Box<dyn Functor>);

const FUNCTOR_META: &str = "luaport.functor";

/// Push a functor, sharing one metatable per state
pub fn push_functor<F: Functor>(state: &State, functor: F) -> Result<()> {
    state.new_userdata(Rc::new(FunctorBox(Box::new(functor))));
    state.raw_get_field(REGISTRY_INDEX, FUNCTOR_META)?;
    if !state.is_table(-1) {
        state.pop(1);
        state.new_table();
        LuaFunction::new(call_functor).push(state)?;
        state.raw_set_field(-2, "__call")?;
        LuaFunction::new(drop_functor).push(state)?;
        state.raw_set_field(-2, "__gc")?;
        state.push_value(-1);
        state.raw_set_field(REGISTRY_INDEX, FUNCTOR_META)?;
    }
    state.set_metatable(-2)?;
    Ok(())
}

fn call_functor(state: &State) -> Result<i32> {
    let payload = state
        .to_userdata(1)
        .and_then(|p| p.downcast::<FunctorBox>().ok())
        .ok_or_else(|| crate::Error::mismatch("functor", state.type_name(1)))?;
    payload.0.call(state)
}

fn drop_functor(state: &State) -> Result<i32> {
    drop(state.take_userdata(1));
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct Adder(i64);

    impl Functor for Adder {
        fn call(&self, state: &State) -> Result<i32> {
            let n = state.to_integer(2).unwrap_or(0);
            state.push_integer(self.0 + n);
            Ok(1)
        }
    }

    #[test]
    fn test_function_errors_become_vm_errors() {
        let l = State::new();
        LuaFunction::new(|_| Err(crate::Error::NotShared)).push(&l).unwrap();
        let err = l.pcall(0, 0).unwrap_err();
        assert_eq!(err.message(), "is not shared object");
    }

    #[test]
    fn test_functor_call_and_drop() {
        struct Tracked(Rc<Cell<bool>>);
        impl Functor for Tracked {
            fn call(&self, _state: &State) -> Result<i32> {
                Ok(0)
            }
        }
        impl Drop for Tracked {
            fn drop(&mut self) {
                self.0.set(true);
            }
        }

        let l = State::new();
        push_functor(&l, Adder(10)).unwrap();
        l.push_integer(5);
        l.pcall(1, 1).unwrap();
        assert_eq!(l.to_integer(-1), Some(15));
        l.pop(1);

        let dropped = Rc::new(Cell::new(false));
        push_functor(&l, Tracked(dropped.clone())).unwrap();
        l.pop(1);
        l.gc_collect();
        assert!(dropped.get());
    }
}
