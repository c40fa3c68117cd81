//! Owned references to VM values
//!
//! A [`LuaRef`] pins one value in the registry for as long as it lives.
//! Cloning registers another handle to the same value. The reference only
//! holds a weak handle to its state: once the state is dropped every
//! operation fails with [`Error::StateClosed`].

use std::fmt;
use std::rc::{Rc, Weak};

use luaport_vm::{CompareOp, State, Type, NO_REF, REF_NIL, REGISTRY_INDEX};

use crate::args::{ArgList, ArgsSpec, Plain};
use crate::convert::{FromLua, FromLuaMulti, ToLua, ToLuaMulti};
use crate::error::{Error, Result};
use crate::invoke::{function, Callable};

pub struct LuaRef {
    state: Weak<State>,
    handle: i32,
}

impl LuaRef {
    /// Pop the top value into a new reference
    pub fn pop(state: &State) -> LuaRef {
        let handle = state.reference();
        LuaRef {
            state: state.weak(),
            handle,
        }
    }

    /// Reference the value at `index` without popping it
    pub fn from_stack(state: &State, index: i32) -> LuaRef {
        state.push_value(index);
        Self::pop(state)
    }

    pub fn from_value<V: ToLua>(state: &State, value: V) -> Result<LuaRef> {
        value.push(state)?;
        Ok(Self::pop(state))
    }

    pub fn nil(state: &State) -> LuaRef {
        LuaRef {
            state: state.weak(),
            handle: REF_NIL,
        }
    }

    pub fn globals(state: &State) -> LuaRef {
        state.push_globals();
        Self::pop(state)
    }

    pub fn registry(state: &State) -> LuaRef {
        state.push_value(REGISTRY_INDEX);
        Self::pop(state)
    }

    pub fn create_table(state: &State) -> LuaRef {
        Self::create_table_with(state, 0, 0)
    }

    pub fn create_table_with(state: &State, narr: usize, nrec: usize) -> LuaRef {
        state.create_table(narr, nrec);
        Self::pop(state)
    }

    /// A light userdata holding `p`
    pub fn from_pointer(state: &State, p: usize) -> LuaRef {
        state.push_light_userdata(p);
        Self::pop(state)
    }

    /// Wrap a Rust callable as a VM function
    pub fn create_function<F, A, R>(state: &State, f: F) -> Result<LuaRef>
    where
        F: Callable<A, R>,
        A: ArgList,
        Plain: ArgsSpec<A>,
        R: ToLuaMulti,
    {
        Self::from_value(state, function(f))
    }

    /// The owning state
    pub fn state(&self) -> Result<Rc<State>> {
        self.state.upgrade().ok_or(Error::StateClosed)
    }

    /// True while the state is alive and the handle refers to something
    pub fn is_valid(&self) -> bool {
        self.handle != NO_REF && self.state.strong_count() > 0
    }

    /// Run `f` with the referenced value pushed, restoring the stack after
    fn with_value<T>(&self, f: impl FnOnce(&State) -> Result<T>) -> Result<T> {
        let state = self.state()?;
        let top = state.top();
        state.push_reference(self.handle);
        let result = f(&state);
        state.set_top(top);
        result
    }

    pub fn type_of(&self) -> Type {
        self.with_value(|l| Ok(l.type_of(-1))).unwrap_or(Type::None)
    }

    pub fn type_name(&self) -> &'static str {
        self.type_of().name()
    }

    pub fn is_nil(&self) -> bool {
        matches!(self.type_of(), Type::Nil | Type::None)
    }

    pub fn is_table(&self) -> bool {
        self.type_of() == Type::Table
    }

    pub fn is_function(&self) -> bool {
        self.type_of() == Type::Function
    }

    pub fn is_userdata(&self) -> bool {
        matches!(self.type_of(), Type::Userdata | Type::LightUserdata)
    }

    pub fn check_table(&self) -> Result<()> {
        match self.type_of() {
            Type::Table => Ok(()),
            t => Err(Error::mismatch("table", t.name())),
        }
    }

    /// `self[key]`, honoring `__index`
    pub fn get<K: ToLua, V: FromLua>(&self, key: K) -> Result<V> {
        self.with_value(|l| {
            key.push(l)?;
            l.get_table(-2)?;
            V::from_lua(l, -1)
        })
    }

    /// `self[key]`, or `default` when nil
    pub fn get_or<K: ToLua, V: FromLua>(&self, key: K, default: V) -> Result<V> {
        self.with_value(|l| {
            key.push(l)?;
            l.get_table(-2)?;
            V::opt(l, -1, default)
        })
    }

    /// `self[key] = value`, honoring `__newindex`
    pub fn set<K: ToLua, V: ToLua>(&self, key: K, value: V) -> Result<()> {
        self.with_value(|l| {
            key.push(l)?;
            value.push(l)?;
            l.set_table(-3)?;
            Ok(())
        })
    }

    pub fn raw_get<K: ToLua, V: FromLua>(&self, key: K) -> Result<V> {
        self.with_value(|l| {
            key.push(l)?;
            l.raw_get(-2)?;
            V::from_lua(l, -1)
        })
    }

    pub fn raw_set<K: ToLua, V: ToLua>(&self, key: K, value: V) -> Result<()> {
        self.with_value(|l| {
            key.push(l)?;
            value.push(l)?;
            l.raw_set(-3)?;
            Ok(())
        })
    }

    /// Raw access keyed by a light userdata
    pub fn raw_get_p<V: FromLua>(&self, p: usize) -> Result<V> {
        self.with_value(|l| {
            l.raw_get_p(-1, p)?;
            V::from_lua(l, -1)
        })
    }

    pub fn raw_set_p<V: ToLua>(&self, p: usize, value: V) -> Result<()> {
        self.with_value(|l| {
            value.push(l)?;
            l.raw_set_p(-2, p)?;
            Ok(())
        })
    }

    /// True when `self[key]` is not nil
    pub fn has<K: ToLua>(&self, key: K) -> Result<bool> {
        self.with_value(|l| {
            key.push(l)?;
            Ok(l.get_table(-2)? != Type::Nil)
        })
    }

    pub fn remove<K: ToLua>(&self, key: K) -> Result<()> {
        self.set(key, None::<bool>)
    }

    /// Length, honoring `__len`
    pub fn len(&self) -> Result<i64> {
        self.with_value(|l| {
            l.len(-1)?;
            i64::from_lua(l, -1)
        })
    }

    pub fn raw_len(&self) -> usize {
        self.with_value(|l| Ok(l.raw_len(-1))).unwrap_or(0)
    }

    /// Call the value with `args`, converting the results to `R`
    pub fn call<A: ToLuaMulti, R: FromLuaMulti>(&self, args: A) -> Result<R> {
        self.with_value(|l| {
            let func = l.top();
            let nargs = args.push_multi(l)?;
            l.pcall(nargs, R::COUNT)?;
            R::from_lua_multi(l, func)
        })
    }

    pub fn metatable(&self) -> Result<Option<LuaRef>> {
        self.with_value(|l| {
            if l.get_metatable(-1) {
                Ok(Some(LuaRef::pop(l)))
            } else {
                Ok(None)
            }
        })
    }

    pub fn set_metatable(&self, mt: &LuaRef) -> Result<()> {
        self.with_value(|l| {
            mt.push(l)?;
            l.set_metatable(-2)?;
            Ok(())
        })
    }

    /// Raw identity, no `__eq`
    pub fn is_identical_to(&self, other: &LuaRef) -> Result<bool> {
        self.with_value(|l| {
            other.push(l)?;
            Ok(l.raw_equal(-1, -2))
        })
    }

    fn compare(&self, other: &LuaRef, op: CompareOp) -> Result<bool> {
        self.with_value(|l| {
            other.push(l)?;
            Ok(l.compare(-2, -1, op)?)
        })
    }

    pub fn equals(&self, other: &LuaRef) -> Result<bool> {
        self.compare(other, CompareOp::Eq)
    }

    pub fn less_than(&self, other: &LuaRef) -> Result<bool> {
        self.compare(other, CompareOp::Lt)
    }

    pub fn less_equal(&self, other: &LuaRef) -> Result<bool> {
        self.compare(other, CompareOp::Le)
    }

    pub fn to_value<V: FromLua>(&self) -> Result<V> {
        self.with_value(|l| V::from_lua(l, -1))
    }

    /// Identity of the referenced value, 0 for non-collectable values
    pub fn to_pointer(&self) -> usize {
        self.with_value(|l| Ok(l.to_pointer(-1))).unwrap_or(0)
    }

    /// Iterate the raw entries of a table
    pub fn iter(&self) -> LuaRefIter<'_> {
        LuaRefIter {
            table: self,
            key: None,
            done: false,
        }
    }

    fn push(&self, state: &State) -> Result<()> {
        if !std::ptr::eq(self.state.as_ptr(), state) {
            return match self.state.upgrade() {
                Some(_) => Err(Error::Runtime("reference belongs to another state".into())),
                None => Err(Error::StateClosed),
            };
        }
        state.push_reference(self.handle);
        Ok(())
    }
}

impl Clone for LuaRef {
    fn clone(&self) -> Self {
        match self.state.upgrade() {
            Some(state) if self.handle >= 0 => {
                state.push_reference(self.handle);
                LuaRef::pop(&state)
            }
            _ => LuaRef {
                state: self.state.clone(),
                handle: self.handle,
            },
        }
    }
}

impl Drop for LuaRef {
    fn drop(&mut self) {
        if let Some(state) = self.state.upgrade() {
            state.unreference(self.handle);
        }
    }
}

impl fmt::Debug for LuaRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.with_value(|l| Ok(l.describe(-1))) {
            Ok(text) => write!(f, "LuaRef({})", text),
            Err(_) => write!(f, "LuaRef(closed)"),
        }
    }
}

impl ToLua for LuaRef {
    fn push(self, state: &State) -> Result<()> {
        LuaRef::push(&self, state)
    }
}

impl ToLua for &LuaRef {
    fn push(self, state: &State) -> Result<()> {
        LuaRef::push(self, state)
    }
}

impl FromLua for LuaRef {
    fn from_lua(state: &State, index: i32) -> Result<Self> {
        Ok(LuaRef::from_stack(state, index))
    }
}

/// Raw `(key, value)` entries of a table, in table order
pub struct LuaRefIter<'a> {
    table: &'a LuaRef,
    key: Option<LuaRef>,
    done: bool,
}

impl Iterator for LuaRefIter<'_> {
    type Item = Result<(LuaRef, LuaRef)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let key = self.key.take();
        let step = self.table.with_value(|l| {
            match &key {
                Some(k) => k.push(l)?,
                None => l.push_nil(),
            }
            if !l.next(-2)? {
                return Ok(None);
            }
            let value = LuaRef::pop(l);
            let key = LuaRef::from_stack(l, -1);
            Ok(Some((key, value)))
        });
        match step {
            Ok(Some((k, v))) => {
                self.key = Some(k.clone());
                Some(Ok((k, v)))
            }
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_keeps_value_across_gc() {
        let l = State::new();
        let t = LuaRef::create_table(&l);
        t.set("k", 5).unwrap();
        l.gc_collect();
        assert_eq!(t.get::<_, i32>("k").unwrap(), 5);
        assert_eq!(l.top(), 0);
    }

    #[test]
    fn test_clone_aliases() {
        let l = State::new();
        let a = LuaRef::create_table(&l);
        let b = a.clone();
        b.set(1, "one").unwrap();
        assert_eq!(a.get::<_, String>(1).unwrap(), "one");
        assert!(a.is_identical_to(&b).unwrap());
    }

    #[test]
    fn test_closed_state_errors() {
        let l = State::new();
        let t = LuaRef::create_table(&l);
        drop(l);
        assert!(!t.is_valid());
        assert_eq!(t.get::<_, i32>("x").unwrap_err(), Error::StateClosed);
        assert_eq!(t.type_of(), Type::None);
    }

    #[test]
    fn test_iteration_order() {
        let l = State::new();
        let t = LuaRef::create_table(&l);
        t.set("a", 1).unwrap();
        t.set("b", 2).unwrap();
        let pairs: Vec<(String, i32)> = t
            .iter()
            .map(|e| {
                let (k, v) = e.unwrap();
                (k.to_value().unwrap(), v.to_value().unwrap())
            })
            .collect();
        assert_eq!(pairs, vec![("a".to_string(), 1), ("b".to_string(), 2)]);
    }

    #[test]
    fn test_call_function_ref() {
        let l = State::new();
        let f = LuaRef::create_function(&l, |a: i32, b: i32| (a + b, a * b)).unwrap();
        let (sum, product): (i32, i32) = f.call((3, 4)).unwrap();
        assert_eq!((sum, product), (7, 12));
        assert_eq!(l.top(), 0);
    }

    #[test]
    fn test_nil_reference() {
        let l = State::new();
        let n = LuaRef::nil(&l);
        assert!(n.is_nil());
        let m = n.clone();
        assert!(m.is_nil());
        assert_eq!(n.to_value::<Option<i32>>().unwrap(), None);
    }
}
