//! Bound objects: identity, ownership shapes and checked retrieval

mod cell;
mod key;

use std::cell::{Ref, RefCell, RefMut};
use std::marker::PhantomData;
use std::rc::Rc;

use luaport_vm::{State, Type, REGISTRY_INDEX};

use crate::convert::{FromLua, ToLua};
use crate::error::{Error, Result};

pub use cell::{IntoObject, ObjectCell, Ptr, Shape};
pub use key::{class_keys, ClassKey, ClassKeys};

pub(crate) use key::{register_upcast, Upcast, SIGNATURE};

/// Marker for types that can be bound as classes
pub trait Class: 'static {}

/// Push an object tagged const: only const methods are callable on it
#[derive(Debug, Clone, Copy)]
pub struct Const<P>(pub P);

/// Push `value` as a bound object of its target class
pub fn push_object<P: IntoObject>(state: &State, value: P, is_const: bool) -> Result<()> {
    let key = class_keys::<P::Target>().flavor(is_const);
    state.raw_get_p(REGISTRY_INDEX, key.as_pointer())?;
    if !state.is_table(-1) {
        state.pop(1);
        return Err(Error::UnknownClass);
    }
    match value.into_cell(state) {
        Some(cell) => {
            state.new_userdata(Rc::new(cell));
            state.insert(-2);
            state.set_metatable(-2)?;
        }
        None => {
            state.pop(1);
            state.push_nil();
        }
    }
    Ok(())
}

/// `___type` of the table at `index`, if it has one
pub(crate) fn type_label(state: &State, index: i32) -> Option<String> {
    let index = state.abs_index(index);
    if !state.is_table(index) {
        return None;
    }
    let label = match state.raw_get_field(index, "___type") {
        Ok(Type::String) => state.to_str(-1),
        _ => None,
    };
    state.pop(1);
    label
}

/// Locate the payload of the object at `index` as class `T`.
///
/// The object's metatable (its `___const` twin for const requests) must be
/// the registered metatable of `T` or reach it through `___super`. Returns
/// the upcasts needed along the way.
pub(crate) fn get_object<T: Class>(
    state: &State,
    index: i32,
    want_const: bool,
) -> Result<(Rc<ObjectCell>, Vec<Upcast>)> {
    let index = state.abs_index(index);
    if state.type_of(index) != Type::Userdata {
        return Err(Error::NotUserdata(state.type_name(index).to_string()));
    }
    let top = state.top();
    let walked = walk_to_class(state, index, class_keys::<T>().flavor(want_const), want_const);
    state.set_top(top);
    let path = walked?;

    let payload = state.to_userdata(index).ok_or(Error::Destroyed)?;
    let cell = payload
        .downcast::<ObjectCell>()
        .map_err(|_| Error::mismatch(std::any::type_name::<T>(), "userdata"))?;
    Ok((cell, path))
}

fn walk_to_class(state: &State, index: i32, key: ClassKey, want_const: bool) -> Result<Vec<Upcast>> {
    state.raw_get_p(REGISTRY_INDEX, key.as_pointer())?;
    if !state.is_table(-1) {
        return Err(Error::UnknownClass);
    }
    let expected = state.top();
    let expected_name = || type_label(state, expected).unwrap_or_else(|| "object".to_string());

    if !state.get_metatable(index) {
        return Err(Error::mismatch(expected_name(), "userdata"));
    }
    let actual = state.top();
    if want_const {
        state.raw_get_field(-1, "___const")?;
        if !state.is_table(-1) {
            state.pop(1);
            state.push_value(actual);
        }
    }

    let mut path = Vec::new();
    loop {
        if state.raw_equal(-1, expected) {
            return Ok(path);
        }
        state.raw_get_p(-1, SIGNATURE.as_pointer())?;
        let from = state.to_light_userdata(-1).and_then(ClassKey::from_pointer);
        state.pop(1);
        state.raw_get_field(-1, "___super")?;
        let step = from.and_then(key::upcast_from);
        match step {
            Some(up) if state.is_table(-1) => path.push(up),
            _ => {
                let got = type_label(state, actual).unwrap_or_else(|| "userdata".to_string());
                return Err(Error::mismatch(expected_name(), got));
            }
        }
        state.remove(-2);
    }
}

/// Shared access to a bound object, accepting const and non-const objects
pub struct ObjectRef<T> {
    cell: Rc<ObjectCell>,
    path: Vec<Upcast>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Class> ObjectRef<T> {
    pub fn borrow(&self) -> Result<Ref<'_, T>> {
        let guard = self.cell.cell.try_borrow()?;
        let path = &self.path;
        Ref::filter_map(guard, |v| {
            let mut v = v;
            for step in path {
                v = (step.up)(v)?;
            }
            v.downcast_ref::<T>()
        })
        .map_err(|_| Error::mismatch(std::any::type_name::<T>(), "object"))
    }

    pub fn shape(&self) -> Shape {
        self.cell.shape
    }
}

/// Object handles alias a live object and never fall back to a default
fn reference_opt<R: FromLua>(state: &State, index: i32) -> Result<R> {
    if state.is_none_or_nil(index) {
        return Err(Error::NilReference);
    }
    R::from_lua(state, index)
}

impl<T: Class> FromLua for ObjectRef<T> {
    fn from_lua(state: &State, index: i32) -> Result<Self> {
        let (cell, path) = get_object::<T>(state, index, true)?;
        Ok(ObjectRef {
            cell,
            path,
            _marker: PhantomData,
        })
    }

    fn opt(state: &State, index: i32, _default: Self) -> Result<Self> {
        reference_opt(state, index)
    }
}

/// Exclusive access to a non-const bound object
pub struct ObjectMut<T> {
    cell: Rc<ObjectCell>,
    path: Vec<Upcast>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Class> ObjectMut<T> {
    pub fn borrow(&self) -> Result<Ref<'_, T>> {
        let guard = self.cell.cell.try_borrow()?;
        let path = &self.path;
        Ref::filter_map(guard, |v| {
            let mut v = v;
            for step in path {
                v = (step.up)(v)?;
            }
            v.downcast_ref::<T>()
        })
        .map_err(|_| Error::mismatch(std::any::type_name::<T>(), "object"))
    }

    pub fn borrow_mut(&self) -> Result<RefMut<'_, T>> {
        let guard = self.cell.cell.try_borrow_mut()?;
        let path = &self.path;
        RefMut::filter_map(guard, |v| {
            let mut v = v;
            for step in path {
                v = (step.up_mut)(v)?;
            }
            v.downcast_mut::<T>()
        })
        .map_err(|_| Error::mismatch(std::any::type_name::<T>(), "object"))
    }

    pub fn shape(&self) -> Shape {
        self.cell.shape
    }
}

impl<T: Class> FromLua for ObjectMut<T> {
    fn from_lua(state: &State, index: i32) -> Result<Self> {
        let (cell, path) = get_object::<T>(state, index, false)?;
        Ok(ObjectMut {
            cell,
            path,
            _marker: PhantomData,
        })
    }

    fn opt(state: &State, index: i32, _default: Self) -> Result<Self> {
        reference_opt(state, index)
    }
}

impl<T: Class> ToLua for T {
    fn push(self, state: &State) -> Result<()> {
        push_object(state, self, false)
    }
}

/// Copies the object out; works for const objects and base classes
impl<T: Class + Clone> FromLua for T {
    fn from_lua(state: &State, index: i32) -> Result<Self> {
        let obj = ObjectRef::<T>::from_lua(state, index)?;
        let value = T::clone(&*obj.borrow()?);
        Ok(value)
    }
}

impl<T: Class> ToLua for Rc<RefCell<T>> {
    fn push(self, state: &State) -> Result<()> {
        push_object(state, self, false)
    }
}

/// Only objects pushed as `Rc<RefCell<T>>` of exactly `T` convert back
impl<T: Class> FromLua for Rc<RefCell<T>> {
    fn from_lua(state: &State, index: i32) -> Result<Self> {
        let (cell, path) = get_object::<T>(state, index, false)?;
        if cell.shape != Shape::Shared || !path.is_empty() {
            return Err(Error::NotShared);
        }
        cell.cell
            .clone()
            .into_any()
            .downcast::<RefCell<T>>()
            .map_err(|_| Error::NotShared)
    }

    fn opt(state: &State, index: i32, _default: Self) -> Result<Self> {
        reference_opt(state, index)
    }
}

impl<T: Class> ToLua for Ptr<T> {
    fn push(self, state: &State) -> Result<()> {
        push_object(state, self, false)
    }
}

impl<P: IntoObject> ToLua for Const<P> {
    fn push(self, state: &State) -> Result<()> {
        push_object(state, self.0, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone)]
    struct Unbound;
    impl Class for Unbound {}

    #[test]
    fn test_push_unregistered_class_fails() {
        let l = State::new();
        assert_eq!(Unbound.push(&l).unwrap_err(), Error::UnknownClass);
        assert_eq!(l.top(), 0);
    }

    #[test]
    fn test_get_from_non_userdata() {
        let l = State::new();
        l.push_integer(1);
        let err = ObjectRef::<Unbound>::from_lua(&l, 1).err();
        assert_eq!(err, Some(Error::NotUserdata("number".into())));
    }

    #[test]
    fn test_get_unregistered_class() {
        let l = State::new();
        l.new_userdata(Rc::new(()));
        let err = ObjectMut::<Unbound>::from_lua(&l, 1).err();
        assert_eq!(err, Some(Error::UnknownClass));
        assert_eq!(l.top(), 1);
    }

    #[test]
    fn test_object_handles_reject_nil_default() {
        let l = State::new();
        l.push_nil();
        let fallback = Rc::new(RefCell::new(Unbound));
        let err = <Rc<RefCell<Unbound>>>::opt(&l, 1, fallback.clone()).err();
        assert_eq!(err, Some(Error::NilReference));
        let err = <Rc<RefCell<Unbound>>>::opt(&l, 2, fallback).err();
        assert_eq!(err, Some(Error::NilReference));
        assert_eq!(Error::NilReference.to_string(), "nil passed to reference");
    }
}
