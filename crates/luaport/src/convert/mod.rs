//! Conversion between Rust values and VM stack slots
//!
//! Every native type that crosses the boundary implements [`ToLua`] (push)
//! and/or [`FromLua`] (get and opt). The implementation is picked at compile
//! time from the Rust type, so a binding never inspects types at runtime
//! beyond the dynamic type of the slot it reads.
//!
//! Multiple values (function results, call arguments) go through
//! [`ToLuaMulti`] and [`FromLuaMulti`], which cover `()`, any single value and
//! tuples of up to eight values.

mod function;
mod primitive;
mod string;

use std::fmt::Display;

use luaport_vm::State;

use crate::error::{Error, Result};

pub use function::{push_functor, Functor, LuaFunction};
pub use string::LuaString;

/// A value that can be pushed onto the VM stack
pub trait ToLua {
    /// Push exactly one value
    fn push(self, state: &State) -> Result<()>;
}

/// A value that can be read from a VM stack slot
pub trait FromLua: Sized {
    /// Read the value at `index`; fails on a missing slot or a wrong type
    fn from_lua(state: &State, index: i32) -> Result<Self>;

    /// Read the value at `index`, or `default` when the slot is none or nil
    fn opt(state: &State, index: i32, default: Self) -> Result<Self> {
        if state.is_none_or_nil(index) {
            Ok(default)
        } else {
            Self::from_lua(state, index)
        }
    }
}

/// Zero or more values pushed as a group
pub trait ToLuaMulti {
    /// Push the values and return how many were pushed
    fn push_multi(self, state: &State) -> Result<i32>;
}

/// Zero or more values read from consecutive slots
pub trait FromLuaMulti: Sized {
    /// Number of slots consumed
    const COUNT: i32;

    /// Read `COUNT` values starting at `index`
    fn from_lua_multi(state: &State, index: i32) -> Result<Self>;
}

/// Push a value
pub fn push<T: ToLua>(state: &State, value: T) -> Result<()> {
    value.push(state)
}

/// Read the value at `index`
pub fn get<T: FromLua>(state: &State, index: i32) -> Result<T> {
    T::from_lua(state, index)
}

/// Read the value at `index`, substituting `default` for none or nil
pub fn opt<T: FromLua>(state: &State, index: i32, default: T) -> Result<T> {
    T::opt(state, index, default)
}

impl<T: ToLua> ToLua for Option<T> {
    fn push(self, state: &State) -> Result<()> {
        match self {
            Some(v) => v.push(state),
            None => {
                state.push_nil();
                Ok(())
            }
        }
    }
}

impl<T: FromLua> FromLua for Option<T> {
    fn from_lua(state: &State, index: i32) -> Result<Self> {
        if state.is_none_or_nil(index) {
            Ok(None)
        } else {
            T::from_lua(state, index).map(Some)
        }
    }
}

impl ToLuaMulti for () {
    fn push_multi(self, _state: &State) -> Result<i32> {
        Ok(0)
    }
}

impl<T: ToLua> ToLuaMulti for T {
    fn push_multi(self, state: &State) -> Result<i32> {
        self.push(state)?;
        Ok(1)
    }
}

/// `Err` is raised in the VM with the error's display text
impl<T: ToLuaMulti, E: Display> ToLuaMulti for std::result::Result<T, E> {
    fn push_multi(self, state: &State) -> Result<i32> {
        match self {
            Ok(v) => v.push_multi(state),
            Err(e) => Err(Error::Runtime(e.to_string())),
        }
    }
}

impl FromLuaMulti for () {
    const COUNT: i32 = 0;

    fn from_lua_multi(_state: &State, _index: i32) -> Result<Self> {
        Ok(())
    }
}

impl<T: FromLua> FromLuaMulti for T {
    const COUNT: i32 = 1;

    fn from_lua_multi(state: &State, index: i32) -> Result<Self> {
        T::from_lua(state, index)
    }
}

macro_rules! impl_multi_tuple {
    ($count:expr; $($name:ident $offset:expr),+) => {
        impl<$($name: ToLua),+> ToLuaMulti for ($($name,)+) {
            #[allow(non_snake_case)]
            fn push_multi(self, state: &State) -> Result<i32> {
                let ($($name,)+) = self;
                $($name.push(state)?;)+
                Ok($count)
            }
        }

        impl<$($name: FromLua),+> FromLuaMulti for ($($name,)+) {
            const COUNT: i32 = $count;

            fn from_lua_multi(state: &State, index: i32) -> Result<Self> {
                Ok(($($name::from_lua(state, index + $offset)?,)+))
            }
        }
    };
}

impl_multi_tuple!(1; A 0);
impl_multi_tuple!(2; A 0, B 1);
impl_multi_tuple!(3; A 0, B 1, C 2);
impl_multi_tuple!(4; A 0, B 1, C 2, D 3);
impl_multi_tuple!(5; A 0, B 1, C 2, D 3, E 4);
impl_multi_tuple!(6; A 0, B 1, C 2, D 3, E 4, F 5);
impl_multi_tuple!(7; A 0, B 1, C 2, D 3, E 4, F 5, G 6);
impl_multi_tuple!(8; A 0, B 1, C 2, D 3, E 4, F 5, G 6, H 7);

/// Implement [`ToLua`] and [`FromLua`] for a fieldless enum through its
/// integer discriminant.
///
/// ```ignore
/// #[derive(Clone, Copy, Debug, PartialEq)]
/// enum Color { Red = 1, Green = 2 }
/// luaport::lua_enum!(Color { Red, Green });
/// ```
#[macro_export]
macro_rules! lua_enum {
    ($name:ident { $($variant:ident),+ $(,)? }) => {
        impl $crate::ToLua for $name {
            fn push(self, state: &$crate::State) -> $crate::Result<()> {
                $crate::ToLua::push(self as i64, state)
            }
        }

        impl $crate::FromLua for $name {
            fn from_lua(state: &$crate::State, index: i32) -> $crate::Result<Self> {
                let raw = <i64 as $crate::FromLua>::from_lua(state, index)?;
                $(
                    if raw == $name::$variant as i64 {
                        return Ok($name::$variant);
                    }
                )+
                Err($crate::Error::OutOfRange)
            }
        }
    };
}
