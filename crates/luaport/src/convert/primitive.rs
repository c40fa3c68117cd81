//! Booleans, integers, floats and characters

use luaport_vm::{State, Type};

use super::{FromLua, ToLua};
use crate::error::{Error, Result};
use crate::options::{bind_options, Int64Mode};

/// Exclusive upper bound of the 64-bit unsigned range as a float
const TWO_POW_64: f64 = 18_446_744_073_709_551_616.0;

impl ToLua for bool {
    fn push(self, state: &State) -> Result<()> {
        state.push_boolean(self);
        Ok(())
    }
}

impl FromLua for bool {
    /// Any value converts: only nil and false are false
    fn from_lua(state: &State, index: i32) -> Result<Self> {
        Ok(state.to_boolean(index))
    }
}

fn checked(state: &State) -> bool {
    bind_options(state).int64_mode == Int64Mode::Checked
}

/// Float holding exactly `wide`
fn exact_float(wide: i128) -> Result<f64> {
    let n = wide as f64;
    if n as i128 == wide {
        Ok(n)
    } else {
        Err(Error::UnsafeInt64)
    }
}

/// Push an integer; values outside i64 or a float-only state become floats
fn push_wide(state: &State, wide: i128, checked: bool) -> Result<()> {
    match i64::try_from(wide) {
        Ok(v) if state.options().integer_subtype => state.push_integer(v),
        _ if checked => state.push_number(exact_float(wide)?),
        _ => state.push_number(wide as f64),
    }
    Ok(())
}

fn expect_number(state: &State, index: i32) -> Result<()> {
    match state.type_of(index) {
        Type::Number => Ok(()),
        Type::String if state.to_number(index).is_some() => Ok(()),
        t => Err(Error::mismatch("number", t.name())),
    }
}

/// Integer held exactly by a float
fn exact_integer(n: f64) -> Result<i128> {
    if !n.is_finite() {
        return Err(Error::UnsafeInt64);
    }
    if n.fract() != 0.0 {
        return Err(Error::NotInteger);
    }
    if n < i64::MIN as f64 || n >= TWO_POW_64 {
        return Err(Error::UnsafeInt64);
    }
    Ok(n as i128)
}

macro_rules! impl_integer {
    ($($ty:ty),+) => {$(
        impl ToLua for $ty {
            fn push(self, state: &State) -> Result<()> {
                push_wide(state, self as i128, checked(state))
            }
        }

        impl FromLua for $ty {
            #[allow(clippy::unnecessary_fallible_conversions)]
            fn from_lua(state: &State, index: i32) -> Result<Self> {
                let checked = checked(state);
                expect_number(state, index)?;
                let exact = match state.type_of(index) {
                    Type::String => state.to_integer(index),
                    _ if state.is_integer(index) => state.to_integer(index),
                    _ => None,
                };
                if let Some(v) = exact {
                    return if checked {
                        <$ty>::try_from(v).map_err(|_| Error::OutOfRange)
                    } else {
                        Ok(v as $ty)
                    };
                }
                let n = state
                    .to_number(index)
                    .ok_or_else(|| Error::mismatch("number", state.type_name(index)))?;
                if !checked {
                    return Ok(n as $ty);
                }
                <$ty>::try_from(exact_integer(n)?).map_err(|_| Error::OutOfRange)
            }
        }
    )+};
}

impl_integer!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize);

impl ToLua for f64 {
    fn push(self, state: &State) -> Result<()> {
        state.push_number(self);
        Ok(())
    }
}

impl FromLua for f64 {
    fn from_lua(state: &State, index: i32) -> Result<Self> {
        expect_number(state, index)?;
        state
            .to_number(index)
            .ok_or_else(|| Error::mismatch("number", state.type_name(index)))
    }
}

impl ToLua for f32 {
    fn push(self, state: &State) -> Result<()> {
        state.push_number(self as f64);
        Ok(())
    }
}

impl FromLua for f32 {
    fn from_lua(state: &State, index: i32) -> Result<Self> {
        f64::from_lua(state, index).map(|n| n as f32)
    }
}

impl ToLua for char {
    fn push(self, state: &State) -> Result<()> {
        let mut buf = [0u8; 4];
        state.push_str(self.encode_utf8(&mut buf));
        Ok(())
    }
}

impl FromLua for char {
    /// First character of a string
    fn from_lua(state: &State, index: i32) -> Result<Self> {
        let s = String::from_lua(state, index)?;
        s.chars()
            .next()
            .ok_or_else(|| Error::mismatch("char", "empty string"))
    }
}
