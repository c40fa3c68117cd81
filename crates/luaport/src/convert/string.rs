//! Strings and byte strings
//!
//! Every string crosses the boundary with an explicit length, so embedded
//! NUL bytes survive in both directions.

use std::ops::Deref;

use luaport_vm::State;

use super::{FromLua, ToLua};
use crate::error::{Error, Result};

/// A VM string that is not required to be valid UTF-8
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct LuaString(Vec<u8>);

impl LuaString {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    /// UTF-8 view, if the bytes are valid UTF-8
    pub fn to_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.0).ok()
    }
}

impl Deref for LuaString {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.0
    }
}

impl From<&str> for LuaString {
    fn from(s: &str) -> Self {
        Self(s.as_bytes().to_vec())
    }
}

impl From<&[u8]> for LuaString {
    fn from(b: &[u8]) -> Self {
        Self(b.to_vec())
    }
}

impl From<Vec<u8>> for LuaString {
    fn from(b: Vec<u8>) -> Self {
        Self(b)
    }
}

fn read_bytes(state: &State, index: i32) -> Result<std::rc::Rc<[u8]>> {
    state
        .to_bytes(index)
        .ok_or_else(|| Error::mismatch("string", state.type_name(index)))
}

impl ToLua for &str {
    fn push(self, state: &State) -> Result<()> {
        state.push_str(self);
        Ok(())
    }
}

impl ToLua for String {
    fn push(self, state: &State) -> Result<()> {
        state.push_str(&self);
        Ok(())
    }
}

impl ToLua for &String {
    fn push(self, state: &State) -> Result<()> {
        state.push_str(self);
        Ok(())
    }
}

impl FromLua for String {
    /// Strings and numbers convert; invalid UTF-8 is an error
    fn from_lua(state: &State, index: i32) -> Result<Self> {
        let bytes = read_bytes(state, index)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| Error::mismatch("utf-8 string", "binary string"))
    }
}

impl ToLua for LuaString {
    fn push(self, state: &State) -> Result<()> {
        state.push_bytes(&self.0);
        Ok(())
    }
}

impl ToLua for &LuaString {
    fn push(self, state: &State) -> Result<()> {
        state.push_bytes(&self.0);
        Ok(())
    }
}

impl FromLua for LuaString {
    fn from_lua(state: &State, index: i32) -> Result<Self> {
        read_bytes(state, index).map(|b| LuaString(b.to_vec()))
    }
}

impl ToLua for &[u8] {
    fn push(self, state: &State) -> Result<()> {
        state.push_bytes(self);
        Ok(())
    }
}

impl ToLua for Vec<u8> {
    fn push(self, state: &State) -> Result<()> {
        state.push_bytes(&self);
        Ok(())
    }
}

impl FromLua for Vec<u8> {
    fn from_lua(state: &State, index: i32) -> Result<Self> {
        read_bytes(state, index).map(|b| b.to_vec())
    }
}
