//! Hash table with insertion-ordered traversal
//!
//! Entries live in an `IndexMap`. Assigning nil leaves a tombstone so a
//! traversal in progress can keep clearing fields; tombstones are compacted
//! only when a new key is inserted.

use std::hash::BuildHasherDefault;

use indexmap::IndexMap;
use rustc_hash::FxHasher;

use crate::error::{LuaError, LuaResult};
use crate::heap::TableId;
use crate::value::{Key, Value};

type Entries = IndexMap<Key, Value, BuildHasherDefault<FxHasher>>;

/// A VM table
#[derive(Debug, Default)]
pub(crate) struct Table {
    entries: Entries,
    tombstones: usize,
    pub metatable: Option<TableId>,
}

impl Table {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Entries::with_capacity_and_hasher(capacity, Default::default()),
            tombstones: 0,
            metatable: None,
        }
    }

    pub fn get(&self, key: &Value) -> Value {
        match Key::from_value(key) {
            Some(k) => self.get_key(&k),
            None => Value::Nil,
        }
    }

    pub fn get_key(&self, key: &Key) -> Value {
        self.entries.get(key).cloned().unwrap_or(Value::Nil)
    }

    pub fn get_str(&self, key: &str) -> Value {
        self.get_key(&Key::str(key))
    }

    pub fn get_int(&self, i: i64) -> Value {
        self.get_key(&Key::Integer(i))
    }

    pub fn set(&mut self, key: &Value, value: Value) -> LuaResult<()> {
        let k = match Key::from_value(key) {
            Some(k) => k,
            None if key.is_nil() => return Err(LuaError::runtime("index is nil")),
            None => return Err(LuaError::runtime("index is NaN")),
        };
        self.set_key(k, value);
        Ok(())
    }

    pub fn set_key(&mut self, key: Key, value: Value) {
        match self.entries.get_mut(&key) {
            Some(slot) => {
                match (slot.is_nil(), value.is_nil()) {
                    (false, true) => self.tombstones += 1,
                    (true, false) => self.tombstones -= 1,
                    _ => {}
                }
                *slot = value;
            }
            None if value.is_nil() => {}
            None => {
                if self.tombstones > 8 && self.tombstones > self.entries.len() / 2 {
                    self.compact();
                }
                self.entries.insert(key, value);
            }
        }
    }

    fn compact(&mut self) {
        self.entries.retain(|_, v| !v.is_nil());
        self.tombstones = 0;
    }

    /// A border: `t[n] ~= nil and t[n + 1] == nil`, or 0 when `t[1]` is nil
    pub fn length(&self) -> i64 {
        if self.get_int(1).is_nil() {
            return 0;
        }
        let mut lo: i64 = 1;
        let mut hi: i64 = 2;
        while !self.get_int(hi).is_nil() {
            lo = hi;
            match hi.checked_mul(2) {
                Some(next) => hi = next,
                None => {
                    // unbounded: fall back to a linear scan
                    let mut n = lo;
                    while !self.get_int(n + 1).is_nil() {
                        n += 1;
                    }
                    return n;
                }
            }
        }
        while hi - lo > 1 {
            let mid = lo + (hi - lo) / 2;
            if self.get_int(mid).is_nil() {
                hi = mid;
            } else {
                lo = mid;
            }
        }
        lo
    }

    /// Entry following `key` in traversal order, skipping tombstones
    pub fn next(&self, key: &Value) -> LuaResult<Option<(Value, Value)>> {
        let start = if key.is_nil() {
            0
        } else {
            let k = Key::from_value(key).ok_or_else(|| LuaError::runtime("invalid key to 'next'"))?;
            match self.entries.get_index_of(&k) {
                Some(i) => i + 1,
                None => return Err(LuaError::runtime("invalid key to 'next'")),
            }
        };
        for i in start..self.entries.len() {
            if let Some((k, v)) = self.entries.get_index(i) {
                if !v.is_nil() {
                    return Ok(Some((k.to_value(), v.clone())));
                }
            }
        }
        Ok(None)
    }

    /// Every live key and value, for the collector
    pub fn values(&self) -> impl Iterator<Item = (&Key, &Value)> {
        self.entries.iter().filter(|(_, v)| !v.is_nil())
    }
}
