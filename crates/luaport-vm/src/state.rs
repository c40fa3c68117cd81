//! The VM state and its stack API
//!
//! Every operation takes `&self`. Interior borrows are released before any
//! native function or metamethod runs, so callbacks may re-enter the state.

use std::any::{Any, TypeId};
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use rustc_hash::FxHashMap;
use tracing::{debug, trace, warn};

use crate::error::{LuaError, LuaResult};
use crate::heap::{Function, FunctionId, Heap, TableId, Userdata, UserdataId};
use crate::options::StateOptions;
use crate::table::Table;
use crate::value::{format_number, Key, Type, Value};

/// A native function. Arguments are at stack indices `1..=top()`; the return
/// value is the number of results left on top of the stack.
pub type NativeFn = Rc<dyn Fn(&State) -> LuaResult<i32>>;

/// Pseudo-index of the registry table
pub const REGISTRY_INDEX: i32 = -1_001_000;

/// Request all results from [`State::pcall`]
pub const MULTRET: i32 = -1;

/// Reference returned for a nil value
pub const REF_NIL: i32 = -1;

/// A reference that refers to nothing
pub const NO_REF: i32 = -2;

/// Pseudo-index of upvalue `n` (1-based) of the running native function
pub const fn upvalue_index(n: i32) -> i32 {
    REGISTRY_INDEX - n
}

const MAX_META_CHAIN: usize = 100;

/// Comparison operators for [`State::compare`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Lt,
    Le,
}

#[derive(Debug, Clone, Copy)]
struct Frame {
    /// Absolute stack position of argument 1
    base: usize,
    func: Option<FunctionId>,
}

/// An embedded VM state
pub struct State {
    this: Weak<State>,
    heap: RefCell<Heap>,
    stack: RefCell<Vec<Value>>,
    frames: RefCell<Vec<Frame>>,
    registry: TableId,
    globals: TableId,
    free_refs: RefCell<Vec<i32>>,
    next_ref: Cell<i32>,
    app_data: RefCell<FxHashMap<TypeId, Rc<dyn Any>>>,
    options: StateOptions,
}

impl State {
    /// Create a state with default options
    #[allow(clippy::new_ret_no_self)]
    pub fn new() -> Rc<State> {
        Self::with_options(StateOptions::default())
    }

    /// Create a state with specific options
    pub fn with_options(options: StateOptions) -> Rc<State> {
        let mut heap = Heap::new();
        let registry = heap.tables.alloc(Table::default());
        let globals = heap.tables.alloc(Table::default());
        heap.tables[registry].set_key(Key::str("_G"), Value::Table(globals));
        trace!(?options, "state created");
        Rc::new_cyclic(|this| State {
            this: this.clone(),
            heap: RefCell::new(heap),
            stack: RefCell::new(Vec::new()),
            frames: RefCell::new(vec![Frame { base: 0, func: None }]),
            registry,
            globals,
            free_refs: RefCell::new(Vec::new()),
            next_ref: Cell::new(1),
            app_data: RefCell::new(FxHashMap::default()),
            options,
        })
    }

    /// Weak handle to this state
    pub fn weak(&self) -> Weak<State> {
        self.this.clone()
    }

    /// Strong handle to this state; fails while the state is being dropped
    pub fn handle(&self) -> LuaResult<Rc<State>> {
        self.this.upgrade().ok_or(LuaError::Closed)
    }

    pub fn options(&self) -> &StateOptions {
        &self.options
    }

    // =========================================================================
    // Index resolution
    // =========================================================================

    fn base(&self) -> usize {
        self.frames.borrow().last().map_or(0, |f| f.base)
    }

    /// Absolute stack position for a relative index, if the slot exists
    fn position(&self, idx: i32) -> Option<usize> {
        let len = self.stack.borrow().len();
        let base = self.base();
        if idx > 0 {
            let pos = base + idx as usize - 1;
            (pos < len).then_some(pos)
        } else if idx < 0 && idx > REGISTRY_INDEX {
            let back = idx.unsigned_abs() as usize;
            (back <= len - base).then(|| len - back)
        } else {
            None
        }
    }

    fn slot(&self, idx: i32) -> Option<Value> {
        if idx == REGISTRY_INDEX {
            return Some(Value::Table(self.registry));
        }
        if idx < REGISTRY_INDEX {
            let n = (REGISTRY_INDEX - idx) as usize;
            let func = self.frames.borrow().last().and_then(|f| f.func)?;
            return self.heap.borrow().functions[func].upvalues.get(n - 1).cloned();
        }
        let pos = self.position(idx)?;
        self.stack.borrow().get(pos).cloned()
    }

    fn value(&self, idx: i32) -> Value {
        self.slot(idx).unwrap_or(Value::Nil)
    }

    fn set_slot(&self, idx: i32, v: Value) -> LuaResult<()> {
        if idx < REGISTRY_INDEX {
            let n = (REGISTRY_INDEX - idx) as usize;
            let func = self.frames.borrow().last().and_then(|f| f.func);
            if let Some(f) = func {
                let mut heap = self.heap.borrow_mut();
                if let Some(slot) = heap.functions[f].upvalues.get_mut(n - 1) {
                    *slot = v;
                    return Ok(());
                }
            }
            return Err(LuaError::runtime(format!("invalid upvalue index {}", n)));
        }
        match self.position(idx) {
            Some(pos) => {
                self.stack.borrow_mut()[pos] = v;
                Ok(())
            }
            None => Err(LuaError::runtime(format!("invalid stack index {}", idx))),
        }
    }

    fn push(&self, v: Value) {
        self.stack.borrow_mut().push(v);
    }

    fn pop_value(&self) -> Value {
        let base = self.base();
        let mut stack = self.stack.borrow_mut();
        if stack.len() > base {
            stack.pop().unwrap_or(Value::Nil)
        } else {
            Value::Nil
        }
    }

    // =========================================================================
    // Stack manipulation
    // =========================================================================

    /// Number of slots in the current frame
    pub fn top(&self) -> i32 {
        (self.stack.borrow().len() - self.base()) as i32
    }

    /// Grow (with nils) or shrink the current frame to `idx` slots. Negative
    /// indices count from the top.
    pub fn set_top(&self, idx: i32) {
        let base = self.base();
        let mut stack = self.stack.borrow_mut();
        let new_len = if idx >= 0 {
            base + idx as usize
        } else {
            (stack.len() + 1).saturating_sub(idx.unsigned_abs() as usize).max(base)
        };
        stack.resize(new_len, Value::Nil);
    }

    /// Convert a relative index into an absolute one
    pub fn abs_index(&self, idx: i32) -> i32 {
        if idx > 0 || idx <= REGISTRY_INDEX {
            idx
        } else {
            self.top() + idx + 1
        }
    }

    /// Fails when `idx` does not name an existing slot
    pub fn check_index(&self, idx: i32) -> LuaResult<()> {
        match self.slot(idx) {
            Some(_) => Ok(()),
            None => Err(LuaError::runtime(format!("invalid stack index {}", idx))),
        }
    }

    pub fn pop(&self, n: i32) {
        self.set_top(-n - 1);
    }

    /// Push a copy of the value at `idx`
    pub fn push_value(&self, idx: i32) {
        let v = self.value(idx);
        self.push(v);
    }

    /// Move the top value into `idx`, shifting the slots above up
    pub fn insert(&self, idx: i32) {
        if let Some(pos) = self.position(idx) {
            let mut stack = self.stack.borrow_mut();
            if let Some(v) = stack.pop() {
                stack.insert(pos, v);
            }
        }
    }

    /// Remove the slot at `idx`, shifting the slots above down
    pub fn remove(&self, idx: i32) {
        if let Some(pos) = self.position(idx) {
            self.stack.borrow_mut().remove(pos);
        }
    }

    /// Pop the top value into `idx`
    pub fn replace(&self, idx: i32) -> LuaResult<()> {
        let idx = self.abs_index(idx);
        let v = self.pop_value();
        self.set_slot(idx, v)
    }

    pub fn copy(&self, from: i32, to: i32) -> LuaResult<()> {
        let v = self.value(from);
        self.set_slot(to, v)
    }

    // =========================================================================
    // Push
    // =========================================================================

    pub fn push_nil(&self) {
        self.push(Value::Nil);
    }

    pub fn push_boolean(&self, b: bool) {
        self.push(Value::Boolean(b));
    }

    pub fn push_integer(&self, i: i64) {
        if self.options.integer_subtype {
            self.push(Value::Integer(i));
        } else {
            self.push(Value::Number(i as f64));
        }
    }

    pub fn push_number(&self, n: f64) {
        self.push(Value::Number(n));
    }

    /// Push a byte string with explicit length
    pub fn push_bytes(&self, s: &[u8]) {
        self.push(Value::str(s));
    }

    pub fn push_str(&self, s: &str) {
        self.push_bytes(s.as_bytes());
    }

    pub fn push_light_userdata(&self, p: usize) {
        self.push(Value::LightUserdata(p));
    }

    pub fn push_function<F>(&self, f: F)
    where
        F: Fn(&State) -> LuaResult<i32> + 'static,
    {
        self.push_native(Rc::new(f), 0);
    }

    /// Push a native closure, popping `n` values as its upvalues (the first
    /// pushed becomes upvalue 1)
    pub fn push_closure<F>(&self, f: F, n: i32)
    where
        F: Fn(&State) -> LuaResult<i32> + 'static,
    {
        self.push_native(Rc::new(f), n);
    }

    pub fn push_native(&self, func: NativeFn, n: i32) {
        let upvalues = {
            let base = self.base();
            let mut stack = self.stack.borrow_mut();
            let at = stack.len().saturating_sub(n.max(0) as usize).max(base);
            stack.split_off(at)
        };
        let id = self.heap.borrow_mut().functions.alloc(Function { func, upvalues });
        self.push(Value::Function(id));
    }

    pub fn push_globals(&self) {
        self.push(Value::Table(self.globals));
    }

    pub fn new_table(&self) {
        self.create_table(0, 0);
    }

    pub fn create_table(&self, narr: usize, nrec: usize) {
        let id = self.heap.borrow_mut().tables.alloc(Table::with_capacity(narr + nrec));
        self.push(Value::Table(id));
    }

    /// Push a new userdata carrying `payload`, without a metatable
    pub fn new_userdata(&self, payload: Rc<dyn Any>) {
        let id = self.heap.borrow_mut().userdata.alloc(Userdata {
            payload: Some(payload),
            metatable: None,
            finalized: false,
        });
        self.push(Value::Userdata(id));
    }

    // =========================================================================
    // Query
    // =========================================================================

    pub fn type_of(&self, idx: i32) -> Type {
        self.slot(idx).map_or(Type::None, |v| v.type_of())
    }

    pub fn type_name(&self, idx: i32) -> &'static str {
        self.type_of(idx).name()
    }

    pub fn is_none(&self, idx: i32) -> bool {
        self.type_of(idx) == Type::None
    }

    pub fn is_nil(&self, idx: i32) -> bool {
        self.type_of(idx) == Type::Nil
    }

    pub fn is_none_or_nil(&self, idx: i32) -> bool {
        matches!(self.type_of(idx), Type::None | Type::Nil)
    }

    /// True only for the integer subtype
    pub fn is_integer(&self, idx: i32) -> bool {
        matches!(self.slot(idx), Some(Value::Integer(_)))
    }

    /// True for numbers and strings convertible to numbers
    pub fn is_number(&self, idx: i32) -> bool {
        self.value(idx).to_number().is_some()
    }

    pub fn is_string(&self, idx: i32) -> bool {
        matches!(self.type_of(idx), Type::String | Type::Number)
    }

    pub fn is_table(&self, idx: i32) -> bool {
        self.type_of(idx) == Type::Table
    }

    pub fn is_function(&self, idx: i32) -> bool {
        self.type_of(idx) == Type::Function
    }

    pub fn is_userdata(&self, idx: i32) -> bool {
        matches!(self.type_of(idx), Type::Userdata | Type::LightUserdata)
    }

    /// Every function in this VM is native
    pub fn is_native_function(&self, idx: i32) -> bool {
        self.is_function(idx)
    }

    pub fn to_boolean(&self, idx: i32) -> bool {
        self.value(idx).truthy()
    }

    pub fn to_integer(&self, idx: i32) -> Option<i64> {
        self.value(idx).to_integer()
    }

    pub fn to_number(&self, idx: i32) -> Option<f64> {
        self.value(idx).to_number()
    }

    /// Bytes of a string, or the string form of a number
    pub fn to_bytes(&self, idx: i32) -> Option<Rc<[u8]>> {
        self.value(idx).to_bytes()
    }

    pub fn to_str(&self, idx: i32) -> Option<String> {
        self.to_bytes(idx)
            .map(|b| String::from_utf8_lossy(&b).into_owned())
    }

    /// Payload of a full userdata
    pub fn to_userdata(&self, idx: i32) -> Option<Rc<dyn Any>> {
        match self.slot(idx)? {
            Value::Userdata(id) => self.heap.borrow().userdata[id].payload.clone(),
            _ => None,
        }
    }

    /// Detach the payload of a full userdata, leaving it empty
    pub fn take_userdata(&self, idx: i32) -> Option<Rc<dyn Any>> {
        match self.slot(idx)? {
            Value::Userdata(id) => self.heap.borrow_mut().userdata[id].payload.take(),
            _ => None,
        }
    }

    pub fn to_light_userdata(&self, idx: i32) -> Option<usize> {
        match self.slot(idx)? {
            Value::LightUserdata(p) => Some(p),
            _ => None,
        }
    }

    /// Identity of a collectable value, 0 for anything else
    pub fn to_pointer(&self, idx: i32) -> usize {
        match self.value(idx) {
            Value::Table(id) => (id.index() as usize + 1) << 2,
            Value::Function(id) => ((id.index() as usize + 1) << 2) | 1,
            Value::Userdata(id) => ((id.index() as usize + 1) << 2) | 2,
            Value::LightUserdata(p) => p,
            _ => 0,
        }
    }

    /// Length without metamethods
    pub fn raw_len(&self, idx: i32) -> usize {
        match self.value(idx) {
            Value::String(s) => s.len(),
            Value::Table(id) => self.heap.borrow().tables[id].length().max(0) as usize,
            _ => 0,
        }
    }

    // =========================================================================
    // Table access
    // =========================================================================

    fn index_value(&self, obj: Value, key: Value) -> LuaResult<Value> {
        let mut obj = obj;
        for _ in 0..MAX_META_CHAIN {
            let handler = {
                let heap = self.heap.borrow();
                if let Value::Table(id) = obj {
                    let v = heap.tables[id].get(&key);
                    if !v.is_nil() {
                        return Ok(v);
                    }
                    let h = heap.metamethod(&obj, "__index");
                    if h.is_nil() {
                        return Ok(Value::Nil);
                    }
                    h
                } else {
                    let h = heap.metamethod(&obj, "__index");
                    if h.is_nil() {
                        return Err(LuaError::runtime(format!(
                            "attempt to index a {} value",
                            obj.type_of().name()
                        )));
                    }
                    h
                }
            };
            if let Value::Function(_) = handler {
                let mut results = self.call_value(handler, &[obj, key], 1)?;
                return Ok(results.pop().unwrap_or(Value::Nil));
            }
            obj = handler;
        }
        Err(LuaError::runtime("'__index' chain too long; possible loop"))
    }

    fn new_index_value(&self, obj: Value, key: Value, val: Value) -> LuaResult<()> {
        let mut obj = obj;
        for _ in 0..MAX_META_CHAIN {
            let handler = {
                let mut heap = self.heap.borrow_mut();
                if let Value::Table(id) = obj {
                    let present = !heap.tables[id].get(&key).is_nil();
                    let h = if present {
                        Value::Nil
                    } else {
                        heap.metamethod(&obj, "__newindex")
                    };
                    if h.is_nil() {
                        return heap.tables[id].set(&key, val);
                    }
                    h
                } else {
                    let h = heap.metamethod(&obj, "__newindex");
                    if h.is_nil() {
                        return Err(LuaError::runtime(format!(
                            "attempt to index a {} value",
                            obj.type_of().name()
                        )));
                    }
                    h
                }
            };
            if let Value::Function(_) = handler {
                self.call_value(handler, &[obj, key, val], 0)?;
                return Ok(());
            }
            obj = handler;
        }
        Err(LuaError::runtime("'__newindex' chain too long; possible loop"))
    }

    fn table_id(&self, idx: i32) -> LuaResult<TableId> {
        match self.value(idx) {
            Value::Table(id) => Ok(id),
            other => Err(LuaError::runtime(format!(
                "table expected, got {}",
                other.type_of().name()
            ))),
        }
    }

    /// Pop a key and push `t[key]`, honoring `__index`
    pub fn get_table(&self, idx: i32) -> LuaResult<Type> {
        let obj = self.value(idx);
        let key = self.pop_value();
        let v = self.index_value(obj, key)?;
        let t = v.type_of();
        self.push(v);
        Ok(t)
    }

    pub fn get_field(&self, idx: i32, name: &str) -> LuaResult<Type> {
        let obj = self.value(idx);
        let v = self.index_value(obj, Value::str(name.as_bytes()))?;
        let t = v.type_of();
        self.push(v);
        Ok(t)
    }

    pub fn get_index(&self, idx: i32, i: i64) -> LuaResult<Type> {
        let obj = self.value(idx);
        let v = self.index_value(obj, Value::Integer(i))?;
        let t = v.type_of();
        self.push(v);
        Ok(t)
    }

    pub fn get_global(&self, name: &str) -> LuaResult<Type> {
        let v = self.index_value(Value::Table(self.globals), Value::str(name.as_bytes()))?;
        let t = v.type_of();
        self.push(v);
        Ok(t)
    }

    /// Pop a value and a key and assign `t[key] = value`, honoring `__newindex`
    pub fn set_table(&self, idx: i32) -> LuaResult<()> {
        let obj = self.value(idx);
        let val = self.pop_value();
        let key = self.pop_value();
        self.new_index_value(obj, key, val)
    }

    pub fn set_field(&self, idx: i32, name: &str) -> LuaResult<()> {
        let obj = self.value(idx);
        let val = self.pop_value();
        self.new_index_value(obj, Value::str(name.as_bytes()), val)
    }

    pub fn set_index(&self, idx: i32, i: i64) -> LuaResult<()> {
        let obj = self.value(idx);
        let val = self.pop_value();
        self.new_index_value(obj, Value::Integer(i), val)
    }

    pub fn set_global(&self, name: &str) -> LuaResult<()> {
        let val = self.pop_value();
        self.new_index_value(Value::Table(self.globals), Value::str(name.as_bytes()), val)
    }

    fn raw_get_key(&self, idx: i32, key: &Value) -> LuaResult<Type> {
        let id = self.table_id(idx)?;
        let v = self.heap.borrow().tables[id].get(key);
        let t = v.type_of();
        self.push(v);
        Ok(t)
    }

    fn raw_set_key(&self, idx: i32, key: &Value) -> LuaResult<()> {
        let id = self.table_id(idx)?;
        let val = self.pop_value();
        self.heap.borrow_mut().tables[id].set(key, val)
    }

    /// Pop a key and push `t[key]` without metamethods
    pub fn raw_get(&self, idx: i32) -> LuaResult<Type> {
        let id = self.table_id(idx)?;
        let key = self.pop_value();
        let v = self.heap.borrow().tables[id].get(&key);
        let t = v.type_of();
        self.push(v);
        Ok(t)
    }

    pub fn raw_get_field(&self, idx: i32, name: &str) -> LuaResult<Type> {
        self.raw_get_key(idx, &Value::str(name.as_bytes()))
    }

    pub fn raw_get_index(&self, idx: i32, i: i64) -> LuaResult<Type> {
        self.raw_get_key(idx, &Value::Integer(i))
    }

    /// Push `t[p]` where `p` is used as a light userdata key
    pub fn raw_get_p(&self, idx: i32, p: usize) -> LuaResult<Type> {
        self.raw_get_key(idx, &Value::LightUserdata(p))
    }

    /// Pop a value and a key and assign without metamethods
    pub fn raw_set(&self, idx: i32) -> LuaResult<()> {
        let id = self.table_id(idx)?;
        let val = self.pop_value();
        let key = self.pop_value();
        self.heap.borrow_mut().tables[id].set(&key, val)
    }

    pub fn raw_set_field(&self, idx: i32, name: &str) -> LuaResult<()> {
        self.raw_set_key(idx, &Value::str(name.as_bytes()))
    }

    pub fn raw_set_index(&self, idx: i32, i: i64) -> LuaResult<()> {
        self.raw_set_key(idx, &Value::Integer(i))
    }

    pub fn raw_set_p(&self, idx: i32, p: usize) -> LuaResult<()> {
        self.raw_set_key(idx, &Value::LightUserdata(p))
    }

    /// Pop a key and push the next key and value; false at the end
    pub fn next(&self, idx: i32) -> LuaResult<bool> {
        let id = self.table_id(idx)?;
        let key = self.pop_value();
        let entry = self.heap.borrow().tables[id].next(&key)?;
        match entry {
            Some((k, v)) => {
                self.push(k);
                self.push(v);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Push the length of the value at `idx`, honoring `__len`
    pub fn len(&self, idx: i32) -> LuaResult<()> {
        let obj = self.value(idx);
        let handler = self.heap.borrow().metamethod(&obj, "__len");
        if let Value::Function(_) = handler {
            let mut results = self.call_value(handler, &[obj], 1)?;
            self.push(results.pop().unwrap_or(Value::Nil));
            return Ok(());
        }
        match obj {
            Value::String(s) => self.push_integer(s.len() as i64),
            Value::Table(id) => {
                let n = self.heap.borrow().tables[id].length();
                self.push_integer(n);
            }
            other => {
                return Err(LuaError::runtime(format!(
                    "attempt to get length of a {} value",
                    other.type_of().name()
                )))
            }
        }
        Ok(())
    }

    // =========================================================================
    // Metatables
    // =========================================================================

    /// Push the metatable of the value at `idx`; false (nothing pushed) if it
    /// has none
    pub fn get_metatable(&self, idx: i32) -> bool {
        let v = self.value(idx);
        let mt = self.heap.borrow().metatable_of(&v);
        match mt {
            Some(mt) => {
                self.push(Value::Table(mt));
                true
            }
            None => false,
        }
    }

    /// Pop a table (or nil) and make it the metatable of the value at `idx`
    pub fn set_metatable(&self, idx: i32) -> LuaResult<()> {
        let target = self.value(idx);
        let mt = match self.pop_value() {
            Value::Table(id) => Some(id),
            Value::Nil => None,
            other => {
                return Err(LuaError::runtime(format!(
                    "table expected, got {}",
                    other.type_of().name()
                )))
            }
        };
        let mut heap = self.heap.borrow_mut();
        match target {
            Value::Table(id) => heap.tables[id].metatable = mt,
            Value::Userdata(id) => heap.userdata[id].metatable = mt,
            other => {
                return Err(LuaError::runtime(format!(
                    "cannot set metatable of a {} value",
                    other.type_of().name()
                )))
            }
        }
        Ok(())
    }

    // =========================================================================
    // Comparison
    // =========================================================================

    pub fn raw_equal(&self, a: i32, b: i32) -> bool {
        match (self.slot(a), self.slot(b)) {
            (Some(x), Some(y)) => x.raw_equal(&y),
            _ => false,
        }
    }

    /// Compare two slots with `__eq`, `__lt` and `__le` metamethods
    pub fn compare(&self, a: i32, b: i32, op: CompareOp) -> LuaResult<bool> {
        let (x, y) = match (self.slot(a), self.slot(b)) {
            (Some(x), Some(y)) => (x, y),
            _ => return Ok(false),
        };
        match op {
            CompareOp::Eq => {
                if x.raw_equal(&y) {
                    return Ok(true);
                }
                let same_kind = matches!(
                    (&x, &y),
                    (Value::Table(_), Value::Table(_)) | (Value::Userdata(_), Value::Userdata(_))
                );
                if !same_kind {
                    return Ok(false);
                }
                self.compare_meta(x, y, "__eq").map(|r| r.unwrap_or(false))
            }
            CompareOp::Lt | CompareOp::Le => {
                if let Some(ord) = primitive_order(&x, &y) {
                    return Ok(match op {
                        CompareOp::Lt => ord.is_lt(),
                        _ => ord.is_le(),
                    });
                }
                let event = if op == CompareOp::Lt { "__lt" } else { "__le" };
                let (tx, ty) = (x.type_of().name(), y.type_of().name());
                match self.compare_meta(x, y, event)? {
                    Some(r) => Ok(r),
                    None if tx == ty => Err(LuaError::runtime(format!(
                        "attempt to compare two {} values",
                        tx
                    ))),
                    None => Err(LuaError::runtime(format!(
                        "attempt to compare {} with {}",
                        tx, ty
                    ))),
                }
            }
        }
    }

    fn compare_meta(&self, x: Value, y: Value, event: &str) -> LuaResult<Option<bool>> {
        let handler = {
            let heap = self.heap.borrow();
            let h = heap.metamethod(&x, event);
            if h.is_nil() {
                heap.metamethod(&y, event)
            } else {
                h
            }
        };
        if handler.is_nil() {
            return Ok(None);
        }
        let mut results = self.call_value(handler, &[x, y], 1)?;
        Ok(Some(results.pop().is_some_and(|v| v.truthy())))
    }

    // =========================================================================
    // Registry references
    // =========================================================================

    /// Pop the top value and store it in the registry under a fresh handle
    pub fn reference(&self) -> i32 {
        let v = self.pop_value();
        if v.is_nil() {
            return REF_NIL;
        }
        let r = match self.free_refs.borrow_mut().pop() {
            Some(r) => r,
            None => {
                let r = self.next_ref.get();
                self.next_ref.set(r + 1);
                r
            }
        };
        self.heap.borrow_mut().tables[self.registry].set_key(Key::Integer(r as i64), v);
        r
    }

    /// Release a registry handle
    pub fn unreference(&self, r: i32) {
        if r < 0 {
            return;
        }
        let mut heap = self.heap.borrow_mut();
        let slot = Key::Integer(r as i64);
        if heap.tables[self.registry].get_key(&slot).is_nil() {
            return;
        }
        heap.tables[self.registry].set_key(slot, Value::Nil);
        self.free_refs.borrow_mut().push(r);
    }

    /// Push the value held by a registry handle
    pub fn push_reference(&self, r: i32) {
        if r < 0 {
            self.push_nil();
            return;
        }
        let v = self.heap.borrow().tables[self.registry].get_int(r as i64);
        self.push(v);
    }

    // =========================================================================
    // Calls
    // =========================================================================

    /// Call the value below `nargs` arguments on top of the stack.
    ///
    /// On success the function and its arguments are replaced by `nresults`
    /// results (all of them for [`MULTRET`]). On error they are removed and
    /// the error is returned; the rest of the stack is left intact.
    pub fn pcall(&self, nargs: i32, nresults: i32) -> LuaResult<()> {
        let len = self.stack.borrow().len();
        let nargs = nargs.max(0) as usize;
        if len < self.base() + nargs + 1 {
            return Err(LuaError::runtime("attempt to call with too few stack values"));
        }
        let func_pos = len - nargs - 1;
        let result = self.call_at(func_pos, nresults);
        if result.is_err() {
            self.stack.borrow_mut().truncate(func_pos);
        }
        result
    }

    fn call_at(&self, func_pos: usize, nresults: i32) -> LuaResult<()> {
        let mut tries = 0;
        let id = loop {
            let callee = self.stack.borrow()[func_pos].clone();
            if let Value::Function(id) = callee {
                break id;
            }
            let handler = self.heap.borrow().metamethod(&callee, "__call");
            if handler.is_nil() || tries >= MAX_META_CHAIN {
                return Err(LuaError::runtime(format!(
                    "attempt to call a {} value",
                    callee.type_of().name()
                )));
            }
            self.stack.borrow_mut().insert(func_pos, handler);
            tries += 1;
        };

        if self.frames.borrow().len() > self.options.max_call_depth
            || self.stack.borrow().len() > self.options.max_stack
        {
            return Err(LuaError::StackOverflow);
        }

        let func = self.heap.borrow().functions[id].func.clone();
        self.frames.borrow_mut().push(Frame {
            base: func_pos + 1,
            func: Some(id),
        });
        let outcome = func(self);
        self.frames.borrow_mut().pop();
        let n = outcome?;

        let mut stack = self.stack.borrow_mut();
        let available = stack.len().saturating_sub(func_pos + 1);
        let n = (n.max(0) as usize).min(available);
        let split_at = stack.len() - n;
        let mut results = stack.split_off(split_at);
        stack.truncate(func_pos);
        if nresults >= 0 {
            results.resize(nresults as usize, Value::Nil);
        }
        stack.extend(results);
        Ok(())
    }

    fn call_value(&self, f: Value, args: &[Value], nresults: i32) -> LuaResult<Vec<Value>> {
        let func_pos = self.stack.borrow().len();
        self.push(f);
        for a in args {
            self.push(a.clone());
        }
        self.pcall(args.len() as i32, nresults)?;
        Ok(self.stack.borrow_mut().split_off(func_pos))
    }

    // =========================================================================
    // Collector
    // =========================================================================

    fn roots(&self) -> Vec<Value> {
        let mut roots = self.stack.borrow().clone();
        roots.push(Value::Table(self.registry));
        roots.push(Value::Table(self.globals));
        roots.extend(
            self.frames
                .borrow()
                .iter()
                .filter_map(|f| f.func.map(Value::Function)),
        );
        roots
    }

    /// Run a full collection cycle; returns the number of objects freed.
    /// Unreachable userdata with a `__gc` metamethod are finalized in this
    /// cycle and freed in the next one.
    pub fn gc_collect(&self) -> usize {
        let roots = self.roots();
        let (finalize, garbage) = self.heap.borrow_mut().collect(roots);
        let freed = garbage.len();
        drop(garbage);
        debug!(freed, finalizers = finalize.len(), "gc cycle");
        for id in finalize {
            self.run_finalizer(id);
        }
        freed
    }

    /// Number of live collectable objects
    pub fn gc_count(&self) -> usize {
        self.heap.borrow().count()
    }

    fn run_finalizer(&self, id: UserdataId) {
        let handler = self.heap.borrow().metamethod(&Value::Userdata(id), "__gc");
        if !matches!(handler, Value::Function(_)) {
            return;
        }
        let top = self.top();
        if let Err(e) = self.call_value(handler, &[Value::Userdata(id)], 0) {
            warn!(error = %e, "error in __gc finalizer");
        }
        self.set_top(top);
    }

    // =========================================================================
    // Extension data
    // =========================================================================

    /// Attach per-state data, keyed by its type
    pub fn set_app_data<T: Any>(&self, data: T) {
        self.app_data
            .borrow_mut()
            .insert(TypeId::of::<T>(), Rc::new(data));
    }

    pub fn app_data<T: Any>(&self) -> Option<Rc<T>> {
        let data = self.app_data.borrow().get(&TypeId::of::<T>()).cloned()?;
        data.downcast::<T>().ok()
    }

    /// Debug rendering of a slot, for diagnostics
    pub fn describe(&self, idx: i32) -> String {
        match self.value(idx) {
            Value::Nil if self.slot(idx).is_none() => "none".to_string(),
            Value::Nil => "nil".to_string(),
            Value::Boolean(b) => b.to_string(),
            Value::Integer(i) => i.to_string(),
            Value::Number(n) => format_number(n),
            Value::String(s) => format!("{:?}", String::from_utf8_lossy(&s)),
            v => format!("{}: 0x{:x}", v.type_of().name(), self.to_pointer(idx)),
        }
    }
}

impl Drop for State {
    fn drop(&mut self) {
        self.stack.borrow_mut().clear();
        self.frames.borrow_mut().truncate(1);
        loop {
            let pending = self.heap.borrow_mut().pending_finalizers();
            if pending.is_empty() {
                break;
            }
            for id in pending {
                self.run_finalizer(id);
            }
        }
        trace!(objects = self.gc_count(), "state closed");
    }
}

fn primitive_order(x: &Value, y: &Value) -> Option<std::cmp::Ordering> {
    match (x, y) {
        (Value::Integer(a), Value::Integer(b)) => Some(a.cmp(b)),
        (Value::Integer(_) | Value::Number(_), Value::Integer(_) | Value::Number(_)) => {
            let (a, b) = (x.to_number()?, y.to_number()?);
            a.partial_cmp(&b).or(Some(std::cmp::Ordering::Greater))
        }
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    }
}
