//! Arena heap and mark-and-sweep collector
//!
//! Objects are addressed by typed indices into per-kind arenas. A cycle marks
//! from the roots, resurrects unreachable userdata that still have a pending
//! `__gc` finalizer, then frees everything left unmarked.

use std::any::Any;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::ops::{Index, IndexMut};
use std::rc::Rc;

use crate::state::NativeFn;
use crate::table::Table;
use crate::value::{Key, Value};

/// A typed index into one of the heap arenas
pub struct GcRef<T>(u32, PhantomData<fn() -> T>);

impl<T> GcRef<T> {
    fn new(index: u32) -> Self {
        GcRef(index, PhantomData)
    }

    pub fn index(self) -> u32 {
        self.0
    }
}

impl<T> Clone for GcRef<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> Copy for GcRef<T> {}

impl<T> PartialEq for GcRef<T> {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}
impl<T> Eq for GcRef<T> {}

impl<T> Hash for GcRef<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

impl<T> fmt::Debug for GcRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

pub(crate) type TableId = GcRef<Table>;
pub(crate) type FunctionId = GcRef<Function>;
pub(crate) type UserdataId = GcRef<Userdata>;

/// A native closure
pub(crate) struct Function {
    pub func: NativeFn,
    pub upvalues: Vec<Value>,
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Function")
            .field("upvalues", &self.upvalues.len())
            .finish()
    }
}

/// An opaque block carrying a native payload
pub(crate) struct Userdata {
    pub payload: Option<Rc<dyn Any>>,
    pub metatable: Option<TableId>,
    pub finalized: bool,
}

/// Slot storage with a free list
pub(crate) struct Arena<T> {
    slots: Vec<Option<T>>,
    marks: Vec<bool>,
    free: Vec<u32>,
    live: usize,
}

impl<T> Arena<T> {
    fn new() -> Self {
        Self {
            slots: Vec::new(),
            marks: Vec::new(),
            free: Vec::new(),
            live: 0,
        }
    }

    pub fn alloc(&mut self, value: T) -> GcRef<T> {
        self.live += 1;
        if let Some(idx) = self.free.pop() {
            self.slots[idx as usize] = Some(value);
            GcRef::new(idx)
        } else {
            let idx = self.slots.len() as u32;
            self.slots.push(Some(value));
            self.marks.push(false);
            GcRef::new(idx)
        }
    }

    pub fn get(&self, id: GcRef<T>) -> Option<&T> {
        self.slots.get(id.0 as usize).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, id: GcRef<T>) -> Option<&mut T> {
        self.slots.get_mut(id.0 as usize).and_then(Option::as_mut)
    }

    pub fn live(&self) -> usize {
        self.live
    }

    pub fn ids(&self) -> impl Iterator<Item = GcRef<T>> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_some())
            .map(|(i, _)| GcRef::new(i as u32))
    }

    /// Returns true the first time a slot is marked in this cycle
    fn mark(&mut self, id: GcRef<T>) -> bool {
        match self.marks.get_mut(id.0 as usize) {
            Some(m) if !*m => {
                *m = true;
                true
            }
            _ => false,
        }
    }

    fn is_marked(&self, id: GcRef<T>) -> bool {
        self.marks.get(id.0 as usize).copied().unwrap_or(false)
    }

    /// Free unmarked slots, clear marks, hand back what was freed
    fn sweep(&mut self, freed: &mut Vec<T>) {
        for (i, slot) in self.slots.iter_mut().enumerate() {
            if self.marks[i] {
                self.marks[i] = false;
            } else if let Some(obj) = slot.take() {
                self.free.push(i as u32);
                self.live -= 1;
                freed.push(obj);
            }
        }
    }
}

impl<T> Index<GcRef<T>> for Arena<T> {
    type Output = T;

    fn index(&self, id: GcRef<T>) -> &T {
        match self.get(id) {
            Some(v) => v,
            None => panic!("dangling heap reference {:?}", id),
        }
    }
}

impl<T> IndexMut<GcRef<T>> for Arena<T> {
    fn index_mut(&mut self, id: GcRef<T>) -> &mut T {
        match self.get_mut(id) {
            Some(v) => v,
            None => panic!("dangling heap reference {:?}", id),
        }
    }
}

/// Objects released by a sweep. Dropping this runs native destructors, so it
/// must happen after the heap borrow is released.
#[derive(Default)]
pub(crate) struct Garbage {
    tables: Vec<Table>,
    functions: Vec<Function>,
    userdata: Vec<Userdata>,
}

impl Garbage {
    pub fn len(&self) -> usize {
        self.tables.len() + self.functions.len() + self.userdata.len()
    }
}

/// All collectable objects of one state
pub(crate) struct Heap {
    pub tables: Arena<Table>,
    pub functions: Arena<Function>,
    pub userdata: Arena<Userdata>,
}

impl Heap {
    pub fn new() -> Self {
        Self {
            tables: Arena::new(),
            functions: Arena::new(),
            userdata: Arena::new(),
        }
    }

    pub fn count(&self) -> usize {
        self.tables.live() + self.functions.live() + self.userdata.live()
    }

    pub fn metatable_of(&self, v: &Value) -> Option<TableId> {
        match v {
            Value::Table(id) => self.tables[*id].metatable,
            Value::Userdata(id) => self.userdata[*id].metatable,
            _ => None,
        }
    }

    /// Raw lookup of a metamethod on the metatable of `v`
    pub fn metamethod(&self, v: &Value, event: &str) -> Value {
        match self.metatable_of(v) {
            Some(mt) => self.tables[mt].get_str(event),
            None => Value::Nil,
        }
    }

    fn has_finalizer(&self, id: UserdataId) -> bool {
        let ud = &self.userdata[id];
        !ud.finalized
            && matches!(
                ud.metatable.map(|mt| self.tables[mt].get_str("__gc")),
                Some(Value::Function(_))
            )
    }

    /// Userdata whose finalizer has not run yet, newest first
    pub fn pending_finalizers(&mut self) -> Vec<UserdataId> {
        let mut ids: Vec<UserdataId> = self
            .userdata
            .ids()
            .filter(|id| self.has_finalizer(*id))
            .collect();
        ids.sort_by(|a, b| b.index().cmp(&a.index()));
        for id in &ids {
            self.userdata[*id].finalized = true;
        }
        ids
    }

    /// One full cycle. Returns the userdata that need their finalizer run and
    /// the objects freed by the sweep.
    pub fn collect(&mut self, roots: Vec<Value>) -> (Vec<UserdataId>, Garbage) {
        self.mark_from(roots);

        let mut resurrect = Vec::new();
        for id in self.userdata.ids().collect::<Vec<_>>() {
            if !self.userdata.is_marked(id) && self.has_finalizer(id) {
                self.userdata[id].finalized = true;
                resurrect.push(id);
            }
        }
        self.mark_from(resurrect.iter().map(|id| Value::Userdata(*id)).collect());

        let mut garbage = Garbage::default();
        self.tables.sweep(&mut garbage.tables);
        self.functions.sweep(&mut garbage.functions);
        self.userdata.sweep(&mut garbage.userdata);
        (resurrect, garbage)
    }

    fn mark_from(&mut self, mut gray: Vec<Value>) {
        while let Some(v) = gray.pop() {
            match v {
                Value::Table(id) => {
                    if !self.tables.mark(id) {
                        continue;
                    }
                    let t = &self.tables[id];
                    if let Some(mt) = t.metatable {
                        gray.push(Value::Table(mt));
                    }
                    for (k, v) in t.values() {
                        if let Some(kv) = collectable_key(k) {
                            gray.push(kv);
                        }
                        if is_collectable(v) {
                            gray.push(v.clone());
                        }
                    }
                }
                Value::Function(id) => {
                    if !self.functions.mark(id) {
                        continue;
                    }
                    gray.extend(
                        self.functions[id]
                            .upvalues
                            .iter()
                            .filter(|u| is_collectable(u))
                            .cloned(),
                    );
                }
                Value::Userdata(id) => {
                    if !self.userdata.mark(id) {
                        continue;
                    }
                    if let Some(mt) = self.userdata[id].metatable {
                        gray.push(Value::Table(mt));
                    }
                }
                _ => {}
            }
        }
    }
}

fn is_collectable(v: &Value) -> bool {
    matches!(v, Value::Table(_) | Value::Function(_) | Value::Userdata(_))
}

fn collectable_key(k: &Key) -> Option<Value> {
    match k {
        Key::Table(_) | Key::Function(_) | Key::Userdata(_) => Some(k.to_value()),
        _ => None,
    }
}
