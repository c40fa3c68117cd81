//! Userdata payloads for bound objects
//!
//! An object lives in one of three shapes:
//! - Value: the VM owns the object, dropped by the `__gc` finalizer
//! - Pointer: native code owns the object, the VM only aliases it
//! - Shared: the VM holds one strong count of an `Rc<RefCell<T>>`
//!
//! All shapes are reached through [`ErasedCell`], which hands out dynamic
//! borrows so a receiver can never be aliased mutably.

use std::any::Any;
use std::cell::{Cell, Ref, RefCell, RefMut};
use std::ptr::NonNull;
use std::rc::{Rc, Weak};

use luaport_vm::State;
use rustc_hash::FxHashMap;

use super::Class;
use crate::error::{Error, Result};

/// Ownership shape of a bound object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    Value,
    Pointer,
    Shared,
}

/// Type-erased borrowable storage
pub(crate) trait ErasedCell {
    fn try_borrow(&self) -> Result<Ref<'_, dyn Any + 'static>>;
    fn try_borrow_mut(&self) -> Result<RefMut<'_, dyn Any + 'static>>;
    fn into_any(self: Rc<Self>) -> Rc<dyn Any>;
}

fn borrow_error(e: impl std::fmt::Display) -> Error {
    Error::Borrow(e.to_string())
}

impl<T: Any> ErasedCell for RefCell<T> {
    fn try_borrow(&self) -> Result<Ref<'_, dyn Any + 'static>> {
        RefCell::try_borrow(self)
            .map(|r| Ref::map(r, |v| v as &(dyn Any + 'static)))
            .map_err(borrow_error)
    }

    fn try_borrow_mut(&self) -> Result<RefMut<'_, dyn Any + 'static>> {
        RefCell::try_borrow_mut(self)
            .map(|r| RefMut::map(r, |v| v as &mut (dyn Any + 'static)))
            .map_err(borrow_error)
    }

    fn into_any(self: Rc<Self>) -> Rc<dyn Any> {
        self
    }
}

/// Pointer-shape storage. The flag is shared by every userdata aliasing the
/// same address in one state.
struct PtrCell<T> {
    ptr: NonNull<T>,
    flag: Rc<RefCell<()>>,
}

impl<T: Any> ErasedCell for PtrCell<T> {
    fn try_borrow(&self) -> Result<Ref<'_, dyn Any + 'static>> {
        let guard = self.flag.try_borrow().map_err(borrow_error)?;
        let p = self.ptr.as_ptr();
        // SAFETY: `Ptr` construction requires the pointee to outlive every
        // VM alias; the shared flag excludes a concurrent mutable borrow.
        Ok(Ref::map(guard, move |_| {
            let r: &(dyn Any + 'static) = unsafe { &*p };
            r
        }))
    }

    fn try_borrow_mut(&self) -> Result<RefMut<'_, dyn Any + 'static>> {
        let guard = self.flag.try_borrow_mut().map_err(borrow_error)?;
        let p = self.ptr.as_ptr();
        // SAFETY: as above, and the flag is held exclusively
        Ok(RefMut::map(guard, move |_| {
            let r: &mut (dyn Any + 'static) = unsafe { &mut *p };
            r
        }))
    }

    fn into_any(self: Rc<Self>) -> Rc<dyn Any> {
        self
    }
}

/// Payload stored in every bound userdata
#[doc(hidden)]
pub struct ObjectCell {
    pub(crate) shape: Shape,
    pub(crate) cell: Rc<dyn ErasedCell>,
}

impl ObjectCell {
    pub fn shape(&self) -> Shape {
        self.shape
    }
}

/// Borrow flags for pointer-shape objects, keyed by address
#[derive(Default)]
struct PointerFlags {
    flags: RefCell<FxHashMap<usize, Weak<RefCell<()>>>>,
    prune_at: Cell<usize>,
}

const PRUNE_MIN: usize = 64;

fn pointer_flag(state: &State, addr: usize) -> Rc<RefCell<()>> {
    let table = match state.app_data::<PointerFlags>() {
        Some(t) => t,
        None => {
            state.set_app_data(PointerFlags::default());
            match state.app_data::<PointerFlags>() {
                Some(t) => t,
                None => return Rc::new(RefCell::new(())),
            }
        }
    };
    let mut flags = table.flags.borrow_mut();
    if let Some(flag) = flags.get(&addr).and_then(Weak::upgrade) {
        return flag;
    }
    if flags.len() >= table.prune_at.get().max(PRUNE_MIN) {
        flags.retain(|_, w| w.strong_count() > 0);
        table.prune_at.set(flags.len() * 2);
    }
    let flag = Rc::new(RefCell::new(()));
    flags.insert(addr, Rc::downgrade(&flag));
    flag
}

/// A native-owned object pushed by address. The VM never drops the pointee.
pub struct Ptr<T>(NonNull<T>);

impl<T> Ptr<T> {
    /// Wrap a raw pointer; `None` for null.
    ///
    /// # Safety
    ///
    /// The pointee must stay valid, and must not be accessed through other
    /// references while a script call borrows it, for as long as any VM
    /// value aliases it.
    pub unsafe fn new(ptr: *mut T) -> Option<Self> {
        NonNull::new(ptr).map(Self)
    }

    pub fn from_static(r: &'static mut T) -> Self {
        Self(NonNull::from(r))
    }

    pub fn as_ptr(&self) -> *mut T {
        self.0.as_ptr()
    }
}

impl<T> Clone for Ptr<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Ptr<T> {}

impl<T> std::fmt::Debug for Ptr<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Ptr({:p})", self.0)
    }
}

/// Anything that can become a bound object of class `Target`
pub trait IntoObject {
    type Target: Class;

    /// Build the payload; `None` pushes nil
    #[doc(hidden)]
    fn into_cell(self, state: &State) -> Option<ObjectCell>;
}

impl<T: Class> IntoObject for T {
    type Target = T;

    fn into_cell(self, _state: &State) -> Option<ObjectCell> {
        Some(ObjectCell {
            shape: Shape::Value,
            cell: Rc::new(RefCell::new(self)),
        })
    }
}

impl<T: Class> IntoObject for Rc<RefCell<T>> {
    type Target = T;

    fn into_cell(self, _state: &State) -> Option<ObjectCell> {
        Some(ObjectCell {
            shape: Shape::Shared,
            cell: self,
        })
    }
}

impl<T: Class> IntoObject for Ptr<T> {
    type Target = T;

    fn into_cell(self, state: &State) -> Option<ObjectCell> {
        let flag = pointer_flag(state, self.0.as_ptr() as usize);
        Some(ObjectCell {
            shape: Shape::Pointer,
            cell: Rc::new(PtrCell { ptr: self.0, flag }),
        })
    }
}

impl<P: IntoObject> IntoObject for Option<P> {
    type Target = P::Target;

    fn into_cell(self, state: &State) -> Option<ObjectCell> {
        self.and_then(|p| p.into_cell(state))
    }
}
