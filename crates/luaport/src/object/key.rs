//! Process-wide class identity keys
//!
//! Each bound type gets three keys (class, const and static metatables),
//! allocated on first use and never reused. Keys are pushed as light
//! userdata and used both as registry keys and as metatable signatures.

use std::any::{Any, TypeId};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicUsize, Ordering};

use dashmap::DashMap;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

/// Opaque identity key of one metatable flavor of a bound type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClassKey(NonZeroUsize);

impl ClassKey {
    fn next() -> Self {
        let raw = NEXT_KEY.fetch_add(1, Ordering::Relaxed);
        // starts at 1 and only grows
        Self(NonZeroUsize::new(raw).unwrap_or(NonZeroUsize::MIN))
    }

    /// The light userdata value used for this key
    pub fn as_pointer(self) -> usize {
        self.0.get()
    }

    pub(crate) fn from_pointer(p: usize) -> Option<Self> {
        NonZeroUsize::new(p).map(Self)
    }
}

/// Keys for the three metatables of one type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassKeys {
    pub class: ClassKey,
    pub const_: ClassKey,
    pub static_: ClassKey,
}

impl ClassKeys {
    pub fn flavor(&self, is_const: bool) -> ClassKey {
        if is_const {
            self.const_
        } else {
            self.class
        }
    }
}

static NEXT_KEY: AtomicUsize = AtomicUsize::new(1);

static CLASS_KEYS: Lazy<DashMap<TypeId, ClassKeys>> = Lazy::new(DashMap::new);

/// Key stored in every bound metatable under which its own class key lives
pub(crate) static SIGNATURE: Lazy<ClassKey> = Lazy::new(ClassKey::next);

/// Keys of `T`, allocating them on first request
pub fn class_keys<T: 'static>() -> ClassKeys {
    *CLASS_KEYS
        .entry(TypeId::of::<T>())
        .or_insert_with(|| ClassKeys {
            class: ClassKey::next(),
            const_: ClassKey::next(),
            static_: ClassKey::next(),
        })
}

pub(crate) type UpcastRef = for<'a> fn(&'a (dyn Any + 'static)) -> Option<&'a (dyn Any + 'static)>;
pub(crate) type UpcastMut = for<'a> fn(&'a mut (dyn Any + 'static)) -> Option<&'a mut (dyn Any + 'static)>;

/// Conversion from a derived value to its direct base
#[derive(Clone, Copy)]
pub(crate) struct Upcast {
    pub up: UpcastRef,
    pub up_mut: UpcastMut,
}

static UPCASTS: Lazy<Mutex<FxHashMap<ClassKey, Upcast>>> =
    Lazy::new(|| Mutex::new(FxHashMap::default()));

fn upcast_ref<'a, C, B>(v: &'a (dyn Any + 'static)) -> Option<&'a (dyn Any + 'static)>
where
    C: AsRef<B> + 'static,
    B: 'static,
{
    v.downcast_ref::<C>().map(|c| c.as_ref() as &(dyn Any + 'static))
}

fn upcast_mut<'a, C, B>(v: &'a mut (dyn Any + 'static)) -> Option<&'a mut (dyn Any + 'static)>
where
    C: AsMut<B> + 'static,
    B: 'static,
{
    v.downcast_mut::<C>().map(|c| c.as_mut() as &mut (dyn Any + 'static))
}

/// Record how a `C` object reaches its base `B`. Registered under both the
/// class and const keys of `C`.
pub(crate) fn register_upcast<C, B>()
where
    C: AsRef<B> + AsMut<B> + 'static,
    B: 'static,
{
    let keys = class_keys::<C>();
    let cast = Upcast {
        up: upcast_ref::<C, B>,
        up_mut: upcast_mut::<C, B>,
    };
    let mut table = UPCASTS.lock();
    table.insert(keys.class, cast);
    table.insert(keys.const_, cast);
}

pub(crate) fn upcast_from(key: ClassKey) -> Option<Upcast> {
    UPCASTS.lock().get(&key).copied()
}
