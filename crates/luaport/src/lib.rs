//! luaport: binding Rust code to the luaport VM
//!
//! This crate maps native functions, classes and objects onto the VM's stack
//! calling convention and table/userdata object model:
//! - **Marshalling**: `ToLua` / `FromLua` for primitives, strings, options,
//!   references and bound objects (`convert` module)
//! - **Objects**: class identity, value/pointer/shared ownership, const
//!   objects and base-class upcasts (`object` module)
//! - **Calls**: argument specs, output parameters and invocation adapters
//!   that catch errors and panics (`args`, `invoke` modules)
//! - **Binding**: fluent class and module builders (`bind` module)
//! - **References**: registry-pinned handles to VM values (`value_ref` module)
//!
//! # Example
//!
//! ```rust,ignore
//! use luaport::{LuaBinding, Class, State, get_global};
//!
//! #[derive(Clone)]
//! struct Point { x: f64, y: f64 }
//! impl Class for Point {}
//!
//! let state = State::new();
//! LuaBinding::new(&state)?
//!     .begin_class::<Point>("Point")?
//!         .add_constructor(|x: f64, y: f64| Point { x, y })?
//!         .add_variable("x", |p: &Point| &p.x, |p: &mut Point| &mut p.x)?
//!         .add_method("length", |p: &Point| p.x.hypot(p.y))?
//!     .end_class();
//! ```

#![allow(clippy::type_complexity)]

// ============================================================================
// Modules
// ============================================================================

pub mod args;
pub mod bind;
pub mod convert;
pub mod error;
mod globals;
pub mod invoke;
pub mod object;
mod options;
pub mod value_ref;

// ============================================================================
// Re-exports
// ============================================================================

pub use luaport_vm::{LuaError, State, StateOptions, Type};

pub use args::{Arg, Def, InOut, Opt, Out, Plain};
pub use bind::{ClassBuilder, LuaBinding, ModuleBuilder};
pub use convert::{
    get, opt, push, push_functor, FromLua, FromLuaMulti, Functor, LuaFunction, LuaString,
    ToLua, ToLuaMulti,
};
pub use error::{Error, Result};
pub use globals::{get_global, set_global};
pub use invoke::{function, function_with, Callable, Method, MethodMut};
pub use object::{
    class_keys, push_object, Class, ClassKey, ClassKeys, Const, IntoObject, ObjectMut,
    ObjectRef, Ptr, Shape,
};
pub use options::{configure, BindOptions, Int64Mode};
pub use value_ref::{LuaRef, LuaRefIter};
