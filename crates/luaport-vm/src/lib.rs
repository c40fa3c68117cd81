//! luaport-vm: a small embeddable stack VM
//!
//! Provides the capability contract the `luaport` binding engine is written
//! against:
//! - a value stack addressed by 1-based or negative indices
//! - tables, userdata with metatables, native closures with upvalues
//! - a registry table with integer references and pointer keys
//! - metamethods (`__index`, `__newindex`, `__call`, `__gc`, `__eq`, `__lt`,
//!   `__le`, `__len`)
//! - protected calls and a mark-and-sweep collector with finalizers
//!
//! There is no compiler or bytecode interpreter; every function is native.

mod error;
mod heap;
mod options;
mod state;
mod table;
mod value;

pub use error::{LuaError, LuaResult};
pub use options::StateOptions;
pub use state::{
    upvalue_index, CompareOp, NativeFn, State, MULTRET, NO_REF, REF_NIL, REGISTRY_INDEX,
};
pub use value::Type;
