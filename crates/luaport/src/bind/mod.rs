//! Class and module binding
//!
//! A binding is built with a fluent chain rooted at [`LuaBinding`]:
//!
//! ```ignore
//! LuaBinding::new(&state)?
//!     .begin_module("geo")?
//!         .begin_class::<Point>("Point")?
//!             .add_constructor(|x: f64, y: f64| Point { x, y })?
//!             .add_variable("x", |p: &Point| &p.x, |p: &mut Point| &mut p.x)?
//!         .end_class()
//!     .end_module();
//! ```
//!
//! Every class owns three metatables: one for mutable objects, one for const
//! objects and the static table script code sees as the class name. Modules
//! are plain tables that act as their own metatable. Reopening an existing
//! class or module name extends it instead of replacing it.

mod class;
mod meta;
mod module;

use std::rc::Rc;

use luaport_vm::{State, REGISTRY_INDEX};
use tracing::debug;

use crate::args::{ArgList, ArgsSpec, Plain};
use crate::convert::{ToLua, ToLuaMulti};
use crate::error::{Error, Result};
use crate::invoke::{function_with, push_constant_getter, Callable};
use crate::object::{class_keys, register_upcast, Class, ClassKey, SIGNATURE};
use crate::value_ref::LuaRef;

pub use class::ClassBuilder;
pub use module::ModuleBuilder;

use meta::{handler, push_stub, Stub};

/// Root of a binding chain: registers into the globals table or any other
/// table
pub struct LuaBinding {
    state: Rc<State>,
    table: LuaRef,
}

impl LuaBinding {
    /// Bind into the global table
    pub fn new(state: &State) -> Result<Self> {
        Ok(LuaBinding {
            state: state.handle()?,
            table: LuaRef::globals(state),
        })
    }

    /// Bind into `table`
    pub fn with_table(table: LuaRef) -> Result<Self> {
        table.check_table()?;
        Ok(LuaBinding {
            state: table.state()?,
            table,
        })
    }

    /// The table being bound into
    pub fn table(&self) -> &LuaRef {
        &self.table
    }

    pub fn add_function<F, A, R>(self, name: &str, f: F) -> Result<Self>
    where
        F: Callable<A, R>,
        A: ArgList,
        Plain: ArgsSpec<A>,
        R: ToLuaMulti,
    {
        self.add_function_with(name, f, Plain)
    }

    pub fn add_function_with<F, A, R, S>(self, name: &str, f: F, spec: S) -> Result<Self>
    where
        F: Callable<A, R>,
        A: ArgList,
        S: ArgsSpec<A> + 'static,
        R: ToLuaMulti,
    {
        self.table.raw_set(name, function_with(f, spec))?;
        Ok(self)
    }

    pub fn begin_module(self, name: &str) -> Result<ModuleBuilder<Self>> {
        let table = open_module(&self.state, &self.table, name)?;
        Ok(ModuleBuilder::new(self.state.clone(), table, self))
    }

    pub fn begin_class<T: Class>(self, name: &str) -> Result<ClassBuilder<T, Self>> {
        let (tables, _) = open_class::<T>(&self.state, &self.table, name)?;
        Ok(ClassBuilder::new(self.state.clone(), tables, self))
    }

    /// Bind `T` as a subclass of the already bound `B`
    pub fn begin_extend_class<T, B>(self, name: &str) -> Result<ClassBuilder<T, Self>>
    where
        T: Class + AsRef<B> + AsMut<B>,
        B: Class,
    {
        let tables = open_extend_class::<T, B>(&self.state, &self.table, name)?;
        Ok(ClassBuilder::new(self.state.clone(), tables, self))
    }
}

/// The three tables of a bound class
pub(crate) struct ClassTables {
    pub class: LuaRef,
    pub const_: LuaRef,
    pub static_: LuaRef,
}

/// `"<parent>.<name>"`, where `<parent>` is the text inside the parent's
/// `___type` brackets; just `name` at the top level
fn full_name(parent: &LuaRef, name: &str) -> Result<String> {
    let label: Option<String> = parent.raw_get("___type")?;
    let inner = label.as_deref().and_then(|l| {
        let start = l.find('<')?;
        let end = l.rfind('>')?;
        (end > start).then(|| &l[start + 1..end])
    });
    Ok(match inner {
        Some(prefix) if !prefix.is_empty() => format!("{}.{}", prefix, name),
        _ => name.to_string(),
    })
}

/// Find or create the module `parent[name]`
pub(crate) fn open_module(state: &State, parent: &LuaRef, name: &str) -> Result<LuaRef> {
    let existing: LuaRef = parent.raw_get(name)?;
    if existing.is_table() {
        return Ok(existing);
    }

    let full = full_name(parent, name)?;
    state.new_table();
    state.push_value(-1);
    state.set_metatable(-2)?;
    handler(meta::module_index).push(state)?;
    state.raw_set_field(-2, "__index")?;
    handler(meta::module_new_index).push(state)?;
    state.raw_set_field(-2, "__newindex")?;
    state.new_table();
    state.raw_set_field(-2, "___getters")?;
    state.new_table();
    state.raw_set_field(-2, "___setters")?;
    state.push_str(&format!("module<{}>", full));
    state.raw_set_field(-2, "___type")?;
    let module = LuaRef::pop(state);
    module.raw_set("___parent", parent)?;
    parent.raw_set(name, &module)?;
    debug!(module = %full, "module registered");
    Ok(module)
}

/// Create one class metatable and register it under `key`
fn new_class_meta(state: &State, type_name: &str, key: ClassKey, finalize: bool) -> Result<LuaRef> {
    state.new_table();
    handler(meta::class_index).push(state)?;
    state.raw_set_field(-2, "__index")?;
    handler(meta::class_new_index).push(state)?;
    state.raw_set_field(-2, "__newindex")?;
    if finalize {
        handler(meta::gc_object).push(state)?;
        state.raw_set_field(-2, "__gc")?;
    }
    state.new_table();
    state.raw_set_field(-2, "___getters")?;
    state.new_table();
    state.raw_set_field(-2, "___setters")?;
    state.push_str(type_name);
    state.raw_set_field(-2, "___type")?;
    state.push_light_userdata(key.as_pointer());
    state.raw_set_p(-2, SIGNATURE.as_pointer())?;
    state.push_value(-1);
    state.raw_set_p(REGISTRY_INDEX, key.as_pointer())?;
    Ok(LuaRef::pop(state))
}

/// Find or create the class `parent[name]` for `T`. The flag is true when the
/// tables were created by this call.
pub(crate) fn open_class<T: Class>(
    state: &State,
    parent: &LuaRef,
    name: &str,
) -> Result<(ClassTables, bool)> {
    let existing: LuaRef = parent.raw_get(name)?;
    if existing.is_table() {
        let tables = ClassTables {
            class: existing.raw_get("___class")?,
            const_: existing.raw_get("___const")?,
            static_: existing,
        };
        if !tables.class.is_table() || !tables.const_.is_table() {
            return Err(Error::Runtime(format!("'{}' is not a bound class", name)));
        }
        return Ok((tables, false));
    }

    let full = full_name(parent, name)?;
    let keys = class_keys::<T>();

    let const_ = new_class_meta(state, &format!("const_class<{}>", full), keys.const_, true)?;
    let class = new_class_meta(state, &format!("class<{}>", full), keys.class, true)?;
    let static_ = new_class_meta(state, &format!("static_class<{}>", full), keys.static_, false)?;

    // field getters behave the same for const objects
    let getters: LuaRef = const_.raw_get("___getters")?;
    class.raw_set("___getters", &getters)?;
    class.raw_set("___const", &const_)?;
    const_.raw_set("___const", &const_)?;

    static_.set_metatable(&static_)?;
    static_.raw_set("___class", &class)?;
    static_.raw_set("___const", &const_)?;
    static_.raw_set("___parent", parent)?;
    parent.raw_set(name, &static_)?;

    debug!(class = %full, "class registered");
    Ok((
        ClassTables {
            class,
            const_,
            static_,
        },
        true,
    ))
}

/// Like [`open_class`], linking a newly created class to the bound base `B`
pub(crate) fn open_extend_class<T, B>(
    state: &State,
    parent: &LuaRef,
    name: &str,
) -> Result<ClassTables>
where
    T: Class + AsRef<B> + AsMut<B>,
    B: Class,
{
    let (tables, created) = open_class::<T>(state, parent, name)?;
    if !created {
        return Ok(tables);
    }

    let super_static: LuaRef = LuaRef::registry(state).raw_get_p(class_keys::<B>().static_.as_pointer())?;
    if !super_static.is_table() {
        return Err(Error::UnknownClass);
    }
    let super_class: LuaRef = super_static.raw_get("___class")?;
    let super_const: LuaRef = super_static.raw_get("___const")?;
    tables.static_.raw_set("___super", &super_static)?;
    tables.class.raw_set("___super", &super_class)?;
    tables.const_.raw_set("___super", &super_const)?;
    register_upcast::<T, B>();
    Ok(tables)
}

/// Push a stub closure and take a reference to it
fn stub(state: &State, kind: Stub, name: &str) -> Result<LuaRef> {
    push_stub(state, kind, name)?;
    Ok(LuaRef::pop(state))
}

/// A getter returning `value` on every read
fn constant_getter<V: ToLua>(state: &State, value: V) -> Result<LuaRef> {
    value.push(state)?;
    push_constant_getter(state);
    Ok(LuaRef::pop(state))
}

/// `table.___getters[name] = getter`, `table.___setters[name] = setter`
fn set_accessors<G: ToLua, S: ToLua>(table: &LuaRef, name: &str, getter: G, setter: S) -> Result<()> {
    let getters: LuaRef = table.raw_get("___getters")?;
    let setters: LuaRef = table.raw_get("___setters")?;
    getters.raw_set(name, getter)?;
    setters.raw_set(name, setter)?;
    Ok(())
}
