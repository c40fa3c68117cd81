use std::cell::RefCell;
use std::rc::Rc;

use luaport_vm::State;

use super::{
    constant_getter, open_class, open_extend_class, open_module, set_accessors, stub,
    ClassBuilder, Stub,
};
use crate::args::{ArgList, ArgsSpec, Plain};
use crate::convert::{FromLua, ToLua, ToLuaMulti};
use crate::error::Result;
use crate::invoke::{
    call_at, function_with, static_getter, static_setter, variable_getter, variable_setter,
    Callable,
};
use crate::object::Class;
use crate::value_ref::LuaRef;

/// Builder for a module table; `end_module` returns to the parent builder
pub struct ModuleBuilder<P> {
    state: Rc<State>,
    table: LuaRef,
    parent: P,
}

impl<P> ModuleBuilder<P> {
    pub(crate) fn new(state: Rc<State>, table: LuaRef, parent: P) -> Self {
        ModuleBuilder {
            state,
            table,
            parent,
        }
    }

    /// The module table
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

    /// Property backed by a getter and a setter. Every read calls the getter.
    pub fn add_property<V, G, S>(self, name: &str, get: G, set: S) -> Result<Self>
    where
        V: ToLua + FromLua + 'static,
        G: Fn() -> V + 'static,
        S: Fn(V) + 'static,
    {
        set_accessors(&self.table, name, static_getter(get), static_setter(set))?;
        Ok(self)
    }

    pub fn add_property_readonly<V, G>(self, name: &str, get: G) -> Result<Self>
    where
        V: ToLua + 'static,
        G: Fn() -> V + 'static,
    {
        let setter = stub(&self.state, Stub::ReadOnlyVariable, name)?;
        set_accessors(&self.table, name, static_getter(get), setter)?;
        Ok(self)
    }

    /// Variable living in a shared cell, readable and writable from script
    pub fn add_variable<V>(self, name: &str, cell: Rc<RefCell<V>>) -> Result<Self>
    where
        V: ToLua + FromLua + Clone + 'static,
    {
        let getter = variable_getter(cell.clone());
        set_accessors(&self.table, name, getter, variable_setter(cell))?;
        Ok(self)
    }

    pub fn add_variable_readonly<V>(self, name: &str, cell: Rc<RefCell<V>>) -> Result<Self>
    where
        V: ToLua + Clone + 'static,
    {
        let setter = stub(&self.state, Stub::ReadOnlyVariable, name)?;
        set_accessors(&self.table, name, variable_getter(cell), setter)?;
        Ok(self)
    }

    /// Value converted once at bind time
    pub fn add_constant<V: ToLua>(self, name: &str, value: V) -> Result<Self> {
        let getter = constant_getter(&self.state, value)?;
        let setter = stub(&self.state, Stub::ReadOnlyVariable, name)?;
        set_accessors(&self.table, name, getter, setter)?;
        Ok(self)
    }

    /// Make the module callable: `module(...)` calls `f(...)`
    pub fn add_factory<F, A, R>(self, f: F) -> Result<Self>
    where
        F: Callable<A, R>,
        A: ArgList,
        Plain: ArgsSpec<A>,
        R: ToLuaMulti,
    {
        self.add_factory_with(f, Plain)
    }

    pub fn add_factory_with<F, A, R, S>(self, f: F, spec: S) -> Result<Self>
    where
        F: Callable<A, R>,
        A: ArgList,
        S: ArgsSpec<A> + 'static,
        R: ToLuaMulti,
    {
        self.table.raw_set("__call", call_at(f, spec, 2))?;
        Ok(self)
    }

    /// Make the module callable: `module(...)` calls `module.name(...)`
    pub fn add_forward_factory(self, name: &str) -> Result<Self> {
        let forward = stub(&self.state, Stub::Forward, name)?;
        self.table.raw_set("__call", forward)?;
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

    pub fn begin_extend_class<T, B>(self, name: &str) -> Result<ClassBuilder<T, Self>>
    where
        T: Class + AsRef<B> + AsMut<B>,
        B: Class,
    {
        let tables = open_extend_class::<T, B>(&self.state, &self.table, name)?;
        Ok(ClassBuilder::new(self.state.clone(), tables, self))
    }

    pub fn end_module(self) -> P {
        self.parent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bind::LuaBinding;

    fn eval_global(l: &State, path: &[&str]) -> LuaRef {
        let mut v = LuaRef::globals(l);
        for key in path {
            v = v.get(*key).unwrap();
        }
        v
    }

    #[test]
    fn test_functions_and_constants() {
        let l = State::new();
        LuaBinding::new(&l)
            .unwrap()
            .begin_module("m")
            .unwrap()
            .add_function("twice", |x: i32| x * 2)
            .unwrap()
            .add_constant("LIMIT", 10)
            .unwrap()
            .end_module();

        let twice = eval_global(&l, &["m", "twice"]);
        assert_eq!(twice.call::<_, i32>(21).unwrap(), 42);
        let m = eval_global(&l, &["m"]);
        assert_eq!(m.get::<_, i32>("LIMIT").unwrap(), 10);
        assert_eq!(
            m.set("LIMIT", 3).unwrap_err().to_string(),
            "'LIMIT' is read-only"
        );
    }

    #[test]
    fn test_variable_writes_through() {
        let l = State::new();
        let cell = Rc::new(RefCell::new(1));
        LuaBinding::new(&l)
            .unwrap()
            .begin_module("m")
            .unwrap()
            .add_variable("v", cell.clone())
            .unwrap()
            .end_module();

        let m = eval_global(&l, &["m"]);
        m.set("v", 5).unwrap();
        assert_eq!(*cell.borrow(), 5);
        *cell.borrow_mut() = 9;
        assert_eq!(m.get::<_, i32>("v").unwrap(), 9);
        assert_eq!(
            m.set("missing", 1).unwrap_err().to_string(),
            "no writable variable 'missing'"
        );
    }

    #[test]
    fn test_factory_skips_module_argument() {
        let l = State::new();
        LuaBinding::new(&l)
            .unwrap()
            .begin_module("m")
            .unwrap()
            .add_factory(|a: i32, b: i32| a - b)
            .unwrap()
            .end_module();

        let m = eval_global(&l, &["m"]);
        assert_eq!(m.call::<_, i32>((10, 4)).unwrap(), 6);
    }
}
