use std::cell::RefCell;
use std::marker::PhantomData;
use std::rc::Rc;

use luaport_vm::State;

use super::{
    constant_getter, open_class, open_extend_class, open_module, set_accessors, stub,
    ClassTables, ModuleBuilder, Stub,
};
use crate::args::{ArgList, ArgsSpec, Plain};
use crate::convert::{FromLua, ToLua, ToLuaMulti};
use crate::error::Result;
use crate::invoke::{
    call_at, constructor, field_getter, field_setter, function_with, method, method_mut,
    property_getter, property_setter, static_getter, static_setter, variable_getter,
    variable_setter, Callable, Method, MethodMut,
};
use crate::object::{Class, IntoObject};
use crate::value_ref::LuaRef;

/// Builder for the members of class `T`; `end_class` returns to the parent
/// builder
pub struct ClassBuilder<T, P> {
    state: Rc<State>,
    tables: ClassTables,
    parent: P,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Class, P> ClassBuilder<T, P> {
    pub(crate) fn new(state: Rc<State>, tables: ClassTables, parent: P) -> Self {
        ClassBuilder {
            state,
            tables,
            parent,
            _marker: PhantomData,
        }
    }

    /// The static table, visible to script under the class name
    pub fn table(&self) -> &LuaRef {
        &self.tables.static_
    }

    /// `Class(...)` builds a new object from `f(...)`. `f` may return the
    /// object by value, as `Rc<RefCell<T>>`, as a pointer or as an `Option`.
    pub fn add_constructor<F, A, R>(self, f: F) -> Result<Self>
    where
        F: Callable<A, R>,
        A: ArgList,
        Plain: ArgsSpec<A>,
        R: IntoObject<Target = T>,
    {
        self.add_constructor_with(f, Plain)
    }

    pub fn add_constructor_with<F, A, R, S>(self, f: F, spec: S) -> Result<Self>
    where
        F: Callable<A, R>,
        A: ArgList,
        S: ArgsSpec<A> + 'static,
        R: IntoObject<Target = T>,
    {
        self.tables
            .static_
            .raw_set("__call", constructor::<T, _, _, _, _>(f, spec))?;
        Ok(self)
    }

    /// `Class(...)` returns whatever `f(...)` returns
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
        self.tables.static_.raw_set("__call", call_at(f, spec, 2))?;
        Ok(self)
    }

    /// Field exposed by reference; const objects can read but not write it
    pub fn add_variable<V, G, M>(self, name: &str, get: G, get_mut: M) -> Result<Self>
    where
        V: ToLua + FromLua + Clone + 'static,
        G: Fn(&T) -> &V + 'static,
        M: Fn(&mut T) -> &mut V + 'static,
    {
        let denied = stub(&self.state, Stub::ConstMismatch, name)?;
        set_accessors(&self.tables.class, name, field_getter(get), field_setter(get_mut))?;
        self.const_setter(name, denied)?;
        Ok(self)
    }

    pub fn add_variable_readonly<V, G>(self, name: &str, get: G) -> Result<Self>
    where
        V: ToLua + Clone + 'static,
        G: Fn(&T) -> &V + 'static,
    {
        let read_only = stub(&self.state, Stub::ReadOnlyMember, name)?;
        set_accessors(&self.tables.class, name, field_getter(get), &read_only)?;
        self.const_setter(name, read_only)?;
        Ok(self)
    }

    /// Property computed by `get` and stored by `set`
    pub fn add_property<V, G, S>(self, name: &str, get: G, set: S) -> Result<Self>
    where
        V: ToLua + FromLua + 'static,
        G: Fn(&T) -> V + 'static,
        S: Fn(&mut T, V) + 'static,
    {
        let denied = stub(&self.state, Stub::ConstMismatch, name)?;
        set_accessors(&self.tables.class, name, property_getter(get), property_setter(set))?;
        self.const_setter(name, denied)?;
        Ok(self)
    }

    pub fn add_property_readonly<V, G>(self, name: &str, get: G) -> Result<Self>
    where
        V: ToLua + 'static,
        G: Fn(&T) -> V + 'static,
    {
        let read_only = stub(&self.state, Stub::ReadOnlyMember, name)?;
        set_accessors(&self.tables.class, name, property_getter(get), &read_only)?;
        self.const_setter(name, read_only)?;
        Ok(self)
    }

    /// Method taking `&T`; callable on const and non-const objects
    pub fn add_method<F, A, R>(self, name: &str, f: F) -> Result<Self>
    where
        F: Method<T, A, R>,
        A: ArgList,
        Plain: ArgsSpec<A>,
        R: ToLuaMulti,
    {
        self.add_method_with(name, f, Plain)
    }

    pub fn add_method_with<F, A, R, S>(self, name: &str, f: F, spec: S) -> Result<Self>
    where
        F: Method<T, A, R>,
        A: ArgList,
        S: ArgsSpec<A> + 'static,
        R: ToLuaMulti,
    {
        let func = LuaRef::from_value(&self.state, method::<T, _, _, _, _>(f, spec))?;
        self.tables.class.raw_set(name, &func)?;
        self.tables.const_.raw_set(name, &func)?;
        Ok(self)
    }

    /// Method taking `&mut T`; const objects get an error instead
    pub fn add_method_mut<F, A, R>(self, name: &str, f: F) -> Result<Self>
    where
        F: MethodMut<T, A, R>,
        A: ArgList,
        Plain: ArgsSpec<A>,
        R: ToLuaMulti,
    {
        self.add_method_mut_with(name, f, Plain)
    }

    pub fn add_method_mut_with<F, A, R, S>(self, name: &str, f: F, spec: S) -> Result<Self>
    where
        F: MethodMut<T, A, R>,
        A: ArgList,
        S: ArgsSpec<A> + 'static,
        R: ToLuaMulti,
    {
        let denied = stub(&self.state, Stub::ConstMismatch, name)?;
        self.tables
            .class
            .raw_set(name, method_mut::<T, _, _, _, _>(f, spec))?;
        self.tables.const_.raw_set(name, denied)?;
        Ok(self)
    }

    pub fn add_static_function<F, A, R>(self, name: &str, f: F) -> Result<Self>
    where
        F: Callable<A, R>,
        A: ArgList,
        Plain: ArgsSpec<A>,
        R: ToLuaMulti,
    {
        self.add_static_function_with(name, f, Plain)
    }

    pub fn add_static_function_with<F, A, R, S>(self, name: &str, f: F, spec: S) -> Result<Self>
    where
        F: Callable<A, R>,
        A: ArgList,
        S: ArgsSpec<A> + 'static,
        R: ToLuaMulti,
    {
        self.tables.static_.raw_set(name, function_with(f, spec))?;
        Ok(self)
    }

    pub fn add_static_variable<V>(self, name: &str, cell: Rc<RefCell<V>>) -> Result<Self>
    where
        V: ToLua + FromLua + Clone + 'static,
    {
        let getter = variable_getter(cell.clone());
        set_accessors(&self.tables.static_, name, getter, variable_setter(cell))?;
        Ok(self)
    }

    pub fn add_static_variable_readonly<V>(self, name: &str, cell: Rc<RefCell<V>>) -> Result<Self>
    where
        V: ToLua + Clone + 'static,
    {
        let read_only = stub(&self.state, Stub::ReadOnlyMember, name)?;
        set_accessors(&self.tables.static_, name, variable_getter(cell), read_only)?;
        Ok(self)
    }

    pub fn add_static_property<V, G, S>(self, name: &str, get: G, set: S) -> Result<Self>
    where
        V: ToLua + FromLua + 'static,
        G: Fn() -> V + 'static,
        S: Fn(V) + 'static,
    {
        set_accessors(&self.tables.static_, name, static_getter(get), static_setter(set))?;
        Ok(self)
    }

    pub fn add_static_property_readonly<V, G>(self, name: &str, get: G) -> Result<Self>
    where
        V: ToLua + 'static,
        G: Fn() -> V + 'static,
    {
        let read_only = stub(&self.state, Stub::ReadOnlyMember, name)?;
        set_accessors(&self.tables.static_, name, static_getter(get), read_only)?;
        Ok(self)
    }

    /// Static value converted once at bind time
    pub fn add_constant<V: ToLua>(self, name: &str, value: V) -> Result<Self> {
        let getter = constant_getter(&self.state, value)?;
        let read_only = stub(&self.state, Stub::ReadOnlyMember, name)?;
        set_accessors(&self.tables.static_, name, getter, read_only)?;
        Ok(self)
    }

    /// Nested module under the class name
    pub fn begin_module(self, name: &str) -> Result<ModuleBuilder<Self>> {
        let table = open_module(&self.state, &self.tables.static_, name)?;
        Ok(ModuleBuilder::new(self.state.clone(), table, self))
    }

    /// Nested class under the class name
    pub fn begin_class<U: Class>(self, name: &str) -> Result<ClassBuilder<U, Self>> {
        let (tables, _) = open_class::<U>(&self.state, &self.tables.static_, name)?;
        Ok(ClassBuilder::new(self.state.clone(), tables, self))
    }

    pub fn begin_extend_class<U, B>(self, name: &str) -> Result<ClassBuilder<U, Self>>
    where
        U: Class + AsRef<B> + AsMut<B>,
        B: Class,
    {
        let tables = open_extend_class::<U, B>(&self.state, &self.tables.static_, name)?;
        Ok(ClassBuilder::new(self.state.clone(), tables, self))
    }

    pub fn end_class(self) -> P {
        self.parent
    }

    fn const_setter(&self, name: &str, setter: LuaRef) -> Result<()> {
        let setters: LuaRef = self.tables.const_.raw_get("___setters")?;
        setters.raw_set(name, setter)
    }
}
