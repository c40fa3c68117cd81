//! Invocation adapters
//!
//! Turn Rust callables into VM native functions. Every adapter converts all
//! arguments first, then invokes, then pushes results and output
//! parameters. Errors and panics are caught here and surface as VM errors;
//! nothing unwinds through the VM.

use std::any::Any;
use std::cell::RefCell;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use luaport_vm::{upvalue_index, LuaResult, NativeFn, State};

use crate::args::{ArgList, ArgsSpec, Output, Plain};
use crate::convert::{FromLua, LuaFunction, ToLua, ToLuaMulti};
use crate::error::{Error, Result};
use crate::object::{push_object, Class, IntoObject, ObjectMut, ObjectRef};

/// Free function or closure taking the parameter tuple `A`
pub trait Callable<A, R>: 'static {
    fn invoke(&self, args: A) -> R;
}

/// Method with a shared receiver
pub trait Method<T, A, R>: 'static {
    fn invoke(&self, this: &T, args: A) -> R;
}

/// Method with an exclusive receiver
pub trait MethodMut<T, A, R>: 'static {
    fn invoke(&self, this: &mut T, args: A) -> R;
}

macro_rules! impl_callable {
    ($($P:ident $p:ident),*) => {
        impl<F, R, $($P),*> Callable<($($P,)*), R> for F
        where
            F: Fn($($P),*) -> R + 'static,
        {
            #[allow(unused_variables)]
            fn invoke(&self, args: ($($P,)*)) -> R {
                let ($($p,)*) = args;
                self($($p),*)
            }
        }

        impl<F, T, R, $($P),*> Method<T, ($($P,)*), R> for F
        where
            F: Fn(&T, $($P),*) -> R + 'static,
        {
            #[allow(unused_variables)]
            fn invoke(&self, this: &T, args: ($($P,)*)) -> R {
                let ($($p,)*) = args;
                self(this, $($p),*)
            }
        }

        impl<F, T, R, $($P),*> MethodMut<T, ($($P,)*), R> for F
        where
            F: Fn(&mut T, $($P),*) -> R + 'static,
        {
            #[allow(unused_variables)]
            fn invoke(&self, this: &mut T, args: ($($P,)*)) -> R {
                let ($($p,)*) = args;
                self(this, $($p),*)
            }
        }
    };
}

impl_callable!();
impl_callable!(P1 p1);
impl_callable!(P1 p1, P2 p2);
impl_callable!(P1 p1, P2 p2, P3 p3);
impl_callable!(P1 p1, P2 p2, P3 p3, P4 p4);
impl_callable!(P1 p1, P2 p2, P3 p3, P4 p4, P5 p5);
impl_callable!(P1 p1, P2 p2, P3 p3, P4 p4, P5 p5, P6 p6);
impl_callable!(P1 p1, P2 p2, P3 p3, P4 p4, P5 p5, P6 p6, P7 p7);
impl_callable!(P1 p1, P2 p2, P3 p3, P4 p4, P5 p5, P6 p6, P7 p7, P8 p8);

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}

/// Run a native callback body, converting errors and panics into VM errors
pub(crate) fn protect<F>(f: F) -> LuaResult<i32>
where
    F: FnOnce() -> Result<i32>,
{
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result.map_err(Into::into),
        Err(panic) => Err(Error::Panic(panic_message(panic)).into()),
    }
}

fn native<F>(f: F) -> LuaFunction
where
    F: Fn(&State) -> Result<i32> + 'static,
{
    let func: NativeFn = Rc::new(move |state: &State| protect(|| f(state)));
    LuaFunction::from_native(func)
}

/// Wrap a Rust callable as a VM function
pub fn function<F, A, R>(f: F) -> LuaFunction
where
    F: Callable<A, R>,
    A: ArgList,
    Plain: ArgsSpec<A>,
    R: ToLuaMulti,
{
    function_with(f, Plain)
}

/// Wrap a Rust callable as a VM function with an argument spec
pub fn function_with<F, A, R, S>(f: F, spec: S) -> LuaFunction
where
    F: Callable<A, R>,
    A: ArgList,
    S: ArgsSpec<A> + 'static,
    R: ToLuaMulti,
{
    call_at(f, spec, 1)
}

/// Arguments start at `base`; used for `__call` handlers where slot 1 is
/// the called table
pub(crate) fn call_at<F, A, R, S>(f: F, spec: S, base: i32) -> LuaFunction
where
    F: Callable<A, R>,
    A: ArgList,
    S: ArgsSpec<A> + 'static,
    R: ToLuaMulti,
{
    native(move |state| {
        let args = spec.read_args(state, base)?;
        let outputs = args.outputs();
        let n = f.invoke(args).push_multi(state)?;
        Ok(n + outputs.push_back(state)?)
    })
}

pub(crate) fn method<T, F, A, R, S>(f: F, spec: S) -> LuaFunction
where
    T: Class,
    F: Method<T, A, R>,
    A: ArgList,
    S: ArgsSpec<A> + 'static,
    R: ToLuaMulti,
{
    native(move |state| {
        let this = ObjectRef::<T>::from_lua(state, 1)?;
        let args = spec.read_args(state, 2)?;
        let outputs = args.outputs();
        let ret = {
            let this = this.borrow()?;
            f.invoke(&this, args)
        };
        let n = ret.push_multi(state)?;
        Ok(n + outputs.push_back(state)?)
    })
}

pub(crate) fn method_mut<T, F, A, R, S>(f: F, spec: S) -> LuaFunction
where
    T: Class,
    F: MethodMut<T, A, R>,
    A: ArgList,
    S: ArgsSpec<A> + 'static,
    R: ToLuaMulti,
{
    native(move |state| {
        let this = ObjectMut::<T>::from_lua(state, 1)?;
        let args = spec.read_args(state, 2)?;
        let outputs = args.outputs();
        let ret = {
            let mut this = this.borrow_mut()?;
            f.invoke(&mut this, args)
        };
        let n = ret.push_multi(state)?;
        Ok(n + outputs.push_back(state)?)
    })
}

/// `__call` handler of a static table; slot 1 is the table itself
pub(crate) fn constructor<T, F, A, R, S>(f: F, spec: S) -> LuaFunction
where
    T: Class,
    F: Callable<A, R>,
    A: ArgList,
    S: ArgsSpec<A> + 'static,
    R: IntoObject<Target = T>,
{
    native(move |state| {
        let args = spec.read_args(state, 2)?;
        let outputs = args.outputs();
        push_object(state, f.invoke(args), false)?;
        Ok(1 + outputs.push_back(state)?)
    })
}

/// Getter reading a field through a shared borrow of the receiver
pub(crate) fn field_getter<T, V, G>(get: G) -> LuaFunction
where
    T: Class,
    V: ToLua + Clone,
    G: Fn(&T) -> &V + 'static,
{
    native(move |state| {
        let this = ObjectRef::<T>::from_lua(state, 1)?;
        let value = get(&*this.borrow()?).clone();
        value.push(state)?;
        Ok(1)
    })
}

/// Setter writing a field through an exclusive borrow of the receiver
pub(crate) fn field_setter<T, V, G>(get_mut: G) -> LuaFunction
where
    T: Class,
    V: FromLua,
    G: Fn(&mut T) -> &mut V + 'static,
{
    native(move |state| {
        let this = ObjectMut::<T>::from_lua(state, 1)?;
        let value = V::from_lua(state, 2).map_err(|e| Error::bad_argument(2, e))?;
        *get_mut(&mut *this.borrow_mut()?) = value;
        Ok(0)
    })
}

pub(crate) fn property_getter<T, V, G>(get: G) -> LuaFunction
where
    T: Class,
    V: ToLua,
    G: Fn(&T) -> V + 'static,
{
    native(move |state| {
        let this = ObjectRef::<T>::from_lua(state, 1)?;
        let value = get(&*this.borrow()?);
        value.push(state)?;
        Ok(1)
    })
}

pub(crate) fn property_setter<T, V, S>(set: S) -> LuaFunction
where
    T: Class,
    V: FromLua,
    S: Fn(&mut T, V) + 'static,
{
    native(move |state| {
        let this = ObjectMut::<T>::from_lua(state, 1)?;
        let value = V::from_lua(state, 2).map_err(|e| Error::bad_argument(2, e))?;
        set(&mut *this.borrow_mut()?, value);
        Ok(0)
    })
}

/// Getter without a receiver
pub(crate) fn static_getter<V, G>(get: G) -> LuaFunction
where
    V: ToLua,
    G: Fn() -> V + 'static,
{
    native(move |state| {
        get().push(state)?;
        Ok(1)
    })
}

/// Setter without a receiver; the value is argument 1
pub(crate) fn static_setter<V, S>(set: S) -> LuaFunction
where
    V: FromLua,
    S: Fn(V) + 'static,
{
    native(move |state| {
        let value = V::from_lua(state, 1).map_err(|e| Error::bad_argument(1, e))?;
        set(value);
        Ok(0)
    })
}

pub(crate) fn variable_getter<V>(cell: Rc<RefCell<V>>) -> LuaFunction
where
    V: ToLua + Clone + 'static,
{
    static_getter(move || cell.borrow().clone())
}

pub(crate) fn variable_setter<V>(cell: Rc<RefCell<V>>) -> LuaFunction
where
    V: FromLua + 'static,
{
    static_setter(move |v: V| *cell.borrow_mut() = v)
}

/// Push a getter returning the value on top of the stack, which becomes its
/// upvalue
pub(crate) fn push_constant_getter(state: &State) {
    native(|state| {
        state.push_value(upvalue_index(1));
        Ok(1)
    })
    .push_with_upvalues(state, 1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args::{Def, Out};

    fn call(state: &State, f: LuaFunction, args: &[i64]) -> LuaResult<()> {
        f.push(state).map_err(luaport_vm::LuaError::from)?;
        for a in args {
            state.push_integer(*a);
        }
        state.pcall(args.len() as i32, luaport_vm::MULTRET)
    }

    #[test]
    fn test_function_pushes_result() {
        let l = State::new();
        call(&l, function(|a: i32, b: i32| a + b), &[2, 3]).unwrap();
        assert_eq!(l.top(), 1);
        assert_eq!(l.to_integer(1), Some(5));
    }

    #[test]
    fn test_unit_return_pushes_nothing() {
        let l = State::new();
        call(&l, function(|_a: i32| {}), &[1]).unwrap();
        assert_eq!(l.top(), 0);
    }

    #[test]
    fn test_outputs_follow_results() {
        let l = State::new();
        let f = function(|a: i64, rest: Out<i64>| {
            rest.set(a % 3);
            a / 3
        });
        call(&l, f, &[10]).unwrap();
        assert_eq!(l.top(), 2);
        assert_eq!(l.to_integer(1), Some(3));
        assert_eq!(l.to_integer(2), Some(1));
    }

    #[test]
    fn test_bad_argument_before_invocation() {
        let l = State::new();
        let ran = Rc::new(std::cell::Cell::new(false));
        let flag = ran.clone();
        function(move |_a: i32, _b: String| flag.set(true))
            .push(&l)
            .unwrap();
        l.push_integer(1);
        l.new_table();
        let err = l.pcall(2, 0).unwrap_err();
        assert_eq!(err.message(), "bad argument #2 (string expected, got table)");
        assert!(!ran.get());
    }

    #[test]
    fn test_panic_becomes_error() {
        let l = State::new();
        let err = call(&l, function(|| -> i32 { panic!("boom") }), &[]).unwrap_err();
        assert_eq!(err.message(), "panic in native callback: boom");
        assert_eq!(l.top(), 0);

        call(&l, function(|a: i32| a), &[9]).unwrap();
        assert_eq!(l.to_integer(-1), Some(9));
    }

    #[test]
    fn test_function_with_defaults() {
        let l = State::new();
        let f = function_with(|a: i32, b: i32| a * b, (Def(2), Def(10)));
        call(&l, f, &[3]).unwrap();
        assert_eq!(l.to_integer(-1), Some(30));
    }

    #[test]
    fn test_constant_getter_reads_upvalue() {
        let l = State::new();
        l.push_str("fixed");
        push_constant_getter(&l);
        l.pcall(0, 1).unwrap();
        assert_eq!(l.to_str(-1).as_deref(), Some("fixed"));
    }
}
