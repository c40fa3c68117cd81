//! Shared fixtures for the integration suites

#![allow(dead_code)]

use std::rc::Rc;

use luaport::{Class, FromLuaMulti, LuaBinding, LuaRef, State, ToLuaMulti};
use tracing_subscriber::EnvFilter;

/// Route `tracing` output to the test writer; `RUST_LOG` selects levels
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn new_state() -> Rc<State> {
    init_tracing();
    State::new()
}

/// Global `name`
pub fn global(l: &State, name: &str) -> LuaRef {
    LuaRef::globals(l).get(name).unwrap()
}

/// `obj:name(args...)`
pub fn call_method<A, R>(obj: &LuaRef, name: &str, args: A) -> luaport::Result<R>
where
    A: ToLuaMulti,
    R: FromLuaMulti,
{
    let l = obj.state()?;
    let top = l.top();
    let f: LuaRef = obj.get(name)?;
    let result = (|| -> luaport::Result<R> {
        luaport::push(&l, &f)?;
        luaport::push(&l, obj)?;
        let n = args.push_multi(&l)?;
        l.pcall(n + 1, R::COUNT)?;
        R::from_lua_multi(&l, top + 1)
    })();
    l.set_top(top);
    result
}

#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Class for Point {}

/// `Point(x, y)` with writable `x`, read-only `y`
pub fn bind_point(l: &State) {
    LuaBinding::new(l)
        .unwrap()
        .begin_class::<Point>("Point")
        .unwrap()
        .add_constructor(|x: i32, y: i32| Point { x, y })
        .unwrap()
        .add_variable("x", |p: &Point| &p.x, |p: &mut Point| &mut p.x)
        .unwrap()
        .add_variable_readonly("y", |p: &Point| &p.y)
        .unwrap()
        .add_method("sum", |p: &Point| p.x + p.y)
        .unwrap()
        .add_method_mut("shift", |p: &mut Point, dx: i32, dy: i32| {
            p.x += dx;
            p.y += dy;
        })
        .unwrap()
        .end_class();
}
