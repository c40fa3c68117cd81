//! Metamethods installed on class and module metatables

use luaport_vm::{State, Type, MULTRET, REGISTRY_INDEX};
use tracing::trace;

use crate::convert::{LuaFunction, ToLua};
use crate::error::{Error, Result};
use crate::object::SIGNATURE;

/// Upvalue-carried member name of an error stub
fn stub_name(state: &State) -> String {
    state
        .to_str(luaport_vm::upvalue_index(1))
        .unwrap_or_default()
}

fn key_text(state: &State, index: i32) -> String {
    state
        .to_str(index)
        .unwrap_or_else(|| state.describe(index))
}

/// Check `registry[mt[signature]] == mt` for the metatable on top
fn check_signature(state: &State, key_index: i32) -> Result<()> {
    state.raw_get_p(-1, SIGNATURE.as_pointer())?;
    let valid = match state.to_light_userdata(-1) {
        Some(key) => {
            state.raw_get_p(REGISTRY_INDEX, key)?;
            let same = state.raw_equal(-1, -3);
            state.pop(1);
            same
        }
        None => false,
    };
    state.pop(1);
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidMetatable(key_text(state, key_index)))
    }
}

/// `__index` of class, const and static metatables: `(object, key)`
pub(crate) fn class_index(state: &State) -> Result<i32> {
    if !state.get_metatable(1) {
        state.push_nil();
        return Ok(1);
    }
    check_signature(state, 2)?;
    let is_object = state.type_of(1) == Type::Userdata;
    loop {
        state.push_value(2);
        if state.raw_get(-2)? != Type::Nil {
            return Ok(1);
        }
        state.pop(1);

        state.raw_get_field(-1, "___getters")?;
        if state.is_table(-1) {
            state.push_value(2);
            if state.raw_get(-2)? != Type::Nil {
                if is_object {
                    state.push_value(1);
                    state.pcall(1, 1)?;
                } else {
                    state.pcall(0, 1)?;
                }
                return Ok(1);
            }
            state.pop(1);
        }
        state.pop(1);

        state.raw_get_field(-1, "___super")?;
        if !state.is_table(-1) {
            trace!(key = %key_text(state, 2), "member not found");
            state.push_nil();
            return Ok(1);
        }
        state.remove(-2);
    }
}

/// `__newindex` of class, const and static metatables: `(object, key, value)`
pub(crate) fn class_new_index(state: &State) -> Result<i32> {
    if !state.get_metatable(1) {
        return Err(Error::NoWritableMember(key_text(state, 2)));
    }
    check_signature(state, 2)?;
    let is_object = state.type_of(1) == Type::Userdata;
    loop {
        state.raw_get_field(-1, "___setters")?;
        if state.is_table(-1) {
            state.push_value(2);
            if state.raw_get(-2)? != Type::Nil {
                if is_object {
                    state.push_value(1);
                    state.push_value(3);
                    state.pcall(2, 0)?;
                } else {
                    state.push_value(3);
                    state.pcall(1, 0)?;
                }
                return Ok(0);
            }
            state.pop(1);
        }
        state.pop(1);

        state.raw_get_field(-1, "___super")?;
        if !state.is_table(-1) {
            return Err(Error::NoWritableMember(key_text(state, 2)));
        }
        state.remove(-2);
    }
}

/// `__index` of module tables: `(module, key)`, reached only on a raw miss
pub(crate) fn module_index(state: &State) -> Result<i32> {
    if state.get_metatable(1) {
        state.raw_get_field(-1, "___getters")?;
        if state.is_table(-1) {
            state.push_value(2);
            if state.raw_get(-2)? != Type::Nil {
                state.pcall(0, 1)?;
                return Ok(1);
            }
        }
    }
    trace!(key = %key_text(state, 2), "module member not found");
    state.push_nil();
    Ok(1)
}

/// `__newindex` of module tables: `(module, key, value)`
pub(crate) fn module_new_index(state: &State) -> Result<i32> {
    if state.get_metatable(1) {
        state.raw_get_field(-1, "___setters")?;
        if state.is_table(-1) {
            state.push_value(2);
            if state.raw_get(-2)? != Type::Nil {
                state.push_value(3);
                state.pcall(1, 0)?;
                return Ok(0);
            }
        }
    }
    Err(Error::NoWritableVariable(key_text(state, 2)))
}

/// `__gc` of class and const metatables
pub(crate) fn gc_object(state: &State) -> Result<i32> {
    drop(state.take_userdata(1));
    Ok(0)
}

/// Calls `module[name]` with the arguments after the callee
pub(crate) fn forward_call(state: &State) -> Result<i32> {
    let name = stub_name(state);
    state.get_field(1, &name)?;
    state.replace(1)?;
    state.pcall(state.top() - 1, MULTRET)?;
    Ok(state.top())
}

/// Stub kinds; each carries the member name in upvalue 1
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Stub {
    ReadOnlyMember,
    ReadOnlyVariable,
    ConstMismatch,
    Forward,
}

/// Push a stub closure over `name`
pub(crate) fn push_stub(state: &State, stub: Stub, name: &str) -> Result<()> {
    state.push_str(name);
    let f = match stub {
        Stub::ReadOnlyMember => LuaFunction::new(|l| Err(Error::ReadOnlyMember(stub_name(l)))),
        Stub::ReadOnlyVariable => {
            LuaFunction::new(|l| Err(Error::ReadOnlyVariable(stub_name(l))))
        }
        Stub::ConstMismatch => LuaFunction::new(|l| Err(Error::ConstViolation(stub_name(l)))),
        Stub::Forward => LuaFunction::new(forward_call),
    };
    f.push_with_upvalues(state, 1);
    Ok(())
}

/// Wrap one of the handlers above as a pushable function
pub(crate) fn handler(f: fn(&State) -> Result<i32>) -> impl ToLua {
    LuaFunction::new(f)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stub_messages() {
        let l = State::new();
        push_stub(&l, Stub::ReadOnlyMember, "y").unwrap();
        assert_eq!(l.pcall(0, 0).unwrap_err().message(), "class member 'y' is read-only");
        push_stub(&l, Stub::ReadOnlyVariable, "v").unwrap();
        assert_eq!(l.pcall(0, 0).unwrap_err().message(), "'v' is read-only");
        push_stub(&l, Stub::ConstMismatch, "move").unwrap();
        assert_eq!(
            l.pcall(0, 0).unwrap_err().message(),
            "class member function 'move' can not be access by const object"
        );
    }

    #[test]
    fn test_forward_call_drops_callee() {
        let l = State::new();
        l.new_table();
        l.push_function(|l| {
            l.push_integer(l.top() as i64);
            Ok(1)
        });
        l.set_field(-2, "make").unwrap();

        push_stub(&l, Stub::Forward, "make").unwrap();
        l.insert(1);
        l.push_integer(1);
        l.push_integer(2);
        l.pcall(3, 1).unwrap();
        // the forwarded function sees only the two real arguments
        assert_eq!(l.to_integer(-1), Some(2));
    }

    #[test]
    fn test_module_new_index_rejects_unknown() {
        let l = State::new();
        l.new_table();
        l.push_value(-1);
        l.set_metatable(-2).unwrap();
        handler(module_new_index).push(&l).unwrap();
        l.set_field(-2, "__newindex").unwrap();

        l.push_integer(1);
        let err = l.set_field(1, "missing").unwrap_err();
        assert_eq!(err.message(), "no writable variable 'missing'");
    }
}
