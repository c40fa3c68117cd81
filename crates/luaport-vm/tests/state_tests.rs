//! State API Tests
//!
//! Exercises the stack contract the binding engine relies on:
//! - registry references and pointer keys
//! - metamethod dispatch for index, newindex, call, comparison and length
//! - protected calls and error propagation
//! - per-state extension data

use std::rc::Rc;

use luaport_vm::{
    upvalue_index, CompareOp, LuaError, State, Type, MULTRET, REF_NIL, REGISTRY_INDEX,
};

// ===== Registry Tests =====

#[test]
fn test_reference_roundtrip() {
    let l = State::new();
    l.push_str("kept");
    let r = l.reference();
    assert!(r > 0);
    assert_eq!(l.top(), 0);

    l.push_reference(r);
    assert_eq!(l.to_str(-1).as_deref(), Some("kept"));
    l.pop(1);

    l.unreference(r);
    l.push_reference(r);
    assert!(l.is_nil(-1));
}

#[test]
fn test_reference_nil_and_reuse() {
    let l = State::new();
    l.push_nil();
    assert_eq!(l.reference(), REF_NIL);

    l.push_integer(1);
    let a = l.reference();
    l.unreference(a);
    l.push_integer(2);
    let b = l.reference();
    assert_eq!(a, b);
}

#[test]
fn test_registry_pointer_keys() {
    let l = State::new();
    l.new_table();
    l.raw_set_p(REGISTRY_INDEX, 0x1234).unwrap();

    assert_eq!(l.raw_get_p(REGISTRY_INDEX, 0x1234).unwrap(), Type::Table);
    assert_eq!(l.raw_get_p(REGISTRY_INDEX, 0x5678).unwrap(), Type::Nil);
}

// ===== Table Tests =====

#[test]
fn test_globals_and_fields() {
    let l = State::new();
    l.push_integer(42);
    l.set_global("answer").unwrap();
    assert_eq!(l.get_global("answer").unwrap(), Type::Number);
    assert_eq!(l.to_integer(-1), Some(42));

    l.push_globals();
    l.get_field(-1, "answer").unwrap();
    assert_eq!(l.to_integer(-1), Some(42));
}

#[test]
fn test_next_iterates_in_insertion_order() {
    let l = State::new();
    l.new_table();
    for (i, name) in ["a", "b", "c"].iter().enumerate() {
        l.push_integer(i as i64);
        l.set_field(-2, name).unwrap();
    }

    let mut keys = Vec::new();
    l.push_nil();
    while l.next(1).unwrap() {
        keys.push(l.to_str(-2).unwrap_or_default());
        l.pop(1);
    }
    assert_eq!(keys, vec!["a", "b", "c"]);
}

#[test]
fn test_index_metamethod_table_and_function() {
    let l = State::new();
    // fallback table
    l.new_table();
    l.push_str("from fallback");
    l.set_field(-2, "x").unwrap();

    // metatable with __index = fallback
    l.new_table();
    l.insert(-2);
    l.set_field(-2, "__index").unwrap();

    l.new_table();
    l.insert(-2);
    l.set_metatable(-2).unwrap();

    l.get_field(-1, "x").unwrap();
    assert_eq!(l.to_str(-1).as_deref(), Some("from fallback"));
    l.pop(1);

    // function handler receives (table, key)
    l.new_table();
    l.push_function(|l| {
        let key = l.to_str(2).unwrap_or_default();
        l.push_str(&format!("computed {}", key));
        Ok(1)
    });
    l.set_field(-2, "__index").unwrap();
    l.set_metatable(-2).unwrap();

    l.get_field(-1, "y").unwrap();
    assert_eq!(l.to_str(-1).as_deref(), Some("computed y"));
}

#[test]
fn test_newindex_metamethod() {
    let l = State::new();
    l.new_table();
    l.new_table();
    l.push_function(|l| {
        // t, k, v -> store k .. "!" raw
        let k = l.to_str(2).unwrap_or_default();
        l.push_str(&format!("{}!", k));
        l.push_value(3);
        l.raw_set(1)?;
        Ok(0)
    });
    l.set_field(-2, "__newindex").unwrap();
    l.set_metatable(-2).unwrap();

    l.push_integer(5);
    l.set_field(-2, "v").unwrap();
    l.raw_get_field(-1, "v").unwrap();
    assert!(l.is_nil(-1));
    l.pop(1);
    l.raw_get_field(-1, "v!").unwrap();
    assert_eq!(l.to_integer(-1), Some(5));
}

#[test]
fn test_index_non_table_errors() {
    let l = State::new();
    l.push_integer(1);
    let err = l.get_field(-1, "x").unwrap_err();
    assert_eq!(err.message(), "attempt to index a number value");
}

// ===== Call Tests =====

#[test]
fn test_pcall_multret() {
    let l = State::new();
    l.push_function(|l| {
        l.push_integer(1);
        l.push_integer(2);
        l.push_integer(3);
        Ok(3)
    });
    l.pcall(0, MULTRET).unwrap();
    assert_eq!(l.top(), 3);
    assert_eq!(l.to_integer(3), Some(3));
}

#[test]
fn test_pcall_adjusts_result_count() {
    let l = State::new();
    l.push_function(|l| {
        l.push_integer(1);
        Ok(1)
    });
    l.pcall(0, 3).unwrap();
    assert_eq!(l.top(), 3);
    assert!(l.is_nil(3));
}

#[test]
fn test_call_metamethod_receives_callee() {
    let l = State::new();
    l.new_table();
    l.push_str("me");
    l.set_field(-2, "name").unwrap();
    l.new_table();
    l.push_function(|l| {
        // arg 1 is the called table, arg 2 the first real argument
        l.get_field(1, "name")?;
        l.push_value(2);
        Ok(2)
    });
    l.set_field(-2, "__call").unwrap();
    l.set_metatable(-2).unwrap();

    l.push_integer(7);
    l.pcall(1, 2).unwrap();
    assert_eq!(l.to_str(1).as_deref(), Some("me"));
    assert_eq!(l.to_integer(2), Some(7));
}

#[test]
fn test_calling_non_function_errors() {
    let l = State::new();
    l.push_boolean(true);
    let err = l.pcall(0, 0).unwrap_err();
    assert_eq!(err, LuaError::runtime("attempt to call a boolean value"));
    assert_eq!(l.top(), 0);
}

#[test]
fn test_nested_frames_see_own_arguments() {
    let l = State::new();
    l.push_function(|l| {
        let n = l.to_integer(1).unwrap_or(0);
        l.push_function(|l| {
            l.push_integer(l.top() as i64);
            Ok(1)
        });
        l.push_integer(n);
        l.push_integer(n);
        l.pcall(2, 1)?;
        Ok(1)
    });
    l.push_integer(9);
    l.pcall(1, 1).unwrap();
    assert_eq!(l.to_integer(-1), Some(2));
}

#[test]
fn test_closure_upvalues_pop_from_stack() {
    let l = State::new();
    l.push_str("a");
    l.push_str("b");
    l.push_closure(
        |l| {
            l.push_value(upvalue_index(1));
            l.push_value(upvalue_index(2));
            Ok(2)
        },
        2,
    );
    assert_eq!(l.top(), 1);
    l.pcall(0, 2).unwrap();
    assert_eq!(l.to_str(1).as_deref(), Some("a"));
    assert_eq!(l.to_str(2).as_deref(), Some("b"));
}

// ===== Comparison Tests =====

#[test]
fn test_compare_primitives() {
    let l = State::new();
    l.push_integer(1);
    l.push_number(1.5);
    assert!(l.compare(1, 2, CompareOp::Lt).unwrap());
    assert!(!l.compare(1, 2, CompareOp::Eq).unwrap());
    l.push_str("abc");
    l.push_str("abd");
    assert!(l.compare(3, 4, CompareOp::Le).unwrap());

    let err = l.compare(1, 3, CompareOp::Lt).unwrap_err();
    assert_eq!(err.message(), "attempt to compare number with string");
}

#[test]
fn test_eq_metamethod_on_tables() {
    let l = State::new();
    l.new_table();
    l.push_function(|l| {
        l.push_boolean(true);
        Ok(1)
    });
    l.set_field(-2, "__eq").unwrap();

    l.new_table();
    l.push_value(1);
    l.set_metatable(-2).unwrap();
    l.new_table();
    l.push_value(1);
    l.set_metatable(-2).unwrap();

    assert!(!l.raw_equal(2, 3));
    assert!(l.compare(2, 3, CompareOp::Eq).unwrap());
}

#[test]
fn test_len_honors_metamethod() {
    let l = State::new();
    l.new_table();
    for i in 1..=4 {
        l.push_integer(i);
        l.raw_set_index(-2, i).unwrap();
    }
    l.len(-1).unwrap();
    assert_eq!(l.to_integer(-1), Some(4));
    l.pop(1);

    l.new_table();
    l.push_function(|l| {
        l.push_integer(100);
        Ok(1)
    });
    l.set_field(-2, "__len").unwrap();
    l.set_metatable(-2).unwrap();
    l.len(-1).unwrap();
    assert_eq!(l.to_integer(-1), Some(100));
    assert_eq!(l.raw_len(1), 4);
}

// ===== Userdata & App Data Tests =====

#[test]
fn test_userdata_payload_roundtrip() {
    let l = State::new();
    l.new_userdata(Rc::new(String::from("payload")));
    assert!(l.is_userdata(-1));
    assert_eq!(l.type_name(-1), "userdata");

    let payload = l.to_userdata(-1).unwrap();
    assert_eq!(payload.downcast_ref::<String>().map(String::as_str), Some("payload"));

    let taken = l.take_userdata(-1);
    assert!(taken.is_some());
    assert!(l.to_userdata(-1).is_none());
}

#[test]
fn test_app_data_by_type() {
    #[derive(Debug, PartialEq)]
    struct Marker(u32);

    let l = State::new();
    assert!(l.app_data::<Marker>().is_none());
    l.set_app_data(Marker(3));
    assert_eq!(*l.app_data::<Marker>().unwrap(), Marker(3));
}

#[test]
fn test_handle_upgrades_while_alive() {
    let l = State::new();
    let h = l.handle().unwrap();
    assert!(Rc::ptr_eq(&h, &l));
    let weak = l.weak();
    drop(h);
    drop(l);
    assert!(weak.upgrade().is_none());
}

#[test]
fn test_number_to_string_conversion() {
    let l = State::new();
    l.push_number(3.0);
    l.push_integer(3);
    assert_eq!(l.to_str(1).as_deref(), Some("3.0"));
    assert_eq!(l.to_str(2).as_deref(), Some("3"));
    l.push_bytes(b"a\0b");
    assert_eq!(l.to_bytes(-1).map(|b| b.len()), Some(3));
}
