//! Object Model Tests
//!
//! Validates identity, ownership and inheritance of bound objects:
//! - class keys are distinct per type and flavor
//! - value objects are finalized exactly once, pointers never, shared
//!   handles adjust the strong count by one
//! - const objects reject mutation without running the method body
//! - base-class members and checks work through multi-level inheritance

mod common;

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use common::*;
use luaport::{
    class_keys, Class, Const, Def, LuaBinding, LuaRef, ObjectMut, ObjectRef, Ptr, Shape, State,
};

/// Bumps its counter when dropped
struct Tracked {
    drops: Rc<Cell<u32>>,
    value: i32,
}

impl Class for Tracked {}

impl Drop for Tracked {
    fn drop(&mut self) {
        self.drops.set(self.drops.get() + 1);
    }
}

fn bind_tracked(l: &State) {
    LuaBinding::new(l)
        .unwrap()
        .begin_class::<Tracked>("Tracked")
        .unwrap()
        .add_variable_readonly("value", |t: &Tracked| &t.value)
        .unwrap()
        .end_class();
}

// ===== Identity Tests =====

#[test]
fn test_class_keys_are_distinct() {
    let point = class_keys::<Point>();
    let tracked = class_keys::<Tracked>();
    let all = [
        point.class,
        point.const_,
        point.static_,
        tracked.class,
        tracked.const_,
        tracked.static_,
    ];
    for (i, a) in all.iter().enumerate() {
        for b in &all[i + 1..] {
            assert_ne!(a, b);
        }
    }
    assert_eq!(class_keys::<Point>(), point);
}

#[test]
fn test_object_of_other_class_is_rejected() {
    let l = new_state();
    bind_point(&l);
    bind_tracked(&l);
    LuaBinding::new(&l)
        .unwrap()
        .add_function("tracked_value", |t: ObjectMut<Tracked>| -> luaport::Result<i32> {
            let value = t.borrow()?.value;
            Ok(value)
        })
        .unwrap();

    let p: LuaRef = global(&l, "Point").call((1, 2)).unwrap();
    let err = global(&l, "tracked_value").call::<_, i32>(&p).unwrap_err();
    assert_eq!(
        err.to_string(),
        "bad argument #1 (class<Tracked> expected, got class<Point>)"
    );

    let err = global(&l, "tracked_value").call::<_, i32>(5).unwrap_err();
    assert_eq!(err.to_string(), "bad argument #1 (expect userdata, got number)");
}

// ===== Ownership Tests =====

#[test]
fn test_value_object_finalized_once() {
    let l = new_state();
    bind_tracked(&l);
    let drops = Rc::new(Cell::new(0));

    let obj = LuaRef::from_value(
        &l,
        Tracked {
            drops: drops.clone(),
            value: 1,
        },
    )
    .unwrap();
    assert_eq!(obj.get::<_, i32>("value").unwrap(), 1);
    l.gc_collect();
    assert_eq!(drops.get(), 0);

    drop(obj);
    l.gc_collect();
    assert_eq!(drops.get(), 1);
    l.gc_collect();
    l.gc_collect();
    assert_eq!(drops.get(), 1);
}

#[test]
fn test_pending_objects_finalized_on_close() {
    let l = new_state();
    bind_tracked(&l);
    let drops = Rc::new(Cell::new(0));
    for value in 0..3 {
        let obj = Tracked {
            drops: drops.clone(),
            value,
        };
        LuaRef::from_value(&l, obj).unwrap();
    }
    assert_eq!(drops.get(), 0);
    drop(l);
    assert_eq!(drops.get(), 3);
}

#[test]
fn test_pointer_object_never_destroys_pointee() {
    let l = new_state();
    bind_tracked(&l);
    let drops = Rc::new(Cell::new(0));
    let mut native = Tracked {
        drops: drops.clone(),
        value: 9,
    };

    let ptr = unsafe { Ptr::new(&mut native as *mut Tracked) }.unwrap();
    let obj = LuaRef::from_value(&l, ptr).unwrap();
    assert_eq!(obj.get::<_, i32>("value").unwrap(), 9);
    drop(obj);
    l.gc_collect();
    l.gc_collect();
    assert_eq!(drops.get(), 0);
    assert_eq!(native.value, 9);

    drop(native);
    assert_eq!(drops.get(), 1);
}

#[test]
fn test_shared_object_adjusts_strong_count() {
    let l = new_state();
    bind_point(&l);
    let native = Rc::new(RefCell::new(Point { x: 1, y: 1 }));

    let obj = LuaRef::from_value(&l, native.clone()).unwrap();
    assert_eq!(Rc::strong_count(&native), 2);

    LuaBinding::new(&l)
        .unwrap()
        .add_function("same", |p: Rc<RefCell<Point>>| Rc::strong_count(&p) as i64)
        .unwrap();
    // the VM copy plus the argument handle plus the test's own
    assert_eq!(global(&l, "same").call::<_, i64>(&obj).unwrap(), 3);

    drop(obj);
    l.gc_collect();
    assert_eq!(Rc::strong_count(&native), 1);
}

#[test]
fn test_shared_handle_from_value_object_fails() {
    let l = new_state();
    bind_point(&l);
    LuaBinding::new(&l)
        .unwrap()
        .add_function("share", |p: Rc<RefCell<Point>>| {
            let x = p.borrow().x;
            x
        })
        .unwrap()
        .add_function("shape", |p: ObjectRef<Point>| format!("{:?}", p.shape()))
        .unwrap();

    let p: LuaRef = global(&l, "Point").call((1, 2)).unwrap();
    let err = global(&l, "share").call::<_, i32>(&p).unwrap_err();
    assert_eq!(err.to_string(), "bad argument #1 (is not shared object)");
    assert_eq!(
        global(&l, "shape").call::<_, String>(&p).unwrap(),
        format!("{:?}", Shape::Value)
    );
}

#[test]
fn test_shared_handle_cannot_default_to_nil() {
    let l = new_state();
    bind_point(&l);
    let fallback = Rc::new(RefCell::new(Point { x: 0, y: 0 }));
    LuaBinding::new(&l)
        .unwrap()
        .add_function_with(
            "norm",
            |p: Rc<RefCell<Point>>| {
                let p = p.borrow();
                p.x.abs() + p.y.abs()
            },
            (Def(fallback),),
        )
        .unwrap();

    let err = global(&l, "norm").call::<_, i32>(()).unwrap_err();
    assert_eq!(err.to_string(), "bad argument #1 (nil passed to reference)");

    let shared = Rc::new(RefCell::new(Point { x: -3, y: 4 }));
    assert_eq!(global(&l, "norm").call::<_, i32>(shared).unwrap(), 7);
}

#[test]
fn test_aliasing_mutable_receivers_is_an_error() {
    let l = new_state();
    bind_point(&l);
    LuaBinding::new(&l)
        .unwrap()
        .add_function(
            "swap_x",
            |a: ObjectMut<Point>, b: ObjectMut<Point>| -> luaport::Result<()> {
                let mut a = a.borrow_mut()?;
                let mut b = b.borrow_mut()?;
                std::mem::swap(&mut a.x, &mut b.x);
                Ok(())
            },
        )
        .unwrap();

    let p: LuaRef = global(&l, "Point").call((1, 2)).unwrap();
    let q: LuaRef = global(&l, "Point").call((3, 4)).unwrap();
    global(&l, "swap_x").call::<_, ()>((&p, &q)).unwrap();
    assert_eq!(p.get::<_, i32>("x").unwrap(), 3);

    let err = global(&l, "swap_x").call::<_, ()>((&p, &p)).unwrap_err();
    assert!(err.to_string().starts_with("object already borrowed"));

    // two pointer objects for one address share a borrow flag
    let ptr = Ptr::from_static(Box::leak(Box::new(Point { x: 0, y: 0 })));
    let a = LuaRef::from_value(&l, ptr).unwrap();
    let b = LuaRef::from_value(&l, ptr).unwrap();
    let err = global(&l, "swap_x").call::<_, ()>((&a, &b)).unwrap_err();
    assert!(err.to_string().starts_with("object already borrowed"));
}

// ===== Const Tests =====

#[test]
fn test_const_object_never_runs_mutator() {
    let l = new_state();
    let calls = Rc::new(Cell::new(0));
    let counted = calls.clone();
    bind_point(&l);
    LuaBinding::new(&l)
        .unwrap()
        .begin_class::<Point>("Point")
        .unwrap()
        .add_method_mut("reset", move |p: &mut Point| {
            counted.set(counted.get() + 1);
            p.x = 0;
        })
        .unwrap()
        .end_class()
        .add_function("take_mut", |p: ObjectMut<Point>| -> luaport::Result<i32> {
            let x = p.borrow()?.x;
            Ok(x)
        })
        .unwrap();

    let p = LuaRef::from_value(&l, Const(Point { x: 3, y: 4 })).unwrap();
    assert_eq!(call_method::<_, i32>(&p, "sum", ()).unwrap(), 7);

    let err = call_method::<_, ()>(&p, "reset", ()).unwrap_err();
    assert_eq!(
        err.to_string(),
        "class member function 'reset' can not be access by const object"
    );
    assert_eq!(calls.get(), 0);

    let err = global(&l, "take_mut").call::<_, i32>(&p).unwrap_err();
    assert_eq!(
        err.to_string(),
        "bad argument #1 (class<Point> expected, got const_class<Point>)"
    );

    let m: LuaRef = global(&l, "Point").call((1, 1)).unwrap();
    call_method::<_, ()>(&m, "reset", ()).unwrap();
    assert_eq!(calls.get(), 1);
}

// ===== Inheritance Tests =====

#[derive(Clone)]
struct Animal {
    name: String,
    legs: i32,
}

impl Class for Animal {}

struct Dog {
    animal: Animal,
    breed: String,
}

impl Class for Dog {}

impl AsRef<Animal> for Dog {
    fn as_ref(&self) -> &Animal {
        &self.animal
    }
}

impl AsMut<Animal> for Dog {
    fn as_mut(&mut self) -> &mut Animal {
        &mut self.animal
    }
}

struct Puppy {
    dog: Dog,
    age: i32,
}

impl Class for Puppy {}

impl AsRef<Dog> for Puppy {
    fn as_ref(&self) -> &Dog {
        &self.dog
    }
}

impl AsMut<Dog> for Puppy {
    fn as_mut(&mut self) -> &mut Dog {
        &mut self.dog
    }
}

fn bind_animals(l: &State) {
    LuaBinding::new(l)
        .unwrap()
        .begin_class::<Animal>("Animal")
        .unwrap()
        .add_method("name", |a: &Animal| a.name.clone())
        .unwrap()
        .add_method_mut("rename", |a: &mut Animal, name: String| a.name = name)
        .unwrap()
        .add_variable("legs", |a: &Animal| &a.legs, |a: &mut Animal| &mut a.legs)
        .unwrap()
        .end_class()
        .begin_extend_class::<Dog, Animal>("Dog")
        .unwrap()
        .add_property_readonly("breed", |d: &Dog| d.breed.clone())
        .unwrap()
        .end_class()
        .begin_extend_class::<Puppy, Dog>("Puppy")
        .unwrap()
        .add_constructor(|name: String, age: i32| Puppy {
            dog: Dog {
                animal: Animal { name, legs: 4 },
                breed: "mixed".to_string(),
            },
            age,
        })
        .unwrap()
        .add_variable_readonly("age", |p: &Puppy| &p.age)
        .unwrap()
        .end_class()
        .add_function("animal_name", |a: ObjectRef<Animal>| -> luaport::Result<String> {
            let name = a.borrow()?.name.clone();
            Ok(name)
        })
        .unwrap();
}

#[test]
fn test_base_members_reachable_from_grandchild() {
    let l = new_state();
    bind_animals(&l);

    let pup: LuaRef = global(&l, "Puppy").call(("Rex", 1)).unwrap();
    assert_eq!(call_method::<_, String>(&pup, "name", ()).unwrap(), "Rex");
    assert_eq!(pup.get::<_, String>("breed").unwrap(), "mixed");
    assert_eq!(pup.get::<_, i32>("age").unwrap(), 1);

    pup.set("legs", 3).unwrap();
    assert_eq!(pup.get::<_, i32>("legs").unwrap(), 3);
    call_method::<_, ()>(&pup, "rename", "Max").unwrap();
    assert_eq!(
        global(&l, "animal_name").call::<_, String>(&pup).unwrap(),
        "Max"
    );

    let animal = pup.to_value::<Animal>().unwrap();
    assert_eq!((animal.name.as_str(), animal.legs), ("Max", 3));
}

#[test]
fn test_const_grandchild_reaches_const_base_members() {
    let l = new_state();
    bind_animals(&l);
    let pup = Puppy {
        dog: Dog {
            animal: Animal {
                name: "Bo".to_string(),
                legs: 4,
            },
            breed: "collie".to_string(),
        },
        age: 2,
    };
    let pup = LuaRef::from_value(&l, Const(pup)).unwrap();

    assert_eq!(call_method::<_, String>(&pup, "name", ()).unwrap(), "Bo");
    assert_eq!(
        global(&l, "animal_name").call::<_, String>(&pup).unwrap(),
        "Bo"
    );
    let err = call_method::<_, ()>(&pup, "rename", "X").unwrap_err();
    assert_eq!(
        err.to_string(),
        "class member function 'rename' can not be access by const object"
    );
    assert_eq!(
        pup.set("legs", 1).unwrap_err().to_string(),
        "class member function 'legs' can not be access by const object"
    );
}

#[test]
fn test_base_object_is_not_a_derived_object() {
    let l = new_state();
    bind_animals(&l);
    LuaBinding::new(&l)
        .unwrap()
        .add_function("puppy_age", |p: ObjectRef<Puppy>| -> luaport::Result<i32> {
            let age = p.borrow()?.age;
            Ok(age)
        })
        .unwrap();

    let animal = LuaRef::from_value(
        &l,
        Animal {
            name: "Cat".to_string(),
            legs: 4,
        },
    )
    .unwrap();
    let err = global(&l, "puppy_age").call::<_, i32>(&animal).unwrap_err();
    assert_eq!(
        err.to_string(),
        "bad argument #1 (const_class<Puppy> expected, got class<Animal>)"
    );
}
