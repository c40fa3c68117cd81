//! Argument marshalling
//!
//! A bound callable's parameters are read from consecutive stack slots.
//! Parameters that consume no slot (the state handle, [`Out`]) are skipped
//! when computing indices. An optional spec tuple (`(Arg, Opt, Def(5))`)
//! marks parameters optional or defaulted; its arity must match the
//! parameter list or the binding does not compile.
//!
//! All arguments are converted before the callable runs. Output parameters
//! are pushed after the return values, in declaration order.

use std::cell::RefCell;
use std::rc::Rc;

use luaport_vm::State;

use crate::convert::{FromLua, ToLua};
use crate::error::{Error, Result};

/// A callable parameter
pub trait Param: Sized {
    /// Stack slots consumed
    const SLOTS: i32;

    /// Value pushed back after the call
    type Output: Output;

    fn read(state: &State, index: i32) -> Result<Self>;

    fn output(&self) -> Self::Output;
}

/// Values pushed back after a call. `()` pushes nothing.
pub trait Output {
    fn push_back(self, state: &State) -> Result<i32>;
}

impl<T: FromLua> Param for T {
    const SLOTS: i32 = 1;
    type Output = ();

    fn read(state: &State, index: i32) -> Result<Self> {
        T::from_lua(state, index)
    }

    fn output(&self) {}
}

/// The calling state, available as a parameter without consuming a slot
impl Param for Rc<State> {
    const SLOTS: i32 = 0;
    type Output = ();

    fn read(state: &State, _index: i32) -> Result<Self> {
        Ok(state.handle()?)
    }

    fn output(&self) {}
}

/// Output-only parameter: starts at `T::default()` and is pushed after the
/// return values
pub struct Out<T>(Rc<RefCell<T>>);

impl<T> Out<T> {
    pub fn set(&self, value: T) {
        *self.0.borrow_mut() = value;
    }

    pub fn get(&self) -> T
    where
        T: Clone,
    {
        self.0.borrow().clone()
    }
}

impl<T> Clone for Out<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T: Default + Clone + ToLua> Param for Out<T> {
    const SLOTS: i32 = 0;
    type Output = Out<T>;

    fn read(_state: &State, _index: i32) -> Result<Self> {
        Ok(Out(Rc::new(RefCell::new(T::default()))))
    }

    fn output(&self) -> Out<T> {
        self.clone()
    }
}

impl<T: Clone + ToLua> Output for Out<T> {
    fn push_back(self, state: &State) -> Result<i32> {
        self.get().push(state)?;
        Ok(1)
    }
}

/// Input and output parameter: read from its slot, pushed back after the call
pub struct InOut<T>(Out<T>);

impl<T> InOut<T> {
    pub fn set(&self, value: T) {
        self.0.set(value);
    }

    pub fn get(&self) -> T
    where
        T: Clone,
    {
        self.0.get()
    }
}

impl<T: FromLua + Clone + ToLua> Param for InOut<T> {
    const SLOTS: i32 = 1;
    type Output = Out<T>;

    fn read(state: &State, index: i32) -> Result<Self> {
        let v = T::from_lua(state, index)?;
        Ok(InOut(Out(Rc::new(RefCell::new(v)))))
    }

    fn output(&self) -> Out<T> {
        self.0.clone()
    }
}

/// How one parameter is read
pub trait ArgSpec<P: Param> {
    fn read(&self, state: &State, index: i32) -> Result<P>;
}

/// Required argument
#[derive(Debug, Clone, Copy, Default)]
pub struct Arg;

/// Optional argument, `Default::default()` when none or nil
#[derive(Debug, Clone, Copy, Default)]
pub struct Opt;

/// Optional argument with an explicit default
#[derive(Debug, Clone, Copy)]
pub struct Def<T>(pub T);

impl<P: Param> ArgSpec<P> for Arg {
    fn read(&self, state: &State, index: i32) -> Result<P> {
        P::read(state, index)
    }
}

impl<P: FromLua + Default> ArgSpec<P> for Opt {
    fn read(&self, state: &State, index: i32) -> Result<P> {
        P::opt(state, index, P::default())
    }
}

impl<P: FromLua + Clone> ArgSpec<P> for Def<P> {
    fn read(&self, state: &State, index: i32) -> Result<P> {
        P::opt(state, index, self.0.clone())
    }
}

fn read_arg<P: Param, S: ArgSpec<P>>(spec: &S, state: &State, index: i32) -> Result<P> {
    spec.read(state, index).map_err(|e| {
        if P::SLOTS > 0 {
            Error::bad_argument(index, e)
        } else {
            e
        }
    })
}

/// A parameter tuple
pub trait ArgList: Sized {
    type Outputs: Output;

    fn outputs(&self) -> Self::Outputs;
}

/// Reads a parameter tuple `A` from the stack
pub trait ArgsSpec<A> {
    fn read_args(&self, state: &State, base: i32) -> Result<A>;
}

/// Every parameter required
#[derive(Debug, Clone, Copy, Default)]
pub struct Plain;

macro_rules! impl_args {
    ($($P:ident $S:ident $p:ident $s:ident $o:ident),*) => {
        impl<$($P: Param),*> ArgList for ($($P,)*) {
            type Outputs = ($($P::Output,)*);

            #[allow(clippy::unused_unit)]
            fn outputs(&self) -> Self::Outputs {
                let ($($p,)*) = self;
                ($($p.output(),)*)
            }
        }

        impl<$($o: Output),*> Output for ($($o,)*) {
            #[allow(unused_mut)]
            fn push_back(self, state: &State) -> Result<i32> {
                let ($($o,)*) = self;
                let mut n = 0;
                $(n += $o.push_back(state)?;)*
                Ok(n)
            }
        }

        impl<$($P: Param),*> ArgsSpec<($($P,)*)> for Plain {
            #[allow(unused_mut, unused_variables, unused_assignments)]
            fn read_args(&self, state: &State, base: i32) -> Result<($($P,)*)> {
                let mut index = base;
                $(
                    let $p = read_arg::<$P, _>(&Arg, state, index)?;
                    index += $P::SLOTS;
                )*
                Ok(($($p,)*))
            }
        }

        impl<$($P: Param, $S: ArgSpec<$P>),*> ArgsSpec<($($P,)*)> for ($($S,)*) {
            #[allow(unused_mut, unused_variables, unused_assignments)]
            fn read_args(&self, state: &State, base: i32) -> Result<($($P,)*)> {
                let ($($s,)*) = self;
                let mut index = base;
                $(
                    let $p = read_arg::<$P, _>($s, state, index)?;
                    index += $P::SLOTS;
                )*
                Ok(($($p,)*))
            }
        }
    };
}

impl_args!();
impl_args!(P1 S1 p1 s1 O1);
impl_args!(P1 S1 p1 s1 O1, P2 S2 p2 s2 O2);
impl_args!(P1 S1 p1 s1 O1, P2 S2 p2 s2 O2, P3 S3 p3 s3 O3);
impl_args!(P1 S1 p1 s1 O1, P2 S2 p2 s2 O2, P3 S3 p3 s3 O3, P4 S4 p4 s4 O4);
impl_args!(P1 S1 p1 s1 O1, P2 S2 p2 s2 O2, P3 S3 p3 s3 O3, P4 S4 p4 s4 O4, P5 S5 p5 s5 O5);
impl_args!(
    P1 S1 p1 s1 O1, P2 S2 p2 s2 O2, P3 S3 p3 s3 O3, P4 S4 p4 s4 O4, P5 S5 p5 s5 O5,
    P6 S6 p6 s6 O6
);
impl_args!(
    P1 S1 p1 s1 O1, P2 S2 p2 s2 O2, P3 S3 p3 s3 O3, P4 S4 p4 s4 O4, P5 S5 p5 s5 O5,
    P6 S6 p6 s6 O6, P7 S7 p7 s7 O7
);
impl_args!(
    P1 S1 p1 s1 O1, P2 S2 p2 s2 O2, P3 S3 p3 s3 O3, P4 S4 p4 s4 O4, P5 S5 p5 s5 O5,
    P6 S6 p6 s6 O6, P7 S7 p7 s7 O7, P8 S8 p8 s8 O8
);
