//! Typed decoding of call argument tuples and conversion of native results
//! back into wire values.

use crate::value::WireValue;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("Expected {expected} arguments, got {actual}")]
    Arity { expected: usize, actual: usize },

    #[error("Argument {position}: expected {expected}, got {actual}")]
    Type {
        position: usize,
        expected: &'static str,
        actual: &'static str,
    },
}

/// A single argument that can be read out of a wire value.
pub trait FromWire: Sized {
    /// Name of the accepted variant(s), used in error reports.
    const EXPECTED: &'static str;

    fn from_wire(value: &WireValue) -> Option<Self>;
}

impl FromWire for i32 {
    const EXPECTED: &'static str = "Int";

    fn from_wire(value: &WireValue) -> Option<Self> {
        value.as_int()
    }
}

impl FromWire for i64 {
    const EXPECTED: &'static str = "Int or Long";

    fn from_wire(value: &WireValue) -> Option<Self> {
        value.as_long()
    }
}

impl FromWire for bool {
    const EXPECTED: &'static str = "Bool";

    fn from_wire(value: &WireValue) -> Option<Self> {
        value.as_bool()
    }
}

impl FromWire for String {
    const EXPECTED: &'static str = "Str";

    fn from_wire(value: &WireValue) -> Option<Self> {
        value.as_str().map(str::to_owned)
    }
}

impl FromWire for WireValue {
    const EXPECTED: &'static str = "any value";

    fn from_wire(value: &WireValue) -> Option<Self> {
        Some(value.clone())
    }
}

impl<T: FromWire> FromWire for Option<T> {
    const EXPECTED: &'static str = T::EXPECTED;

    fn from_wire(value: &WireValue) -> Option<Self> {
        match value {
            WireValue::None => Some(None),
            other => T::from_wire(other).map(Some),
        }
    }
}

impl<T: FromWire> FromWire for Vec<T> {
    const EXPECTED: &'static str = "List";

    fn from_wire(value: &WireValue) -> Option<Self> {
        value.as_list()?.iter().map(T::from_wire).collect()
    }
}

/// Read one positional argument, reporting the offending position on failure.
pub fn arg<T: FromWire>(args: &[WireValue], position: usize) -> Result<T, DecodeError> {
    let value = args.get(position).ok_or(DecodeError::Arity {
        expected: position + 1,
        actual: args.len(),
    })?;
    T::from_wire(value).ok_or(DecodeError::Type {
        position,
        expected: T::EXPECTED,
        actual: value.type_name(),
    })
}

/// A complete argument pattern for one method signature.
///
/// Decoding is all-or-nothing: either every position matches or nothing is
/// produced.
pub trait FromArgs: Sized {
    fn from_args(args: &[WireValue]) -> Result<Self, DecodeError>;
}

fn check_arity(args: &[WireValue], expected: usize) -> Result<(), DecodeError> {
    if args.len() == expected {
        Ok(())
    } else {
        Err(DecodeError::Arity {
            expected,
            actual: args.len(),
        })
    }
}

impl FromArgs for () {
    fn from_args(args: &[WireValue]) -> Result<Self, DecodeError> {
        check_arity(args, 0)
    }
}

macro_rules! impl_from_args_tuple {
    ($len:expr; $($name:ident : $idx:tt),+) => {
        impl<$($name: FromWire),+> FromArgs for ($($name,)+) {
            fn from_args(args: &[WireValue]) -> Result<Self, DecodeError> {
                check_arity(args, $len)?;
                Ok(($(arg::<$name>(args, $idx)?,)+))
            }
        }
    };
}

impl_from_args_tuple!(1; A: 0);
impl_from_args_tuple!(2; A: 0, B: 1);
impl_from_args_tuple!(3; A: 0, B: 1, C: 2);
impl_from_args_tuple!(4; A: 0, B: 1, C: 2, D: 3);

/// Accepts any argument tuple, for handlers that ignore their input.
#[derive(Debug, Clone, PartialEq)]
pub struct AnyArgs(pub Vec<WireValue>);

impl FromArgs for AnyArgs {
    fn from_args(args: &[WireValue]) -> Result<Self, DecodeError> {
        Ok(AnyArgs(args.to_vec()))
    }
}

/// Exactly zero arguments.
pub type NoArgs = ();

/// Exactly one `Int` argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SingleIntArg(pub i32);

impl FromArgs for SingleIntArg {
    fn from_args(args: &[WireValue]) -> Result<Self, DecodeError> {
        let (value,) = <(i32,)>::from_args(args)?;
        Ok(SingleIntArg(value))
    }
}

/// Conversion of a handler's native result into a wire tree.
pub trait IntoWire {
    fn into_wire(self) -> WireValue;
}

impl IntoWire for WireValue {
    fn into_wire(self) -> WireValue {
        self
    }
}

impl IntoWire for () {
    fn into_wire(self) -> WireValue {
        WireValue::None
    }
}

macro_rules! impl_into_wire_via_from {
    ($($ty:ty),+) => {
        $(
            impl IntoWire for $ty {
                fn into_wire(self) -> WireValue {
                    WireValue::from(self)
                }
            }
        )+
    };
}

impl_into_wire_via_from!(i32, i64, bool, String, &str);

impl<T: IntoWire> IntoWire for Option<T> {
    fn into_wire(self) -> WireValue {
        self.map(IntoWire::into_wire).unwrap_or(WireValue::None)
    }
}

impl<T: IntoWire> IntoWire for Vec<T> {
    fn into_wire(self) -> WireValue {
        WireValue::List(self.into_iter().map(IntoWire::into_wire).collect())
    }
}

macro_rules! impl_into_wire_tuple {
    ($($name:ident : $idx:tt),+) => {
        impl<$($name: IntoWire),+> IntoWire for ($($name,)+) {
            fn into_wire(self) -> WireValue {
                WireValue::Tuple(vec![$(self.$idx.into_wire()),+])
            }
        }
    };
}

impl_into_wire_tuple!(A: 0);
impl_into_wire_tuple!(A: 0, B: 1);
impl_into_wire_tuple!(A: 0, B: 1, C: 2);
impl_into_wire_tuple!(A: 0, B: 1, C: 2, D: 3);
