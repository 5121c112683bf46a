// Copyright the graphbolt authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//    https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

// heavily inspired by [serde_json]'s `json!` macro
// [serde_json]: https://github.com/serde-rs/json

// imports for docs
#[allow(unused)]
use std::collections::HashMap;

#[cfg(doc)]
use crate::ValueSend;

#[cfg(test)]
macro_rules! hash_map {
    () => {std::collections::HashMap::new()};
    ( $($key:expr => $value:expr),* $(,)? ) => {
        {
            let mut m = std::collections::HashMap::new();
            $(
                m.insert($key, $value);
            )*
            m
        }
    };
}

#[cfg(test)]
pub(crate) use hash_map;

/// Short notation for creating a [`ValueSend`].
///
/// # Examples
///
/// Special values:
/// ```
/// use graphbolt::{value, ValueSend};
///
/// // null
/// assert_eq!(ValueSend::Null, value!(null));
///
/// // true, false
/// assert_eq!(ValueSend::Boolean(true), value!(true));
/// assert_eq!(ValueSend::Boolean(false), value!(false));
/// ```
///
/// Any value that implements [`Into<ValueSend>`] (see also [`ValueSend`]):
/// ```
/// use graphbolt::{value, ValueSend};
///
/// assert_eq!(ValueSend::Integer(1), value!(1));
/// assert_eq!(ValueSend::Float(1.234), value!(1.234));
/// assert_eq!(ValueSend::String(String::from("foo")), value!("foo"));
/// ```
///
/// Create [`ValueSend::Bytes`]:
/// ```
/// use graphbolt::{value, ValueSend};
///
/// assert_eq!(ValueSend::Bytes(vec![1, 2, 3]), value!(bytes(1, 2, 3)));
/// ```
///
/// Create a [`ValueSend::List`]:
/// ```
/// use graphbolt::{value, ValueSend};
///
/// assert_eq!(
///     ValueSend::List(vec![
///         ValueSend::Integer(1),
///         ValueSend::Float(2.),
///         ValueSend::Null
///     ]),
///     value!([1, 2., null])
/// );
/// ```
///
/// Create a [`ValueSend::Map`]:
/// ```
/// use std::collections::HashMap;
/// use graphbolt::{value, ValueSend};
///
/// let mut map = HashMap::new();
/// map.insert(String::from("foo"), ValueSend::Integer(1));
/// map.insert(String::from("bar"), ValueSend::Null);
/// let map = map;
///
/// assert_eq!(ValueSend::Map(map), value!({"foo": 1, "bar": null}));
/// ```
#[macro_export(local_inner_macros)]
macro_rules! value {
    // Hide distracting implementation details from the generated rustdoc.
    ($($value:tt)+) => {
        __value_internal!($($value)+)
    };
}

/// Short notation for creating a [`HashMap<String, ValueSend>`].
///
/// This macro can be useful, for example, for specifying query parameters.
///
/// The format is either `value_map!()` for an empty map or
/// `value_map!({"key": value, ...})` where value is anything accepted by
/// [`value!`]:
/// ```
/// use std::collections::HashMap;
/// use graphbolt::{value_map, ValueSend};
///
/// let map = {
///     let mut map = HashMap::new();
///     map.insert(String::from("foo"), ValueSend::Integer(1));
///     map.insert(String::from("bar"), ValueSend::Null);
///     map
/// };
///
/// assert_eq!(map, value_map!({"foo": 1, "bar": null}));
/// ```
#[macro_export(local_inner_macros)]
macro_rules! value_map {
    ($(,)?) => {
        std::collections::HashMap::<String, $crate::ValueSend>::new()
    };

    ({ $($tt:tt)+ }) => {
        {
            let mut map = std::collections::HashMap::<String, $crate::ValueSend>::new();
            __value_internal!(@map map () ($($tt)+) ($($tt)+));
            map
        }
    };
}

#[macro_export]
#[doc(hidden)]
macro_rules! __value_internal {
    //////////////////////////////////////////////////////////////////////////
    // TT muncher for parsing the inside of a list [...].
    // Produces a vec![...] of the elements.
    //
    // Must be invoked as: __value_internal!(@list [] $($tt)*)
    //////////////////////////////////////////////////////////////////////////

    // Done with trailing comma.
    (@list [$($elems:expr,)*]) => {
        vec![$($elems,)*]
    };

    // Done without trailing comma.
    (@list [$($elems:expr),*]) => {
        vec![$($elems),*]
    };

    // Next element is `null`.
    (@list [$($elems:expr,)*] null $($rest:tt)*) => {
        $crate::__value_internal!(@list [$($elems,)* $crate::__value_internal!(null)] $($rest)*)
    };

    // Next element is a list.
    (@list [$($elems:expr,)*] [$($array:tt)*] $($rest:tt)*) => {
        $crate::__value_internal!(@list [$($elems,)* $crate::__value_internal!([$($array)*])] $($rest)*)
    };

    // Next element is a map.
    (@list [$($elems:expr,)*] {$($map:tt)*} $($rest:tt)*) => {
        $crate::__value_internal!(@list [$($elems,)* $crate::__value_internal!({$($map)*})] $($rest)*)
    };

    // Next element are bytes.
    (@list [$($elems:expr,)*] bytes($($bytes:tt)*) $($rest:tt)*) => {
        $crate::__value_internal!(@list [$($elems,)* $crate::__value_internal!(bytes($($bytes)*))] $($rest)*)
    };

    // Next element is an expression followed by comma.
    (@list [$($elems:expr,)*] $next:expr, $($rest:tt)*) => {
        $crate::__value_internal!(@list [$($elems,)* $crate::__value_internal!($next),] $($rest)*)
    };

    // Last element is an expression with no trailing comma.
    (@list [$($elems:expr,)*] $last:expr) => {
        $crate::__value_internal!(@list [$($elems,)* $crate::__value_internal!($last)])
    };

    // Comma after the most recent element.
    (@list [$($elems:expr),*] , $($rest:tt)*) => {
        $crate::__value_internal!(@list [$($elems,)*] $($rest)*)
    };

    // Unexpected token after most recent element.
    (@list [$($elems:expr),*] $unexpected:tt $($rest:tt)*) => {
        $crate::__value_unexpected!($unexpected)
    };

    //////////////////////////////////////////////////////////////////////////
    // TT muncher for parsing the inside of a map {...}. Each entry is
    // inserted into the given map variable.
    //
    // Must be invoked as: __value_internal!(@map $map () ($($tt)*) ($($tt)*))
    //
    // We require two copies of the input tokens so that we can match on one
    // copy and trigger errors on the other copy.
    //////////////////////////////////////////////////////////////////////////

    // Done.
    (@map $map:ident () () ()) => {};

    // Insert the current entry followed by trailing comma.
    (@map $map:ident [$($key:tt)+] ($value:expr) , $($rest:tt)*) => {
        let _ = $map.insert(($($key)+).into(), $value);
        $crate::__value_internal!(@map $map () ($($rest)*) ($($rest)*));
    };

    // Current entry followed by unexpected token.
    (@map $map:ident [$($key:tt)+] ($value:expr) $unexpected:tt $($rest:tt)*) => {
        $crate::__value_unexpected!($unexpected);
    };

    // Insert the last entry without trailing comma.
    (@map $map:ident [$($key:tt)+] ($value:expr)) => {
        let _ = $map.insert(($($key)+).into(), $value);
    };

    // Next value is `null`.
    (@map $map:ident ($($key:tt)+) (: null $($rest:tt)*) $copy:tt) => {
        $crate::__value_internal!(@map $map [$($key)+] ($crate::__value_internal!(null)) $($rest)*);
    };

    // Next value is a list.
    (@map $map:ident ($($key:tt)+) (: [$($array:tt)*] $($rest:tt)*) $copy:tt) => {
        $crate::__value_internal!(@map $map [$($key)+] ($crate::__value_internal!([$($array)*])) $($rest)*);
    };

    // Next value is a map.
    (@map $map:ident ($($key:tt)+) (: {$($mapp:tt)*} $($rest:tt)*) $copy:tt) => {
        $crate::__value_internal!(@map $map [$($key)+] ($crate::__value_internal!({$($mapp)*})) $($rest)*);
    };

    // Next value are bytes.
    (@map $map:ident ($($key:tt)+) (: bytes( $($bytes:tt)* ) $($rest:tt)*) $copy:tt) => {
        $crate::__value_internal!(@map $map [$($key)+] ($crate::__value_internal!(bytes($($bytes)*))) $($rest)*);
    };

    // Next value is an expression followed by comma.
    (@map $map:ident ($($key:tt)+) (: $value:expr , $($rest:tt)*) $copy:tt) => {
        $crate::__value_internal!(@map $map [$($key)+] ($crate::__value_internal!($value)) , $($rest)*);
    };

    // Last value is an expression with no trailing comma.
    (@map $map:ident ($($key:tt)+) (: $value:expr) $copy:tt) => {
        $crate::__value_internal!(@map $map [$($key)+] ($crate::__value_internal!($value)));
    };

    // Missing value for last entry. Trigger a reasonable error message.
    (@map $map:ident ($($key:tt)+) (:) $copy:tt) => {
        // "unexpected end of macro invocation"
        $crate::__value_internal!();
    };

    // Missing colon and value for last entry. Trigger a reasonable error
    // message.
    (@map $map:ident ($($key:tt)+) () $copy:tt) => {
        // "unexpected end of macro invocation"
        $crate::__value_internal!();
    };

    // Misplaced colon. Trigger a reasonable error message.
    (@map $map:ident () (: $($rest:tt)*) ($colon:tt $($copy:tt)*)) => {
        // Takes no arguments so "no rules expected the token `:`".
        $crate::__value_unexpected!($colon);
    };

    // Found a comma inside a key. Trigger a reasonable error message.
    (@map $map:ident ($($key:tt)*) (, $($rest:tt)*) ($comma:tt $($copy:tt)*)) => {
        // Takes no arguments so "no rules expected the token `,`".
        $crate::__value_unexpected!($comma);
    };

    // Key is fully parenthesized. This avoids clippy double_parens false
    // positives because the parenthesization may be necessary here.
    (@map $map:ident () (($key:expr) : $($rest:tt)*) $copy:tt) => {
        $crate::__value_internal!(@map $map ($key) (: $($rest)*) (: $($rest)*));
    };

    // Munch a token into the current key.
    (@map $map:ident ($($key:tt)*) ($tt:tt $($rest:tt)*) $copy:tt) => {
        $crate::__value_internal!(@map $map ($($key)* $tt) ($($rest)*) ($($rest)*));
    };

    //////////////////////////////////////////////////////////////////////////
    // The main implementation.
    //
    // Must be invoked as: __value_internal!($($value)+)
    //////////////////////////////////////////////////////////////////////////

    (null) => {
        $crate::ValueSend::Null
    };

    ([]) => {
        $crate::ValueSend::List(vec![])
    };

    ([ $($tt:tt)+ ]) => {
        $crate::ValueSend::List($crate::__value_internal!(@list [] $($tt)+))
    };

    ({$(,)?}) => {
        $crate::ValueSend::Map(std::collections::HashMap::new())
    };

    ({ $($tt:tt)+ }) => {
        $crate::ValueSend::Map({
            let mut map = std::collections::HashMap::new();
            $crate::__value_internal!(@map map () ($($tt)+) ($($tt)+));
            map
        })
    };

    (bytes()) => {
        $crate::ValueSend::Bytes(vec![])
    };

    (bytes( $($tt:tt),+ $(,)?)) => {
        $crate::ValueSend::Bytes(vec![$($tt),+])
    };

    // Any type implementing Into<ValueSend>: numbers, strings, variables etc.
    // Must be below every other rule.
    ($other:expr) => {
        $other.into()
    };
}

#[macro_export]
#[doc(hidden)]
macro_rules! __value_unexpected {
    () => {};
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use rstest::rstest;

    use crate::ValueSend;

    #[test]
    fn test_null() {
        assert_eq!(value!(null), ValueSend::Null)
    }

    #[rstest]
    #[case(value!(true), ValueSend::Boolean(true))]
    #[case(value!(false), ValueSend::Boolean(false))]
    fn test_boolean(#[case] input: ValueSend, #[case] output: ValueSend) {
        assert_eq!(input, output);
    }

    #[rstest]
    #[case(value!(1), ValueSend::Integer(1))]
    #[case(value!(-1), ValueSend::Integer(-1))]
    #[case(value!(1u8), ValueSend::Integer(1))]
    #[case(value!(1i32), ValueSend::Integer(1))]
    fn test_integer(#[case] input: ValueSend, #[case] output: ValueSend) {
        assert_eq!(input, output);
    }

    #[rstest]
    #[case(value!(1.), ValueSend::Float(1.))]
    #[case(value!(-1.5), ValueSend::Float(-1.5))]
    fn test_float(#[case] input: ValueSend, #[case] output: ValueSend) {
        assert_eq!(input, output);
    }

    #[test]
    fn test_bytes() {
        assert_eq!(value!(bytes(1, 2, 3)), ValueSend::Bytes(vec![1, 2, 3]));
        assert_eq!(value!(bytes()), ValueSend::Bytes(vec![]));
    }

    #[test]
    fn test_string() {
        let input: ValueSend = value!("foo bar");
        assert_eq!(
            input,
            ValueSend::String(String::from("foo bar"))
        );
    }

    #[test]
    fn test_nested_list() {
        assert_eq!(
            value!([1, [2, 3], null]),
            ValueSend::List(vec![
                ValueSend::Integer(1),
                ValueSend::List(vec![ValueSend::Integer(2), ValueSend::Integer(3)]),
                ValueSend::Null,
            ])
        );
    }

    #[test]
    fn test_value_map() {
        let mut expected = HashMap::new();
        expected.insert(String::from("a"), ValueSend::Integer(1));
        expected.insert(
            String::from("b"),
            ValueSend::List(vec![ValueSend::Boolean(true)]),
        );
        assert_eq!(value_map!({"a": 1, "b": [true]}), expected);
    }

    #[test]
    fn test_empty_value_map() {
        assert_eq!(value_map!(), HashMap::new());
    }
}
