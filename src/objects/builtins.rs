//! The builtin function registry.
//!
//! The compiler resolves builtin names to their index in [`BUILTINS`] and the
//! VM loads them with `GetBuiltin <index>`, so the order of this table is
//! part of the bytecode format.

use super::errors::{Error, Result, ordinal};
use super::format::format;
use super::{BuiltinFunction, MAX_BYTES_LEN, Object};

macro_rules! builtin {
    ($name:literal, $func:expr) => {
        BuiltinFunction {
            name: $name,
            func: $func,
        }
    };
}

pub static BUILTINS: &[BuiltinFunction] = &[
    builtin!("len", builtin_len),
    builtin!("copy", builtin_copy),
    builtin!("append", builtin_append),
    builtin!("delete", builtin_delete),
    builtin!("splice", builtin_splice),
    builtin!("string", builtin_string),
    builtin!("int", builtin_int),
    builtin!("bool", builtin_bool),
    builtin!("float", builtin_float),
    builtin!("char", builtin_char),
    builtin!("bytes", builtin_bytes),
    builtin!("time", builtin_time),
    builtin!("is_int", builtin_is_int),
    builtin!("is_float", builtin_is_float),
    builtin!("is_string", builtin_is_string),
    builtin!("is_bool", builtin_is_bool),
    builtin!("is_char", builtin_is_char),
    builtin!("is_bytes", builtin_is_bytes),
    builtin!("is_array", builtin_is_array),
    builtin!("is_immutable_array", builtin_is_immutable_array),
    builtin!("is_map", builtin_is_map),
    builtin!("is_immutable_map", builtin_is_immutable_map),
    builtin!("is_iterable", builtin_is_iterable),
    builtin!("is_time", builtin_is_time),
    builtin!("is_error", builtin_is_error),
    builtin!("is_undefined", builtin_is_undefined),
    builtin!("is_function", builtin_is_function),
    builtin!("is_callable", builtin_is_callable),
    builtin!("type_name", builtin_type_name),
    builtin!("format", builtin_format),
    builtin!("range", builtin_range),
];

/// Index of a builtin in [`BUILTINS`].
pub fn builtin_index(name: &str) -> Option<usize> {
    BUILTINS.iter().position(|b| b.name == name)
}

/// Look up a builtin by name.
pub fn builtin(name: &str) -> Option<&'static BuiltinFunction> {
    BUILTINS.iter().find(|b| b.name == name)
}

// =============================================================================
// Argument helpers
// =============================================================================

fn arity(args: &[Object], min: usize, max: usize) -> Result<()> {
    if args.len() < min || args.len() > max {
        return Err(Error::WrongNumArguments);
    }
    Ok(())
}

fn int_arg(args: &[Object], idx: usize) -> Result<i64> {
    match &args[idx] {
        Object::Int(v) => Ok(*v),
        other => Err(Error::invalid_argument_type(
            ordinal(idx),
            "int",
            other.type_name(),
        )),
    }
}

fn is_kind(args: &[Object], pred: impl Fn(&Object) -> bool) -> Result<Object> {
    arity(args, 1, 1)?;
    Ok(Object::Bool(pred(&args[0])))
}

macro_rules! type_predicate {
    ($fn_name:ident, $pred:expr) => {
        fn $fn_name(args: &[Object]) -> Result<Object> {
            is_kind(args, $pred)
        }
    };
}

type_predicate!(builtin_is_int, |o| matches!(o, Object::Int(_)));
type_predicate!(builtin_is_float, |o| matches!(o, Object::Float(_)));
type_predicate!(builtin_is_string, |o| matches!(o, Object::String(_)));
type_predicate!(builtin_is_bool, |o| matches!(o, Object::Bool(_)));
type_predicate!(builtin_is_char, |o| matches!(o, Object::Char(_)));
type_predicate!(builtin_is_bytes, |o| matches!(o, Object::Bytes(_)));
type_predicate!(builtin_is_array, |o| matches!(o, Object::Array(_)));
type_predicate!(builtin_is_immutable_array, |o| matches!(o, Object::ImmutableArray(_)));
type_predicate!(builtin_is_map, |o| matches!(o, Object::Map(_)));
type_predicate!(builtin_is_immutable_map, |o| matches!(o, Object::ImmutableMap(_)));
type_predicate!(builtin_is_iterable, Object::can_iterate);
type_predicate!(builtin_is_time, |o| matches!(o, Object::Time(_)));
type_predicate!(builtin_is_error, |o| matches!(o, Object::Error(_)));
type_predicate!(builtin_is_undefined, Object::is_undefined);
type_predicate!(builtin_is_function, |o| matches!(
    o,
    Object::CompiledFunction(_) | Object::Closure(_)
));
type_predicate!(builtin_is_callable, Object::can_call);

/// Conversion builtins take the value and an optional fallback returned
/// when the conversion fails.
fn convert(args: &[Object], conv: impl Fn(&Object) -> Option<Object>) -> Result<Object> {
    arity(args, 1, 2)?;
    match conv(&args[0]) {
        Some(v) => Ok(v),
        None => Ok(args.get(1).cloned().unwrap_or(Object::Undefined)),
    }
}

// =============================================================================
// Builtins
// =============================================================================

fn builtin_len(args: &[Object]) -> Result<Object> {
    arity(args, 1, 1)?;
    let n = match &args[0] {
        Object::Array(a) => a.borrow().len(),
        Object::ImmutableArray(a) => a.len(),
        Object::String(s) => s.chars().count(),
        Object::Bytes(b) => b.borrow().len(),
        Object::Map(m) => m.borrow().len(),
        Object::ImmutableMap(m) => m.len(),
        other => {
            return Err(Error::invalid_argument_type(
                "first",
                "array/string/bytes/map",
                other.type_name(),
            ));
        }
    };
    Ok(Object::Int(n as i64))
}

fn builtin_copy(args: &[Object]) -> Result<Object> {
    arity(args, 1, 1)?;
    Ok(args[0].copy())
}

fn builtin_append(args: &[Object]) -> Result<Object> {
    if args.is_empty() {
        return Err(Error::WrongNumArguments);
    }
    let Some(mut items) = args[0].array_items() else {
        return Err(Error::invalid_argument_type(
            "first",
            "array",
            args[0].type_name(),
        ));
    };
    items.extend_from_slice(&args[1..]);
    Ok(Object::array(items))
}

fn builtin_delete(args: &[Object]) -> Result<Object> {
    arity(args, 2, 2)?;
    let Object::Map(map) = &args[0] else {
        return Err(Error::invalid_argument_type(
            "first",
            "map",
            args[0].type_name(),
        ));
    };
    let Object::String(key) = &args[1] else {
        return Err(Error::invalid_argument_type(
            "second",
            "string",
            args[1].type_name(),
        ));
    };
    map.borrow_mut().shift_remove(key.as_ref());
    Ok(Object::Undefined)
}

/// `splice(array, start, count, items...)` removes `count` elements at
/// `start`, inserts `items` there and returns the removed elements.
fn builtin_splice(args: &[Object]) -> Result<Object> {
    if args.is_empty() {
        return Err(Error::WrongNumArguments);
    }
    let Object::Array(array) = &args[0] else {
        return Err(Error::invalid_argument_type(
            "first",
            "array",
            args[0].type_name(),
        ));
    };
    let len = array.borrow().len();

    let start = if args.len() > 1 {
        let v = int_arg(args, 1)?;
        usize::try_from(v)
            .ok()
            .filter(|s| *s <= len)
            .ok_or(Error::IndexOutOfBounds)?
    } else {
        0
    };

    let count = if args.len() > 2 {
        let v = int_arg(args, 2)?;
        usize::try_from(v).map_err(|_| Error::IndexOutOfBounds)?
    } else {
        len - start
    };
    let end = start.saturating_add(count).min(len);

    let inserted = args.iter().skip(3).cloned();
    let removed: Vec<Object> = array.borrow_mut().splice(start..end, inserted).collect();
    Ok(Object::array(removed))
}

fn builtin_string(args: &[Object]) -> Result<Object> {
    convert(args, |o| match o {
        Object::String(_) => Some(o.clone()),
        Object::Undefined => None,
        other => Some(Object::string(other.to_plain_string())),
    })
}

fn builtin_int(args: &[Object]) -> Result<Object> {
    convert(args, |o| o.to_int().map(Object::Int))
}

fn builtin_bool(args: &[Object]) -> Result<Object> {
    arity(args, 1, 1)?;
    Ok(Object::Bool(!args[0].is_falsy()))
}

fn builtin_float(args: &[Object]) -> Result<Object> {
    convert(args, |o| o.to_float().map(Object::Float))
}

fn builtin_char(args: &[Object]) -> Result<Object> {
    convert(args, |o| o.to_char().map(Object::Char))
}

fn builtin_bytes(args: &[Object]) -> Result<Object> {
    arity(args, 1, 2)?;
    // bytes(n) allocates a zeroed buffer
    if let Object::Int(n) = &args[0] {
        let n = usize::try_from(*n).map_err(|_| Error::IndexOutOfBounds)?;
        if n > MAX_BYTES_LEN {
            return Err(Error::BytesLimit);
        }
        return Ok(Object::bytes(vec![0; n]));
    }
    convert(args, |o| match o {
        Object::Bytes(_) => Some(o.clone()),
        other => other.to_bytes().map(Object::bytes),
    })
}

fn builtin_time(args: &[Object]) -> Result<Object> {
    convert(args, |o| o.to_time().map(Object::Time))
}

fn builtin_type_name(args: &[Object]) -> Result<Object> {
    arity(args, 1, 1)?;
    Ok(Object::string(args[0].type_name()))
}

fn builtin_format(args: &[Object]) -> Result<Object> {
    if args.is_empty() {
        return Err(Error::WrongNumArguments);
    }
    let Object::String(fmt) = &args[0] else {
        return Err(Error::invalid_argument_type(
            "format",
            "string",
            args[0].type_name(),
        ));
    };
    if args.len() == 1 {
        return Ok(args[0].clone());
    }
    Ok(Object::string(format(fmt, &args[1..])?))
}

/// Most elements `range` will build.
const MAX_RANGE_LEN: usize = MAX_BYTES_LEN / std::mem::size_of::<Object>();

/// `range(start, stop[, step])` builds the array of ints from `start`
/// towards `stop` (exclusive).
fn builtin_range(args: &[Object]) -> Result<Object> {
    arity(args, 2, 3)?;
    let start = int_arg(args, 0)?;
    let stop = int_arg(args, 1)?;
    let step = if args.len() == 3 {
        let step = int_arg(args, 2)?;
        if step <= 0 {
            return Err(Error::Custom(format!(
                "invalid range step: must be > 0, got {}",
                step
            )));
        }
        step
    } else {
        1
    };

    // size the result before building it
    let span = (i128::from(stop) - i128::from(start)).unsigned_abs();
    let count = span.div_ceil(step as u128);
    if count > MAX_RANGE_LEN as u128 {
        return Err(Error::Custom(format!(
            "range too large: {} elements (max {})",
            count, MAX_RANGE_LEN
        )));
    }
    let dir = if start <= stop { 1i128 } else { -1 };
    let items = (0..count as i128)
        .map(|i| Object::Int((i128::from(start) + dir * i * i128::from(step)) as i64))
        .collect();
    Ok(Object::array(items))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects::ObjectMap;

    fn call(name: &str, args: &[Object]) -> Result<Object> {
        let b = builtin(name).unwrap_or_else(|| panic!("builtin {} not found", name));
        (b.func)(args)
    }

    fn ints(values: &[i64]) -> Object {
        Object::array(values.iter().map(|v| Object::Int(*v)).collect())
    }

    fn map_of(entries: &[(&str, Object)]) -> Object {
        let mut m = ObjectMap::new();
        for (k, v) in entries {
            m.insert(k.to_string(), v.clone());
        }
        Object::map(m)
    }

    #[test]
    fn test_registry_order() {
        assert_eq!(BUILTINS[0].name, "len");
        assert_eq!(builtin_index("splice"), Some(4));
        assert_eq!(builtin_index("range"), Some(BUILTINS.len() - 1));
        assert_eq!(builtin_index("print"), None);
    }

    #[test]
    fn test_delete_argument_errors() {
        assert_eq!(
            call("delete", &[Object::string(""), Object::string("")]),
            Err(Error::invalid_argument_type("first", "map", "string"))
        );
        assert_eq!(call("delete", &[]), Err(Error::WrongNumArguments));
        assert_eq!(
            call("delete", &[map_of(&[])]),
            Err(Error::WrongNumArguments)
        );
        assert_eq!(
            call("delete", &[map_of(&[]), Object::Int(0)]),
            Err(Error::invalid_argument_type("second", "string", "int"))
        );
    }

    #[test]
    fn test_delete_removes_key_in_place() {
        let m = map_of(&[("key1", Object::string("value1")), ("key2", Object::Int(10))]);
        assert_eq!(call("delete", &[m.clone(), Object::string("key1")]), Ok(Object::Undefined));
        assert_eq!(m, map_of(&[("key2", Object::Int(10))]));

        // missing key is a no-op
        assert_eq!(call("delete", &[m.clone(), Object::string("nope")]), Ok(Object::Undefined));
        assert_eq!(m, map_of(&[("key2", Object::Int(10))]));
    }

    #[test]
    fn test_splice_argument_errors() {
        assert_eq!(call("splice", &[]), Err(Error::WrongNumArguments));
        assert_eq!(
            call("splice", &[map_of(&[])]),
            Err(Error::invalid_argument_type("first", "array", "map"))
        );
        assert_eq!(
            call("splice", &[ints(&[]), Object::string("")]),
            Err(Error::invalid_argument_type("second", "int", "string"))
        );
        assert_eq!(
            call("splice", &[ints(&[]), Object::Int(-1)]),
            Err(Error::IndexOutOfBounds)
        );
        assert_eq!(
            call("splice", &[ints(&[]), Object::Int(0), Object::string("")]),
            Err(Error::invalid_argument_type("third", "int", "string"))
        );
        assert_eq!(
            call("splice", &[ints(&[0, 1, 2]), Object::Int(0), Object::Int(-1)]),
            Err(Error::IndexOutOfBounds)
        );
    }

    #[test]
    fn test_splice_insert_and_delete() {
        let arr = ints(&[0, 1, 2]);
        let removed = call(
            "splice",
            &[arr.clone(), Object::Int(1), Object::Int(1), Object::string("c"), Object::string("d")],
        )
        .unwrap();
        assert_eq!(removed, ints(&[1]));
        assert_eq!(
            arr,
            Object::array(vec![
                Object::Int(0),
                Object::string("c"),
                Object::string("d"),
                Object::Int(2)
            ])
        );

        let arr = ints(&[0, 1, 2]);
        let removed = call("splice", &[arr.clone(), Object::Int(0), Object::Int(5)]).unwrap();
        assert_eq!(removed, ints(&[0, 1, 2]));
        assert_eq!(arr, ints(&[]));

        let arr = ints(&[0, 1, 2]);
        let removed = call("splice", &[arr.clone(), Object::Int(2)]).unwrap();
        assert_eq!(removed, ints(&[2]));
        assert_eq!(arr, ints(&[0, 1]));

        let arr = ints(&[0, 1, 2]);
        assert_eq!(call("splice", &[arr.clone()]), Ok(ints(&[0, 1, 2])));
        assert_eq!(arr, ints(&[]));
    }

    #[test]
    fn test_len() {
        assert_eq!(call("len", &[ints(&[1, 2])]), Ok(Object::Int(2)));
        assert_eq!(call("len", &[Object::string("héllo")]), Ok(Object::Int(5)));
        assert_eq!(call("len", &[map_of(&[("a", Object::Int(1))])]), Ok(Object::Int(1)));
        assert_eq!(
            call("len", &[Object::Int(1)]),
            Err(Error::invalid_argument_type("first", "array/string/bytes/map", "int"))
        );
    }

    #[test]
    fn test_append_returns_new_array() {
        let arr = ints(&[1]);
        assert_eq!(call("append", &[arr.clone(), Object::Int(2)]), Ok(ints(&[1, 2])));
        assert_eq!(arr, ints(&[1]));
        assert_eq!(
            call("append", &[Object::Int(1)]),
            Err(Error::invalid_argument_type("first", "array", "int"))
        );
    }

    #[test]
    fn test_conversions_with_fallback() {
        assert_eq!(call("int", &[Object::string("42")]), Ok(Object::Int(42)));
        assert_eq!(call("int", &[Object::string("x")]), Ok(Object::Undefined));
        assert_eq!(
            call("int", &[Object::string("x"), Object::Int(-1)]),
            Ok(Object::Int(-1))
        );
        assert_eq!(call("float", &[Object::Int(2)]), Ok(Object::Float(2.0)));
        assert_eq!(call("string", &[Object::Int(2)]), Ok(Object::string("2")));
        assert_eq!(call("string", &[Object::Undefined]), Ok(Object::Undefined));
        assert_eq!(call("char", &[Object::Int(97)]), Ok(Object::Char('a')));
        assert_eq!(call("bool", &[Object::Int(0)]), Ok(Object::Bool(false)));
        assert_eq!(call("bytes", &[Object::Int(2)]), Ok(Object::bytes(vec![0, 0])));
        assert_eq!(
            call("bytes", &[Object::string("ab")]),
            Ok(Object::bytes(b"ab".to_vec()))
        );
        assert_eq!(call("int", &[]), Err(Error::WrongNumArguments));
    }

    #[test]
    fn test_type_predicates() {
        assert_eq!(call("is_int", &[Object::Int(1)]), Ok(Object::Bool(true)));
        assert_eq!(call("is_error", &[Object::error_message("e")]), Ok(Object::Bool(true)));
        assert_eq!(call("is_iterable", &[Object::Int(1)]), Ok(Object::Bool(false)));
        assert_eq!(
            call("is_callable", &[Object::BuiltinFunction(BUILTINS[0])]),
            Ok(Object::Bool(true))
        );
        assert_eq!(call("is_undefined", &[Object::Undefined]), Ok(Object::Bool(true)));
        assert_eq!(
            call("type_name", &[Object::BuiltinFunction(BUILTINS[0])]),
            Ok(Object::string("builtin-function:len"))
        );
    }

    #[test]
    fn test_format_and_range() {
        assert_eq!(
            call("format", &[Object::string("%d!"), Object::Int(3)]),
            Ok(Object::string("3!"))
        );
        assert_eq!(
            call("format", &[Object::string("plain")]),
            Ok(Object::string("plain"))
        );
        assert_eq!(call("range", &[Object::Int(0), Object::Int(3)]), Ok(ints(&[0, 1, 2])));
        assert_eq!(call("range", &[Object::Int(3), Object::Int(0)]), Ok(ints(&[3, 2, 1])));
        assert_eq!(
            call("range", &[Object::Int(0), Object::Int(5), Object::Int(2)]),
            Ok(ints(&[0, 2, 4]))
        );
        assert!(call("range", &[Object::Int(0), Object::Int(5), Object::Int(0)]).is_err());
    }

    #[test]
    fn test_range_size_is_bounded() {
        let err = call("range", &[Object::Int(0), Object::Int(i64::MAX)]).unwrap_err();
        assert!(err.to_string().starts_with("range too large"));
        assert!(call("range", &[Object::Int(i64::MAX), Object::Int(i64::MIN)]).is_err());
        assert_eq!(
            call("range", &[Object::Int(i64::MIN), Object::Int(i64::MAX), Object::Int(i64::MAX)]),
            Ok(ints(&[i64::MIN, -1, i64::MAX - 1]))
        );
        assert_eq!(
            call("range", &[Object::Int(5), Object::Int(0), Object::Int(2)]),
            Ok(ints(&[5, 3, 1]))
        );
    }
}
