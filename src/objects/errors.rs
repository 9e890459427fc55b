//! Errors raised by the object model and native functions.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error("wrong number of arguments")]
    WrongNumArguments,

    /// An argument had the wrong type. `name` is the ordinal of the
    /// argument ("first", "second", ...).
    #[error("invalid type for argument '{name}': expected {expected}, found {found}")]
    InvalidArgumentType {
        name: String,
        expected: String,
        found: String,
    },

    #[error("invalid operator")]
    InvalidOperator,

    #[error("invalid index type")]
    InvalidIndexType,

    #[error("invalid index value type")]
    InvalidIndexValueType,

    #[error("invalid index on error")]
    InvalidIndexOnError,

    #[error("index out of bounds")]
    IndexOutOfBounds,

    #[error("not indexable")]
    NotIndexable,

    #[error("not index-assignable")]
    NotIndexAssignable,

    #[error("not callable")]
    NotCallable,

    #[error("not iterable")]
    NotIterable,

    #[error("exceeding string size limit")]
    StringLimit,

    #[error("exceeding bytes size limit")]
    BytesLimit,

    #[error("division by zero")]
    DivisionByZero,

    #[error("{0}")]
    Custom(String),
}

impl Error {
    pub fn invalid_argument_type(
        name: &str,
        expected: &str,
        found: impl Into<String>,
    ) -> Self {
        Error::InvalidArgumentType {
            name: name.to_string(),
            expected: expected.to_string(),
            found: found.into(),
        }
    }
}

/// Ordinal names used in argument type errors.
pub fn ordinal(idx: usize) -> &'static str {
    const NAMES: [&str; 10] = [
        "first", "second", "third", "fourth", "fifth", "sixth", "seventh", "eighth", "ninth",
        "tenth",
    ];
    NAMES.get(idx).copied().unwrap_or("nth")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_argument_type_message() {
        let err = Error::invalid_argument_type("first", "map", "string");
        assert_eq!(
            err.to_string(),
            "invalid type for argument 'first': expected map, found string"
        );
    }

    #[test]
    fn test_ordinal_names() {
        assert_eq!(ordinal(0), "first");
        assert_eq!(ordinal(2), "third");
        assert_eq!(ordinal(42), "nth");
    }
}
