//! Binary form of [`Bytecode`].
//!
//! Objects are mirrored into a serde-friendly tree and written with
//! `postcard`. Builtin functions are stored by name and looked up in the
//! builtin table on decode. Closures, host functions and iterators only
//! exist at run time and cannot be encoded.

use crate::bytecode::{Bytecode, CompiledFunction};
use crate::objects::{Object, ObjectMap, builtins};
use crate::source::SourceFileSet;
use chrono::DateTime;
use serde::{Deserialize, Serialize};
use std::rc::Rc;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum EncodingError {
    #[error("postcard: {0}")]
    Postcard(#[from] postcard::Error),

    #[error("cannot encode object of type {0}")]
    Unsupported(String),

    #[error("unknown builtin function '{0}'")]
    UnknownBuiltin(String),

    #[error("invalid time value: {0}ns")]
    InvalidTime(i64),
}

pub type Result<T> = std::result::Result<T, EncodingError>;

#[derive(Debug, Serialize, Deserialize)]
enum EncodedObject {
    Int(i64),
    Float(f64),
    Char(char),
    Bool(bool),
    String(String),
    Bytes(Vec<u8>),
    Array(Vec<EncodedObject>),
    ImmutableArray(Vec<EncodedObject>),
    Map(Vec<(String, EncodedObject)>),
    ImmutableMap(Vec<(String, EncodedObject)>),
    Error(Box<EncodedObject>),
    Undefined,
    CompiledFunction(CompiledFunction),
    BuiltinFunction(String),
    /// Nanoseconds since the Unix epoch.
    Time(i64),
}

#[derive(Debug, Serialize, Deserialize)]
struct EncodedBytecode {
    file_set: SourceFileSet,
    main_function: CompiledFunction,
    constants: Vec<EncodedObject>,
}

fn encode_items(items: &[Object]) -> Result<Vec<EncodedObject>> {
    items.iter().map(encode_object).collect()
}

fn encode_entries(entries: &ObjectMap) -> Result<Vec<(String, EncodedObject)>> {
    entries
        .iter()
        .map(|(k, v)| Ok((k.clone(), encode_object(v)?)))
        .collect()
}

fn encode_object(obj: &Object) -> Result<EncodedObject> {
    let encoded = match obj {
        Object::Int(v) => EncodedObject::Int(*v),
        Object::Float(v) => EncodedObject::Float(*v),
        Object::Char(v) => EncodedObject::Char(*v),
        Object::Bool(v) => EncodedObject::Bool(*v),
        Object::String(v) => EncodedObject::String(v.to_string()),
        Object::Bytes(v) => EncodedObject::Bytes(v.borrow().clone()),
        Object::Array(v) => EncodedObject::Array(encode_items(&v.borrow())?),
        Object::ImmutableArray(v) => EncodedObject::ImmutableArray(encode_items(v)?),
        Object::Map(v) => EncodedObject::Map(encode_entries(&v.borrow())?),
        Object::ImmutableMap(v) => EncodedObject::ImmutableMap(encode_entries(v)?),
        Object::Error(v) => EncodedObject::Error(Box::new(encode_object(v)?)),
        Object::Undefined => EncodedObject::Undefined,
        Object::CompiledFunction(f) => EncodedObject::CompiledFunction(f.as_ref().clone()),
        Object::BuiltinFunction(f) => EncodedObject::BuiltinFunction(f.name.to_string()),
        Object::Time(t) => match t.timestamp_nanos_opt() {
            Some(ns) => EncodedObject::Time(ns),
            None => return Err(EncodingError::Unsupported(obj.type_name())),
        },
        other => return Err(EncodingError::Unsupported(other.type_name())),
    };
    Ok(encoded)
}

fn decode_items(items: Vec<EncodedObject>) -> Result<Vec<Object>> {
    items.into_iter().map(decode_object).collect()
}

fn decode_entries(entries: Vec<(String, EncodedObject)>) -> Result<ObjectMap> {
    entries
        .into_iter()
        .map(|(k, v)| Ok((k, decode_object(v)?)))
        .collect()
}

fn decode_object(obj: EncodedObject) -> Result<Object> {
    let decoded = match obj {
        EncodedObject::Int(v) => Object::Int(v),
        EncodedObject::Float(v) => Object::Float(v),
        EncodedObject::Char(v) => Object::Char(v),
        EncodedObject::Bool(v) => Object::Bool(v),
        EncodedObject::String(v) => Object::string(v),
        EncodedObject::Bytes(v) => Object::bytes(v),
        EncodedObject::Array(v) => Object::array(decode_items(v)?),
        EncodedObject::ImmutableArray(v) => Object::immutable_array(decode_items(v)?),
        EncodedObject::Map(v) => Object::map(decode_entries(v)?),
        EncodedObject::ImmutableMap(v) => Object::immutable_map(decode_entries(v)?),
        EncodedObject::Error(v) => Object::error(decode_object(*v)?),
        EncodedObject::Undefined => Object::Undefined,
        EncodedObject::CompiledFunction(f) => Object::CompiledFunction(Rc::new(f)),
        EncodedObject::BuiltinFunction(name) => match builtins::builtin(&name) {
            Some(b) => Object::BuiltinFunction(*b),
            None => return Err(EncodingError::UnknownBuiltin(name)),
        },
        EncodedObject::Time(ns) => Object::Time(DateTime::from_timestamp_nanos(ns)),
    };
    Ok(decoded)
}

impl Bytecode {
    /// Serialize to bytes.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let encoded = EncodedBytecode {
            file_set: self.file_set.clone(),
            main_function: self.main_function.as_ref().clone(),
            constants: self
                .constants
                .iter()
                .map(encode_object)
                .collect::<Result<_>>()?,
        };
        let bytes = postcard::to_allocvec(&encoded)?;
        debug!(bytes = bytes.len(), constants = self.constants.len(), "bytecode encoded");
        Ok(bytes)
    }

    /// Deserialize bytes produced by [`Bytecode::encode`].
    pub fn decode(bytes: &[u8]) -> Result<Bytecode> {
        let encoded: EncodedBytecode = postcard::from_bytes(bytes)?;
        let constants = encoded
            .constants
            .into_iter()
            .map(decode_object)
            .collect::<Result<Vec<_>>>()?;
        debug!(bytes = bytes.len(), constants = constants.len(), "bytecode decoded");
        Ok(Bytecode {
            file_set: encoded.file_set,
            main_function: Rc::new(encoded.main_function),
            constants,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::op::{Opcode, make_instruction};
    use crate::source::Pos;

    fn sample() -> Bytecode {
        let mut file_set = SourceFileSet::new();
        file_set.add_source("test", "a := 1\nb := a + 2");

        let mut inner = CompiledFunction::new(
            [
                make_instruction(Opcode::GetFree, &[0]),
                make_instruction(Opcode::Return, &[1]),
            ]
            .concat(),
        );
        inner.num_parameters = 1;
        inner.num_locals = 1;
        inner.free_symbols = vec!["a".to_string()];
        inner.source_map.insert(0, Pos(3));

        let mut entries = ObjectMap::new();
        entries.insert("x".to_string(), Object::Float(1.5));
        entries.insert("len".to_string(), Object::BuiltinFunction(builtins::BUILTINS[0]));

        let mut main = CompiledFunction::new(
            [
                make_instruction(Opcode::Constant, &[0]),
                make_instruction(Opcode::Suspend, &[]),
            ]
            .concat(),
        );
        main.source_map.insert(0, Pos(1));

        Bytecode {
            file_set,
            main_function: Rc::new(main),
            constants: vec![
                Object::Int(-5),
                Object::string("héllo"),
                Object::Char('x'),
                Object::Bool(true),
                Object::immutable_array(vec![Object::Undefined, Object::error_message("e")]),
                Object::immutable_map(entries),
                Object::bytes(vec![1, 2, 3]),
                Object::Time(DateTime::from_timestamp_nanos(1_234_567_890_123)),
                Object::CompiledFunction(Rc::new(inner)),
            ],
        }
    }

    #[test]
    fn test_round_trip() {
        let bc = sample();
        let bytes = bc.encode().unwrap();
        let decoded = Bytecode::decode(&bytes).unwrap();
        assert_eq!(decoded, bc);
        assert_eq!(decoded.format_constants(), bc.format_constants());
    }

    #[test]
    fn test_runtime_only_objects_are_rejected() {
        let mut bc = sample();
        bc.constants.push(Object::user_function("f", |_| Ok(Object::Undefined)));
        match bc.encode() {
            Err(EncodingError::Unsupported(t)) => assert_eq!(t, "user-function:f"),
            other => panic!("expected unsupported error, got {:?}", other),
        }
    }

    #[test]
    fn test_truncated_input_fails() {
        let bytes = sample().encode().unwrap();
        assert!(Bytecode::decode(&bytes[..bytes.len() / 2]).is_err());
    }
}
