use super::errors::{Error, Result};
use super::iterator::{ArrayIterator, MapIterator, StringIterator};
use super::{MAX_BYTES_LEN, MAX_NESTING, MAX_STRING_LEN};
use crate::ast::Token;
use crate::bytecode::CompiledFunction;
use chrono::{DateTime, Duration, Utc};
use indexmap::IndexMap;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

pub type ObjectMap = IndexMap<String, Object>;

/// A heap cell shared between a frame and the closures that captured one of
/// its locals.
pub type FreeCell = Rc<RefCell<Object>>;

pub type NativeFn = fn(&[Object]) -> Result<Object>;

/// A function registered in the builtin table.
#[derive(Clone, Copy)]
pub struct BuiltinFunction {
    pub name: &'static str,
    pub func: NativeFn,
}

impl fmt::Debug for BuiltinFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BuiltinFunction({})", self.name)
    }
}

/// A native function supplied by the host.
pub struct UserFunction {
    pub name: String,
    pub func: Box<dyn Fn(&[Object]) -> Result<Object>>,
}

impl UserFunction {
    pub fn new(
        name: impl Into<String>,
        func: impl Fn(&[Object]) -> Result<Object> + 'static,
    ) -> Self {
        UserFunction {
            name: name.into(),
            func: Box::new(func),
        }
    }
}

impl fmt::Debug for UserFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UserFunction({})", self.name)
    }
}

/// A compiled function bound to its captured cells.
#[derive(Debug)]
pub struct Closure {
    pub func: Rc<CompiledFunction>,
    pub free: Vec<FreeCell>,
}

/// Runtime value.
///
/// Scalars are stored inline. `String` and the immutable containers are
/// shared read-only; `Bytes`, `Array` and `Map` are shared and mutable, so
/// every holder of a clone observes in-place updates.
#[derive(Debug, Clone)]
pub enum Object {
    Int(i64),
    Float(f64),
    Char(char),
    Bool(bool),
    String(Rc<str>),
    Bytes(Rc<RefCell<Vec<u8>>>),
    Array(Rc<RefCell<Vec<Object>>>),
    ImmutableArray(Rc<Vec<Object>>),
    Map(Rc<RefCell<ObjectMap>>),
    ImmutableMap(Rc<ObjectMap>),
    /// Error value; equality is by identity of this `Rc`.
    Error(Rc<Object>),
    Undefined,
    CompiledFunction(Rc<CompiledFunction>),
    Closure(Rc<Closure>),
    BuiltinFunction(BuiltinFunction),
    UserFunction(Rc<UserFunction>),
    Time(DateTime<Utc>),
    ArrayIterator(Rc<RefCell<ArrayIterator>>),
    StringIterator(Rc<RefCell<StringIterator>>),
    MapIterator(Rc<RefCell<MapIterator>>),
}

// =============================================================================
// Constructors
// =============================================================================

impl Object {
    pub fn string(s: impl Into<Rc<str>>) -> Object {
        Object::String(s.into())
    }

    pub fn bytes(b: Vec<u8>) -> Object {
        Object::Bytes(Rc::new(RefCell::new(b)))
    }

    pub fn array(items: Vec<Object>) -> Object {
        Object::Array(Rc::new(RefCell::new(items)))
    }

    pub fn immutable_array(items: Vec<Object>) -> Object {
        Object::ImmutableArray(Rc::new(items))
    }

    pub fn map(entries: ObjectMap) -> Object {
        Object::Map(Rc::new(RefCell::new(entries)))
    }

    pub fn immutable_map(entries: ObjectMap) -> Object {
        Object::ImmutableMap(Rc::new(entries))
    }

    pub fn error(payload: Object) -> Object {
        Object::Error(Rc::new(payload))
    }

    /// An error object carrying a string message.
    pub fn error_message(msg: impl Into<Rc<str>>) -> Object {
        Object::error(Object::String(msg.into()))
    }

    pub fn user_function(
        name: impl Into<String>,
        func: impl Fn(&[Object]) -> Result<Object> + 'static,
    ) -> Object {
        Object::UserFunction(Rc::new(UserFunction::new(name, func)))
    }
}

impl From<i64> for Object {
    fn from(v: i64) -> Self {
        Object::Int(v)
    }
}

impl From<f64> for Object {
    fn from(v: f64) -> Self {
        Object::Float(v)
    }
}

impl From<bool> for Object {
    fn from(v: bool) -> Self {
        Object::Bool(v)
    }
}

impl From<char> for Object {
    fn from(v: char) -> Self {
        Object::Char(v)
    }
}

impl From<&str> for Object {
    fn from(v: &str) -> Self {
        Object::string(v)
    }
}

impl From<String> for Object {
    fn from(v: String) -> Self {
        Object::string(v)
    }
}

impl From<Vec<Object>> for Object {
    fn from(v: Vec<Object>) -> Self {
        Object::array(v)
    }
}

impl From<ObjectMap> for Object {
    fn from(v: ObjectMap) -> Self {
        Object::map(v)
    }
}

// =============================================================================
// Type information
// =============================================================================

impl Object {
    pub fn type_name(&self) -> String {
        match self {
            Object::Int(_) => "int".into(),
            Object::Float(_) => "float".into(),
            Object::Char(_) => "char".into(),
            Object::Bool(_) => "bool".into(),
            Object::String(_) => "string".into(),
            Object::Bytes(_) => "bytes".into(),
            Object::Array(_) => "array".into(),
            Object::ImmutableArray(_) => "immutable-array".into(),
            Object::Map(_) => "map".into(),
            Object::ImmutableMap(_) => "immutable-map".into(),
            Object::Error(_) => "error".into(),
            Object::Undefined => "undefined".into(),
            Object::CompiledFunction(_) | Object::Closure(_) => "compiled-function".into(),
            Object::BuiltinFunction(f) => format!("builtin-function:{}", f.name),
            Object::UserFunction(f) => format!("user-function:{}", f.name),
            Object::Time(_) => "time".into(),
            Object::ArrayIterator(_) => "array-iterator".into(),
            Object::StringIterator(_) => "string-iterator".into(),
            Object::MapIterator(_) => "map-iterator".into(),
        }
    }

    pub fn is_falsy(&self) -> bool {
        match self {
            Object::Int(v) => *v == 0,
            Object::Float(v) => v.is_nan(),
            Object::Char(c) => *c == '\0',
            Object::Bool(b) => !*b,
            Object::String(s) => s.is_empty(),
            Object::Bytes(b) => b.borrow().is_empty(),
            Object::Array(a) => a.borrow().is_empty(),
            Object::ImmutableArray(a) => a.is_empty(),
            Object::Map(m) => m.borrow().is_empty(),
            Object::ImmutableMap(m) => m.is_empty(),
            Object::Error(_) | Object::Undefined => true,
            Object::ArrayIterator(_) | Object::StringIterator(_) | Object::MapIterator(_) => true,
            Object::CompiledFunction(_)
            | Object::Closure(_)
            | Object::BuiltinFunction(_)
            | Object::UserFunction(_)
            | Object::Time(_) => false,
        }
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Object::Undefined)
    }

    pub fn can_call(&self) -> bool {
        matches!(
            self,
            Object::CompiledFunction(_)
                | Object::Closure(_)
                | Object::BuiltinFunction(_)
                | Object::UserFunction(_)
        )
    }

    pub fn can_iterate(&self) -> bool {
        matches!(
            self,
            Object::String(_)
                | Object::Array(_)
                | Object::ImmutableArray(_)
                | Object::Map(_)
                | Object::ImmutableMap(_)
        )
    }

    /// Number of objects reachable from this one, counting each occurrence.
    /// Containers nested deeper than [`MAX_NESTING`] count as one.
    pub fn count_objects(&self) -> usize {
        self.count_nested(0)
    }

    fn count_nested(&self, depth: usize) -> usize {
        if depth >= MAX_NESTING {
            return 1;
        }
        let count = |o: &Object| o.count_nested(depth + 1);
        match self {
            Object::Array(a) => 1 + a.borrow().iter().map(count).sum::<usize>(),
            Object::ImmutableArray(a) => 1 + a.iter().map(count).sum::<usize>(),
            Object::Map(m) => 1 + m.borrow().values().map(count).sum::<usize>(),
            Object::ImmutableMap(m) => 1 + m.values().map(count).sum::<usize>(),
            Object::Error(e) => 1 + count(e),
            _ => 1,
        }
    }
}

// =============================================================================
// Equality
// =============================================================================

impl Object {
    /// Script-level equality (`==`). Past [`MAX_NESTING`] levels containers
    /// compare by identity.
    pub fn equals(&self, other: &Object) -> bool {
        self.equals_nested(other, 0)
    }

    fn equals_nested(&self, other: &Object, depth: usize) -> bool {
        if depth >= MAX_NESTING {
            return match (self, other) {
                (Object::Array(a), Object::Array(b)) => Rc::ptr_eq(a, b),
                (Object::ImmutableArray(a), Object::ImmutableArray(b)) => Rc::ptr_eq(a, b),
                (Object::Map(a), Object::Map(b)) => Rc::ptr_eq(a, b),
                (Object::ImmutableMap(a), Object::ImmutableMap(b)) => Rc::ptr_eq(a, b),
                _ if self.array_items().is_some() || self.map_entries().is_some() => false,
                _ => self.equals_nested(other, 0),
            };
        }
        match (self, other) {
            (Object::Int(a), Object::Int(b)) => a == b,
            (Object::Float(a), Object::Float(b)) => a == b,
            (Object::Char(a), Object::Char(b)) => a == b,
            (Object::Bool(a), Object::Bool(b)) => a == b,
            (Object::String(a), Object::String(b)) => a == b,
            (Object::Bytes(a), Object::Bytes(b)) => *a.borrow() == *b.borrow(),
            (Object::Undefined, Object::Undefined) => true,
            (Object::Time(a), Object::Time(b)) => a == b,
            (Object::Error(a), Object::Error(b)) => Rc::ptr_eq(a, b),
            (Object::CompiledFunction(a), Object::CompiledFunction(b)) => Rc::ptr_eq(a, b),
            (Object::Closure(a), Object::Closure(b)) => Rc::ptr_eq(a, b),
            (Object::BuiltinFunction(a), Object::BuiltinFunction(b)) => a.name == b.name,
            (Object::UserFunction(a), Object::UserFunction(b)) => Rc::ptr_eq(a, b),
            (Object::ArrayIterator(a), Object::ArrayIterator(b)) => Rc::ptr_eq(a, b),
            (Object::StringIterator(a), Object::StringIterator(b)) => Rc::ptr_eq(a, b),
            (Object::MapIterator(a), Object::MapIterator(b)) => Rc::ptr_eq(a, b),
            _ => {
                if let (Some(a), Some(b)) = (self.array_items(), other.array_items()) {
                    return a.len() == b.len()
                        && a.iter().zip(b.iter()).all(|(x, y)| x.equals_nested(y, depth + 1));
                }
                if let (Some(a), Some(b)) = (self.map_entries(), other.map_entries()) {
                    return a.len() == b.len()
                        && a.iter().all(|(k, v)| {
                            b.get(k).is_some_and(|other| v.equals_nested(other, depth + 1))
                        });
                }
                false
            }
        }
    }

    /// Snapshot of the elements of an array of either kind.
    pub fn array_items(&self) -> Option<Vec<Object>> {
        match self {
            Object::Array(a) => Some(a.borrow().clone()),
            Object::ImmutableArray(a) => Some(a.as_ref().clone()),
            _ => None,
        }
    }

    /// Snapshot of the entries of a map of either kind.
    pub fn map_entries(&self) -> Option<ObjectMap> {
        match self {
            Object::Map(m) => Some(m.borrow().clone()),
            Object::ImmutableMap(m) => Some(m.as_ref().clone()),
            _ => None,
        }
    }
}

impl PartialEq for Object {
    fn eq(&self, other: &Self) -> bool {
        self.equals(other)
    }
}

// =============================================================================
// Operators
// =============================================================================

fn compare<T: PartialOrd>(l: T, op: Token, r: T) -> Result<Object> {
    let b = match op {
        Token::Less => l < r,
        Token::Greater => l > r,
        Token::LessEq => l <= r,
        Token::GreaterEq => l >= r,
        _ => return Err(Error::InvalidOperator),
    };
    Ok(Object::Bool(b))
}

fn int_op(l: i64, op: Token, r: i64) -> Result<Object> {
    let v = match op {
        Token::Add => l.wrapping_add(r),
        Token::Sub => l.wrapping_sub(r),
        Token::Mul => l.wrapping_mul(r),
        Token::Quo => {
            if r == 0 {
                return Err(Error::DivisionByZero);
            }
            l.wrapping_div(r)
        }
        Token::Rem => {
            if r == 0 {
                return Err(Error::DivisionByZero);
            }
            l.wrapping_rem(r)
        }
        Token::And => l & r,
        Token::Or => l | r,
        Token::Xor => l ^ r,
        Token::AndNot => l & !r,
        // shift counts are unsigned; anything past the width saturates
        Token::Shl => {
            let s = r as u64;
            if s >= 64 { 0 } else { l.wrapping_shl(s as u32) }
        }
        Token::Shr => {
            let s = r as u64;
            if s >= 64 {
                if l < 0 { -1 } else { 0 }
            } else {
                l >> s
            }
        }
        _ => return compare(l, op, r),
    };
    Ok(Object::Int(v))
}

fn float_op(l: f64, op: Token, r: f64) -> Result<Object> {
    let v = match op {
        Token::Add => l + r,
        Token::Sub => l - r,
        Token::Mul => l * r,
        Token::Quo => l / r,
        _ => return compare(l, op, r),
    };
    Ok(Object::Float(v))
}

fn char_from(v: i64) -> Result<Object> {
    u32::try_from(v)
        .ok()
        .and_then(char::from_u32)
        .map(Object::Char)
        .ok_or_else(|| Error::Custom(format!("invalid char value: {}", v)))
}

/// `+`/`-` produce a char, comparisons compare code points.
fn char_op(l: i64, op: Token, r: i64) -> Result<Object> {
    match op {
        Token::Add => l.checked_add(r).map_or(Err(Error::InvalidOperator), char_from),
        Token::Sub => l.checked_sub(r).map_or(Err(Error::InvalidOperator), char_from),
        _ => compare(l, op, r),
    }
}

fn time_offset(t: &DateTime<Utc>, nanos: i64) -> Result<Object> {
    t.checked_add_signed(Duration::nanoseconds(nanos))
        .map(Object::Time)
        .ok_or(Error::InvalidOperator)
}

impl Object {
    /// Apply a binary operator with `self` on the left.
    pub fn binary_op(&self, op: Token, rhs: &Object) -> Result<Object> {
        match (self, rhs) {
            (Object::Int(l), Object::Int(r)) => int_op(*l, op, *r),
            (Object::Int(l), Object::Float(r)) => float_op(*l as f64, op, *r),
            (Object::Int(l), Object::Char(r)) => char_op(*l, op, *r as i64),
            (Object::Float(l), Object::Float(r)) => float_op(*l, op, *r),
            (Object::Float(l), Object::Int(r)) => float_op(*l, op, *r as f64),
            (Object::Char(l), Object::Char(r)) => char_op(*l as i64, op, *r as i64),
            (Object::Char(l), Object::Int(r)) => char_op(*l as i64, op, *r),
            (Object::String(l), Object::String(r)) => match op {
                Token::Add => {
                    if l.len() + r.len() > MAX_STRING_LEN {
                        return Err(Error::StringLimit);
                    }
                    Ok(Object::string(format!("{}{}", l, r)))
                }
                _ => compare(l.as_ref(), op, r.as_ref()),
            },
            (Object::String(l), Object::Char(r)) if op == Token::Add => {
                if l.len() + r.len_utf8() > MAX_STRING_LEN {
                    return Err(Error::StringLimit);
                }
                Ok(Object::string(format!("{}{}", l, r)))
            }
            (Object::Bytes(l), Object::Bytes(r)) if op == Token::Add => {
                let (l, r) = (l.borrow(), r.borrow());
                if l.len() + r.len() > MAX_BYTES_LEN {
                    return Err(Error::BytesLimit);
                }
                let mut out = Vec::with_capacity(l.len() + r.len());
                out.extend_from_slice(&l);
                out.extend_from_slice(&r);
                Ok(Object::bytes(out))
            }
            (Object::Time(l), Object::Int(r)) => match op {
                Token::Add => time_offset(l, *r),
                Token::Sub => time_offset(l, r.wrapping_neg()),
                _ => Err(Error::InvalidOperator),
            },
            (Object::Time(l), Object::Time(r)) => match op {
                Token::Sub => (*l - *r)
                    .num_nanoseconds()
                    .map(Object::Int)
                    .ok_or(Error::InvalidOperator),
                _ => compare(l, op, r),
            },
            (Object::Array(_) | Object::ImmutableArray(_), _) if op == Token::Add => {
                match (self.array_items(), rhs.array_items()) {
                    (Some(mut l), Some(r)) => {
                        l.extend(r);
                        Ok(Object::array(l))
                    }
                    _ => Err(Error::InvalidOperator),
                }
            }
            _ => Err(Error::InvalidOperator),
        }
    }
}

// =============================================================================
// Copy
// =============================================================================

impl Object {
    /// Deep copy. Mutable containers are duplicated recursively; immutable
    /// containers come back as their mutable counterparts; scalars and
    /// functions are returned as is. Past [`MAX_NESTING`] levels the copy
    /// shares the original's containers.
    pub fn copy(&self) -> Object {
        self.copy_nested(0)
    }

    fn copy_nested(&self, depth: usize) -> Object {
        if depth >= MAX_NESTING {
            return self.clone();
        }
        let copy = |o: &Object| o.copy_nested(depth + 1);
        match self {
            Object::Bytes(b) => Object::bytes(b.borrow().clone()),
            Object::Array(a) => Object::array(a.borrow().iter().map(copy).collect()),
            Object::ImmutableArray(a) => Object::array(a.iter().map(copy).collect()),
            Object::Map(m) => Object::map(
                m.borrow()
                    .iter()
                    .map(|(k, v)| (k.clone(), copy(v)))
                    .collect(),
            ),
            Object::ImmutableMap(m) => {
                Object::map(m.iter().map(|(k, v)| (k.clone(), copy(v))).collect())
            }
            Object::Error(e) => Object::error(copy(e)),
            Object::ArrayIterator(it) => {
                Object::ArrayIterator(Rc::new(RefCell::new(it.borrow().clone())))
            }
            Object::StringIterator(it) => {
                Object::StringIterator(Rc::new(RefCell::new(it.borrow().clone())))
            }
            Object::MapIterator(it) => {
                Object::MapIterator(Rc::new(RefCell::new(it.borrow().clone())))
            }
            other => other.clone(),
        }
    }
}

// =============================================================================
// Indexing
// =============================================================================

fn array_get(items: &[Object], index: &Object) -> Result<Object> {
    let Object::Int(idx) = index else {
        return Err(Error::InvalidIndexType);
    };
    Ok(usize::try_from(*idx)
        .ok()
        .and_then(|i| items.get(i))
        .cloned()
        .unwrap_or(Object::Undefined))
}

fn map_get(entries: &ObjectMap, index: &Object) -> Result<Object> {
    let Object::String(key) = index else {
        return Err(Error::InvalidIndexType);
    };
    Ok(entries.get(key.as_ref()).cloned().unwrap_or(Object::Undefined))
}

impl Object {
    /// `self[index]`. Missing keys and out-of-range indices yield Undefined.
    pub fn index_get(&self, index: &Object) -> Result<Object> {
        match self {
            Object::Array(a) => array_get(&a.borrow(), index),
            Object::ImmutableArray(a) => array_get(a, index),
            Object::Map(m) => map_get(&m.borrow(), index),
            Object::ImmutableMap(m) => map_get(m, index),
            Object::String(s) => {
                let Object::Int(idx) = index else {
                    return Err(Error::InvalidIndexType);
                };
                Ok(usize::try_from(*idx)
                    .ok()
                    .and_then(|i| s.chars().nth(i))
                    .map(Object::Char)
                    .unwrap_or(Object::Undefined))
            }
            Object::Bytes(b) => {
                let Object::Int(idx) = index else {
                    return Err(Error::InvalidIndexType);
                };
                Ok(usize::try_from(*idx)
                    .ok()
                    .and_then(|i| b.borrow().get(i).copied())
                    .map(|v| Object::Int(v as i64))
                    .unwrap_or(Object::Undefined))
            }
            Object::Error(payload) => match index {
                Object::String(key) if key.as_ref() == "value" => Ok(payload.as_ref().clone()),
                _ => Err(Error::InvalidIndexOnError),
            },
            _ => Err(Error::NotIndexable),
        }
    }

    /// `self[index] = value` on mutable containers.
    pub fn index_set(&self, index: &Object, value: Object) -> Result<()> {
        match self {
            Object::Array(a) => {
                let Object::Int(idx) = index else {
                    return Err(Error::InvalidIndexType);
                };
                let mut items = a.borrow_mut();
                let slot = usize::try_from(*idx)
                    .ok()
                    .and_then(|i| items.get_mut(i))
                    .ok_or(Error::IndexOutOfBounds)?;
                *slot = value;
                Ok(())
            }
            Object::Map(m) => {
                let Object::String(key) = index else {
                    return Err(Error::InvalidIndexType);
                };
                m.borrow_mut().insert(key.to_string(), value);
                Ok(())
            }
            _ => Err(Error::NotIndexAssignable),
        }
    }

    /// Start iterating over a container; `None` if it is not iterable.
    pub fn iterate(&self) -> Option<Object> {
        let it = match self {
            Object::Array(a) => {
                Object::ArrayIterator(Rc::new(RefCell::new(ArrayIterator::new(a.borrow().clone()))))
            }
            Object::ImmutableArray(a) => {
                Object::ArrayIterator(Rc::new(RefCell::new(ArrayIterator::new(a.to_vec()))))
            }
            Object::String(s) => {
                Object::StringIterator(Rc::new(RefCell::new(StringIterator::new(s))))
            }
            Object::Map(_) | Object::ImmutableMap(_) => {
                let entries = self.map_entries()?.into_iter().collect();
                Object::MapIterator(Rc::new(RefCell::new(MapIterator::new(entries))))
            }
            _ => return None,
        };
        Some(it)
    }

    pub fn iterator_next(&self) -> Result<bool> {
        match self {
            Object::ArrayIterator(it) => Ok(it.borrow_mut().next()),
            Object::StringIterator(it) => Ok(it.borrow_mut().next()),
            Object::MapIterator(it) => Ok(it.borrow_mut().next()),
            _ => Err(Error::NotIterable),
        }
    }

    pub fn iterator_key(&self) -> Result<Object> {
        match self {
            Object::ArrayIterator(it) => Ok(it.borrow().key()),
            Object::StringIterator(it) => Ok(it.borrow().key()),
            Object::MapIterator(it) => Ok(it.borrow().key()),
            _ => Err(Error::NotIterable),
        }
    }

    pub fn iterator_value(&self) -> Result<Object> {
        match self {
            Object::ArrayIterator(it) => Ok(it.borrow().value()),
            Object::StringIterator(it) => Ok(it.borrow().value()),
            Object::MapIterator(it) => Ok(it.borrow().value()),
            _ => Err(Error::NotIterable),
        }
    }

    /// Freeze a mutable container into its immutable form. Other values are
    /// returned unchanged.
    pub fn to_immutable(&self) -> Object {
        match self {
            Object::Array(a) => Object::immutable_array(a.borrow().clone()),
            Object::Map(m) => Object::immutable_map(m.borrow().clone()),
            other => other.clone(),
        }
    }
}

// =============================================================================
// Conversions
// =============================================================================

impl Object {
    /// String form used by conversions: strings are not quoted.
    pub fn to_plain_string(&self) -> String {
        match self {
            Object::String(s) => s.to_string(),
            other => other.to_string(),
        }
    }

    pub fn to_int(&self) -> Option<i64> {
        match self {
            Object::Int(v) => Some(*v),
            Object::Float(v) => Some(*v as i64),
            Object::Char(c) => Some(*c as i64),
            Object::Bool(b) => Some(*b as i64),
            Object::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn to_float(&self) -> Option<f64> {
        match self {
            Object::Int(v) => Some(*v as f64),
            Object::Float(v) => Some(*v),
            Object::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn to_char(&self) -> Option<char> {
        match self {
            Object::Char(c) => Some(*c),
            Object::Int(v) => u32::try_from(*v).ok().and_then(char::from_u32),
            Object::String(s) => {
                let mut chars = s.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => Some(c),
                    _ => None,
                }
            }
            _ => None,
        }
    }

    pub fn to_bytes(&self) -> Option<Vec<u8>> {
        match self {
            Object::Bytes(b) => Some(b.borrow().clone()),
            Object::String(s) => Some(s.as_bytes().to_vec()),
            _ => None,
        }
    }

    pub fn to_time(&self) -> Option<DateTime<Utc>> {
        match self {
            Object::Time(t) => Some(*t),
            Object::Int(secs) => DateTime::from_timestamp(*secs, 0),
            _ => None,
        }
    }
}

// =============================================================================
// Display
// =============================================================================

fn write_items(f: &mut fmt::Formatter<'_>, items: &[Object], depth: usize) -> fmt::Result {
    if depth >= MAX_NESTING {
        return write!(f, "[...]");
    }
    write!(f, "[")?;
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        item.write_nested(f, depth + 1)?;
    }
    write!(f, "]")
}

fn write_entries(f: &mut fmt::Formatter<'_>, entries: &ObjectMap, depth: usize) -> fmt::Result {
    if depth >= MAX_NESTING {
        return write!(f, "{{...}}");
    }
    write!(f, "{{")?;
    for (i, (k, v)) in entries.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}: ", k)?;
        v.write_nested(f, depth + 1)?;
    }
    write!(f, "}}")
}

impl fmt::Display for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_nested(f, 0)
    }
}

impl Object {
    fn write_nested(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        match self {
            Object::Int(v) => write!(f, "{}", v),
            Object::Float(v) => write!(f, "{}", v),
            Object::Char(c) => write!(f, "{}", c),
            Object::Bool(b) => write!(f, "{}", b),
            Object::String(s) => write!(f, "{:?}", s.as_ref()),
            Object::Bytes(b) => write!(f, "{}", String::from_utf8_lossy(&b.borrow())),
            Object::Array(a) => write_items(f, &a.borrow(), depth),
            Object::ImmutableArray(a) => write_items(f, a, depth),
            Object::Map(m) => write_entries(f, &m.borrow(), depth),
            Object::ImmutableMap(m) => write_entries(f, m, depth),
            Object::Error(payload) => match payload.as_ref() {
                Object::Undefined => write!(f, "error"),
                other => {
                    write!(f, "error: ")?;
                    other.write_nested(f, depth + 1)
                }
            },
            Object::Undefined => write!(f, "<undefined>"),
            Object::CompiledFunction(_) | Object::Closure(_) => write!(f, "<compiled-function>"),
            Object::BuiltinFunction(_) => write!(f, "<builtin-function>"),
            Object::UserFunction(_) => write!(f, "<user-function>"),
            Object::Time(t) => write!(f, "{}", t),
            Object::ArrayIterator(_) => write!(f, "<array-iterator>"),
            Object::StringIterator(_) => write!(f, "<string-iterator>"),
            Object::MapIterator(_) => write!(f, "<map-iterator>"),
        }
    }
}
