/// Dynamic value model that guarded code computes with
///
/// Mutable containers (list, map, set, record) are shared handles, so aliasing,
/// in-place mutation and reference cycles behave as in a dynamic language.
/// Scalars and tuples are plain data.
use crate::config::types::{PurityError, Result};
use std::any::Any;
use std::cell::{Ref, RefCell, RefMut};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::rc::Rc;

/// Shared, interior-mutable container handle
pub type Shared<T> = Rc<RefCell<T>>;

fn shared<T>(value: T) -> Shared<T> {
    Rc::new(RefCell::new(value))
}

/// Address of a shared container, used as its identity
pub(crate) fn address<T: ?Sized>(rc: &Rc<T>) -> usize {
    Rc::as_ptr(rc) as *const () as usize
}

pub(crate) fn read<T>(cell: &Shared<T>) -> Result<Ref<'_, T>> {
    cell.try_borrow()
        .map_err(|_| PurityError::raised("RuntimeError", "container is being mutated"))
}

fn write<T>(cell: &Shared<T>) -> Result<RefMut<'_, T>> {
    cell.try_borrow_mut()
        .map_err(|_| PurityError::raised("RuntimeError", "container is in use"))
}

/// Hashable value usable as a map key or set member
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Key {
    None,
    Bool(bool),
    Int(i64),
    Str(String),
    Bytes(Vec<u8>),
    Tuple(Vec<Key>),
}

impl Key {
    pub fn to_value(&self) -> Value {
        match self {
            Key::None => Value::None,
            Key::Bool(b) => Value::Bool(*b),
            Key::Int(i) => Value::Int(*i),
            Key::Str(s) => Value::Str(s.clone()),
            Key::Bytes(b) => Value::Bytes(b.clone()),
            Key::Tuple(items) => Value::Tuple(items.iter().map(Key::to_value).collect()),
        }
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key::Str(s.to_string())
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Key::Str(s)
    }
}

impl From<i64> for Key {
    fn from(i: i64) -> Self {
        Key::Int(i)
    }
}

impl From<i32> for Key {
    fn from(i: i32) -> Self {
        Key::Int(i64::from(i))
    }
}

impl From<bool> for Key {
    fn from(b: bool) -> Self {
        Key::Bool(b)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.to_value(), f)
    }
}

/// Value the guards cannot look into. Copied by reference, compared by identity.
#[derive(Clone)]
pub struct Opaque {
    type_name: Rc<str>,
    handle: Rc<dyn Any>,
}

impl Opaque {
    pub fn new<T: Any>(type_name: &str, value: T) -> Self {
        Self {
            type_name: Rc::from(type_name),
            handle: Rc::new(value),
        }
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn identity(&self) -> usize {
        address(&self.handle)
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.handle.downcast_ref::<T>()
    }

    pub fn same(&self, other: &Opaque) -> bool {
        self.identity() == other.identity()
    }
}

/// Object with named attributes
#[derive(Clone, Debug)]
pub struct Record {
    pub type_name: String,
    pub fields: BTreeMap<String, Value>,
}

#[derive(Clone)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    Tuple(Vec<Value>),
    List(Shared<Vec<Value>>),
    Map(Shared<BTreeMap<Key, Value>>),
    Set(Shared<BTreeSet<Key>>),
    Record(Shared<Record>),
    Opaque(Opaque),
}

impl Value {
    pub fn str(s: impl Into<String>) -> Self {
        Value::Str(s.into())
    }

    pub fn list(items: impl IntoIterator<Item = Value>) -> Self {
        Value::List(shared(items.into_iter().collect()))
    }

    pub fn tuple(items: impl IntoIterator<Item = Value>) -> Self {
        Value::Tuple(items.into_iter().collect())
    }

    pub fn map<K: Into<Key>>(entries: impl IntoIterator<Item = (K, Value)>) -> Self {
        Value::Map(shared(
            entries.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        ))
    }

    pub fn set<K: Into<Key>>(members: impl IntoIterator<Item = K>) -> Self {
        Value::Set(shared(members.into_iter().map(Into::into).collect()))
    }

    pub fn record<N: Into<String>>(
        type_name: &str,
        fields: impl IntoIterator<Item = (N, Value)>,
    ) -> Self {
        Value::Record(shared(Record {
            type_name: type_name.to_string(),
            fields: fields.into_iter().map(|(n, v)| (n.into(), v)).collect(),
        }))
    }

    pub fn opaque<T: Any>(type_name: &str, value: T) -> Self {
        Value::Opaque(Opaque::new(type_name, value))
    }

    pub fn type_name(&self) -> String {
        match self {
            Value::None => "NoneType".to_string(),
            Value::Bool(_) => "bool".to_string(),
            Value::Int(_) => "int".to_string(),
            Value::Float(_) => "float".to_string(),
            Value::Str(_) => "str".to_string(),
            Value::Bytes(_) => "bytes".to_string(),
            Value::Tuple(_) => "tuple".to_string(),
            Value::List(_) => "list".to_string(),
            Value::Map(_) => "dict".to_string(),
            Value::Set(_) => "set".to_string(),
            Value::Record(r) => r
                .try_borrow()
                .map(|r| r.type_name.clone())
                .unwrap_or_else(|_| "object".to_string()),
            Value::Opaque(o) => o.type_name().to_string(),
        }
    }

    /// Identity of a shared container or opaque handle; plain data has none
    pub fn identity(&self) -> Option<usize> {
        match self {
            Value::List(rc) => Some(address(rc)),
            Value::Map(rc) => Some(address(rc)),
            Value::Set(rc) => Some(address(rc)),
            Value::Record(rc) => Some(address(rc)),
            Value::Opaque(o) => Some(o.identity()),
            _ => None,
        }
    }

    pub fn same_identity(&self, other: &Value) -> bool {
        matches!((self.identity(), other.identity()), (Some(a), Some(b)) if a == b)
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(x) => Some(*x),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn len(&self) -> Result<usize> {
        match self {
            Value::Str(s) => Ok(s.chars().count()),
            Value::Bytes(b) => Ok(b.len()),
            Value::Tuple(items) => Ok(items.len()),
            Value::List(rc) => Ok(read(rc)?.len()),
            Value::Map(rc) => Ok(read(rc)?.len()),
            Value::Set(rc) => Ok(read(rc)?.len()),
            other => Err(PurityError::type_error(format!(
                "object of type '{}' has no len()",
                other.type_name()
            ))),
        }
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// `list.append`
    pub fn push(&self, item: Value) -> Result<()> {
        match self {
            Value::List(rc) => {
                write(rc)?.push(item);
                Ok(())
            }
            other => Err(no_attribute(other, "append")),
        }
    }

    /// `list[index] = item`
    pub fn set_index(&self, index: usize, item: Value) -> Result<()> {
        match self {
            Value::List(rc) => {
                let mut items = write(rc)?;
                let slot = items
                    .get_mut(index)
                    .ok_or_else(|| PurityError::raised("IndexError", "list assignment index out of range"))?;
                *slot = item;
                Ok(())
            }
            other => Err(PurityError::type_error(format!(
                "'{}' object does not support item assignment",
                other.type_name()
            ))),
        }
    }

    pub fn get_index(&self, index: usize) -> Result<Value> {
        let out_of_range = || PurityError::raised("IndexError", "index out of range");
        match self {
            Value::Tuple(items) => items.get(index).cloned().ok_or_else(out_of_range),
            Value::List(rc) => read(rc)?.get(index).cloned().ok_or_else(out_of_range),
            other => Err(PurityError::type_error(format!(
                "'{}' object is not subscriptable",
                other.type_name()
            ))),
        }
    }

    /// Shallow copy of the elements of a list or tuple
    pub fn items(&self) -> Result<Vec<Value>> {
        match self {
            Value::Tuple(items) => Ok(items.clone()),
            Value::List(rc) => Ok(read(rc)?.clone()),
            other => Err(PurityError::type_error(format!(
                "'{}' object is not iterable",
                other.type_name()
            ))),
        }
    }

    /// `dict[key] = value`
    pub fn insert(&self, key: impl Into<Key>, value: Value) -> Result<Option<Value>> {
        match self {
            Value::Map(rc) => Ok(write(rc)?.insert(key.into(), value)),
            other => Err(PurityError::type_error(format!(
                "'{}' object does not support item assignment",
                other.type_name()
            ))),
        }
    }

    pub fn get_key(&self, key: &Key) -> Result<Option<Value>> {
        match self {
            Value::Map(rc) => Ok(read(rc)?.get(key).cloned()),
            other => Err(PurityError::type_error(format!(
                "'{}' object is not subscriptable",
                other.type_name()
            ))),
        }
    }

    pub fn remove_key(&self, key: &Key) -> Result<Option<Value>> {
        match self {
            Value::Map(rc) => Ok(write(rc)?.remove(key)),
            other => Err(no_attribute(other, "pop")),
        }
    }

    /// `set.add`
    pub fn add_member(&self, member: impl Into<Key>) -> Result<bool> {
        match self {
            Value::Set(rc) => Ok(write(rc)?.insert(member.into())),
            other => Err(no_attribute(other, "add")),
        }
    }

    pub fn contains(&self, key: &Key) -> Result<bool> {
        match self {
            Value::Set(rc) => Ok(read(rc)?.contains(key)),
            Value::Map(rc) => Ok(read(rc)?.contains_key(key)),
            other => Err(PurityError::type_error(format!(
                "argument of type '{}' is not iterable",
                other.type_name()
            ))),
        }
    }

    /// `obj.name = value`
    pub fn set_field(&self, name: &str, value: Value) -> Result<()> {
        match self {
            Value::Record(rc) => {
                write(rc)?.fields.insert(name.to_string(), value);
                Ok(())
            }
            other => Err(no_attribute(other, name)),
        }
    }

    pub fn field(&self, name: &str) -> Result<Value> {
        match self {
            Value::Record(rc) => read(rc)?
                .fields
                .get(name)
                .cloned()
                .ok_or_else(|| no_attribute(self, name)),
            other => Err(no_attribute(other, name)),
        }
    }

    /// Convert to a map key; mutable containers and floats are unhashable
    pub fn to_key(&self) -> Result<Key> {
        match self {
            Value::None => Ok(Key::None),
            Value::Bool(b) => Ok(Key::Bool(*b)),
            Value::Int(i) => Ok(Key::Int(*i)),
            Value::Str(s) => Ok(Key::Str(s.clone())),
            Value::Bytes(b) => Ok(Key::Bytes(b.clone())),
            Value::Tuple(items) => Ok(Key::Tuple(
                items.iter().map(Value::to_key).collect::<Result<Vec<_>>>()?,
            )),
            other => Err(PurityError::type_error(format!(
                "unhashable type: '{}'",
                other.type_name()
            ))),
        }
    }

    /// `self + other`
    pub fn add(&self, other: &Value) -> Result<Value> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a
                .checked_add(*b)
                .map(Value::Int)
                .ok_or_else(|| PurityError::raised("OverflowError", "integer addition overflowed")),
            (Value::Float(_), Value::Int(_) | Value::Float(_))
            | (Value::Int(_), Value::Float(_)) => Ok(Value::Float(
                self.as_float().unwrap_or_default() + other.as_float().unwrap_or_default(),
            )),
            (Value::Str(a), Value::Str(b)) => Ok(Value::Str(format!("{}{}", a, b))),
            (Value::Tuple(a), Value::Tuple(b)) => {
                Ok(Value::Tuple(a.iter().chain(b.iter()).cloned().collect()))
            }
            (Value::List(_), Value::List(_)) => {
                let mut items = self.items()?;
                items.extend(other.items()?);
                Ok(Value::list(items))
            }
            _ => Err(unsupported_operand("+", self, other)),
        }
    }

    /// `self * other`
    pub fn mul(&self, other: &Value) -> Result<Value> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a
                .checked_mul(*b)
                .map(Value::Int)
                .ok_or_else(|| PurityError::raised("OverflowError", "integer multiplication overflowed")),
            (Value::Float(_), Value::Int(_) | Value::Float(_))
            | (Value::Int(_), Value::Float(_)) => Ok(Value::Float(
                self.as_float().unwrap_or_default() * other.as_float().unwrap_or_default(),
            )),
            (Value::Str(s), Value::Int(n)) => repeat_str(s, *n).map(Value::Str),
            _ => Err(unsupported_operand("*", self, other)),
        }
    }

    fn write_repr(&self, f: &mut fmt::Formatter<'_>, seen: &mut Vec<usize>) -> fmt::Result {
        if let Some(id) = self.identity() {
            if seen.contains(&id) {
                return match self {
                    Value::List(_) => f.write_str("[...]"),
                    Value::Record(_) => f.write_str("<...>"),
                    _ => f.write_str("{...}"),
                };
            }
        }
        match self {
            Value::None => f.write_str("None"),
            Value::Bool(true) => f.write_str("True"),
            Value::Bool(false) => f.write_str("False"),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write_float(f, *x),
            Value::Str(s) => write_str_repr(f, s),
            Value::Bytes(b) => write_bytes_repr(f, b),
            Value::Tuple(items) => {
                f.write_str("(")?;
                write_joined(f, items, seen)?;
                if items.len() == 1 {
                    f.write_str(",")?;
                }
                f.write_str(")")
            }
            Value::List(rc) => {
                let Ok(items) = rc.try_borrow() else {
                    return f.write_str("[<busy>]");
                };
                seen.push(address(rc));
                f.write_str("[")?;
                write_joined(f, &items, seen)?;
                seen.pop();
                f.write_str("]")
            }
            Value::Map(rc) => {
                let Ok(entries) = rc.try_borrow() else {
                    return f.write_str("{<busy>}");
                };
                seen.push(address(rc));
                f.write_str("{")?;
                for (index, (key, value)) in entries.iter().enumerate() {
                    if index > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}: ", key)?;
                    value.write_repr(f, seen)?;
                }
                seen.pop();
                f.write_str("}")
            }
            Value::Set(rc) => {
                let Ok(members) = rc.try_borrow() else {
                    return f.write_str("{<busy>}");
                };
                if members.is_empty() {
                    return f.write_str("set()");
                }
                let rendered: Vec<String> = members.iter().map(|k| k.to_string()).collect();
                write!(f, "{{{}}}", rendered.join(", "))
            }
            Value::Record(rc) => {
                let Ok(record) = rc.try_borrow() else {
                    return f.write_str("<busy object>");
                };
                seen.push(address(rc));
                write!(f, "{}(", record.type_name)?;
                for (index, (name, value)) in record.fields.iter().enumerate() {
                    if index > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}=", name)?;
                    value.write_repr(f, seen)?;
                }
                seen.pop();
                f.write_str(")")
            }
            Value::Opaque(o) => write!(f, "<{} object at {:#x}>", o.type_name(), o.identity()),
        }
    }
}

fn no_attribute(value: &Value, attribute: &str) -> PurityError {
    PurityError::raised(
        "AttributeError",
        format!("'{}' object has no attribute '{}'", value.type_name(), attribute),
    )
}

fn unsupported_operand(op: &str, left: &Value, right: &Value) -> PurityError {
    PurityError::type_error(format!(
        "unsupported operand type(s) for {}: '{}' and '{}'",
        op,
        left.type_name(),
        right.type_name()
    ))
}

fn write_joined(f: &mut fmt::Formatter<'_>, items: &[Value], seen: &mut Vec<usize>) -> fmt::Result {
    for (index, item) in items.iter().enumerate() {
        if index > 0 {
            f.write_str(", ")?;
        }
        item.write_repr(f, seen)?;
    }
    Ok(())
}

fn write_float(f: &mut fmt::Formatter<'_>, x: f64) -> fmt::Result {
    if x.is_nan() {
        f.write_str("nan")
    } else if x.is_infinite() {
        f.write_str(if x > 0.0 { "inf" } else { "-inf" })
    } else {
        write!(f, "{:?}", x)
    }
}

fn write_str_repr(f: &mut fmt::Formatter<'_>, s: &str) -> fmt::Result {
    f.write_str("'")?;
    for c in s.chars() {
        match c {
            '\'' => f.write_str("\\'")?,
            '\\' => f.write_str("\\\\")?,
            '\n' => f.write_str("\\n")?,
            '\t' => f.write_str("\\t")?,
            c => write!(f, "{}", c)?,
        }
    }
    f.write_str("'")
}

fn write_bytes_repr(f: &mut fmt::Formatter<'_>, bytes: &[u8]) -> fmt::Result {
    f.write_str("b'")?;
    for &b in bytes {
        match b {
            b'\'' => f.write_str("\\'")?,
            b'\\' => f.write_str("\\\\")?,
            0x20..=0x7e => write!(f, "{}", b as char)?,
            _ => write!(f, "\\x{:02x}", b)?,
        }
    }
    f.write_str("'")
}

/// `s * times`; negative counts give the empty string
fn repeat_str(s: &str, times: i64) -> Result<String> {
    let times = usize::try_from(times.max(0)).unwrap_or(usize::MAX);
    if s.is_empty() || times == 0 {
        return Ok(String::new());
    }
    let len = s
        .len()
        .checked_mul(times)
        .filter(|len| *len <= isize::MAX as usize)
        .ok_or_else(|| PurityError::raised("OverflowError", "repeated string is too long"))?;
    let mut out = String::new();
    out.try_reserve_exact(len)
        .map_err(|_| PurityError::raised("MemoryError", format!("cannot allocate {} bytes", len)))?;
    for _ in 0..times {
        out.push_str(s);
    }
    Ok(out)
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_repr(f, &mut Vec::new())
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Structural equality, cycle-aware
impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        super::diff::deep_equal(self, other)
    }
}

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Value::None
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<Key> for Value {
    fn from(key: Key) -> Self {
        key.to_value()
    }
}
