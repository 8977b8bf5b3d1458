use std::{fmt, sync::Arc};

use crate::{Function, Native};

/// Result of calling a replay patch.
#[derive(Debug, Clone)]
pub enum Patch {
    Return(Value),
    Raise(Value),
}

#[derive(Debug)]
pub enum Object {
    Nil,
    Bool(bool),
    Fixnum(i64),
    Str(String),
    Function(Arc<Function>),
    Native(&'static Native),
    Patch(Patch),
}

/// Reference counted handle to a runtime object.
///
/// Every clone is one counted reference. Operand stack slots own exactly one
/// handle each, so the strong count of a value is the number of slots and
/// callers currently holding it.
#[derive(Clone)]
pub struct Value(Arc<Object>);

impl Value {
    pub fn new(object: Object) -> Self {
        Self(Arc::new(object))
    }

    pub fn nil() -> Self {
        Self::new(Object::Nil)
    }

    pub fn bool(value: bool) -> Self {
        Self::new(Object::Bool(value))
    }

    pub fn fixnum(value: i64) -> Self {
        Self::new(Object::Fixnum(value))
    }

    pub fn string(value: impl Into<String>) -> Self {
        Self::new(Object::Str(value.into()))
    }

    pub fn function(function: Arc<Function>) -> Self {
        Self::new(Object::Function(function))
    }

    pub fn native(native: &'static Native) -> Self {
        Self::new(Object::Native(native))
    }

    pub fn patch(patch: Patch) -> Self {
        Self::new(Object::Patch(patch))
    }

    #[must_use]
    pub fn object(&self) -> &Object {
        &self.0
    }

    /// Number of live handles to this value.
    #[must_use]
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }

    /// Whether both handles point at the same object.
    #[must_use]
    pub fn same(&self, other: &Value) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    #[must_use]
    pub fn as_fixnum(&self) -> Option<i64> {
        match self.object() {
            Object::Fixnum(value) => Some(*value),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self.object() {
            Object::Str(value) => Some(value),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_nil(&self) -> bool {
        matches!(self.object(), Object::Nil)
    }

    #[must_use]
    pub fn is_callable(&self) -> bool {
        matches!(
            self.object(),
            Object::Function(_) | Object::Native(_) | Object::Patch(_)
        )
    }

    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self.object() {
            Object::Nil => "nil",
            Object::Bool(_) => "bool",
            Object::Fixnum(_) => "fixnum",
            Object::Str(_) => "string",
            Object::Function(_) => "function",
            Object::Native(_) => "native",
            Object::Patch(_) => "patch",
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self.object(), other.object()) {
            (Object::Nil, Object::Nil) => true,
            (Object::Bool(a), Object::Bool(b)) => a == b,
            (Object::Fixnum(a), Object::Fixnum(b)) => a == b,
            (Object::Str(a), Object::Str(b)) => a == b,
            (Object::Function(a), Object::Function(b)) => Arc::ptr_eq(a, b),
            (Object::Native(a), Object::Native(b)) => a.name == b.name,
            _ => self.same(other),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.object() {
            Object::Str(value) => write!(f, "{value:?}"),
            _ => write!(f, "{self}"),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.object() {
            Object::Nil => write!(f, "nil"),
            Object::Bool(value) => write!(f, "{value}"),
            Object::Fixnum(value) => write!(f, "{value}"),
            Object::Str(value) => write!(f, "{value}"),
            Object::Function(function) => write!(f, "<fn {}>", function.name),
            Object::Native(native) => write!(f, "<native {}>", native.name),
            Object::Patch(Patch::Return(value)) => write!(f, "<patch returning {value:?}>"),
            Object::Patch(Patch::Raise(value)) => write!(f, "<patch raising {value:?}>"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_are_counted_references() {
        let value = Value::string("hello");
        assert_eq!(value.ref_count(), 1);

        let other = value.clone();
        assert_eq!(value.ref_count(), 2);
        assert!(value.same(&other));

        drop(other);
        assert_eq!(value.ref_count(), 1);
    }

    #[test]
    fn primitives_compare_by_content() {
        assert_eq!(Value::fixnum(3), Value::fixnum(3));
        assert_ne!(Value::fixnum(3), Value::fixnum(4));
        assert_eq!(Value::string("a"), Value::string("a"));
        assert_ne!(Value::nil(), Value::bool(false));
    }

    #[test]
    fn patches_compare_by_identity() {
        let a = Value::patch(Patch::Return(Value::nil()));
        let b = Value::patch(Patch::Return(Value::nil()));
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
    }
}
