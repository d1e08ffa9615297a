//! Argument traits and dotted-path resolution
//!
//! A bound call's arguments form a small tree. The root is an [`Arguments`]
//! value (usually a struct deriving `Arguments`) whose named parameters are
//! [`Argument`] nodes. Each node is either a leaf convertible to a [`Value`],
//! a mapping answering key lookups, or a record answering attribute lookups.

use std::borrow::Borrow;
use std::collections::{BTreeMap, HashMap};
use std::hash::{BuildHasher, Hash};
use std::rc::Rc;
use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;

use crate::error::{Error, Result};
use crate::traits::ToValue;
use crate::value::Value;

/// One node in an argument tree.
pub trait Argument {
    /// The value bound or spliced when a placeholder ends at this node.
    fn value(&self) -> Result<Value>;

    /// Whether path segments below this node use key lookup.
    fn is_mapping(&self) -> bool {
        false
    }

    /// Key lookup, consulted when [`is_mapping`](Argument::is_mapping) is true.
    fn get_key(&self, _key: &str) -> Option<&dyn Argument> {
        None
    }

    /// Field access, consulted for non-mappings.
    fn get_attr(&self, _name: &str) -> Option<&dyn Argument> {
        None
    }
}

/// The root of an argument tree: declared parameter name to value.
pub trait Arguments {
    fn argument(&self, name: &str) -> Option<&dyn Argument>;
}

/// Arguments whose parameter names are known statically.
///
/// Binders check every template path against these names when a bound
/// function is created.
pub trait Signature: Arguments {
    fn parameter_names() -> &'static [&'static str];
}

/// Walk `path` from the root arguments down to a value.
///
/// The first segment names a parameter; each following segment uses key
/// lookup when the current node is a mapping and field access otherwise.
pub fn resolve<S: AsRef<str>>(path: &[S], args: &dyn Arguments) -> Result<Value> {
    let (root, rest) = path.split_first().ok_or_else(|| Error::ArgumentResolution {
        path: String::new(),
        reason: "empty path".to_string(),
    })?;
    let mut node = args
        .argument(root.as_ref())
        .ok_or_else(|| unresolved(path, root.as_ref()))?;
    for segment in rest {
        let segment = segment.as_ref();
        let next = if node.is_mapping() {
            node.get_key(segment)
        } else {
            node.get_attr(segment)
        };
        node = next.ok_or_else(|| unresolved(path, segment))?;
    }
    node.value().map_err(|err| match err {
        Error::ArgumentResolution { path: p, reason } if p.is_empty() => {
            Error::ArgumentResolution {
                path: join(path),
                reason,
            }
        }
        other => other,
    })
}

fn unresolved<S: AsRef<str>>(path: &[S], segment: &str) -> Error {
    Error::ArgumentResolution {
        path: join(path),
        reason: format!("no key or attribute '{segment}'"),
    }
}

pub(crate) fn join<S: AsRef<str>>(path: &[S]) -> String {
    path.iter()
        .map(AsRef::as_ref)
        .collect::<Vec<_>>()
        .join(".")
}

macro_rules! impl_leaf_argument {
    ($($ty:ty),*) => {
        $(
            impl Argument for $ty {
                fn value(&self) -> Result<Value> {
                    Ok(ToValue::to_value(self))
                }
            }
        )*
    };
}

impl_leaf_argument!(
    bool,
    i8,
    i16,
    i32,
    i64,
    u8,
    u16,
    u32,
    u64,
    f32,
    f64,
    String,
    str,
    Vec<u8>,
    NaiveDate,
    NaiveDateTime,
    NaiveTime,
    Decimal
);

impl Argument for Value {
    fn value(&self) -> Result<Value> {
        Ok(self.clone())
    }

    fn is_mapping(&self) -> bool {
        matches!(self, Value::Json(serde_json::Value::Object(_)))
    }

    fn get_key(&self, key: &str) -> Option<&dyn Argument> {
        match self {
            Value::Json(json) => json.get_key(key),
            _ => None,
        }
    }
}

impl Argument for serde_json::Value {
    fn value(&self) -> Result<Value> {
        Ok(match self {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::String(s) => Value::String(s.clone()),
            serde_json::Value::Number(n) => match (n.as_i64(), n.as_u64(), n.as_f64()) {
                (Some(i), _, _) => Value::I64(i),
                (None, Some(u), _) => Value::U64(u),
                (None, None, Some(f)) => Value::F64(f),
                _ => Value::Json(self.clone()),
            },
            other => Value::Json(other.clone()),
        })
    }

    fn is_mapping(&self) -> bool {
        self.is_object()
    }

    fn get_key(&self, key: &str) -> Option<&dyn Argument> {
        self.as_object()
            .and_then(|map| map.get(key))
            .map(|v| v as &dyn Argument)
    }
}

impl<T: Argument> Argument for Option<T> {
    fn value(&self) -> Result<Value> {
        match self {
            Some(v) => v.value(),
            None => Ok(Value::Null),
        }
    }

    fn is_mapping(&self) -> bool {
        self.as_ref().is_some_and(Argument::is_mapping)
    }

    fn get_key(&self, key: &str) -> Option<&dyn Argument> {
        self.as_ref().and_then(|v| v.get_key(key))
    }

    fn get_attr(&self, name: &str) -> Option<&dyn Argument> {
        self.as_ref().and_then(|v| v.get_attr(name))
    }
}

macro_rules! impl_pointer_argument {
    ($($ptr:ident),*) => {
        $(
            impl<T: Argument + ?Sized> Argument for $ptr<T> {
                fn value(&self) -> Result<Value> {
                    (**self).value()
                }

                fn is_mapping(&self) -> bool {
                    (**self).is_mapping()
                }

                fn get_key(&self, key: &str) -> Option<&dyn Argument> {
                    (**self).get_key(key)
                }

                fn get_attr(&self, name: &str) -> Option<&dyn Argument> {
                    (**self).get_attr(name)
                }
            }
        )*
    };
}

impl_pointer_argument!(Box, Rc, Arc);

impl<T: Argument + ?Sized> Argument for &T {
    fn value(&self) -> Result<Value> {
        (**self).value()
    }

    fn is_mapping(&self) -> bool {
        (**self).is_mapping()
    }

    fn get_key(&self, key: &str) -> Option<&dyn Argument> {
        (**self).get_key(key)
    }

    fn get_attr(&self, name: &str) -> Option<&dyn Argument> {
        (**self).get_attr(name)
    }
}

fn mapping_as_value() -> Result<Value> {
    Err(Error::ArgumentResolution {
        path: String::new(),
        reason: "a mapping cannot be bound as a single value".to_string(),
    })
}

impl<K, V, S> Argument for HashMap<K, V, S>
where
    K: Borrow<str> + Eq + Hash,
    V: Argument,
    S: BuildHasher,
{
    fn value(&self) -> Result<Value> {
        mapping_as_value()
    }

    fn is_mapping(&self) -> bool {
        true
    }

    fn get_key(&self, key: &str) -> Option<&dyn Argument> {
        self.get(key).map(|v| v as &dyn Argument)
    }
}

impl<K, V> Argument for BTreeMap<K, V>
where
    K: Borrow<str> + Ord,
    V: Argument,
{
    fn value(&self) -> Result<Value> {
        mapping_as_value()
    }

    fn is_mapping(&self) -> bool {
        true
    }

    fn get_key(&self, key: &str) -> Option<&dyn Argument> {
        self.get(key).map(|v| v as &dyn Argument)
    }
}

impl<K, V, S> Arguments for HashMap<K, V, S>
where
    K: Borrow<str> + Eq + Hash,
    V: Argument,
    S: BuildHasher,
{
    fn argument(&self, name: &str) -> Option<&dyn Argument> {
        self.get(name).map(|v| v as &dyn Argument)
    }
}

impl<K, V> Arguments for BTreeMap<K, V>
where
    K: Borrow<str> + Ord,
    V: Argument,
{
    fn argument(&self, name: &str) -> Option<&dyn Argument> {
        self.get(name).map(|v| v as &dyn Argument)
    }
}

impl Arguments for serde_json::Map<String, serde_json::Value> {
    fn argument(&self, name: &str) -> Option<&dyn Argument> {
        self.get(name).map(|v| v as &dyn Argument)
    }
}

impl<T: Arguments + ?Sized> Arguments for &T {
    fn argument(&self, name: &str) -> Option<&dyn Argument> {
        (**self).argument(name)
    }
}

impl Arguments for () {
    fn argument(&self, _name: &str) -> Option<&dyn Argument> {
        None
    }
}

impl Signature for () {
    fn parameter_names() -> &'static [&'static str] {
        &[]
    }
}
