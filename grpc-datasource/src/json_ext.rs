//! JSON helpers shared by the planner and the response assembler.

use std::fmt;

use serde::Serialize;
use serde::Serializer;
use serde_json_bytes::ByteString;
use serde_json_bytes::Map;
pub use serde_json_bytes::Value;

/// A JSON object.
pub type Object = Map<ByteString, Value>;

const TYPENAME: &str = "__typename";

/// One element of a [`Path`].
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum PathElement {
    /// An object key (a GraphQL response key).
    Key(String),

    /// Restricts the path to objects whose `__typename` is the given type.
    Fragment(String),
}

impl fmt::Display for PathElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathElement::Key(key) => write!(f, "{key}"),
            PathElement::Fragment(type_name) => write!(f, "... on {type_name}"),
        }
    }
}

/// A path into a GraphQL response.
///
/// Lists are traversed transparently: a key applied to an array applies to each of its items.
#[derive(Clone, Debug, Default, Eq, Hash, PartialEq)]
pub struct Path(pub Vec<PathElement>);

impl Path {
    pub fn empty() -> Path {
        Path(Vec::new())
    }

    pub fn from_keys<I, S>(keys: I) -> Path
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Path(
            keys.into_iter()
                .map(|key| PathElement::Key(key.into()))
                .collect(),
        )
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PathElement> {
        self.0.iter()
    }

    pub fn last(&self) -> Option<&PathElement> {
        self.0.last()
    }

    /// The last element of the path if it is a key.
    pub fn last_key(&self) -> Option<&str> {
        match self.0.last() {
            Some(PathElement::Key(key)) => Some(key),
            _ => None,
        }
    }

    /// The path without its last element.
    pub fn parent(&self) -> Option<Path> {
        if self.0.is_empty() {
            None
        } else {
            Some(Path(self.0[..self.0.len() - 1].to_vec()))
        }
    }

    pub fn join_key(&self, key: impl Into<String>) -> Path {
        let mut elements = self.0.clone();
        elements.push(PathElement::Key(key.into()));
        Path(elements)
    }

    pub fn join_fragment(&self, type_name: impl Into<String>) -> Path {
        let mut elements = self.0.clone();
        elements.push(PathElement::Fragment(type_name.into()));
        Path(elements)
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut iter = self.0.iter();
        if let Some(element) = iter.next() {
            write!(f, "{element}")?;
        }
        iter.try_for_each(|element| write!(f, ".{element}"))
    }
}

impl Serialize for Path {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

pub trait ValueExt {
    /// Deep merge `other` into `self`: objects are merged key by key, arrays item by item,
    /// anything else in `other` replaces the current value unless it is null.
    fn deep_merge(&mut self, other: Value);

    /// Calls `f` on every object reached by following `path`, in document order.
    fn for_each_object_at_path_mut(&mut self, path: &[PathElement], f: &mut dyn FnMut(&mut Object));

    /// Calls `f` on every object reached by following `path`, in document order.
    fn for_each_object_at_path<'a>(&'a self, path: &[PathElement], f: &mut dyn FnMut(&'a Object));
}

impl ValueExt for Value {
    fn deep_merge(&mut self, other: Value) {
        match (self, other) {
            (Value::Object(current), Value::Object(other)) => {
                for (key, value) in other.into_iter() {
                    match current.get_mut(key.as_str()) {
                        Some(existing) => existing.deep_merge(value),
                        None => {
                            current.insert(key, value);
                        }
                    }
                }
            }
            (Value::Array(current), Value::Array(other)) => {
                for (index, value) in other.into_iter().enumerate() {
                    match current.get_mut(index) {
                        Some(existing) => existing.deep_merge(value),
                        None => current.push(value),
                    }
                }
            }
            (_, Value::Null) => {}
            (current, other) => *current = other,
        }
    }

    fn for_each_object_at_path_mut(&mut self, path: &[PathElement], f: &mut dyn FnMut(&mut Object)) {
        match self {
            Value::Array(items) => {
                for item in items {
                    item.for_each_object_at_path_mut(path, f);
                }
            }
            Value::Object(object) => match path.split_first() {
                None => f(object),
                Some((PathElement::Key(key), rest)) => {
                    if let Some(value) = object.get_mut(key.as_str()) {
                        value.for_each_object_at_path_mut(rest, f);
                    }
                }
                Some((PathElement::Fragment(type_name), rest)) => {
                    if has_typename(object, type_name) {
                        self.for_each_object_at_path_mut(rest, f);
                    }
                }
            },
            _ => {}
        }
    }

    fn for_each_object_at_path<'a>(&'a self, path: &[PathElement], f: &mut dyn FnMut(&'a Object)) {
        match self {
            Value::Array(items) => {
                for item in items {
                    item.for_each_object_at_path(path, f);
                }
            }
            Value::Object(object) => match path.split_first() {
                None => f(object),
                Some((PathElement::Key(key), rest)) => {
                    if let Some(value) = object.get(key.as_str()) {
                        value.for_each_object_at_path(rest, f);
                    }
                }
                Some((PathElement::Fragment(type_name), rest)) => {
                    if has_typename(object, type_name) {
                        self.for_each_object_at_path(rest, f);
                    }
                }
            },
            _ => {}
        }
    }
}

fn has_typename(object: &Object, type_name: &str) -> bool {
    object
        .get(TYPENAME)
        .and_then(Value::as_str)
        .is_some_and(|typename| typename == type_name)
}
