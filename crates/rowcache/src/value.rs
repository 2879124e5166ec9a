// Copyright (C) 2026 Ryan Daum <ryan.daum@gmail.com> This program is free
// software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, version
// 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

use ahash::AHasher;
use arcstr::ArcStr;
use bytes::Bytes;
use smallvec::SmallVec;
use std::fmt::{Display, Formatter};
use std::hash::{Hash, Hasher};

/// A single column value.
///
/// `NotLoaded` marks a column whose value was deferred for lazy loading; it is never written to
/// the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Value {
    Null,
    NotLoaded,
    Bool(bool),
    Int(i64),
    Str(ArcStr),
    Bytes(Bytes),
}

pub const NOT_LOADED: Value = Value::NotLoaded;

impl Value {
    pub fn is_loaded(&self) -> bool {
        !matches!(self, Value::NotLoaded)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(ArcStr::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(ArcStr::from(s))
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::NotLoaded => write!(f, "<not loaded>"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Str(s) => write!(f, "{s:?}"),
            Value::Bytes(b) => write!(f, "<{} bytes>", b.len()),
        }
    }
}

/// Column values of a row, indexed by column position.
pub type Values = Vec<Value>;

/// Cached related-key collections, one slot per relationship field. `None` means the collection
/// has not been loaded.
pub type RelationValues = Vec<Option<Vec<Key>>>;

/// A primary key. Composite keys hold one value per key column.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Key(SmallVec<[Value; 2]>);

impl Key {
    pub fn new(values: impl IntoIterator<Item = Value>) -> Self {
        Self(values.into_iter().collect())
    }

    pub fn values(&self) -> &[Value] {
        &self.0
    }

    /// Stable 64-bit hash used for partition routing. Fixed-key ahash, so the same key always
    /// lands in the same partition for the life of the process.
    pub fn hash64(&self) -> u64 {
        let mut hasher = AHasher::default();
        self.hash(&mut hasher);
        hasher.finish()
    }

    /// True if any component is null; such a key cannot identify a row.
    pub fn has_null(&self) -> bool {
        self.0.iter().any(Value::is_null)
    }
}

impl From<i64> for Key {
    fn from(i: i64) -> Self {
        Key::new([Value::Int(i)])
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key::new([Value::from(s)])
    }
}

impl From<Value> for Key {
    fn from(v: Value) -> Self {
        Key::new([v])
    }
}

impl Display for Key {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.0.as_slice() {
            [single] => write!(f, "{single}"),
            values => {
                write!(f, "(")?;
                for (i, v) in values.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{v}")?;
                }
                write!(f, ")")
            }
        }
    }
}
