//! # OVSDB Value Model
//!
//! Atoms and datums as they travel over the wire.
//!
//! ## Encoding
//!
//! | Rust | JSON |
//! |------|------|
//! | `Atom::Integer(5)` | `5` |
//! | `Atom::Real(1.5)` | `1.5` |
//! | `Atom::Boolean(true)` | `true` |
//! | `Atom::String("a")` | `"a"` |
//! | `Atom::Uuid(u)` | `["uuid", "<u>"]` |
//! | `Atom::NamedUuid("br_test")` | `["named-uuid", "br_test"]` |
//! | `Value::Set({..})` | `["set", [..]]` |
//! | `Value::Map({k: v})` | `["map", [[k, v]]]` |
//!
//! Decoding is schema-free: a bare atom decodes to [`Value::Atom`] even when
//! the column is a set. [`Value::normalize`] reshapes a decoded value
//! against a [`ColumnType`].

pub mod row;

pub use row::Row;

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{json, Value as Json};
use uuid::Uuid;

use crate::protocol::{OvsdbError, OvsdbResult};
use crate::schema::{AtomicType, ColumnKind, ColumnType};

/// A single scalar value.
///
/// `NamedUuid` is a placeholder for the UUID of a row inserted earlier in the
/// same transaction. The server substitutes it at commit time; the client
/// never resolves it locally.
#[derive(Debug, Clone)]
pub enum Atom {
    Integer(i64),
    Real(f64),
    Boolean(bool),
    String(String),
    Uuid(Uuid),
    NamedUuid(String),
}

impl Atom {
    /// Reference to a row inserted in the same transaction with `uuid-name` = `name`.
    pub fn named_uuid(name: impl Into<String>) -> Self {
        Atom::NamedUuid(name.into())
    }

    /// The atomic type this atom carries. Named UUIDs are UUIDs.
    pub fn atomic_type(&self) -> AtomicType {
        match self {
            Atom::Integer(_) => AtomicType::Integer,
            Atom::Real(_) => AtomicType::Real,
            Atom::Boolean(_) => AtomicType::Boolean,
            Atom::String(_) => AtomicType::String,
            Atom::Uuid(_) | Atom::NamedUuid(_) => AtomicType::Uuid,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Atom::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Atom::Integer(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Atom::Real(v) => Some(*v),
            Atom::Integer(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Atom::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_uuid(&self) -> Option<Uuid> {
        match self {
            Atom::Uuid(u) => Some(*u),
            _ => None,
        }
    }

    pub fn to_json(&self) -> Json {
        match self {
            Atom::Integer(v) => json!(v),
            Atom::Real(v) => json!(v),
            Atom::Boolean(b) => json!(b),
            Atom::String(s) => json!(s),
            Atom::Uuid(u) => json!(["uuid", u.to_string()]),
            Atom::NamedUuid(n) => json!(["named-uuid", n]),
        }
    }

    pub fn from_json(json: &Json) -> OvsdbResult<Self> {
        match json {
            Json::Bool(b) => Ok(Atom::Boolean(*b)),
            Json::String(s) => Ok(Atom::String(s.clone())),
            Json::Number(n) => match n.as_i64() {
                Some(v) => Ok(Atom::Integer(v)),
                None => n
                    .as_f64()
                    .map(Atom::Real)
                    .ok_or_else(|| malformed(format!("unrepresentable number {n}"))),
            },
            Json::Array(items) => match (items.first().and_then(Json::as_str), items.get(1)) {
                (Some("uuid"), Some(Json::String(s))) if items.len() == 2 => Uuid::parse_str(s)
                    .map(Atom::Uuid)
                    .map_err(|e| malformed(format!("invalid uuid '{s}': {e}"))),
                (Some("named-uuid"), Some(Json::String(s))) if items.len() == 2 => {
                    Ok(Atom::NamedUuid(s.clone()))
                }
                _ => Err(malformed(format!("not an atom: {json}"))),
            },
            _ => Err(malformed(format!("not an atom: {json}"))),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Atom::Integer(_) => 0,
            Atom::Real(_) => 1,
            Atom::Boolean(_) => 2,
            Atom::String(_) => 3,
            Atom::Uuid(_) => 4,
            Atom::NamedUuid(_) => 5,
        }
    }
}

impl PartialEq for Atom {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Atom {}

impl PartialOrd for Atom {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Atom {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Atom::Integer(a), Atom::Integer(b)) => a.cmp(b),
            (Atom::Real(a), Atom::Real(b)) => a.total_cmp(b),
            (Atom::Boolean(a), Atom::Boolean(b)) => a.cmp(b),
            (Atom::String(a), Atom::String(b)) => a.cmp(b),
            (Atom::Uuid(a), Atom::Uuid(b)) => a.cmp(b),
            (Atom::NamedUuid(a), Atom::NamedUuid(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl fmt::Display for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Atom::Integer(v) => write!(f, "{v}"),
            Atom::Real(v) => write!(f, "{v}"),
            Atom::Boolean(b) => write!(f, "{b}"),
            Atom::String(s) => write!(f, "\"{s}\""),
            Atom::Uuid(u) => write!(f, "{u}"),
            Atom::NamedUuid(n) => write!(f, "@{n}"),
        }
    }
}

impl From<i64> for Atom {
    fn from(v: i64) -> Self {
        Atom::Integer(v)
    }
}

impl From<i32> for Atom {
    fn from(v: i32) -> Self {
        Atom::Integer(i64::from(v))
    }
}

impl From<f64> for Atom {
    fn from(v: f64) -> Self {
        Atom::Real(v)
    }
}

impl From<bool> for Atom {
    fn from(v: bool) -> Self {
        Atom::Boolean(v)
    }
}

impl From<&str> for Atom {
    fn from(v: &str) -> Self {
        Atom::String(v.to_string())
    }
}

impl From<String> for Atom {
    fn from(v: String) -> Self {
        Atom::String(v)
    }
}

impl From<Uuid> for Atom {
    fn from(v: Uuid) -> Self {
        Atom::Uuid(v)
    }
}

/// An OVSDB datum: a single atom, a set of atoms, or a map between atoms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Atom(Atom),
    Set(BTreeSet<Atom>),
    Map(BTreeMap<Atom, Atom>),
}

impl Value {
    pub fn empty_set() -> Self {
        Value::Set(BTreeSet::new())
    }

    pub fn empty_map() -> Self {
        Value::Map(BTreeMap::new())
    }

    pub fn set<I, A>(items: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<Atom>,
    {
        Value::Set(items.into_iter().map(Into::into).collect())
    }

    pub fn map<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<Atom>,
        V: Into<Atom>,
    {
        Value::Map(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Short name of the shape, used in type error messages.
    pub fn shape(&self) -> &'static str {
        match self {
            Value::Atom(_) => "scalar",
            Value::Set(_) => "set",
            Value::Map(_) => "map",
        }
    }

    /// True for an empty set or empty map (the OVSDB encoding of "no value").
    pub fn is_empty(&self) -> bool {
        match self {
            Value::Atom(_) => false,
            Value::Set(s) => s.is_empty(),
            Value::Map(m) => m.is_empty(),
        }
    }

    pub fn as_atom(&self) -> Option<&Atom> {
        match self {
            Value::Atom(a) => Some(a),
            Value::Set(s) if s.len() == 1 => s.iter().next(),
            _ => None,
        }
    }

    pub fn as_set(&self) -> Option<&BTreeSet<Atom>> {
        match self {
            Value::Set(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<Atom, Atom>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Iterate the atoms of a scalar or set (empty for maps).
    pub fn atoms(&self) -> Box<dyn Iterator<Item = &Atom> + '_> {
        match self {
            Value::Atom(a) => Box::new(std::iter::once(a)),
            Value::Set(s) => Box::new(s.iter()),
            Value::Map(_) => Box::new(std::iter::empty()),
        }
    }

    /// Reshape a schema-free decoded value to the column's declared kind:
    /// bare atoms in set columns become one-element sets, and one-element
    /// sets in scalar columns collapse to the atom.
    pub fn normalize(self, column_type: &ColumnType) -> Value {
        match (column_type.kind(), self) {
            (ColumnKind::Set, Value::Atom(a)) => Value::Set(BTreeSet::from([a])),
            (ColumnKind::Atomic { .. }, Value::Set(s)) if s.len() == 1 => {
                let atom = s.into_iter().next().map(Value::Atom);
                atom.unwrap_or_else(Value::empty_set)
            }
            (_, v) => v,
        }
    }

    pub fn to_json(&self) -> Json {
        match self {
            Value::Atom(a) => a.to_json(),
            Value::Set(s) => json!(["set", s.iter().map(Atom::to_json).collect::<Vec<_>>()]),
            Value::Map(m) => json!([
                "map",
                m.iter()
                    .map(|(k, v)| json!([k.to_json(), v.to_json()]))
                    .collect::<Vec<_>>()
            ]),
        }
    }

    pub fn from_json(json: &Json) -> OvsdbResult<Self> {
        if let Json::Array(items) = json {
            match (items.first().and_then(Json::as_str), items.get(1)) {
                (Some("set"), Some(Json::Array(elements))) if items.len() == 2 => {
                    let atoms = elements
                        .iter()
                        .map(Atom::from_json)
                        .collect::<OvsdbResult<BTreeSet<_>>>()?;
                    return Ok(Value::Set(atoms));
                }
                (Some("map"), Some(Json::Array(pairs))) if items.len() == 2 => {
                    let mut map = BTreeMap::new();
                    for pair in pairs {
                        match pair.as_array().map(Vec::as_slice) {
                            Some([k, v]) => {
                                map.insert(Atom::from_json(k)?, Atom::from_json(v)?);
                            }
                            _ => return Err(malformed(format!("invalid map pair: {pair}"))),
                        }
                    }
                    return Ok(Value::Map(map));
                }
                _ => {}
            }
        }
        Atom::from_json(json).map(Value::Atom)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Atom(a) => write!(f, "{a}"),
            Value::Set(s) => {
                write!(f, "[")?;
                for (i, a) in s.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{a}")?;
                }
                write!(f, "]")
            }
            Value::Map(m) => {
                write!(f, "{{")?;
                for (i, (k, v)) in m.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{k}={v}")?;
                }
                write!(f, "}}")
            }
        }
    }
}

macro_rules! value_from_atom {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::Atom(Atom::from(v))
                }
            }
        )*
    };
}

value_from_atom!(i64, i32, f64, bool, &str, String, Uuid);

impl From<Atom> for Value {
    fn from(v: Atom) -> Self {
        Value::Atom(v)
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let json = Json::deserialize(deserializer)?;
        Value::from_json(&json).map_err(serde::de::Error::custom)
    }
}

impl Serialize for Atom {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Atom {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let json = Json::deserialize(deserializer)?;
        Atom::from_json(&json).map_err(serde::de::Error::custom)
    }
}

fn malformed(message: String) -> OvsdbError {
    OvsdbError::MalformedMessage { message }
}
