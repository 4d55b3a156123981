//! Typed, named, ordered slot sets and the immutable records that conform to
//! them.
//!
//! A [`TupleSchema`] declares what a conforming [`Tuple`] may hold: an ordered
//! collection of named [`TupleSlot`]s, each with a declared [`ValueType`].
//! Construction validates every supplied value against its slot and reports
//! *all* mismatches, not just the first. Serialization is encoder-injected:
//! a `Tuple` converts to and from a string-keyed map of encoded values
//! without the core depending on any one wire format.

use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    hash::{Hash, Hasher},
    marker::PhantomData,
    sync::Arc,
};

use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

/// Error raised when constructing or reading tuples.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TupleError {
    /// Two slots in a schema share a name.
    #[error("slot names are not unique in schema `{0}`")]
    DuplicateSlotNames(String),
    /// The number of supplied values does not match the slot count.
    #[error("schema `{schema}` expected {expected} values, but received {actual}")]
    Arity {
        schema: String,
        expected: usize,
        actual: usize,
    },
    /// One or more values do not conform to their slots' declared types.
    /// Every offending slot is listed.
    #[error("values do not conform to schema `{schema}`: {}", mismatches.join("; "))]
    TypeMismatches {
        schema: String,
        mismatches: Vec<String>,
    },
    /// The key set of a named-value map does not match the schema's slots.
    #[error("schema `{schema}` expected keys [{}], but received [{}]", expected.join(", "), actual.join(", "))]
    KeyMismatch {
        schema: String,
        expected: Vec<String>,
        actual: Vec<String>,
    },
    /// No slot with the requested name exists in the schema.
    #[error("schema `{schema}` does not have a slot named `{name}`")]
    NoSuchSlot { schema: String, name: String },
    /// A [`TupleKey`] was used against a tuple of a different schema.
    #[error("key `{name}` of schema `{key_schema}` does not belong to schema `{schema}`")]
    ForeignKey {
        schema: String,
        key_schema: String,
        name: String,
    },
    /// A typed key requested a value kind the slot does not hold.
    #[error("slot `{name}` of schema `{schema}` does not hold a {requested}")]
    KeyTypeMismatch {
        schema: String,
        name: String,
        requested: &'static str,
    },
    /// A different schema is already registered under the same name.
    #[error("a different schema named `{0}` is already registered")]
    ConflictingSchema(String),
}

/// Error raised when deserialising a tuple from encoded values.
#[derive(Debug, Error)]
pub enum DeserialiseError<E>
where
    E: std::error::Error + 'static,
{
    /// The injected decode function failed for a slot.
    #[error("failed to decode slot `{slot}`: {source}")]
    Decode {
        slot: String,
        #[source]
        source: E,
    },
    /// The decoded values do not conform to the schema.
    #[error(transparent)]
    Invalid(#[from] TupleError),
}

/// The declared type of a [`TupleSlot`].
///
/// Container types are parameterized; map keys are always strings, matching
/// the string-keyed wire form.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ValueType {
    Bool,
    Int,
    Double,
    String,
    Uuid,
    Timestamp,
    /// An optional value of the given type.
    Optional(Box<ValueType>),
    /// A homogeneous list of the given element type.
    List(Box<ValueType>),
    /// A string-keyed map of the given value type.
    Map(Box<ValueType>),
    /// A nested tuple conforming to the given schema.
    Tuple(TupleSchema),
}

impl ValueType {
    /// Convenience constructor for `Optional` types.
    #[must_use]
    pub fn optional(inner: Self) -> Self {
        Self::Optional(Box::new(inner))
    }

    /// Convenience constructor for `List` types.
    #[must_use]
    pub fn list(element: Self) -> Self {
        Self::List(Box::new(element))
    }

    /// Convenience constructor for `Map` types.
    #[must_use]
    pub fn map(value: Self) -> Self {
        Self::Map(Box::new(value))
    }

    /// Test whether a runtime [`Value`] conforms to this declared type.
    #[must_use]
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (Self::Bool, Value::Bool(_))
            | (Self::Int, Value::Int(_))
            | (Self::Double, Value::Double(_))
            | (Self::String, Value::String(_))
            | (Self::Uuid, Value::Uuid(_))
            | (Self::Timestamp, Value::Timestamp(_)) => true,
            (Self::Optional(inner), Value::Optional(opt)) => {
                opt.as_deref().is_none_or(|v| inner.accepts(v))
            }
            (Self::List(element), Value::List(values)) => {
                values.iter().all(|v| element.accepts(v))
            }
            (Self::Map(value_type), Value::Map(entries)) => {
                entries.values().all(|v| value_type.accepts(v))
            }
            (Self::Tuple(schema), Value::Tuple(tuple)) => tuple.schema() == schema,
            _ => false,
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool => write!(f, "bool"),
            Self::Int => write!(f, "int"),
            Self::Double => write!(f, "double"),
            Self::String => write!(f, "string"),
            Self::Uuid => write!(f, "uuid"),
            Self::Timestamp => write!(f, "timestamp"),
            Self::Optional(inner) => write!(f, "optional<{inner}>"),
            Self::List(element) => write!(f, "list<{element}>"),
            Self::Map(value) => write!(f, "map<string, {value}>"),
            Self::Tuple(schema) => write!(f, "tuple<{}>", schema.name()),
        }
    }
}

/// A runtime value held in a tuple slot.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Double(f64),
    String(String),
    Uuid(Uuid),
    Timestamp(DateTime<Utc>),
    Optional(Option<Box<Value>>),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
    Tuple(Tuple),
}

impl Value {
    /// Wrap an optional value.
    #[must_use]
    pub fn some(value: Self) -> Self {
        Self::Optional(Some(Box::new(value)))
    }

    /// The absent optional value.
    #[must_use]
    pub const fn none() -> Self {
        Self::Optional(None)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Double(v) => write!(f, "{v}"),
            Self::String(v) => write!(f, "\"{v}\""),
            Self::Uuid(v) => write!(f, "{v}"),
            Self::Timestamp(v) => write!(f, "{}", v.to_rfc3339()),
            Self::Optional(None) => write!(f, "empty"),
            Self::Optional(Some(v)) => write!(f, "{v}"),
            Self::List(values) => {
                write!(f, "[")?;
                for (i, v) in values.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{v}")?;
                }
                write!(f, "]")
            }
            Self::Map(entries) => {
                write!(f, "{{")?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                write!(f, "}}")
            }
            Self::Tuple(tuple) => write!(f, "{tuple}"),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Double(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<Uuid> for Value {
    fn from(v: Uuid) -> Self {
        Self::Uuid(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Self::Timestamp(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Self::List(v)
    }
}

impl From<Tuple> for Value {
    fn from(v: Tuple) -> Self {
        Self::Tuple(v)
    }
}

/// A value kind that a [`TupleKey`] can extract from a tuple slot.
pub trait SlotValue: Sized {
    /// Human-readable description used in key-mismatch errors.
    const DESCRIPTION: &'static str;

    /// Whether a slot of the given declared type can yield this kind.
    fn matches(value_type: &ValueType) -> bool;

    /// Extract a reference to this kind from a runtime value.
    fn from_value(value: &Value) -> Option<&Self>;
}

impl SlotValue for bool {
    const DESCRIPTION: &'static str = "bool";

    fn matches(value_type: &ValueType) -> bool {
        *value_type == ValueType::Bool
    }

    fn from_value(value: &Value) -> Option<&Self> {
        match value {
            Value::Bool(v) => Some(v),
            _ => None,
        }
    }
}

impl SlotValue for i64 {
    const DESCRIPTION: &'static str = "int";

    fn matches(value_type: &ValueType) -> bool {
        *value_type == ValueType::Int
    }

    fn from_value(value: &Value) -> Option<&Self> {
        match value {
            Value::Int(v) => Some(v),
            _ => None,
        }
    }
}

impl SlotValue for f64 {
    const DESCRIPTION: &'static str = "double";

    fn matches(value_type: &ValueType) -> bool {
        *value_type == ValueType::Double
    }

    fn from_value(value: &Value) -> Option<&Self> {
        match value {
            Value::Double(v) => Some(v),
            _ => None,
        }
    }
}

impl SlotValue for String {
    const DESCRIPTION: &'static str = "string";

    fn matches(value_type: &ValueType) -> bool {
        *value_type == ValueType::String
    }

    fn from_value(value: &Value) -> Option<&Self> {
        match value {
            Value::String(v) => Some(v),
            _ => None,
        }
    }
}

impl SlotValue for Uuid {
    const DESCRIPTION: &'static str = "uuid";

    fn matches(value_type: &ValueType) -> bool {
        *value_type == ValueType::Uuid
    }

    fn from_value(value: &Value) -> Option<&Self> {
        match value {
            Value::Uuid(v) => Some(v),
            _ => None,
        }
    }
}

impl SlotValue for DateTime<Utc> {
    const DESCRIPTION: &'static str = "timestamp";

    fn matches(value_type: &ValueType) -> bool {
        *value_type == ValueType::Timestamp
    }

    fn from_value(value: &Value) -> Option<&Self> {
        match value {
            Value::Timestamp(v) => Some(v),
            _ => None,
        }
    }
}

impl SlotValue for Vec<Value> {
    const DESCRIPTION: &'static str = "list";

    fn matches(value_type: &ValueType) -> bool {
        matches!(value_type, ValueType::List(_))
    }

    fn from_value(value: &Value) -> Option<&Self> {
        match value {
            Value::List(v) => Some(v),
            _ => None,
        }
    }
}

impl SlotValue for Tuple {
    const DESCRIPTION: &'static str = "tuple";

    fn matches(value_type: &ValueType) -> bool {
        matches!(value_type, ValueType::Tuple(_))
    }

    fn from_value(value: &Value) -> Option<&Self> {
        match value {
            Value::Tuple(v) => Some(v),
            _ => None,
        }
    }
}

/// Catch-all: any slot can be read as a raw [`Value`].
impl SlotValue for Value {
    const DESCRIPTION: &'static str = "value";

    fn matches(_value_type: &ValueType) -> bool {
        true
    }

    fn from_value(value: &Value) -> Option<&Self> {
        Some(value)
    }
}

/// A slot in a [`TupleSchema`]: a name paired with a declared type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TupleSlot {
    name: String,
    value_type: ValueType,
}

impl TupleSlot {
    pub fn new(name: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            name: name.into(),
            value_type,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn value_type(&self) -> &ValueType {
        &self.value_type
    }
}

impl fmt::Display for TupleSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.value_type)
    }
}

#[derive(Debug)]
struct SchemaInner {
    name: String,
    slots: Vec<TupleSlot>,
    lookup: HashMap<String, usize>,
}

/// An ordered collection of [`TupleSlot`]s defining what may be stored in a
/// conforming [`Tuple`].
///
/// Schemas are immutable once constructed and cheap to clone (the slot data
/// is shared). Equality is structural: two schemas are equal when their names
/// and slot sequences are equal.
#[derive(Debug, Clone)]
pub struct TupleSchema {
    inner: Arc<SchemaInner>,
}

impl TupleSchema {
    /// Create a schema with the supplied name and slots.
    ///
    /// # Errors
    ///
    /// Returns [`TupleError::DuplicateSlotNames`] if two slots share a name.
    pub fn new(name: impl Into<String>, slots: Vec<TupleSlot>) -> Result<Self, TupleError> {
        let name = name.into();
        let lookup: HashMap<String, usize> = slots
            .iter()
            .enumerate()
            .map(|(i, slot)| (slot.name.clone(), i))
            .collect();
        if lookup.len() != slots.len() {
            return Err(TupleError::DuplicateSlotNames(name));
        }
        Ok(Self {
            inner: Arc::new(SchemaInner {
                name,
                slots,
                lookup,
            }),
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    #[must_use]
    pub fn slots(&self) -> &[TupleSlot] {
        &self.inner.slots
    }

    /// Make a tuple of the supplied values, first validating that they
    /// conform to this schema.
    ///
    /// # Errors
    ///
    /// Returns [`TupleError::Arity`] on a count mismatch, or
    /// [`TupleError::TypeMismatches`] naming every slot whose value does not
    /// conform.
    pub fn make(&self, values: Vec<Value>) -> Result<Tuple, TupleError> {
        if values.len() != self.inner.slots.len() {
            return Err(TupleError::Arity {
                schema: self.inner.name.clone(),
                expected: self.inner.slots.len(),
                actual: values.len(),
            });
        }

        let mismatches: Vec<String> = self
            .inner
            .slots
            .iter()
            .zip(&values)
            .filter(|(slot, value)| !slot.value_type.accepts(value))
            .map(|(slot, value)| format!("slot ({slot}) does not accept value <{value}>"))
            .collect();
        if !mismatches.is_empty() {
            return Err(TupleError::TypeMismatches {
                schema: self.inner.name.clone(),
                mismatches,
            });
        }

        Ok(Tuple {
            schema: self.clone(),
            values: values.into(),
        })
    }

    /// Make a tuple from a map of name/value pairs.
    ///
    /// The key set must match the schema's slot names exactly.
    ///
    /// # Errors
    ///
    /// Returns [`TupleError::KeyMismatch`] when keys are missing or
    /// unexpected, or a validation error from [`Self::make`].
    pub fn make_named(&self, mut values: HashMap<String, Value>) -> Result<Tuple, TupleError> {
        self.check_matching_keys(values.keys().map(String::as_str))?;
        let ordered = self
            .inner
            .slots
            .iter()
            .filter_map(|slot| values.remove(&slot.name))
            .collect();
        self.make(ordered)
    }

    /// Create a tuple using the supplied decode function, out of a map of
    /// encoded values.
    ///
    /// Each slot's declared [`ValueType`] is threaded into `decode`, so
    /// nested tuples and collections can deserialise recursively.
    ///
    /// # Errors
    ///
    /// Returns a [`DeserialiseError`] when a key is missing, a slot fails to
    /// decode, or the decoded values do not conform to the schema.
    pub fn deserialise<V, E>(
        &self,
        mut decode: impl FnMut(&V, &ValueType) -> Result<Value, E>,
        values: &BTreeMap<String, V>,
    ) -> Result<Tuple, DeserialiseError<E>>
    where
        E: std::error::Error + 'static,
    {
        self.check_matching_keys(values.keys().map(String::as_str))?;
        let mut decoded = Vec::with_capacity(self.inner.slots.len());
        for slot in &self.inner.slots {
            let Some(encoded) = values.get(&slot.name) else {
                continue;
            };
            let value =
                decode(encoded, &slot.value_type).map_err(|source| DeserialiseError::Decode {
                    slot: slot.name.clone(),
                    source,
                })?;
            decoded.push(value);
        }
        Ok(self.make(decoded)?)
    }

    /// Get a key which can be used to retrieve a value from a conforming
    /// tuple in a type-safe way, without a name lookup per access.
    ///
    /// # Errors
    ///
    /// Returns [`TupleError::NoSuchSlot`] if the schema has no slot with the
    /// given name, or [`TupleError::KeyTypeMismatch`] if the slot's declared
    /// type cannot yield a `T`.
    pub fn key<T: SlotValue>(&self, name: &str) -> Result<TupleKey<T>, TupleError> {
        let index = self.slot_index(name)?;
        if !T::matches(&self.inner.slots[index].value_type) {
            return Err(TupleError::KeyTypeMismatch {
                schema: self.inner.name.clone(),
                name: name.to_string(),
                requested: T::DESCRIPTION,
            });
        }
        Ok(TupleKey {
            schema: self.clone(),
            name: name.to_string(),
            index,
            _value: PhantomData,
        })
    }

    fn slot_index(&self, name: &str) -> Result<usize, TupleError> {
        self.inner
            .lookup
            .get(name)
            .copied()
            .ok_or_else(|| TupleError::NoSuchSlot {
                schema: self.inner.name.clone(),
                name: name.to_string(),
            })
    }

    fn check_matching_keys<'a>(
        &self,
        keys: impl Iterator<Item = &'a str>,
    ) -> Result<(), TupleError> {
        let mut actual: Vec<String> = keys.map(str::to_string).collect();
        actual.sort_unstable();
        let mut expected: Vec<String> =
            self.inner.slots.iter().map(|s| s.name.clone()).collect();
        expected.sort_unstable();
        if actual == expected {
            Ok(())
        } else {
            Err(TupleError::KeyMismatch {
                schema: self.inner.name.clone(),
                expected,
                actual,
            })
        }
    }
}

impl PartialEq for TupleSchema {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
            || (self.inner.name == other.inner.name && self.inner.slots == other.inner.slots)
    }
}

impl Eq for TupleSchema {}

impl Hash for TupleSchema {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.name.hash(state);
        self.inner.slots.hash(state);
    }
}

impl fmt::Display for TupleSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{{", self.inner.name)?;
        for (i, slot) in self.inner.slots.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{slot}")?;
        }
        write!(f, "}}")
    }
}

/// A key that retrieves a value directly from a conforming tuple, in a
/// type-safe way.
///
/// Keys are bound to the schema they were obtained from: using a key against
/// a tuple of a different schema fails, even if that schema has a same-named,
/// same-typed slot.
pub struct TupleKey<T> {
    schema: TupleSchema,
    name: String,
    index: usize,
    _value: PhantomData<fn() -> T>,
}

impl<T> TupleKey<T> {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<T> Clone for TupleKey<T> {
    fn clone(&self) -> Self {
        Self {
            schema: self.schema.clone(),
            name: self.name.clone(),
            index: self.index,
            _value: PhantomData,
        }
    }
}

impl<T> fmt::Debug for TupleKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TupleKey<{}>", self.name)
    }
}

/// An immutable record conforming to exactly one [`TupleSchema`].
///
/// Tuples are cheap to clone; the value storage is shared.
#[derive(Debug, Clone, PartialEq)]
pub struct Tuple {
    schema: TupleSchema,
    values: Arc<[Value]>,
}

impl Tuple {
    #[must_use]
    pub const fn schema(&self) -> &TupleSchema {
        &self.schema
    }

    /// Look up a value by slot name.
    ///
    /// # Errors
    ///
    /// Returns [`TupleError::NoSuchSlot`] if the schema has no slot with the
    /// given name.
    pub fn get_named(&self, name: &str) -> Result<&Value, TupleError> {
        let index = self.schema.slot_index(name)?;
        Ok(&self.values[index])
    }

    /// Look up a value by [`TupleKey`].
    ///
    /// # Errors
    ///
    /// Returns [`TupleError::ForeignKey`] if the key was obtained from a
    /// different schema, or [`TupleError::KeyTypeMismatch`] if the held value
    /// is not of the requested kind.
    pub fn get<T: SlotValue>(&self, key: &TupleKey<T>) -> Result<&T, TupleError> {
        if key.schema != self.schema {
            return Err(TupleError::ForeignKey {
                schema: self.schema.name().to_string(),
                key_schema: key.schema.name().to_string(),
                name: key.name.clone(),
            });
        }
        T::from_value(&self.values[key.index]).ok_or_else(|| TupleError::KeyTypeMismatch {
            schema: self.schema.name().to_string(),
            name: key.name.clone(),
            requested: T::DESCRIPTION,
        })
    }

    /// Serialise this tuple to a map from slot name to encoded value, using
    /// the injected encode function.
    ///
    /// The schema name travels out of band; see [`TupleSchemaRegistry`].
    pub fn serialise<V>(&self, mut encode: impl FnMut(&Value) -> V) -> BTreeMap<String, V> {
        self.schema
            .slots()
            .iter()
            .zip(self.values.iter())
            .map(|(slot, value)| (slot.name.clone(), encode(value)))
            .collect()
    }
}

impl fmt::Display for Tuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{{", self.schema.name())?;
        for (i, (slot, value)) in self.schema.slots().iter().zip(self.values.iter()).enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}={}", slot.name(), value)?;
        }
        write!(f, "}}")
    }
}

/// A registry resolving out-of-band schema-name tags to [`TupleSchema`]s.
///
/// The serialization boundary transmits a tuple as a flat name-to-value map
/// plus a schema-name tag; the embedding application registers its schemas
/// here so deserialisers can resolve the tag.
#[derive(Debug, Default)]
pub struct TupleSchemaRegistry {
    schemas: HashMap<String, TupleSchema>,
}

impl TupleSchemaRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a schema under its own name. Registering the same schema
    /// twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`TupleError::ConflictingSchema`] if a structurally different
    /// schema is already registered under the name.
    pub fn register(&mut self, schema: TupleSchema) -> Result<(), TupleError> {
        match self.schemas.get(schema.name()) {
            Some(existing) if *existing == schema => Ok(()),
            Some(_) => Err(TupleError::ConflictingSchema(schema.name().to_string())),
            None => {
                self.schemas.insert(schema.name().to_string(), schema);
                Ok(())
            }
        }
    }

    #[must_use]
    pub fn resolve(&self, name: &str) -> Option<&TupleSchema> {
        self.schemas.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn person_schema() -> TupleSchema {
        TupleSchema::new(
            "person",
            vec![
                TupleSlot::new("name", ValueType::String),
                TupleSlot::new("age", ValueType::Int),
            ],
        )
        .unwrap()
    }

    #[test]
    fn schema_rejects_duplicate_slot_names() {
        let result = TupleSchema::new(
            "dup",
            vec![
                TupleSlot::new("a", ValueType::Int),
                TupleSlot::new("a", ValueType::String),
            ],
        );
        assert!(matches!(result, Err(TupleError::DuplicateSlotNames(_))));
    }

    #[test]
    fn make_validates_arity() {
        let schema = person_schema();
        let result = schema.make(vec![Value::from("Arthur")]);
        assert!(matches!(
            result,
            Err(TupleError::Arity {
                expected: 2,
                actual: 1,
                ..
            })
        ));
    }

    #[test]
    fn make_reports_every_mismatched_slot() {
        let schema = person_schema();
        let result = schema.make(vec![Value::from(41i64), Value::from("Arthur")]);
        let Err(TupleError::TypeMismatches { mismatches, .. }) = result else {
            panic!("expected type mismatches");
        };
        assert_eq!(mismatches.len(), 2);
        let message = mismatches.join("; ");
        assert!(message.contains("name"));
        assert!(message.contains("age"));
    }

    #[test]
    fn make_named_requires_exact_key_set() {
        let schema = person_schema();
        let mut values = HashMap::new();
        values.insert("name".to_string(), Value::from("Arthur"));
        values.insert("size".to_string(), Value::from(41i64));
        assert!(matches!(
            schema.make_named(values),
            Err(TupleError::KeyMismatch { .. })
        ));
    }

    #[test]
    fn make_named_orders_values_by_slot() {
        let schema = person_schema();
        let mut values = HashMap::new();
        values.insert("age".to_string(), Value::from(41i64));
        values.insert("name".to_string(), Value::from("Arthur"));
        let tuple = schema.make_named(values).unwrap();
        assert_eq!(tuple.get_named("name").unwrap(), &Value::from("Arthur"));
        assert_eq!(tuple.get_named("age").unwrap(), &Value::from(41i64));
    }

    #[test]
    fn typed_key_retrieves_value() {
        let schema = person_schema();
        let name_key = schema.key::<String>("name").unwrap();
        let tuple = schema
            .make(vec![Value::from("Arthur"), Value::from(41i64)])
            .unwrap();
        assert_eq!(tuple.get(&name_key).unwrap(), "Arthur");
    }

    #[test]
    fn key_creation_checks_declared_type() {
        let schema = person_schema();
        assert!(matches!(
            schema.key::<String>("age"),
            Err(TupleError::KeyTypeMismatch { .. })
        ));
        assert!(matches!(
            schema.key::<String>("shoe_size"),
            Err(TupleError::NoSuchSlot { .. })
        ));
    }

    #[test]
    fn key_from_another_schema_is_rejected() {
        let schema_a = person_schema();
        // Same slots, different schema name: still a foreign key.
        let schema_b = TupleSchema::new(
            "customer",
            vec![
                TupleSlot::new("name", ValueType::String),
                TupleSlot::new("age", ValueType::Int),
            ],
        )
        .unwrap();
        let key = schema_a.key::<String>("name").unwrap();
        let tuple = schema_b
            .make(vec![Value::from("Arthur"), Value::from(41i64)])
            .unwrap();
        assert!(matches!(
            tuple.get(&key),
            Err(TupleError::ForeignKey { .. })
        ));
    }

    #[test]
    fn equal_schemas_share_keys() {
        let schema_a = person_schema();
        let schema_b = person_schema();
        let key = schema_a.key::<i64>("age").unwrap();
        let tuple = schema_b
            .make(vec![Value::from("Arthur"), Value::from(41i64)])
            .unwrap();
        assert_eq!(tuple.get(&key).unwrap(), &41);
    }

    #[test]
    fn optional_slots_accept_presence_and_absence() {
        let schema = TupleSchema::new(
            "opt",
            vec![TupleSlot::new(
                "nickname",
                ValueType::optional(ValueType::String),
            )],
        )
        .unwrap();
        assert!(schema.make(vec![Value::none()]).is_ok());
        assert!(schema.make(vec![Value::some(Value::from("Arty"))]).is_ok());
        assert!(schema.make(vec![Value::some(Value::from(1i64))]).is_err());
    }

    #[test]
    fn list_slots_check_element_types() {
        let schema = TupleSchema::new(
            "lists",
            vec![TupleSlot::new("tags", ValueType::list(ValueType::String))],
        )
        .unwrap();
        assert!(
            schema
                .make(vec![Value::from(vec![Value::from("a"), Value::from("b")])])
                .is_ok()
        );
        assert!(
            schema
                .make(vec![Value::from(vec![Value::from("a"), Value::from(1i64)])])
                .is_err()
        );
    }

    fn encode_json(value: &Value) -> serde_json::Value {
        match value {
            Value::Bool(v) => serde_json::Value::from(*v),
            Value::Int(v) => serde_json::Value::from(*v),
            Value::Double(v) => serde_json::Value::from(*v),
            Value::String(v) => serde_json::Value::from(v.clone()),
            Value::Uuid(v) => serde_json::Value::from(v.to_string()),
            Value::Timestamp(v) => serde_json::Value::from(v.to_rfc3339()),
            Value::Optional(None) => serde_json::Value::Null,
            Value::Optional(Some(v)) => encode_json(v),
            Value::List(values) => {
                serde_json::Value::Array(values.iter().map(encode_json).collect())
            }
            Value::Map(entries) => serde_json::Value::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), encode_json(v)))
                    .collect(),
            ),
            Value::Tuple(tuple) => {
                serde_json::Value::Object(tuple.serialise(encode_json).into_iter().collect())
            }
        }
    }

    #[derive(Debug, thiserror::Error)]
    #[error("cannot decode {0} as {1}")]
    struct JsonDecodeError(serde_json::Value, String);

    fn decode_json(
        encoded: &serde_json::Value,
        value_type: &ValueType,
    ) -> Result<Value, JsonDecodeError> {
        let fail = || JsonDecodeError(encoded.clone(), value_type.to_string());
        match value_type {
            ValueType::Bool => encoded.as_bool().map(Value::Bool).ok_or_else(fail),
            ValueType::Int => encoded.as_i64().map(Value::Int).ok_or_else(fail),
            ValueType::Double => encoded.as_f64().map(Value::Double).ok_or_else(fail),
            ValueType::String => encoded
                .as_str()
                .map(|s| Value::String(s.to_string()))
                .ok_or_else(fail),
            ValueType::Uuid => encoded
                .as_str()
                .and_then(|s| s.parse().ok())
                .map(Value::Uuid)
                .ok_or_else(fail),
            ValueType::Timestamp => encoded
                .as_str()
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|t| Value::Timestamp(t.with_timezone(&Utc)))
                .ok_or_else(fail),
            ValueType::Optional(inner) => {
                if encoded.is_null() {
                    Ok(Value::none())
                } else {
                    decode_json(encoded, inner).map(Value::some)
                }
            }
            ValueType::List(element) => encoded
                .as_array()
                .ok_or_else(fail)?
                .iter()
                .map(|v| decode_json(v, element))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::List),
            ValueType::Map(value_ty) => encoded
                .as_object()
                .ok_or_else(fail)?
                .iter()
                .map(|(k, v)| Ok((k.clone(), decode_json(v, value_ty)?)))
                .collect::<Result<BTreeMap<_, _>, _>>()
                .map(Value::Map),
            ValueType::Tuple(schema) => {
                let object = encoded.as_object().ok_or_else(fail)?;
                let values: BTreeMap<String, serde_json::Value> =
                    object.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
                schema
                    .deserialise(decode_json, &values)
                    .map(Value::Tuple)
                    .map_err(|_| fail())
            }
        }
    }

    #[test]
    fn serialised_tuple_round_trips() {
        let schema = person_schema();
        let tuple = schema
            .make(vec![Value::from("Arthur"), Value::from(41i64)])
            .unwrap();

        let encoded = tuple.serialise(encode_json);
        let decoded = schema.deserialise(decode_json, &encoded).unwrap();

        assert_eq!(decoded, tuple);
    }

    #[test]
    fn nested_tuples_deserialise_recursively() {
        let inner = person_schema();
        let outer = TupleSchema::new(
            "registration",
            vec![
                TupleSlot::new("person", ValueType::Tuple(inner.clone())),
                TupleSlot::new("confirmed", ValueType::Bool),
            ],
        )
        .unwrap();

        let tuple = outer
            .make(vec![
                Value::Tuple(
                    inner
                        .make(vec![Value::from("Arthur"), Value::from(41i64)])
                        .unwrap(),
                ),
                Value::from(true),
            ])
            .unwrap();

        let encoded = tuple.serialise(encode_json);
        let decoded = outer.deserialise(decode_json, &encoded).unwrap();
        assert_eq!(decoded, tuple);
    }

    #[test]
    fn deserialise_rejects_mismatched_keys() {
        let schema = person_schema();
        let mut values = BTreeMap::new();
        values.insert("name".to_string(), serde_json::Value::from("Arthur"));
        let result = schema.deserialise(decode_json, &values);
        assert!(matches!(
            result,
            Err(DeserialiseError::Invalid(TupleError::KeyMismatch { .. }))
        ));
    }

    #[test]
    fn registry_resolves_and_rejects_conflicts() {
        let mut registry = TupleSchemaRegistry::new();
        registry.register(person_schema()).unwrap();
        registry.register(person_schema()).unwrap();
        assert!(registry.resolve("person").is_some());

        let conflicting =
            TupleSchema::new("person", vec![TupleSlot::new("name", ValueType::String)]).unwrap();
        assert!(matches!(
            registry.register(conflicting),
            Err(TupleError::ConflictingSchema(_))
        ));
    }
}
