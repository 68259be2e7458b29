use std::fmt;
use std::sync::OnceLock;

use bytes::Bytes;

use crate::codec::{self, CodecError, DecodeLimits};

/// A node of the self-describing value tree exchanged with the client.
///
/// Every node owns its children; trees are built fresh for each response and
/// dropped once they have been marshaled.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum WireValue {
    #[default]
    None,
    Int(i32),
    Long(i64),
    Bool(bool),
    Str(String),
    List(Vec<WireValue>),
    /// Fixed-arity record. There is deliberately no way to grow a tuple after
    /// it has been built.
    Tuple(Vec<WireValue>),
    /// Ordered key/value pairs. Keys are not deduplicated at the type level.
    Dict(Vec<(WireValue, WireValue)>),
    SubStream(SubStream),
    Object {
        type_tag: String,
        payload: Box<WireValue>,
    },
}

impl WireValue {
    pub fn tuple<I>(items: I) -> Self
    where
        I: IntoIterator<Item = WireValue>,
    {
        WireValue::Tuple(items.into_iter().collect())
    }

    pub fn list<I>(items: I) -> Self
    where
        I: IntoIterator<Item = WireValue>,
    {
        WireValue::List(items.into_iter().collect())
    }

    pub fn empty_list() -> Self {
        WireValue::List(Vec::new())
    }

    pub fn dict<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<WireValue>,
        V: Into<WireValue>,
    {
        WireValue::Dict(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    pub fn object(type_tag: impl Into<String>, payload: WireValue) -> Self {
        WireValue::Object {
            type_tag: type_tag.into(),
            payload: Box::new(payload),
        }
    }

    /// Wrap `inner` in a sub-stream. The encoded form is produced eagerly so
    /// the node can be compared and marshaled without re-encoding.
    pub fn substream(inner: WireValue) -> Result<Self, CodecError> {
        Ok(WireValue::SubStream(SubStream::new(inner)?))
    }

    /// Variant name, as reported in decode errors and log lines.
    pub fn type_name(&self) -> &'static str {
        match self {
            WireValue::None => "None",
            WireValue::Int(_) => "Int",
            WireValue::Long(_) => "Long",
            WireValue::Bool(_) => "Bool",
            WireValue::Str(_) => "Str",
            WireValue::List(_) => "List",
            WireValue::Tuple(_) => "Tuple",
            WireValue::Dict(_) => "Dict",
            WireValue::SubStream(_) => "SubStream",
            WireValue::Object { .. } => "Object",
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, WireValue::None)
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            WireValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Integer value of either width.
    pub fn as_long(&self) -> Option<i64> {
        match self {
            WireValue::Int(v) => Some(i64::from(*v)),
            WireValue::Long(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            WireValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            WireValue::Str(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[WireValue]> {
        match self {
            WireValue::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_tuple(&self) -> Option<&[WireValue]> {
        match self {
            WireValue::Tuple(items) => Some(items),
            _ => None,
        }
    }

    /// First value stored under `key` in a dict.
    pub fn dict_get(&self, key: &WireValue) -> Option<&WireValue> {
        match self {
            WireValue::Dict(pairs) => pairs.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }

    /// Number of direct children for containers, `None` for scalars.
    pub fn len(&self) -> Option<usize> {
        match self {
            WireValue::List(items) | WireValue::Tuple(items) => Some(items.len()),
            WireValue::Dict(pairs) => Some(pairs.len()),
            _ => None,
        }
    }
}

impl From<()> for WireValue {
    fn from(_: ()) -> Self {
        WireValue::None
    }
}

impl From<i32> for WireValue {
    fn from(v: i32) -> Self {
        WireValue::Int(v)
    }
}

impl From<i64> for WireValue {
    fn from(v: i64) -> Self {
        WireValue::Long(v)
    }
}

impl From<bool> for WireValue {
    fn from(v: bool) -> Self {
        WireValue::Bool(v)
    }
}

impl From<&str> for WireValue {
    fn from(v: &str) -> Self {
        WireValue::Str(v.to_string())
    }
}

impl From<String> for WireValue {
    fn from(v: String) -> Self {
        WireValue::Str(v)
    }
}

impl From<Vec<WireValue>> for WireValue {
    fn from(items: Vec<WireValue>) -> Self {
        WireValue::List(items)
    }
}

impl fmt::Display for WireValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&crate::dump::render(self))
    }
}

/// An embedded, separately marshaled value.
///
/// Built from bytes the inner tree is only decoded on first access; the
/// decoded tree is then cached for the life of the node.
#[derive(Clone)]
pub struct SubStream {
    raw: Bytes,
    decoded: OnceLock<Box<WireValue>>,
}

impl SubStream {
    pub fn new(inner: WireValue) -> Result<Self, CodecError> {
        let raw = codec::encode(&inner)?;
        let decoded = OnceLock::new();
        let _ = decoded.set(Box::new(inner));
        Ok(Self { raw, decoded })
    }

    pub fn from_bytes(raw: impl Into<Bytes>) -> Self {
        Self {
            raw: raw.into(),
            decoded: OnceLock::new(),
        }
    }

    pub fn raw(&self) -> &Bytes {
        &self.raw
    }

    pub fn is_decoded(&self) -> bool {
        self.decoded.get().is_some()
    }

    /// Decode the inner value, caching it on success. A failed decode leaves
    /// the node undecoded so the error is reported again on the next access.
    pub fn value(&self) -> Result<&WireValue, CodecError> {
        self.value_with_limits(DecodeLimits::default())
    }

    /// Like [`SubStream::value`], parsing with the caller's limits. A tree
    /// that is already cached is returned as is.
    pub fn value_with_limits(&self, limits: DecodeLimits) -> Result<&WireValue, CodecError> {
        if let Some(value) = self.decoded.get() {
            return Ok(&**value);
        }
        let value = codec::decode_with_limits(&self.raw, limits)?;
        Ok(&**self.decoded.get_or_init(|| Box::new(value)))
    }
}

impl PartialEq for SubStream {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl fmt::Debug for SubStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubStream")
            .field("len", &self.raw.len())
            .field("decoded", &self.is_decoded())
            .finish()
    }
}
