use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::deferred::{Deferred, DeferredHandle};
use crate::equal::deep_equals;
use crate::error::ErrorValue;

/// The closed universe of values the protocol can carry.
///
/// Containers are `Rc`-backed: the encoder dedups repeated references by
/// pointer identity, and the decoder reconstructs shared positions as clones
/// of one allocation so referential identity survives the round trip.
/// `Array`/`Object`/`Map`/`Set` additionally carry interior mutability
/// because the decoder splices late-arriving dependencies in place.
#[derive(Clone)]
pub enum Value {
    /// Absent-but-present slot, distinct from `Null`.
    Undefined,
    Null,
    Bool(bool),
    /// Carries `-0`, `NaN` and the infinities exactly.
    Number(f64),
    /// Arbitrary-precision integer as decimal text (optional leading `-`).
    BigInt(Rc<str>),
    String(Rc<str>),
    /// Milliseconds since the Unix epoch.
    Date(f64),
    Array(Rc<RefCell<Vec<Value>>>),
    /// Insertion-ordered string-keyed entries.
    Object(Rc<RefCell<Vec<(String, Value)>>>),
    /// Insertion-ordered entries with arbitrary keys.
    Map(Rc<RefCell<Vec<(Value, Value)>>>),
    Set(Rc<RefCell<Vec<Value>>>),
    /// A shared underlying byte buffer.
    Buffer(Rc<Vec<u8>>),
    /// A typed view over a shared buffer.
    View(Rc<ViewValue>),
    /// Ordered multi-part key/entry collection.
    FormData(Rc<Vec<(String, FormEntry)>>),
    /// A named binary part with a content type.
    Blob(Rc<BlobValue>),
    /// An asynchronous value; settles through the shared [`Deferred`].
    Promise(Deferred),
    /// A two-phase synchronous read source (see [`LazySource`]).
    Lazy(Rc<dyn LazySource>),
    /// A drain-once sequence source, exhausted at encode time.
    Iterator(IteratorValue),
    Error(Rc<ErrorValue>),
    /// A live object with no wire representation of its own; round-trips
    /// only via module maps or temporary-reference handles.
    Opaque(OpaqueRef),
}

/// Element kind of a typed view over a byte buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewKind {
    Int8,
    Uint8,
    Uint8Clamped,
    Int16,
    Uint16,
    Int32,
    Uint32,
    Float32,
    Float64,
    BigInt64,
    BigUint64,
    DataView,
}

impl ViewKind {
    /// Wire name of this view kind.
    pub fn as_str(self) -> &'static str {
        match self {
            ViewKind::Int8 => "i8",
            ViewKind::Uint8 => "u8",
            ViewKind::Uint8Clamped => "u8c",
            ViewKind::Int16 => "i16",
            ViewKind::Uint16 => "u16",
            ViewKind::Int32 => "i32",
            ViewKind::Uint32 => "u32",
            ViewKind::Float32 => "f32",
            ViewKind::Float64 => "f64",
            ViewKind::BigInt64 => "i64",
            ViewKind::BigUint64 => "u64",
            ViewKind::DataView => "dataview",
        }
    }

    /// Parse a wire name.
    pub fn from_str(name: &str) -> Option<Self> {
        Some(match name {
            "i8" => ViewKind::Int8,
            "u8" => ViewKind::Uint8,
            "u8c" => ViewKind::Uint8Clamped,
            "i16" => ViewKind::Int16,
            "u16" => ViewKind::Uint16,
            "i32" => ViewKind::Int32,
            "u32" => ViewKind::Uint32,
            "f32" => ViewKind::Float32,
            "f64" => ViewKind::Float64,
            "i64" => ViewKind::BigInt64,
            "u64" => ViewKind::BigUint64,
            "dataview" => ViewKind::DataView,
            _ => return None,
        })
    }

    /// Bytes per element. `DataView` addresses raw bytes.
    pub fn element_size(self) -> usize {
        match self {
            ViewKind::Int8 | ViewKind::Uint8 | ViewKind::Uint8Clamped | ViewKind::DataView => 1,
            ViewKind::Int16 | ViewKind::Uint16 => 2,
            ViewKind::Int32 | ViewKind::Uint32 | ViewKind::Float32 => 4,
            ViewKind::Float64 | ViewKind::BigInt64 | ViewKind::BigUint64 => 8,
        }
    }
}

/// A typed view over a shared byte buffer: kind, byte offset, element count.
///
/// Multiple views over the same buffer share one `Rc<Vec<u8>>`, so the
/// underlying bytes cross the wire once.
#[derive(Debug, Clone)]
pub struct ViewValue {
    pub kind: ViewKind,
    pub buffer: Rc<Vec<u8>>,
    pub byte_offset: usize,
    pub length: usize,
}

impl ViewValue {
    /// Create a view, validating that it fits inside the buffer.
    pub fn new(
        kind: ViewKind,
        buffer: Rc<Vec<u8>>,
        byte_offset: usize,
        length: usize,
    ) -> Option<Self> {
        let byte_len = length.checked_mul(kind.element_size())?;
        let end = byte_offset.checked_add(byte_len)?;
        if end > buffer.len() {
            return None;
        }
        Some(Self {
            kind,
            buffer,
            byte_offset,
            length,
        })
    }

    /// Total bytes covered by the view.
    pub fn byte_len(&self) -> usize {
        self.length * self.kind.element_size()
    }

    /// The viewed byte slice.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer[self.byte_offset..self.byte_offset + self.byte_len()]
    }
}

/// One entry value of a [`Value::FormData`] collection.
#[derive(Debug, Clone)]
pub enum FormEntry {
    Text(String),
    Blob(Rc<BlobValue>),
}

/// A named binary part with a content type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobValue {
    pub name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// Outcome of one synchronous read attempt on a [`LazySource`].
pub enum LazyPoll {
    /// The value is available now.
    Ready(Value),
    /// Not yet; the deferred signals when a retry may succeed.
    Pending(Deferred),
}

/// A value produced by an intercepting source that may not be readable yet.
///
/// The encoder attempts a synchronous read; on [`LazyPoll::Pending`] it
/// subscribes to the returned deferred and retries after it settles, up to a
/// configured retry bound.
pub trait LazySource {
    fn poll_value(&self) -> LazyPoll;
}

/// A drain-once ordered sequence source.
///
/// The underlying iterator may not be replayable, so the encoder exhausts it
/// exactly once; a second drain attempt observes `None`.
#[derive(Clone)]
pub struct IteratorValue {
    items: Rc<RefCell<Option<Box<dyn Iterator<Item = Value>>>>>,
}

impl IteratorValue {
    pub fn new(iter: impl Iterator<Item = Value> + 'static) -> Self {
        Self {
            items: Rc::new(RefCell::new(Some(Box::new(iter)))),
        }
    }

    /// Exhaust the source. Returns `None` if it was already drained.
    pub fn drain(&self) -> Option<Vec<Value>> {
        self.items.borrow_mut().take().map(|iter| iter.collect())
    }

    /// Stable identity of the source while it is alive.
    pub fn identity_key(&self) -> usize {
        Rc::as_ptr(&self.items) as usize
    }
}

/// A live object handle with no serializable structure.
#[derive(Clone)]
pub struct OpaqueRef {
    object: Rc<dyn Any>,
}

impl OpaqueRef {
    pub fn new(object: impl Any + 'static) -> Self {
        Self {
            object: Rc::new(object),
        }
    }

    /// Borrow the underlying object as a concrete type.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.object.downcast_ref::<T>()
    }

    /// True if `other` wraps the same live object.
    pub fn ptr_eq(&self, other: &OpaqueRef) -> bool {
        Rc::ptr_eq(&self.object, &other.object)
    }

    /// Stable identity of the live object while it is alive.
    pub fn identity_key(&self) -> usize {
        Rc::as_ptr(&self.object) as *const () as usize
    }
}

impl fmt::Debug for OpaqueRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OpaqueRef({:#x})", self.identity_key())
    }
}

impl Value {
    pub fn string(s: impl Into<String>) -> Self {
        Value::String(Rc::from(s.into()))
    }

    /// An arbitrary-precision integer from decimal text.
    pub fn bigint(digits: impl Into<String>) -> Self {
        Value::BigInt(Rc::from(digits.into()))
    }

    pub fn bigint_from_i128(n: i128) -> Self {
        Value::BigInt(Rc::from(n.to_string()))
    }

    pub fn array(items: Vec<Value>) -> Self {
        Value::Array(Rc::new(RefCell::new(items)))
    }

    pub fn object(entries: Vec<(String, Value)>) -> Self {
        Value::Object(Rc::new(RefCell::new(entries)))
    }

    pub fn map(entries: Vec<(Value, Value)>) -> Self {
        Value::Map(Rc::new(RefCell::new(entries)))
    }

    pub fn set(items: Vec<Value>) -> Self {
        Value::Set(Rc::new(RefCell::new(items)))
    }

    pub fn buffer(bytes: Vec<u8>) -> Self {
        Value::Buffer(Rc::new(bytes))
    }

    pub fn form_data(entries: Vec<(String, FormEntry)>) -> Self {
        Value::FormData(Rc::new(entries))
    }

    pub fn blob(
        name: impl Into<String>,
        content_type: impl Into<String>,
        bytes: Vec<u8>,
    ) -> Self {
        Value::Blob(Rc::new(BlobValue {
            name: name.into(),
            content_type: content_type.into(),
            bytes,
        }))
    }

    pub fn error(message: impl Into<String>) -> Self {
        Value::Error(Rc::new(ErrorValue::new(message)))
    }

    /// A pending promise value and the handle that settles it.
    pub fn promise() -> (Self, DeferredHandle) {
        let (deferred, handle) = Deferred::new();
        (Value::Promise(deferred), handle)
    }

    /// A promise value already resolved to `value`.
    pub fn resolved_promise(value: Value) -> Self {
        Value::Promise(Deferred::resolved(value))
    }

    pub fn iterator(iter: impl Iterator<Item = Value> + 'static) -> Self {
        Value::Iterator(IteratorValue::new(iter))
    }

    pub fn lazy(source: impl LazySource + 'static) -> Self {
        Value::Lazy(Rc::new(source))
    }

    pub fn opaque(object: impl Any + 'static) -> Self {
        Value::Opaque(OpaqueRef::new(object))
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Structural lookup in a [`Value::Map`], using deep equality on keys.
    pub fn map_lookup(&self, key: &Value) -> Option<Value> {
        match self {
            Value::Map(entries) => entries
                .borrow()
                .iter()
                .find(|(k, _)| deep_equals(k, key))
                .map(|(_, v)| v.clone()),
            _ => None,
        }
    }

    /// Pointer identity of the backing allocation, for dedup arenas and
    /// temporary-reference tables. Inline scalars have no identity.
    pub fn identity_key(&self) -> Option<usize> {
        Some(match self {
            Value::Array(rc) => Rc::as_ptr(rc) as usize,
            Value::Object(rc) => Rc::as_ptr(rc) as usize,
            Value::Map(rc) => Rc::as_ptr(rc) as usize,
            Value::Set(rc) => Rc::as_ptr(rc) as usize,
            Value::Buffer(rc) => Rc::as_ptr(rc) as usize,
            Value::View(rc) => Rc::as_ptr(rc) as usize,
            Value::FormData(rc) => Rc::as_ptr(rc) as usize,
            Value::Blob(rc) => Rc::as_ptr(rc) as usize,
            Value::Error(rc) => Rc::as_ptr(rc) as usize,
            Value::Promise(deferred) => deferred.identity_key(),
            Value::Lazy(rc) => Rc::as_ptr(rc) as *const () as usize,
            Value::Iterator(iter) => iter.identity_key(),
            Value::Opaque(opaque) => opaque.identity_key(),
            Value::Undefined
            | Value::Null
            | Value::Bool(_)
            | Value::Number(_)
            | Value::BigInt(_)
            | Value::String(_)
            | Value::Date(_) => return None,
        })
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => write!(f, "Undefined"),
            Value::Null => write!(f, "Null"),
            Value::Bool(b) => write!(f, "Bool({b})"),
            Value::Number(n) => write!(f, "Number({n})"),
            Value::BigInt(s) => write!(f, "BigInt({s})"),
            Value::String(s) => write!(f, "String({s:?})"),
            Value::Date(ms) => write!(f, "Date({ms})"),
            Value::Array(items) => f.debug_tuple("Array").field(&items.borrow()).finish(),
            Value::Object(entries) => f.debug_tuple("Object").field(&entries.borrow()).finish(),
            Value::Map(entries) => f.debug_tuple("Map").field(&entries.borrow()).finish(),
            Value::Set(items) => f.debug_tuple("Set").field(&items.borrow()).finish(),
            Value::Buffer(bytes) => write!(f, "Buffer({} bytes)", bytes.len()),
            Value::View(view) => f
                .debug_struct("View")
                .field("kind", &view.kind)
                .field("byte_offset", &view.byte_offset)
                .field("length", &view.length)
                .finish(),
            Value::FormData(entries) => f.debug_tuple("FormData").field(entries).finish(),
            Value::Blob(blob) => f
                .debug_struct("Blob")
                .field("name", &blob.name)
                .field("content_type", &blob.content_type)
                .field("bytes", &blob.bytes.len())
                .finish(),
            Value::Promise(deferred) => f.debug_tuple("Promise").field(deferred).finish(),
            Value::Lazy(_) => write!(f, "Lazy(..)"),
            Value::Iterator(_) => write!(f, "Iterator(..)"),
            Value::Error(err) => f.debug_tuple("Error").field(err).finish(),
            Value::Opaque(opaque) => write!(f, "{opaque:?}"),
        }
    }
}
