use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::rc::{Rc, Weak};

use flightwire_row::{Row, RowTag};
use flightwire_value::{
    BlobValue, Deferred, ErrorValue, FormEntry, LazyPoll, LazySource, SettleResult,
    TemporaryReferences, Value,
};
use serde_json::Value as Json;
use tracing::{debug, trace, warn};

use crate::cancel::CancelSignal;
use crate::classify::{classify, WireClass};
use crate::error::{EncodeError, Result};
use crate::fragment::{escape_string, format_millis};
use crate::module_map::ModuleMap;
use crate::path::{render, PathSegment};

/// Retry bound for lazy sources that keep yielding new pending
/// dependencies on every read attempt.
pub const DEFAULT_MAX_LAZY_RETRIES: usize = 16;

/// How much detail error values carry onto the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorDetail {
    /// Message, stack and digest as provided.
    #[default]
    Full,
    /// Generic message plus digest only.
    Redacted,
}

/// Options for one encode session.
pub struct EncodeOptions {
    /// Maps live module-bound values to wire module references.
    pub module_map: Option<Rc<dyn ModuleMap>>,
    /// Session-scoped handle table for non-serializable live values.
    pub temporary_references: Option<TemporaryReferences>,
    /// Optional cancellation, checked at row-emission boundaries.
    pub signal: Option<CancelSignal>,
    /// Redaction policy for error values and rejections.
    pub error_detail: ErrorDetail,
    /// Retry bound for lazy sources.
    pub max_lazy_retries: usize,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        Self {
            module_map: None,
            temporary_references: None,
            signal: None,
            error_detail: ErrorDetail::Full,
            max_lazy_retries: DEFAULT_MAX_LAZY_RETRIES,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Open,
    Closed,
    Aborted,
}

struct SessionInner {
    options: EncodeOptions,
    self_weak: Weak<RefCell<SessionInner>>,
    rows: VecDeque<Row>,
    next_id: u32,
    /// Identity arena: first-visit id plus a keep-alive clone so the
    /// identity key cannot be reused by a new allocation mid-session.
    visited: HashMap<usize, (u32, Value)>,
    in_progress: HashSet<usize>,
    pending: usize,
    state: SessionState,
}

/// An in-progress encode session: the row stream handle.
///
/// `begin` runs the synchronous traversal to completion; rows accumulate in
/// the session and are drained with [`take_rows`](Self::take_rows). Pending
/// asynchronous subvalues keep the session alive logically: their follow-up
/// rows appear in later drains once they settle.
pub struct EncodeSession {
    inner: Rc<RefCell<SessionInner>>,
}

impl EncodeSession {
    /// Encode `root` as row 0 and everything it references as further rows.
    pub fn begin(root: &Value, options: EncodeOptions) -> Result<EncodeSession> {
        let inner = Rc::new(RefCell::new(SessionInner {
            options,
            self_weak: Weak::new(),
            rows: VecDeque::new(),
            next_id: 1,
            visited: HashMap::new(),
            in_progress: HashSet::new(),
            pending: 0,
            state: SessionState::Open,
        }));
        inner.borrow_mut().self_weak = Rc::downgrade(&inner);

        {
            let mut session = inner.borrow_mut();
            let mut path = Vec::new();
            let fragment = encode_value(&mut session, root, &mut path)?;
            let payload = serde_json::to_vec(&fragment)?;
            emit(&mut session, 0, RowTag::Json, payload)?;
        }

        Ok(EncodeSession { inner })
    }

    /// Drain all rows emitted since the last drain, in emission order.
    pub fn take_rows(&self) -> Vec<Row> {
        self.inner.borrow_mut().rows.drain(..).collect()
    }

    /// Number of placeholder rows still awaiting settlement.
    pub fn pending_count(&self) -> usize {
        self.inner.borrow().pending
    }

    /// True once every placeholder has its follow-up row emitted.
    pub fn is_complete(&self) -> bool {
        self.inner.borrow().pending == 0
    }

    /// Emit the terminal abort row and stop emitting. Rows already emitted
    /// stay valid.
    pub fn abort(&self, reason: &str) {
        abort_session(&mut self.inner.borrow_mut(), reason);
    }

    /// End the session. Later settlements are dropped with a debug log.
    pub fn close(&self) -> Result<()> {
        let mut inner = self.inner.borrow_mut();
        match inner.state {
            SessionState::Open => {
                inner.state = SessionState::Closed;
                inner.pending = 0;
                Ok(())
            }
            _ => Err(EncodeError::Closed),
        }
    }

    /// True once the session ended (closed or aborted).
    pub fn is_closed(&self) -> bool {
        self.inner.borrow().state != SessionState::Open
    }
}

impl fmt::Debug for EncodeSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("EncodeSession")
            .field("state", &inner.state)
            .field("pending", &inner.pending)
            .field("buffered_rows", &inner.rows.len())
            .finish()
    }
}

fn assign_id(inner: &mut SessionInner) -> u32 {
    let id = inner.next_id;
    inner.next_id += 1;
    id
}

fn emit(inner: &mut SessionInner, id: u32, tag: RowTag, payload: Vec<u8>) -> Result<()> {
    match inner.state {
        SessionState::Open => {}
        SessionState::Closed => return Err(EncodeError::Closed),
        SessionState::Aborted => return Err(EncodeError::Cancelled),
    }
    if let Some(signal) = &inner.options.signal {
        if signal.is_cancelled() {
            abort_session(inner, "cancellation signal fired");
            return Err(EncodeError::Cancelled);
        }
    }
    trace!(id, tag = tag.name(), len = payload.len(), "emit row");
    inner.rows.push_back(Row::new(id, tag, payload));
    Ok(())
}

fn abort_session(inner: &mut SessionInner, reason: &str) {
    if inner.state != SessionState::Open {
        return;
    }
    debug!(reason, "aborting encode session");
    let error = ErrorValue::new(format!("encode session aborted: {reason}"));
    let payload = serde_json::to_vec(&error).unwrap_or_default();
    inner.rows.push_back(Row::new(0, RowTag::Abort, payload));
    inner.state = SessionState::Aborted;
    // No follow-up rows will be emitted for outstanding placeholders.
    inner.pending = 0;
}

fn redact(inner: &SessionInner, error: &ErrorValue) -> ErrorValue {
    match inner.options.error_detail {
        ErrorDetail::Full => error.clone(),
        ErrorDetail::Redacted => error.redacted(),
    }
}

fn encode_value(
    inner: &mut SessionInner,
    value: &Value,
    path: &mut Vec<PathSegment>,
) -> Result<Json> {
    match (classify(value), value) {
        (WireClass::Inline, value) => inline_fragment(value),
        (WireClass::Outline(tag), value) => {
            let id = outline(inner, value, tag, path)?;
            Ok(Json::String(format!("${id}")))
        }
        (WireClass::Promise, Value::Promise(deferred)) => {
            let id = outline_promise(inner, deferred)?;
            Ok(Json::String(format!("$@{id}")))
        }
        (WireClass::Lazy, Value::Lazy(source)) => {
            let id = outline_lazy(inner, source)?;
            Ok(Json::String(format!("$@{id}")))
        }
        (WireClass::Opaque, Value::Opaque(opaque)) => {
            if let Some(map) = inner.options.module_map.clone() {
                if let Some(reference) = map.module_for(opaque) {
                    let id = outline_module(inner, value, &reference)?;
                    return Ok(Json::String(format!("${id}")));
                }
            }
            if let Some(references) = inner.options.temporary_references.clone() {
                let handle = references.reference(value);
                return Ok(Json::String(format!("$T{handle}")));
            }
            Err(EncodeError::Unsupported {
                path: render(path),
            })
        }
        // Classifier and variant agree by construction.
        _ => Err(EncodeError::Unsupported {
            path: render(path),
        }),
    }
}

fn inline_fragment(value: &Value) -> Result<Json> {
    Ok(match value {
        Value::Undefined => Json::String("$undefined".to_string()),
        Value::Null => Json::Null,
        Value::Bool(b) => Json::Bool(*b),
        Value::Number(n) => number_fragment(*n),
        Value::BigInt(digits) => Json::String(format!("$n{digits}")),
        Value::String(s) => Json::String(escape_string(s)),
        Value::Date(ms) => Json::String(format!("$D{}", format_millis(*ms))),
        _ => {
            return Err(EncodeError::Unsupported {
                path: String::from("$"),
            })
        }
    })
}

fn number_fragment(n: f64) -> Json {
    if n.is_nan() {
        return Json::String("$NaN".into());
    }
    if n == f64::INFINITY {
        return Json::String("$Infinity".into());
    }
    if n == f64::NEG_INFINITY {
        return Json::String("$-Infinity".into());
    }
    if n == 0.0 && n.is_sign_negative() {
        return Json::String("$-0".into());
    }
    let number = serde_json::Number::from_f64(n).expect("finite f64 is representable");
    Json::Number(number)
}

/// Emit `value` as its own row, deduplicated by identity, and return its id.
fn outline(
    inner: &mut SessionInner,
    value: &Value,
    tag: RowTag,
    path: &mut Vec<PathSegment>,
) -> Result<u32> {
    let Some(key) = value.identity_key() else {
        return Err(EncodeError::Unsupported {
            path: render(path),
        });
    };
    if let Some((id, _)) = inner.visited.get(&key) {
        return Ok(*id);
    }
    if !inner.in_progress.insert(key) {
        return Err(EncodeError::Cycle {
            path: render(path),
        });
    }

    let payload = build_payload(inner, value, path);
    inner.in_progress.remove(&key);
    let payload = payload?;

    let id = assign_id(inner);
    emit(inner, id, tag, payload)?;
    inner.visited.insert(key, (id, value.clone()));
    Ok(id)
}

fn build_payload(
    inner: &mut SessionInner,
    value: &Value,
    path: &mut Vec<PathSegment>,
) -> Result<Vec<u8>> {
    match value {
        Value::Array(items) => {
            let items = items.borrow();
            let mut fragments = Vec::with_capacity(items.len());
            for (i, item) in items.iter().enumerate() {
                path.push(PathSegment::Index(i));
                let fragment = encode_value(inner, item, path);
                path.pop();
                fragments.push(fragment?);
            }
            Ok(serde_json::to_vec(&Json::Array(fragments))?)
        }
        Value::Object(entries) => {
            let entries = entries.borrow();
            let mut object = serde_json::Map::with_capacity(entries.len());
            for (key, item) in entries.iter() {
                path.push(PathSegment::Key(key.clone()));
                let fragment = encode_value(inner, item, path);
                path.pop();
                object.insert(key.clone(), fragment?);
            }
            Ok(serde_json::to_vec(&Json::Object(object))?)
        }
        Value::Map(entries) => {
            let entries = entries.borrow();
            let mut pairs = Vec::with_capacity(entries.len());
            for (i, (key, item)) in entries.iter().enumerate() {
                path.push(PathSegment::MapKey(i));
                let key_fragment = encode_value(inner, key, path);
                path.pop();
                path.push(PathSegment::MapValue(i));
                let value_fragment = encode_value(inner, item, path);
                path.pop();
                pairs.push(Json::Array(vec![key_fragment?, value_fragment?]));
            }
            Ok(serde_json::to_vec(&Json::Array(pairs))?)
        }
        Value::Set(items) => {
            let items = items.borrow();
            let mut fragments = Vec::with_capacity(items.len());
            for (i, item) in items.iter().enumerate() {
                path.push(PathSegment::SetEntry(i));
                let fragment = encode_value(inner, item, path);
                path.pop();
                fragments.push(fragment?);
            }
            Ok(serde_json::to_vec(&Json::Array(fragments))?)
        }
        Value::Buffer(bytes) => Ok(bytes.as_slice().to_vec()),
        Value::View(view) => {
            let buffer_id = outline_buffer(inner, &view.buffer)?;
            let descriptor = serde_json::json!({
                "kind": view.kind.as_str(),
                "buffer": buffer_id,
                "offset": view.byte_offset,
                "length": view.length,
            });
            Ok(serde_json::to_vec(&descriptor)?)
        }
        Value::FormData(entries) => {
            let mut out = Vec::with_capacity(entries.len());
            for (key, entry) in entries.iter() {
                let fragment = match entry {
                    FormEntry::Text(text) => Json::String(escape_string(text)),
                    FormEntry::Blob(blob) => {
                        let id = outline_blob(inner, blob)?;
                        Json::String(format!("${id}"))
                    }
                };
                out.push(Json::Array(vec![Json::String(key.clone()), fragment]));
            }
            Ok(serde_json::to_vec(&Json::Array(out))?)
        }
        Value::Blob(blob) => blob_payload(blob),
        Value::Error(error) => {
            let wire = redact(inner, error);
            Ok(serde_json::to_vec(&wire)?)
        }
        Value::Iterator(iterator) => {
            let Some(items) = iterator.drain() else {
                return Err(EncodeError::IteratorDrained {
                    path: render(path),
                });
            };
            let mut fragments = Vec::with_capacity(items.len());
            for (i, item) in items.iter().enumerate() {
                path.push(PathSegment::Index(i));
                let fragment = encode_value(inner, item, path);
                path.pop();
                fragments.push(fragment?);
            }
            Ok(serde_json::to_vec(&Json::Array(fragments))?)
        }
        _ => Err(EncodeError::Unsupported {
            path: render(path),
        }),
    }
}

fn blob_payload(blob: &BlobValue) -> Result<Vec<u8>> {
    let meta = serde_json::json!({
        "name": blob.name,
        "contentType": blob.content_type,
    });
    let meta = serde_json::to_vec(&meta)?;
    let mut payload = Vec::with_capacity(4 + meta.len() + blob.bytes.len());
    payload.extend_from_slice(&(meta.len() as u32).to_le_bytes());
    payload.extend_from_slice(&meta);
    payload.extend_from_slice(&blob.bytes);
    Ok(payload)
}

/// One buffer row per underlying allocation, shared by every view over it.
fn outline_buffer(inner: &mut SessionInner, buffer: &Rc<Vec<u8>>) -> Result<u32> {
    let key = Rc::as_ptr(buffer) as usize;
    if let Some((id, _)) = inner.visited.get(&key) {
        return Ok(*id);
    }
    let id = assign_id(inner);
    emit(inner, id, RowTag::Buffer, buffer.as_slice().to_vec())?;
    inner
        .visited
        .insert(key, (id, Value::Buffer(Rc::clone(buffer))));
    Ok(id)
}

fn outline_blob(inner: &mut SessionInner, blob: &Rc<BlobValue>) -> Result<u32> {
    let key = Rc::as_ptr(blob) as usize;
    if let Some((id, _)) = inner.visited.get(&key) {
        return Ok(*id);
    }
    let payload = blob_payload(blob)?;
    let id = assign_id(inner);
    emit(inner, id, RowTag::BinaryPart, payload)?;
    inner.visited.insert(key, (id, Value::Blob(Rc::clone(blob))));
    Ok(id)
}

fn outline_module(
    inner: &mut SessionInner,
    value: &Value,
    reference: &flightwire_value::ModuleReference,
) -> Result<u32> {
    let Some(key) = value.identity_key() else {
        return Err(EncodeError::Unsupported {
            path: String::from("$"),
        });
    };
    if let Some((id, _)) = inner.visited.get(&key) {
        return Ok(*id);
    }
    let payload = serde_json::to_vec(reference)?;
    let id = assign_id(inner);
    emit(inner, id, RowTag::Module, payload)?;
    inner.visited.insert(key, (id, value.clone()));
    Ok(id)
}

fn outline_promise(inner: &mut SessionInner, deferred: &Deferred) -> Result<u32> {
    let key = deferred.identity_key();
    if let Some((id, _)) = inner.visited.get(&key) {
        return Ok(*id);
    }
    let id = assign_id(inner);
    emit(inner, id, RowTag::Pending, Vec::new())?;
    inner
        .visited
        .insert(key, (id, Value::Promise(deferred.clone())));

    if let Some(result) = deferred.try_result() {
        encode_settlement(inner, id, &result)?;
    } else {
        inner.pending += 1;
        let weak = inner.self_weak.clone();
        deferred.on_settle(move |result| promise_settled(&weak, id, result.clone()));
    }
    Ok(id)
}

fn outline_lazy(inner: &mut SessionInner, source: &Rc<dyn LazySource>) -> Result<u32> {
    let key = Rc::as_ptr(source) as *const () as usize;
    if let Some((id, _)) = inner.visited.get(&key) {
        return Ok(*id);
    }
    let id = assign_id(inner);
    emit(inner, id, RowTag::Pending, Vec::new())?;
    inner
        .visited
        .insert(key, (id, Value::Lazy(Rc::clone(source))));
    attempt_lazy(inner, id, Rc::clone(source), 0)?;
    Ok(id)
}

/// Two-phase read: try synchronously, subscribe and retry on a pending
/// dependency, bounded so an unstable source cannot loop forever.
fn attempt_lazy(
    inner: &mut SessionInner,
    id: u32,
    source: Rc<dyn LazySource>,
    mut retries: usize,
) -> Result<()> {
    loop {
        match source.poll_value() {
            LazyPoll::Ready(value) => return encode_settlement(inner, id, &Ok(value)),
            LazyPoll::Pending(dependency) => {
                if retries >= inner.options.max_lazy_retries {
                    let error = ErrorValue::new(format!(
                        "lazy value failed to stabilize after {retries} retries"
                    ));
                    let payload = serde_json::to_vec(&redact(inner, &error))?;
                    return emit(inner, id, RowTag::Reject, payload);
                }
                // Subscribing to a settled dependency would run the
                // continuation synchronously while the session is borrowed.
                // Retry in place instead; the bound above still applies.
                if dependency.try_result().is_some() {
                    retries += 1;
                    continue;
                }
                inner.pending += 1;
                let weak = inner.self_weak.clone();
                let source = Rc::clone(&source);
                dependency.on_settle(move |_| lazy_retry(&weak, id, source, retries + 1));
                return Ok(());
            }
        }
    }
}

fn lazy_retry(weak: &Weak<RefCell<SessionInner>>, id: u32, source: Rc<dyn LazySource>, retries: usize) {
    let Some(rc) = weak.upgrade() else {
        return;
    };
    let mut inner = rc.borrow_mut();
    if inner.state != SessionState::Open {
        debug!(id, "dropping lazy retry for ended session");
        return;
    }
    inner.pending = inner.pending.saturating_sub(1);
    if let Err(err) = attempt_lazy(&mut inner, id, source, retries) {
        match err {
            EncodeError::Closed | EncodeError::Cancelled => {}
            err => warn!(id, error = %err, "failed to encode lazy value"),
        }
    }
}

fn encode_settlement(inner: &mut SessionInner, id: u32, result: &SettleResult) -> Result<()> {
    match result {
        Ok(value) => {
            let mut path = Vec::new();
            match encode_value(inner, value, &mut path) {
                Ok(fragment) => {
                    let payload = serde_json::to_vec(&fragment)?;
                    emit(inner, id, RowTag::Resolve, payload)
                }
                Err(err @ (EncodeError::Closed | EncodeError::Cancelled)) => Err(err),
                Err(err) => {
                    // Classification failures stay local to this subtree.
                    let error = ErrorValue::new(err.to_string());
                    let payload = serde_json::to_vec(&redact(inner, &error))?;
                    emit(inner, id, RowTag::Reject, payload)
                }
            }
        }
        Err(error) => {
            let payload = serde_json::to_vec(&redact(inner, error))?;
            emit(inner, id, RowTag::Reject, payload)
        }
    }
}

fn promise_settled(weak: &Weak<RefCell<SessionInner>>, id: u32, result: SettleResult) {
    let Some(rc) = weak.upgrade() else {
        return;
    };
    let mut inner = rc.borrow_mut();
    if inner.state != SessionState::Open {
        debug!(id, "dropping settlement for ended session");
        return;
    }
    inner.pending = inner.pending.saturating_sub(1);
    if let Err(err) = encode_settlement(&mut inner, id, &result) {
        match err {
            EncodeError::Closed | EncodeError::Cancelled => {}
            err => warn!(id, error = %err, "failed to encode settlement"),
        }
    }
}
