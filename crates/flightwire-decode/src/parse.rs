//! Row payload parsing.
//!
//! Payload JSON is parsed into values in a single pass. A reference to a row
//! that has not arrived yet parses to a *blocked* slot: the container is
//! built with a placeholder at that position and a splice target records
//! where the dependency's value belongs once its chunk settles. Parsing
//! never waits.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use flightwire_value::{
    Deferred, ErrorValue, FormEntry, TemporaryReferences, Value, ViewKind, ViewValue,
};
use serde::Deserialize;
use serde_json::Value as Json;

use crate::chunk::Chunk;
use crate::error::DecodeError;

/// How one payload parse attempt fails.
pub(crate) enum ParseFail {
    /// Rejects the consuming chunk only; the session stays healthy.
    Local(ErrorValue),
    /// Poisons the whole session.
    Fatal(DecodeError),
}

pub(crate) type ParseResult<T> = Result<T, ParseFail>;

/// Parsing context: the chunk table (for references) and the session's
/// temporary-reference table, if any.
pub(crate) struct ParseCx<'a> {
    pub chunks: &'a mut HashMap<u32, Chunk>,
    pub temporary_references: Option<&'a TemporaryReferences>,
}

impl ParseCx<'_> {
    /// The deferred backing row `id`, creating the chunk on first reference.
    fn chunk_deferred(&mut self, id: u32) -> Deferred {
        self.chunks
            .entry(id)
            .or_insert_with(Chunk::new_pending)
            .deferred
            .clone()
    }
}

/// One parsed position: available now, or waiting on another chunk.
enum Slot {
    Ready(Value),
    Blocked(Deferred),
}

/// Where a blocked dependency's value belongs once it settles.
pub(crate) enum SpliceTarget {
    /// The payload was a bare reference; the chunk resolves to the
    /// dependency's value directly.
    Root,
    Item {
        items: Rc<RefCell<Vec<Value>>>,
        index: usize,
    },
    ObjectEntry {
        entries: Rc<RefCell<Vec<(String, Value)>>>,
        index: usize,
    },
    MapKey {
        entries: Rc<RefCell<Vec<(Value, Value)>>>,
        index: usize,
    },
    MapValue {
        entries: Rc<RefCell<Vec<(Value, Value)>>>,
        index: usize,
    },
}

impl SpliceTarget {
    /// Write the settled value into its recorded position. `Root` has no
    /// position; the installer resolves the chunk with the value instead.
    pub fn splice(&self, value: Value) {
        match self {
            SpliceTarget::Root => {}
            SpliceTarget::Item { items, index } => items.borrow_mut()[*index] = value,
            SpliceTarget::ObjectEntry { entries, index } => {
                entries.borrow_mut()[*index].1 = value;
            }
            SpliceTarget::MapKey { entries, index } => entries.borrow_mut()[*index].0 = value,
            SpliceTarget::MapValue { entries, index } => entries.borrow_mut()[*index].1 = value,
        }
    }
}

/// A dependency the parsed value is blocked on.
pub(crate) struct BlockedDep {
    pub deferred: Deferred,
    pub target: SpliceTarget,
}

/// A parsed payload: the value skeleton plus its unresolved dependencies.
pub(crate) struct Parsed {
    pub value: Value,
    pub deps: Vec<BlockedDep>,
}

impl Parsed {
    pub fn ready(value: Value) -> Self {
        Self {
            value,
            deps: Vec::new(),
        }
    }
}

/// Parse a general JSON payload (the `Json` and `Resolve` row tags).
pub(crate) fn parse_json_payload(cx: &mut ParseCx, payload: &[u8]) -> ParseResult<Parsed> {
    let json: Json = serde_json::from_slice(payload).map_err(fatal_json)?;
    let mut deps = Vec::new();
    let value = match parse_slot(cx, &json, &mut deps)? {
        Slot::Ready(value) => value,
        Slot::Blocked(deferred) => {
            deps.push(BlockedDep {
                deferred,
                target: SpliceTarget::Root,
            });
            Value::Undefined
        }
    };
    Ok(Parsed { value, deps })
}

fn parse_slot(cx: &mut ParseCx, json: &Json, deps: &mut Vec<BlockedDep>) -> ParseResult<Slot> {
    match json {
        Json::Null => Ok(Slot::Ready(Value::Null)),
        Json::Bool(b) => Ok(Slot::Ready(Value::Bool(*b))),
        Json::Number(n) => match n.as_f64() {
            Some(n) => Ok(Slot::Ready(Value::Number(n))),
            None => Err(ParseFail::Fatal(DecodeError::Protocol(format!(
                "unrepresentable number {n}"
            )))),
        },
        Json::String(s) => parse_marker(cx, s),
        Json::Array(items) => {
            let out = Rc::new(RefCell::new(vec![Value::Undefined; items.len()]));
            for (index, item) in items.iter().enumerate() {
                match parse_slot(cx, item, deps)? {
                    Slot::Ready(value) => out.borrow_mut()[index] = value,
                    Slot::Blocked(deferred) => deps.push(BlockedDep {
                        deferred,
                        target: SpliceTarget::Item {
                            items: Rc::clone(&out),
                            index,
                        },
                    }),
                }
            }
            Ok(Slot::Ready(Value::Array(out)))
        }
        Json::Object(entries) => {
            let out: Rc<RefCell<Vec<(String, Value)>>> = Rc::new(RefCell::new(
                entries
                    .keys()
                    .map(|key| (key.clone(), Value::Undefined))
                    .collect(),
            ));
            for (index, (_, item)) in entries.iter().enumerate() {
                match parse_slot(cx, item, deps)? {
                    Slot::Ready(value) => out.borrow_mut()[index].1 = value,
                    Slot::Blocked(deferred) => deps.push(BlockedDep {
                        deferred,
                        target: SpliceTarget::ObjectEntry {
                            entries: Rc::clone(&out),
                            index,
                        },
                    }),
                }
            }
            Ok(Slot::Ready(Value::Object(out)))
        }
    }
}

/// Interpret a payload string: plain text, an escaped literal, a typed
/// scalar marker, or a reference.
fn parse_marker(cx: &mut ParseCx, s: &str) -> ParseResult<Slot> {
    let Some(rest) = s.strip_prefix('$') else {
        return Ok(Slot::Ready(Value::string(s)));
    };
    if rest.starts_with('$') {
        // "$$x" carries the literal string "$x".
        return Ok(Slot::Ready(Value::string(rest)));
    }
    match rest {
        "undefined" => return Ok(Slot::Ready(Value::Undefined)),
        "-0" => return Ok(Slot::Ready(Value::Number(-0.0))),
        "NaN" => return Ok(Slot::Ready(Value::Number(f64::NAN))),
        "Infinity" => return Ok(Slot::Ready(Value::Number(f64::INFINITY))),
        "-Infinity" => return Ok(Slot::Ready(Value::Number(f64::NEG_INFINITY))),
        _ => {}
    }
    if let Some(digits) = rest.strip_prefix('n') {
        if is_decimal_integer(digits) {
            return Ok(Slot::Ready(Value::bigint(digits)));
        }
        return Err(ParseFail::Fatal(DecodeError::Protocol(format!(
            "malformed bigint literal {s:?}"
        ))));
    }
    if let Some(millis) = rest.strip_prefix('D') {
        return match millis.parse::<f64>() {
            Ok(ms) => Ok(Slot::Ready(Value::Date(ms))),
            Err(_) => Err(ParseFail::Fatal(DecodeError::Protocol(format!(
                "malformed date literal {s:?}"
            )))),
        };
    }
    if let Some(handle) = rest.strip_prefix('T') {
        let Some(references) = cx.temporary_references else {
            return Err(ParseFail::Local(ErrorValue::new(format!(
                "temporary reference {handle:?} without a reference table"
            ))));
        };
        return match references.resolve(handle) {
            Some(value) => Ok(Slot::Ready(value)),
            None => Err(ParseFail::Local(ErrorValue::new(format!(
                "unknown temporary reference {handle:?}"
            )))),
        };
    }
    if let Some(id) = rest.strip_prefix('@') {
        let id = parse_row_id(id, s)?;
        return Ok(Slot::Ready(Value::Promise(cx.chunk_deferred(id))));
    }
    if !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit()) {
        let id = parse_row_id(rest, s)?;
        let deferred = cx.chunk_deferred(id);
        return match deferred.try_result() {
            Some(Ok(value)) => Ok(Slot::Ready(value)),
            Some(Err(error)) => Err(ParseFail::Local(error)),
            None => Ok(Slot::Blocked(deferred)),
        };
    }
    Err(ParseFail::Fatal(DecodeError::Protocol(format!(
        "unknown marker {s:?}"
    ))))
}

fn parse_row_id(digits: &str, marker: &str) -> ParseResult<u32> {
    digits.parse().map_err(|_| {
        ParseFail::Fatal(DecodeError::Protocol(format!(
            "malformed row reference {marker:?}"
        )))
    })
}

fn is_decimal_integer(s: &str) -> bool {
    let digits = s.strip_prefix('-').unwrap_or(s);
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

fn fatal_json(err: serde_json::Error) -> ParseFail {
    ParseFail::Fatal(DecodeError::Json(err))
}

fn fatal_protocol(message: impl Into<String>) -> ParseFail {
    ParseFail::Fatal(DecodeError::Protocol(message.into()))
}

/// Parse a map payload: a JSON array of `[key, value]` pairs.
pub(crate) fn parse_map_payload(cx: &mut ParseCx, payload: &[u8]) -> ParseResult<Parsed> {
    let json: Json = serde_json::from_slice(payload).map_err(fatal_json)?;
    let Json::Array(pairs) = json else {
        return Err(fatal_protocol("map payload must be an array of pairs"));
    };

    let entries: Rc<RefCell<Vec<(Value, Value)>>> = Rc::new(RefCell::new(vec![
        (Value::Undefined, Value::Undefined);
        pairs.len()
    ]));
    let mut deps = Vec::new();
    for (index, pair) in pairs.iter().enumerate() {
        let Json::Array(kv) = pair else {
            return Err(fatal_protocol("map entry must be a [key, value] pair"));
        };
        let [key, value] = kv.as_slice() else {
            return Err(fatal_protocol("map entry must be a [key, value] pair"));
        };
        match parse_slot(cx, key, &mut deps)? {
            Slot::Ready(key) => entries.borrow_mut()[index].0 = key,
            Slot::Blocked(deferred) => deps.push(BlockedDep {
                deferred,
                target: SpliceTarget::MapKey {
                    entries: Rc::clone(&entries),
                    index,
                },
            }),
        }
        match parse_slot(cx, value, &mut deps)? {
            Slot::Ready(value) => entries.borrow_mut()[index].1 = value,
            Slot::Blocked(deferred) => deps.push(BlockedDep {
                deferred,
                target: SpliceTarget::MapValue {
                    entries: Rc::clone(&entries),
                    index,
                },
            }),
        }
    }
    Ok(Parsed {
        value: Value::Map(entries),
        deps,
    })
}

fn parse_item_list(
    cx: &mut ParseCx,
    payload: &[u8],
) -> ParseResult<(Rc<RefCell<Vec<Value>>>, Vec<BlockedDep>)> {
    let json: Json = serde_json::from_slice(payload).map_err(fatal_json)?;
    let Json::Array(items) = json else {
        return Err(fatal_protocol("payload must be an array of items"));
    };

    let out = Rc::new(RefCell::new(vec![Value::Undefined; items.len()]));
    let mut deps = Vec::new();
    for (index, item) in items.iter().enumerate() {
        match parse_slot(cx, item, &mut deps)? {
            Slot::Ready(value) => out.borrow_mut()[index] = value,
            Slot::Blocked(deferred) => deps.push(BlockedDep {
                deferred,
                target: SpliceTarget::Item {
                    items: Rc::clone(&out),
                    index,
                },
            }),
        }
    }
    Ok((out, deps))
}

/// Parse a set payload: a JSON array of entries.
pub(crate) fn parse_set_payload(cx: &mut ParseCx, payload: &[u8]) -> ParseResult<Parsed> {
    let (items, deps) = parse_item_list(cx, payload)?;
    Ok(Parsed {
        value: Value::Set(items),
        deps,
    })
}

/// Parse a sequence payload. The ordered items of a drained producer-side
/// iterator decode as an array.
pub(crate) fn parse_sequence_payload(cx: &mut ParseCx, payload: &[u8]) -> ParseResult<Parsed> {
    let (items, deps) = parse_item_list(cx, payload)?;
    Ok(Parsed {
        value: Value::Array(items),
        deps,
    })
}

/// Parse a form-data payload: a JSON array of `[key, entry]` pairs where an
/// entry is escaped text or a `$id` reference to an earlier binary part row.
pub(crate) fn parse_form_data_payload(cx: &mut ParseCx, payload: &[u8]) -> ParseResult<Parsed> {
    let json: Json = serde_json::from_slice(payload).map_err(fatal_json)?;
    let Json::Array(pairs) = json else {
        return Err(fatal_protocol("form data payload must be an array of pairs"));
    };

    let mut entries = Vec::with_capacity(pairs.len());
    for pair in &pairs {
        let Json::Array(kv) = pair else {
            return Err(fatal_protocol("form data entry must be a [key, entry] pair"));
        };
        let [Json::String(key), Json::String(entry)] = kv.as_slice() else {
            return Err(fatal_protocol("form data entry must be a [key, entry] pair"));
        };
        let slot = parse_marker(cx, entry)?;
        let entry = match slot {
            Slot::Ready(Value::String(text)) => FormEntry::Text(text.to_string()),
            Slot::Ready(Value::Blob(blob)) => FormEntry::Blob(blob),
            // Binary parts precede the form data row in well-formed streams.
            Slot::Ready(_) | Slot::Blocked(_) => {
                return Err(ParseFail::Local(ErrorValue::new(
                    "form data entry does not reference text or a binary part",
                )))
            }
        };
        entries.push((key.clone(), entry));
    }
    Ok(Parsed::ready(Value::form_data(entries)))
}

#[derive(Deserialize)]
struct ViewDescriptor {
    kind: String,
    buffer: u32,
    offset: usize,
    length: usize,
}

/// Parse a view payload: a descriptor referencing an earlier buffer row.
pub(crate) fn parse_view_payload(cx: &mut ParseCx, payload: &[u8]) -> ParseResult<Parsed> {
    let descriptor: ViewDescriptor = serde_json::from_slice(payload).map_err(fatal_json)?;
    let Some(kind) = ViewKind::from_str(&descriptor.kind) else {
        return Err(fatal_protocol(format!(
            "unknown view kind {:?}",
            descriptor.kind
        )));
    };

    // Buffers precede views in well-formed streams.
    let deferred = cx.chunk_deferred(descriptor.buffer);
    let buffer = match deferred.try_result() {
        Some(Ok(Value::Buffer(buffer))) => buffer,
        Some(Ok(_)) => {
            return Err(ParseFail::Local(ErrorValue::new(
                "view references a row that is not a buffer",
            )))
        }
        Some(Err(error)) => return Err(ParseFail::Local(error)),
        None => {
            return Err(ParseFail::Local(ErrorValue::new(
                "view references an undefined buffer row",
            )))
        }
    };

    match ViewValue::new(kind, buffer, descriptor.offset, descriptor.length) {
        Some(view) => Ok(Parsed::ready(Value::View(Rc::new(view)))),
        None => Err(ParseFail::Local(ErrorValue::new(
            "view does not fit inside its buffer",
        ))),
    }
}

#[derive(Deserialize)]
struct BlobMeta {
    name: String,
    #[serde(rename = "contentType")]
    content_type: String,
}

/// Parse a binary part payload: a length-prefixed JSON meta header followed
/// by the raw bytes.
pub(crate) fn parse_blob_payload(payload: &[u8]) -> ParseResult<Value> {
    if payload.len() < 4 {
        return Err(fatal_protocol("binary part payload shorter than its header"));
    }
    let meta_len = u32::from_le_bytes(payload[0..4].try_into().expect("4 header bytes")) as usize;
    let Some(meta_end) = meta_len.checked_add(4).filter(|end| *end <= payload.len()) else {
        return Err(fatal_protocol("binary part meta length out of bounds"));
    };
    let meta: BlobMeta = serde_json::from_slice(&payload[4..meta_end]).map_err(fatal_json)?;
    Ok(Value::blob(
        meta.name,
        meta.content_type,
        payload[meta_end..].to_vec(),
    ))
}

/// Parse an error payload (the `Error` and `Reject` row tags).
pub(crate) fn parse_error_payload(payload: &[u8]) -> ParseResult<ErrorValue> {
    serde_json::from_slice(payload).map_err(fatal_json)
}
