use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use bytes::BytesMut;
use flightwire_row::{decode_row, Row, RowConfig, RowTag};
use flightwire_value::{
    Deferred, DeferredHandle, ErrorValue, ModuleReference, TemporaryReferences, Value,
};
use tracing::{debug, trace, warn};

use crate::chunk::Chunk;
use crate::error::{DecodeError, Result};
use crate::parse::{self, BlockedDep, ParseCx, ParseFail, Parsed, SpliceTarget};
use crate::resolver::{ModuleLoad, ModuleResolver};

/// Options for one decode session.
#[derive(Default)]
pub struct DecodeOptions {
    /// Turns module reference rows back into live values.
    pub resolver: Option<Rc<dyn ModuleResolver>>,
    /// Must be the same table the matching encode session used.
    pub temporary_references: Option<TemporaryReferences>,
    /// Row framing limits.
    pub row_config: RowConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResponseState {
    Active,
    Closed,
    Failed,
}

struct ResponseInner {
    options: DecodeOptions,
    buf: BytesMut,
    chunks: HashMap<u32, Chunk>,
    /// One load per distinct (module, export) pair.
    module_cache: HashMap<(String, String), Deferred>,
    state: ResponseState,
}

/// An in-progress decode session: the consumer side of one row stream.
///
/// Feed transport bytes with [`process`](Self::process) (or pre-framed rows
/// with [`receive_row`](Self::receive_row)); observe the reconstructed graph
/// through [`root`](Self::root). The root settles as soon as every row it
/// transitively needs has arrived, independent of pending promise rows
/// elsewhere in the stream.
pub struct Response {
    inner: Rc<RefCell<ResponseInner>>,
}

impl Response {
    pub fn new(options: DecodeOptions) -> Self {
        let mut chunks = HashMap::new();
        chunks.insert(0, Chunk::new_pending());
        Response {
            inner: Rc::new(RefCell::new(ResponseInner {
                options,
                buf: BytesMut::new(),
                chunks,
                module_cache: HashMap::new(),
                state: ResponseState::Active,
            })),
        }
    }

    /// The deferred that settles with the root value.
    pub fn root(&self) -> Deferred {
        // Chunk 0 is created in `new` and never removed.
        self.inner.borrow().chunks[&0].deferred.clone()
    }

    /// Feed raw transport bytes. Arbitrary chunking is fine; incomplete
    /// trailing rows are buffered until more bytes arrive.
    pub fn process(&self, bytes: &[u8]) -> Result<()> {
        {
            let mut inner = self.inner.borrow_mut();
            if inner.state != ResponseState::Active {
                return Err(DecodeError::Closed);
            }
            inner.buf.extend_from_slice(bytes);
        }
        loop {
            let row = {
                let mut inner = self.inner.borrow_mut();
                let max_payload = inner.options.row_config.max_payload_size;
                match decode_row(&mut inner.buf, max_payload) {
                    Ok(Some(row)) => row,
                    Ok(None) => return Ok(()),
                    Err(err) => {
                        drop(inner);
                        let err = DecodeError::Framing(err);
                        self.fail_session(&err);
                        return Err(err);
                    }
                }
            };
            if let Err(err) = self.handle_row(&row) {
                self.fail_session(&err);
                return Err(err);
            }
        }
    }

    /// Feed one pre-framed row.
    pub fn receive_row(&self, row: &Row) -> Result<()> {
        if self.inner.borrow().state != ResponseState::Active {
            return Err(DecodeError::Closed);
        }
        if let Err(err) = self.handle_row(row) {
            self.fail_session(&err);
            return Err(err);
        }
        Ok(())
    }

    /// Signal that the transport ended. Every still-pending chunk rejects
    /// with the connection-closed condition, exactly once.
    pub fn close(&self) -> Result<()> {
        if self.inner.borrow().state != ResponseState::Active {
            return Err(DecodeError::Closed);
        }
        debug!("closing response with pending chunks");
        self.reject_all_pending(ErrorValue::connection_closed(), ResponseState::Closed);
        Ok(())
    }

    /// Number of chunks still awaiting settlement.
    pub fn pending_count(&self) -> usize {
        self.inner
            .borrow()
            .chunks
            .values()
            .filter(|chunk| chunk.deferred.is_pending())
            .count()
    }

    /// True once the session stopped accepting rows.
    pub fn is_closed(&self) -> bool {
        self.inner.borrow().state != ResponseState::Active
    }

    fn handle_row(&self, row: &Row) -> Result<()> {
        trace!(id = row.id, tag = row.tag.name(), len = row.payload.len(), "row");
        match row.tag {
            RowTag::Json => {
                self.define_chunk(row.id, |cx| parse::parse_json_payload(cx, &row.payload))
            }
            RowTag::Map => {
                self.define_chunk(row.id, |cx| parse::parse_map_payload(cx, &row.payload))
            }
            RowTag::Set => {
                self.define_chunk(row.id, |cx| parse::parse_set_payload(cx, &row.payload))
            }
            RowTag::Sequence => {
                self.define_chunk(row.id, |cx| parse::parse_sequence_payload(cx, &row.payload))
            }
            RowTag::FormData => {
                self.define_chunk(row.id, |cx| parse::parse_form_data_payload(cx, &row.payload))
            }
            RowTag::View => {
                self.define_chunk(row.id, |cx| parse::parse_view_payload(cx, &row.payload))
            }
            RowTag::Buffer => self.define_chunk(row.id, |_| {
                Ok(Parsed::ready(Value::buffer(row.payload.to_vec())))
            }),
            RowTag::BinaryPart => self.define_chunk(row.id, |_| {
                parse::parse_blob_payload(&row.payload).map(Parsed::ready)
            }),
            RowTag::Error => self.define_chunk(row.id, |_| {
                let error = parse::parse_error_payload(&row.payload)?;
                Ok(Parsed::ready(Value::Error(Rc::new(error))))
            }),
            RowTag::Module => self.handle_module(row),
            RowTag::Pending => self.declare_pending(row.id),
            RowTag::Resolve => self.resolve_chunk(row),
            RowTag::Reject => self.reject_chunk(row),
            RowTag::Abort => self.handle_abort(row),
        }
    }

    /// Define a value row: parse under the borrow, settle outside it.
    fn define_chunk<F>(&self, id: u32, parse: F) -> Result<()>
    where
        F: FnOnce(&mut ParseCx) -> std::result::Result<Parsed, ParseFail>,
    {
        let (handle, outcome) = {
            let mut inner = self.inner.borrow_mut();
            let inner = &mut *inner;
            let handle = {
                let chunk = inner.chunks.entry(id).or_insert_with(Chunk::new_pending);
                if chunk.defined {
                    return Err(DecodeError::DuplicateRow { id });
                }
                chunk.defined = true;
                chunk.handle.clone()
            };
            let mut cx = ParseCx {
                chunks: &mut inner.chunks,
                temporary_references: inner.options.temporary_references.as_ref(),
            };
            (handle, parse(&mut cx))
        };

        match outcome {
            Ok(parsed) => {
                install(parsed, handle);
                Ok(())
            }
            Err(ParseFail::Local(error)) => {
                handle.reject(error);
                Ok(())
            }
            Err(ParseFail::Fatal(err)) => Err(err),
        }
    }

    fn declare_pending(&self, id: u32) -> Result<()> {
        let mut inner = self.inner.borrow_mut();
        let chunk = inner.chunks.entry(id).or_insert_with(Chunk::new_pending);
        if chunk.defined {
            return Err(DecodeError::DuplicateRow { id });
        }
        chunk.defined = true;
        Ok(())
    }

    fn resolve_chunk(&self, row: &Row) -> Result<()> {
        let (handle, outcome) = {
            let mut inner = self.inner.borrow_mut();
            let inner = &mut *inner;
            let handle = settlement_handle(&mut inner.chunks, row.id)?;
            let mut cx = ParseCx {
                chunks: &mut inner.chunks,
                temporary_references: inner.options.temporary_references.as_ref(),
            };
            (handle, parse::parse_json_payload(&mut cx, &row.payload))
        };

        match outcome {
            Ok(parsed) => {
                install(parsed, handle);
                Ok(())
            }
            Err(ParseFail::Local(error)) => {
                handle.reject(error);
                Ok(())
            }
            Err(ParseFail::Fatal(err)) => Err(err),
        }
    }

    fn reject_chunk(&self, row: &Row) -> Result<()> {
        let handle = {
            let mut inner = self.inner.borrow_mut();
            settlement_handle(&mut inner.chunks, row.id)?
        };
        let error = match parse::parse_error_payload(&row.payload) {
            Ok(error) => error,
            Err(ParseFail::Fatal(err)) => return Err(err),
            Err(ParseFail::Local(error)) => error,
        };
        handle.reject(error);
        Ok(())
    }

    fn handle_module(&self, row: &Row) -> Result<()> {
        let reference: ModuleReference = serde_json::from_slice(&row.payload)?;
        let key = (reference.module_id.clone(), reference.export_name.clone());

        let (handle, cached, resolver) = {
            let mut inner = self.inner.borrow_mut();
            let handle = {
                let chunk = inner
                    .chunks
                    .entry(row.id)
                    .or_insert_with(Chunk::new_pending);
                if chunk.defined {
                    return Err(DecodeError::DuplicateRow { id: row.id });
                }
                chunk.defined = true;
                chunk.handle.clone()
            };
            (
                handle,
                inner.module_cache.get(&key).cloned(),
                inner.options.resolver.clone(),
            )
        };

        let load = match cached {
            Some(load) => load,
            None => {
                // Resolver is user code; call it outside the borrow.
                let load = match resolver {
                    Some(resolver) => {
                        match resolver.resolve(&reference.module_id, &reference.export_name) {
                            ModuleLoad::Ready(value) => Deferred::resolved(value),
                            ModuleLoad::Pending(deferred) => deferred,
                            ModuleLoad::Failed(error) => Deferred::rejected(error),
                        }
                    }
                    None => Deferred::rejected(ErrorValue::new("no module resolver configured")),
                };
                self.inner
                    .borrow_mut()
                    .module_cache
                    .insert(key, load.clone());
                load
            }
        };

        load.on_settle(move |result| {
            handle.settle(result.clone());
        });
        Ok(())
    }

    fn handle_abort(&self, row: &Row) -> Result<()> {
        let error = if row.payload.is_empty() {
            ErrorValue::new("stream aborted by the producer")
        } else {
            serde_json::from_slice(&row.payload)?
        };
        debug!(error = %error, "stream aborted");
        self.reject_all_pending(error, ResponseState::Closed);
        Ok(())
    }

    fn fail_session(&self, err: &DecodeError) {
        warn!(error = %err, "decode stream failed");
        self.reject_all_pending(
            ErrorValue::new(format!("decode stream failed: {err}")),
            ResponseState::Failed,
        );
    }

    /// Reject every pending chunk with `error` and stop accepting rows.
    /// Handles are collected first so settlement continuations never run
    /// under the session borrow.
    fn reject_all_pending(&self, error: ErrorValue, state: ResponseState) {
        let handles: Vec<DeferredHandle> = {
            let mut inner = self.inner.borrow_mut();
            inner.state = state;
            inner
                .chunks
                .values()
                .filter(|chunk| chunk.deferred.is_pending())
                .map(|chunk| chunk.handle.clone())
                .collect()
        };
        for handle in handles {
            handle.reject(error.clone());
        }
    }
}

/// Look up the settle handle for a `Resolve`/`Reject` row. A placeholder
/// declaration is not required first, but settling twice is a violation.
fn settlement_handle(chunks: &mut HashMap<u32, Chunk>, id: u32) -> Result<DeferredHandle> {
    let chunk = chunks.entry(id).or_insert_with(Chunk::new_pending);
    if chunk.deferred.try_result().is_some() {
        return Err(DecodeError::DuplicateRow { id });
    }
    chunk.defined = true;
    Ok(chunk.handle.clone())
}

/// Settle a parsed payload into its chunk: immediately when it has no
/// blocked dependencies, otherwise once the last dependency splices in.
/// The first errored dependency rejects the chunk; late splices into an
/// already-failed chunk are harmless.
fn install(parsed: Parsed, handle: DeferredHandle) {
    let Parsed { value, deps } = parsed;
    if deps.is_empty() {
        handle.resolve(value);
        return;
    }

    // A bare-reference payload forwards the dependency's outcome wholesale.
    if deps
        .iter()
        .any(|dep| matches!(dep.target, SpliceTarget::Root))
    {
        let BlockedDep { deferred, .. } = deps.into_iter().next().expect("one root dependency");
        deferred.on_settle(move |result| {
            handle.settle(result.clone());
        });
        return;
    }

    let remaining = Rc::new(Cell::new(deps.len()));
    let failed = Rc::new(Cell::new(false));
    for dep in deps {
        let BlockedDep { deferred, target } = dep;
        let remaining = Rc::clone(&remaining);
        let failed = Rc::clone(&failed);
        let handle = handle.clone();
        let value = value.clone();
        deferred.on_settle(move |result| {
            match result {
                Ok(settled) => target.splice(settled.clone()),
                Err(error) => {
                    if !failed.replace(true) {
                        handle.reject(error.clone());
                    }
                }
            }
            remaining.set(remaining.get() - 1);
            if remaining.get() == 0 && !failed.get() {
                handle.resolve(value);
            }
        });
    }
}
