//! Streaming behavior: incremental arrival, asynchronous settlement,
//! cancellation, and transport teardown.

use std::cell::Cell;
use std::rc::Rc;

use bytes::BytesMut;
use flightwire::decode::{DecodeError, DecodeOptions, Response};
use flightwire::encode::{CancelSignal, EncodeOptions, EncodeSession};
use flightwire::row::encode_row;
use flightwire::value::{deep_equals, Deferred, LazyPoll, LazySource, Value};

fn drain_to_bytes(session: &EncodeSession) -> Vec<u8> {
    let mut buf = BytesMut::new();
    for row in session.take_rows() {
        encode_row(row.id, row.tag, &row.payload, &mut buf).unwrap();
    }
    buf.to_vec()
}

fn pump(session: &EncodeSession, response: &Response) {
    response.process(&drain_to_bytes(session)).unwrap();
}

#[test]
fn root_is_observable_before_promises_settle() {
    let (promise, handle) = Value::promise();
    let root = Value::object(vec![
        ("now".to_string(), Value::string("immediate")),
        ("later".to_string(), promise),
    ]);

    let session = EncodeSession::begin(&root, EncodeOptions::default()).unwrap();
    let response = Response::new(DecodeOptions::default());
    pump(&session, &response);

    // The root arrives complete; only the promise position is pending.
    let decoded = response.root().try_result().unwrap().unwrap();
    let entries = match &decoded {
        Value::Object(entries) => entries,
        other => panic!("unexpected root: {other:?}"),
    };
    let later = entries.borrow()[1].1.clone();
    let deferred = match later {
        Value::Promise(deferred) => deferred,
        other => panic!("unexpected entry: {other:?}"),
    };
    assert!(deferred.is_pending());

    handle.resolve(Value::Number(99.0));
    pump(&session, &response);
    match deferred.try_result() {
        Some(Ok(value)) => assert_eq!(value.as_number(), Some(99.0)),
        other => panic!("unexpected settlement: {other:?}"),
    }
    assert!(session.is_complete());
}

#[test]
fn rejection_crosses_the_wire() {
    let (promise, handle) = Value::promise();
    let session = EncodeSession::begin(&promise, EncodeOptions::default()).unwrap();
    let response = Response::new(DecodeOptions::default());
    pump(&session, &response);

    let deferred = match response.root().try_result() {
        Some(Ok(Value::Promise(deferred))) => deferred,
        other => panic!("unexpected root: {other:?}"),
    };

    handle.reject(flightwire::value::ErrorValue::new("producer failed").with_digest("log-7"));
    pump(&session, &response);

    match deferred.try_result() {
        Some(Err(error)) => {
            assert_eq!(error.message, "producer failed");
            assert_eq!(error.digest.as_deref(), Some("log-7"));
        }
        other => panic!("unexpected settlement: {other:?}"),
    }
}

#[test]
fn byte_at_a_time_matches_one_pass() {
    let shared = Value::array(vec![Value::Number(-0.0), Value::string("$x")]);
    let root = Value::object(vec![
        ("a".to_string(), shared.clone()),
        ("b".to_string(), shared),
        ("buf".to_string(), Value::buffer(vec![1, 2, 3])),
    ]);

    let session = EncodeSession::begin(&root, EncodeOptions::default()).unwrap();
    let bytes = drain_to_bytes(&session);

    let one_pass = Response::new(DecodeOptions::default());
    one_pass.process(&bytes).unwrap();

    let trickle = Response::new(DecodeOptions::default());
    for byte in &bytes {
        trickle.process(std::slice::from_ref(byte)).unwrap();
    }

    let a = one_pass.root().try_result().unwrap().unwrap();
    let b = trickle.root().try_result().unwrap().unwrap();
    assert!(deep_equals(&a, &b));
    assert!(deep_equals(&root, &b));
}

#[test]
fn close_rejects_each_pending_value_exactly_once() {
    let (promise, _handle) = Value::promise();
    let session = EncodeSession::begin(&promise, EncodeOptions::default()).unwrap();
    let response = Response::new(DecodeOptions::default());
    pump(&session, &response);

    let deferred = match response.root().try_result() {
        Some(Ok(Value::Promise(deferred))) => deferred,
        other => panic!("unexpected root: {other:?}"),
    };

    let rejections = Rc::new(Cell::new(0usize));
    let counter = Rc::clone(&rejections);
    deferred.on_settle(move |result| {
        assert!(matches!(result, Err(error) if error.is_connection_closed()));
        counter.set(counter.get() + 1);
    });

    response.close().unwrap();
    assert_eq!(rejections.get(), 1);

    // Closing again neither errors silently nor re-fires settlements.
    assert!(matches!(response.close(), Err(DecodeError::Closed)));
    assert_eq!(rejections.get(), 1);
}

#[test]
fn cancellation_aborts_the_consumer_side() {
    let (signal, trigger) = CancelSignal::new();
    let (promise, handle) = Value::promise();
    let root = Value::array(vec![Value::Number(1.0), promise]);

    let session = EncodeSession::begin(
        &root,
        EncodeOptions {
            signal: Some(signal),
            ..EncodeOptions::default()
        },
    )
    .unwrap();
    let response = Response::new(DecodeOptions::default());
    pump(&session, &response);

    let decoded = response.root().try_result().unwrap().unwrap();
    let pending = match &decoded {
        Value::Array(items) => match items.borrow()[1].clone() {
            Value::Promise(deferred) => deferred,
            other => panic!("unexpected item: {other:?}"),
        },
        other => panic!("unexpected root: {other:?}"),
    };

    trigger.cancel();
    handle.resolve(Value::Null);
    pump(&session, &response);

    // Values decoded before the abort stay valid; pending ones reject.
    match &decoded {
        Value::Array(items) => assert_eq!(items.borrow()[0].as_number(), Some(1.0)),
        other => panic!("unexpected root: {other:?}"),
    }
    match pending.try_result() {
        Some(Err(error)) => assert!(error.message.contains("aborted")),
        other => panic!("unexpected settlement: {other:?}"),
    }
    assert!(response.is_closed());
}

struct GatedSource {
    gate: Deferred,
    value: Value,
}

impl LazySource for GatedSource {
    fn poll_value(&self) -> LazyPoll {
        match self.gate.try_result() {
            Some(_) => LazyPoll::Ready(self.value.clone()),
            None => LazyPoll::Pending(self.gate.clone()),
        }
    }
}

#[test]
fn lazy_values_settle_after_their_dependency() {
    let (gate, gate_handle) = Deferred::new();
    let root = Value::lazy(GatedSource {
        gate,
        value: Value::string("computed late"),
    });

    let session = EncodeSession::begin(&root, EncodeOptions::default()).unwrap();
    let response = Response::new(DecodeOptions::default());
    pump(&session, &response);

    let deferred = match response.root().try_result() {
        Some(Ok(Value::Promise(deferred))) => deferred,
        other => panic!("unexpected root: {other:?}"),
    };
    assert!(deferred.is_pending());
    assert_eq!(session.pending_count(), 1);

    gate_handle.resolve(Value::Null);
    assert!(session.is_complete());
    pump(&session, &response);

    match deferred.try_result() {
        Some(Ok(value)) => assert_eq!(value.as_str(), Some("computed late")),
        other => panic!("unexpected settlement: {other:?}"),
    }
}

#[test]
fn nested_promises_settle_independently() {
    let (inner, inner_handle) = Value::promise();
    let (outer, outer_handle) = Value::promise();

    let root = Value::array(vec![outer]);
    let session = EncodeSession::begin(&root, EncodeOptions::default()).unwrap();
    let response = Response::new(DecodeOptions::default());
    pump(&session, &response);

    // The outer promise resolves to a value containing the inner one.
    outer_handle.resolve(Value::object(vec![("next".to_string(), inner)]));
    pump(&session, &response);

    let decoded = response.root().try_result().unwrap().unwrap();
    let outer_deferred = match &decoded {
        Value::Array(items) => match items.borrow()[0].clone() {
            Value::Promise(deferred) => deferred,
            other => panic!("unexpected item: {other:?}"),
        },
        other => panic!("unexpected root: {other:?}"),
    };
    let inner_deferred = match outer_deferred.try_result() {
        Some(Ok(Value::Object(entries))) => match entries.borrow()[0].1.clone() {
            Value::Promise(deferred) => deferred,
            other => panic!("unexpected entry: {other:?}"),
        },
        other => panic!("unexpected outer settlement: {other:?}"),
    };
    assert!(inner_deferred.is_pending());

    inner_handle.resolve(Value::string("deepest"));
    pump(&session, &response);
    match inner_deferred.try_result() {
        Some(Ok(value)) => assert_eq!(value.as_str(), Some("deepest")),
        other => panic!("unexpected inner settlement: {other:?}"),
    }
}

#[test]
fn settled_promise_graphs_complete_in_one_pass() {
    let root = Value::object(vec![(
        "eager".to_string(),
        Value::resolved_promise(Value::array(vec![Value::Bool(true)])),
    )]);

    let session = EncodeSession::begin(&root, EncodeOptions::default()).unwrap();
    assert!(session.is_complete());

    let response = Response::new(DecodeOptions::default());
    pump(&session, &response);

    let decoded = response.root().try_result().unwrap().unwrap();
    let deferred = match &decoded {
        Value::Object(entries) => match entries.borrow()[0].1.clone() {
            Value::Promise(deferred) => deferred,
            other => panic!("unexpected entry: {other:?}"),
        },
        other => panic!("unexpected root: {other:?}"),
    };
    match deferred.try_result() {
        Some(Ok(value)) => assert!(deep_equals(&value, &Value::array(vec![Value::Bool(true)]))),
        other => panic!("unexpected settlement: {other:?}"),
    }
}
