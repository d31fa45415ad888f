//! Structural deep equality over [`Value`] graphs.
//!
//! Numeric comparison is `Object.is`-style: `NaN` equals `NaN`, and `-0`
//! does not equal `0`. Promise values compare by settled outcome; live-only
//! kinds (lazy, iterator, opaque) compare by identity because they have no
//! comparable structure.

use crate::value::{FormEntry, Value};

/// `Object.is`-style numeric equality.
pub fn number_equals(a: f64, b: f64) -> bool {
    if a.is_nan() || b.is_nan() {
        return a.is_nan() && b.is_nan();
    }
    a == b && a.is_sign_positive() == b.is_sign_positive()
}

/// Structural deep equality between two value graphs.
pub fn deep_equals(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Number(x), Value::Number(y)) => number_equals(*x, *y),
        (Value::BigInt(x), Value::BigInt(y)) => x == y,
        (Value::String(x), Value::String(y)) => x == y,
        (Value::Date(x), Value::Date(y)) => number_equals(*x, *y),
        (Value::Array(x), Value::Array(y)) => {
            let (x, y) = (x.borrow(), y.borrow());
            x.len() == y.len() && x.iter().zip(y.iter()).all(|(a, b)| deep_equals(a, b))
        }
        (Value::Object(x), Value::Object(y)) => {
            let (x, y) = (x.borrow(), y.borrow());
            x.len() == y.len()
                && x.iter()
                    .zip(y.iter())
                    .all(|((ka, va), (kb, vb))| ka == kb && deep_equals(va, vb))
        }
        (Value::Map(x), Value::Map(y)) => {
            let (x, y) = (x.borrow(), y.borrow());
            x.len() == y.len()
                && x.iter()
                    .zip(y.iter())
                    .all(|((ka, va), (kb, vb))| deep_equals(ka, kb) && deep_equals(va, vb))
        }
        (Value::Set(x), Value::Set(y)) => {
            let (x, y) = (x.borrow(), y.borrow());
            x.len() == y.len() && x.iter().zip(y.iter()).all(|(a, b)| deep_equals(a, b))
        }
        (Value::Buffer(x), Value::Buffer(y)) => x == y,
        (Value::View(x), Value::View(y)) => {
            x.kind == y.kind
                && x.byte_offset == y.byte_offset
                && x.length == y.length
                && x.buffer == y.buffer
        }
        (Value::FormData(x), Value::FormData(y)) => {
            x.len() == y.len()
                && x.iter().zip(y.iter()).all(|((ka, va), (kb, vb))| {
                    ka == kb
                        && match (va, vb) {
                            (FormEntry::Text(a), FormEntry::Text(b)) => a == b,
                            (FormEntry::Blob(a), FormEntry::Blob(b)) => a == b,
                            _ => false,
                        }
                })
        }
        (Value::Blob(x), Value::Blob(y)) => x == y,
        (Value::Error(x), Value::Error(y)) => x == y,
        (Value::Promise(x), Value::Promise(y)) => match (x.try_result(), y.try_result()) {
            (Some(Ok(a)), Some(Ok(b))) => deep_equals(&a, &b),
            (Some(Err(a)), Some(Err(b))) => a == b,
            _ => x.ptr_eq(y),
        },
        (Value::Lazy(x), Value::Lazy(y)) => {
            std::rc::Rc::as_ptr(x) as *const () == std::rc::Rc::as_ptr(y) as *const ()
        }
        (Value::Iterator(x), Value::Iterator(y)) => x.identity_key() == y.identity_key(),
        (Value::Opaque(x), Value::Opaque(y)) => x.ptr_eq(y),
        _ => false,
    }
}
