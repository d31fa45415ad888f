//! The value classifier.
//!
//! [`classify`] decides, once per value, which wire representation applies.
//! The encoder routes on the result and the decoder dispatches on the row
//! tag it produced — neither side ever guesses from structure.

use flightwire_row::RowTag;
use flightwire_value::Value;

/// Which wire representation applies to a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireClass {
    /// Cheap scalar, inlined directly into the parent's payload.
    Inline,
    /// Emitted as its own row with the given tag, referenced by `$id`.
    Outline(RowTag),
    /// Placeholder row now, follow-up row when the value settles.
    Promise,
    /// Two-phase synchronous read with bounded retries.
    Lazy,
    /// No wire representation of its own: module mapping or
    /// temporary-reference handle, otherwise a classification error.
    Opaque,
}

/// Classify a value. Pure and total over the supported universe.
pub fn classify(value: &Value) -> WireClass {
    match value {
        Value::Undefined
        | Value::Null
        | Value::Bool(_)
        | Value::Number(_)
        | Value::BigInt(_)
        | Value::String(_)
        | Value::Date(_) => WireClass::Inline,
        Value::Array(_) | Value::Object(_) => WireClass::Outline(RowTag::Json),
        Value::Map(_) => WireClass::Outline(RowTag::Map),
        Value::Set(_) => WireClass::Outline(RowTag::Set),
        Value::Buffer(_) => WireClass::Outline(RowTag::Buffer),
        Value::View(_) => WireClass::Outline(RowTag::View),
        Value::FormData(_) => WireClass::Outline(RowTag::FormData),
        Value::Blob(_) => WireClass::Outline(RowTag::BinaryPart),
        Value::Iterator(_) => WireClass::Outline(RowTag::Sequence),
        Value::Error(_) => WireClass::Outline(RowTag::Error),
        Value::Promise(_) => WireClass::Promise,
        Value::Lazy(_) => WireClass::Lazy,
        Value::Opaque(_) => WireClass::Opaque,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalars_are_inline() {
        for value in [
            Value::Undefined,
            Value::Null,
            Value::Bool(true),
            Value::Number(-0.0),
            Value::bigint("9007199254740993"),
            Value::string("hello"),
            Value::Date(0.0),
        ] {
            assert_eq!(classify(&value), WireClass::Inline);
        }
    }

    #[test]
    fn containers_and_special_kinds_outline() {
        assert_eq!(
            classify(&Value::array(vec![])),
            WireClass::Outline(RowTag::Json)
        );
        assert_eq!(
            classify(&Value::object(vec![])),
            WireClass::Outline(RowTag::Json)
        );
        assert_eq!(classify(&Value::map(vec![])), WireClass::Outline(RowTag::Map));
        assert_eq!(classify(&Value::set(vec![])), WireClass::Outline(RowTag::Set));
        assert_eq!(
            classify(&Value::buffer(vec![1, 2, 3])),
            WireClass::Outline(RowTag::Buffer)
        );
        assert_eq!(
            classify(&Value::form_data(vec![])),
            WireClass::Outline(RowTag::FormData)
        );
        assert_eq!(
            classify(&Value::blob("a", "text/plain", vec![])),
            WireClass::Outline(RowTag::BinaryPart)
        );
        assert_eq!(
            classify(&Value::error("boom")),
            WireClass::Outline(RowTag::Error)
        );
        assert_eq!(
            classify(&Value::iterator(std::iter::empty())),
            WireClass::Outline(RowTag::Sequence)
        );
    }

    #[test]
    fn async_and_live_kinds() {
        let (promise, _handle) = Value::promise();
        assert_eq!(classify(&promise), WireClass::Promise);
        assert_eq!(classify(&Value::opaque(42u8)), WireClass::Opaque);
    }
}
