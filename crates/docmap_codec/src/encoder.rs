//! CBOR encoder.

use crate::error::{CodecError, CodecResult};
use crate::value::Value;
use serde::Serialize;

/// Encode a value to CBOR bytes.
///
/// Maps are keyed by sorted field names, so equal values always produce
/// identical bytes. This is what makes the output usable for hashing.
///
/// # Errors
///
/// Returns an error if the underlying writer rejects the value.
pub fn to_cbor(value: &Value) -> CodecResult<Vec<u8>> {
    encode(value)
}

/// Encode any serializable type to CBOR bytes.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode<T: Serialize + ?Sized>(value: &T) -> CodecResult<Vec<u8>> {
    let mut buffer = Vec::new();
    ciborium::ser::into_writer(value, &mut buffer)
        .map_err(|e| CodecError::encoding_failed(e.to_string()))?;
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_maps_encode_identically() {
        let a = Value::map([("b", Value::from(1i64)), ("a", Value::from(2i64))]);
        let b = Value::map([("a", Value::from(2i64)), ("b", Value::from(1i64))]);
        assert_eq!(to_cbor(&a).unwrap(), to_cbor(&b).unwrap());
    }

    #[test]
    fn different_values_encode_differently() {
        let a = to_cbor(&Value::from("x")).unwrap();
        let b = to_cbor(&Value::from("y")).unwrap();
        assert_ne!(a, b);
    }
}
