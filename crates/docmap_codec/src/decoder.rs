//! CBOR decoder.

use crate::error::{CodecError, CodecResult};
use crate::value::Value;
use serde::de::DeserializeOwned;

/// Decode a value from CBOR bytes.
///
/// # Errors
///
/// Returns an error if the bytes are not valid CBOR or do not describe a
/// [`Value`].
pub fn from_cbor(bytes: &[u8]) -> CodecResult<Value> {
    decode(bytes)
}

/// Decode any deserializable type from CBOR bytes.
///
/// # Errors
///
/// Returns an error if deserialization fails.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> CodecResult<T> {
    if bytes.is_empty() {
        return Err(CodecError::decoding_failed("empty input"));
    }
    ciborium::de::from_reader(bytes).map_err(|e| CodecError::decoding_failed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_fails() {
        assert!(matches!(
            from_cbor(&[]),
            Err(CodecError::DecodingFailed { .. })
        ));
    }

    #[test]
    fn truncated_input_fails() {
        let bytes = crate::to_cbor(&Value::from("truncate me")).unwrap();
        assert!(from_cbor(&bytes[..bytes.len() - 3]).is_err());
    }
}
