//! # docmap Codec
//!
//! Value model and encoding for docmap.
//!
//! This crate provides:
//! - [`Value`], the dynamic value stored in entity fields and raw records
//! - [`ObjectId`], the identifier of persisted root documents
//! - CBOR encoding/decoding used by the serialized type converter, the file
//!   cache and query fingerprints
//!
//! ## Usage
//!
//! ```
//! use docmap_codec::{from_cbor, to_cbor, Value};
//!
//! let value = Value::map([("title", Value::from("hello"))]);
//! let bytes = to_cbor(&value).unwrap();
//! let decoded = from_cbor(&bytes).unwrap();
//! assert_eq!(value, decoded);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod decoder;
mod encoder;
mod error;
mod id;
mod value;

pub use decoder::{decode, from_cbor};
pub use encoder::{encode, to_cbor};
pub use error::{CodecError, CodecResult};
pub use id::ObjectId;
pub use value::{Map, Value};

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn leaf() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(Value::Integer),
            "[a-z]{0,12}".prop_map(Value::Text),
            prop::collection::vec(any::<u8>(), 0..16).prop_map(Value::Bytes),
            any::<i64>().prop_map(Value::Timestamp),
            prop::array::uniform16(any::<u8>()).prop_map(|b| Value::Id(ObjectId::from_bytes(b))),
        ]
    }

    fn document() -> impl Strategy<Value = Value> {
        leaf().prop_recursive(3, 24, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
                prop::collection::btree_map("[a-z]{1,6}", inner, 0..4).prop_map(Value::Map),
            ]
        })
    }

    proptest! {
        #[test]
        fn documents_survive_encoding(value in document()) {
            let bytes = to_cbor(&value).unwrap();
            prop_assert_eq!(from_cbor(&bytes).unwrap(), value);
        }
    }

    #[test]
    fn floats_are_preserved() {
        let value = Value::map([("ratio", Value::Float(0.25))]);
        let bytes = to_cbor(&value).unwrap();
        assert_eq!(from_cbor(&bytes).unwrap(), value);
    }
}
