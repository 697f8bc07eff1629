//! Built-in converters.

use super::TypeConverter;
use crate::error::{CoreError, CoreResult};
use docmap_codec::{from_cbor, to_cbor, Value};

/// Booleans. Integers map to `n != 0`, strings to anything but `""`, `"0"`
/// and `"false"`.
#[derive(Debug, Default, Clone, Copy)]
pub struct BooleanType;

impl BooleanType {
    fn convert(value: &Value) -> CoreResult<Value> {
        match value {
            Value::Bool(b) => Ok(Value::Bool(*b)),
            Value::Integer(n) => Ok(Value::Bool(*n != 0)),
            Value::Text(s) => Ok(Value::Bool(!matches!(s.as_str(), "" | "0" | "false"))),
            other => Err(CoreError::conversion("boolean", other.kind())),
        }
    }
}

impl TypeConverter for BooleanType {
    fn to_store(&self, value: &Value) -> CoreResult<Value> {
        Self::convert(value)
    }

    fn to_native(&self, value: &Value) -> CoreResult<Value> {
        Self::convert(value)
    }

    fn to_store_template(&self) -> &str {
        "%to% = (bool) %from%;"
    }

    fn to_native_template(&self) -> &str {
        "%to% = (bool) %from%;"
    }
}

/// 64-bit integers. Floats are truncated, strings parsed.
///
/// Floats that are not finite or fall outside the `i64` range are rejected.
#[derive(Debug, Default, Clone, Copy)]
pub struct IntegerType;

impl IntegerType {
    fn convert(value: &Value) -> CoreResult<Value> {
        match value {
            Value::Integer(n) => Ok(Value::Integer(*n)),
            Value::Float(f) => {
                let whole = f.trunc();
                // i64::MIN is exactly -2^63; i64::MAX rounds up to 2^63.
                #[allow(clippy::cast_precision_loss)]
                let (low, high) = (i64::MIN as f64, i64::MAX as f64);
                if whole.is_finite() && whole >= low && whole < high {
                    #[allow(clippy::cast_possible_truncation)]
                    let n = whole as i64;
                    Ok(Value::Integer(n))
                } else {
                    Err(CoreError::conversion("integer", "float"))
                }
            }
            Value::Bool(b) => Ok(Value::Integer(i64::from(*b))),
            Value::Text(s) => s
                .trim()
                .parse()
                .map(Value::Integer)
                .map_err(|_| CoreError::conversion("integer", "text")),
            other => Err(CoreError::conversion("integer", other.kind())),
        }
    }
}

impl TypeConverter for IntegerType {
    fn to_store(&self, value: &Value) -> CoreResult<Value> {
        Self::convert(value)
    }

    fn to_native(&self, value: &Value) -> CoreResult<Value> {
        Self::convert(value)
    }

    fn to_store_template(&self) -> &str {
        "%to% = (int) %from%;"
    }

    fn to_native_template(&self) -> &str {
        "%to% = (int) %from%;"
    }
}

/// Double precision floats.
#[derive(Debug, Default, Clone, Copy)]
pub struct FloatType;

impl FloatType {
    fn convert(value: &Value) -> CoreResult<Value> {
        match value {
            Value::Float(f) => Ok(Value::Float(*f)),
            #[allow(clippy::cast_precision_loss)]
            Value::Integer(n) => Ok(Value::Float(*n as f64)),
            Value::Text(s) => s
                .trim()
                .parse()
                .map(Value::Float)
                .map_err(|_| CoreError::conversion("float", "text")),
            other => Err(CoreError::conversion("float", other.kind())),
        }
    }
}

impl TypeConverter for FloatType {
    fn to_store(&self, value: &Value) -> CoreResult<Value> {
        Self::convert(value)
    }

    fn to_native(&self, value: &Value) -> CoreResult<Value> {
        Self::convert(value)
    }

    fn to_store_template(&self) -> &str {
        "%to% = (float) %from%;"
    }

    fn to_native_template(&self) -> &str {
        "%to% = (float) %from%;"
    }
}

/// Text. Scalars are rendered with their display form.
#[derive(Debug, Default, Clone, Copy)]
pub struct StringType;

impl StringType {
    fn convert(value: &Value) -> CoreResult<Value> {
        match value {
            Value::Text(s) => Ok(Value::Text(s.clone())),
            Value::Integer(n) => Ok(Value::Text(n.to_string())),
            Value::Float(f) => Ok(Value::Text(f.to_string())),
            Value::Bool(b) => Ok(Value::Text(b.to_string())),
            Value::Id(id) => Ok(Value::Text(id.to_string())),
            other => Err(CoreError::conversion("string", other.kind())),
        }
    }
}

impl TypeConverter for StringType {
    fn to_store(&self, value: &Value) -> CoreResult<Value> {
        Self::convert(value)
    }

    fn to_native(&self, value: &Value) -> CoreResult<Value> {
        Self::convert(value)
    }

    fn to_store_template(&self) -> &str {
        "%to% = (string) %from%;"
    }

    fn to_native_template(&self) -> &str {
        "%to% = (string) %from%;"
    }
}

/// Points in time.
///
/// Stored and native forms are both timestamps in milliseconds; integers
/// given natively are read as Unix seconds.
#[derive(Debug, Default, Clone, Copy)]
pub struct DateType;

impl TypeConverter for DateType {
    fn to_store(&self, value: &Value) -> CoreResult<Value> {
        match value {
            Value::Timestamp(ms) => Ok(Value::Timestamp(*ms)),
            Value::Integer(secs) => secs
                .checked_mul(1000)
                .map(Value::Timestamp)
                .ok_or_else(|| CoreError::conversion("date", "integer")),
            other => Err(CoreError::conversion("date", other.kind())),
        }
    }

    fn to_native(&self, value: &Value) -> CoreResult<Value> {
        match value {
            Value::Timestamp(ms) => Ok(Value::Timestamp(*ms)),
            other => Err(CoreError::conversion("date", other.kind())),
        }
    }

    fn to_store_template(&self) -> &str {
        "%to% = to_timestamp(%from%);"
    }

    fn to_native_template(&self) -> &str {
        "%to% = from_timestamp(%from%);"
    }
}

/// Binary data. Text is stored as its UTF-8 bytes.
#[derive(Debug, Default, Clone, Copy)]
pub struct BinDataType;

impl TypeConverter for BinDataType {
    fn to_store(&self, value: &Value) -> CoreResult<Value> {
        match value {
            Value::Bytes(b) => Ok(Value::Bytes(b.clone())),
            Value::Text(s) => Ok(Value::Bytes(s.clone().into_bytes())),
            other => Err(CoreError::conversion("bin_data", other.kind())),
        }
    }

    fn to_native(&self, value: &Value) -> CoreResult<Value> {
        match value {
            Value::Bytes(b) => Ok(Value::Bytes(b.clone())),
            other => Err(CoreError::conversion("bin_data", other.kind())),
        }
    }

    fn to_store_template(&self) -> &str {
        "%to% = bin_data(%from%);"
    }

    fn to_native_template(&self) -> &str {
        "%to% = %from%.bin;"
    }
}

/// Values stored as they are.
#[derive(Debug, Default, Clone, Copy)]
pub struct RawType;

impl TypeConverter for RawType {
    fn to_store(&self, value: &Value) -> CoreResult<Value> {
        Ok(value.clone())
    }

    fn to_native(&self, value: &Value) -> CoreResult<Value> {
        Ok(value.clone())
    }

    fn to_store_template(&self) -> &str {
        "%to% = %from%;"
    }

    fn to_native_template(&self) -> &str {
        "%to% = %from%;"
    }
}

/// Arbitrary values stored as CBOR bytes.
#[derive(Debug, Default, Clone, Copy)]
pub struct SerializedType;

impl TypeConverter for SerializedType {
    fn to_store(&self, value: &Value) -> CoreResult<Value> {
        Ok(Value::Bytes(to_cbor(value)?))
    }

    fn to_native(&self, value: &Value) -> CoreResult<Value> {
        match value {
            Value::Bytes(bytes) => Ok(from_cbor(bytes)?),
            other => Err(CoreError::conversion("serialized", other.kind())),
        }
    }

    fn to_store_template(&self) -> &str {
        "%to% = serialize(%from%);"
    }

    fn to_native_template(&self) -> &str {
        "%to% = unserialize(%from%);"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boolean_conversions() {
        let t = BooleanType;
        assert_eq!(t.to_store(&Value::Integer(0)).unwrap(), Value::Bool(false));
        assert_eq!(t.to_store(&Value::Integer(3)).unwrap(), Value::Bool(true));
        assert_eq!(t.to_store(&Value::from("false")).unwrap(), Value::Bool(false));
        assert_eq!(t.to_native(&Value::from("yes")).unwrap(), Value::Bool(true));
        assert!(t.to_store(&Value::Bytes(vec![1])).is_err());
    }

    #[test]
    fn integer_conversions() {
        let t = IntegerType;
        assert_eq!(t.to_store(&Value::Float(3.9)).unwrap(), Value::Integer(3));
        assert_eq!(t.to_store(&Value::from(" 12 ")).unwrap(), Value::Integer(12));
        assert_eq!(t.to_native(&Value::Bool(true)).unwrap(), Value::Integer(1));
        assert!(matches!(
            t.to_store(&Value::from("twelve")),
            Err(CoreError::Conversion { .. })
        ));
    }

    #[test]
    fn integer_rejects_unrepresentable_floats() {
        let t = IntegerType;
        for f in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY, 1e30, -1e30, 9.3e18] {
            assert!(
                matches!(t.to_store(&Value::Float(f)), Err(CoreError::Conversion { .. })),
                "{f}"
            );
        }
        assert_eq!(t.to_store(&Value::Float(-2.7)).unwrap(), Value::Integer(-2));
        assert_eq!(
            t.to_native(&Value::Float(-9_223_372_036_854_775_808.0)).unwrap(),
            Value::Integer(i64::MIN)
        );
    }

    #[test]
    fn float_conversions() {
        let t = FloatType;
        assert_eq!(t.to_store(&Value::Integer(2)).unwrap(), Value::Float(2.0));
        assert_eq!(t.to_native(&Value::from("1.5")).unwrap(), Value::Float(1.5));
    }

    #[test]
    fn string_conversions() {
        let t = StringType;
        assert_eq!(t.to_store(&Value::Integer(7)).unwrap(), Value::from("7"));
        assert_eq!(t.to_native(&Value::Bool(true)).unwrap(), Value::from("true"));
        assert!(t.to_store(&Value::Array(vec![])).is_err());
    }

    #[test]
    fn date_reads_seconds() {
        let t = DateType;
        assert_eq!(
            t.to_store(&Value::Integer(1_700_000_000)).unwrap(),
            Value::Timestamp(1_700_000_000_000)
        );
        assert_eq!(t.to_native(&Value::Timestamp(5)).unwrap(), Value::Timestamp(5));
        assert!(t.to_store(&Value::Integer(i64::MAX)).is_err());
    }

    #[test]
    fn bin_data_accepts_text() {
        let t = BinDataType;
        assert_eq!(
            t.to_store(&Value::from("ab")).unwrap(),
            Value::Bytes(b"ab".to_vec())
        );
    }

    #[test]
    fn serialized_round_trips_nested_values() {
        let t = SerializedType;
        let value = Value::map([("tags", Value::Array(vec![Value::from("a")]))]);
        let stored = t.to_store(&value).unwrap();
        assert!(stored.as_bytes().is_some());
        assert_eq!(t.to_native(&stored).unwrap(), value);
    }

    #[test]
    fn raw_is_identity() {
        let value = Value::map([("k", Value::Integer(1))]);
        assert_eq!(RawType.to_store(&value).unwrap(), value);
        assert_eq!(RawType.to_native(&value).unwrap(), value);
    }
}
