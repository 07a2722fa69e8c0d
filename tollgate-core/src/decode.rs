//! Response body decoding.
//!
//! The data APIs wrapped by this crate return record lists in one of two
//! shapes: a bare JSON array, or an object with a named field holding the
//! array (e.g. `{"incomeLimitsList": [...]}` or a hypermedia `_embedded`
//! wrapper). [`ResponseDecoder`] accepts either and reports *why* a body was
//! rejected instead of dropping records it cannot read.

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use thiserror::Error;

/// Error type for response decoding.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    /// The body is not JSON, or is JSON of a shape none of the strategies accept.
    #[error("unrecognized response shape: {detail}")]
    UnrecognizedShape { detail: String },

    /// The shape matched but a field had the wrong type or was missing.
    #[error("type mismatch: {detail}")]
    TypeMismatch { detail: String },
}

impl DecodeError {
    fn shape(detail: impl Into<String>) -> Self {
        Self::UnrecognizedShape {
            detail: detail.into(),
        }
    }

    fn mismatch(err: serde_json::Error) -> Self {
        Self::TypeMismatch {
            detail: err.to_string(),
        }
    }
}

/// Decode a whole body as `T`.
///
/// Syntax errors are reported as [`DecodeError::UnrecognizedShape`], schema
/// errors as [`DecodeError::TypeMismatch`].
pub fn decode_json<T: DeserializeOwned>(body: &[u8]) -> Result<T, DecodeError> {
    serde_json::from_slice(body).map_err(|e| {
        if e.is_data() {
            DecodeError::mismatch(e)
        } else {
            DecodeError::shape(e.to_string())
        }
    })
}

/// Field name used by HAL-style hypermedia responses.
const EMBEDDED_FIELD: &str = "_embedded";

/// Decodes record lists from bare or wrapped arrays.
///
/// Strategies are tried in order:
/// 1. the body is a bare array of records
/// 2. the body is an object with one of the configured wrapper fields
/// 3. the body is an object with an `_embedded` object holding an array
///    (either under a configured wrapper name or its only array field)
/// 4. optionally, the body is a single record object
///
/// # Example
///
/// ```
/// use serde::Deserialize;
/// use tollgate_core::ResponseDecoder;
///
/// #[derive(Debug, Deserialize, PartialEq)]
/// struct Tract { fips_code: String }
///
/// let decoder = ResponseDecoder::new().with_wrapper("incomeLimitsList");
/// let bare: Vec<Tract> = decoder.decode_list(br#"[{"fips_code":"51059"}]"#).unwrap();
/// let wrapped: Vec<Tract> = decoder
///     .decode_list(br#"{"incomeLimitsList":[{"fips_code":"51059"}]}"#)
///     .unwrap();
/// assert_eq!(bare, wrapped);
/// ```
#[derive(Debug, Clone)]
pub struct ResponseDecoder {
    wrappers: Vec<String>,
    embedded: bool,
    single_object: bool,
}

impl ResponseDecoder {
    /// A decoder that accepts bare arrays, `{"items": [...]}` and `_embedded` wrappers.
    pub fn new() -> Self {
        Self {
            wrappers: vec!["items".to_string()],
            embedded: true,
            single_object: false,
        }
    }

    /// Also accept arrays under `field`.
    pub fn with_wrapper(mut self, field: impl Into<String>) -> Self {
        self.wrappers.push(field.into());
        self
    }

    /// Accept or ignore `_embedded` wrappers.
    pub fn with_embedded(mut self, enabled: bool) -> Self {
        self.embedded = enabled;
        self
    }

    /// Treat a lone record object as a one-element list.
    pub fn with_single_object(mut self, enabled: bool) -> Self {
        self.single_object = enabled;
        self
    }

    /// Decode a list of records.
    pub fn decode_list<T: DeserializeOwned>(&self, body: &[u8]) -> Result<Vec<T>, DecodeError> {
        let direct_error = match serde_json::from_slice::<Vec<T>>(body) {
            Ok(records) => return Ok(records),
            Err(e) => e,
        };

        let value: Value = serde_json::from_slice(body)
            .map_err(|e| DecodeError::shape(format!("body is not valid JSON: {}", e)))?;

        match value {
            // Right shape, wrong records.
            Value::Array(_) => Err(DecodeError::mismatch(direct_error)),
            Value::Object(map) => self.decode_object(map),
            other => Err(DecodeError::shape(format!(
                "expected an array or object, found {}",
                json_kind(&other)
            ))),
        }
    }

    fn decode_object<T: DeserializeOwned>(&self, map: Map<String, Value>) -> Result<Vec<T>, DecodeError> {
        for field in &self.wrappers {
            if let Some(inner) = map.get(field) {
                if inner.is_array() {
                    return records_from(inner.clone());
                }
            }
        }

        if self.embedded {
            if let Some(Value::Object(embedded)) = map.get(EMBEDDED_FIELD) {
                if let Some(inner) = self.embedded_array(embedded) {
                    return records_from(inner.clone());
                }
            }
        }

        let keys: Vec<String> = map.keys().cloned().collect();
        if self.single_object {
            let record = serde_json::from_value::<T>(Value::Object(map))
                .map_err(DecodeError::mismatch)?;
            return Ok(vec![record]);
        }

        Err(DecodeError::shape(format!(
            "object has no array under {:?} (found keys {:?})",
            self.wrappers, keys
        )))
    }

    fn embedded_array<'a>(&self, embedded: &'a Map<String, Value>) -> Option<&'a Value> {
        for field in &self.wrappers {
            if let Some(inner) = embedded.get(field).filter(|v| v.is_array()) {
                return Some(inner);
            }
        }

        let mut arrays = embedded.values().filter(|v| v.is_array());
        match (arrays.next(), arrays.next()) {
            (Some(only), None) => Some(only),
            _ => None,
        }
    }
}

impl Default for ResponseDecoder {
    fn default() -> Self {
        Self::new()
    }
}

fn records_from<T: DeserializeOwned>(array: Value) -> Result<Vec<T>, DecodeError> {
    serde_json::from_value(array).map_err(DecodeError::mismatch)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Record {
        id: u32,
        name: String,
    }

    const BARE: &[u8] = br#"[{"id":1,"name":"a"},{"id":2,"name":"b"}]"#;
    const ITEMS: &[u8] = br#"{"items":[{"id":1,"name":"a"},{"id":2,"name":"b"}]}"#;

    fn expected() -> Vec<Record> {
        vec![
            Record { id: 1, name: "a".to_string() },
            Record { id: 2, name: "b".to_string() },
        ]
    }

    #[test]
    fn test_bare_and_wrapped_decode_identically() {
        let decoder = ResponseDecoder::new();
        let bare: Vec<Record> = decoder.decode_list(BARE).unwrap();
        let wrapped: Vec<Record> = decoder.decode_list(ITEMS).unwrap();
        assert_eq!(bare, expected());
        assert_eq!(wrapped, expected());
    }

    #[test]
    fn test_named_wrapper() {
        let decoder = ResponseDecoder::new().with_wrapper("incomeLimitsList");
        let body = br#"{"incomeLimitsList":[{"id":1,"name":"a"},{"id":2,"name":"b"}]}"#;
        let records: Vec<Record> = decoder.decode_list(body).unwrap();
        assert_eq!(records, expected());
    }

    #[test]
    fn test_embedded_wrapper() {
        let decoder = ResponseDecoder::new();
        let body = br#"{"_embedded":{"records":[{"id":1,"name":"a"},{"id":2,"name":"b"}]},"_links":{}}"#;
        let records: Vec<Record> = decoder.decode_list(body).unwrap();
        assert_eq!(records, expected());
    }

    #[test]
    fn test_embedded_disabled() {
        let decoder = ResponseDecoder::new().with_embedded(false);
        let body = br#"{"_embedded":{"records":[]}}"#;
        let result = decoder.decode_list::<Record>(body);
        assert!(matches!(result, Err(DecodeError::UnrecognizedShape { .. })));
    }

    #[test]
    fn test_bad_record_is_type_mismatch_not_dropped() {
        let decoder = ResponseDecoder::new();
        let body = br#"[{"id":1,"name":"a"},{"id":"two","name":"b"}]"#;
        let result = decoder.decode_list::<Record>(body);
        assert!(matches!(result, Err(DecodeError::TypeMismatch { .. })));

        let body = br#"{"items":[{"id":1}]}"#;
        let result = decoder.decode_list::<Record>(body);
        assert!(matches!(result, Err(DecodeError::TypeMismatch { .. })));
    }

    #[test]
    fn test_unknown_object_is_unrecognized() {
        let decoder = ResponseDecoder::new();
        let result = decoder.decode_list::<Record>(br#"{"data":[{"id":1,"name":"a"}]}"#);
        match result {
            Err(DecodeError::UnrecognizedShape { detail }) => assert!(detail.contains("data")),
            other => panic!("expected unrecognized shape, got {:?}", other),
        }
    }

    #[test]
    fn test_invalid_json_and_scalars() {
        let decoder = ResponseDecoder::new();
        assert!(matches!(
            decoder.decode_list::<Record>(b"Internal Server Error"),
            Err(DecodeError::UnrecognizedShape { .. })
        ));
        assert!(matches!(
            decoder.decode_list::<Record>(b"42"),
            Err(DecodeError::UnrecognizedShape { .. })
        ));
    }

    #[test]
    fn test_single_object() {
        let decoder = ResponseDecoder::new().with_single_object(true);
        let records: Vec<Record> = decoder.decode_list(br#"{"id":7,"name":"solo"}"#).unwrap();
        assert_eq!(records, vec![Record { id: 7, name: "solo".to_string() }]);
    }

    #[test]
    fn test_empty_array() {
        let records: Vec<Record> = ResponseDecoder::new().decode_list(b"[]").unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn test_decode_json_classifies_errors() {
        assert!(matches!(
            decode_json::<Record>(b"{not json"),
            Err(DecodeError::UnrecognizedShape { .. })
        ));
        assert!(matches!(
            decode_json::<Record>(br#"{"id":"x","name":"a"}"#),
            Err(DecodeError::TypeMismatch { .. })
        ));
        assert_eq!(
            decode_json::<Record>(br#"{"id":3,"name":"c"}"#).unwrap(),
            Record { id: 3, name: "c".to_string() }
        );
    }
}
