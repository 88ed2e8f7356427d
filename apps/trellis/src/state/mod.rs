//! Shared state values and their JSON wire form.

pub mod codec;
pub mod diff;
mod value;

use thiserror::Error;

use crate::metadata::MetadataError;

pub use diff::{changed_fields, encode_delta, merge_delta};
pub use value::{StateObject, StateValue};

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("expected {expected}, found {found}")]
    TypeMismatch { expected: String, found: String },
    #[error("unknown property '{property}' on {type_name}")]
    UnknownProperty { type_name: String, property: String },
    #[error("'{constant}' is not a constant of {type_name}")]
    UnknownEnumConstant { type_name: String, constant: String },
    #[error("field '{field}': {source}")]
    Field {
        field: String,
        #[source]
        source: Box<CodecError>,
    },
    #[error(transparent)]
    Metadata(#[from] MetadataError),
    #[error("{0}")]
    Custom(String),
}

impl CodecError {
    pub(crate) fn mismatch(expected: impl Into<String>, found: &serde_json::Value) -> Self {
        let found = match found {
            serde_json::Value::Null => "null",
            serde_json::Value::Bool(_) => "boolean",
            serde_json::Value::Number(_) => "number",
            serde_json::Value::String(_) => "string",
            serde_json::Value::Array(_) => "array",
            serde_json::Value::Object(_) => "object",
        };
        CodecError::TypeMismatch {
            expected: expected.into(),
            found: found.to_owned(),
        }
    }

    pub(crate) fn in_field(self, field: &str) -> Self {
        CodecError::Field {
            field: field.to_owned(),
            source: Box::new(self),
        }
    }
}
