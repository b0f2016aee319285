//! Types related to GraphQL responses and errors.

use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use serde_json_bytes::ByteString;
use serde_json_bytes::Value;

use crate::json_ext::Object;

/// Extension code used for every failure that does not come from the RPC transport.
pub const INTERNAL_SERVER_ERROR: &str = "INTERNAL_SERVER_ERROR";

/// A [GraphQL error](https://spec.graphql.org/October2021/#sec-Errors)
/// as may be found in the `errors` field of a GraphQL [`Response`].
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct Error {
    /// The error message.
    pub message: String,

    /// The JSON path to the field in [`Response::data`] this error relates to.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub path: Option<String>,

    /// The optional GraphQL extensions for this error.
    #[serde(default, skip_serializing_if = "Object::is_empty")]
    pub extensions: Object,
}

impl Error {
    /// An error with the given message and `extensions.code`.
    pub fn new(message: impl Into<String>, code: impl Into<String>) -> Self {
        let code: String = code.into();
        let mut extensions = Object::new();
        extensions.insert(ByteString::from("code"), Value::String(ByteString::from(code)));
        Self {
            message: message.into(),
            path: None,
            extensions,
        }
    }

    /// An error that did not originate in the RPC transport.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(message, INTERNAL_SERVER_ERROR)
    }

    /// Renders a failed RPC: the extension code is the gRPC status code name.
    pub fn from_status(status: &tonic::Status) -> Self {
        Self::new(status.message(), format!("{:?}", status.code()))
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// The `extensions.code` of this error, if any.
    pub fn code(&self) -> Option<&str> {
        self.extensions.get("code").and_then(Value::as_str)
    }
}

/// Displays (only) the error message.
impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.message.fmt(f)
    }
}

/// A GraphQL response envelope.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Absent when the request failed before any data could be assembled.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub data: Option<Value>,

    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub errors: Vec<Error>,
}

impl Response {
    pub fn from_errors(errors: Vec<Error>) -> Self {
        Self { data: None, errors }
    }

    pub fn to_json(&self) -> Value {
        serde_json_bytes::to_value(self).unwrap_or_default()
    }
}
