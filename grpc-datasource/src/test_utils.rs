use serde_json_bytes::Value;

use crate::json_ext::Object;
use crate::message::ProtoMessage;
use crate::message::ProtoValue;

/// An in-memory message backed by a JSON object.
///
/// Integers that fit are read as `int32`, other numbers as `int64` or `double`. A oneof is an
/// object with a single key naming the concrete message type:
/// `{"instance": {"Cat": {"name": "Tom"}}}`.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct JsonMessage(pub(crate) Object);

impl JsonMessage {
    pub(crate) fn new(value: Value) -> Self {
        match value {
            Value::Object(object) => Self(object),
            _ => Self(Object::new()),
        }
    }
}

fn to_proto(value: &Value) -> Option<ProtoValue<JsonMessage>> {
    let value = match value {
        Value::Null => return None,
        Value::Bool(value) => ProtoValue::Bool(*value),
        Value::Number(number) => match (number.as_i64(), number.as_f64()) {
            (Some(int), _) => match i32::try_from(int) {
                Ok(int) => ProtoValue::I32(int),
                Err(_) => ProtoValue::I64(int),
            },
            (None, Some(float)) => ProtoValue::F64(float),
            (None, None) => return None,
        },
        Value::String(string) => ProtoValue::String(string.as_str().to_string()),
        Value::Array(items) => ProtoValue::List(items.iter().filter_map(to_proto).collect()),
        Value::Object(object) => ProtoValue::Message(JsonMessage(object.clone())),
    };
    Some(value)
}

impl ProtoMessage for JsonMessage {
    fn field_value(&self, name: &str) -> Option<ProtoValue<Self>> {
        self.0.get(name).and_then(to_proto)
    }

    fn oneof_case(&self, oneof: &str) -> Option<(String, Self)> {
        let Some(Value::Object(case)) = self.0.get(oneof) else {
            return None;
        };
        case.iter().next().and_then(|(type_name, value)| match value {
            Value::Object(message) => Some((type_name.as_str().to_string(), JsonMessage(message.clone()))),
            _ => None,
        })
    }
}
