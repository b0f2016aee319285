//! Reflective access to RPC messages.
//!
//! The response side only needs to read fields by name, so it is written against the small
//! [`ProtoMessage`] capability rather than a concrete protobuf runtime. The implementation for
//! [`prost_reflect::DynamicMessage`] is the one used with real services.

use std::borrow::Cow;

use prost_reflect::DynamicMessage;
use prost_reflect::Kind;
use prost_reflect::MessageDescriptor;
use prost_reflect::ReflectMessage;
use prost_reflect::Value as ReflectValue;

use crate::json_ext::Value;

/// A field value read from a message.
#[derive(Clone, Debug, PartialEq)]
pub enum ProtoValue<M> {
    Bool(bool),
    I32(i32),
    I64(i64),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
    String(String),
    Bytes(Vec<u8>),
    /// An enum value; `name` is absent when the number is not declared by the enum.
    Enum {
        number: i32,
        name: Option<String>,
    },
    Message(M),
    List(Vec<ProtoValue<M>>),
}

impl<M> ProtoValue<M> {
    pub fn is_list(&self) -> bool {
        matches!(self, ProtoValue::List(_))
    }

    pub fn is_message(&self) -> bool {
        matches!(self, ProtoValue::Message(_))
    }
}

pub trait ProtoMessage: Sized {
    /// The value of a field, or `None` when the field is unset or unknown.
    ///
    /// Repeated fields are always set, possibly to an empty list.
    fn field_value(&self, name: &str) -> Option<ProtoValue<Self>>;

    /// The message type name and value of the case set on the oneof `oneof`.
    fn oneof_case(&self, oneof: &str) -> Option<(String, Self)>;
}

impl ProtoMessage for DynamicMessage {
    fn field_value(&self, name: &str) -> Option<ProtoValue<Self>> {
        let field = self.descriptor().get_field_by_name(name)?;
        if field.supports_presence() && !self.has_field(&field) {
            return None;
        }
        let value: Cow<'_, ReflectValue> = self.get_field(&field);
        from_reflect(&value, &field.kind())
    }

    fn oneof_case(&self, oneof: &str) -> Option<(String, Self)> {
        let oneof = self
            .descriptor()
            .oneofs()
            .find(|descriptor| descriptor.name() == oneof)?;
        oneof
            .fields()
            .filter(|field| self.has_field(field))
            .find_map(|field| match self.get_field(&field).as_ref() {
                ReflectValue::Message(message) => {
                    Some((message.descriptor().name().to_string(), message.clone()))
                }
                _ => None,
            })
    }
}

fn from_reflect(value: &ReflectValue, kind: &Kind) -> Option<ProtoValue<DynamicMessage>> {
    let value = match value {
        ReflectValue::Bool(value) => ProtoValue::Bool(*value),
        ReflectValue::I32(value) => ProtoValue::I32(*value),
        ReflectValue::I64(value) => ProtoValue::I64(*value),
        ReflectValue::U32(value) => ProtoValue::U32(*value),
        ReflectValue::U64(value) => ProtoValue::U64(*value),
        ReflectValue::F32(value) => ProtoValue::F32(*value),
        ReflectValue::F64(value) => ProtoValue::F64(*value),
        ReflectValue::String(value) => ProtoValue::String(value.clone()),
        ReflectValue::Bytes(value) => ProtoValue::Bytes(value.to_vec()),
        ReflectValue::EnumNumber(number) => ProtoValue::Enum {
            number: *number,
            name: kind
                .as_enum()
                .and_then(|descriptor| descriptor.get_value(*number))
                .map(|value| value.name().to_string()),
        },
        ReflectValue::Message(message) => ProtoValue::Message(message.clone()),
        ReflectValue::List(items) => ProtoValue::List(
            items
                .iter()
                .filter_map(|item| from_reflect(item, kind))
                .collect(),
        ),
        ReflectValue::Map(_) => return None,
    };
    Some(value)
}

/// Encodes a proto3 JSON request payload into a message of the given type.
pub fn encode_request(
    descriptor: MessageDescriptor,
    request: &Value,
) -> Result<DynamicMessage, serde_json::Error> {
    let request = serde_json::to_value(request)?;
    DynamicMessage::deserialize(descriptor, request)
}
