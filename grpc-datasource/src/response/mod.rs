//! Turns RPC responses into GraphQL data.

use serde_json_bytes::ByteString;
use serde_json_bytes::json;

use crate::error::AssemblyError;
use crate::json_ext::Object;
use crate::json_ext::Value;
use crate::json_ext::ValueExt;
use crate::mapping::GrpcMapping;
use crate::message::ProtoMessage;
use crate::message::ProtoValue;
use crate::plan::CallKind;
use crate::plan::ONEOF_FIELD;
use crate::plan::RpcField;
use crate::plan::RpcMessage;
use crate::plan::TYPENAME;
use crate::type_mapper::DataType;
use crate::type_mapper::EnumMapper;
use crate::type_mapper::ListMetadata;

mod merge;

pub use merge::EntityIndex;
pub use merge::ResponseAssembler;

/// Field of the scalar wrapper messages used for nullable scalars.
const WRAPPER_VALUE_FIELD: &str = "value";
/// Field of a list wrapper message holding the list.
const LIST_FIELD: &str = "list";
/// Field of the inner list message holding the items.
const ITEMS_FIELD: &str = "items";

/// How an empty list read from a response is rendered.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EmptyListPolicy {
    /// Always `[]`.
    EmptyArray,
    /// `null` for an empty outermost list when that level is nullable, `[]` otherwise.
    NullForNullableList,
}

impl EmptyListPolicy {
    /// Results of `Required` and `Resolve` calls render empty nullable lists as `null`.
    pub fn for_call(kind: CallKind) -> Self {
        match kind {
            CallKind::Standard | CallKind::Entity => EmptyListPolicy::EmptyArray,
            CallKind::Required | CallKind::Resolve => EmptyListPolicy::NullForNullableList,
        }
    }
}

/// Marshals messages into GraphQL JSON following the shape of a [`RpcMessage`].
#[derive(Clone, Copy, Debug)]
pub struct JsonBuilder<'a> {
    enums: EnumMapper<'a>,
    empty_lists: EmptyListPolicy,
}

impl<'a> JsonBuilder<'a> {
    pub fn new(mapping: &'a GrpcMapping, empty_lists: EmptyListPolicy) -> Self {
        Self {
            enums: EnumMapper::new(mapping),
            empty_lists,
        }
    }

    /// Marshals a response message into a JSON object.
    pub fn marshal<M: ProtoMessage>(
        &self,
        shape: &RpcMessage,
        message: &M,
    ) -> Result<Value, AssemblyError> {
        Ok(Value::Object(self.marshal_object(shape, message, None)?))
    }

    fn marshal_object<M: ProtoMessage>(
        &self,
        shape: &RpcMessage,
        message: &M,
        concrete_type: Option<&str>,
    ) -> Result<Object, AssemblyError> {
        let mut object = Object::new();
        for field in shape.fields_for_type(concrete_type) {
            if let Some(static_value) = &field.static_value {
                let value = match concrete_type {
                    Some(concrete_type) if field.name == TYPENAME => json!(concrete_type),
                    _ => static_value.clone(),
                };
                object.insert(ByteString::from(field.json_path.as_str()), value);
                continue;
            }
            let value = self.field_value(field, message)?;
            if field.json_path.is_empty() {
                if let Value::Object(_) = value {
                    let mut merged = Value::Object(std::mem::take(&mut object));
                    merged.deep_merge(value);
                    if let Value::Object(merged) = merged {
                        object = merged;
                    }
                }
                continue;
            }
            object.insert(ByteString::from(field.json_path.as_str()), value);
        }
        Ok(object)
    }

    fn field_value<M: ProtoMessage>(
        &self,
        field: &RpcField,
        message: &M,
    ) -> Result<Value, AssemblyError> {
        let value = message.field_value(&field.name);
        if let Some(list) = &field.list_metadata {
            return self.list_value(field, list, value, 0);
        }
        match value {
            None if field.repeated => Ok(Value::Array(Vec::new())),
            None => Ok(Value::Null),
            Some(ProtoValue::List(items)) if field.repeated => Ok(Value::Array(
                items
                    .into_iter()
                    .map(|item| self.item_value(field, item))
                    .collect::<Result<_, _>>()?,
            )),
            Some(ProtoValue::List(_)) => Err(unexpected(field, "a list for a singular field")),
            Some(value) => self.item_value(field, value),
        }
    }

    /// Unwraps one level of a nested list: `{ list: { items: [...] } }`.
    fn list_value<M: ProtoMessage>(
        &self,
        field: &RpcField,
        list: &ListMetadata,
        wrapper: Option<ProtoValue<M>>,
        level: usize,
    ) -> Result<Value, AssemblyError> {
        let items = match wrapper {
            Some(ProtoValue::Message(wrapper)) => match wrapper.field_value(LIST_FIELD) {
                Some(ProtoValue::Message(list)) => match list.field_value(ITEMS_FIELD) {
                    Some(ProtoValue::List(items)) => Some(items),
                    None => Some(Vec::new()),
                    Some(_) => return Err(unexpected(field, "list items are not repeated")),
                },
                _ => None,
            },
            _ => None,
        };
        let Some(items) = items else {
            return if list.is_optional(level) {
                Ok(Value::Null)
            } else {
                Err(AssemblyError::MissingListLevel {
                    field: field.name.clone(),
                    level,
                })
            };
        };
        if items.is_empty()
            && level == 0
            && list.is_optional(0)
            && self.empty_lists == EmptyListPolicy::NullForNullableList
        {
            return Ok(Value::Null);
        }
        let values = if level + 1 >= list.nesting_level {
            items
                .into_iter()
                .map(|item| self.item_value(field, item))
                .collect::<Result<_, _>>()?
        } else {
            items
                .into_iter()
                .map(|item| self.list_value(field, list, Some(item), level + 1))
                .collect::<Result<_, _>>()?
        };
        Ok(Value::Array(values))
    }

    fn item_value<M: ProtoMessage>(
        &self,
        field: &RpcField,
        value: ProtoValue<M>,
    ) -> Result<Value, AssemblyError> {
        match value {
            ProtoValue::Message(message) if field.proto_type_name == DataType::Message => {
                match &field.message {
                    Some(shape) => self.message_value(shape, &message),
                    None => Err(unexpected(field, "a message without a selection")),
                }
            }
            // Nullable scalars are carried by wrapper messages.
            ProtoValue::Message(wrapper) => Ok(wrapper
                .field_value(WRAPPER_VALUE_FIELD)
                .map(|value| self.scalar(field, value))
                .unwrap_or(Value::Null)),
            ProtoValue::List(_) => Err(unexpected(field, "a nested list")),
            scalar => Ok(self.scalar(field, scalar)),
        }
    }

    fn message_value<M: ProtoMessage>(
        &self,
        shape: &RpcMessage,
        message: &M,
    ) -> Result<Value, AssemblyError> {
        if !shape.is_one_of() {
            return Ok(Value::Object(self.marshal_object(shape, message, None)?));
        }
        match message.oneof_case(ONEOF_FIELD) {
            Some((type_name, instance)) => Ok(Value::Object(self.marshal_object(
                shape,
                &instance,
                Some(&type_name),
            )?)),
            None => Ok(Value::Null),
        }
    }

    /// Scalars: 64-bit and unsigned integers become strings, non-finite floats and unmapped
    /// enum values become `null`.
    pub fn scalar<M>(&self, field: &RpcField, value: ProtoValue<M>) -> Value {
        match value {
            ProtoValue::Bool(value) => Value::Bool(value),
            ProtoValue::I32(value) => json!(value),
            ProtoValue::I64(value) => json!(value.to_string()),
            ProtoValue::U32(value) => json!(value.to_string()),
            ProtoValue::U64(value) => json!(value.to_string()),
            ProtoValue::F32(value) => float(f64::from(value)),
            ProtoValue::F64(value) => float(value),
            ProtoValue::String(value) if field.proto_type_name == DataType::Enum => {
                self.enum_value(field, &value)
            }
            ProtoValue::String(value) => Value::String(ByteString::from(value)),
            ProtoValue::Bytes(value) => json!(String::from_utf8_lossy(&value)),
            ProtoValue::Enum { name, .. } => name
                .map(|name| self.enum_value(field, &name))
                .unwrap_or(Value::Null),
            ProtoValue::Message(_) | ProtoValue::List(_) => Value::Null,
        }
    }

    fn enum_value(&self, field: &RpcField, target_value: &str) -> Value {
        field
            .enum_name
            .as_deref()
            .and_then(|enum_name| self.enums.to_graphql(enum_name, target_value))
            .map(|value| json!(value))
            .unwrap_or(Value::Null)
    }
}

fn float(value: f64) -> Value {
    if value.is_finite() {
        json!(value)
    } else {
        Value::Null
    }
}

fn unexpected(field: &RpcField, reason: &str) -> AssemblyError {
    AssemblyError::UnexpectedValue {
        field: field.name.clone(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::plan::OneOfType;
    use crate::test_utils::JsonMessage;
    use crate::type_mapper::LevelInfo;

    fn mapping() -> GrpcMapping {
        GrpcMapping::from_yaml(
            r#"
service: S
enum_values:
  Mood:
    - value: GRUMPY
      target_value: MOOD_GRUMPY
"#,
        )
        .unwrap()
    }

    fn builder(mapping: &GrpcMapping) -> JsonBuilder<'_> {
        JsonBuilder::new(mapping, EmptyListPolicy::EmptyArray)
    }

    fn list_field(levels: &[bool]) -> RpcField {
        RpcField {
            list_metadata: Some(ListMetadata {
                nesting_level: levels.len(),
                level_info: levels
                    .iter()
                    .map(|&optional| LevelInfo { optional })
                    .collect(),
            }),
            ..RpcField::new("values", DataType::Int32, "values")
        }
    }

    #[test]
    fn scalar_policy() {
        let mapping = mapping();
        let builder = builder(&mapping);
        let field = RpcField::new("n", DataType::Int64, "n");
        assert_eq!(builder.scalar::<JsonMessage>(&field, ProtoValue::I32(7)), json!(7));
        assert_eq!(
            builder.scalar::<JsonMessage>(&field, ProtoValue::I64(9007199254740993)),
            json!("9007199254740993")
        );
        assert_eq!(builder.scalar::<JsonMessage>(&field, ProtoValue::U32(1)), json!("1"));
        assert_eq!(builder.scalar::<JsonMessage>(&field, ProtoValue::U64(2)), json!("2"));
        assert_eq!(builder.scalar::<JsonMessage>(&field, ProtoValue::F64(1.5)), json!(1.5));
        assert_eq!(
            builder.scalar::<JsonMessage>(&field, ProtoValue::F32(f32::NAN)),
            Value::Null
        );
        assert_eq!(
            builder.scalar::<JsonMessage>(&field, ProtoValue::Bytes(b"abc".to_vec())),
            json!("abc")
        );

        let mood = RpcField {
            enum_name: Some("Mood".to_string()),
            ..RpcField::new("mood", DataType::Enum, "mood")
        };
        assert_eq!(
            builder.scalar::<JsonMessage>(
                &mood,
                ProtoValue::Enum {
                    number: 1,
                    name: Some("MOOD_GRUMPY".to_string())
                }
            ),
            json!("GRUMPY")
        );
        assert_eq!(
            builder.scalar::<JsonMessage>(
                &mood,
                ProtoValue::Enum {
                    number: 0,
                    name: Some("MOOD_UNSPECIFIED".to_string())
                }
            ),
            Value::Null
        );
    }

    #[test]
    fn wrappers_and_flattened_fields() {
        let mapping = mapping();
        let mut context = RpcMessage::new("Context");
        context.add_field(RpcField::new("id", DataType::String, "id"));
        let mut shape = RpcMessage::new("Response");
        shape.add_field(RpcField {
            optional: true,
            ..RpcField::new("nickname", DataType::String, "nickname")
        });
        shape.add_field(RpcField {
            optional: true,
            ..RpcField::new("age", DataType::Int32, "age")
        });
        shape.add_field(RpcField::message("context", "", context));
        shape.add_field(RpcField {
            repeated: true,
            ..RpcField::new("tags", DataType::String, "tags")
        });

        let message = JsonMessage::new(json!({
            "nickname": {"value": "ada"},
            "context": {"id": "1"}
        }));
        assert_eq!(
            builder(&mapping).marshal(&shape, &message).unwrap(),
            json!({"nickname": "ada", "age": null, "id": "1", "tags": []})
        );
    }

    #[test]
    fn oneof_messages_use_the_concrete_type() {
        let mapping = mapping();
        let mut animal = RpcMessage::new("Animal");
        animal.one_of_type = OneOfType::Interface;
        animal.member_types = vec!["Cat".to_string(), "Dog".to_string()];
        animal.add_field(RpcField {
            static_value: Some(json!("Animal")),
            ..RpcField::new(TYPENAME, DataType::String, TYPENAME)
        });
        animal.add_field(RpcField::new("name", DataType::String, "name"));
        animal.add_member_field("Cat", RpcField::new("meow_volume", DataType::Int32, "meowVolume"));
        animal.add_member_field("Dog", RpcField::new("bark_volume", DataType::Int32, "barkVolume"));
        let mut shape = RpcMessage::new("Response");
        shape.add_field(RpcField::repeated_message("animals", "animals", animal));

        let message = JsonMessage::new(json!({
            "animals": [
                {"instance": {"Cat": {"name": "Tom", "meow_volume": 3, "bark_volume": 9}}},
                {"instance": {"Dog": {"name": "Rex", "bark_volume": 5}}},
                {}
            ]
        }));
        assert_eq!(
            builder(&mapping).marshal(&shape, &message).unwrap(),
            json!({"animals": [
                {"__typename": "Cat", "name": "Tom", "meowVolume": 3},
                {"__typename": "Dog", "name": "Rex", "barkVolume": 5},
                null
            ]})
        );
    }

    #[test]
    fn nested_lists_unwrap_each_level() {
        let mapping = mapping();
        let mut shape = RpcMessage::new("Response");
        shape.add_field(list_field(&[true, true]));
        let message = JsonMessage::new(json!({
            "values": {"list": {"items": [
                {"list": {"items": [1, 2]}},
                {},
                {"list": {}}
            ]}}
        }));
        assert_eq!(
            builder(&mapping).marshal(&shape, &message).unwrap(),
            json!({"values": [[1, 2], null, []]})
        );
        assert_eq!(
            builder(&mapping)
                .marshal(&shape, &JsonMessage::new(json!({})))
                .unwrap(),
            json!({"values": null})
        );
    }

    #[test]
    fn missing_non_nullable_level_is_an_error() {
        let mapping = mapping();
        let mut shape = RpcMessage::new("Response");
        shape.add_field(list_field(&[false, false]));
        let message = JsonMessage::new(json!({"values": {"list": {"items": [{}]}}}));
        assert_eq!(
            builder(&mapping).marshal(&shape, &message),
            Err(AssemblyError::MissingListLevel {
                field: "values".to_string(),
                level: 1,
            })
        );
    }

    #[test]
    fn empty_list_policy() {
        let mapping = mapping();
        let mut shape = RpcMessage::new("Response");
        shape.add_field(list_field(&[true]));
        let message = JsonMessage::new(json!({"values": {"list": {"items": []}}}));
        assert_eq!(
            builder(&mapping).marshal(&shape, &message).unwrap(),
            json!({"values": []})
        );
        assert_eq!(
            JsonBuilder::new(&mapping, EmptyListPolicy::for_call(CallKind::Resolve))
                .marshal(&shape, &message)
                .unwrap(),
            json!({"values": null})
        );
    }
}
