//! Builds the proto3 JSON payload of each call from the GraphQL variables and the data
//! assembled by earlier calls.

use serde_json_bytes::ByteString;
use tracing::trace;

use crate::error::RequestError;
use crate::json_ext::Object;
use crate::json_ext::Path;
use crate::json_ext::Value;
use crate::json_ext::ValueExt;
use crate::mapping::GrpcMapping;
use crate::plan::CONTEXT_FIELD;
use crate::plan::CallKind;
use crate::plan::FIELD_ARGS_FIELD;
use crate::plan::KEYS_FIELD;
use crate::plan::REPRESENTATIONS;
use crate::plan::RpcCall;
use crate::plan::RpcField;
use crate::plan::RpcMessage;
use crate::plan::TYPENAME;
use crate::type_mapper::DataType;
use crate::type_mapper::EnumMapper;
use crate::type_mapper::ListMetadata;

#[derive(Clone, Copy, Debug)]
pub struct RequestBuilder<'a> {
    enums: EnumMapper<'a>,
}

impl<'a> RequestBuilder<'a> {
    pub fn new(mapping: &'a GrpcMapping) -> Self {
        Self {
            enums: EnumMapper::new(mapping),
        }
    }

    /// The request payload of `call`.
    ///
    /// `data` is the response assembled so far; only field resolver calls read it.
    pub fn build(
        &self,
        call: &RpcCall,
        variables: &Value,
        data: &Value,
    ) -> Result<Value, RequestError> {
        trace!(call = call.id, kind = %call.kind, "building request");
        let request = match call.kind {
            CallKind::Standard => self.message(&call.request, variables),
            CallKind::Entity => {
                let (field, shape) = request_field(call, KEYS_FIELD)?;
                let keys = self.per_representation(call, shape, variables)?;
                single(&field.name, Value::Array(keys))
            }
            CallKind::Required => {
                let (field, shape) = request_field(call, CONTEXT_FIELD)?;
                let contexts = self.per_representation(call, shape, variables)?;
                single(&field.name, Value::Array(contexts))
            }
            CallKind::Resolve => self.resolve_request(call, variables, data)?,
        };
        Ok(Value::Object(request))
    }

    /// One message per representation of the entity type of `call`, in representation order.
    fn per_representation(
        &self,
        call: &RpcCall,
        shape: &RpcMessage,
        variables: &Value,
    ) -> Result<Vec<Value>, RequestError> {
        let Some(Value::Array(representations)) = variables
            .as_object()
            .and_then(|variables| variables.get(REPRESENTATIONS))
        else {
            return Err(RequestError::MissingRepresentations);
        };
        let entity_type = call.entity_type().unwrap_or_default();
        Ok(representations
            .iter()
            .filter(|representation| {
                representation
                    .as_object()
                    .and_then(|representation| representation.get(TYPENAME))
                    .and_then(Value::as_str)
                    == Some(entity_type)
            })
            .map(|representation| Value::Object(self.message(shape, representation)))
            .collect())
    }

    fn resolve_request(
        &self,
        call: &RpcCall,
        variables: &Value,
        data: &Value,
    ) -> Result<Object, RequestError> {
        let parent = call
            .response_path
            .as_ref()
            .and_then(Path::parent)
            .ok_or(RequestError::MissingResponsePath { call: call.id })?;
        let (context_field, context_shape) = request_field(call, CONTEXT_FIELD)?;
        let (args_field, args_shape) = request_field(call, FIELD_ARGS_FIELD)?;

        let mut contexts = Vec::new();
        data.for_each_object_at_path(&parent.0, &mut |object| {
            let source = Value::Object(object.clone());
            contexts.push(Value::Object(self.message(context_shape, &source)));
        });
        trace!(call = call.id, contexts = contexts.len(), "resolved field resolver context");

        let mut request = single(&context_field.name, Value::Array(contexts));
        request.insert(
            ByteString::from(args_field.name.as_str()),
            Value::Object(self.message(args_shape, variables)),
        );
        Ok(request)
    }

    /// Reads every field of `shape` from `source`. Null values are left out.
    fn message(&self, shape: &RpcMessage, source: &Value) -> Object {
        let mut message = Object::new();
        for field in &shape.fields {
            let value = match &field.static_value {
                Some(value) => value.clone(),
                None => read(source, source_key(field)),
            };
            if let Some(value) = self.field_value(field, value) {
                message.insert(ByteString::from(field.name.as_str()), value);
            }
        }
        message
    }

    fn field_value(&self, field: &RpcField, value: Value) -> Option<Value> {
        if value.is_null() {
            return None;
        }
        if let Some(list) = &field.list_metadata {
            return self.list_value(field, list, value, 0);
        }
        if field.repeated {
            return Some(Value::Array(
                into_items(value)
                    .into_iter()
                    .filter_map(|item| self.item_value(field, item))
                    .collect(),
            ));
        }
        self.item_value(field, value)
    }

    /// Wraps one list level as `{ list: { items: [...] } }`. A null inner list becomes an
    /// empty wrapper.
    fn list_value(
        &self,
        field: &RpcField,
        list: &ListMetadata,
        value: Value,
        level: usize,
    ) -> Option<Value> {
        if value.is_null() {
            return None;
        }
        let items: Vec<Value> = if level + 1 >= list.nesting_level {
            into_items(value)
                .into_iter()
                .filter_map(|item| self.item_value(field, item))
                .collect()
        } else {
            into_items(value)
                .into_iter()
                .map(|item| {
                    self.list_value(field, list, item, level + 1)
                        .unwrap_or_else(|| Value::Object(Object::new()))
                })
                .collect()
        };
        let mut inner = Object::new();
        inner.insert(ByteString::from("items"), Value::Array(items));
        Some(Value::Object(single("list", Value::Object(inner))))
    }

    fn item_value(&self, field: &RpcField, value: Value) -> Option<Value> {
        match (&value, field.proto_type_name) {
            (Value::Null, _) => None,
            (Value::Object(_), DataType::Message) => match &field.message {
                Some(shape) => Some(Value::Object(self.message(shape, &value))),
                None => Some(value),
            },
            (Value::String(name), DataType::Enum) => {
                let target = field
                    .enum_name
                    .as_deref()
                    .and_then(|enum_name| self.enums.to_target(enum_name, name.as_str()));
                match target {
                    Some(target) => Some(Value::String(ByteString::from(target))),
                    None => Some(value),
                }
            }
            _ => Some(value),
        }
    }
}

/// The key a request field reads from its source object.
fn source_key(field: &RpcField) -> &str {
    field
        .resolve_path
        .as_ref()
        .and_then(Path::last_key)
        .unwrap_or(&field.json_path)
}

/// `source[key]`, or `source` itself for flattened fields.
fn read(source: &Value, key: &str) -> Value {
    if key.is_empty() {
        return source.clone();
    }
    source
        .as_object()
        .and_then(|object| object.get(key))
        .cloned()
        .unwrap_or_default()
}

/// Input coercion: a single value given for a list is a list of one item.
fn into_items(value: Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items,
        value => vec![value],
    }
}

fn single(key: &str, value: Value) -> Object {
    let mut object = Object::new();
    object.insert(ByteString::from(key), value);
    object
}

fn request_field<'c>(
    call: &'c RpcCall,
    name: &str,
) -> Result<(&'c RpcField, &'c RpcMessage), RequestError> {
    call.request
        .field(name)
        .and_then(|field| field.message.as_deref().map(|shape| (field, shape)))
        .ok_or_else(|| RequestError::MalformedRequestMessage {
            call: call.id,
            field: name.to_string(),
        })
}
