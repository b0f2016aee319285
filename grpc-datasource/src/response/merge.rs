//! Merges the marshaled results of the calls of a plan into one GraphQL `data` object.

use indexmap::IndexMap;
use serde_json_bytes::ByteString;
use tracing::debug;
use tracing::trace;

use crate::error::AssemblyError;
use crate::json_ext::Object;
use crate::json_ext::Path;
use crate::json_ext::Value;
use crate::json_ext::ValueExt;
use crate::plan::CallKind;
use crate::plan::ENTITIES;
use crate::plan::REPRESENTATIONS;
use crate::plan::RESULT_FIELD;
use crate::plan::RpcCall;
use crate::plan::RpcMessage;
use crate::plan::TYPENAME;

/// Positions of the federation representations, by type.
///
/// `positions[type][n]` is the index in `representations` of the n-th representation of
/// `type`, so entities can be placed back in request order whatever order the service returns
/// them in.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EntityIndex {
    representations: Vec<Value>,
    positions: IndexMap<String, Vec<usize>>,
}

impl EntityIndex {
    /// Indexes the `representations` variable.
    pub fn from_variables(variables: &Value) -> Result<Self, AssemblyError> {
        let Some(Value::Array(representations)) = variables
            .as_object()
            .and_then(|variables| variables.get(REPRESENTATIONS))
        else {
            return Err(AssemblyError::MissingRepresentations);
        };
        let mut positions: IndexMap<String, Vec<usize>> = IndexMap::new();
        for (position, representation) in representations.iter().enumerate() {
            let type_name = representation
                .as_object()
                .and_then(|representation| representation.get(TYPENAME))
                .and_then(Value::as_str)
                .unwrap_or_default();
            positions
                .entry(type_name.to_string())
                .or_default()
                .push(position);
        }
        Ok(Self {
            representations: representations.clone(),
            positions,
        })
    }

    /// The number of representations.
    pub fn len(&self) -> usize {
        self.representations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.representations.is_empty()
    }

    /// The number of representations of `type_name`.
    pub fn expected(&self, type_name: &str) -> usize {
        self.positions(type_name).len()
    }

    /// The absolute position of the `occurrence`-th representation of `type_name`.
    pub fn position(&self, type_name: &str, occurrence: usize) -> Option<usize> {
        self.positions(type_name).get(occurrence).copied()
    }

    fn positions(&self, type_name: &str) -> &[usize] {
        self.positions
            .get(type_name)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Finds the unused occurrence whose representation carries the same key values as
    /// `entity`. Only the fields of `key` are compared; representations also carry the fields
    /// required by `@requires`, which entities do not.
    fn matching_occurrence(
        &self,
        type_name: &str,
        key: &RpcMessage,
        entity: &Value,
        used: &[bool],
    ) -> Option<usize> {
        if key.fields.is_empty() {
            return None;
        }
        self.positions(type_name)
            .iter()
            .enumerate()
            .filter(|(occurrence, _)| !used[*occurrence])
            .find_map(|(occurrence, &position)| {
                let representation = self.representations.get(position)?;
                key_matches(key, representation, entity).then_some(occurrence)
            })
    }
}

fn key_matches(key: &RpcMessage, representation: &Value, entity: &Value) -> bool {
    key.fields.iter().all(|field| {
        let (Some(expected), Some(actual)) = (
            object_field(representation, &field.json_path),
            object_field(entity, &field.json_path),
        ) else {
            return false;
        };
        match field.message.as_deref() {
            Some(nested) if !field.repeated => key_matches(nested, expected, actual),
            _ => expected == actual,
        }
    })
}

fn object_field<'v>(value: &'v Value, key: &str) -> Option<&'v Value> {
    value.as_object().and_then(|object| object.get(key))
}

/// Accumulates the GraphQL `data` object as call results come in.
#[derive(Clone, Debug)]
pub struct ResponseAssembler {
    data: Value,
    entities: Option<EntityIndex>,
}

impl Default for ResponseAssembler {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseAssembler {
    pub fn new() -> Self {
        Self {
            data: Value::Object(Object::new()),
            entities: None,
        }
    }

    /// An assembler for `_entities` operations.
    pub fn with_entities(entities: EntityIndex) -> Self {
        Self {
            entities: Some(entities),
            ..Self::new()
        }
    }

    pub fn data(&self) -> &Value {
        &self.data
    }

    pub fn into_data(self) -> Value {
        self.data
    }

    /// Merges the marshaled result of `call` according to its kind.
    pub fn merge(&mut self, call: &RpcCall, result: Value) -> Result<(), AssemblyError> {
        debug!(call = call.id, kind = %call.kind, "merging call result");
        match call.kind {
            CallKind::Standard => {
                self.merge_standard(result);
                Ok(())
            }
            CallKind::Entity => {
                let (Some(type_name), Some(key)) = (call.entity_type(), call.entity_key()) else {
                    return Err(AssemblyError::UnexpectedValue {
                        field: RESULT_FIELD.to_string(),
                        reason: format!("call {} does not return entities", call.id),
                    });
                };
                self.merge_entities(type_name, key, result)
            }
            CallKind::Required | CallKind::Resolve => match &call.response_path {
                Some(path) => self.splice(path, result),
                None => Err(AssemblyError::UnexpectedValue {
                    field: RESULT_FIELD.to_string(),
                    reason: format!("call {} has no response path", call.id),
                }),
            },
        }
    }

    pub fn merge_standard(&mut self, result: Value) {
        self.data.deep_merge(result);
    }

    /// Places the entities of one type at the positions of their representations.
    ///
    /// An entity goes to the representation with the same values for the fields of `key`, or
    /// else to the first representation of its type not taken yet. Nothing is merged when the
    /// service returned more or fewer entities than there are representations of the type.
    pub fn merge_entities(
        &mut self,
        type_name: &str,
        key: &RpcMessage,
        result: Value,
    ) -> Result<(), AssemblyError> {
        let Some(index) = &self.entities else {
            return Err(AssemblyError::MissingRepresentations);
        };
        let entities = take_array(result, ENTITIES)?;
        let expected = index.expected(type_name);
        if entities.len() != expected {
            return Err(AssemblyError::EntityCountMismatch {
                type_name: type_name.to_string(),
                received: entities.len(),
                expected,
            });
        }

        let mut used = vec![false; expected];
        let mut placed = Vec::with_capacity(expected);
        for entity in entities {
            let occurrence = index
                .matching_occurrence(type_name, key, &entity, &used)
                .or_else(|| used.iter().position(|used| !used));
            let Some(occurrence) = occurrence else {
                continue;
            };
            used[occurrence] = true;
            if let Some(position) = index.position(type_name, occurrence) {
                placed.push((position, entity));
            }
        }

        let len = index.len();
        let slots = self.entity_slots(len)?;
        for (position, entity) in placed {
            trace!(type_name, position, "placing entity");
            if let Some(slot) = slots.get_mut(position) {
                slot.deep_merge(entity);
            }
        }
        Ok(())
    }

    /// The `_entities` array, created with one `null` per representation.
    fn entity_slots(&mut self, len: usize) -> Result<&mut Vec<Value>, AssemblyError> {
        let Value::Object(data) = &mut self.data else {
            return Err(AssemblyError::UnexpectedValue {
                field: ENTITIES.to_string(),
                reason: "data is not an object".to_string(),
            });
        };
        if !data.contains_key(ENTITIES) {
            data.insert(ByteString::from(ENTITIES), Value::Array(Vec::new()));
        }
        match data.get_mut(ENTITIES) {
            Some(Value::Array(slots)) => {
                if slots.len() < len {
                    slots.resize(len, Value::Null);
                }
                Ok(slots)
            }
            _ => Err(AssemblyError::UnexpectedValue {
                field: ENTITIES.to_string(),
                reason: "not a list".to_string(),
            }),
        }
    }

    /// Copies the resolved field of each result into the objects found at the parent of
    /// `response_path`, by position.
    pub fn splice(&mut self, response_path: &Path, result: Value) -> Result<(), AssemblyError> {
        let (Some(parent), Some(key)) = (response_path.parent(), response_path.last_key()) else {
            return Err(AssemblyError::UnexpectedValue {
                field: response_path.to_string(),
                reason: "the response path does not end with a field".to_string(),
            });
        };
        let results = take_array(result, RESULT_FIELD)?;

        let mut destinations = 0;
        self.data
            .for_each_object_at_path(&parent.0, &mut |_| destinations += 1);
        if destinations != results.len() {
            return Err(AssemblyError::SpliceCountMismatch {
                path: parent.to_string(),
                expected: destinations,
                received: results.len(),
            });
        }

        let mut results = results.into_iter();
        self.data.for_each_object_at_path_mut(&parent.0, &mut |object| {
            let value = match results.next() {
                Some(Value::Object(mut result)) => result.remove(key).unwrap_or_default(),
                _ => Value::Null,
            };
            object.insert(ByteString::from(key), value);
        });
        trace!(path = %response_path, destinations, "spliced call result");
        Ok(())
    }
}

fn take_array(result: Value, field: &str) -> Result<Vec<Value>, AssemblyError> {
    let Value::Object(mut result) = result else {
        return Err(AssemblyError::UnexpectedValue {
            field: field.to_string(),
            reason: "the call result is not an object".to_string(),
        });
    };
    match result.remove(field) {
        Some(Value::Array(items)) => Ok(items),
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(_) => Err(AssemblyError::UnexpectedValue {
            field: field.to_string(),
            reason: "not a list".to_string(),
        }),
    }
}
