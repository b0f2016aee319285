//! Federation entity lookups and `@requires` calls.

use apollo_compiler::Node;
use apollo_compiler::executable::Field;
use apollo_compiler::executable::FieldSet;
use apollo_compiler::executable::Selection;
use heck::ToUpperCamelCase;
use indexmap::IndexMap;

use super::CONTEXT_FIELD;
use super::CallKind;
use super::ENTITIES;
use super::FIELDS_FIELD;
use super::KEY_FIELD;
use super::KEYS_FIELD;
use super::REPRESENTATIONS;
use super::RESULT_FIELD;
use super::RpcCall;
use super::RpcField;
use super::RpcMessage;
use super::compiler::PlanBuilder;
use super::compiler::typename_field;
use crate::error::PlanningError;
use crate::json_ext::Path;

impl<'p> PlanBuilder<'p> {
    /// Plans one lookup call per entity type selected under `_entities`.
    pub(super) fn plan_entities(&mut self, field: &'p Node<Field>) -> Result<(), PlanningError> {
        let mut by_type = IndexMap::new();
        self.entity_selections(&field.selection_set.selections, &mut by_type)?;
        for (type_name, selections) in by_type {
            self.plan_entity(type_name, &selections)?;
        }
        Ok(())
    }

    fn entity_selections(
        &self,
        selections: &'p [Selection],
        by_type: &mut IndexMap<&'p str, Vec<&'p [Selection]>>,
    ) -> Result<(), PlanningError> {
        for selection in selections {
            match selection {
                // `__typename` is always part of an entity message.
                Selection::Field(_) => {}
                Selection::InlineFragment(fragment) => match &fragment.type_condition {
                    Some(type_name) => by_type
                        .entry(type_name.as_str())
                        .or_default()
                        .push(&fragment.selection_set.selections),
                    None => self.entity_selections(&fragment.selection_set.selections, by_type)?,
                },
                Selection::FragmentSpread(spread) => {
                    let fragment = self.ctx.fragment(spread.fragment_name.as_str())?;
                    by_type
                        .entry(fragment.type_condition().as_str())
                        .or_default()
                        .push(&fragment.selection_set.selections);
                }
            }
        }
        Ok(())
    }

    fn plan_entity(
        &mut self,
        type_name: &str,
        selections: &[&'p [Selection]],
    ) -> Result<(), PlanningError> {
        let (key_set, suffix) = self.entity_key(type_name)?;
        let rpc = self.ctx.mapping.entity_rpc(type_name, &suffix);
        let method_name = self.method_name(CallKind::Entity, type_name, "", || rpc.rpc.clone());

        let key_fields = self.field_set_fields(type_name, &key_set.selection_set)?;
        let mut key = RpcMessage::new(format!("{}Key", rpc.request));
        for key_field in &key_fields {
            key.add_field(key_field.clone());
        }
        let mut request = RpcMessage::new(rpc.request.as_str());
        request.add_field(RpcField::repeated_message(KEYS_FIELD, REPRESENTATIONS, key));

        let entity_path = Path::from_keys([ENTITIES]).join_fragment(type_name);
        let mut entity = RpcMessage::new(type_name);
        entity.add_field(typename_field(type_name));
        let mut pending = Vec::new();
        self.required_scope = Some((type_name.to_string(), entity_path.clone()));
        let collected = selections.iter().copied().try_for_each(|selections| {
            self.collect_selections(
                &mut entity,
                type_name,
                None,
                selections,
                &entity_path,
                &mut pending,
            )
        });
        self.required_scope = None;
        collected?;
        // Entities are placed by their key values, selected or not.
        for key_field in key_fields {
            entity.add_field(key_field);
        }

        let mut response = RpcMessage::new(rpc.response.as_str());
        response.add_field(RpcField::repeated_message(RESULT_FIELD, ENTITIES, entity));

        self.push_call(
            RpcCall {
                id: 0,
                kind: CallKind::Entity,
                service_name: self.ctx.mapping.service.clone(),
                method_name,
                dependent_calls: Vec::new(),
                request,
                response,
                response_path: None,
            },
            pending,
        )
    }

    /// Plans the call resolving a `@requires` field of an entity.
    ///
    /// The request carries, for every representation of the entity type, its key and the
    /// required fields sent by the router.
    pub(super) fn plan_required(
        &mut self,
        type_name: &str,
        field: &'p Node<Field>,
        selection: &str,
        entity_call: usize,
    ) -> Result<(), PlanningError> {
        let definition = self.ctx.field_definition(type_name, field.name.as_str())?;
        let (key_set, suffix) = self.entity_key(type_name)?;
        let method_name =
            self.method_name(CallKind::Required, type_name, field.name.as_str(), || {
                format!(
                    "Require{type_name}{}By{suffix}",
                    field.name.as_str().to_upper_camel_case(),
                )
            });

        let representations = Path::from_keys([REPRESENTATIONS]);
        let mut key = RpcMessage::new(format!("{method_name}Key"));
        for mut key_field in self.field_set_fields(type_name, &key_set.selection_set)? {
            key_field.resolve_path = Some(representations.join_key(key_field.json_path.clone()));
            key.add_field(key_field);
        }
        let required_set = self.ctx.parse_field_set(type_name, selection)?;
        let mut fields = RpcMessage::new(format!("{method_name}Fields"));
        for mut required in self.field_set_fields(type_name, &required_set.selection_set)? {
            required.resolve_path = Some(representations.join_key(required.json_path.clone()));
            fields.add_field(required);
        }
        let mut context = RpcMessage::new(format!("{method_name}Context"));
        context.add_field(RpcField::message(KEY_FIELD, "", key));
        context.add_field(RpcField::message(FIELDS_FIELD, "", fields));
        let mut request = RpcMessage::new(format!("{method_name}Request"));
        request.add_field(RpcField::repeated_message(CONTEXT_FIELD, "", context));

        let response_path = Path::from_keys([ENTITIES])
            .join_fragment(type_name)
            .join_key(field.response_key().as_str());
        let mut pending = Vec::new();
        let result_field =
            self.output_field(type_name, field, definition, &response_path, &mut pending)?;
        let mut result = RpcMessage::new(format!("{method_name}Result"));
        result.add_field(result_field);
        let mut response = RpcMessage::new(format!("{method_name}Response"));
        response.add_field(RpcField::repeated_message(RESULT_FIELD, RESULT_FIELD, result));

        self.push_call(
            RpcCall {
                id: 0,
                kind: CallKind::Required,
                service_name: self.ctx.mapping.service.clone(),
                method_name,
                dependent_calls: vec![entity_call],
                request,
                response,
                response_path: Some(response_path),
            },
            pending,
        )
    }

    /// The parsed key selection of an entity type and the `By<Keys>` suffix of its methods.
    fn entity_key(&self, type_name: &str) -> Result<(FieldSet, String), PlanningError> {
        let key = self
            .ctx
            .mapping
            .entity_key(type_name, self.ctx.federation)?;
        let key_set = self.ctx.parse_field_set(type_name, &key)?;
        let suffix = key_suffix(&key_set);
        Ok((key_set, suffix))
    }
}

/// `id` becomes `Id`, `id location { zip }` becomes `IdAndLocation`.
fn key_suffix(key_set: &FieldSet) -> String {
    key_set
        .selection_set
        .selections
        .iter()
        .filter_map(|selection| match selection {
            Selection::Field(field) => Some(field.name.as_str().to_upper_camel_case()),
            Selection::InlineFragment(_) | Selection::FragmentSpread(_) => None,
        })
        .collect::<Vec<_>>()
        .join("And")
}
