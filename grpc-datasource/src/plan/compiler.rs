//! Compiles a GraphQL operation into an [`RpcExecutionPlan`].
//!
//! The compiler walks the operation once, by recursive descent over the selection sets, while
//! resolving every field against the schema. Messages are built bottom-up and returned by value,
//! so the only state carried across the walk is the list of calls planned so far and the method
//! names already assigned.

use apollo_compiler::ExecutableDocument;
use apollo_compiler::Name;
use apollo_compiler::Node;
use apollo_compiler::Schema;
use apollo_compiler::ast;
use apollo_compiler::executable::Field;
use apollo_compiler::executable::OperationType;
use apollo_compiler::executable::Selection;
use apollo_compiler::executable::SelectionSet;
use apollo_compiler::schema::FieldDefinition;
use apollo_compiler::validation::Valid;
use indexmap::IndexMap;
use serde_json_bytes::ByteString;
use serde_json_bytes::json;
use tracing::debug;
use tracing::instrument;

use super::CONTEXT_FIELD;
use super::CallKind;
use super::ENTITIES;
use super::FIELD_ARGS_FIELD;
use super::RESULT_FIELD;
use super::RpcCall;
use super::RpcExecutionPlan;
use super::RpcField;
use super::RpcMessage;
use super::TYPENAME;
use super::context::PlanningContext;
use crate::error::PlanningError;
use crate::json_ext::Object;
use crate::json_ext::Path;
use crate::json_ext::Value;
use crate::mapping::FederationConfig;
use crate::mapping::GrpcMapping;
use crate::type_mapper::DataType;

/// Plans operations against one subgraph schema and its gRPC mapping.
pub struct RpcPlanner<'a> {
    schema: &'a Valid<Schema>,
    mapping: &'a GrpcMapping,
    federation: &'a FederationConfig,
}

impl<'a> RpcPlanner<'a> {
    pub fn new(
        schema: &'a Valid<Schema>,
        mapping: &'a GrpcMapping,
        federation: &'a FederationConfig,
    ) -> Self {
        Self {
            schema,
            mapping,
            federation,
        }
    }

    /// Compiles the named operation, or the only operation of the document.
    ///
    /// Planning stops at the first error: no partial plan is ever returned.
    #[instrument(skip_all, level = "debug")]
    pub fn plan(
        &self,
        document: &Valid<ExecutableDocument>,
        operation_name: Option<&str>,
    ) -> Result<RpcExecutionPlan, PlanningError> {
        let operation = document.operations.get(operation_name).map_err(|_| {
            PlanningError::OperationNotFound(operation_name.unwrap_or("<anonymous>").to_string())
        })?;
        let root_type = self
            .schema
            .root_operation(operation.operation_type)
            .ok_or_else(|| {
                PlanningError::MissingRootType(
                    root_type_label(operation.operation_type).to_string(),
                )
            })?;

        let mut builder = PlanBuilder {
            ctx: PlanningContext {
                schema: self.schema,
                document,
                mapping: self.mapping,
                federation: self.federation,
            },
            calls: Vec::new(),
            method_names: IndexMap::new(),
            required_scope: None,
        };
        builder.plan_operation(
            operation.operation_type,
            root_type.as_str(),
            &operation.selection_set.selections,
        )?;
        debug!(calls = builder.calls.len(), "planned operation");
        Ok(RpcExecutionPlan {
            calls: builder.calls,
        })
    }
}

fn root_type_label(operation_type: OperationType) -> &'static str {
    match operation_type {
        OperationType::Query => "Query",
        OperationType::Mutation => "Mutation",
        OperationType::Subscription => "Subscription",
    }
}

/// A call discovered while building the messages of another call.
pub(super) enum PendingCall<'p> {
    Resolve {
        type_name: String,
        field: &'p Node<Field>,
        parent_path: Path,
        context: String,
    },
    Required {
        type_name: String,
        field: &'p Node<Field>,
        selection: String,
    },
}

pub(super) struct PlanBuilder<'p> {
    pub(super) ctx: PlanningContext<'p>,
    calls: Vec<RpcCall>,
    method_names: IndexMap<(CallKind, String, String), String>,
    /// The entity type and path whose direct fields may use `@requires`.
    pub(super) required_scope: Option<(String, Path)>,
}

impl<'p> PlanBuilder<'p> {
    fn plan_operation(
        &mut self,
        operation_type: OperationType,
        root_type: &str,
        selections: &'p [Selection],
    ) -> Result<(), PlanningError> {
        let mut fields = Vec::new();
        self.root_fields(selections, &mut fields)?;
        for field in fields {
            match field.name.as_str() {
                TYPENAME => {}
                ENTITIES => self.plan_entities(field)?,
                _ => self.plan_root_field(operation_type, root_type, field)?,
            }
        }
        Ok(())
    }

    fn root_fields(
        &self,
        selections: &'p [Selection],
        fields: &mut Vec<&'p Node<Field>>,
    ) -> Result<(), PlanningError> {
        for selection in selections {
            match selection {
                Selection::Field(field) => fields.push(field),
                Selection::InlineFragment(fragment) => {
                    self.root_fields(&fragment.selection_set.selections, fields)?
                }
                Selection::FragmentSpread(spread) => {
                    let fragment = self.ctx.fragment(spread.fragment_name.as_str())?;
                    self.root_fields(&fragment.selection_set.selections, fields)?
                }
            }
        }
        Ok(())
    }

    fn plan_root_field(
        &mut self,
        operation_type: OperationType,
        root_type: &str,
        field: &'p Node<Field>,
    ) -> Result<(), PlanningError> {
        let definition = self.ctx.field_definition(root_type, field.name.as_str())?;
        let rpc = self
            .ctx
            .mapping
            .root_rpc(operation_type, field.name.as_str())?;
        let method_name = self.method_name(CallKind::Standard, root_type, field.name.as_str(), || {
            rpc.rpc.clone()
        });

        let mut request = RpcMessage::new(rpc.request.as_str());
        self.build_arguments(&mut request, root_type, field, definition)?;

        let mut pending = Vec::new();
        let response_key = field.response_key().as_str();
        let response_field = self.output_field(
            root_type,
            field,
            definition,
            &Path::from_keys([response_key]),
            &mut pending,
        )?;
        let mut response = RpcMessage::new(rpc.response.as_str());
        response.add_field(response_field);

        self.push_call(
            RpcCall {
                id: 0,
                kind: CallKind::Standard,
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

    /// Appends a call, then plans the calls discovered while building it.
    pub(super) fn push_call(
        &mut self,
        mut call: RpcCall,
        pending: Vec<PendingCall<'p>>,
    ) -> Result<(), PlanningError> {
        let id = self.calls.len();
        call.id = id;
        debug!(
            id,
            kind = %call.kind,
            method = %call.method_name,
            deps = ?call.dependent_calls,
            "planned call"
        );
        self.calls.push(call);
        for pending in pending {
            match pending {
                PendingCall::Resolve {
                    type_name,
                    field,
                    parent_path,
                    context,
                } => self.plan_resolver(&type_name, field, parent_path, &context, id)?,
                PendingCall::Required {
                    type_name,
                    field,
                    selection,
                } => self.plan_required(&type_name, field, &selection, id)?,
            }
        }
        Ok(())
    }

    /// Method names are computed once per plan for a given call kind and field.
    pub(super) fn method_name(
        &mut self,
        kind: CallKind,
        type_name: &str,
        field_name: &str,
        make: impl FnOnce() -> String,
    ) -> String {
        self.method_names
            .entry((kind, type_name.to_string(), field_name.to_string()))
            .or_insert_with(make)
            .clone()
    }

    fn plan_resolver(
        &mut self,
        type_name: &str,
        field: &'p Node<Field>,
        parent_path: Path,
        context: &str,
        parent_id: usize,
    ) -> Result<(), PlanningError> {
        let definition = self.ctx.field_definition(type_name, field.name.as_str())?;
        let rpc = self
            .ctx
            .mapping
            .resolver_rpc(type_name, field.name.as_str());
        let method_name = self.method_name(CallKind::Resolve, type_name, field.name.as_str(), || {
            rpc.rpc.clone()
        });

        let mut context_message = RpcMessage::new(format!("{method_name}Context"));
        let context_set = self.ctx.parse_field_set(type_name, context)?;
        for mut context_field in self.field_set_fields(type_name, &context_set.selection_set)? {
            context_field.resolve_path = Some(parent_path.join_key(context_field.json_path.clone()));
            context_message.add_field(context_field);
        }
        let mut args_message = RpcMessage::new(format!("{method_name}Args"));
        self.build_arguments(&mut args_message, type_name, field, definition)?;

        let mut request = RpcMessage::new(rpc.request.as_str());
        request.add_field(RpcField::repeated_message(CONTEXT_FIELD, "", context_message));
        request.add_field(RpcField::message(FIELD_ARGS_FIELD, "", args_message));

        let response_path = parent_path.join_key(field.response_key().as_str());
        let mut pending = Vec::new();
        let result_field =
            self.output_field(type_name, field, definition, &response_path, &mut pending)?;
        let mut result = RpcMessage::new(format!("{method_name}Result"));
        result.add_field(result_field);
        let mut response = RpcMessage::new(rpc.response.as_str());
        response.add_field(RpcField::repeated_message(RESULT_FIELD, RESULT_FIELD, result));

        self.push_call(
            RpcCall {
                id: 0,
                kind: CallKind::Resolve,
                service_name: self.ctx.mapping.service.clone(),
                method_name,
                dependent_calls: vec![parent_id],
                request,
                response,
                response_path: Some(response_path),
            },
            pending,
        )
    }

    /// The response field for a selected GraphQL field, with its nested message if any.
    pub(super) fn output_field(
        &mut self,
        parent_type: &str,
        field: &'p Node<Field>,
        definition: &FieldDefinition,
        path: &Path,
        pending: &mut Vec<PendingCall<'p>>,
    ) -> Result<RpcField, PlanningError> {
        let mut rpc_field = self.ctx.build_field(
            self.ctx
                .mapping
                .field_target_name(parent_type, field.name.as_str()),
            field.response_key().as_str(),
            &definition.ty,
        );
        rpc_field.alias = field.alias.as_ref().map(|alias| alias.to_string());
        if !field.selection_set.selections.is_empty() {
            let type_name = definition.ty.inner_named_type().as_str();
            let message =
                self.build_message(type_name, &field.selection_set.selections, path, pending)?;
            rpc_field.message = Some(Box::new(message));
        }
        Ok(rpc_field)
    }

    /// Builds the message of a composite type from the selections made on it.
    pub(super) fn build_message(
        &mut self,
        type_name: &str,
        selections: &'p [Selection],
        path: &Path,
        pending: &mut Vec<PendingCall<'p>>,
    ) -> Result<RpcMessage, PlanningError> {
        let mut message = RpcMessage::new(type_name);
        let (one_of_type, member_types) = self.ctx.member_types(type_name)?;
        message.one_of_type = one_of_type;
        message.member_types = member_types;
        self.collect_selections(&mut message, type_name, None, selections, path, pending)?;
        message.dedupe_member_fields();
        Ok(message)
    }

    /// Adds the fields selected on `parent_type` to `message`.
    ///
    /// `member` is the concrete type the selections apply to when they sit inside a type
    /// condition of an interface or union message.
    pub(super) fn collect_selections(
        &mut self,
        message: &mut RpcMessage,
        parent_type: &str,
        member: Option<&str>,
        selections: &'p [Selection],
        path: &Path,
        pending: &mut Vec<PendingCall<'p>>,
    ) -> Result<(), PlanningError> {
        for selection in selections {
            match selection {
                Selection::Field(field) => {
                    self.collect_field(message, parent_type, member, field, path, pending)?
                }
                Selection::InlineFragment(fragment) => {
                    let condition = fragment
                        .type_condition
                        .as_ref()
                        .map(|name| name.as_str())
                        .unwrap_or(parent_type);
                    self.collect_fragment(
                        message,
                        parent_type,
                        member,
                        condition,
                        &fragment.selection_set.selections,
                        path,
                        pending,
                    )?
                }
                Selection::FragmentSpread(spread) => {
                    let fragment = self.ctx.fragment(spread.fragment_name.as_str())?;
                    self.collect_fragment(
                        message,
                        parent_type,
                        member,
                        fragment.type_condition().as_str(),
                        &fragment.selection_set.selections,
                        path,
                        pending,
                    )?
                }
            }
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn collect_fragment(
        &mut self,
        message: &mut RpcMessage,
        parent_type: &str,
        member: Option<&str>,
        condition: &str,
        selections: &'p [Selection],
        path: &Path,
        pending: &mut Vec<PendingCall<'p>>,
    ) -> Result<(), PlanningError> {
        if condition == parent_type || !message.is_one_of() || member.is_some() {
            return self.collect_selections(message, parent_type, member, selections, path, pending);
        }
        // A condition on an abstract type applies to each of its members carried by the message.
        for concrete in self.ctx.possible_types(condition) {
            if message.member_types.contains(&concrete) {
                self.collect_selections(
                    message,
                    &concrete,
                    Some(&concrete),
                    selections,
                    path,
                    pending,
                )?;
            }
        }
        Ok(())
    }

    fn collect_field(
        &mut self,
        message: &mut RpcMessage,
        parent_type: &str,
        member: Option<&str>,
        field: &'p Node<Field>,
        path: &Path,
        pending: &mut Vec<PendingCall<'p>>,
    ) -> Result<(), PlanningError> {
        if field.name.as_str() == TYPENAME {
            let mut typename = typename_field(member.unwrap_or(parent_type));
            typename.alias = field.alias.as_ref().map(|alias| alias.to_string());
            typename.json_path = field.response_key().to_string();
            add_to(message, member, typename);
            return Ok(());
        }

        let definition = self.ctx.field_definition(parent_type, field.name.as_str())?;

        if let Some((entity_type, entity_path)) = &self.required_scope {
            if entity_type == parent_type && entity_path == path {
                if let Some(selection) = self
                    .ctx
                    .federation
                    .requires(parent_type, field.name.as_str())
                {
                    pending.push(PendingCall::Required {
                        type_name: parent_type.to_string(),
                        field,
                        selection: selection.to_string(),
                    });
                    return Ok(());
                }
            }
        }

        let field_path = match member {
            Some(member) => path.join_fragment(member),
            None => path.clone(),
        };

        if let Some(context) = self.ctx.field_resolver_context(parent_type, definition) {
            let context_set = self.ctx.parse_field_set(parent_type, &context)?;
            for context_field in self.field_set_fields(parent_type, &context_set.selection_set)? {
                add_to(message, member, context_field);
            }
            if member.is_some() {
                message.add_field(typename_field(&message.name));
            }
            pending.push(PendingCall::Resolve {
                type_name: parent_type.to_string(),
                field,
                parent_path: field_path,
                context,
            });
            return Ok(());
        }

        let planned = pending.len();
        let rpc_field = self.output_field(
            parent_type,
            field,
            definition,
            &field_path.join_key(field.response_key().as_str()),
            pending,
        )?;
        if member.is_some() && pending.len() > planned {
            // Calls below this field locate their targets through `__typename`.
            message.add_field(typename_field(&message.name));
        }
        add_to(message, member, rpc_field);
        Ok(())
    }

    /// The fields of a `@key`, `@requires` or resolver context selection.
    pub(super) fn field_set_fields(
        &self,
        type_name: &str,
        selection_set: &SelectionSet,
    ) -> Result<Vec<RpcField>, PlanningError> {
        let mut fields = Vec::new();
        for selection in &selection_set.selections {
            match selection {
                Selection::Field(field) => {
                    let definition = self.ctx.field_definition(type_name, field.name.as_str())?;
                    let mut rpc_field = self.ctx.build_field(
                        self.ctx
                            .mapping
                            .field_target_name(type_name, field.name.as_str()),
                        field.response_key().as_str(),
                        &definition.ty,
                    );
                    if !field.selection_set.selections.is_empty() {
                        let inner_type = definition.ty.inner_named_type().as_str();
                        let mut message = RpcMessage::new(inner_type);
                        for inner in self.field_set_fields(inner_type, &field.selection_set)? {
                            message.add_field(inner);
                        }
                        rpc_field.message = Some(Box::new(message));
                    }
                    fields.push(rpc_field);
                }
                Selection::InlineFragment(fragment) => {
                    fields.extend(self.field_set_fields(type_name, &fragment.selection_set)?)
                }
                Selection::FragmentSpread(spread) => {
                    let fragment = self.ctx.fragment(spread.fragment_name.as_str())?;
                    fields.extend(self.field_set_fields(type_name, &fragment.selection_set)?)
                }
            }
        }
        Ok(fields)
    }

    /// Adds one request field per argument given to `field`, or defaulted by its definition.
    fn build_arguments(
        &self,
        message: &mut RpcMessage,
        type_name: &str,
        field: &Field,
        definition: &FieldDefinition,
    ) -> Result<(), PlanningError> {
        for argument_definition in &definition.arguments {
            let value = field
                .arguments
                .iter()
                .find(|argument| argument.name == argument_definition.name)
                .map(|argument| &argument.value)
                .or(argument_definition.default_value.as_ref());
            let Some(value) = value else {
                continue;
            };
            let target = self.ctx.mapping.argument_target_name(
                type_name,
                field.name.as_str(),
                argument_definition.name.as_str(),
            );
            let rpc_field = self.input_field(
                target,
                field.name.as_str(),
                argument_definition.name.as_str(),
                &argument_definition.ty,
                value,
            )?;
            message.add_field(rpc_field);
        }
        Ok(())
    }

    fn input_field(
        &self,
        target: String,
        field_name: &str,
        argument: &str,
        ty: &ast::Type,
        value: &ast::Value,
    ) -> Result<RpcField, PlanningError> {
        let mut rpc_field = match value {
            ast::Value::Variable(variable) => self.ctx.build_field(target, variable.as_str(), ty),
            literal => {
                if contains_variable(literal) {
                    return Err(PlanningError::UnsupportedArgumentValue {
                        field_name: field_name.to_string(),
                        argument: argument.to_string(),
                    });
                }
                let mut rpc_field = self.ctx.build_field(target, argument, ty);
                rpc_field.static_value = Some(literal_to_json(literal));
                rpc_field
            }
        };
        if rpc_field.proto_type_name == DataType::Message {
            let type_name = ty.inner_named_type().as_str();
            let message = match value {
                ast::Value::Variable(_) => self.input_message(type_name, &mut Vec::new())?,
                literal => self.literal_input_message(type_name, literal)?,
            };
            rpc_field.message = Some(Box::new(message));
        }
        Ok(rpc_field)
    }

    /// The message of an input object type; its fields read the GraphQL field names.
    fn input_message(
        &self,
        type_name: &str,
        visiting: &mut Vec<String>,
    ) -> Result<RpcMessage, PlanningError> {
        if visiting.iter().any(|visited| visited == type_name) {
            return Err(PlanningError::RecursiveInputType(type_name.to_string()));
        }
        let schema: &Schema = self.ctx.schema;
        let input = schema
            .get_input_object(type_name)
            .ok_or_else(|| PlanningError::TypeNotFound(type_name.to_string()))?;
        visiting.push(type_name.to_string());
        let mut message = RpcMessage::new(type_name);
        for (name, definition) in &input.fields {
            let mut rpc_field = self.ctx.build_field(
                self.ctx.mapping.field_target_name(type_name, name.as_str()),
                name.as_str(),
                &definition.ty,
            );
            if rpc_field.proto_type_name == DataType::Message {
                let nested =
                    self.input_message(definition.ty.inner_named_type().as_str(), visiting)?;
                rpc_field.message = Some(Box::new(nested));
            }
            message.add_field(rpc_field);
        }
        visiting.pop();
        Ok(message)
    }

    /// The message of an input object type given as a literal.
    ///
    /// Nested input objects are only expanded as deep as the literal goes, so a self-referencing
    /// input type is planned from the value it is given.
    fn literal_input_message(
        &self,
        type_name: &str,
        literal: &ast::Value,
    ) -> Result<RpcMessage, PlanningError> {
        let schema: &Schema = self.ctx.schema;
        let input = schema
            .get_input_object(type_name)
            .ok_or_else(|| PlanningError::TypeNotFound(type_name.to_string()))?;
        let mut message = RpcMessage::new(type_name);
        for object in literal_objects(literal) {
            for (name, value) in object {
                let Some(definition) = input.fields.get(name) else {
                    continue;
                };
                let mut rpc_field = self.ctx.build_field(
                    self.ctx.mapping.field_target_name(type_name, name.as_str()),
                    name.as_str(),
                    &definition.ty,
                );
                if rpc_field.proto_type_name == DataType::Message {
                    let nested = self.literal_input_message(
                        definition.ty.inner_named_type().as_str(),
                        value,
                    )?;
                    rpc_field.message = Some(Box::new(nested));
                }
                message.add_field(rpc_field);
            }
        }
        Ok(message)
    }
}

/// The input objects of a literal, looking through lists.
fn literal_objects(value: &ast::Value) -> Vec<&[(Name, Node<ast::Value>)]> {
    match value {
        ast::Value::Object(fields) => vec![fields.as_slice()],
        ast::Value::List(items) => items.iter().flat_map(|item| literal_objects(item)).collect(),
        _ => Vec::new(),
    }
}

pub(super) fn typename_field(type_name: &str) -> RpcField {
    RpcField {
        static_value: Some(json!(type_name)),
        ..RpcField::new(TYPENAME, DataType::String, TYPENAME)
    }
}

fn add_to(message: &mut RpcMessage, member: Option<&str>, field: RpcField) {
    match member {
        Some(member) => message.add_member_field(member, field),
        None => message.add_field(field),
    };
}

fn contains_variable(value: &ast::Value) -> bool {
    match value {
        ast::Value::Variable(_) => true,
        ast::Value::List(items) => items.iter().any(|item| contains_variable(item)),
        ast::Value::Object(fields) => fields.iter().any(|(_, value)| contains_variable(value)),
        _ => false,
    }
}

fn literal_to_json(value: &ast::Value) -> Value {
    match value {
        ast::Value::Null | ast::Value::Variable(_) => Value::Null,
        ast::Value::Enum(name) => json!(name.as_str()),
        ast::Value::String(string) => json!(string.as_str()),
        ast::Value::Boolean(boolean) => Value::Bool(*boolean),
        ast::Value::Int(int) => match int.as_str().parse::<i64>() {
            Ok(int) => json!(int),
            Err(_) => json!(int.as_str()),
        },
        ast::Value::Float(float) => match float.try_to_f64() {
            Ok(float) => json!(float),
            Err(_) => Value::Null,
        },
        ast::Value::List(items) => Value::Array(items.iter().map(|item| literal_to_json(item)).collect()),
        ast::Value::Object(fields) => Value::Object(
            fields
                .iter()
                .map(|(name, value)| (ByteString::from(name.as_str()), literal_to_json(value)))
                .collect::<Object>(),
        ),
    }
}
