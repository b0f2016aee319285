//! Schema-aware helpers shared by the plan compiler.

use apollo_compiler::ExecutableDocument;
use apollo_compiler::Name;
use apollo_compiler::Schema;
use apollo_compiler::ast::Type;
use apollo_compiler::executable::FieldSet;
use apollo_compiler::executable::Fragment;
use apollo_compiler::schema::ExtendedType;
use apollo_compiler::schema::FieldDefinition;
use apollo_compiler::validation::Valid;

use super::OneOfType;
use super::RpcField;
use crate::error::PlanningError;
use crate::mapping::CONTEXT_ARGUMENT;
use crate::mapping::FIELD_RESOLVER_DIRECTIVE;
use crate::mapping::FederationConfig;
use crate::mapping::GrpcMapping;
use crate::type_mapper::DataType;
use crate::type_mapper::TypeShape;

/// Read-only inputs of one planning pass.
pub(crate) struct PlanningContext<'a> {
    pub(crate) schema: &'a Valid<Schema>,
    pub(crate) document: &'a ExecutableDocument,
    pub(crate) mapping: &'a GrpcMapping,
    pub(crate) federation: &'a FederationConfig,
}

impl<'a> PlanningContext<'a> {
    pub(crate) fn field_definition(
        &self,
        type_name: &str,
        field_name: &str,
    ) -> Result<&'a FieldDefinition, PlanningError> {
        let schema: &'a Schema = self.schema;
        let ty = schema
            .types
            .get(type_name)
            .ok_or_else(|| PlanningError::TypeNotFound(type_name.to_string()))?;
        let field = match ty {
            ExtendedType::Object(object) => object.fields.get(field_name),
            ExtendedType::Interface(interface) => interface.fields.get(field_name),
            _ => None,
        };
        field
            .map(|field| &***field)
            .ok_or_else(|| PlanningError::FieldNotFound {
                type_name: type_name.to_string(),
                field_name: field_name.to_string(),
            })
    }

    pub(crate) fn fragment(&self, name: &str) -> Result<&'a Fragment, PlanningError> {
        let document: &'a ExecutableDocument = self.document;
        document
            .fragments
            .get(name)
            .map(|fragment| &**fragment)
            .ok_or_else(|| PlanningError::FragmentNotFound(name.to_string()))
    }

    /// The oneof tag and concrete member types of an interface or union.
    pub(crate) fn member_types(
        &self,
        type_name: &str,
    ) -> Result<(OneOfType, Vec<String>), PlanningError> {
        let (one_of_type, members) = match self.schema.types.get(type_name) {
            Some(ExtendedType::Interface(_)) => {
                (OneOfType::Interface, self.implementations(type_name))
            }
            Some(ExtendedType::Union(union)) => (
                OneOfType::Union,
                union
                    .members
                    .iter()
                    .map(|member| member.name.to_string())
                    .collect(),
            ),
            _ => return Ok((OneOfType::None, Vec::new())),
        };
        if members.is_empty() {
            return Err(PlanningError::UnresolvedMemberTypes(type_name.to_string()));
        }
        Ok((one_of_type, members))
    }

    /// The object types a selection on `type_name` may apply to, in schema order.
    pub(crate) fn possible_types(&self, type_name: &str) -> Vec<String> {
        match self.schema.types.get(type_name) {
            Some(ExtendedType::Object(_)) => vec![type_name.to_string()],
            Some(ExtendedType::Interface(_) | ExtendedType::Union(_)) => self
                .member_types(type_name)
                .map(|(_, members)| members)
                .unwrap_or_default(),
            _ => Vec::new(),
        }
    }

    fn implementations(&self, interface_name: &str) -> Vec<String> {
        self.schema
            .types
            .iter()
            .filter_map(|(name, ty)| match ty {
                ExtendedType::Object(object)
                    if object
                        .implements_interfaces
                        .iter()
                        .any(|interface| interface.name.as_str() == interface_name) =>
                {
                    Some(name.to_string())
                }
                _ => None,
            })
            .collect()
    }

    /// The context selection of a field backed by a field resolver, if it is one.
    pub(crate) fn field_resolver_context(
        &self,
        type_name: &str,
        field: &FieldDefinition,
    ) -> Option<String> {
        if let Some(config) = self.mapping.resolve_rpc(type_name, field.name.as_str()) {
            return Some(config.context.clone());
        }
        field
            .directives
            .get(FIELD_RESOLVER_DIRECTIVE)
            .and_then(|directive| directive.specified_argument_by_name(CONTEXT_ARGUMENT))
            .and_then(|value| value.as_str())
            .map(str::to_string)
    }

    /// Parses a `@key`, `@requires` or resolver context selection against `type_name`.
    pub(crate) fn parse_field_set(
        &self,
        type_name: &str,
        selection: &str,
    ) -> Result<FieldSet, PlanningError> {
        let invalid = |reason: String| PlanningError::InvalidFieldSet {
            type_name: type_name.to_string(),
            selection: selection.to_string(),
            reason,
        };
        let name = Name::new(type_name).map_err(|error| invalid(error.to_string()))?;
        FieldSet::parse_and_validate(self.schema, name, selection, "field_set.graphql")
            .map(|field_set| field_set.into_inner())
            .map_err(|error| invalid(error.errors.to_string()))
    }

    /// A message field for a GraphQL output or input field of type `ty`.
    ///
    /// The nested message, if any, is left for the caller to build.
    pub(crate) fn build_field(
        &self,
        name: String,
        json_path: impl Into<String>,
        ty: &Type,
    ) -> RpcField {
        let type_name = ty.inner_named_type().as_str();
        let data_type = DataType::from_named_type(self.schema, type_name);
        let shape = TypeShape::of(ty);
        RpcField {
            repeated: shape.repeated,
            optional: shape.optional,
            list_metadata: shape.list_metadata,
            enum_name: (data_type == DataType::Enum).then(|| type_name.to_string()),
            ..RpcField::new(name, data_type, json_path)
        }
    }
}
