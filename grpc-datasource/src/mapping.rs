//! Mapping between a GraphQL subgraph schema and the gRPC service that implements it.
//!
//! A [`GrpcMapping`] is usually generated next to the `.proto` file and loaded from YAML or
//! JSON. Every entry is optional: when an entry is absent the naming conventions below apply.
//!
//! * root fields call `Query<Field>`, `Mutation<Field>` or `Subscription<Field>` with
//!   `<Method>Request` and `<Method>Response` messages,
//! * message fields and arguments use the `snake_case` form of their GraphQL name,
//! * entity lookups call `Lookup<Type>By<Keys>`.

use apollo_compiler::Schema;
use apollo_compiler::executable::OperationType;
use apollo_compiler::schema::ExtendedType;
use heck::ToSnakeCase;
use heck::ToUpperCamelCase;
use indexmap::IndexMap;
use serde::Deserialize;
use serde::Serialize;

use crate::error::PlanningError;

const KEY_DIRECTIVE: &str = "key";
const REQUIRES_DIRECTIVE: &str = "requires";
const FIELDS_ARGUMENT: &str = "fields";
pub(crate) const FIELD_RESOLVER_DIRECTIVE: &str = "connect__fieldResolver";
pub(crate) const CONTEXT_ARGUMENT: &str = "context";

/// The RPC backing one operation field.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields, default)]
pub struct RpcConfig {
    /// The RPC method name.
    pub rpc: String,
    /// The request message name.
    pub request: String,
    /// The response message name.
    pub response: String,
}

impl RpcConfig {
    /// The conventional configuration for a method: `<rpc>Request` and `<rpc>Response`.
    pub fn for_method(rpc: impl Into<String>) -> Self {
        let rpc = rpc.into();
        Self {
            request: format!("{rpc}Request"),
            response: format!("{rpc}Response"),
            rpc,
        }
    }

    /// Fills empty entries from the conventional configuration of `default_rpc`.
    fn or_defaults(&self, default_rpc: &str) -> Self {
        let rpc = if self.rpc.is_empty() {
            default_rpc.to_string()
        } else {
            self.rpc.clone()
        };
        let defaults = Self::for_method(rpc);
        Self {
            request: if self.request.is_empty() {
                defaults.request
            } else {
                self.request.clone()
            },
            response: if self.response.is_empty() {
                defaults.response
            } else {
                self.response.clone()
            },
            rpc: defaults.rpc,
        }
    }
}

/// The lookup RPC of a federation entity.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields, default)]
pub struct EntityRpcConfig {
    /// The key selection, e.g. `"id"` or `"id sku"`. Defaults to the type's `@key`.
    pub key: String,
    pub rpc: RpcConfig,
}

/// The RPC resolving one field from fields of its parent object.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields, default)]
pub struct ResolveRpcConfig {
    /// Selection of parent fields passed to the resolver.
    pub context: String,
    pub rpc: RpcConfig,
}

/// Target names of a GraphQL field and of its arguments.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields, default)]
pub struct FieldMapData {
    pub target_name: String,
    pub argument_mappings: IndexMap<String, String>,
}

/// One GraphQL enum value and its protobuf counterpart.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct EnumValueMapping {
    pub value: String,
    pub target_value: String,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields, default)]
pub struct GrpcMapping {
    /// The gRPC service every call of a plan is sent to.
    pub service: String,
    pub query_rpcs: IndexMap<String, RpcConfig>,
    pub mutation_rpcs: IndexMap<String, RpcConfig>,
    pub subscription_rpcs: IndexMap<String, RpcConfig>,
    pub entity_rpcs: IndexMap<String, Vec<EntityRpcConfig>>,
    pub resolve_rpcs: IndexMap<String, IndexMap<String, ResolveRpcConfig>>,
    pub fields: IndexMap<String, IndexMap<String, FieldMapData>>,
    pub enum_values: IndexMap<String, Vec<EnumValueMapping>>,
}

impl GrpcMapping {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            ..Default::default()
        }
    }

    pub fn from_yaml(source: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(source)
    }

    pub fn from_json(source: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(source)
    }

    /// The RPC backing a root field of the given operation type.
    ///
    /// An entry without a request or response message is an error rather than a default: it
    /// usually means the mapping was generated from an older schema.
    pub fn root_rpc(
        &self,
        operation_type: OperationType,
        field_name: &str,
    ) -> Result<RpcConfig, PlanningError> {
        let (prefix, rpcs) = match operation_type {
            OperationType::Query => ("Query", &self.query_rpcs),
            OperationType::Mutation => ("Mutation", &self.mutation_rpcs),
            OperationType::Subscription => ("Subscription", &self.subscription_rpcs),
        };
        match rpcs.get(field_name) {
            None => Ok(RpcConfig::for_method(format!(
                "{prefix}{}",
                field_name.to_upper_camel_case()
            ))),
            Some(config) if config.request.is_empty() || config.response.is_empty() => {
                Err(PlanningError::MissingRpcMapping {
                    operation: prefix.to_string(),
                    field_name: field_name.to_string(),
                })
            }
            Some(config) => Ok(config.or_defaults(&format!(
                "{prefix}{}",
                field_name.to_upper_camel_case()
            ))),
        }
    }

    /// The key selection of an entity type: the configured one, else its first `@key`.
    pub fn entity_key(
        &self,
        type_name: &str,
        federation: &FederationConfig,
    ) -> Result<String, PlanningError> {
        match self.entity_config(type_name) {
            Some(config) if !config.key.is_empty() => Ok(config.key.clone()),
            _ => federation
                .key(type_name)
                .map(str::to_string)
                .ok_or_else(|| PlanningError::MissingEntityMapping(type_name.to_string())),
        }
    }

    /// The lookup RPC of an entity type: `Lookup<Type>By<key_suffix>` unless configured
    /// otherwise.
    pub fn entity_rpc(&self, type_name: &str, key_suffix: &str) -> RpcConfig {
        let default_rpc = format!("Lookup{type_name}By{key_suffix}");
        match self.entity_config(type_name) {
            Some(config) => config.rpc.or_defaults(&default_rpc),
            None => RpcConfig::for_method(default_rpc),
        }
    }

    fn entity_config(&self, type_name: &str) -> Option<&EntityRpcConfig> {
        self.entity_rpcs
            .get(type_name)
            .and_then(|configs| configs.first())
    }

    /// The resolver configured for `type_name.field_name`, if any.
    pub fn resolve_rpc(&self, type_name: &str, field_name: &str) -> Option<&ResolveRpcConfig> {
        self.resolve_rpcs
            .get(type_name)
            .and_then(|fields| fields.get(field_name))
    }

    /// The RPC of a field resolver: `Resolve<Type><Field>` unless configured otherwise.
    pub fn resolver_rpc(&self, type_name: &str, field_name: &str) -> RpcConfig {
        let default_rpc = format!("Resolve{type_name}{}", field_name.to_upper_camel_case());
        match self.resolve_rpc(type_name, field_name) {
            Some(config) => config.rpc.or_defaults(&default_rpc),
            None => RpcConfig::for_method(default_rpc),
        }
    }

    /// The message field name of a GraphQL field.
    pub fn field_target_name(&self, type_name: &str, field_name: &str) -> String {
        self.field_map(type_name, field_name)
            .map(|data| data.target_name.as_str())
            .filter(|target| !target.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| field_name.to_snake_case())
    }

    /// The message field name of a GraphQL field argument.
    pub fn argument_target_name(&self, type_name: &str, field_name: &str, argument: &str) -> String {
        self.field_map(type_name, field_name)
            .and_then(|data| data.argument_mappings.get(argument))
            .filter(|target| !target.is_empty())
            .cloned()
            .unwrap_or_else(|| argument.to_snake_case())
    }

    pub fn enum_values(&self, enum_name: &str) -> &[EnumValueMapping] {
        self.enum_values
            .get(enum_name)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    fn field_map(&self, type_name: &str, field_name: &str) -> Option<&FieldMapData> {
        self.fields
            .get(type_name)
            .and_then(|fields| fields.get(field_name))
    }
}

/// A federation selection attached to a type (`@key`) or to one of its fields (`@requires`).
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct FederationFieldConfiguration {
    pub type_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_name: Option<String>,
    pub selection_set: String,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields, default)]
pub struct FederationConfig {
    pub keys: Vec<FederationFieldConfiguration>,
    pub requires: Vec<FederationFieldConfiguration>,
}

impl FederationConfig {
    /// Collects the `@key` and `@requires` selections declared by a subgraph schema.
    pub fn from_schema(schema: &Schema) -> Self {
        let mut config = Self::default();
        for (type_name, extended_type) in &schema.types {
            let ExtendedType::Object(object) = extended_type else {
                continue;
            };
            for directive in object.directives.get_all(KEY_DIRECTIVE) {
                if let Some(fields) = directive
                    .specified_argument_by_name(FIELDS_ARGUMENT)
                    .and_then(|value| value.as_str())
                {
                    config.keys.push(FederationFieldConfiguration {
                        type_name: type_name.to_string(),
                        field_name: None,
                        selection_set: fields.to_string(),
                    });
                }
            }
            for (field_name, field) in &object.fields {
                if let Some(fields) = field
                    .directives
                    .get(REQUIRES_DIRECTIVE)
                    .and_then(|directive| directive.specified_argument_by_name(FIELDS_ARGUMENT))
                    .and_then(|value| value.as_str())
                {
                    config.requires.push(FederationFieldConfiguration {
                        type_name: type_name.to_string(),
                        field_name: Some(field_name.to_string()),
                        selection_set: fields.to_string(),
                    });
                }
            }
        }
        config
    }

    /// The first key selection declared for `type_name`.
    pub fn key(&self, type_name: &str) -> Option<&str> {
        self.keys
            .iter()
            .find(|key| key.type_name == type_name)
            .map(|key| key.selection_set.as_str())
    }

    /// The selection required by `type_name.field_name`, if the field uses `@requires`.
    pub fn requires(&self, type_name: &str, field_name: &str) -> Option<&str> {
        self.requires
            .iter()
            .find(|requires| {
                requires.type_name == type_name
                    && requires.field_name.as_deref() == Some(field_name)
            })
            .map(|requires| requires.selection_set.as_str())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn root_rpc_defaults() {
        let mapping = GrpcMapping::new("ProductService");
        assert_eq!(
            mapping.root_rpc(OperationType::Query, "productById").unwrap(),
            RpcConfig {
                rpc: "QueryProductById".to_string(),
                request: "QueryProductByIdRequest".to_string(),
                response: "QueryProductByIdResponse".to_string(),
            }
        );
        assert_eq!(
            mapping
                .root_rpc(OperationType::Mutation, "create_user")
                .unwrap()
                .rpc,
            "MutationCreateUser"
        );
    }

    #[test]
    fn incomplete_root_entry_is_an_error() {
        let mut mapping = GrpcMapping::new("ProductService");
        mapping.query_rpcs.insert(
            "users".to_string(),
            RpcConfig {
                rpc: "QueryUsers".to_string(),
                request: String::new(),
                response: "QueryUsersResponse".to_string(),
            },
        );
        assert_eq!(
            mapping.root_rpc(OperationType::Query, "users"),
            Err(PlanningError::MissingRpcMapping {
                operation: "Query".to_string(),
                field_name: "users".to_string(),
            })
        );
    }

    #[test]
    fn loads_yaml() {
        let mapping = GrpcMapping::from_yaml(
            r#"
service: ProductService
query_rpcs:
  users:
    rpc: ListUsers
    request: ListUsersRequest
    response: ListUsersResponse
entity_rpcs:
  Product:
    - key: id
      rpc:
        rpc: LookupProductById
fields:
  Query:
    users:
      target_name: all_users
      argument_mappings:
        pageSize: limit
enum_values:
  Category:
    - value: ELECTRONICS
      target_value: CATEGORY_ELECTRONICS
"#,
        )
        .unwrap();
        assert_eq!(mapping.root_rpc(OperationType::Query, "users").unwrap().rpc, "ListUsers");
        assert_eq!(mapping.field_target_name("Query", "users"), "all_users");
        assert_eq!(
            mapping.argument_target_name("Query", "users", "pageSize"),
            "limit"
        );
        assert_eq!(
            mapping.argument_target_name("Query", "users", "filterBy"),
            "filter_by"
        );
        assert_eq!(mapping.enum_values("Category").len(), 1);
        assert_eq!(
            mapping.entity_rpc("Product", "Sku").request,
            "LookupProductByIdRequest"
        );
        assert_eq!(
            mapping.entity_key("Product", &FederationConfig::default()),
            Ok("id".to_string())
        );
    }

    #[test]
    fn rejects_unknown_keys() {
        assert!(GrpcMapping::from_json(r#"{"service": "S", "query_rpc": {}}"#).is_err());
    }

    #[test]
    fn entity_key_falls_back_to_federation_keys() {
        let mapping = GrpcMapping::new("InventoryService");
        let federation = FederationConfig {
            keys: vec![FederationFieldConfiguration {
                type_name: "Storage".to_string(),
                field_name: None,
                selection_set: "id location { zip }".to_string(),
            }],
            requires: vec![],
        };
        assert_eq!(
            mapping.entity_key("Storage", &federation),
            Ok("id location { zip }".to_string())
        );
        assert_eq!(
            mapping.entity_rpc("Storage", "IdAndLocation").rpc,
            "LookupStorageByIdAndLocation"
        );
        assert_eq!(
            mapping.entity_key("Warehouse", &federation),
            Err(PlanningError::MissingEntityMapping("Warehouse".to_string()))
        );
    }

    #[test]
    fn federation_config_from_schema() {
        let schema = Schema::parse(
            r#"
directive @key(fields: String!) repeatable on OBJECT
directive @requires(fields: String!) on FIELD_DEFINITION
directive @external on FIELD_DEFINITION
type Query { storages: [Storage] }
type Storage @key(fields: "id") {
  id: ID!
  itemCount: Int @external
  stockHealthScore: Float @requires(fields: "itemCount")
}
"#,
            "schema.graphql",
        )
        .unwrap();
        let config = FederationConfig::from_schema(&schema);
        assert_eq!(config.key("Storage"), Some("id"));
        assert_eq!(
            config.requires("Storage", "stockHealthScore"),
            Some("itemCount")
        );
        assert_eq!(config.requires("Storage", "id"), None);
    }
}
