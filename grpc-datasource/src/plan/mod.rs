//! The RPC execution plan: the calls compiled from one GraphQL operation.

use std::fmt;

use indexmap::IndexMap;
use serde::Serialize;

use crate::display_helpers::DisplaySlice;
use crate::display_helpers::State;
use crate::display_helpers::write_indented_lines;
use crate::json_ext::Path;
use crate::json_ext::PathElement;
use crate::json_ext::Value;
use crate::type_mapper::DataType;
use crate::type_mapper::ListMetadata;

mod compiler;
mod context;
mod federation;

pub use compiler::RpcPlanner;

pub(crate) const TYPENAME: &str = "__typename";
pub(crate) const ENTITIES: &str = "_entities";
pub(crate) const REPRESENTATIONS: &str = "representations";
/// Name of the oneof carrying the concrete type of an interface or union message.
pub(crate) const ONEOF_FIELD: &str = "instance";
pub(crate) const KEYS_FIELD: &str = "keys";
pub(crate) const CONTEXT_FIELD: &str = "context";
pub(crate) const KEY_FIELD: &str = "key";
pub(crate) const FIELDS_FIELD: &str = "fields";
pub(crate) const FIELD_ARGS_FIELD: &str = "field_args";
pub(crate) const RESULT_FIELD: &str = "result";

/// The calls needed to resolve one operation, ordered by id.
///
/// `calls[i].id == i` and every dependency points at another call of the same plan.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct RpcExecutionPlan {
    pub calls: Vec<RpcCall>,
}

impl RpcExecutionPlan {
    pub fn call(&self, id: usize) -> Option<&RpcCall> {
        self.calls.get(id)
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize)]
pub enum CallKind {
    /// A root query, mutation or subscription field.
    Standard,
    /// A federation entity lookup.
    Entity,
    /// Resolves a field that uses `@requires`.
    Required,
    /// Resolves a field backed by a field resolver.
    Resolve,
}

impl fmt::Display for CallKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RpcCall {
    pub id: usize,
    pub kind: CallKind,
    pub service_name: String,
    pub method_name: String,
    /// Ids of the calls that must complete before this one.
    pub dependent_calls: Vec<usize>,
    pub request: RpcMessage,
    pub response: RpcMessage,
    /// Where the result of a `Required` or `Resolve` call is spliced into the data.
    pub response_path: Option<Path>,
}

impl RpcCall {
    /// The entity type looked up by an `Entity` call or extended by a `Required` call.
    pub fn entity_type(&self) -> Option<&str> {
        match self.kind {
            CallKind::Entity => self
                .response
                .field(RESULT_FIELD)
                .and_then(|field| field.message.as_deref())
                .map(|message| message.name.as_str()),
            CallKind::Required => self.response_path.as_ref().and_then(|path| {
                path.iter().find_map(|element| match element {
                    PathElement::Fragment(type_name) => Some(type_name.as_str()),
                    PathElement::Key(_) => None,
                })
            }),
            CallKind::Standard | CallKind::Resolve => None,
        }
    }

    /// The key fields sent by an `Entity` call, as read from each representation.
    pub fn entity_key(&self) -> Option<&RpcMessage> {
        match self.kind {
            CallKind::Entity => self
                .request
                .field(KEYS_FIELD)
                .and_then(|field| field.message.as_deref()),
            _ => None,
        }
    }

    fn write_indented(&self, state: &mut State<'_, '_>) -> fmt::Result {
        state.write(format_args!(
            "Call(id: {}, kind: {}, service: {}, method: {}, deps: {}",
            self.id,
            self.kind,
            self.service_name,
            self.method_name,
            DisplaySlice(&self.dependent_calls),
        ))?;
        if let Some(path) = &self.response_path {
            state.write(format_args!(", path: \"{path}\""))?;
        }
        state.write(") {")?;
        state.indent_no_new_line();
        state.new_line()?;
        state.write("request: ")?;
        self.request.write_indented(state)?;
        state.new_line()?;
        state.write("response: ")?;
        self.response.write_indented(state)?;
        state.dedent()?;
        state.write("}")
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
pub enum OneOfType {
    #[default]
    None,
    Interface,
    Union,
}

impl fmt::Display for OneOfType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

pub type RpcFields = Vec<RpcField>;

/// The shape of a request or response message.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct RpcMessage {
    pub name: String,
    pub fields: RpcFields,
    pub one_of_type: OneOfType,
    /// Concrete types an interface or union message may carry.
    pub member_types: Vec<String>,
    /// Fields selected only for one concrete member type.
    pub field_selection_set: IndexMap<String, RpcFields>,
}

impl RpcMessage {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn is_one_of(&self) -> bool {
        self.one_of_type != OneOfType::None
    }

    pub fn field(&self, name: &str) -> Option<&RpcField> {
        self.fields.iter().find(|field| field.name == name)
    }

    /// Appends `field` unless a field with the same name and alias is already present.
    pub fn add_field(&mut self, field: RpcField) -> bool {
        add_unique(&mut self.fields, field)
    }

    /// Like [`RpcMessage::add_field`], for a field selected on one member type only.
    pub fn add_member_field(&mut self, type_name: &str, field: RpcField) -> bool {
        add_unique(
            self.field_selection_set
                .entry(type_name.to_string())
                .or_default(),
            field,
        )
    }

    /// The fields to read for a given concrete member type.
    pub fn fields_for_type(&self, type_name: Option<&str>) -> impl Iterator<Item = &RpcField> {
        let member_fields = type_name
            .and_then(|type_name| self.field_selection_set.get(type_name))
            .map(|fields| fields.as_slice())
            .unwrap_or_default();
        self.fields.iter().chain(member_fields.iter())
    }

    /// Adds the fields and member selections of `other`, merging repeated message fields.
    pub(crate) fn merge(&mut self, other: RpcMessage) {
        for field in other.fields {
            self.add_field(field);
        }
        for (type_name, fields) in other.field_selection_set {
            for field in fields {
                self.add_member_field(&type_name, field);
            }
        }
    }

    /// Removes from the member selections the fields that are already common fields.
    pub(crate) fn dedupe_member_fields(&mut self) {
        let common = &self.fields;
        for fields in self.field_selection_set.values_mut() {
            fields.retain(|field| !common.iter().any(|existing| existing.same_key(field)));
        }
        self.field_selection_set
            .retain(|_, fields| !fields.is_empty());
    }

    fn write_indented(&self, state: &mut State<'_, '_>) -> fmt::Result {
        state.write(&self.name)?;
        if self.is_one_of() {
            state.write(format_args!(
                " ({} of {})",
                self.one_of_type,
                DisplaySlice(&self.member_types)
            ))?;
        }
        if self.fields.is_empty() && self.field_selection_set.is_empty() {
            return state.write(" {}");
        }
        state.write(" {")?;
        state.indent_no_new_line();
        for field in &self.fields {
            state.new_line()?;
            field.write_indented(state)?;
        }
        for (type_name, fields) in &self.field_selection_set {
            state.new_line()?;
            state.write(format_args!("... on {type_name} {{"))?;
            write_indented_lines(state, fields, |state, field| field.write_indented(state))?;
            state.write("}")?;
        }
        state.dedent()?;
        state.write("}")
    }
}

/// A field selected twice under the same response key keeps one entry whose message carries
/// the sub-selections of both.
fn add_unique(fields: &mut RpcFields, field: RpcField) -> bool {
    match fields.iter_mut().find(|existing| existing.same_key(&field)) {
        Some(existing) => {
            if let (Some(message), Some(other)) = (existing.message.as_deref_mut(), field.message)
            {
                message.merge(*other);
            }
            false
        }
        None => {
            fields.push(field);
            true
        }
    }
}

/// One field of a [`RpcMessage`].
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RpcField {
    /// The protobuf field name.
    pub name: String,
    pub alias: Option<String>,
    #[serde(rename = "type")]
    pub proto_type_name: DataType,
    /// The GraphQL response key, variable name or representation key this field maps to.
    /// Empty when the field is flattened into its parent.
    pub json_path: String,
    pub repeated: bool,
    pub optional: bool,
    pub list_metadata: Option<ListMetadata>,
    /// A constant emitted instead of reading the message.
    pub static_value: Option<Value>,
    /// Where the value is read from when it comes from data fetched by another call.
    pub resolve_path: Option<Path>,
    pub enum_name: Option<String>,
    pub message: Option<Box<RpcMessage>>,
}

impl RpcField {
    pub fn new(name: impl Into<String>, data_type: DataType, json_path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            alias: None,
            proto_type_name: data_type,
            json_path: json_path.into(),
            repeated: false,
            optional: false,
            list_metadata: None,
            static_value: None,
            resolve_path: None,
            enum_name: None,
            message: None,
        }
    }

    /// A repeated message field.
    pub(crate) fn repeated_message(
        name: impl Into<String>,
        json_path: impl Into<String>,
        message: RpcMessage,
    ) -> Self {
        Self {
            repeated: true,
            message: Some(Box::new(message)),
            ..Self::new(name, DataType::Message, json_path)
        }
    }

    /// A singular message field.
    pub(crate) fn message(
        name: impl Into<String>,
        json_path: impl Into<String>,
        message: RpcMessage,
    ) -> Self {
        Self {
            message: Some(Box::new(message)),
            ..Self::new(name, DataType::Message, json_path)
        }
    }

    pub fn is_list_type(&self) -> bool {
        self.list_metadata.is_some()
    }

    /// The key of this field in a GraphQL response object.
    pub fn response_key(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.json_path)
    }

    fn same_key(&self, other: &RpcField) -> bool {
        self.name == other.name && self.alias == other.alias
    }

    fn write_indented(&self, state: &mut State<'_, '_>) -> fmt::Result {
        state.write(format_args!("{}: ", self.name))?;
        if self.repeated {
            state.write("repeated ")?;
        }
        if self.optional {
            state.write("optional ")?;
        }
        if let Some(list) = &self.list_metadata {
            let levels: Vec<&str> = list
                .level_info
                .iter()
                .map(|level| if level.optional { "?" } else { "!" })
                .collect();
            state.write(format_args!("list{} ", levels.concat()))?;
        }
        state.write(self.proto_type_name)?;
        if let Some(enum_name) = &self.enum_name {
            state.write(format_args!(" {enum_name}"))?;
        }
        state.write(format_args!(" -> \"{}\"", self.json_path))?;
        if let Some(value) = &self.static_value {
            let value = serde_json::to_string(value).map_err(|_| fmt::Error)?;
            state.write(format_args!(" = {value}"))?;
        }
        if let Some(path) = &self.resolve_path {
            state.write(format_args!(" <- \"{path}\""))?;
        }
        if let Some(message) = &self.message {
            state.write(" ")?;
            message.write_indented(state)?;
        }
        Ok(())
    }
}

impl fmt::Display for RpcExecutionPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = &mut State::new(f);
        state.write("RpcExecutionPlan {")?;
        write_indented_lines(state, &self.calls, |state, call| call.write_indented(state))?;
        state.write("}")
    }
}

impl fmt::Display for RpcCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_indented(&mut State::new(f))
    }
}

impl fmt::Display for RpcMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_indented(&mut State::new(f))
    }
}

#[cfg(test)]
mod tests {
    use serde_json_bytes::json;

    use super::*;

    fn user_call() -> RpcCall {
        let mut request = RpcMessage::new("QueryUserRequest");
        request.add_field(RpcField::new("id", DataType::String, "id"));
        let mut user = RpcMessage::new("User");
        user.add_field(RpcField::new("name", DataType::String, "name"));
        user.add_field(RpcField {
            static_value: Some(json!("User")),
            ..RpcField::new(TYPENAME, DataType::String, TYPENAME)
        });
        let mut response = RpcMessage::new("QueryUserResponse");
        response.add_field(RpcField::message("user", "user", user));
        RpcCall {
            id: 0,
            kind: CallKind::Standard,
            service_name: "UserService".to_string(),
            method_name: "QueryUser".to_string(),
            dependent_calls: vec![],
            request,
            response,
            response_path: None,
        }
    }

    #[test]
    fn add_field_dedupes_name_and_alias() {
        let mut message = RpcMessage::new("User");
        assert!(message.add_field(RpcField::new("name", DataType::String, "name")));
        assert!(!message.add_field(RpcField::new("name", DataType::String, "name")));
        assert!(message.add_field(RpcField {
            alias: Some("fullName".to_string()),
            ..RpcField::new("name", DataType::String, "fullName")
        }));
        assert_eq!(message.fields.len(), 2);
    }

    #[test]
    fn repeated_message_fields_merge_their_selections() {
        let mut first = RpcMessage::new("Pet");
        first.add_field(RpcField::new("name", DataType::String, "name"));
        let mut second = RpcMessage::new("Pet");
        second.add_field(RpcField::new("name", DataType::String, "name"));
        second.add_field(RpcField::new("age", DataType::Int32, "age"));

        let mut user = RpcMessage::new("User");
        assert!(user.add_field(RpcField::message("pet", "pet", first)));
        assert!(!user.add_field(RpcField::message("pet", "pet", second)));
        assert_eq!(user.fields.len(), 1);
        let pet = user.fields[0].message.as_deref().unwrap();
        let names: Vec<&str> = pet.fields.iter().map(|field| field.name.as_str()).collect();
        assert_eq!(names, vec!["name", "age"]);
    }

    #[test]
    fn member_fields_are_disjoint_from_common_fields() {
        let mut message = RpcMessage::new("Animal");
        message.one_of_type = OneOfType::Interface;
        message.member_types = vec!["Cat".to_string(), "Dog".to_string()];
        message.add_field(RpcField::new("name", DataType::String, "name"));
        message.add_member_field("Cat", RpcField::new("name", DataType::String, "name"));
        message.add_member_field("Cat", RpcField::new("meow_volume", DataType::Int32, "meowVolume"));
        message.add_member_field("Dog", RpcField::new("name", DataType::String, "name"));
        message.dedupe_member_fields();
        assert_eq!(message.field_selection_set.len(), 1);
        let cat_fields: Vec<&str> = message
            .fields_for_type(Some("Cat"))
            .map(|field| field.name.as_str())
            .collect();
        assert_eq!(cat_fields, vec!["name", "meow_volume"]);
        assert_eq!(message.fields_for_type(Some("Dog")).count(), 1);
    }

    #[test]
    fn renders_plan() {
        let plan = RpcExecutionPlan {
            calls: vec![user_call()],
        };
        insta::assert_snapshot!(plan, @r###"
        RpcExecutionPlan {
          Call(id: 0, kind: Standard, service: UserService, method: QueryUser, deps: []) {
            request: QueryUserRequest {
              id: string -> "id"
            }
            response: QueryUserResponse {
              user: message -> "user" User {
                name: string -> "name"
                __typename: string -> "__typename" = "User"
              }
            }
          }
        }
        "###);
    }

    #[test]
    fn entity_type_of_calls() {
        let mut call = user_call();
        assert_eq!(call.entity_type(), None);
        call.kind = CallKind::Required;
        call.response_path = Some(
            Path::from_keys([ENTITIES])
                .join_fragment("Storage")
                .join_key("stockHealthScore"),
        );
        assert_eq!(call.entity_type(), Some("Storage"));
    }
}
