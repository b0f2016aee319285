//! Datasource errors.
//!
//! Errors come in tiers: [`PlanningError`]s abort plan compilation, [`SchedulingError`]s abort
//! execution before any call is dispatched, [`RequestError`]s and [`AssemblyError`]s fail a
//! single call and are rendered as GraphQL errors.
use displaydoc::Display;
use thiserror::Error;

use crate::graphql;

/// Errors raised while compiling an operation into an RPC plan.
#[derive(Error, Display, Debug, Clone, Eq, PartialEq)]
#[non_exhaustive]
pub enum PlanningError {
    /// operation {0} was not found in the document
    OperationNotFound(String),

    /// the schema does not define a root {0} type
    MissingRootType(String),

    /// type {0} is not defined in the schema
    TypeNotFound(String),

    /// field {type_name}.{field_name} is not defined in the schema
    FieldNotFound {
        type_name: String,
        field_name: String,
    },

    /// no request/response mapping for {operation} field {field_name}
    MissingRpcMapping {
        operation: String,
        field_name: String,
    },

    /// no entity RPC is configured for type {0}
    MissingEntityMapping(String),

    /// could not resolve the member types of {0}
    UnresolvedMemberTypes(String),

    /// invalid selection `{selection}` on type {type_name}: {reason}
    InvalidFieldSet {
        type_name: String,
        selection: String,
        reason: String,
    },

    /// fragment {0} is not defined in the document
    FragmentNotFound(String),

    /// argument {argument} of {field_name} embeds variables in a literal value
    UnsupportedArgumentValue {
        field_name: String,
        argument: String,
    },

    /// input type {0} references itself
    RecursiveInputType(String),
}

/// Errors raised while ordering the calls of a plan.
#[derive(Error, Display, Debug, Clone, Eq, PartialEq)]
#[non_exhaustive]
pub enum SchedulingError {
    /// call {call} depends on call {dependency}, which is not part of the plan
    InvalidDependency { call: usize, dependency: usize },

    /// call {call} is part of a dependency cycle
    Cycle { call: usize },
}

/// Errors raised while building the request payload of a call.
#[derive(Error, Display, Debug, Clone, Eq, PartialEq)]
#[non_exhaustive]
pub enum RequestError {
    /// the representations variable is missing or is not a list
    MissingRepresentations,

    /// call {call} has no `{field}` field in its request message
    MalformedRequestMessage { call: usize, field: String },

    /// call {call} has no response path
    MissingResponsePath { call: usize },
}

/// Errors raised while turning RPC responses into GraphQL data.
#[derive(Error, Display, Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum AssemblyError {
    /// list level {level} of field {field} is missing but is not nullable
    MissingListLevel { field: String, level: usize },

    /// field {field} has an unexpected value: {reason}
    UnexpectedValue { field: String, reason: String },

    /// {expected} objects were found at path {path} but the call returned {received} results
    SpliceCountMismatch {
        path: String,
        expected: usize,
        received: usize,
    },

    /// entity type {type_name} received {received} entities in the subgraph response, but {expected} are expected
    EntityCountMismatch {
        type_name: String,
        received: usize,
        expected: usize,
    },

    /// the representations variable is missing or is not a list
    MissingRepresentations,
}

impl AssemblyError {
    /// Convert the assembly error to a GraphQL error.
    pub fn to_graphql_error(&self) -> graphql::Error {
        graphql::Error::internal(self.to_string())
    }
}

impl From<&RequestError> for graphql::Error {
    fn from(error: &RequestError) -> Self {
        graphql::Error::internal(error.to_string())
    }
}

impl From<&SchedulingError> for graphql::Error {
    fn from(error: &SchedulingError) -> Self {
        graphql::Error::internal(error.to_string())
    }
}
