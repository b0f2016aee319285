//! A GraphQL datasource backed by gRPC services.
//!
//! The datasource works in three stages:
//!
//! * [`plan::RpcPlanner`] compiles a validated operation against the subgraph schema and a
//!   [`mapping::GrpcMapping`] into an [`plan::RpcExecutionPlan`]: a small DAG of RPC calls.
//! * [`scheduler::DependencyGraph`] groups the calls of a plan into levels that can be
//!   dispatched concurrently.
//! * [`response::JsonBuilder`] and [`response::ResponseAssembler`] turn the RPC responses
//!   back into a GraphQL response, including federation entity ordering and `@requires`
//!   splicing.
//!
//! [`execution::RpcExecutor`] ties the stages together on top of an [`execution::RpcTransport`].

#![warn(
    rustdoc::broken_intra_doc_links,
    unreachable_pub,
    unreachable_patterns,
    unused,
    unused_qualifications,
    dead_code,
    while_true,
    unconditional_panic,
    clippy::all
)]

mod display_helpers;
pub mod error;
pub mod execution;
pub mod graphql;
pub mod json_ext;
pub mod mapping;
pub mod message;
pub mod plan;
pub mod request;
pub mod response;
pub mod scheduler;
pub mod type_mapper;

#[cfg(test)]
pub(crate) mod test_utils;

pub use crate::error::AssemblyError;
pub use crate::error::PlanningError;
pub use crate::error::RequestError;
pub use crate::error::SchedulingError;
pub use crate::execution::RpcExecutor;
pub use crate::execution::RpcTransport;
pub use crate::mapping::FederationConfig;
pub use crate::mapping::GrpcMapping;
pub use crate::plan::RpcExecutionPlan;
pub use crate::plan::RpcPlanner;
