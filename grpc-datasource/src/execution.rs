//! Runs an execution plan against an RPC transport.

use async_trait::async_trait;
use futures::future::join_all;
use tracing::debug;
use tracing::instrument;
use tracing::warn;

use crate::graphql;
use crate::json_ext::Value;
use crate::mapping::GrpcMapping;
use crate::message::ProtoMessage;
use crate::plan::CallKind;
use crate::plan::RpcCall;
use crate::plan::RpcExecutionPlan;
use crate::request::RequestBuilder;
use crate::response::EmptyListPolicy;
use crate::response::EntityIndex;
use crate::response::JsonBuilder;
use crate::response::ResponseAssembler;
use crate::scheduler::DependencyGraph;

/// Sends one call to the service.
///
/// Deadlines and cancellation are the transport's concern.
#[async_trait]
pub trait RpcTransport: Send + Sync {
    type Message: ProtoMessage + Send;

    /// Invokes `call` with its proto3 JSON request payload.
    async fn invoke(&self, call: &RpcCall, request: Value) -> Result<Self::Message, tonic::Status>;
}

pub struct RpcExecutor<'a, T> {
    plan: &'a RpcExecutionPlan,
    mapping: &'a GrpcMapping,
    transport: &'a T,
}

impl<'a, T> RpcExecutor<'a, T>
where
    T: RpcTransport,
{
    pub fn new(plan: &'a RpcExecutionPlan, mapping: &'a GrpcMapping, transport: &'a T) -> Self {
        Self {
            plan,
            mapping,
            transport,
        }
    }

    /// Executes the plan level by level and assembles the GraphQL response.
    ///
    /// Calls of a level run concurrently. A failed call is reported in `errors` and the calls
    /// depending on it are skipped; the rest of the data is still returned.
    #[instrument(skip_all, level = "debug", fields(calls = self.plan.len()))]
    pub async fn execute(&self, variables: &Value) -> graphql::Response {
        let graph = DependencyGraph::new(&self.plan.calls);
        let levels = match graph.levels() {
            Ok(levels) => levels,
            Err(error) => return graphql::Response::from_errors(vec![(&error).into()]),
        };

        let requests = RequestBuilder::new(self.mapping);
        let mut assembler = self.assembler(variables);
        let mut failed = vec![false; graph.len()];
        let mut errors = Vec::new();

        for level in levels {
            let mut dispatched = Vec::with_capacity(level.len());
            for item in level {
                if let Some(&dependency) = item.dependent_ids.iter().find(|&&id| failed[id]) {
                    warn!(
                        call = item.id,
                        method = %item.call.method_name,
                        dependency,
                        "skipping call because a call it depends on failed"
                    );
                    failed[item.id] = true;
                    continue;
                }
                match requests.build(item.call, variables, assembler.data()) {
                    Ok(request) => dispatched.push((item, request)),
                    Err(error) => {
                        errors.push((&error).into());
                        failed[item.id] = true;
                    }
                }
            }
            debug!(calls = dispatched.len(), "dispatching level");

            let graph = &graph;
            let outcomes = join_all(dispatched.into_iter().map(|(item, request)| async move {
                let outcome = match self.transport.invoke(item.call, request).await {
                    Ok(message) => JsonBuilder::new(
                        self.mapping,
                        EmptyListPolicy::for_call(item.call.kind),
                    )
                    .marshal(&item.call.response, &message)
                    .map(|value| graph.set_fetch_data(item.id, value))
                    .map_err(|error| error.to_graphql_error()),
                    Err(status) => Err(graphql::Error::from_status(&status)),
                };
                (item.id, outcome.map_err(|error| at_response_path(item.call, error)))
            }))
            .await;

            let mut completed = Vec::with_capacity(outcomes.len());
            for (id, outcome) in outcomes {
                match outcome {
                    Ok(()) => completed.push(id),
                    Err(error) => {
                        debug!(call = id, error = %error, "call failed");
                        errors.push(error);
                        failed[id] = true;
                    }
                }
            }
            completed.sort_unstable();
            for id in completed {
                let (Some(item), Some(result)) = (graph.item(id), graph.take_fetch_data(id)) else {
                    continue;
                };
                if let Err(error) = assembler.merge(item.call, result) {
                    errors.push(at_response_path(item.call, error.to_graphql_error()));
                    failed[id] = true;
                }
            }
        }

        graphql::Response {
            data: Some(assembler.into_data()),
            errors,
        }
    }

    fn assembler(&self, variables: &Value) -> ResponseAssembler {
        let federated = self
            .plan
            .calls
            .iter()
            .any(|call| matches!(call.kind, CallKind::Entity | CallKind::Required));
        if !federated {
            return ResponseAssembler::new();
        }
        match EntityIndex::from_variables(variables) {
            Ok(index) => ResponseAssembler::with_entities(index),
            Err(_) => ResponseAssembler::new(),
        }
    }
}

/// Points the error of a splicing call at the field it resolves.
fn at_response_path(call: &RpcCall, error: graphql::Error) -> graphql::Error {
    match &call.response_path {
        Some(path) => error.with_path(path.to_string()),
        None => error,
    }
}
