use std::collections::HashMap;

use apollo_compiler::ExecutableDocument;
use apollo_compiler::Schema;
use apollo_compiler::validation::Valid;
use async_trait::async_trait;
use grpc_datasource::FederationConfig;
use grpc_datasource::GrpcMapping;
use grpc_datasource::RpcExecutionPlan;
use grpc_datasource::RpcExecutor;
use grpc_datasource::RpcPlanner;
use grpc_datasource::RpcTransport;
use grpc_datasource::graphql;
use grpc_datasource::json_ext::Object;
use grpc_datasource::message::ProtoMessage;
use grpc_datasource::message::ProtoValue;
use grpc_datasource::plan::RpcCall;
use parking_lot::Mutex;
use serde_json_bytes::Value;

/// A message read from a JSON object, the way a service would have encoded it.
///
/// A oneof is an object with a single key naming the concrete message type.
#[derive(Clone, Debug)]
pub(crate) struct JsonMessage(Object);

fn to_proto(value: &Value) -> Option<ProtoValue<JsonMessage>> {
    Some(match value {
        Value::Null => return None,
        Value::Bool(value) => ProtoValue::Bool(*value),
        Value::Number(number) => match number.as_i64() {
            Some(int) => i32::try_from(int)
                .map(ProtoValue::I32)
                .unwrap_or(ProtoValue::I64(int)),
            None => ProtoValue::F64(number.as_f64()?),
        },
        Value::String(string) => ProtoValue::String(string.as_str().to_string()),
        Value::Array(items) => ProtoValue::List(items.iter().filter_map(to_proto).collect()),
        Value::Object(object) => ProtoValue::Message(JsonMessage(object.clone())),
    })
}

impl ProtoMessage for JsonMessage {
    fn field_value(&self, name: &str) -> Option<ProtoValue<Self>> {
        self.0.get(name).and_then(to_proto)
    }

    fn oneof_case(&self, oneof: &str) -> Option<(String, Self)> {
        let (type_name, value) = self.0.get(oneof)?.as_object()?.iter().next()?;
        Some((
            type_name.as_str().to_string(),
            JsonMessage(value.as_object()?.clone()),
        ))
    }
}

/// Answers each method with a canned JSON response and records the requests it receives.
#[derive(Default)]
pub(crate) struct MockService {
    responses: HashMap<String, Result<Value, tonic::Status>>,
    requests: Mutex<Vec<(String, Value)>>,
}

impl MockService {
    pub(crate) fn with(mut self, method: &str, response: Value) -> Self {
        self.responses.insert(method.to_string(), Ok(response));
        self
    }

    pub(crate) fn failing(mut self, method: &str, status: tonic::Status) -> Self {
        self.responses.insert(method.to_string(), Err(status));
        self
    }

    pub(crate) fn request(&self, method: &str) -> Option<Value> {
        self.requests
            .lock()
            .iter()
            .find(|(name, _)| name == method)
            .map(|(_, request)| request.clone())
    }
}

#[async_trait]
impl RpcTransport for MockService {
    type Message = JsonMessage;

    async fn invoke(&self, call: &RpcCall, request: Value) -> Result<JsonMessage, tonic::Status> {
        self.requests
            .lock()
            .push((call.method_name.clone(), request));
        match self.responses.get(&call.method_name) {
            Some(Ok(Value::Object(response))) => Ok(JsonMessage(response.clone())),
            Some(Ok(_)) => Ok(JsonMessage(Object::new())),
            Some(Err(status)) => Err(status.clone()),
            None => Err(tonic::Status::unimplemented(call.method_name.clone())),
        }
    }
}

pub(crate) struct Subgraph {
    pub(crate) schema: Valid<Schema>,
    pub(crate) mapping: GrpcMapping,
    pub(crate) federation: FederationConfig,
}

impl Subgraph {
    pub(crate) fn new(schema: &str, mapping: GrpcMapping) -> Self {
        let schema = Schema::parse_and_validate(schema, "schema.graphql").unwrap();
        let federation = FederationConfig::from_schema(&schema);
        Self {
            schema,
            mapping,
            federation,
        }
    }

    pub(crate) fn plan(&self, query: &str) -> RpcExecutionPlan {
        let document =
            ExecutableDocument::parse_and_validate(&self.schema, query, "query.graphql").unwrap();
        RpcPlanner::new(&self.schema, &self.mapping, &self.federation)
            .plan(&document, None)
            .unwrap()
    }

    pub(crate) async fn execute(
        &self,
        service: &MockService,
        query: &str,
        variables: Value,
    ) -> graphql::Response {
        let plan = self.plan(query);
        RpcExecutor::new(&plan, &self.mapping, service)
            .execute(&variables)
            .await
    }
}
