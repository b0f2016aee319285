use grpc_datasource::GrpcMapping;
use pretty_assertions::assert_eq;
use serde_json_bytes::json;

use crate::common::MockService;
use crate::common::Subgraph;

const SCHEMA: &str = r#"
    directive @connect__fieldResolver(context: String!) on FIELD_DEFINITION

    type Query {
      user(id: ID!): User
      animals: [Animal!]!
      matrix: [[Int]]
      categories(kind: Kind!): [Category!]!
    }

    enum Role { ADMIN GUEST }
    enum Kind { BOOKS ELECTRONICS }

    type User {
      id: ID!
      name: String
      role: Role!
    }

    interface Animal { name: String! }
    type Cat implements Animal { name: String! meowVolume: Int! }
    type Dog implements Animal { name: String! barkVolume: Int! }

    type Category {
      id: ID!
      name: String!
      productCount(inStock: Boolean): Int @connect__fieldResolver(context: "id")
    }
"#;

const MAPPING: &str = r#"
service: CatalogService
enum_values:
  Role:
    - value: ADMIN
      target_value: ROLE_ADMIN
    - value: GUEST
      target_value: ROLE_GUEST
  Kind:
    - value: BOOKS
      target_value: KIND_BOOKS
    - value: ELECTRONICS
      target_value: KIND_ELECTRONICS
"#;

fn subgraph() -> Subgraph {
    Subgraph::new(SCHEMA, GrpcMapping::from_yaml(MAPPING).unwrap())
}

#[tokio::test]
async fn root_fields_are_fetched_and_merged() {
    let subgraph = subgraph();
    let service = MockService::default()
        .with(
            "QueryUser",
            json!({"user": {
                "id": "1",
                "name": {"value": "Ada"},
                "role": "ROLE_ADMIN"
            }}),
        )
        .with(
            "QueryAnimals",
            json!({"animals": [
                {"instance": {"Cat": {"name": "Tom", "meow_volume": 3}}},
                {"instance": {"Dog": {"name": "Rex", "bark_volume": 5}}}
            ]}),
        )
        .with(
            "QueryMatrix",
            json!({"matrix": {"list": {"items": [
                {"list": {"items": [1, 2]}},
                {}
            ]}}}),
        );

    let response = subgraph
        .execute(
            &service,
            r#"query($id: ID!) {
              user(id: $id) { id name role }
              animals {
                __typename
                name
                ... on Cat { meowVolume }
                ... on Dog { barkVolume }
              }
              matrix
            }"#,
            json!({"id": "1"}),
        )
        .await;

    assert_eq!(response.errors, vec![]);
    assert_eq!(
        response.data,
        Some(json!({
            "user": {"id": "1", "name": "Ada", "role": "ADMIN"},
            "animals": [
                {"__typename": "Cat", "name": "Tom", "meowVolume": 3},
                {"__typename": "Dog", "name": "Rex", "barkVolume": 5}
            ],
            "matrix": [[1, 2], null]
        }))
    );
    assert_eq!(service.request("QueryUser"), Some(json!({"id": "1"})));
}

#[tokio::test]
async fn field_resolvers_run_after_their_parent() {
    let subgraph = subgraph();
    let service = MockService::default()
        .with(
            "QueryCategories",
            json!({"categories": [{"id": "c1", "name": "Books"}, {"id": "c2", "name": "Games"}]}),
        )
        .with(
            "ResolveCategoryProductCount",
            json!({"result": [{"product_count": {"value": 12}}, {}]}),
        );

    let response = subgraph
        .execute(
            &service,
            r#"query($inStock: Boolean) {
              categories(kind: BOOKS) { name productCount(inStock: $inStock) }
            }"#,
            json!({"inStock": true}),
        )
        .await;

    assert_eq!(response.errors, vec![]);
    assert_eq!(
        response.data,
        Some(json!({"categories": [
            {"id": "c1", "name": "Books", "productCount": 12},
            {"id": "c2", "name": "Games", "productCount": null}
        ]}))
    );
    assert_eq!(
        service.request("QueryCategories"),
        Some(json!({"kind": "KIND_BOOKS"}))
    );
    assert_eq!(
        service.request("ResolveCategoryProductCount"),
        Some(json!({
            "context": [{"id": "c1"}, {"id": "c2"}],
            "field_args": {"in_stock": true}
        }))
    );
}

#[tokio::test]
async fn transport_errors_keep_the_other_root_fields() {
    let subgraph = subgraph();
    let service = MockService::default()
        .failing("QueryUser", tonic::Status::permission_denied("denied"))
        .with("QueryAnimals", json!({"animals": []}));

    let response = subgraph
        .execute(
            &service,
            r#"query { user(id: "1") { id } animals { name } }"#,
            json!({}),
        )
        .await;

    assert_eq!(response.data, Some(json!({"animals": []})));
    assert_eq!(
        response.to_json(),
        json!({
            "data": {"animals": []},
            "errors": [{"message": "denied", "extensions": {"code": "PermissionDenied"}}]
        })
    );
    assert_eq!(service.request("QueryUser"), Some(json!({"id": "1"})));
}

#[test]
fn plans_render_deterministically() {
    let subgraph = subgraph();
    let query = r#"query($id: ID!) { user(id: $id) { id role } }"#;
    let plan = subgraph.plan(query);
    assert_eq!(plan, subgraph.plan(query));
    insta::assert_snapshot!(plan, @r###"
    RpcExecutionPlan {
      Call(id: 0, kind: Standard, service: CatalogService, method: QueryUser, deps: []) {
        request: QueryUserRequest {
          id: string -> "id"
        }
        response: QueryUserResponse {
          user: optional message -> "user" User {
            id: string -> "id"
            role: enum Role -> "role"
          }
        }
      }
    }
    "###);
}
