//! Compiled artifacts for a small `User` schema.
//!
//! ```graphql
//! type User implements Node {
//!     id: ID!
//!     name: String
//!     friends(first: Int, after: String): FriendsConnection
//!     friendsList: [User]
//!     nameRenderer: UserNameRenderer
//! }
//! ```

use serde_json::{json, Value};
use std::sync::Arc;
use tessera::ast::{ConcreteRequest, NormalizationSplitOperation, ReaderFragment};

fn scalar(name: &str) -> Value {
    json!({ "kind": "ScalarField", "name": name })
}

fn variable(name: &str) -> Value {
    json!({ "kind": "Variable", "name": name, "variableName": name })
}

fn local(name: &str, default_value: Value) -> Value {
    json!({ "kind": "LocalArgument", "name": name, "defaultValue": default_value })
}

fn node_by_id(selections: Vec<Value>) -> Value {
    json!({
        "kind": "LinkedField",
        "name": "node",
        "args": [variable("id")],
        "selections": selections
    })
}

fn node_one(selections: Vec<Value>) -> Value {
    json!({
        "kind": "LinkedField",
        "name": "node",
        "args": [{ "kind": "Literal", "name": "id", "value": "1" }],
        "storageKey": "node(id:\"1\")",
        "selections": selections
    })
}

fn request(name: &str, kind: &str, fragment: Value, operation: Value) -> Arc<ConcreteRequest> {
    let request = json!({
        "fragment": fragment,
        "operation": operation,
        "params": {
            "cacheId": format!("{:x}", tessera::utils::progressive_hash(0, &name)),
            "name": name,
            "operationKind": kind
        }
    });
    Arc::new(serde_json::from_value(request).expect("invalid request artifact"))
}

fn fragment(value: Value) -> Arc<ReaderFragment> {
    Arc::new(serde_json::from_value(value).expect("invalid fragment artifact"))
}

fn friends_connection(args: Vec<Value>) -> Vec<Value> {
    vec![
        json!({
            "kind": "LinkedField",
            "name": "friends",
            "args": args.clone(),
            "concreteType": "FriendsConnection",
            "selections": [
                {
                    "kind": "LinkedField",
                    "name": "edges",
                    "concreteType": "FriendsEdge",
                    "plural": true,
                    "selections": [
                        scalar("cursor"),
                        {
                            "kind": "LinkedField",
                            "name": "node",
                            "concreteType": "User",
                            "selections": [scalar("__typename"), scalar("id"), scalar("name")]
                        }
                    ]
                },
                page_info()
            ]
        }),
        json!({
            "kind": "LinkedHandle",
            "name": "friends",
            "args": args,
            "handle": "connection",
            "key": "FriendsFragment_friends"
        })
    ]
}

fn page_info() -> Value {
    json!({
        "kind": "LinkedField",
        "name": "pageInfo",
        "concreteType": "PageInfo",
        "selections": [
            scalar("endCursor"),
            scalar("hasNextPage"),
            scalar("startCursor"),
            scalar("hasPreviousPage")
        ]
    })
}

lazy_static! {
    static ref USER_FRAGMENT: Arc<ReaderFragment> = fragment(json!({
        "name": "UserFragment",
        "typeName": "User",
        "selections": [scalar("id"), scalar("name")]
    }));

    /// `query UserQuery($id: ID!) { node(id: $id) { id ...UserFragment } }`
    static ref USER_QUERY: Arc<ConcreteRequest> = request(
        "UserQuery",
        "query",
        json!({
            "name": "UserQuery",
            "typeName": "Query",
            "argumentDefinitions": [local("id", Value::Null)],
            "selections": [node_by_id(vec![
                scalar("id"),
                json!({ "kind": "FragmentSpread", "name": "UserFragment" })
            ])]
        }),
        json!({
            "name": "UserQuery",
            "argumentDefinitions": [local("id", Value::Null)],
            "selections": [node_by_id(vec![scalar("__typename"), scalar("id"), scalar("name")])]
        })
    );

    static ref FRIENDS_FRAGMENT: Arc<ReaderFragment> = fragment(json!({
        "name": "FriendsFragment",
        "typeName": "User",
        "argumentDefinitions": [
            { "kind": "RootArgument", "name": "count" },
            { "kind": "RootArgument", "name": "cursor" }
        ],
        "metadata": {
            "connection": [{
                "path": ["friends"],
                "direction": "bidirectional",
                "cursor": "cursor",
                "count": "count"
            }],
            "refetch": {
                "operation": "FriendsPaginationQuery",
                "fragmentPathInResult": ["node"],
                "identifierField": "id",
                "connection": {
                    "path": ["friends"],
                    "forward": { "cursor": "cursor", "count": "count" },
                    "backward": { "cursor": "before", "count": "last" }
                }
            }
        },
        "selections": [
            scalar("id"),
            scalar("name"),
            {
                "kind": "LinkedField",
                "name": "friends",
                "storageKey": "__FriendsFragment_friends_connection",
                "concreteType": "FriendsConnection",
                "selections": [
                    {
                        "kind": "LinkedField",
                        "name": "edges",
                        "concreteType": "FriendsEdge",
                        "plural": true,
                        "selections": [
                            scalar("cursor"),
                            {
                                "kind": "LinkedField",
                                "name": "node",
                                "concreteType": "User",
                                "selections": [scalar("id"), scalar("name")]
                            }
                        ]
                    },
                    page_info()
                ]
            }
        ]
    }));

    /// `query FriendsQuery($id: ID!, $count: Int) { node(id: $id) { id ...FriendsFragment } }`
    ///
    /// The fragment reads `friends(first: $count) @connection(key: "FriendsFragment_friends")`.
    static ref FRIENDS_QUERY: Arc<ConcreteRequest> = {
        let mut selections = vec![scalar("__typename"), scalar("id"), scalar("name")];
        selections.extend(friends_connection(vec![json!({
            "kind": "Variable",
            "name": "first",
            "variableName": "count"
        })]));
        request(
            "FriendsQuery",
            "query",
            json!({
                "name": "FriendsQuery",
                "typeName": "Query",
                "argumentDefinitions": [local("id", Value::Null), local("count", json!(10))],
                "selections": [node_by_id(vec![
                    scalar("id"),
                    json!({ "kind": "FragmentSpread", "name": "FriendsFragment" })
                ])]
            }),
            json!({
                "name": "FriendsQuery",
                "argumentDefinitions": [local("id", Value::Null), local("count", json!(10))],
                "selections": [node_by_id(selections)]
            })
        )
    };

    /// The refetch query of `FriendsFragment`, paginating forward with `$count` and `$cursor`
    /// and backward with `$last` and `$before`.
    static ref FRIENDS_PAGINATION_QUERY: Arc<ConcreteRequest> = {
        let mut selections = vec![scalar("__typename"), scalar("id"), scalar("name")];
        selections.extend(friends_connection(vec![
            json!({ "kind": "Variable", "name": "after", "variableName": "cursor" }),
            json!({ "kind": "Variable", "name": "before", "variableName": "before" }),
            json!({ "kind": "Variable", "name": "first", "variableName": "count" }),
            json!({ "kind": "Variable", "name": "last", "variableName": "last" })
        ]));
        let arguments = vec![
            local("before", Value::Null),
            local("count", json!(10)),
            local("cursor", Value::Null),
            local("id", Value::Null),
            local("last", Value::Null)
        ];
        request(
            "FriendsPaginationQuery",
            "query",
            json!({
                "name": "FriendsPaginationQuery",
                "typeName": "Query",
                "argumentDefinitions": arguments.clone(),
                "selections": [node_by_id(vec![
                    scalar("__typename"),
                    json!({ "kind": "FragmentSpread", "name": "FriendsFragment" })
                ])]
            }),
            json!({
                "name": "FriendsPaginationQuery",
                "argumentDefinitions": arguments,
                "selections": [node_by_id(selections)]
            })
        )
    };

    /// `query DeferQuery { node(id: "1") { id ...UserName @defer(label: "UserName") } }`
    static ref DEFER_QUERY: Arc<ConcreteRequest> = request(
        "DeferQuery",
        "query",
        json!({
            "name": "DeferQuery",
            "typeName": "Query",
            "selections": [node_one(vec![
                scalar("id"),
                json!({
                    "kind": "Defer",
                    "label": "DeferQuery$defer$UserName",
                    "selections": [scalar("name")]
                })
            ])]
        }),
        json!({
            "name": "DeferQuery",
            "selections": [node_one(vec![
                scalar("__typename"),
                scalar("id"),
                json!({
                    "kind": "Defer",
                    "label": "DeferQuery$defer$UserName",
                    "selections": [scalar("name")]
                })
            ])]
        })
    );

    /// `query StreamQuery { node(id: "1") { id friendsList @stream { id name } } }`
    static ref STREAM_QUERY: Arc<ConcreteRequest> = {
        let friends_list = |selections: Vec<Value>| json!({
            "kind": "Stream",
            "label": "StreamQuery$stream$friendsList",
            "selections": [{
                "kind": "LinkedField",
                "name": "friendsList",
                "concreteType": "User",
                "plural": true,
                "selections": selections
            }]
        });
        request(
            "StreamQuery",
            "query",
            json!({
                "name": "StreamQuery",
                "typeName": "Query",
                "selections": [node_one(vec![
                    scalar("id"),
                    friends_list(vec![scalar("id"), scalar("name")])
                ])]
            }),
            json!({
                "name": "StreamQuery",
                "selections": [node_one(vec![
                    scalar("__typename"),
                    scalar("id"),
                    friends_list(vec![scalar("__typename"), scalar("id"), scalar("name")])
                ])]
            })
        )
    };

    /// `query ModuleQuery { node(id: "1") { id nameRenderer { ...PlainUserNameRenderer_name @module } } }`
    static ref MODULE_QUERY: Arc<ConcreteRequest> = {
        let name_renderer = |typename: bool| {
            let mut selections = Vec::new();
            if typename {
                selections.push(scalar("__typename"));
            }
            selections.push(json!({
                "kind": "ModuleImport",
                "documentName": "ModuleQuery",
                "fragmentName": "PlainUserNameRenderer_name",
                "fragmentPropName": "name"
            }));
            json!({
                "kind": "LinkedField",
                "name": "nameRenderer",
                "selections": selections
            })
        };
        request(
            "ModuleQuery",
            "query",
            json!({
                "name": "ModuleQuery",
                "typeName": "Query",
                "selections": [node_one(vec![scalar("id"), name_renderer(false)])]
            }),
            json!({
                "name": "ModuleQuery",
                "selections": [node_one(vec![
                    scalar("__typename"),
                    scalar("id"),
                    name_renderer(true)
                ])]
            })
        )
    };

    static ref MODULE_SPLIT_OPERATION: Arc<NormalizationSplitOperation> = Arc::new(
        serde_json::from_value(json!({
            "name": "PlainUserNameRenderer_name$normalization.graphql",
            "selections": [scalar("plaintext")]
        }))
        .expect("invalid split operation artifact")
    );

    /// `mutation SetNameMutation($id: ID!, $name: String!) { setName(id: $id, name: $name) { id name } }`
    static ref SET_NAME_MUTATION: Arc<ConcreteRequest> = {
        let set_name = |selections: Vec<Value>| json!({
            "kind": "LinkedField",
            "name": "setName",
            "args": [variable("id"), variable("name")],
            "selections": selections
        });
        let arguments = vec![local("id", Value::Null), local("name", Value::Null)];
        request(
            "SetNameMutation",
            "mutation",
            json!({
                "name": "SetNameMutation",
                "typeName": "Mutation",
                "argumentDefinitions": arguments.clone(),
                "selections": [set_name(vec![scalar("id"), scalar("name")])]
            }),
            json!({
                "name": "SetNameMutation",
                "argumentDefinitions": arguments,
                "selections": [set_name(vec![scalar("__typename"), scalar("id"), scalar("name")])]
            })
        )
    };
}

pub fn user_fragment() -> Arc<ReaderFragment> {
    USER_FRAGMENT.clone()
}

pub fn user_query() -> Arc<ConcreteRequest> {
    USER_QUERY.clone()
}

pub fn friends_fragment() -> Arc<ReaderFragment> {
    FRIENDS_FRAGMENT.clone()
}

pub fn friends_query() -> Arc<ConcreteRequest> {
    FRIENDS_QUERY.clone()
}

pub fn friends_pagination_query() -> Arc<ConcreteRequest> {
    FRIENDS_PAGINATION_QUERY.clone()
}

pub fn defer_query() -> Arc<ConcreteRequest> {
    DEFER_QUERY.clone()
}

pub fn stream_query() -> Arc<ConcreteRequest> {
    STREAM_QUERY.clone()
}

pub fn module_query() -> Arc<ConcreteRequest> {
    MODULE_QUERY.clone()
}

pub fn module_split_operation() -> Arc<NormalizationSplitOperation> {
    MODULE_SPLIT_OPERATION.clone()
}

pub fn set_name_mutation() -> Arc<ConcreteRequest> {
    SET_NAME_MUTATION.clone()
}
