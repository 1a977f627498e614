//! Hashing and storage key helpers shared by the reader, normalizer and store.

use crate::{
    ast::{Argument, LinkedHandle},
    Variables
};
use serde::Serialize;
use serde_json::Value;
use std::num::Wrapping;

/// When we have separate values it's useful to run a progressive
/// version of djb2 where we pretend that we're still looping over
/// the same value
pub fn progressive_hash<V: Serialize>(h: u32, x: &V) -> u64 {
    let x = bincode::serialize(x).unwrap_or_default();

    let mut h = Wrapping(h as u64);

    for byte in x {
        h = (h << 5) + h + Wrapping(byte as u64)
    }

    h.0
}

/// Serialize a JSON value with object keys in sorted order, so that deep-equal values always
/// produce the same string.
///
/// ```
/// # use serde_json::json;
/// use tessera::utils::stable_stringify;
///
/// assert_eq!(
///     stable_stringify(&json!({ "b": 1, "a": [true, null] })),
///     r#"{"a":[true,null],"b":1}"#
/// );
/// ```
pub fn stable_stringify(value: &Value) -> String {
    // Keys come out sorted as long as serde_json's `preserve_order` feature is off.
    value.to_string()
}

/// Resolve argument values against the variables in scope. Variables that aren't bound are
/// left out.
pub fn get_argument_values(args: &[Argument], variables: &Variables) -> Variables {
    let mut values = Variables::new();
    for arg in args {
        match arg {
            Argument::Literal { name, value } => {
                values.insert(name.clone(), value.clone());
            }
            Argument::Variable {
                name,
                variable_name
            } => {
                if let Some(value) = variables.get(variable_name) {
                    values.insert(name.clone(), value.clone());
                }
            }
        }
    }
    values
}

/// Append the encoded arguments to a field name: `name(a:1,b:"x")`. Arguments are sorted
/// by name and null values are dropped; if nothing remains the bare name is returned.
pub fn format_storage_key(name: &str, values: &Variables) -> String {
    let mut names: Vec<&String> = values
        .iter()
        .filter(|(_, value)| !value.is_null())
        .map(|(name, _)| name)
        .collect();
    if names.is_empty() {
        return name.to_string();
    }
    names.sort();

    let encoded: Vec<String> = names
        .into_iter()
        .map(|arg| format!("{}:{}", arg, stable_stringify(&values[arg])))
        .collect();
    format!("{}({})", name, encoded.join(","))
}

/// The key a field is stored under in its record.
///
/// ```
/// # use serde_json::json;
/// use tessera::{ast::Argument, utils::get_storage_key};
///
/// let args = vec![
///     Argument::Variable { name: "first".into(), variable_name: "count".into() },
///     Argument::Literal { name: "after".into(), value: json!(null) }
/// ];
/// let variables = json!({ "count": 10 }).as_object().unwrap().clone();
///
/// assert_eq!(get_storage_key("friends", &args, &variables), "friends(first:10)");
/// assert_eq!(get_storage_key("name", &[], &variables), "name");
/// ```
pub fn get_storage_key(name: &str, args: &[Argument], variables: &Variables) -> String {
    if args.is_empty() {
        return name.to_string();
    }
    format_storage_key(name, &get_argument_values(args, variables))
}

/// The storage key of a precompiled field, preferring the key computed at compile time.
pub fn field_storage_key(
    name: &str,
    storage_key: Option<&str>,
    args: &[Argument],
    variables: &Variables
) -> String {
    match storage_key {
        Some(key) => key.to_string(),
        None => get_storage_key(name, args, variables)
    }
}

/// The name of the client field a handle writes to, e.g. `__FriendsList_friends_connection`.
pub fn get_handle_key(handle: &str, key: &str, field_name: &str) -> String {
    if key.is_empty() {
        format!("__{}_{}", field_name, handle)
    } else {
        format!("__{}_{}", key, handle)
    }
}

/// The storage key of a handle field. Only the arguments named in `filters` partition it, so
/// pages fetched with different cursors share one client field.
///
/// ```
/// # use serde_json::json;
/// use tessera::{ast::{Argument, LinkedHandle}, utils::get_handle_storage_key};
///
/// let handle = LinkedHandle {
///     alias: None,
///     name: "friends".into(),
///     args: vec![
///         Argument::Literal { name: "first".into(), value: json!(2) },
///         Argument::Literal { name: "orderBy".into(), value: json!("name") }
///     ],
///     handle: "connection".into(),
///     key: "FriendsList_friends".into(),
///     filters: Some(vec!["orderBy".into()]),
///     handle_args: vec![]
/// };
///
/// assert_eq!(
///     get_handle_storage_key(&handle, &Default::default()),
///     r#"__FriendsList_friends_connection(orderBy:"name")"#
/// );
/// ```
pub fn get_handle_storage_key(handle: &LinkedHandle, variables: &Variables) -> String {
    let handle_key = get_handle_key(&handle.handle, &handle.key, &handle.name);
    let filters = match &handle.filters {
        Some(filters) if !filters.is_empty() && !handle.args.is_empty() => filters,
        _ => return handle_key
    };
    let args: Vec<Argument> = handle
        .args
        .iter()
        .filter(|arg| filters.iter().any(|filter| filter == arg.name()))
        .cloned()
        .collect();
    format_storage_key(&handle_key, &get_argument_values(&args, variables))
}

/// Stable string form of a set of variables, used in request identifiers.
pub fn stable_variables(variables: &Variables) -> String {
    stable_stringify(&Value::Object(variables.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vars(value: Value) -> Variables {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn storage_keys_are_independent_of_argument_order() {
        let a = vec![
            Argument::Literal {
                name: "b".into(),
                value: json!({ "y": 1, "x": 2 })
            },
            Argument::Variable {
                name: "a".into(),
                variable_name: "v".into()
            }
        ];
        let mut b = a.clone();
        b.reverse();
        let variables = vars(json!({ "v": "hello" }));

        let key = get_storage_key("field", &a, &variables);
        assert_eq!(key, r#"field(a:"hello",b:{"x":2,"y":1})"#);
        assert_eq!(key, get_storage_key("field", &b, &variables));
    }

    #[test]
    fn unbound_and_null_arguments_collapse_to_the_name() {
        let args = vec![
            Argument::Variable {
                name: "after".into(),
                variable_name: "cursor".into()
            },
            Argument::Literal {
                name: "before".into(),
                value: Value::Null
            }
        ];
        assert_eq!(get_storage_key("friends", &args, &Variables::new()), "friends");
    }

    #[test]
    fn handle_key_falls_back_to_the_field_name() {
        assert_eq!(get_handle_key("connection", "", "friends"), "__friends_connection");
        assert_eq!(
            get_handle_key("connection", "User_friends", "friends"),
            "__User_friends_connection"
        );
    }

    #[test]
    fn nested_objects_stringify_with_sorted_keys() {
        let mut forward = serde_json::Map::new();
        forward.insert("z".into(), json!({ "b": [{ "d": 1, "c": "x" }], "a": null }));
        forward.insert("m".into(), json!("\"quoted\""));
        let mut backward = serde_json::Map::new();
        backward.insert("m".into(), json!("\"quoted\""));
        backward.insert("z".into(), json!({ "a": null, "b": [{ "c": "x", "d": 1 }] }));

        let expected = r#"{"m":"\"quoted\"","z":{"a":null,"b":[{"c":"x","d":1}]}}"#;
        assert_eq!(stable_stringify(&Value::Object(forward)), expected);
        assert_eq!(stable_stringify(&Value::Object(backward)), expected);
    }

    #[test]
    fn progressive_hash_is_deterministic() {
        let a = progressive_hash(5381, &"UserQuery{\"id\":\"1\"}");
        let b = progressive_hash(5381, &"UserQuery{\"id\":\"1\"}");
        let c = progressive_hash(5381, &"UserQuery{\"id\":\"2\"}");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
