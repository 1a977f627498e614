use super::Handler;
use crate::{generate_client_id, HandleFieldPayload, RecordProxy, RecordSourceProxy};
use fnv::FnvHashSet;
use serde_json::Value;
use tessera::{utils::get_handle_key, DataId, Variables};

pub const CONNECTION_HANDLE: &str = "connection";

const EDGES: &str = "edges";
const NODE: &str = "node";
const CURSOR: &str = "cursor";
const PAGE_INFO: &str = "pageInfo";
const PAGE_INFO_TYPE: &str = "PageInfo";
const END_CURSOR: &str = "endCursor";
const START_CURSOR: &str = "startCursor";
const HAS_NEXT_PAGE: &str = "hasNextPage";
const HAS_PREVIOUS_PAGE: &str = "hasPreviousPage";
const NEXT_EDGE_INDEX: &str = "__connection_next_edge_index";

/// Accumulates the pages of a `@connection` field into one client connection record.
///
/// The server field of every page is merged into the client field named by the handle key:
///
/// * without a cursor argument the edges are replaced (initial fetch or refetch),
/// * with `after` equal to the current `endCursor` the page is appended,
/// * with `before` equal to the current `startCursor` the page is prepended,
/// * any other cursor is out of order and ignored.
///
/// Edges are copied into client edge records with increasing indices, so edges of earlier
/// pages keep their ids across fetches.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConnectionHandler;

impl Handler for ConnectionHandler {
    fn update(&self, store: &RecordSourceProxy<'_>, payload: &HandleFieldPayload) {
        let record = match store.get(&payload.data_id) {
            Some(record) => record,
            None => return
        };
        let server_connection = match record.get_linked_record(&payload.field_key, None) {
            Some(connection) => connection,
            None => {
                record.set_value(Value::Null, &payload.handle_key, None);
                return;
            }
        };
        let server_page_info = server_connection.get_linked_record(PAGE_INFO, None);

        let connection_id = generate_client_id(record.get_data_id(), &payload.handle_key, None);
        let client_field = record.get_linked_record(&payload.handle_key, None);
        let has_client_field = client_field.is_some();
        let client_connection = client_field.or_else(|| store.get(&connection_id));

        let connection = match client_connection {
            Some(connection) => connection,
            None => {
                let typename = server_connection.get_type().unwrap_or_default();
                let connection = store.get_or_create(&connection_id, &typename);
                connection.set_value(Value::from(0), NEXT_EDGE_INDEX, None);
                connection.copy_fields_from(&server_connection);
                if let Some(server_edges) = server_connection.get_linked_records(EDGES, None) {
                    let edges = build_edges(store, &connection, &server_edges);
                    connection.set_linked_records(&edges, EDGES, None);
                }
                record.set_linked_record(&connection, &payload.handle_key, None);

                let page_info_id = generate_client_id(connection.get_data_id(), PAGE_INFO, None);
                let page_info = store.get_or_create(&page_info_id, PAGE_INFO_TYPE);
                page_info
                    .set_value(Value::Bool(false), HAS_NEXT_PAGE, None)
                    .set_value(Value::Bool(false), HAS_PREVIOUS_PAGE, None)
                    .set_value(Value::Null, END_CURSOR, None)
                    .set_value(Value::Null, START_CURSOR, None);
                if let Some(server_page_info) = &server_page_info {
                    page_info.copy_fields_from(server_page_info);
                }
                connection.set_linked_record(&page_info, PAGE_INFO, None);
                return;
            }
        };

        if !has_client_field {
            record.set_linked_record(&connection, &payload.handle_key, None);
        }
        let client_page_info = connection.get_linked_record(PAGE_INFO, None);
        let server_edges = server_connection
            .get_linked_records(EDGES, None)
            .map(|edges| build_edges(store, &connection, &edges));
        let prev_edges = connection.get_linked_records(EDGES, None);

        connection.copy_fields_from(&server_connection);
        if let Some(prev_edges) = &prev_edges {
            connection.set_linked_records(prev_edges, EDGES, None);
        }
        if let Some(client_page_info) = &client_page_info {
            connection.set_linked_record(client_page_info, PAGE_INFO, None);
        }

        let after = cursor_argument(&payload.args, "after");
        let before = cursor_argument(&payload.args, "before");
        let next_edges = match (prev_edges, server_edges) {
            (Some(prev_edges), Some(server_edges)) => {
                if let Some(after) = after {
                    let end_cursor = page_info_cursor(client_page_info.as_ref(), END_CURSOR);
                    if end_cursor.as_deref() != Some(after) {
                        tracing::warn!(
                            cursor = after,
                            connection = connection.get_data_id(),
                            "unexpected after cursor, edges must be fetched from the end of the list"
                        );
                        return;
                    }
                    let mut node_ids = FnvHashSet::default();
                    let mut edges = Vec::with_capacity(prev_edges.len() + server_edges.len());
                    merge_edges(&prev_edges, &mut edges, &mut node_ids);
                    merge_edges(&server_edges, &mut edges, &mut node_ids);
                    Some(edges)
                } else if let Some(before) = before {
                    let start_cursor = page_info_cursor(client_page_info.as_ref(), START_CURSOR);
                    if start_cursor.as_deref() != Some(before) {
                        tracing::warn!(
                            cursor = before,
                            connection = connection.get_data_id(),
                            "unexpected before cursor, edges must be fetched from the start of the list"
                        );
                        return;
                    }
                    let mut node_ids = FnvHashSet::default();
                    let mut edges = Vec::with_capacity(prev_edges.len() + server_edges.len());
                    merge_edges(&server_edges, &mut edges, &mut node_ids);
                    merge_edges(&prev_edges, &mut edges, &mut node_ids);
                    Some(edges)
                } else {
                    Some(server_edges)
                }
            }
            (None, Some(server_edges)) => Some(server_edges),
            (prev_edges, None) => prev_edges
        };
        if let Some(next_edges) = &next_edges {
            connection.set_linked_records(next_edges, EDGES, None);
        }

        if let (Some(client_page_info), Some(server_page_info)) =
            (client_page_info, server_page_info)
        {
            if after.is_none() && before.is_none() {
                client_page_info.copy_fields_from(&server_page_info);
            } else if before.is_some() {
                update_page_info(
                    &client_page_info,
                    &server_page_info,
                    HAS_PREVIOUS_PAGE,
                    START_CURSOR
                );
            } else {
                update_page_info(&client_page_info, &server_page_info, HAS_NEXT_PAGE, END_CURSOR);
            }
        }
    }
}

fn cursor_argument<'v>(args: &'v Variables, name: &str) -> Option<&'v str> {
    args.get(name).and_then(Value::as_str)
}

fn page_info_cursor(page_info: Option<&RecordProxy<'_, '_>>, key: &str) -> Option<String> {
    page_info
        .and_then(|page_info| page_info.get_value(key, None))
        .and_then(|cursor| cursor.as_str().map(str::to_string))
}

fn update_page_info(
    client: &RecordProxy<'_, '_>,
    server: &RecordProxy<'_, '_>,
    has_more_key: &str,
    cursor_key: &str
) {
    let has_more = server
        .get_value(has_more_key, None)
        .and_then(|value| value.as_bool())
        .unwrap_or(false);
    client.set_value(Value::Bool(has_more), has_more_key, None);
    if let Some(cursor @ Value::String(_)) = server.get_value(cursor_key, None) {
        client.set_value(cursor, cursor_key, None);
    }
}

fn build_edges<'p, 'a>(
    store: &'p RecordSourceProxy<'a>,
    connection: &RecordProxy<'p, 'a>,
    server_edges: &[Option<RecordProxy<'p, 'a>>]
) -> Vec<Option<RecordProxy<'p, 'a>>> {
    server_edges
        .iter()
        .map(|edge| {
            edge.as_ref()
                .map(|edge| build_connection_edge(store, connection, edge))
        })
        .collect()
}

/// Copy a server edge into the next client edge record of the connection.
fn build_connection_edge<'p, 'a>(
    store: &'p RecordSourceProxy<'a>,
    connection: &RecordProxy<'p, 'a>,
    edge: &RecordProxy<'p, 'a>
) -> RecordProxy<'p, 'a> {
    let index = connection
        .get_value(NEXT_EDGE_INDEX, None)
        .and_then(|index| index.as_u64())
        .unwrap_or(0) as usize;
    let edge_id = generate_client_id(connection.get_data_id(), EDGES, Some(index));
    let client_edge = store.get_or_create(&edge_id, &edge.get_type().unwrap_or_default());
    client_edge.copy_fields_from(edge);
    connection.set_value(Value::from(index + 1), NEXT_EDGE_INDEX, None);
    client_edge
}

/// Append the edges of `source` to `target`, skipping nulls and nodes already present.
fn merge_edges<'p, 'a>(
    source: &[Option<RecordProxy<'p, 'a>>],
    target: &mut Vec<Option<RecordProxy<'p, 'a>>>,
    node_ids: &mut FnvHashSet<DataId>
) {
    for edge in source.iter().flatten() {
        let node = edge.get_linked_record(NODE, None);
        if let Some(node) = node {
            if !node_ids.insert(node.get_data_id().to_string()) {
                continue;
            }
        }
        target.push(Some(edge.clone()));
    }
}

/// The client connection stored under `key` (the `key` of the `@connection` directive).
pub fn get_connection<'p, 'a>(
    record: &RecordProxy<'p, 'a>,
    key: &str,
    filters: Option<&Variables>
) -> Option<RecordProxy<'p, 'a>> {
    let handle_key = get_handle_key(CONNECTION_HANDLE, key, "");
    record.get_linked_record(&handle_key, filters)
}

/// Create an edge for `node`, to be inserted with
/// [`insert_edge_after`](./fn.insert_edge_after.html) or
/// [`insert_edge_before`](./fn.insert_edge_before.html).
pub fn create_edge<'p, 'a>(
    store: &'p RecordSourceProxy<'a>,
    connection: &RecordProxy<'p, 'a>,
    node: &RecordProxy<'_, '_>,
    edge_type: &str
) -> RecordProxy<'p, 'a> {
    let edge_id = generate_client_id(connection.get_data_id(), node.get_data_id(), None);
    let edge = store.get_or_create(&edge_id, edge_type);
    edge.set_linked_record(node, NODE, None);
    if edge.get_value(CURSOR, None).is_none() {
        edge.set_value(Value::Null, CURSOR, None);
    }
    edge
}

/// Insert `edge` after the edge with `cursor`, or at the end.
pub fn insert_edge_after<'p, 'a>(
    connection: &RecordProxy<'p, 'a>,
    edge: &RecordProxy<'p, 'a>,
    cursor: Option<&str>
) {
    let mut edges = connection.get_linked_records(EDGES, None).unwrap_or_default();
    let position = cursor.and_then(|cursor| edge_position(&edges, cursor));
    let index = match position {
        Some(position) => position + 1,
        None => edges.len()
    };
    edges.insert(index, Some(edge.clone()));
    connection.set_linked_records(&edges, EDGES, None);
}

/// Insert `edge` before the edge with `cursor`, or at the start.
pub fn insert_edge_before<'p, 'a>(
    connection: &RecordProxy<'p, 'a>,
    edge: &RecordProxy<'p, 'a>,
    cursor: Option<&str>
) {
    let mut edges = connection.get_linked_records(EDGES, None).unwrap_or_default();
    let index = cursor
        .and_then(|cursor| edge_position(&edges, cursor))
        .unwrap_or(0);
    edges.insert(index, Some(edge.clone()));
    connection.set_linked_records(&edges, EDGES, None);
}

/// Remove every edge pointing to `node_id`.
pub fn delete_node(connection: &RecordProxy<'_, '_>, node_id: &str) {
    let edges = match connection.get_linked_records(EDGES, None) {
        Some(edges) => edges,
        None => return
    };
    let remaining: Vec<_> = edges
        .into_iter()
        .filter(|edge| {
            let node = edge
                .as_ref()
                .and_then(|edge| edge.get_linked_record(NODE, None));
            node.map(|node| node.get_data_id() != node_id)
                .unwrap_or(true)
        })
        .collect();
    connection.set_linked_records(&remaining, EDGES, None);
}

fn edge_position(edges: &[Option<RecordProxy<'_, '_>>], cursor: &str) -> Option<usize> {
    edges.iter().position(|edge| {
        edge.as_ref()
            .and_then(|edge| edge.get_value(CURSOR, None))
            .map(|value| value.as_str() == Some(cursor))
            .unwrap_or(false)
    })
}
