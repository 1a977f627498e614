use crate::Data;
use std::sync::Arc;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageInfo {
    pub end_cursor: Option<String>,
    pub has_next_page: bool,
    pub start_cursor: Option<String>,
    pub has_previous_page: bool
}

impl PageInfo {
    /// Read the page info of a connection's `pageInfo` data.
    pub fn from_data(data: &Data) -> Self {
        let cursor = |key: &str| data.get(key).and_then(Data::as_str).map(str::to_string);
        let flag = |key: &str| {
            data.get(key)
                .and_then(Data::as_scalar)
                .and_then(|value| value.as_bool())
                .unwrap_or(false)
        };
        PageInfo {
            end_cursor: cursor("endCursor"),
            has_next_page: flag("hasNextPage"),
            start_cursor: cursor("startCursor"),
            has_previous_page: flag("hasPreviousPage")
        }
    }
}

/// The accumulated edges of a paginated connection.
///
/// States are never mutated; every event produces a new state. Edges carried over from the
/// previous state are the same `Arc`s, so unchanged edges compare by pointer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConnectionState {
    pub edges: Arc<Vec<Data>>,
    pub page_info: PageInfo
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// The first read of the connection.
    Initial { edges: Vec<Data>, page_info: PageInfo },
    /// A page was added after the last edge.
    Append { edges: Vec<Data>, page_info: PageInfo },
    /// A page was added before the first edge.
    Prepend { edges: Vec<Data>, page_info: PageInfo },
    /// The edges were replaced, e.g. by a refetch.
    Reset { edges: Vec<Data>, page_info: PageInfo }
}

impl ConnectionState {
    /// Read a connection's `edges` and `pageInfo` data.
    pub fn from_data(connection: &Data) -> Self {
        let edges = connection
            .get("edges")
            .and_then(Data::as_list)
            .cloned()
            .unwrap_or_default();
        let page_info = connection
            .get("pageInfo")
            .map(PageInfo::from_data)
            .unwrap_or_default();
        ConnectionState { edges, page_info }
    }

    /// The event that turns this state into `next`: an append or prepend if `next` extends
    /// the current edges at one end, a reset otherwise.
    pub fn event_to(&self, next: &ConnectionState) -> ConnectionEvent {
        let prev = &self.edges;
        let edges = &next.edges;
        let page_info = next.page_info.clone();
        if edges.len() > prev.len() {
            let added = edges.len() - prev.len();
            if edges[..prev.len()] == prev[..] {
                return ConnectionEvent::Append {
                    edges: edges[prev.len()..].to_vec(),
                    page_info
                };
            }
            if edges[added..] == prev[..] {
                return ConnectionEvent::Prepend {
                    edges: edges[..added].to_vec(),
                    page_info
                };
            }
        }
        ConnectionEvent::Reset {
            edges: edges.to_vec(),
            page_info
        }
    }
}

/// Fold one event into a connection state.
pub fn reduce(state: &ConnectionState, event: ConnectionEvent) -> ConnectionState {
    match event {
        ConnectionEvent::Initial { edges, page_info } | ConnectionEvent::Reset { edges, page_info } => {
            ConnectionState {
                edges: Arc::new(edges),
                page_info
            }
        }
        ConnectionEvent::Append { edges, page_info } => {
            let mut next = Vec::with_capacity(state.edges.len() + edges.len());
            next.extend(state.edges.iter().cloned());
            next.extend(edges);
            ConnectionState {
                edges: Arc::new(next),
                page_info: PageInfo {
                    start_cursor: state.page_info.start_cursor.clone(),
                    has_previous_page: state.page_info.has_previous_page,
                    ..page_info
                }
            }
        }
        ConnectionEvent::Prepend { edges, page_info } => {
            let mut next = Vec::with_capacity(state.edges.len() + edges.len());
            next.extend(edges);
            next.extend(state.edges.iter().cloned());
            ConnectionState {
                edges: Arc::new(next),
                page_info: PageInfo {
                    end_cursor: state.page_info.end_cursor.clone(),
                    has_next_page: state.page_info.has_next_page,
                    ..page_info
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DataObject;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn edge(cursor: &str) -> Data {
        let mut fields = BTreeMap::new();
        fields.insert("cursor".to_string(), Data::Scalar(json!(cursor)));
        Data::Object(Arc::new(DataObject {
            fields,
            ..DataObject::default()
        }))
    }

    fn page_info(start: &str, end: &str, has_next: bool) -> PageInfo {
        PageInfo {
            end_cursor: Some(end.to_string()),
            has_next_page: has_next,
            start_cursor: Some(start.to_string()),
            has_previous_page: false
        }
    }

    fn same_edge(a: &Data, b: &Data) -> bool {
        Arc::ptr_eq(a.as_object().unwrap(), b.as_object().unwrap())
    }

    #[test]
    fn appended_pages_keep_existing_edges() {
        let initial = reduce(
            &ConnectionState::default(),
            ConnectionEvent::Initial {
                edges: vec![edge("c1")],
                page_info: page_info("c1", "c1", true)
            }
        );
        let next = reduce(
            &initial,
            ConnectionEvent::Append {
                edges: vec![edge("c2")],
                page_info: page_info("c2", "c2", false)
            }
        );

        assert_eq!(next.edges.len(), 2);
        assert!(same_edge(&next.edges[0], &initial.edges[0]));
        assert!(!Arc::ptr_eq(&next.edges, &initial.edges));
        assert_eq!(next.page_info.start_cursor.as_deref(), Some("c1"));
        assert_eq!(next.page_info.end_cursor.as_deref(), Some("c2"));
        assert!(!next.page_info.has_next_page);
        assert_eq!(initial.edges.len(), 1);
    }

    #[test]
    fn prepended_pages_keep_the_end_cursor() {
        let initial = reduce(
            &ConnectionState::default(),
            ConnectionEvent::Initial {
                edges: vec![edge("c2")],
                page_info: page_info("c2", "c2", true)
            }
        );
        let next = reduce(
            &initial,
            ConnectionEvent::Prepend {
                edges: vec![edge("c1")],
                page_info: page_info("c1", "c1", false)
            }
        );
        assert!(same_edge(&next.edges[1], &initial.edges[0]));
        assert_eq!(next.page_info.start_cursor.as_deref(), Some("c1"));
        assert_eq!(next.page_info.end_cursor.as_deref(), Some("c2"));
        assert!(next.page_info.has_next_page);
    }

    #[test]
    fn events_are_derived_from_consecutive_reads() {
        let state = ConnectionState {
            edges: Arc::new(vec![edge("c2")]),
            page_info: page_info("c2", "c2", true)
        };
        let appended = ConnectionState {
            edges: Arc::new(vec![edge("c2"), edge("c3")]),
            page_info: page_info("c2", "c3", false)
        };
        let prepended = ConnectionState {
            edges: Arc::new(vec![edge("c1"), edge("c2")]),
            page_info: page_info("c1", "c2", true)
        };
        let replaced = ConnectionState {
            edges: Arc::new(vec![edge("c9")]),
            page_info: page_info("c9", "c9", true)
        };

        assert!(matches!(
            state.event_to(&appended),
            ConnectionEvent::Append { ref edges, .. } if edges.len() == 1
        ));
        assert!(matches!(
            state.event_to(&prepended),
            ConnectionEvent::Prepend { ref edges, .. } if edges.len() == 1
        ));
        assert!(matches!(state.event_to(&replaced), ConnectionEvent::Reset { .. }));
    }

    #[test]
    fn page_info_is_read_from_data() {
        let mut fields = BTreeMap::new();
        fields.insert("endCursor".to_string(), Data::Scalar(json!("c1")));
        fields.insert("hasNextPage".to_string(), Data::Scalar(json!(true)));
        fields.insert("startCursor".to_string(), Data::Scalar(json!(null)));
        let data = Data::Object(Arc::new(DataObject {
            fields,
            ..DataObject::default()
        }));
        assert_eq!(
            PageInfo::from_data(&data),
            PageInfo {
                end_cursor: Some("c1".to_string()),
                has_next_page: true,
                start_cursor: None,
                has_previous_page: false
            }
        );
    }
}
