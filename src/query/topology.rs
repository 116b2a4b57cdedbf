// SPDX-License-Identifier: Apache-2.0

//! Service call-graph derivation from the current span window. Each span
//! triggers at most one parent lookup; the walk never recurses, so
//! self-referencing or cyclic parentage cannot loop.

use crate::telemetry::record::SpanRecord;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct ServiceNode {
    pub service: String,
    /// Reserved; the graph may contain cycles, so depth is not computed.
    pub depth: u32,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct ServiceEdge {
    pub source: String,
    pub target: String,
    /// Number of spans witnessing this parent→child service pair.
    pub count: usize,
}

#[derive(Clone, Debug, Default, Serialize, PartialEq)]
pub struct ServiceGraph {
    pub nodes: Vec<ServiceNode>,
    pub edges: Vec<ServiceEdge>,
}

/// Build the graph: a node per distinct service, an edge per distinct
/// cross-service (parent service → child service) pair where the parent
/// span is resolvable in the span-id index. Spans without parents add only
/// their own node; spans whose parent fell out of the window add neither an
/// edge nor a parent node. Output is sorted for stable serialization.
pub fn derive<'a, I, F>(spans: I, lookup: F) -> ServiceGraph
where
    I: IntoIterator<Item = &'a Arc<SpanRecord>>,
    F: Fn(&str) -> Option<&'a Arc<SpanRecord>>,
{
    let mut services: BTreeSet<String> = BTreeSet::new();
    let mut edges: BTreeMap<(String, String), usize> = BTreeMap::new();

    for span in spans {
        services.insert(span.service_name.clone());

        if span.parent_span_id.is_empty() {
            continue;
        }
        let Some(parent) = lookup(&span.parent_span_id) else {
            continue;
        };
        if parent.service_name == span.service_name {
            continue;
        }

        services.insert(parent.service_name.clone());
        *edges
            .entry((parent.service_name.clone(), span.service_name.clone()))
            .or_default() += 1;
    }

    ServiceGraph {
        nodes: services
            .into_iter()
            .map(|service| ServiceNode { service, depth: 0 })
            .collect(),
        edges: edges
            .into_iter()
            .map(|((source, target), count)| ServiceEdge {
                source,
                target,
                count,
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::record::{SpanKind, SpanStatus, StatusCode};
    use chrono::Utc;
    use std::collections::HashMap;

    fn span(span_id: &str, parent: &str, service: &str) -> Arc<SpanRecord> {
        Arc::new(SpanRecord {
            trace_id: "t".to_string(),
            span_id: span_id.to_string(),
            parent_span_id: parent.to_string(),
            name: "op".to_string(),
            kind: SpanKind::Server,
            start_time_unix_nano: 0,
            end_time_unix_nano: 0,
            status: SpanStatus {
                code: StatusCode::Unset,
                message: String::new(),
            },
            attributes: Default::default(),
            events: vec![],
            links: vec![],
            service_name: service.to_string(),
            resource_attributes: Default::default(),
            scope_name: String::new(),
            scope_version: String::new(),
            received_at: Utc::now(),
        })
    }

    fn graph(spans: &[Arc<SpanRecord>]) -> ServiceGraph {
        let index: HashMap<&str, &Arc<SpanRecord>> =
            spans.iter().map(|s| (s.span_id.as_str(), s)).collect();
        derive(spans.iter(), |id| index.get(id).copied())
    }

    #[test]
    fn chain_produces_nodes_and_counted_edges() {
        let spans = vec![
            span("a", "", "front"),
            span("b", "a", "back"),
            span("c", "b", "db"),
            span("c2", "b", "db"),
        ];
        let g = graph(&spans);

        let nodes: Vec<&str> = g.nodes.iter().map(|n| n.service.as_str()).collect();
        assert_eq!(vec!["back", "db", "front"], nodes);
        assert!(g.nodes.iter().all(|n| n.depth == 0));

        assert_eq!(
            vec![
                ServiceEdge {
                    source: "back".to_string(),
                    target: "db".to_string(),
                    count: 2,
                },
                ServiceEdge {
                    source: "front".to_string(),
                    target: "back".to_string(),
                    count: 1,
                },
            ],
            g.edges
        );
    }

    #[test]
    fn same_service_parentage_adds_no_edge() {
        let spans = vec![span("a", "", "front"), span("b", "a", "front")];
        let g = graph(&spans);
        assert_eq!(1, g.nodes.len());
        assert!(g.edges.is_empty());
    }

    #[test]
    fn missing_parent_contributes_child_node_only() {
        let spans = vec![span("b", "gone", "back")];
        let g = graph(&spans);
        assert_eq!(vec!["back"], g.nodes.iter().map(|n| n.service.as_str()).collect::<Vec<_>>());
        assert!(g.edges.is_empty());
    }

    #[test]
    fn self_parent_and_cycles_do_not_loop() {
        // A span that is its own parent, and a two-span cycle across
        // services.
        let spans = vec![
            span("x", "x", "loop"),
            span("p", "q", "alpha"),
            span("q", "p", "beta"),
        ];
        let g = graph(&spans);

        let nodes: Vec<&str> = g.nodes.iter().map(|n| n.service.as_str()).collect();
        assert_eq!(vec!["alpha", "beta", "loop"], nodes);
        // Both directions of the cycle are witnessed once.
        assert_eq!(2, g.edges.len());
    }
}
