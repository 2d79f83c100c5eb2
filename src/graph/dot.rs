//! DOT format rendering of a dependency graph.
//!
//! The output can be rendered with Graphviz tools and is meant for diagnosing why a node ended
//! up in an image: every edge is labelled with the reason recorded when it was produced.

use std::{fmt::Display, fmt::Write, hash::Hash};

use crate::graph::{arena::NodeArena, edge::DependencyEdge};

/// Escapes a string for safe use in DOT format labels and identifiers.
///
/// # Examples
///
/// ```rust
/// use aotgraph::graph::dot::escape_dot;
///
/// assert_eq!(escape_dot("Method<T>"), "Method\\<T\\>");
/// ```
#[must_use]
pub fn escape_dot(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
        .replace('\r', "")
        .replace('<', "\\<")
        .replace('>', "\\>")
}

/// Renders the marked nodes of `arena` and the given edges as a DOT digraph.
///
/// Nodes are labelled with their key and listed in key order; unmarked nodes are omitted.
#[must_use]
pub fn to_dot<K>(name: &str, arena: &NodeArena<K>, edges: &[DependencyEdge]) -> String
where
    K: Eq + Hash + Clone + Ord + Display,
{
    let mut nodes: Vec<_> = arena
        .iter()
        .filter(|(_, node)| node.state().is_marked())
        .collect();
    nodes.sort_by(|(_, a), (_, b)| a.key().cmp(b.key()));

    let mut out = String::new();
    let _ = writeln!(out, "digraph \"{}\" {{", escape_dot(name));
    let _ = writeln!(out, "    node [shape=box];");

    for (id, node) in &nodes {
        let _ = writeln!(
            out,
            "    {} [label=\"{}\"];",
            id,
            escape_dot(&node.key().to_string())
        );
    }

    for edge in edges {
        let _ = writeln!(
            out,
            "    {} -> {} [label=\"{}\"];",
            edge.from,
            edge.to,
            escape_dot(edge.reason)
        );
    }

    out.push_str("}\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::node::NodeState;

    #[test]
    fn test_escape_dot() {
        assert_eq!(escape_dot("hello"), "hello");
        assert_eq!(escape_dot("say \"hello\""), "say \\\"hello\\\"");
        assert_eq!(escape_dot("path\\to\\file"), "path\\\\to\\\\file");
        assert_eq!(escape_dot("line1\r\nline2"), "line1\\nline2");
        assert_eq!(escape_dot("List<int>"), "List\\<int\\>");
    }

    #[test]
    fn test_to_dot() {
        let arena: NodeArena<String> = NodeArena::new();
        let a = arena.get_or_create("A<T>".to_string());
        let b = arena.get_or_create("B".to_string());
        arena.get_or_create("unmarked".to_string());
        arena.advance(a, NodeState::Expanded);
        arena.advance(b, NodeState::Expanded);

        let edges = [DependencyEdge {
            from: a,
            to: b,
            reason: "calls",
        }];
        let dot = to_dot("test", &arena, &edges);

        assert!(dot.starts_with("digraph \"test\" {"));
        assert!(dot.contains("n0 [label=\"A\\<T\\>\"];"));
        assert!(dot.contains("n0 -> n1 [label=\"calls\"];"));
        assert!(!dot.contains("unmarked"));
        assert!(dot.ends_with("}\n"));
    }
}
