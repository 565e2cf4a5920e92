//! Static inliner
//!
//! Splices the compiled body of every literally named `@view` include into
//! the including artifact. Includes computed at runtime, and literal includes
//! that would recurse into a view already being inlined or nest deeper than
//! [`MAX_INLINE_DEPTH`], stay runtime includes.

use std::collections::BTreeMap;

use thiserror::Error;
use tracing::debug;

use crate::hashing::canonical_hash;
use crate::ir::{Artifact, Branch, Node};
use crate::templates::normalize_name;

/// Longest chain of views spliced into one static artifact.
pub const MAX_INLINE_DEPTH: usize = 8;

#[derive(Debug, Error)]
pub enum InlineError {
    #[error("View `{view}` includes `{target}`, which does not exist")]
    MissingTarget { view: String, target: String },

    #[error("Failed to hash static artifact: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Build the static artifact of every view in `compiled`.
///
/// The static artifact's `hash` is the canonical hash of its inlined nodes,
/// so any change along an inlined chain gives it a new identity.
pub fn inline_views(compiled: &BTreeMap<String, Artifact>) -> Result<BTreeMap<String, Artifact>, InlineError> {
    let mut out = BTreeMap::new();
    for (name, artifact) in compiled {
        let mut stack = vec![name.clone()];
        let nodes = inline_nodes(&artifact.nodes, compiled, &mut stack)?;
        let hash = canonical_hash(&nodes)?;
        debug!(view = %name, hash = %hash, "inlined view");
        out.insert(name.clone(), Artifact { hash, nodes });
    }
    Ok(out)
}

fn inline_nodes(
    nodes: &[Node],
    compiled: &BTreeMap<String, Artifact>,
    stack: &mut Vec<String>,
) -> Result<Vec<Node>, InlineError> {
    nodes.iter().map(|node| inline_node(node, compiled, stack)).collect()
}

fn inline_node(node: &Node, compiled: &BTreeMap<String, Artifact>, stack: &mut Vec<String>) -> Result<Node, InlineError> {
    let node = match node {
        Node::Include { target, params } => {
            let Some(literal) = target.as_literal_str() else {
                return Ok(node.clone());
            };
            let key = normalize_name(literal).unwrap_or_else(|| literal.to_string());
            if stack.contains(&key) || stack.len() > MAX_INLINE_DEPTH {
                return Ok(node.clone());
            }
            let included = compiled.get(&key).ok_or_else(|| InlineError::MissingTarget {
                view: stack.last().cloned().unwrap_or_default(),
                target: literal.to_string(),
            })?;
            stack.push(key.clone());
            let body = inline_nodes(&included.nodes, compiled, stack);
            stack.pop();
            Node::Inline { name: key, params: params.clone(), body: body? }
        }
        Node::If { branches, otherwise } => Node::If {
            branches: branches
                .iter()
                .map(|b| {
                    Ok(Branch { cond: b.cond.clone(), body: inline_nodes(&b.body, compiled, stack)? })
                })
                .collect::<Result<_, InlineError>>()?,
            otherwise: otherwise.as_ref().map(|body| inline_nodes(body, compiled, stack)).transpose()?,
        },
        Node::For { header, body } => Node::For {
            header: header.clone(),
            body: inline_nodes(body, compiled, stack)?,
        },
        Node::Foreach { header, body } => Node::Foreach {
            header: header.clone(),
            body: inline_nodes(body, compiled, stack)?,
        },
        Node::While { cond, body } => Node::While {
            cond: cond.clone(),
            body: inline_nodes(body, compiled, stack)?,
        },
        Node::Text { .. } | Node::Output { .. } | Node::Code { .. } | Node::Inline { .. } => node.clone(),
    };
    Ok(node)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::compile_source;

    fn compiled(views: &[(&str, &str)]) -> BTreeMap<String, Artifact> {
        views
            .iter()
            .map(|(name, src)| (name.to_string(), compile_source(name, src).unwrap()))
            .collect()
    }

    fn has_runtime_include(artifact: &Artifact) -> bool {
        !artifact.includes().is_empty()
    }

    #[test]
    fn test_literal_include_is_inlined() {
        let views = compiled(&[("page", "<main>@view('partials/nav')</main>"), ("partials/nav", "<nav>")]);
        let statics = inline_views(&views).unwrap();
        let page = &statics["page"];
        assert!(!has_runtime_include(page));
        assert!(matches!(&page.nodes[1], Node::Inline { name, .. } if name == "partials/nav"));
    }

    #[test]
    fn test_dotted_literal_is_inlined() {
        let views = compiled(&[("page", "@view('partials.nav')"), ("partials/nav", "<nav>")]);
        let statics = inline_views(&views).unwrap();
        assert!(!has_runtime_include(&statics["page"]));
    }

    #[test]
    fn test_nested_chain_is_flattened() {
        let views = compiled(&[("a", "@view('b')"), ("b", "@if($x) @view('c') @endif"), ("c", "C")]);
        let statics = inline_views(&views).unwrap();
        assert!(!has_runtime_include(&statics["a"]));
    }

    #[test]
    fn test_dynamic_include_is_kept() {
        let views = compiled(&[("page", "@view('alerts/' . $kind)")]);
        let statics = inline_views(&views).unwrap();
        assert!(has_runtime_include(&statics["page"]));
    }

    #[test]
    fn test_cycle_stays_runtime_include() {
        let views = compiled(&[("a", "@view('b')"), ("b", "@view('a')")]);
        let statics = inline_views(&views).unwrap();
        let Node::Inline { body, .. } = &statics["a"].nodes[0] else { panic!("expected inline") };
        assert!(matches!(body[0], Node::Include { .. }));
    }

    #[test]
    fn test_long_chain_stops_inlining_at_depth_limit() {
        let sources: Vec<(String, String)> = (0..20)
            .map(|i| (format!("v{}", i), if i < 19 { format!("@view('v{}')", i + 1) } else { "end".to_string() }))
            .collect();
        let views: BTreeMap<String, Artifact> = sources
            .iter()
            .map(|(name, src)| (name.clone(), compile_source(name, src).unwrap()))
            .collect();
        let statics = inline_views(&views).unwrap();

        let mut depth = 0;
        let mut nodes = &statics["v0"].nodes;
        while let Node::Inline { body, .. } = &nodes[0] {
            depth += 1;
            nodes = body;
        }
        assert_eq!(depth, MAX_INLINE_DEPTH);
        assert!(matches!(nodes[0], Node::Include { .. }));
        assert!(!has_runtime_include(&statics["v15"]));
    }

    #[test]
    fn test_missing_literal_target_is_an_error() {
        let views = compiled(&[("page", "@view('ghost')")]);
        let err = inline_views(&views).unwrap_err();
        assert!(matches!(err, InlineError::MissingTarget { ref view, ref target } if view == "page" && target == "ghost"));
    }

    #[test]
    fn test_static_hash_tracks_included_content() {
        let before = inline_views(&compiled(&[("page", "@view('nav')"), ("nav", "v1")])).unwrap();
        let after = inline_views(&compiled(&[("page", "@view('nav')"), ("nav", "v2")])).unwrap();
        assert_eq!(before["page"].hash.len(), 64);
        assert_ne!(before["page"].hash, after["page"].hash);
    }
}
