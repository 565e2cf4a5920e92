//! Compiled artifact format
//!
//! An artifact is the node list produced from a template, serialized as JSON
//! in the render cache. It carries no view name, so two templates with
//! identical source share one artifact.

use serde::{Deserialize, Serialize};

use crate::expr::{Expr, ForHeader, ForeachHeader, Stmt};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "node", rename_all = "snake_case")]
pub enum Node {
    Text { text: String },
    Output { expr: Expr, escape: bool },
    If {
        branches: Vec<Branch>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        otherwise: Option<Vec<Node>>,
    },
    For { header: ForHeader, body: Vec<Node> },
    Foreach { header: ForeachHeader, body: Vec<Node> },
    While { cond: Expr, body: Vec<Node> },
    Code { stmts: Vec<Stmt> },
    /// Runtime include of another view.
    Include {
        target: Expr,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        params: Option<Expr>,
    },
    /// A literal include whose body was spliced in by the static inliner.
    Inline {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        params: Option<Expr>,
        body: Vec<Node>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Branch {
    pub cond: Expr,
    pub body: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    /// Content hash of the template source this artifact was compiled from.
    pub hash: String,
    pub nodes: Vec<Node>,
}

impl Artifact {
    /// Runtime include targets left in this artifact, depth first.
    pub fn includes(&self) -> Vec<&Expr> {
        let mut found = Vec::new();
        walk(&self.nodes, &mut |node| {
            if let Node::Include { target, .. } = node {
                found.push(target);
            }
        });
        found
    }
}

/// Visit every node, descending into block bodies and inlined views.
pub fn walk<'a>(nodes: &'a [Node], visit: &mut impl FnMut(&'a Node)) {
    for node in nodes {
        visit(node);
        match node {
            Node::If { branches, otherwise } => {
                for branch in branches {
                    walk(&branch.body, visit);
                }
                if let Some(body) = otherwise {
                    walk(body, visit);
                }
            }
            Node::For { body, .. }
            | Node::Foreach { body, .. }
            | Node::While { body, .. }
            | Node::Inline { body, .. } => walk(body, visit),
            Node::Text { .. } | Node::Output { .. } | Node::Code { .. } | Node::Include { .. } => {}
        }
    }
}

/// Parse a stored artifact.
///
/// Nested blocks and inlined views nest the JSON deeper than serde_json's
/// default limit of 128; depth is bounded at compile time instead.
pub fn parse_artifact(json: &str) -> Result<Artifact, serde_json::Error> {
    let mut de = serde_json::Deserializer::from_str(json);
    de.disable_recursion_limit();
    let artifact = Artifact::deserialize(&mut de)?;
    de.end()?;
    Ok(artifact)
}

pub fn compiled_file_name(hash: &str) -> String {
    format!("{}.json", hash)
}

pub fn static_file_name(hash: &str) -> String {
    format!("static_{}.json", hash)
}
