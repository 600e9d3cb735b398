// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Tag-tree runtime.
//!
//! A schema declares which tag paths exist: static nodes contribute a
//! fixed segment, wildcard nodes contribute a run-time string. The
//! materialized [`TagTree`] only hands out nodes for paths the schema
//! authorizes, so tags built through it cannot drift from the declared
//! shape.
//!
//! # Example
//!
//! ```
//! use tagcache::schema::{at, wild, TagTree};
//!
//! // posts/<id>/comments, posts/<id>/likes, and a flat "session" tag.
//! let tree = TagTree::new(vec![
//!     at(
//!         "posts",
//!         vec![wild(
//!             vec![at("comments", vec![], vec![]), at("likes", vec![], vec![])],
//!             vec![],
//!         )],
//!         vec![at("session", vec![], vec![])],
//!     ),
//! ]);
//!
//! let comments = tree
//!     .at("posts").unwrap()
//!     .wild("42").unwrap()
//!     .at("comments").unwrap();
//! assert_eq!(comments.tag().serialize(), "posts:42:comments");
//!
//! // Siblings live alongside their node, not under it.
//! assert!(tree.at("session").is_some());
//! assert!(tree.at("posts").unwrap().at("session").is_none());
//! ```

use crate::tag::TagPath;

/// One declared node of the schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaNode {
    kind: NodeKind,
    children: Vec<SchemaNode>,
    siblings: Vec<SchemaNode>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum NodeKind {
    Static(String),
    Wild,
}

/// A static node: contributes `name` as a fixed path segment.
#[must_use]
pub fn at(
    name: impl Into<String>,
    children: Vec<SchemaNode>,
    siblings: Vec<SchemaNode>,
) -> SchemaNode {
    SchemaNode {
        kind: NodeKind::Static(name.into()),
        children,
        siblings,
    }
}

/// A wildcard node: contributes a caller-supplied string as a path
/// segment.
#[must_use]
pub fn wild(children: Vec<SchemaNode>, siblings: Vec<SchemaNode>) -> SchemaNode {
    SchemaNode {
        kind: NodeKind::Wild,
        children,
        siblings,
    }
}

/// Collect a branch: each node plus, transitively, its siblings.
fn flatten<'a>(nodes: &'a [SchemaNode], out: &mut Vec<&'a SchemaNode>) {
    for node in nodes {
        out.push(node);
        flatten(&node.siblings, out);
    }
}

/// The materialized, navigable schema.
///
/// Owns the schema nodes; [`TagNode`]s borrow from it and stay cheap to
/// produce. The tree is immutable after construction and can be shared
/// freely.
#[derive(Debug, Clone)]
pub struct TagTree {
    roots: Vec<SchemaNode>,
}

impl TagTree {
    #[must_use]
    pub fn new(roots: Vec<SchemaNode>) -> Self {
        Self { roots }
    }

    /// Navigate to a top-level static node.
    #[must_use]
    pub fn at(&self, name: &str) -> Option<TagNode<'_>> {
        branch_static(&self.roots, &[], name)
    }

    /// Call the top-level wildcard, if the schema declares one.
    #[must_use]
    pub fn wild(&self, id: &str) -> Option<TagNode<'_>> {
        branch_wild(&self.roots, &[], id)
    }
}

/// A reachable position in the tree, carrying the full tag path used to
/// get there.
#[derive(Debug, Clone)]
pub struct TagNode<'a> {
    path: TagPath,
    branch: &'a [SchemaNode],
}

impl<'a> TagNode<'a> {
    /// The tag path materialized at this node.
    #[must_use]
    pub fn tag(&self) -> &TagPath {
        &self.path
    }

    /// Consume the node, keeping only its path.
    #[must_use]
    pub fn into_tag(self) -> TagPath {
        self.path
    }

    /// Navigate to a static child (or a sibling of one) by name.
    #[must_use]
    pub fn at(&self, name: &str) -> Option<TagNode<'a>> {
        branch_static(self.branch, self.path.segments(), name)
    }

    /// Call this level's wildcard with a run-time id.
    #[must_use]
    pub fn wild(&self, id: &str) -> Option<TagNode<'a>> {
        branch_wild(self.branch, self.path.segments(), id)
    }

    /// The wildcard at this level as a value. Uncalled, it stands for its
    /// parent's path, which is this node's own.
    #[must_use]
    pub fn wildcard(&self) -> Option<WildcardNode<'a>> {
        let mut flat = Vec::new();
        flatten(self.branch, &mut flat);
        flat.into_iter()
            .find(|node| node.kind == NodeKind::Wild)
            .map(|node| WildcardNode {
                parent_path: self.path.clone(),
                node,
            })
    }
}

/// A wildcard considered as a value rather than called.
#[derive(Debug, Clone)]
pub struct WildcardNode<'a> {
    parent_path: TagPath,
    node: &'a SchemaNode,
}

impl<'a> WildcardNode<'a> {
    /// The path this wildcard-value stands for: its parent's.
    #[must_use]
    pub fn tag(&self) -> &TagPath {
        &self.parent_path
    }

    /// Call the wildcard: one more segment than the wildcard-value's path.
    #[must_use]
    pub fn call(&self, id: &str) -> TagNode<'a> {
        TagNode {
            path: self.parent_path.child(id),
            branch: &self.node.children,
        }
    }
}

fn branch_static<'a>(
    nodes: &'a [SchemaNode],
    parent_segments: &[String],
    name: &str,
) -> Option<TagNode<'a>> {
    let mut flat = Vec::new();
    flatten(nodes, &mut flat);
    let node = flat
        .into_iter()
        .find(|node| matches!(&node.kind, NodeKind::Static(n) if n == name))?;
    let mut segments: Vec<String> = parent_segments.to_vec();
    segments.push(name.to_string());
    Some(TagNode {
        path: TagPath::new(segments).ok()?,
        branch: &node.children,
    })
}

fn branch_wild<'a>(
    nodes: &'a [SchemaNode],
    parent_segments: &[String],
    id: &str,
) -> Option<TagNode<'a>> {
    let mut flat = Vec::new();
    flatten(nodes, &mut flat);
    let node = flat.into_iter().find(|node| node.kind == NodeKind::Wild)?;
    let mut segments: Vec<String> = parent_segments.to_vec();
    segments.push(id.to_string());
    Some(TagNode {
        path: TagPath::new(segments).ok()?,
        branch: &node.children,
    })
}
