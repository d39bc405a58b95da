use crate::models::{RelationTuple, Subject};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of node an edge of the relation graph leads to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    Union,
    Leaf,
}

/// Explanation of a positive check: the chain of tuples that proved membership.
///
/// Built bottom-up while results travel back through the edge annotators, so no
/// second walk over the graph is needed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExpandTree {
    Leaf {
        tuple: RelationTuple,
    },
    Union {
        tuple: RelationTuple,
        children: Vec<ExpandTree>,
    },
}

impl ExpandTree {
    pub fn tuple(&self) -> &RelationTuple {
        match self {
            ExpandTree::Leaf { tuple } | ExpandTree::Union { tuple, .. } => tuple,
        }
    }

    pub fn children(&self) -> &[ExpandTree] {
        match self {
            ExpandTree::Leaf { .. } => &[],
            ExpandTree::Union { children, .. } => children,
        }
    }

    pub fn node_type(&self) -> NodeType {
        match self {
            ExpandTree::Leaf { .. } => NodeType::Leaf,
            ExpandTree::Union { .. } => NodeType::Union,
        }
    }

    /// Length of the longest path from this node down to a leaf, counting nodes.
    pub fn depth(&self) -> usize {
        1 + self
            .children()
            .iter()
            .map(ExpandTree::depth)
            .max()
            .unwrap_or(0)
    }
}

/// Subject tree produced by the expand engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectTree {
    pub node_type: NodeType,
    pub subject: Subject,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<SubjectTree>,
}

impl SubjectTree {
    pub fn leaf(subject: Subject) -> Self {
        Self {
            node_type: NodeType::Leaf,
            subject,
            children: Vec::new(),
        }
    }

    /// All subject ids reachable in this tree, in tree order and without duplicates.
    pub fn subject_ids(&self) -> Vec<String> {
        let mut ids = Vec::new();
        self.collect_ids(&mut ids);
        ids
    }

    fn collect_ids(&self, ids: &mut Vec<String>) {
        if let Subject::Id(id) = &self.subject {
            if !ids.contains(id) {
                ids.push(id.clone());
            }
        }
        for child in &self.children {
            child.collect_ids(ids);
        }
    }
}

fn render(
    f: &mut fmt::Formatter<'_>,
    node_type: NodeType,
    label: &dyn fmt::Display,
    children: Vec<String>,
) -> fmt::Result {
    if node_type == NodeType::Leaf {
        return write!(f, "☘ {}", label);
    }

    write!(f, "∪ {}", label)?;
    for child in children {
        write!(f, "\n├─ {}", child.replace('\n', "\n│  "))?;
    }
    Ok(())
}

impl fmt::Display for ExpandTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let children = self.children().iter().map(ToString::to_string).collect();
        render(f, self.node_type(), self.tuple(), children)
    }
}

impl fmt::Display for SubjectTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let children = self.children.iter().map(ToString::to_string).collect();
        render(f, self.node_type, &self.subject, children)
    }
}
