use crate::tree::ExpandTree;
use serde::{Deserialize, Serialize};

/// A node of the relation graph: every subject holding `relation` on
/// `namespace:object`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubjectSet {
    pub namespace: String,
    pub object: String,
    pub relation: String,
}

impl SubjectSet {
    pub fn new(namespace: &str, object: &str, relation: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            object: object.to_string(),
            relation: relation.to_string(),
        }
    }
}

/// The subject of a relation tuple, either a plain identifier or another node
/// of the graph.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Subject {
    Id(String),
    Set(SubjectSet),
}

impl Subject {
    pub fn id(id: &str) -> Self {
        Self::Id(id.to_string())
    }

    pub fn set(namespace: &str, object: &str, relation: &str) -> Self {
        Self::Set(SubjectSet::new(namespace, object, relation))
    }

    pub fn as_subject_set(&self) -> Option<&SubjectSet> {
        match self {
            Self::Set(set) => Some(set),
            Self::Id(_) => None,
        }
    }
}

/// Represents a relationship tuple: `subject` has `relation` on `namespace:object`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RelationTuple {
    pub namespace: String,
    pub object: String,
    pub relation: String,
    pub subject: Subject,
}

impl RelationTuple {
    pub fn new(namespace: &str, object: &str, relation: &str, subject: Subject) -> Self {
        Self {
            namespace: namespace.to_string(),
            object: object.to_string(),
            relation: relation.to_string(),
            subject,
        }
    }

    /// The graph node this tuple is an edge out of.
    pub fn object_set(&self) -> SubjectSet {
        SubjectSet {
            namespace: self.namespace.clone(),
            object: self.object.clone(),
            relation: self.relation.clone(),
        }
    }

    /// Same subject, asked against another graph node.
    pub fn with_object_set(&self, set: &SubjectSet) -> Self {
        Self {
            namespace: set.namespace.clone(),
            object: set.object.clone(),
            relation: set.relation.clone(),
            subject: self.subject.clone(),
        }
    }
}

/// Authorization check request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckRequest {
    pub tuple: RelationTuple,
    pub max_depth: Option<u32>,
    #[serde(default)]
    pub explain: bool,
}

/// Authorization check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResponse {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tree: Option<ExpandTree>,
}

/// Expand request to get the subject tree of a graph node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpandRequest {
    pub subject_set: SubjectSet,
    pub max_depth: Option<u32>,
}
