//! Compact string form of relation tuples.
//!
//! ```text
//! namespace:object#relation@subject_id
//! namespace:object#relation@(namespace:object#relation)
//! ```

use crate::error::CheckError;
use crate::models::{RelationTuple, Subject, SubjectSet};
use std::fmt;
use std::str::FromStr;

impl fmt::Display for SubjectSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}#{}", self.namespace, self.object, self.relation)
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Subject::Id(id) => write!(f, "{}", id),
            Subject::Set(set) => write!(f, "({})", set),
        }
    }
}

impl fmt::Display for RelationTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}#{}@{}",
            self.namespace, self.object, self.relation, self.subject
        )
    }
}

fn split_once_or<'a>(input: &'a str, separator: char) -> Result<(&'a str, &'a str), CheckError> {
    input.split_once(separator).ok_or_else(|| {
        CheckError::MalformedInput(format!("expected input to contain '{}'", separator))
    })
}

impl FromStr for RelationTuple {
    type Err = CheckError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (namespace, rest) = split_once_or(s, ':')?;
        let (object, rest) = split_once_or(rest, '#')?;
        let (relation, subject) = split_once_or(rest, '@')?;

        // brackets around a subject set are optional
        let subject = subject.trim_matches(|c| c == '(' || c == ')');
        let subject = if subject.contains('#') {
            Subject::Set(subject.parse()?)
        } else {
            Subject::Id(subject.to_string())
        };

        Ok(RelationTuple::new(namespace, object, relation, subject))
    }
}

impl FromStr for SubjectSet {
    type Err = CheckError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('#').collect();
        let [node, relation] = parts.as_slice() else {
            return Err(CheckError::MalformedInput(
                "expected subject set to contain '#'".to_string(),
            ));
        };

        let inner: Vec<&str> = node.split(':').collect();
        let [namespace, object] = inner.as_slice() else {
            return Err(CheckError::MalformedInput(
                "expected subject set to contain ':'".to_string(),
            ));
        };

        Ok(SubjectSet::new(namespace, object, relation))
    }
}
