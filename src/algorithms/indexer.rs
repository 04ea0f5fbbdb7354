//! Dense indexing of external user and item identifiers.

use crate::error::{IdKind, Result, SvdError};
use crate::models::ExternalId;
use std::collections::HashMap;

/// Frozen bijection between external identifiers and `0..len()`.
///
/// Indices are assigned in first-seen order, so the same training table
/// always yields the same assignment.
#[derive(Debug, Clone)]
pub struct IdIndex {
    kind: IdKind,
    forward: HashMap<ExternalId, usize>,
    reverse: Vec<ExternalId>,
}

impl IdIndex {
    pub fn new(kind: IdKind) -> Self {
        Self {
            kind,
            forward: HashMap::new(),
            reverse: Vec::new(),
        }
    }

    pub fn from_vocabulary(kind: IdKind, vocabulary: Vec<ExternalId>) -> Result<Self> {
        let mut forward = HashMap::with_capacity(vocabulary.len());
        for (position, id) in vocabulary.iter().enumerate() {
            if forward.insert(id.clone(), position).is_some() {
                return Err(SvdError::InvalidConfiguration(format!(
                    "duplicate {} identifier in vocabulary: {}",
                    kind, id
                )));
            }
        }
        Ok(Self {
            kind,
            forward,
            reverse: vocabulary,
        })
    }

    pub(crate) fn insert(&mut self, id: &ExternalId) -> usize {
        if let Some(&position) = self.forward.get(id) {
            return position;
        }
        let position = self.reverse.len();
        self.forward.insert(id.clone(), position);
        self.reverse.push(id.clone());
        position
    }

    pub fn get(&self, id: &ExternalId) -> Option<usize> {
        self.forward.get(id).copied()
    }

    pub fn lookup(&self, id: &ExternalId) -> Result<usize> {
        self.get(id).ok_or_else(|| SvdError::UnknownIdentifier {
            kind: self.kind,
            id: id.to_string(),
        })
    }

    pub fn external(&self, index: usize) -> Option<&ExternalId> {
        self.reverse.get(index)
    }

    pub fn vocabulary(&self) -> &[ExternalId] {
        &self.reverse
    }

    pub fn kind(&self) -> IdKind {
        self.kind
    }

    pub fn len(&self) -> usize {
        self.reverse.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reverse.is_empty()
    }
}
