//! Structural diffs produced by applying a mutation batch.

use serde::Serialize;
use thiserror::Error;

use crate::content::ContentId;

/// Change to one feature: its children and/or its own payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeatureChange {
    pub content_id: ContentId,
    pub appended_children: Vec<ContentId>,
    pub removed_children: Vec<ContentId>,
    /// True only when the feature's own payload changed
    pub feature_changed: bool,
}

impl FeatureChange {
    pub fn new(content_id: ContentId) -> Self {
        Self {
            content_id,
            appended_children: Vec::new(),
            removed_children: Vec::new(),
            feature_changed: false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.appended_children.is_empty() && self.removed_children.is_empty() && !self.feature_changed
    }
}

/// Why an operation in a batch was dropped.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
pub enum AnomalyKind {
    #[error("parent {parent} of {child} does not exist")]
    ParentNotFound { parent: ContentId, child: ContentId },

    #[error("edge {parent} -> {child} does not exist")]
    EdgeNotFound { parent: ContentId, child: ContentId },

    #[error("token {0} cannot be the root")]
    TokenAsRoot(ContentId),

    #[error("adding {child} under {parent} would create a cycle")]
    Cycle { parent: ContentId, child: ContentId },

    #[error("payload store write failed: {0}")]
    StoreWrite(String),
}

/// A non-fatal problem recorded while applying a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Anomaly {
    /// Index of the offending operation in the batch
    pub index: usize,
    pub kind: AnomalyKind,
}

/// Tree-level summary of one applied batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AppliedDiff {
    /// Per-feature changes, in order of first touch
    pub changes: Vec<FeatureChange>,
    pub anomalies: Vec<Anomaly>,
    /// The batch contained `ClearAll`
    pub cleared: bool,
    /// Previous root when the batch replaced it
    pub replaced_root: Option<ContentId>,
}

impl AppliedDiff {
    /// Change entry for `content_id`, created on first use.
    pub fn change_mut(&mut self, content_id: &ContentId) -> &mut FeatureChange {
        let index = match self.changes.iter().position(|c| &c.content_id == content_id) {
            Some(index) => index,
            None => {
                self.changes.push(FeatureChange::new(content_id.clone()));
                self.changes.len() - 1
            }
        };
        &mut self.changes[index]
    }

    pub fn change(&self, content_id: &ContentId) -> Option<&FeatureChange> {
        self.changes.iter().find(|c| &c.content_id == content_id)
    }

    pub fn started_new_epoch(&self) -> bool {
        self.cleared || self.replaced_root.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_change_mut_reuses_entry() {
        let mut diff = AppliedDiff::default();
        let parent = ContentId::feature("s", 0);
        diff.change_mut(&parent).appended_children.push(ContentId::feature("s", 1));
        diff.change_mut(&parent).appended_children.push(ContentId::feature("s", 2));
        assert_eq!(diff.changes.len(), 1);
        assert_eq!(diff.change(&parent).unwrap().appended_children.len(), 2);
    }

    #[test]
    fn test_anomaly_message() {
        let kind = AnomalyKind::ParentNotFound {
            parent: ContentId::feature("s", 9),
            child: ContentId::feature("s", 1),
        };
        assert_eq!(kind.to_string(), "parent feature::s::9 of feature::s::1 does not exist");
    }
}
