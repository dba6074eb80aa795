//! Applies mutation batches to the content tree.

use tracing::{debug, warn};

use feedsync_core::{Anomaly, AnomalyKind, AppliedDiff, ContentId, ContentNode, Operation};

use crate::store::PayloadStore;
use crate::tree::{ContentTree, InsertOutcome, RootOutcome};

/// One structural effect of an applied operation, in batch order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeEvent {
    Cleared,
    /// A root was set on an empty tree, or replaced a different root
    RootSet {
        root: ContentId,
        replaced: Option<ContentId>,
    },
    Appended {
        parent: ContentId,
        child: ContentId,
    },
    /// An already-linked node was added again. `parent` is `None` for the root.
    Updated {
        parent: Option<ContentId>,
        id: ContentId,
        changed: bool,
    },
    Removed {
        parent: ContentId,
        child: ContentId,
    },
    SharedStateUpdated(ContentId),
}

#[derive(Debug, Default)]
pub struct ApplyOutcome {
    pub events: Vec<TreeEvent>,
    pub diff: AppliedDiff,
}

/// Apply `operations` in order. Malformed operations are skipped and
/// recorded as anomalies; the rest of the batch still applies.
pub fn apply_operations(
    tree: &mut ContentTree,
    operations: &[Operation],
    store: &dyn PayloadStore,
) -> ApplyOutcome {
    let mut outcome = ApplyOutcome::default();

    for (index, operation) in operations.iter().enumerate() {
        let result = match operation {
            Operation::ClearAll => {
                debug!("clearing content tree");
                tree.clear();
                outcome.diff.cleared = true;
                outcome.events.push(TreeEvent::Cleared);
                Ok(())
            }
            Operation::AddFeature { parent: None, node } => {
                let id = node.id.clone();
                tree.set_root(node.clone()).map(|root| {
                    persist(store, node, index, &mut outcome);
                    match root {
                        RootOutcome::Created => outcome.events.push(TreeEvent::RootSet {
                            root: id,
                            replaced: None,
                        }),
                        RootOutcome::Replaced { previous } => {
                            outcome.diff.replaced_root = Some(previous.clone());
                            outcome.events.push(TreeEvent::RootSet {
                                root: id,
                                replaced: Some(previous),
                            });
                        }
                        RootOutcome::Updated { changed } => {
                            if changed {
                                outcome.diff.change_mut(&id).feature_changed = true;
                            }
                            outcome.events.push(TreeEvent::Updated {
                                parent: None,
                                id,
                                changed,
                            });
                        }
                    }
                })
            }
            Operation::AddFeature {
                parent: Some(parent),
                node,
            } => tree.insert_child(parent, node.clone()).map(|inserted| {
                persist(store, node, index, &mut outcome);
                let child = node.id.clone();
                match inserted {
                    InsertOutcome::Appended => {
                        outcome.diff.change_mut(parent).appended_children.push(child.clone());
                        outcome.events.push(TreeEvent::Appended {
                            parent: parent.clone(),
                            child,
                        });
                    }
                    InsertOutcome::Updated { changed } => {
                        if changed {
                            outcome.diff.change_mut(&child).feature_changed = true;
                        }
                        outcome.events.push(TreeEvent::Updated {
                            parent: Some(parent.clone()),
                            id: child,
                            changed,
                        });
                    }
                }
            }),
            Operation::RemoveFeature { child, parent } => {
                tree.remove_child(parent, child).map(|()| {
                    outcome.diff.change_mut(parent).removed_children.push(child.clone());
                    outcome.events.push(TreeEvent::Removed {
                        parent: parent.clone(),
                        child: child.clone(),
                    });
                })
            }
            Operation::UpdateSharedState { state } => {
                if let Err(e) = store.put_shared_state(state) {
                    record(&mut outcome, index, AnomalyKind::StoreWrite(e.to_string()));
                }
                tree.put_shared_state(state.clone());
                outcome
                    .events
                    .push(TreeEvent::SharedStateUpdated(state.content_id.clone()));
                Ok(())
            }
            Operation::SetSemanticProperties { content_id, data } => {
                if let Err(e) = store.set_semantic_properties(content_id, data) {
                    record(&mut outcome, index, AnomalyKind::StoreWrite(e.to_string()));
                }
                Ok(())
            }
        };

        if let Err(kind) = result {
            record(&mut outcome, index, kind);
        }
    }

    outcome
}

fn persist(store: &dyn PayloadStore, node: &ContentNode, index: usize, outcome: &mut ApplyOutcome) {
    if let Err(e) = store.put_payloads(std::slice::from_ref(node)) {
        record(outcome, index, AnomalyKind::StoreWrite(e.to_string()));
    }
}

fn record(outcome: &mut ApplyOutcome, index: usize, kind: AnomalyKind) {
    warn!(operation = index, anomaly = %kind, "dropping malformed operation");
    outcome.diff.anomalies.push(Anomaly { index, kind });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryPayloadStore;
    use feedsync_core::MutationBatch;

    fn id(n: u64) -> ContentId {
        ContentId::feature("stream", n)
    }

    fn feature(n: u64) -> ContentNode {
        ContentNode::feature(id(n), format!("item {n}").into_bytes())
    }

    fn initial() -> MutationBatch {
        MutationBatch::new()
            .clear_all()
            .add_root(feature(0))
            .add_feature(id(0), feature(1))
            .add_feature(id(0), feature(2))
    }

    #[test]
    fn test_initial_batch_builds_tree_and_persists() {
        let mut tree = ContentTree::new();
        let store = InMemoryPayloadStore::new();
        let outcome = apply_operations(&mut tree, &initial().operations, &store);

        assert!(outcome.diff.cleared);
        assert!(outcome.diff.anomalies.is_empty());
        assert_eq!(tree.children(&id(0)), &[id(1), id(2)]);
        assert!(store.contains(&id(2)));
        assert_eq!(
            outcome.diff.change(&id(0)).unwrap().appended_children,
            vec![id(1), id(2)]
        );
        assert_eq!(
            outcome.events.last(),
            Some(&TreeEvent::Appended {
                parent: id(0),
                child: id(2)
            })
        );
    }

    #[test]
    fn test_malformed_operations_are_skipped() {
        let mut tree = ContentTree::new();
        let store = InMemoryPayloadStore::new();
        apply_operations(&mut tree, &initial().operations, &store);

        let batch = MutationBatch::new()
            .remove_feature(id(7), id(0))
            .add_feature(id(42), feature(3))
            .add_feature(id(0), feature(4));
        let outcome = apply_operations(&mut tree, &batch.operations, &store);

        assert_eq!(outcome.diff.anomalies.len(), 2);
        assert_eq!(outcome.diff.anomalies[0].index, 0);
        assert_eq!(outcome.diff.anomalies[1].index, 1);
        assert_eq!(tree.children(&id(0)), &[id(1), id(2), id(4)]);
    }

    #[test]
    fn test_update_sets_feature_changed_only_on_payload_change() {
        let mut tree = ContentTree::new();
        let store = InMemoryPayloadStore::new();
        apply_operations(&mut tree, &initial().operations, &store);

        let batch = MutationBatch::new()
            .add_feature(id(0), feature(1))
            .add_feature(id(0), ContentNode::feature(id(2), b"edited".to_vec()));
        let outcome = apply_operations(&mut tree, &batch.operations, &store);

        assert!(outcome.diff.change(&id(1)).is_none());
        assert!(outcome.diff.change(&id(2)).unwrap().feature_changed);
        assert!(outcome.diff.change(&id(0)).is_none());
        assert_eq!(outcome.events.len(), 2);
    }

    #[test]
    fn test_remove_records_removed_children() {
        let mut tree = ContentTree::new();
        let store = InMemoryPayloadStore::new();
        apply_operations(&mut tree, &initial().operations, &store);

        let batch = MutationBatch::new().remove_feature(id(1), id(0));
        let outcome = apply_operations(&mut tree, &batch.operations, &store);

        assert_eq!(outcome.diff.change(&id(0)).unwrap().removed_children, vec![id(1)]);
        assert_eq!(
            outcome.events,
            vec![TreeEvent::Removed {
                parent: id(0),
                child: id(1)
            }]
        );
    }

    #[test]
    fn test_root_replacement_reported() {
        let mut tree = ContentTree::new();
        let store = InMemoryPayloadStore::new();
        apply_operations(&mut tree, &initial().operations, &store);

        let batch = MutationBatch::new().add_root(feature(100)).add_feature(id(100), feature(5));
        let outcome = apply_operations(&mut tree, &batch.operations, &store);

        assert_eq!(outcome.diff.replaced_root, Some(id(0)));
        assert!(outcome.diff.started_new_epoch());
        assert!(outcome.events.contains(&TreeEvent::RootSet {
            root: id(100),
            replaced: Some(id(0))
        }));
        assert_eq!(
            outcome.events.last(),
            Some(&TreeEvent::Appended {
                parent: id(100),
                child: id(5)
            })
        );
    }
}
